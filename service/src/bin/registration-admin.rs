//! Registration operations tool.
//!
//! Runs maintenance tasks against the production store:
//! - apply database migrations
//! - inspect a registration
//! - replay a saved Stripe webhook body through the reconciler
//! - cancel a stuck PENDING registration and expire its checkout
//!
//! # Usage
//!
//! ```bash
//! registration-admin migrate
//! registration-admin status <REGISTRATION_ID> --tenant <TENANT_ID>
//! registration-admin replay-webhook ./evt_checkout_completed.json
//! registration-admin cancel-pending <REGISTRATION_ID> --tenant <TENANT_ID> --account acct_123
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use registration_core::environment::SystemClock;
use registration_core::{Caller, RegistrationId, Tenant, TenantId, UserId};
use registration_postgres::PostgresRegistrationStore;
use registration_service::webhook::parse_stripe_event;
use registration_service::{
    CheckoutSettings, Config, RegistrationService, StripeClient, WebhookReconciler,
};
use sqlx::postgres::PgPoolOptions;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "registration-admin")]
#[command(about = "Event registration operations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending database migrations
    Migrate,

    /// Print the status of a registration as JSON
    Status {
        /// Registration id
        registration_id: RegistrationId,
        #[command(flatten)]
        tenant: TenantArgs,
    },

    /// Apply a saved, already verified Stripe webhook body
    ReplayWebhook {
        /// File holding the raw event JSON
        file: PathBuf,
    },

    /// Cancel a PENDING registration, release its spot and expire its checkout
    CancelPending {
        /// Registration id
        registration_id: RegistrationId,
        #[command(flatten)]
        tenant: TenantArgs,
    },
}

#[derive(Args)]
struct TenantArgs {
    /// Tenant owning the registration
    #[arg(long)]
    tenant: TenantId,

    /// Tenant currency
    #[arg(long, default_value = "eur")]
    currency: String,

    /// Connected Stripe account of the tenant
    #[arg(long)]
    account: Option<String>,
}

impl TenantArgs {
    fn tenant(self) -> Tenant {
        Tenant {
            id: self.tenant,
            currency: self.currency,
            payment_account_id: self.account,
            enabled_discounts: BTreeSet::new(),
        }
    }
}

/// Operators act with every capability.
fn operator() -> Caller {
    Caller {
        user_id: UserId::new(),
        can_manage_registrations: true,
        can_check_in: true,
    }
}

async fn connect(config: &Config) -> Result<PostgresRegistrationStore> {
    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .min_connections(config.postgres.min_connections)
        .acquire_timeout(config.postgres.connect_timeout())
        .idle_timeout(config.postgres.idle_timeout())
        .connect(&config.postgres.url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    Ok(PostgresRegistrationStore::new(pool))
}

fn service(
    config: &Config,
    store: PostgresRegistrationStore,
) -> RegistrationService<PostgresRegistrationStore, StripeClient> {
    let stripe = StripeClient::with_api_base(
        config.stripe.secret_key.clone(),
        config.stripe.api_base.clone(),
    );
    RegistrationService::new(
        store,
        stripe,
        Arc::new(SystemClock),
        CheckoutSettings::from(&config.checkout),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
    registration_service::metrics::register_metrics();

    let cli = Cli::parse();
    tracing::debug!(?config, "Configuration loaded");
    let store = connect(&config).await?;

    match cli.cmd {
        Command::Migrate => {
            store.migrate().await.context("Migration failed")?;
            tracing::info!("Migrations applied");
        }
        Command::Status {
            registration_id,
            tenant,
        } => {
            let view = service(&config, store)
                .get_registration_status(&operator(), &tenant.tenant(), registration_id)
                .await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Command::ReplayWebhook { file } => {
            let body = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let event = parse_stripe_event(&body).context("Not a Stripe event")?;
            let outcome = WebhookReconciler::new(store).apply(&event).await?;
            tracing::info!(event = event.name(), outcome = outcome.as_str(), "Webhook replayed");
            println!("{}", outcome.as_str());
        }
        Command::CancelPending {
            registration_id,
            tenant,
        } => {
            service(&config, store)
                .cancel_pending(&operator(), &tenant.tenant(), registration_id)
                .await?;
            tracing::info!(%registration_id, "Pending registration cancelled");
        }
    }

    Ok(())
}
