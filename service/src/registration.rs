//! Registration service: admission, paid checkout orchestration, cancellation
//! and the waitlist path.
//!
//! A paid registration runs in three steps:
//!
//! ```text
//! unit 1: admit (insert PENDING + reserve) → resolve price → snapshot  ──commit──┐
//!                                                                               │
//! provider: create checkout session  ◄──────────────────────────────────────────┘
//!     │ fails ───────────────────────────────► compensate (cancel + release + delete)
//!     ▼
//! unit 2: insert pending transaction ──commit──► Admission { checkout }
//!     │ fails ──► expire session (best effort) ► compensate
//! ```
//!
//! Once a transaction row exists the webhook reconciler owns the outcome.

use crate::config::CheckoutConfig;
use crate::metrics;
use chrono::Duration;
use registration_core::discount::resolve_price;
use registration_core::environment::Clock;
use registration_core::ledger::{self, ClaimKind};
use registration_core::lifecycle;
use registration_core::provider::{CheckoutSessionRequest, PaymentMetadata, PaymentProvider};
use registration_core::store::{RegistrationStore, UnitOfWork};
use registration_core::{
    Caller, EventInfo, InternalError, Money, OptionId, PaymentStatus, RegistrationError,
    Registration, RegistrationId, RegistrationOption, RegistrationStatus, Result, StoreError,
    Tenant, Transaction, TransactionId, TransactionMethod, TransactionStatus, UserId,
};
use serde::Serialize;
use std::sync::Arc;

/// Failed rollback attempts before the stall is logged as an error.
const ROLLBACK_ATTEMPTS: u32 = 3;
const ROLLBACK_BACKOFF: std::time::Duration = std::time::Duration::from_millis(50);
const ROLLBACK_MAX_BACKOFF: std::time::Duration = std::time::Duration::from_secs(2);

/// How checkouts are opened.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    /// Public URL of the web app; callback URLs are built from it
    pub public_base_url: String,
    /// Lifetime of an unpaid checkout; `None` leaves it to the provider
    pub expires_after: Option<Duration>,
}

impl CheckoutSettings {
    fn success_url(&self, event: &EventInfo, registration_id: RegistrationId) -> String {
        format!(
            "{}/events/{}?registration={registration_id}&checkout=success",
            self.public_base_url.trim_end_matches('/'),
            event.id
        )
    }

    fn cancel_url(&self, event: &EventInfo, registration_id: RegistrationId) -> String {
        format!(
            "{}/events/{}?registration={registration_id}&checkout=cancel",
            self.public_base_url.trim_end_matches('/'),
            event.id
        )
    }
}

impl From<&CheckoutConfig> for CheckoutSettings {
    fn from(config: &CheckoutConfig) -> Self {
        Self {
            public_base_url: config.public_base_url.clone(),
            expires_after: (config.expiry_minutes > 0)
                .then(|| Duration::minutes(i64::from(config.expiry_minutes))),
        }
    }
}

/// Where to send the payer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutReference {
    /// Local transaction row
    pub transaction_id: TransactionId,
    /// Provider session id
    pub session_id: String,
    /// Hosted checkout page
    pub url: Option<String>,
}

/// Result of a successful registration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Admission {
    /// The new registration
    pub registration_id: RegistrationId,
    /// `CONFIRMED` for free or fully discounted claims, `PENDING` otherwise
    pub status: RegistrationStatus,
    /// Present while payment is outstanding
    pub checkout: Option<CheckoutReference>,
}

enum Admitted {
    Confirmed(Registration),
    AwaitingPayment {
        registration: Registration,
        event: EventInfo,
        option: RegistrationOption,
        amount: Money,
    },
}

/// Entry point for registration requests.
pub struct RegistrationService<S, P> {
    pub(crate) store: S,
    provider: P,
    pub(crate) clock: Arc<dyn Clock>,
    checkout: CheckoutSettings,
}

impl<S, P> RegistrationService<S, P>
where
    S: RegistrationStore,
    P: PaymentProvider,
{
    /// Create a service over a store and a payment provider.
    #[must_use]
    pub fn new(store: S, provider: P, clock: Arc<dyn Clock>, checkout: CheckoutSettings) -> Self {
        Self {
            store,
            provider,
            clock,
            checkout,
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────

    /// Register the caller on an option.
    ///
    /// Free options confirm immediately. Paid options reserve a spot, freeze
    /// the discounted price and open a hosted checkout; if the price resolves
    /// to zero the reservation is confirmed without contacting the provider.
    ///
    /// # Errors
    ///
    /// - `AlreadyRegistered` / `CapacityExhausted` when the claim is rejected
    /// - `OptionNotFound` for unknown options or options of another tenant
    /// - `Internal` when persistence or the provider fails; any reservation
    ///   made by this call has been rolled back by then
    #[tracing::instrument(skip(self, caller, tenant), fields(user_id = %caller.user_id))]
    pub async fn register_for_event(
        &self,
        caller: &Caller,
        tenant: &Tenant,
        option_id: OptionId,
    ) -> Result<Admission> {
        let result = self.register(caller.user_id, tenant, option_id).await;
        match &result {
            Ok(admission) if admission.status == RegistrationStatus::Confirmed => {
                metrics::record_admission("confirmed");
            }
            Ok(_) => metrics::record_admission("reserved"),
            Err(e) => metrics::record_admission_failure(e.kind()),
        }
        result
    }

    async fn register(
        &self,
        user_id: UserId,
        tenant: &Tenant,
        option_id: OptionId,
    ) -> Result<Admission> {
        match self.admit(user_id, tenant, option_id).await? {
            Admitted::Confirmed(registration) => Ok(Admission {
                registration_id: registration.id,
                status: registration.status,
                checkout: None,
            }),
            Admitted::AwaitingPayment {
                registration,
                event,
                option,
                amount,
            } => {
                self.open_checkout(tenant, &registration, &event, &option, amount)
                    .await
            }
        }
    }

    /// Admission unit: checks, insert, ledger claim and pricing.
    async fn admit(&self, user_id: UserId, tenant: &Tenant, option_id: OptionId) -> Result<Admitted> {
        let mut unit = self.store.begin().await?;
        let (option, event) = load_option_for_tenant(&mut unit, tenant, option_id).await?;

        if unit.find_active_registration(user_id, event.id).await?.is_some() {
            return Err(RegistrationError::AlreadyRegistered { event_id: event.id });
        }
        if !option.has_capacity() {
            return Err(RegistrationError::CapacityExhausted { option_id });
        }

        let mut registration = Registration {
            id: RegistrationId::new(),
            user_id,
            event_id: event.id,
            option_id,
            tenant_id: tenant.id,
            status: lifecycle::initial_status(option.is_paid),
            payment_status: option.is_paid.then_some(PaymentStatus::Pending),
            check_in_time: None,
            pricing: None,
            created_at: self.clock.now(),
        };
        insert_registration(&mut unit, &registration).await?;

        // A failed claim drops the unit, which discards the inserted row.
        let kind = if option.is_paid {
            ClaimKind::Reserved
        } else {
            ClaimKind::Confirmed
        };
        ledger::claim(&mut unit, option_id, kind).await?;

        if !option.is_paid {
            unit.commit().await?;
            tracing::info!(registration_id = %registration.id, %option_id, "Free registration confirmed");
            return Ok(Admitted::Confirmed(registration));
        }

        let cards = unit.verified_discount_cards(user_id).await?;
        let discounts = unit.option_discounts(option_id).await?;
        let price = resolve_price(
            option.price,
            &cards,
            &discounts,
            &tenant.enabled_discounts,
            event.start,
        );
        let snapshot = price.snapshot();
        unit.save_pricing(registration.id, &snapshot).await?;
        registration.pricing = Some(snapshot);

        if price.is_free() {
            let confirmed = lifecycle::transition(
                &mut unit,
                &registration,
                RegistrationStatus::Confirmed,
                Some(PaymentStatus::Paid),
            )
            .await?;
            if !confirmed {
                return Err(InternalError::MissingRelation {
                    entity: "registration",
                    id: registration.id.to_string(),
                }
                .into());
            }
            unit.commit().await?;

            registration.status = RegistrationStatus::Confirmed;
            registration.payment_status = Some(PaymentStatus::Paid);
            tracing::info!(
                registration_id = %registration.id,
                %option_id,
                discount = ?registration.pricing.as_ref().and_then(|p| p.applied_discount_type.as_ref()),
                "Price resolved to zero, registration confirmed without checkout"
            );
            return Ok(Admitted::Confirmed(registration));
        }

        unit.commit().await?;
        tracing::info!(
            registration_id = %registration.id,
            %option_id,
            amount = %price.effective_price,
            "Spot reserved pending payment"
        );
        Ok(Admitted::AwaitingPayment {
            registration,
            event,
            option,
            amount: price.effective_price,
        })
    }

    /// Provider call and transaction unit, compensating on failure.
    async fn open_checkout(
        &self,
        tenant: &Tenant,
        registration: &Registration,
        event: &EventInfo,
        option: &RegistrationOption,
        amount: Money,
    ) -> Result<Admission> {
        let transaction_id = TransactionId::new();
        let now = self.clock.now();
        let request = CheckoutSessionRequest {
            amount,
            currency: tenant.currency.clone(),
            description: format!("{} ({})", event.title, option.title),
            tax_rate_id: option.tax_rate_id.clone(),
            success_url: self.checkout.success_url(event, registration.id),
            cancel_url: self.checkout.cancel_url(event, registration.id),
            metadata: PaymentMetadata {
                registration_id: registration.id,
                transaction_id,
                tenant_id: tenant.id,
            },
            account_id: tenant.payment_account_id.clone(),
            expires_at: self.checkout.expires_after.map(|lifetime| now + lifetime),
        };

        let session = match self.provider.create_checkout_session(&request).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(
                    registration_id = %registration.id,
                    %transaction_id,
                    error = %e,
                    "Checkout session creation failed"
                );
                metrics::record_provider_failure("create_checkout_session");
                self.roll_back(registration, "checkout_failed").await;
                return Err(e.into());
            }
        };

        let transaction = Transaction {
            id: transaction_id,
            tenant_id: tenant.id,
            registration_id: registration.id,
            user_id: registration.user_id,
            amount,
            net_amount: None,
            fee_amount: None,
            currency: tenant.currency.clone(),
            status: TransactionStatus::Pending,
            method: TransactionMethod::Stripe,
            checkout_session_id: Some(session.id.clone()),
            checkout_url: session.url.clone(),
            payment_intent_id: None,
            charge_id: None,
            created_at: now,
        };

        if let Err(e) = self.persist_transaction(&transaction).await {
            tracing::error!(
                registration_id = %registration.id,
                %transaction_id,
                session_id = %session.id,
                error = %e,
                "Failed to record transaction for open checkout"
            );
            self.expire_quietly(&session.id, tenant.payment_account_id.as_deref())
                .await;
            self.roll_back(registration, "transaction_failed").await;
            return Err(e);
        }

        tracing::info!(
            registration_id = %registration.id,
            %transaction_id,
            session_id = %session.id,
            "Checkout opened"
        );
        Ok(Admission {
            registration_id: registration.id,
            status: RegistrationStatus::Pending,
            checkout: Some(CheckoutReference {
                transaction_id,
                session_id: session.id,
                url: session.url,
            }),
        })
    }

    async fn persist_transaction(&self, transaction: &Transaction) -> Result<()> {
        let mut unit = self.store.begin().await?;
        unit.insert_transaction(transaction).await?;
        unit.commit().await?;
        Ok(())
    }

    /// Undo a reservation that never got a transaction.
    ///
    /// Does not return until the reservation is gone. Retries back off up to
    /// [`ROLLBACK_MAX_BACKOFF`]; once [`ROLLBACK_ATTEMPTS`] have failed the
    /// stall is reported once and retrying continues.
    async fn roll_back(&self, registration: &Registration, reason: &'static str) {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            match self.try_roll_back(registration).await {
                Ok(()) => {
                    tracing::info!(
                        registration_id = %registration.id,
                        option_id = %registration.option_id,
                        reason,
                        attempt,
                        "Reservation rolled back"
                    );
                    metrics::record_rollback(reason);
                    return;
                }
                Err(e) if attempt == ROLLBACK_ATTEMPTS => {
                    tracing::error!(
                        registration_id = %registration.id,
                        option_id = %registration.option_id,
                        reason,
                        error = %e,
                        "Rollback keeps failing, reservation still held"
                    );
                    metrics::record_rollback("stalled");
                }
                Err(e) => {
                    tracing::warn!(
                        registration_id = %registration.id,
                        attempt,
                        error = %e,
                        "Rollback attempt failed"
                    );
                }
            }
            tokio::time::sleep(
                ROLLBACK_BACKOFF
                    .saturating_mul(attempt)
                    .min(ROLLBACK_MAX_BACKOFF),
            )
            .await;
        }
    }

    async fn try_roll_back(&self, registration: &Registration) -> Result<()> {
        let mut unit = self.store.begin().await?;
        let Some(current) = unit.load_registration(registration.id).await? else {
            return Ok(());
        };

        match current.status {
            RegistrationStatus::Pending => {
                let cancelled =
                    lifecycle::transition(&mut unit, &current, RegistrationStatus::Cancelled, None)
                        .await?;
                if !cancelled {
                    return Err(StoreError::Database(
                        "registration changed during rollback".to_string(),
                    )
                    .into());
                }
            }
            RegistrationStatus::Cancelled => {}
            status => {
                tracing::warn!(
                    registration_id = %registration.id,
                    %status,
                    "Registration moved on before rollback, leaving it in place"
                );
                return Ok(());
            }
        }

        unit.delete_registration(registration.id).await?;
        unit.commit().await?;
        Ok(())
    }

    pub(crate) async fn expire_quietly(&self, session_id: &str, account_id: Option<&str>) {
        if let Err(e) = self
            .provider
            .expire_checkout_session(session_id, account_id)
            .await
        {
            tracing::warn!(session_id, error = %e, "Could not expire checkout session");
            metrics::record_provider_failure("expire_checkout_session");
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Cancellation
    // ─────────────────────────────────────────────────────────────

    /// Cancel a registration that is still waiting for payment.
    ///
    /// Releases the reserved spot, cancels the pending transaction and asks
    /// the provider to expire the abandoned checkout. A provider failure is
    /// logged only.
    ///
    /// # Errors
    ///
    /// - `RegistrationNotFound` for unknown ids or another tenant's rows
    /// - `Forbidden` unless the caller owns the registration or may manage
    ///   registrations
    /// - `InvalidTransition` unless the registration is PENDING
    #[tracing::instrument(skip(self, caller, tenant), fields(user_id = %caller.user_id))]
    pub async fn cancel_pending(
        &self,
        caller: &Caller,
        tenant: &Tenant,
        registration_id: RegistrationId,
    ) -> Result<()> {
        let mut unit = self.store.begin().await?;
        let registration = load_for_caller(&mut unit, caller, tenant, registration_id).await?;
        if registration.status != RegistrationStatus::Pending {
            return Err(RegistrationError::InvalidTransition {
                from: registration.status,
                to: RegistrationStatus::Cancelled,
            });
        }
        self.finish_pending_cancellation(unit, tenant, &registration)
            .await
    }

    /// Cancel a registration.
    ///
    /// PENDING registrations go through [`Self::cancel_pending`]; CONFIRMED
    /// ones release their confirmed spot.
    ///
    /// # Errors
    ///
    /// Same as [`Self::cancel_pending`], with `InvalidTransition` for
    /// registrations that are already cancelled or waitlisted.
    #[tracing::instrument(skip(self, caller, tenant), fields(user_id = %caller.user_id))]
    pub async fn cancel_registration(
        &self,
        caller: &Caller,
        tenant: &Tenant,
        registration_id: RegistrationId,
    ) -> Result<()> {
        let mut unit = self.store.begin().await?;
        let registration = load_for_caller(&mut unit, caller, tenant, registration_id).await?;

        match registration.status {
            RegistrationStatus::Pending => {
                self.finish_pending_cancellation(unit, tenant, &registration)
                    .await
            }
            RegistrationStatus::Confirmed => {
                cancel_in(&mut unit, &registration).await?;
                unit.commit().await?;
                tracing::info!(%registration_id, "Confirmed registration cancelled");
                Ok(())
            }
            from => Err(RegistrationError::InvalidTransition {
                from,
                to: RegistrationStatus::Cancelled,
            }),
        }
    }

    async fn finish_pending_cancellation(
        &self,
        mut unit: S::Unit,
        tenant: &Tenant,
        registration: &Registration,
    ) -> Result<()> {
        cancel_in(&mut unit, registration).await?;

        let pending = unit.pending_transaction_for(registration.id).await?;
        if let Some(transaction) = &pending {
            unit.update_transaction_status(
                transaction.id,
                TransactionStatus::Pending,
                TransactionStatus::Cancelled,
            )
            .await?;
        }
        unit.commit().await?;
        tracing::info!(registration_id = %registration.id, "Pending registration cancelled");

        if let Some(session_id) = pending.and_then(|t| t.checkout_session_id) {
            self.expire_quietly(&session_id, tenant.payment_account_id.as_deref())
                .await;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Waitlist
    // ─────────────────────────────────────────────────────────────

    /// Put the caller on an option's waitlist.
    ///
    /// Waitlist entries hold no capacity and are never promoted here.
    ///
    /// # Errors
    ///
    /// `AlreadyRegistered` if the caller holds any non-cancelled registration
    /// for the event, `OptionNotFound` for unknown options.
    #[tracing::instrument(skip(self, caller, tenant), fields(user_id = %caller.user_id))]
    pub async fn join_waitlist(
        &self,
        caller: &Caller,
        tenant: &Tenant,
        option_id: OptionId,
    ) -> Result<RegistrationId> {
        let result = self.waitlist(caller.user_id, tenant, option_id).await;
        match &result {
            Ok(_) => metrics::record_admission("waitlisted"),
            Err(e) => metrics::record_admission_failure(e.kind()),
        }
        result
    }

    async fn waitlist(
        &self,
        user_id: UserId,
        tenant: &Tenant,
        option_id: OptionId,
    ) -> Result<RegistrationId> {
        let mut unit = self.store.begin().await?;
        let (_, event) = load_option_for_tenant(&mut unit, tenant, option_id).await?;

        if unit.find_active_registration(user_id, event.id).await?.is_some() {
            return Err(RegistrationError::AlreadyRegistered { event_id: event.id });
        }

        let registration = Registration {
            id: RegistrationId::new(),
            user_id,
            event_id: event.id,
            option_id,
            tenant_id: tenant.id,
            status: RegistrationStatus::Waitlist,
            payment_status: None,
            check_in_time: None,
            pricing: None,
            created_at: self.clock.now(),
        };
        insert_registration(&mut unit, &registration).await?;
        unit.add_to_waitlist(option_id).await?;
        unit.commit().await?;

        tracing::info!(registration_id = %registration.id, %option_id, "Joined waitlist");
        Ok(registration.id)
    }
}

// ─────────────────────────────────────────────────────────────
// Unit helpers
// ─────────────────────────────────────────────────────────────

async fn load_option_for_tenant<U: UnitOfWork>(
    unit: &mut U,
    tenant: &Tenant,
    option_id: OptionId,
) -> Result<(RegistrationOption, EventInfo)> {
    let option = unit
        .load_option(option_id)
        .await?
        .ok_or(RegistrationError::OptionNotFound(option_id))?;
    let event = unit
        .load_event(option.event_id)
        .await?
        .ok_or_else(|| InternalError::MissingRelation {
            entity: "event",
            id: option.event_id.to_string(),
        })?;

    if event.tenant_id != tenant.id {
        return Err(RegistrationError::OptionNotFound(option_id));
    }
    Ok((option, event))
}

/// Load a registration the caller may act on.
pub(crate) async fn load_for_caller<U: UnitOfWork>(
    unit: &mut U,
    caller: &Caller,
    tenant: &Tenant,
    registration_id: RegistrationId,
) -> Result<Registration> {
    let registration = unit
        .load_registration(registration_id)
        .await?
        .filter(|r| r.tenant_id == tenant.id)
        .ok_or(RegistrationError::RegistrationNotFound(registration_id))?;

    if !caller.may_act_for(registration.user_id) {
        return Err(RegistrationError::Forbidden);
    }
    Ok(registration)
}

async fn insert_registration<U: UnitOfWork>(unit: &mut U, registration: &Registration) -> Result<()> {
    match unit.insert_registration(registration).await {
        Ok(()) => Ok(()),
        Err(StoreError::UniqueViolation(_)) => Err(RegistrationError::AlreadyRegistered {
            event_id: registration.event_id,
        }),
        Err(e) => Err(e.into()),
    }
}

/// Move a registration to CANCELLED, reporting the status that won if a
/// concurrent update got there first.
async fn cancel_in<U: UnitOfWork>(unit: &mut U, registration: &Registration) -> Result<()> {
    if lifecycle::transition(unit, registration, RegistrationStatus::Cancelled, None).await? {
        return Ok(());
    }
    let from = unit
        .load_registration(registration.id)
        .await?
        .map_or(RegistrationStatus::Cancelled, |r| r.status);
    Err(RegistrationError::InvalidTransition {
        from,
        to: RegistrationStatus::Cancelled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let settings = CheckoutSettings::from(&CheckoutConfig {
            public_base_url: "https://app.test/".to_string(),
            expiry_minutes: 0,
        });
        assert_eq!(settings.expires_after, None);

        let settings = CheckoutSettings::from(&CheckoutConfig {
            public_base_url: "https://app.test/".to_string(),
            expiry_minutes: 45,
        });
        assert_eq!(settings.expires_after, Some(Duration::minutes(45)));
    }

    #[test]
    fn test_callback_urls_point_back_to_the_event() {
        let settings = CheckoutSettings {
            public_base_url: "https://app.test/".to_string(),
            expires_after: None,
        };
        let event = EventInfo {
            id: registration_core::EventId::new(),
            tenant_id: registration_core::TenantId::new(),
            title: "Pub Crawl".to_string(),
            start: chrono::Utc::now(),
        };
        let registration_id = RegistrationId::new();

        assert_eq!(
            settings.success_url(&event, registration_id),
            format!(
                "https://app.test/events/{}?registration={registration_id}&checkout=success",
                event.id
            )
        );
        assert!(
            settings
                .cancel_url(&event, registration_id)
                .ends_with("&checkout=cancel")
        );
    }
}
