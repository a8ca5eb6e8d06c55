//! # Registration Service
//!
//! The imperative shell around `registration-core`: it runs registration
//! requests against a [`RegistrationStore`](registration_core::store::RegistrationStore),
//! opens hosted checkouts through a
//! [`PaymentProvider`](registration_core::provider::PaymentProvider) and applies
//! the provider's asynchronous notifications.
//!
//! - [`RegistrationService`]: admission, paid checkout orchestration with
//!   compensation, cancellation, the waitlist, status and check-in
//! - [`WebhookReconciler`]: idempotent application of provider events
//! - [`StripeClient`] and [`webhook::parse_stripe_event`]: the Stripe
//!   integration
//! - [`config`] and [`metrics`]: ambient configuration and counters
//!
//! # Example
//!
//! ```ignore
//! use registration_service::{CheckoutSettings, RegistrationService, StripeClient};
//! use registration_core::environment::SystemClock;
//! use std::sync::Arc;
//!
//! let service = RegistrationService::new(
//!     store,
//!     StripeClient::new(secret_key),
//!     Arc::new(SystemClock),
//!     CheckoutSettings::from(&config.checkout),
//! );
//! let admission = service.register_for_event(&caller, &tenant, option_id).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod metrics;
pub mod reconciler;
pub mod registration;
pub mod status;
pub mod stripe;
pub mod webhook;

pub use config::Config;
pub use reconciler::{ReconcileOutcome, WebhookReconciler};
pub use registration::{Admission, CheckoutReference, CheckoutSettings, RegistrationService};
pub use status::{
    CheckInEligibility, CheckInOutcome, DiscountSummary, RegistrationStatusView, ScanResult,
    check_in_eligibility,
};
pub use stripe::StripeClient;
