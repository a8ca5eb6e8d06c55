//! Payment provider boundary.
//!
//! The provider hosts checkout pages and later reports what happened through
//! webhooks. This module defines the outbound requests the orchestrator makes
//! and the inbound notifications the reconciler consumes; transport details
//! (HTTP, signatures) belong to the implementation.

use crate::error::ProviderError;
use crate::types::{Money, RegistrationId, TenantId, TransactionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Identifiers attached to every checkout as provider-side metadata, so that
/// webhooks can find the right rows without ambiguity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMetadata {
    /// Registration being paid for
    pub registration_id: RegistrationId,
    /// Local transaction row
    pub transaction_id: TransactionId,
    /// Owning tenant
    pub tenant_id: TenantId,
}

/// Request to open a hosted checkout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSessionRequest {
    /// Amount to collect
    pub amount: Money,
    /// ISO 4217 currency code
    pub currency: String,
    /// Line item name shown to the payer
    pub description: String,
    /// Provider-side tax rate reference
    pub tax_rate_id: Option<String>,
    /// Where the payer lands after paying
    pub success_url: String,
    /// Where the payer lands after abandoning
    pub cancel_url: String,
    /// Correlation identifiers
    pub metadata: PaymentMetadata,
    /// Connected account to create the session on
    pub account_id: Option<String>,
    /// When the provider should expire the session on its own
    pub expires_at: Option<DateTime<Utc>>,
}

/// An opened checkout session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Provider session id
    pub id: String,
    /// Hosted checkout URL for the payer
    pub url: Option<String>,
}

/// Outbound calls to the payment provider.
pub trait PaymentProvider: Send + Sync {
    /// Open a hosted checkout session.
    ///
    /// # Errors
    ///
    /// Returns error on network failure, timeout, or a provider-side rejection.
    fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> impl Future<Output = Result<CheckoutSession, ProviderError>> + Send;

    /// Expire a session that will never be paid.
    ///
    /// # Errors
    ///
    /// Returns error on network failure, timeout, or a provider-side rejection.
    fn expire_checkout_session(
        &self,
        session_id: &str,
        account_id: Option<&str>,
    ) -> impl Future<Output = Result<(), ProviderError>> + Send;
}

/// A verified notification from the payment provider.
///
/// Delivery is at-least-once and unordered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderEvent {
    /// The payer finished the checkout.
    CheckoutCompleted {
        /// Provider session id
        session_id: String,
        /// Metadata set at creation, if echoed back
        metadata: Option<PaymentMetadata>,
        /// Payment intent created for the session
        payment_intent_id: Option<String>,
    },

    /// The session expired without payment.
    CheckoutExpired {
        /// Provider session id
        session_id: String,
        /// Metadata set at creation, if echoed back
        metadata: Option<PaymentMetadata>,
    },

    /// Settlement details of a charge changed (fees known, funds available).
    ChargeUpdated {
        /// Provider charge id
        charge_id: String,
        /// Payment intent the charge belongs to
        payment_intent_id: Option<String>,
        /// Metadata copied onto the payment intent, if echoed back
        metadata: Option<PaymentMetadata>,
        /// Amount after fees
        net_amount: Option<Money>,
        /// Provider fee
        fee_amount: Option<Money>,
    },

    /// The charge was refunded, in whole or in part.
    ChargeRefunded {
        /// Provider charge id
        charge_id: String,
        /// Payment intent the charge belongs to
        payment_intent_id: Option<String>,
        /// Metadata copied onto the payment intent, if echoed back
        metadata: Option<PaymentMetadata>,
        /// The whole captured amount has been returned
        fully_refunded: bool,
    },

    /// Anything this core does not act on.
    Unhandled {
        /// Provider event type
        event_type: String,
    },
}

impl ProviderEvent {
    /// Short name for logs and metrics labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CheckoutCompleted { .. } => "checkout_completed",
            Self::CheckoutExpired { .. } => "checkout_expired",
            Self::ChargeUpdated { .. } => "charge_updated",
            Self::ChargeRefunded { .. } => "charge_refunded",
            Self::Unhandled { .. } => "unhandled",
        }
    }
}
