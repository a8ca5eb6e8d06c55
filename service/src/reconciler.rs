//! Applies payment-provider notifications to local state.
//!
//! Deliveries are at-least-once and unordered, so every handler guards on
//! the current state of the transaction and registration it touches and
//! replays as a no-op. Notifications that reference nothing we know are
//! logged and acknowledged. Store failures are returned so that the
//! transport answers with an error and the provider redelivers.

use crate::metrics;
use registration_core::lifecycle;
use registration_core::provider::{PaymentMetadata, ProviderEvent};
use registration_core::store::{RegistrationStore, TransactionLookup, UnitOfWork};
use registration_core::{
    Money, PaymentStatus, Registration, RegistrationStatus, Result, Transaction,
    TransactionStatus,
};

/// How a notification was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Local state changed
    Applied,
    /// Already reflected locally (duplicate or stale delivery)
    NoOp,
    /// Unknown reference or an event type we do not act on
    Ignored,
}

impl ReconcileOutcome {
    /// Metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::NoOp => "no_op",
            Self::Ignored => "ignored",
        }
    }
}

/// Provider-side references carried by a notification.
#[derive(Clone, Copy)]
struct Reference<'a> {
    metadata: Option<&'a PaymentMetadata>,
    session_id: Option<&'a str>,
    payment_intent_id: Option<&'a str>,
}

/// Webhook reconciler
pub struct WebhookReconciler<S> {
    store: S,
}

impl<S: RegistrationStore> WebhookReconciler<S> {
    /// Create a reconciler over the shared store.
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Apply one provider notification.
    ///
    /// # Errors
    ///
    /// Returns an internal error when the store fails; nothing of the
    /// notification has been applied then and redelivery is safe.
    #[tracing::instrument(skip_all, fields(event = event.name()))]
    pub async fn apply(&self, event: &ProviderEvent) -> Result<ReconcileOutcome> {
        let result = match event {
            ProviderEvent::CheckoutCompleted {
                session_id,
                metadata,
                payment_intent_id,
            } => {
                let reference = Reference {
                    metadata: metadata.as_ref(),
                    session_id: Some(session_id),
                    payment_intent_id: payment_intent_id.as_deref(),
                };
                self.checkout_completed(reference).await
            }
            ProviderEvent::CheckoutExpired {
                session_id,
                metadata,
            } => {
                let reference = Reference {
                    metadata: metadata.as_ref(),
                    session_id: Some(session_id),
                    payment_intent_id: None,
                };
                self.checkout_expired(reference).await
            }
            ProviderEvent::ChargeUpdated {
                charge_id,
                payment_intent_id,
                metadata,
                net_amount,
                fee_amount,
            } => {
                let reference = Reference {
                    metadata: metadata.as_ref(),
                    session_id: None,
                    payment_intent_id: payment_intent_id.as_deref(),
                };
                let settlement = (*net_amount).zip(*fee_amount);
                self.charge_updated(reference, charge_id, settlement).await
            }
            ProviderEvent::ChargeRefunded {
                charge_id,
                payment_intent_id,
                metadata,
                fully_refunded,
            } => {
                let reference = Reference {
                    metadata: metadata.as_ref(),
                    session_id: None,
                    payment_intent_id: payment_intent_id.as_deref(),
                };
                self.charge_refunded(reference, charge_id, *fully_refunded)
                    .await
            }
            ProviderEvent::Unhandled { event_type } => {
                tracing::debug!(event_type, "Ignoring provider event");
                Ok(ReconcileOutcome::Ignored)
            }
        };

        match &result {
            Ok(outcome) => metrics::record_webhook(event.name(), outcome.as_str()),
            Err(e) => {
                tracing::error!(error = ?e, "Failed to apply provider event");
                metrics::record_webhook(event.name(), "error");
            }
        }
        result
    }

    async fn checkout_completed(&self, reference: Reference<'_>) -> Result<ReconcileOutcome> {
        let mut unit = self.store.begin().await?;
        let Some((transaction, registration)) = locate(&mut unit, reference).await? else {
            return Ok(ReconcileOutcome::Ignored);
        };

        if reference.payment_intent_id.is_some()
            && transaction.payment_intent_id.as_deref() != reference.payment_intent_id
        {
            unit.record_payment_references(transaction.id, reference.payment_intent_id, None)
                .await?;
        }

        let mut changed = false;
        if transaction.status != TransactionStatus::Successful {
            changed |= unit
                .update_transaction_status(
                    transaction.id,
                    transaction.status,
                    TransactionStatus::Successful,
                )
                .await?;
        }

        match registration.status {
            RegistrationStatus::Pending => {
                if lifecycle::transition(
                    &mut unit,
                    &registration,
                    RegistrationStatus::Confirmed,
                    Some(PaymentStatus::Paid),
                )
                .await?
                {
                    changed = true;
                    tracing::info!(
                        registration_id = %registration.id,
                        transaction_id = %transaction.id,
                        "Payment completed, registration confirmed"
                    );
                }
            }
            RegistrationStatus::Confirmed => {}
            status => {
                tracing::warn!(
                    registration_id = %registration.id,
                    transaction_id = %transaction.id,
                    %status,
                    "Payment completed for a registration that is no longer pending"
                );
            }
        }

        unit.commit().await?;
        Ok(outcome(changed))
    }

    async fn checkout_expired(&self, reference: Reference<'_>) -> Result<ReconcileOutcome> {
        let mut unit = self.store.begin().await?;
        let Some((transaction, registration)) = locate(&mut unit, reference).await? else {
            return match reference.metadata {
                Some(ids) => release_unrecorded_checkout(unit, ids).await,
                None => Ok(ReconcileOutcome::Ignored),
            };
        };

        if transaction.status != TransactionStatus::Pending {
            tracing::debug!(
                transaction_id = %transaction.id,
                status = %transaction.status,
                "Checkout expiry for a settled transaction"
            );
            return Ok(ReconcileOutcome::NoOp);
        }
        if !unit
            .update_transaction_status(
                transaction.id,
                TransactionStatus::Pending,
                TransactionStatus::Cancelled,
            )
            .await?
        {
            return Ok(ReconcileOutcome::NoOp);
        }

        if registration.status == RegistrationStatus::Pending {
            lifecycle::transition(&mut unit, &registration, RegistrationStatus::Cancelled, None)
                .await?;
        }

        unit.commit().await?;
        tracing::info!(
            registration_id = %registration.id,
            transaction_id = %transaction.id,
            "Checkout expired, reservation released"
        );
        Ok(ReconcileOutcome::Applied)
    }

    async fn charge_updated(
        &self,
        reference: Reference<'_>,
        charge_id: &str,
        settlement: Option<(Money, Money)>,
    ) -> Result<ReconcileOutcome> {
        let mut unit = self.store.begin().await?;
        let Some((transaction, _)) = locate(&mut unit, reference).await? else {
            return Ok(ReconcileOutcome::Ignored);
        };

        let mut changed = false;
        let new_intent = reference.payment_intent_id.is_some()
            && transaction.payment_intent_id.as_deref() != reference.payment_intent_id;
        if new_intent || transaction.charge_id.as_deref() != Some(charge_id) {
            unit.record_payment_references(
                transaction.id,
                reference.payment_intent_id,
                Some(charge_id),
            )
            .await?;
            changed = true;
        }

        let settlement = settlement.filter(|&(net, fee)| {
            transaction.net_amount != Some(net) || transaction.fee_amount != Some(fee)
        });
        if let Some((net, fee)) = settlement {
            unit.record_settlement(transaction.id, net, fee).await?;
            tracing::info!(
                transaction_id = %transaction.id,
                net_amount = net.cents(),
                fee_amount = fee.cents(),
                "Settlement recorded"
            );
            changed = true;
        }

        unit.commit().await?;
        Ok(outcome(changed))
    }

    async fn charge_refunded(
        &self,
        reference: Reference<'_>,
        charge_id: &str,
        fully_refunded: bool,
    ) -> Result<ReconcileOutcome> {
        let mut unit = self.store.begin().await?;
        let Some((transaction, registration)) = locate(&mut unit, reference).await? else {
            return Ok(ReconcileOutcome::Ignored);
        };

        if registration.payment_status == Some(PaymentStatus::Refunded) {
            return Ok(ReconcileOutcome::NoOp);
        }
        if transaction.charge_id.is_none() {
            unit.record_payment_references(transaction.id, None, Some(charge_id))
                .await?;
        }

        if !fully_refunded {
            unit.commit().await?;
            tracing::info!(
                registration_id = %registration.id,
                transaction_id = %transaction.id,
                "Partial refund, registration kept"
            );
            return Ok(ReconcileOutcome::NoOp);
        }

        // A refunded payer holds no spot, whichever counter it was on.
        let refunded = if matches!(
            registration.status,
            RegistrationStatus::Pending | RegistrationStatus::Confirmed
        ) {
            lifecycle::transition(
                &mut unit,
                &registration,
                RegistrationStatus::Cancelled,
                Some(PaymentStatus::Refunded),
            )
            .await?
        } else {
            unit.update_registration_status(
                registration.id,
                registration.status,
                registration.status,
                Some(PaymentStatus::Refunded),
            )
            .await?
        };
        if !refunded {
            return Ok(ReconcileOutcome::NoOp);
        }

        unit.commit().await?;
        tracing::info!(
            registration_id = %registration.id,
            transaction_id = %transaction.id,
            "Charge refunded"
        );
        Ok(ReconcileOutcome::Applied)
    }
}

/// Release a PENDING reservation whose checkout was opened but whose
/// transaction row was never written (the process stopped in between).
///
/// The metadata's transaction id is the one the row would have had, so its
/// absence identifies the case.
async fn release_unrecorded_checkout<U: UnitOfWork>(
    mut unit: U,
    ids: &PaymentMetadata,
) -> Result<ReconcileOutcome> {
    if unit
        .find_transaction(TransactionLookup::Id(ids.transaction_id))
        .await?
        .is_some()
    {
        return Ok(ReconcileOutcome::Ignored);
    }
    let Some(registration) = unit.load_registration(ids.registration_id).await? else {
        return Ok(ReconcileOutcome::Ignored);
    };
    if registration.tenant_id != ids.tenant_id
        || registration.status != RegistrationStatus::Pending
    {
        return Ok(ReconcileOutcome::Ignored);
    }

    if !lifecycle::transition(&mut unit, &registration, RegistrationStatus::Cancelled, None)
        .await?
    {
        return Ok(ReconcileOutcome::NoOp);
    }
    unit.commit().await?;
    tracing::warn!(
        registration_id = %registration.id,
        transaction_id = %ids.transaction_id,
        "Checkout expired without a recorded transaction, reservation released"
    );
    Ok(ReconcileOutcome::Applied)
}

const fn outcome(changed: bool) -> ReconcileOutcome {
    if changed {
        ReconcileOutcome::Applied
    } else {
        ReconcileOutcome::NoOp
    }
}

/// Find the transaction a notification refers to, and its registration.
///
/// Our own transaction id (metadata) wins; provider ids are the fallback for
/// notifications that arrive without metadata.
async fn locate<U: UnitOfWork>(
    unit: &mut U,
    reference: Reference<'_>,
) -> Result<Option<(Transaction, Registration)>> {
    let mut transaction = None;
    if let Some(ids) = reference.metadata {
        transaction = unit
            .find_transaction(TransactionLookup::Id(ids.transaction_id))
            .await?;
    }
    if transaction.is_none() {
        if let Some(session_id) = reference.session_id {
            transaction = unit
                .find_transaction(TransactionLookup::CheckoutSession(session_id))
                .await?;
        }
    }
    if transaction.is_none() {
        if let Some(intent_id) = reference.payment_intent_id {
            transaction = unit
                .find_transaction(TransactionLookup::PaymentIntent(intent_id))
                .await?;
        }
    }

    let Some(transaction) = transaction else {
        tracing::warn!(
            transaction_id = ?reference.metadata.map(|m| m.transaction_id),
            session_id = ?reference.session_id,
            payment_intent_id = ?reference.payment_intent_id,
            "Provider event for unknown transaction"
        );
        return Ok(None);
    };

    let mismatched = reference.metadata.filter(|ids| {
        ids.registration_id != transaction.registration_id || ids.tenant_id != transaction.tenant_id
    });
    if let Some(ids) = mismatched {
        tracing::warn!(
            transaction_id = %transaction.id,
            registration_id = %ids.registration_id,
            "Provider metadata does not match the stored transaction"
        );
        return Ok(None);
    }

    let Some(registration) = unit.load_registration(transaction.registration_id).await? else {
        tracing::warn!(
            transaction_id = %transaction.id,
            registration_id = %transaction.registration_id,
            "Provider event for a transaction without registration"
        );
        return Ok(None);
    };

    Ok(Some((transaction, registration)))
}
