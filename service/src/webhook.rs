//! Stripe webhook payloads.
//!
//! Signature verification happens in the transport layer; this module only
//! turns an already-verified body into a [`ProviderEvent`].

use registration_core::provider::{PaymentMetadata, ProviderEvent};
use registration_core::{Money, ProviderError};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
struct StripeEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: serde_json::Value,
}

/// A reference Stripe may send either as an id or as the expanded object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Expandable<T> {
    Id(String),
    Object(T),
}

#[derive(Debug, Deserialize)]
struct ObjectId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct BalanceTransaction {
    net: i64,
    fee: i64,
}

#[derive(Debug, Deserialize)]
struct SessionObject {
    id: String,
    #[serde(default)]
    payment_intent: Option<Expandable<ObjectId>>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ChargeObject {
    id: String,
    #[serde(default)]
    payment_intent: Option<Expandable<ObjectId>>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    balance_transaction: Option<Expandable<BalanceTransaction>>,
    #[serde(default)]
    amount: i64,
    #[serde(default)]
    amount_refunded: i64,
    #[serde(default)]
    refunded: bool,
}

impl ChargeObject {
    const fn fully_refunded(&self) -> bool {
        self.refunded || (self.amount > 0 && self.amount_refunded >= self.amount)
    }
}

fn intent_id(reference: Option<Expandable<ObjectId>>) -> Option<String> {
    match reference? {
        Expandable::Id(id) | Expandable::Object(ObjectId { id }) => Some(id),
    }
}

/// Correlation ids, when all three are present and well formed.
fn metadata(fields: &HashMap<String, String>) -> Option<PaymentMetadata> {
    Some(PaymentMetadata {
        registration_id: fields.get("registration_id")?.parse().ok()?,
        transaction_id: fields.get("transaction_id")?.parse().ok()?,
        tenant_id: fields.get("tenant_id")?.parse().ok()?,
    })
}

fn object<T: for<'de> Deserialize<'de>>(value: serde_json::Value) -> Result<T, ProviderError> {
    serde_json::from_value(value).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

/// Parse a verified Stripe webhook body.
///
/// Event types this core does not act on become [`ProviderEvent::Unhandled`].
///
/// # Errors
///
/// Returns [`ProviderError::InvalidResponse`] if the body is not a Stripe
/// event or a handled event's object is malformed.
pub fn parse_stripe_event(body: &[u8]) -> Result<ProviderEvent, ProviderError> {
    let event: StripeEvent =
        serde_json::from_slice(body).map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

    let parsed = match event.event_type.as_str() {
        "checkout.session.completed" => {
            let session: SessionObject = object(event.data.object)?;
            ProviderEvent::CheckoutCompleted {
                metadata: metadata(&session.metadata),
                payment_intent_id: intent_id(session.payment_intent),
                session_id: session.id,
            }
        }
        "checkout.session.expired" => {
            let session: SessionObject = object(event.data.object)?;
            ProviderEvent::CheckoutExpired {
                metadata: metadata(&session.metadata),
                session_id: session.id,
            }
        }
        "charge.updated" => {
            let charge: ChargeObject = object(event.data.object)?;
            let (net_amount, fee_amount) = match charge.balance_transaction {
                Some(Expandable::Object(balance)) => (
                    u64::try_from(balance.net).ok().map(Money::from_cents),
                    u64::try_from(balance.fee).ok().map(Money::from_cents),
                ),
                _ => (None, None),
            };
            ProviderEvent::ChargeUpdated {
                metadata: metadata(&charge.metadata),
                payment_intent_id: intent_id(charge.payment_intent),
                charge_id: charge.id,
                net_amount,
                fee_amount,
            }
        }
        "charge.refunded" => {
            let charge: ChargeObject = object(event.data.object)?;
            ProviderEvent::ChargeRefunded {
                fully_refunded: charge.fully_refunded(),
                metadata: metadata(&charge.metadata),
                payment_intent_id: intent_id(charge.payment_intent),
                charge_id: charge.id,
            }
        }
        other => ProviderEvent::Unhandled {
            event_type: other.to_string(),
        },
    };

    Ok(parsed)
}
