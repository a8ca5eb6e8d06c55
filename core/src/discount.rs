//! Discount resolution.
//!
//! Given a user's verified discount cards and an option's configured
//! discounts, pick the effective price. Pure: all persistence of the result
//! happens in the caller.

use crate::types::{
    DiscountCard, DiscountCardStatus, DiscountType, Money, OptionDiscount, PricingSnapshot,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Outcome of resolving an option's price for one user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceResolution {
    /// Option base price
    pub base_price: Money,
    /// Price the user pays
    pub effective_price: Money,
    /// Discount that produced `effective_price`, if any
    pub applied_discount_type: Option<DiscountType>,
    /// `base_price - effective_price`; `None` when no discount applies
    pub discount_amount: Option<Money>,
}

impl PriceResolution {
    /// No discount applies.
    #[must_use]
    pub const fn base(base_price: Money) -> Self {
        Self {
            base_price,
            effective_price: base_price,
            applied_discount_type: None,
            discount_amount: None,
        }
    }

    /// Whether the user owes nothing.
    #[must_use]
    pub const fn is_free(&self) -> bool {
        self.effective_price.is_zero()
    }

    /// The snapshot frozen onto the registration.
    #[must_use]
    pub fn snapshot(&self) -> PricingSnapshot {
        PricingSnapshot {
            base_price: self.base_price,
            applied_discount_type: self.applied_discount_type.clone(),
            applied_discounted_price: self
                .applied_discount_type
                .as_ref()
                .map(|_| self.effective_price),
            discount_amount: self.discount_amount,
        }
    }
}

/// Resolve the price a user pays for an option.
///
/// A discount is eligible when the user holds a verified card of its type that
/// is still valid at `event_start`, and the tenant has that discount provider
/// enabled. Among eligible discounts the lowest price wins; ties keep the
/// earliest configured. A discount that would not lower the base price is
/// never applied, so `effective_price <= base_price` always and
/// `discount_amount` is present exactly when the price went down.
#[must_use]
pub fn resolve_price(
    base_price: Money,
    cards: &[DiscountCard],
    discounts: &[OptionDiscount],
    enabled: &BTreeSet<DiscountType>,
    event_start: DateTime<Utc>,
) -> PriceResolution {
    let held: BTreeSet<&DiscountType> = cards
        .iter()
        .filter(|card| card.status == DiscountCardStatus::Verified)
        .filter(|card| card.is_valid_at(event_start))
        .map(|card| &card.discount_type)
        .collect();

    if held.is_empty() {
        return PriceResolution::base(base_price);
    }

    let best = discounts
        .iter()
        .filter(|discount| held.contains(&discount.discount_type))
        .filter(|discount| enabled.contains(&discount.discount_type))
        .fold(None::<&OptionDiscount>, |best, candidate| match best {
            Some(current) if current.discounted_price <= candidate.discounted_price => {
                Some(current)
            }
            _ => Some(candidate),
        });

    match best {
        Some(discount) if discount.discounted_price < base_price => PriceResolution {
            base_price,
            effective_price: discount.discounted_price,
            applied_discount_type: Some(discount.discount_type.clone()),
            discount_amount: Some(base_price.saturating_sub(discount.discounted_price)),
        },
        _ => PriceResolution::base(base_price),
    }
}
