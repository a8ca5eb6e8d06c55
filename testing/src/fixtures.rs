//! Seed data builders.

#![allow(clippy::missing_panics_doc)] // Hardcoded timestamps

use crate::memory::InMemoryRegistrationStore;
use chrono::{DateTime, Duration, TimeZone, Utc};
use registration_core::{
    DiscountCard, DiscountCardId, DiscountCardStatus, DiscountType, EventId, EventInfo, Money,
    OptionDiscount, OptionId, RegistrationOption, Tenant, TenantId, UserId,
};
use std::collections::BTreeSet;

/// Discount type enabled on the fixture tenant.
pub const ESN_CARD: &str = "esnCard";

/// Start of the fixture event.
#[must_use]
#[allow(clippy::unwrap_used)]
pub fn event_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 18, 0, 0).unwrap()
}

/// A tenant, one event, and an in-memory store holding the event.
#[derive(Debug, Clone)]
pub struct Fixture {
    /// Store the fixture rows live in
    pub store: InMemoryRegistrationStore,
    /// Tenant with `eur` currency, a connected account, and [`ESN_CARD`] enabled
    pub tenant: Tenant,
    /// Event starting at [`event_start`]
    pub event: EventInfo,
}

impl Fixture {
    /// Create the tenant and event in a fresh store.
    pub async fn new() -> Self {
        let store = InMemoryRegistrationStore::new();
        let tenant = Tenant {
            id: TenantId::new(),
            currency: "eur".to_string(),
            payment_account_id: Some("acct_test".to_string()),
            enabled_discounts: BTreeSet::from([DiscountType::new(ESN_CARD)]),
        };
        let event = EventInfo {
            id: EventId::new(),
            tenant_id: tenant.id,
            title: "Pub Crawl".to_string(),
            start: event_start(),
        };
        store.insert_event(event.clone()).await;
        Self {
            store,
            tenant,
            event,
        }
    }

    async fn option(&self, title: &str, spots: u32, price: Option<Money>) -> RegistrationOption {
        let option = RegistrationOption {
            id: OptionId::new(),
            event_id: self.event.id,
            title: title.to_string(),
            spots,
            confirmed_spots: 0,
            reserved_spots: 0,
            waitlist_spots: 0,
            is_paid: price.is_some(),
            price: price.unwrap_or(Money::ZERO),
            tax_rate_id: price.map(|_| "txr_test".to_string()),
        };
        self.store.insert_option(option.clone()).await;
        option
    }

    /// A paid option on the fixture event.
    pub async fn paid_option(&self, spots: u32, price_cents: u64) -> RegistrationOption {
        self.option("Participant", spots, Some(Money::from_cents(price_cents)))
            .await
    }

    /// A free option on the fixture event.
    pub async fn free_option(&self, spots: u32) -> RegistrationOption {
        self.option("Guest", spots, None).await
    }

    /// A verified card of `kind` for `user`, valid well past the event.
    pub async fn verified_card(&self, user: UserId, kind: &str) -> DiscountCard {
        let card = DiscountCard {
            id: DiscountCardId::new(),
            user_id: user,
            discount_type: DiscountType::new(kind),
            status: DiscountCardStatus::Verified,
            valid_to: Some(event_start() + Duration::days(365)),
        };
        self.store.insert_discount_card(card.clone()).await;
        card
    }

    /// Configure a discounted price of `kind` on `option`.
    pub async fn option_discount(&self, option: OptionId, kind: &str, price_cents: u64) {
        self.store
            .insert_option_discount(OptionDiscount {
                option_id: option,
                discount_type: DiscountType::new(kind),
                discounted_price: Money::from_cents(price_cents),
            })
            .await;
    }
}
