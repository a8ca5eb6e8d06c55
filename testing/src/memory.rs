//! In-memory registration store.
//!
//! Every unit of work holds the store lock for its whole lifetime, so units
//! are fully serialized; writes go to a private copy that replaces the shared
//! state on commit and is discarded on drop. The counter arithmetic is the
//! ledger's own ([`RegistrationOption::try_claim`] and friends), so tests
//! exercise the same rules the `PostgreSQL` statements encode.

#![allow(clippy::missing_errors_doc)] // Store methods fail only on injected faults

use registration_core::ledger::ClaimKind;
use registration_core::store::{
    RegistrationStore, StoreResult, TransactionLookup, UnitOfWork,
};
use registration_core::{
    DiscountCard, DiscountCardStatus, EventId, EventInfo, Money, OptionDiscount, OptionId,
    PaymentStatus, PricingSnapshot, Registration, RegistrationId, RegistrationOption,
    RegistrationStatus, StoreError, Transaction, TransactionId, TransactionStatus, UserId,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    events: HashMap<EventId, EventInfo>,
    options: HashMap<OptionId, RegistrationOption>,
    registrations: HashMap<RegistrationId, Registration>,
    transactions: Vec<Transaction>,
    cards: Vec<DiscountCard>,
    discounts: Vec<OptionDiscount>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_transaction_insert: AtomicBool,
    fail_begin: AtomicBool,
    rejected_begins: AtomicU32,
}

/// In-memory [`RegistrationStore`] with fault injection.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistrationStore {
    state: Arc<Mutex<MemoryState>>,
    faults: Arc<Faults>,
}

impl InMemoryRegistrationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ─────────────────────────────────────────────────────────────
    // Fault injection
    // ─────────────────────────────────────────────────────────────

    /// Make every `insert_transaction` fail until reset.
    pub fn fail_transaction_inserts(&self, fail: bool) {
        self.faults
            .fail_transaction_insert
            .store(fail, Ordering::SeqCst);
    }

    /// Make every `begin` fail until reset.
    pub fn fail_begin(&self, fail: bool) {
        self.faults.fail_begin.store(fail, Ordering::SeqCst);
    }

    /// Number of `begin` calls turned away by [`Self::fail_begin`].
    #[must_use]
    pub fn rejected_begins(&self) -> u32 {
        self.faults.rejected_begins.load(Ordering::SeqCst)
    }

    // ─────────────────────────────────────────────────────────────
    // Seeding (rows owned by excluded collaborators)
    // ─────────────────────────────────────────────────────────────

    /// Insert an event.
    pub async fn insert_event(&self, event: EventInfo) {
        self.state.lock().await.events.insert(event.id, event);
    }

    /// Insert a registration option.
    pub async fn insert_option(&self, option: RegistrationOption) {
        self.state.lock().await.options.insert(option.id, option);
    }

    /// Insert a discount card.
    pub async fn insert_discount_card(&self, card: DiscountCard) {
        self.state.lock().await.cards.push(card);
    }

    /// Configure a discount on an option.
    pub async fn insert_option_discount(&self, discount: OptionDiscount) {
        self.state.lock().await.discounts.push(discount);
    }

    // ─────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────

    /// Current state of an option.
    pub async fn option(&self, id: OptionId) -> Option<RegistrationOption> {
        self.state.lock().await.options.get(&id).cloned()
    }

    /// Current state of a registration.
    pub async fn registration(&self, id: RegistrationId) -> Option<Registration> {
        self.state.lock().await.registrations.get(&id).cloned()
    }

    /// Every registration of a user, in no particular order.
    pub async fn registrations_of(&self, user_id: UserId) -> Vec<Registration> {
        self.state
            .lock()
            .await
            .registrations
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Every registration on an option, in no particular order.
    pub async fn registrations_on(&self, option_id: OptionId) -> Vec<Registration> {
        self.state
            .lock()
            .await
            .registrations
            .values()
            .filter(|r| r.option_id == option_id)
            .cloned()
            .collect()
    }

    /// Transactions of a registration, oldest first.
    pub async fn transactions_of(&self, registration_id: RegistrationId) -> Vec<Transaction> {
        self.state
            .lock()
            .await
            .transactions
            .iter()
            .filter(|t| t.registration_id == registration_id)
            .cloned()
            .collect()
    }

    /// A transaction by id.
    pub async fn transaction(&self, id: TransactionId) -> Option<Transaction> {
        self.state
            .lock()
            .await
            .transactions
            .iter()
            .find(|t| t.id == id)
            .cloned()
    }
}

impl RegistrationStore for InMemoryRegistrationStore {
    type Unit = MemoryUnit;

    async fn begin(&self) -> StoreResult<MemoryUnit> {
        if self.faults.fail_begin.load(Ordering::SeqCst) {
            self.faults.rejected_begins.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Database("injected begin failure".to_string()));
        }
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(MemoryUnit {
            guard,
            working,
            faults: Arc::clone(&self.faults),
        })
    }
}

/// Unit of work over [`InMemoryRegistrationStore`].
#[derive(Debug)]
pub struct MemoryUnit {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    faults: Arc<Faults>,
}

impl MemoryUnit {
    fn option_mut(&mut self, id: OptionId) -> Option<&mut RegistrationOption> {
        self.working.options.get_mut(&id)
    }

    fn transaction_mut(&mut self, id: TransactionId) -> Option<&mut Transaction> {
        self.working.transactions.iter_mut().find(|t| t.id == id)
    }
}

impl UnitOfWork for MemoryUnit {
    async fn load_option(&mut self, id: OptionId) -> StoreResult<Option<RegistrationOption>> {
        Ok(self.working.options.get(&id).cloned())
    }

    async fn load_event(&mut self, id: EventId) -> StoreResult<Option<EventInfo>> {
        Ok(self.working.events.get(&id).cloned())
    }

    async fn load_registration(&mut self, id: RegistrationId) -> StoreResult<Option<Registration>> {
        Ok(self.working.registrations.get(&id).cloned())
    }

    async fn find_active_registration(
        &mut self,
        user_id: UserId,
        event_id: EventId,
    ) -> StoreResult<Option<Registration>> {
        Ok(self
            .working
            .registrations
            .values()
            .find(|r| r.user_id == user_id && r.event_id == event_id && r.status.is_active())
            .cloned())
    }

    async fn verified_discount_cards(&mut self, user_id: UserId) -> StoreResult<Vec<DiscountCard>> {
        Ok(self
            .working
            .cards
            .iter()
            .filter(|c| c.user_id == user_id && c.status == DiscountCardStatus::Verified)
            .cloned()
            .collect())
    }

    async fn option_discounts(&mut self, option_id: OptionId) -> StoreResult<Vec<OptionDiscount>> {
        Ok(self
            .working
            .discounts
            .iter()
            .filter(|d| d.option_id == option_id)
            .cloned()
            .collect())
    }

    async fn find_transaction(
        &mut self,
        lookup: TransactionLookup<'_>,
    ) -> StoreResult<Option<Transaction>> {
        let found = self.working.transactions.iter().rev().find(|t| match lookup {
            TransactionLookup::Id(id) => t.id == id,
            TransactionLookup::CheckoutSession(session) => {
                t.checkout_session_id.as_deref() == Some(session)
            }
            TransactionLookup::PaymentIntent(intent) => {
                t.payment_intent_id.as_deref() == Some(intent)
            }
        });
        Ok(found.cloned())
    }

    async fn pending_transaction_for(
        &mut self,
        registration_id: RegistrationId,
    ) -> StoreResult<Option<Transaction>> {
        Ok(self
            .working
            .transactions
            .iter()
            .rev()
            .find(|t| t.registration_id == registration_id && t.status == TransactionStatus::Pending)
            .cloned())
    }

    async fn try_claim(&mut self, option_id: OptionId, kind: ClaimKind) -> StoreResult<bool> {
        Ok(self
            .option_mut(option_id)
            .is_some_and(|option| option.try_claim(kind)))
    }

    async fn release(&mut self, option_id: OptionId, kind: ClaimKind) -> StoreResult<()> {
        if let Some(option) = self.option_mut(option_id) {
            option.release(kind);
        }
        Ok(())
    }

    async fn promote(&mut self, option_id: OptionId) -> StoreResult<bool> {
        Ok(self
            .option_mut(option_id)
            .is_some_and(RegistrationOption::promote))
    }

    async fn add_to_waitlist(&mut self, option_id: OptionId) -> StoreResult<()> {
        if let Some(option) = self.option_mut(option_id) {
            option.waitlist_spots += 1;
        }
        Ok(())
    }

    async fn insert_registration(&mut self, registration: &Registration) -> StoreResult<()> {
        let duplicate = registration.status.is_active()
            && self.working.registrations.values().any(|r| {
                r.user_id == registration.user_id
                    && r.event_id == registration.event_id
                    && r.status.is_active()
            });
        if duplicate || self.working.registrations.contains_key(&registration.id) {
            return Err(StoreError::UniqueViolation(format!(
                "registration for user {} on event {}",
                registration.user_id, registration.event_id
            )));
        }
        self.working
            .registrations
            .insert(registration.id, registration.clone());
        Ok(())
    }

    async fn delete_registration(&mut self, id: RegistrationId) -> StoreResult<()> {
        self.working.registrations.remove(&id);
        Ok(())
    }

    async fn update_registration_status(
        &mut self,
        id: RegistrationId,
        from: RegistrationStatus,
        to: RegistrationStatus,
        payment_status: Option<PaymentStatus>,
    ) -> StoreResult<bool> {
        match self.working.registrations.get_mut(&id) {
            Some(registration) if registration.status == from => {
                registration.status = to;
                if let Some(payment_status) = payment_status {
                    registration.payment_status = Some(payment_status);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn save_pricing(&mut self, id: RegistrationId, pricing: &PricingSnapshot) -> StoreResult<()> {
        if let Some(registration) = self.working.registrations.get_mut(&id) {
            registration.pricing = Some(pricing.clone());
        }
        Ok(())
    }

    async fn record_check_in(&mut self, id: RegistrationId, at: DateTime<Utc>) -> StoreResult<bool> {
        match self.working.registrations.get_mut(&id) {
            Some(registration)
                if registration.status == RegistrationStatus::Confirmed
                    && registration.check_in_time.is_none() =>
            {
                registration.check_in_time = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> StoreResult<()> {
        if self.faults.fail_transaction_insert.load(Ordering::SeqCst) {
            return Err(StoreError::Database(
                "injected transaction insert failure".to_string(),
            ));
        }
        self.working.transactions.push(transaction.clone());
        Ok(())
    }

    async fn update_transaction_status(
        &mut self,
        id: TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> StoreResult<bool> {
        match self.transaction_mut(id) {
            Some(transaction) if transaction.status == from => {
                transaction.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_payment_references(
        &mut self,
        id: TransactionId,
        payment_intent_id: Option<&str>,
        charge_id: Option<&str>,
    ) -> StoreResult<()> {
        if let Some(transaction) = self.transaction_mut(id) {
            if let Some(intent) = payment_intent_id {
                transaction.payment_intent_id = Some(intent.to_string());
            }
            if let Some(charge) = charge_id {
                transaction.charge_id = Some(charge.to_string());
            }
        }
        Ok(())
    }

    async fn record_settlement(
        &mut self,
        id: TransactionId,
        net_amount: Money,
        fee_amount: Money,
    ) -> StoreResult<()> {
        if let Some(transaction) = self.transaction_mut(id) {
            transaction.net_amount = Some(net_amount);
            transaction.fee_amount = Some(fee_amount);
        }
        Ok(())
    }

    async fn commit(self) -> StoreResult<()> {
        let Self {
            mut guard, working, ..
        } = self;
        *guard = working;
        Ok(())
    }
}
