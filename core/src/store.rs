//! Storage abstraction for the registration core.
//!
//! All components share one transactional store. A [`UnitOfWork`] groups the
//! reads and writes of one admission, cancellation, or webhook application:
//! nothing it writes is visible to other units until [`UnitOfWork::commit`],
//! and dropping it without committing discards every write.
//!
//! # Concurrency contract
//!
//! Implementations must express each ledger operation (`try_claim`, `release`,
//! `promote`, `add_to_waitlist`) and each status change as **one conditional
//! statement** against the stored row, e.g.
//!
//! ```text
//! UPDATE registration_options
//!    SET reserved_spots = reserved_spots + 1
//!  WHERE id = $1 AND confirmed_spots + reserved_spots < spots
//! ```
//!
//! and report through the return value whether the condition held. A separate
//! read followed by a write is never acceptable for these fields.

use crate::error::StoreError;
use crate::ledger::ClaimKind;
use crate::types::{
    DiscountCard, EventId, EventInfo, Money, OptionDiscount, OptionId, PaymentStatus,
    PricingSnapshot, Registration, RegistrationId, RegistrationOption, RegistrationStatus,
    Transaction, TransactionId, TransactionStatus, UserId,
};
use chrono::{DateTime, Utc};
use std::future::Future;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// How to find a transaction referenced by the payment provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionLookup<'a> {
    /// By our own id (provider metadata)
    Id(TransactionId),
    /// By the provider's checkout session id
    CheckoutSession(&'a str),
    /// By the provider's payment intent id
    PaymentIntent(&'a str),
}

/// A shared, transactional registration store.
pub trait RegistrationStore: Send + Sync {
    /// The unit-of-work type handed out by [`RegistrationStore::begin`].
    type Unit: UnitOfWork;

    /// Open a new unit of work.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying connection cannot be acquired.
    fn begin(&self) -> impl Future<Output = StoreResult<Self::Unit>> + Send;
}

/// One atomic group of reads and writes.
pub trait UnitOfWork: Send {
    // ─────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────

    /// Load a registration option with its current counters.
    fn load_option(
        &mut self,
        id: OptionId,
    ) -> impl Future<Output = StoreResult<Option<RegistrationOption>>> + Send;

    /// Load the event an option belongs to.
    fn load_event(&mut self, id: EventId)
    -> impl Future<Output = StoreResult<Option<EventInfo>>> + Send;

    /// Load a registration.
    fn load_registration(
        &mut self,
        id: RegistrationId,
    ) -> impl Future<Output = StoreResult<Option<Registration>>> + Send;

    /// Find the user's non-cancelled registration for an event, if any.
    fn find_active_registration(
        &mut self,
        user_id: UserId,
        event_id: EventId,
    ) -> impl Future<Output = StoreResult<Option<Registration>>> + Send;

    /// The user's discount cards with status `verified`.
    fn verified_discount_cards(
        &mut self,
        user_id: UserId,
    ) -> impl Future<Output = StoreResult<Vec<DiscountCard>>> + Send;

    /// Discounts configured on an option, in insertion order.
    fn option_discounts(
        &mut self,
        option_id: OptionId,
    ) -> impl Future<Output = StoreResult<Vec<OptionDiscount>>> + Send;

    /// Find a transaction.
    fn find_transaction(
        &mut self,
        lookup: TransactionLookup<'_>,
    ) -> impl Future<Output = StoreResult<Option<Transaction>>> + Send;

    /// The most recent `pending` transaction of a registration, if any.
    fn pending_transaction_for(
        &mut self,
        registration_id: RegistrationId,
    ) -> impl Future<Output = StoreResult<Option<Transaction>>> + Send;

    // ─────────────────────────────────────────────────────────────
    // Capacity ledger (single conditional statements)
    // ─────────────────────────────────────────────────────────────

    /// Increment the `kind` counter if `confirmed + reserved < spots`.
    ///
    /// Returns `false`, with no side effect, when the option is full or unknown.
    fn try_claim(
        &mut self,
        option_id: OptionId,
        kind: ClaimKind,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Decrement the `kind` counter, floored at zero.
    fn release(
        &mut self,
        option_id: OptionId,
        kind: ClaimKind,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Move one spot from `reserved` to `confirmed`.
    ///
    /// Returns `false` when there is no reserved spot to move.
    fn promote(&mut self, option_id: OptionId) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Increment the informational waitlist counter.
    fn add_to_waitlist(
        &mut self,
        option_id: OptionId,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    // ─────────────────────────────────────────────────────────────
    // Registration writes
    // ─────────────────────────────────────────────────────────────

    /// Insert a registration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UniqueViolation`] if the user already holds a
    /// non-cancelled registration for the event.
    fn insert_registration(
        &mut self,
        registration: &Registration,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Delete a registration (compensating rollback only).
    fn delete_registration(
        &mut self,
        id: RegistrationId,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Set `status = to` (and `payment_status`, when given) only if the stored
    /// status is still `from`.
    ///
    /// Returns whether the row was updated.
    fn update_registration_status(
        &mut self,
        id: RegistrationId,
        from: RegistrationStatus,
        to: RegistrationStatus,
        payment_status: Option<PaymentStatus>,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Persist the pricing snapshot of a registration.
    fn save_pricing(
        &mut self,
        id: RegistrationId,
        pricing: &PricingSnapshot,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Record the check-in time if the registration is confirmed and not yet
    /// checked in.
    ///
    /// Returns whether the row was updated.
    fn record_check_in(
        &mut self,
        id: RegistrationId,
        at: DateTime<Utc>,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    // ─────────────────────────────────────────────────────────────
    // Transaction writes
    // ─────────────────────────────────────────────────────────────

    /// Insert a transaction.
    fn insert_transaction(
        &mut self,
        transaction: &Transaction,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Set `status = to` only if the stored status is still `from`.
    ///
    /// Returns whether the row was updated.
    fn update_transaction_status(
        &mut self,
        id: TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Fill in provider references that were unknown at creation. `None`
    /// leaves the stored value untouched.
    fn record_payment_references(
        &mut self,
        id: TransactionId,
        payment_intent_id: Option<&str>,
        charge_id: Option<&str>,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Record settlement amounts reported by the provider.
    fn record_settlement(
        &mut self,
        id: TransactionId,
        net_amount: Money,
        fee_amount: Money,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    // ─────────────────────────────────────────────────────────────
    // Completion
    // ─────────────────────────────────────────────────────────────

    /// Make every write of this unit visible atomically.
    fn commit(self) -> impl Future<Output = StoreResult<()>> + Send;
}
