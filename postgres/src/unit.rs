//! Unit of work over one `PostgreSQL` transaction.

use crate::rows::{
    cents, database_error, row_to_discount_card, row_to_event, row_to_option,
    row_to_option_discount, row_to_registration, row_to_transaction,
};
use chrono::{DateTime, Utc};
use registration_core::ledger::ClaimKind;
use registration_core::store::{StoreResult, TransactionLookup, UnitOfWork};
use registration_core::{
    DiscountCard, EventId, EventInfo, Money, OptionDiscount, OptionId, PaymentStatus,
    PricingSnapshot, Registration, RegistrationId, RegistrationOption, RegistrationStatus,
    Transaction, TransactionId, TransactionStatus, UserId,
};
use sqlx::{Postgres, Transaction as PgTransaction};

const REGISTRATION_COLUMNS: &str = "id, user_id, event_id, option_id, tenant_id, status, \
     payment_status, check_in_time, base_price, applied_discount_type, \
     applied_discounted_price, discount_amount, created_at";

const TRANSACTION_COLUMNS: &str = "id, tenant_id, registration_id, user_id, amount, net_amount, \
     fee_amount, currency, status, method, checkout_session_id, checkout_url, \
     payment_intent_id, charge_id, created_at";

/// A unit of work backed by a database transaction.
///
/// Dropping it without [`UnitOfWork::commit`] rolls the transaction back.
pub struct PgUnit {
    tx: PgTransaction<'static, Postgres>,
}

impl std::fmt::Debug for PgUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgUnit").finish_non_exhaustive()
    }
}

impl PgUnit {
    pub(crate) const fn new(tx: PgTransaction<'static, Postgres>) -> Self {
        Self { tx }
    }
}

impl UnitOfWork for PgUnit {
    async fn load_option(&mut self, id: OptionId) -> StoreResult<Option<RegistrationOption>> {
        let row = sqlx::query(
            r"
            SELECT id, event_id, title, spots, confirmed_spots, reserved_spots,
                   waitlist_spots, is_paid, price, tax_rate_id
            FROM registration_options
            WHERE id = $1
            ",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(database_error)?;

        row.as_ref().map(row_to_option).transpose()
    }

    async fn load_event(&mut self, id: EventId) -> StoreResult<Option<EventInfo>> {
        let row = sqlx::query("SELECT id, tenant_id, title, start_time FROM events WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(database_error)?;

        row.as_ref().map(row_to_event).transpose()
    }

    async fn load_registration(&mut self, id: RegistrationId) -> StoreResult<Option<Registration>> {
        let row = sqlx::query(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(database_error)?;

        row.as_ref().map(row_to_registration).transpose()
    }

    async fn find_active_registration(
        &mut self,
        user_id: UserId,
        event_id: EventId,
    ) -> StoreResult<Option<Registration>> {
        let row = sqlx::query(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations \
             WHERE user_id = $1 AND event_id = $2 AND status <> 'CANCELLED' \
             LIMIT 1"
        ))
        .bind(user_id.as_uuid())
        .bind(event_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(database_error)?;

        row.as_ref().map(row_to_registration).transpose()
    }

    async fn verified_discount_cards(&mut self, user_id: UserId) -> StoreResult<Vec<DiscountCard>> {
        let rows = sqlx::query(
            r"
            SELECT id, user_id, discount_type, status, valid_to
            FROM discount_cards
            WHERE user_id = $1 AND status = 'verified'
            ",
        )
        .bind(user_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(database_error)?;

        rows.iter().map(row_to_discount_card).collect()
    }

    async fn option_discounts(&mut self, option_id: OptionId) -> StoreResult<Vec<OptionDiscount>> {
        let rows = sqlx::query(
            r"
            SELECT option_id, discount_type, discounted_price
            FROM option_discounts
            WHERE option_id = $1
            ORDER BY position
            ",
        )
        .bind(option_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(database_error)?;

        rows.iter().map(row_to_option_discount).collect()
    }

    async fn find_transaction(
        &mut self,
        lookup: TransactionLookup<'_>,
    ) -> StoreResult<Option<Transaction>> {
        let row = match lookup {
            TransactionLookup::Id(id) => {
                sqlx::query(&format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1"
                ))
                .bind(id.as_uuid())
                .fetch_optional(&mut *self.tx)
                .await
            }
            TransactionLookup::CheckoutSession(session_id) => {
                sqlx::query(&format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE checkout_session_id = $1"
                ))
                .bind(session_id)
                .fetch_optional(&mut *self.tx)
                .await
            }
            TransactionLookup::PaymentIntent(intent_id) => {
                sqlx::query(&format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM transactions \
                     WHERE payment_intent_id = $1 ORDER BY created_at DESC LIMIT 1"
                ))
                .bind(intent_id)
                .fetch_optional(&mut *self.tx)
                .await
            }
        }
        .map_err(database_error)?;

        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn pending_transaction_for(
        &mut self,
        registration_id: RegistrationId,
    ) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE registration_id = $1 AND status = 'pending' \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(registration_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(database_error)?;

        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn try_claim(&mut self, option_id: OptionId, kind: ClaimKind) -> StoreResult<bool> {
        let sql = match kind {
            ClaimKind::Reserved => {
                r"
                UPDATE registration_options
                SET reserved_spots = reserved_spots + 1
                WHERE id = $1 AND confirmed_spots + reserved_spots < spots
                "
            }
            ClaimKind::Confirmed => {
                r"
                UPDATE registration_options
                SET confirmed_spots = confirmed_spots + 1
                WHERE id = $1 AND confirmed_spots + reserved_spots < spots
                "
            }
        };

        let result = sqlx::query(sql)
            .bind(option_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(database_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&mut self, option_id: OptionId, kind: ClaimKind) -> StoreResult<()> {
        let sql = match kind {
            ClaimKind::Reserved => {
                "UPDATE registration_options SET reserved_spots = GREATEST(reserved_spots - 1, 0) WHERE id = $1"
            }
            ClaimKind::Confirmed => {
                "UPDATE registration_options SET confirmed_spots = GREATEST(confirmed_spots - 1, 0) WHERE id = $1"
            }
        };

        sqlx::query(sql)
            .bind(option_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(database_error)?;

        Ok(())
    }

    async fn promote(&mut self, option_id: OptionId) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE registration_options
            SET reserved_spots = reserved_spots - 1,
                confirmed_spots = confirmed_spots + 1
            WHERE id = $1 AND reserved_spots > 0
            ",
        )
        .bind(option_id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(database_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn add_to_waitlist(&mut self, option_id: OptionId) -> StoreResult<()> {
        sqlx::query(
            "UPDATE registration_options SET waitlist_spots = waitlist_spots + 1 WHERE id = $1",
        )
        .bind(option_id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(database_error)?;

        Ok(())
    }

    async fn insert_registration(&mut self, registration: &Registration) -> StoreResult<()> {
        let pricing = registration.pricing.as_ref();
        sqlx::query(
            r"
            INSERT INTO registrations
                (id, user_id, event_id, option_id, tenant_id, status, payment_status,
                 check_in_time, base_price, applied_discount_type,
                 applied_discounted_price, discount_amount, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ",
        )
        .bind(registration.id.as_uuid())
        .bind(registration.user_id.as_uuid())
        .bind(registration.event_id.as_uuid())
        .bind(registration.option_id.as_uuid())
        .bind(registration.tenant_id.as_uuid())
        .bind(registration.status.as_str())
        .bind(registration.payment_status.as_ref().map(PaymentStatus::as_str))
        .bind(registration.check_in_time)
        .bind(pricing.map(|p| cents(p.base_price)).transpose()?)
        .bind(
            pricing
                .and_then(|p| p.applied_discount_type.as_ref())
                .map(|t| t.as_str().to_string()),
        )
        .bind(
            pricing
                .and_then(|p| p.applied_discounted_price)
                .map(cents)
                .transpose()?,
        )
        .bind(pricing.and_then(|p| p.discount_amount).map(cents).transpose()?)
        .bind(registration.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(database_error)?;

        Ok(())
    }

    async fn delete_registration(&mut self, id: RegistrationId) -> StoreResult<()> {
        sqlx::query("DELETE FROM registrations WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(database_error)?;

        Ok(())
    }

    async fn update_registration_status(
        &mut self,
        id: RegistrationId,
        from: RegistrationStatus,
        to: RegistrationStatus,
        payment_status: Option<PaymentStatus>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE registrations
            SET status = $3,
                payment_status = COALESCE($4, payment_status)
            WHERE id = $1 AND status = $2
            ",
        )
        .bind(id.as_uuid())
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(payment_status.as_ref().map(PaymentStatus::as_str))
        .execute(&mut *self.tx)
        .await
        .map_err(database_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn save_pricing(&mut self, id: RegistrationId, pricing: &PricingSnapshot) -> StoreResult<()> {
        sqlx::query(
            r"
            UPDATE registrations
            SET base_price = $2,
                applied_discount_type = $3,
                applied_discounted_price = $4,
                discount_amount = $5
            WHERE id = $1
            ",
        )
        .bind(id.as_uuid())
        .bind(cents(pricing.base_price)?)
        .bind(pricing.applied_discount_type.as_ref().map(|t| t.as_str().to_string()))
        .bind(pricing.applied_discounted_price.map(cents).transpose()?)
        .bind(pricing.discount_amount.map(cents).transpose()?)
        .execute(&mut *self.tx)
        .await
        .map_err(database_error)?;

        Ok(())
    }

    async fn record_check_in(&mut self, id: RegistrationId, at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE registrations
            SET check_in_time = $2
            WHERE id = $1 AND status = 'CONFIRMED' AND check_in_time IS NULL
            ",
        )
        .bind(id.as_uuid())
        .bind(at)
        .execute(&mut *self.tx)
        .await
        .map_err(database_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO transactions
                (id, tenant_id, registration_id, user_id, amount, net_amount, fee_amount,
                 currency, status, method, checkout_session_id, checkout_url,
                 payment_intent_id, charge_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ",
        )
        .bind(transaction.id.as_uuid())
        .bind(transaction.tenant_id.as_uuid())
        .bind(transaction.registration_id.as_uuid())
        .bind(transaction.user_id.as_uuid())
        .bind(cents(transaction.amount)?)
        .bind(transaction.net_amount.map(cents).transpose()?)
        .bind(transaction.fee_amount.map(cents).transpose()?)
        .bind(&transaction.currency)
        .bind(transaction.status.as_str())
        .bind(transaction.method.as_str())
        .bind(&transaction.checkout_session_id)
        .bind(&transaction.checkout_url)
        .bind(&transaction.payment_intent_id)
        .bind(&transaction.charge_id)
        .bind(transaction.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(database_error)?;

        Ok(())
    }

    async fn update_transaction_status(
        &mut self,
        id: TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE transactions SET status = $3 WHERE id = $1 AND status = $2")
            .bind(id.as_uuid())
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(database_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_payment_references(
        &mut self,
        id: TransactionId,
        payment_intent_id: Option<&str>,
        charge_id: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query(
            r"
            UPDATE transactions
            SET payment_intent_id = COALESCE($2, payment_intent_id),
                charge_id = COALESCE($3, charge_id)
            WHERE id = $1
            ",
        )
        .bind(id.as_uuid())
        .bind(payment_intent_id)
        .bind(charge_id)
        .execute(&mut *self.tx)
        .await
        .map_err(database_error)?;

        Ok(())
    }

    async fn record_settlement(
        &mut self,
        id: TransactionId,
        net_amount: Money,
        fee_amount: Money,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE transactions SET net_amount = $2, fee_amount = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(cents(net_amount)?)
            .bind(cents(fee_amount)?)
            .execute(&mut *self.tx)
            .await
            .map_err(database_error)?;

        Ok(())
    }

    async fn commit(self) -> StoreResult<()> {
        self.tx.commit().await.map_err(database_error)
    }
}
