//! `PostgreSQL` store for event registrations.
//!
//! Implements [`RegistrationStore`] from `registration-core` on top of a sqlx
//! connection pool. Each unit of work is one database transaction; the ledger
//! and status changes are single conditional `UPDATE`s whose affected-row
//! count reports whether the guard held, so concurrent admissions never
//! oversubscribe an option.
//!
//! # Example
//!
//! ```ignore
//! use registration_postgres::PostgresRegistrationStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresRegistrationStore::connect("postgres://localhost/registrations").await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod rows;
mod unit;

pub use unit::PgUnit;

use registration_core::store::{RegistrationStore, StoreResult};
use registration_core::{DiscountCard, EventInfo, OptionDiscount, RegistrationOption, StoreError};
use rows::{cents, database_error, spots};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// [`RegistrationStore`] backed by `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct PostgresRegistrationStore {
    pool: PgPool,
}

impl PostgresRegistrationStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection fails.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool))
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ─────────────────────────────────────────────────────────────
    // Seeding
    //
    // Events, options and discount data are owned by other services. These
    // writers exist for fixtures and local setups.
    // ─────────────────────────────────────────────────────────────

    /// Insert an event.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn insert_event(&self, event: &EventInfo) -> StoreResult<()> {
        sqlx::query("INSERT INTO events (id, tenant_id, title, start_time) VALUES ($1, $2, $3, $4)")
            .bind(event.id.as_uuid())
            .bind(event.tenant_id.as_uuid())
            .bind(&event.title)
            .bind(event.start)
            .execute(&self.pool)
            .await
            .map_err(database_error)?;
        Ok(())
    }

    /// Insert a registration option, counters included.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails or a counter is out of range.
    pub async fn insert_option(&self, option: &RegistrationOption) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO registration_options
                (id, event_id, title, spots, confirmed_spots, reserved_spots,
                 waitlist_spots, is_paid, price, tax_rate_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(option.id.as_uuid())
        .bind(option.event_id.as_uuid())
        .bind(&option.title)
        .bind(spots(option.spots)?)
        .bind(spots(option.confirmed_spots)?)
        .bind(spots(option.reserved_spots)?)
        .bind(spots(option.waitlist_spots)?)
        .bind(option.is_paid)
        .bind(cents(option.price)?)
        .bind(&option.tax_rate_id)
        .execute(&self.pool)
        .await
        .map_err(database_error)?;
        Ok(())
    }

    /// Insert a discount card.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn insert_discount_card(&self, card: &DiscountCard) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO discount_cards (id, user_id, discount_type, status, valid_to)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(card.id.as_uuid())
        .bind(card.user_id.as_uuid())
        .bind(card.discount_type.as_str())
        .bind(card.status.as_str())
        .bind(card.valid_to)
        .execute(&self.pool)
        .await
        .map_err(database_error)?;
        Ok(())
    }

    /// Configure a discounted price on an option. Later inserts rank after
    /// earlier ones when prices tie.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn insert_option_discount(&self, discount: &OptionDiscount) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO option_discounts (option_id, discount_type, discounted_price)
            VALUES ($1, $2, $3)
            ",
        )
        .bind(discount.option_id.as_uuid())
        .bind(discount.discount_type.as_str())
        .bind(cents(discount.discounted_price)?)
        .execute(&self.pool)
        .await
        .map_err(database_error)?;
        Ok(())
    }
}

impl RegistrationStore for PostgresRegistrationStore {
    type Unit = PgUnit;

    async fn begin(&self) -> StoreResult<PgUnit> {
        let tx = self.pool.begin().await.map_err(database_error)?;
        Ok(PgUnit::new(tx))
    }
}
