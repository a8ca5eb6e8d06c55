//! Row decoding and value conversion.

use registration_core::store::StoreResult;
use registration_core::{
    DiscountCard, DiscountCardId, DiscountCardStatus, DiscountType, EventId, EventInfo, Money,
    OptionDiscount, OptionId, PaymentStatus, PricingSnapshot, Registration, RegistrationId,
    RegistrationOption, RegistrationStatus, StoreError, TenantId, Transaction, TransactionId,
    TransactionMethod, TransactionStatus, UserId,
};
use sqlx::Row;
use sqlx::postgres::PgRow;

/// Map a sqlx error, keeping unique violations distinguishable.
pub(crate) fn database_error(e: sqlx::Error) -> StoreError {
    if e
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation())
    {
        StoreError::UniqueViolation(e.to_string())
    } else {
        StoreError::Database(e.to_string())
    }
}

fn corrupt(e: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(e.to_string())
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column).map_err(database_error)
}

/// Money as a `BIGINT` bind value.
pub(crate) fn cents(money: Money) -> StoreResult<i64> {
    i64::try_from(money.cents()).map_err(corrupt)
}

fn money(row: &PgRow, column: &str) -> StoreResult<Money> {
    let value: i64 = get(row, column)?;
    u64::try_from(value).map(Money::from_cents).map_err(corrupt)
}

fn optional_money(row: &PgRow, column: &str) -> StoreResult<Option<Money>> {
    let value: Option<i64> = get(row, column)?;
    value
        .map(|v| u64::try_from(v).map(Money::from_cents).map_err(corrupt))
        .transpose()
}

fn counter(row: &PgRow, column: &str) -> StoreResult<u32> {
    let value: i32 = get(row, column)?;
    u32::try_from(value).map_err(corrupt)
}

/// Counter as an `INTEGER` bind value.
pub(crate) fn spots(value: u32) -> StoreResult<i32> {
    i32::try_from(value).map_err(corrupt)
}

pub(crate) fn row_to_event(row: &PgRow) -> StoreResult<EventInfo> {
    Ok(EventInfo {
        id: EventId::from_uuid(get(row, "id")?),
        tenant_id: TenantId::from_uuid(get(row, "tenant_id")?),
        title: get(row, "title")?,
        start: get(row, "start_time")?,
    })
}

pub(crate) fn row_to_option(row: &PgRow) -> StoreResult<RegistrationOption> {
    Ok(RegistrationOption {
        id: OptionId::from_uuid(get(row, "id")?),
        event_id: EventId::from_uuid(get(row, "event_id")?),
        title: get(row, "title")?,
        spots: counter(row, "spots")?,
        confirmed_spots: counter(row, "confirmed_spots")?,
        reserved_spots: counter(row, "reserved_spots")?,
        waitlist_spots: counter(row, "waitlist_spots")?,
        is_paid: get(row, "is_paid")?,
        price: money(row, "price")?,
        tax_rate_id: get(row, "tax_rate_id")?,
    })
}

pub(crate) fn row_to_registration(row: &PgRow) -> StoreResult<Registration> {
    let status: String = get(row, "status")?;
    let payment_status: Option<String> = get(row, "payment_status")?;
    let base_price = optional_money(row, "base_price")?;
    let applied_discount_type: Option<String> = get(row, "applied_discount_type")?;

    let pricing = match base_price {
        Some(base_price) => Some(PricingSnapshot {
            base_price,
            applied_discount_type: applied_discount_type.map(DiscountType::new),
            applied_discounted_price: optional_money(row, "applied_discounted_price")?,
            discount_amount: optional_money(row, "discount_amount")?,
        }),
        None => None,
    };

    Ok(Registration {
        id: RegistrationId::from_uuid(get(row, "id")?),
        user_id: UserId::from_uuid(get(row, "user_id")?),
        event_id: EventId::from_uuid(get(row, "event_id")?),
        option_id: OptionId::from_uuid(get(row, "option_id")?),
        tenant_id: TenantId::from_uuid(get(row, "tenant_id")?),
        status: RegistrationStatus::parse(&status).map_err(corrupt)?,
        payment_status: payment_status
            .as_deref()
            .map(PaymentStatus::parse)
            .transpose()
            .map_err(corrupt)?,
        check_in_time: get(row, "check_in_time")?,
        pricing,
        created_at: get(row, "created_at")?,
    })
}

pub(crate) fn row_to_transaction(row: &PgRow) -> StoreResult<Transaction> {
    let status: String = get(row, "status")?;
    let method: String = get(row, "method")?;

    Ok(Transaction {
        id: TransactionId::from_uuid(get(row, "id")?),
        tenant_id: TenantId::from_uuid(get(row, "tenant_id")?),
        registration_id: RegistrationId::from_uuid(get(row, "registration_id")?),
        user_id: UserId::from_uuid(get(row, "user_id")?),
        amount: money(row, "amount")?,
        net_amount: optional_money(row, "net_amount")?,
        fee_amount: optional_money(row, "fee_amount")?,
        currency: get(row, "currency")?,
        status: TransactionStatus::parse(&status).map_err(corrupt)?,
        method: TransactionMethod::parse(&method).map_err(corrupt)?,
        checkout_session_id: get(row, "checkout_session_id")?,
        checkout_url: get(row, "checkout_url")?,
        payment_intent_id: get(row, "payment_intent_id")?,
        charge_id: get(row, "charge_id")?,
        created_at: get(row, "created_at")?,
    })
}

pub(crate) fn row_to_discount_card(row: &PgRow) -> StoreResult<DiscountCard> {
    let status: String = get(row, "status")?;
    let discount_type: String = get(row, "discount_type")?;

    Ok(DiscountCard {
        id: DiscountCardId::from_uuid(get(row, "id")?),
        user_id: UserId::from_uuid(get(row, "user_id")?),
        discount_type: DiscountType::new(discount_type),
        status: DiscountCardStatus::parse(&status).map_err(corrupt)?,
        valid_to: get(row, "valid_to")?,
    })
}

pub(crate) fn row_to_option_discount(row: &PgRow) -> StoreResult<OptionDiscount> {
    let discount_type: String = get(row, "discount_type")?;

    Ok(OptionDiscount {
        option_id: OptionId::from_uuid(get(row, "option_id")?),
        discount_type: DiscountType::new(discount_type),
        discounted_price: money(row, "discounted_price")?,
    })
}
