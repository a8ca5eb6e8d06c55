//! Domain types for event registration.
//!
//! Value objects, entities, and status enums shared by the capacity ledger, the
//! discount resolver, the registration state machine, and the stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

define_id!(
    /// Unique identifier for a user
    UserId
);
define_id!(
    /// Unique identifier for a tenant
    TenantId
);
define_id!(
    /// Unique identifier for an event
    EventId
);
define_id!(
    /// Unique identifier for a registration option of an event
    OptionId
);
define_id!(
    /// Unique identifier for a registration
    RegistrationId
);
define_id!(
    /// Unique identifier for a financial transaction
    TransactionId
);
define_id!(
    /// Unique identifier for a discount card
    DiscountCardId
);

// ============================================================================
// Money Value Object (minor units to avoid floating point errors)
// ============================================================================

/// An amount in minor currency units (cents).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero in any currency
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from minor units
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in minor units
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Subtracts, flooring at zero
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Status enums
// ============================================================================

/// Lifecycle status of a registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationStatus {
    /// Paid registration awaiting external payment; holds a reserved spot
    Pending,
    /// Spot guaranteed; holds a confirmed spot
    Confirmed,
    /// Terminal; whatever spot was held has been released
    Cancelled,
    /// On the waitlist; holds no capacity
    Waitlist,
}

impl RegistrationStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
            Self::Waitlist => "WAITLIST",
        }
    }

    /// Parse the storage representation.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownVariant`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "CONFIRMED" => Ok(Self::Confirmed),
            "CANCELLED" => Ok(Self::Cancelled),
            "WAITLIST" => Ok(Self::Waitlist),
            other => Err(UnknownVariant::new("registration status", other)),
        }
    }

    /// Whether this registration still counts towards the one-per-event rule.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment status of a registration (absent for free registrations).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Waiting for the provider to report the checkout outcome
    Pending,
    /// Payment collected
    Paid,
    /// Payment returned to the payer
    Refunded,
}

impl PaymentStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::Refunded => "REFUNDED",
        }
    }

    /// Parse the storage representation.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownVariant`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PAID" => Ok(Self::Paid),
            "REFUNDED" => Ok(Self::Refunded),
            other => Err(UnknownVariant::new("payment status", other)),
        }
    }
}

/// Status of a financial transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Checkout opened, outcome unknown
    Pending,
    /// Money collected
    Successful,
    /// Abandoned, expired or rolled back
    Cancelled,
}

impl TransactionStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Successful => "successful",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the storage representation.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownVariant`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "pending" => Ok(Self::Pending),
            "successful" => Ok(Self::Successful),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownVariant::new("transaction status", other)),
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a transaction was (or will be) settled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMethod {
    /// Hosted checkout at the payment provider
    Stripe,
    /// Paid in cash at the venue
    Cash,
    /// Bank transfer
    Transfer,
}

impl TransactionMethod {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stripe => "stripe",
            Self::Cash => "cash",
            Self::Transfer => "transfer",
        }
    }

    /// Parse the storage representation.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownVariant`] if the string doesn't match a known method.
    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "stripe" => Ok(Self::Stripe),
            "cash" => Ok(Self::Cash),
            "transfer" => Ok(Self::Transfer),
            other => Err(UnknownVariant::new("transaction method", other)),
        }
    }
}

/// Verification status of a discount card.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountCardStatus {
    /// Submitted but not yet checked
    Unverified,
    /// Checked with the issuing provider
    Verified,
    /// Past its validity
    Expired,
    /// Rejected by the issuing provider
    Invalid,
}

impl DiscountCardStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unverified => "unverified",
            Self::Verified => "verified",
            Self::Expired => "expired",
            Self::Invalid => "invalid",
        }
    }

    /// Parse the storage representation.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownVariant`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, UnknownVariant> {
        match s {
            "unverified" => Ok(Self::Unverified),
            "verified" => Ok(Self::Verified),
            "expired" => Ok(Self::Expired),
            "invalid" => Ok(Self::Invalid),
            other => Err(UnknownVariant::new("discount card status", other)),
        }
    }
}

/// A stored string that does not name any variant of the target enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind}: {value}")]
pub struct UnknownVariant {
    /// Which enum was being parsed
    pub kind: &'static str,
    /// The offending value
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// ============================================================================
// Discounts
// ============================================================================

/// Discount provider / card type, e.g. `"esnCard"`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiscountType(String);

impl DiscountType {
    /// Creates a new `DiscountType`
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the type as a string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DiscountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user's eligibility credential for discounted prices.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountCard {
    /// Card identifier
    pub id: DiscountCardId,
    /// Holder
    pub user_id: UserId,
    /// Which discount this card unlocks
    pub discount_type: DiscountType,
    /// Verification status
    pub status: DiscountCardStatus,
    /// End of validity; `None` never expires
    pub valid_to: Option<DateTime<Utc>>,
}

impl DiscountCard {
    /// Whether the card is still valid on `at`.
    #[must_use]
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_to.is_none_or(|valid_to| valid_to >= at)
    }
}

/// A discounted price for one discount type on one option.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionDiscount {
    /// The option this price applies to
    pub option_id: OptionId,
    /// Card type that unlocks it
    pub discount_type: DiscountType,
    /// Price charged to holders
    pub discounted_price: Money,
}

// ============================================================================
// Entities
// ============================================================================

/// Tenant context handed in by the tenant-resolution collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Tenant identifier
    pub id: TenantId,
    /// ISO 4217 currency code, lowercase (e.g. `"eur"`)
    pub currency: String,
    /// Connected payment-provider account, if the tenant has one
    pub payment_account_id: Option<String>,
    /// Discount providers this tenant accepts
    pub enabled_discounts: BTreeSet<DiscountType>,
}

/// The authenticated caller and the capabilities the permission collaborator
/// granted them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Caller {
    /// Authenticated user
    pub user_id: UserId,
    /// May act on other users' registrations
    pub can_manage_registrations: bool,
    /// May scan and check in attendees
    pub can_check_in: bool,
}

impl Caller {
    /// A caller with no extra capabilities.
    #[must_use]
    pub const fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            can_manage_registrations: false,
            can_check_in: false,
        }
    }

    /// Whether this caller may act on a registration owned by `owner`.
    #[must_use]
    pub fn may_act_for(&self, owner: UserId) -> bool {
        self.user_id == owner || self.can_manage_registrations
    }
}

/// The slice of an event this core needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInfo {
    /// Event identifier
    pub id: EventId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Display title, used as the checkout line item name
    pub title: String,
    /// Event start; discount cards must be valid until then
    pub start: DateTime<Utc>,
}

/// A registration option (e.g. "Participant", "Organizer") with its own
/// capacity and price.
///
/// The spot counters are owned by the capacity ledger; see [`crate::ledger`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationOption {
    /// Option identifier
    pub id: OptionId,
    /// Event this option belongs to
    pub event_id: EventId,
    /// Display title
    pub title: String,
    /// Total capacity
    pub spots: u32,
    /// Guaranteed spots
    pub confirmed_spots: u32,
    /// Spots held while payment is outstanding
    pub reserved_spots: u32,
    /// Informational; not capacity constrained
    pub waitlist_spots: u32,
    /// Whether registering requires payment
    pub is_paid: bool,
    /// Base price
    pub price: Money,
    /// Provider-side tax rate reference
    pub tax_rate_id: Option<String>,
}

/// Prices frozen onto a registration when it is created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingSnapshot {
    /// Option base price at registration time
    pub base_price: Money,
    /// Discount that was applied, if any
    pub applied_discount_type: Option<DiscountType>,
    /// Price after the discount, if one was applied
    pub applied_discounted_price: Option<Money>,
    /// `base_price - applied_discounted_price`, if a discount was applied
    pub discount_amount: Option<Money>,
}

impl PricingSnapshot {
    /// The price the registrant owes.
    #[must_use]
    pub fn effective_price(&self) -> Money {
        self.applied_discounted_price.unwrap_or(self.base_price)
    }
}

/// One user's claim against one option.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Registration identifier
    pub id: RegistrationId,
    /// Registrant
    pub user_id: UserId,
    /// Event registered for
    pub event_id: EventId,
    /// Option the spot is claimed on
    pub option_id: OptionId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Lifecycle status
    pub status: RegistrationStatus,
    /// Payment status; `None` for free registrations
    pub payment_status: Option<PaymentStatus>,
    /// When the registrant was checked in
    pub check_in_time: Option<DateTime<Utc>>,
    /// Pricing frozen at creation; `None` for free registrations
    pub pricing: Option<PricingSnapshot>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// The financial side-effect of a paid registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction identifier
    pub id: TransactionId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Registration paid for
    pub registration_id: RegistrationId,
    /// Payer
    pub user_id: UserId,
    /// Gross amount
    pub amount: Money,
    /// Amount after provider fees, once settled
    pub net_amount: Option<Money>,
    /// Provider fee, once settled
    pub fee_amount: Option<Money>,
    /// Currency of all amounts
    pub currency: String,
    /// Status
    pub status: TransactionStatus,
    /// Settlement method
    pub method: TransactionMethod,
    /// Provider checkout session
    pub checkout_session_id: Option<String>,
    /// Hosted checkout URL for the payer
    pub checkout_url: Option<String>,
    /// Provider payment intent
    pub payment_intent_id: Option<String>,
    /// Provider charge
    pub charge_id: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}
