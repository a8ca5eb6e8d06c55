//! Read-side queries and door check-in.

use crate::registration::{RegistrationService, load_for_caller};
use chrono::{DateTime, Utc};
use registration_core::provider::PaymentProvider;
use registration_core::store::{RegistrationStore, UnitOfWork};
use registration_core::{
    Caller, DiscountType, Money, PaymentStatus, Registration, RegistrationError, RegistrationId,
    RegistrationStatus, Result, Tenant,
};
use serde::Serialize;

/// Discount applied to a registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscountSummary {
    /// Which card type unlocked it
    pub discount_type: DiscountType,
    /// Option price before the discount
    pub base_price: Money,
    /// Price actually charged
    pub discounted_price: Money,
    /// `base_price - discounted_price`
    pub discount_amount: Money,
}

/// What a user sees about their registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationStatusView {
    /// Registration id
    pub registration_id: RegistrationId,
    /// Lifecycle status
    pub status: RegistrationStatus,
    /// Payment status (paid options only)
    pub payment_status: Option<PaymentStatus>,
    /// Whether the payer still has to complete a checkout
    pub payment_pending: bool,
    /// Applied discount, if any
    pub discount: Option<DiscountSummary>,
    /// Where to resume an open checkout
    pub checkout_url: Option<String>,
    /// When the attendee was checked in
    pub check_in_time: Option<DateTime<Utc>>,
}

/// Whether a scanned ticket may be checked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CheckInEligibility {
    /// Confirmed and not yet checked in
    Allowed,
    /// Already admitted
    AlreadyCheckedIn {
        /// First check-in time
        at: DateTime<Utc>,
    },
    /// Only confirmed registrations can be checked in
    NotConfirmed {
        /// Current status
        status: RegistrationStatus,
    },
}

/// A scanned ticket and its eligibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    /// The scanned registration
    pub registration: Registration,
    /// Whether check-in is possible
    pub eligibility: CheckInEligibility,
}

/// Result of a check-in attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CheckInOutcome {
    /// Checked in now
    CheckedIn {
        /// Recorded check-in time
        at: DateTime<Utc>,
    },
    /// Checked in earlier; nothing changed
    AlreadyCheckedIn {
        /// First check-in time
        at: DateTime<Utc>,
    },
    /// Not confirmed; nothing changed
    NotConfirmed {
        /// Current status
        status: RegistrationStatus,
    },
}

/// Decide whether a registration may be checked in.
#[must_use]
pub fn check_in_eligibility(registration: &Registration) -> CheckInEligibility {
    if registration.status != RegistrationStatus::Confirmed {
        return CheckInEligibility::NotConfirmed {
            status: registration.status,
        };
    }
    match registration.check_in_time {
        Some(at) => CheckInEligibility::AlreadyCheckedIn { at },
        None => CheckInEligibility::Allowed,
    }
}

fn discount_summary(registration: &Registration) -> Option<DiscountSummary> {
    let pricing = registration.pricing.as_ref()?;
    Some(DiscountSummary {
        discount_type: pricing.applied_discount_type.clone()?,
        base_price: pricing.base_price,
        discounted_price: pricing.applied_discounted_price?,
        discount_amount: pricing.discount_amount.unwrap_or(Money::ZERO),
    })
}

impl<S, P> RegistrationService<S, P>
where
    S: RegistrationStore,
    P: PaymentProvider,
{
    /// Current state of a registration, as shown to its owner.
    ///
    /// # Errors
    ///
    /// `RegistrationNotFound` for unknown ids or another tenant's rows,
    /// `Forbidden` unless the caller owns the registration or manages
    /// registrations.
    #[tracing::instrument(skip(self, caller, tenant), fields(user_id = %caller.user_id))]
    pub async fn get_registration_status(
        &self,
        caller: &Caller,
        tenant: &Tenant,
        registration_id: RegistrationId,
    ) -> Result<RegistrationStatusView> {
        let mut unit = self.store.begin().await?;
        let registration = load_for_caller(&mut unit, caller, tenant, registration_id).await?;

        let checkout_url = if registration.status == RegistrationStatus::Pending {
            unit.pending_transaction_for(registration.id)
                .await?
                .and_then(|t| t.checkout_url)
        } else {
            None
        };

        Ok(RegistrationStatusView {
            registration_id: registration.id,
            status: registration.status,
            payment_status: registration.payment_status,
            payment_pending: registration.status == RegistrationStatus::Pending
                && registration.payment_status == Some(PaymentStatus::Pending),
            discount: discount_summary(&registration),
            checkout_url,
            check_in_time: registration.check_in_time,
        })
    }

    /// Look up a scanned ticket without changing it.
    ///
    /// # Errors
    ///
    /// `Forbidden` unless the caller may check attendees in,
    /// `RegistrationNotFound` for unknown ids or another tenant's rows.
    #[tracing::instrument(skip(self, caller, tenant), fields(user_id = %caller.user_id))]
    pub async fn registration_scanned(
        &self,
        caller: &Caller,
        tenant: &Tenant,
        registration_id: RegistrationId,
    ) -> Result<ScanResult> {
        if !caller.can_check_in {
            return Err(RegistrationError::Forbidden);
        }
        let mut unit = self.store.begin().await?;
        let registration = load_in_tenant(&mut unit, tenant, registration_id).await?;

        Ok(ScanResult {
            eligibility: check_in_eligibility(&registration),
            registration,
        })
    }

    /// Check an attendee in.
    ///
    /// Only confirmed registrations are admitted and only once; repeated
    /// scans report the first check-in time.
    ///
    /// # Errors
    ///
    /// Same as [`Self::registration_scanned`], or an internal error if the
    /// store fails.
    #[tracing::instrument(skip(self, caller, tenant), fields(user_id = %caller.user_id))]
    pub async fn check_in(
        &self,
        caller: &Caller,
        tenant: &Tenant,
        registration_id: RegistrationId,
    ) -> Result<CheckInOutcome> {
        if !caller.can_check_in {
            return Err(RegistrationError::Forbidden);
        }
        let mut unit = self.store.begin().await?;
        let registration = load_in_tenant(&mut unit, tenant, registration_id).await?;

        match check_in_eligibility(&registration) {
            CheckInEligibility::Allowed => {}
            CheckInEligibility::AlreadyCheckedIn { at } => {
                return Ok(CheckInOutcome::AlreadyCheckedIn { at });
            }
            CheckInEligibility::NotConfirmed { status } => {
                return Ok(CheckInOutcome::NotConfirmed { status });
            }
        }

        let at = self.clock.now();
        if unit.record_check_in(registration_id, at).await? {
            unit.commit().await?;
            tracing::info!(%registration_id, "Attendee checked in");
            return Ok(CheckInOutcome::CheckedIn { at });
        }

        // Another scan got there first.
        let current = load_in_tenant(&mut unit, tenant, registration_id).await?;
        Ok(match check_in_eligibility(&current) {
            CheckInEligibility::AlreadyCheckedIn { at } => CheckInOutcome::AlreadyCheckedIn { at },
            CheckInEligibility::NotConfirmed { status } => CheckInOutcome::NotConfirmed { status },
            CheckInEligibility::Allowed => CheckInOutcome::NotConfirmed {
                status: current.status,
            },
        })
    }
}

async fn load_in_tenant<U: UnitOfWork>(
    unit: &mut U,
    tenant: &Tenant,
    registration_id: RegistrationId,
) -> Result<Registration> {
    unit.load_registration(registration_id)
        .await?
        .filter(|r| r.tenant_id == tenant.id)
        .ok_or(RegistrationError::RegistrationNotFound(registration_id))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use registration_core::{EventId, OptionId, PricingSnapshot, TenantId, UserId};

    fn registration(status: RegistrationStatus) -> Registration {
        Registration {
            id: RegistrationId::new(),
            user_id: UserId::new(),
            event_id: EventId::new(),
            option_id: OptionId::new(),
            tenant_id: TenantId::new(),
            status,
            payment_status: None,
            check_in_time: None,
            pricing: None,
            created_at: Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_only_confirmed_registrations_may_check_in() {
        assert_eq!(
            check_in_eligibility(&registration(RegistrationStatus::Confirmed)),
            CheckInEligibility::Allowed
        );
        for status in [
            RegistrationStatus::Pending,
            RegistrationStatus::Cancelled,
            RegistrationStatus::Waitlist,
        ] {
            assert_eq!(
                check_in_eligibility(&registration(status)),
                CheckInEligibility::NotConfirmed { status }
            );
        }
    }

    #[test]
    fn test_second_check_in_reports_first_time() {
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 18, 5, 0).unwrap();
        let mut reg = registration(RegistrationStatus::Confirmed);
        reg.check_in_time = Some(at);

        assert_eq!(
            check_in_eligibility(&reg),
            CheckInEligibility::AlreadyCheckedIn { at }
        );
    }

    #[test]
    fn test_discount_summary_requires_an_applied_discount() {
        let mut reg = registration(RegistrationStatus::Pending);
        reg.pricing = Some(PricingSnapshot {
            base_price: Money::from_cents(1000),
            applied_discount_type: None,
            applied_discounted_price: None,
            discount_amount: None,
        });
        assert_eq!(discount_summary(&reg), None);

        reg.pricing = Some(PricingSnapshot {
            base_price: Money::from_cents(1000),
            applied_discount_type: Some(DiscountType::new("esnCard")),
            applied_discounted_price: Some(Money::from_cents(500)),
            discount_amount: Some(Money::from_cents(500)),
        });
        assert_eq!(
            discount_summary(&reg),
            Some(DiscountSummary {
                discount_type: DiscountType::new("esnCard"),
                base_price: Money::from_cents(1000),
                discounted_price: Money::from_cents(500),
                discount_amount: Money::from_cents(500),
            })
        );
    }
}
