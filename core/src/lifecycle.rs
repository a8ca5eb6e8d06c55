//! Registration state machine.
//!
//! ```text
//!            ┌──────────── payment succeeded / price resolved to zero ───────────┐
//!            │                                                                   ▼
//!   PENDING ─┴── expired / cancelled while pending / rollback ──► CANCELLED ◄── CONFIRMED
//!                                                                     ▲      explicit cancel,
//!   WAITLIST (no transitions owned here)                              │      refund
//! ```
//!
//! Every transition carries the ledger change that keeps the counters in step
//! with the status: a PENDING registration holds a reserved spot, a CONFIRMED
//! one holds a confirmed spot, and CANCELLED or WAITLIST hold none.

use crate::error::RegistrationError;
use crate::ledger::{self, ClaimKind};
use crate::store::UnitOfWork;
use crate::types::{PaymentStatus, Registration, RegistrationStatus};

/// Ledger change that accompanies a status transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerEffect {
    /// Reserved → confirmed
    Promote,
    /// Give back the spot of this kind
    Release(ClaimKind),
}

/// Initial status of a new claim.
#[must_use]
pub const fn initial_status(is_paid: bool) -> RegistrationStatus {
    if is_paid {
        RegistrationStatus::Pending
    } else {
        RegistrationStatus::Confirmed
    }
}

/// The capacity counter a registration in `status` occupies.
#[must_use]
pub const fn held_claim(status: RegistrationStatus) -> Option<ClaimKind> {
    match status {
        RegistrationStatus::Pending => Some(ClaimKind::Reserved),
        RegistrationStatus::Confirmed => Some(ClaimKind::Confirmed),
        RegistrationStatus::Cancelled | RegistrationStatus::Waitlist => None,
    }
}

/// Validate `from → to` and return the ledger change it requires.
///
/// # Errors
///
/// Returns [`RegistrationError::InvalidTransition`] for any transition outside
/// `PENDING → CONFIRMED`, `PENDING → CANCELLED` and `CONFIRMED → CANCELLED`.
pub const fn plan(
    from: RegistrationStatus,
    to: RegistrationStatus,
) -> Result<LedgerEffect, RegistrationError> {
    match (from, to) {
        (RegistrationStatus::Pending, RegistrationStatus::Confirmed) => Ok(LedgerEffect::Promote),
        (RegistrationStatus::Pending, RegistrationStatus::Cancelled) => {
            Ok(LedgerEffect::Release(ClaimKind::Reserved))
        }
        (RegistrationStatus::Confirmed, RegistrationStatus::Cancelled) => {
            Ok(LedgerEffect::Release(ClaimKind::Confirmed))
        }
        _ => Err(RegistrationError::InvalidTransition { from, to }),
    }
}

/// Apply a transition inside a unit of work.
///
/// The status change is a compare-and-set against `registration.status`; the
/// ledger change runs only if that write won. Returns `false` when another
/// unit moved the registration first, in which case nothing was changed.
///
/// # Errors
///
/// Returns `InvalidTransition` for illegal transitions, or an internal error if
/// the store or ledger fails (the caller must then drop the unit).
pub async fn transition<U: UnitOfWork>(
    unit: &mut U,
    registration: &Registration,
    to: RegistrationStatus,
    payment_status: Option<PaymentStatus>,
) -> Result<bool, RegistrationError> {
    let effect = plan(registration.status, to)?;

    let won = unit
        .update_registration_status(registration.id, registration.status, to, payment_status)
        .await?;
    if !won {
        tracing::debug!(
            registration_id = %registration.id,
            from = %registration.status,
            %to,
            "Transition lost to a concurrent update"
        );
        return Ok(false);
    }

    match effect {
        LedgerEffect::Promote => ledger::promote(unit, registration.option_id).await?,
        LedgerEffect::Release(kind) => ledger::release(unit, registration.option_id, kind).await?,
    }

    tracing::info!(
        registration_id = %registration.id,
        from = %registration.status,
        %to,
        "Registration transitioned"
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [RegistrationStatus; 4] = [
        RegistrationStatus::Pending,
        RegistrationStatus::Confirmed,
        RegistrationStatus::Cancelled,
        RegistrationStatus::Waitlist,
    ];

    #[test]
    fn test_initial_status_depends_on_payment() {
        assert_eq!(initial_status(true), RegistrationStatus::Pending);
        assert_eq!(initial_status(false), RegistrationStatus::Confirmed);
    }

    #[test]
    fn test_legal_transitions_carry_their_ledger_effect() {
        assert!(matches!(
            plan(RegistrationStatus::Pending, RegistrationStatus::Confirmed),
            Ok(LedgerEffect::Promote)
        ));
        assert!(matches!(
            plan(RegistrationStatus::Pending, RegistrationStatus::Cancelled),
            Ok(LedgerEffect::Release(ClaimKind::Reserved))
        ));
        assert!(matches!(
            plan(RegistrationStatus::Confirmed, RegistrationStatus::Cancelled),
            Ok(LedgerEffect::Release(ClaimKind::Confirmed))
        ));
    }

    #[test]
    fn test_cancelled_and_waitlist_are_terminal() {
        for to in ALL {
            assert!(plan(RegistrationStatus::Cancelled, to).is_err());
            assert!(plan(RegistrationStatus::Waitlist, to).is_err());
        }
    }

    #[test]
    fn test_confirmed_cannot_go_back_to_pending() {
        assert!(matches!(
            plan(RegistrationStatus::Confirmed, RegistrationStatus::Pending),
            Err(RegistrationError::InvalidTransition { .. })
        ));
        assert!(plan(RegistrationStatus::Confirmed, RegistrationStatus::Confirmed).is_err());
    }

    #[test]
    fn test_release_matches_the_held_claim() {
        for from in ALL {
            for to in ALL {
                if let Ok(LedgerEffect::Release(kind)) = plan(from, to) {
                    assert_eq!(held_claim(from), Some(kind));
                }
            }
        }
    }
}
