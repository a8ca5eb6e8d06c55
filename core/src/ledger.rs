//! Capacity ledger.
//!
//! Owns the per-option spot counters and the invariant that committed claims
//! never exceed capacity:
//!
//! ```text
//! confirmed_spots + reserved_spots <= spots
//! ```
//!
//! `waitlist_spots` is informational and not capacity constrained.
//!
//! The counter rules live on [`RegistrationOption`] so that every store applies
//! the same arithmetic; the async functions below run them through a
//! [`UnitOfWork`], where each one is a single conditional statement.

use crate::error::{InternalError, RegistrationError};
use crate::store::UnitOfWork;
use crate::types::{OptionId, RegistrationOption};
use serde::{Deserialize, Serialize};

/// Which counter a claim occupies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimKind {
    /// A guaranteed spot
    Confirmed,
    /// A spot held while payment is outstanding
    Reserved,
}

impl ClaimKind {
    /// Counter name, used in logs and SQL column selection.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Reserved => "reserved",
        }
    }
}

impl RegistrationOption {
    /// Spots neither confirmed nor reserved.
    #[must_use]
    pub const fn available_spots(&self) -> u32 {
        self.spots
            .saturating_sub(self.confirmed_spots.saturating_add(self.reserved_spots))
    }

    /// Whether one more claim fits.
    #[must_use]
    pub const fn has_capacity(&self) -> bool {
        self.available_spots() > 0
    }

    /// Compare-and-increment: claims one spot of `kind` if capacity remains.
    pub const fn try_claim(&mut self, kind: ClaimKind) -> bool {
        if !self.has_capacity() {
            return false;
        }
        match kind {
            ClaimKind::Confirmed => self.confirmed_spots += 1,
            ClaimKind::Reserved => self.reserved_spots += 1,
        }
        true
    }

    /// Releases one spot of `kind`, floored at zero.
    pub const fn release(&mut self, kind: ClaimKind) {
        match kind {
            ClaimKind::Confirmed => self.confirmed_spots = self.confirmed_spots.saturating_sub(1),
            ClaimKind::Reserved => self.reserved_spots = self.reserved_spots.saturating_sub(1),
        }
    }

    /// Moves one spot from reserved to confirmed.
    ///
    /// Returns `false` if nothing is reserved.
    pub const fn promote(&mut self) -> bool {
        if self.reserved_spots == 0 {
            return false;
        }
        self.reserved_spots -= 1;
        self.confirmed_spots += 1;
        true
    }
}

/// Claim a spot, failing with [`RegistrationError::CapacityExhausted`] when the
/// option is full.
///
/// # Errors
///
/// Returns `CapacityExhausted` on a lost race or a full option, or an internal
/// error if the store fails.
pub async fn claim<U: UnitOfWork>(
    unit: &mut U,
    option_id: OptionId,
    kind: ClaimKind,
) -> Result<(), RegistrationError> {
    if unit.try_claim(option_id, kind).await? {
        tracing::debug!(%option_id, kind = kind.as_str(), "Spot claimed");
        Ok(())
    } else {
        tracing::debug!(%option_id, kind = kind.as_str(), "Claim rejected, option full");
        Err(RegistrationError::CapacityExhausted { option_id })
    }
}

/// Release a previously claimed spot.
///
/// # Errors
///
/// Returns an internal error if the store fails.
pub async fn release<U: UnitOfWork>(
    unit: &mut U,
    option_id: OptionId,
    kind: ClaimKind,
) -> Result<(), RegistrationError> {
    unit.release(option_id, kind).await?;
    tracing::debug!(%option_id, kind = kind.as_str(), "Spot released");
    Ok(())
}

/// Turn a reservation into a confirmed spot.
///
/// If no reserved spot is recorded (the counters drifted), a fresh confirmed
/// claim is attempted instead; if that also fails the option is genuinely full
/// and the drift is reported as an internal error.
///
/// # Errors
///
/// Returns [`InternalError::LedgerDrift`] when neither a promotion nor a fresh
/// claim is possible, or an internal error if the store fails.
pub async fn promote<U: UnitOfWork>(
    unit: &mut U,
    option_id: OptionId,
) -> Result<(), RegistrationError> {
    if unit.promote(option_id).await? {
        tracing::debug!(%option_id, "Reserved spot promoted to confirmed");
        return Ok(());
    }

    tracing::warn!(%option_id, "No reserved spot to promote, claiming a confirmed spot instead");
    if unit.try_claim(option_id, ClaimKind::Confirmed).await? {
        Ok(())
    } else {
        tracing::error!(%option_id, "Ledger drift: cannot confirm a paid registration");
        Err(InternalError::LedgerDrift { option_id }.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventId, Money};
    use proptest::prelude::*;

    fn option_with(spots: u32) -> RegistrationOption {
        RegistrationOption {
            id: OptionId::new(),
            event_id: EventId::new(),
            title: "Participant".to_string(),
            spots,
            confirmed_spots: 0,
            reserved_spots: 0,
            waitlist_spots: 0,
            is_paid: false,
            price: Money::ZERO,
            tax_rate_id: None,
        }
    }

    #[test]
    fn test_claim_stops_at_capacity() {
        let mut option = option_with(2);

        assert!(option.try_claim(ClaimKind::Reserved));
        assert!(option.try_claim(ClaimKind::Confirmed));
        assert!(!option.try_claim(ClaimKind::Confirmed));
        assert!(!option.try_claim(ClaimKind::Reserved));
        assert_eq!(option.confirmed_spots, 1);
        assert_eq!(option.reserved_spots, 1);
    }

    #[test]
    fn test_release_is_floored_at_zero() {
        let mut option = option_with(1);
        option.release(ClaimKind::Reserved);
        option.release(ClaimKind::Confirmed);
        assert_eq!(option.reserved_spots, 0);
        assert_eq!(option.confirmed_spots, 0);
    }

    #[test]
    fn test_promote_moves_reserved_to_confirmed() {
        let mut option = option_with(1);
        assert!(!option.promote());

        assert!(option.try_claim(ClaimKind::Reserved));
        assert!(option.promote());
        assert_eq!(option.reserved_spots, 0);
        assert_eq!(option.confirmed_spots, 1);
        assert!(!option.has_capacity());
    }

    #[test]
    fn test_zero_capacity_option_admits_nobody() {
        let mut option = option_with(0);
        assert!(!option.try_claim(ClaimKind::Confirmed));
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Claim(ClaimKind),
        Release(ClaimKind),
        Promote,
    }

    fn arb_kind() -> impl Strategy<Value = ClaimKind> {
        prop_oneof![Just(ClaimKind::Confirmed), Just(ClaimKind::Reserved)]
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            arb_kind().prop_map(Op::Claim),
            arb_kind().prop_map(Op::Release),
            Just(Op::Promote),
        ]
    }

    proptest! {
        #[test]
        fn counters_never_exceed_capacity(
            spots in 0u32..8,
            ops in proptest::collection::vec(arb_op(), 0..64),
        ) {
            let mut option = option_with(spots);
            // Claims currently held, per kind, as the caller would track them.
            let mut held_confirmed = 0u32;
            let mut held_reserved = 0u32;

            for op in ops {
                match op {
                    Op::Claim(kind) => {
                        if option.try_claim(kind) {
                            match kind {
                                ClaimKind::Confirmed => held_confirmed += 1,
                                ClaimKind::Reserved => held_reserved += 1,
                            }
                        }
                    }
                    Op::Release(kind) => {
                        let held = match kind {
                            ClaimKind::Confirmed => &mut held_confirmed,
                            ClaimKind::Reserved => &mut held_reserved,
                        };
                        if *held > 0 {
                            *held -= 1;
                            option.release(kind);
                        }
                    }
                    Op::Promote => {
                        if held_reserved > 0 {
                            prop_assert!(option.promote());
                            held_reserved -= 1;
                            held_confirmed += 1;
                        }
                    }
                }

                prop_assert!(option.confirmed_spots + option.reserved_spots <= spots);
                prop_assert_eq!(option.confirmed_spots, held_confirmed);
                prop_assert_eq!(option.reserved_spots, held_reserved);
            }
        }
    }
}
