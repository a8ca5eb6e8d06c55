//! # Registration Testing
//!
//! Test doubles for the registration core.
//!
//! This crate provides:
//! - [`InMemoryRegistrationStore`]: a serialized, transactional in-memory store
//! - [`MockPaymentProvider`]: records checkout requests, scriptable failures
//! - [`FixedClock`]: deterministic time
//! - [`Fixture`]: a tenant and an event with option and discount builders
//!
//! ## Example
//!
//! ```ignore
//! use registration_testing::{Fixture, MockPaymentProvider, test_clock};
//!
//! #[tokio::test]
//! async fn test_free_registration() {
//!     let fixture = Fixture::new().await;
//!     let option = fixture.free_option(10).await;
//!     let service = RegistrationService::new(
//!         fixture.store.clone(),
//!         MockPaymentProvider::new(),
//!         Arc::new(test_clock()),
//!         callbacks(),
//!     );
//!     // ...
//! }
//! ```

pub mod fixtures;
pub mod memory;
pub mod provider;

use chrono::{DateTime, Utc};
use registration_core::environment::Clock;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use registration_testing::mocks::FixedClock;
    /// use registration_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Fixed clock at 2025-05-01 12:00:00 UTC, a month before the fixture event.
    ///
    /// # Panics
    ///
    /// Never in practice; the timestamp is hardcoded.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-05-01T12:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub use fixtures::{ESN_CARD, Fixture, event_start};
pub use memory::{InMemoryRegistrationStore, MemoryUnit};
pub use mocks::{FixedClock, test_clock};
pub use provider::MockPaymentProvider;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use registration_core::ledger::ClaimKind;
    use registration_core::store::{RegistrationStore, UnitOfWork};

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert!(clock.now() < event_start());
    }

    #[tokio::test]
    async fn test_dropped_unit_discards_writes() {
        let fixture = Fixture::new().await;
        let option = fixture.paid_option(3, 1000).await;

        {
            let mut unit = fixture.store.begin().await.unwrap();
            assert!(unit.try_claim(option.id, ClaimKind::Reserved).await.unwrap());
        }

        let stored = fixture.store.option(option.id).await.unwrap();
        assert_eq!(stored.reserved_spots, 0);
    }

    #[tokio::test]
    async fn test_committed_unit_is_visible() {
        let fixture = Fixture::new().await;
        let option = fixture.paid_option(1, 1000).await;

        let mut unit = fixture.store.begin().await.unwrap();
        assert!(unit.try_claim(option.id, ClaimKind::Reserved).await.unwrap());
        assert!(!unit.try_claim(option.id, ClaimKind::Confirmed).await.unwrap());
        unit.commit().await.unwrap();

        let stored = fixture.store.option(option.id).await.unwrap();
        assert_eq!(stored.reserved_spots, 1);
        assert_eq!(stored.confirmed_spots, 0);
    }

    #[tokio::test]
    async fn test_units_are_serialized() {
        let fixture = Fixture::new().await;
        let option_id = fixture.paid_option(5, 1000).await.id;

        let claims = (0..20).map(|_| {
            let store = fixture.store.clone();
            tokio::spawn(async move {
                let mut unit = store.begin().await.unwrap();
                let won = unit.try_claim(option_id, ClaimKind::Reserved).await.unwrap();
                unit.commit().await.unwrap();
                won
            })
        });
        let won = futures::future::join_all(claims)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();

        assert_eq!(won, 5);
        assert_eq!(fixture.store.option(option_id).await.unwrap().reserved_spots, 5);
    }
}
