//! # Registration Core
//!
//! Registration and capacity reservation for capacity-limited events.
//!
//! Users claim one of a finite number of spots on a registration option,
//! optionally pay a fee (with discount eligibility), and the system keeps spot
//! counts, registration status and external payment state consistent under
//! concurrent access and partial failure.
//!
//! This crate is the functional core: no I/O happens here. It provides
//!
//! - [`ledger`]: the capacity ledger rules (`confirmed + reserved <= spots`)
//! - [`discount`]: pure discount-price resolution
//! - [`lifecycle`]: the registration state machine and its ledger effects
//! - [`store`]: the transactional store seam every component shares
//! - [`provider`]: the payment-provider seam and its webhook notifications
//!
//! ```text
//! request ──► lifecycle (admit) ──► ledger (claim) ──► discount ──► provider
//!                                                                     │
//! webhook ──► reconciler ──► lifecycle (confirm / cancel) ◄───────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod discount;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod provider;
pub mod store;
pub mod types;

pub use error::{ErrorKind, InternalError, ProviderError, RegistrationError, Result, StoreError};
pub use types::*;

/// Environment module - injected dependencies.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
