//! Error types for registration operations.

use crate::types::{EventId, OptionId, RegistrationId, RegistrationStatus};
use thiserror::Error;

/// Result type alias for registration operations.
pub type Result<T> = std::result::Result<T, RegistrationError>;

/// Coarse classification surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request conflicts with current state; never retried automatically
    Conflict,
    /// The referenced option or registration does not exist
    NotFound,
    /// The caller lacks the required capability
    Forbidden,
    /// Something failed on our side; details are logged, not returned
    Internal,
}

/// Errors returned by the registration core.
#[derive(Debug, Error)]
pub enum RegistrationError {
    // ═══════════════════════════════════════════════════════════
    // Conflicts
    // ═══════════════════════════════════════════════════════════

    /// The user already holds a non-cancelled registration for the event.
    #[error("Already registered for event {event_id}")]
    AlreadyRegistered {
        /// Event the user is registered for
        event_id: EventId,
    },

    /// Every spot on the option is confirmed or reserved.
    #[error("No spots left on option {option_id}")]
    CapacityExhausted {
        /// Option that is full
        option_id: OptionId,
    },

    /// The registration is not in a state that allows this operation.
    #[error("Cannot move registration from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: RegistrationStatus,
        /// Requested status
        to: RegistrationStatus,
    },

    // ═══════════════════════════════════════════════════════════
    // Lookups
    // ═══════════════════════════════════════════════════════════

    /// Unknown registration option.
    #[error("Registration option {0} not found")]
    OptionNotFound(OptionId),

    /// Unknown registration.
    #[error("Registration {0} not found")]
    RegistrationNotFound(RegistrationId),

    // ═══════════════════════════════════════════════════════════
    // Authorization
    // ═══════════════════════════════════════════════════════════

    /// The caller may not act on this registration.
    #[error("Forbidden")]
    Forbidden,

    // ═══════════════════════════════════════════════════════════
    // System
    // ═══════════════════════════════════════════════════════════

    /// Internal failure; the cause is available through `source()`.
    #[error("Internal error")]
    Internal(#[source] InternalError),
}

impl RegistrationError {
    /// Classify the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyRegistered { .. }
            | Self::CapacityExhausted { .. }
            | Self::InvalidTransition { .. } => ErrorKind::Conflict,
            Self::OptionNotFound(_) | Self::RegistrationNotFound(_) => ErrorKind::NotFound,
            Self::Forbidden => ErrorKind::Forbidden,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns `true` for internal failures.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Internal)
    }
}

impl From<InternalError> for RegistrationError {
    fn from(err: InternalError) -> Self {
        Self::Internal(err)
    }
}

impl From<StoreError> for RegistrationError {
    fn from(err: StoreError) -> Self {
        Self::Internal(InternalError::Store(err))
    }
}

impl From<ProviderError> for RegistrationError {
    fn from(err: ProviderError) -> Self {
        Self::Internal(InternalError::Provider(err))
    }
}

/// Causes of [`RegistrationError::Internal`].
#[derive(Debug, Error)]
pub enum InternalError {
    /// Persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The payment provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A row references a relation that does not exist.
    #[error("{entity} {id} is missing")]
    MissingRelation {
        /// Kind of the missing row
        entity: &'static str,
        /// Its identifier
        id: String,
    },

    /// The stored counters disagree with the registrations that hold them.
    #[error("Spot counters of option {option_id} are out of step with its registrations")]
    LedgerDrift {
        /// Option whose counters drifted
        option_id: OptionId,
    },
}

/// Errors raised by a [`crate::store::RegistrationStore`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// A uniqueness constraint rejected the write.
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// A stored row could not be mapped back to a domain value.
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Errors raised by a [`crate::provider::PaymentProvider`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The request never got a response.
    #[error("Request failed: {0}")]
    Network(String),

    /// The provider did not answer in time.
    #[error("Provider timeout")]
    Timeout,

    /// The provider answered with an error status.
    #[error("API error (status {status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message from the provider
        message: String,
    },

    /// The provider answered with something we could not understand.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_internal_error_hides_cause_in_display() {
        let err: RegistrationError =
            StoreError::Database("connection reset by peer".to_string()).into();

        assert_eq!(err.to_string(), "Internal error");
        assert_eq!(err.kind(), ErrorKind::Internal);
        let source = err.source().map(ToString::to_string);
        assert_eq!(
            source.as_deref(),
            Some("Database error: connection reset by peer")
        );
    }

    #[test]
    fn test_conflicts_are_classified() {
        let err = RegistrationError::CapacityExhausted {
            option_id: OptionId::new(),
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = RegistrationError::InvalidTransition {
            from: RegistrationStatus::Cancelled,
            to: RegistrationStatus::Confirmed,
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(!err.is_internal());
    }
}
