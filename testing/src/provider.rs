//! Mock payment provider.
//!
//! Records every outbound request and answers with deterministic session ids
//! (`cs_test_1`, `cs_test_2`, ...). Failures can be scripted per operation.

use registration_core::ProviderError;
use registration_core::provider::{CheckoutSession, CheckoutSessionRequest, PaymentProvider};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Hook = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Recorded {
    checkouts: Vec<CheckoutSessionRequest>,
    expired: Vec<(String, Option<String>)>,
    checkout_failure: Option<ProviderError>,
    expire_failure: Option<ProviderError>,
    before_checkout: Option<Hook>,
}

impl fmt::Debug for Recorded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recorded")
            .field("checkouts", &self.checkouts)
            .field("expired", &self.expired)
            .field("checkout_failure", &self.checkout_failure)
            .field("expire_failure", &self.expire_failure)
            .field("before_checkout", &self.before_checkout.is_some())
            .finish()
    }
}

/// Scriptable [`PaymentProvider`] for tests.
///
/// # Example
///
/// ```
/// use registration_testing::MockPaymentProvider;
/// use registration_core::ProviderError;
///
/// let provider = MockPaymentProvider::new();
/// provider.fail_checkouts_with(ProviderError::Timeout);
/// assert!(provider.checkout_requests().is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockPaymentProvider {
    recorded: Arc<Mutex<Recorded>>,
    sequence: Arc<AtomicU64>,
}

impl MockPaymentProvider {
    /// Create a provider that accepts every request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail every checkout creation with `error` until cleared.
    pub fn fail_checkouts_with(&self, error: ProviderError) {
        self.recorded().checkout_failure = Some(error);
    }

    /// Fail every session expiry with `error` until cleared.
    pub fn fail_expiry_with(&self, error: ProviderError) {
        self.recorded().expire_failure = Some(error);
    }

    /// Run `hook` on every checkout request, after it is recorded and before
    /// the scripted answer.
    pub fn before_checkout(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.recorded().before_checkout = Some(Arc::new(hook));
    }

    /// Accept every request again and drop the checkout hook.
    pub fn clear_failures(&self) {
        let mut recorded = self.recorded();
        recorded.checkout_failure = None;
        recorded.expire_failure = None;
        recorded.before_checkout = None;
    }

    /// Checkout requests received so far, including failed ones.
    #[must_use]
    pub fn checkout_requests(&self) -> Vec<CheckoutSessionRequest> {
        self.recorded().checkouts.clone()
    }

    /// Session ids whose expiry succeeded, with the account they were sent to.
    #[must_use]
    pub fn expired_sessions(&self) -> Vec<(String, Option<String>)> {
        self.recorded().expired.clone()
    }

    /// Hosted URL the mock hands out for `session_id`.
    #[must_use]
    pub fn checkout_url(session_id: &str) -> String {
        format!("https://checkout.test/{session_id}")
    }
}

impl PaymentProvider for MockPaymentProvider {
    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        let (failure, hook) = {
            let mut recorded = self.recorded();
            recorded.checkouts.push(request.clone());
            (
                recorded.checkout_failure.clone(),
                recorded.before_checkout.clone(),
            )
        };
        if let Some(hook) = hook {
            hook();
        }
        if let Some(error) = failure {
            return Err(error);
        }

        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("cs_test_{n}");
        Ok(CheckoutSession {
            url: Some(Self::checkout_url(&id)),
            id,
        })
    }

    async fn expire_checkout_session(
        &self,
        session_id: &str,
        account_id: Option<&str>,
    ) -> Result<(), ProviderError> {
        let mut recorded = self.recorded();
        if let Some(error) = recorded.expire_failure.clone() {
            return Err(error);
        }
        recorded
            .expired
            .push((session_id.to_string(), account_id.map(str::to_string)));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use registration_core::provider::PaymentMetadata;
    use registration_core::{Money, RegistrationId, TenantId, TransactionId};

    fn request() -> CheckoutSessionRequest {
        CheckoutSessionRequest {
            amount: Money::from_cents(1000),
            currency: "eur".to_string(),
            description: "Pub crawl".to_string(),
            tax_rate_id: None,
            success_url: "https://app.test/ok".to_string(),
            cancel_url: "https://app.test/cancel".to_string(),
            metadata: PaymentMetadata {
                registration_id: RegistrationId::new(),
                transaction_id: TransactionId::new(),
                tenant_id: TenantId::new(),
            },
            account_id: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_sessions_get_sequential_ids() {
        let provider = MockPaymentProvider::new();
        let first = provider.create_checkout_session(&request()).await.unwrap();
        let second = provider.create_checkout_session(&request()).await.unwrap();

        assert_eq!(first.id, "cs_test_1");
        assert_eq!(second.id, "cs_test_2");
        assert_eq!(first.url.as_deref(), Some("https://checkout.test/cs_test_1"));
        assert_eq!(provider.checkout_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failure_is_returned_and_recorded() {
        let provider = MockPaymentProvider::new();
        provider.fail_checkouts_with(ProviderError::Timeout);

        let result = provider.create_checkout_session(&request()).await;
        assert_eq!(result, Err(ProviderError::Timeout));
        assert_eq!(provider.checkout_requests().len(), 1);

        provider.clear_failures();
        assert!(provider.create_checkout_session(&request()).await.is_ok());
    }

    #[tokio::test]
    async fn test_expiry_records_account() {
        let provider = MockPaymentProvider::new();
        provider
            .expire_checkout_session("cs_test_9", Some("acct_1"))
            .await
            .unwrap();

        assert_eq!(
            provider.expired_sessions(),
            vec![("cs_test_9".to_string(), Some("acct_1".to_string()))]
        );
    }
}
