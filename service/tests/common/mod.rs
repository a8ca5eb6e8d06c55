//! Shared setup for service integration tests.

#![allow(dead_code, clippy::unwrap_used)] // Each test binary uses a different subset

use chrono::Duration;
use registration_core::provider::{PaymentMetadata, ProviderEvent};
use registration_core::{Caller, UserId};
use registration_service::{Admission, CheckoutSettings, RegistrationService, WebhookReconciler};
use registration_testing::{Fixture, InMemoryRegistrationStore, MockPaymentProvider, test_clock};
use std::sync::Arc;

pub type Service = RegistrationService<InMemoryRegistrationStore, MockPaymentProvider>;

/// A fixture tenant and event, the service and reconciler over the same store.
pub struct Harness {
    pub fixture: Fixture,
    pub provider: MockPaymentProvider,
    pub service: Arc<Service>,
    pub reconciler: WebhookReconciler<InMemoryRegistrationStore>,
}

pub fn settings() -> CheckoutSettings {
    CheckoutSettings {
        public_base_url: "https://app.test".to_string(),
        expires_after: Some(Duration::minutes(60)),
    }
}

pub async fn harness() -> Harness {
    registration_testing::init_test_tracing();
    let fixture = Fixture::new().await;
    let provider = MockPaymentProvider::new();
    let service = Arc::new(RegistrationService::new(
        fixture.store.clone(),
        provider.clone(),
        Arc::new(test_clock()),
        settings(),
    ));
    let reconciler = WebhookReconciler::new(fixture.store.clone());
    Harness {
        fixture,
        provider,
        service,
        reconciler,
    }
}

pub fn user() -> Caller {
    Caller::user(UserId::new())
}

pub fn manager() -> Caller {
    Caller {
        user_id: UserId::new(),
        can_manage_registrations: true,
        can_check_in: false,
    }
}

pub fn door_staff() -> Caller {
    Caller {
        user_id: UserId::new(),
        can_manage_registrations: false,
        can_check_in: true,
    }
}

/// Metadata the orchestrator attached to the admission's checkout.
pub fn metadata(harness: &Harness, admission: &Admission) -> PaymentMetadata {
    let checkout = admission.checkout.as_ref().unwrap();
    PaymentMetadata {
        registration_id: admission.registration_id,
        transaction_id: checkout.transaction_id,
        tenant_id: harness.fixture.tenant.id,
    }
}

pub fn completed(harness: &Harness, admission: &Admission) -> ProviderEvent {
    ProviderEvent::CheckoutCompleted {
        session_id: admission.checkout.as_ref().unwrap().session_id.clone(),
        metadata: Some(metadata(harness, admission)),
        payment_intent_id: Some("pi_test_1".to_string()),
    }
}

pub fn expired(harness: &Harness, admission: &Admission) -> ProviderEvent {
    ProviderEvent::CheckoutExpired {
        session_id: admission.checkout.as_ref().unwrap().session_id.clone(),
        metadata: Some(metadata(harness, admission)),
    }
}

/// Poll `condition` until it holds, failing the test after ten seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(std::time::Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}
