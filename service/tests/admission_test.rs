//! Admission, capacity and waitlist behaviour of `RegistrationService`.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

mod common;

use common::{harness, user};
use futures::future::join_all;
use proptest::prelude::*;
use registration_core::{
    Caller, EventId, EventInfo, OptionId, PaymentStatus, RegistrationError, RegistrationOption,
    RegistrationStatus, TenantId, UserId,
};
use registration_testing::event_start;

// ============================================================================
// Free options
// ============================================================================

#[tokio::test]
async fn test_free_registration_is_confirmed_without_payment() {
    let h = harness().await;
    let option = h.fixture.free_option(10).await;
    let caller = user();

    let admission = h
        .service
        .register_for_event(&caller, &h.fixture.tenant, option.id)
        .await
        .unwrap();

    assert_eq!(admission.status, RegistrationStatus::Confirmed);
    assert!(admission.checkout.is_none());

    let registration = h.fixture.store.registration(admission.registration_id).await.unwrap();
    assert_eq!(registration.payment_status, None);
    assert_eq!(registration.user_id, caller.user_id);

    let option = h.fixture.store.option(option.id).await.unwrap();
    assert_eq!((option.confirmed_spots, option.reserved_spots), (1, 0));

    assert!(h.fixture.store.transactions_of(admission.registration_id).await.is_empty());
    assert!(h.provider.checkout_requests().is_empty());
}

#[tokio::test]
async fn test_full_option_rejects_new_claims() {
    let h = harness().await;
    let option = h.fixture.free_option(1).await;

    h.service
        .register_for_event(&user(), &h.fixture.tenant, option.id)
        .await
        .unwrap();
    let second = h
        .service
        .register_for_event(&user(), &h.fixture.tenant, option.id)
        .await;

    assert!(matches!(
        second,
        Err(RegistrationError::CapacityExhausted { option_id }) if option_id == option.id
    ));
    assert_eq!(h.fixture.store.registrations_on(option.id).await.len(), 1);
}

#[tokio::test]
async fn test_zero_spot_option_admits_nobody() {
    let h = harness().await;
    let option = h.fixture.free_option(0).await;

    let result = h
        .service
        .register_for_event(&user(), &h.fixture.tenant, option.id)
        .await;

    assert!(matches!(result, Err(RegistrationError::CapacityExhausted { .. })));
}

#[tokio::test]
async fn test_second_registration_for_same_event_is_rejected() {
    let h = harness().await;
    let first = h.fixture.free_option(10).await;
    let second = h.fixture.paid_option(10, 1000).await;
    let caller = user();

    h.service
        .register_for_event(&caller, &h.fixture.tenant, first.id)
        .await
        .unwrap();
    let result = h
        .service
        .register_for_event(&caller, &h.fixture.tenant, second.id)
        .await;

    assert!(matches!(
        result,
        Err(RegistrationError::AlreadyRegistered { event_id }) if event_id == h.fixture.event.id
    ));
    let second = h.fixture.store.option(second.id).await.unwrap();
    assert_eq!(second.reserved_spots, 0);
    assert!(h.provider.checkout_requests().is_empty());
}

#[tokio::test]
async fn test_cancelled_registration_does_not_block_a_new_one() {
    let h = harness().await;
    let option = h.fixture.free_option(1).await;
    let caller = user();

    let first = h
        .service
        .register_for_event(&caller, &h.fixture.tenant, option.id)
        .await
        .unwrap();
    h.service
        .cancel_registration(&caller, &h.fixture.tenant, first.registration_id)
        .await
        .unwrap();

    let again = h
        .service
        .register_for_event(&caller, &h.fixture.tenant, option.id)
        .await
        .unwrap();

    assert_ne!(again.registration_id, first.registration_id);
    assert_eq!(h.fixture.store.registrations_of(caller.user_id).await.len(), 2);
    let option = h.fixture.store.option(option.id).await.unwrap();
    assert_eq!(option.confirmed_spots, 1);
}

#[tokio::test]
async fn test_unknown_option_is_not_found() {
    let h = harness().await;
    let missing = OptionId::new();

    let result = h
        .service
        .register_for_event(&user(), &h.fixture.tenant, missing)
        .await;

    assert!(matches!(result, Err(RegistrationError::OptionNotFound(id)) if id == missing));
}

#[tokio::test]
async fn test_option_of_another_tenant_is_not_found() {
    let h = harness().await;
    let foreign_event = EventInfo {
        id: EventId::new(),
        tenant_id: TenantId::new(),
        title: "Other section".to_string(),
        start: event_start(),
    };
    h.fixture.store.insert_event(foreign_event.clone()).await;
    let foreign_option = RegistrationOption {
        id: OptionId::new(),
        event_id: foreign_event.id,
        title: "Participant".to_string(),
        spots: 10,
        confirmed_spots: 0,
        reserved_spots: 0,
        waitlist_spots: 0,
        is_paid: false,
        price: registration_core::Money::ZERO,
        tax_rate_id: None,
    };
    h.fixture.store.insert_option(foreign_option.clone()).await;

    let result = h
        .service
        .register_for_event(&user(), &h.fixture.tenant, foreign_option.id)
        .await;

    assert!(matches!(result, Err(RegistrationError::OptionNotFound(_))));
    assert!(h.fixture.store.registrations_on(foreign_option.id).await.is_empty());
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_paid_claims_on_last_spot_admit_exactly_one() {
    let h = harness().await;
    let option = h.fixture.paid_option(1, 1000).await;

    let attempts = (0..20).map(|_| {
        let service = h.service.clone();
        let tenant = h.fixture.tenant.clone();
        let option_id = option.id;
        tokio::spawn(async move {
            service
                .register_for_event(&user(), &tenant, option_id)
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let admitted: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(admitted.len(), 1);
    assert_eq!(admitted[0].status, RegistrationStatus::Pending);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, RegistrationError::CapacityExhausted { .. }))
    );

    let option = h.fixture.store.option(option.id).await.unwrap();
    assert_eq!((option.confirmed_spots, option.reserved_spots), (0, 1));
    assert_eq!(h.provider.checkout_requests().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_free_claims_fill_exactly_to_capacity() {
    let h = harness().await;
    let option = h.fixture.free_option(5).await;

    let attempts = (0..20).map(|_| {
        let service = h.service.clone();
        let tenant = h.fixture.tenant.clone();
        let option_id = option.id;
        tokio::spawn(async move {
            service
                .register_for_event(&user(), &tenant, option_id)
                .await
        })
    });
    let admitted = join_all(attempts)
        .await
        .into_iter()
        .filter(|joined| matches!(joined, Ok(Ok(_))))
        .count();

    assert_eq!(admitted, 5);
    let option = h.fixture.store.option(option.id).await.unwrap();
    assert_eq!(option.confirmed_spots, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_user_racing_itself_gets_one_registration() {
    let h = harness().await;
    let option = h.fixture.free_option(10).await;
    let caller = user();

    let attempts = (0..8).map(|_| {
        let service = h.service.clone();
        let tenant = h.fixture.tenant.clone();
        let option_id = option.id;
        tokio::spawn(async move {
            service
                .register_for_event(&caller, &tenant, option_id)
                .await
        })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(Result::unwrap).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, RegistrationError::AlreadyRegistered { .. }))
    );
    assert_eq!(h.fixture.store.registrations_of(caller.user_id).await.len(), 1);
}

// ============================================================================
// Waitlist
// ============================================================================

#[tokio::test]
async fn test_waitlist_holds_no_capacity() {
    let h = harness().await;
    let option = h.fixture.paid_option(1, 1000).await;
    h.service
        .register_for_event(&user(), &h.fixture.tenant, option.id)
        .await
        .unwrap();

    let waiting = user();
    let registration_id = h
        .service
        .join_waitlist(&waiting, &h.fixture.tenant, option.id)
        .await
        .unwrap();

    let registration = h.fixture.store.registration(registration_id).await.unwrap();
    assert_eq!(registration.status, RegistrationStatus::Waitlist);
    assert_eq!(registration.payment_status, None);

    let option = h.fixture.store.option(option.id).await.unwrap();
    assert_eq!(
        (option.confirmed_spots, option.reserved_spots, option.waitlist_spots),
        (0, 1, 1)
    );
}

#[tokio::test]
async fn test_waitlisted_user_cannot_also_register() {
    let h = harness().await;
    let option = h.fixture.free_option(3).await;
    let caller = user();

    h.service
        .join_waitlist(&caller, &h.fixture.tenant, option.id)
        .await
        .unwrap();
    let result = h
        .service
        .register_for_event(&caller, &h.fixture.tenant, option.id)
        .await;

    assert!(matches!(result, Err(RegistrationError::AlreadyRegistered { .. })));
}

#[tokio::test]
async fn test_waitlist_entry_cannot_be_cancelled() {
    let h = harness().await;
    let option = h.fixture.free_option(3).await;
    let caller = user();
    let registration_id = h
        .service
        .join_waitlist(&caller, &h.fixture.tenant, option.id)
        .await
        .unwrap();

    let result = h
        .service
        .cancel_registration(&caller, &h.fixture.tenant, registration_id)
        .await;

    assert!(matches!(
        result,
        Err(RegistrationError::InvalidTransition {
            from: RegistrationStatus::Waitlist,
            to: RegistrationStatus::Cancelled
        })
    ));
}

// ============================================================================
// Capacity invariant under arbitrary request sequences
// ============================================================================

#[derive(Debug, Clone)]
enum Request {
    Register { user: usize, paid: bool },
    Cancel { user: usize },
}

fn arb_request() -> impl Strategy<Value = Request> {
    prop_oneof![
        (0..6usize, any::<bool>()).prop_map(|(user, paid)| Request::Register { user, paid }),
        (0..6usize).prop_map(|user| Request::Cancel { user }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn counters_always_match_active_registrations(
        spots in 0u32..4,
        requests in prop::collection::vec(arb_request(), 1..30),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let h = harness().await;
            let free = h.fixture.free_option(spots).await;
            let paid = h.fixture.paid_option(spots, 1500).await;
            let users: Vec<Caller> = (0..6).map(|_| Caller::user(UserId::new())).collect();

            for request in requests {
                match request {
                    Request::Register { user, paid: is_paid } => {
                        let option_id = if is_paid { paid.id } else { free.id };
                        let _ = h
                            .service
                            .register_for_event(&users[user], &h.fixture.tenant, option_id)
                            .await;
                    }
                    Request::Cancel { user } => {
                        let active = h
                            .fixture
                            .store
                            .registrations_of(users[user].user_id)
                            .await
                            .into_iter()
                            .find(|r| r.status.is_active());
                        if let Some(registration) = active {
                            h.service
                                .cancel_registration(&users[user], &h.fixture.tenant, registration.id)
                                .await
                                .unwrap();
                        }
                    }
                }
            }

            for option_id in [free.id, paid.id] {
                let option = h.fixture.store.option(option_id).await.unwrap();
                let registrations = h.fixture.store.registrations_on(option_id).await;
                let count = |status: RegistrationStatus| {
                    u32::try_from(registrations.iter().filter(|r| r.status == status).count())
                        .unwrap()
                };

                assert!(option.confirmed_spots + option.reserved_spots <= option.spots);
                assert_eq!(option.confirmed_spots, count(RegistrationStatus::Confirmed));
                assert_eq!(option.reserved_spots, count(RegistrationStatus::Pending));
            }

            for registration in h.fixture.store.registrations_on(paid.id).await {
                if registration.status == RegistrationStatus::Pending {
                    assert_eq!(registration.payment_status, Some(PaymentStatus::Pending));
                }
            }
        });
    }
}
