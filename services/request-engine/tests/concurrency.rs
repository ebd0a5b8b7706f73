//! Races the two linearization points: the claim and the ledger debit.

mod support;

use support::Harness;

use request_engine::CreateRequest;
use types::errors::{CoreError, LedgerError, RequestError};
use types::ids::UserId;
use types::request::Actor;

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_claims_have_exactly_one_winner() {
    let h = Harness::new();
    let package = h.package(10, 1, 2).await;
    let service = h.service(3).await;
    let client = h.client_with_subscription(&package).await;
    let request = h.create_medium(client, &service).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = h.engine.clone();
        let provider = Actor::provider(UserId::new());
        let request_id = request.id;
        handles.push(tokio::spawn(
            async move { engine.claim(provider, request_id).await },
        ));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(err) => assert_eq!(
                err,
                CoreError::Request(RequestError::AlreadyClaimed {
                    request_id: request.id,
                })
            ),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_creates_cannot_overspend() {
    let h = Harness::new();
    // 5 credits, each request costs 4: two racing creates, one winner.
    let package = h.package(5, 1, 2).await;
    let service = h.service(3).await;
    let client = h.client_with_subscription(&package).await;

    let mut handles = Vec::new();
    for _ in 0..2 {
        let engine = h.engine.clone();
        let service_id = service.id;
        handles.push(tokio::spawn(async move {
            engine
                .create(
                    client,
                    CreateRequest {
                        service_type_id: service_id,
                        priority_level: 2,
                        attribute_responses: vec![],
                    },
                )
                .await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(err) => assert!(matches!(
                err,
                CoreError::Ledger(LedgerError::InsufficientCredits { .. })
            )),
        }
    }

    assert_eq!(created, 1);
    let remaining = h.remaining_credits(client).await;
    assert_eq!(remaining, 1);
    assert!(remaining >= 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_many_small_debits_respect_the_balance() {
    let h = Harness::new();
    let package = h.package(10, 1, 2).await;
    let client = h.client_with_subscription(&package).await;
    let subscription = h
        .ledger
        .get_active(client.user_id, chrono::Utc::now())
        .await
        .unwrap()
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..30 {
        let ledger = h.ledger.clone();
        let id = subscription.id;
        handles.push(tokio::spawn(async move { ledger.debit(id, 1).await }));
    }

    let mut spent = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            spent += 1;
        }
    }

    assert_eq!(spent, 10);
    assert_eq!(h.remaining_credits(client).await, 0);
}
