//! Invariants under concurrent requests
//!
//! Every scenario here hammers one contended row from many tasks and then
//! asserts the ledger-side invariant: credits never oversold, prize stock
//! never negative, awards claimed once, unique emails unique.

use chrono::{Duration, Utc};
use raspa::accounts::{AccountService, NewUser};
use raspa::catalog::CatalogService;
use raspa::engine::{Outcome, ScriptedEngine};
use raspa::errors::{ConflictError, CoreError};
use raspa::ledger::{Ledger, MemoryLedger};
use raspa::payments::{LocalReferenceProvider, PaymentService};
use raspa::plays::{PlayCreditTracker, PlayVerdict};
use raspa::prizes::PrizeClaimWorkflow;
use raspa::purchases::PurchaseLedger;
use raspa::types::{CatalogEntry, Prize, PrizeKind, Purchase};
use std::sync::Arc;
use std::time::Duration as StdDuration;

fn services(
    ledger: Arc<dyn Ledger>,
) -> (AccountService, CatalogService, PurchaseLedger) {
    let payments = Arc::new(PaymentService::new(
        ledger.clone(),
        Arc::new(LocalReferenceProvider),
        StdDuration::from_millis(500),
    ));
    (
        AccountService::new(ledger.clone()),
        CatalogService::new(ledger.clone()),
        PurchaseLedger::new(ledger, payments, Duration::minutes(60)),
    )
}

fn seed_card(catalog: &CatalogService, card_id: &str) {
    catalog
        .upsert_card(&CatalogEntry {
            id: card_id.to_string(),
            title: format!("Card {card_id}"),
            category: None,
            price_cents: 500,
            is_active: true,
            created_at: Utc::now(),
        })
        .unwrap();
}

async fn paid_purchase(
    catalog: &CatalogService,
    purchases: &PurchaseLedger,
    quantity: u32,
) -> Purchase {
    seed_card(catalog, "c1");
    let purchase = purchases.create_purchase("u1", "c1", quantity).await.unwrap();
    purchases.confirm_payment(&purchase.id, "EXT-1").unwrap();
    purchases.get_purchase(&purchase.id).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_five_concurrent_plays_on_three_credits() {
    let ledger: Arc<dyn Ledger> = Arc::new(MemoryLedger::new());
    let (_, catalog, purchases) = services(ledger.clone());
    let purchase = paid_purchase(&catalog, &purchases, 3).await;

    let tracker = Arc::new(PlayCreditTracker::new(
        ledger,
        Arc::new(ScriptedEngine::always_lose()),
        StdDuration::from_millis(500),
    ));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let tracker = tracker.clone();
        let purchase_id = purchase.id.clone();
        handles.push(tokio::spawn(async move {
            tracker.play("u1", &purchase_id).await
        }));
    }

    let mut won_credit = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => won_credit += 1,
            Err(CoreError::Conflict(ConflictError::AllCreditsConsumed)) => refused += 1,
            Err(other) => panic!("unexpected: {other:?}"),
        }
    }
    assert_eq!(won_credit, 3);
    assert_eq!(refused, 2);

    let reloaded = purchases.get_purchase(&purchase.id).unwrap();
    assert_eq!(reloaded.consumed, 3);
    assert!(reloaded.reservations.is_empty());

    // Exactly three immutable play rows, sequenced 1..=3.
    let plays = tracker.plays_of_purchase(&purchase.id).unwrap();
    let mut seqs: Vec<u32> = plays.iter().map(|p| p.seq).collect();
    seqs.sort_unstable();
    assert_eq!(seqs, vec![1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scarce_prize_awarded_once() {
    let ledger: Arc<dyn Ledger> = Arc::new(MemoryLedger::new());
    let (_, catalog, purchases) = services(ledger.clone());
    let purchase = paid_purchase(&catalog, &purchases, 5).await;
    catalog
        .upsert_prize(&Prize {
            id: "rare".to_string(),
            card_id: "c1".to_string(),
            name: "Rare".to_string(),
            value_cents: 100_000,
            kind: PrizeKind::Item,
            total_quantity: 1,
            remaining_quantity: 1,
            probability_bp: 10_000,
        })
        .unwrap();

    // Every play is proposed as a win on the single remaining prize.
    let script: Vec<_> = (0..5).map(|_| Ok(Outcome::win("rare"))).collect();
    let tracker = Arc::new(PlayCreditTracker::new(
        ledger.clone(),
        Arc::new(ScriptedEngine::new(script)),
        StdDuration::from_millis(500),
    ));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let tracker = tracker.clone();
        let purchase_id = purchase.id.clone();
        handles.push(tokio::spawn(async move {
            tracker.play("u1", &purchase_id).await
        }));
    }

    let mut wins = 0;
    let mut exhausted = 0;
    for handle in handles {
        let (_, verdict) = handle.await.unwrap().unwrap();
        match verdict {
            PlayVerdict::Won { .. } => wins += 1,
            PlayVerdict::PrizeExhausted => exhausted += 1,
            PlayVerdict::Lost => panic!("script never loses"),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(exhausted, 4);

    // Stock hit zero and stayed there; exactly one award was minted.
    assert_eq!(catalog.get_prize("rare").unwrap().remaining_quantity, 0);
    let awards = PrizeClaimWorkflow::new(ledger).awards_of("u1").unwrap();
    assert_eq!(awards.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_resolve_to_one() {
    let ledger: Arc<dyn Ledger> = Arc::new(MemoryLedger::new());
    let (_, catalog, purchases) = services(ledger.clone());
    let purchase = paid_purchase(&catalog, &purchases, 1).await;
    catalog
        .upsert_prize(&Prize {
            id: "pz1".to_string(),
            card_id: "c1".to_string(),
            name: "Prize".to_string(),
            value_cents: 10_000,
            kind: PrizeKind::Cash,
            total_quantity: 1,
            remaining_quantity: 1,
            probability_bp: 10_000,
        })
        .unwrap();

    let tracker = PlayCreditTracker::new(
        ledger.clone(),
        Arc::new(ScriptedEngine::new(vec![Ok(Outcome::win("pz1"))])),
        StdDuration::from_millis(500),
    );
    let (_, verdict) = tracker.play("u1", &purchase.id).await.unwrap();
    let PlayVerdict::Won { award, .. } = verdict else {
        panic!("expected a win");
    };

    let workflow = Arc::new(PrizeClaimWorkflow::new(ledger));
    let mut handles = Vec::new();
    for _ in 0..4 {
        let workflow = workflow.clone();
        let award_id = award.id.clone();
        handles.push(tokio::spawn(async move {
            workflow.claim_prize("u1", &award_id, None)
        }));
    }

    let mut claimed = 0;
    let mut conflicted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => claimed += 1,
            Err(CoreError::Conflict(ConflictError::AlreadyClaimed)) => conflicted += 1,
            Err(other) => panic!("unexpected: {other:?}"),
        }
    }
    assert_eq!(claimed, 1);
    assert_eq!(conflicted, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registrations_share_no_email() {
    let ledger: Arc<dyn Ledger> = Arc::new(MemoryLedger::new());
    let accounts = Arc::new(AccountService::new(ledger));

    let mut handles = Vec::new();
    for i in 0..4 {
        let accounts = accounts.clone();
        handles.push(tokio::spawn(async move {
            accounts.register_user(NewUser {
                email: "same@addr.com".to_string(),
                username: format!("player{i}"),
                phone: None,
                document: None,
                password: "hunter2hunter2".to_string(),
            })
        }));
    }

    let mut registered = 0;
    let mut taken = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => registered += 1,
            Err(CoreError::Conflict(ConflictError::EmailTaken(_))) => taken += 1,
            Err(other) => panic!("unexpected: {other:?}"),
        }
    }
    assert_eq!(registered, 1);
    assert_eq!(taken, 3);
}
