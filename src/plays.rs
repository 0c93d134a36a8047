//! Play credit consumption and settlement
//!
//! A play consumes exactly one credit of a paid purchase, in three steps:
//!
//! 1. reserve: one transaction checks that consumed plus held credits stay
//!    under `quantity` and records a hold with its own id and deadline;
//! 2. decide: the outcome engine runs outside any transaction, bounded by a
//!    timeout;
//! 3. settle or release: a second transaction consumes the credit, appends
//!    the immutable play row, decrements prize stock and writes the award,
//!    or, when the engine failed, just gives the credit back.
//!
//! A crash between reserve and settle strands the hold; the next reserve on
//! that purchase reclaims it once the deadline passes. Settlement consumes
//! only the hold it took: a request that stalls past its deadline and comes
//! back after reclamation finds its hold gone and is refused, so a reclaimed
//! credit is never played twice. Prize stock is only decremented inside the
//! settlement transaction, so a win proposed for an exhausted prize settles
//! as a non-winning play.

use crate::engine::{self, GameOutcomeEngine, OutcomeRequest};
use crate::errors::{ConflictError, CoreResult, NotFoundError};
use crate::ledger::Ledger;
use crate::store;
use crate::types::{CreditReservation, PaymentStatus, PlayRecord, Prize, PrizeAward, Purchase, User};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

const SCAN_LIMIT: usize = 10_000;

/// Final verdict of a settled play.
#[derive(Clone, Debug)]
pub enum PlayVerdict {
    Lost,
    Won { prize: Prize, award: PrizeAward },
    /// The engine proposed a win but the prize ran out before settlement.
    PrizeExhausted,
}

impl PlayVerdict {
    pub fn is_winner(&self) -> bool {
        matches!(self, PlayVerdict::Won { .. })
    }
}

pub struct PlayCreditTracker {
    ledger: Arc<dyn Ledger>,
    engine: Arc<dyn GameOutcomeEngine>,
    engine_timeout: std::time::Duration,
    /// Reservations older than this are presumed crashed and reclaimable.
    reservation_ttl: Duration,
}

impl PlayCreditTracker {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        engine: Arc<dyn GameOutcomeEngine>,
        engine_timeout: std::time::Duration,
    ) -> Self {
        // Twice the engine bound: a reservation can only be stale if its
        // engine call has long since timed out.
        let reservation_ttl = Duration::milliseconds(engine_timeout.as_millis() as i64 * 2);
        Self {
            ledger,
            engine,
            engine_timeout,
            reservation_ttl,
        }
    }

    /// Consume one credit of `purchase_id` and settle its outcome.
    pub async fn play(
        &self,
        user_id: &str,
        purchase_id: &str,
    ) -> CoreResult<(PlayRecord, PlayVerdict)> {
        let (card_id, reservation_id) = self.reserve(user_id, purchase_id, Utc::now())?;

        // Advisory snapshot for the engine; stock is re-checked at settle.
        let prizes = self.prizes_of_card(&card_id)?;
        let request = OutcomeRequest {
            user_id: user_id.to_string(),
            purchase_id: purchase_id.to_string(),
            card_id: card_id.clone(),
            prizes,
        };
        let outcome =
            match engine::bounded_outcome(self.engine.as_ref(), self.engine_timeout, &request).await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.release(purchase_id, &reservation_id)?;
                    return Err(e);
                }
            };

        self.settle(
            user_id,
            purchase_id,
            &card_id,
            &reservation_id,
            outcome,
            Utc::now(),
        )
    }

    /// Hold one credit under a fresh reservation id. Fails without side
    /// effects when the purchase is unpaid or no credit is available.
    fn reserve(
        &self,
        user_id: &str,
        purchase_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<(String, String)> {
        let user_id = user_id.to_string();
        let purchase_id = purchase_id.to_string();
        let reservation_id = Uuid::new_v4().to_string();
        let mut card_id = String::new();
        self.ledger.transact(&mut |txn| {
            let key = store::purchase_key(&purchase_id);
            let mut purchase: Purchase = store::txn_get_json(txn, &key)?
                .ok_or_else(|| NotFoundError::Purchase(purchase_id.clone()))?;
            if purchase.user_id != user_id {
                return Err(NotFoundError::Purchase(purchase_id.clone()).into());
            }
            if purchase.payment_status != PaymentStatus::Paid {
                return Err(ConflictError::PurchaseNotPaid.into());
            }

            // Reclaim holds stranded by a crash mid-play.
            let before = purchase.reservations.len();
            purchase.reservations.retain(|r| now < r.expires_at);
            if purchase.reservations.len() < before {
                tracing::warn!(
                    purchase = %purchase_id,
                    stale = before - purchase.reservations.len(),
                    "reclaiming stale play reservations"
                );
            }

            if purchase.available_credits() == 0 {
                return Err(ConflictError::AllCreditsConsumed.into());
            }
            purchase.reservations.push(CreditReservation {
                id: reservation_id.clone(),
                expires_at: now + self.reservation_ttl,
            });
            card_id = purchase.card_id.clone();
            store::txn_put_json(txn, &key, &purchase)
        })?;
        Ok((card_id, reservation_id))
    }

    /// Give a held credit back after an engine failure. A hold already
    /// reclaimed by another request is left alone.
    fn release(&self, purchase_id: &str, reservation_id: &str) -> CoreResult<()> {
        let purchase_id = purchase_id.to_string();
        let reservation_id = reservation_id.to_string();
        self.ledger.transact(&mut |txn| {
            let key = store::purchase_key(&purchase_id);
            let Some(mut purchase) = store::txn_get_json::<Purchase>(txn, &key)? else {
                return Ok(());
            };
            let before = purchase.reservations.len();
            purchase.reservations.retain(|r| r.id != reservation_id);
            if purchase.reservations.len() == before {
                return Ok(());
            }
            store::txn_put_json(txn, &key, &purchase)
        })?;
        tracing::debug!(purchase = %purchase_id, "play reservation released");
        Ok(())
    }

    /// Consume the held credit and record the verdict, all in one
    /// transaction: play row, prize stock, award and user counters move
    /// together or not at all. Refused when this request's hold is gone,
    /// meaning it stalled past its deadline and the credit was reclaimed.
    fn settle(
        &self,
        user_id: &str,
        purchase_id: &str,
        card_id: &str,
        reservation_id: &str,
        outcome: engine::Outcome,
        now: DateTime<Utc>,
    ) -> CoreResult<(PlayRecord, PlayVerdict)> {
        let user_id = user_id.to_string();
        let purchase_id = purchase_id.to_string();
        let card_id = card_id.to_string();
        let reservation_id = reservation_id.to_string();
        let award_id = Uuid::new_v4().to_string();
        let mut settled: Option<(PlayRecord, PlayVerdict)> = None;

        self.ledger.transact(&mut |txn| {
            settled = None;

            let purchase_key = store::purchase_key(&purchase_id);
            let mut purchase: Purchase = store::txn_get_json(txn, &purchase_key)?
                .ok_or_else(|| NotFoundError::Purchase(purchase_id.clone()))?;
            let Some(pos) = purchase
                .reservations
                .iter()
                .position(|r| r.id == reservation_id)
            else {
                return Err(ConflictError::AllCreditsConsumed.into());
            };
            purchase.reservations.remove(pos);
            purchase.consumed += 1;
            let seq = purchase.consumed;
            store::txn_put_json(txn, &purchase_key, &purchase)?;

            // Re-check prize stock under the transaction. The engine's
            // proposal is advisory; stock going to zero first turns the win
            // into an exhausted verdict.
            let mut verdict = PlayVerdict::Lost;
            if outcome.is_winner {
                if let Some(prize_id) = &outcome.prize_id {
                    let prize_key = store::prize_key(prize_id);
                    let prize: Option<Prize> = store::txn_get_json(txn, &prize_key)?;
                    match prize {
                        Some(mut prize) if prize.card_id == card_id => {
                            if prize.remaining_quantity == 0 {
                                verdict = PlayVerdict::PrizeExhausted;
                            } else {
                                prize.remaining_quantity -= 1;
                                store::txn_put_json(txn, &prize_key, &prize)?;

                                let award = PrizeAward {
                                    id: award_id.clone(),
                                    prize_id: prize.id.clone(),
                                    user_id: user_id.clone(),
                                    purchase_id: purchase_id.clone(),
                                    status: crate::types::AwardStatus::Pending,
                                    delivery_info: None,
                                    claimed_at: None,
                                    created_at: now,
                                };
                                store::txn_put_json(txn, &store::award_key(&award.id), &award)?;
                                txn.put(
                                    &store::user_awards_index_key(&user_id, now, &award.id),
                                    award.id.as_bytes(),
                                )?;
                                verdict = PlayVerdict::Won { prize, award };
                            }
                        }
                        // Unknown or foreign prize id settles as a loss.
                        _ => verdict = PlayVerdict::Lost,
                    }
                }
            }

            let record = PlayRecord {
                purchase_id: purchase_id.clone(),
                seq,
                user_id: user_id.clone(),
                card_id: card_id.clone(),
                played_at: now,
                is_winner: verdict.is_winner(),
                prize_id: match &verdict {
                    PlayVerdict::Won { prize, .. } => Some(prize.id.clone()),
                    _ => None,
                },
            };
            store::txn_put_json(txn, &store::play_key(&purchase_id, seq), &record)?;
            // Plays are immutable, so the history index carries the full row.
            store::txn_put_json(
                txn,
                &store::user_plays_index_key(&user_id, now, &purchase_id, seq),
                &record,
            )?;

            let user_key = store::user_key(&user_id);
            if let Some(mut user) = store::txn_get_json::<User>(txn, &user_key)? {
                user.games_played += 1;
                if record.is_winner {
                    user.games_won += 1;
                }
                store::txn_put_json(txn, &user_key, &user)?;
            }

            settled = Some((record, verdict));
            Ok(())
        })?;

        let (record, verdict) = settled.ok_or_else(|| {
            crate::errors::StorageError::WriteFailed("settlement produced no record".to_string())
        })?;
        tracing::info!(
            purchase = %purchase_id,
            seq = record.seq,
            winner = record.is_winner,
            "play settled"
        );
        Ok((record, verdict))
    }

    fn prizes_of_card(&self, card_id: &str) -> CoreResult<Vec<Prize>> {
        let mut prizes = Vec::new();
        for (_, id) in self
            .ledger
            .scan_prefix(&store::card_prizes_prefix(card_id), SCAN_LIMIT)?
        {
            if let Some(prize) =
                store::get_indexed::<Prize>(self.ledger.as_ref(), &id, store::prize_key)?
            {
                prizes.push(prize);
            }
        }
        Ok(prizes)
    }

    /// Plays of one purchase, in sequence order.
    pub fn plays_of_purchase(&self, purchase_id: &str) -> CoreResult<Vec<PlayRecord>> {
        let mut plays = Vec::new();
        for (key, bytes) in self
            .ledger
            .scan_prefix(&store::plays_prefix(purchase_id), SCAN_LIMIT)?
        {
            let record: PlayRecord = serde_json::from_slice(&bytes).map_err(|e| {
                crate::errors::StorageError::CorruptedData(format!(
                    "play row {}: {e}",
                    String::from_utf8_lossy(&key)
                ))
            })?;
            plays.push(record);
        }
        Ok(plays)
    }

    /// Newest-first play history across all of a user's purchases.
    pub fn plays_of_user(&self, user_id: &str) -> CoreResult<Vec<PlayRecord>> {
        let mut plays = Vec::new();
        for (key, bytes) in self
            .ledger
            .scan_prefix(&store::user_plays_prefix(user_id), SCAN_LIMIT)?
        {
            let record: PlayRecord = serde_json::from_slice(&bytes).map_err(|e| {
                crate::errors::StorageError::CorruptedData(format!(
                    "play index row {}: {e}",
                    String::from_utf8_lossy(&key)
                ))
            })?;
            plays.push(record);
        }
        Ok(plays)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::{card, prize};
    use crate::catalog::CatalogService;
    use crate::engine::{Outcome, ScriptedEngine};
    use crate::errors::{CoreError, DependencyError};
    use crate::ledger::MemoryLedger;
    use crate::payments::{LocalReferenceProvider, PaymentService};
    use crate::purchases::PurchaseLedger;
    use crate::types::AwardStatus;
    use std::time::Duration as StdDuration;

    struct Fixture {
        ledger: Arc<MemoryLedger>,
        purchases: PurchaseLedger,
        catalog: CatalogService,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(MemoryLedger::new());
        let payments = Arc::new(PaymentService::new(
            ledger.clone(),
            Arc::new(LocalReferenceProvider),
            StdDuration::from_millis(500),
        ));
        let purchases = PurchaseLedger::new(ledger.clone(), payments, Duration::minutes(60));
        let catalog = CatalogService::new(ledger.clone());
        Fixture {
            ledger,
            purchases,
            catalog,
        }
    }

    fn tracker(ledger: Arc<MemoryLedger>, engine: ScriptedEngine) -> PlayCreditTracker {
        PlayCreditTracker::new(ledger, Arc::new(engine), StdDuration::from_millis(500))
    }

    async fn paid_purchase(fx: &Fixture, quantity: u32) -> Purchase {
        fx.catalog.upsert_card(&card("c1", true)).unwrap();
        let purchase = fx
            .purchases
            .create_purchase("u1", "c1", quantity)
            .await
            .unwrap();
        fx.purchases.confirm_payment(&purchase.id, "EXT-1").unwrap();
        fx.purchases.get_purchase(&purchase.id).unwrap()
    }

    #[tokio::test]
    async fn test_losing_play_consumes_one_credit() {
        let fx = fixture();
        let purchase = paid_purchase(&fx, 3).await;
        let tracker = tracker(fx.ledger.clone(), ScriptedEngine::always_lose());

        let (record, verdict) = tracker.play("u1", &purchase.id).await.unwrap();
        assert_eq!(record.seq, 1);
        assert!(!record.is_winner);
        assert!(matches!(verdict, PlayVerdict::Lost));

        let reloaded = fx.purchases.get_purchase(&purchase.id).unwrap();
        assert_eq!(reloaded.consumed, 1);
        assert!(reloaded.reservations.is_empty());
    }

    #[tokio::test]
    async fn test_fourth_play_on_three_credits_conflicts() {
        let fx = fixture();
        let purchase = paid_purchase(&fx, 3).await;
        let tracker = tracker(fx.ledger.clone(), ScriptedEngine::always_lose());

        for _ in 0..3 {
            tracker.play("u1", &purchase.id).await.unwrap();
        }
        match tracker.play("u1", &purchase.id).await {
            Err(CoreError::Conflict(ConflictError::AllCreditsConsumed)) => {}
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(tracker.plays_of_purchase(&purchase.id).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unpaid_purchase_refused_without_record() {
        let fx = fixture();
        fx.catalog.upsert_card(&card("c1", true)).unwrap();
        let purchase = fx.purchases.create_purchase("u1", "c1", 3).await.unwrap();
        let tracker = tracker(fx.ledger.clone(), ScriptedEngine::always_lose());

        match tracker.play("u1", &purchase.id).await {
            Err(CoreError::Conflict(ConflictError::PurchaseNotPaid)) => {}
            other => panic!("unexpected: {other:?}"),
        }
        assert!(tracker.plays_of_purchase(&purchase.id).unwrap().is_empty());
        assert_eq!(fx.purchases.get_purchase(&purchase.id).unwrap().consumed, 0);
    }

    #[tokio::test]
    async fn test_winning_play_decrements_stock_and_awards() {
        let fx = fixture();
        let purchase = paid_purchase(&fx, 1).await;
        fx.catalog.upsert_prize(&prize("pz1", "c1", 2)).unwrap();
        let tracker = tracker(
            fx.ledger.clone(),
            ScriptedEngine::new(vec![Ok(Outcome::win("pz1"))]),
        );

        let (record, verdict) = tracker.play("u1", &purchase.id).await.unwrap();
        assert!(record.is_winner);
        let PlayVerdict::Won { prize, award } = verdict else {
            panic!("expected win");
        };
        assert_eq!(prize.remaining_quantity, 1);
        assert_eq!(award.status, AwardStatus::Pending);
        assert_eq!(award.purchase_id, purchase.id);

        let catalog = CatalogService::new(fx.ledger.clone());
        assert_eq!(catalog.get_prize("pz1").unwrap().remaining_quantity, 1);
    }

    #[tokio::test]
    async fn test_exhausted_prize_settles_as_non_win() {
        let fx = fixture();
        let purchase = paid_purchase(&fx, 1).await;
        fx.catalog.upsert_prize(&prize("pz1", "c1", 0)).unwrap();
        let tracker = tracker(
            fx.ledger.clone(),
            ScriptedEngine::new(vec![Ok(Outcome::win("pz1"))]),
        );

        let (record, verdict) = tracker.play("u1", &purchase.id).await.unwrap();
        assert!(!record.is_winner);
        assert!(matches!(verdict, PlayVerdict::PrizeExhausted));
        // The credit is still consumed.
        assert_eq!(fx.purchases.get_purchase(&purchase.id).unwrap().consumed, 1);
    }

    #[tokio::test]
    async fn test_engine_failure_returns_credit() {
        let fx = fixture();
        let purchase = paid_purchase(&fx, 1).await;
        let tracker = tracker(
            fx.ledger.clone(),
            ScriptedEngine::new(vec![
                Err(DependencyError::EngineUnavailable("down".to_string())),
            ]),
        );

        assert!(tracker.play("u1", &purchase.id).await.is_err());
        let reloaded = fx.purchases.get_purchase(&purchase.id).unwrap();
        assert_eq!(reloaded.consumed, 0);
        assert!(reloaded.reservations.is_empty());
        assert!(tracker.plays_of_purchase(&purchase.id).unwrap().is_empty());

        // The credit is usable again.
        let (record, _) = tracker.play("u1", &purchase.id).await.unwrap();
        assert_eq!(record.seq, 1);
    }

    #[tokio::test]
    async fn test_stale_reservation_reclaimed() {
        let fx = fixture();
        let purchase = paid_purchase(&fx, 1).await;

        // Simulate a crash mid-play: a hold whose deadline passed.
        let key = store::purchase_key(&purchase.id);
        let mut stranded: Purchase = store::get_json(fx.ledger.as_ref(), &key).unwrap().unwrap();
        stranded.reservations = vec![CreditReservation {
            id: "crashed".to_string(),
            expires_at: Utc::now() - Duration::minutes(5),
        }];
        store::put_json(fx.ledger.as_ref(), &key, &stranded).unwrap();

        let tracker = tracker(fx.ledger.clone(), ScriptedEngine::always_lose());
        let (record, _) = tracker.play("u1", &purchase.id).await.unwrap();
        assert_eq!(record.seq, 1);
    }

    #[tokio::test]
    async fn test_stalled_settle_cannot_overconsume() {
        let fx = fixture();
        let purchase = paid_purchase(&fx, 1).await;
        let tracker = tracker(fx.ledger.clone(), ScriptedEngine::always_lose());

        // First request holds the only credit, backdated so the hold is
        // already past its deadline by the time anyone looks.
        let (card_id, reservation_id) = tracker
            .reserve("u1", &purchase.id, Utc::now() - Duration::minutes(5))
            .unwrap();

        // A second request reclaims the expired hold and plays the credit.
        let (record, _) = tracker.play("u1", &purchase.id).await.unwrap();
        assert_eq!(record.seq, 1);

        // The first request comes back and tries to settle: its hold is
        // gone, so it is refused instead of consuming a second credit.
        match tracker.settle(
            "u1",
            &purchase.id,
            &card_id,
            &reservation_id,
            Outcome::lose(),
            Utc::now(),
        ) {
            Err(CoreError::Conflict(ConflictError::AllCreditsConsumed)) => {}
            other => panic!("unexpected: {other:?}"),
        }
        let reloaded = fx.purchases.get_purchase(&purchase.id).unwrap();
        assert_eq!(reloaded.consumed, 1);
        assert_eq!(tracker.plays_of_purchase(&purchase.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_in_flight_reservation_blocks_last_credit() {
        let fx = fixture();
        let purchase = paid_purchase(&fx, 1).await;

        // A live hold (deadline in the future) keeps the only credit.
        let key = store::purchase_key(&purchase.id);
        let mut held: Purchase = store::get_json(fx.ledger.as_ref(), &key).unwrap().unwrap();
        held.reservations = vec![CreditReservation {
            id: "in-flight".to_string(),
            expires_at: Utc::now() + Duration::minutes(5),
        }];
        store::put_json(fx.ledger.as_ref(), &key, &held).unwrap();

        let tracker = tracker(fx.ledger.clone(), ScriptedEngine::always_lose());
        match tracker.play("u1", &purchase.id).await {
            Err(CoreError::Conflict(ConflictError::AllCreditsConsumed)) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_foreign_purchase_reads_as_not_found() {
        let fx = fixture();
        let purchase = paid_purchase(&fx, 1).await;
        let tracker = tracker(fx.ledger.clone(), ScriptedEngine::always_lose());
        assert!(matches!(
            tracker.play("someone-else", &purchase.id).await,
            Err(CoreError::NotFound(NotFoundError::Purchase(_)))
        ));
    }

    #[tokio::test]
    async fn test_user_history_newest_first() {
        let fx = fixture();
        let purchase = paid_purchase(&fx, 2).await;
        let tracker = tracker(fx.ledger.clone(), ScriptedEngine::always_lose());
        tracker.play("u1", &purchase.id).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        tracker.play("u1", &purchase.id).await.unwrap();

        let history = tracker.plays_of_user("u1").unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].played_at >= history[1].played_at);
    }
}
