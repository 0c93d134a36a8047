//! Prize award claims
//!
//! An award is created pending at settlement time and claimed at most once.
//! The claim transition is a single transaction re-reading the row, so two
//! racing claims resolve to one success and one `AlreadyClaimed`.

use crate::errors::{ConflictError, CoreResult, NotFoundError};
use crate::ledger::Ledger;
use crate::store;
use crate::types::{AwardStatus, PrizeAward};
use chrono::Utc;
use std::sync::Arc;

const SCAN_LIMIT: usize = 10_000;

pub struct PrizeClaimWorkflow {
    ledger: Arc<dyn Ledger>,
}

impl PrizeClaimWorkflow {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Claim a pending award, attaching the delivery details. A foreign
    /// award reads as not found; a second claim is a conflict.
    pub fn claim_prize(
        &self,
        user_id: &str,
        award_id: &str,
        delivery_info: Option<serde_json::Value>,
    ) -> CoreResult<PrizeAward> {
        let user_id = user_id.to_string();
        let award_id = award_id.to_string();
        let mut claimed: Option<PrizeAward> = None;

        self.ledger.transact(&mut |txn| {
            claimed = None;

            let key = store::award_key(&award_id);
            let mut award: PrizeAward = store::txn_get_json(txn, &key)?
                .ok_or_else(|| NotFoundError::Award(award_id.clone()))?;
            if award.user_id != user_id {
                return Err(NotFoundError::Award(award_id.clone()).into());
            }
            if award.status == AwardStatus::Claimed {
                return Err(ConflictError::AlreadyClaimed.into());
            }

            award.status = AwardStatus::Claimed;
            award.claimed_at = Some(Utc::now());
            award.delivery_info = delivery_info.clone();
            store::txn_put_json(txn, &key, &award)?;
            claimed = Some(award);
            Ok(())
        })?;

        let award = claimed.ok_or_else(|| {
            crate::errors::StorageError::WriteFailed("claim produced no award".to_string())
        })?;
        tracing::info!(award = %award_id, user = %user_id, "prize claimed");
        Ok(award)
    }

    pub fn get_award(&self, user_id: &str, award_id: &str) -> CoreResult<PrizeAward> {
        let award: PrizeAward =
            store::get_json(self.ledger.as_ref(), &store::award_key(award_id))?
                .ok_or_else(|| NotFoundError::Award(award_id.to_string()))?;
        if award.user_id != user_id {
            return Err(NotFoundError::Award(award_id.to_string()).into());
        }
        Ok(award)
    }

    /// Newest-first awards of one user.
    pub fn awards_of(&self, user_id: &str) -> CoreResult<Vec<PrizeAward>> {
        let mut awards = Vec::new();
        for (_, id) in self
            .ledger
            .scan_prefix(&store::user_awards_prefix(user_id), SCAN_LIMIT)?
        {
            if let Some(award) =
                store::get_indexed::<PrizeAward>(self.ledger.as_ref(), &id, store::award_key)?
            {
                awards.push(award);
            }
        }
        Ok(awards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CoreError;
    use crate::ledger::MemoryLedger;

    fn seed_award(ledger: &MemoryLedger, id: &str, user_id: &str) -> PrizeAward {
        let award = PrizeAward {
            id: id.to_string(),
            prize_id: "pz1".to_string(),
            user_id: user_id.to_string(),
            purchase_id: "p1".to_string(),
            status: AwardStatus::Pending,
            delivery_info: None,
            claimed_at: None,
            created_at: Utc::now(),
        };
        store::put_json(ledger, &store::award_key(id), &award).unwrap();
        ledger
            .put(
                &store::user_awards_index_key(user_id, award.created_at, id),
                id.as_bytes(),
            )
            .unwrap();
        award
    }

    #[test]
    fn test_claim_transitions_once() {
        let ledger = Arc::new(MemoryLedger::new());
        seed_award(&ledger, "a1", "u1");
        let workflow = PrizeClaimWorkflow::new(ledger);

        let info = serde_json::json!({"pix_key": "u1@bank"});
        let claimed = workflow.claim_prize("u1", "a1", Some(info.clone())).unwrap();
        assert_eq!(claimed.status, AwardStatus::Claimed);
        assert!(claimed.claimed_at.is_some());
        assert_eq!(claimed.delivery_info, Some(info));

        match workflow.claim_prize("u1", "a1", None) {
            Err(CoreError::Conflict(ConflictError::AlreadyClaimed)) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_foreign_award_reads_as_not_found() {
        let ledger = Arc::new(MemoryLedger::new());
        seed_award(&ledger, "a1", "u1");
        let workflow = PrizeClaimWorkflow::new(ledger);
        assert!(matches!(
            workflow.claim_prize("u2", "a1", None),
            Err(CoreError::NotFound(NotFoundError::Award(_)))
        ));
        assert!(matches!(
            workflow.get_award("u2", "a1"),
            Err(CoreError::NotFound(NotFoundError::Award(_)))
        ));
    }

    #[test]
    fn test_unknown_award_not_found() {
        let workflow = PrizeClaimWorkflow::new(Arc::new(MemoryLedger::new()));
        assert!(matches!(
            workflow.claim_prize("u1", "missing", None),
            Err(CoreError::NotFound(NotFoundError::Award(_)))
        ));
    }

    #[test]
    fn test_awards_listing() {
        let ledger = Arc::new(MemoryLedger::new());
        seed_award(&ledger, "a1", "u1");
        seed_award(&ledger, "a2", "u1");
        seed_award(&ledger, "a3", "u2");
        let workflow = PrizeClaimWorkflow::new(ledger);
        assert_eq!(workflow.awards_of("u1").unwrap().len(), 2);
        assert_eq!(workflow.awards_of("u2").unwrap().len(), 1);
    }
}
