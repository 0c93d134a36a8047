//! Game outcome engine seam
//!
//! The engine decides whether a play wins and which prize it targets. It is
//! an external collaborator behind an async trait; every call goes through
//! [`bounded_outcome`] so a hung engine surfaces as a retryable dependency
//! error instead of a stuck request. The engine proposes, the settlement
//! transaction disposes: prize stock is only checked and decremented inside
//! the ledger transaction, so an over-optimistic engine can never oversell.

use crate::errors::{CoreResult, DependencyError};
use crate::types::Prize;
use async_trait::async_trait;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Verdict proposed by the engine for a single play.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub is_winner: bool,
    pub prize_id: Option<String>,
}

impl Outcome {
    pub fn lose() -> Self {
        Self {
            is_winner: false,
            prize_id: None,
        }
    }

    pub fn win(prize_id: &str) -> Self {
        Self {
            is_winner: true,
            prize_id: Some(prize_id.to_string()),
        }
    }
}

/// Context handed to the engine for one play.
#[derive(Clone, Debug)]
pub struct OutcomeRequest {
    pub user_id: String,
    pub purchase_id: String,
    pub card_id: String,
    /// Prize inventory snapshot taken at reservation time.
    pub prizes: Vec<Prize>,
}

#[async_trait]
pub trait GameOutcomeEngine: Send + Sync {
    async fn decide(&self, request: &OutcomeRequest) -> Result<Outcome, DependencyError>;
}

/// Run the engine under a timeout. No ledger mutation happens here; the
/// caller holds a reservation and releases it when this fails.
pub async fn bounded_outcome(
    engine: &dyn GameOutcomeEngine,
    timeout: Duration,
    request: &OutcomeRequest,
) -> CoreResult<Outcome> {
    match tokio::time::timeout(timeout, engine.decide(request)).await {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(DependencyError::EngineUnavailable("outcome call timed out".to_string()).into()),
    }
}

/// Default engine: one roll in basis points against the cumulative win
/// weights of prizes that still have stock.
pub struct WeightedEngine;

#[async_trait]
impl GameOutcomeEngine for WeightedEngine {
    async fn decide(&self, request: &OutcomeRequest) -> Result<Outcome, DependencyError> {
        let roll: u32 = rand::thread_rng().gen_range(0..10_000);
        let mut cumulative = 0u32;
        for prize in request
            .prizes
            .iter()
            .filter(|p| p.remaining_quantity > 0)
        {
            cumulative = cumulative.saturating_add(prize.probability_bp);
            if roll < cumulative {
                return Ok(Outcome::win(&prize.id));
            }
        }
        Ok(Outcome::lose())
    }
}

/// Test double replaying a scripted sequence of verdicts; losing once the
/// script runs out.
pub struct ScriptedEngine {
    script: Mutex<VecDeque<Result<Outcome, DependencyError>>>,
}

impl ScriptedEngine {
    pub fn new(script: Vec<Result<Outcome, DependencyError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
        }
    }

    pub fn always_lose() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl GameOutcomeEngine for ScriptedEngine {
    async fn decide(&self, _request: &OutcomeRequest) -> Result<Outcome, DependencyError> {
        let next = match self.script.lock() {
            Ok(mut script) => script.pop_front(),
            Err(_) => None,
        };
        next.unwrap_or_else(|| Ok(Outcome::lose()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PrizeKind;

    fn request_with_prize(probability_bp: u32, remaining: u32) -> OutcomeRequest {
        OutcomeRequest {
            user_id: "u1".to_string(),
            purchase_id: "p1".to_string(),
            card_id: "c1".to_string(),
            prizes: vec![Prize {
                id: "prize1".to_string(),
                card_id: "c1".to_string(),
                name: "Prize".to_string(),
                value_cents: 10_000,
                kind: PrizeKind::Cash,
                total_quantity: remaining,
                remaining_quantity: remaining,
                probability_bp,
            }],
        }
    }

    #[tokio::test]
    async fn test_full_weight_always_wins() {
        let engine = WeightedEngine;
        let outcome = engine.decide(&request_with_prize(10_000, 5)).await.unwrap();
        assert!(outcome.is_winner);
        assert_eq!(outcome.prize_id.as_deref(), Some("prize1"));
    }

    #[tokio::test]
    async fn test_zero_weight_never_wins() {
        let engine = WeightedEngine;
        for _ in 0..50 {
            let outcome = engine.decide(&request_with_prize(0, 5)).await.unwrap();
            assert!(!outcome.is_winner);
        }
    }

    #[tokio::test]
    async fn test_exhausted_stock_excluded_from_roll() {
        let engine = WeightedEngine;
        let outcome = engine.decide(&request_with_prize(10_000, 0)).await.unwrap();
        assert!(!outcome.is_winner);
    }

    #[tokio::test]
    async fn test_bounded_call_times_out() {
        struct HangingEngine;
        #[async_trait]
        impl GameOutcomeEngine for HangingEngine {
            async fn decide(&self, _request: &OutcomeRequest) -> Result<Outcome, DependencyError> {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(Outcome::lose())
            }
        }
        let request = request_with_prize(0, 0);
        let result = bounded_outcome(&HangingEngine, Duration::from_millis(20), &request).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_scripted_sequence_then_lose() {
        let engine = ScriptedEngine::new(vec![Ok(Outcome::win("prize1"))]);
        let request = request_with_prize(0, 0);
        assert!(engine.decide(&request).await.unwrap().is_winner);
        assert!(!engine.decide(&request).await.unwrap().is_winner);
    }
}
