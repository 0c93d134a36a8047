//! Read-mostly catalog access
//!
//! Catalog management is an external collaborator; the core only validates
//! against card rows and reads prize inventory. The upsert functions exist
//! for the binary's seed path and for tests.

use crate::errors::{CoreResult, NotFoundError};
use crate::ledger::Ledger;
use crate::store;
use crate::types::{CatalogEntry, Prize};
use std::sync::Arc;

const SCAN_LIMIT: usize = 10_000;

pub struct CatalogService {
    ledger: Arc<dyn Ledger>,
}

impl CatalogService {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    pub fn get_card(&self, id: &str) -> CoreResult<CatalogEntry> {
        store::get_json(self.ledger.as_ref(), &store::card_key(id))?
            .ok_or_else(|| NotFoundError::Card(id.to_string()).into())
    }

    /// Active cards, for the public listing.
    pub fn list_active_cards(&self) -> CoreResult<Vec<CatalogEntry>> {
        let mut cards = Vec::new();
        for (_, bytes) in self
            .ledger
            .scan_prefix(store::CARD_PREFIX.as_bytes(), SCAN_LIMIT)?
        {
            let card: CatalogEntry = serde_json::from_slice(&bytes).map_err(|e| {
                crate::errors::StorageError::CorruptedData(format!("card row: {e}"))
            })?;
            if card.is_active {
                cards.push(card);
            }
        }
        Ok(cards)
    }

    pub fn get_prize(&self, id: &str) -> CoreResult<Prize> {
        store::get_json(self.ledger.as_ref(), &store::prize_key(id))?
            .ok_or_else(|| NotFoundError::Prize(id.to_string()).into())
    }

    /// Prizes attached to one card, in index order.
    pub fn prizes_of(&self, card_id: &str) -> CoreResult<Vec<Prize>> {
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

    /// Seed path only.
    pub fn upsert_card(&self, card: &CatalogEntry) -> CoreResult<()> {
        store::put_json(self.ledger.as_ref(), &store::card_key(&card.id), card)
    }

    /// Seed path only.
    pub fn upsert_prize(&self, prize: &Prize) -> CoreResult<()> {
        store::put_json(self.ledger.as_ref(), &store::prize_key(&prize.id), prize)?;
        self.ledger.put(
            &store::card_prizes_index_key(&prize.card_id, &prize.id),
            prize.id.as_bytes(),
        )
    }
}
