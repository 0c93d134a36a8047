//! Purchase lifecycle: pending -> paid -> credits consumed by plays
//!
//! A purchase is a paid-for bundle of play credits. Creation validates the
//! card, obtains a provider reference, then writes the purchase row and its
//! pending payment entry in one transaction. Payment confirmation is
//! idempotent per purchase and per external id.

use crate::errors::{ConflictError, CoreResult, NotFoundError, ValidationError};
use crate::ledger::Ledger;
use crate::payments::{self, PaymentService};
use crate::store;
use crate::types::{CatalogEntry, EntryKind, PaymentStatus, Purchase};
use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

const SCAN_LIMIT: usize = 10_000;

pub struct PurchaseLedger {
    ledger: Arc<dyn Ledger>,
    payments: Arc<PaymentService>,
    payment_window: Duration,
}

impl PurchaseLedger {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        payments: Arc<PaymentService>,
        payment_window: Duration,
    ) -> Self {
        Self {
            ledger,
            payments,
            payment_window,
        }
    }

    /// Create a pending purchase of `quantity` credits. Nothing is persisted
    /// until the card is validated and the provider reference is in hand, so
    /// a rejected request leaves no rows behind.
    pub async fn create_purchase(
        &self,
        user_id: &str,
        card_id: &str,
        quantity: u32,
    ) -> CoreResult<Purchase> {
        if quantity == 0 {
            return Err(ValidationError::InvalidQuantity(quantity).into());
        }

        let card: CatalogEntry = store::get_json(self.ledger.as_ref(), &store::card_key(card_id))?
            .ok_or_else(|| NotFoundError::Card(card_id.to_string()))?;
        if !card.is_active {
            return Err(ConflictError::CardInactive.into());
        }

        let total_cents = card.price_cents * quantity as u64;
        let reference = self
            .payments
            .request_reference(EntryKind::Purchase, total_cents)
            .await?;

        let now = Utc::now();
        let purchase = Purchase {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            card_id: card_id.to_string(),
            quantity,
            unit_price_cents: card.price_cents,
            total_cents,
            payment_status: PaymentStatus::Pending,
            pix_reference: Some(reference.clone()),
            payment_expires_at: now + self.payment_window,
            paid_at: None,
            consumed: 0,
            reservations: Vec::new(),
            created_at: now,
        };

        let row = purchase.clone();
        self.ledger.transact(&mut |txn| {
            store::txn_put_json(txn, &store::purchase_key(&row.id), &row)?;
            txn.put(
                &store::user_purchases_index_key(&row.user_id, row.created_at, &row.id),
                row.id.as_bytes(),
            )?;
            payments::txn_insert_purchase_entry(
                txn,
                &row.user_id,
                &row.id,
                row.total_cents,
                &reference,
                row.created_at,
            )?;
            Ok(())
        })?;

        tracing::info!(
            purchase = %purchase.id,
            user = user_id,
            card = card_id,
            quantity,
            total_cents,
            "purchase created"
        );
        Ok(purchase)
    }

    /// Flip the purchase to paid. Applied at most once: a repeat delivery of
    /// the same confirmation (same external id, or an already-paid purchase)
    /// is a no-op success.
    pub fn confirm_payment(&self, purchase_id: &str, external_id: &str) -> CoreResult<()> {
        let purchase_id = purchase_id.to_string();
        let external_id = external_id.to_string();
        self.ledger.transact(&mut |txn| {
            if txn.get(&store::payment_ext_key(&external_id))?.is_some() {
                return Ok(());
            }

            let key = store::purchase_key(&purchase_id);
            let mut purchase: Purchase = store::txn_get_json(txn, &key)?
                .ok_or_else(|| NotFoundError::Purchase(purchase_id.clone()))?;
            if purchase.payment_status == PaymentStatus::Paid {
                return Ok(());
            }

            let now = Utc::now();
            purchase.payment_status = PaymentStatus::Paid;
            purchase.paid_at = Some(now);
            store::txn_put_json(txn, &key, &purchase)?;
            payments::txn_complete_purchase_entry(txn, &purchase_id, &external_id, now)
        })?;

        tracing::info!(purchase = %purchase_id, external_id = %external_id, "payment confirmed");
        Ok(())
    }

    /// Mark a still-pending purchase failed (provider declined or the
    /// payment window lapsed). The purchase flip and its payment-entry
    /// failure commit in one transaction, and a redelivery reconciles an
    /// entry a crashed earlier delivery left pending. Paid purchases are
    /// never downgraded.
    pub fn mark_failed(&self, purchase_id: &str) -> CoreResult<()> {
        let purchase_id = purchase_id.to_string();
        self.ledger.transact(&mut |txn| {
            let key = store::purchase_key(&purchase_id);
            let mut purchase: Purchase = store::txn_get_json(txn, &key)?
                .ok_or_else(|| NotFoundError::Purchase(purchase_id.clone()))?;
            match purchase.payment_status {
                PaymentStatus::Paid => return Ok(()),
                PaymentStatus::Failed => {
                    // The purchase already flipped; its entry may not have.
                    return payments::txn_fail_purchase_entry(txn, &purchase_id, Utc::now());
                }
                PaymentStatus::Pending => {}
            }
            purchase.payment_status = PaymentStatus::Failed;
            store::txn_put_json(txn, &key, &purchase)?;
            payments::txn_fail_purchase_entry(txn, &purchase_id, Utc::now())
        })?;
        tracing::info!(purchase = %purchase_id, "purchase marked failed");
        Ok(())
    }

    pub fn get_purchase(&self, purchase_id: &str) -> CoreResult<Purchase> {
        store::get_json(self.ledger.as_ref(), &store::purchase_key(purchase_id))?
            .ok_or_else(|| NotFoundError::Purchase(purchase_id.to_string()).into())
    }

    /// Ownership-scoped lookup: a foreign purchase reads as not found rather
    /// than leaking its existence.
    pub fn get_purchase_for(&self, user_id: &str, purchase_id: &str) -> CoreResult<Purchase> {
        let purchase = self.get_purchase(purchase_id)?;
        if purchase.user_id != user_id {
            return Err(NotFoundError::Purchase(purchase_id.to_string()).into());
        }
        Ok(purchase)
    }

    /// Newest-first purchase history.
    pub fn purchases_of(&self, user_id: &str) -> CoreResult<Vec<Purchase>> {
        let mut purchases = Vec::new();
        for (_, id) in self
            .ledger
            .scan_prefix(&store::user_purchases_prefix(user_id), SCAN_LIMIT)?
        {
            if let Some(purchase) =
                store::get_indexed::<Purchase>(self.ledger.as_ref(), &id, store::purchase_key)?
            {
                purchases.push(purchase);
            }
        }
        Ok(purchases)
    }
}
