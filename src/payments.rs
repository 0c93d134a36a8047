//! Payment ledger entries and the external payment-provider seam
//!
//! Every money movement gets a `PaymentLedgerEntry` mirroring the external
//! flow. Completion is idempotent per `external_id`: the first confirmation
//! writes an `payment:ext:` index row inside the same transaction that
//! applies the side effects, and any later delivery of the same external id
//! short-circuits to a no-op success.

use crate::errors::{CoreResult, DependencyError, NotFoundError, ValidationError};
use crate::ledger::{Ledger, LedgerTxn};
use crate::store;
use crate::types::{EntryKind, EntryStatus, PaymentLedgerEntry, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const SCAN_LIMIT: usize = 10_000;

/// External payment-provider collaborator. Only the reference contract is
/// modeled here; confirmation arrives through the webhook.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_reference(
        &self,
        kind: EntryKind,
        amount_cents: u64,
    ) -> Result<String, DependencyError>;
}

/// Stand-in adapter generating an opaque, unguessable reference locally.
/// A real PSP integration implements [`PaymentProvider`] in its place.
pub struct LocalReferenceProvider;

#[async_trait]
impl PaymentProvider for LocalReferenceProvider {
    async fn create_reference(
        &self,
        kind: EntryKind,
        _amount_cents: u64,
    ) -> Result<String, DependencyError> {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        let tag = match kind {
            EntryKind::Deposit => "DEP",
            EntryKind::Purchase => "PIX",
        };
        Ok(format!("{tag}-{}", hex::encode(bytes)))
    }
}

pub struct PaymentService {
    ledger: Arc<dyn Ledger>,
    provider: Arc<dyn PaymentProvider>,
    provider_timeout: Duration,
}

impl PaymentService {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        provider: Arc<dyn PaymentProvider>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            provider,
            provider_timeout,
        }
    }

    /// Call the provider under a timeout. Nothing is persisted before this
    /// returns, so a timeout aborts cleanly and the client may retry.
    pub async fn request_reference(
        &self,
        kind: EntryKind,
        amount_cents: u64,
    ) -> CoreResult<String> {
        match tokio::time::timeout(
            self.provider_timeout,
            self.provider.create_reference(kind, amount_cents),
        )
        .await
        {
            Ok(Ok(reference)) => Ok(reference),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                Err(DependencyError::PaymentProvider("reference request timed out".to_string())
                    .into())
            }
        }
    }

    /// Create a pending deposit entry with a provider reference. The balance
    /// is credited only when the confirmation arrives.
    pub async fn create_deposit(
        &self,
        user_id: &str,
        amount_cents: u64,
    ) -> CoreResult<PaymentLedgerEntry> {
        if amount_cents == 0 {
            return Err(ValidationError::InvalidAmount.into());
        }

        let reference = self
            .request_reference(EntryKind::Deposit, amount_cents)
            .await?;
        let entry = PaymentLedgerEntry {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            purchase_id: None,
            kind: EntryKind::Deposit,
            amount_cents,
            reference,
            status: EntryStatus::Pending,
            external_id: None,
            created_at: Utc::now(),
            processed_at: None,
        };

        let entry_clone = entry.clone();
        self.ledger.transact(&mut |txn| {
            store::txn_put_json(txn, &store::payment_key(&entry_clone.id), &entry_clone)?;
            txn.put(
                &store::user_payments_index_key(
                    &entry_clone.user_id,
                    entry_clone.created_at,
                    &entry_clone.id,
                ),
                entry_clone.id.as_bytes(),
            )
        })?;

        tracing::info!(user = user_id, entry = %entry.id, amount_cents, "deposit created");
        Ok(entry)
    }

    /// Apply a deposit confirmation. Completion and the balance credit are
    /// one atomic unit, applied exactly once per `external_id`.
    pub fn confirm_deposit(&self, payment_id: &str, external_id: &str) -> CoreResult<()> {
        let payment_id = payment_id.to_string();
        let external_id = external_id.to_string();
        self.ledger.transact(&mut |txn| {
            // Duplicate notification for an already-applied external id.
            if txn.get(&store::payment_ext_key(&external_id))?.is_some() {
                return Ok(());
            }

            let key = store::payment_key(&payment_id);
            let mut entry: PaymentLedgerEntry = store::txn_get_json(txn, &key)?
                .ok_or_else(|| NotFoundError::Payment(payment_id.clone()))?;
            if entry.status == EntryStatus::Completed {
                return Ok(());
            }

            let now = Utc::now();
            entry.status = EntryStatus::Completed;
            entry.external_id = Some(external_id.clone());
            entry.processed_at = Some(now);
            store::txn_put_json(txn, &key, &entry)?;
            txn.put(&store::payment_ext_key(&external_id), entry.id.as_bytes())?;

            let user_key = store::user_key(&entry.user_id);
            let mut user: User = store::txn_get_json(txn, &user_key)?
                .ok_or_else(|| NotFoundError::User(entry.user_id.clone()))?;
            user.balance_cents += entry.amount_cents;
            user.total_deposited_cents += entry.amount_cents;
            store::txn_put_json(txn, &user_key, &user)
        })?;

        tracing::info!(entry = %payment_id, external_id = %external_id, "deposit confirmed");
        Ok(())
    }

    /// Mark an entry failed (provider declined / window expired). Completed
    /// entries are never downgraded.
    pub fn fail_entry(&self, payment_id: &str) -> CoreResult<()> {
        let payment_id = payment_id.to_string();
        self.ledger.transact(&mut |txn| {
            let key = store::payment_key(&payment_id);
            let mut entry: PaymentLedgerEntry = store::txn_get_json(txn, &key)?
                .ok_or_else(|| NotFoundError::Payment(payment_id.clone()))?;
            if entry.status != EntryStatus::Pending {
                return Ok(());
            }
            entry.status = EntryStatus::Failed;
            entry.processed_at = Some(Utc::now());
            store::txn_put_json(txn, &key, &entry)
        })
    }

    pub fn get_entry(&self, payment_id: &str) -> CoreResult<PaymentLedgerEntry> {
        store::get_json(self.ledger.as_ref(), &store::payment_key(payment_id))?
            .ok_or_else(|| NotFoundError::Payment(payment_id.to_string()).into())
    }

    /// Newest-first payment history for display.
    pub fn entries_of(&self, user_id: &str) -> CoreResult<Vec<PaymentLedgerEntry>> {
        let mut entries = Vec::new();
        for (_, id) in self
            .ledger
            .scan_prefix(&store::user_payments_prefix(user_id), SCAN_LIMIT)?
        {
            if let Some(entry) =
                store::get_indexed::<PaymentLedgerEntry>(self.ledger.as_ref(), &id, store::payment_key)?
            {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

/// Insert the pending purchase-payment entry inside the purchase-creation
/// transaction. Returns the entry id.
pub fn txn_insert_purchase_entry(
    txn: &mut dyn LedgerTxn,
    user_id: &str,
    purchase_id: &str,
    amount_cents: u64,
    reference: &str,
    created_at: DateTime<Utc>,
) -> CoreResult<String> {
    let entry = PaymentLedgerEntry {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        purchase_id: Some(purchase_id.to_string()),
        kind: EntryKind::Purchase,
        amount_cents,
        reference: reference.to_string(),
        status: EntryStatus::Pending,
        external_id: None,
        created_at,
        processed_at: None,
    };
    store::txn_put_json(txn, &store::payment_key(&entry.id), &entry)?;
    txn.put(
        &store::payment_purchase_key(purchase_id),
        entry.id.as_bytes(),
    )?;
    txn.put(
        &store::user_payments_index_key(user_id, created_at, &entry.id),
        entry.id.as_bytes(),
    )?;
    Ok(entry.id)
}

/// Complete the purchase-payment entry inside the payment-confirmation
/// transaction. No-op when the entry is already completed.
pub fn txn_complete_purchase_entry(
    txn: &mut dyn LedgerTxn,
    purchase_id: &str,
    external_id: &str,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    let Some(entry_id) = txn.get(&store::payment_purchase_key(purchase_id))? else {
        // Purchases created before the entry existed; nothing to reconcile.
        return Ok(());
    };
    let entry_id = String::from_utf8_lossy(&entry_id).to_string();
    let key = store::payment_key(&entry_id);
    let entry: Option<PaymentLedgerEntry> = store::txn_get_json(txn, &key)?;
    let Some(mut entry) = entry else {
        return Ok(());
    };
    if entry.status == EntryStatus::Completed {
        return Ok(());
    }
    entry.status = EntryStatus::Completed;
    entry.external_id = Some(external_id.to_string());
    entry.processed_at = Some(now);
    store::txn_put_json(txn, &key, &entry)?;
    txn.put(&store::payment_ext_key(external_id), entry.id.as_bytes())
}

/// Fail the purchase-payment entry inside the purchase-failure transaction.
/// No-op unless the entry is still pending.
pub fn txn_fail_purchase_entry(
    txn: &mut dyn LedgerTxn,
    purchase_id: &str,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    let Some(entry_id) = txn.get(&store::payment_purchase_key(purchase_id))? else {
        return Ok(());
    };
    let entry_id = String::from_utf8_lossy(&entry_id).to_string();
    let key = store::payment_key(&entry_id);
    let Some(mut entry) = store::txn_get_json::<PaymentLedgerEntry>(txn, &key)? else {
        return Ok(());
    };
    if entry.status != EntryStatus::Pending {
        return Ok(());
    }
    entry.status = EntryStatus::Failed;
    entry.processed_at = Some(now);
    store::txn_put_json(txn, &key, &entry)
}

/// Resolve an external id to the entry it completed, if any.
pub fn entry_for_external_id(
    ledger: &dyn Ledger,
    external_id: &str,
) -> CoreResult<Option<PaymentLedgerEntry>> {
    match ledger.get(&store::payment_ext_key(external_id))? {
        Some(id) => store::get_indexed(ledger, &id, store::payment_key),
        None => Ok(None),
    }
}
