//! Key layout and typed record access over the ledger
//!
//! Records are JSON values under string-prefixed keys. Secondary indexes
//! store the primary key as their value and sort newest-first by using an
//! inverted timestamp as the sort component.

use crate::errors::{CoreResult, StorageError};
use crate::ledger::{Ledger, LedgerTxn};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

pub const USER_PREFIX: &str = "user:rec:";
pub const USER_EMAIL_PREFIX: &str = "user:email:";
pub const ADMIN_PREFIX: &str = "admin:rec:";
pub const ADMIN_EMAIL_PREFIX: &str = "admin:email:";
pub const SESSION_PREFIX: &str = "session:";
pub const CARD_PREFIX: &str = "card:rec:";
pub const PRIZE_PREFIX: &str = "prize:rec:";
pub const CARD_PRIZES_PREFIX: &str = "card:prizes:";
pub const PURCHASE_PREFIX: &str = "purchase:rec:";
pub const USER_PURCHASES_PREFIX: &str = "user:purchases:";
pub const PLAY_PREFIX: &str = "play:rec:";
pub const USER_PLAYS_PREFIX: &str = "user:plays:";
pub const AWARD_PREFIX: &str = "award:rec:";
pub const USER_AWARDS_PREFIX: &str = "user:awards:";
pub const PAYMENT_PREFIX: &str = "payment:rec:";
pub const PAYMENT_EXT_PREFIX: &str = "payment:ext:";
pub const PAYMENT_PURCHASE_PREFIX: &str = "payment:purchase:";
pub const USER_PAYMENTS_PREFIX: &str = "user:payments:";

pub fn user_key(id: &str) -> Vec<u8> {
    format!("{USER_PREFIX}{id}").into_bytes()
}

pub fn user_email_key(email: &str) -> Vec<u8> {
    format!("{USER_EMAIL_PREFIX}{}", email.to_ascii_lowercase()).into_bytes()
}

pub fn admin_key(id: &str) -> Vec<u8> {
    format!("{ADMIN_PREFIX}{id}").into_bytes()
}

pub fn admin_email_key(email: &str) -> Vec<u8> {
    format!("{ADMIN_EMAIL_PREFIX}{}", email.to_ascii_lowercase()).into_bytes()
}

pub fn session_key(token_hash: &str) -> Vec<u8> {
    format!("{SESSION_PREFIX}{token_hash}").into_bytes()
}

pub fn card_key(id: &str) -> Vec<u8> {
    format!("{CARD_PREFIX}{id}").into_bytes()
}

pub fn prize_key(id: &str) -> Vec<u8> {
    format!("{PRIZE_PREFIX}{id}").into_bytes()
}

pub fn card_prizes_index_key(card_id: &str, prize_id: &str) -> Vec<u8> {
    format!("{CARD_PRIZES_PREFIX}{card_id}:{prize_id}").into_bytes()
}

pub fn card_prizes_prefix(card_id: &str) -> Vec<u8> {
    format!("{CARD_PRIZES_PREFIX}{card_id}:").into_bytes()
}

pub fn purchase_key(id: &str) -> Vec<u8> {
    format!("{PURCHASE_PREFIX}{id}").into_bytes()
}

pub fn user_purchases_index_key(user_id: &str, created_at: DateTime<Utc>, id: &str) -> Vec<u8> {
    format!(
        "{USER_PURCHASES_PREFIX}{user_id}:{}:{id}",
        inverted_ts(created_at)
    )
    .into_bytes()
}

pub fn user_purchases_prefix(user_id: &str) -> Vec<u8> {
    format!("{USER_PURCHASES_PREFIX}{user_id}:").into_bytes()
}

/// Play rows sort by 1-based sequence within their purchase.
pub fn play_key(purchase_id: &str, seq: u32) -> Vec<u8> {
    format!("{PLAY_PREFIX}{purchase_id}:{seq:010}").into_bytes()
}

pub fn plays_prefix(purchase_id: &str) -> Vec<u8> {
    format!("{PLAY_PREFIX}{purchase_id}:").into_bytes()
}

pub fn user_plays_index_key(user_id: &str, played_at: DateTime<Utc>, purchase_id: &str, seq: u32) -> Vec<u8> {
    format!(
        "{USER_PLAYS_PREFIX}{user_id}:{}:{purchase_id}:{seq:010}",
        inverted_ts(played_at)
    )
    .into_bytes()
}

pub fn user_plays_prefix(user_id: &str) -> Vec<u8> {
    format!("{USER_PLAYS_PREFIX}{user_id}:").into_bytes()
}

pub fn award_key(id: &str) -> Vec<u8> {
    format!("{AWARD_PREFIX}{id}").into_bytes()
}

pub fn user_awards_index_key(user_id: &str, created_at: DateTime<Utc>, id: &str) -> Vec<u8> {
    format!(
        "{USER_AWARDS_PREFIX}{user_id}:{}:{id}",
        inverted_ts(created_at)
    )
    .into_bytes()
}

pub fn user_awards_prefix(user_id: &str) -> Vec<u8> {
    format!("{USER_AWARDS_PREFIX}{user_id}:").into_bytes()
}

pub fn payment_key(id: &str) -> Vec<u8> {
    format!("{PAYMENT_PREFIX}{id}").into_bytes()
}

/// Idempotency index: external id -> payment entry id.
pub fn payment_ext_key(external_id: &str) -> Vec<u8> {
    format!("{PAYMENT_EXT_PREFIX}{external_id}").into_bytes()
}

/// Purchase -> payment entry id, written when the purchase is created.
pub fn payment_purchase_key(purchase_id: &str) -> Vec<u8> {
    format!("{PAYMENT_PURCHASE_PREFIX}{purchase_id}").into_bytes()
}

pub fn user_payments_index_key(user_id: &str, created_at: DateTime<Utc>, id: &str) -> Vec<u8> {
    format!(
        "{USER_PAYMENTS_PREFIX}{user_id}:{}:{id}",
        inverted_ts(created_at)
    )
    .into_bytes()
}

pub fn user_payments_prefix(user_id: &str) -> Vec<u8> {
    format!("{USER_PAYMENTS_PREFIX}{user_id}:").into_bytes()
}

/// Zero-padded inverted millisecond timestamp: lexicographic order becomes
/// newest-first.
fn inverted_ts(at: DateTime<Utc>) -> String {
    let millis = at.timestamp_millis().max(0) as u64;
    format!("{:020}", u64::MAX - millis)
}

// ---------------------------------------------------------------------------
// Typed access
// ---------------------------------------------------------------------------

fn decode<T: DeserializeOwned>(key_desc: &str, bytes: &[u8]) -> CoreResult<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        StorageError::CorruptedData(format!("failed to decode {key_desc}: {e}")).into()
    })
}

fn encode<T: Serialize>(key_desc: &str, value: &T) -> CoreResult<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| StorageError::WriteFailed(format!("failed to encode {key_desc}: {e}")).into())
}

pub fn get_json<T: DeserializeOwned>(ledger: &dyn Ledger, key: &[u8]) -> CoreResult<Option<T>> {
    match ledger.get(key)? {
        Some(bytes) => Ok(Some(decode(&String::from_utf8_lossy(key), &bytes)?)),
        None => Ok(None),
    }
}

pub fn put_json<T: Serialize>(ledger: &dyn Ledger, key: &[u8], value: &T) -> CoreResult<()> {
    let bytes = encode(&String::from_utf8_lossy(key), value)?;
    ledger.put(key, &bytes)
}

pub fn txn_get_json<T: DeserializeOwned>(
    txn: &mut dyn LedgerTxn,
    key: &[u8],
) -> CoreResult<Option<T>> {
    match txn.get(key)? {
        Some(bytes) => Ok(Some(decode(&String::from_utf8_lossy(key), &bytes)?)),
        None => Ok(None),
    }
}

pub fn txn_put_json<T: Serialize>(
    txn: &mut dyn LedgerTxn,
    key: &[u8],
    value: &T,
) -> CoreResult<()> {
    let bytes = encode(&String::from_utf8_lossy(key), value)?;
    txn.put(key, &bytes)
}

/// Resolve a secondary-index value (a primary id) to its record.
pub fn get_indexed<T: DeserializeOwned>(
    ledger: &dyn Ledger,
    index_value: &[u8],
    key_fn: impl Fn(&str) -> Vec<u8>,
) -> CoreResult<Option<T>> {
    let id = String::from_utf8_lossy(index_value).to_string();
    get_json(ledger, &key_fn(&id))
}
