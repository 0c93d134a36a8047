//! Wire DTOs
//!
//! Request and response bodies for the storefront API. Persisted records
//! that are safe on the wire serialize directly; the user record is not
//! (it carries the password hash), so it goes out as `UserProfile`.

use crate::accounts::{AdminStats, UserStats};
use crate::types::{AwardStatus, CatalogEntry, PaymentStatus, PlayRecord, Prize, User};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

// --- auth -----------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub document: Option<String>,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    /// Bearer token; shown exactly once, only its digest is stored.
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdminAuthResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub username: String,
    pub balance_cents: u64,
    pub games_played: u64,
    pub games_won: u64,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            username: user.username.clone(),
            balance_cents: user.balance_cents,
            games_played: user.games_played,
            games_won: user.games_won,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: UserProfile,
    pub stats: UserStats,
    pub pending_awards: usize,
}

#[derive(Debug, Serialize)]
pub struct AdminStatsResponse {
    pub stats: AdminStats,
}

// --- catalog --------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct CardResponse {
    #[serde(flatten)]
    pub card: CatalogEntry,
    pub prizes: Vec<Prize>,
}

#[derive(Debug, Serialize)]
pub struct CardsResponse {
    pub cards: Vec<CatalogEntry>,
}

// --- purchases ------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreatePurchaseRequest {
    pub card_id: String,
    pub quantity: u32,
}

#[derive(Debug, Serialize)]
pub struct PurchaseResponse {
    pub id: String,
    pub card_id: String,
    pub quantity: u32,
    pub unit_price_cents: u64,
    pub total_cents: u64,
    pub payment_status: PaymentStatus,
    pub pix_reference: Option<String>,
    pub payment_expires_at: DateTime<Utc>,
    pub remaining_credits: u32,
    pub created_at: DateTime<Utc>,
}

impl From<&crate::types::Purchase> for PurchaseResponse {
    fn from(p: &crate::types::Purchase) -> Self {
        Self {
            id: p.id.clone(),
            card_id: p.card_id.clone(),
            quantity: p.quantity,
            unit_price_cents: p.unit_price_cents,
            total_cents: p.total_cents,
            payment_status: p.payment_status,
            pix_reference: p.pix_reference.clone(),
            payment_expires_at: p.payment_expires_at,
            remaining_credits: p.quantity.saturating_sub(p.consumed),
            created_at: p.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PurchasesResponse {
    pub purchases: Vec<PurchaseResponse>,
}

// --- plays ----------------------------------------------------------------

/// Optional play body. Clients may echo the card id they believe they are
/// playing; when present it must match the purchase.
#[derive(Debug, Default, Deserialize)]
pub struct PlayRequest {
    #[serde(default, alias = "cardId")]
    pub card_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PlayResponse {
    pub purchase_id: String,
    pub seq: u32,
    pub is_winner: bool,
    /// `won`, `lost` or `prize_exhausted`.
    pub verdict: String,
    pub prize: Option<Prize>,
    pub award_id: Option<String>,
    pub remaining_credits: u32,
    pub played_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PlaysResponse {
    pub plays: Vec<PlayRecord>,
}

// --- payments -------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub amount_cents: u64,
}

#[derive(Debug, Serialize)]
pub struct DepositResponse {
    pub payment_id: String,
    pub reference: String,
    pub amount_cents: u64,
    pub status: crate::types::EntryStatus,
}

#[derive(Debug, Serialize)]
pub struct TransactionsResponse {
    pub transactions: Vec<crate::types::PaymentLedgerEntry>,
}

/// Provider notification. Purchase payments carry `purchase_id`, deposits
/// carry `payment_id`; both carry the provider's `external_id`.
#[derive(Debug, Deserialize)]
pub struct WebhookRequest {
    #[serde(default)]
    pub purchase_id: Option<String>,
    #[serde(default)]
    pub payment_id: Option<String>,
    pub external_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub accepted: bool,
}

// --- awards ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    #[serde(default)]
    pub delivery_info: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct AwardResponse {
    pub id: String,
    pub prize_id: String,
    pub purchase_id: String,
    pub status: AwardStatus,
    pub delivery_info: Option<serde_json::Value>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&crate::types::PrizeAward> for AwardResponse {
    fn from(a: &crate::types::PrizeAward) -> Self {
        Self {
            id: a.id.clone(),
            prize_id: a.prize_id.clone(),
            purchase_id: a.purchase_id.clone(),
            status: a.status,
            delivery_info: a.delivery_info.clone(),
            claimed_at: a.claimed_at,
            created_at: a.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AwardsResponse {
    pub awards: Vec<AwardResponse>,
}
