//! Persisted domain records and status enums
//!
//! Every record here is stored as a JSON value in the ledger under a
//! prefixed key (see `store`). Monetary amounts are integer centavos;
//! balances are never floating point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of authenticated principal a session is bound to
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    User,
    Admin,
}

/// A persisted session row. The raw bearer token is never stored; the row
/// key is derived from its SHA-256 digest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub token_hash: String,
    pub principal_id: String,
    pub kind: PrincipalKind,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Expiry is enforced at read time, never by background deletion.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Storefront customer account
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub username: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub document: Option<String>,
    /// Argon2id PHC string
    pub password_hash: String,
    pub balance_cents: u64,
    pub total_deposited_cents: u64,
    pub games_played: u64,
    pub games_won: u64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Back-office operator account
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Admin {
    pub id: String,
    pub email: String,
    /// Argon2id PHC string
    pub password_hash: String,
    pub is_active: bool,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A scratch card offered in the catalog. Owned by catalog management;
/// read-only from the transactional core's perspective.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
    pub price_cents: u64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// What a prize pays out as
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PrizeKind {
    Cash,
    Item,
}

/// Scarce prize inventory attached to one scratch card
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Prize {
    pub id: String,
    pub card_id: String,
    pub name: String,
    pub value_cents: u64,
    pub kind: PrizeKind,
    pub total_quantity: u32,
    /// Monotonically non-increasing, never negative.
    pub remaining_quantity: u32,
    /// Win weight in basis points, consumed by the default outcome engine.
    pub probability_bp: u32,
}

/// Payment state of a purchase
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

/// One play credit held by an in-flight engine call. The id ties the hold
/// to the request that took it: settlement consumes only its own hold, so a
/// request that stalls past `expires_at` and loses its hold to reclamation
/// cannot consume a credit someone else already played.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreditReservation {
    pub id: String,
    /// Past this instant the hold is presumed crashed and reclaimable.
    pub expires_at: DateTime<Utc>,
}

/// A paid-for bundle of `quantity` scratch-card plays
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Purchase {
    pub id: String,
    pub user_id: String,
    pub card_id: String,
    pub quantity: u32,
    pub unit_price_cents: u64,
    pub total_cents: u64,
    pub payment_status: PaymentStatus,
    /// Opaque reference issued by the payment provider.
    #[serde(default)]
    pub pix_reference: Option<String>,
    /// End of the payment window.
    pub payment_expires_at: DateTime<Utc>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    /// Settled plays. Credits held by in-flight plays live in
    /// `reservations` until their settle or release.
    pub consumed: u32,
    #[serde(default)]
    pub reservations: Vec<CreditReservation>,
    pub created_at: DateTime<Utc>,
}

impl Purchase {
    /// Credits not yet consumed or held by an in-flight play.
    pub fn available_credits(&self) -> u32 {
        self.quantity
            .saturating_sub(self.consumed + self.reservations.len() as u32)
    }
}

/// Immutable record of one consumed play credit and its verdict
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayRecord {
    pub purchase_id: String,
    /// 1-based position within the purchase, assigned at settlement.
    pub seq: u32,
    pub user_id: String,
    pub card_id: String,
    pub played_at: DateTime<Utc>,
    pub is_winner: bool,
    #[serde(default)]
    pub prize_id: Option<String>,
}

/// Claim state of an awarded prize
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AwardStatus {
    Pending,
    Claimed,
}

/// A specific prize granted to a user, pending claim/delivery
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrizeAward {
    pub id: String,
    pub prize_id: String,
    pub user_id: String,
    pub purchase_id: String,
    pub status: AwardStatus,
    #[serde(default)]
    pub delivery_info: Option<serde_json::Value>,
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// What a payment ledger entry funds
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Deposit,
    Purchase,
}

/// Settlement state of a payment ledger entry
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Completed,
    Failed,
}

/// Reconciliation row mirroring the external payment flow. Completion is
/// idempotent per `external_id`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentLedgerEntry {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub purchase_id: Option<String>,
    pub kind: EntryKind,
    pub amount_cents: u64,
    /// Provider-issued payment reference shown to the client.
    pub reference: String,
    pub status: EntryStatus,
    #[serde(default)]
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_session_expiry_boundary() {
        let issued = Utc::now();
        let session = Session {
            token_hash: "h".to_string(),
            principal_id: "u1".to_string(),
            kind: PrincipalKind::User,
            issued_at: issued,
            expires_at: issued + Duration::hours(24),
        };
        assert!(!session.is_expired_at(issued + Duration::hours(24) - Duration::seconds(1)));
        // now == expires_at already counts as expired
        assert!(session.is_expired_at(issued + Duration::hours(24)));
        assert!(session.is_expired_at(issued + Duration::hours(24) + Duration::seconds(1)));
    }

    #[test]
    fn test_available_credits_saturates() {
        let purchase = Purchase {
            id: "p".to_string(),
            user_id: "u".to_string(),
            card_id: "c".to_string(),
            quantity: 3,
            unit_price_cents: 500,
            total_cents: 1500,
            payment_status: PaymentStatus::Paid,
            pix_reference: None,
            payment_expires_at: Utc::now(),
            paid_at: None,
            consumed: 2,
            reservations: vec![CreditReservation {
                id: "r1".to_string(),
                expires_at: Utc::now() + Duration::seconds(1),
            }],
            created_at: Utc::now(),
        };
        assert_eq!(purchase.available_credits(), 0);
    }

    #[test]
    fn test_status_wire_encoding() {
        assert_eq!(
            serde_json::to_string(&PaymentStatus::Pending).unwrap(),
            "\"pending\""
        );
        assert_eq!(
            serde_json::to_string(&AwardStatus::Claimed).unwrap(),
            "\"claimed\""
        );
    }
}
