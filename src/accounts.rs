//! Accounts: registration, credential verification, balances and stats
//!
//! Passwords are stored as Argon2id PHC strings and verified with constant
//! work regardless of which field was wrong. Registration takes the unique
//! email through a transactional index write so two concurrent signups
//! cannot share an address.

use crate::errors::{AuthError, ConflictError, CoreResult, NotFoundError, ValidationError};
use crate::ledger::Ledger;
use crate::store;
use crate::types::{Admin, AwardStatus, PaymentStatus, Prize, PrizeAward, Purchase, User};
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Display-path scan bound; well above any storefront this serves.
const SCAN_LIMIT: usize = 100_000;

/// Registration input
#[derive(Clone, Debug)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub phone: Option<String>,
    pub document: Option<String>,
    pub password: String,
}

/// Per-user aggregates for the profile endpoint
#[derive(Clone, Debug, Serialize)]
pub struct UserStats {
    pub balance_cents: u64,
    pub total_deposited_cents: u64,
    pub games_played: u64,
    pub games_won: u64,
    pub prizes_won: u64,
    pub total_prize_value_cents: u64,
}

/// Back-office aggregates
#[derive(Clone, Debug, Serialize)]
pub struct AdminStats {
    pub total_users: u64,
    pub total_sales: u64,
    pub total_revenue_cents: u64,
    pub active_cards: u64,
    pub plays_today: u64,
}

pub struct AccountService {
    ledger: Arc<dyn Ledger>,
}

impl AccountService {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    pub fn register_user(&self, input: NewUser) -> CoreResult<User> {
        if !input.email.contains('@') {
            return Err(ValidationError::MalformedField("email".to_string()).into());
        }
        if input.username.trim().is_empty() {
            return Err(ValidationError::MalformedField("username".to_string()).into());
        }
        if input.password.len() < 8 {
            return Err(ValidationError::MalformedField(
                "password must be at least 8 characters".to_string(),
            )
            .into());
        }

        let user = User {
            id: Uuid::new_v4().to_string(),
            email: input.email.to_ascii_lowercase(),
            username: input.username,
            phone: input.phone,
            document: input.document,
            password_hash: hash_password(&input.password)?,
            balance_cents: 0,
            total_deposited_cents: 0,
            games_played: 0,
            games_won: 0,
            is_active: true,
            created_at: Utc::now(),
        };

        let email_key = store::user_email_key(&user.email);
        let user_clone = user.clone();
        self.ledger.transact(&mut |txn| {
            if txn.get(&email_key)?.is_some() {
                return Err(ConflictError::EmailTaken(user_clone.email.clone()).into());
            }
            txn.put(&email_key, user_clone.id.as_bytes())?;
            store::txn_put_json(txn, &store::user_key(&user_clone.id), &user_clone)
        })?;

        tracing::info!(user = %user.id, "user registered");
        Ok(user)
    }

    /// Verify user credentials for login. Inactive accounts are rejected
    /// even with a correct password.
    pub fn verify_user_credentials(&self, email: &str, password: &str) -> CoreResult<User> {
        let id = self
            .ledger
            .get(&store::user_email_key(email))?
            .ok_or(AuthError::BadCredentials)?;
        let id = String::from_utf8_lossy(&id).to_string();
        let user: User = store::get_json(self.ledger.as_ref(), &store::user_key(&id))?
            .ok_or(AuthError::BadCredentials)?;
        if !user.is_active {
            return Err(AuthError::AccountInactive.into());
        }
        verify_password(password, &user.password_hash)?;
        Ok(user)
    }

    pub fn verify_admin_credentials(&self, email: &str, password: &str) -> CoreResult<Admin> {
        let id = self
            .ledger
            .get(&store::admin_email_key(email))?
            .ok_or(AuthError::BadCredentials)?;
        let id = String::from_utf8_lossy(&id).to_string();
        let mut admin: Admin = store::get_json(self.ledger.as_ref(), &store::admin_key(&id))?
            .ok_or(AuthError::BadCredentials)?;
        if !admin.is_active {
            return Err(AuthError::AccountInactive.into());
        }
        verify_password(password, &admin.password_hash)?;

        admin.last_login = Some(Utc::now());
        store::put_json(self.ledger.as_ref(), &store::admin_key(&id), &admin)?;
        Ok(admin)
    }

    /// Seed path: create an admin account (no-op if the email is taken).
    pub fn ensure_admin(&self, email: &str, password: &str) -> CoreResult<Admin> {
        let admin = Admin {
            id: Uuid::new_v4().to_string(),
            email: email.to_ascii_lowercase(),
            password_hash: hash_password(password)?,
            is_active: true,
            last_login: None,
            created_at: Utc::now(),
        };
        let email_key = store::admin_email_key(&admin.email);
        let admin_clone = admin.clone();
        self.ledger.transact(&mut |txn| {
            if txn.get(&email_key)?.is_some() {
                return Ok(());
            }
            txn.put(&email_key, admin_clone.id.as_bytes())?;
            store::txn_put_json(txn, &store::admin_key(&admin_clone.id), &admin_clone)
        })?;
        Ok(admin)
    }

    pub fn get_user(&self, id: &str) -> CoreResult<User> {
        store::get_json(self.ledger.as_ref(), &store::user_key(id))?
            .ok_or_else(|| NotFoundError::User(id.to_string()).into())
    }

    pub fn user_stats(&self, user_id: &str) -> CoreResult<UserStats> {
        let user = self.get_user(user_id)?;

        let mut prizes_won = 0u64;
        let mut total_prize_value_cents = 0u64;
        for (_, id) in self
            .ledger
            .scan_prefix(&store::user_awards_prefix(user_id), SCAN_LIMIT)?
        {
            let award: Option<PrizeAward> =
                store::get_indexed(self.ledger.as_ref(), &id, store::award_key)?;
            let Some(award) = award else {
                continue;
            };
            prizes_won += 1;
            if let Some(prize) =
                store::get_json::<Prize>(self.ledger.as_ref(), &store::prize_key(&award.prize_id))?
            {
                total_prize_value_cents += prize.value_cents;
            }
        }

        Ok(UserStats {
            balance_cents: user.balance_cents,
            total_deposited_cents: user.total_deposited_cents,
            games_played: user.games_played,
            games_won: user.games_won,
            prizes_won,
            total_prize_value_cents,
        })
    }

    pub fn admin_stats(&self) -> CoreResult<AdminStats> {
        let total_users = self
            .ledger
            .scan_prefix(store::USER_PREFIX.as_bytes(), SCAN_LIMIT)?
            .len() as u64;

        let mut total_sales = 0u64;
        let mut total_revenue_cents = 0u64;
        for (_, bytes) in self
            .ledger
            .scan_prefix(store::PURCHASE_PREFIX.as_bytes(), SCAN_LIMIT)?
        {
            let purchase: Purchase = serde_json::from_slice(&bytes).map_err(|e| {
                crate::errors::StorageError::CorruptedData(format!("purchase row: {e}"))
            })?;
            if purchase.payment_status == PaymentStatus::Paid {
                total_sales += 1;
                total_revenue_cents += purchase.total_cents;
            }
        }

        let active_cards = self
            .ledger
            .scan_prefix(store::CARD_PREFIX.as_bytes(), SCAN_LIMIT)?
            .iter()
            .filter(|(_, bytes)| {
                serde_json::from_slice::<crate::types::CatalogEntry>(bytes)
                    .map(|card| card.is_active)
                    .unwrap_or(false)
            })
            .count() as u64;

        let midnight = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc())
            .unwrap_or_else(Utc::now);
        let mut plays_today = 0u64;
        for (_, bytes) in self
            .ledger
            .scan_prefix(store::PLAY_PREFIX.as_bytes(), SCAN_LIMIT)?
        {
            if let Ok(play) = serde_json::from_slice::<crate::types::PlayRecord>(&bytes) {
                if play.played_at >= midnight {
                    plays_today += 1;
                }
            }
        }

        Ok(AdminStats {
            total_users,
            total_sales,
            total_revenue_cents,
            active_cards,
            plays_today,
        })
    }

    /// Awards with `Claimed`/`Pending` status for the profile page.
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

    pub fn pending_awards(&self, user_id: &str) -> CoreResult<usize> {
        Ok(self
            .awards_of(user_id)?
            .iter()
            .filter(|award| award.status == AwardStatus::Pending)
            .count())
    }
}

fn hash_password(password: &str) -> CoreResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            crate::errors::StorageError::WriteFailed(format!("password hash failed: {e}")).into()
        })
}

fn verify_password(password: &str, phc: &str) -> CoreResult<()> {
    let parsed = PasswordHash::new(phc).map_err(|_| AuthError::BadCredentials)?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| AuthError::BadCredentials.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{AuthError, ConflictError, CoreError};
    use crate::ledger::MemoryLedger;

    fn service() -> AccountService {
        AccountService::new(Arc::new(MemoryLedger::new()))
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            username: "player".to_string(),
            phone: None,
            document: None,
            password: "hunter2hunter2".to_string(),
        }
    }

    #[test]
    fn test_register_and_login() {
        let service = service();
        let user = service.register_user(new_user("a@b.com")).unwrap();
        assert!(user.password_hash.starts_with("$argon2"));

        let verified = service
            .verify_user_credentials("a@b.com", "hunter2hunter2")
            .unwrap();
        assert_eq!(verified.id, user.id);
    }

    #[test]
    fn test_wrong_password_rejected() {
        let service = service();
        service.register_user(new_user("a@b.com")).unwrap();
        match service.verify_user_credentials("a@b.com", "wrong-password") {
            Err(CoreError::Auth(AuthError::BadCredentials)) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let service = service();
        service.register_user(new_user("a@b.com")).unwrap();
        match service.register_user(new_user("A@B.com")) {
            Err(CoreError::Conflict(ConflictError::EmailTaken(_))) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_inactive_user_cannot_login() {
        let service = service();
        let mut user = service.register_user(new_user("a@b.com")).unwrap();
        user.is_active = false;
        store::put_json(service.ledger.as_ref(), &store::user_key(&user.id), &user).unwrap();
        match service.verify_user_credentials("a@b.com", "hunter2hunter2") {
            Err(CoreError::Auth(AuthError::AccountInactive)) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_short_password_rejected() {
        let service = service();
        let mut input = new_user("a@b.com");
        input.password = "short".to_string();
        assert!(service.register_user(input).is_err());
    }

    #[test]
    fn test_ensure_admin_is_idempotent() {
        let service = service();
        service.ensure_admin("ops@raspa.io", "sup3rs3cret!").unwrap();
        service.ensure_admin("ops@raspa.io", "different-pw").unwrap();
        let admin = service
            .verify_admin_credentials("ops@raspa.io", "sup3rs3cret!")
            .unwrap();
        assert!(admin.last_login.is_some());
    }
}
