//! Session authority: bearer tokens gating every mutating operation
//!
//! Tokens are 32 bytes from the OS RNG, handed to the client hex-encoded and
//! persisted only as their SHA-256 digest. Expiry is enforced at the moment
//! of use; rows are never reaped in the background, so a lookup can
//! distinguish "no such token" from "token expired". A DashMap read cache
//! fronts the ledger for the hot verify path; the expiry check always runs
//! against the caller-supplied instant, so a cached row can never produce a
//! stale-but-unexpired read.

use crate::config::SessionConfig;
use crate::errors::{AuthError, CoreResult};
use crate::ledger::Ledger;
use crate::store;
use crate::types::{PrincipalKind, Session};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A freshly issued session: the only place the raw token ever appears.
#[derive(Clone, Debug)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues, verifies and revokes bearer sessions for both principal kinds.
pub struct SessionAuthority {
    ledger: Arc<dyn Ledger>,
    user_ttl: Duration,
    admin_ttl: Duration,
    cache: DashMap<String, Session>,
    cache_capacity: usize,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl SessionAuthority {
    pub fn new(ledger: Arc<dyn Ledger>, config: &SessionConfig) -> Self {
        Self {
            ledger,
            user_ttl: Duration::hours(config.user_ttl_hours as i64),
            admin_ttl: Duration::hours(config.admin_ttl_hours as i64),
            cache: DashMap::new(),
            cache_capacity: config.cache_capacity,
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    /// Issue a session for `principal_id`. User sessions live 24h, admin
    /// sessions 8h (configurable).
    pub fn issue_session(&self, principal_id: &str, kind: PrincipalKind) -> CoreResult<IssuedSession> {
        self.issue_session_at(principal_id, kind, Utc::now())
    }

    pub fn issue_session_at(
        &self,
        principal_id: &str,
        kind: PrincipalKind,
        now: DateTime<Utc>,
    ) -> CoreResult<IssuedSession> {
        let token = generate_token();
        let token_hash = hash_token(&token);
        let ttl = match kind {
            PrincipalKind::User => self.user_ttl,
            PrincipalKind::Admin => self.admin_ttl,
        };
        let session = Session {
            token_hash: token_hash.clone(),
            principal_id: principal_id.to_string(),
            kind,
            issued_at: now,
            expires_at: now + ttl,
        };
        store::put_json(self.ledger.as_ref(), &store::session_key(&token_hash), &session)?;
        self.cache_insert(session.clone());

        tracing::info!(principal = principal_id, kind = ?kind, "session issued");
        Ok(IssuedSession {
            token,
            expires_at: session.expires_at,
        })
    }

    /// Resolve a bearer token to its session. `SessionInvalid` when no row
    /// matches, `SessionExpired` when the row exists but is past its window.
    pub fn verify_session(&self, token: &str) -> CoreResult<Session> {
        self.verify_session_at(token, Utc::now())
    }

    pub fn verify_session_at(&self, token: &str, now: DateTime<Utc>) -> CoreResult<Session> {
        let token_hash = hash_token(token);

        let session = if let Some(cached) = self.cache.get(&token_hash) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            cached.clone()
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
            let session: Session = store::get_json(self.ledger.as_ref(), &store::session_key(&token_hash))?
                .ok_or(AuthError::SessionInvalid)?;
            self.cache_insert(session.clone());
            session
        };

        if session.is_expired_at(now) {
            return Err(AuthError::SessionExpired.into());
        }
        Ok(session)
    }

    /// Idempotent revocation: deleting an absent or expired token succeeds.
    pub fn revoke_session(&self, token: &str) -> CoreResult<()> {
        let token_hash = hash_token(token);
        self.cache.remove(&token_hash);
        self.ledger.delete(&store::session_key(&token_hash))?;
        tracing::info!("session revoked");
        Ok(())
    }

    fn cache_insert(&self, session: Session) {
        if self.cache.len() >= self.cache_capacity {
            // Drop expired entries before refusing to grow.
            let now = Utc::now();
            self.cache.retain(|_, s| !s.is_expired_at(now));
            if self.cache.len() >= self.cache_capacity {
                return;
            }
        }
        self.cache.insert(session.token_hash.clone(), session);
    }

    pub fn cache_stats(&self) -> (u64, u64) {
        (
            self.cache_hits.load(Ordering::Relaxed),
            self.cache_misses.load(Ordering::Relaxed),
        )
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
