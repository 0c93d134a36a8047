//! Request handlers
//!
//! Each handler authenticates through the session authority where required,
//! delegates to the core services and maps `CoreError` into the response
//! envelope. Handlers never touch the ledger directly.

use super::auth::{require_admin, require_user};
use super::errors::ApiError;
use super::middleware::RequestId;
use super::models::*;
use super::monitoring::MetricsRegistry;
use super::server::AppState;
use crate::accounts::NewUser;
use crate::plays::PlayVerdict;
use crate::types::PrincipalKind;
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Extension, Json,
};
use std::sync::Arc;

fn core_err(request_id: &RequestId, err: crate::errors::CoreError) -> ApiError {
    ApiError::from_core(request_id.0.clone(), err)
}

fn card_matches(purchase: &crate::types::Purchase, requested_card: &str) -> bool {
    purchase.card_id == requested_card
}

/// GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

// --- auth -----------------------------------------------------------------

/// POST /auth/register
pub async fn register_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let user = state
        .accounts
        .register_user(NewUser {
            email: body.email,
            username: body.username,
            phone: body.phone,
            document: body.document,
            password: body.password,
        })
        .map_err(|e| core_err(&request_id, e))?;
    let issued = state
        .sessions
        .issue_session(&user.id, PrincipalKind::User)
        .map_err(|e| core_err(&request_id, e))?;

    Ok(Json(AuthResponse {
        token: issued.token,
        expires_at: issued.expires_at,
        user: UserProfile::from(&user),
    }))
}

/// POST /auth/login
pub async fn login_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let user = state
        .accounts
        .verify_user_credentials(&body.email, &body.password)
        .map_err(|e| core_err(&request_id, e))?;
    let issued = state
        .sessions
        .issue_session(&user.id, PrincipalKind::User)
        .map_err(|e| core_err(&request_id, e))?;

    Ok(Json(AuthResponse {
        token: issued.token,
        expires_at: issued.expires_at,
        user: UserProfile::from(&user),
    }))
}

/// POST /auth/logout. Revocation is idempotent, so logging out with an
/// expired (or already revoked) token still succeeds.
pub async fn logout_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(token) = super::auth::bearer_token(&headers) {
        state
            .sessions
            .revoke_session(token)
            .map_err(|e| core_err(&request_id, e))?;
    }
    Ok(Json(serde_json::json!({ "logged_out": true })))
}

/// POST /admin/login
pub async fn admin_login_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AdminAuthResponse>, ApiError> {
    let admin = state
        .accounts
        .verify_admin_credentials(&body.email, &body.password)
        .map_err(|e| core_err(&request_id, e))?;
    let issued = state
        .sessions
        .issue_session(&admin.id, PrincipalKind::Admin)
        .map_err(|e| core_err(&request_id, e))?;

    Ok(Json(AdminAuthResponse {
        token: issued.token,
        expires_at: issued.expires_at,
        email: admin.email,
    }))
}

/// GET /admin/stats
pub async fn admin_stats_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<AdminStatsResponse>, ApiError> {
    require_admin(&state.sessions, &headers, &request_id.0)?;
    let stats = state
        .accounts
        .admin_stats()
        .map_err(|e| core_err(&request_id, e))?;
    Ok(Json(AdminStatsResponse { stats }))
}

/// GET /me
pub async fn me_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<MeResponse>, ApiError> {
    let session = require_user(&state.sessions, &headers, &request_id.0)?;
    let user = state
        .accounts
        .get_user(&session.principal_id)
        .map_err(|e| core_err(&request_id, e))?;
    let stats = state
        .accounts
        .user_stats(&session.principal_id)
        .map_err(|e| core_err(&request_id, e))?;
    let pending_awards = state
        .accounts
        .pending_awards(&session.principal_id)
        .map_err(|e| core_err(&request_id, e))?;

    Ok(Json(MeResponse {
        user: UserProfile::from(&user),
        stats,
        pending_awards,
    }))
}

// --- catalog --------------------------------------------------------------

/// GET /cards: public, active cards only.
pub async fn cards_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<CardsResponse>, ApiError> {
    let cards = state
        .catalog
        .list_active_cards()
        .map_err(|e| core_err(&request_id, e))?;
    Ok(Json(CardsResponse { cards }))
}

/// GET /cards/:id: the card with its prize table.
pub async fn card_detail_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(card_id): Path<String>,
) -> Result<Json<CardResponse>, ApiError> {
    let card = state
        .catalog
        .get_card(&card_id)
        .map_err(|e| core_err(&request_id, e))?;
    let prizes = state
        .catalog
        .prizes_of(&card_id)
        .map_err(|e| core_err(&request_id, e))?;
    Ok(Json(CardResponse { card, prizes }))
}

// --- purchases ------------------------------------------------------------

/// POST /purchases
pub async fn create_purchase_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreatePurchaseRequest>,
) -> Result<Json<PurchaseResponse>, ApiError> {
    let session = require_user(&state.sessions, &headers, &request_id.0)?;
    let purchase = state
        .purchases
        .create_purchase(&session.principal_id, &body.card_id, body.quantity)
        .await
        .map_err(|e| core_err(&request_id, e))?;
    MetricsRegistry::incr(&state.metrics.purchases_total);
    Ok(Json(PurchaseResponse::from(&purchase)))
}

/// GET /purchases
pub async fn purchases_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<PurchasesResponse>, ApiError> {
    let session = require_user(&state.sessions, &headers, &request_id.0)?;
    let purchases = state
        .purchases
        .purchases_of(&session.principal_id)
        .map_err(|e| core_err(&request_id, e))?;
    Ok(Json(PurchasesResponse {
        purchases: purchases.iter().map(PurchaseResponse::from).collect(),
    }))
}

// --- plays ----------------------------------------------------------------

/// POST /purchases/:id/play: consume one credit and settle the outcome.
/// The body is optional; a `card_id` in it must match the purchase.
pub async fn play_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(purchase_id): Path<String>,
    body: Option<Json<PlayRequest>>,
) -> Result<Json<PlayResponse>, ApiError> {
    let session = require_user(&state.sessions, &headers, &request_id.0)?;
    if let Some(requested_card) = body.and_then(|Json(b)| b.card_id) {
        let purchase = state
            .purchases
            .get_purchase_for(&session.principal_id, &purchase_id)
            .map_err(|e| core_err(&request_id, e))?;
        if !card_matches(&purchase, &requested_card) {
            return Err(ApiError::bad_request(
                request_id.0.clone(),
                "card_id does not match the purchase".to_string(),
            ));
        }
    }
    let (record, verdict) = state
        .plays
        .play(&session.principal_id, &purchase_id)
        .await
        .map_err(|e| core_err(&request_id, e))?;
    MetricsRegistry::incr(&state.metrics.plays_total);
    if record.is_winner {
        MetricsRegistry::incr(&state.metrics.wins_total);
    }

    let purchase = state
        .purchases
        .get_purchase_for(&session.principal_id, &purchase_id)
        .map_err(|e| core_err(&request_id, e))?;

    let (verdict_str, prize, award_id) = match verdict {
        PlayVerdict::Lost => ("lost".to_string(), None, None),
        PlayVerdict::PrizeExhausted => ("prize_exhausted".to_string(), None, None),
        PlayVerdict::Won { prize, award } => ("won".to_string(), Some(prize), Some(award.id)),
    };

    Ok(Json(PlayResponse {
        purchase_id: record.purchase_id,
        seq: record.seq,
        is_winner: record.is_winner,
        verdict: verdict_str,
        prize,
        award_id,
        remaining_credits: purchase.quantity.saturating_sub(purchase.consumed),
        played_at: record.played_at,
    }))
}

/// GET /plays: newest-first play history.
pub async fn plays_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<PlaysResponse>, ApiError> {
    let session = require_user(&state.sessions, &headers, &request_id.0)?;
    let plays = state
        .plays
        .plays_of_user(&session.principal_id)
        .map_err(|e| core_err(&request_id, e))?;
    Ok(Json(PlaysResponse { plays }))
}

// --- payments -------------------------------------------------------------

/// POST /deposits
pub async fn deposit_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<DepositRequest>,
) -> Result<Json<DepositResponse>, ApiError> {
    let session = require_user(&state.sessions, &headers, &request_id.0)?;
    let entry = state
        .payments
        .create_deposit(&session.principal_id, body.amount_cents)
        .await
        .map_err(|e| core_err(&request_id, e))?;
    MetricsRegistry::incr(&state.metrics.deposits_total);
    Ok(Json(DepositResponse {
        payment_id: entry.id,
        reference: entry.reference,
        amount_cents: entry.amount_cents,
        status: entry.status,
    }))
}

/// GET /transactions
pub async fn transactions_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<TransactionsResponse>, ApiError> {
    let session = require_user(&state.sessions, &headers, &request_id.0)?;
    let transactions = state
        .payments
        .entries_of(&session.principal_id)
        .map_err(|e| core_err(&request_id, e))?;
    Ok(Json(TransactionsResponse { transactions }))
}

/// POST /payments/webhook: provider notifications. Delivered at least
/// once; the core applies each external id at most once.
pub async fn webhook_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<WebhookRequest>,
) -> Result<Json<WebhookResponse>, ApiError> {
    MetricsRegistry::incr(&state.metrics.webhooks_total);
    let paid = match body.status.as_str() {
        "paid" | "approved" => true,
        "failed" | "cancelled" | "expired" => false,
        other => {
            return Err(ApiError::bad_request(
                request_id.0.clone(),
                format!("unknown payment status '{other}'"),
            ))
        }
    };

    match (&body.purchase_id, &body.payment_id) {
        (Some(purchase_id), _) => {
            if paid {
                state
                    .purchases
                    .confirm_payment(purchase_id, &body.external_id)
                    .map_err(|e| core_err(&request_id, e))?;
            } else {
                state
                    .purchases
                    .mark_failed(purchase_id)
                    .map_err(|e| core_err(&request_id, e))?;
            }
        }
        (None, Some(payment_id)) => {
            if paid {
                state
                    .payments
                    .confirm_deposit(payment_id, &body.external_id)
                    .map_err(|e| core_err(&request_id, e))?;
            } else {
                state
                    .payments
                    .fail_entry(payment_id)
                    .map_err(|e| core_err(&request_id, e))?;
            }
        }
        (None, None) => {
            return Err(ApiError::bad_request(
                request_id.0.clone(),
                "webhook must carry purchase_id or payment_id".to_string(),
            ))
        }
    }

    Ok(Json(WebhookResponse { accepted: true }))
}

// --- awards ---------------------------------------------------------------

/// GET /prize-awards
pub async fn awards_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<AwardsResponse>, ApiError> {
    let session = require_user(&state.sessions, &headers, &request_id.0)?;
    let awards = state
        .prizes
        .awards_of(&session.principal_id)
        .map_err(|e| core_err(&request_id, e))?;
    Ok(Json(AwardsResponse {
        awards: awards.iter().map(AwardResponse::from).collect(),
    }))
}

/// POST /prize-awards/:id/claim
pub async fn claim_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(award_id): Path<String>,
    Json(body): Json<ClaimRequest>,
) -> Result<Json<AwardResponse>, ApiError> {
    let session = require_user(&state.sessions, &headers, &request_id.0)?;
    let award = state
        .prizes
        .claim_prize(&session.principal_id, &award_id, body.delivery_info)
        .map_err(|e| core_err(&request_id, e))?;
    Ok(Json(AwardResponse::from(&award)))
}
