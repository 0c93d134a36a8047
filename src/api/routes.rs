//! Route definitions

use super::handlers::*;
use super::monitoring::metrics_handler;
use super::server::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        // Auth
        .route("/auth/register", post(register_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/admin/login", post(admin_login_handler))
        .route("/admin/stats", get(admin_stats_handler))
        .route("/me", get(me_handler))
        // Catalog
        .route("/cards", get(cards_handler))
        .route("/cards/:card_id", get(card_detail_handler))
        // Purchases and plays
        .route("/purchases", post(create_purchase_handler).get(purchases_handler))
        .route("/purchases/:purchase_id/play", post(play_handler))
        .route("/plays", get(plays_handler))
        // Payments
        .route("/deposits", post(deposit_handler))
        .route("/transactions", get(transactions_handler))
        .route("/payments/webhook", post(webhook_handler))
        // Awards
        .route("/prize-awards", get(awards_handler))
        .route("/prize-awards/:award_id/claim", post(claim_handler))
        .with_state(state)
}
