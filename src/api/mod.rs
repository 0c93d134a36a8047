//! HTTP surface
//!
//! Thin axum layer over the core services: handlers translate between the
//! wire DTOs and core types, map `CoreError` to status codes, and carry a
//! request id through every response.

pub mod auth;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod monitoring;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
