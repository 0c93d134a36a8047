//! raspa: transactional core of a scratch-card storefront
//!
//! The crate owns the purchase-to-prize lifecycle: a user buys a bundle of
//! play credits, a payment confirmation flips the purchase to paid, each
//! play consumes exactly one credit against the game outcome engine, and
//! winning plays mint prize awards the user later claims. Everything that
//! moves money or credits goes through atomic check-then-write transactions
//! over a single persisted ledger, so the invariants (never more plays than
//! credits, prize stock never negative, one claim per award) hold under
//! concurrent requests and across restarts.
//!
//! Module map:
//! - [`ledger`] / [`store`]: transactional key-value ledger and key layout
//! - [`sessions`]: bearer-token authority gating every mutating operation
//! - [`accounts`], [`catalog`]: users, admins and the scratch-card catalog
//! - [`purchases`], [`payments`]: purchase lifecycle and payment entries
//! - [`engine`], [`plays`], [`prizes`]: outcome engine seam, play
//!   settlement and prize claims
//! - [`api`]: the axum HTTP surface

pub mod accounts;
pub mod api;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod errors;
pub mod ledger;
pub mod payments;
pub mod plays;
pub mod prizes;
pub mod purchases;
pub mod sessions;
pub mod store;
pub mod types;
