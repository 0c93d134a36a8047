//! Error types for the raspa storefront core
//!
//! One enum per concern, wrapped by a root error. The taxonomy mirrors the
//! request surface: validation and not-found errors are terminal for the
//! request, conflict errors are terminal but expected under contention, and
//! dependency errors are always safe for the caller to retry because no
//! ledger mutation happens before they are raised.

use thiserror::Error;

/// Root error type for all core operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("authorization error: {0}")]
    Auth(#[from] AuthError),

    #[error("conflict: {0}")]
    Conflict(#[from] ConflictError),

    #[error("not found: {0}")]
    NotFound(#[from] NotFoundError),

    #[error("dependency error: {0}")]
    Dependency(#[from] DependencyError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Bad input shape or range
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("quantity must be >= 1, got {0}")]
    InvalidQuantity(u32),

    #[error("amount must be positive")]
    InvalidAmount,

    #[error("malformed field: {0}")]
    MalformedField(String),
}

/// Session and credential failures
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("session token is not recognized")]
    SessionInvalid,

    #[error("session has expired")]
    SessionExpired,

    #[error("invalid credentials")]
    BadCredentials,

    #[error("account is inactive")]
    AccountInactive,

    #[error("operation requires {0} privileges")]
    WrongPrincipalKind(&'static str),
}

/// State conflicts: the precondition no longer holds. Terminal for the
/// request, not fatal to the system.
#[derive(Debug, Error)]
pub enum ConflictError {
    #[error("all play credits of this purchase have been consumed")]
    AllCreditsConsumed,

    #[error("prize award has already been claimed")]
    AlreadyClaimed,

    #[error("purchase has not been paid")]
    PurchaseNotPaid,

    #[error("scratch card is inactive")]
    CardInactive,

    #[error("email {0} is already registered")]
    EmailTaken(String),
}

/// Referenced entity does not exist (or is not visible to the caller)
#[derive(Debug, Error)]
pub enum NotFoundError {
    #[error("purchase {0} not found")]
    Purchase(String),

    #[error("scratch card {0} not found")]
    Card(String),

    #[error("prize award {0} not found")]
    Award(String),

    #[error("prize {0} not found")]
    Prize(String),

    #[error("user {0} not found")]
    User(String),

    #[error("payment entry {0} not found")]
    Payment(String),
}

/// External collaborator failures. No ledger mutation precedes these, so the
/// caller may retry.
#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("game outcome engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("payment provider failed: {0}")]
    PaymentProvider(String),
}

/// Persisted ledger failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database open failed: {0}")]
    OpenFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("corrupted data: {0}")]
    CorruptedData(String),

    #[error("transaction conflict persisted after {0} retries")]
    RetriesExhausted(u32),
}

/// Convenience alias for core results
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Stable machine-readable code, used by the HTTP error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(ValidationError::InvalidQuantity(_)) => "INVALID_QUANTITY",
            CoreError::Validation(ValidationError::InvalidAmount) => "INVALID_AMOUNT",
            CoreError::Validation(ValidationError::MalformedField(_)) => "MALFORMED_FIELD",
            CoreError::Auth(AuthError::SessionInvalid) => "SESSION_INVALID",
            CoreError::Auth(AuthError::SessionExpired) => "SESSION_EXPIRED",
            CoreError::Auth(AuthError::BadCredentials) => "BAD_CREDENTIALS",
            CoreError::Auth(AuthError::AccountInactive) => "ACCOUNT_INACTIVE",
            CoreError::Auth(AuthError::WrongPrincipalKind(_)) => "FORBIDDEN",
            CoreError::Conflict(ConflictError::AllCreditsConsumed) => "ALL_CREDITS_CONSUMED",
            CoreError::Conflict(ConflictError::AlreadyClaimed) => "ALREADY_CLAIMED",
            CoreError::Conflict(ConflictError::PurchaseNotPaid) => "PURCHASE_NOT_PAID",
            CoreError::Conflict(ConflictError::CardInactive) => "CARD_INACTIVE",
            CoreError::Conflict(ConflictError::EmailTaken(_)) => "EMAIL_TAKEN",
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::Dependency(DependencyError::EngineUnavailable(_)) => "GAME_ENGINE_UNAVAILABLE",
            CoreError::Dependency(DependencyError::PaymentProvider(_)) => "PAYMENT_PROVIDER_UNAVAILABLE",
            CoreError::Storage(_) => "INTERNAL_ERROR",
        }
    }
}
