use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Error codes for categorizing engine failures
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Validation errors (3xxx)
    #[serde(rename = "VAL_3001")]
    InvalidInput,
    #[serde(rename = "VAL_3005")]
    InvalidAmount,

    // Resource errors (4xxx)
    #[serde(rename = "RES_4001")]
    ListingNotFound,
    #[serde(rename = "RES_4002")]
    SettlementNotFound,
    #[serde(rename = "RES_4003")]
    IdempotencyConflict,
    #[serde(rename = "RES_4005")]
    Forbidden,

    // Business logic errors (5xxx)
    #[serde(rename = "BIZ_5001")]
    InsufficientBalance,
    #[serde(rename = "BIZ_5007")]
    ListingUnavailable,
    #[serde(rename = "BIZ_5008")]
    BelowMinimumPurchase,
    #[serde(rename = "BIZ_5009")]
    InsufficientQuantity,
    #[serde(rename = "BIZ_5010")]
    SelfPurchaseForbidden,
    #[serde(rename = "BIZ_5011")]
    RefundNotAllowed,

    // Concurrency errors (6xxx)
    #[serde(rename = "LCK_6001")]
    LockContention,

    // Database errors (7xxx)
    #[serde(rename = "DB_7002")]
    QueryFailed,

    // External service errors (8xxx)
    #[serde(rename = "EXT_8003")]
    ExternalServiceError,

    // Internal errors (9xxx)
    #[serde(rename = "INT_9999")]
    InternalError,
    #[serde(rename = "INT_9998")]
    ConfigurationError,
}

impl ErrorCode {
    /// Get numeric code
    pub fn code(&self) -> u16 {
        match self {
            ErrorCode::InvalidInput => 3001,
            ErrorCode::InvalidAmount => 3005,

            ErrorCode::ListingNotFound => 4001,
            ErrorCode::SettlementNotFound => 4002,
            ErrorCode::IdempotencyConflict => 4003,
            ErrorCode::Forbidden => 4005,

            ErrorCode::InsufficientBalance => 5001,
            ErrorCode::ListingUnavailable => 5007,
            ErrorCode::BelowMinimumPurchase => 5008,
            ErrorCode::InsufficientQuantity => 5009,
            ErrorCode::SelfPurchaseForbidden => 5010,
            ErrorCode::RefundNotAllowed => 5011,

            ErrorCode::LockContention => 6001,

            ErrorCode::QueryFailed => 7002,

            ErrorCode::ExternalServiceError => 8003,

            ErrorCode::InternalError => 9999,
            ErrorCode::ConfigurationError => 9998,
        }
    }

    /// Get user-friendly message
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "Invalid input provided",
            ErrorCode::InvalidAmount => "Invalid amount provided",
            ErrorCode::ListingNotFound => "The requested energy listing was not found",
            ErrorCode::SettlementNotFound => "The requested settlement was not found",
            ErrorCode::IdempotencyConflict => {
                "This idempotency key was already used for a different purchase"
            }
            ErrorCode::Forbidden => "You don't have permission to perform this action",
            ErrorCode::InsufficientBalance => "Insufficient balance to complete this transaction",
            ErrorCode::ListingUnavailable => "This listing is no longer available for purchase",
            ErrorCode::BelowMinimumPurchase => "Requested energy is below the listing minimum",
            ErrorCode::InsufficientQuantity => "The listing does not have enough energy left",
            ErrorCode::SelfPurchaseForbidden => "Sellers cannot purchase their own listings",
            ErrorCode::RefundNotAllowed => "This settlement cannot be refunded",
            ErrorCode::LockContention => "The listing is busy. Please retry shortly",
            ErrorCode::QueryFailed => "Database query failed",
            ErrorCode::ExternalServiceError => "External service error occurred",
            ErrorCode::InternalError => "An internal error occurred",
            ErrorCode::ConfigurationError => "Engine configuration error",
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Listing not found: {0}")]
    ListingNotFound(Uuid),

    #[error("Listing {listing_id} is unavailable: {reason}")]
    ListingUnavailable { listing_id: Uuid, reason: String },

    #[error("Requested {requested} kWh is below the minimum purchase of {minimum} kWh")]
    BelowMinimumPurchase { requested: Decimal, minimum: Decimal },

    #[error("Requested {requested} kWh but only {available} kWh is available")]
    InsufficientQuantity { requested: Decimal, available: Decimal },

    #[error("Buyer {0} cannot purchase their own listing")]
    SelfPurchaseForbidden(Uuid),

    #[error("Insufficient balance for {account}: required {required}, available {available}")]
    InsufficientBalance {
        account: Uuid,
        required: Decimal,
        available: Decimal,
    },

    #[error("Could not acquire lease on {resource} within {waited:?}")]
    LockContention { resource: String, waited: Duration },

    #[error("Settlement not found: {0}")]
    SettlementNotFound(Uuid),

    #[error("Refund not allowed: {0}")]
    RefundNotAllowed(String),

    #[error("Idempotency key {0} was already used with different parameters")]
    IdempotencyConflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Helper: Invalid input
    pub fn invalid_input(message: impl Into<String>) -> Self {
        EngineError::InvalidInput(message.into())
    }

    /// Helper: Listing unavailable
    pub fn unavailable(listing_id: Uuid, reason: impl Into<String>) -> Self {
        EngineError::ListingUnavailable {
            listing_id,
            reason: reason.into(),
        }
    }

    /// Get error code
    pub fn error_code(&self) -> ErrorCode {
        match self {
            EngineError::ListingNotFound(_) => ErrorCode::ListingNotFound,
            EngineError::ListingUnavailable { .. } => ErrorCode::ListingUnavailable,
            EngineError::BelowMinimumPurchase { .. } => ErrorCode::BelowMinimumPurchase,
            EngineError::InsufficientQuantity { .. } => ErrorCode::InsufficientQuantity,
            EngineError::SelfPurchaseForbidden(_) => ErrorCode::SelfPurchaseForbidden,
            EngineError::InsufficientBalance { .. } => ErrorCode::InsufficientBalance,
            EngineError::LockContention { .. } => ErrorCode::LockContention,
            EngineError::SettlementNotFound(_) => ErrorCode::SettlementNotFound,
            EngineError::RefundNotAllowed(_) => ErrorCode::RefundNotAllowed,
            EngineError::IdempotencyConflict(_) => ErrorCode::IdempotencyConflict,
            EngineError::Forbidden(_) => ErrorCode::Forbidden,
            EngineError::InvalidInput(_) => ErrorCode::InvalidInput,
            EngineError::Database(_) => ErrorCode::QueryFailed,
            EngineError::Redis(_) => ErrorCode::ExternalServiceError,
            EngineError::Configuration(_) => ErrorCode::ConfigurationError,
            EngineError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Only lease contention is worth resubmitting, and only after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::LockContention { .. })
    }

    /// Whether the caller sent something the engine rejected on its merits
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            EngineError::Database(_)
                | EngineError::Redis(_)
                | EngineError::Configuration(_)
                | EngineError::Internal(_)
        )
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::ListingNotFound(_) => "listing_not_found",
            EngineError::ListingUnavailable { .. } => "listing_unavailable",
            EngineError::BelowMinimumPurchase { .. } => "below_minimum_purchase",
            EngineError::InsufficientQuantity { .. } => "insufficient_quantity",
            EngineError::SelfPurchaseForbidden(_) => "self_purchase_forbidden",
            EngineError::InsufficientBalance { .. } => "insufficient_balance",
            EngineError::LockContention { .. } => "lock_contention",
            EngineError::SettlementNotFound(_) => "settlement_not_found",
            EngineError::RefundNotAllowed(_) => "refund_not_allowed",
            EngineError::IdempotencyConflict(_) => "idempotency_conflict",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::Database(_) => "database_error",
            EngineError::Redis(_) => "cache_error",
            EngineError::Configuration(_) => "configuration_error",
            EngineError::Internal(_) => "internal_error",
        }
    }

    /// Log error with appropriate level
    pub fn log(&self, operation: &str) {
        if self.is_client_error() {
            warn!(operation = %operation, code = self.error_code().code(), error = %self, "Request rejected");
        } else {
            error!(operation = %operation, code = self.error_code().code(), error = %self, "Engine error occurred");
        }
    }
}

impl From<validator::ValidationErrors> for EngineError {
    fn from(errors: validator::ValidationErrors) -> Self {
        EngineError::InvalidInput(errors.to_string())
    }
}

/// Postgres SQLSTATE codes the settlement path treats as contention
const PG_LOCK_NOT_AVAILABLE: &str = "55P03";
const PG_DEADLOCK_DETECTED: &str = "40P01";
const PG_SERIALIZATION_FAILURE: &str = "40001";

/// Map a database error raised while holding or waiting for a row lock.
pub fn map_lock_error(err: sqlx::Error, resource: &str, waited: Duration) -> EngineError {
    if let sqlx::Error::Database(db_err) = &err {
        if let Some(code) = db_err.code() {
            if code == PG_LOCK_NOT_AVAILABLE
                || code == PG_DEADLOCK_DETECTED
                || code == PG_SERIALIZATION_FAILURE
            {
                return EngineError::LockContention {
                    resource: resource.to_string(),
                    waited,
                };
            }
        }
    }
    EngineError::Database(err)
}
