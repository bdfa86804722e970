use crate::domain::session::{OrderId, SessionStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CheckoutError {
    /// Broken catalogue data (missing price for a period, invalid period bounds).
    /// Never retried; an operator has to fix the configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// Conflicting or incomplete selection, stale client total. User-correctable.
    #[error("Quote validation error: {0}")]
    QuoteValidation(String),
    #[error("Payment provider error: {message}")]
    PaymentProvider { message: String, retryable: bool },
    /// Amount mismatch or a second, different capture for a finalized registration.
    #[error("Capture conflict: {0}")]
    CaptureConflict(String),
    /// Inconclusive outcome. For captures the caller must re-query the session first.
    #[error("Network timeout: {0}")]
    NetworkTimeout(String),
    #[error("Payment session not found: {0}")]
    SessionNotFound(OrderId),
    #[error("Registration not found: {0}")]
    RegistrationNotFound(String),
    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },
    #[error("Settings error: {0}")]
    Settings(#[from] toml::de::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl CheckoutError {
    pub fn provider(message: impl Into<String>, retryable: bool) -> Self {
        Self::PaymentProvider {
            message: message.into(),
            retryable,
        }
    }

    /// Whether repeating the failed order-creation call is safe and worthwhile.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CheckoutError::PaymentProvider {
                retryable: true,
                ..
            } | CheckoutError::NetworkTimeout(_)
        )
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for CheckoutError {
    fn from(err: rocksdb::Error) -> Self {
        CheckoutError::InternalError(Box::new(err))
    }
}

impl From<reqwest::Error> for CheckoutError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CheckoutError::NetworkTimeout(err.to_string())
        } else if err.is_connect() || err.status().is_some_and(|s| s.is_server_error()) {
            CheckoutError::provider(err.to_string(), true)
        } else {
            CheckoutError::provider(err.to_string(), false)
        }
    }
}

pub type Result<T> = std::result::Result<T, CheckoutError>;
