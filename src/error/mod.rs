//! Error types for passflow.

use thiserror::Error;

use crate::gateway::GatewayError;
use crate::status::Status;

/// Primary error type for all flow operations.
///
/// `Clone` so that one single-flight outcome can be handed to every waiter.
/// Cancellation is never an error; see [`crate::handle::Outcome`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("Can't {operation} while in status {status}")]
    InvalidState {
        operation: &'static str,
        status: Status,
    },

    #[error(transparent)]
    Remote(#[from] GatewayError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Operation task failed: {0}")]
    TaskFailed(String),
}

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidState,
    Provider,
    Throttled,
    Network,
    Storage,
    Configuration,
    Internal,
}

impl FlowError {
    pub fn invalid_state(operation: &'static str, status: Status) -> Self {
        Self::InvalidState { operation, status }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidState { .. } => ErrorCategory::InvalidState,
            Self::Remote(err) if err.is_throttled() => ErrorCategory::Throttled,
            Self::Remote(err) if err.is_network() => ErrorCategory::Network,
            Self::Remote(_) => ErrorCategory::Provider,
            Self::Network(_) => ErrorCategory::Network,
            Self::Storage(_) => ErrorCategory::Storage,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Serialization(_) | Self::TaskFailed(_) => ErrorCategory::Internal,
        }
    }

    /// Whether a caller may reasonably retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Throttled | ErrorCategory::Network
        )
    }

    /// The provider error, when this failure came from the gateway.
    pub fn as_remote(&self) -> Option<&GatewayError> {
        match self {
            Self::Remote(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FlowError {
    fn from(error: std::io::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::de::Error> for FlowError {
    fn from(error: toml::de::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::ser::Error> for FlowError {
    fn from(error: toml::ser::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<tokio::task::JoinError> for FlowError {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::TaskFailed(error.to_string())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, FlowError>;
