use thiserror::Error;

const NETWORK_ERROR_CODE: &str = "NetworkError";
const ABORT_ERROR_CODE: &str = "AbortError";
const THROTTLING_CODES: &[&str] = &[
    "TooManyRequestsException",
    "LimitExceededException",
    "ThrottlingException",
];

/// Error reported by the identity provider, passed through to callers unmodified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct GatewayError {
    /// Provider error type, e.g. `UsernameExistsException`.
    pub code: String,
    pub message: String,
    /// HTTP status of the failed response, when there was one.
    pub status: Option<u16>,
}

impl GatewayError {
    pub fn provider(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::provider(NETWORK_ERROR_CODE, message)
    }

    /// The request was abandoned because its cancellation token fired.
    pub fn cancelled() -> Self {
        Self::provider(ABORT_ERROR_CODE, "The operation was aborted")
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == ABORT_ERROR_CODE
    }

    pub fn is_network(&self) -> bool {
        self.code == NETWORK_ERROR_CODE
    }

    pub fn is_throttled(&self) -> bool {
        THROTTLING_CODES.contains(&self.code.as_str()) || self.status == Some(429)
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(error: reqwest::Error) -> Self {
        let status = error.status().map(|s| s.as_u16());
        let mut err = Self::network(error.to_string());
        err.status = status;
        err
    }
}
