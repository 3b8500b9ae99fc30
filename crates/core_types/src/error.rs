use thiserror::Error;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Failure surfaced by the gateway and the query cache.
///
/// Cloneable so a failed cursor can keep the error it reports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// No response was received (connect, timeout, broken body).
    #[error("request to {endpoint} failed: {message}")]
    FetchFailed { endpoint: String, message: String },

    #[error("{endpoint} rejected the request with status {status}")]
    RequestRejected {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// A success status whose body did not decode.
    #[error("unexpected response from {endpoint}: {message}")]
    MalformedResponse { endpoint: String, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    pub fn fetch_failed(endpoint: impl Into<String>, message: impl ToString) -> Self {
        Self::FetchFailed {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RequestRejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_retriable(&self) -> bool {
        match self {
            Self::FetchFailed { .. } => true,
            Self::RequestRejected { status, .. } => {
                matches!(*status, 408 | 429) || (500..600).contains(status)
            }
            Self::MalformedResponse { .. } | Self::InvalidRequest(_) => false,
        }
    }
}
