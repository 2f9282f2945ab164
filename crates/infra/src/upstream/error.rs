use thiserror::Error;

/// Upstream call error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    #[error("{operation}: upstream answered {status}")]
    Server { operation: &'static str, status: u16 },

    #[error("{operation}: upstream rejected the request with {status}")]
    Client { operation: &'static str, status: u16 },

    #[error("{operation}: upstream did not answer in time")]
    Timeout { operation: &'static str },

    #[error("{operation}: could not connect to upstream: {message}")]
    Connect {
        operation: &'static str,
        message: String,
    },

    #[error("{operation}: transport error: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },

    #[error("{operation}: unexpected response body: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },

    #[error("invalid upstream base url {url:?}: {message}")]
    InvalidUrl { url: String, message: String },
}

impl UpstreamError {
    /// Whether retrying the same call later may succeed.
    ///
    /// 5xx answers, timeouts and refused connections are transient; anything
    /// else will fail the same way again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UpstreamError::Server { .. } | UpstreamError::Timeout { .. } | UpstreamError::Connect { .. }
        )
    }

    pub(crate) fn from_status(operation: &'static str, status: reqwest::StatusCode) -> Self {
        if status.is_server_error() {
            UpstreamError::Server {
                operation,
                status: status.as_u16(),
            }
        } else {
            UpstreamError::Client {
                operation,
                status: status.as_u16(),
            }
        }
    }

    pub(crate) fn from_reqwest(operation: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout { operation }
        } else if err.is_connect() {
            UpstreamError::Connect {
                operation,
                message: err.to_string(),
            }
        } else if err.is_decode() {
            UpstreamError::Decode {
                operation,
                message: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            Self::from_status(operation, status)
        } else {
            UpstreamError::Transport {
                operation,
                message: err.to_string(),
            }
        }
    }
}
