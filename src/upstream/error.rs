//! Outbound call errors.

use thiserror::Error;

/// Failures surfaced by `CallTracker::call`. The tracker never absorbs one.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("invalid http method: {0}")]
    InvalidMethod(String),

    #[error("no api token")]
    NoApiToken,

    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("connection failed: {0}")]
    Connect(#[source] reqwest::Error),

    #[error(transparent)]
    Request(reqwest::Error),

    #[error("invalid response body: {0}")]
    Body(#[from] serde_json::Error),
}

impl CallError {
    /// Classify a transport error, timeouts first.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CallError::Timeout(err)
        } else if err.is_connect() {
            CallError::Connect(err)
        } else {
            CallError::Request(err)
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::Timeout(_))
    }

    pub fn is_connect(&self) -> bool {
        matches!(self, CallError::Connect(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(CallError::NoApiToken.to_string(), "no api token");
        assert_eq!(
            CallError::InvalidMethod("PATCH".into()).to_string(),
            "invalid http method: PATCH"
        );
        assert!(!CallError::NoApiToken.is_timeout());
    }
}
