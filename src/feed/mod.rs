pub mod api;
pub mod provider;
pub mod retry;

pub use api::ApiFootball;
pub use provider::{FixtureStatistics, ResultsProvider};
pub use retry::{with_retry, RetryPolicy};

use thiserror::Error;

/// Failure talking to the sports data provider.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Rate limits, 5xx, timeouts and connection failures. Worth retrying.
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// Anything a retry cannot fix (4xx, malformed payloads, bad keys).
    #[error("permanent fetch failure: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        let msg = format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>());
        if status == 429 || status >= 500 {
            FetchError::Transient(msg)
        } else {
            FetchError::Permanent(msg)
        }
    }

    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            FetchError::Transient(e.to_string())
        } else if let Some(status) = e.status() {
            FetchError::from_status(status.as_u16(), &e.to_string())
        } else {
            FetchError::Permanent(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(FetchError::from_status(429, "slow down").is_transient());
        assert!(FetchError::from_status(503, "").is_transient());
        assert!(!FetchError::from_status(404, "").is_transient());
        assert!(!FetchError::from_status(401, "bad key").is_transient());
    }
}
