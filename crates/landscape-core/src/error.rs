//! Error taxonomy shared by all landscape crates.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for landscape operations.
pub type LandscapeResult<T> = Result<T, LandscapeError>;

/// Errors that can occur while orchestrating replica sets.
#[derive(Debug, Error)]
pub enum LandscapeError {
    /// Invalid flag or region combination; raised before any resource is touched.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A cloud API call creating or changing a resource failed.
    #[error("provisioning error: {0}")]
    Provisioning(String),

    #[error("{label} did not succeed within {elapsed:?}{}", last_error.as_ref().map(|e| format!(" (last error: {e})")).unwrap_or_default())]
    HealthTimeout {
        label: String,
        elapsed: Duration,
        last_error: Option<String>,
    },

    #[error("master data import from {from} into {into} failed: {reason}")]
    DataImport {
        from: String,
        into: String,
        progress_id: Uuid,
        reason: String,
    },

    #[error("content of {from} and {into} still differs after {attempts} comparison attempt(s)")]
    ComparisonMismatch {
        from: String,
        into: String,
        attempts: u32,
        /// Differences found on the importing side.
        a_diffs: Vec<String>,
        /// Differences found on the exporting side.
        b_diffs: Vec<String>,
    },

    /// Missing permission or unavailable service dependency.
    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A remote server call returned a non-success status.
    #[error("remote server error: {0}")]
    Remote(String),
}

impl LandscapeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_timeout_message_mentions_last_error() {
        let err = LandscapeError::HealthTimeout {
            label: "master regatta42".to_string(),
            elapsed: Duration::from_secs(30),
            last_error: Some("connection refused".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("master regatta42"));
        assert!(msg.contains("connection refused"));

        let err = LandscapeError::HealthTimeout {
            label: "host i-1".to_string(),
            elapsed: Duration::from_secs(5),
            last_error: None,
        };
        assert!(!err.to_string().contains("last error"));
    }

    #[test]
    fn not_found_is_detectable() {
        assert!(LandscapeError::NotFound("ref".to_string()).is_not_found());
        assert!(!LandscapeError::Remote("500".to_string()).is_not_found());
    }
}
