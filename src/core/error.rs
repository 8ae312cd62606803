//! Error types for fedguard.

use thiserror::Error;

/// Result type alias for fedguard operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while coordinating a federated run.
#[derive(Error, Debug)]
pub enum Error {
    // Fatal protocol errors
    #[error("Quorum not met during {phase}: need {needed}, got {actual}")]
    Quorum {
        /// Phase that lost quorum ("fit" or "evaluate")
        phase: String,
        /// Configured minimum
        needed: usize,
        /// Clients available or responding
        actual: usize,
    },

    #[error("Insufficient clients: need {needed}, {available} registered")]
    InsufficientClients { needed: usize, available: usize },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid round transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    // Recoverable per-client errors
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<Vec<usize>>,
        actual: Vec<Vec<usize>>,
    },

    #[error("Client {client_id} failed: {reason}")]
    ClientInvocation { client_id: String, reason: String },

    // Aggregation errors
    #[error("No results to aggregate")]
    EmptyResults,

    // Transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error only excludes one client from a round.
    ///
    /// Everything else terminates the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ShapeMismatch { .. } | Error::ClientInvocation { .. } | Error::Transport(_)
        )
    }

    /// Build a quorum error for a phase.
    pub fn quorum(phase: &str, needed: usize, actual: usize) -> Self {
        Error::Quorum {
            phase: phase.to_string(),
            needed,
            actual,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<ndarray::ShapeError> for Error {
    fn from(err: ndarray::ShapeError) -> Self {
        Error::Configuration(format!("array shape: {}", err))
    }
}

impl From<lz4_flex::block::DecompressError> for Error {
    fn from(err: lz4_flex::block::DecompressError) -> Self {
        Error::Transport(format!("decompression failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::ClientInvocation {
            client_id: "c0".to_string(),
            reason: "timeout".to_string(),
        }
        .is_recoverable());
        assert!(Error::ShapeMismatch {
            expected: vec![vec![2]],
            actual: vec![vec![3]],
        }
        .is_recoverable());
        assert!(!Error::quorum("fit", 2, 1).is_recoverable());
        assert!(!Error::Configuration("bad".to_string()).is_recoverable());
    }

    #[test]
    fn test_quorum_display() {
        let err = Error::quorum("fit", 2, 1);
        assert_eq!(err.to_string(), "Quorum not met during fit: need 2, got 1");
    }
}
