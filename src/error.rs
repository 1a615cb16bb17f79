//! Error types for the covex coverage framework.
//!
//! This module provides the crate-wide error used by the trace loading path.
//! Mini-language failures (`ComposeError`, `FilterError`) and codec failures
//! keep their own types and convert into `CovexError` when a caller wants a
//! single error channel.

use thiserror::Error;

use crate::formats::addr_trace::AddrTraceError;
use crate::formats::drcov::DrcovError;
use crate::model::ModelError;
use crate::query::expression::ComposeError;
use crate::query::filter::FilterError;

/// Main error type for covex operations.
#[derive(Debug, Error)]
pub enum CovexError {
    /// File I/O errors. Fatal for the load that hit them.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Trace file exceeds the configured size limit
    #[error("Trace file too large: {size} bytes (limit {limit})")]
    FileTooLarge { size: u64, limit: u64 },

    /// Malformed block-trace (drcov) file
    #[error("Block trace error: {0}")]
    Drcov(#[from] DrcovError),

    /// Malformed address-list trace file
    #[error("Address trace error: {0}")]
    AddrTrace(#[from] AddrTraceError),

    /// Composition expression parse or evaluation failure
    #[error("Composition error: {0}")]
    Compose(#[from] ComposeError),

    /// Block filter parse failure
    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    /// Program model construction failure
    #[error("Program model error: {0}")]
    Model(#[from] ModelError),

    /// Configuration (de)serialization failure
    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result type alias for covex operations
pub type Result<T> = std::result::Result<T, CovexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CovexError::FileTooLarge {
            size: 4096,
            limit: 1024,
        };
        assert_eq!(
            err.to_string(),
            "Trace file too large: 4096 bytes (limit 1024)"
        );

        let err = CovexError::AddrTrace(AddrTraceError::InvalidLine {
            line: 3,
            text: "zz".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Address trace error: invalid address trace line 3: zz"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: CovexError = io.into();
        assert!(matches!(err, CovexError::Io(_)));
        assert!(err.to_string().starts_with("I/O error"));
    }
}
