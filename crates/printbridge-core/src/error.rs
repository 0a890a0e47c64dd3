// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for PrintBridge.

use thiserror::Error;

use crate::types::FailureKind;

/// Top-level error type for all PrintBridge operations.
#[derive(Debug, Error)]
pub enum PrintBridgeError {
    // -- Lookup --
    #[error("not found: {0}")]
    NotFound(String),

    // -- Document errors --
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("rendering failed: {0}")]
    RenderFailure(String),

    // -- Device compatibility --
    #[error("media size not supported by printer: {0}")]
    MediaSizeMismatch(String),

    #[error("encoding failed: {0}")]
    EncodingFailure(String),

    // -- Device state / transport --
    #[error("printer offline: {0}")]
    PrinterOffline(String),

    #[error("transmission failed: {0}")]
    TransmissionFailure(String),

    #[error("printer discovery failed: {0}")]
    Discovery(String),

    // -- Job bookkeeping --
    #[error("invalid job state transition: {0}")]
    InvalidTransition(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PrintBridgeError {
    /// The result code recorded on a failed job for this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NotFound(_) => FailureKind::NotFound,
            Self::UnsupportedFormat(_) => FailureKind::UnsupportedFormat,
            Self::RenderFailure(_) => FailureKind::RenderFailure,
            Self::MediaSizeMismatch(_) => FailureKind::MediaSizeMismatch,
            Self::EncodingFailure(_) => FailureKind::EncodingFailure,
            Self::PrinterOffline(_) => FailureKind::PrinterOffline,
            Self::TransmissionFailure(_) => FailureKind::TransmissionFailure,
            Self::Discovery(_)
            | Self::InvalidTransition(_)
            | Self::Database(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Serialization(_) => FailureKind::Internal,
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PrintBridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_errors_keep_their_kind() {
        assert_eq!(
            PrintBridgeError::NotFound("printer usb:04f9:2020".into()).kind(),
            FailureKind::NotFound
        );
        assert_eq!(
            PrintBridgeError::TransmissionFailure("cover open".into()).kind(),
            FailureKind::TransmissionFailure
        );
        assert_eq!(
            PrintBridgeError::Database("locked".into()).kind(),
            FailureKind::Internal
        );
    }

    #[test]
    fn display_preserves_backend_reason() {
        let err = PrintBridgeError::TransmissionFailure("USB write: pipe error".into());
        assert_eq!(err.to_string(), "transmission failed: USB write: pipe error");
    }
}
