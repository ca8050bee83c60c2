//! Error types for forensic record/replay operations
//!
//! The control surface reports failures through [`ForensicError`]:
//! - Structured variants with descriptive messages
//! - Stable error codes for programmatic handling
//! - Error categories for grouping and filtering
//! - JSON serialization for command responses
//!
//! Lookup misses are deliberately *not* represented here. A replayed call
//! site that finds no recorded data gets `None` / `false` and falls back to
//! live behaviour.
//!
//! # Example
//!
//! ```rust
//! use forensic_core::error::{ErrorCategory, ForensicError};
//!
//! fn report(err: ForensicError) {
//!     match err.category() {
//!         ErrorCategory::Mode => println!("wrong session mode: {}", err.error_code()),
//!         ErrorCategory::Validation => println!("bad input"),
//!         _ => println!("other error"),
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mode::SessionMode;

/// Result type alias for forensic operations
pub type Result<T> = std::result::Result<T, ForensicError>;

/// Error category for grouping related errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Session mode state machine rejected the command
    Mode,
    /// Input validation failed (malformed event, bad config)
    Validation,
    /// Something expected was missing
    NotFound,
    /// Internal invariant broken
    Internal,
    /// External I/O or serialization failure
    External,
}

/// Errors that can occur in forensic operations
#[derive(Error, Debug)]
pub enum ForensicError {
    // ═══════════════════════════════════════════════════════════════════════
    // Mode errors (session state machine)
    // ═══════════════════════════════════════════════════════════════════════
    /// Recording was requested while a recording is already running
    #[error("Already recording. Call stop_record() before starting a new recording.")]
    AlreadyRecording,

    /// Replay was requested while a replay is already running
    #[error("Already replaying. Call stop_replay() before starting a new replay.")]
    AlreadyReplaying,

    /// The requested transition is not allowed from the current mode
    #[error("Invalid mode transition from {from} to {to}. Transitions must pass through OFF.")]
    InvalidModeTransition { from: SessionMode, to: SessionMode },

    /// A command was issued before the control surface was enabled
    #[error("Forensics domain is not enabled. Call enable() first.")]
    NotEnabled,

    /// Another session is already active in this process
    #[error("A forensic session is already active in this process. Drop it before creating another.")]
    SessionActive,

    // ═══════════════════════════════════════════════════════════════════════
    // Event errors (serialized events fed through the control surface)
    // ═══════════════════════════════════════════════════════════════════════
    /// Serialized event is malformed or has invalid data
    #[error("Invalid event: {reason}")]
    InvalidEvent { reason: String },

    /// Event kind name is not part of the event model
    #[error("Unknown event kind: '{kind}'")]
    UnknownEventKind { kind: String },

    /// Raw log line could not be parsed
    #[error("Malformed log line {line}: {reason}")]
    MalformedLogLine { line: usize, reason: String },

    // ═══════════════════════════════════════════════════════════════════════
    // Infrastructure errors (log thread, storage, I/O)
    // ═══════════════════════════════════════════════════════════════════════
    /// The recorder log thread is gone
    #[error("Recorder log thread has shut down")]
    RecorderClosed,

    /// Configuration is invalid
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    /// JSON serialization or deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O operation failed
    #[error("IO error: {message}")]
    Io { message: String },
}

impl ForensicError {
    /// Returns true if the same command might succeed once the session
    /// reaches a different mode
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ForensicError::AlreadyRecording
                | ForensicError::AlreadyReplaying
                | ForensicError::InvalidModeTransition { .. }
                | ForensicError::NotEnabled
                | ForensicError::SessionActive
        )
    }

    /// Returns true if this is a session mode error
    pub fn is_mode_error(&self) -> bool {
        self.category() == ErrorCategory::Mode
    }

    /// Returns the error category for grouping
    pub fn category(&self) -> ErrorCategory {
        match self {
            ForensicError::AlreadyRecording
            | ForensicError::AlreadyReplaying
            | ForensicError::InvalidModeTransition { .. }
            | ForensicError::NotEnabled
            | ForensicError::SessionActive => ErrorCategory::Mode,

            ForensicError::InvalidEvent { .. }
            | ForensicError::MalformedLogLine { .. }
            | ForensicError::Config { .. } => ErrorCategory::Validation,

            ForensicError::UnknownEventKind { .. } => ErrorCategory::NotFound,

            ForensicError::RecorderClosed => ErrorCategory::Internal,

            ForensicError::Json(_) | ForensicError::Io { .. } => ErrorCategory::External,
        }
    }

    /// Returns the stable error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            ForensicError::AlreadyRecording => "ALREADY_RECORDING",
            ForensicError::AlreadyReplaying => "ALREADY_REPLAYING",
            ForensicError::InvalidModeTransition { .. } => "INVALID_MODE_TRANSITION",
            ForensicError::NotEnabled => "NOT_ENABLED",
            ForensicError::SessionActive => "SESSION_ACTIVE",
            ForensicError::InvalidEvent { .. } => "INVALID_EVENT",
            ForensicError::UnknownEventKind { .. } => "UNKNOWN_EVENT_KIND",
            ForensicError::MalformedLogLine { .. } => "MALFORMED_LOG_LINE",
            ForensicError::RecorderClosed => "RECORDER_CLOSED",
            ForensicError::Config { .. } => "CONFIG_ERROR",
            ForensicError::Json(_) => "JSON_ERROR",
            ForensicError::Io { .. } => "IO_ERROR",
        }
    }

    /// Converts this error to a JSON-serializable response object
    ///
    /// ```json
    /// {
    ///   "error": {
    ///     "code": "ALREADY_RECORDING",
    ///     "message": "Already recording. ...",
    ///     "category": "mode",
    ///     "recoverable": true
    ///   }
    /// }
    /// ```
    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
                category: self.category(),
                recoverable: self.is_recoverable(),
            },
        }
    }
}

impl From<std::io::Error> for ForensicError {
    fn from(err: std::io::Error) -> Self {
        ForensicError::Io {
            message: err.to_string(),
        }
    }
}

/// JSON-serializable error response for the control surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
}

/// Error detail for JSON responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Stable error code (e.g., "ALREADY_RECORDING")
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Error category
    pub category: ErrorCategory,
    /// Whether the command may succeed in another mode
    pub recoverable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_errors_are_recoverable() {
        assert!(ForensicError::AlreadyRecording.is_recoverable());
        assert!(ForensicError::InvalidModeTransition {
            from: SessionMode::Recording,
            to: SessionMode::Replaying,
        }
        .is_recoverable());
        assert!(!ForensicError::InvalidEvent {
            reason: "missing kind".to_string()
        }
        .is_recoverable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ForensicError::AlreadyReplaying.error_code(), "ALREADY_REPLAYING");
        assert_eq!(
            ForensicError::InvalidModeTransition {
                from: SessionMode::Off,
                to: SessionMode::Off,
            }
            .error_code(),
            "INVALID_MODE_TRANSITION"
        );
    }

    #[test]
    fn test_every_variant_has_a_distinct_code() {
        let errors = vec![
            ForensicError::AlreadyRecording,
            ForensicError::AlreadyReplaying,
            ForensicError::InvalidModeTransition {
                from: SessionMode::Off,
                to: SessionMode::Off,
            },
            ForensicError::NotEnabled,
            ForensicError::SessionActive,
            ForensicError::InvalidEvent { reason: String::new() },
            ForensicError::UnknownEventKind { kind: String::new() },
            ForensicError::MalformedLogLine { line: 1, reason: String::new() },
            ForensicError::RecorderClosed,
            ForensicError::Config { reason: String::new() },
            ForensicError::Json(serde_json::from_str::<u8>("x").unwrap_err()),
            ForensicError::Io { message: String::new() },
        ];
        let codes: std::collections::BTreeSet<&str> = errors.iter().map(|e| e.error_code()).collect();
        assert_eq!(codes.len(), errors.len());
        assert_eq!(
            errors.iter().filter(|e| e.category() == ErrorCategory::Internal).count(),
            1
        );
    }

    #[test]
    fn test_error_categories() {
        assert!(ForensicError::NotEnabled.is_mode_error());
        assert_eq!(
            ForensicError::MalformedLogLine {
                line: 3,
                reason: "no handler".to_string()
            }
            .category(),
            ErrorCategory::Validation
        );
        assert_eq!(ForensicError::RecorderClosed.category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_transition_message_names_modes() {
        let err = ForensicError::InvalidModeTransition {
            from: SessionMode::Recording,
            to: SessionMode::Replaying,
        };
        let msg = err.to_string();
        assert!(msg.contains("RECORDING"));
        assert!(msg.contains("REPLAYING"));
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ForensicError::AlreadyRecording.to_error_response();

        let json = serde_json::to_string_pretty(&response).unwrap();
        assert!(json.contains("ALREADY_RECORDING"));
        assert!(json.contains("\"mode\""));

        let parsed: ErrorResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.error.code, "ALREADY_RECORDING");
        assert!(parsed.error.recoverable);
    }
}
