//! Error types for the Corpus Coordinator
//!
//! Provides structured error types for startup, generation, codec, and
//! submission handling. Request-level rejections carry a machine-readable
//! kind that the HTTP layer serializes verbatim.

use serde::Serialize;
use thiserror::Error;

/// Machine-readable kinds for request-level rejections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    /// The request itself is malformed (missing or unknown fields)
    InvalidRequest,
    /// No instruction with the given id was ever issued
    UnknownInstruction,
    /// The instruction has already received a submission
    AlreadySubmitted,
    /// A name from the locked target is absent from the case text
    MissingName,
    /// The case text contains schema keys or enumeration codes
    Leakage,
    /// The client tried to supply its own target payload
    TargetProvided,
    /// The submission carries a legacy target field
    LegacyTarget,
}

impl RejectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionKind::InvalidRequest => "invalid_request",
            RejectionKind::UnknownInstruction => "unknown_instruction",
            RejectionKind::AlreadySubmitted => "already_submitted",
            RejectionKind::MissingName => "missing_name",
            RejectionKind::Leakage => "leakage",
            RejectionKind::TargetProvided => "target_provided",
            RejectionKind::LegacyTarget => "legacy_target",
        }
    }
}

/// Main error type for coordinator operations
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// Invalid configuration; fatal at startup
    #[error("configuration error: {0}")]
    Config(String),

    /// Master schema could not be loaded or indexed; fatal at startup
    #[error("schema error: {0}")]
    Schema(String),

    /// State directory or on-disk log failure
    #[error("state error: {0}")]
    State(String),

    /// External TOON codec failure (spawn, timeout, round-trip mismatch)
    #[error("codec error: {0}")]
    Codec(String),

    /// The target generator exhausted its retry budget
    #[error("target generation failed after {attempts} attempts: {reason}")]
    GenerationExhausted { attempts: u32, reason: String },

    /// A submission or instruction request was rejected
    #[error("{reason}")]
    Rejection {
        kind: RejectionKind,
        reason: String,
    },

    /// Unexpected internal failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        CoordinatorError::Config(msg.into())
    }

    /// Create a schema error
    pub fn schema(msg: impl Into<String>) -> Self {
        CoordinatorError::Schema(msg.into())
    }

    /// Create a state error
    pub fn state(msg: impl Into<String>) -> Self {
        CoordinatorError::State(msg.into())
    }

    /// Create a codec error
    pub fn codec(msg: impl Into<String>) -> Self {
        CoordinatorError::Codec(msg.into())
    }

    /// Create a request rejection with the given kind
    pub fn rejection(kind: RejectionKind, reason: impl Into<String>) -> Self {
        CoordinatorError::Rejection {
            kind,
            reason: reason.into(),
        }
    }

    /// Transient errors: the client should retry the same request later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Codec(_) | CoordinatorError::GenerationExhausted { .. }
        )
    }

    /// Rejections map to HTTP 400; everything else is a server fault
    pub fn rejection_kind(&self) -> Option<RejectionKind> {
        match self {
            CoordinatorError::Rejection { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CoordinatorError {
    fn from(err: std::io::Error) -> Self {
        CoordinatorError::State(err.to_string())
    }
}

/// Result type alias for coordinator operations
pub type Result<T> = std::result::Result<T, CoordinatorError>;
