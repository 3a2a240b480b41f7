//! Error types for railtwin.
//!
//! Unsafe decisions are not errors: they come back as
//! [`Verdict`](crate::verifier::Verdict) values. The types in this module
//! cover setup and configuration problems only, where there is no sensible
//! verdict to return.

use std::path::PathBuf;

use thiserror::Error;

/// Validation errors raised while parsing input or checking configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A state name that does not parse.
    #[error("Unknown {kind} state '{value}'")]
    UnknownState {
        /// Entity kind, e.g. `"signal"`.
        kind: &'static str,
        /// The rejected text.
        value: String,
    },

    /// A blank identifier.
    #[error("Identifier for {kind} cannot be empty")]
    EmptyId {
        /// Entity kind.
        kind: &'static str,
    },

    /// A safety rule outside its allowed range.
    #[error("Invalid safety rule '{field}': {reason}")]
    InvalidRule {
        /// Offending field.
        field: String,
        /// What the field must satisfy.
        reason: String,
    },

    /// A rules document that is not valid JSON for [`SafetyRules`](crate::config::SafetyRules).
    #[error("Failed to parse safety rules: {message}")]
    MalformedRules {
        /// Parser message.
        message: String,
    },
}

/// Errors raised by the interlock while wiring up or logging.
#[derive(Debug, Error)]
pub enum InterlockError {
    /// An entity registered twice.
    #[error("{kind} '{id}' is already registered")]
    DuplicateId {
        /// Entity kind.
        kind: &'static str,
        /// The repeated id.
        id: String,
    },

    /// A signal whose track was never registered.
    #[error("Signal '{signal_id}' is bound to unknown track '{track_id}'")]
    UnboundSignal {
        /// The signal being added.
        signal_id: String,
        /// The missing track.
        track_id: String,
    },

    /// The JSON-lines event file could not be opened or written.
    #[error("Event sink {path:?} failed: {source}")]
    EventSink {
        /// Sink path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The rules file could not be read.
    #[error("Failed to read rules from {path:?}: {source}")]
    RulesFile {
        /// Rules path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Top-level error type for railtwin.
#[derive(Debug, Error)]
pub enum RailError {
    /// Input or configuration failed validation.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Interlock setup or logging failed.
    #[error("Interlock error: {0}")]
    Interlock(#[from] InterlockError),

    /// A broken internal invariant.
    #[error("Internal error: {message}")]
    Internal {
        /// What went wrong.
        message: String,
    },
}

impl RailError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an interlock wiring or logging error.
    #[must_use]
    pub const fn is_interlock(&self) -> bool {
        matches!(self, Self::Interlock(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if the failure came from the filesystem and may succeed later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Interlock(InterlockError::EventSink { .. } | InterlockError::RulesFile { .. })
        )
    }
}

/// Result type alias for railtwin operations.
pub type RailResult<T> = Result<T, RailError>;
