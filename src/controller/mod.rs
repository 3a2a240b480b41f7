//! Controllers owning the live station entities.
//!
//! A controller is the only place a live track, signal or gate is mutated.
//! Signal and gate changes go through the [`SafetyVerifier`](crate::verifier::SafetyVerifier)
//! first unless the caller explicitly asks for an override.

mod gate_controller;
mod signal_controller;
mod track_manager;

pub use gate_controller::GateController;
pub use signal_controller::SignalController;
pub use track_manager::TrackManager;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a state-changing command is authorised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandMode {
    /// Simulate first; apply only on a SAFE verdict.
    #[default]
    Verified,
    /// Apply immediately without verification. Reserved for emergency operator actions.
    Override,
}

/// What happened to a controller command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    /// Applied after a SAFE verdict.
    Verified,
    /// Applied without verification.
    Override,
    /// Refused by the verifier; nothing changed.
    Blocked,
    /// Unknown entity or unparseable input; nothing changed.
    Rejected,
    /// Nothing needed doing; nothing changed.
    NoAction,
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Verified => "VERIFIED",
            Self::Override => "OVERRIDE",
            Self::Blocked => "BLOCKED",
            Self::Rejected => "REJECTED",
            Self::NoAction => "NO_ACTION",
        };
        f.write_str(s)
    }
}

/// Result of a controller command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    /// What happened.
    pub status: CommandStatus,
    /// Operator-facing message.
    pub message: String,
}

impl CommandOutcome {
    pub(crate) fn new(status: CommandStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Returns true if the live entity changed.
    #[must_use]
    pub fn applied(&self) -> bool {
        matches!(self.status, CommandStatus::Verified | CommandStatus::Override)
    }
}

/// One entry in a controller's command log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    /// When the command was handled.
    pub timestamp: DateTime<Utc>,
    /// Target entity.
    pub entity_id: String,
    /// Requested state.
    pub new_state: String,
    /// Whether the entity changed.
    pub success: bool,
    /// `VERIFIED`, `OVERRIDE`, or the rejection reason.
    pub reason: String,
}

impl CommandRecord {
    pub(crate) fn new(
        entity_id: impl Into<String>,
        new_state: impl Into<String>,
        success: bool,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            entity_id: entity_id.into(),
            new_state: new_state.into(),
            success,
            reason: reason.into(),
        }
    }
}
