//! Railway signals.
//!
//! A signal starts at RED and only changes when the caller passes
//! `verified = true`. Whether the requested aspect is legal is decided by the
//! safety verifier, not by the signal itself.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::id::{SignalId, TrackId};

/// Signal aspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalState {
    /// Stop.
    #[default]
    Red,
    /// Caution.
    Yellow,
    /// Proceed.
    Green,
}

impl SignalState {
    /// Canonical upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Red => "RED",
            Self::Yellow => "YELLOW",
            Self::Green => "GREEN",
        }
    }
}

impl fmt::Display for SignalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RED" => Ok(Self::Red),
            "YELLOW" => Ok(Self::Yellow),
            "GREEN" => Ok(Self::Green),
            _ => Err(ValidationError::UnknownState {
                kind: "signal",
                value: s.to_string(),
            }),
        }
    }
}

/// One aspect change in a signal's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalChange {
    /// When the change happened.
    pub timestamp: DateTime<Utc>,
    /// Aspect before the change.
    pub old_state: SignalState,
    /// Aspect after the change.
    pub new_state: SignalState,
}

/// Immutable value copy of a signal, as stored in the twin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSnapshot {
    /// Signal identifier.
    pub id: SignalId,
    /// Track protected by this signal.
    pub track_id: TrackId,
    /// Current aspect.
    pub state: SignalState,
}

impl SignalSnapshot {
    /// A RED signal bound to `track_id`.
    #[must_use]
    pub fn red(id: impl Into<SignalId>, track_id: impl Into<TrackId>) -> Self {
        Self {
            id: id.into(),
            track_id: track_id.into(),
            state: SignalState::Red,
        }
    }

    /// Copy of this snapshot showing `state`.
    #[must_use]
    pub fn with_state(&self, state: SignalState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }
}

/// A live signal bound to one track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    id: SignalId,
    track_id: TrackId,
    state: SignalState,
    last_change: DateTime<Utc>,
    history: Vec<SignalChange>,
}

impl Signal {
    /// Creates a RED signal protecting `track_id`.
    #[must_use]
    pub fn new(id: impl Into<SignalId>, track_id: impl Into<TrackId>) -> Self {
        Self {
            id: id.into(),
            track_id: track_id.into(),
            state: SignalState::Red,
            last_change: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Signal identifier.
    #[must_use]
    pub fn id(&self) -> &SignalId {
        &self.id
    }

    /// Track protected by this signal.
    #[must_use]
    pub fn track_id(&self) -> &TrackId {
        &self.track_id
    }

    /// Current aspect.
    #[must_use]
    pub fn state(&self) -> SignalState {
        self.state
    }

    /// Time of the last change (or creation).
    #[must_use]
    pub fn last_change(&self) -> DateTime<Utc> {
        self.last_change
    }

    /// Aspect history, oldest first.
    #[must_use]
    pub fn history(&self) -> &[SignalChange] {
        &self.history
    }

    /// Changes the aspect. Refuses unless `verified` is set.
    pub fn change_state(&mut self, new_state: SignalState, verified: bool) -> bool {
        if !verified {
            return false;
        }
        let now = Utc::now();
        self.history.push(SignalChange {
            timestamp: now,
            old_state: self.state,
            new_state,
        });
        self.state = new_state;
        self.last_change = now;
        true
    }

    /// Value copy for the twin.
    #[must_use]
    pub fn snapshot(&self) -> SignalSnapshot {
        SignalSnapshot {
            id: self.id.clone(),
            track_id: self.track_id.clone(),
            state: self.state,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signal({}, {}, track={})", self.id, self.state, self.track_id)
    }
}
