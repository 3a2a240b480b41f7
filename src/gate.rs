//! Level-crossing gates.
//!
//! A gate starts CLOSED and, like a signal, only moves on a verified
//! request. It also tracks the nearest approaching train so the verifier can
//! check the danger zone before the gate is opened.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::id::{GateId, TrainId};

/// Distance reported when no train has been seen near a gate.
pub const NO_TRAIN_DISTANCE_M: f64 = 9999.0;

/// Gate position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateState {
    /// Road traffic may cross.
    Open,
    /// Barriers are coming down.
    Closing,
    /// Barriers down.
    #[default]
    Closed,
}

impl GateState {
    /// Canonical upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GateState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OPEN" => Ok(Self::Open),
            "CLOSING" => Ok(Self::Closing),
            "CLOSED" => Ok(Self::Closed),
            _ => Err(ValidationError::UnknownState {
                kind: "gate",
                value: s.to_string(),
            }),
        }
    }
}

/// One movement in a gate's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateChange {
    /// When the movement happened.
    pub timestamp: DateTime<Utc>,
    /// Position before.
    pub old_state: GateState,
    /// Position after.
    pub new_state: GateState,
    /// Nearest train distance at the time, in metres.
    pub nearest_train_distance: f64,
}

/// Immutable value copy of a gate, as stored in the twin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateSnapshot {
    /// Gate identifier.
    pub id: GateId,
    /// Current position.
    pub state: GateState,
    /// Nearest approaching train, if any.
    pub nearest_train_id: Option<TrainId>,
    /// Distance to that train in metres.
    pub nearest_train_distance: f64,
}

impl GateSnapshot {
    /// A CLOSED gate with no train in sight.
    #[must_use]
    pub fn closed(id: impl Into<GateId>) -> Self {
        Self {
            id: id.into(),
            state: GateState::Closed,
            nearest_train_id: None,
            nearest_train_distance: NO_TRAIN_DISTANCE_M,
        }
    }
}

/// A live level-crossing gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gate {
    id: GateId,
    state: GateState,
    nearest_train_id: Option<TrainId>,
    nearest_train_distance: f64,
    last_change: DateTime<Utc>,
    history: Vec<GateChange>,
}

impl Gate {
    /// Creates a CLOSED gate.
    #[must_use]
    pub fn new(id: impl Into<GateId>) -> Self {
        Self {
            id: id.into(),
            state: GateState::Closed,
            nearest_train_id: None,
            nearest_train_distance: NO_TRAIN_DISTANCE_M,
            last_change: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gate identifier.
    #[must_use]
    pub fn id(&self) -> &GateId {
        &self.id
    }

    /// Current position.
    #[must_use]
    pub fn state(&self) -> GateState {
        self.state
    }

    /// Nearest approaching train.
    #[must_use]
    pub fn nearest_train_id(&self) -> Option<&TrainId> {
        self.nearest_train_id.as_ref()
    }

    /// Distance to the nearest train in metres.
    #[must_use]
    pub fn nearest_train_distance(&self) -> f64 {
        self.nearest_train_distance
    }

    /// Time of the last movement (or creation).
    #[must_use]
    pub fn last_change(&self) -> DateTime<Utc> {
        self.last_change
    }

    /// Movement history, oldest first.
    #[must_use]
    pub fn history(&self) -> &[GateChange] {
        &self.history
    }

    /// Moves the gate. Refuses unless `verified` is set.
    pub fn change_state(&mut self, new_state: GateState, verified: bool) -> bool {
        if !verified {
            return false;
        }
        let now = Utc::now();
        self.history.push(GateChange {
            timestamp: now,
            old_state: self.state,
            new_state,
            nearest_train_distance: self.nearest_train_distance,
        });
        self.state = new_state;
        self.last_change = now;
        true
    }

    /// Records the nearest approaching train.
    pub fn update_nearest_train(&mut self, train_id: impl Into<TrainId>, distance: f64) {
        self.nearest_train_id = Some(train_id.into());
        self.nearest_train_distance = distance;
    }

    /// Value copy for the twin.
    #[must_use]
    pub fn snapshot(&self) -> GateSnapshot {
        GateSnapshot {
            id: self.id.clone(),
            state: self.state,
            nearest_train_id: self.nearest_train_id.clone(),
            nearest_train_distance: self.nearest_train_distance,
        }
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Gate({}, {}, nearest_train={:.0}m)",
            self.id, self.state, self.nearest_train_distance
        )
    }
}
