//! Platform track state machine.
//!
//! A track cycles `FREE -> RESERVED -> OCCUPIED -> CLEARING -> FREE`. Every
//! transition checks its source state first and leaves the track untouched
//! when the check fails, so a rejected call is always a no-op.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::id::{TrackId, TrainId};

/// Occupancy state of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackState {
    /// No train allocated.
    #[default]
    Free,
    /// Allocated to an approaching train.
    Reserved,
    /// The allocated train is standing on the track.
    Occupied,
    /// The train has left; the track is being cleared.
    Clearing,
}

impl TrackState {
    /// Canonical upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "FREE",
            Self::Reserved => "RESERVED",
            Self::Occupied => "OCCUPIED",
            Self::Clearing => "CLEARING",
        }
    }
}

impl fmt::Display for TrackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FREE" => Ok(Self::Free),
            "RESERVED" => Ok(Self::Reserved),
            "OCCUPIED" => Ok(Self::Occupied),
            "CLEARING" => Ok(Self::Clearing),
            _ => Err(ValidationError::UnknownState {
                kind: "track",
                value: s.to_string(),
            }),
        }
    }
}

/// One audit entry in a track's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackTransition {
    /// When the transition happened.
    pub timestamp: DateTime<Utc>,
    /// State entered.
    pub state: TrackState,
    /// Train involved in the transition.
    pub train_id: Option<TrainId>,
}

/// Immutable value copy of a track, as stored in the twin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSnapshot {
    /// Track identifier.
    pub id: TrackId,
    /// Occupancy state.
    pub state: TrackState,
    /// Train holding the track; set iff `state != Free`.
    pub allocated_to: Option<TrainId>,
    /// Expected arrival of the allocated train, in seconds.
    pub expected_arrival: Option<f64>,
    /// Minimum clearance time in seconds.
    pub clearance_time: u64,
}

impl TrackSnapshot {
    /// A free track with the given clearance time.
    #[must_use]
    pub fn free(id: impl Into<TrackId>, clearance_time: u64) -> Self {
        Self {
            id: id.into(),
            state: TrackState::Free,
            allocated_to: None,
            expected_arrival: None,
            clearance_time,
        }
    }

    /// Copy of this snapshot reserved for `train_id`.
    #[must_use]
    pub fn reserved_for(&self, train_id: TrainId, eta_seconds: f64) -> Self {
        Self {
            state: TrackState::Reserved,
            allocated_to: Some(train_id),
            expected_arrival: Some(eta_seconds),
            ..self.clone()
        }
    }

    /// Returns true if the allocation field agrees with the state.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.allocated_to.is_some() == (self.state != TrackState::Free)
    }
}

/// A live platform track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    id: TrackId,
    state: TrackState,
    allocated_to: Option<TrainId>,
    expected_arrival: Option<f64>,
    clearance_time: u64,
    last_state_change: DateTime<Utc>,
    history: Vec<TrackTransition>,
}

impl Track {
    /// Creates a free track.
    #[must_use]
    pub fn new(id: impl Into<TrackId>, clearance_time: u64) -> Self {
        Self {
            id: id.into(),
            state: TrackState::Free,
            allocated_to: None,
            expected_arrival: None,
            clearance_time,
            last_state_change: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Track identifier.
    #[must_use]
    pub fn id(&self) -> &TrackId {
        &self.id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TrackState {
        self.state
    }

    /// Train holding the track.
    #[must_use]
    pub fn allocated_to(&self) -> Option<&TrainId> {
        self.allocated_to.as_ref()
    }

    /// Expected arrival of the allocated train, in seconds.
    #[must_use]
    pub fn expected_arrival(&self) -> Option<f64> {
        self.expected_arrival
    }

    /// Minimum clearance time in seconds.
    #[must_use]
    pub fn clearance_time(&self) -> u64 {
        self.clearance_time
    }

    /// Time of the last successful transition (or creation).
    #[must_use]
    pub fn last_state_change(&self) -> DateTime<Utc> {
        self.last_state_change
    }

    /// Audit history, oldest first.
    #[must_use]
    pub fn history(&self) -> &[TrackTransition] {
        &self.history
    }

    /// Returns true if no train holds the track.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.state == TrackState::Free
    }

    /// `FREE -> RESERVED` for `train_id`.
    pub fn reserve(&mut self, train_id: impl Into<TrainId>, eta_seconds: f64) -> bool {
        if self.state != TrackState::Free {
            return false;
        }
        let train_id = train_id.into();
        self.state = TrackState::Reserved;
        self.allocated_to = Some(train_id.clone());
        self.expected_arrival = Some(eta_seconds);
        self.record(Some(train_id));
        true
    }

    /// `RESERVED -> OCCUPIED`, only for the train the track is reserved for.
    pub fn occupy(&mut self, train_id: &TrainId) -> bool {
        if self.state != TrackState::Reserved || self.allocated_to.as_ref() != Some(train_id) {
            return false;
        }
        self.state = TrackState::Occupied;
        self.record(Some(train_id.clone()));
        true
    }

    /// `OCCUPIED -> CLEARING`.
    pub fn start_clearing(&mut self) -> bool {
        if self.state != TrackState::Occupied {
            return false;
        }
        self.state = TrackState::Clearing;
        self.record(self.allocated_to.clone());
        true
    }

    /// `CLEARING -> FREE`; drops the allocation.
    pub fn clear(&mut self) -> bool {
        if self.state != TrackState::Clearing {
            return false;
        }
        let train_id = self.allocated_to.take();
        self.state = TrackState::Free;
        self.expected_arrival = None;
        self.record(train_id);
        true
    }

    /// Value copy for the twin.
    #[must_use]
    pub fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            id: self.id.clone(),
            state: self.state,
            allocated_to: self.allocated_to.clone(),
            expected_arrival: self.expected_arrival,
            clearance_time: self.clearance_time,
        }
    }

    fn record(&mut self, train_id: Option<TrainId>) {
        let now = Utc::now();
        self.last_state_change = now;
        self.history.push(TrackTransition {
            timestamp: now,
            state: self.state,
            train_id,
        });
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.allocated_to {
            Some(train) => write!(f, "Track({}, {}, train={train})", self.id, self.state),
            None => write!(f, "Track({}, {})", self.id, self.state),
        }
    }
}
