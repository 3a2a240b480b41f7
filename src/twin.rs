//! Digital twin of the station.
//!
//! `TwinState` mirrors every train, track, signal and gate as an owned value
//! snapshot keyed by id. Nothing in the twin borrows from the live side, so
//! `clone()` is a plain copy of four maps and edits to a clone are never
//! visible through the original.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gate::GateSnapshot;
use crate::id::{GateId, SignalId, TrackId, TrainId};
use crate::signal::SignalSnapshot;
use crate::track::TrackSnapshot;
use crate::train::TrainSnapshot;

/// Counts and freshness of a twin, for observability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwinSummary {
    /// Number of trains mirrored.
    pub trains: usize,
    /// Number of tracks mirrored.
    pub tracks: usize,
    /// Number of signals mirrored.
    pub signals: usize,
    /// Number of gates mirrored.
    pub gates: usize,
    /// Time of the most recent update.
    pub last_update: DateTime<Utc>,
}

/// In-memory mirror of the station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwinState {
    trains: BTreeMap<TrainId, TrainSnapshot>,
    tracks: BTreeMap<TrackId, TrackSnapshot>,
    signals: BTreeMap<SignalId, SignalSnapshot>,
    gates: BTreeMap<GateId, GateSnapshot>,
    last_update: DateTime<Utc>,
}

impl Default for TwinState {
    fn default() -> Self {
        Self::new()
    }
}

impl TwinState {
    /// Creates an empty twin.
    #[must_use]
    pub fn new() -> Self {
        Self {
            trains: BTreeMap::new(),
            tracks: BTreeMap::new(),
            signals: BTreeMap::new(),
            gates: BTreeMap::new(),
            last_update: Utc::now(),
        }
    }

    /// Replaces the train entry keyed by `train.id`.
    pub fn update_train(&mut self, train: TrainSnapshot) {
        self.trains.insert(train.id.clone(), train);
        self.touch();
    }

    /// Replaces the track entry keyed by `track.id`.
    pub fn update_track(&mut self, track: TrackSnapshot) {
        self.tracks.insert(track.id.clone(), track);
        self.touch();
    }

    /// Replaces the signal entry keyed by `signal.id`.
    pub fn update_signal(&mut self, signal: SignalSnapshot) {
        self.signals.insert(signal.id.clone(), signal);
        self.touch();
    }

    /// Replaces the gate entry keyed by `gate.id`.
    pub fn update_gate(&mut self, gate: GateSnapshot) {
        self.gates.insert(gate.id.clone(), gate);
        self.touch();
    }

    /// Train snapshot by id.
    #[must_use]
    pub fn get_train(&self, id: &str) -> Option<&TrainSnapshot> {
        self.trains.get(id)
    }

    /// Track snapshot by id.
    #[must_use]
    pub fn get_track(&self, id: &str) -> Option<&TrackSnapshot> {
        self.tracks.get(id)
    }

    /// Signal snapshot by id.
    #[must_use]
    pub fn get_signal(&self, id: &str) -> Option<&SignalSnapshot> {
        self.signals.get(id)
    }

    /// Gate snapshot by id.
    #[must_use]
    pub fn get_gate(&self, id: &str) -> Option<&GateSnapshot> {
        self.gates.get(id)
    }

    /// All trains in id order.
    pub fn get_all_trains(&self) -> impl Iterator<Item = &TrainSnapshot> + '_ {
        self.trains.values()
    }

    /// All tracks in id order.
    pub fn get_all_tracks(&self) -> impl Iterator<Item = &TrackSnapshot> + '_ {
        self.tracks.values()
    }

    /// All signals in id order.
    pub fn get_all_signals(&self) -> impl Iterator<Item = &SignalSnapshot> + '_ {
        self.signals.values()
    }

    /// All gates in id order.
    pub fn get_all_gates(&self) -> impl Iterator<Item = &GateSnapshot> + '_ {
        self.gates.values()
    }

    /// Time of the most recent update.
    #[must_use]
    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    /// Counts and freshness.
    #[must_use]
    pub fn get_summary(&self) -> TwinSummary {
        TwinSummary {
            trains: self.trains.len(),
            tracks: self.tracks.len(),
            signals: self.signals.len(),
            gates: self.gates.len(),
            last_update: self.last_update,
        }
    }

    fn touch(&mut self) {
        self.last_update = Utc::now();
    }
}
