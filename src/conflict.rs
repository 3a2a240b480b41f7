//! Conflict detection over a twin snapshot.
//!
//! Conflicts are explicit records, not errors. The detector's checks are
//! pure functions of a [`TwinState`]; the only state the detector keeps is
//! the result of the last full sweep, so a monitor can ask for a summary
//! without re-running it.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::DEFAULT_MIN_SEPARATION_S;
use crate::id::{SignalId, TrackId, TrainId};
use crate::signal::SignalState;
use crate::track::TrackState;
use crate::twin::TwinState;

/// Unique identifier for a detected conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictId(Uuid);

impl ConflictId {
    /// Creates a new random conflict ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How bad a conflict is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Unsafe but not immediately dangerous.
    High,
    /// Immediate danger to a train.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// The kind of inconsistency found.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictType {
    /// More than one claim on the same track.
    TrackConflict {
        /// The contested track.
        track_id: TrackId,
        /// Trains claiming it.
        trains: Vec<TrainId>,
    },

    /// A signal aspect that disagrees with its track's state.
    SignalTrackInconsistency {
        /// The signal.
        signal_id: SignalId,
        /// The track it protects.
        track_id: TrackId,
        /// Aspect shown.
        signal_state: SignalState,
        /// Track state.
        track_state: TrackState,
    },
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrackConflict { track_id, .. } => write!(f, "track_conflict({track_id})"),
            Self::SignalTrackInconsistency {
                signal_id,
                track_id,
                ..
            } => write!(f, "signal_track_inconsistency({signal_id}->{track_id})"),
        }
    }
}

/// A detected conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    /// Unique identifier.
    pub id: ConflictId,
    /// What was found.
    pub conflict_type: ConflictType,
    /// How bad it is.
    pub severity: Severity,
    /// Operator-facing description.
    pub message: String,
    /// When it was detected.
    pub detected_at: DateTime<Utc>,
}

impl Conflict {
    /// Creates a conflict stamped with the current time.
    #[must_use]
    pub fn new(conflict_type: ConflictType, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            id: ConflictId::new(),
            conflict_type,
            severity,
            message: message.into(),
            detected_at: Utc::now(),
        }
    }

    /// Returns true for CRITICAL conflicts.
    #[must_use]
    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

impl PartialEq for Conflict {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Conflict {}

/// Counts from the last full sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConflictSummary {
    /// All conflicts.
    pub total: usize,
    /// CRITICAL conflicts.
    pub critical: usize,
    /// HIGH conflicts.
    pub high: usize,
    /// `total > 0`.
    pub has_conflicts: bool,
}

/// Runs the safety checks over a twin.
#[derive(Debug, Default, Clone)]
pub struct ConflictDetector {
    detected: Vec<Conflict>,
}

impl ConflictDetector {
    /// Creates a detector with an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flags any track claimed more than once.
    ///
    /// The twin keys tracks by id, so this can only fire if that invariant
    /// is broken.
    #[must_use]
    pub fn check_track_conflicts(&self, state: &TwinState) -> Vec<Conflict> {
        let mut claims: HashMap<&TrackId, &TrainId> = HashMap::new();
        let mut conflicts = Vec::new();

        for track in state.get_all_tracks() {
            let Some(train) = track.allocated_to.as_ref() else {
                continue;
            };
            if let Some(first) = claims.get(&track.id) {
                conflicts.push(Conflict::new(
                    ConflictType::TrackConflict {
                        track_id: track.id.clone(),
                        trains: vec![(*first).clone(), train.clone()],
                    },
                    Severity::Critical,
                    format!("Multiple trains allocated to track {}", track.id),
                ));
            } else {
                claims.insert(&track.id, train);
            }
        }

        conflicts
    }

    /// True if `target_track` exists and is not FREE.
    #[must_use]
    pub fn check_route_conflicts(
        &self,
        state: &TwinState,
        _train_id: &TrainId,
        target_track: &TrackId,
    ) -> bool {
        state
            .get_track(target_track.as_str())
            .is_some_and(|t| t.state != TrackState::Free)
    }

    /// True if another train's arrival is strictly closer than
    /// `min_separation` seconds to `eta_seconds`.
    ///
    /// Arrivals come from train snapshots and from the expected arrival of
    /// every track allocated to another train, so a train the twin has no
    /// snapshot for still counts once it holds a track.
    #[must_use]
    pub fn check_timing_conflicts(
        &self,
        state: &TwinState,
        train_id: &TrainId,
        eta_seconds: f64,
        min_separation: f64,
    ) -> bool {
        let from_trains = state
            .get_all_trains()
            .filter(|t| &t.id != train_id)
            .filter_map(|t| t.eta_seconds);
        let from_tracks = state
            .get_all_tracks()
            .filter(|t| t.allocated_to.as_ref().is_some_and(|a| a != train_id))
            .filter_map(|t| t.expected_arrival);

        from_trains
            .chain(from_tracks)
            .any(|other| (eta_seconds - other).abs() < min_separation)
    }

    /// [`check_timing_conflicts`](Self::check_timing_conflicts) with the default 120 s separation.
    #[must_use]
    pub fn check_timing_conflicts_default(
        &self,
        state: &TwinState,
        train_id: &TrainId,
        eta_seconds: f64,
    ) -> bool {
        self.check_timing_conflicts(state, train_id, eta_seconds, DEFAULT_MIN_SEPARATION_S)
    }

    /// Signal aspects must agree with their track: RED over an OCCUPIED
    /// track, GREEN only over a RESERVED one.
    #[must_use]
    pub fn check_signal_track_consistency(&self, state: &TwinState) -> Vec<Conflict> {
        let mut conflicts = Vec::new();

        for signal in state.get_all_signals() {
            let Some(track) = state.get_track(signal.track_id.as_str()) else {
                continue;
            };

            if track.state == TrackState::Occupied && signal.state != SignalState::Red {
                conflicts.push(Conflict::new(
                    ConflictType::SignalTrackInconsistency {
                        signal_id: signal.id.clone(),
                        track_id: track.id.clone(),
                        signal_state: signal.state,
                        track_state: track.state,
                    },
                    Severity::Critical,
                    format!(
                        "Signal {} is {} but track {} is {}",
                        signal.id, signal.state, track.id, track.state
                    ),
                ));
            }

            if signal.state == SignalState::Green && track.state != TrackState::Reserved {
                conflicts.push(Conflict::new(
                    ConflictType::SignalTrackInconsistency {
                        signal_id: signal.id.clone(),
                        track_id: track.id.clone(),
                        signal_state: signal.state,
                        track_state: track.state,
                    },
                    Severity::High,
                    format!(
                        "Signal {} is GREEN but track {} is not RESERVED",
                        signal.id, track.id
                    ),
                ));
            }
        }

        conflicts
    }

    /// Runs every state-wide check and caches the result.
    pub fn detect_all_conflicts(&mut self, state: &TwinState) -> Vec<Conflict> {
        let mut all = self.check_track_conflicts(state);
        all.extend(self.check_signal_track_consistency(state));
        self.detected.clone_from(&all);
        all
    }

    /// Conflicts found by the last sweep.
    #[must_use]
    pub fn last_detected(&self) -> &[Conflict] {
        &self.detected
    }

    /// Counts from the last sweep.
    #[must_use]
    pub fn get_conflict_summary(&self) -> ConflictSummary {
        let critical = self.detected.iter().filter(|c| c.severity == Severity::Critical).count();
        let high = self.detected.iter().filter(|c| c.severity == Severity::High).count();
        ConflictSummary {
            total: self.detected.len(),
            critical,
            high,
            has_conflicts: !self.detected.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::SignalSnapshot;
    use crate::track::TrackSnapshot;
    use crate::train::TrainSnapshot;

    fn twin_with(track_state: TrackState, signal_state: SignalState) -> TwinState {
        let mut twin = TwinState::new();
        let mut track = TrackSnapshot::free("P1", 120);
        if track_state != TrackState::Free {
            track = track.reserved_for(TrainId::from("T001"), 180.0);
            track.state = track_state;
        }
        twin.update_track(track);
        twin.update_signal(SignalSnapshot::red("S1", "P1").with_state(signal_state));
        twin
    }

    #[test]
    fn test_consistent_twin_has_no_conflicts() {
        let mut detector = ConflictDetector::new();
        let twin = twin_with(TrackState::Reserved, SignalState::Green);
        assert!(detector.detect_all_conflicts(&twin).is_empty());
        assert!(!detector.get_conflict_summary().has_conflicts);
    }

    #[test]
    fn test_occupied_track_with_green_signal() {
        let mut detector = ConflictDetector::new();
        let twin = twin_with(TrackState::Occupied, SignalState::Green);
        let conflicts = detector.detect_all_conflicts(&twin);

        // Not RED over OCCUPIED, and GREEN over not-RESERVED.
        assert_eq!(conflicts.len(), 2);
        let summary = detector.get_conflict_summary();
        assert_eq!(summary.critical, 1);
        assert_eq!(summary.high, 1);
        assert!(summary.has_conflicts);
    }

    #[test]
    fn test_occupied_track_with_yellow_is_critical_only() {
        let detector = ConflictDetector::new();
        let twin = twin_with(TrackState::Occupied, SignalState::Yellow);
        let conflicts = detector.check_signal_track_consistency(&twin);
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].is_critical());
    }

    #[test]
    fn test_green_over_free_track_is_high() {
        let detector = ConflictDetector::new();
        let twin = twin_with(TrackState::Free, SignalState::Green);
        let conflicts = detector.check_signal_track_consistency(&twin);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].severity, Severity::High);
        assert!(conflicts[0].message.contains("not RESERVED"));
    }

    #[test]
    fn test_signal_with_unknown_track_is_skipped() {
        let mut twin = TwinState::new();
        twin.update_signal(SignalSnapshot::red("S9", "P9").with_state(SignalState::Green));
        assert!(ConflictDetector::new().check_signal_track_consistency(&twin).is_empty());
    }

    #[test]
    fn test_track_conflicts_absent_for_keyed_twin() {
        let twin = twin_with(TrackState::Reserved, SignalState::Red);
        assert!(ConflictDetector::new().check_track_conflicts(&twin).is_empty());
    }

    #[test]
    fn test_route_conflict() {
        let detector = ConflictDetector::new();
        let train = TrainId::from("T002");
        let free = twin_with(TrackState::Free, SignalState::Red);
        let held = twin_with(TrackState::Reserved, SignalState::Red);

        assert!(!detector.check_route_conflicts(&free, &train, &TrackId::from("P1")));
        assert!(detector.check_route_conflicts(&held, &train, &TrackId::from("P1")));
        assert!(!detector.check_route_conflicts(&held, &train, &TrackId::from("P9")));
    }

    #[test]
    fn test_timing_conflict_window() {
        let detector = ConflictDetector::new();
        let mut twin = TwinState::new();
        twin.update_train(TrainSnapshot::new("T001", 2.0, 60.0).with_eta(300.0));
        twin.update_train(TrainSnapshot::new("T003", 9.0, 60.0));

        let me = TrainId::from("T002");
        assert!(detector.check_timing_conflicts_default(&twin, &me, 200.0));
        assert!(detector.check_timing_conflicts_default(&twin, &me, 419.0));
        assert!(!detector.check_timing_conflicts_default(&twin, &me, 420.0));
        assert!(!detector.check_timing_conflicts_default(&twin, &me, 100.0));

        // A train never conflicts with itself.
        assert!(!detector.check_timing_conflicts_default(&twin, &TrainId::from("T001"), 300.0));
    }

    #[test]
    fn test_timing_conflict_reads_track_arrivals() {
        let detector = ConflictDetector::new();
        let mut twin = TwinState::new();
        twin.update_track(TrackSnapshot::free("P1", 120).reserved_for(TrainId::from("T001"), 180.0));
        twin.update_track(TrackSnapshot::free("P2", 120));

        // T001 has no train snapshot; its track still carries the arrival.
        assert!(twin.get_train("T001").is_none());
        assert!(detector.check_timing_conflicts_default(&twin, &TrainId::from("T002"), 185.0));
        assert!(!detector.check_timing_conflicts_default(&twin, &TrainId::from("T002"), 300.0));
        assert!(!detector.check_timing_conflicts_default(&twin, &TrainId::from("T001"), 185.0));
    }

    #[test]
    fn test_summary_reflects_last_sweep_only() {
        let mut detector = ConflictDetector::new();
        detector.detect_all_conflicts(&twin_with(TrackState::Occupied, SignalState::Green));
        assert_eq!(detector.get_conflict_summary().total, 2);

        detector.detect_all_conflicts(&twin_with(TrackState::Reserved, SignalState::Red));
        assert_eq!(detector.get_conflict_summary(), ConflictSummary::default());
    }

    #[test]
    fn test_conflict_serialization() {
        let twin = twin_with(TrackState::Free, SignalState::Green);
        let conflict = ConflictDetector::new()
            .check_signal_track_consistency(&twin)
            .remove(0);
        let json = serde_json::to_value(&conflict).unwrap();
        assert_eq!(json["conflict_type"]["type"], "SIGNAL_TRACK_INCONSISTENCY");
        assert_eq!(json["severity"], "HIGH");
    }
}
