//! The station interlock.
//!
//! [`Interlock`] is the single context object an application builds at
//! start-up. It owns the safety rules, the verifier and its twin, the three
//! controllers and the audit log. Every command takes `&mut self`, so the
//! clone, check, apply and sync steps of one command can never interleave
//! with another. Callers that share an interlock across threads wrap the
//! whole value in one lock.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SafetyRules;
use crate::conflict::{Conflict, ConflictSummary};
use crate::controller::{
    CommandMode, CommandOutcome, CommandStatus, GateController, SignalController, TrackManager,
};
use crate::error::{InterlockError, RailResult, ValidationError};
use crate::events::{EventKind, EventLog, EventOutcome};
use crate::gate::GateSnapshot;
use crate::id::{GateId, SignalId, TrackId, TrainId};
use crate::signal::SignalSnapshot;
use crate::track::TrackSnapshot;
use crate::train::TrainSnapshot;
use crate::verifier::{DecisionRequest, SafetyVerifier, StateSync, Verdict, VerificationStats};

/// Serializable export of everything the interlock knows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSnapshot {
    /// Trains, in id order.
    pub trains: Vec<TrainSnapshot>,
    /// Tracks, in setup order.
    pub tracks: Vec<TrackSnapshot>,
    /// Signals, in id order.
    pub signals: Vec<SignalSnapshot>,
    /// Gates, in id order.
    pub gates: Vec<GateSnapshot>,
    /// Verification counters.
    pub verification: VerificationStats,
    /// Conflicts from the most recent sweep.
    pub conflicts: ConflictSummary,
}

/// Station interlock context.
#[derive(Debug)]
pub struct Interlock {
    rules: SafetyRules,
    verifier: SafetyVerifier,
    tracks: TrackManager,
    signals: SignalController,
    gates: GateController,
    trains: BTreeMap<TrainId, TrainSnapshot>,
    events: EventLog,
}

impl Interlock {
    /// Creates an empty interlock with an in-memory event log.
    pub fn new(rules: SafetyRules) -> RailResult<Self> {
        Self::with_event_log(rules, EventLog::new())
    }

    /// Creates an empty interlock that records into `events`.
    pub fn with_event_log(rules: SafetyRules, events: EventLog) -> RailResult<Self> {
        rules.validate()?;
        info!(
            danger_zone_m = rules.danger_zone_m,
            min_separation_s = rules.min_separation_s,
            "interlock created"
        );
        Ok(Self {
            rules,
            verifier: SafetyVerifier::new(rules),
            tracks: TrackManager::new(rules.min_clearance_s),
            signals: SignalController::new(),
            gates: GateController::new(),
            trains: BTreeMap::new(),
            events,
        })
    }

    /// Rules in force.
    #[must_use]
    pub fn rules(&self) -> &SafetyRules {
        &self.rules
    }

    // ----- setup -----

    /// Registers a FREE platform track.
    pub fn add_track(&mut self, id: impl Into<TrackId>) -> RailResult<()> {
        let id = id.into();
        if id.is_blank() {
            return Err(ValidationError::EmptyId { kind: "track" }.into());
        }
        let snapshot = self.tracks.add_track(id)?.snapshot();
        self.verifier.sync_state(StateSync::new().tracks([snapshot]));
        Ok(())
    }

    /// Registers a RED signal protecting an existing track.
    pub fn add_signal(&mut self, id: impl Into<SignalId>, track_id: impl Into<TrackId>) -> RailResult<()> {
        let id = id.into();
        let track_id = track_id.into();
        if id.is_blank() {
            return Err(ValidationError::EmptyId { kind: "signal" }.into());
        }
        if self.tracks.get_track(track_id.as_str()).is_none() {
            return Err(InterlockError::UnboundSignal {
                signal_id: id.to_string(),
                track_id: track_id.to_string(),
            }
            .into());
        }
        let snapshot = self.signals.add_signal(id, track_id)?.snapshot();
        self.verifier.sync_state(StateSync::new().signals([snapshot]));
        Ok(())
    }

    /// Registers a CLOSED level-crossing gate.
    pub fn add_gate(&mut self, id: impl Into<GateId>) -> RailResult<()> {
        let id = id.into();
        if id.is_blank() {
            return Err(ValidationError::EmptyId { kind: "gate" }.into());
        }
        let snapshot = self.gates.add_gate(id)?.snapshot();
        self.verifier.sync_state(StateSync::new().gates([snapshot]));
        Ok(())
    }

    /// Inserts or replaces a train as reported by the simulation layer.
    ///
    /// The speed history is cut to the rules' `speed_history_len`, keeping
    /// the newest samples.
    pub fn upsert_train(&mut self, mut train: TrainSnapshot) {
        train.truncate_speed_history(self.rules.speed_history_len);
        debug!(train = %train.id, position_km = train.position_km, eta = ?train.eta_seconds, "train update");
        self.verifier
            .sync_state(StateSync::new().trains([train.clone()]));
        self.trains.insert(train.id.clone(), train);
    }

    // ----- track commands -----

    /// Reserves the first FREE track, in setup order, that the verifier
    /// accepts for `train_id`.
    ///
    /// Unlike [`TrackManager::allocate_track`] the candidates go through
    /// [`SafetyVerifier::verify_first_allocation`] first, so a train blocked
    /// by timing is rejected once rather than once per track. When the train
    /// is known its recorded ETA is updated to `eta_seconds`.
    pub fn allocate_track(&mut self, train_id: impl Into<TrainId>, eta_seconds: f64) -> Option<TrackId> {
        let train_id = train_id.into();
        let candidates: Vec<TrackId> = self.tracks.free_track_ids().cloned().collect();

        let reason = match self
            .verifier
            .verify_first_allocation(&train_id, &candidates, eta_seconds)
        {
            Ok(track_id) => {
                let track_id = track_id.clone();
                if self.tracks.reserve(track_id.as_str(), &train_id, eta_seconds) {
                    if let Some(train) = self.trains.get_mut(&train_id) {
                        train.eta_seconds = Some(eta_seconds);
                    }
                    self.sync();
                    info!(train = %train_id, track = %track_id, eta_seconds, "track allocated");
                    self.record(
                        EventKind::Track,
                        track_id.as_str(),
                        "ALLOCATE",
                        EventOutcome::Success,
                        format!("Allocated to {train_id}"),
                    );
                    return Some(track_id);
                }
                format!("Track {track_id} could not be reserved")
            }
            Err(verdict) => verdict.reason,
        };

        warn!(train = %train_id, %reason, "no track allocated");
        self.record(
            EventKind::Train,
            train_id.as_str(),
            "ALLOCATE",
            EventOutcome::Blocked,
            reason,
        );
        None
    }

    /// `RESERVED -> OCCUPIED` on the track held by `train_id`.
    pub fn occupy_track(&mut self, train_id: &str) -> bool {
        let train_id = TrainId::from(train_id);
        let Some(track_id) = self
            .tracks
            .get_track_for_train(train_id.as_str())
            .map(|t| t.id().clone())
        else {
            self.record(
                EventKind::Train,
                train_id.as_str(),
                "OCCUPY",
                EventOutcome::Failure,
                "No track allocated",
            );
            return false;
        };
        let ok = self.tracks.occupy(track_id.as_str(), &train_id);
        self.finish_track_command(&track_id, "OCCUPY", ok, format!("Train {train_id}"))
    }

    /// `OCCUPIED -> CLEARING` on `track_id`.
    pub fn start_clearing_track(&mut self, track_id: &str) -> bool {
        let ok = self.tracks.start_clearing(track_id);
        self.finish_track_command(&TrackId::from(track_id), "START_CLEARING", ok, String::new())
    }

    /// `CLEARING -> FREE` on `track_id`.
    pub fn clear_track(&mut self, track_id: &str) -> bool {
        let ok = self.tracks.clear(track_id);
        self.finish_track_command(&TrackId::from(track_id), "CLEAR", ok, String::new())
    }

    fn finish_track_command(&mut self, track_id: &TrackId, action: &str, ok: bool, details: String) -> bool {
        if ok {
            self.sync();
            info!(track = %track_id, action, "track updated");
            self.record(EventKind::Track, track_id.as_str(), action, EventOutcome::Success, details);
        } else {
            let state = self
                .tracks
                .get_track(track_id.as_str())
                .map_or("unknown", |t| t.state().as_str());
            self.record(
                EventKind::Track,
                track_id.as_str(),
                action,
                EventOutcome::Failure,
                format!("Illegal from {state}"),
            );
        }
        ok
    }

    // ----- signal and gate commands -----

    /// Changes a signal through [`SignalController::change_signal`].
    pub fn change_signal(&mut self, signal_id: &str, new_state: &str, mode: CommandMode) -> CommandOutcome {
        let outcome = self
            .signals
            .change_signal(&mut self.verifier, signal_id, new_state, mode);
        self.finish_command(EventKind::Signal, signal_id, new_state, &outcome);
        outcome
    }

    /// Moves a gate through [`GateController::change_gate`].
    pub fn change_gate(&mut self, gate_id: &str, new_state: &str, mode: CommandMode) -> CommandOutcome {
        let outcome = self
            .gates
            .change_gate(&mut self.verifier, gate_id, new_state, mode);
        self.finish_command(EventKind::Gate, gate_id, new_state, &outcome);
        outcome
    }

    /// Records the nearest approaching train for a gate.
    pub fn update_train_proximity(&mut self, gate_id: &str, train_id: &str, distance: f64) -> bool {
        let ok = self
            .gates
            .update_train_proximity(&mut self.verifier, gate_id, train_id, distance);
        if ok {
            debug!(gate = gate_id, train = train_id, distance, "gate proximity");
        } else {
            self.record(
                EventKind::Gate,
                gate_id,
                "PROXIMITY",
                EventOutcome::Failure,
                format!("Gate {gate_id} not found"),
            );
        }
        ok
    }

    /// Starts closing `gate_id` if a train is inside the danger zone.
    pub fn auto_close_gate(&mut self, gate_id: &str) -> CommandOutcome {
        let threshold = self.rules.danger_zone_m;
        let outcome = self
            .gates
            .auto_close_if_needed(&mut self.verifier, gate_id, threshold);
        if outcome.status != CommandStatus::NoAction {
            self.finish_command(EventKind::Gate, gate_id, "AUTO_CLOSE", &outcome);
        }
        outcome
    }

    fn finish_command(&mut self, kind: EventKind, entity_id: &str, action: &str, outcome: &CommandOutcome) {
        let result = match outcome.status {
            CommandStatus::Verified | CommandStatus::Override | CommandStatus::NoAction => {
                EventOutcome::Success
            }
            CommandStatus::Blocked => EventOutcome::Blocked,
            CommandStatus::Rejected => EventOutcome::Failure,
        };
        if outcome.applied() {
            self.sync();
        }
        self.record(kind, entity_id, action, result, outcome.message.clone());
    }

    // ----- verification -----

    /// Verifies a loosely typed decision without applying it.
    pub fn verify(&mut self, request: &DecisionRequest) -> Verdict {
        let verdict = self.verifier.verify_request(request);
        let result = if verdict.is_safe() {
            EventOutcome::Success
        } else {
            EventOutcome::Blocked
        };
        self.record(
            EventKind::Verification,
            request.decision_type.as_str(),
            "VERIFY",
            result,
            verdict.reason.clone(),
        );
        verdict
    }

    /// Pushes every live entity into the twin.
    pub fn sync(&mut self) {
        self.verifier.sync_state(
            StateSync::new()
                .trains(self.trains.values().cloned())
                .tracks(self.tracks.get_all_states())
                .signals(self.signals.get_all_states())
                .gates(self.gates.get_all_states()),
        );
    }

    /// Sweeps the live twin for conflicts.
    pub fn monitor(&mut self) -> Vec<Conflict> {
        let conflicts = self.verifier.monitor();
        for conflict in &conflicts {
            warn!(severity = %conflict.severity, message = %conflict.message, "live conflict");
        }
        conflicts
    }

    // ----- queries -----

    /// Serializable export of the live station.
    #[must_use]
    pub fn get_all_states(&self) -> StationSnapshot {
        StationSnapshot {
            trains: self.trains.values().cloned().collect(),
            tracks: self.tracks.get_all_states(),
            signals: self.signals.get_all_states(),
            gates: self.gates.get_all_states(),
            verification: self.verifier.get_verification_stats(),
            conflicts: self.verifier.conflict_summary(),
        }
    }

    /// Number of FREE platform tracks.
    #[must_use]
    pub fn get_free_track_count(&self) -> usize {
        self.tracks.get_free_track_count()
    }

    /// Counts from the verification log.
    #[must_use]
    pub fn get_verification_stats(&self) -> VerificationStats {
        self.verifier.get_verification_stats()
    }

    /// The audit log.
    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// The verifier and its twin.
    #[must_use]
    pub fn verifier(&self) -> &SafetyVerifier {
        &self.verifier
    }

    /// The track manager.
    #[must_use]
    pub fn tracks(&self) -> &TrackManager {
        &self.tracks
    }

    /// The signal controller.
    #[must_use]
    pub fn signals(&self) -> &SignalController {
        &self.signals
    }

    /// The gate controller.
    #[must_use]
    pub fn gates(&self) -> &GateController {
        &self.gates
    }

    /// Last snapshot reported for `train_id`.
    #[must_use]
    pub fn get_train(&self, train_id: &str) -> Option<&TrainSnapshot> {
        self.trains.get(train_id)
    }

    fn record(
        &mut self,
        kind: EventKind,
        entity_id: &str,
        action: &str,
        result: EventOutcome,
        details: impl Into<String>,
    ) {
        // A failing sink must not undo a committed command; the in-memory
        // entry is kept either way.
        if let Err(err) = self.events.log_event(kind, entity_id, action, result, details) {
            warn!(error = %err, "event sink write failed");
        }
    }
}

impl fmt::Display for Interlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Interlock(tracks={}, signals={}, gates={}, trains={}, events={})",
            self.tracks.len(),
            self.signals.len(),
            self.gates.len(),
            self.trains.len(),
            self.events.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::GateState;
    use crate::signal::SignalState;
    use crate::track::TrackState;

    fn station() -> Interlock {
        let mut il = Interlock::new(SafetyRules::default()).unwrap();
        for p in ["P1", "P2"] {
            il.add_track(p).unwrap();
        }
        il.add_signal("S1", "P1").unwrap();
        il.add_signal("S2", "P2").unwrap();
        il.add_gate("G1").unwrap();
        il
    }

    #[test]
    fn test_setup_is_mirrored_in_twin() {
        let il = station();
        let summary = il.verifier().twin().get_summary();
        assert_eq!(summary.tracks, 2);
        assert_eq!(summary.signals, 2);
        assert_eq!(summary.gates, 1);
    }

    #[test]
    fn test_setup_errors() {
        let mut il = station();
        let err = il.add_signal("S3", "P9").unwrap_err();
        assert!(err.is_interlock());
        assert!(il.add_track("P1").unwrap_err().is_interlock());
        assert!(il.add_gate("  ").unwrap_err().is_validation());
    }

    #[test]
    fn test_invalid_rules_rejected() {
        let rules = SafetyRules {
            danger_zone_m: -1.0,
            ..SafetyRules::default()
        };
        assert!(Interlock::new(rules).unwrap_err().is_validation());
    }

    #[test]
    fn test_allocation_is_verified_and_synced() {
        let mut il = station();
        assert_eq!(il.allocate_track("T001", 180.0), Some(TrackId::from("P1")));
        let twin_p1 = il.verifier().twin().get_track("P1").unwrap();
        assert_eq!(twin_p1.state, TrackState::Reserved);
        assert_eq!(il.get_verification_stats().safe, 1);
        assert_eq!(il.events().recent(1)[0].action, "ALLOCATE");
    }

    #[test]
    fn test_allocation_blocked_by_timing() {
        let mut il = station();
        il.upsert_train(TrainSnapshot::new("T001", 3.0, 60.0).with_eta(200.0));
        il.upsert_train(TrainSnapshot::new("T002", 5.0, 60.0));

        assert_eq!(il.allocate_track("T002", 250.0), None);
        assert_eq!(il.get_free_track_count(), 2);
        assert_eq!(il.get_verification_stats().total_verifications, 1);
        let last = &il.events().recent(1)[0];
        assert_eq!(last.result, EventOutcome::Blocked);
        assert!(last.details.contains("Timing conflict"));

        assert!(il.allocate_track("T002", 400.0).is_some());
        assert_eq!(il.get_train("T002").unwrap().eta_seconds, Some(400.0));
    }

    #[test]
    fn test_allocation_separates_trains_without_snapshots() {
        let mut il = station();
        assert_eq!(il.allocate_track("T001", 180.0), Some(TrackId::from("P1")));
        assert!(il.get_train("T001").is_none());

        assert_eq!(il.allocate_track("T002", 185.0), None);
        assert_eq!(il.get_free_track_count(), 1);
        assert_eq!(il.allocate_track("T002", 300.0), Some(TrackId::from("P2")));
    }

    #[test]
    fn test_allocation_rejects_non_finite_eta() {
        let mut il = station();
        assert_eq!(il.allocate_track("T001", f64::NAN), None);
        assert_eq!(il.get_free_track_count(), 2);
        assert!(il.verifier().twin().get_all_tracks().all(|t| t.expected_arrival.is_none()));
        let last = &il.events().recent(1)[0];
        assert!(last.details.starts_with("Invalid ETA"));
    }

    #[test]
    fn test_upsert_train_applies_speed_history_bound() {
        let rules = SafetyRules {
            speed_history_len: 2,
            ..SafetyRules::default()
        };
        let mut il = Interlock::new(rules).unwrap();
        let mut train = TrainSnapshot::new("T001", 3.0, 50.0);
        for speed in [55.0, 60.0, 65.0] {
            train.push_speed(speed);
        }
        assert_eq!(train.speed_history.len(), 4);

        il.upsert_train(train);
        let stored = il.get_train("T001").unwrap();
        assert_eq!(stored.speed_history.len(), 2);
        assert_eq!(stored.speed_history.back(), Some(&65.0));
        assert_eq!(il.verifier().twin().get_train("T001").unwrap().speed_history.len(), 2);
    }

    #[test]
    fn test_track_lifecycle_commands() {
        let mut il = station();
        let p1 = il.allocate_track("T001", 180.0).unwrap();
        assert!(!il.occupy_track("T002"));
        assert!(il.occupy_track("T001"));
        assert!(!il.clear_track(p1.as_str()));
        assert!(il.start_clearing_track(p1.as_str()));
        assert!(il.clear_track(p1.as_str()));
        assert_eq!(il.verifier().twin().get_track("P1").unwrap().state, TrackState::Free);
        assert_eq!(il.get_free_track_count(), 2);
    }

    #[test]
    fn test_signal_event_outcomes() {
        let mut il = station();
        let blocked = il.change_signal("S1", "GREEN", CommandMode::Verified);
        assert_eq!(blocked.status, CommandStatus::Blocked);
        assert_eq!(il.events().recent(1)[0].result, EventOutcome::Blocked);

        let rejected = il.change_signal("S1", "TEAL", CommandMode::Verified);
        assert_eq!(rejected.status, CommandStatus::Rejected);
        assert_eq!(il.events().recent(1)[0].result, EventOutcome::Failure);

        il.allocate_track("T001", 180.0);
        let ok = il.change_signal("S1", "GREEN", CommandMode::Verified);
        assert!(ok.applied());
        assert_eq!(il.signals().get_signal("S1").unwrap().state(), SignalState::Green);
    }

    #[test]
    fn test_auto_close_gate() {
        let mut il = station();
        il.update_train_proximity("G1", "T001", 3000.0);
        assert!(il.change_gate("G1", "OPEN", CommandMode::Verified).applied());
        let before = il.events().len();

        let idle = il.auto_close_gate("G1");
        assert_eq!(idle.status, CommandStatus::NoAction);
        assert_eq!(il.events().len(), before);

        il.update_train_proximity("G1", "T001", 350.0);
        assert!(il.auto_close_gate("G1").applied());
        assert_eq!(il.gates().get_gate("G1").unwrap().state(), GateState::Closing);
        assert_eq!(il.verifier().twin().get_gate("G1").unwrap().state, GateState::Closing);
    }

    #[test]
    fn test_monitor_finds_override_conflict() {
        let mut il = station();
        il.change_signal("S2", "GREEN", CommandMode::Override);
        let conflicts = il.monitor();
        assert_eq!(conflicts.len(), 1);
        assert!(il.get_all_states().conflicts.has_conflicts);
    }

    #[test]
    fn test_verify_request_is_logged_as_event() {
        let mut il = station();
        let request = DecisionRequest {
            decision_type: "GATE_OPERATION".to_string(),
            params: serde_json::json!({ "gate_id": "G1", "new_state": "CLOSED", "nearest_train_distance": 10.0 }),
        };
        assert!(il.verify(&request).is_safe());
        assert_eq!(il.events().by_kind(EventKind::Verification).count(), 1);
        assert_eq!(il.gates().get_gate("G1").unwrap().state(), GateState::Closed);
    }

    #[test]
    fn test_station_snapshot_serializes() {
        let mut il = station();
        il.upsert_train(TrainSnapshot::new("T001", 2.0, 40.0));
        let json = serde_json::to_value(il.get_all_states()).unwrap();
        assert_eq!(json["tracks"].as_array().unwrap().len(), 2);
        assert_eq!(json["trains"][0]["id"], "T001");
        assert_eq!(json["signals"][0]["state"], "RED");
    }
}
