//! Verify-then-commit safety verifier.
//!
//! Every proposed decision is simulated against a disposable clone of the
//! twin:
//!
//! 1. clone the twin,
//! 2. check the decision's preconditions on the clone,
//! 3. apply the change to the clone,
//! 4. sweep the clone for conflicts,
//! 5. return SAFE or UNSAFE and append the verdict to the log.
//!
//! The live twin is never touched by verification; it only changes through
//! [`SafetyVerifier::sync_state`]. An unsafe decision is an ordinary return
//! value, never an error.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::SafetyRules;
use crate::conflict::{ConflictDetector, ConflictSummary};
use crate::gate::{GateSnapshot, GateState};
use crate::id::{GateId, SignalId, TrackId, TrainId};
use crate::rules;
use crate::signal::{SignalSnapshot, SignalState};
use crate::track::{TrackSnapshot, TrackState};
use crate::train::TrainSnapshot;
use crate::twin::TwinState;

/// Outcome of a verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationResult {
    /// The change may be committed.
    Safe,
    /// The change must not be committed.
    Unsafe,
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Safe => write!(f, "SAFE"),
            Self::Unsafe => write!(f, "UNSAFE"),
        }
    }
}

/// A verification outcome and its reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// SAFE or UNSAFE.
    pub result: VerificationResult,
    /// Why.
    pub reason: String,
}

impl Verdict {
    /// A SAFE verdict.
    #[must_use]
    pub fn safe(reason: impl Into<String>) -> Self {
        Self {
            result: VerificationResult::Safe,
            reason: reason.into(),
        }
    }

    /// An UNSAFE verdict.
    #[must_use]
    pub fn unsafe_because(reason: impl Into<String>) -> Self {
        Self {
            result: VerificationResult::Unsafe,
            reason: reason.into(),
        }
    }

    /// Returns true for SAFE.
    #[must_use]
    pub fn is_safe(&self) -> bool {
        self.result == VerificationResult::Safe
    }
}

/// Whether an allocation rejection is about the candidate track or holds
/// for every track in the station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RejectionScope {
    Track,
    Station,
}

/// The three kinds of decision the verifier understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionType {
    /// Reserve a track for a train.
    TrackAllocation,
    /// Change a signal aspect.
    SignalChange,
    /// Move a level-crossing gate.
    GateOperation,
}

impl DecisionType {
    /// Canonical upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TrackAllocation => "TRACK_ALLOCATION",
            Self::SignalChange => "SIGNAL_CHANGE",
            Self::GateOperation => "GATE_OPERATION",
        }
    }

    /// Parses the canonical name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TRACK_ALLOCATION" => Some(Self::TrackAllocation),
            "SIGNAL_CHANGE" => Some(Self::SignalChange),
            "GATE_OPERATION" => Some(Self::GateOperation),
            _ => None,
        }
    }
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision_type", content = "params", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// Reserve `track_id` for `train_id`.
    TrackAllocation {
        /// Requesting train.
        train_id: TrainId,
        /// Track to reserve.
        track_id: TrackId,
        /// Expected arrival in seconds.
        eta_seconds: f64,
    },
    /// Show `new_state` on `signal_id`, which protects `track_id`.
    SignalChange {
        /// Signal to change.
        signal_id: SignalId,
        /// Requested aspect.
        new_state: SignalState,
        /// Track protected by the signal.
        track_id: TrackId,
    },
    /// Move `gate_id` to `new_state`.
    GateOperation {
        /// Gate to move.
        gate_id: GateId,
        /// Requested position.
        new_state: GateState,
        /// Distance to the nearest train in metres.
        nearest_train_distance: f64,
    },
}

impl Decision {
    /// The decision's type tag.
    #[must_use]
    pub fn decision_type(&self) -> DecisionType {
        match self {
            Self::TrackAllocation { .. } => DecisionType::TrackAllocation,
            Self::SignalChange { .. } => DecisionType::SignalChange,
            Self::GateOperation { .. } => DecisionType::GateOperation,
        }
    }
}

/// Loosely typed decision as received from an external caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRequest {
    /// `TRACK_ALLOCATION`, `SIGNAL_CHANGE` or `GATE_OPERATION`.
    pub decision_type: String,
    /// Decision parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Deserialize)]
struct TrackAllocationParams {
    train_id: TrainId,
    track_id: TrackId,
    eta_seconds: f64,
}

#[derive(Deserialize)]
struct SignalChangeParams {
    signal_id: SignalId,
    new_state: SignalState,
    track_id: TrackId,
}

#[derive(Deserialize)]
struct GateOperationParams {
    gate_id: GateId,
    new_state: GateState,
    nearest_train_distance: f64,
}

impl DecisionRequest {
    /// Converts to a typed decision, or explains why it cannot be verified.
    pub fn to_decision(&self) -> Result<Decision, String> {
        let Some(kind) = DecisionType::parse(&self.decision_type) else {
            return Err(format!("Unknown decision type: {}", self.decision_type));
        };
        let malformed = |e: serde_json::Error| format!("Malformed parameters for {kind}: {e}");
        let params = self.params.clone();

        match kind {
            DecisionType::TrackAllocation => {
                let p: TrackAllocationParams = serde_json::from_value(params).map_err(malformed)?;
                Ok(Decision::TrackAllocation {
                    train_id: p.train_id,
                    track_id: p.track_id,
                    eta_seconds: p.eta_seconds,
                })
            }
            DecisionType::SignalChange => {
                let p: SignalChangeParams = serde_json::from_value(params).map_err(malformed)?;
                Ok(Decision::SignalChange {
                    signal_id: p.signal_id,
                    new_state: p.new_state,
                    track_id: p.track_id,
                })
            }
            DecisionType::GateOperation => {
                let p: GateOperationParams = serde_json::from_value(params).map_err(malformed)?;
                Ok(Decision::GateOperation {
                    gate_id: p.gate_id,
                    new_state: p.new_state,
                    nearest_train_distance: p.nearest_train_distance,
                })
            }
        }
    }
}

/// Unique identifier for a verification record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VerificationId(Uuid);

impl VerificationId {
    /// Creates a new random verification ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for VerificationId {
    fn default() -> Self {
        Self::new()
    }
}

/// One entry in the verification log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    /// Unique identifier.
    pub id: VerificationId,
    /// Kind of decision.
    pub decision_type: DecisionType,
    /// Primary entity (train for allocations, signal or gate otherwise).
    pub entity_id: String,
    /// Requested action (target track or requested state).
    pub action: String,
    /// Outcome.
    pub result: VerificationResult,
    /// Reason given with the outcome.
    pub reason: String,
    /// When the verdict was reached.
    pub timestamp: DateTime<Utc>,
}

/// Counts derived from the verification log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VerificationStats {
    /// Verdicts recorded.
    pub total_verifications: usize,
    /// SAFE verdicts.
    pub safe: usize,
    /// UNSAFE verdicts.
    #[serde(rename = "unsafe")]
    pub unsafe_count: usize,
    /// `100 * safe / total`, or 0 with no verdicts.
    pub safety_rate: f64,
}

/// Bulk snapshot upsert for [`SafetyVerifier::sync_state`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSync {
    /// Train snapshots.
    pub trains: Vec<TrainSnapshot>,
    /// Track snapshots.
    pub tracks: Vec<TrackSnapshot>,
    /// Signal snapshots.
    pub signals: Vec<SignalSnapshot>,
    /// Gate snapshots.
    pub gates: Vec<GateSnapshot>,
}

impl StateSync {
    /// Empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds train snapshots.
    #[must_use]
    pub fn trains(mut self, trains: impl IntoIterator<Item = TrainSnapshot>) -> Self {
        self.trains.extend(trains);
        self
    }

    /// Adds track snapshots.
    #[must_use]
    pub fn tracks(mut self, tracks: impl IntoIterator<Item = TrackSnapshot>) -> Self {
        self.tracks.extend(tracks);
        self
    }

    /// Adds signal snapshots.
    #[must_use]
    pub fn signals(mut self, signals: impl IntoIterator<Item = SignalSnapshot>) -> Self {
        self.signals.extend(signals);
        self
    }

    /// Adds gate snapshots.
    #[must_use]
    pub fn gates(mut self, gates: impl IntoIterator<Item = GateSnapshot>) -> Self {
        self.gates.extend(gates);
        self
    }

    /// Returns true if the batch carries nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trains.is_empty()
            && self.tracks.is_empty()
            && self.signals.is_empty()
            && self.gates.is_empty()
    }
}

/// Safety verifier owning the twin and the verification log.
#[derive(Debug, Clone)]
pub struct SafetyVerifier {
    rules: SafetyRules,
    twin: TwinState,
    detector: ConflictDetector,
    log: Vec<VerificationRecord>,
}

impl Default for SafetyVerifier {
    fn default() -> Self {
        Self::new(SafetyRules::default())
    }
}

impl SafetyVerifier {
    /// Creates a verifier with an empty twin.
    #[must_use]
    pub fn new(rules: SafetyRules) -> Self {
        Self {
            rules,
            twin: TwinState::new(),
            detector: ConflictDetector::new(),
            log: Vec::new(),
        }
    }

    /// Rules in force.
    #[must_use]
    pub fn rules(&self) -> &SafetyRules {
        &self.rules
    }

    /// The live twin.
    #[must_use]
    pub fn twin(&self) -> &TwinState {
        &self.twin
    }

    /// Upserts every snapshot in `sync` into the twin.
    pub fn sync_state(&mut self, sync: StateSync) {
        if sync.is_empty() {
            return;
        }
        debug!(
            trains = sync.trains.len(),
            tracks = sync.tracks.len(),
            signals = sync.signals.len(),
            gates = sync.gates.len(),
            "syncing twin state"
        );
        for train in sync.trains {
            self.twin.update_train(train);
        }
        for track in sync.tracks {
            self.twin.update_track(track);
        }
        for signal in sync.signals {
            self.twin.update_signal(signal);
        }
        for gate in sync.gates {
            self.twin.update_gate(gate);
        }
    }

    /// Verifies reserving `track_id` for `train_id`.
    pub fn verify_track_allocation(
        &mut self,
        train_id: &TrainId,
        track_id: &TrackId,
        eta_seconds: f64,
    ) -> Verdict {
        let (verdict, _) = self.simulate_track_allocation(train_id, track_id, eta_seconds);
        self.record(
            DecisionType::TrackAllocation,
            train_id.as_str(),
            track_id.as_str(),
            &verdict,
        );
        verdict
    }

    /// Verifies `candidates` in order and returns the first track accepted
    /// for `train_id`.
    ///
    /// Every verdict reached is recorded. A rejection that does not depend on
    /// the candidate (a non-finite ETA, a timing conflict, or a conflict
    /// already present in the station) ends the search, so a blocked train
    /// adds a single UNSAFE record.
    ///
    /// # Errors
    ///
    /// Returns the last UNSAFE verdict, or "No free tracks" when there were
    /// no candidates.
    pub fn verify_first_allocation<'a, I>(
        &mut self,
        train_id: &TrainId,
        candidates: I,
        eta_seconds: f64,
    ) -> Result<&'a TrackId, Verdict>
    where
        I: IntoIterator<Item = &'a TrackId>,
    {
        let mut last = Verdict::unsafe_because("No free tracks");
        for track_id in candidates {
            let (verdict, scope) = self.simulate_track_allocation(train_id, track_id, eta_seconds);
            self.record(
                DecisionType::TrackAllocation,
                train_id.as_str(),
                track_id.as_str(),
                &verdict,
            );
            if verdict.is_safe() {
                return Ok(track_id);
            }
            last = verdict;
            if scope == RejectionScope::Station {
                break;
            }
        }
        Err(last)
    }

    fn simulate_track_allocation(
        &mut self,
        train_id: &TrainId,
        track_id: &TrackId,
        eta_seconds: f64,
    ) -> (Verdict, RejectionScope) {
        if !eta_seconds.is_finite() {
            return (
                Verdict::unsafe_because(format!("Invalid ETA for train {train_id}: {eta_seconds}")),
                RejectionScope::Station,
            );
        }

        let mut sim = self.twin.clone();

        let Some(track) = sim.get_track(track_id.as_str()).cloned() else {
            return (
                Verdict::unsafe_because(format!("Track {track_id} not found")),
                RejectionScope::Track,
            );
        };
        if track.state != TrackState::Free {
            return (
                Verdict::unsafe_because(format!("Track {track_id} is {}, not FREE", track.state)),
                RejectionScope::Track,
            );
        }
        if self.detector.check_route_conflicts(&sim, train_id, track_id) {
            return (
                Verdict::unsafe_because(format!("Route conflict detected for track {track_id}")),
                RejectionScope::Track,
            );
        }
        let timing_conflict = self.detector.check_timing_conflicts(
            &sim,
            train_id,
            eta_seconds,
            self.rules.min_separation_s,
        );
        if !rules::validate_track_allocation(track.state, timing_conflict) {
            return (
                Verdict::unsafe_because(format!("Timing conflict detected for train {train_id}")),
                RejectionScope::Station,
            );
        }

        sim.update_track(track.reserved_for(train_id.clone(), eta_seconds));

        // Reserving a FREE track cannot introduce a conflict, so anything the
        // sweep finds was already present elsewhere in the station.
        let conflicts = self.detector.detect_all_conflicts(&sim);
        if !conflicts.is_empty() {
            return (
                Verdict::unsafe_because(format!("Conflicts detected: {} issues", conflicts.len())),
                RejectionScope::Station,
            );
        }
        (Verdict::safe("Track allocation is safe"), RejectionScope::Track)
    }

    /// Verifies showing `new_state` on `signal_id` over `track_id`.
    pub fn verify_signal_change(
        &mut self,
        signal_id: &SignalId,
        new_state: SignalState,
        track_id: &TrackId,
    ) -> Verdict {
        let verdict = self.simulate_signal_change(signal_id, new_state, track_id);
        self.record(
            DecisionType::SignalChange,
            signal_id.as_str(),
            new_state.as_str(),
            &verdict,
        );
        verdict
    }

    fn simulate_signal_change(
        &mut self,
        signal_id: &SignalId,
        new_state: SignalState,
        track_id: &TrackId,
    ) -> Verdict {
        let mut sim = self.twin.clone();

        let Some(track) = sim.get_track(track_id.as_str()) else {
            return Verdict::unsafe_because(format!("Track {track_id} not found"));
        };
        if !rules::validate_signal_change(&self.rules, new_state, track.state) {
            return Verdict::unsafe_because(format!(
                "Signal change violates safety rules: {new_state} requires track {track_id} RESERVED, found {}",
                track.state
            ));
        }

        let signal = sim
            .get_signal(signal_id.as_str())
            .cloned()
            .unwrap_or_else(|| SignalSnapshot::red(signal_id.clone(), track_id.clone()));
        sim.update_signal(signal.with_state(new_state));

        let conflicts = self.detector.detect_all_conflicts(&sim);
        if !conflicts.is_empty() {
            return Verdict::unsafe_because(format!(
                "Signal change causes conflicts: {} issues",
                conflicts.len()
            ));
        }
        Verdict::safe("Signal change is safe")
    }

    /// Verifies moving `gate_id` to `new_state` with the nearest train at
    /// `nearest_train_distance` metres.
    pub fn verify_gate_operation(
        &mut self,
        gate_id: &GateId,
        new_state: GateState,
        nearest_train_distance: f64,
    ) -> Verdict {
        let verdict = self.simulate_gate_operation(gate_id, new_state, nearest_train_distance);
        self.record(
            DecisionType::GateOperation,
            gate_id.as_str(),
            new_state.as_str(),
            &verdict,
        );
        verdict
    }

    fn simulate_gate_operation(
        &mut self,
        gate_id: &GateId,
        new_state: GateState,
        nearest_train_distance: f64,
    ) -> Verdict {
        if !rules::validate_gate_operation(&self.rules, new_state, nearest_train_distance) {
            return Verdict::unsafe_because(format!(
                "Train too close ({nearest_train_distance}m <= {}m danger zone)",
                self.rules.danger_zone_m
            ));
        }

        let mut sim = self.twin.clone();
        let gate = sim
            .get_gate(gate_id.as_str())
            .cloned()
            .unwrap_or_else(|| GateSnapshot::closed(gate_id.clone()));
        sim.update_gate(GateSnapshot {
            state: new_state,
            nearest_train_distance,
            ..gate
        });

        let conflicts = self.detector.detect_all_conflicts(&sim);
        if !conflicts.is_empty() {
            return Verdict::unsafe_because(format!(
                "Gate operation blocked by conflicts: {} issues",
                conflicts.len()
            ));
        }
        Verdict::safe("Gate operation is safe")
    }

    /// Verifies any typed decision.
    pub fn verify_decision(&mut self, decision: &Decision) -> Verdict {
        match decision {
            Decision::TrackAllocation {
                train_id,
                track_id,
                eta_seconds,
            } => self.verify_track_allocation(train_id, track_id, *eta_seconds),
            Decision::SignalChange {
                signal_id,
                new_state,
                track_id,
            } => self.verify_signal_change(signal_id, *new_state, track_id),
            Decision::GateOperation {
                gate_id,
                new_state,
                nearest_train_distance,
            } => self.verify_gate_operation(gate_id, *new_state, *nearest_train_distance),
        }
    }

    /// Verifies a loosely typed request. Unknown types and malformed
    /// parameters are UNSAFE and are not recorded in the log.
    pub fn verify_request(&mut self, request: &DecisionRequest) -> Verdict {
        match request.to_decision() {
            Ok(decision) => self.verify_decision(&decision),
            Err(reason) => {
                warn!(decision_type = %request.decision_type, %reason, "rejected unverifiable request");
                Verdict::unsafe_because(reason)
            }
        }
    }

    /// The append-only verification log.
    #[must_use]
    pub fn verification_log(&self) -> &[VerificationRecord] {
        &self.log
    }

    /// Counts derived from the log.
    #[must_use]
    pub fn get_verification_stats(&self) -> VerificationStats {
        let total = self.log.len();
        let safe = self
            .log
            .iter()
            .filter(|r| r.result == VerificationResult::Safe)
            .count();
        #[allow(clippy::cast_precision_loss)]
        let safety_rate = if total == 0 {
            0.0
        } else {
            safe as f64 / total as f64 * 100.0
        };
        VerificationStats {
            total_verifications: total,
            safe,
            unsafe_count: total - safe,
            safety_rate,
        }
    }

    /// Conflict counts from the most recent simulation or monitor sweep.
    #[must_use]
    pub fn conflict_summary(&self) -> ConflictSummary {
        self.detector.get_conflict_summary()
    }

    /// Sweeps the live twin for conflicts without simulating anything.
    pub fn monitor(&mut self) -> Vec<crate::conflict::Conflict> {
        self.detector.detect_all_conflicts(&self.twin)
    }

    fn record(&mut self, decision_type: DecisionType, entity_id: &str, action: &str, verdict: &Verdict) {
        if verdict.is_safe() {
            debug!(%decision_type, entity_id, action, "verified SAFE");
        } else {
            warn!(%decision_type, entity_id, action, reason = %verdict.reason, "verified UNSAFE");
        }
        self.log.push(VerificationRecord {
            id: VerificationId::new(),
            decision_type,
            entity_id: entity_id.to_string(),
            action: action.to_string(),
            result: verdict.result,
            reason: verdict.reason.clone(),
            timestamp: Utc::now(),
        });
    }
}

impl fmt::Display for SafetyVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.get_verification_stats();
        write!(
            f,
            "SafetyVerifier(verifications={}, safety_rate={:.1}%)",
            stats.total_verifications, stats.safety_rate
        )
    }
}
