//! Safety rule predicates.
//!
//! These decide whether a requested state is legal given the current state
//! of the entities it touches. They are evaluated by the verifier before a
//! change is simulated.

use crate::config::SafetyRules;
use crate::gate::GateState;
use crate::signal::SignalState;
use crate::track::TrackState;

/// A track may be allocated only while FREE and free of conflicts.
#[must_use]
pub fn validate_track_allocation(track_state: TrackState, has_conflict: bool) -> bool {
    track_state == TrackState::Free && !has_conflict
}

/// GREEN needs a RESERVED track (when the rule is enabled); RED and YELLOW
/// are always legal here.
#[must_use]
pub fn validate_signal_change(
    rules: &SafetyRules,
    new_state: SignalState,
    track_state: TrackState,
) -> bool {
    match new_state {
        SignalState::Green => !rules.green_requires_reserved || track_state == TrackState::Reserved,
        SignalState::Red | SignalState::Yellow => true,
    }
}

/// A gate may open only with the nearest train strictly outside the danger zone.
#[must_use]
pub fn validate_gate_opening(rules: &SafetyRules, nearest_train_distance: f64) -> bool {
    nearest_train_distance > rules.danger_zone_m
}

/// OPEN is checked against the danger zone; CLOSING and CLOSED always pass.
#[must_use]
pub fn validate_gate_operation(
    rules: &SafetyRules,
    new_state: GateState,
    nearest_train_distance: f64,
) -> bool {
    match new_state {
        GateState::Open => validate_gate_opening(rules, nearest_train_distance),
        GateState::Closing | GateState::Closed => true,
    }
}
