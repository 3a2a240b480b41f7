//! Level-crossing gate controller.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{info, warn};

use crate::error::InterlockError;
use crate::gate::{Gate, GateSnapshot, GateState};
use crate::id::{GateId, TrainId};
use crate::verifier::{SafetyVerifier, StateSync};

use super::{CommandMode, CommandOutcome, CommandRecord, CommandStatus};

/// Owns the station's live gates.
#[derive(Debug, Clone, Default)]
pub struct GateController {
    gates: BTreeMap<GateId, Gate>,
    command_log: Vec<CommandRecord>,
}

impl GateController {
    /// Empty controller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a CLOSED gate.
    pub fn add_gate(&mut self, id: impl Into<GateId>) -> Result<&Gate, InterlockError> {
        let id = id.into();
        if self.gates.contains_key(&id) {
            return Err(InterlockError::DuplicateId {
                kind: "gate",
                id: id.to_string(),
            });
        }
        let gate = self
            .gates
            .entry(id.clone())
            .or_insert_with(|| Gate::new(id));
        Ok(&*gate)
    }

    /// Requests `new_state` on `gate_id`, checked against the gate's
    /// currently recorded nearest-train distance.
    pub fn change_gate(
        &mut self,
        verifier: &mut SafetyVerifier,
        gate_id: &str,
        new_state: &str,
        mode: CommandMode,
    ) -> CommandOutcome {
        let Some(distance) = self.gates.get(gate_id).map(Gate::nearest_train_distance) else {
            return self.reject(gate_id, new_state, format!("Gate {gate_id} not found"));
        };
        let state = match new_state.parse::<GateState>() {
            Ok(state) => state,
            Err(_) => {
                return self.reject(gate_id, new_state, format!("Invalid gate state: {new_state}"));
            }
        };

        if mode == CommandMode::Override {
            warn!(gate = gate_id, state = %state, distance, "gate override, verification bypassed");
            self.commit(verifier, gate_id, state, "OVERRIDE");
            return CommandOutcome::new(
                CommandStatus::Override,
                format!("Gate {gate_id} changed to {state} (OVERRIDE)"),
            );
        }

        let verdict = verifier.verify_gate_operation(&GateId::from(gate_id), state, distance);
        if !verdict.is_safe() {
            self.command_log
                .push(CommandRecord::new(gate_id, state.as_str(), false, verdict.reason.clone()));
            return CommandOutcome::new(
                CommandStatus::Blocked,
                format!("Gate change blocked: {}", verdict.reason),
            );
        }

        info!(gate = gate_id, state = %state, distance, "gate moved");
        self.commit(verifier, gate_id, state, "VERIFIED");
        CommandOutcome::new(
            CommandStatus::Verified,
            format!("Gate {gate_id} changed to {state}"),
        )
    }

    /// Records the nearest approaching train for `gate_id` and syncs it into
    /// the twin. Returns false for an unknown gate.
    pub fn update_train_proximity(
        &mut self,
        verifier: &mut SafetyVerifier,
        gate_id: &str,
        train_id: impl Into<TrainId>,
        distance: f64,
    ) -> bool {
        let Some(gate) = self.gates.get_mut(gate_id) else {
            return false;
        };
        gate.update_nearest_train(train_id, distance);
        verifier.sync_state(StateSync::new().gates([gate.snapshot()]));
        true
    }

    /// Starts closing `gate_id` through the verified path when a train is
    /// inside `threshold` metres and the gate is not already CLOSED.
    pub fn auto_close_if_needed(
        &mut self,
        verifier: &mut SafetyVerifier,
        gate_id: &str,
        threshold: f64,
    ) -> CommandOutcome {
        let Some(gate) = self.gates.get(gate_id) else {
            return CommandOutcome::new(CommandStatus::Rejected, format!("Gate {gate_id} not found"));
        };
        let distance = gate.nearest_train_distance();
        if distance >= threshold || gate.state() == GateState::Closed {
            return CommandOutcome::new(CommandStatus::NoAction, "No action needed");
        }

        let outcome = self.change_gate(verifier, gate_id, GateState::Closing.as_str(), CommandMode::Verified);
        if outcome.applied() {
            CommandOutcome::new(
                outcome.status,
                format!("Auto-closing gate {gate_id} (train at {distance:.0}m)"),
            )
        } else {
            outcome
        }
    }

    fn commit(&mut self, verifier: &mut SafetyVerifier, gate_id: &str, state: GateState, reason: &str) {
        if let Some(gate) = self.gates.get_mut(gate_id) {
            gate.change_state(state, true);
            verifier.sync_state(StateSync::new().gates([gate.snapshot()]));
        }
        self.command_log
            .push(CommandRecord::new(gate_id, state.as_str(), true, reason));
    }

    fn reject(&mut self, gate_id: &str, new_state: &str, reason: String) -> CommandOutcome {
        self.command_log
            .push(CommandRecord::new(gate_id, new_state, false, reason.clone()));
        CommandOutcome::new(CommandStatus::Rejected, reason)
    }

    /// Gate by id.
    #[must_use]
    pub fn get_gate(&self, gate_id: &str) -> Option<&Gate> {
        self.gates.get(gate_id)
    }

    /// Snapshots of every gate in id order.
    #[must_use]
    pub fn get_all_states(&self) -> Vec<GateSnapshot> {
        self.gates.values().map(Gate::snapshot).collect()
    }

    /// Commands handled so far.
    #[must_use]
    pub fn command_log(&self) -> &[CommandRecord] {
        &self.command_log
    }

    /// Number of gates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.gates.len()
    }

    /// Returns true if no gate is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}

impl fmt::Display for GateController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GateController(gates={})", self.gates.len())
    }
}
