//! Signal controller.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{info, warn};

use crate::error::InterlockError;
use crate::id::{SignalId, TrackId};
use crate::signal::{Signal, SignalSnapshot, SignalState};
use crate::verifier::{SafetyVerifier, StateSync};

use super::{CommandMode, CommandOutcome, CommandRecord, CommandStatus};

/// Owns the station's live signals.
#[derive(Debug, Clone, Default)]
pub struct SignalController {
    signals: BTreeMap<SignalId, Signal>,
    command_log: Vec<CommandRecord>,
}

impl SignalController {
    /// Empty controller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a RED signal protecting `track_id`.
    pub fn add_signal(
        &mut self,
        id: impl Into<SignalId>,
        track_id: impl Into<TrackId>,
    ) -> Result<&Signal, InterlockError> {
        let id = id.into();
        if self.signals.contains_key(&id) {
            return Err(InterlockError::DuplicateId {
                kind: "signal",
                id: id.to_string(),
            });
        }
        let signal = self
            .signals
            .entry(id.clone())
            .or_insert_with(|| Signal::new(id, track_id));
        Ok(&*signal)
    }

    /// Requests `new_state` on `signal_id`.
    ///
    /// In [`CommandMode::Verified`] the change is simulated by `verifier`
    /// first and applied only on SAFE. [`CommandMode::Override`] applies it
    /// unconditionally. Applied changes are synced into the verifier's twin.
    pub fn change_signal(
        &mut self,
        verifier: &mut SafetyVerifier,
        signal_id: &str,
        new_state: &str,
        mode: CommandMode,
    ) -> CommandOutcome {
        let Some(track_id) = self.signals.get(signal_id).map(|s| s.track_id().clone()) else {
            return self.reject(signal_id, new_state, format!("Signal {signal_id} not found"));
        };
        let state = match new_state.parse::<SignalState>() {
            Ok(state) => state,
            Err(_) => {
                return self.reject(signal_id, new_state, format!("Invalid signal state: {new_state}"));
            }
        };

        if mode == CommandMode::Override {
            warn!(signal = signal_id, state = %state, "signal override, verification bypassed");
            let snapshot = self.apply(signal_id, state);
            verifier.sync_state(StateSync::new().signals(snapshot));
            self.command_log
                .push(CommandRecord::new(signal_id, state.as_str(), true, "OVERRIDE"));
            return CommandOutcome::new(
                CommandStatus::Override,
                format!("Signal {signal_id} changed to {state} (OVERRIDE)"),
            );
        }

        let verdict = verifier.verify_signal_change(&SignalId::from(signal_id), state, &track_id);
        if !verdict.is_safe() {
            self.command_log
                .push(CommandRecord::new(signal_id, state.as_str(), false, verdict.reason.clone()));
            return CommandOutcome::new(
                CommandStatus::Blocked,
                format!("Signal change blocked: {}", verdict.reason),
            );
        }

        info!(signal = signal_id, state = %state, track = %track_id, "signal changed");
        let snapshot = self.apply(signal_id, state);
        verifier.sync_state(StateSync::new().signals(snapshot));
        self.command_log
            .push(CommandRecord::new(signal_id, state.as_str(), true, "VERIFIED"));
        CommandOutcome::new(
            CommandStatus::Verified,
            format!("Signal {signal_id} changed to {state}"),
        )
    }

    fn apply(&mut self, signal_id: &str, state: SignalState) -> Option<SignalSnapshot> {
        let signal = self.signals.get_mut(signal_id)?;
        signal.change_state(state, true);
        Some(signal.snapshot())
    }

    fn reject(&mut self, signal_id: &str, new_state: &str, reason: String) -> CommandOutcome {
        self.command_log
            .push(CommandRecord::new(signal_id, new_state, false, reason.clone()));
        CommandOutcome::new(CommandStatus::Rejected, reason)
    }

    /// Signal by id.
    #[must_use]
    pub fn get_signal(&self, signal_id: &str) -> Option<&Signal> {
        self.signals.get(signal_id)
    }

    /// Signals protecting `track_id`.
    pub fn signals_for_track<'a>(&'a self, track_id: &'a str) -> impl Iterator<Item = &'a Signal> + 'a {
        self.signals.values().filter(move |s| s.track_id() == track_id)
    }

    /// Snapshots of every signal in id order.
    #[must_use]
    pub fn get_all_states(&self) -> Vec<SignalSnapshot> {
        self.signals.values().map(Signal::snapshot).collect()
    }

    /// Commands handled so far.
    #[must_use]
    pub fn command_log(&self) -> &[CommandRecord] {
        &self.command_log
    }

    /// Number of signals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    /// Returns true if no signal is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

impl fmt::Display for SignalController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignalController(signals={})", self.signals.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TrackSnapshot;
    use crate::id::TrainId;

    fn setup(reserved: bool) -> (SignalController, SafetyVerifier) {
        let mut controller = SignalController::new();
        controller.add_signal("S1", "P1").unwrap();

        let mut track = TrackSnapshot::free("P1", 120);
        if reserved {
            track = track.reserved_for(TrainId::from("T001"), 180.0);
        }
        let mut verifier = SafetyVerifier::default();
        verifier.sync_state(
            StateSync::new()
                .tracks([track])
                .signals(controller.get_all_states()),
        );
        (controller, verifier)
    }

    #[test]
    fn test_green_on_reserved_track_is_applied_and_synced() {
        let (mut sc, mut v) = setup(true);
        let outcome = sc.change_signal(&mut v, "S1", "GREEN", CommandMode::Verified);

        assert_eq!(outcome.status, CommandStatus::Verified);
        assert_eq!(sc.get_signal("S1").unwrap().state(), SignalState::Green);
        assert_eq!(v.twin().get_signal("S1").unwrap().state, SignalState::Green);
        assert_eq!(sc.command_log().last().unwrap().reason, "VERIFIED");
    }

    #[test]
    fn test_green_on_free_track_is_blocked() {
        let (mut sc, mut v) = setup(false);
        let outcome = sc.change_signal(&mut v, "S1", "GREEN", CommandMode::Verified);

        assert_eq!(outcome.status, CommandStatus::Blocked);
        assert!(!outcome.applied());
        assert!(outcome.message.starts_with("Signal change blocked"));
        assert_eq!(sc.get_signal("S1").unwrap().state(), SignalState::Red);
        assert_eq!(v.twin().get_signal("S1").unwrap().state, SignalState::Red);
        assert!(!sc.command_log().last().unwrap().success);
    }

    #[test]
    fn test_override_bypasses_verifier() {
        let (mut sc, mut v) = setup(false);
        let outcome = sc.change_signal(&mut v, "S1", "GREEN", CommandMode::Override);

        assert_eq!(outcome.status, CommandStatus::Override);
        assert_eq!(sc.get_signal("S1").unwrap().state(), SignalState::Green);
        assert_eq!(v.get_verification_stats().total_verifications, 0);
        assert_eq!(sc.command_log().last().unwrap().reason, "OVERRIDE");
    }

    #[test]
    fn test_unknown_signal_and_bad_state_are_rejected() {
        let (mut sc, mut v) = setup(true);
        let outcome = sc.change_signal(&mut v, "S9", "RED", CommandMode::Verified);
        assert_eq!(outcome.status, CommandStatus::Rejected);
        assert_eq!(outcome.message, "Signal S9 not found");

        let outcome = sc.change_signal(&mut v, "S1", "BLUE", CommandMode::Override);
        assert_eq!(outcome.status, CommandStatus::Rejected);
        assert_eq!(sc.get_signal("S1").unwrap().state(), SignalState::Red);
    }

    #[test]
    fn test_duplicate_signal_rejected() {
        let (mut sc, _) = setup(true);
        assert!(sc.add_signal("S1", "P2").is_err());
        assert_eq!(sc.signals_for_track("P1").count(), 1);
    }
}
