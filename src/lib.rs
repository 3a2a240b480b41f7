//! # railtwin - Digital-twin safety verification for a station interlock
//!
//! railtwin models a small railway station: platform tracks, the signals that
//! protect them, and level-crossing gates. No live track, signal or gate is
//! changed until the change has been simulated on a copy of the station and
//! found safe.
//!
//! ## Core Concepts
//!
//! - **Entities**: [`Track`], [`Signal`] and [`Gate`] state machines with explicit legal transitions
//! - **Twin**: [`TwinState`], an owned mirror of every entity that clones cheaply
//! - **Conflicts**: [`ConflictDetector`] sweeps a twin for inconsistent states
//! - **Verification**: [`SafetyVerifier`] simulates a decision on a clone and returns a [`Verdict`]
//! - **Interlock**: [`Interlock`] owns everything and is the entry point for commands
//!
//! ## Usage
//!
//! ```rust,ignore
//! use railtwin::{CommandMode, Interlock, SafetyRules};
//!
//! let mut interlock = Interlock::new(SafetyRules::default())?;
//! interlock.add_track("P1")?;
//! interlock.add_signal("S1", "P1")?;
//!
//! let track = interlock.allocate_track("T001", 180.0);
//! let outcome = interlock.change_signal("S1", "GREEN", CommandMode::Verified);
//! assert!(outcome.applied());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Entities and identifiers
pub mod gate;
pub mod id;
pub mod signal;
pub mod track;
pub mod train;

// Configuration and errors
pub mod config;
pub mod error;

// Twin, detection and verification
pub mod conflict;
pub mod rules;
pub mod twin;
pub mod verifier;

// Live side
pub mod controller;
pub mod events;
pub mod interlock;

// Offline analysis
pub mod history;

pub use config::SafetyRules;
pub use conflict::{Conflict, ConflictDetector, ConflictId, ConflictSummary, ConflictType, Severity};
pub use controller::{
    CommandMode, CommandOutcome, CommandRecord, CommandStatus, GateController, SignalController,
    TrackManager,
};
pub use error::{InterlockError, RailError, RailResult, ValidationError};
pub use events::{Event, EventId, EventKind, EventLog, EventOutcome};
pub use gate::{Gate, GateSnapshot, GateState};
pub use history::{forward_fill, HistoricalRow, HistoricalSafetyChecker, Violation, ViolationType};
pub use id::{GateId, SignalId, TrackId, TrainId};
pub use interlock::{Interlock, StationSnapshot};
pub use signal::{Signal, SignalSnapshot, SignalState};
pub use track::{Track, TrackSnapshot, TrackState};
pub use train::{Direction, TrainCategory, TrainSnapshot};
pub use twin::{TwinState, TwinSummary};
pub use verifier::{
    Decision, DecisionRequest, DecisionType, SafetyVerifier, StateSync, Verdict,
    VerificationId, VerificationRecord, VerificationResult, VerificationStats,
};
