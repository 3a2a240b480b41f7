//! Offline safety scan over recorded station history.
//!
//! Historical data arrives as a time-ordered stream of partial observations:
//! each row carries whichever signal, gate or platform reported at that
//! instant. [`forward_fill`] carries the last known value of every field
//! forward so each row reads as a station snapshot, and
//! [`HistoricalSafetyChecker::detect_violations`] applies the station's four
//! safety rules to the filled stream.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SafetyRules;
use crate::conflict::Severity;
use crate::gate::GateState;
use crate::id::{GateId, SignalId, TrackId, TrainId};
use crate::signal::SignalState;
use crate::track::TrackState;

/// One recorded observation. Fields absent from the source row are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalRow {
    /// When the observation was taken.
    pub timestamp: DateTime<Utc>,
    /// Reporting signal.
    #[serde(default)]
    pub signal_id: Option<SignalId>,
    /// Aspect the signal showed.
    #[serde(default)]
    pub signal_color: Option<SignalState>,
    /// Platform the signal protects.
    #[serde(default)]
    pub signal_platform: Option<TrackId>,
    /// Reporting gate.
    #[serde(default)]
    pub gate_id: Option<GateId>,
    /// Position the gate was in.
    #[serde(default)]
    pub gate_status: Option<GateState>,
    /// Distance from the gate to the nearest train in metres.
    #[serde(default)]
    pub gate_nearest_train_m: Option<f64>,
    /// Reporting platform.
    #[serde(default)]
    pub platform_id: Option<TrackId>,
    /// State the platform was in.
    #[serde(default)]
    pub platform_status: Option<TrackState>,
    /// Train standing at the platform.
    #[serde(default)]
    pub platform_train_id: Option<TrainId>,
}

impl HistoricalRow {
    /// A row with only a timestamp.
    #[must_use]
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            signal_id: None,
            signal_color: None,
            signal_platform: None,
            gate_id: None,
            gate_status: None,
            gate_nearest_train_m: None,
            platform_id: None,
            platform_status: None,
            platform_train_id: None,
        }
    }

    /// Sets the signal observation.
    #[must_use]
    pub fn signal(mut self, id: impl Into<SignalId>, color: SignalState, platform: impl Into<TrackId>) -> Self {
        self.signal_id = Some(id.into());
        self.signal_color = Some(color);
        self.signal_platform = Some(platform.into());
        self
    }

    /// Sets the gate observation.
    #[must_use]
    pub fn gate(mut self, id: impl Into<GateId>, status: GateState, nearest_train_m: f64) -> Self {
        self.gate_id = Some(id.into());
        self.gate_status = Some(status);
        self.gate_nearest_train_m = Some(nearest_train_m);
        self
    }

    /// Sets the platform observation.
    #[must_use]
    pub fn platform(mut self, id: impl Into<TrackId>, status: TrackState, train: Option<TrainId>) -> Self {
        self.platform_id = Some(id.into());
        self.platform_status = Some(status);
        self.platform_train_id = train;
        self
    }

    fn fill_from(&mut self, prev: &Self) {
        fn carry<T: Clone>(slot: &mut Option<T>, prev: &Option<T>) {
            if slot.is_none() {
                slot.clone_from(prev);
            }
        }
        carry(&mut self.signal_id, &prev.signal_id);
        carry(&mut self.signal_color, &prev.signal_color);
        carry(&mut self.signal_platform, &prev.signal_platform);
        carry(&mut self.gate_id, &prev.gate_id);
        carry(&mut self.gate_status, &prev.gate_status);
        carry(&mut self.gate_nearest_train_m, &prev.gate_nearest_train_m);
        carry(&mut self.platform_id, &prev.platform_id);
        carry(&mut self.platform_status, &prev.platform_status);
        carry(&mut self.platform_train_id, &prev.platform_train_id);
    }
}

/// Fills every missing field from the previous row.
#[must_use]
pub fn forward_fill(rows: &[HistoricalRow]) -> Vec<HistoricalRow> {
    let mut filled: Vec<HistoricalRow> = Vec::with_capacity(rows.len());
    for row in rows {
        let mut row = row.clone();
        if let Some(prev) = filled.last() {
            row.fill_from(prev);
        }
        filled.push(row);
    }
    filled
}

/// The four offline safety rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationType {
    /// A signal showed GREEN while the crossing gate was OPEN.
    SignalGateConflict,
    /// The gate was OPEN with a train inside the danger zone.
    TrainGateConflict,
    /// A signal showed GREEN into its own OCCUPIED platform.
    CrowdSafetyRisk,
    /// A train kept approaching while the signal showed RED.
    RedSignalViolation,
}

impl ViolationType {
    /// Severity assigned to this rule.
    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            Self::SignalGateConflict | Self::CrowdSafetyRisk => Severity::High,
            Self::TrainGateConflict | Self::RedSignalViolation => Severity::Critical,
        }
    }
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SignalGateConflict => "SIGNAL_GATE_CONFLICT",
            Self::TrainGateConflict => "TRAIN_GATE_CONFLICT",
            Self::CrowdSafetyRisk => "CROWD_SAFETY_RISK",
            Self::RedSignalViolation => "RED_SIGNAL_VIOLATION",
        };
        f.write_str(s)
    }
}

/// A rule broken at one point in the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct Violation {
    pub timestamp: DateTime<Utc>,
    pub violation_type: ViolationType,
    pub description: String,
    pub severity: Severity,
}

impl Violation {
    fn new(timestamp: DateTime<Utc>, violation_type: ViolationType, description: String) -> Self {
        Self {
            timestamp,
            violation_type,
            description,
            severity: violation_type.severity(),
        }
    }
}

/// Scans recorded history for rule violations.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoricalSafetyChecker {
    rules: SafetyRules,
}

impl HistoricalSafetyChecker {
    /// Checker using `rules.danger_zone_m` for the train-gate rule.
    #[must_use]
    pub fn new(rules: SafetyRules) -> Self {
        Self { rules }
    }

    /// Forward-fills `rows` and returns every violation in row order.
    #[must_use]
    pub fn detect_violations(&self, rows: &[HistoricalRow]) -> Vec<Violation> {
        let rows = forward_fill(rows);
        let mut violations = Vec::new();
        let mut prev_distance: Option<f64> = None;

        for row in &rows {
            let signal = row.signal_id.as_ref().map_or("?", SignalId::as_str);
            let gate = row.gate_id.as_ref().map_or("?", GateId::as_str);
            let green = row.signal_color == Some(SignalState::Green);
            let gate_open = row.gate_status == Some(GateState::Open);

            if green && gate_open {
                violations.push(Violation::new(
                    row.timestamp,
                    ViolationType::SignalGateConflict,
                    format!("Signal {signal} is GREEN while Gate {gate} is OPEN"),
                ));
            }

            if let Some(distance) = row.gate_nearest_train_m {
                if gate_open && distance < self.rules.danger_zone_m {
                    violations.push(Violation::new(
                        row.timestamp,
                        ViolationType::TrainGateConflict,
                        format!("Train approaching ({distance}m) while Gate {gate} is OPEN"),
                    ));
                }
            }

            if green && row.platform_status == Some(TrackState::Occupied) {
                if let (Some(sig_platform), Some(platform)) = (&row.signal_platform, &row.platform_id) {
                    if sig_platform == platform {
                        violations.push(Violation::new(
                            row.timestamp,
                            ViolationType::CrowdSafetyRisk,
                            format!("Signal {signal} GREEN for OCCUPIED Platform {platform}"),
                        ));
                    }
                }
            }

            if let (Some(prev), Some(distance)) = (prev_distance, row.gate_nearest_train_m) {
                let delta = prev - distance;
                if row.signal_color == Some(SignalState::Red) && delta > 0.0 {
                    violations.push(Violation::new(
                        row.timestamp,
                        ViolationType::RedSignalViolation,
                        format!("Train moving (delta {delta}m) while Signal {signal} is RED"),
                    ));
                }
            }
            prev_distance = row.gate_nearest_train_m;
        }

        debug!(rows = rows.len(), violations = violations.len(), "historical scan finished");
        violations
    }

    /// Violation counts per rule.
    #[must_use]
    pub fn count_by_type(violations: &[Violation]) -> BTreeMap<ViolationType, usize> {
        let mut counts = BTreeMap::new();
        for v in violations {
            *counts.entry(v.violation_type).or_insert(0) += 1;
        }
        counts
    }
}
