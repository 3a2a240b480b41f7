//! Train snapshots.
//!
//! Trains are owned by the external simulation layer; the interlock only
//! ever sees value copies pushed in through `sync_state`.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_SPEED_HISTORY_LEN;
use crate::id::TrainId;

/// Direction of travel relative to the station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Approaching the station.
    #[default]
    Inbound,
    /// Leaving the station.
    Outbound,
}

/// Service category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrainCategory {
    /// Calls at the station.
    #[default]
    Stopping,
    /// Passes through.
    NonStopping,
}

/// Immutable value copy of a train.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainSnapshot {
    /// Train identifier.
    pub id: TrainId,
    /// Distance from the station in km.
    pub position_km: f64,
    /// Current speed in km/h.
    pub speed_kmph: f64,
    /// Direction of travel.
    pub direction: Direction,
    /// Service category.
    pub category: TrainCategory,
    /// Recent speed samples, oldest first.
    pub speed_history: VecDeque<f64>,
    /// Predicted arrival in seconds, when known.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub eta_seconds: Option<f64>,
}

impl TrainSnapshot {
    /// Creates an inbound stopping train with one speed sample.
    #[must_use]
    pub fn new(id: impl Into<TrainId>, position_km: f64, speed_kmph: f64) -> Self {
        let speed = speed_kmph.max(0.0);
        Self {
            id: id.into(),
            position_km,
            speed_kmph: speed,
            direction: Direction::Inbound,
            category: TrainCategory::Stopping,
            speed_history: VecDeque::from([speed]),
            eta_seconds: None,
        }
    }

    /// Sets the predicted arrival.
    #[must_use]
    pub fn with_eta(mut self, eta_seconds: f64) -> Self {
        self.eta_seconds = Some(eta_seconds);
        self
    }

    /// Sets the direction.
    #[must_use]
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Sets the category.
    #[must_use]
    pub fn with_category(mut self, category: TrainCategory) -> Self {
        self.category = category;
        self
    }

    /// Records a new speed sample, keeping at most `bound` samples.
    pub fn record_speed(&mut self, speed_kmph: f64, bound: usize) {
        let speed = speed_kmph.max(0.0);
        self.speed_kmph = speed;
        self.speed_history.push_back(speed);
        self.truncate_speed_history(bound);
    }

    /// Drops the oldest samples until at most `bound` remain (at least one
    /// is always kept).
    pub fn truncate_speed_history(&mut self, bound: usize) {
        let excess = self.speed_history.len().saturating_sub(bound.max(1));
        self.speed_history.drain(..excess);
    }

    /// Records a speed sample with the default history bound.
    pub fn push_speed(&mut self, speed_kmph: f64) {
        self.record_speed(speed_kmph, DEFAULT_SPEED_HISTORY_LEN);
    }

    /// Mean of the recorded speeds.
    #[must_use]
    pub fn average_speed(&self) -> f64 {
        if self.speed_history.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.speed_history.len() as f64;
        self.speed_history.iter().sum::<f64>() / n
    }

    /// Population standard deviation of the recorded speeds.
    #[must_use]
    pub fn speed_std_dev(&self) -> f64 {
        if self.speed_history.len() < 2 {
            return 0.0;
        }
        let avg = self.average_speed();
        #[allow(clippy::cast_precision_loss)]
        let n = self.speed_history.len() as f64;
        let var = self.speed_history.iter().map(|s| (s - avg).powi(2)).sum::<f64>() / n;
        var.sqrt()
    }
}

impl fmt::Display for TrainSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Train({}, pos={:.2}km, speed={}kmph, {:?})",
            self.id, self.position_km, self.speed_kmph, self.direction
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_history_is_bounded() {
        let mut train = TrainSnapshot::new("T001", 5.0, 60.0);
        for i in 0..10 {
            train.record_speed(f64::from(i), 4);
        }
        assert_eq!(train.speed_history.len(), 4);
        assert_eq!(train.speed_history.front(), Some(&6.0));
        assert!((train.speed_kmph - 9.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_truncate_keeps_newest_samples() {
        let mut train = TrainSnapshot::new("T001", 5.0, 10.0);
        for speed in [20.0, 30.0, 40.0] {
            train.push_speed(speed);
        }
        train.truncate_speed_history(2);
        assert_eq!(train.speed_history, VecDeque::from([30.0, 40.0]));

        train.truncate_speed_history(0);
        assert_eq!(train.speed_history, VecDeque::from([40.0]));
    }

    #[test]
    fn test_negative_speed_clamped() {
        let mut train = TrainSnapshot::new("T001", 5.0, -3.0);
        assert!(train.speed_kmph.abs() < f64::EPSILON);
        train.push_speed(-10.0);
        assert!(train.speed_kmph.abs() < f64::EPSILON);
    }

    #[test]
    fn test_speed_statistics() {
        let mut train = TrainSnapshot::new("T001", 5.0, 40.0);
        train.push_speed(60.0);
        assert!((train.average_speed() - 50.0).abs() < 1e-9);
        assert!((train.speed_std_dev() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_eta_omitted_from_json_when_unknown() {
        let json = serde_json::to_value(TrainSnapshot::new("T001", 1.0, 1.0)).unwrap();
        assert!(json.get("eta_seconds").is_none());
        let json = serde_json::to_value(TrainSnapshot::new("T001", 1.0, 1.0).with_eta(90.0)).unwrap();
        assert_eq!(json["eta_seconds"], 90.0);
    }
}
