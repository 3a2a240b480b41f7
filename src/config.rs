//! Safety rule configuration.
//!
//! The defaults match the station's published operating rules. Every field
//! can be overridden from a JSON document; missing fields keep their default.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{InterlockError, RailError, RailResult, ValidationError};

/// Distance in metres below which a level-crossing gate must not be open.
pub const DEFAULT_DANGER_ZONE_M: f64 = 500.0;

/// Minimum separation in seconds between two trains' arrival times.
pub const DEFAULT_MIN_SEPARATION_S: f64 = 120.0;

/// Minimum time in seconds a track needs between two trains.
pub const DEFAULT_MIN_CLEARANCE_S: u64 = 120;

/// Number of speed samples kept per train.
pub const DEFAULT_SPEED_HISTORY_LEN: usize = 100;

/// Tunable safety rules consumed by the verifier and controllers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyRules {
    /// Gate danger zone in metres. Opening requires the nearest train to be strictly farther.
    pub danger_zone_m: f64,
    /// Minimum ETA separation in seconds between distinct trains.
    pub min_separation_s: f64,
    /// Clearance time stamped onto every track at setup.
    pub min_clearance_s: u64,
    /// GREEN is only legal on a RESERVED track.
    pub green_requires_reserved: bool,
    /// Bound on a train's speed history.
    pub speed_history_len: usize,
}

impl Default for SafetyRules {
    fn default() -> Self {
        Self {
            danger_zone_m: DEFAULT_DANGER_ZONE_M,
            min_separation_s: DEFAULT_MIN_SEPARATION_S,
            min_clearance_s: DEFAULT_MIN_CLEARANCE_S,
            green_requires_reserved: true,
            speed_history_len: DEFAULT_SPEED_HISTORY_LEN,
        }
    }
}

impl SafetyRules {
    /// Validate the rules.
    ///
    /// This must be called before handing the rules to an interlock.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.danger_zone_m.is_finite() || self.danger_zone_m <= 0.0 {
            return Err(ValidationError::InvalidRule {
                field: "danger_zone_m".to_string(),
                reason: "must be a positive finite distance".to_string(),
            });
        }
        if !self.min_separation_s.is_finite() || self.min_separation_s < 0.0 {
            return Err(ValidationError::InvalidRule {
                field: "min_separation_s".to_string(),
                reason: "must be a non-negative finite duration".to_string(),
            });
        }
        if self.speed_history_len == 0 {
            return Err(ValidationError::InvalidRule {
                field: "speed_history_len".to_string(),
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }

    /// Parse and validate rules from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        let rules: Self =
            serde_json::from_str(json).map_err(|e| ValidationError::MalformedRules {
                message: e.to_string(),
            })?;
        rules.validate()?;
        Ok(rules)
    }

    /// Read, parse and validate rules from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> RailResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| InterlockError::RulesFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text).map_err(RailError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rules_default_is_valid() {
        SafetyRules::default().validate().unwrap();
    }

    #[test]
    fn rules_reject_bad_limits() {
        let mut r = SafetyRules::default();
        r.danger_zone_m = 0.0;
        assert!(r.validate().is_err());

        let mut r = SafetyRules::default();
        r.danger_zone_m = f64::NAN;
        assert!(r.validate().is_err());

        let mut r = SafetyRules::default();
        r.min_separation_s = -1.0;
        assert!(r.validate().is_err());

        let mut r = SafetyRules::default();
        r.speed_history_len = 0;
        assert!(r.validate().is_err());
    }

    #[test]
    fn rules_partial_json_keeps_defaults() {
        let rules = SafetyRules::from_json_str(r#"{ "danger_zone_m": 750.0 }"#).unwrap();
        assert!((rules.danger_zone_m - 750.0).abs() < f64::EPSILON);
        assert!((rules.min_separation_s - DEFAULT_MIN_SEPARATION_S).abs() < f64::EPSILON);
        assert!(rules.green_requires_reserved);
    }

    #[test]
    fn rules_malformed_json_is_rejected() {
        let err = SafetyRules::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ValidationError::MalformedRules { .. }));
    }

    #[test]
    fn rules_missing_file_is_an_interlock_error() {
        let err = SafetyRules::from_json_file("/definitely/not/here.json").unwrap_err();
        assert!(err.is_interlock());
    }
}
