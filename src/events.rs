//! Append-only audit log of interlock commands.
//!
//! Each command issued through the interlock leaves one event behind. The
//! log lives in memory and can optionally mirror every event to a JSON-lines
//! file for external audit tooling.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{InterlockError, RailResult};

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// Which part of the station an event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Train-level requests such as allocation.
    Train,
    /// Platform track transitions.
    Track,
    /// Signal aspect changes.
    Signal,
    /// Gate movements and proximity updates.
    Gate,
    /// Stand-alone verification requests.
    Verification,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Train => "TRAIN",
            Self::Track => "TRACK",
            Self::Signal => "SIGNAL",
            Self::Gate => "GATE",
            Self::Verification => "VERIFICATION",
        };
        f.write_str(s)
    }
}

/// What happened to the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventOutcome {
    /// Applied.
    Success,
    /// Not applicable (unknown id, illegal transition, bad input).
    Failure,
    /// Refused by the safety verifier.
    Blocked,
}

impl fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Blocked => "BLOCKED",
        };
        f.write_str(s)
    }
}

/// One audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier.
    pub id: EventId,
    /// When it was logged.
    pub timestamp: DateTime<Utc>,
    /// Area of the station.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Entity the command targeted.
    pub entity_id: String,
    /// Action requested.
    pub action: String,
    /// Outcome.
    pub result: EventOutcome,
    /// Free-text detail.
    pub details: String,
}

/// Append-only event log.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<Event>,
    sink: Option<(PathBuf, File)>,
}

impl EventLog {
    /// In-memory log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Log that also appends each event as a JSON line to `path`.
    pub fn with_file(path: impl AsRef<Path>) -> RailResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| InterlockError::EventSink {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            events: Vec::new(),
            sink: Some((path, file)),
        })
    }

    /// Appends an event. The in-memory entry is kept even if the file write fails.
    pub fn log_event(
        &mut self,
        kind: EventKind,
        entity_id: impl Into<String>,
        action: impl Into<String>,
        result: EventOutcome,
        details: impl Into<String>,
    ) -> RailResult<()> {
        let event = Event {
            id: EventId::new(),
            timestamp: Utc::now(),
            kind,
            entity_id: entity_id.into(),
            action: action.into(),
            result,
            details: details.into(),
        };
        let written = self.write_to_sink(&event);
        self.events.push(event);
        written
    }

    fn write_to_sink(&mut self, event: &Event) -> RailResult<()> {
        let Some((path, file)) = self.sink.as_mut() else {
            return Ok(());
        };
        let line = serde_json::to_string(event)
            .map_err(|e| crate::error::RailError::internal(format!("event encoding failed: {e}")))?;
        writeln!(file, "{line}").map_err(|source| InterlockError::EventSink {
            path: path.clone(),
            source,
        })?;
        Ok(())
    }

    /// All events, oldest first.
    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Up to `count` most recent events, oldest first.
    #[must_use]
    pub fn recent(&self, count: usize) -> &[Event] {
        let start = self.events.len().saturating_sub(count);
        &self.events[start..]
    }

    /// Events of one kind.
    pub fn by_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.events.iter().filter(move |e| e.kind == kind)
    }

    /// Events for one entity.
    pub fn by_entity<'a>(&'a self, entity_id: &'a str) -> impl Iterator<Item = &'a Event> + 'a {
        self.events.iter().filter(move |e| e.entity_id == entity_id)
    }

    /// Drops the in-memory events. The file sink, if any, is left as is.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Number of events held in memory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if nothing has been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl fmt::Display for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventLog(events={})", self.events.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EventLog {
        let mut log = EventLog::new();
        log.log_event(EventKind::Track, "P1", "RESERVE", EventOutcome::Success, "T001")
            .unwrap();
        log.log_event(EventKind::Signal, "S1", "GREEN", EventOutcome::Blocked, "not reserved")
            .unwrap();
        log.log_event(EventKind::Signal, "S2", "RED", EventOutcome::Success, "VERIFIED")
            .unwrap();
        log
    }

    #[test]
    fn test_recent_returns_tail() {
        let log = sample();
        let recent = log.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].entity_id, "S1");
        assert_eq!(log.recent(10).len(), 3);
        assert!(log.recent(0).is_empty());
    }

    #[test]
    fn test_filters() {
        let log = sample();
        assert_eq!(log.by_kind(EventKind::Signal).count(), 2);
        assert_eq!(log.by_entity("P1").count(), 1);
        assert_eq!(log.by_kind(EventKind::Gate).count(), 0);
    }

    #[test]
    fn test_clear() {
        let mut log = sample();
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn test_event_json_shape() {
        let log = sample();
        let json = serde_json::to_value(&log.events()[1]).unwrap();
        assert_eq!(json["type"], "SIGNAL");
        assert_eq!(json["result"], "BLOCKED");
    }

    #[test]
    fn test_file_sink_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        {
            let mut log = EventLog::with_file(&path).unwrap();
            log.log_event(EventKind::Gate, "G1", "OPEN", EventOutcome::Success, "OVERRIDE")
                .unwrap();
        }
        {
            let mut log = EventLog::with_file(&path).unwrap();
            log.log_event(EventKind::Gate, "G1", "CLOSED", EventOutcome::Success, "VERIFIED")
                .unwrap();
        }

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Event> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].action, "OPEN");
        assert_eq!(lines[1].details, "VERIFIED");
    }
}
