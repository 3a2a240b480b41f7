//! Platform track manager.

use std::fmt;

use tracing::info;

use crate::error::InterlockError;
use crate::id::{TrackId, TrainId};
use crate::track::{Track, TrackSnapshot};

use super::CommandRecord;

/// Owns the station's live tracks, in setup order.
#[derive(Debug, Clone)]
pub struct TrackManager {
    tracks: Vec<Track>,
    clearance_time: u64,
    command_log: Vec<CommandRecord>,
}

impl TrackManager {
    /// Empty manager stamping `clearance_time` onto every new track.
    #[must_use]
    pub fn new(clearance_time: u64) -> Self {
        Self {
            tracks: Vec::new(),
            clearance_time,
            command_log: Vec::new(),
        }
    }

    /// Manager pre-populated with `ids`, in order.
    ///
    /// # Errors
    ///
    /// Returns [`InterlockError::DuplicateId`] if an id appears twice.
    pub fn with_tracks<I, T>(ids: I, clearance_time: u64) -> Result<Self, InterlockError>
    where
        I: IntoIterator<Item = T>,
        T: Into<TrackId>,
    {
        let mut manager = Self::new(clearance_time);
        for id in ids {
            manager.add_track(id)?;
        }
        Ok(manager)
    }

    /// Registers a new FREE track.
    pub fn add_track(&mut self, id: impl Into<TrackId>) -> Result<&Track, InterlockError> {
        let id = id.into();
        if self.get_track(id.as_str()).is_some() {
            return Err(InterlockError::DuplicateId {
                kind: "track",
                id: id.to_string(),
            });
        }
        self.tracks.push(Track::new(id, self.clearance_time));
        Ok(&self.tracks[self.tracks.len() - 1])
    }

    /// Reserves the first FREE track for `train_id`.
    ///
    /// This does not consult the safety verifier; the verified path is
    /// [`Interlock::allocate_track`](crate::interlock::Interlock::allocate_track).
    pub fn allocate_track(&mut self, train_id: impl Into<TrainId>, eta_seconds: f64) -> Option<TrackId> {
        let train_id = train_id.into();
        let track = self.tracks.iter_mut().find(|t| t.is_free())?;
        if !track.reserve(train_id.clone(), eta_seconds) {
            return None;
        }
        let id = track.id().clone();
        info!(track = %id, train = %train_id, eta_seconds, "track reserved");
        self.command_log
            .push(CommandRecord::new(id.as_str(), "RESERVED", true, train_id.as_str()));
        Some(id)
    }

    /// Reserves a specific track. Returns false if it is unknown or not FREE.
    pub fn reserve(&mut self, track_id: &str, train_id: &TrainId, eta_seconds: f64) -> bool {
        let ok = self
            .get_track_mut(track_id)
            .is_some_and(|t| t.reserve(train_id.clone(), eta_seconds));
        self.log(track_id, "RESERVED", ok, train_id);
        ok
    }

    /// `RESERVED -> OCCUPIED` on `track_id` for `train_id`.
    pub fn occupy(&mut self, track_id: &str, train_id: &TrainId) -> bool {
        let ok = self.get_track_mut(track_id).is_some_and(|t| t.occupy(train_id));
        self.log(track_id, "OCCUPIED", ok, train_id);
        ok
    }

    /// `OCCUPIED -> CLEARING` on `track_id`.
    pub fn start_clearing(&mut self, track_id: &str) -> bool {
        let ok = self.get_track_mut(track_id).is_some_and(Track::start_clearing);
        self.log(track_id, "CLEARING", ok, "");
        ok
    }

    /// `CLEARING -> FREE` on `track_id`.
    pub fn clear(&mut self, track_id: &str) -> bool {
        let ok = self.get_track_mut(track_id).is_some_and(Track::clear);
        self.log(track_id, "FREE", ok, "");
        ok
    }

    /// Track by id.
    #[must_use]
    pub fn get_track(&self, track_id: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id() == track_id)
    }

    /// Mutable track by id. Changes made here bypass the command log.
    pub fn get_track_mut(&mut self, track_id: &str) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.id() == track_id)
    }

    /// Track currently held by `train_id`.
    #[must_use]
    pub fn get_track_for_train(&self, train_id: &str) -> Option<&Track> {
        self.tracks
            .iter()
            .find(|t| t.allocated_to().is_some_and(|a| a == train_id))
    }

    /// FREE track ids in setup order.
    pub fn free_track_ids(&self) -> impl Iterator<Item = &TrackId> + '_ {
        self.tracks.iter().filter(|t| t.is_free()).map(Track::id)
    }

    /// Snapshots of every track in setup order.
    #[must_use]
    pub fn get_all_states(&self) -> Vec<TrackSnapshot> {
        self.tracks.iter().map(Track::snapshot).collect()
    }

    /// Number of FREE tracks.
    #[must_use]
    pub fn get_free_track_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_free()).count()
    }

    /// True when no track is FREE.
    #[must_use]
    pub fn has_conflict(&self) -> bool {
        self.get_free_track_count() == 0
    }

    /// Commands handled so far.
    #[must_use]
    pub fn command_log(&self) -> &[CommandRecord] {
        &self.command_log
    }

    /// Number of tracks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Returns true if no track is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    fn log(&mut self, track_id: &str, new_state: &str, ok: bool, detail: impl fmt::Display) {
        let reason = if ok {
            detail.to_string()
        } else {
            format!("transition to {new_state} refused")
        };
        self.command_log
            .push(CommandRecord::new(track_id, new_state, ok, reason));
    }
}

impl fmt::Display for TrackManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TrackManager(tracks={}, free={})",
            self.tracks.len(),
            self.get_free_track_count()
        )
    }
}
