//! The engine's mutable state container: lifecycle state, active datapaths,
//! the playback clock, and config, bundled the way a single-threaded
//! scheduler owns them for the engine's whole lifetime.

use std::time::Instant;

use smallvec::SmallVec;

use crate::types::{Datapath, EngineState, MediaType, PlaybackClock, PlaybackRange, PlayerConfig, TrackId};

/// Everything a command procedure needs to read or mutate. One instance
/// lives for the lifetime of a player session, surviving across
/// `Prepare`/`Stop`/`Reset` cycles (only `Reset` clears the datapath table).
#[derive(Debug)]
pub struct EngineModel {
    pub state: EngineState,
    pub datapaths: Vec<Datapath>,
    pub clock: PlaybackClock,
    pub config: PlayerConfig,
    pub playback_range: PlaybackRange,
    next_track_id: TrackId,
    /// Set by `AcquireLicense`/error paths so a later sync query
    /// (`GetPVPlayerState`) can report why the engine ended up in `Error`.
    pub last_error: Option<crate::types::EngineError>,
}

impl EngineModel {
    pub fn new(now: Instant) -> Self {
        Self {
            state: EngineState::Idle,
            datapaths: Vec::new(),
            clock: PlaybackClock::new(now),
            config: PlayerConfig::default(),
            playback_range: PlaybackRange::default(),
            next_track_id: 0,
            last_error: None,
        }
    }

    /// Allocates a fresh datapath for a newly discovered track and adds it
    /// to the table, returning its id.
    pub fn add_datapath(&mut self, media_type: MediaType, has_decoder: bool) -> TrackId {
        let id = self.next_track_id;
        self.next_track_id += 1;
        self.datapaths.push(Datapath::new(id, media_type, has_decoder));
        id
    }

    pub fn datapath_mut(&mut self, track_id: TrackId) -> Option<&mut Datapath> {
        self.datapaths.iter_mut().find(|dp| dp.track_id == track_id)
    }

    /// `true` once every active datapath has drained its pending command
    /// count back to zero, meaning the current multi-phase procedure (an
    /// async command's node fan-out) has fully completed.
    pub fn all_datapaths_idle(&self) -> bool {
        self.datapaths
            .iter()
            .filter(|dp| dp.track_active)
            .all(|dp| dp.pending_cmd_count == 0)
    }

    /// `true` once every active datapath has reported end-of-data, the
    /// trigger for an automatic `AutoPause`.
    pub fn all_datapaths_at_end_of_data(&self) -> bool {
        let mut any_active = false;
        for dp in &self.datapaths {
            if !dp.track_active {
                continue;
            }
            any_active = true;
            if !dp.end_of_data_received {
                return false;
            }
        }
        any_active
    }

    /// Clears session state back to a fresh `Idle` engine, as `Reset` does.
    pub fn clear_session(&mut self, now: Instant) {
        self.datapaths.clear();
        self.clock = PlaybackClock::new(now);
        self.playback_range = PlaybackRange::default();
        self.next_track_id = 0;
        self.last_error = None;
        self.state = EngineState::Idle;
    }

    pub fn active_track_ids(&self) -> SmallVec<[TrackId; 4]> {
        self.datapaths
            .iter()
            .filter(|dp| dp.track_active)
            .map(|dp| dp.track_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MediaType;

    #[test]
    fn all_datapaths_idle_ignores_inactive_tracks() {
        let mut model = EngineModel::new(Instant::now());
        let a = model.add_datapath(MediaType::Video, true);
        let b = model.add_datapath(MediaType::Audio, false);
        model.datapath_mut(a).unwrap().begin_command();
        model.datapath_mut(b).unwrap().track_active = false;
        assert!(!model.all_datapaths_idle());
        model.datapath_mut(a).unwrap().end_command();
        assert!(model.all_datapaths_idle());
    }

    #[test]
    fn end_of_data_requires_every_active_track() {
        let mut model = EngineModel::new(Instant::now());
        let a = model.add_datapath(MediaType::Video, true);
        let b = model.add_datapath(MediaType::Audio, false);
        assert!(!model.all_datapaths_at_end_of_data());
        model.datapath_mut(a).unwrap().end_of_data_received = true;
        assert!(!model.all_datapaths_at_end_of_data());
        model.datapath_mut(b).unwrap().end_of_data_received = true;
        assert!(model.all_datapaths_at_end_of_data());
    }

    #[test]
    fn clear_session_resets_track_id_allocator() {
        let mut model = EngineModel::new(Instant::now());
        model.add_datapath(MediaType::Video, true);
        model.clear_session(Instant::now());
        assert!(model.datapaths.is_empty());
        let fresh = model.add_datapath(MediaType::Audio, false);
        assert_eq!(fresh, 0);
    }
}
