//! Reduces a node event against a datapath: completion bookkeeping,
//! end-of-data tracking, and the auto-pause/auto-resume triggers a
//! `BufferUnderflow`/`DataReady` informational event produces.
//!
//! `NodeEvent::Error` carries no follow-up here: routing a node fault into
//! the right error-handling branch depends on the *whole engine's* current
//! state (idle, mid-transition, steady), which only the caller driving the
//! scheduler loop tracks. This reducer stays scoped to one datapath.

use smallvec::SmallVec;

use crate::state::EngineModel;
use crate::types::{Command, EngineState, TrackId};
use node_abi::{NodeEvent, NodeInfoEvent};

/// Commands the caller should enqueue as a consequence of reducing one
/// event (auto-pause on end-of-clip, auto-resume once data is flowing
/// again). Kept as a list since one event can in principle trigger more
/// than one deferred command.
pub type FollowUps = SmallVec<[Command; 2]>;

/// Trait for applying one node event, originating from the datapath
/// identified by `track_id`, to the engine model.
pub trait EventReducer {
    fn reduce_event(&mut self, track_id: TrackId, event: &NodeEvent) -> FollowUps;
}

impl EventReducer for EngineModel {
    fn reduce_event(&mut self, track_id: TrackId, event: &NodeEvent) -> FollowUps {
        let mut follow_ups = FollowUps::new();

        match event {
            NodeEvent::CommandCompleted { .. } => {
                if let Some(dp) = self.datapath_mut(track_id) {
                    dp.end_command();
                }
            }
            NodeEvent::Info(NodeInfoEvent::EndOfData) => {
                if let Some(dp) = self.datapath_mut(track_id) {
                    dp.end_of_data_received = true;
                }
                if self.state == EngineState::Started && self.all_datapaths_at_end_of_data() {
                    follow_ups.push(Command::AutoPause);
                }
            }
            NodeEvent::Info(NodeInfoEvent::BufferUnderflow) => {
                if self.state == EngineState::Started {
                    follow_ups.push(Command::AutoPause);
                }
            }
            NodeEvent::Info(NodeInfoEvent::DataReady) => {
                if self.state == EngineState::AutoPaused {
                    follow_ups.push(Command::AutoResume);
                }
            }
            NodeEvent::Error(_) => {}
        }

        follow_ups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MediaType;
    use node_abi::{NodeCommandStatus, NodeErrorKind};

    #[test]
    fn underflow_while_started_triggers_auto_pause() {
        let mut model = EngineModel::new(std::time::Instant::now());
        let track = model.add_datapath(MediaType::Audio, false);
        model.state = EngineState::Started;
        let follow_ups = model.reduce_event(track, &NodeEvent::Info(NodeInfoEvent::BufferUnderflow));
        assert_eq!(follow_ups.as_slice(), &[Command::AutoPause]);
    }

    #[test]
    fn data_ready_while_auto_paused_triggers_auto_resume() {
        let mut model = EngineModel::new(std::time::Instant::now());
        let track = model.add_datapath(MediaType::Audio, false);
        model.state = EngineState::AutoPaused;
        let follow_ups = model.reduce_event(track, &NodeEvent::Info(NodeInfoEvent::DataReady));
        assert_eq!(follow_ups.as_slice(), &[Command::AutoResume]);
    }

    #[test]
    fn end_of_data_waits_for_every_active_track() {
        let mut model = EngineModel::new(std::time::Instant::now());
        let a = model.add_datapath(MediaType::Video, true);
        let b = model.add_datapath(MediaType::Audio, false);
        model.state = EngineState::Started;
        let follow_ups = model.reduce_event(a, &NodeEvent::Info(NodeInfoEvent::EndOfData));
        assert!(follow_ups.is_empty());
        let follow_ups = model.reduce_event(b, &NodeEvent::Info(NodeInfoEvent::EndOfData));
        assert_eq!(follow_ups.as_slice(), &[Command::AutoPause]);
    }

    #[test]
    fn command_completed_decrements_pending_count() {
        let mut model = EngineModel::new(std::time::Instant::now());
        let track = model.add_datapath(MediaType::Video, true);
        model.datapath_mut(track).unwrap().begin_command();
        model.reduce_event(
            track,
            &NodeEvent::CommandCompleted { id: 1, status: NodeCommandStatus::Success },
        );
        assert_eq!(model.datapath_mut(track).unwrap().pending_cmd_count, 0);
    }

    #[test]
    fn unsolicited_node_error_produces_no_datapath_level_follow_up() {
        // the caller driving the scheduler loop (not this per-datapath
        // reducer) decides how a node fault routes through error handling.
        let mut model = EngineModel::new(std::time::Instant::now());
        let track = model.add_datapath(MediaType::Video, true);
        let follow_ups = model.reduce_event(track, &NodeEvent::Error(NodeErrorKind::Corrupt));
        assert!(follow_ups.is_empty());
    }
}
