//! Reduces a client command against the current engine state: synchronous
//! commands resolve immediately, asynchronous ones describe the node
//! fan-out the caller still has to drive to completion.

use std::time::Instant;

use smallvec::{smallvec, SmallVec};

use crate::state::EngineModel;
use crate::types::{Command, CommandStatus, EngineState, QueryResult, TrackId};
use node_abi::NodeCommandKind;

/// Rate range every node in this workspace is assumed to support; a real
/// decoder/sink pair would report its own narrower range per codec, but
/// nothing in this stack's `Node` contract surfaces that yet.
const MIN_RATE_MILLIPERCENT: i64 = -400_000;
const MAX_RATE_MILLIPERCENT: i64 = 400_000;

/// Which datapaths a fanned-out node command targets.
#[derive(Clone, Debug, PartialEq)]
pub enum FanoutScope {
    /// Every currently active datapath (the common case: `Prepare`,
    /// `Start`, `Stop`, ...).
    AllActiveDatapaths,
    /// A single datapath, addressed by track id (`RemoveDataSource` for one
    /// track, a per-track seek skip).
    Track(TrackId),
}

/// One node command to submit per datapath in `scope`.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeFanout {
    pub scope: FanoutScope,
    pub kind: NodeCommandKind,
}

/// Result of reducing a command: either it's already done, or it needs a
/// node fan-out the caller drives via its own scheduler loop.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandOutcome {
    Sync(CommandStatus),
    /// A read-only query resolved with data attached, always at
    /// `CommandStatus::Success` (a query either answers or is rejected by
    /// `valid_in` before reaching here).
    Query(QueryResult),
    Fanout {
        next_state: EngineState,
        commands: SmallVec<[NodeFanout; 4]>,
    },
}

/// Trait for reducing a client command into either a synchronous result or
/// a node fan-out plan. `now` resolves queries and rate changes against the
/// caller's own clock rather than reading wall-clock time directly, so this
/// stays reproducible under a fake clock.
pub trait CommandReducer {
    fn reduce_command(&mut self, cmd: &Command, now: Instant) -> CommandOutcome;
}

impl CommandReducer for EngineModel {
    fn reduce_command(&mut self, cmd: &Command, now: Instant) -> CommandOutcome {
        if !cmd.valid_in(self.state) {
            return CommandOutcome::Sync(CommandStatus::Failed(
                crate::types::EngineError::InvalidState,
            ));
        }

        match cmd {
            Command::Init => CommandOutcome::Fanout {
                next_state: EngineState::Initializing,
                commands: smallvec![NodeFanout {
                    scope: FanoutScope::AllActiveDatapaths,
                    kind: NodeCommandKind::Init,
                }],
            },
            Command::Prepare => CommandOutcome::Fanout {
                next_state: EngineState::Preparing,
                commands: smallvec![NodeFanout {
                    scope: FanoutScope::AllActiveDatapaths,
                    kind: NodeCommandKind::Prepare,
                }],
            },
            Command::Start | Command::Resume => {
                let next_state = if self.state == EngineState::Paused {
                    EngineState::Resuming
                } else {
                    EngineState::Starting
                };
                let kind = if self.state == EngineState::Paused {
                    NodeCommandKind::Resume
                } else {
                    NodeCommandKind::Start
                };
                CommandOutcome::Fanout {
                    next_state,
                    commands: smallvec![NodeFanout {
                        scope: FanoutScope::AllActiveDatapaths,
                        kind,
                    }],
                }
            }
            Command::Pause => CommandOutcome::Fanout {
                next_state: EngineState::Pausing,
                commands: smallvec![NodeFanout {
                    scope: FanoutScope::AllActiveDatapaths,
                    kind: NodeCommandKind::Pause,
                }],
            },
            Command::AutoPause => CommandOutcome::Fanout {
                next_state: EngineState::AutoPausing,
                commands: smallvec![NodeFanout {
                    scope: FanoutScope::AllActiveDatapaths,
                    kind: NodeCommandKind::Pause,
                }],
            },
            Command::AutoResume => CommandOutcome::Fanout {
                next_state: EngineState::AutoResuming,
                commands: smallvec![NodeFanout {
                    scope: FanoutScope::AllActiveDatapaths,
                    kind: NodeCommandKind::Resume,
                }],
            },
            Command::Stop | Command::StopDueToError => CommandOutcome::Fanout {
                next_state: EngineState::Stopping,
                commands: smallvec![NodeFanout {
                    scope: FanoutScope::AllActiveDatapaths,
                    kind: NodeCommandKind::Stop,
                }],
            },
            Command::Reset | Command::ResetDueToError => CommandOutcome::Fanout {
                next_state: EngineState::Resetting,
                commands: smallvec![NodeFanout {
                    scope: FanoutScope::AllActiveDatapaths,
                    kind: NodeCommandKind::Reset,
                }],
            },
            Command::CancelDueToError => CommandOutcome::Fanout {
                next_state: EngineState::HandlingError,
                commands: smallvec![NodeFanout {
                    scope: FanoutScope::AllActiveDatapaths,
                    kind: NodeCommandKind::CancelAll,
                }],
            },
            Command::CleanupDueToError => {
                self.clear_session(now);
                self.state = EngineState::Idle;
                CommandOutcome::Sync(CommandStatus::Success)
            }
            Command::CancelAllCommands => CommandOutcome::Fanout {
                next_state: self.state,
                commands: smallvec![NodeFanout {
                    scope: FanoutScope::AllActiveDatapaths,
                    kind: NodeCommandKind::CancelAll,
                }],
            },
            Command::CancelCommand { target } => CommandOutcome::Fanout {
                next_state: self.state,
                commands: smallvec![NodeFanout {
                    scope: FanoutScope::AllActiveDatapaths,
                    kind: NodeCommandKind::Cancel(*target),
                }],
            },
            Command::CancelAcquireLicense => CommandOutcome::Sync(CommandStatus::Cancelled),
            // `AddDataSource`/`RemoveDataSink`/`RemoveDataSource` all resolve
            // to `Sync(Success)` here: this reducer only gates state
            // validity for them. The caller (the crate driving node handles)
            // recognizes each of those three as its own node-table procedure
            // rather than an actual immediate completion — see its own
            // dispatch logic.
            Command::AddDataSource { .. }
            | Command::RemoveDataSink
            | Command::RemoveDataSource
            | Command::AcquireLicense { .. } => CommandOutcome::Sync(CommandStatus::Success),
            // Resolved `Sync(Success)` here too: the caller recognizes this
            // specific (command, outcome) pair as "go run the seek
            // procedure" rather than an actual immediate completion, the
            // same way it treats `AddDataSource`. A seek can never reach
            // this reducer mid-transition: the caller only ever dispatches
            // one active async command at a time, so by the time a queued
            // `SetPlaybackRange` is popped the engine has already settled
            // into whatever steady state followed.
            Command::SetPlaybackRange(range) => {
                self.playback_range = *range;
                CommandOutcome::Sync(CommandStatus::Success)
            }
            Command::GetPlaybackRange => CommandOutcome::Query(QueryResult::PlaybackRange(self.playback_range)),
            Command::GetCurrentPosition => CommandOutcome::Query(QueryResult::CurrentPosition {
                position_ms: self.clock.position_ms(now),
            }),
            Command::SetPlaybackRate {
                rate_millipercent, ..
            } => {
                self.clock.set_rate(now, *rate_millipercent);
                CommandOutcome::Sync(CommandStatus::Success)
            }
            Command::GetPlaybackRate => CommandOutcome::Query(QueryResult::PlaybackRate {
                rate_millipercent: self.clock.rate_millipercent(),
            }),
            Command::GetPlaybackMinMaxRate => CommandOutcome::Query(QueryResult::PlaybackMinMaxRate {
                min_millipercent: MIN_RATE_MILLIPERCENT,
                max_millipercent: MAX_RATE_MILLIPERCENT,
            }),
            Command::GetSdkInfo => CommandOutcome::Query(QueryResult::SdkInfo(self.config.product_info.clone())),
            Command::GetPVPlayerState => CommandOutcome::Query(QueryResult::PVPlayerState(self.state)),
            Command::GetMetadataKeys
            | Command::GetMetadataValues { .. }
            | Command::QueryUuid
            | Command::QueryInterface { .. }
            | Command::SetLogLevel { .. }
            | Command::GetLogLevel { .. } => CommandOutcome::Sync(CommandStatus::Success),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MediaType;

    #[test]
    fn prepare_fans_out_to_all_active_datapaths() {
        let now = std::time::Instant::now();
        let mut model = EngineModel::new(now);
        model.add_datapath(MediaType::Video, true);
        model.state = EngineState::Initialized;
        match model.reduce_command(&Command::Prepare, now) {
            CommandOutcome::Fanout { next_state, commands } => {
                assert_eq!(next_state, EngineState::Preparing);
                assert_eq!(commands.len(), 1);
                assert_eq!(commands[0].kind, NodeCommandKind::Prepare);
            }
            other => panic!("expected fanout, got {other:?}"),
        }
    }

    #[test]
    fn invalid_command_in_state_rejected_synchronously() {
        let now = std::time::Instant::now();
        let mut model = EngineModel::new(now);
        assert_eq!(model.state, EngineState::Idle);
        let outcome = model.reduce_command(&Command::Start, now);
        assert_eq!(
            outcome,
            CommandOutcome::Sync(CommandStatus::Failed(crate::types::EngineError::InvalidState))
        );
    }

    #[test]
    fn start_from_paused_resumes_instead_of_starting() {
        let now = std::time::Instant::now();
        let mut model = EngineModel::new(now);
        model.state = EngineState::Paused;
        match model.reduce_command(&Command::Start, now) {
            CommandOutcome::Fanout { next_state, commands } => {
                assert_eq!(next_state, EngineState::Resuming);
                assert_eq!(commands[0].kind, NodeCommandKind::Resume);
            }
            other => panic!("expected fanout, got {other:?}"),
        }
    }

    #[test]
    fn cleanup_due_to_error_clears_session_back_to_idle() {
        let now = std::time::Instant::now();
        let mut model = EngineModel::new(now);
        model.add_datapath(MediaType::Audio, false);
        model.state = EngineState::HandlingError;
        let outcome = model.reduce_command(&Command::CleanupDueToError, now);
        assert_eq!(outcome, CommandOutcome::Sync(CommandStatus::Success));
        assert_eq!(model.state, EngineState::Idle);
        assert!(model.datapaths.is_empty());
    }
}
