//! Data model shared by every datapath procedure: engine lifecycle state,
//! per-track datapath bookkeeping, the playback clock, tunable config, and
//! the client-facing command vocabulary.
//!
//! This crate holds state and pure state-transition predicates only. The
//! actual orchestration — fanning a command out across a datapath's nodes,
//! counting pending replies, arming a watchdog — lives in the crate that
//! drives the scheduler, since that's where node handles and the command
//! queue come together.

use std::time::Instant;

use node_abi::{NodeErrorKind, Uuid};
use smallvec::SmallVec;
use thiserror::Error;

/// Engine-level error, a superset of [`NodeErrorKind`] with the couple of
/// states a node never reports on its own (a command arriving in the wrong
/// engine state, or the client cancelling it).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("invalid argument")]
    Argument,
    #[error("out of memory")]
    NoMemory,
    #[error("insufficient resources")]
    NoResources,
    #[error("command not valid in the current engine state")]
    InvalidState,
    #[error("node is busy")]
    Busy,
    #[error("corrupt data")]
    Corrupt,
    #[error("command timed out")]
    Timeout,
    #[error("data underflow")]
    Underflow,
    #[error("data overflow")]
    Overflow,
    #[error("unspecified failure")]
    Failure,
}

impl From<NodeErrorKind> for EngineError {
    fn from(kind: NodeErrorKind) -> Self {
        match kind {
            NodeErrorKind::Argument => Self::Argument,
            NodeErrorKind::NoMemory => Self::NoMemory,
            NodeErrorKind::NoResources => Self::NoResources,
            NodeErrorKind::NotReady => Self::InvalidState,
            NodeErrorKind::Busy => Self::Busy,
            NodeErrorKind::Corrupt => Self::Corrupt,
            NodeErrorKind::Timeout => Self::Timeout,
            NodeErrorKind::Underflow => Self::Underflow,
            NodeErrorKind::Overflow => Self::Overflow,
            NodeErrorKind::Failure => Self::Failure,
        }
    }
}

/// Engine lifecycle states. Transitions happen one command (or one internal
/// error-handling command) at a time; a command whose `valid_in` set does
/// not include the current state is rejected synchronously rather than
/// queued.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Initializing,
    Initialized,
    Preparing,
    Prepared,
    Starting,
    Started,
    AutoPausing,
    AutoPaused,
    AutoResuming,
    Pausing,
    Paused,
    Resuming,
    Stopping,
    Resetting,
    HandlingError,
    Error,
}

impl EngineState {
    /// `true` once `Reset`/teardown has produced a clean `Idle`, i.e. the
    /// engine is ready for a fresh `AddDataSource`.
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Idle)
    }

    /// `true` for any of the three "doing auto-pause/resume bookkeeping"
    /// states, which reject ordinary client commands other than
    /// `CancelAllCommands` until the transition completes.
    pub fn is_auto_transitioning(self) -> bool {
        matches!(self, Self::AutoPausing | Self::AutoPaused | Self::AutoResuming)
    }
}

/// Coarse media kind a datapath carries, used to pick the right
/// `syncmargin_*`/clock-source config entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaType {
    Audio,
    Video,
    Text,
}

pub type TrackId = u32;

/// Per-track bookkeeping the engine keeps for the lifetime of a datapath:
/// which nodes back it, how many commands are still outstanding against it,
/// and whether it has reached end-of-data.
#[derive(Clone, Debug)]
pub struct Datapath {
    pub track_id: TrackId,
    pub media_type: MediaType,
    pub src_format: Uuid,
    pub sink_format: Uuid,
    pub track_active: bool,
    /// `true` once the decoder/sink pair has reported `EndOfData`.
    pub end_of_data_received: bool,
    /// Number of commands submitted to this datapath's nodes that have not
    /// yet completed. A multi-phase procedure (e.g. `Prepare`) is done once
    /// every active datapath's count returns to zero.
    pub pending_cmd_count: u32,
    /// `None` for datapaths whose codec is a pass-through (raw PCM, already
    /// demuxed text) and so never instantiate a decoder node.
    pub has_decoder: bool,
}

impl Datapath {
    pub fn new(track_id: TrackId, media_type: MediaType, has_decoder: bool) -> Self {
        Self {
            track_id,
            media_type,
            src_format: Uuid::from_bytes([0; 16]),
            sink_format: Uuid::from_bytes([0; 16]),
            track_active: true,
            end_of_data_received: false,
            pending_cmd_count: 0,
            has_decoder,
        }
    }

    pub fn begin_command(&mut self) {
        self.pending_cmd_count += 1;
    }

    /// Returns `true` once this datapath's fan-out for the current phase has
    /// fully drained.
    pub fn end_command(&mut self) -> bool {
        self.pending_cmd_count = self.pending_cmd_count.saturating_sub(1);
        self.pending_cmd_count == 0
    }
}

/// Requested (and, once resolved, actual) playback window in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaybackRange {
    pub start_ms: Option<u64>,
    pub end_ms: Option<u64>,
}

/// Monotonic playback timeline. Tracks the position at the last rate change
/// rather than integrating every tick, so `position_ms` is exact regardless
/// of how long it has been since the rate last changed:
///
/// `position(now) = clock_time_at_rate_change + (now - mono_time_at_rate_change) * rate / 100_000`
#[derive(Clone, Copy, Debug)]
pub struct PlaybackClock {
    mono_time_at_rate_change: Instant,
    clock_time_at_rate_change_ms: i64,
    /// Rate in millipercent: `100_000` is normal speed, negative runs the
    /// clock backward.
    rate_millipercent: i64,
    running: bool,
}

impl PlaybackClock {
    pub fn new(now: Instant) -> Self {
        Self {
            mono_time_at_rate_change: now,
            clock_time_at_rate_change_ms: 0,
            rate_millipercent: 100_000,
            running: false,
        }
    }

    pub fn rate_millipercent(&self) -> i64 {
        self.rate_millipercent
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Starts the clock running from `position_ms` as of `now`.
    pub fn start(&mut self, now: Instant, position_ms: i64) {
        self.mono_time_at_rate_change = now;
        self.clock_time_at_rate_change_ms = position_ms;
        self.running = true;
    }

    /// Freezes the clock at its current position, returning that position.
    pub fn stop(&mut self, now: Instant) -> i64 {
        let pos = self.position_ms(now);
        self.mono_time_at_rate_change = now;
        self.clock_time_at_rate_change_ms = pos;
        self.running = false;
        pos
    }

    /// Re-anchors the rate at `now` without disturbing the current
    /// position, so playback continues smoothly at the new speed instead of
    /// jumping. A no-op on the running flag when the clock is idle, since an
    /// idle clock has no phase to preserve.
    pub fn set_rate(&mut self, now: Instant, rate_millipercent: i64) {
        if self.running {
            let pos = self.position_ms(now);
            self.mono_time_at_rate_change = now;
            self.clock_time_at_rate_change_ms = pos;
        }
        self.rate_millipercent = rate_millipercent;
    }

    /// Current playback position in milliseconds.
    pub fn position_ms(&self, now: Instant) -> i64 {
        if !self.running {
            return self.clock_time_at_rate_change_ms;
        }
        let elapsed_ms = now
            .saturating_duration_since(self.mono_time_at_rate_change)
            .as_millis() as i64;
        self.clock_time_at_rate_change_ms + elapsed_ms * self.rate_millipercent / 100_000
    }
}

/// Product/version strings surfaced by `GetSDKInfo`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProductInfo {
    pub name: String,
    pub version: String,
}

/// Tunable knobs, mirroring the original contract's string-keyed config
/// registry but resolved into a typed struct up front: callers still set
/// values through string keys (`set_by_key`), but the engine reads typed
/// fields internally rather than re-parsing strings on every access.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    pub pbpos_enable: bool,
    pub pbpos_units_ms: bool,
    pub pbpos_interval_ms: u32,
    pub endtimecheck_interval_ms: u32,
    pub seek_to_sync_point: bool,
    pub skip_to_requested_pos: bool,
    pub render_skipped: bool,
    pub sync_point_seek_window_ms: u32,
    pub sync_margin_video_ms: u32,
    pub sync_margin_audio_ms: u32,
    pub sync_margin_text_ms: u32,
    pub node_cmd_timeout_ms: u32,
    pub node_data_queuing_timeout_ms: u32,
    pub product_info: ProductInfo,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            pbpos_enable: true,
            pbpos_units_ms: true,
            pbpos_interval_ms: 100,
            endtimecheck_interval_ms: 100,
            seek_to_sync_point: true,
            skip_to_requested_pos: true,
            render_skipped: false,
            sync_point_seek_window_ms: 330,
            sync_margin_video_ms: 120,
            sync_margin_audio_ms: 120,
            sync_margin_text_ms: 120,
            node_cmd_timeout_ms: 10_000,
            node_data_queuing_timeout_ms: 10_000,
            product_info: ProductInfo {
                name: "player-engine".to_string(),
                version: "1.0".to_string(),
            },
        }
    }
}

impl PlayerConfig {
    /// Sets a config value by its string key, returning `false` for an
    /// unrecognized key or a value of the wrong shape.
    pub fn set_by_key(&mut self, key: &str, value: &str) -> bool {
        match key {
            "pbpos_enable" => self.set_bool(value, |s, v| s.pbpos_enable = v),
            "pbpos_units" => self.set_bool(value, |s, v| s.pbpos_units_ms = v),
            "pbpos_interval" => self.set_u32(value, |s, v| s.pbpos_interval_ms = v),
            "endtimecheck_interval" => self.set_u32(value, |s, v| s.endtimecheck_interval_ms = v),
            "seektosyncpoint" => self.set_bool(value, |s, v| s.seek_to_sync_point = v),
            "skiptorequestedpos" => self.set_bool(value, |s, v| s.skip_to_requested_pos = v),
            "renderskipped" => self.set_bool(value, |s, v| s.render_skipped = v),
            "syncpointseekwindow" => self.set_u32(value, |s, v| s.sync_point_seek_window_ms = v),
            "syncmargin_video" => self.set_u32(value, |s, v| s.sync_margin_video_ms = v),
            "syncmargin_audio" => self.set_u32(value, |s, v| s.sync_margin_audio_ms = v),
            "syncmargin_text" => self.set_u32(value, |s, v| s.sync_margin_text_ms = v),
            "nodecmd_timeout" => self.set_u32(value, |s, v| s.node_cmd_timeout_ms = v),
            "nodedataqueuing_timeout" => {
                self.set_u32(value, |s, v| s.node_data_queuing_timeout_ms = v)
            }
            "productinfo.name" => {
                self.product_info.name = value.to_string();
                true
            }
            "productinfo.version" => {
                self.product_info.version = value.to_string();
                true
            }
            _ => false,
        }
    }

    fn set_bool(&mut self, value: &str, apply: impl FnOnce(&mut Self, bool)) -> bool {
        match value.parse::<bool>() {
            Ok(v) => {
                apply(self, v);
                true
            }
            Err(_) => false,
        }
    }

    fn set_u32(&mut self, value: &str, apply: impl FnOnce(&mut Self, u32)) -> bool {
        match value.parse::<u32>() {
            Ok(v) => {
                apply(self, v);
                true
            }
            Err(_) => false,
        }
    }
}

/// Client-facing and internal commands. Internal commands (`CancelDueToError`
/// and below) are never constructed by a client; the engine enqueues them at
/// a priority high enough to preempt whatever the client queued, using
/// [`ao_scheduler::CommandPriority`].
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    AddDataSource { uri: String, format: Uuid },
    Init,
    Prepare,
    Start,
    Pause,
    Resume,
    Stop,
    Reset,
    RemoveDataSink,
    RemoveDataSource,
    AcquireLicense { timeout_ms: u32 },
    CancelAcquireLicense,
    CancelAllCommands,
    SetPlaybackRange(PlaybackRange),
    GetPlaybackRange,
    GetCurrentPosition,
    SetPlaybackRate { rate_millipercent: i64 },
    GetPlaybackRate,
    GetPlaybackMinMaxRate,
    GetMetadataKeys,
    GetMetadataValues { keys: SmallVec<[String; 4]> },
    QueryUuid,
    QueryInterface { iface: Uuid },
    GetPVPlayerState,
    SetLogLevel { component: String, level: u8 },
    GetLogLevel { component: String },
    GetSdkInfo,
    /// Cancel a specific outstanding command by id (the `Cancel` half of the
    /// node contract's `Cancel(CommandId)`, surfaced at the engine level).
    CancelCommand { target: u64 },

    // --- internal, never client-constructed ---
    CancelDueToError,
    StopDueToError,
    ResetDueToError,
    CleanupDueToError,
    AutoPause,
    AutoResume,
}

impl Command {
    /// Whether this command completes synchronously against engine state
    /// alone (no node fan-out) or asynchronously once every datapath's
    /// fan-out drains.
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::GetPlaybackRange
            | Command::GetCurrentPosition
            | Command::GetPlaybackRate
            | Command::GetPlaybackMinMaxRate
            | Command::GetMetadataKeys
            | Command::GetMetadataValues { .. }
            | Command::QueryUuid
            | Command::QueryInterface { .. }
            | Command::GetPVPlayerState
            | Command::SetLogLevel { .. }
            | Command::GetLogLevel { .. }
            | Command::GetSdkInfo
            | Command::SetPlaybackRange(_)
            | Command::SetPlaybackRate { .. } => CommandKind::Sync,
            _ => CommandKind::Async,
        }
    }

    /// Priority this command is enqueued at, per the six-level scheme:
    /// error-path teardown preempts client API traffic, which in turn
    /// preempts end-of-clip auto-pause.
    pub fn priority(&self) -> ao_scheduler::CommandPriority {
        use ao_scheduler::CommandPriority as P;
        match self {
            Command::CancelDueToError => P::P1,
            Command::StopDueToError | Command::ResetDueToError | Command::CleanupDueToError => {
                P::P2
            }
            Command::CancelAllCommands | Command::CancelAcquireLicense => P::P3,
            Command::AutoPause | Command::AutoResume => P::P4,
            _ => P::P5,
        }
    }

    /// `true` if this command may be submitted while `state` holds, ignoring
    /// queueing order. `CancelAllCommands` and the internal error-path
    /// commands are valid in (almost) every state since they exist to get
    /// the engine out of one.
    pub fn valid_in(&self, state: EngineState) -> bool {
        use EngineState::*;
        match self {
            Command::CancelAllCommands
            | Command::CancelCommand { .. }
            | Command::CancelDueToError
            | Command::StopDueToError
            | Command::ResetDueToError
            | Command::CleanupDueToError
            | Command::GetPVPlayerState
            | Command::QueryUuid
            | Command::QueryInterface { .. }
            | Command::SetLogLevel { .. }
            | Command::GetLogLevel { .. }
            | Command::GetSdkInfo => true,
            Command::AddDataSource { .. } => matches!(state, Idle),
            Command::Init => matches!(state, Idle),
            Command::Prepare => matches!(state, Initialized),
            Command::Start | Command::Resume => matches!(state, Prepared | Paused),
            Command::Pause => matches!(state, Started),
            Command::AutoPause => matches!(state, Started),
            Command::AutoResume => matches!(state, AutoPaused),
            Command::Stop => matches!(
                state,
                Prepared | Starting | Started | Pausing | Paused | Resuming
            ),
            Command::Reset => !matches!(state, Idle | Resetting),
            Command::RemoveDataSink | Command::RemoveDataSource => matches!(state, Prepared),
            Command::AcquireLicense { .. } => !matches!(state, Idle | Error),
            Command::CancelAcquireLicense => true,
            Command::GetPlaybackRange | Command::SetPlaybackRange(_) => {
                matches!(state, Initialized | Prepared | Started | Paused)
            }
            Command::GetCurrentPosition => matches!(
                state,
                Prepared
                    | Starting
                    | Started
                    | AutoPausing
                    | AutoPaused
                    | AutoResuming
                    | Pausing
                    | Paused
                    | Resuming
            ),
            Command::SetPlaybackRate { .. } | Command::GetPlaybackRate => {
                matches!(state, Started | Paused)
            }
            Command::GetPlaybackMinMaxRate => !matches!(state, Idle),
            Command::GetMetadataKeys | Command::GetMetadataValues { .. } => {
                !matches!(state, Idle | Initializing)
            }
        }
    }
}

/// Tag distinguishing commands the engine resolves immediately from ones
/// that require a node fan-out and a subsequent `CommandCompleted`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    Sync,
    Async,
}

/// Terminal status an async command resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    Cancelled,
    Failed(EngineError),
}

/// Payload a read-only query command resolves to, carried alongside its
/// `CommandStatus::Success` rather than folded into it so a failed query
/// still reports a plain status.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryResult {
    CurrentPosition { position_ms: i64 },
    PlaybackRange(PlaybackRange),
    PlaybackRate { rate_millipercent: i64 },
    PlaybackMinMaxRate { min_millipercent: i64, max_millipercent: i64 },
    SdkInfo(ProductInfo),
    PVPlayerState(EngineState),
}
