//! Player engine: the command queue, node fan-out, and event-driven
//! follow-up loop that drives one playback session end to end.
//!
//! Mirrors the shape of other single-threaded schedulers in this
//! workspace — pop highest-priority work, reduce it, submit the resulting
//! commands, drain replies, repeat — generalized from a fixed
//! intent/report pair to an open command queue and per-datapath node
//! fan-out. Only one multi-phase command is ever in flight at a time (a
//! second `Start` while `Preparing` is still running would race the
//! fan-out's own completion bookkeeping); a higher-priority cancel/error
//! command preempts it rather than waiting behind it.

pub mod health;

use std::sync::Arc;

use smallvec::{smallvec, SmallVec};

use ao_scheduler::{Clock, CommandPriority, PriorityQueues, Watchdog, DEFAULT_WATCHDOG_TIMEOUT};
use engine_model::{
    Command, CommandOutcome, CommandReducer, CommandStatus, EngineError, EngineModel,
    EngineState, EventReducer, FanoutScope, MediaType, NodeFanout, PlaybackRange, QueryResult,
    TrackId,
};
use hub::{NodeFactory, NodeHub, TrackNodes};
use node_abi::{
    CommandId, NodeCommand, NodeCommandKind, NodeCommandStatus, NodeEvent, NodeHandle,
    NodeInfoEvent, ParamValue, SubmitOutcome, TrackMediaType,
};

/// Default number of commands the engine tries to process per tick before
/// yielding, mirroring other schedulers' per-tick budgets in this
/// workspace.
pub const DEFAULT_COMMAND_BUDGET: usize = 3;
/// Default number of node events drained per tick.
pub const DEFAULT_EVENT_BUDGET: usize = hub::DEFAULT_EVENT_BUDGET;

/// Observable outcome of one `run_tick` call, surfaced to whatever drives
/// the engine's event loop.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// A client command reached a terminal state.
    CommandCompleted { id: CommandId, status: CommandStatus },
    /// A read-only query resolved with data attached.
    QueryCompleted { id: CommandId, result: QueryResult },
    /// The node fan-out for the active async command timed out; the engine
    /// has begun error teardown.
    Watchdog,
    /// An async fault not tied to any one client command, reported once
    /// error handling has run its course (or immediately, if the engine was
    /// already at rest when the fault occurred).
    Error(EngineError),
    /// A node-reported condition surfaced for visibility — e.g. a source
    /// underflow that triggered an auto-pause — distinct from a fault
    /// because nothing failed.
    Informational(InformationalEvent),
}

/// Conditions nodes report that are worth surfacing to a client even though
/// they don't represent a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InformationalEvent {
    /// A source ran low on buffered data; the engine auto-paused.
    SourceUnderflow,
    /// A previously underflowing source has data flowing again.
    DataReady,
    /// Every active track has reported end of stream.
    EndOfData,
}

fn informational_event_for(info: NodeInfoEvent) -> InformationalEvent {
    match info {
        NodeInfoEvent::BufferUnderflow => InformationalEvent::SourceUnderflow,
        NodeInfoEvent::DataReady => InformationalEvent::DataReady,
        NodeInfoEvent::EndOfData => InformationalEvent::EndOfData,
    }
}

/// Why the shared Stop→Reset→Cleanup teardown chain is running, so
/// `finish_teardown` knows whether to land on `Idle` with the pending queue
/// cancelled or on `Error` with a client notification. The fault that
/// started an error-driven teardown is carried here rather than read back
/// off `model.last_error` at the end of the chain, since `ResetDueToError`'s
/// own completion clears that field the same way a plain `Reset` does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TeardownReason {
    Cancelled,
    Error(EngineError),
}

fn is_transient_state(state: EngineState) -> bool {
    use EngineState::*;
    matches!(
        state,
        Initializing | Preparing | Starting | Pausing | Resuming | AutoPausing | AutoResuming | Stopping
    )
}

struct QueuedCommand {
    id: CommandId,
    command: Command,
}

/// The multi-phase command currently being driven to completion across the
/// node table.
struct ActiveAsync {
    id: CommandId,
    command: Command,
}

/// Which procedure is waiting on `pending_source_cmd`'s completion, since
/// both `AddDataSource` and a seek's first phase submit a command directly
/// to the source node rather than fanning out across datapaths.
enum SourceOp {
    None,
    AddDataSource,
    /// Awaiting the source's `SetDataSourcePosition` reply. `pre_seek_ms` is
    /// restored as the clock position if the seek fails or is preempted
    /// before the sink-skip phase begins.
    Seek { target_ms: i64, pre_seek_ms: i64 },
}

/// Target/pre-seek position pair applied once the seek's sink-skip fan-out
/// (tracked via the normal per-datapath `pending_cmd_count` machinery)
/// drains, restarting the clock at `target_ms` on success or `pre_seek_ms`
/// if the fan-out is cancelled or fails.
struct PendingSeekRestart {
    target_ms: i64,
    pre_seek_ms: i64,
}

/// Drives one playback session: owns the data model, the live node table,
/// the command queue, and the watchdog guarding the in-flight fan-out.
pub struct PlayerEngine<C: Clock> {
    model: EngineModel,
    nodes: NodeHub,
    commands: PriorityQueues<QueuedCommand>,
    next_cmd_id: CommandId,
    command_budget: usize,
    event_budget: usize,
    watchdog: Watchdog,
    clock: C,
    active: Option<ActiveAsync>,
    /// Id of the node command submitted directly to the source node for the
    /// in-flight `AddDataSource` or seek, as opposed to a per-datapath
    /// fan-out.
    pending_source_cmd: Option<CommandId>,
    source_op: SourceOp,
    pending_seek_restart: Option<PendingSeekRestart>,
    node_factory: Option<Arc<dyn NodeFactory>>,
    health: health::Health,
    /// Set while the Stop→Reset→Cleanup teardown chain is running, so its
    /// completion knows whether it's cancelling a session or handling a
    /// fault.
    teardown_reason: Option<TeardownReason>,
    /// A fresh fault arrived while a previous one was still tearing down;
    /// noted rather than acted on, since only one teardown chain runs at a
    /// time.
    error_during_error_handling: bool,
}

impl<C: Clock> PlayerEngine<C> {
    pub fn new(clock: C) -> Self {
        Self::with_budgets(clock, DEFAULT_COMMAND_BUDGET, DEFAULT_EVENT_BUDGET)
    }

    pub fn with_budgets(clock: C, command_budget: usize, event_budget: usize) -> Self {
        let now = clock.now();
        Self {
            model: EngineModel::new(now),
            nodes: NodeHub::new(),
            commands: PriorityQueues::new(),
            next_cmd_id: 1,
            command_budget,
            event_budget,
            watchdog: Watchdog::new(),
            clock,
            active: None,
            pending_source_cmd: None,
            source_op: SourceOp::None,
            pending_seek_restart: None,
            node_factory: None,
            health: health::Health::default(),
            teardown_reason: None,
            error_during_error_handling: false,
        }
    }

    /// Registers the factory used to instantiate a track's decoder/sink
    /// nodes once `AddDataSource` has discovered it. Without one,
    /// `AddDataSource` still completes but leaves newly discovered tracks
    /// without nodes in the hub, e.g. when a test wires datapaths up by hand
    /// instead.
    pub fn set_node_factory(&mut self, factory: Arc<dyn NodeFactory>) {
        self.node_factory = Some(factory);
    }

    pub fn model(&self) -> &EngineModel {
        &self.model
    }

    /// Mutable access to the data model, for seeding datapaths once a
    /// discovery procedure (outside this crate's scope today) has queried
    /// the source for its tracks.
    pub fn model_mut(&mut self) -> &mut EngineModel {
        &mut self.model
    }

    pub fn nodes_mut(&mut self) -> &mut NodeHub {
        &mut self.nodes
    }

    pub fn health(&self) -> health::Health {
        self.health
    }

    /// True if a second node fault arrived while an earlier one was still
    /// tearing down. Only one teardown chain runs at a time, so the later
    /// fault is swallowed; a client can poll this to notice the overlap.
    pub fn had_concurrent_fault(&self) -> bool {
        self.error_during_error_handling
    }

    /// Enqueues a client command, returning the id its eventual
    /// `EngineEvent::CommandCompleted` will carry for `Async` commands.
    /// `Sync` commands still get an id for API uniformity even though they
    /// resolve within the same `run_tick` that dequeues them.
    pub fn submit(&mut self, command: Command) -> CommandId {
        let id = self.next_cmd_id;
        self.next_cmd_id += 1;
        let priority = command.priority();
        self.commands.enqueue(priority, QueuedCommand { id, command });
        id
    }

    fn next_node_cmd_id(next_cmd_id: &mut CommandId) -> CommandId {
        let id = *next_cmd_id;
        *next_cmd_id += 1;
        id
    }

    /// Runs one scheduling pass: drains node events, advances or starts the
    /// active async command, and processes queued synchronous commands up
    /// to budget.
    pub fn run_tick(&mut self) -> SmallVec<[EngineEvent; 4]> {
        let mut out = SmallVec::new();

        if self.watchdog.is_expired(&self.clock) {
            self.watchdog.disarm();
            out.push(EngineEvent::Watchdog);
            self.enter_error_handling(EngineError::Timeout, &mut out);
        }

        self.drain_node_events(&mut out);

        if self.active.is_none() {
            self.process_queue(&mut out);
        } else {
            self.process_preempting_commands(&mut out);
        }

        out
    }

    fn drain_node_events(&mut self, out: &mut SmallVec<[EngineEvent; 4]>) {
        let events = self.nodes.drain_events(self.event_budget);
        for (track_id, event) in events {
            if track_id.is_none() {
                if let NodeEvent::CommandCompleted { id, status } = &event {
                    if Some(*id) == self.pending_source_cmd {
                        self.pending_source_cmd = None;
                        match std::mem::replace(&mut self.source_op, SourceOp::None) {
                            SourceOp::AddDataSource => {
                                let status = self.finish_add_data_source(*status);
                                self.complete_active(status, out);
                            }
                            SourceOp::Seek { target_ms, pre_seek_ms } => {
                                self.continue_seek_after_source(*status, target_ms, pre_seek_ms, out);
                            }
                            SourceOp::None => {}
                        }
                        continue;
                    }
                }
            }
            self.apply_node_event(track_id, &event, out);
        }
        // A cancel/error teardown command queued this same tick must still get
        // to preempt the active command in `process_preempting_commands`, so
        // don't declare the active command a plain success out from under it
        // just because its datapaths happened to go idle first.
        let preempting_queued =
            self.commands.current_priority().is_some_and(|p| p <= CommandPriority::P3);
        if self.active.is_some()
            && self.pending_source_cmd.is_none()
            && self.model.all_datapaths_idle()
            && !preempting_queued
        {
            self.complete_active(CommandStatus::Success, out);
        }
    }

    /// Runs track discovery once the source node's `Init` has completed,
    /// translating its success/failure into the `AddDataSource` command's
    /// own completion status.
    fn finish_add_data_source(&mut self, status: NodeCommandStatus) -> CommandStatus {
        match status {
            NodeCommandStatus::Success => {
                self.discover_tracks();
                CommandStatus::Success
            }
            NodeCommandStatus::Cancelled => CommandStatus::Cancelled,
            NodeCommandStatus::Failed(kind) => CommandStatus::Failed(kind.into()),
        }
    }

    /// Queries the source node for the tracks it parsed out of its
    /// container and populates the model/hub with a datapath and node pair
    /// for each.
    fn discover_tracks(&mut self) {
        let Some(source) = self.nodes.source().cloned() else {
            return;
        };
        for desc in source.track_info() {
            let media_type = match desc.media_type {
                TrackMediaType::Audio => MediaType::Audio,
                TrackMediaType::Video => MediaType::Video,
                TrackMediaType::Text => MediaType::Text,
            };
            let track_id = self.model.add_datapath(media_type, desc.has_decoder);
            if let Some(dp) = self.model.datapath_mut(track_id) {
                dp.src_format = desc.format;
            }
            if let Some(factory) = &self.node_factory {
                let decoder = if desc.has_decoder { factory.create_decoder(&desc) } else { None };
                let sink = factory.create_sink(&desc);
                self.nodes.add_track(track_id, TrackNodes { decoder, sink });
            }
        }
    }

    /// Resumes a seek once the source's `SetDataSourcePosition` reply
    /// arrives: on success, moves to the sink-skip fan-out; otherwise
    /// restores the clock to where it was before the seek and completes the
    /// command with the source's status.
    fn continue_seek_after_source(
        &mut self,
        status: NodeCommandStatus,
        target_ms: i64,
        pre_seek_ms: i64,
        out: &mut SmallVec<[EngineEvent; 4]>,
    ) {
        let Some(active) = self.active.take() else {
            return;
        };
        self.watchdog.disarm();
        match status {
            NodeCommandStatus::Success => {
                self.begin_skip_phase(active.id, active.command, target_ms, pre_seek_ms, out);
            }
            NodeCommandStatus::Cancelled => {
                self.model.clock.start(self.clock.now(), pre_seek_ms);
                self.finish(active.id, &active.command, CommandStatus::Cancelled, out);
            }
            NodeCommandStatus::Failed(kind) => {
                self.model.clock.start(self.clock.now(), pre_seek_ms);
                self.finish(active.id, &active.command, CommandStatus::Failed(kind.into()), out);
            }
        }
    }

    fn apply_node_event(
        &mut self,
        track_id: Option<TrackId>,
        event: &NodeEvent,
        out: &mut SmallVec<[EngineEvent; 4]>,
    ) {
        match event {
            NodeEvent::CommandCompleted { status: NodeCommandStatus::Failed(kind), .. }
            | NodeEvent::Error(kind) => {
                self.enter_error_handling((*kind).into(), out);
            }
            NodeEvent::Info(info) => {
                out.push(EngineEvent::Informational(informational_event_for(*info)));
            }
            _ => {}
        }

        let Some(track_id) = track_id else {
            return;
        };
        let follow_ups = self.model.reduce_event(track_id, event);
        for follow_up in follow_ups {
            match follow_up {
                Command::AutoPause if self.health.in_relief() => continue,
                Command::AutoPause => self.health.begin_relief(3),
                Command::AutoResume => self.health.clear_on_data_ready(),
                _ => {}
            }
            self.submit(follow_up);
        }
    }

    /// Routes an async fault into the state-dependent policy: report and
    /// stay if the engine is already idle or already in `Error`; fold into
    /// an in-flight cancellation (`CancelDueToError`) from a mid-transition
    /// state; otherwise start the `StopDueToError`→`ResetDueToError`→
    /// `CleanupDueToError` teardown from a steady state. Both of the latter
    /// converge on the same chain, driven onward from `finish`, ending in
    /// `Error` with a client notification. A fault arriving while one is
    /// already in progress just sets `error_during_error_handling`.
    fn enter_error_handling(&mut self, error: EngineError, out: &mut SmallVec<[EngineEvent; 4]>) {
        self.model.last_error = Some(error);

        if matches!(self.model.state, EngineState::Idle | EngineState::Error) {
            out.push(EngineEvent::Error(error));
            return;
        }

        if matches!(self.teardown_reason, Some(TeardownReason::Error(_))) {
            self.error_during_error_handling = true;
            return;
        }

        let was_transient = is_transient_state(self.model.state);
        self.teardown_reason = Some(TeardownReason::Error(error));
        self.model.state = EngineState::HandlingError;
        if was_transient {
            self.submit(Command::CancelDueToError);
        } else {
            self.submit(Command::StopDueToError);
        }
    }

    /// Drains commands at priority `P3` and above (cancel/error teardown)
    /// even while an async command is still in flight, so a cancellation
    /// never waits behind the command it's cancelling.
    fn process_preempting_commands(&mut self, out: &mut SmallVec<[EngineEvent; 4]>) {
        while let Some(priority) = self.commands.current_priority() {
            if priority > CommandPriority::P3 {
                break;
            }
            let Some(queued) = self.commands.pop_next() else {
                break;
            };
            self.dispatch(queued, out);
        }
    }

    fn process_queue(&mut self, out: &mut SmallVec<[EngineEvent; 4]>) {
        let mut budget = self.command_budget;
        while budget > 0 && self.active.is_none() {
            let Some(queued) = self.commands.pop_next() else {
                break;
            };
            budget -= 1;
            self.dispatch(queued, out);
        }
    }

    fn dispatch(&mut self, queued: QueuedCommand, out: &mut SmallVec<[EngineEvent; 4]>) {
        let QueuedCommand { id, command } = queued;

        if let Some(previous) = self.active.take() {
            // A higher-priority command preempted the one in flight; it
            // never reaches its own terminal state on its own merits.
            self.watchdog.disarm();
            self.pending_source_cmd = None;
            if let SourceOp::Seek { pre_seek_ms, .. } =
                std::mem::replace(&mut self.source_op, SourceOp::None)
            {
                self.model.clock.start(self.clock.now(), pre_seek_ms);
            }
            if let Some(restart) = self.pending_seek_restart.take() {
                self.model.clock.start(self.clock.now(), restart.pre_seek_ms);
            }
            out.push(EngineEvent::CommandCompleted {
                id: previous.id,
                status: CommandStatus::Cancelled,
            });
        }

        let now = self.clock.now();
        match self.model.reduce_command(&command, now) {
            CommandOutcome::Sync(CommandStatus::Success)
                if matches!(command, Command::AddDataSource { .. }) =>
            {
                self.begin_add_data_source(id, command, out);
            }
            CommandOutcome::Sync(CommandStatus::Success)
                if matches!(command, Command::RemoveDataSink) =>
            {
                self.remove_data_sink();
                out.push(EngineEvent::CommandCompleted { id, status: CommandStatus::Success });
            }
            CommandOutcome::Sync(CommandStatus::Success)
                if matches!(command, Command::RemoveDataSource) =>
            {
                self.remove_data_source(now);
                out.push(EngineEvent::CommandCompleted { id, status: CommandStatus::Success });
            }
            CommandOutcome::Sync(CommandStatus::Success)
                if matches!(command, Command::SetPlaybackRange(_)) =>
            {
                let Command::SetPlaybackRange(range) = command else { unreachable!() };
                self.begin_seek(id, range, out);
            }
            CommandOutcome::Sync(status) if matches!(command, Command::CleanupDueToError) => {
                // Resolves synchronously (no node fan-out), but still needs
                // to run through `finish` so the Stop→Reset→Cleanup chain's
                // final bookkeeping (landing state, client notification,
                // pending-queue drain) fires.
                self.finish(id, &command, status, out);
            }
            CommandOutcome::Sync(status) => {
                out.push(EngineEvent::CommandCompleted { id, status });
            }
            CommandOutcome::Query(result) => {
                out.push(EngineEvent::QueryCompleted { id, result });
            }
            CommandOutcome::Fanout { next_state, commands } => {
                self.model.state = next_state;
                for dp in self.model.datapaths.iter_mut().filter(|dp| dp.track_active) {
                    dp.pending_cmd_count = 0;
                }

                let mut any_submitted = false;
                for fanout in &commands {
                    let results = {
                        let next_id = &mut self.next_cmd_id;
                        self.nodes
                            .submit_fanout(fanout, || Self::next_node_cmd_id(next_id))
                    };
                    for (track_id, _node_cmd_id, outcome) in results {
                        any_submitted = true;
                        if matches!(outcome, SubmitOutcome::Accepted | SubmitOutcome::WouldBlock) {
                            if let Some(dp) = self.model.datapath_mut(track_id) {
                                dp.begin_command();
                            }
                        }
                    }
                }

                if targets_all_datapaths(&commands) && !any_submitted {
                    // No active datapaths to fan out to (e.g. `Prepare`
                    // issued with zero tracks) resolves immediately.
                    self.finish(id, &command, CommandStatus::Success, out);
                    return;
                }

                self.active = Some(ActiveAsync { id, command });
                self.watchdog.arm(&self.clock, DEFAULT_WATCHDOG_TIMEOUT);
            }
        }
    }

    /// Starts `AddDataSource`'s own two-phase procedure: `Init` the source
    /// node directly (it has no datapath of its own yet), then discover its
    /// tracks once that completes.
    fn begin_add_data_source(
        &mut self,
        id: CommandId,
        command: Command,
        out: &mut SmallVec<[EngineEvent; 4]>,
    ) {
        let node_id = Self::next_node_cmd_id(&mut self.next_cmd_id);
        let submit = self.nodes.submit_to_source(NodeCommand { id: node_id, kind: NodeCommandKind::Init });
        match submit {
            Ok(SubmitOutcome::Accepted | SubmitOutcome::WouldBlock) => {
                self.pending_source_cmd = Some(node_id);
                self.source_op = SourceOp::AddDataSource;
                self.active = Some(ActiveAsync { id, command });
                self.watchdog.arm(&self.clock, DEFAULT_WATCHDOG_TIMEOUT);
            }
            Ok(SubmitOutcome::CompletedSync) => {
                self.discover_tracks();
                self.finish(id, &command, CommandStatus::Success, out);
            }
            Ok(SubmitOutcome::NotReady | SubmitOutcome::Closed) => {
                self.finish(id, &command, CommandStatus::Failed(EngineError::NoResources), out);
            }
            Err(_) => {
                self.finish(id, &command, CommandStatus::Failed(EngineError::Argument), out);
            }
        }
    }

    /// Drops every track's decoder/sink pair from the node table, leaving
    /// the source and its discovered datapaths in place but inactive, so a
    /// later `AddDataSource`-less re-attach of fresh sinks (outside this
    /// crate's scope today) would have the track list to work from.
    fn remove_data_sink(&mut self) {
        for track_id in self.model.active_track_ids() {
            self.nodes.remove_track(track_id);
            if let Some(dp) = self.model.datapath_mut(track_id) {
                dp.track_active = false;
            }
        }
    }

    /// Tears the whole session down: drops the source and every track's
    /// nodes, and clears the data model back to a fresh `Idle` session ready
    /// for the next `AddDataSource`.
    fn remove_data_source(&mut self, now: std::time::Instant) {
        self.nodes.clear();
        self.model.clear_session(now);
    }

    /// Starts a seek: stops the clock, asks the source what position a seek
    /// to `range.start_ms` will actually land on, then sends it
    /// `SetDataSourcePosition`. A range with no `start_ms` only narrows the
    /// playback window and completes immediately, since there's nothing to
    /// move.
    fn begin_seek(&mut self, id: CommandId, range: PlaybackRange, out: &mut SmallVec<[EngineEvent; 4]>) {
        let Some(requested_ms) = range.start_ms else {
            out.push(EngineEvent::CommandCompleted { id, status: CommandStatus::Success });
            return;
        };

        let now = self.clock.now();
        let pre_seek_ms = self.model.clock.stop(now);
        let target_ms = self
            .nodes
            .source()
            .map(|source| source.seek_target(requested_ms))
            .unwrap_or(requested_ms) as i64;

        let node_id = Self::next_node_cmd_id(&mut self.next_cmd_id);
        let submit = self.nodes.submit_to_source(NodeCommand {
            id: node_id,
            kind: NodeCommandKind::Custom {
                name: "SetDataSourcePosition",
                params: smallvec![ParamValue::Pos(target_ms.max(0) as u64)],
            },
        });
        let command = Command::SetPlaybackRange(range);
        match submit {
            Ok(SubmitOutcome::Accepted | SubmitOutcome::WouldBlock) => {
                self.pending_source_cmd = Some(node_id);
                self.source_op = SourceOp::Seek { target_ms, pre_seek_ms };
                self.active = Some(ActiveAsync { id, command });
                self.watchdog.arm(&self.clock, DEFAULT_WATCHDOG_TIMEOUT);
            }
            Ok(SubmitOutcome::CompletedSync) => {
                self.begin_skip_phase(id, command, target_ms, pre_seek_ms, out);
            }
            Ok(SubmitOutcome::NotReady | SubmitOutcome::Closed) | Err(_) => {
                self.model.clock.start(self.clock.now(), pre_seek_ms);
                self.finish(id, &command, CommandStatus::Failed(EngineError::NoResources), out);
            }
        }
    }

    /// Fans `SkipMediaData` out to every active datapath's nodes with the
    /// pre- and post-seek timestamps, so each sink can flush buffers that
    /// fall in the skip window. Restarting the clock at `target_ms` happens
    /// once this fan-out drains, in `complete_active`.
    fn begin_skip_phase(
        &mut self,
        id: CommandId,
        command: Command,
        target_ms: i64,
        pre_seek_ms: i64,
        out: &mut SmallVec<[EngineEvent; 4]>,
    ) {
        let fanout = NodeFanout {
            scope: FanoutScope::AllActiveDatapaths,
            kind: NodeCommandKind::Custom {
                name: "SkipMediaData",
                params: smallvec![
                    ParamValue::Pos(pre_seek_ms.max(0) as u64),
                    ParamValue::Pos(target_ms.max(0) as u64),
                ],
            },
        };
        for dp in self.model.datapaths.iter_mut().filter(|dp| dp.track_active) {
            dp.pending_cmd_count = 0;
        }

        let mut any_submitted = false;
        let results = {
            let next_id = &mut self.next_cmd_id;
            self.nodes.submit_fanout(&fanout, || Self::next_node_cmd_id(next_id))
        };
        for (track_id, _node_cmd_id, outcome) in results {
            any_submitted = true;
            if matches!(outcome, SubmitOutcome::Accepted | SubmitOutcome::WouldBlock) {
                if let Some(dp) = self.model.datapath_mut(track_id) {
                    dp.begin_command();
                }
            }
        }

        if !any_submitted {
            // No active datapaths to skip against (e.g. a seek before
            // `Prepare` ever ran): land the clock and finish now.
            self.model.clock.start(self.clock.now(), target_ms);
            self.finish(id, &command, CommandStatus::Success, out);
            return;
        }

        self.pending_seek_restart = Some(PendingSeekRestart { target_ms, pre_seek_ms });
        self.active = Some(ActiveAsync { id, command });
        self.watchdog.arm(&self.clock, DEFAULT_WATCHDOG_TIMEOUT);
    }

    fn complete_active(&mut self, status: CommandStatus, out: &mut SmallVec<[EngineEvent; 4]>) {
        if let Some(active) = self.active.take() {
            self.watchdog.disarm();
            if let Some(restart) = self.pending_seek_restart.take() {
                let now = self.clock.now();
                let landing_ms = if matches!(status, CommandStatus::Success) {
                    restart.target_ms
                } else {
                    restart.pre_seek_ms
                };
                self.model.clock.start(now, landing_ms);
            }
            self.finish(active.id, &active.command, status, out);
        }
    }

    /// Applies the state transition a command's terminal status implies and
    /// emits its completion event. `Reset` additionally clears the whole
    /// session rather than just flipping the state tag.
    fn finish(
        &mut self,
        id: CommandId,
        command: &Command,
        status: CommandStatus,
        out: &mut SmallVec<[EngineEvent; 4]>,
    ) {
        let is_reset = matches!(command, Command::Reset | Command::ResetDueToError);
        if is_reset && matches!(status, CommandStatus::Success) {
            let now = self.clock.now();
            self.model.clear_session(now);
        } else if let Some(next_state) = terminal_state_for(command, status) {
            self.model.state = next_state;
        }
        out.push(EngineEvent::CommandCompleted { id, status });

        // Drive the shared Stop→Reset→Cleanup teardown chain onward.
        // `CancelAllCommands` and a mid-transition `CancelDueToError` both
        // feed into it once their own node fan-out drains;
        // `StopDueToError`/`ResetDueToError` relay to the next step;
        // `CleanupDueToError` is the chain's last step.
        match command {
            Command::CancelAllCommands if matches!(status, CommandStatus::Success) => {
                self.teardown_reason = Some(TeardownReason::Cancelled);
                self.model.state = EngineState::Resetting;
                self.submit(Command::StopDueToError);
            }
            Command::CancelDueToError if matches!(status, CommandStatus::Success) => {
                self.model.state = EngineState::Resetting;
                self.submit(Command::StopDueToError);
            }
            Command::StopDueToError if matches!(status, CommandStatus::Success) => {
                self.submit(Command::ResetDueToError);
            }
            Command::ResetDueToError if matches!(status, CommandStatus::Success) => {
                self.submit(Command::CleanupDueToError);
            }
            Command::CleanupDueToError => {
                self.finish_teardown(out);
            }
            Command::CancelAllCommands
            | Command::CancelDueToError
            | Command::StopDueToError
            | Command::ResetDueToError => {
                // One of the chain's own steps failed or was itself
                // preempted; stop advancing rather than continuing past a
                // broken link.
                self.finish_teardown(out);
            }
            _ => {}
        }
    }

    /// Settles the Stop→Reset→Cleanup chain once it reaches (or abandons)
    /// `CleanupDueToError`: reports the fault that started it, or drains
    /// every still-queued command as `Cancelled` in FIFO order if it was
    /// cancellation-driven.
    fn finish_teardown(&mut self, out: &mut SmallVec<[EngineEvent; 4]>) {
        match self.teardown_reason.take() {
            Some(TeardownReason::Error(error)) => {
                self.model.state = EngineState::Error;
                // `ResetDueToError`'s own completion clears `last_error` via
                // `clear_session`, same as a client-driven `Reset` would; put
                // it back so a client can still query the fault once parked
                // in `Error`.
                self.model.last_error = Some(error);
                self.error_during_error_handling = false;
                out.push(EngineEvent::Error(error));
            }
            Some(TeardownReason::Cancelled) => {
                self.cancel_pending_queue(out);
            }
            None => {}
        }
    }

    /// Completes every command still sitting in the queue with `Cancelled`,
    /// in FIFO order, once a `CancelAllCommands` teardown has fully drained.
    fn cancel_pending_queue(&mut self, out: &mut SmallVec<[EngineEvent; 4]>) {
        while let Some(queued) = self.commands.pop_next() {
            out.push(EngineEvent::CommandCompleted { id: queued.id, status: CommandStatus::Cancelled });
        }
    }
}

fn targets_all_datapaths(commands: &SmallVec<[NodeFanout; 4]>) -> bool {
    commands
        .iter()
        .all(|f| matches!(f.scope, FanoutScope::AllActiveDatapaths))
}

/// Terminal engine state once an async command's fan-out fully drains.
fn terminal_state_for(command: &Command, status: CommandStatus) -> Option<EngineState> {
    if !matches!(status, CommandStatus::Success) {
        return Some(EngineState::Error);
    }
    match command {
        Command::Init => Some(EngineState::Initialized),
        Command::Prepare => Some(EngineState::Prepared),
        Command::Start | Command::Resume => Some(EngineState::Started),
        Command::Pause => Some(EngineState::Paused),
        Command::AutoPause => Some(EngineState::AutoPaused),
        Command::AutoResume => Some(EngineState::Started),
        Command::Stop | Command::StopDueToError => Some(EngineState::Initialized),
        Command::Reset | Command::ResetDueToError => Some(EngineState::Idle),
        // `CancelAllCommands`/`CancelDueToError`'s state transitions are
        // driven explicitly by `finish`'s teardown-chain match instead of
        // this generic table, since what happens next depends on why the
        // chain is running.
        _ => None,
    }
}
