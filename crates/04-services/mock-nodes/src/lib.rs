//! Test-double nodes implementing the [`node_abi::Node`] contract, used to
//! exercise the engine's datapath procedures (`AddDataSource`, `Prepare`,
//! seek, rate change, cancellation, error handling, auto-pause) without a
//! real source/codec/renderer stack behind them.
//!
//! Each mock completes lifecycle commands asynchronously (one tick of
//! latency, via its event queue) like a real node would, and exposes an
//! `inject_*` method so a test can simulate the informational events
//! (`BufferUnderflow`, `DataReady`, `EndOfData`) a production node would
//! raise on its own.

use std::cell::Cell;

use node_abi::{
    Node, NodeCommand, NodeCommandKind, NodeCommandStatus, NodeErrorKind, NodeEvent,
    NodeInfoEvent, SubmitOutcome, TrackDescriptor, Uuid,
};
use node_common::{drain_queue, try_submit_queue, LocalQueue, QueuePolicy};
use smallvec::SmallVec;

const DEFAULT_EVENT_CAPACITY: usize = 32;

const SOURCE_UUID: Uuid = Uuid::from_bytes([b's'; 16]);
const DECODER_UUID: Uuid = Uuid::from_bytes([b'd'; 16]);
const SINK_UUID: Uuid = Uuid::from_bytes([b'k'; 16]);

fn complete(events: &LocalQueue<NodeEvent>, capacity: usize, id: node_abi::CommandId) -> SubmitOutcome {
    try_submit_queue(events, capacity, QueuePolicy::Lossless, || NodeEvent::CommandCompleted {
        id,
        status: NodeCommandStatus::Success,
    })
}

/// Mock data source. Completes every lifecycle command after one tick and
/// can be told to fail its next command for error-path tests.
pub struct MockSourceNode {
    events: LocalQueue<NodeEvent>,
    capacity: usize,
    fail_next: Cell<bool>,
    tracks: Vec<TrackDescriptor>,
}

impl Default for MockSourceNode {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSourceNode {
    /// Creates a source node with the default event queue capacity and no
    /// discoverable tracks.
    pub fn new() -> Self {
        Self {
            events: LocalQueue::with_capacity(DEFAULT_EVENT_CAPACITY),
            capacity: DEFAULT_EVENT_CAPACITY,
            fail_next: Cell::new(false),
            tracks: Vec::new(),
        }
    }

    /// Creates a source node that reports `tracks` once its `Init` command
    /// completes, standing in for a real source parsing its container.
    pub fn with_tracks(tracks: Vec<TrackDescriptor>) -> Self {
        Self { tracks, ..Self::new() }
    }

    /// Causes the next lifecycle command submitted to this node to complete
    /// with `Failed(Corrupt)` instead of `Success`, exercising the engine's
    /// rollback/error-handling paths.
    pub fn fail_next_command(&self) {
        self.fail_next.set(true);
    }

    /// Simulates the source reaching end-of-data on its own.
    pub fn inject_end_of_data(&self) -> SubmitOutcome {
        try_submit_queue(&self.events, self.capacity, QueuePolicy::Lossless, || {
            NodeEvent::Info(NodeInfoEvent::EndOfData)
        })
    }
}

impl Node for MockSourceNode {
    fn query_uuid(&self) -> Uuid {
        SOURCE_UUID
    }

    fn query_interface(&self, iface: Uuid) -> Option<Uuid> {
        (iface == SOURCE_UUID).then_some(iface)
    }

    fn try_submit(&self, cmd: &NodeCommand) -> SubmitOutcome {
        if self.fail_next.replace(false) {
            return try_submit_queue(&self.events, self.capacity, QueuePolicy::Lossless, || {
                NodeEvent::CommandCompleted {
                    id: cmd.id,
                    status: NodeCommandStatus::Failed(NodeErrorKind::Corrupt),
                }
            });
        }
        match &cmd.kind {
            NodeCommandKind::CancelAll => {
                self.events.with_mut(|inner| inner.clear());
                SubmitOutcome::CompletedSync
            }
            NodeCommandKind::Cancel(target) => {
                let target = *target;
                self.events.with_mut(|inner| {
                    inner.retain(|ev| {
                        !matches!(ev, NodeEvent::CommandCompleted { id, .. } if *id == target)
                    })
                });
                try_submit_queue(&self.events, self.capacity, QueuePolicy::Lossless, || {
                    NodeEvent::CommandCompleted {
                        id: target,
                        status: NodeCommandStatus::Cancelled,
                    }
                })
            }
            _ => complete(&self.events, self.capacity, cmd.id),
        }
    }

    fn drain(&self, max: usize) -> SmallVec<[NodeEvent; 8]> {
        drain_queue(&self.events, max)
    }

    fn track_info(&self) -> SmallVec<[TrackDescriptor; 4]> {
        self.tracks.iter().cloned().collect()
    }
}

/// Mock decoder. Same completion behavior as [`MockSourceNode`], kept as a
/// distinct type since a datapath's decoder node is optional and addressed
/// separately from its source and sink.
pub struct MockDecoderNode {
    events: LocalQueue<NodeEvent>,
    capacity: usize,
}

impl Default for MockDecoderNode {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDecoderNode {
    /// Creates a decoder node with the default event queue capacity.
    pub fn new() -> Self {
        Self {
            events: LocalQueue::with_capacity(DEFAULT_EVENT_CAPACITY),
            capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Node for MockDecoderNode {
    fn query_uuid(&self) -> Uuid {
        DECODER_UUID
    }

    fn query_interface(&self, iface: Uuid) -> Option<Uuid> {
        (iface == DECODER_UUID).then_some(iface)
    }

    fn try_submit(&self, cmd: &NodeCommand) -> SubmitOutcome {
        match &cmd.kind {
            NodeCommandKind::CancelAll => {
                self.events.with_mut(|inner| inner.clear());
                SubmitOutcome::CompletedSync
            }
            _ => complete(&self.events, self.capacity, cmd.id),
        }
    }

    fn drain(&self, max: usize) -> SmallVec<[NodeEvent; 8]> {
        drain_queue(&self.events, max)
    }
}

/// Mock sink (renderer). Additionally supports injecting
/// `BufferUnderflow`/`DataReady` to exercise auto-pause/auto-resume.
pub struct MockSinkNode {
    events: LocalQueue<NodeEvent>,
    capacity: usize,
    frames_rendered: Cell<u64>,
}

impl Default for MockSinkNode {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSinkNode {
    /// Creates a sink node with the default event queue capacity.
    pub fn new() -> Self {
        Self {
            events: LocalQueue::with_capacity(DEFAULT_EVENT_CAPACITY),
            capacity: DEFAULT_EVENT_CAPACITY,
            frames_rendered: Cell::new(0),
        }
    }

    /// Simulates the sink running dry mid-playback.
    pub fn inject_underflow(&self) -> SubmitOutcome {
        try_submit_queue(&self.events, self.capacity, QueuePolicy::Lossless, || {
            NodeEvent::Info(NodeInfoEvent::BufferUnderflow)
        })
    }

    /// Simulates the sink having buffered enough data to resume.
    pub fn inject_data_ready(&self) -> SubmitOutcome {
        try_submit_queue(&self.events, self.capacity, QueuePolicy::Lossless, || {
            NodeEvent::Info(NodeInfoEvent::DataReady)
        })
    }

    /// Number of data-feed commands this sink has completed, standing in
    /// for frames actually rendered.
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.get()
    }
}

impl Node for MockSinkNode {
    fn query_uuid(&self) -> Uuid {
        SINK_UUID
    }

    fn query_interface(&self, iface: Uuid) -> Option<Uuid> {
        (iface == SINK_UUID).then_some(iface)
    }

    fn try_submit(&self, cmd: &NodeCommand) -> SubmitOutcome {
        match &cmd.kind {
            NodeCommandKind::CancelAll => {
                self.events.with_mut(|inner| inner.clear());
                SubmitOutcome::CompletedSync
            }
            NodeCommandKind::Custom { name, .. } if *name == "RenderFrame" => {
                self.frames_rendered.set(self.frames_rendered.get() + 1);
                complete(&self.events, self.capacity, cmd.id)
            }
            _ => complete(&self.events, self.capacity, cmd.id),
        }
    }

    fn drain(&self, max: usize) -> SmallVec<[NodeEvent; 8]> {
        drain_queue(&self.events, max)
    }
}
