//! The node contract: the interface every source, decoder, and sink node
//! implements, plus the command/parameter/event vocabulary exchanged
//! between the engine and a node across a datapath.
//!
//! A `Node` is driven non-blockingly, mirroring the rest of this
//! workspace's services — `try_submit`/`drain` never block, and every
//! multi-step operation completes asynchronously via
//! [`NodeEvent::CommandCompleted`] rather than by returning a value
//! directly. This is what lets a single scheduler thread own every
//! datapath without ever waiting on I/O or codec work in-line.
//!
//! `Service`/`SubmitOutcome` elsewhere in this workspace assume a fixed
//! `Cmd`/`Rep` pair per service; a node's command surface is richer
//! (lifecycle plus per-node custom payloads) so this crate defines its own
//! non-generic equivalents instead of parameterizing over them.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use thiserror::Error;

/// 128-bit interface/type identifier used for `QueryUuid`/`QueryInterface`
/// capability discovery, replacing the node contract's virtual-inheritance
/// interface casts with an explicit lookup table each node builds once.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uuid(pub [u8; 16]);

impl Uuid {
    /// Builds a `Uuid` from a 16-byte array.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uuid(")?;
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

/// Monotonically increasing identifier assigned to every command, used for
/// FIFO tie-break ordering and for matching a `NodeEvent::CommandCompleted`
/// back to the command that spawned it.
pub type CommandId = u64;

/// Union of parameter shapes a command or node response can carry, standing
/// in for the original contract's untyped parameter union.
#[derive(Clone, Debug)]
pub enum ParamValue {
    Bool(bool),
    F32(f32),
    I32(i32),
    U32(u32),
    /// Wide-character string parameter (track/file names, metadata keys).
    WStr(String),
    /// Narrow string parameter (MIME types, URIs).
    Str(String),
    Bytes(Vec<u8>),
    /// A position/timestamp in the unit the call site documents (usually
    /// milliseconds or a node's native timescale).
    Pos(u64),
    /// Caller-defined payload that doesn't fit the above, kept type-erased
    /// so `node-abi` never needs to know about decoder- or sink-specific
    /// structures.
    Opaque(Arc<dyn std::any::Any + Send + Sync>),
}

impl PartialEq for ParamValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::F32(a), Self::F32(b)) => a == b,
            (Self::I32(a), Self::I32(b)) => a == b,
            (Self::U32(a), Self::U32(b)) => a == b,
            (Self::WStr(a), Self::WStr(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Pos(a), Self::Pos(b)) => a == b,
            (Self::Opaque(a), Self::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Non-blocking outcome of submitting a command to a node, generalizing the
/// workspace's transport-layer submit outcome to cover cancellation and the
/// node-specific "not ready yet" case.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Command was accepted and will complete asynchronously.
    Accepted,
    /// Node completed the command synchronously; no `CommandCompleted`
    /// event will follow for it.
    CompletedSync,
    /// Node cannot accept more work without blocking; caller should retry.
    WouldBlock,
    /// Node is not in a state that can accept this command at all (e.g. a
    /// `Start` sent to a node still in `Idle`).
    NotReady,
    /// Node has been torn down or errored out of usability.
    Closed,
}

/// Result status an async node command eventually completes with, mirroring
/// the engine-level `CommandStatus` but scoped to one node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeCommandStatus {
    Success,
    Cancelled,
    Failed(NodeErrorKind),
}

/// Error kinds a node can report, matching the engine's own error
/// vocabulary so failures propagate without translation at the datapath
/// boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum NodeErrorKind {
    #[error("invalid argument")]
    Argument,
    #[error("out of memory")]
    NoMemory,
    #[error("insufficient resources")]
    NoResources,
    #[error("node not ready for this command")]
    NotReady,
    #[error("node is busy")]
    Busy,
    #[error("corrupt data")]
    Corrupt,
    #[error("operation timed out")]
    Timeout,
    #[error("data underflow")]
    Underflow,
    #[error("data overflow")]
    Overflow,
    #[error("node failure")]
    Failure,
}

/// Lifecycle command kinds every node accepts. `Cancel` carries the id of
/// the outstanding command being cancelled.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeCommandKind {
    Init,
    Prepare,
    Start,
    Pause,
    Resume,
    Stop,
    Reset,
    Flush,
    CancelAll,
    Cancel(CommandId),
    /// Node-specific configuration or data-feed command, carrying a
    /// parameter payload (e.g. `SetDataSourcePosition`, a decoded-frame
    /// hand-off, or a config key/value pair).
    Custom {
        name: &'static str,
        params: SmallVec<[ParamValue; 4]>,
    },
}

/// A command sent to a node: a lifecycle kind plus an id used to match its
/// eventual completion event and to address cancellation.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeCommand {
    pub id: CommandId,
    pub kind: NodeCommandKind,
}

/// Informational node events the engine reacts to outside the normal
/// command/completion flow (auto-pause/resume triggers, end-of-stream).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeInfoEvent {
    BufferUnderflow,
    DataReady,
    EndOfData,
}

/// Asynchronous events a node reports back to the engine.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeEvent {
    /// A previously submitted command has reached a terminal state.
    CommandCompleted {
        id: CommandId,
        status: NodeCommandStatus,
    },
    /// Informational event not tied to a specific command.
    Info(NodeInfoEvent),
    /// An unsolicited error the node could not attribute to one command.
    Error(NodeErrorKind),
}

/// The contract every source, decoder, and sink node implements. All
/// methods are non-blocking; long-running work is driven to completion via
/// repeated `drain` calls and reported through [`NodeEvent`].
pub trait Node {
    /// This node's own type UUID.
    fn query_uuid(&self) -> Uuid;

    /// Looks up a capability interface by UUID. Replaces the node
    /// contract's virtual-inheritance interface casts with an explicit
    /// lookup a node builds once at construction time. Returns the queried
    /// UUID back when the capability is supported.
    fn query_interface(&self, iface: Uuid) -> Option<Uuid>;

    /// Attempts to submit a lifecycle or custom command without blocking.
    /// Defaults to accepting everything synchronously, for nodes with no
    /// async work of their own (used by the simplest mock/test-double
    /// nodes).
    fn try_submit(&self, _cmd: &NodeCommand) -> SubmitOutcome {
        SubmitOutcome::CompletedSync
    }

    /// Drains up to `max` pending events without blocking. Defaults to
    /// empty.
    fn drain(&self, _max: usize) -> SmallVec<[NodeEvent; 8]> {
        SmallVec::new()
    }

    /// Tracks this node has discovered by parsing its container. Only a
    /// source node overrides this meaningfully, and only once its `Init`
    /// has completed; decoder and sink nodes never demux and keep the empty
    /// default.
    fn track_info(&self) -> SmallVec<[TrackDescriptor; 4]> {
        SmallVec::new()
    }

    /// Reports the actual position a seek to `requested_ms` would land on
    /// (e.g. snapped to the nearest preceding sync point), queried
    /// synchronously before `SetDataSourcePosition` is issued. Only a source
    /// node overrides this meaningfully; the default reports the requested
    /// position unchanged.
    fn seek_target(&self, requested_ms: u64) -> u64 {
        requested_ms
    }
}

/// Shared handle type nodes are passed around as, matching the rest of the
/// workspace's `Arc<dyn Trait + Send + Sync>` service-handle convention.
pub type NodeHandle = Arc<dyn Node + Send + Sync>;

/// Coarse media kind a source node reports for one discovered track, mirrored
/// one layer up by the engine's own richer media-type enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackMediaType {
    Audio,
    Video,
    Text,
}

/// One track a source node exposes once it has parsed its container. Valid
/// to query only after the source's `Init` command has completed.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackDescriptor {
    pub media_type: TrackMediaType,
    pub format: Uuid,
    /// `false` for a track whose data is already in a sink-ready format
    /// (raw PCM, pre-demuxed text), so no decoder node is instantiated.
    pub has_decoder: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_value_opaque_compares_by_pointer_identity() {
        let shared: Arc<dyn std::any::Any + Send + Sync> = Arc::new(42u32);
        let a = ParamValue::Opaque(Arc::clone(&shared));
        let b = ParamValue::Opaque(Arc::clone(&shared));
        let c = ParamValue::Opaque(Arc::new(42u32));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn uuid_debug_formats_as_hex() {
        let uuid = Uuid::from_bytes([0xab; 16]);
        assert_eq!(format!("{uuid:?}"), format!("Uuid({})", "ab".repeat(16)));
    }

    struct NoopNode;
    impl Node for NoopNode {
        fn query_uuid(&self) -> Uuid {
            Uuid::from_bytes([0; 16])
        }
        fn query_interface(&self, _iface: Uuid) -> Option<Uuid> {
            None
        }
    }

    #[test]
    fn default_try_submit_and_drain_are_synchronous_noops() {
        let node = NoopNode;
        let cmd = NodeCommand {
            id: 1,
            kind: NodeCommandKind::Init,
        };
        assert_eq!(node.try_submit(&cmd), SubmitOutcome::CompletedSync);
        assert!(node.drain(8).is_empty());
    }
}
