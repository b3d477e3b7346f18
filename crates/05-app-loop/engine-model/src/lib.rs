//! Canonical engine state primitives and the command/event vocabulary.
//!
//! This crate stays deliberately thin: types, lifecycle-state validity
//! rules, the playback clock, and the two pure reducers (command →
//! synchronous result or node fan-out plan; node event → datapath
//! bookkeeping and follow-up commands). Actually driving a fan-out against
//! live node handles, counting replies against a watchdog, and owning the
//! scheduler loop belongs to the crate built on top of this one.

pub mod reduce_command;
pub mod reduce_event;
pub mod state;
pub mod types;

pub use reduce_command::{CommandOutcome, CommandReducer, FanoutScope, NodeFanout};
pub use reduce_event::EventReducer;
pub use state::EngineModel;
pub use types::{
    Command, CommandKind, CommandStatus, Datapath, EngineError, EngineState, MediaType,
    PlaybackClock, PlaybackRange, PlayerConfig, ProductInfo, QueryResult, TrackId,
};
