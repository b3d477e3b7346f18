/// Result of running an [`ActiveObject`] for one scheduling quantum. Every
/// `run` call executes exactly one phase and returns control to the
/// scheduler — nothing in this crate ever loops inside a single `run` call,
/// which is what keeps the engine cooperative instead of needing
/// preemption.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Synchronous work remains ready right now; reschedule immediately
    /// (ahead of same-priority peers that arrived later).
    Continue,
    /// Parked on an external event (a node's async completion callback,
    /// typically). Do not reschedule until that event arrives.
    Waiting,
    /// This object's unit of work is finished.
    Done,
}

/// A unit of cooperatively scheduled work: one in-flight command, one
/// multi-phase procedure, or a node's per-tick bookkeeping. Implementors
/// hold whatever state they need to resume where they left off between
/// `run` calls.
pub trait ActiveObject {
    /// Name used in scheduler diagnostics.
    fn name(&self) -> &'static str;

    /// Executes one phase of work and reports what should happen next.
    fn run(&mut self) -> Phase;
}
