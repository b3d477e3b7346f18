use crate::active_object::{ActiveObject, Phase};
use crate::priority::{CommandPriority, PriorityQueues};

/// Drives a set of boxed [`ActiveObject`]s in strict priority order. Each
/// call to [`Scheduler::run_tick`] pops the single highest-priority ready
/// object and runs exactly one phase of it: `Continue` objects go back to
/// the front of their own bucket so they keep precedence over newer
/// same-priority arrivals, `Waiting` objects are handed back to the caller
/// (who owns parking them until their event arrives), and `Done` objects are
/// dropped.
#[derive(Default)]
pub struct Scheduler {
    ready: PriorityQueues<(CommandPriority, Box<dyn ActiveObject>)>,
}

/// Outcome of a single [`Scheduler::run_tick`] call.
pub enum TickOutcome {
    /// Nothing was ready to run.
    Idle,
    /// An object ran one phase and is now waiting on an external event.
    Parked(Box<dyn ActiveObject>),
    /// An object ran one phase and finished.
    Completed(&'static str),
    /// An object ran one phase and has more synchronous work queued.
    Progressed(&'static str),
}

impl Scheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `ao` to run at `priority`.
    pub fn register(&mut self, priority: CommandPriority, ao: Box<dyn ActiveObject>) {
        self.ready.enqueue(priority, (priority, ao));
    }

    /// Registers `ao` to resume ahead of same-priority peers, for an object
    /// that was previously parked and has just been woken.
    pub fn resume(&mut self, priority: CommandPriority, ao: Box<dyn ActiveObject>) {
        self.ready.enqueue_front(priority, (priority, ao));
    }

    /// Whether any object is ready to run.
    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    /// Runs exactly one phase of the highest-priority ready object.
    pub fn run_tick(&mut self) -> TickOutcome {
        let Some((priority, mut ao)) = self.ready.pop_next() else {
            return TickOutcome::Idle;
        };
        match ao.run() {
            Phase::Continue => {
                let name = ao.name();
                self.ready.enqueue_front(priority, (priority, ao));
                TickOutcome::Progressed(name)
            }
            Phase::Waiting => TickOutcome::Parked(ao),
            Phase::Done => TickOutcome::Completed(ao.name()),
        }
    }

    /// Runs ticks until nothing is immediately ready, returning the number
    /// of ticks that did work. Objects that report `Waiting` are collected
    /// and returned to the caller rather than silently dropped.
    pub fn run_until_idle(&mut self) -> (usize, Vec<Box<dyn ActiveObject>>) {
        let mut ticks = 0;
        let mut parked = Vec::new();
        loop {
            match self.run_tick() {
                TickOutcome::Idle => break,
                TickOutcome::Parked(ao) => {
                    parked.push(ao);
                    ticks += 1;
                }
                TickOutcome::Completed(_) | TickOutcome::Progressed(_) => ticks += 1,
            }
        }
        (ticks, parked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingObject {
        name: &'static str,
        remaining: u32,
        then_wait: bool,
        waited: bool,
    }

    impl ActiveObject for CountingObject {
        fn name(&self) -> &'static str {
            self.name
        }

        fn run(&mut self) -> Phase {
            if self.remaining > 0 {
                self.remaining -= 1;
                return Phase::Continue;
            }
            if self.then_wait && !self.waited {
                self.waited = true;
                return Phase::Waiting;
            }
            Phase::Done
        }
    }

    #[test]
    fn runs_highest_priority_object_to_completion_first() {
        let mut sched = Scheduler::new();
        sched.register(
            CommandPriority::P5,
            Box::new(CountingObject {
                name: "normal",
                remaining: 1,
                then_wait: false,
                waited: false,
            }),
        );
        sched.register(
            CommandPriority::P1,
            Box::new(CountingObject {
                name: "cancel-due-to-error",
                remaining: 0,
                then_wait: false,
                waited: false,
            }),
        );

        match sched.run_tick() {
            TickOutcome::Completed(name) => assert_eq!(name, "cancel-due-to-error"),
            _ => panic!("expected the P1 object to run first and complete immediately"),
        }
    }

    #[test]
    fn parked_object_is_handed_back_not_dropped() {
        let mut sched = Scheduler::new();
        sched.register(
            CommandPriority::P5,
            Box::new(CountingObject {
                name: "waits",
                remaining: 0,
                then_wait: true,
                waited: false,
            }),
        );
        match sched.run_tick() {
            TickOutcome::Parked(ao) => assert_eq!(ao.name(), "waits"),
            _ => panic!("expected Parked"),
        }
        assert!(sched.is_empty());
    }

    #[test]
    fn run_until_idle_drains_continue_chain() {
        let mut sched = Scheduler::new();
        sched.register(
            CommandPriority::P5,
            Box::new(CountingObject {
                name: "chain",
                remaining: 3,
                then_wait: false,
                waited: false,
            }),
        );
        let (ticks, parked) = sched.run_until_idle();
        assert_eq!(ticks, 4); // 3 Continue + 1 Done
        assert!(parked.is_empty());
    }
}
