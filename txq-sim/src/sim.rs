use std::{
    cell::{Cell, RefCell},
    cmp::Ordering,
    collections::BinaryHeap,
    fmt,
};

/// A point on the simulated timeline, in nanoseconds since the start of the
/// run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimTime(u64);

impl SimTime {
    /// The start of the simulation.
    pub const ZERO: Self = Self(0);

    /// A timestamp (or delay) of `nanos` nanoseconds.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// A timestamp (or delay) of `micros` microseconds.
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros * 1_000)
    }

    /// A timestamp (or delay) of `millis` milliseconds.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis * 1_000_000)
    }

    /// The timestamp in nanoseconds.
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Adds `delay`, saturating at the end of representable time.
    pub const fn saturating_add(self, delay: Self) -> Self {
        Self(self.0.saturating_add(delay.0))
    }
}

struct Event {
    at: SimTime,
    seq: u64,
    run: Box<dyn FnOnce()>,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the earliest event (lowest timestamp, then lowest
        // insertion sequence) sits on top of the max-heap.
        (other.at, other.seq).cmp(&(self.at, self.seq))
    }
}

/// A single-threaded discrete-event scheduler.
///
/// Events execute strictly in timestamp order; ties run in insertion order,
/// which keeps a run fully deterministic. Event handlers schedule follow-up
/// events through a shared `Rc<Sim>` handle.
#[derive(Default)]
pub struct Sim {
    now: Cell<SimTime>,
    seq: Cell<u64>,
    events: RefCell<BinaryHeap<Event>>,
}

impl Sim {
    /// Creates a scheduler with an empty event queue at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current simulated time.
    pub fn now(&self) -> SimTime {
        self.now.get()
    }

    /// Number of events waiting to run.
    pub fn pending(&self) -> usize {
        self.events.borrow().len()
    }

    /// Schedules `f` to run `delay` after the current simulated time.
    pub fn schedule(&self, delay: SimTime, f: impl FnOnce() + 'static) {
        let seq = self.seq.replace(self.seq.get() + 1);
        let at = self.now.get().saturating_add(delay);
        self.events.borrow_mut().push(Event { at, seq, run: Box::new(f) });
    }

    /// Runs events in order until the queue is empty, advancing the clock to
    /// each event's timestamp. Returns the number of events executed.
    pub fn run(&self) -> usize {
        let mut executed = 0;
        loop {
            // The queue borrow is released before the handler runs, so the
            // handler is free to schedule more events.
            let Some(event) = self.events.borrow_mut().pop() else { break };
            self.now.set(event.at);
            (event.run)();
            executed += 1;
        }
        executed
    }
}

impl fmt::Debug for Sim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sim")
            .field("now", &self.now.get())
            .field("pending", &self.events.borrow().len())
            .finish()
    }
}
