//! The `RunnableQueue`: a single-threaded, cooperative min-heap scheduler.
//!
//! Modeled on the teacher's historical tick-wheel timer (`mio::timer::Timer`
//! circa 0.5/0.6: a `Slab`-addressed entry table driven by a monotonically
//! ticking clock), generalized from a fixed-size wheel to an unbounded
//! `BinaryHeap` because port deadlines range across the full 64-bit tick
//! space (a `timeReg` wait can be tens of thousands of ticks out) rather
//! than the bounded near-future window a wheel is built for. The
//! `BinaryHeap` is paired with a side table recording each target's current
//! scheduled `(tick, sequence)`, using the standard "lazy deletion" pattern
//! for mutable-priority heaps: `push` overwrites the side table and leaves
//! stale heap entries to be skipped by `pop` rather than removed in place.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use log::trace;

use crate::ids::PeripheralId;
use crate::ids::PortId;
use crate::tick::Tick;

/// Everything the scheduler can run: a tagged-variant dispatch (Design Note
/// 2) standing in for the original's polymorphic `Runnable` interface.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ScheduleTarget {
    Port(PortId),
    EthernetPhyTx(PeripheralId),
    EthernetPhyRx(PeripheralId),
    SpiFlash(PeripheralId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct HeapEntry {
    tick: Tick,
    seq: u64,
    target: ScheduleTarget,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.tick, self.seq).cmp(&(other.tick, other.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// The scheduler. Advances simulated time by popping the earliest pending
/// target; every component that wants to run again pushes itself back on.
#[derive(Default)]
pub struct Scheduler {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    current: HashMap<ScheduleTarget, (Tick, u64)>,
    next_seq: u64,
    now: Tick,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler {
            heap: BinaryHeap::new(),
            current: HashMap::new(),
            next_seq: 0,
            now: 0,
        }
    }

    /// Simulated time as of the last `pop`.
    pub fn now(&self) -> Tick {
        self.now
    }

    /// Insert, or move earlier, `target`'s scheduled tick.
    ///
    /// If `target` is already scheduled at a tick `<= tick`, this is a
    /// no-op — rescheduling only ever pulls a target's wakeup earlier, never
    /// pushes it later, matching the "overwrite only if `t` is earlier"
    /// contract.
    pub fn push(&mut self, target: ScheduleTarget, tick: Tick) {
        if let Some(&(cur_tick, _)) = self.current.get(&target) {
            if tick >= cur_tick {
                trace!("scheduler: {target:?} already due at {cur_tick}, ignoring push({tick})");
                return;
            }
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.current.insert(target, (tick, seq));
        self.heap.push(Reverse(HeapEntry { tick, seq, target }));
        trace!("scheduler: push {target:?} at tick {tick} (seq {seq})");
    }

    /// Remove `target` from the schedule entirely, if present.
    pub fn cancel(&mut self, target: ScheduleTarget) {
        self.current.remove(&target);
    }

    /// Pop the earliest-scheduled target and advance `now` to its tick.
    ///
    /// Ties are broken by insertion order (the sequence counter), giving
    /// FIFO semantics among targets scheduled for the same tick.
    pub fn pop(&mut self) -> Option<(Tick, ScheduleTarget)> {
        while let Some(Reverse(entry)) = self.heap.pop() {
            match self.current.get(&entry.target) {
                Some(&(cur_tick, cur_seq)) if cur_tick == entry.tick && cur_seq == entry.seq => {
                    self.current.remove(&entry.target);
                    self.now = entry.tick;
                    trace!("scheduler: pop {:?} at tick {}", entry.target, entry.tick);
                    return Some((entry.tick, entry.target));
                }
                _ => continue, // stale entry superseded by a later push/cancel
            }
        }
        None
    }

    /// Whether `target` currently has a pending wakeup.
    pub fn is_scheduled(&self, target: ScheduleTarget) -> bool {
        self.current.contains_key(&target)
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}
