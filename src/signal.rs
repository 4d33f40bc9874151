//! Signals and edge iteration.
//!
//! A [`Signal`] is either a constant value or a square wave clock. Both
//! variants can answer "what's your value at tick `t`" and "where's your
//! next edge", which is all a [`ClockBlock`](crate::clock::ClockBlock) or a
//! [`Port`](crate::port::Port) needs to drive its timing off one.

use crate::error::{Error, Result};
use crate::tick::Tick;

/// The direction of a transition on a clock signal.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Rising,
    Falling,
}

impl EdgeKind {
    #[must_use]
    pub fn opposite(self) -> EdgeKind {
        match self {
            EdgeKind::Rising => EdgeKind::Falling,
            EdgeKind::Falling => EdgeKind::Rising,
        }
    }
}

/// A single transition of a clock signal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Edge {
    pub tick: Tick,
    pub kind: EdgeKind,
}

/// A value carrier: either a constant integer for all time, or a square
/// wave with a declared half-period and phase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Signal {
    Constant(u32),
    Clock(ClockSignal),
}

/// The parameters of a square-wave clock signal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ClockSignal {
    /// Half-period in ticks; transitions occur every `half_period` ticks.
    half_period: Tick,
    /// Value held for ticks `< phase`, and the value the signal starts from
    /// at `phase`.
    initial: u32,
    /// First transition occurs at this tick.
    phase: Tick,
}

impl Signal {
    /// A signal that never changes.
    pub fn constant(value: u32) -> Signal {
        Signal::Constant(value)
    }

    /// A square-wave clock with the given half-period, initial value and
    /// phase offset.
    ///
    /// Returns [`Error::InvalidConfiguration`] if `half_period == 0` or
    /// `initial` is not 0 or 1.
    pub fn clock(half_period: Tick, initial: u32, phase: Tick) -> Result<Signal> {
        if half_period == 0 {
            return Err(Error::InvalidConfiguration(
                "clock signal half_period must be > 0".into(),
            ));
        }
        if initial > 1 {
            return Err(Error::InvalidConfiguration(
                "clock signal initial value must be 0 or 1".into(),
            ));
        }
        Ok(Signal::Clock(ClockSignal {
            half_period,
            initial,
            phase,
        }))
    }

    pub fn is_clock(&self) -> bool {
        matches!(self, Signal::Clock(_))
    }

    /// The value of this signal at tick `t`.
    pub fn get_value(&self, t: Tick) -> u32 {
        match self {
            Signal::Constant(v) => *v,
            Signal::Clock(c) => c.get_value(t),
        }
    }

    /// The first edge of the given kind at a tick strictly greater than
    /// `t`. Pass `t - 1` to allow a match at `t` itself.
    ///
    /// Returns `None` for a constant signal (it never edges).
    pub fn get_next_edge(&self, t: Tick, kind: EdgeKind) -> Option<Edge> {
        match self {
            Signal::Constant(_) => None,
            Signal::Clock(c) => Some(c.next_edge_of_kind(t, kind)),
        }
    }

    /// An iterator positioned at the earliest edge at a tick strictly
    /// greater than `t`, alternating kinds from there. `None` for a
    /// constant signal.
    pub fn get_edge_iterator(&self, t: Tick) -> Option<EdgeIterator> {
        match self {
            Signal::Constant(_) => None,
            Signal::Clock(c) => Some(EdgeIterator {
                clock: *c,
                index: c.index_after(t),
            }),
        }
    }
}

impl ClockSignal {
    fn get_value(&self, t: Tick) -> u32 {
        if t < self.phase {
            return self.initial;
        }
        let elapsed = (t - self.phase) / self.half_period;
        if elapsed % 2 == 0 {
            self.initial
        } else {
            1 - self.initial
        }
    }

    /// The tick of the `n`-th edge (0-indexed) of this clock.
    fn tick_at(&self, n: i64) -> Tick {
        // n is only ever non-negative in this crate's call sites; `Tick` is
        // u64 so we perform the multiply in u64 once validated.
        debug_assert!(n >= 0);
        self.phase + (n as u64) * self.half_period
    }

    /// The kind of the `n`-th edge (0-indexed). Edge `n` is the transition
    /// out of the `n`-th half-period starting at `phase`; since the 0-th
    /// half-period holds `initial`, the first (odd-indexed, `n == 1`)
    /// transition moves away from `initial` — rising if `initial == 0`.
    fn kind_at(&self, n: i64) -> EdgeKind {
        let first = if self.initial == 0 {
            EdgeKind::Rising
        } else {
            EdgeKind::Falling
        };
        if n % 2 == 1 {
            first
        } else {
            first.opposite()
        }
    }

    fn edge_at(&self, n: i64) -> Edge {
        Edge {
            tick: self.tick_at(n),
            kind: self.kind_at(n),
        }
    }

    /// Smallest edge index `n` with `tick_at(n) > t`.
    fn index_after(&self, t: Tick) -> i64 {
        if t < self.phase {
            return 0;
        }
        // Smallest n with phase + n*H > t  <=>  n > (t - phase) / H.
        let diff = t - self.phase;
        (diff / self.half_period) as i64 + 1
    }

    fn next_edge_of_kind(&self, t: Tick, kind: EdgeKind) -> Edge {
        let mut n = self.index_after(t);
        loop {
            let e = self.edge_at(n);
            if e.kind == kind {
                return e;
            }
            n += 1;
        }
    }
}

/// A lazy, restartable, bidirectional cursor over the edges of a
/// fixed-frequency [`Signal`].
#[derive(Copy, Clone, Debug)]
pub struct EdgeIterator {
    clock: ClockSignal,
    index: i64,
}

impl EdgeIterator {
    /// The edge this iterator currently refers to.
    pub fn current(&self) -> Edge {
        self.clock.edge_at(self.index)
    }

    /// Advance to the next edge (alternating kind).
    pub fn advance(&mut self) {
        self.index += 1;
    }

    /// Jump forward (or, with a negative count, backward) by `n` edges.
    pub fn advance_by(&mut self, n: i64) {
        self.index += n;
    }

    /// Number of edges strictly between `self`'s position and `other`'s
    /// (i.e. `other.index - self.index`); negative if `other` precedes
    /// `self`.
    pub fn edges_until(&self, other: &EdgeIterator) -> i64 {
        other.index - self.index
    }
}

impl std::ops::Add<i64> for EdgeIterator {
    type Output = EdgeIterator;
    fn add(mut self, rhs: i64) -> EdgeIterator {
        self.advance_by(rhs);
        self
    }
}

impl std::ops::Sub<i64> for EdgeIterator {
    type Output = EdgeIterator;
    fn sub(mut self, rhs: i64) -> EdgeIterator {
        self.advance_by(-rhs);
        self
    }
}

impl PartialEq for EdgeIterator {
    fn eq(&self, other: &Self) -> bool {
        self.clock == other.clock && self.index == other.index
    }
}
