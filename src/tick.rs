//! Simulated time.

/// An unsigned count of simulator time units.
///
/// One tick is one `CYCLES_PER_TICK`-sized slice of processor cycles; the
/// port engine and every peripheral state machine schedule themselves in
/// ticks, never in wall-clock time (see the crate's concurrency model: this
/// is a single-threaded, cooperative, discrete-event simulation).
pub type Tick = u64;

/// Number of processor cycles represented by one [`Tick`].
///
/// Fixed at 1: nothing in the port timing model or the MII/SPI peripherals
/// needs a coarser unit, and keeping the ratio at 1 means `Tick` and "cycle"
/// are interchangeable vocabulary everywhere else in this crate.
pub const CYCLES_PER_TICK: u64 = 1;
