//! A cycle-accurate, single-threaded simulator core for a configurable
//! I/O port engine, co-simulated against an MII Ethernet PHY and a
//! SPI-flash peripheral.
//!
//! The simulator never threads itself: [`Core`] is a plain arena driven
//! by a single caller (an instruction-set simulator, a test, or a REPL)
//! that issues port operations and advances time. Nothing here spawns an
//! OS thread or touches `Mutex`/`Arc` — "thread" in this crate's types
//! ([`ThreadId`](ids::ThreadId), `pausedIn`/`pausedOut`/`pausedSync`)
//! always means a simulated hardware logical core, represented purely as
//! an arena handle that gets reported back via [`port::PortEvent::ThreadWoken`]
//! when it's runnable again.
//!
//! # Layout
//!
//! - [`signal`] / [`clock`]: the timing primitives every edge-driven
//!   component is built on.
//! - [`port`]: the port engine itself — register state, the CPU-facing
//!   operations in `port::ops`, and the per-edge update algorithm in
//!   `port::update`.
//! - [`scheduler`]: the min-heap that orders peripheral wakeups.
//! - [`peripheral`]: the Ethernet PHY and SPI flash devices.
//! - [`net_link`]: the host-side boundary the PHY's frames cross.
//! - [`core`]: the arena gluing all of the above together.

pub mod clock;
pub mod core;
pub mod error;
pub mod ids;
pub mod net_link;
pub mod peripheral;
pub mod port;
pub mod scheduler;
pub mod signal;
pub mod tick;

pub use crate::core::Core;
pub use crate::error::{Error, PortOutcome, Result};
pub use crate::ids::{ClockBlockId, PeripheralId, PortId, ThreadId};
pub use crate::signal::Signal;
pub use crate::tick::Tick;
