//! Error taxonomy.
//!
//! Per the crate's error-handling policy, cycle-accurate paths (the port
//! operations a CPU thread issues) are infallible at the type level — they
//! return [`PortOutcome`], not `Result`. `Error`/`Result` are reserved for
//! configuration mistakes and host I/O failures, both of which fail fast.

/// Configuration and host-I/O failures. Both categories fail fast: an
/// invalid port/clock combination aborts construction, and a host I/O
/// failure (opening a TAP device, reading a flash image file) is logged and
/// terminates the process, since the simulator has no substitute to
/// synthesize.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("host I/O failure: {0}")]
    HostIo(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// The result of a CPU-thread-facing port operation.
///
/// Unlike [`Error`], this is not really an error type: `Deschedule` means
/// the calling thread was parked and will resume later, and `Illegal` means
/// the operation was issued in a mode the port forbids (surfaced to the
/// thread as a processor exception, not a Rust panic or `Result::Err`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortOutcome<T> {
    /// The operation completed; the thread may proceed with this value.
    Continue(T),
    /// The thread has been parked and must yield.
    Deschedule,
    /// The operation is not valid in the port's current configuration.
    Illegal(&'static str),
}

impl<T> PortOutcome<T> {
    pub fn is_continue(&self) -> bool {
        matches!(self, PortOutcome::Continue(_))
    }

    pub fn is_deschedule(&self) -> bool {
        matches!(self, PortOutcome::Deschedule)
    }

    pub fn unwrap(self) -> T {
        match self {
            PortOutcome::Continue(v) => v,
            PortOutcome::Deschedule => panic!("PortOutcome::unwrap on Deschedule"),
            PortOutcome::Illegal(msg) => panic!("PortOutcome::unwrap on Illegal({msg})"),
        }
    }
}
