//! `ClockBlock`: a programmable clock source.
//!
//! A clock block is either fixed-frequency (its `Signal` defines every
//! edge, known ahead of time) or driven by a source port's output pin —
//! the port-driven case is represented by `fixed_frequency == false`. A
//! port-driven block's edges aren't known in advance, so `Core` doesn't
//! route them through the ordinary cached-edge-iterator `Port::update`
//! path at all: a source port registers itself with
//! `Core::add_clock_source` (recorded as `Port::source_of`, mirroring the
//! reference implementation's own `sourceOf`), and `Core::drive_clock_block`
//! turns each real level change on that port into a single
//! `Port::see_edge` call on every `attached_ports` member, one edge at a
//! time, as it happens.

use crate::ids::PortId;
use crate::signal::Signal;

pub struct ClockBlock {
    signal: Signal,
    fixed_frequency: bool,
    /// Ports that use this block for their own sampling/output timing.
    attached_ports: Vec<PortId>,
}

impl ClockBlock {
    pub fn fixed_frequency(signal: Signal) -> ClockBlock {
        ClockBlock {
            signal,
            fixed_frequency: true,
            attached_ports: Vec::new(),
        }
    }

    pub fn port_driven(initial: Signal) -> ClockBlock {
        ClockBlock {
            signal: initial,
            fixed_frequency: false,
            attached_ports: Vec::new(),
        }
    }

    pub fn is_fixed_frequency(&self) -> bool {
        self.fixed_frequency
    }

    pub fn signal(&self) -> &Signal {
        &self.signal
    }

    pub fn set_signal(&mut self, signal: Signal) {
        self.signal = signal;
    }

    pub fn attach_port(&mut self, port: PortId) {
        if !self.attached_ports.contains(&port) {
            self.attached_ports.push(port);
        }
    }

    pub fn detach_port(&mut self, port: PortId) {
        self.attached_ports.retain(|&p| p != port);
    }

    pub fn attached_ports(&self) -> &[PortId] {
        &self.attached_ports
    }
}
