//! The `Port` engine: the cycle-accurate model of a configurable I/O port.
//!
//! A `Port` doesn't know about other ports, peripherals, or the scheduler —
//! it only knows its own register state and the `Signal` of the
//! `ClockBlock` it's bound to (passed in by [`crate::core::Core`] on every
//! call). State changes that are externally visible (a pin transition, a
//! ready-out transition, a parked thread becoming runnable) are reported
//! back as [`PortEvent`]s rather than dispatched directly, so `Core` can
//! fan them out to loopback partners, peripherals and the thread table
//! without `Port` needing a handle back into the arena that owns it
//! (Design Note: "prefer an explicit event queue over deep recursion").

mod ops;
mod update;

use crate::error::{Error, Result};
use crate::ids::{ClockBlockId, PeripheralId, PortId, ThreadId};
use crate::signal::EdgeIterator;
use crate::signal::EdgeKind;
use crate::tick::Tick;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PortType {
    Data,
    Clock,
    Ready,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MasterSlave {
    Master,
    Slave,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ReadyMode {
    NoReady,
    Strobed,
    Handshake,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Condition {
    Full,
    Eq,
    Neq,
}

/// A change that needs to be fanned out by `Core` after a port operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PortEvent {
    /// The effective output pin value changed (post-inversion).
    OutputPinChanged(u32),
    /// `readyOut` flipped.
    ReadyOutChanged(bool),
    /// A parked thread became runnable again.
    ThreadWoken(ThreadId),
    /// An armed condition/time event fired (events-permitted path).
    ConditionEventFired,
}

/// The central cycle-accurate I/O device. See the module docs and
/// `SPEC_FULL.md` §3/§4.3 for the full contract.
pub struct Port {
    id: PortId,
    name: String,
    width: u32,

    port_type: PortType,
    output_port: bool,
    master_slave: MasterSlave,

    clock: Option<ClockBlockId>,
    sampling_edge: EdgeKind,
    next_edge: Option<EdgeIterator>,

    shift_reg: u32,
    transfer_reg: u32,
    timestamp_reg: u16,
    time_reg: u16,
    transfer_reg_valid: bool,
    time_reg_valid: bool,
    hold_transfer_reg: bool,
    pins_input_value: u32,

    transfer_width: u32,
    port_shift_count: u32,
    valid_shift_reg_entries: u32,

    condition: Condition,
    data: u32,
    events_permitted: bool,
    paused_in: Option<ThreadId>,
    paused_out: Option<ThreadId>,
    paused_sync: Option<ThreadId>,

    ready_out_of: Option<PortId>,
    ready_out: bool,
    ready_in: bool,
    ready_mode: ReadyMode,
    ready_out_ports: Vec<PortId>,
    ready_in_of: Option<PortId>,
    source_of: Vec<ClockBlockId>,

    inverted: bool,
    buffered: bool,
    pin_delay: u8,

    time: Tick,
    port_counter: u16,

    loopback: Option<PortId>,
    in_use: bool,

    /// A peripheral that wants to hear about this port's output pin
    /// changes, the arena equivalent of installing a `PortInterface`
    /// delegate via `setLoopback` in the reference implementation.
    observer: Option<PeripheralId>,
}

const VALID_WIDTHS: [u32; 5] = [1, 4, 8, 16, 32];

impl Port {
    pub fn new(id: PortId, name: impl Into<String>, width: u32) -> Result<Port> {
        if !VALID_WIDTHS.contains(&width) {
            return Err(Error::InvalidConfiguration(format!(
                "port width must be one of {VALID_WIDTHS:?}, got {width}"
            )));
        }
        Ok(Port {
            id,
            name: name.into(),
            width,
            port_type: PortType::Data,
            output_port: false,
            master_slave: MasterSlave::Master,
            clock: None,
            sampling_edge: EdgeKind::Rising,
            next_edge: None,
            shift_reg: 0,
            transfer_reg: 0,
            timestamp_reg: 0,
            time_reg: 0,
            transfer_reg_valid: false,
            time_reg_valid: false,
            hold_transfer_reg: false,
            pins_input_value: 0,
            transfer_width: width,
            port_shift_count: 1, // == shiftRegEntries for a freshly constructed port (transferWidth == width)
            valid_shift_reg_entries: 0,
            condition: Condition::Full,
            data: 0,
            events_permitted: false,
            paused_in: None,
            paused_out: None,
            paused_sync: None,
            ready_out_of: None,
            ready_out: false,
            ready_in: false,
            ready_mode: ReadyMode::NoReady,
            ready_out_ports: Vec::new(),
            ready_in_of: None,
            source_of: Vec::new(),
            inverted: false,
            buffered: false,
            pin_delay: 0,
            time: 0,
            port_counter: 0,
            loopback: None,
            in_use: false,
            observer: None,
        })
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn port_type(&self) -> PortType {
        self.port_type
    }

    pub fn is_output(&self) -> bool {
        self.output_port
    }

    pub fn shift_reg_entries(&self) -> u32 {
        self.transfer_width / self.width
    }

    fn effective_value(&self, raw: u32) -> u32 {
        if self.inverted {
            (!raw) & self.value_mask()
        } else {
            raw
        }
    }

    fn value_mask(&self) -> u32 {
        if self.width >= 32 {
            u32::MAX
        } else {
            (1u32 << self.width) - 1
        }
    }

    /// The current effective pin value: for an output port this is the
    /// nibble/bit currently being driven, for an input port the last
    /// sampled value.
    pub fn get_pins_output_value(&self) -> u32 {
        self.effective_value(self.shift_reg & self.value_mask())
    }

    pub fn get_pins_input_value(&self) -> u32 {
        self.effective_value(self.pins_input_value)
    }

    pub fn ready_out(&self) -> bool {
        self.ready_out
    }

    pub fn set_ready_in_level(&mut self, level: bool) {
        self.ready_in = level;
    }

    pub fn transfer_reg_valid(&self) -> bool {
        self.transfer_reg_valid
    }

    pub fn time_reg_valid(&self) -> bool {
        self.time_reg_valid
    }

    pub fn port_counter(&self) -> u16 {
        self.port_counter
    }

    pub fn paused_in(&self) -> Option<ThreadId> {
        self.paused_in
    }
    pub fn paused_out(&self) -> Option<ThreadId> {
        self.paused_out
    }
    pub fn paused_sync(&self) -> Option<ThreadId> {
        self.paused_sync
    }

    pub fn clock_block(&self) -> Option<ClockBlockId> {
        self.clock
    }

    pub fn loopback_target(&self) -> Option<PortId> {
        self.loopback
    }

    pub fn set_loopback(&mut self, target: Option<PortId>) {
        self.loopback = target;
    }

    pub fn observer(&self) -> Option<PeripheralId> {
        self.observer
    }

    pub fn set_observer(&mut self, peripheral: Option<PeripheralId>) {
        self.observer = peripheral;
    }

    /// Push a new value onto this port's input pins from outside the
    /// clock-edge-driven path — a loopback partner or a peripheral driving
    /// the wire. Doesn't itself sample the value into the shift register;
    /// that only happens on the next sampling edge seen by `update`, the
    /// same as a pin driven by real hardware.
    pub fn see_pins_change(&mut self, value: u32, now: Tick) {
        debug_assert!(now >= self.time);
        self.time = now;
        self.pins_input_value = value;
    }

    pub fn ready_out_ports(&self) -> &[PortId] {
        &self.ready_out_ports
    }

    pub fn ready_out_of(&self) -> Option<PortId> {
        self.ready_out_of
    }

    pub fn time(&self) -> Tick {
        self.time
    }

    // -- §3 invariant: time-and-condition-met -------------------------------

    fn value_meets_condition(&self, value: u32) -> bool {
        match self.condition {
            Condition::Full => true,
            Condition::Eq => value == self.data,
            Condition::Neq => value != self.data,
        }
    }

    fn time_and_condition_met(&self) -> bool {
        let time_ok = !self.time_reg_valid || self.port_counter == self.time_reg;
        time_ok && self.value_meets_condition(self.pins_input_value)
    }

    // -- configuration mutators ---------------------------------------------

    pub fn set_clk(&mut self, clock: ClockBlockId) {
        self.clock = Some(clock);
        self.next_edge = None;
    }

    pub fn set_master_slave(&mut self, ms: MasterSlave) {
        self.master_slave = ms;
    }

    pub fn set_port_type(&mut self, ty: PortType) {
        if ty == self.port_type {
            return; // idempotent, testable property 7
        }
        self.port_type = ty;
        if ty != PortType::Data {
            self.output_port = true;
        }
    }

    pub fn set_sampling_edge(&mut self, edge: EdgeKind) {
        self.sampling_edge = edge;
    }

    pub fn set_port_inv(&mut self, inverted: bool) -> Result<()> {
        if inverted && self.width != 1 {
            return Err(Error::InvalidConfiguration(
                "port inversion is only permitted on width-1 ports".into(),
            ));
        }
        self.inverted = inverted;
        Ok(())
    }

    pub fn set_pin_delay(&mut self, delay: u8) -> Result<()> {
        if delay > 5 {
            return Err(Error::InvalidConfiguration(
                "pin delay must be in 0..=5".into(),
            ));
        }
        self.pin_delay = delay;
        Ok(())
    }

    pub fn set_condition(&mut self, condition: Condition) {
        self.condition = condition;
    }

    pub fn set_data(&mut self, data: u32) {
        self.data = data;
    }

    pub fn set_events_permitted(&mut self, permitted: bool) {
        self.events_permitted = permitted;
    }

    pub fn set_buffered(&mut self, buffered: bool) -> Result<()> {
        if !buffered && (self.transfer_width != self.width || self.ready_mode != ReadyMode::NoReady)
        {
            return Err(Error::InvalidConfiguration(
                "an unbuffered port must have transferWidth == width and readyMode == NoReady"
                    .into(),
            ));
        }
        self.buffered = buffered;
        Ok(())
    }

    pub fn set_ready_mode(&mut self, mode: ReadyMode) -> Result<()> {
        if mode != ReadyMode::NoReady && !self.buffered {
            return Err(Error::InvalidConfiguration(
                "readyMode != NoReady requires a buffered port".into(),
            ));
        }
        self.ready_mode = mode;
        Ok(())
    }

    pub fn set_transfer_width(&mut self, width: u32) -> Result<()> {
        let valid = [self.width, 8, 16, 32].contains(&width) && width % self.width == 0;
        if !valid {
            return Err(Error::InvalidConfiguration(format!(
                "transfer width {width} invalid for port width {}",
                self.width
            )));
        }
        if !self.buffered && width != self.width {
            return Err(Error::InvalidConfiguration(
                "an unbuffered port must have transferWidth == width".into(),
            ));
        }
        self.transfer_width = width;
        let entries = self.shift_reg_entries();
        self.port_shift_count = self.port_shift_count.min(entries);
        self.valid_shift_reg_entries = self.valid_shift_reg_entries.min(entries);
        Ok(())
    }

    pub fn set_ready(&mut self, ready_out_of: PortId) {
        self.ready_out_of = Some(ready_out_of);
        self.port_type = PortType::Ready;
        self.output_port = true;
    }

    pub fn add_ready_out_port(&mut self, p: PortId) {
        if !self.ready_out_ports.contains(&p) {
            self.ready_out_ports.push(p);
        }
    }

    pub fn remove_ready_out_port(&mut self, p: PortId) {
        self.ready_out_ports.retain(|&x| x != p);
    }

    pub fn set_ready_in_of(&mut self, p: Option<PortId>) {
        self.ready_in_of = p;
    }

    /// Registers `clock` as a port-driven `ClockBlock` this port's own
    /// output pin acts as the source signal for.
    pub fn add_clock_source_of(&mut self, clock: ClockBlockId) {
        if !self.source_of.contains(&clock) {
            self.source_of.push(clock);
        }
    }

    pub fn source_of(&self) -> &[ClockBlockId] {
        &self.source_of
    }

    // -- lifecycle ------------------------------------------------------------

    /// `setCInUse(true)`: returns the port to its power-on configuration
    /// (not just its data-plane registers) and forces a rebind of the
    /// cached clock iterator on the next `update`; `setCInUse(false)`
    /// detaches it from whatever ready-chain it was wired into.
    pub fn set_in_use(&mut self, in_use: bool) {
        self.in_use = in_use;
        if in_use {
            self.data = 0;
            self.condition = Condition::Full;
            self.output_port = false;
            self.buffered = false;
            self.inverted = false;
            self.sampling_edge = EdgeKind::Rising;
            self.transfer_reg_valid = false;
            self.time_reg_valid = false;
            self.hold_transfer_reg = false;
            self.valid_shift_reg_entries = 0;
            self.timestamp_reg = 0;
            self.shift_reg = 0;
            self.transfer_reg = 0;
            self.time_reg = 0;
            self.transfer_width = self.width; // shiftRegEntries back to 1
            self.port_shift_count = 1;
            self.port_counter = 0;
            self.ready_in = false;
            self.ready_mode = ReadyMode::NoReady;
            self.master_slave = MasterSlave::Master;
            self.port_type = PortType::Data;
            self.paused_in = None;
            self.paused_out = None;
            self.paused_sync = None;
            self.ready_out_of = None;
            self.next_edge = None;
        } else {
            self.ready_out_ports.clear();
            self.ready_out_of = None;
            self.ready_in_of = None;
        }
    }

    pub fn in_use(&self) -> bool {
        self.in_use
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_width() {
        assert!(Port::new(PortId(0), "p", 3).is_err());
    }

    #[test]
    fn inversion_only_on_width_one() {
        let mut p = Port::new(PortId(0), "p", 4).unwrap();
        assert!(p.set_port_inv(true).is_err());
        let mut p1 = Port::new(PortId(1), "p1", 1).unwrap();
        assert!(p1.set_port_inv(true).is_ok());
    }

    #[test]
    fn unbuffered_forces_transfer_width_and_no_ready() {
        let mut p = Port::new(PortId(0), "p", 8).unwrap();
        p.set_buffered(false).unwrap();
        assert!(p.set_transfer_width(16).is_err());
        assert!(p.set_ready_mode(ReadyMode::Strobed).is_err());
    }

    #[test]
    fn set_port_type_is_idempotent() {
        let mut p = Port::new(PortId(0), "p", 1).unwrap();
        p.set_port_type(PortType::Clock);
        assert_eq!(p.port_type(), PortType::Clock);
        assert!(p.is_output());
        // Calling again with the same type must be a no-op (property 7).
        p.set_port_type(PortType::Clock);
        assert_eq!(p.port_type(), PortType::Clock);
    }

    #[test]
    fn set_in_use_resets_state() {
        let mut p = Port::new(PortId(0), "p", 1).unwrap();
        p.transfer_reg_valid = true;
        p.port_counter = 42;
        p.set_in_use(true);
        assert!(!p.transfer_reg_valid());
        assert_eq!(p.port_counter(), 0);
    }
}
