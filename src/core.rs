//! `Core`: the arena that owns every port, clock block and peripheral, and
//! the only thing that ever holds more than one of them mutably at once
//! (Design Note 1). CPU threads never touch a `Port` directly — they go
//! through `Core::op_*`, which brings the target port up to date, applies
//! the operation, and fans out whatever `PortEvent`s resulted.
//!
//! Grounded on the same shape as `mio::Poll`: a struct that owns a
//! `Registry`-like arena of slots addressed by opaque tokens, with all the
//! cross-referencing logic living on the owner rather than on the slots
//! themselves.

use std::collections::VecDeque;

use log::{debug, trace};

use crate::clock::ClockBlock;
use crate::error::{PortOutcome, Result};
use crate::ids::{ClockBlockId, PeripheralId, PortId, ThreadId};
use crate::net_link::NetworkLink;
use crate::peripheral::ethernet_phy::EthernetPhy;
use crate::peripheral::spi_flash::SpiFlash;
use crate::peripheral::PeripheralConfig;
use crate::port::{Port, PortEvent};
use crate::scheduler::{ScheduleTarget, Scheduler};
use crate::signal::{EdgeKind, Signal};
use crate::tick::Tick;

/// The two co-simulated device kinds, held in one arena so a `PeripheralId`
/// is unambiguous regardless of which kind it names — allocating each kind
/// from its own `Vec`'s length let an `EthernetPhy` and a `SpiFlash` end up
/// sharing an id.
enum Peripheral {
    EthernetPhy(EthernetPhy),
    SpiFlash(SpiFlash),
}

/// The simulator's single-threaded arena. All ports, clock blocks and
/// peripherals it owns are addressed by the `*Id` handles in [`crate::ids`]
/// rather than by reference, so nothing here ever needs a lifetime
/// parameter or a borrow checker fight to let a port's update reach back
/// into the structure that owns it.
#[derive(Default)]
pub struct Core {
    ports: Vec<Port>,
    clocks: Vec<ClockBlock>,
    peripherals: Vec<Peripheral>,
    scheduler: Scheduler,
    runnable: VecDeque<ThreadId>,
}

impl Core {
    pub fn new() -> Core {
        Core {
            ports: Vec::new(),
            clocks: Vec::new(),
            peripherals: Vec::new(),
            scheduler: Scheduler::new(),
            runnable: VecDeque::new(),
        }
    }

    // -- arena construction ---------------------------------------------

    pub fn add_port(&mut self, name: impl Into<String>, width: u32) -> Result<PortId> {
        let id = PortId::from(self.ports.len());
        let port = Port::new(id, name, width)?;
        self.ports.push(port);
        Ok(id)
    }

    pub fn add_fixed_frequency_clock(&mut self, signal: Signal) -> ClockBlockId {
        let id = ClockBlockId::from(self.clocks.len());
        self.clocks.push(ClockBlock::fixed_frequency(signal));
        id
    }

    pub fn add_port_driven_clock(&mut self) -> ClockBlockId {
        let id = ClockBlockId::from(self.clocks.len());
        self.clocks.push(ClockBlock::port_driven(Signal::constant(0)));
        id
    }

    pub fn bind_port_clock(&mut self, port: PortId, clock: ClockBlockId) {
        self.ports[port.index()].set_clk(clock);
        self.clocks[clock.index()].attach_port(port);
    }

    /// Makes `port`'s own output pin the clock source for a port-driven
    /// `clock` — every output edge `port` drives becomes a clock edge seen
    /// by `clock`'s attached ports (`Port::sourceOf` in the original).
    pub fn add_clock_source(&mut self, port: PortId, clock: ClockBlockId) {
        self.ports[port.index()].add_clock_source_of(clock);
    }

    /// Wire two ports as a loopback pair (S6): writes to one become reads
    /// on the other and vice versa.
    pub fn connect_loopback(&mut self, a: PortId, b: PortId) {
        self.ports[a.index()].set_loopback(Some(b));
        self.ports[b.index()].set_loopback(Some(a));
    }

    /// The id an `EthernetPhy` constructed right now and then passed to
    /// [`Core::add_ethernet_phy`] will be given — `EthernetPhy::new` needs
    /// its own id up front to build its `ScheduleTarget`s, so callers
    /// reserve it with this before constructing the peripheral. Drawn from
    /// the single shared peripheral arena, so it's safe to compare against
    /// an id a `SpiFlash` was given too.
    pub fn next_ethernet_phy_id(&self) -> PeripheralId {
        PeripheralId::from(self.peripherals.len())
    }

    pub fn add_ethernet_phy(&mut self, phy: EthernetPhy) -> PeripheralId {
        let id = PeripheralId::from(self.peripherals.len());
        let (target, at) = phy.initial_rx_wakeup();
        self.peripherals.push(Peripheral::EthernetPhy(phy));
        self.scheduler.push(target, at);
        id
    }

    pub fn add_spi_flash(&mut self, flash: SpiFlash) -> PeripheralId {
        let id = PeripheralId::from(self.peripherals.len());
        self.peripherals.push(Peripheral::SpiFlash(flash));
        id
    }

    /// Validates `config` against the Ethernet PHY descriptor, builds the
    /// peripheral, and registers it — the one-call path a board-topology
    /// builder actually wants instead of juggling `next_ethernet_phy_id`
    /// itself.
    pub fn add_ethernet_phy_from_config(
        &mut self,
        config: &PeripheralConfig,
        link: Box<dyn NetworkLink + Send>,
    ) -> Result<PeripheralId> {
        let id = self.next_ethernet_phy_id();
        let phy = EthernetPhy::from_config(id, config, link)?;
        let driving_ports = phy.driving_ports();
        let id = self.add_ethernet_phy(phy);
        for port in driving_ports {
            self.set_port_observer(port, id);
        }
        Ok(id)
    }

    /// Validates `config` against the SPI flash descriptor and registers a
    /// flash backed by `mem` (typically read with
    /// [`crate::peripheral::read_backing_file`] from the `filename`
    /// property the config was built from).
    pub fn add_spi_flash_from_config(&mut self, config: &PeripheralConfig, mem: Vec<u8>) -> Result<PeripheralId> {
        let flash = SpiFlash::from_config(config, mem)?;
        let driving_ports = flash.driving_ports();
        let id = self.add_spi_flash(flash);
        for port in driving_ports {
            self.set_port_observer(port, id);
        }
        Ok(id)
    }

    pub fn set_port_observer(&mut self, port: PortId, peripheral: PeripheralId) {
        self.ports[port.index()].set_observer(Some(peripheral));
    }

    // -- accessors ---------------------------------------------------------

    pub fn port(&self, id: PortId) -> &Port {
        &self.ports[id.index()]
    }

    pub fn port_mut(&mut self, id: PortId) -> &mut Port {
        &mut self.ports[id.index()]
    }

    pub fn clock_block(&self, id: ClockBlockId) -> &ClockBlock {
        &self.clocks[id.index()]
    }

    pub fn ethernet_phy(&self, id: PeripheralId) -> &EthernetPhy {
        match &self.peripherals[id.index()] {
            Peripheral::EthernetPhy(phy) => phy,
            Peripheral::SpiFlash(_) => panic!("{id:?} is a SpiFlash, not an EthernetPhy"),
        }
    }

    pub fn spi_flash(&self, id: PeripheralId) -> &SpiFlash {
        match &self.peripherals[id.index()] {
            Peripheral::SpiFlash(flash) => flash,
            Peripheral::EthernetPhy(_) => panic!("{id:?} is an EthernetPhy, not a SpiFlash"),
        }
    }

    /// Threads woken by port activity since the last call, in wake order.
    pub fn take_runnable(&mut self) -> Vec<ThreadId> {
        self.runnable.drain(..).collect()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    // -- the update/dispatch core --------------------------------------

    fn bring_up_to_date(&mut self, port: PortId, now: Tick) {
        let clock_id = match self.ports[port.index()].clock_block() {
            Some(id) => id,
            None => return,
        };
        let (signal, fixed) = {
            let cb = &self.clocks[clock_id.index()];
            (cb.signal().clone(), cb.is_fixed_frequency())
        };
        let events = self.ports[port.index()].update(&signal, fixed, now);
        self.dispatch(port, events, now);
    }

    /// Pushes a `ScheduleTarget::Port` wakeup at the next tick
    /// [`Port::next_wakeup`] predicts this port could produce an externally
    /// visible change, so it gets revisited even if nothing else brings it
    /// up to date first. Must run AFTER whatever just mutated the port's
    /// state (`op_*`, `see_pins_change`, a ready-out level change, …), not
    /// as part of `bring_up_to_date` — `bring_up_to_date` runs BEFORE those
    /// mutations apply, so a prediction computed there would be based on
    /// stale state. `Scheduler::push` only ever moves a target's wakeup
    /// earlier, so calling this redundantly (every mutation site does) is
    /// always safe.
    fn schedule_port_if_needed(&mut self, port: PortId) {
        let clock_id = match self.ports[port.index()].clock_block() {
            Some(id) => id,
            None => return,
        };
        let (signal, fixed) = {
            let cb = &self.clocks[clock_id.index()];
            (cb.signal().clone(), cb.is_fixed_frequency())
        };
        if let Some(at) = self.ports[port.index()].next_wakeup(&signal, fixed) {
            self.scheduler.push(ScheduleTarget::Port(port), at);
        }
    }

    /// Fan a port's reported events out to everything that cares: loopback
    /// partners, the owning peripheral, ready-out listeners, and the
    /// runnable-thread queue (Design Note 4: events over back-references).
    fn dispatch(&mut self, port: PortId, events: Vec<PortEvent>, now: Tick) {
        for ev in events {
            match ev {
                PortEvent::ThreadWoken(t) => {
                    trace!("core: thread {t:?} woken by port {port:?}");
                    self.runnable.push_back(t);
                }
                PortEvent::OutputPinChanged(value) => {
                    if let Some(target) = self.ports[port.index()].loopback_target() {
                        self.see_pins_change(target, value, now);
                    }
                    if let Some(peripheral) = self.ports[port.index()].observer() {
                        self.notify_peripheral(peripheral, port, value, now);
                    }
                    let driven_clocks = self.ports[port.index()].source_of().to_vec();
                    for clock in driven_clocks {
                        self.drive_clock_block(clock, value, now);
                    }
                }
                PortEvent::ReadyOutChanged(level) => {
                    let listeners = self.ports[port.index()].ready_out_ports().to_vec();
                    for listener in listeners {
                        self.ports[listener.index()].set_ready_in_level(level);
                        self.bring_up_to_date(listener, now);
                        self.schedule_port_if_needed(listener);
                    }
                }
                PortEvent::ConditionEventFired => {
                    debug!("core: condition/time event fired on port {port:?} at {now}");
                }
            }
        }
    }

    /// Entry point for anything outside the clock-edge path that drives a
    /// port's input pins: a loopback partner or a peripheral.
    pub fn see_pins_change(&mut self, port: PortId, value: u32, now: Tick) {
        self.bring_up_to_date(port, now);
        self.ports[port.index()].see_pins_change(value, now);
        self.schedule_port_if_needed(port);
    }

    fn notify_peripheral(&mut self, peripheral: PeripheralId, port: PortId, value: u32, now: Tick) {
        let reactions = match &mut self.peripherals[peripheral.index()] {
            Peripheral::EthernetPhy(phy) => phy.on_port_output_changed(port, value, now),
            Peripheral::SpiFlash(flash) => flash.on_port_output_changed(port, value, now),
        };
        self.apply_peripheral_reactions(reactions, now);
    }

    /// Applies a source port's new output value to a port-driven `clock`:
    /// a real level change becomes a one-off edge seen by every port
    /// attached to that clock, since a port-driven clock's transitions
    /// aren't known ahead of time the way a fixed-frequency one's are.
    fn drive_clock_block(&mut self, clock: ClockBlockId, value: u32, now: Tick) {
        let new_level = value & 1;
        let old_level = self.clocks[clock.index()].signal().get_value(now);
        if new_level == old_level {
            return;
        }
        self.clocks[clock.index()].set_signal(Signal::constant(new_level));
        let edge = if new_level == 1 { EdgeKind::Rising } else { EdgeKind::Falling };
        let attached = self.clocks[clock.index()].attached_ports().to_vec();
        for port in attached {
            let events = self.ports[port.index()].see_edge(edge, now);
            self.dispatch(port, events, now);
            self.schedule_port_if_needed(port);
        }
    }

    fn apply_peripheral_reactions(&mut self, reactions: PeripheralReactions, now: Tick) {
        for (target, at) in reactions.reschedules {
            self.scheduler.push(target, at);
        }
        for (port, value) in reactions.drives {
            self.see_pins_change(port, value, now);
        }
    }

    // -- CPU-thread-facing operations ------------------------------------

    pub fn op_in(&mut self, port: PortId, thread: ThreadId, now: Tick) -> PortOutcome<u32> {
        self.bring_up_to_date(port, now);
        let outcome = self.ports[port.index()].op_in(thread, now);
        self.schedule_port_if_needed(port);
        outcome
    }

    pub fn op_inpw(&mut self, port: PortId, thread: ThreadId, w: u32, now: Tick) -> PortOutcome<u32> {
        self.bring_up_to_date(port, now);
        let outcome = self.ports[port.index()].op_inpw(thread, w, now);
        self.schedule_port_if_needed(port);
        outcome
    }

    /// Latches `v` into `transferReg`; the pin itself only moves on the
    /// next falling edge `update` sees, so unlike `op_in`/`op_sync` this
    /// never produces a `PortEvent` of its own.
    pub fn op_out(&mut self, port: PortId, thread: ThreadId, v: u32, now: Tick) -> PortOutcome<()> {
        self.bring_up_to_date(port, now);
        let outcome = self.ports[port.index()].op_out(thread, v, now);
        self.schedule_port_if_needed(port);
        outcome
    }

    pub fn op_outpw(&mut self, port: PortId, thread: ThreadId, v: u32, w: u32, now: Tick) -> PortOutcome<()> {
        self.bring_up_to_date(port, now);
        let outcome = self.ports[port.index()].op_outpw(thread, v, w, now);
        self.schedule_port_if_needed(port);
        outcome
    }

    pub fn op_setpsc(&mut self, port: PortId, thread: ThreadId, w: u32, now: Tick) -> PortOutcome<()> {
        self.bring_up_to_date(port, now);
        let outcome = self.ports[port.index()].op_setpsc(thread, w);
        self.schedule_port_if_needed(port);
        outcome
    }

    pub fn op_endin(&mut self, port: PortId, now: Tick) -> PortOutcome<u32> {
        self.bring_up_to_date(port, now);
        let outcome = self.ports[port.index()].op_endin(now);
        self.schedule_port_if_needed(port);
        outcome
    }

    pub fn op_sync(&mut self, port: PortId, thread: ThreadId, now: Tick) -> PortOutcome<()> {
        self.bring_up_to_date(port, now);
        let outcome = self.ports[port.index()].op_sync(thread, now);
        self.schedule_port_if_needed(port);
        outcome
    }

    pub fn op_peek(&mut self, port: PortId, now: Tick) -> PortOutcome<u32> {
        self.bring_up_to_date(port, now);
        self.ports[port.index()].op_peek(now)
    }

    pub fn op_get_timestamp(&mut self, port: PortId, now: Tick) -> PortOutcome<u16> {
        self.bring_up_to_date(port, now);
        self.ports[port.index()].op_get_timestamp(now)
    }

    pub fn op_set_port_time(&mut self, port: PortId, thread: ThreadId, v: u16, now: Tick) -> PortOutcome<()> {
        self.bring_up_to_date(port, now);
        let outcome = self.ports[port.index()].op_set_port_time(thread, v, now);
        self.schedule_port_if_needed(port);
        outcome
    }

    pub fn op_clear_port_time(&mut self, port: PortId, now: Tick) {
        self.bring_up_to_date(port, now);
        self.ports[port.index()].op_clear_port_time();
        self.schedule_port_if_needed(port);
    }

    pub fn op_clear_buf(&mut self, port: PortId, now: Tick) {
        self.bring_up_to_date(port, now);
        self.ports[port.index()].op_clear_buf();
        self.schedule_port_if_needed(port);
    }

    pub fn set_in_use(&mut self, port: PortId, in_use: bool) {
        self.ports[port.index()].set_in_use(in_use);
    }

    // -- scheduler-driven peripheral stepping -----------------------------

    /// Run every scheduled target (peripheral step or predicted port
    /// wakeup) at or before `deadline`, then bring every in-use port up to
    /// `deadline` regardless of whether it had a pending wakeup. The final
    /// sweep is the correctness backstop: `Port::next_wakeup`-driven
    /// scheduling (see `src/port/update.rs`'s module docs) only ever
    /// brings a port's `update` forward, never replaces this pass, so a
    /// missed or overly conservative prediction just costs a later update
    /// instead of a wrong one.
    pub fn run_until(&mut self, deadline: Tick) {
        while let Some((tick, target)) = self.scheduler.pop() {
            if tick > deadline {
                self.scheduler.push(target, tick);
                break;
            }
            self.run_target(target, tick);
        }
        for i in 0..self.ports.len() {
            let port = PortId::from(i);
            if self.ports[i].in_use() {
                self.bring_up_to_date(port, deadline);
                self.schedule_port_if_needed(port);
            }
        }
    }

    fn run_target(&mut self, target: ScheduleTarget, now: Tick) {
        match target {
            ScheduleTarget::Port(id) => {
                self.bring_up_to_date(id, now);
                self.schedule_port_if_needed(id);
            }
            ScheduleTarget::EthernetPhyTx(id) => {
                if let Some(Peripheral::EthernetPhy(phy)) = self.peripherals.get_mut(id.index()) {
                    let reactions = phy.run_tx(now);
                    self.apply_peripheral_reactions(reactions, now);
                }
            }
            ScheduleTarget::EthernetPhyRx(id) => {
                if let Some(Peripheral::EthernetPhy(phy)) = self.peripherals.get_mut(id.index()) {
                    let reactions = phy.run_rx(now);
                    self.apply_peripheral_reactions(reactions, now);
                }
            }
            ScheduleTarget::SpiFlash(id) => {
                if let Some(Peripheral::SpiFlash(flash)) = self.peripherals.get_mut(id.index()) {
                    let reactions = flash.run(now);
                    self.apply_peripheral_reactions(reactions, now);
                }
            }
        }
    }

    pub fn schedule(&mut self, target: ScheduleTarget, at: Tick) {
        self.scheduler.push(target, at);
    }
}

/// What a peripheral wants `Core` to do on its behalf after reacting to a
/// pin change or a scheduled `run`. Keeps peripherals from needing a
/// back-reference into `Core` (Design Note 4, applied to peripherals too).
#[derive(Default)]
pub struct PeripheralReactions {
    pub drives: Vec<(PortId, u32)>,
    pub reschedules: Vec<(ScheduleTarget, Tick)>,
}

impl PeripheralReactions {
    pub fn none() -> PeripheralReactions {
        PeripheralReactions::default()
    }

    pub fn drive(mut self, port: PortId, value: u32) -> PeripheralReactions {
        self.drives.push((port, value));
        self
    }

    pub fn reschedule(mut self, target: ScheduleTarget, at: Tick) -> PeripheralReactions {
        self.reschedules.push((target, at));
        self
    }
}
