//! The CPU-thread-facing port operations (`SPEC_FULL.md` §4.3).
//!
//! Every operation here assumes the caller (`Core`) has already brought the
//! port up to date for tick `t` via [`super::Port::update`] before calling
//! in; that's what makes "all state visible through a Port at tick `t` is
//! the state as of the last `update(t)`" true without each operation having
//! to re-derive it.
//!
//! The branching below follows the reference implementation's `in`/`inpw`/
//! `out`/`outpw`/`endin`/`sync` bodies closely, including a couple of its
//! documented oddities (see the comments on `op_out` and `op_inpw`) that
//! SPEC_FULL.md's Open Questions chose to carry forward rather than silently
//! "fix", since no caller has ever been shown to depend on the fixed
//! behavior and changing it would be a guess.

use super::{Port, PortEvent, PortType};
use crate::error::PortOutcome;
use crate::ids::ThreadId;
use crate::tick::Tick;

impl Port {
    /// `count >= width && count <= transferWidth && count % width == 0`,
    /// i.e. a valid argument to `setpsc`/`inpw`/`outpw`.
    fn is_valid_port_shift_count(&self, count: u32) -> bool {
        count >= self.width && count <= self.transfer_width && count % self.width == 0
    }

    fn set_transfer_reg(&mut self, value: u32) {
        self.transfer_reg = value & self.value_mask_for_transfer();
        self.transfer_reg_valid = true;
    }

    /// Read `transferReg` if time-and-condition are met, otherwise park the
    /// calling thread in `pausedIn`.
    pub fn op_in(&mut self, thread: ThreadId, _t: Tick) -> PortOutcome<u32> {
        if self.port_type != PortType::Data {
            return PortOutcome::Continue(0);
        }
        if self.output_port {
            self.paused_in = Some(thread);
            return PortOutcome::Deschedule;
        }
        if self.time_and_condition_met() {
            let value = self.transfer_reg;
            if self.valid_shift_reg_entries == self.port_shift_count {
                self.port_shift_count = self.shift_reg_entries();
                self.transfer_reg = self.shift_reg;
                self.valid_shift_reg_entries = 0;
                self.timestamp_reg = self.port_counter;
            } else {
                self.transfer_reg_valid = false;
            }
            self.hold_transfer_reg = false;
            return PortOutcome::Continue(value);
        }
        self.paused_in = Some(thread);
        PortOutcome::Deschedule
    }

    /// As `in`, but first sets the logical shift-count width — except when
    /// the read completes immediately, in which case `validShiftRegEntries`
    /// is deliberately left untouched by the refill (the reference
    /// implementation's own `// TODO should validShiftRegEntries be reset?`
    /// marks this as unresolved upstream; `op_in` resets it, `op_inpw`
    /// doesn't, and this crate preserves that asymmetry rather than
    /// inventing a "corrected" behavior).
    pub fn op_inpw(&mut self, thread: ThreadId, w: u32, _t: Tick) -> PortOutcome<u32> {
        if !self.buffered || !self.is_valid_port_shift_count(w) {
            return PortOutcome::Illegal("inpw() shift width invalid for this port");
        }
        if self.port_type != PortType::Data {
            return PortOutcome::Continue(0);
        }
        if self.output_port {
            self.paused_in = Some(thread);
            return PortOutcome::Deschedule;
        }
        if self.time_and_condition_met() {
            let value = self.transfer_reg;
            if self.valid_shift_reg_entries == self.port_shift_count {
                self.port_shift_count = self.shift_reg_entries();
                self.transfer_reg = self.shift_reg;
                self.timestamp_reg = self.port_counter;
            } else {
                self.transfer_reg_valid = false;
            }
            self.hold_transfer_reg = false;
            return PortOutcome::Continue(value);
        }
        self.port_shift_count = w / self.width;
        self.paused_in = Some(thread);
        PortOutcome::Deschedule
    }

    /// Write `v` to `transferReg`; if output already has pending data, park
    /// the thread in `pausedOut` instead.
    ///
    /// A port that isn't already driving output gets `validShiftRegEntries`
    /// forced to `1` here, matching the reference implementation's own
    /// `// TODO probably wrong` branch on the input-to-output transition;
    /// kept rather than "fixed" for the same reason as `op_inpw` above.
    pub fn op_out(&mut self, thread: ThreadId, v: u32, _t: Tick) -> PortOutcome<()> {
        if self.port_type != PortType::Data {
            return PortOutcome::Continue(());
        }
        if self.output_port {
            if self.transfer_reg_valid {
                self.paused_out = Some(thread);
                return PortOutcome::Deschedule;
            }
        } else {
            self.valid_shift_reg_entries = 1;
        }
        self.set_transfer_reg(v);
        self.output_port = true;
        PortOutcome::Continue(())
    }

    pub fn op_outpw(&mut self, thread: ThreadId, v: u32, w: u32, _t: Tick) -> PortOutcome<()> {
        if !self.buffered || !self.is_valid_port_shift_count(w) {
            return PortOutcome::Illegal("outpw() shift width invalid for this port");
        }
        if self.port_type != PortType::Data {
            return PortOutcome::Continue(());
        }
        if self.output_port {
            if self.transfer_reg_valid {
                self.paused_out = Some(thread);
                return PortOutcome::Deschedule;
            }
        } else {
            self.valid_shift_reg_entries = 1;
        }
        self.port_shift_count = w / self.width;
        self.set_transfer_reg(v);
        self.output_port = true;
        PortOutcome::Continue(())
    }

    /// Set the logical shift-count width without moving data.
    pub fn op_setpsc(&mut self, thread: ThreadId, w: u32) -> PortOutcome<()> {
        if !self.buffered || !self.is_valid_port_shift_count(w) {
            return PortOutcome::Illegal("setpsc() shift width invalid for this port");
        }
        if self.port_type != PortType::Data {
            return PortOutcome::Continue(());
        }
        if self.output_port && self.transfer_reg_valid {
            self.paused_out = Some(thread);
            return PortOutcome::Deschedule;
        }
        self.port_shift_count = w / self.width;
        PortOutcome::Continue(())
    }

    /// Report bits currently buffered and force the partial shift into
    /// `transferReg`.
    ///
    /// Branches on whether a full transfer is already latched: if so, the
    /// partial shift-register contents are reported *in addition* to the
    /// latched entries without disturbing `transferReg`; otherwise the
    /// partial contents are forced into `transferReg` immediately.
    pub fn op_endin(&mut self, _t: Tick) -> PortOutcome<u32> {
        if self.output_port || !self.buffered {
            return PortOutcome::Illegal("endin() requires a buffered input port");
        }
        if self.port_type != PortType::Data {
            return PortOutcome::Continue(0);
        }
        let mut entries = self.valid_shift_reg_entries;
        if self.transfer_reg_valid {
            entries += self.shift_reg_entries();
            if self.valid_shift_reg_entries != 0 {
                self.port_shift_count = self.valid_shift_reg_entries;
            }
        } else {
            self.valid_shift_reg_entries = 0;
            self.port_shift_count = self.shift_reg_entries();
            self.timestamp_reg = self.port_counter;
            self.set_transfer_reg(self.shift_reg);
        }
        PortOutcome::Continue(entries * self.width)
    }

    /// Park the thread until all pending output has drained.
    ///
    /// Unconditional on an output `DATAPORT`: it always parks in
    /// `pausedSync` and relies on the falling-edge path to wake it once
    /// `transferRegValid` goes false, rather than checking the pending-data
    /// flags up front.
    pub fn op_sync(&mut self, thread: ThreadId, _t: Tick) -> PortOutcome<()> {
        if self.port_type != PortType::Data || !self.output_port {
            return PortOutcome::Continue(());
        }
        self.paused_sync = Some(thread);
        PortOutcome::Deschedule
    }

    /// Read the current pin sampling value without disturbing the shift
    /// register.
    pub fn op_peek(&self, _t: Tick) -> PortOutcome<u32> {
        PortOutcome::Continue(self.get_pins_input_value())
    }

    /// Port-counter value at the time the current `transferReg` was
    /// latched.
    pub fn op_get_timestamp(&self, _t: Tick) -> PortOutcome<u16> {
        PortOutcome::Continue(self.timestamp_reg)
    }

    /// Set `timeReg`; an output port with pending data parks the thread.
    pub fn op_set_port_time(&mut self, thread: ThreadId, v: u16, _t: Tick) -> PortOutcome<()> {
        if self.port_type != PortType::Data {
            return PortOutcome::Continue(());
        }
        if self.output_port && self.transfer_reg_valid {
            self.paused_out = Some(thread);
            return PortOutcome::Deschedule;
        }
        self.time_reg = v;
        self.time_reg_valid = true;
        PortOutcome::Continue(())
    }

    pub fn op_clear_port_time(&mut self) {
        self.time_reg_valid = false;
    }

    pub fn op_clear_buf(&mut self) {
        self.transfer_reg_valid = false;
        self.valid_shift_reg_entries = 0;
        self.port_shift_count = 0;
        self.hold_transfer_reg = false;
    }

    fn value_mask_for_transfer(&self) -> u32 {
        if self.transfer_width >= 32 {
            u32::MAX
        } else {
            (1u32 << self.transfer_width) - 1
        }
    }

    /// Wake whichever thread is parked in `pausedIn`, if any, returning the
    /// event `Core` should fan out.
    pub(super) fn wake_paused_in(&mut self) -> Option<PortEvent> {
        self.paused_in.take().map(PortEvent::ThreadWoken)
    }

    pub(super) fn wake_paused_out(&mut self) -> Option<PortEvent> {
        self.paused_out.take().map(PortEvent::ThreadWoken)
    }

    pub(super) fn wake_paused_sync(&mut self) -> Option<PortEvent> {
        self.paused_sync.take().map(PortEvent::ThreadWoken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::PortId;

    fn buffered_port(width: u32, transfer_width: u32) -> Port {
        let mut p = Port::new(PortId(0), "p", width).unwrap();
        p.set_buffered(true).unwrap();
        p.set_transfer_width(transfer_width).unwrap();
        p.set_in_use(true);
        p
    }

    #[test]
    fn out_then_out_parks_thread() {
        let mut p = buffered_port(8, 8);
        assert_eq!(p.op_out(ThreadId(0), 0x42, 0), PortOutcome::Continue(()));
        assert_eq!(p.op_out(ThreadId(1), 0x43, 0), PortOutcome::Deschedule);
        assert_eq!(p.paused_out, Some(ThreadId(1)));
    }

    #[test]
    fn out_on_fresh_input_port_forces_one_valid_shift_entry() {
        let mut p = buffered_port(8, 8);
        assert_eq!(p.op_out(ThreadId(0), 0x42, 0), PortOutcome::Continue(()));
        assert_eq!(p.valid_shift_reg_entries, 1);
    }

    #[test]
    fn in_on_unmet_condition_parks_thread() {
        let mut p = buffered_port(8, 8);
        assert_eq!(p.op_in(ThreadId(0), 0), PortOutcome::Deschedule);
        assert_eq!(p.paused_in, Some(ThreadId(0)));
    }

    #[test]
    fn in_on_output_port_parks_thread_rather_than_erroring() {
        let mut p = buffered_port(8, 8);
        p.output_port = true;
        assert_eq!(p.op_in(ThreadId(0), 0), PortOutcome::Deschedule);
        assert_eq!(p.paused_in, Some(ThreadId(0)));
    }

    #[test]
    fn in_reads_when_full_condition_met() {
        let mut p = buffered_port(8, 8);
        p.transfer_reg = 0xAB;
        p.transfer_reg_valid = true;
        assert_eq!(p.op_in(ThreadId(0), 0), PortOutcome::Continue(0xAB));
    }

    #[test]
    fn outpw_rejects_bad_width() {
        let mut p = buffered_port(1, 8);
        assert_eq!(
            p.op_outpw(ThreadId(0), 1, 3, 0),
            PortOutcome::Illegal("outpw() shift width invalid for this port")
        );
    }

    #[test]
    fn inpw_on_unbuffered_is_illegal() {
        let mut p = Port::new(PortId(0), "p", 8).unwrap();
        p.set_in_use(true);
        assert_eq!(
            p.op_inpw(ThreadId(0), 8, 0),
            PortOutcome::Illegal("inpw() shift width invalid for this port")
        );
    }

    #[test]
    fn endin_reports_latched_plus_partial_count_without_touching_transfer_reg() {
        let mut p = buffered_port(8, 32);
        p.valid_shift_reg_entries = 2;
        p.shift_reg = 0x1234;
        p.transfer_reg = 0x99;
        p.transfer_reg_valid = true;
        let outcome = p.op_endin(0);
        // entries = 2 (partial) + 4 (shiftRegEntries for an 8/32 port) = 6
        assert_eq!(outcome, PortOutcome::Continue(6 * 8));
        assert!(p.transfer_reg_valid());
        assert_eq!(p.transfer_reg, 0x99);
        assert_eq!(p.port_shift_count, 2);
    }

    #[test]
    fn endin_forces_partial_shift_into_transfer_reg_when_nothing_latched() {
        let mut p = buffered_port(8, 32);
        p.valid_shift_reg_entries = 3;
        p.shift_reg = 0xABCD;
        let outcome = p.op_endin(0);
        assert_eq!(outcome, PortOutcome::Continue(3 * 8));
        assert!(p.transfer_reg_valid());
        assert_eq!(p.transfer_reg, 0xABCD & 0xFFFF_FFFF);
        assert_eq!(p.valid_shift_reg_entries, 0);
    }

    #[test]
    fn sync_parks_unconditionally_on_output_port() {
        let mut p = buffered_port(8, 8);
        p.op_out(ThreadId(0), 1, 0);
        p.transfer_reg_valid = false; // drained
        assert_eq!(p.op_sync(ThreadId(1), 0), PortOutcome::Deschedule);
        assert_eq!(p.paused_sync, Some(ThreadId(1)));
    }

    #[test]
    fn sync_on_input_port_is_a_no_op() {
        let mut p = buffered_port(8, 8);
        assert_eq!(p.op_sync(ThreadId(0), 0), PortOutcome::Continue(()));
        assert_eq!(p.paused_sync, None);
    }

    #[test]
    fn set_port_time_parks_when_output_pending() {
        let mut p = buffered_port(8, 8);
        p.op_out(ThreadId(0), 1, 0);
        assert_eq!(
            p.op_set_port_time(ThreadId(1), 5, 0),
            PortOutcome::Deschedule
        );
    }
}
