//! The clock-driven per-edge update algorithm (`SPEC_FULL.md` §4.4).
//!
//! `Port` doesn't own the `Signal` that drives it — the owning `ClockBlock`
//! lives in `Core`'s arena — so every function here takes the resolved
//! signal as a parameter rather than reaching for a back-reference (Design
//! Note 4). `Core` is responsible for calling [`Port::update`] with the
//! correct clock signal and ready-in level *before* issuing any CPU-thread
//! operation, which is what makes every `op_*` call in `ops.rs` able to
//! assume the port's state already reflects tick `t`.
//!
//! `update` is the fast-forward primitive: a no-op for a port that can't
//! possibly change (not in use, not a data port, or clocked by a
//! port-driven block), the per-edge walk `update_slow` when `new_time` is
//! within two edges of the cached `next_edge`, and otherwise
//! `update_no_external_change` for every edge but the last plus a single
//! `see_edge` for that last one. `update_no_external_change` is sound
//! because the only caller of the "otherwise" branch is `update` itself,
//! which only ever reaches it when nothing between `time` and `new_time`
//! can have perturbed the port from outside (a pin write, a ready-in flip)
//! — if it could have, the caller would have brought the port up to date
//! at that earlier tick first. Within that window `update_no_external_change`
//! still never *assumes* silence: each of its regimes walks real edges via
//! `see_edge` until the port reaches the steady state the regime is named
//! for (shift register re-aligned, time register armed-and-waiting, ready
//! handshake settled), and only then closes the remaining gap with a
//! counter jump. If the edge budget runs out before steady state is
//! reached, it simply stops — the closed-form jump is only ever applied to
//! edges already known to be silent, never used to shortcut past one that
//! might not be.

use super::{Condition, Port, PortEvent, PortType};
use crate::signal::{EdgeIterator, EdgeKind, Signal};
use crate::tick::Tick;

impl Port {
    pub(super) fn use_ready_in(&self) -> bool {
        matches!(self.ready_mode, super::ReadyMode::Handshake)
    }

    pub(super) fn use_ready_out(&self) -> bool {
        !matches!(self.ready_mode, super::ReadyMode::NoReady)
    }

    fn port_width_mask(&self) -> u32 {
        if self.width >= 32 {
            u32::MAX
        } else {
            (1u32 << self.width) - 1
        }
    }

    fn transfer_width_mask(&self) -> u32 {
        if self.transfer_width >= 32 {
            u32::MAX
        } else {
            (1u32 << self.transfer_width) - 1
        }
    }

    /// Shift `old` down by one port-width's worth of bits, replicating the
    /// top entry back in behind it — an output port with nothing new to
    /// send keeps re-sending its last transfer's top slice forever.
    fn next_shift_reg_output_port(&self, old: u32) -> u32 {
        let repeat_shift = self.transfer_width - self.width;
        let repeat_value = old >> repeat_shift;
        let retval = old >> self.width;
        retval | (repeat_value << repeat_shift)
    }

    fn should_realign_shift_register(&self) -> bool {
        debug_assert!(!self.output_port);
        if !self.buffered {
            return false;
        }
        if self.paused_in.is_none() && !self.events_permitted {
            return false;
        }
        if self.hold_transfer_reg {
            return false;
        }
        if !self.value_meets_condition(self.get_pins_input_value()) {
            return false;
        }
        if self.time_reg_valid {
            return !self.use_ready_out() && self.port_counter == self.time_reg;
        }
        self.condition != Condition::Full
    }

    fn compute_ready_out(&self) -> bool {
        if !self.use_ready_out() {
            return false;
        }
        if self.output_port {
            if self.use_ready_in() && !self.ready_in {
                return false;
            }
            return self.valid_shift_reg_entries != 0;
        }
        if self.time_reg_valid {
            return self.port_counter == self.time_reg;
        }
        self.valid_shift_reg_entries != self.port_shift_count
    }

    fn update_ready_out(&mut self) -> Option<PortEvent> {
        let new_value = self.compute_ready_out();
        if new_value == self.ready_out {
            return None;
        }
        self.ready_out = new_value;
        Some(PortEvent::ReadyOutChanged(new_value))
    }

    fn see_falling_edge_output_port(&mut self) -> Vec<PortEvent> {
        let mut events = Vec::new();
        let mut next_shift_reg = self.shift_reg;
        let mut next_output_port = self.output_port;

        if self.time_reg_valid && self.time_reg == self.port_counter {
            next_output_port = self.transfer_reg_valid;
            self.time_reg_valid = false;
            self.valid_shift_reg_entries = 0;
        }

        if !self.use_ready_in() || self.ready_in {
            if self.valid_shift_reg_entries > 0 {
                self.valid_shift_reg_entries -= 1;
            }
            if self.valid_shift_reg_entries != 0 {
                next_shift_reg = self.next_shift_reg_output_port(self.shift_reg);
            }
            if self.valid_shift_reg_entries == 0 {
                if self.paused_sync.is_some() && !self.transfer_reg_valid {
                    if let Some(ev) = self.wake_paused_sync() {
                        events.push(ev);
                    }
                }
                if !self.time_reg_valid && self.transfer_reg_valid {
                    self.valid_shift_reg_entries = self.port_shift_count;
                    self.port_shift_count = self.shift_reg_entries();
                    next_shift_reg = self.transfer_reg;
                    self.timestamp_reg = self.port_counter;
                    self.transfer_reg_valid = false;
                    if self.paused_out.is_some() {
                        if let Some(ev) = self.wake_paused_out() {
                            events.push(ev);
                        }
                    }
                } else if !self.time_reg_valid && self.paused_in.is_some() {
                    next_output_port = false;
                    self.valid_shift_reg_entries = 0;
                }
            }
        }

        let old_pins = self.shift_reg & self.port_width_mask();
        let new_pins = if next_output_port { next_shift_reg } else { 0 } & self.port_width_mask();
        let pins_change = old_pins != new_pins;
        self.shift_reg = next_shift_reg;
        self.output_port = next_output_port;
        if pins_change {
            events.push(PortEvent::OutputPinChanged(self.get_pins_output_value()));
        }
        events
    }

    fn see_falling_edge(&mut self) -> Vec<PortEvent> {
        self.port_counter = self.port_counter.wrapping_add(1);
        let mut events = if self.output_port {
            self.see_falling_edge_output_port()
        } else {
            if self.use_ready_out() && self.time_reg_valid && self.port_counter == self.time_reg {
                self.time_reg_valid = false;
                self.valid_shift_reg_entries = 0;
            }
            Vec::new()
        };
        if let Some(ev) = self.update_ready_out() {
            events.push(ev);
        }
        events
    }

    fn see_sampling_edge(&mut self) -> Vec<PortEvent> {
        if self.output_port {
            return Vec::new();
        }
        if self.use_ready_out() && (!self.ready_out || self.time_reg_valid) {
            return Vec::new();
        }
        if self.use_ready_in() && !self.ready_in {
            return Vec::new();
        }

        let mut events = Vec::new();
        let current_value = self.get_pins_input_value();
        self.shift_reg >>= self.width;
        self.shift_reg |= (current_value << (self.transfer_width - self.width)) & self.transfer_width_mask();
        self.valid_shift_reg_entries += 1;

        if self.should_realign_shift_register() {
            self.valid_shift_reg_entries = self.port_shift_count;
            self.transfer_reg_valid = false;
            self.time_reg_valid = false;
            if self.buffered {
                self.condition = Condition::Full;
            }
        } else if self.buffered
            && self.time_reg_valid
            && !self.use_ready_out()
            && self.port_counter == self.time_reg
        {
            self.time_reg_valid = false;
        }

        if self.valid_shift_reg_entries == self.port_shift_count
            && (!self.use_ready_out()
                || !self.transfer_reg_valid
                || self.time_reg_valid
                || self.condition != Condition::Full)
        {
            self.valid_shift_reg_entries = 0;
            if !self.hold_transfer_reg {
                self.port_shift_count = self.shift_reg_entries();
                self.timestamp_reg = self.port_counter;
                self.transfer_reg = self.shift_reg & self.transfer_width_mask();
                self.transfer_reg_valid = true;
                if self.time_and_condition_met() {
                    self.time_reg_valid = false;
                    if self.paused_in.is_some() {
                        if let Some(ev) = self.wake_paused_in() {
                            events.push(ev);
                        }
                    }
                    if self.events_permitted {
                        events.push(PortEvent::ConditionEventFired);
                    }
                }
            }
        }
        events
    }

    /// Advance this port's view of time across a single clock edge,
    /// applying the falling-edge and/or sampling-edge logic as appropriate,
    /// and return whatever became externally visible as a result.
    pub fn see_edge(&mut self, edge: EdgeKind, new_time: Tick) -> Vec<PortEvent> {
        debug_assert!(new_time >= self.time);
        self.time = new_time;
        if self.port_type != PortType::Data {
            return Vec::new();
        }
        let mut events = Vec::new();
        if edge == EdgeKind::Falling {
            events.extend(self.see_falling_edge());
        }
        if edge == self.sampling_edge {
            events.extend(self.see_sampling_edge());
        }
        events
    }

    /// Closed-form `portCounter` update for `num_edges` edges known to
    /// produce no externally visible change: half (rounded by whether the
    /// first of them is itself a falling edge) of them are falling edges.
    pub(super) fn update_port_counter(&mut self, num_edges: u64, next_edge_is_falling: bool) {
        let num_falling = (num_edges + next_edge_is_falling as u64) / 2;
        self.port_counter = self.port_counter.wrapping_add(num_falling as u16);
    }

    /// Closed-form `validShiftRegEntries` update for an input port coasting
    /// through `num_edges` edges with no realignment or latch along the way.
    pub(super) fn update_input_valid_shift_reg_entries(
        &mut self,
        num_edges: u64,
        next_edge_is_sampling: bool,
    ) {
        debug_assert!(!self.output_port);
        let entries = self.shift_reg_entries() as u64;
        let num_sampling = (num_edges + next_edge_is_sampling as u64) / 2;
        self.valid_shift_reg_entries = ((self.valid_shift_reg_entries as u64 + num_sampling) % entries) as u32;
    }

    /// Number of falling edges from `next_edge` (inclusive) until
    /// `port_counter` reaches `time_reg`, with the reference implementation's
    /// 16-bit wraparound arithmetic.
    fn falling_edges_until_time_met(&self) -> u64 {
        debug_assert!(self.time_reg_valid);
        (self.time_reg.wrapping_sub(self.port_counter.wrapping_add(1))) as u64 + 1
    }

    /// Same, but counting every edge (not just falling ones) from
    /// `next_edge_kind` (the kind of the edge `next_edge` currently points
    /// at) until that same deadline.
    fn edges_until_time_met(&self, next_edge_kind: EdgeKind) -> u64 {
        let num_falling = self.falling_edges_until_time_met();
        if next_edge_kind == EdgeKind::Falling {
            num_falling * 2 - 1
        } else {
            num_falling * 2
        }
    }

    /// The shift register an input port's own pins would settle into if
    /// sampled forever with the input pins held at their current value —
    /// the value is simply replicated across every transfer-width slot.
    fn compute_steady_state_input_shift_reg(&self) -> u32 {
        let mut val = self.get_pins_input_value();
        let mut width = self.shift_reg_entries();
        let mut shift = self.width;
        while width > 1 {
            val = (val << shift) | val;
            width >>= 1;
            shift *= 2;
        }
        val & self.transfer_width_mask()
    }

    /// Skip `num_edges` edges the caller has already established produce no
    /// externally visible change. Each regime below walks real edges via
    /// `see_edge` until the port reaches the steady state that regime's
    /// closed form assumes, then jumps the rest in O(1); if the edge budget
    /// is exhausted before that point, it simply stops having applied only
    /// genuine per-edge effects. Faithful port of the reference
    /// implementation's `updateNoExternalChange`, with the `useReadyIn()`
    /// branch omitted: this crate's ready-in is an immediately-applied flag
    /// rather than a clock-tracked signal, so a port stuck with `ready_in ==
    /// false` simply falls through to ordinary per-edge stepping below
    /// (still bounded by `num_edges`, just without the extra jump) rather
    /// than needing its own closed form.
    pub fn update_no_external_change(&mut self, clock: &Signal, num_edges: u64) -> Vec<PortEvent> {
        if num_edges == 0 {
            return Vec::new();
        }
        let mut events = Vec::new();
        let mut it = self
            .next_edge
            .unwrap_or_else(|| clock.get_edge_iterator(self.time).expect("fixed-frequency clock"));
        let final_tick = (it + (num_edges as i64 - 1)).current().tick;
        let mut num_edges = num_edges;

        macro_rules! step {
            () => {{
                let edge = it.current();
                events.extend(self.see_edge(edge.kind, edge.tick));
                it.advance();
                num_edges -= 1;
                if num_edges == 0 {
                    self.next_edge = Some(it);
                    return events;
                }
            }};
        }
        macro_rules! jump {
            ($n:expr) => {{
                let next_is_falling = it.current().kind == EdgeKind::Falling;
                self.update_port_counter($n, next_is_falling);
                if !self.output_port {
                    let next_is_sampling = it.current().kind == self.sampling_edge;
                    self.update_input_valid_shift_reg_entries($n, next_is_sampling);
                }
                it.advance_by($n as i64);
                self.time = final_tick;
                self.next_edge = Some(it);
                return events;
            }};
        }
        // `validShiftRegEntries` provably doesn't move over these edges
        // (ready-out-gated sampling is a no-op while `time_reg_valid`, or
        // the caller already walked to shift-register steady state before
        // reaching here) — only `port_counter` needs the closed-form bump.
        macro_rules! jump_counter_only {
            ($n:expr) => {{
                let next_is_falling = it.current().kind == EdgeKind::Falling;
                self.update_port_counter($n, next_is_falling);
                it.advance_by($n as i64);
                self.time = final_tick;
                self.next_edge = Some(it);
                return events;
            }};
        }

        if self.output_port {
            while self.valid_shift_reg_entries != 0 || self.port_shift_count != self.shift_reg_entries() {
                step!();
            }
            if !self.time_reg_valid {
                jump!(num_edges);
            }
            let next_is_falling = it.current().kind == EdgeKind::Falling;
            let num_falling = (num_edges + next_is_falling as u64) / 2;
            let falling_remaining = self.falling_edges_until_time_met();
            if num_falling < falling_remaining {
                self.port_counter = self.port_counter.wrapping_add(num_falling as u16);
                it.advance_by(num_edges as i64);
                self.time = final_tick;
                self.next_edge = Some(it);
                return events;
            }
            let edges_remaining = self.edges_until_time_met(it.current().kind);
            self.port_counter = self.port_counter.wrapping_add((falling_remaining - 1) as u16);
            it.advance_by((edges_remaining - 1) as i64);
            num_edges -= edges_remaining - 1;
            if num_edges == 0 {
                self.time = final_tick;
                self.next_edge = Some(it);
                return events;
            }
            while self.time_reg_valid {
                step!();
            }
            while self.valid_shift_reg_entries != 0 || self.port_shift_count != self.shift_reg_entries() {
                step!();
            }
            jump!(num_edges);
        }

        // Input port.
        if self.time_reg_valid {
            if !self.use_ready_out() {
                let steady = self.compute_steady_state_input_shift_reg();
                while self.shift_reg != steady || self.port_shift_count != self.shift_reg_entries() {
                    step!();
                }
            }
            let next_is_falling = it.current().kind == EdgeKind::Falling;
            let num_falling = (num_edges + next_is_falling as u64) / 2;
            let falling_remaining = self.falling_edges_until_time_met();
            if num_falling < falling_remaining {
                jump_counter_only!(num_edges);
            }
            let edges_remaining = self.edges_until_time_met(it.current().kind);
            self.update_port_counter(edges_remaining - 1, next_is_falling);
            it.advance_by((edges_remaining - 1) as i64);
            num_edges -= edges_remaining - 1;
            if num_edges == 0 {
                self.time = final_tick;
                self.next_edge = Some(it);
                return events;
            }
            while self.time_reg_valid {
                step!();
            }
        }

        if self.use_ready_out() {
            let steady = self.compute_steady_state_input_shift_reg();
            if !self.value_meets_condition(self.get_pins_input_value()) {
                while self.shift_reg != steady || self.port_shift_count != self.shift_reg_entries() {
                    step!();
                }
                jump!(num_edges);
            }
            while self.condition != Condition::Full {
                step!();
            }
            while !self.transfer_reg_valid || self.port_shift_count != self.shift_reg_entries() {
                step!();
            }
            jump_counter_only!(num_edges);
        }

        let steady = self.compute_steady_state_input_shift_reg();
        while !self.transfer_reg_valid
            || self.port_shift_count != self.shift_reg_entries()
            || self.shift_reg != steady
            || self.transfer_reg != steady
        {
            step!();
        }
        jump!(num_edges);
    }

    /// Walk every edge up to and including `new_time` one at a time. Always
    /// correct; `update` prefers `update_no_external_change` plus a single
    /// `see_edge` for the final edge once there are more than two edges to
    /// cross.
    pub fn update_slow(&mut self, clock: &Signal, new_time: Tick) -> Vec<PortEvent> {
        let mut events = Vec::new();
        let mut it = match self
            .next_edge
            .or_else(|| clock.get_edge_iterator(self.time))
        {
            Some(it) => it,
            None => {
                // Constant signal: a DATAPORT clocked by a value that never
                // transitions never sees an edge, so nothing to simulate.
                self.time = new_time;
                return events;
            }
        };
        while it.current().tick <= new_time {
            let edge = it.current();
            events.extend(self.see_edge(edge.kind, edge.tick));
            it.advance();
        }
        self.time = new_time;
        self.next_edge = Some(it);
        events
    }

    /// Bring this port's state up to date for `new_time`: the fast-forward
    /// primitive every other port operation calls before touching state.
    ///
    /// `fixed_frequency` mirrors `ClockBlock::is_fixed_frequency`: a
    /// port-driven clock block's signal can change unpredictably between
    /// calls (its edges aren't known in advance), so such a port is always
    /// brought forward one `see_edge` at a time by whoever drives it rather
    /// than through this function. A port that isn't in use, or isn't a
    /// data port, can't produce an externally visible change either way —
    /// both are a plain no-op advance of `time`.
    ///
    /// Otherwise this is a three-way dispatch: within two edges of
    /// `new_time`, just walk them (`update_slow`); a bare clock-constant
    /// signal has no edges at all; beyond that, skip every edge but the
    /// last via `update_no_external_change` and apply the last one
    /// directly, since a caller is never allowed to ask for a `new_time`
    /// that skips past a tick at which something outside this function
    /// could have perturbed the port.
    pub fn update(&mut self, clock: &Signal, fixed_frequency: bool, new_time: Tick) -> Vec<PortEvent> {
        debug_assert!(new_time >= self.time);
        if !fixed_frequency || !self.in_use || self.port_type != PortType::Data {
            self.time = new_time;
            return Vec::new();
        }
        let it = match self.next_edge.or_else(|| clock.get_edge_iterator(self.time)) {
            Some(it) => it,
            None => {
                self.time = new_time;
                return Vec::new();
            }
        };
        self.next_edge = Some(it);
        // Don't bother optimizing a skip of two edges or less.
        if (it + 2).current().tick > new_time {
            return self.update_slow(clock, new_time);
        }
        let target = clock.get_edge_iterator(new_time).expect("fixed-frequency clock has edges");
        let num_edges = it.edges_until(&target);
        debug_assert!(num_edges >= 1);
        let mut events = self.update_no_external_change(clock, (num_edges - 1) as u64);
        let edge = self.next_edge.expect("set above").current();
        events.extend(self.see_edge(edge.kind, edge.tick));
        let mut after = self.next_edge.expect("see_edge doesn't touch next_edge");
        after.advance();
        self.next_edge = Some(after);
        self.time = new_time;
        events
    }

    /// Whether `readyOut` is settled: no falling edge between now and the
    /// next edge this port sees could possibly flip it. Used by
    /// `next_wakeup` to decide whether the next scheduled wakeup can skip
    /// past an edge or has to land on it.
    fn ready_out_is_in_steady_state(&self) -> bool {
        if !self.use_ready_out() {
            // No ready handshake to settle, so there's nothing for this
            // port's scheduling heuristic to wait on — trivially steady.
            return true;
        }
        if self.ready_out != self.compute_ready_out() {
            return false;
        }
        if self.output_port && self.ready_out {
            return false;
        }
        if self.output_port && self.valid_shift_reg_entries == 0 {
            return true;
        }
        if self.output_port {
            debug_assert!(self.use_ready_in() && !self.ready_in);
            return !self.ready_in;
        }
        if !self.ready_out {
            return true;
        }
        if self.time_reg_valid {
            return false;
        }
        if self.use_ready_in() && !self.ready_in {
            return false;
        }
        if self.ready_out && self.condition != Condition::Full && !self.value_meets_condition(self.get_pins_input_value()) {
            return true;
        }
        false
    }

    /// The next tick at which this port might produce an externally visible
    /// change, or `None` if nothing it can currently predict would — `Core`
    /// pushes a `ScheduleTarget::Port` wakeup at this tick so the port gets
    /// revisited even if no other activity brings it up to date sooner.
    /// This is purely an optimization: `Core::run_until` still brings every
    /// in-use port up to its deadline unconditionally, so an overly
    /// conservative (or missing) wakeup here never breaks correctness, only
    /// costs a slightly later `update` of a port that could have advanced
    /// its shift register sooner.
    pub fn next_wakeup(&self, clock: &Signal, fixed_frequency: bool) -> Option<Tick> {
        if !fixed_frequency || !self.in_use || self.port_type != PortType::Data {
            return None;
        }
        let it = self.next_edge.or_else(|| clock.get_edge_iterator(self.time))?;
        if self.output_port {
            self.next_wakeup_output_port(it)
        } else {
            self.next_wakeup_input_port(it)
        }
    }

    fn next_wakeup_output_port(&self, next_edge: EdgeIterator) -> Option<Tick> {
        if next_edge.current().kind == EdgeKind::Falling {
            return Some(next_edge.current().tick);
        }
        if !self.ready_out_is_in_steady_state() {
            return Some((next_edge + 1).current().tick);
        }
        let ready_in_known_zero = self.use_ready_in() && !self.ready_in;
        if !ready_in_known_zero {
            if self.next_shift_reg_output_port(self.shift_reg) != self.shift_reg {
                return Some((next_edge + 1).current().tick);
            }
            if self.use_ready_out() && self.ready_out {
                return Some((next_edge + 1).current().tick);
            }
        }
        if self.time_reg_valid {
            let falling_edges = self.falling_edges_until_time_met();
            let edges = 2 * falling_edges - 1;
            return Some((next_edge + edges as i64).current().tick);
        }
        if !ready_in_known_zero
            && (self.paused_in.is_some() || self.paused_sync.is_some() || self.transfer_reg_valid)
        {
            return Some((next_edge + 1).current().tick);
        }
        None
    }

    fn next_wakeup_input_port(&self, next_edge: EdgeIterator) -> Option<Tick> {
        if next_edge.current().kind == EdgeKind::Rising {
            return Some(next_edge.current().tick);
        }
        if !self.ready_out_is_in_steady_state() {
            return Some(next_edge.current().tick);
        }
        if self.paused_out.is_some() && !self.time_reg_valid {
            return Some(next_edge.current().tick);
        }
        if self.time_reg_valid {
            let falling_edges = self.falling_edges_until_time_met();
            let mut edges = (falling_edges - 1) * 2;
            if !self.use_ready_out() && self.sampling_edge == EdgeKind::Rising {
                edges += 1;
            }
            return Some((next_edge + edges as i64).current().tick);
        }
        let ready_in_known_nonzero = !self.use_ready_in() || self.ready_in;
        if ready_in_known_nonzero
            && (self.paused_in.is_some() || self.events_permitted || (self.use_ready_out() && self.ready_out))
        {
            let input_value = self.get_pins_input_value();
            if self.value_meets_condition(input_value) {
                let mut next_sampling_edge = next_edge;
                if next_sampling_edge.current().kind != self.sampling_edge {
                    next_sampling_edge.advance();
                }
                return Some(next_sampling_edge.current().tick);
            }
        }
        None
    }
}
