//! Integration tests for the loopback path between two ports driven
//! entirely through `Core`'s CPU-thread-facing operations — the thing a
//! unit test scoped to a single `Port` can't exercise, since it needs
//! `Core::see_pins_change` fanning a falling edge on one port into a
//! sampling edge on another.

mod util;

use xcore_sim::core::Core;
use xcore_sim::ids::ThreadId;
use xcore_sim::port::Condition;
use xcore_sim::signal::Signal;
use xcore_sim::PortOutcome;

/// Builds two width-8 Data ports on the same clock: `a` will be driven as
/// an output, `b` left as an input and connected to `a` via loopback.
fn wired_pair(core: &mut Core) -> (xcore_sim::PortId, xcore_sim::PortId) {
    let a = core.add_port("a", 8).unwrap();
    let b = core.add_port("b", 8).unwrap();
    let clock = core
        .add_fixed_frequency_clock(Signal::clock(2, 0, 0).unwrap());
    core.bind_port_clock(a, clock);
    core.bind_port_clock(b, clock);
    core.connect_loopback(a, b);
    core.set_in_use(a, true);
    core.set_in_use(b, true);
    (a, b)
}

#[test]
fn a_value_driven_out_one_port_is_readable_from_its_loopback_partner() {
    util::init();
    let mut core = Core::new();
    let (a, b) = wired_pair(&mut core);
    let out_thread = ThreadId(0);
    let in_thread = ThreadId(1);

    // Latch 0x7 into a's transfer register; nothing reaches b yet.
    assert_eq!(core.op_out(a, out_thread, 0x7, 0), PortOutcome::Continue(()));

    // Bring `a` to its first falling edge (tick 4 for a half-period-2
    // clock starting low): this drives the new value onto the shared pin
    // and, via loopback, feeds it into `b`'s input sampling path.
    core.op_peek(a, 4);

    // `b`'s first rising edge after that (tick 6) latches the pin value
    // into its transfer register, which `op_in` can now read directly.
    assert_eq!(core.op_in(b, in_thread, 6), PortOutcome::Continue(7));
}

#[test]
fn a_thread_parked_on_an_unmet_condition_wakes_once_the_value_arrives() {
    util::init();
    let mut core = Core::new();
    let (a, b) = wired_pair(&mut core);
    let out_thread = ThreadId(0);
    let waiting_thread = ThreadId(1);

    core.port_mut(b).set_condition(Condition::Eq);
    core.port_mut(b).set_data(7);

    // Nothing has arrived yet, and b's default pin value (0) doesn't
    // satisfy `== 7`, so the reader parks instead of completing.
    assert_eq!(core.op_in(b, waiting_thread, 0), PortOutcome::Deschedule);
    assert!(core.take_runnable().is_empty());

    assert_eq!(core.op_out(a, out_thread, 7, 0), PortOutcome::Continue(()));
    core.op_peek(a, 4);

    // b's rising edge at tick 6 samples the now-matching value and wakes
    // the parked reader.
    core.op_peek(b, 6);
    assert_eq!(core.take_runnable(), vec![waiting_thread]);
}

#[test]
fn a_second_writer_parks_until_the_falling_edge_consumes_the_first_word() {
    util::init();
    let mut core = Core::new();
    let a = core.add_port("a", 8).unwrap();
    let clock = core.add_fixed_frequency_clock(Signal::clock(2, 0, 0).unwrap());
    core.bind_port_clock(a, clock);
    core.set_in_use(a, true);
    let first = ThreadId(0);
    let second = ThreadId(1);

    assert_eq!(core.op_out(a, first, 0x1, 0), PortOutcome::Continue(()));
    // The previous word hasn't been consumed by a falling edge yet, so a
    // second immediate write has nowhere to go.
    assert_eq!(core.op_out(a, second, 0x2, 0), PortOutcome::Deschedule);
    assert!(core.take_runnable().is_empty());

    // The falling edge at tick 4 consumes the pending word and wakes the
    // thread that was waiting to push the next one.
    core.op_peek(a, 4);
    assert_eq!(core.take_runnable(), vec![second]);
}
