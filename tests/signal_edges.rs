//! Cross-checks between `Signal`'s two edge-query surfaces
//! (`get_next_edge` and `get_edge_iterator`) and the value function they
//! must agree with — every edge-driven component in this crate (`Port`,
//! `ClockBlock`) relies on both surfaces describing the same clock.

mod util;

use xcore_sim::signal::{EdgeKind, Signal};

#[test]
fn get_next_edge_and_the_edge_iterator_agree_on_every_transition() {
    util::init();
    let clock = Signal::clock(3, 0, 1).unwrap();

    let mut iter = clock.get_edge_iterator(0).unwrap();
    for _ in 0..20 {
        let edge = iter.current();
        let looked_up = clock.get_next_edge(edge.tick - 1, edge.kind).unwrap();
        assert_eq!(looked_up, edge);
        iter.advance();
    }
}

#[test]
fn consecutive_edges_always_alternate_kind_and_advance_the_value() {
    util::init();
    let clock = Signal::clock(5, 1, 2).unwrap();
    // Starting the iterator at the clock's own phase skips the sentinel
    // 0th edge (which only marks where the nominal waveform starts, not
    // an actual transition — see `ClockSignal::kind_at`'s doc comment).
    let mut iter = clock.get_edge_iterator(2).unwrap();

    for _ in 0..10 {
        let before = iter.current();
        let value_before = clock.get_value(before.tick - 1);
        let value_at = clock.get_value(before.tick);
        assert_ne!(value_before, value_at);
        iter.advance();
        let after = iter.current();
        assert_ne!(before.kind, after.kind);
        assert!(after.tick > before.tick);
    }
}

#[test]
fn advance_by_and_edges_until_are_inverses() {
    util::init();
    let clock = Signal::clock(4, 0, 0).unwrap();
    let start = clock.get_edge_iterator(0).unwrap();

    let mut forward = start;
    forward.advance_by(7);
    assert_eq!(start.edges_until(&forward), 7);

    let back_again = forward - 7;
    assert_eq!(back_again, start);

    let via_add = start + 7;
    assert_eq!(via_add, forward);
}

#[test]
fn a_constant_signal_never_edges() {
    util::init();
    let constant = Signal::constant(1);
    assert!(!constant.is_clock());
    assert!(constant.get_edge_iterator(0).is_none());
    assert!(constant.get_next_edge(0, EdgeKind::Rising).is_none());
    assert_eq!(constant.get_value(1_000_000), 1);
}

#[test]
fn rejects_degenerate_clock_parameters() {
    util::init();
    assert!(Signal::clock(0, 0, 0).is_err());
    assert!(Signal::clock(4, 2, 0).is_err());
}
