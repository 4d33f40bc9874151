//! Integration tests for `EthernetPhy` driven purely through its public
//! API, the same way a board-wiring layer (not this crate's own unit
//! tests) would use it.

mod util;

use std::sync::{Arc, Mutex};

use xcore_sim::ids::{PeripheralId, PortId};
use xcore_sim::net_link::{LoopbackLink, NetworkLink};
use xcore_sim::peripheral::ethernet_phy::EthernetPhy;

/// Captures every frame handed to `transmit_frame` instead of forwarding
/// it anywhere, so a test can assert on what did or didn't reach the wire
/// without needing a second `EthernetPhy` to receive it.
#[derive(Clone, Default)]
struct RecordingLink {
    transmitted: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl NetworkLink for RecordingLink {
    fn transmit_frame(&mut self, frame: &[u8]) {
        self.transmitted.lock().unwrap().push(frame.to_vec());
    }

    fn receive_frame(&mut self) -> Option<Vec<u8>> {
        None
    }
}

#[test]
fn a_garbage_frame_at_exactly_the_minimum_size_still_fails_the_crc_gate() {
    util::init();
    let recording = RecordingLink::default();
    let txd = PortId(0);
    let tx_en = PortId(1);
    let rxd = PortId(2);
    let rx_dv = PortId(3);
    let mut phy = EthernetPhy::new(
        PeripheralId(0),
        Box::new(recording.clone()),
        txd,
        tx_en,
        None,
        rxd,
        rx_dv,
    );

    phy.on_port_output_changed(tx_en, 1, 0);
    phy.on_port_output_changed(txd, 0xd, 0);
    phy.run_tx(0); // observes the SFD, starts the frame

    // 128 nibbles of arbitrary, non-zero, CRC-invalid payload: exactly the
    // minimum frame size once paired up into 64 bytes.
    for i in 0..128u32 {
        let nibble = if i % 2 == 0 { 1 } else { 2 };
        phy.on_port_output_changed(txd, nibble, 0);
        phy.run_tx(0);
    }

    phy.on_port_output_changed(tx_en, 0, 0);
    phy.run_tx(0); // tx_en deasserted: attempts to hand the frame off

    assert!(recording.transmitted.lock().unwrap().is_empty());
}

#[test]
fn rx_drains_a_delivered_frame_nibble_by_nibble_then_returns_to_idle() {
    util::init();
    let mut link = LoopbackLink::new();
    link.deliver(vec![0x12, 0x34, 0x56, 0x78]);
    let rxd = PortId(2);
    let rx_dv = PortId(3);
    let mut phy = EthernetPhy::new(
        PeripheralId(0),
        Box::new(link),
        PortId(0),
        PortId(1),
        None,
        rxd,
        rx_dv,
    );

    // Idle: picks up the frame, raises RX_DV, drives the SFD's first
    // nibble (0x5).
    let r0 = phy.run_rx(0);
    assert!(r0.drives.iter().any(|&(p, v)| p == rxd && v == 0x5));
    assert!(r0.drives.iter().any(|&(p, v)| p == rx_dv && v == 1));

    // Second SFD nibble (0xd).
    let r1 = phy.run_rx(0);
    assert!(r1.drives.iter().any(|&(p, v)| p == rxd && v == 0xd));

    // The 4-byte frame gets padded to 60 bytes, then a 4-byte CRC is
    // appended: exactly 64 bytes, i.e. 128 nibbles, follow the SFD.
    // `drive_rxd` only reports a change when the wire value actually
    // moves, so the nibble stream has to be reconstructed by carrying
    // the last driven value forward across calls that produce no event.
    let mut current = 0xdu32;
    let mut nibbles = Vec::new();
    loop {
        let r = phy.run_rx(0);
        if r.drives.iter().any(|&(p, v)| p == rx_dv && v == 0) {
            assert!(r.drives.iter().any(|&(p, v)| p == rxd && v == 0));
            break;
        }
        if let Some(&(_, v)) = r.drives.iter().find(|&&(p, _)| p == rxd) {
            current = v;
        }
        nibbles.push(current);
    }

    assert_eq!(nibbles.len(), 128);
    // The delivered payload's nibbles come out low-nibble-first.
    assert_eq!(&nibbles[0..4], &[0x2, 0x1, 0x4, 0x3]);
}
