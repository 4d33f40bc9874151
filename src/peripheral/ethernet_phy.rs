//! MII Ethernet PHY peripheral (`SPEC_FULL.md` §6.1).
//!
//! Two independent nibble-at-a-time state machines share one
//! [`NetworkLink`]: `EthernetPhyTx` watches `TXD`/`TX_EN`/`TX_ER` and
//! assembles a whole frame to hand to the link, `EthernetPhyRx` pulls
//! frames off the link and drives them out `RXD`/`RX_DV` nibble by
//! nibble. Both run on the MII clock period; since a `Port` in this crate
//! doesn't expose a live `Signal` to a peripheral the way the reference
//! implementation's `PortInterface` does, the two state machines track
//! their clock as plain fixed-period scheduler wakeups instead of reading
//! an actual `TX_CLK`/`RX_CLK` port value — whoever wires a PHY's clock
//! ports to a `ClockBlock` gets a CPU-visible 25MHz square wave with the
//! same period, decoupled from (but numerically identical to) the
//! schedule this peripheral drives itself on.

use crate::core::PeripheralReactions;
use crate::error::Result;
use crate::ids::{PeripheralId, PortId};
use crate::net_link::NetworkLink;
use crate::peripheral::{self, PeripheralConfig, ETHERNET_PHY_DESCRIPTOR};
use crate::scheduler::ScheduleTarget;
use crate::tick::Tick;

/// MII uses a 25MHz clock relative to the simulator's own tick rate.
const ETHERNET_PHY_HALF_PERIOD: u64 = crate::tick::CYCLES_PER_TICK * 2;
const ETHERNET_PHY_PERIOD: u64 = ETHERNET_PHY_HALF_PERIOD * 2;
/// Time to transmit 12 bytes of interframe gap.
const INTERFRAME_GAP: u64 = (12 * 8) / 4;
const CRC32_POLY: u32 = 0xEDB8_8320;
/// Minimum frame size, including the trailing CRC32.
const MIN_FRAME_SIZE: usize = 64;

/// Reflected CRC-32 update over a single byte, the peripheral's equivalent
/// of the reference implementation's table-free `crc8`/`crc32` helpers.
fn crc_update_byte(mut crc: u32, byte: u8) -> u32 {
    crc ^= byte as u32;
    for _ in 0..8 {
        if crc & 1 != 0 {
            crc = (crc >> 1) ^ CRC32_POLY;
        } else {
            crc >>= 1;
        }
    }
    crc
}

fn crc_update_zero_bytes(mut crc: u32, count: usize) -> u32 {
    for _ in 0..count {
        crc = crc_update_byte(crc, 0);
    }
    crc
}

struct EthernetPhyTx {
    txd: PortId,
    tx_en: PortId,
    tx_er: Option<PortId>,

    txd_value: u32,
    tx_en_value: u32,
    tx_er_value: u32,

    in_frame: bool,
    had_error: bool,
    frame: Vec<u8>,
    has_prev_nibble: bool,
    prev_nibble: u8,
}

impl EthernetPhyTx {
    fn new(txd: PortId, tx_en: PortId, tx_er: Option<PortId>) -> EthernetPhyTx {
        EthernetPhyTx {
            txd,
            tx_en,
            tx_er,
            txd_value: 0,
            tx_en_value: 0,
            tx_er_value: 0,
            in_frame: false,
            had_error: false,
            frame: Vec::new(),
            has_prev_nibble: false,
            prev_nibble: 0,
        }
    }

    fn reset(&mut self) {
        self.in_frame = false;
        self.had_error = false;
        self.has_prev_nibble = false;
        self.frame.clear();
    }

    fn possible_sfd(&self) -> bool {
        self.tx_en_value == 1 && self.txd_value == 0xd
    }

    /// Checks the frame's CRC and, if it's valid, hands the payload
    /// (everything but the trailing CRC32) to the link.
    fn transmit_frame(&mut self, link: &mut dyn NetworkLink) -> bool {
        if self.frame.len() < MIN_FRAME_SIZE {
            return false;
        }
        let mut crc = 0x9226_F562u32;
        for &byte in &self.frame {
            crc = crc_update_byte(crc, byte);
        }
        crc = !crc;
        if crc != 0 {
            return false;
        }
        let payload_len = self.frame.len() - 4;
        link.transmit_frame(&self.frame[..payload_len]);
        true
    }
}

struct EthernetPhyRx {
    rxd: PortId,
    rx_dv: PortId,

    rxd_value: u32,
    frame: Vec<u8>,
    nibbles_received: usize,
    state: RxState,
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum RxState {
    Idle,
    TxSfd2,
    TxFrame,
    TxEfd,
}

impl EthernetPhyRx {
    fn new(rxd: PortId, rx_dv: PortId) -> EthernetPhyRx {
        EthernetPhyRx {
            rxd,
            rx_dv,
            rxd_value: 0,
            frame: Vec::new(),
            nibbles_received: 0,
            state: RxState::Idle,
        }
    }

    fn append_crc32(&mut self) {
        // Seeding the CRC with 0x9226F562 is equivalent to seeding it with
        // 0 and inverting the first four bytes.
        let mut crc = 0x9226_F562u32;
        for &byte in &self.frame {
            crc = crc_update_byte(crc, byte);
        }
        // Feed four placeholder zero bytes for the CRC field itself, so
        // inverting afterwards yields the value that makes a future
        // re-check (which hashes the CRC field too) land on zero.
        crc = crc_update_zero_bytes(crc, 4);
        crc = !crc;
        self.frame.extend_from_slice(&crc.to_le_bytes());
    }

    fn receive_frame(&mut self, link: &mut dyn NetworkLink) -> bool {
        let Some(mut frame) = link.receive_frame() else {
            return false;
        };
        let min_size = MIN_FRAME_SIZE - 4;
        if frame.len() < min_size {
            frame.resize(min_size, 0);
        }
        self.frame = frame;
        self.append_crc32();
        true
    }
}

pub struct EthernetPhy {
    link: Box<dyn NetworkLink + Send>,
    tx: EthernetPhyTx,
    rx: EthernetPhyRx,
    tx_target: ScheduleTarget,
    rx_target: ScheduleTarget,
}

impl EthernetPhy {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: PeripheralId,
        link: Box<dyn NetworkLink + Send>,
        txd: PortId,
        tx_en: PortId,
        tx_er: Option<PortId>,
        rxd: PortId,
        rx_dv: PortId,
    ) -> EthernetPhy {
        EthernetPhy {
            link,
            tx: EthernetPhyTx::new(txd, tx_en, tx_er),
            rx: EthernetPhyRx::new(rxd, rx_dv),
            tx_target: ScheduleTarget::EthernetPhyTx(id),
            rx_target: ScheduleTarget::EthernetPhyRx(id),
        }
    }

    /// Builds a PHY from a validated configuration, the arena-side
    /// counterpart of the reference implementation's `createEthernetPhy`.
    /// `tx_clk`/`rx_clk` are required by the descriptor (a board wiring
    /// those pins to a `ClockBlock` gets a CPU-visible 25MHz square wave)
    /// but aren't read here — see this module's header comment.
    pub fn from_config(id: PeripheralId, config: &PeripheralConfig, link: Box<dyn NetworkLink + Send>) -> Result<EthernetPhy> {
        ETHERNET_PHY_DESCRIPTOR.validate(config)?;
        let txd = peripheral::required_port(config, "ethernet-phy", "txd")?;
        let tx_en = peripheral::required_port(config, "ethernet-phy", "tx_en")?;
        peripheral::required_port(config, "ethernet-phy", "tx_clk")?;
        let tx_er = peripheral::optional_port(config, "tx_er");
        let rxd = peripheral::required_port(config, "ethernet-phy", "rxd")?;
        let rx_dv = peripheral::required_port(config, "ethernet-phy", "rx_dv")?;
        peripheral::required_port(config, "ethernet-phy", "rx_clk")?;
        peripheral::required_port(config, "ethernet-phy", "rx_er")?;
        Ok(EthernetPhy::new(id, link, txd, tx_en, tx_er, rxd, rx_dv))
    }

    /// The ports whose output changes this PHY needs to hear about —
    /// `Core::add_ethernet_phy_from_config` registers it as their observer.
    /// `rxd`/`rx_dv` are driven BY the PHY, not observed.
    pub fn driving_ports(&self) -> Vec<PortId> {
        let mut ports = vec![self.tx.txd, self.tx.tx_en];
        if let Some(tx_er) = self.tx.tx_er {
            ports.push(tx_er);
        }
        ports
    }

    /// The first falling edge is scheduled by whoever constructs the
    /// peripheral (mirroring the reference implementation's constructor
    /// pushing onto the `RunnableQueue` directly); this returns that
    /// initial wakeup for the caller to enqueue.
    pub fn initial_rx_wakeup(&self) -> (ScheduleTarget, Tick) {
        (self.rx_target, ETHERNET_PHY_HALF_PERIOD)
    }

    pub fn on_port_output_changed(&mut self, port: PortId, value: u32, now: Tick) -> PeripheralReactions {
        let mut reactions = PeripheralReactions::none();
        if port == self.tx.txd {
            self.tx.txd_value = value;
        } else if port == self.tx.tx_en {
            self.tx.tx_en_value = value;
        } else if Some(port) == self.tx.tx_er {
            self.tx.tx_er_value = value;
            return reactions;
        } else {
            return reactions;
        }
        if !self.tx.in_frame && self.tx.possible_sfd() {
            reactions = reactions.reschedule(self.tx_target, next_rising_edge_after(now));
        }
        reactions
    }

    pub fn run_tx(&mut self, now: Tick) -> PeripheralReactions {
        let mut reactions = PeripheralReactions::none();
        if self.tx.in_frame {
            if self.tx.tx_en_value != 0 {
                if self.tx.tx_er_value != 0 {
                    self.tx.had_error = true;
                } else if self.tx.has_prev_nibble {
                    let byte = (self.tx.txd_value as u8) << 4 | self.tx.prev_nibble;
                    self.tx.frame.push(byte);
                    self.tx.has_prev_nibble = false;
                } else {
                    self.tx.prev_nibble = self.tx.txd_value as u8;
                    self.tx.has_prev_nibble = true;
                }
            } else {
                if !self.tx.had_error {
                    self.tx.transmit_frame(self.link.as_mut());
                }
                self.tx.reset();
            }
        } else if self.tx.tx_en_value != 0 && self.tx.txd_value == 0xd {
            self.tx.in_frame = true;
            self.tx.had_error = self.tx.tx_er_value != 0;
        }
        if self.tx.tx_en_value == 1 {
            reactions = reactions.reschedule(self.tx_target, now + ETHERNET_PHY_PERIOD);
        }
        reactions
    }

    pub fn run_rx(&mut self, now: Tick) -> PeripheralReactions {
        let mut reactions = PeripheralReactions::none();
        let mut next_time = now + ETHERNET_PHY_PERIOD;
        match self.rx.state {
            RxState::Idle => {
                if self.rx.receive_frame(self.link.as_mut()) {
                    reactions = drive_rxd(reactions, &mut self.rx, 0x5, now);
                    reactions = reactions.drive(self.rx.rx_dv, 1);
                    self.rx.state = RxState::TxSfd2;
                }
            }
            RxState::TxSfd2 => {
                reactions = drive_rxd(reactions, &mut self.rx, 0xd, now);
                self.rx.nibbles_received = 0;
                self.rx.state = RxState::TxFrame;
            }
            RxState::TxFrame => {
                let byte_num = self.rx.nibbles_received / 2;
                let nibble_num = self.rx.nibbles_received % 2;
                let data = (self.rx.frame[byte_num] >> (nibble_num * 4)) & 0xf;
                reactions = drive_rxd(reactions, &mut self.rx, data as u32, now);
                self.rx.nibbles_received += 1;
                if self.rx.nibbles_received == self.rx.frame.len() * 2 {
                    self.rx.state = RxState::TxEfd;
                }
            }
            RxState::TxEfd => {
                reactions = drive_rxd(reactions, &mut self.rx, 0, now);
                reactions = reactions.drive(self.rx.rx_dv, 0);
                self.rx.state = RxState::Idle;
                next_time = now + ETHERNET_PHY_PERIOD * INTERFRAME_GAP;
            }
        }
        reactions.reschedule(self.rx_target, next_time)
    }
}

fn drive_rxd(reactions: PeripheralReactions, rx: &mut EthernetPhyRx, value: u32, _now: Tick) -> PeripheralReactions {
    if value == rx.rxd_value {
        return reactions;
    }
    rx.rxd_value = value;
    reactions.drive(rx.rxd, value)
}

/// The next rising edge of the PHY's own 25MHz clock strictly after `t`,
/// independent of whatever's bound to the port-facing `TX_CLK`.
fn next_rising_edge_after(t: Tick) -> Tick {
    let phase = t % ETHERNET_PHY_PERIOD;
    if phase < ETHERNET_PHY_HALF_PERIOD {
        t - phase + ETHERNET_PHY_HALF_PERIOD
    } else {
        t - phase + ETHERNET_PHY_PERIOD + ETHERNET_PHY_HALF_PERIOD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::PeripheralId;
    use crate::net_link::LoopbackLink;

    fn phy() -> (EthernetPhy, PortId, PortId, PortId, PortId) {
        let txd = PortId(0);
        let tx_en = PortId(1);
        let rxd = PortId(2);
        let rx_dv = PortId(3);
        let phy = EthernetPhy::new(
            PeripheralId(0),
            Box::new(LoopbackLink::new()),
            txd,
            tx_en,
            None,
            rxd,
            rx_dv,
        );
        (phy, txd, tx_en, rxd, rx_dv)
    }

    #[test]
    fn sfd_nibble_schedules_a_tx_run() {
        let (mut phy, txd, tx_en, _, _) = phy();
        phy.on_port_output_changed(tx_en, 1, 0);
        let reactions = phy.on_port_output_changed(txd, 0xd, 0);
        assert_eq!(reactions.reschedules.len(), 1);
    }

    #[test]
    fn undersized_frame_fails_crc_gate_and_is_never_transmitted() {
        let (mut phy, txd, tx_en, _, _) = phy();
        phy.tx.in_frame = true;
        phy.tx.frame = vec![0u8; 10];
        assert!(!phy.tx.transmit_frame(phy.link.as_mut()));
        let _ = (txd, tx_en);
    }

    #[test]
    fn rx_idle_state_polls_link_and_starts_sfd_on_a_frame() {
        let (mut phy, _, _, rxd, rx_dv) = phy();
        // Deliver a minimum-size-minus-crc frame directly into the link.
        let mut link = LoopbackLink::new();
        link.deliver(vec![0xAAu8; 60]);
        phy = EthernetPhy::new(PeripheralId(0), Box::new(link), PortId(0), PortId(1), None, rxd, rx_dv);
        let reactions = phy.run_rx(0);
        assert!(reactions.drives.iter().any(|&(p, v)| p == rxd && v == 0x5));
        assert!(reactions.drives.iter().any(|&(p, v)| p == rx_dv && v == 1));
    }

    #[test]
    fn crc_update_is_deterministic_and_order_sensitive() {
        let a = crc_update_byte(crc_update_byte(0x9226_F562, 1), 2);
        let b = crc_update_byte(crc_update_byte(0x9226_F562, 2), 1);
        assert_ne!(a, b);
    }
}
