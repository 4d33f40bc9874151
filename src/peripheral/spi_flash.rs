//! SPI flash peripheral (`SPEC_FULL.md` §6.2).
//!
//! A read-only flash device addressed by the standard SPI "fast read"
//! framing: one command byte (`0x03`), three big-endian address bytes,
//! then a stream of data bytes clocked out on `MISO` for as long as
//! `SS` stays asserted. Entirely edge-driven — unlike the Ethernet PHY,
//! nothing here needs a standing scheduler wakeup; `run` exists only to
//! satisfy the `Peripheral`-shaped calling convention `Core` uses for
//! every peripheral kind.

use crate::core::PeripheralReactions;
use crate::error::Result;
use crate::ids::PortId;
use crate::peripheral::{self, PeripheralConfig, SPI_FLASH_DESCRIPTOR};
use crate::tick::Tick;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum State {
    WaitForCmd,
    WaitForAddress,
    Read,
    UnknownCmd,
}

pub struct SpiFlash {
    miso: PortId,
    mosi: PortId,
    sclk: PortId,
    ss: PortId,

    mosi_value: u32,
    sclk_value: u32,
    ss_value: u32,
    miso_value: u32,

    state: State,
    mem: Vec<u8>,

    receive_reg: u8,
    received_bits: u32,
    received_address_bytes: u32,
    send_reg: u8,
    send_bits_remaining: u32,
    read_address: u32,
}

impl SpiFlash {
    pub fn new(miso: PortId, mosi: PortId, sclk: PortId, ss: PortId, mem: Vec<u8>) -> SpiFlash {
        SpiFlash {
            miso,
            mosi,
            sclk,
            ss,
            mosi_value: 0,
            sclk_value: 0,
            ss_value: 0,
            miso_value: 0,
            state: State::WaitForCmd,
            mem,
            receive_reg: 0,
            received_bits: 0,
            received_address_bytes: 0,
            send_reg: 0,
            send_bits_remaining: 0,
            read_address: 0,
        }
    }

    /// Builds a flash from a validated configuration plus its already-read
    /// backing store, the arena-side counterpart of the reference
    /// implementation's `createSPIFlash` + `SPIFlash::openFile` pair.
    /// Reading the `filename` property's bytes off disk is the caller's
    /// job (see [`peripheral::read_backing_file`]) so that construction
    /// itself never touches the filesystem.
    pub fn from_config(config: &PeripheralConfig, mem: Vec<u8>) -> Result<SpiFlash> {
        SPI_FLASH_DESCRIPTOR.validate(config)?;
        let miso = peripheral::required_port(config, "spi-flash", "miso")?;
        let mosi = peripheral::required_port(config, "spi-flash", "mosi")?;
        let sclk = peripheral::required_port(config, "spi-flash", "sclk")?;
        let ss = peripheral::required_port(config, "spi-flash", "ss")?;
        peripheral::required_string(config, "spi-flash", "filename")?;
        Ok(SpiFlash::new(miso, mosi, sclk, ss, mem))
    }

    /// The ports whose output changes this flash needs to hear about —
    /// `Core::add_spi_flash_from_config` registers it as their observer.
    pub fn driving_ports(&self) -> [PortId; 3] {
        [self.mosi, self.sclk, self.ss]
    }

    fn reset(&mut self) {
        self.state = State::WaitForCmd;
        self.receive_reg = 0;
        self.received_bits = 0;
        self.received_address_bytes = 0;
        self.read_address = 0;
        self.send_reg = 0;
        self.send_bits_remaining = 0;
    }

    fn see_sclk_change(&mut self, value: u32, now: Tick) -> PeripheralReactions {
        let mut reactions = PeripheralReactions::none();
        if value == self.sclk_value {
            return reactions;
        }
        self.sclk_value = value;
        if self.ss_value != 0 {
            return reactions;
        }
        if self.sclk_value == 1 {
            self.see_rising_edge();
        } else {
            reactions = self.see_falling_edge(now);
        }
        reactions
    }

    fn see_rising_edge(&mut self) {
        self.receive_reg = (self.receive_reg << 1) | (self.mosi_value as u8 & 1);
        self.received_bits += 1;
        if self.received_bits != 8 {
            return;
        }
        match self.state {
            State::WaitForCmd => {
                self.state = if self.receive_reg == 0x3 {
                    State::WaitForAddress
                } else {
                    State::UnknownCmd
                };
            }
            State::WaitForAddress => {
                self.read_address = (self.read_address << 8) | self.receive_reg as u32;
                self.received_address_bytes += 1;
                if self.received_address_bytes == 3 {
                    self.state = State::Read;
                }
                // Deliberately falls through to the Read/UnknownCmd
                // no-op below on the third address byte, matching the
                // source this was translated from: nothing further
                // happens to the receive register either way.
            }
            State::Read | State::UnknownCmd => {
                // Do nothing.
            }
        }
        self.receive_reg = 0;
        self.received_bits = 0;
    }

    fn see_falling_edge(&mut self, now: Tick) -> PeripheralReactions {
        let mut reactions = PeripheralReactions::none();
        if self.state != State::Read {
            return reactions;
        }
        if !self.mem.is_empty() && self.send_bits_remaining == 0 {
            let len = self.mem.len();
            self.send_reg = self.mem[(self.read_address as usize) % len];
            self.read_address = self.read_address.wrapping_add(1);
            self.send_bits_remaining = 8;
        }
        let new_value = ((self.send_reg >> 7) & 1) as u32;
        if new_value != self.miso_value {
            self.miso_value = new_value;
            reactions = reactions.drive(self.miso, new_value);
        }
        self.send_reg <<= 1;
        self.send_bits_remaining = self.send_bits_remaining.saturating_sub(1);
        let _ = now;
        reactions
    }

    fn see_ss_change(&mut self, value: u32) -> PeripheralReactions {
        if value == self.ss_value {
            return PeripheralReactions::none();
        }
        self.ss_value = value;
        if self.ss_value == 1 {
            self.reset();
        }
        PeripheralReactions::none()
    }

    pub fn on_port_output_changed(&mut self, port: PortId, value: u32, now: Tick) -> PeripheralReactions {
        if port == self.mosi {
            self.mosi_value = value;
            PeripheralReactions::none()
        } else if port == self.sclk {
            self.see_sclk_change(value, now)
        } else if port == self.ss {
            self.see_ss_change(value)
        } else {
            PeripheralReactions::none()
        }
    }

    /// Never scheduled — present only so `Core::run_target` has a uniform
    /// dispatch shape across peripheral kinds.
    pub fn run(&mut self, _now: Tick) -> PeripheralReactions {
        PeripheralReactions::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flash(mem: Vec<u8>) -> (SpiFlash, PortId, PortId, PortId, PortId) {
        let miso = PortId(0);
        let mosi = PortId(1);
        let sclk = PortId(2);
        let ss = PortId(3);
        (SpiFlash::new(miso, mosi, sclk, ss, mem), miso, mosi, sclk, ss)
    }

    fn clock_in_byte(flash: &mut SpiFlash, mosi: PortId, sclk: PortId, byte: u8) {
        clock_in_byte_trace(flash, mosi, sclk, byte, &mut Vec::new());
    }

    /// As `clock_in_byte`, but also records `miso_value` after every
    /// falling edge — including any that shift out flash data as a
    /// side effect of the same edge that finished clocking in the
    /// address, which is where the first output bit actually appears.
    fn clock_in_byte_trace(flash: &mut SpiFlash, mosi: PortId, sclk: PortId, byte: u8, trace: &mut Vec<u32>) {
        for i in (0..8).rev() {
            let bit = ((byte >> i) & 1) as u32;
            flash.on_port_output_changed(mosi, bit, 0);
            flash.on_port_output_changed(sclk, 1, 0);
            flash.on_port_output_changed(sclk, 0, 0);
            trace.push(flash.miso_value);
        }
    }

    #[test]
    fn command_0x3_then_three_address_bytes_enters_read_state() {
        let (mut flash, _miso, mosi, sclk, _ss) = flash(vec![0xAAu8; 16]);
        clock_in_byte(&mut flash, mosi, sclk, 0x03);
        assert_eq!(flash.state, State::WaitForAddress);
        clock_in_byte(&mut flash, mosi, sclk, 0x00);
        clock_in_byte(&mut flash, mosi, sclk, 0x00);
        clock_in_byte(&mut flash, mosi, sclk, 0x00);
        assert_eq!(flash.state, State::Read);
        assert_eq!(flash.read_address, 0);
    }

    #[test]
    fn unknown_command_byte_parks_in_unknown_cmd_state() {
        let (mut flash, _miso, mosi, sclk, _ss) = flash(vec![0u8; 4]);
        clock_in_byte(&mut flash, mosi, sclk, 0xFF);
        assert_eq!(flash.state, State::UnknownCmd);
    }

    #[test]
    fn ss_deassertion_resets_mid_transaction_state() {
        let (mut flash, _miso, mosi, sclk, ss) = flash(vec![0u8; 4]);
        clock_in_byte(&mut flash, mosi, sclk, 0x03);
        assert_eq!(flash.state, State::WaitForAddress);
        flash.on_port_output_changed(ss, 1, 0);
        assert_eq!(flash.state, State::WaitForCmd);
    }

    #[test]
    fn reading_shifts_out_the_configured_memory_byte_msb_first() {
        let (mut flash, _miso, mosi, sclk, _ss) = flash(vec![0b1010_0101]);
        clock_in_byte(&mut flash, mosi, sclk, 0x03);
        clock_in_byte(&mut flash, mosi, sclk, 0x00);
        clock_in_byte(&mut flash, mosi, sclk, 0x00);
        // The falling edge that finishes clocking in the 3rd address byte
        // already lands in the Read state and shifts out the first
        // (MSB) data bit as a side effect.
        let mut trace = Vec::new();
        clock_in_byte_trace(&mut flash, mosi, sclk, 0x00, &mut trace);
        assert_eq!(flash.state, State::Read);
        let mut bits = vec![*trace.last().unwrap()];
        for _ in 0..7 {
            flash.on_port_output_changed(sclk, 1, 0);
            flash.on_port_output_changed(sclk, 0, 0);
            bits.push(flash.miso_value);
        }
        let byte: u8 = bits.iter().fold(0u8, |acc, &b| (acc << 1) | b as u8);
        assert_eq!(byte, 0b1010_0101);
    }

    #[test]
    fn read_wraps_address_around_memory_size() {
        let (mut flash, _miso, mosi, sclk, _ss) = flash(vec![0x11, 0x22]);
        clock_in_byte(&mut flash, mosi, sclk, 0x03);
        clock_in_byte(&mut flash, mosi, sclk, 0x00);
        clock_in_byte(&mut flash, mosi, sclk, 0x00);
        // address 2: the last falling edge of this byte already lands in
        // Read and shifts out mem[2 % 2] == mem[0], advancing to 3.
        clock_in_byte(&mut flash, mosi, sclk, 0x02);
        assert_eq!(flash.read_address, 3);
        // 7 more falling edges drain the rest of that first shifted byte
        // without touching the address counter...
        for _ in 0..7 {
            flash.on_port_output_changed(sclk, 1, 0);
            flash.on_port_output_changed(sclk, 0, 0);
        }
        assert_eq!(flash.read_address, 3);
        // ...and the 8th reloads from mem[3 % 2] == mem[1], wrapping the
        // read pointer back into range and advancing it again.
        flash.on_port_output_changed(sclk, 1, 0);
        flash.on_port_output_changed(sclk, 0, 0);
        assert_eq!(flash.read_address, 4);
    }
}
