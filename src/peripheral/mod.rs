//! Co-simulated peripherals (`SPEC_FULL.md` §5/§6): devices that sit on
//! the far side of a handful of ports and react to pin changes the same
//! way real hardware would, without any privileged access into `Core`'s
//! arena beyond the ports they were configured against.
//!
//! `Core` holds both device kinds in one arena, tagged by an internal enum,
//! so a `PeripheralId` stashed in a `ScheduleTarget`/observer slot is
//! unambiguous regardless of which kind it names — there are exactly two
//! device kinds, and a `Vec<Box<dyn Peripheral>>` would only buy
//! indirection neither one needs.

pub mod ethernet_phy;
pub mod spi_flash;

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::ids::PortId;

/// What a peripheral type publishes about the ports and configuration it
/// needs, the arena equivalent of the reference implementation's
/// `PeripheralDescriptor`/`PropertyDescriptor` pair.
pub struct PeripheralDescriptor {
    pub name: &'static str,
    pub properties: &'static [PropertyDescriptor],
}

pub struct PropertyDescriptor {
    pub name: &'static str,
    pub kind: PropertyKind,
    pub required: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PropertyKind {
    Port,
    String,
}

impl PropertyDescriptor {
    pub const fn port(name: &'static str) -> PropertyDescriptor {
        PropertyDescriptor {
            name,
            kind: PropertyKind::Port,
            required: false,
        }
    }

    pub const fn string(name: &'static str) -> PropertyDescriptor {
        PropertyDescriptor {
            name,
            kind: PropertyKind::String,
            required: false,
        }
    }

    pub const fn required(mut self) -> PropertyDescriptor {
        self.required = true;
        self
    }
}

pub const ETHERNET_PHY_DESCRIPTOR: PeripheralDescriptor = PeripheralDescriptor {
    name: "ethernet-phy",
    properties: &[
        PropertyDescriptor::port("txd").required(),
        PropertyDescriptor::port("tx_en").required(),
        PropertyDescriptor::port("tx_clk").required(),
        PropertyDescriptor::port("tx_er"),
        PropertyDescriptor::port("rxd").required(),
        PropertyDescriptor::port("rx_dv").required(),
        PropertyDescriptor::port("rx_clk").required(),
        PropertyDescriptor::port("rx_er").required(),
        PropertyDescriptor::string("ifname"),
    ],
};

pub const SPI_FLASH_DESCRIPTOR: PeripheralDescriptor = PeripheralDescriptor {
    name: "spi-flash",
    properties: &[
        PropertyDescriptor::port("miso").required(),
        PropertyDescriptor::port("mosi").required(),
        PropertyDescriptor::port("sclk").required(),
        PropertyDescriptor::port("ss").required(),
        PropertyDescriptor::string("filename").required(),
    ],
};

/// Resolves the board-level port names used in peripheral configuration
/// (`"txd"`, `"miso"`, …) to arena indices. Built and populated by whoever
/// owns the board topology; this crate only consumes it.
pub type PortAliases = HashMap<String, PortId>;

/// One property's value, already resolved out of whatever configuration
/// format produced it — a port name has already become a `PortId` by the
/// time it reaches a `PeripheralConfig`. Building one of these from a
/// parsed file is explicitly out of scope here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertyValue {
    Port(PortId),
    String(String),
    Integer(i64),
}

/// The in-memory configuration for a single peripheral instance.
pub type PeripheralConfig = HashMap<String, PropertyValue>;

impl PeripheralDescriptor {
    /// Checks that every `required` property is present and, for the
    /// properties this descriptor does name, that the supplied value's
    /// kind matches. Properties present in `config` but not named by the
    /// descriptor are ignored, not rejected.
    pub fn validate(&self, config: &PeripheralConfig) -> Result<()> {
        for property in self.properties {
            match config.get(property.name) {
                None if property.required => {
                    return Err(Error::InvalidConfiguration(format!(
                        "{}: missing required property {:?}",
                        self.name, property.name
                    )));
                }
                None => {}
                Some(value) => {
                    let matches = matches!(
                        (property.kind, value),
                        (PropertyKind::Port, PropertyValue::Port(_))
                            | (PropertyKind::String, PropertyValue::String(_))
                    );
                    if !matches {
                        return Err(Error::InvalidConfiguration(format!(
                            "{}: property {:?} has the wrong kind",
                            self.name, property.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn required_port(config: &PeripheralConfig, descriptor: &str, name: &str) -> Result<PortId> {
    match config.get(name) {
        Some(PropertyValue::Port(id)) => Ok(*id),
        _ => Err(Error::InvalidConfiguration(format!(
            "{descriptor}: missing required port property {name:?}"
        ))),
    }
}

fn optional_port(config: &PeripheralConfig, name: &str) -> Option<PortId> {
    match config.get(name) {
        Some(PropertyValue::Port(id)) => Some(*id),
        _ => None,
    }
}

fn required_string<'a>(config: &'a PeripheralConfig, descriptor: &str, name: &str) -> Result<&'a str> {
    match config.get(name) {
        Some(PropertyValue::String(s)) => Ok(s.as_str()),
        _ => Err(Error::InvalidConfiguration(format!(
            "{descriptor}: missing required string property {name:?}"
        ))),
    }
}

/// Reads a whole file into memory for a peripheral's backing store, the
/// arena-side counterpart of the reference implementation's
/// `SPIFlash::openFile` (which aborts the process on failure; here a
/// host I/O failure is reported through `Error::HostIo` instead, per the
/// error taxonomy's "log then terminate" policy at the caller's
/// discretion rather than ours).
pub fn read_backing_file(path: &str) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(Error::from)
}
