//! Linux TAP-backed `NetworkLink`, behind the `tap` feature.
//!
//! Opens `/dev/net/tun` in `IFF_TAP | IFF_NO_PI` mode, the same two flags
//! every Linux TAP consumer sets: `IFF_TAP` for raw Ethernet frames
//! (rather than `IFF_TUN`'s IP packets) and `IFF_NO_PI` to skip the
//! 4-byte packet-info header the kernel would otherwise prefix every
//! frame with.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;

use log::{debug, warn};

use crate::error::{Error, Result};

use super::{NetworkLink, MAX_FRAME_SIZE};

const IFF_TAP: libc::c_short = 0x0002;
const IFF_NO_PI: libc::c_short = 0x1000;
const TUNSETIFF: libc::c_ulong = 0x4004_54ca;

#[repr(C)]
struct IfReq {
    ifr_name: [libc::c_char; libc::IFNAMSIZ],
    ifr_flags: libc::c_short,
    _pad: [u8; 22],
}

pub struct TapLink {
    file: File,
}

impl TapLink {
    pub fn open(ifname: &str) -> Result<TapLink> {
        if ifname.len() >= libc::IFNAMSIZ {
            return Err(Error::InvalidConfiguration(format!(
                "interface name {ifname:?} longer than IFNAMSIZ"
            )));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/net/tun")?;

        let mut req: IfReq = unsafe { std::mem::zeroed() };
        for (dst, src) in req.ifr_name.iter_mut().zip(ifname.bytes()) {
            *dst = src as libc::c_char;
        }
        req.ifr_flags = IFF_TAP | IFF_NO_PI;

        let rc = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF, &mut req) };
        if rc < 0 {
            return Err(Error::HostIo(io::Error::last_os_error()));
        }
        debug!("net_link: attached to tap interface {ifname:?}");
        Ok(TapLink { file })
    }
}

impl NetworkLink for TapLink {
    fn transmit_frame(&mut self, frame: &[u8]) {
        if let Err(e) = self.file.write_all(frame) {
            warn!("net_link: tap write failed: {e}");
        }
    }

    fn receive_frame(&mut self) -> Option<Vec<u8>> {
        set_nonblocking(&self.file);
        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        match self.file.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Some(buf)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
            Err(e) => {
                warn!("net_link: tap read failed: {e}");
                None
            }
        }
    }
}

fn set_nonblocking(file: &File) {
    unsafe {
        let flags = libc::fcntl(file.as_raw_fd(), libc::F_GETFL, 0);
        if flags >= 0 {
            libc::fcntl(file.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
    }
}
