//! Stand-in for [`super::TapLink`] on platforms or builds without the
//! `tap` feature enabled. Every method fails loudly rather than silently
//! dropping frames, since a configuration that names a TAP interface but
//! can't reach one is a configuration mistake, not a degraded mode.

use crate::error::{Error, Result};

use super::NetworkLink;

pub struct TapLink;

impl TapLink {
    pub fn open(ifname: &str) -> Result<TapLink> {
        Err(Error::InvalidConfiguration(format!(
            "cannot open tap interface {ifname:?}: this build has the \"tap\" feature disabled"
        )))
    }
}

impl NetworkLink for TapLink {
    fn transmit_frame(&mut self, _frame: &[u8]) {}

    fn receive_frame(&mut self) -> Option<Vec<u8>> {
        None
    }
}
