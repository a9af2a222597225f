//! Powering the device off.

use nix::sys::reboot::{reboot, RebootMode};
use tracing::{info, warn};

use crate::traits::{CameraError, PowerController, Result};

/// Powers off through the kernel. Requires `CAP_SYS_BOOT`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPower;

impl PowerController for SystemPower {
    fn power_off(&self) -> Result<()> {
        info!("powering off");
        nix::unistd::sync();
        match reboot(RebootMode::RB_POWER_OFF) {
            Ok(never) => match never {},
            Err(err) => Err(CameraError::Power(err.to_string())),
        }
    }
}

/// Logs the request and leaves the machine running, for bench setups.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnlyPower;

impl PowerController for LogOnlyPower {
    fn power_off(&self) -> Result<()> {
        warn!("power off requested but disabled, exiting instead");
        Ok(())
    }
}
