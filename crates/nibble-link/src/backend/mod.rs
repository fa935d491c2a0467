//! Hardware backends behind [`Channel`].

pub mod portio;
pub mod serial;

use anyhow::Context as _;
use nibble_transport::channel::{CommandChannel, RegisterChannel, RegisterPort};
use nibble_transport::Channel;

use crate::settings::BackendSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Output and input registers written and read directly.
    Register,
    /// A microcontroller behind a serial line drives the lines on command.
    Serial,
}

impl BackendKind {
    pub fn from_flag(flag: &str) -> Option<Self> {
        match flag {
            "-b15f" => Some(Self::Register),
            "-ard" => Some(Self::Serial),
            _ => None,
        }
    }

    pub fn flag(self) -> &'static str {
        match self {
            Self::Register => "-b15f",
            Self::Serial => "-ard",
        }
    }
}

pub fn open(settings: &BackendSettings) -> anyhow::Result<Box<dyn Channel>> {
    match settings.kind {
        BackendKind::Register => {
            let mut regs = portio::PortRegisters::open(settings.port_base).with_context(|| {
                format!(
                    "opening {} at {:#x} (needs root)",
                    portio::DEV_PORT,
                    settings.port_base
                )
            })?;
            // Start from all lines low.
            regs.write_output(0).context("clearing output register")?;
            tracing::info!(
                base = %format!("{:#x}", settings.port_base),
                "register backend ready"
            );
            Ok(Box::new(RegisterChannel::new(regs)))
        }
        BackendKind::Serial => {
            let port = serial::open(&settings.device, settings.baud, settings.read_timeout)
                .with_context(|| format!("opening serial device {}", settings.device.display()))?;
            tracing::info!(
                device = %settings.device.display(),
                baud = settings.baud,
                "serial backend ready"
            );
            Ok(Box::new(CommandChannel::new(port)))
        }
    }
}
