//! Runtime settings: built-in defaults, overlaid by the TOML file, overlaid by
//! command-line flags.
//!
//! ```toml
//! [link]
//! payload_size = 64
//! slot_ms = 40
//!
//! [backend]
//! device = "/dev/ttyACM0"
//! baud = 9600
//! startup_delay_ms = 5000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use nibble_transport::config::LinkConfigInput;
use nibble_transport::LinkConfig;
use serde::Deserialize;

use crate::backend::BackendKind;
use crate::cli::Args;

pub const DEFAULT_DEVICE: &str = "/dev/ttyUSB0";
pub const DEFAULT_BAUD: u32 = 9600;
/// First parallel port.
pub const DEFAULT_PORT_BASE: u16 = 0x378;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub link: LinkConfigInput,
    pub backend: BackendInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendInput {
    pub device: Option<PathBuf>,
    pub baud: Option<u32>,
    pub port_base: Option<u16>,
    pub read_timeout_ms: Option<u64>,
    pub startup_delay_ms: Option<u64>,
    pub transmitter_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    pub kind: BackendKind,
    pub device: PathBuf,
    pub baud: u32,
    pub port_base: u16,
    /// How long one serial reply may take before the read is retried.
    pub read_timeout: Duration,
    /// Pause before listening, so both peers can be started by hand.
    pub startup_delay: Duration,
    /// Extra pause between listening and the first probe.
    pub transmitter_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub link: LinkConfig,
    pub backend: BackendSettings,
}

pub fn load(args: &Args) -> anyhow::Result<Settings> {
    let file = match &args.config {
        Some(path) => read_file(path)?,
        None => FileConfig::default(),
    };
    resolve(args, file)
}

fn read_file(path: &Path) -> anyhow::Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

pub fn resolve(args: &Args, file: FileConfig) -> anyhow::Result<Settings> {
    let mut link_input = file.link;
    if args.payload_size.is_some() {
        link_input.payload_size = args.payload_size;
    }
    let link = link_input.resolve().context("invalid [link] settings")?;

    let backend = file.backend;
    let ms = Duration::from_millis;
    let backend = BackendSettings {
        kind: args.backend,
        device: args
            .device
            .clone()
            .or(backend.device)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DEVICE)),
        baud: args.baud.or(backend.baud).unwrap_or(DEFAULT_BAUD),
        port_base: args.port_base.or(backend.port_base).unwrap_or(DEFAULT_PORT_BASE),
        read_timeout: ms(backend.read_timeout_ms.unwrap_or(100)),
        startup_delay: ms(args
            .startup_delay_ms
            .or(backend.startup_delay_ms)
            .unwrap_or(5000)),
        transmitter_delay: ms(backend.transmitter_delay_ms.unwrap_or(1000)),
    };

    Ok(Settings { link, backend })
}
