// ─── CLI Parsing ────────────────────────────────────────────────────────────

use std::path::PathBuf;

use crate::backend::BackendKind;

pub const HELP: &str = r#"nibble-link: exchange stdin/stdout with a peer over a 4-bit parallel link

USAGE:
  nibble-link <-b15f | -ard> [OPTIONS] < outgoing > incoming

BACKENDS (exactly one, required):
  -b15f                   Direct register access through /dev/port
  -ard                    Serial command/response adapter ('R' / 'W n')

OPTIONS:
  --config, -c <path>     TOML file with [link] and [backend] sections
  --device, -d <path>     Serial device for -ard (default: /dev/ttyUSB0)
  --baud <rate>           Serial baud rate for -ard (default: 9600)
  --port-base <addr>      Register base address for -b15f, decimal or 0x hex
                          (default: 0x378)
  --payload-size <bytes>  Payload bytes per frame; both peers must agree
                          (default: 256)
  --startup-delay <ms>    Wait before listening (default: 5000)
  --help, -h              Show this help

Logs go to stderr; set RUST_LOG (e.g. RUST_LOG=debug) for more detail.

EXAMPLES:
  # Serial adapter, send a file and keep what the peer sends
  nibble-link -ard --device /dev/ttyACM0 < notes.txt > received.bin

  # Register backend with a custom config
  nibble-link -b15f --config link.toml < image.png > peer.bin
"#;

/// Flags given on the command line. Anything left `None` falls back to the
/// config file, then to the built-in defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Args {
    pub backend: BackendKind,
    pub config: Option<PathBuf>,
    pub device: Option<PathBuf>,
    pub baud: Option<u32>,
    pub port_base: Option<u16>,
    pub payload_size: Option<usize>,
    pub startup_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Run(Args),
    Help,
}

pub fn parse_args<I>(args: I) -> anyhow::Result<Invocation>
where
    I: IntoIterator<Item = String>,
{
    let args: Vec<String> = args.into_iter().collect();
    let mut backend = None;
    let mut config = None;
    let mut device = None;
    let mut baud = None;
    let mut port_base = None;
    let mut payload_size = None;
    let mut startup_delay_ms = None;

    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        if let Some(kind) = BackendKind::from_flag(arg) {
            if let Some(previous) = backend.replace(kind) {
                if previous != kind {
                    anyhow::bail!("conflicting backends: {} and {arg}", previous.flag());
                }
            }
            i += 1;
            continue;
        }
        match arg {
            "--config" | "-c" => {
                config = Some(PathBuf::from(value(&args, &mut i, arg)?));
            }
            "--device" | "-d" => {
                device = Some(PathBuf::from(value(&args, &mut i, arg)?));
            }
            "--baud" => {
                let val = value(&args, &mut i, arg)?;
                baud = Some(
                    val.parse()
                        .map_err(|e| anyhow::anyhow!("invalid baud rate '{}': {}", val, e))?,
                );
            }
            "--port-base" => {
                let val = value(&args, &mut i, arg)?;
                port_base = Some(parse_address(val)?);
            }
            "--payload-size" => {
                let val = value(&args, &mut i, arg)?;
                payload_size = Some(
                    val.parse()
                        .map_err(|e| anyhow::anyhow!("invalid payload size '{}': {}", val, e))?,
                );
            }
            "--startup-delay" => {
                let val = value(&args, &mut i, arg)?;
                startup_delay_ms = Some(
                    val.parse()
                        .map_err(|e| anyhow::anyhow!("invalid startup delay '{}': {}", val, e))?,
                );
            }
            "--help" | "-h" => return Ok(Invocation::Help),
            other => {
                anyhow::bail!("unknown argument: {other}\nRun with --help for usage.");
            }
        }
        i += 1;
    }

    let Some(backend) = backend else {
        anyhow::bail!("no backend selected. Pass -b15f or -ard.\nRun with --help for usage.");
    };

    Ok(Invocation::Run(Args {
        backend,
        config,
        device,
        baud,
        port_base,
        payload_size,
        startup_delay_ms,
    }))
}

fn value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> anyhow::Result<&'a str> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("{flag} requires a value"))
}

/// Decimal or `0x`-prefixed hexadecimal I/O address.
pub fn parse_address(text: &str) -> anyhow::Result<u16> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| anyhow::anyhow!("invalid port address '{}': {}", text, e))
}
