//! HID bridge client
//!
//! Command-line access to HID devices exposed by the local provider.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use client::{
    ClientConfig, ConnectionEvent, DevicePrompt, DeviceSession, Hid, PromptCandidate,
    PromptOutcome, parse_filter,
};
use common::setup_logging;
use protocol::LogicalId;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "hid-bridge-client")]
#[command(author, version, about = "HID bridge client - Access HID devices through the local provider")]
#[command(long_about = "
Access HID devices exposed by the local HID provider process.

EXAMPLES:
    # List devices this origin may use
    hid-bridge-client list

    # Request access to any Logitech device
    hid-bridge-client request --filter 046d:*

    # Print input reports of device 12345 until Ctrl+C
    hid-bridge-client monitor --device 12345

    # Send an output report
    hid-bridge-client send-output 12345 --report-id 0 01ff00

CONFIGURATION:
    The client looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/hid-bridge/client.toml
    3. /etc/hid-bridge/client.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List authorized devices (the default)
    List {
        /// Include devices this origin has not been granted
        #[arg(long)]
        all: bool,
    },
    /// Request access to a device matching the filters
    Request {
        /// Filter pattern: vid:pid, vid:*, optionally followed by @page:usage
        #[arg(short, long = "filter", value_name = "PATTERN")]
        filters: Vec<String>,
    },
    /// Print device arrivals and removals, and input reports of one device
    Monitor {
        /// Logical id of a device to open
        #[arg(long, value_name = "ID")]
        device: Option<u32>,
    },
    /// Read a feature report
    ReadFeature {
        /// Logical device id
        device: u32,
        #[arg(long, default_value_t = 0)]
        report_id: u8,
    },
    /// Send an output report
    SendOutput {
        /// Logical device id
        device: u32,
        #[arg(long, default_value_t = 0)]
        report_id: u8,
        /// Payload as hex, e.g. "01ff00" or "01 ff 00"
        data: String,
    },
    /// Revoke access to a device (and every interface of the same unit)
    Forget {
        /// Logical device id
        device: u32,
    },
    /// Save default configuration to default location and exit
    SaveConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let command = args.command.unwrap_or(Command::List { all: false });

    // Handle save-config early (before loading config)
    if let Command::SaveConfig = command {
        let config = ClientConfig::default();
        let path = ClientConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    // Load configuration first (to get log level from config if not specified)
    let config = if let Some(ref path) = args.config {
        ClientConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        ClientConfig::load_or_default()
    };

    // Use CLI log level if specified, otherwise use config value
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.client.log_level);

    setup_logging(log_level).context("Failed to setup logging")?;

    info!("HID bridge client v{}", env!("CARGO_PKG_VERSION"));
    debug!("Log level: {}", log_level);

    let hid = Hid::from_config(&config, Arc::new(TerminalPrompt))
        .context("Failed to initialize HID client")?;

    let result = match command {
        Command::List { all } => list_devices(&hid, all).await,
        Command::Request { filters } => request_device(&hid, &filters).await,
        Command::Monitor { device } => monitor(&hid, &config, device).await,
        Command::ReadFeature { device, report_id } => {
            let device = find_device(&hid, device).await?;
            device.open().await.context("Failed to open device")?;
            let result = device.read_feature_report(report_id).await;
            device.close().await.context("Failed to close device")?;
            let data = result.context("Failed to read feature report")?;
            println!("{}", to_hex(&data));
            Ok(())
        }
        Command::SendOutput {
            device,
            report_id,
            data,
        } => {
            let payload = parse_hex_bytes(&data)?;
            let device = find_device(&hid, device).await?;
            device.open().await.context("Failed to open device")?;
            let result = device.send_output_report(report_id, payload).await;
            device.close().await.context("Failed to close device")?;
            result.context("Failed to send output report")
        }
        Command::Forget { device } => {
            let device = find_device(&hid, device).await?;
            device.forget().await.context("Failed to forget device")?;
            println!("Forgot physical device {}", device.physical_id());
            Ok(())
        }
        Command::SaveConfig => Ok(()),
    };

    hid.disconnect();
    result
}

async fn list_devices(hid: &Hid, all: bool) -> Result<()> {
    let devices = if all {
        hid.manager()
            .refresh_if_idle()
            .await
            .context("Failed to list devices")?
    } else {
        hid.get_devices().await.context("Failed to list devices")?
    };

    if devices.is_empty() {
        println!("No devices");
        return Ok(());
    }
    for device in &devices {
        print_device(device);
    }
    Ok(())
}

async fn request_device(hid: &Hid, patterns: &[String]) -> Result<()> {
    let filters = patterns
        .iter()
        .map(|pattern| parse_filter(pattern))
        .collect::<Result<Vec<_>>>()?;

    let devices = hid
        .request_device(&filters)
        .await
        .context("Device request failed")?;
    if devices.is_empty() {
        println!("No matching device");
        return Ok(());
    }

    println!("Granted:");
    for device in &devices {
        print_device(device);
    }
    Ok(())
}

async fn monitor(hid: &Hid, config: &ClientConfig, device: Option<u32>) -> Result<()> {
    hid.add_connection_observer(|event| match event {
        ConnectionEvent::Connect(device) => {
            println!("+ {}", describe(device));
        }
        ConnectionEvent::Disconnect(device) => {
            println!("- {}", describe(device));
        }
    });

    // Prime the listing so later arrivals are reported
    hid.get_devices().await.context("Failed to list devices")?;

    let opened = match device {
        Some(id) => {
            let device = find_device(hid, id).await?;
            device.add_input_report_observer(|event| match event.report_id {
                Some(report_id) => {
                    println!("{} [{}] {}", event.logical_id, report_id, to_hex(&event.data))
                }
                None => println!("{} {}", event.logical_id, to_hex(&event.data)),
            });
            device.open().await.context("Failed to open device")?;
            Some(device)
        }
        None => None,
    };

    let watcher = hid.spawn_device_watcher(config.watch_interval());
    info!("Monitoring, press Ctrl+C to stop");
    signal::ctrl_c()
        .await
        .context("Failed to wait for Ctrl+C")?;
    info!("Received Ctrl+C, shutting down...");

    watcher.abort();
    if let Some(device) = opened {
        if device.is_open() {
            device.close().await.context("Failed to close device")?;
        }
    }
    Ok(())
}

/// Find an authorized device by logical id
async fn find_device(hid: &Hid, logical_id: u32) -> Result<Arc<DeviceSession>> {
    let devices = hid.get_devices().await.context("Failed to list devices")?;
    devices
        .into_iter()
        .find(|device| device.logical_id() == LogicalId(logical_id))
        .ok_or_else(|| {
            anyhow!(
                "Device {} is not available or not authorized; run `request` first",
                logical_id
            )
        })
}

fn describe(device: &DeviceSession) -> String {
    format!(
        "{} {:04x}:{:04x} {}",
        device.logical_id(),
        device.vendor_id(),
        device.product_id(),
        device.product_name()
    )
}

fn print_device(device: &DeviceSession) {
    let usages: Vec<String> = device
        .collections()
        .iter()
        .map(|c| format!("{:04x}:{:04x}", c.usage_page, c.usage))
        .collect();
    println!(
        "{:>10}  phys {:>10}  {:04x}:{:04x}  usage {}  {}",
        device.logical_id(),
        device.physical_id(),
        device.vendor_id(),
        device.product_id(),
        usages.join(","),
        device.product_name()
    );
}

fn to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_hex_bytes(text: &str) -> Result<Vec<u8>> {
    let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(anyhow!("Hex payload '{}' has an odd number of digits", text));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .with_context(|| format!("Invalid hex byte '{}'", &digits[i..i + 2]))
        })
        .collect()
}

/// Prompt on the terminal; an empty line or `q` cancels
struct TerminalPrompt;

#[async_trait]
impl DevicePrompt for TerminalPrompt {
    async fn present(&self, mut candidates: watch::Receiver<Vec<PromptCandidate>>) -> PromptOutcome {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut shown = candidates.borrow_and_update().clone();
        print_candidates(&shown);

        loop {
            tokio::select! {
                changed = candidates.changed() => {
                    if changed.is_err() {
                        return PromptOutcome::Cancelled;
                    }
                    let next = candidates.borrow_and_update().clone();
                    if next != shown {
                        shown = next;
                        print_candidates(&shown);
                    }
                }
                line = lines.next_line() => {
                    let Ok(Some(line)) = line else {
                        return PromptOutcome::Cancelled;
                    };
                    let line = line.trim();
                    if line.is_empty() || line.eq_ignore_ascii_case("q") {
                        return PromptOutcome::Cancelled;
                    }
                    match line.parse::<usize>() {
                        Ok(n) if (1..=shown.len()).contains(&n) => {
                            return PromptOutcome::Selected(shown[n - 1].physical_id);
                        }
                        _ => println!("Enter 1-{} or q to cancel", shown.len()),
                    }
                }
            }
        }
    }
}

fn print_candidates(candidates: &[PromptCandidate]) {
    println!("Select a device:");
    for (i, candidate) in candidates.iter().enumerate() {
        println!("  {}) {}", i + 1, candidate.label());
    }
    println!("Choice (empty to cancel): ");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_bytes() {
        assert_eq!(parse_hex_bytes("01ff00").unwrap(), vec![0x01, 0xFF, 0x00]);
        assert_eq!(parse_hex_bytes("01 FF 00").unwrap(), vec![0x01, 0xFF, 0x00]);
        assert!(parse_hex_bytes("").unwrap().is_empty());
        assert!(parse_hex_bytes("0").is_err());
        assert!(parse_hex_bytes("zz").is_err());
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[0x10, 0x20, 0xFF]), "10 20 ff");
    }

    #[test]
    fn test_args_parse_subcommands() {
        let args = Args::try_parse_from([
            "hid-bridge-client",
            "request",
            "--filter",
            "046d:*",
            "-f",
            "*:*@ff00:*",
        ])
        .unwrap();
        match args.command {
            Some(Command::Request { filters }) => assert_eq!(filters.len(), 2),
            other => panic!("unexpected command: {:?}", other),
        }

        let args =
            Args::try_parse_from(["hid-bridge-client", "send-output", "7", "--report-id", "2", "0102"])
                .unwrap();
        assert!(matches!(
            args.command,
            Some(Command::SendOutput { device: 7, report_id: 2, .. })
        ));
    }
}
