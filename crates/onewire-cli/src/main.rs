//! 1-Wire CLI - Adapter discovery and device search
//!
//! Opens the default (or named) adapter through the registry and runs
//! searches, presence checks or a periodic watch over the bus.

mod monitor;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use monitor::ScanOptions;
use onewire_access::{Registry, RegistryConfig, DEFAULT_ADAPTER_KEY, DEFAULT_PORT_KEY};
use onewire_adapter::Adapter;
use onewire_core::DeviceAddress;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "onewire")]
#[command(about = "1-Wire bus master: adapter discovery and device search")]
#[command(version)]
struct Args {
    /// Set a property (key=value); overrides files and environment
    #[arg(short = 'D', long = "define", value_name = "KEY=VALUE")]
    define: Vec<String>,

    /// Read properties from this file instead of ./onewire.properties and /etc/onewire.properties
    #[arg(short, long)]
    properties: Option<PathBuf>,

    /// Ignore ONEWIRE_* environment variables
    #[arg(long)]
    no_env: bool,

    /// Adapter type to open (default: onewire.adapter.default)
    #[arg(short, long)]
    adapter: Option<String>,

    /// Port to open (default: onewire.port.default)
    #[arg(long)]
    port: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the version and the default adapter and port
    Version,
    /// List the available adapter types and their ports
    Adapters,
    /// Enumerate the devices on the bus
    Search {
        #[command(flatten)]
        scan: ScanArgs,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Check whether a device answers, exactly
    Present {
        address: DeviceAddress,
        /// Check for an alarm condition instead of presence
        #[arg(long)]
        alarm: bool,
    },
    /// Rescan periodically and report arrivals and departures
    Watch {
        #[command(flatten)]
        scan: ScanArgs,
        /// Seconds between scans
        #[arg(short, long, default_value_t = 2)]
        interval: u64,
        /// Print JSON lines instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args, Debug)]
struct ScanArgs {
    /// Only devices in an alarm condition
    #[arg(long)]
    alarm: bool,
    /// Skip the reset before each search pass
    #[arg(long)]
    no_reset: bool,
    /// Report only these family codes (hex)
    #[arg(short, long, value_parser = parse_family, value_delimiter = ',')]
    family: Vec<u8>,
    /// Skip these family codes (hex)
    #[arg(short, long, value_parser = parse_family, value_delimiter = ',')]
    exclude: Vec<u8>,
}

impl From<ScanArgs> for ScanOptions {
    fn from(args: ScanArgs) -> Self {
        Self {
            alarm_only: args.alarm,
            skip_reset: args.no_reset,
            include: args.family,
            exclude: args.exclude,
        }
    }
}

fn parse_family(s: &str) -> Result<u8, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u8::from_str_radix(digits, 16).map_err(|e| format!("invalid family code \"{s}\": {e}"))
}

/// One device in `search --json` output
#[derive(Debug, Serialize)]
struct DeviceRecord {
    address: DeviceAddress,
    family: String,
    crc_valid: bool,
}

#[derive(Debug, Serialize)]
struct SearchReport {
    adapter: String,
    port: Option<String>,
    devices: Vec<DeviceRecord>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let registry = build_registry(&args)?;
    info!(version = onewire_access::version(), "1-Wire bus master");

    match args.command {
        Command::Version => {
            println!("1-Wire bus master v{}", onewire_access::version());
            println!(
                "Default adapter: {}",
                registry.resolve_property(DEFAULT_ADAPTER_KEY).unwrap_or_default()
            );
            println!(
                "   Default port: {}",
                registry.resolve_property(DEFAULT_PORT_KEY).unwrap_or_default()
            );
        }
        Command::Adapters => list_adapters(&registry),
        Command::Search { scan, json } => {
            let adapter = open_adapter(&registry, args.adapter, args.port)?;
            let found = monitor::scan(&adapter, &ScanOptions::from(scan), None)?.unwrap_or_default();
            print_devices(&adapter, found, json)?;
        }
        Command::Present { address, alarm } => {
            let adapter = open_adapter(&registry, args.adapter, args.port)?;
            let answered = {
                let mut session = adapter.acquire_blocking();
                if alarm {
                    session.is_alarming(&address)
                } else {
                    session.is_present(&address)
                }
            };
            println!("{address}: {}", if answered { "yes" } else { "no" });
            if !answered {
                std::process::exit(1);
            }
        }
        Command::Watch {
            scan,
            interval,
            json,
        } => {
            if interval == 0 {
                bail!("Watch interval must be at least one second");
            }
            let adapter = open_adapter(&registry, args.adapter, args.port)?;
            monitor::watch(adapter, scan.into(), Duration::from_secs(interval), json).await?;
        }
    }

    Ok(())
}

fn build_registry(args: &Args) -> Result<Registry> {
    let mut config = RegistryConfig::new().with_env(!args.no_env);
    for define in &args.define {
        let (key, value) = define
            .split_once('=')
            .with_context(|| format!("Property \"{define}\" is not of the form key=value"))?;
        config = config.with_property(key.trim(), value.trim());
    }
    if let Some(path) = &args.properties {
        config = config.with_search_paths(vec![path.clone()]);
    }
    Ok(Registry::new(config))
}

fn open_adapter(
    registry: &Registry,
    adapter: Option<String>,
    port: Option<String>,
) -> Result<Arc<Adapter>> {
    let opened = match (adapter, port) {
        (None, None) => registry.get_default_adapter(),
        (adapter, port) => {
            let name = adapter
                .or_else(|| registry.resolve_property(DEFAULT_ADAPTER_KEY))
                .unwrap_or_default();
            let port = port
                .or_else(|| registry.resolve_property(DEFAULT_PORT_KEY))
                .unwrap_or_default();
            registry.get_adapter(&name, &port)
        }
    };
    let adapter = opened.context("Failed to open adapter")?;
    info!(
        adapter = %adapter.name(),
        port = %adapter.port_name().unwrap_or_default(),
        "Adapter ready"
    );
    Ok(adapter)
}

fn list_adapters(registry: &Registry) {
    let report = registry.enumerate_with_report();
    println!("Found {} adapter(s):", report.adapters.len());
    for adapter in &report.adapters {
        println!("  - {} ({})", adapter.name(), adapter.port_type_description());
        println!("    Version: {}", adapter.adapter_version());
        println!("    Ports: {}", adapter.port_names().join(", "));
        let caps = adapter.capabilities();
        println!(
            "    Overdrive: {}  Hyperdrive: {}  Flex: {}  Power: {}  Program: {}",
            caps.overdrive, caps.hyperdrive, caps.flex_speed, caps.power_delivery, caps.program_pulse
        );
    }
    for skipped in &report.skipped {
        println!("  ! {}: {}", skipped.name, skipped.reason);
    }
}

fn print_devices(adapter: &Adapter, found: Vec<DeviceAddress>, json: bool) -> Result<()> {
    if json {
        let report = SearchReport {
            adapter: adapter.name().to_string(),
            port: adapter.port_name(),
            devices: found
                .into_iter()
                .map(|address| DeviceRecord {
                    address,
                    family: format!("{:02X}", address.family()),
                    crc_valid: address.has_valid_crc(),
                })
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Discovered {} devices:", found.len());
    for address in found {
        println!("  - {}", address);
        if !address.has_valid_crc() {
            println!("    CRC: invalid");
        }
    }
    Ok(())
}
