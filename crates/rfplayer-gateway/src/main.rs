//! Command-line host for the RFPlayer gateway core.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use rfplayer_core::prelude::*;
use rfplayer_core::protocol::list_ports;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Gateway for the Ziblue RFPlayer transceiver.
#[derive(Parser, Debug)]
#[command(name = "rfplayer-gateway")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file; discovered devices are stored here too.
    #[arg(short, long, global = true, default_value = "rfplayer.json")]
    config: PathBuf,

    /// Port or host:port overriding the configuration.
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway until interrupted. Lines typed on stdin are injected
    /// as received frames.
    Run,
    /// Send one device command and print the acknowledgement.
    Send {
        /// Radio protocol, e.g. X10 or RTS.
        #[arg(long)]
        protocol: String,
        /// Command verb, e.g. ON, OFF, DOWN.
        #[arg(long)]
        command: String,
        /// Numeric device id.
        #[arg(long, conflicts_with = "address")]
        id: Option<String>,
        /// House/unit address, e.g. A1.
        #[arg(long)]
        address: Option<String>,
        /// Also register the device on this platform (command or cover).
        #[arg(long)]
        add: Option<Platform>,
    },
    /// Send a literal line and print the acknowledgement.
    Raw {
        line: String,
    },
    /// Decode a received line offline and print its events as JSON.
    Decode {
        line: String,
    },
    /// List serial ports.
    Ports,
}

/// Factory that reports new devices in the log
struct LoggingFactory;

#[async_trait]
impl DeviceFactory for LoggingFactory {
    async fn add_device(&self, seed: DeviceEvent) {
        info!(
            id = seed.id(),
            platform = ?seed.platform(),
            protocol = ?seed.protocol(),
            value = %seed.value(),
            "Device available"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match args.command {
        Command::Decode { line } => decode(&line),
        Command::Ports => ports(),
        Command::Run => run(load_config(&args.config, args.port)?, &args.config).await,
        Command::Send {
            protocol,
            command,
            id,
            address,
            add,
        } => {
            let mut outgoing = OutgoingCommand::new(protocol, command);
            outgoing.device_id = id;
            outgoing.device_address = address;
            let config = load_config(&args.config, args.port)?;
            let gateway = connect(config, &args.config).await?;
            let sent = match add {
                Some(platform) => gateway.send_command_and_add(&outgoing, platform).await,
                None => gateway.send_command(&outgoing).await,
            };
            gateway.shutdown().await;
            println!("{}", sent?);
            Ok(())
        }
        Command::Raw { line } => {
            let config = load_config(&args.config, args.port)?;
            let gateway = connect(config, &args.config).await?;
            let sent = gateway.send_raw_command(&line).await;
            gateway.shutdown().await;
            println!("{}", sent?);
            Ok(())
        }
    }
}

/// Read the configuration file if present, then apply the port override
fn load_config(path: &Path, port: Option<String>) -> Result<GatewayConfig> {
    let mut config = if path.exists() {
        // validated below, once the override is applied
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str::<GatewayConfig>(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?
    } else {
        GatewayConfig::default()
    };

    if let Some(port) = port {
        if port.contains(':') {
            config.transport = Transport::Tcp;
        }
        config.port = port;
    }
    config.validate()?;
    Ok(config)
}

fn gateway(config: GatewayConfig, store_path: &Path) -> Gateway {
    let store = Arc::new(JsonConfigStore::new(store_path));
    let gateway = Gateway::from_config(config, store);
    for platform in Platform::ALL {
        gateway
            .registry()
            .register_factory(platform, Arc::new(LoggingFactory));
    }
    gateway
}

/// Start a gateway and wait until the transceiver link is up
async fn connect(config: GatewayConfig, store_path: &Path) -> Result<Gateway> {
    let wait = Duration::from_secs(config.connection_timeout_secs + 1);
    let gateway = gateway(config, store_path);
    let mut state = gateway.connection().subscribe_state();
    gateway.start()?;

    let connected = matches!(
        tokio::time::timeout(wait, state.wait_for(|s| *s == ConnectionState::Connected)).await,
        Ok(Ok(_))
    );
    if !connected {
        gateway.shutdown().await;
        bail!("Transceiver not reachable at {}", gateway.connection().endpoint());
    }
    Ok(gateway)
}

async fn run(config: GatewayConfig, store_path: &Path) -> Result<()> {
    let gateway = gateway(config, store_path);
    let mut deliveries = gateway.registry().subscribe_deliveries();
    let mut availability = gateway.subscribe_availability();
    gateway.start()?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            delivery = deliveries.recv() => match delivery {
                Ok(delivery) => info!(
                    consumer = %delivery.consumer,
                    field = delivery.event.field(),
                    value = %delivery.event.value(),
                    "Event"
                ),
                Err(err) => warn!(error = %err, "Delivery stream lagged"),
            },
            available = availability.recv() => {
                if let Ok(available) = available {
                    info!(available, "Transceiver availability changed");
                }
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) if !line.trim().is_empty() => {
                    if let Err(err) = gateway.inject_test_frame(&line) {
                        warn!(error = %err, "Could not inject line");
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => stdin_open = false,
            },
        }
    }

    gateway.shutdown().await;
    let stats = serde_json::to_string(&gateway.stats())?;
    info!(stats = %stats, "Final counters");
    Ok(())
}

fn decode(line: &str) -> Result<()> {
    let events: Vec<DeviceEvent> = codec::decode(line)
        .iter()
        .flat_map(codec::extract_events)
        .collect();
    if events.is_empty() {
        bail!("Line decodes to no events");
    }
    println!("{}", serde_json::to_string_pretty(&events)?);
    Ok(())
}

fn ports() -> Result<()> {
    for port in list_ports() {
        let marker = if port.is_probable_transceiver() { " (rfplayer?)" } else { "" };
        match &port.product {
            Some(product) => println!("{}  {}{}", port.name, product, marker),
            None => println!("{}{}", port.name, marker),
        }
    }
    Ok(())
}
