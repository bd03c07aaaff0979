// botlink — headless control surface for robot pairing and the session relay.

mod logging;

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use botlink_pairing::{PairingOptions, PairingRequest, pair_with};
use botlink_relay::{Frame, RelayClient, RelayConfig, RelayServer};

#[derive(Parser)]
#[command(name = "botlink")]
#[command(about = "Botlink — robot pairing and session relay host", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory for daily-rotated log files (console-only when omitted)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the broadcast relay until interrupted
    Serve {
        /// Listen address, overriding the config file
        #[arg(short, long)]
        listen: Option<SocketAddr>,
        /// Path to a relay config file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Provision a robot over its serial port
    Pair {
        /// Serial port path (e.g. /dev/ttyUSB0)
        port: String,
        /// Network name for the robot to join
        #[arg(long)]
        ssid: String,
        /// Network password
        #[arg(long)]
        password: String,
        /// IPv4 address the robot should dial for the relay
        #[arg(long)]
        host_ip: Ipv4Addr,
        /// Relay port the robot should dial
        #[arg(long, default_value_t = 8765)]
        host_port: u16,
        /// Serial baud rate
        #[arg(long, default_value_t = 115_200)]
        baud: u32,
        /// Handshake timeout in seconds
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
    /// Connect to a running relay and inject one text frame
    Send {
        /// Relay address (host:port)
        addr: String,
        /// Frame contents
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init(cli.log_dir.as_deref())?;

    match cli.command {
        Commands::Serve { listen, config } => serve(listen, config).await,
        Commands::Pair {
            port,
            ssid,
            password,
            host_ip,
            host_port,
            baud,
            timeout,
        } => {
            let request = PairingRequest {
                ssid,
                password,
                host_ip,
                host_port,
            };
            let options = PairingOptions {
                baud_rate: baud,
                timeout: Duration::from_secs(timeout),
            };
            pair_device(port, request, options).await
        }
        Commands::Send { addr, message } => send_frame(&addr, message).await,
    }
}

/// Start the relay and run until Ctrl-C, then stop it cleanly.
async fn serve(listen: Option<SocketAddr>, config_path: Option<PathBuf>) -> Result<()> {
    let mut config = match config_path {
        Some(path) => RelayConfig::load_or_default(&path),
        None => RelayConfig::default(),
    };
    if let Some(addr) = listen {
        config.listen_addr = addr;
    }

    let mut server = RelayServer::new(config);
    server.start().await.context("Failed to start relay")?;
    println!("{}", serde_json::to_string_pretty(&server.status())?);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Interrupt received, stopping relay");
    server.stop().await;
    Ok(())
}

/// Run the serial handshake on a blocking worker and report the device
/// identity.
async fn pair_device(port: String, request: PairingRequest, options: PairingOptions) -> Result<()> {
    let identity = tokio::task::spawn_blocking(move || pair_with(&port, &request, &options))
        .await
        .context("Pairing task panicked")?
        .context("Pairing failed")?;

    println!("Device MAC: {identity}");
    Ok(())
}

/// Operational debugging aid: connect as a peer and send one frame.
async fn send_frame(addr: &str, message: String) -> Result<()> {
    let mut client = RelayClient::connect(addr)
        .await
        .context("Failed to connect to relay")?;
    client
        .send(Frame::Text(message))
        .await
        .context("Failed to send frame")?;
    client.close().await;
    Ok(())
}
