//! `knxmap-rs` -- a KNXnet/IP gateway scanner and tunnelling bus-scan client.

use std::net::SocketAddrV4;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use knxmap_rs::addressing::{GroupAddress, IndividualAddress};
use knxmap_rs::config::{BusScanConfig, KnxMedium, ScanConfig};
use knxmap_rs::net::transport::AsyncTransport;
use knxmap_rs::net::udp_transport::UdpTransport;
use knxmap_rs::protocol::cemi::CEMIFrame;
use knxmap_rs::session::{Session, SessionConfig};
use knxmap_rs::{self, Dispatcher};

mod targets;
use targets::{expand_bus_range, expand_hosts};

#[derive(Parser)]
#[command(name = "knxmap-rs", about = "KNXnet/IP scanner and tunnelling client")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// KNXnet/IP port.
    #[arg(long, global = true, default_value_t = 3671)]
    port: u16,
}

#[derive(Subcommand)]
enum Command {
    /// Discover KNXnet/IP gateways via `SEARCH_REQUEST`.
    Discover {
        /// Host or CIDR network to scan (e.g. `192.168.1.0/24`).
        target: String,
        #[arg(long, default_value = "3")]
        timeout_secs: u64,
    },
    /// Probe a range of individual addresses through a gateway's tunnel.
    BusScan {
        /// Gateway host address.
        gateway: String,
        /// Individual-address range (e.g. `1.1.1-1.1.255`).
        range: String,
        #[arg(long)]
        read_properties: bool,
        #[arg(long)]
        auth_key: Option<u32>,
    },
    /// Write a single bit value to a group address.
    Write {
        /// Gateway host address.
        gateway: String,
        /// Group address (e.g. `1/2/3`).
        group: String,
        /// Value to write (0 or 1).
        value: u8,
    },
    /// Print unsolicited group telegrams for a duration.
    Monitor {
        /// Gateway host address.
        gateway: String,
        #[arg(long, default_value = "30")]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Discover { target, timeout_secs } => {
            run_discover(&target, cli.port, timeout_secs).await
        }
        Command::BusScan { gateway, range, read_properties, auth_key } => {
            run_bus_scan(&gateway, cli.port, &range, read_properties, auth_key).await
        }
        Command::Write { gateway, group, value } => {
            run_write(&gateway, cli.port, &group, value).await
        }
        Command::Monitor { gateway, seconds } => run_monitor(&gateway, cli.port, seconds).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run_discover(
    target: &str,
    port: u16,
    timeout_secs: u64,
) -> knxmap_rs::error::Result<()> {
    let hosts = expand_hosts(target, port)?;
    info!(count = hosts.len(), "expanded discovery targets");

    let mut transport = UdpTransport::bind_any().await?;
    transport.set_broadcast(true)?;

    let config = ScanConfig {
        timeout: Duration::from_secs(timeout_secs),
        ..ScanConfig::default()
    };
    let reports = knxmap_rs::scan(hosts, config, &mut transport).await?;

    for report in &reports {
        println!(
            "{}  {}  knx={}  medium={}  services={:?}",
            report.host, report.friendly_name, report.knx_address, report.knx_medium, report.supported_services
        );
    }
    info!(found = reports.len(), "discovery complete");
    Ok(())
}

async fn connect_dispatcher(
    gateway_host: &str,
    port: u16,
) -> knxmap_rs::error::Result<Dispatcher<UdpTransport>> {
    let gateway_ip: std::net::Ipv4Addr = gateway_host
        .parse()
        .map_err(|_| knxmap_rs::error::KnxError::invalid_frame())?;
    let gateway = SocketAddrV4::new(gateway_ip, port);

    let transport = UdpTransport::bind_any().await?;
    let mut session = Session::new(transport, gateway, SessionConfig::default());
    session.connect().await?;
    info!(channel_id = ?session.channel_id(), "tunnel connected");
    Ok(Dispatcher::new(session))
}

/// Keep a long-lived session alive by running CONNECTIONSTATE heartbeats
/// on `interval` until the caller aborts the returned handle.
///
/// `bus_scan` and `monitor` can both run well past a gateway's idle
/// timeout, so anything that holds a tunnel open for a while spawns one
/// of these alongside the real work rather than only heartbeating between
/// commands.
fn spawn_heartbeat<T: AsyncTransport + Send + 'static>(
    dispatcher: Dispatcher<T>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately, skip it
        loop {
            ticker.tick().await;
            match dispatcher.session_mut().await.heartbeat().await {
                Ok(()) => {}
                Err(e) => {
                    error!(error = %e, "heartbeat failed, stopping keepalive");
                    return;
                }
            }
        }
    })
}

async fn run_bus_scan(
    gateway: &str,
    port: u16,
    range: &str,
    read_properties: bool,
    auth_key: Option<u32>,
) -> knxmap_rs::error::Result<()> {
    let addresses = expand_bus_range(range)?;
    info!(count = addresses.len(), "expanded bus-scan range");

    let dispatcher = connect_dispatcher(gateway, port).await?;
    let config = BusScanConfig {
        medium: KnxMedium::Tp1,
        read_properties,
        auth_key,
        ..BusScanConfig::default()
    };

    let heartbeat = spawn_heartbeat(dispatcher.clone(), SessionConfig::default().heartbeat_interval);
    let reports = knxmap_rs::bus_scan(&dispatcher, addresses, config).await?;
    heartbeat.abort();

    for report in &reports {
        if report.is_responsive() {
            println!("{}  responsive  {:?}", report.address, report.properties);
        } else {
            println!("{}  no response", report.address);
        }
    }

    dispatcher.session_mut().await.disconnect().await?;
    Ok(())
}

async fn run_write(
    gateway: &str,
    port: u16,
    group: &str,
    value: u8,
) -> knxmap_rs::error::Result<()> {
    let group: GroupAddress = group.parse()?;
    let dispatcher = connect_dispatcher(gateway, port).await?;
    let source = IndividualAddress::from(0u16);

    knxmap_rs::write_group(&dispatcher, source, group, value & 0x01, &[]).await?;
    info!(%group, value, "wrote group value");

    dispatcher.session_mut().await.disconnect().await?;
    Ok(())
}

async fn run_monitor(gateway: &str, port: u16, seconds: u64) -> knxmap_rs::error::Result<()> {
    let dispatcher = connect_dispatcher(gateway, port).await?;

    let heartbeat = spawn_heartbeat(dispatcher.clone(), SessionConfig::default().heartbeat_interval);
    let frames = knxmap_rs::monitor(&dispatcher, usize::MAX, Duration::from_secs(seconds)).await?;
    heartbeat.abort();

    for cemi in &frames {
        match CEMIFrame::parse(cemi).and_then(|f| f.as_ldata()) {
            Ok(ldata) => println!(
                "{} -> {:04X}  apci={:?}  data={:02X?}",
                ldata.source, ldata.destination_raw, ldata.apci, ldata.data
            ),
            Err(e) => error!(error = %e, "failed to parse inbound frame"),
        }
    }

    dispatcher.session_mut().await.disconnect().await?;
    Ok(())
}
