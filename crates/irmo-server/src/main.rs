#![warn(clippy::unwrap_used)]

use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::Context;
use color_eyre::Result;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use irmo_common::net::{NetModule, UdpModule};
use irmo_common::protocol::{ProtocolConfig, SystemClock};
use irmo_common::Interface;
use irmo_server::Server;

/// Hosts one authoritative world and replicates it to every peer that
/// connects, per the schema compiled to `schema`.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about)]
struct Args {
    /// Port to listen for connections on.
    #[clap(short, long, default_value_t = 16780)]
    port: u16,

    /// Path to a binary schema blob produced by irmo-schema-compiler.
    #[clap(short, long)]
    schema: PathBuf,

    /// How long to block waiting for a datagram between ticks.
    #[clap(long, default_value_t = 50)]
    tick_interval_ms: u32,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(env_filter)
        .init();

    let args = Args::parse();
    let schema_bytes = std::fs::read(&args.schema)
        .wrap_err_with(|| format!("reading schema file {}", args.schema.display()))?;
    let interface = Arc::new(Interface::load(&schema_bytes).wrap_err("loading schema blob")?);

    let net = UdpModule;
    let sock = net
        .open_server_sock(args.port)
        .wrap_err_with(|| format!("binding udp socket on port {}", args.port))?;

    let mut server = Server::new(
        Rc::new(ProtocolConfig::new()),
        Rc::new(SystemClock::new()),
        interface,
        sock,
    );
    server.on_connect(|addr| tracing::info!(%addr, "peer connected"));
    server.on_disconnect(|addr, reason| tracing::info!(%addr, ?reason, "peer disconnected"));

    tracing::info!(port = args.port, "irmo-server listening");
    loop {
        server.tick()?;
        server.block(Some(args.tick_interval_ms))?;
    }
}
