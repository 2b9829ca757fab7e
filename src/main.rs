use clap::Parser;
use n0_error::{e, Result, StdResultExt};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use turnpipe::{
    bridge::{parse_target, HttpBridge},
    error::SetupError,
    RelayServer, SessionStore, Tunnel,
};

/// STUN/TURN-shaped relay that tunnels HTTP to a fixed upstream target.
#[derive(Parser)]
struct Cli {
    /// UDP port to listen on (0 lets the OS pick one).
    #[clap(short, long, default_value_t = 0)]
    port: u16,
    /// Upstream base URL requests are relayed to; must be http or https.
    #[clap(short, long)]
    target: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let target = parse_target(&cli.target).anyerr()?;

    let socket = UdpSocket::bind(("0.0.0.0", cli.port))
        .await
        .map_err(|source| {
            e!(SetupError::UdpBind {
                port: cli.port,
                source
            })
        })
        .anyerr()?;
    let local = socket.local_addr().std_context("no local socket address")?;
    println!("Listening on {}", local.port());

    let store = SessionStore::new();
    let shutdown = CancellationToken::new();
    let reaper = store.spawn_reaper(shutdown.clone());

    let bridge = HttpBridge::new(target)?;
    let server = RelayServer::new(socket, Tunnel::new(store, bridge));
    tokio::select! {
        res = server.run() => res?,
        _ = tokio::signal::ctrl_c() => debug!("interrupt, shutting down"),
    }

    shutdown.cancel();
    reaper.await.ok();
    Ok(())
}
