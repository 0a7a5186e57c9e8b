use clap::Parser;
use std::net::{Ipv4Addr, SocketAddr};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use dns_forwarder::server::{ServerConfig, UdpServer};
use dns_forwarder::transactions::evict_expired_task;

fn begin_logging() {
    // LOG_LEVEL=debug turns on verbose diagnostics; any other value,
    // or none, gets the default.  RUST_LOG, if set, takes precedence.
    let default_level = match std::env::var("LOG_LEVEL") {
        Ok(value) if value == "debug" => "debug",
        _ => "info",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// the doc comments for this struct turn into the CLI help text
#[derive(Debug, Clone, Parser)]
/// A forwarding DNS proxy.
///
/// relayed accepts DNS queries over UDP, relays them octet-for-octet
/// to an upstream resolver, and routes the replies back to the right
/// client by transaction ID.  It resolves nothing itself: no zones, no
/// cache, no recursion.
struct Args {
    /// Interface to listen on (in `ip:port` form)
    #[clap(short, long, value_parser, default_value_t = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8085)), env = "RELAYED_INTERFACE")]
    interface: SocketAddr,

    /// Upstream resolver to forward queries to (in `ip:port` form)
    #[clap(short, long, value_parser, default_value_t = SocketAddr::from((Ipv4Addr::new(1, 1, 1, 1), 53)), env = "RELAYED_UPSTREAM")]
    upstream: SocketAddr,

    /// How many seconds handling one datagram may take; an unanswered
    /// transaction is also dropped after this long
    #[clap(long, value_parser, default_value_t = 5, env = "RELAYED_TIMEOUT")]
    timeout: u64,

    /// How many seconds shutdown waits for in-flight datagrams
    #[clap(long, value_parser, default_value_t = 5, env = "RELAYED_SHUTDOWN_GRACE")]
    shutdown_grace: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    begin_logging();

    let config = ServerConfig {
        address: args.interface.ip(),
        port: args.interface.port(),
        packet_timeout: Duration::from_secs(args.timeout),
        shutdown_grace: Duration::from_secs(args.shutdown_grace),
        upstream: args.upstream,
        ..ServerConfig::default()
    };

    let (errors_tx, mut errors) = mpsc::channel(10);

    tracing::info!(interface = %args.interface, "binding DNS UDP socket");
    let server = match UdpServer::new(config, errors_tx).await {
        Ok(server) => Arc::new(server),
        Err(error) => {
            tracing::error!(?error, "could not bind DNS UDP socket");
            process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();

    let transaction_ttl = Duration::from_secs(args.timeout);
    tokio::spawn(evict_expired_task(
        server.transactions(),
        transaction_ttl,
        transaction_ttl,
        shutdown.clone(),
    ));

    tokio::spawn(async move {
        while let Some(error) = errors.recv().await {
            tracing::warn!(%error, "dropped datagram");
        }
    });

    let listener = {
        let server = Arc::clone(&server);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server.run(shutdown).await })
    };

    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(stream) => stream,
        Err(error) => {
            tracing::error!(?error, "could not subscribe to SIGINT");
            process::exit(1);
        }
    };
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(error) => {
            tracing::error!(?error, "could not subscribe to SIGTERM");
            process::exit(1);
        }
    };

    tokio::select! {
        _ = sigint.recv() => tracing::info!("received SIGINT, terminating"),
        _ = sigterm.recv() => tracing::info!("received SIGTERM, terminating"),
    }

    shutdown.cancel();

    // run() enforces the grace period itself; all that is left is to
    // wait for it to come back
    if let Err(error) = listener.await {
        tracing::error!(?error, "listener task failed");
    }
    tracing::info!("shutdown complete");
}
