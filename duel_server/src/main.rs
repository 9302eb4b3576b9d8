// CLI entry point for the duel server.
//
// Parses options (each also settable through a `DUEL_*` environment
// variable), installs the tracing subscriber, and runs the listener until it
// fails. See `server.rs` for the networking architecture.
//
// Exit status is 1 if the listener cannot bind or an accept fails; no
// per-connection failure stops the process.

use std::net::IpAddr;
use std::time::Duration;

use clap::Parser;
use duel_server::relay::DEFAULT_QUEUE_CAPACITY;
use duel_server::server::{DEFAULT_PORT, ServerConfig, start_server};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "duel-server", version, about = "Two-player matchmaking and key-relay server")]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "DUEL_BIND", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Port to listen on (0 picks a free port).
    #[arg(short, long, env = "DUEL_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Keys buffered per player before the oldest is dropped.
    #[arg(long, env = "DUEL_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Pause after relaying an empty key, in milliseconds.
    #[arg(long, env = "DUEL_FORWARD_INTERVAL_MS", default_value_t = 500)]
    forward_interval_ms: u64,

    /// Time a new connection has to send its first message, in seconds.
    #[arg(long, env = "DUEL_HANDSHAKE_TIMEOUT_SECS", default_value_t = 30)]
    handshake_timeout_secs: u64,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, env = "DUEL_LOG", default_value = "info")]
    log_level: String,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind: self.bind,
            port: self.port,
            queue_capacity: self.queue_capacity,
            forward_interval: Duration::from_millis(self.forward_interval_ms),
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let (handle, addr) = match start_server(cli.server_config()) {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    };
    info!(%addr, "duel server ready");

    if let Err(e) = handle.wait() {
        error!(error = %e, "listener stopped");
        std::process::exit(1);
    }
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
