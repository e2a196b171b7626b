//! packet-peer: a multiplexed TCP test peer
//!
//! Serves one of the built-in packet handlers:
//! - `echo`: length-delimited packets echoed back
//! - `ping`: line-based ping/pong
//!
//! Configuration via CLI arguments or TOML file. Ctrl+C or SIGTERM stops
//! the server once in-flight packets are answered.

use packet_peer::config::{Config, ProtocolType};
use packet_peer::protocols::{EchoHandler, PingHandler};
use packet_peer::{Handler, Server, Shutdown};
use std::thread;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        protocol = ?config.protocol,
        max_clients = config.max_clients,
        slot_size = config.slot_size(),
        write_policy = ?config.write_policy,
        "Starting packet-peer"
    );

    let shutdown = Shutdown::new();
    spawn_signal_listener(shutdown.clone())?;

    match config.protocol {
        ProtocolType::Echo => serve(config, EchoHandler, shutdown),
        ProtocolType::Ping => serve(config, PingHandler, shutdown),
    }
}

fn serve<H: Handler>(
    config: Config,
    handler: H,
    shutdown: Shutdown,
) -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::bind(config, handler)?;
    let stats = server.run(shutdown)?;

    info!(
        accepted = stats.accepted,
        packets = stats.packets,
        unsupported = stats.unsupported,
        "Server stopped"
    );
    Ok(())
}

/// Trigger `shutdown` on Ctrl+C or SIGTERM, from a dedicated thread.
fn spawn_signal_listener(shutdown: Shutdown) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            runtime.block_on(async {
                let mut terminate = match tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate(),
                ) {
                    Ok(signal) => signal,
                    Err(e) => {
                        error!(error = %e, "Failed to install SIGTERM handler");
                        return;
                    }
                };

                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            error!(error = %e, "Failed to listen for Ctrl+C");
                            return;
                        }
                        info!("Received Ctrl+C, shutting down gracefully");
                    }
                    _ = terminate.recv() => {
                        info!("Received SIGTERM, shutting down gracefully");
                    }
                }

                shutdown.trigger();
            });
        })?;

    Ok(())
}
