//! RTMP relay server example
//!
//! Run with: cargo run --example relay_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example relay_server                    # binds to 0.0.0.0:1935
//!   cargo run --example relay_server localhost          # binds to 127.0.0.1:1935
//!   cargo run --example relay_server 127.0.0.1:1936     # binds to 127.0.0.1:1936
//!
//! ## Publishing
//!
//!   ffmpeg -re -i input.mp4 -c copy -f flv rtmp://localhost/live/test_key
//!
//! ## Playing
//!
//!   ffplay rtmp://localhost/live/test_key
//!
//! Players that join mid-stream get metadata, codec configuration and the
//! latest keyframe before live frames.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::broadcast;

use rtmp_relay::{RegistryEvent, RelayServer, ServerConfig};

/// Parse bind address from command line argument.
///
/// Accepts "localhost", "localhost:PORT", "IP" or "IP:PORT".
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    const DEFAULT_PORT: u16 = 1935;

    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: relay_server [BIND_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR    Address to bind to (default: 0.0.0.0:1935)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let mut config = ServerConfig::default();
    if let Some(addr_str) = args.get(1) {
        match parse_bind_addr(addr_str) {
            Ok(addr) => config = config.bind(addr),
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        }
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rtmp_relay=info".parse()?)
                .add_directive("relay_server=info".parse()?),
        )
        .init();

    let server = RelayServer::new(config);
    let registry = server.registry().clone();

    // Log publish sessions as they come and go
    let mut events = registry.events();
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            match event {
                RegistryEvent::PublishStarted { key, session_id } => {
                    tracing::info!(stream = %key, session_id, "Stream is live");
                }
                RegistryEvent::PublishStopped {
                    key,
                    session_id,
                    status,
                } => {
                    tracing::info!(stream = %key, session_id, status = ?status, "Stream ended");
                }
            }
        }
    });

    // Periodic summary
    let stats_registry = registry.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            let stats = stats_registry.stats().await;
            tracing::info!(
                streams = stats.total_streams,
                live = stats.active_streams,
                viewers = stats.total_viewers,
                "Relay stats"
            );
        }
    });

    println!("Starting RTMP relay on {}", server.bind_addr());

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    println!("Relay stopped");
    Ok(())
}
