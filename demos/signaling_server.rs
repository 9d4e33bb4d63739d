//! Standalone WebSocket signaling server
//!
//! Run with: cargo run --example signaling_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example signaling_server                  # binds to 0.0.0.0:8765
//!   cargo run --example signaling_server localhost        # binds to 127.0.0.1:8765
//!   cargo run --example signaling_server 127.0.0.1:9000   # binds to 127.0.0.1:9000
//!
//! ## Protocol
//!
//! Each client first joins a session with an explicit role:
//!
//! ```text
//!   > {"join":{"session":"s1","role":"sender"}}
//!   < {"joined":{"session":"s1","participant":1,"role":"sender"}}
//! ```
//!
//! Every later message is forwarded verbatim to the other member of the
//! session, e.g. `{"offer":{"sdp":"...","type":"offer"}}`.
//!
//! With websocat:
//!   websocat ws://localhost:8765

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rtc_detect::server::config::DEFAULT_PORT;
use rtc_detect::{ServerConfig, SignalingServer};

/// Parse bind address from command line argument.
///
/// Accepts "localhost", "localhost:PORT", "IP" or "IP:PORT".
fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
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
    eprintln!("Usage: signaling_server [BIND_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR    Address to bind to (default: 0.0.0.0:{})", DEFAULT_PORT);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let mut config = ServerConfig::default();
    if let Some(arg) = args.get(1) {
        match parse_bind_addr(arg) {
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
                .add_directive("rtc_detect=debug".parse()?)
                .add_directive("signaling_server=debug".parse()?),
        )
        .init();

    println!("Starting signaling server on ws://{}", config.bind_addr);
    println!("Join with: {{\"join\":{{\"session\":\"s1\",\"role\":\"sender\"}}}}");
    println!();

    let server = Arc::new(SignalingServer::new(config));

    // Periodic stats
    let stats_server = Arc::clone(&server);
    let stats_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let server_stats = stats_server.stats();
            let relay_stats = stats_server.relay().stats().await;
            tracing::info!(
                active = server_stats.active_connections,
                total = server_stats.total_connections,
                rejected = server_stats.rejected_connections,
                sessions = relay_stats.sessions,
                participants = relay_stats.participants,
                relayed = relay_stats.messages_relayed,
                "Server stats"
            );
        }
    });

    let result = server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await;

    stats_task.abort();

    if let Err(e) = result {
        eprintln!("Server error: {}", e);
    }

    Ok(())
}
