//! Simulated camera host
//!
//! Run with: cargo run --example camera_host [BIND_ADDR] [MCAM_COUNT]
//!
//! Examples:
//!   cargo run --example camera_host                      # 127.0.0.1:9999, 4 mcams
//!   cargo run --example camera_host 0.0.0.0:9999 16      # 16 mcams on all interfaces
//!
//! Every mcam produces a synthetic frame about 30 times a second,
//! alternating between 4K and HD. Connect with the `stream_mcam` example.

use std::net::SocketAddr;
use std::time::Duration;

use mcam_stream::protocol::constants::DEFAULT_CONTROL_PORT;
use mcam_stream::{CameraHost, HostConfig, McamId};

fn print_usage() {
    eprintln!("Usage: camera_host [BIND_ADDR] [MCAM_COUNT]");
    eprintln!();
    eprintln!("  BIND_ADDR    address to listen on (default 127.0.0.1:{})", DEFAULT_CONTROL_PORT);
    eprintln!("  MCAM_COUNT   number of sensors to serve (default 4)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "-h" || a == "--help") {
        print_usage();
        return Ok(());
    }

    let bind_addr: SocketAddr = match args.get(1) {
        Some(addr) => match addr.parse() {
            Ok(addr) => addr,
            Err(e) => {
                eprintln!("Error: invalid address '{}': {}", addr, e);
                print_usage();
                std::process::exit(1);
            }
        },
        None => SocketAddr::from(([127, 0, 0, 1], DEFAULT_CONTROL_PORT)),
    };
    let mcam_count: u32 = match args.get(2) {
        Some(n) => n.parse()?,
        None => 4,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mcam_stream=debug".parse()?)
                .add_directive("camera_host=debug".parse()?),
        )
        .init();

    let config = HostConfig::with_addr(bind_addr)
        .mcams(1..=mcam_count)
        .frame_interval(Duration::from_millis(33))
        .synthetic_frame_size(120 * 1024);

    let host = CameraHost::bind(config).await?;
    println!("Camera host {} listening on {}", host.camera_id(), host.local_addr());
    println!("Serving {} mcams; Ctrl+C to stop", mcam_count);

    // Hot-plug one more sensor after a while so clients see an announcement
    let mut hotplug = tokio::time::interval(Duration::from_secs(10));
    hotplug.tick().await;
    let mut next_mcam = mcam_count + 1;

    loop {
        tokio::select! {
            _ = hotplug.tick() => {
                if host.announce_mcam(McamId(next_mcam)).await {
                    println!("mcam {} online", next_mcam);
                }
                next_mcam += 1;
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    for stream in host.streams().await {
        println!("stream mcam {} -> {} ({:?})", stream.mcam, stream.target, stream.filter);
    }
    host.shutdown().await;
    Ok(())
}
