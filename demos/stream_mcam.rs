//! Stream one mcam and report statistics
//!
//! Run with: cargo run --example stream_mcam [HOST_ADDR] [PORT] [SECONDS]
//!
//! Without HOST_ADDR an in-process simulated host is started. The first
//! discovered mcam is streamed to a receiver on PORT (default 9002) for
//! SECONDS (default 5), then the receiver is closed and the host
//! disconnected.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mcam_stream::{CameraHost, HostConfig, McamClient, StreamFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mcam_stream=info".parse()?),
        )
        .init();

    // Keep a local host alive for the whole run if none was given
    let (host_addr, _local_host) = match args.get(1) {
        Some(addr) => (addr.parse::<SocketAddr>()?, None),
        None => {
            let host = CameraHost::bind(
                HostConfig::ephemeral()
                    .mcams([1, 2, 3])
                    .frame_interval(Duration::from_millis(33)),
            )
            .await?;
            (host.local_addr(), Some(host))
        }
    };
    let port: u16 = match args.get(2) {
        Some(p) => p.parse()?,
        None => 9002,
    };
    let seconds: u64 = match args.get(3) {
        Some(s) => s.parse()?,
        None => 5,
    };

    let client = McamClient::new();
    client
        .on_new_camera(|mcam| println!("Discovered {}", mcam))
        .await;
    client.connect(host_addr).await?;

    let mcam = match client.cameras().await.first() {
        Some(mcam) => mcam.id,
        None => {
            eprintln!("Host {} serves no mcams", host_addr);
            client.disconnect(host_addr).await?;
            return Ok(());
        }
    };

    let receiver = client.open_receiver(port, 16).await?;
    let frames = Arc::new(AtomicU64::new(0));
    let bytes = Arc::new(AtomicU64::new(0));
    {
        let frames = Arc::clone(&frames);
        let bytes = Arc::clone(&bytes);
        receiver.register_callback(move |_meta, payload| {
            frames.fetch_add(1, Ordering::Relaxed);
            bytes.fetch_add(payload.len() as u64, Ordering::Relaxed);
        });
    }

    client.start_stream(mcam, port, StreamFilter::Unfiltered).await?;
    println!("Streaming mcam {} to port {} for {}s", mcam, port, seconds);

    for _ in 0..seconds {
        tokio::time::sleep(Duration::from_secs(1)).await;
        println!(
            "frames={} bytes={}",
            frames.load(Ordering::Relaxed),
            bytes.load(Ordering::Relaxed)
        );
    }

    let stats = receiver.stats();
    client.close_receiver(port).await?;
    client.disconnect(host_addr).await?;

    println!();
    println!("datagrams:     {}", stats.datagrams);
    println!("delivered:     {}", stats.frames_delivered);
    println!("dropped:       {}", stats.frames_dropped());
    println!("malformed:     {}", stats.malformed);
    if let Some(stream) = stats.stream(mcam) {
        println!("framerate:     {:.1} fps", stream.framerate());
        println!("bitrate:       {} bps", stream.bitrate());
        println!("sequence gaps: {}", stream.sequence_gaps);
    }

    Ok(())
}
