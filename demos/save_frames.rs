//! Save received frames to disk
//!
//! Run with: cargo run --example save_frames [OUT_DIR] [FRAMES]
//!
//! Streams mcam 1 of an in-process simulated host and writes each frame
//! as `<mcam>_<sequence>.jpg` into OUT_DIR (default `frames/`). File I/O
//! runs on a blocking worker so the receiver's delivery task never waits
//! on the disk.

use std::path::PathBuf;
use std::time::Duration;

use mcam_stream::{CameraHost, FrameHandoff, HostConfig, McamClient, McamId, StreamFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let out_dir = PathBuf::from(args.get(1).map(String::as_str).unwrap_or("frames"));
    let limit: u64 = match args.get(2) {
        Some(n) => n.parse()?,
        None => 30,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mcam_stream=info".parse()?),
        )
        .init();

    std::fs::create_dir_all(&out_dir)?;

    let host = CameraHost::bind(
        HostConfig::ephemeral()
            .mcams([1])
            .frame_interval(Duration::from_millis(33))
            .synthetic_frame_size(200 * 1024),
    )
    .await?;

    let client = McamClient::new();
    client.connect(host.local_addr()).await?;
    let receiver = client.open_receiver(0, 16).await?;
    let port = receiver.port();

    let dir = out_dir.clone();
    let mut written = 0u64;
    let handoff = FrameHandoff::spawn(64, move |frame| {
        if written >= limit {
            return;
        }
        let path = dir.join(format!("{}_{:06}.jpg", frame.mcam_id(), frame.metadata.sequence));
        match std::fs::write(&path, &frame.payload) {
            Ok(()) => written += 1,
            Err(e) => eprintln!("write {}: {}", path.display(), e),
        }
    });
    receiver.register_callback(handoff.callback());

    client.start_stream(McamId(1), port, StreamFilter::FourKOnly).await?;
    println!("Saving up to {} frames to {}", limit, out_dir.display());

    tokio::time::sleep(Duration::from_millis(33 * limit * 2 + 500)).await;

    client.close_receiver(port).await?;
    let dropped = handoff.finish().await;
    client.disconnect(host.local_addr()).await?;
    host.shutdown().await;

    println!("Done; {} frames dropped at the handoff", dropped);
    Ok(())
}
