//! Monitor relay with synthetic capture sources
//!
//! Run with: cargo run --example monitor_server [VIDEO_ADDR] [CONTROL_ADDR]
//!
//! Examples:
//!   cargo run --example monitor_server    # 0.0.0.0:8081 and 0.0.0.0:8082
//!   cargo run --example monitor_server 127.0.0.1:9081 127.0.0.1:9082
//!
//! ## Watching
//!
//! Video (any MJPEG-capable player or a browser):
//!   ffplay http://localhost:8081/
//!
//! Audio/control (e.g. with websocat):
//!   websocat ws://localhost:8082/
//!   {"type":"start"}
//!   {"type":"switchCamera","data":{"facing":"front"}}
//!   {"type":"audioOn"}
//!
//! Audio frames are 16 kHz mono s16le PCM.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use monitor_relay::platform::synthetic::{SyntheticCamera, SyntheticMicrophone};
use monitor_relay::platform::{CapabilitySet, FixedAddress, NetworkMonitor};
use monitor_relay::{CaptureDevices, MonitorConfig, MonitorService, Platform};

fn print_usage() {
    eprintln!("Usage: monitor_server [VIDEO_ADDR] [CONTROL_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  VIDEO_ADDR      MJPEG endpoint (default: 0.0.0.0:8081)");
    eprintln!("  CONTROL_ADDR    WebSocket endpoint (default: 0.0.0.0:8082)");
}

fn parse_addr(arg: Option<&String>) -> Result<Option<SocketAddr>, String> {
    match arg {
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|_| format!("Invalid address '{}'. Expected IP:PORT", s)),
        None => Ok(None),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let mut config = MonitorConfig::default();
    match (parse_addr(args.get(1)), parse_addr(args.get(2))) {
        (Ok(video), Ok(control)) => {
            if let Some(addr) = video {
                config = config.video_addr(addr);
            }
            if let Some(addr) = control {
                config = config.control_addr(addr);
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("monitor_relay=debug".parse()?)
                .add_directive("monitor_server=debug".parse()?),
        )
        .init();

    let camera = SyntheticCamera::new(640, 480, 15);
    let camera_probe = camera.probe();
    let network = Arc::new(NetworkMonitor::new(true));

    let service = MonitorService::new(
        config,
        CaptureDevices::new(camera, SyntheticMicrophone::new()),
        Platform {
            capabilities: Arc::new(CapabilitySet::all()),
            network: network.clone(),
            address: Arc::new(FixedAddress::new("127.0.0.1")),
        },
    );

    let addrs = service.start().await?;
    println!("Video:   http://{}/", addrs.video);
    println!("Control: ws://{}/", addrs.control);
    println!();

    let mut report = tokio::time::interval(Duration::from_secs(10));
    report.tick().await;

    loop {
        tokio::select! {
            _ = report.tick() => {
                let status = service.status().await;
                tracing::info!(
                    video_viewers = status.video_viewers,
                    control_viewers = status.control_viewers,
                    camera_running = camera_probe.is_running(),
                    frames = camera_probe.emitted(),
                    video_drop_ratio = status.video.drop_ratio(),
                    "Status"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    service.stop().await;
    Ok(())
}
