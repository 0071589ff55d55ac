//! End-to-end tests: real sockets, synthetic capture sources

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use monitor_relay::platform::synthetic::{SourceProbe, SyntheticCamera, SyntheticMicrophone};
use monitor_relay::platform::{Capability, CapabilitySet, FixedAddress, NetworkMonitor};
use monitor_relay::protocol::{BOUNDARY, RESPONSE_HEAD};
use monitor_relay::{CaptureDevices, MonitorConfig, MonitorService, Platform, AUDIO_SAMPLE_RATE};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

struct Rig {
    service: MonitorService,
    video: SocketAddr,
    control: SocketAddr,
    camera: Arc<SourceProbe>,
    microphone: Arc<SourceProbe>,
    capabilities: Arc<CapabilitySet>,
    network: Arc<NetworkMonitor>,
}

async fn rig(config: MonitorConfig) -> Rig {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let camera = SyntheticCamera::new(32, 24, 50);
    let microphone = SyntheticMicrophone::new();
    let (camera_probe, mic_probe) = (camera.probe(), microphone.probe());
    let capabilities = Arc::new(CapabilitySet::all());
    let network = Arc::new(NetworkMonitor::new(true));

    let service = MonitorService::new(
        config,
        CaptureDevices::new(camera, microphone),
        Platform {
            capabilities: capabilities.clone(),
            network: network.clone(),
            address: Arc::new(FixedAddress::new("192.168.7.7")),
        },
    );
    let addrs = service.start().await.unwrap();

    Rig {
        service,
        video: addrs.video,
        control: addrs.control,
        camera: camera_probe,
        microphone: mic_probe,
        capabilities,
        network,
    }
}

fn config() -> MonitorConfig {
    MonitorConfig::loopback()
        .idle_grace(Duration::from_millis(300))
        .liveness_window(Duration::from_secs(30))
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let result = timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

async fn control_client(addr: SocketAddr) -> Client {
    let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
    let hello = next_json(&mut ws).await;
    assert_eq!(hello["type"], "ipAddress");
    ws
}

/// Next text frame as JSON, skipping audio
async fn next_json(ws: &mut Client) -> serde_json::Value {
    loop {
        let msg = timeout(WAIT, ws.next())
            .await
            .expect("no message")
            .expect("stream ended")
            .expect("read error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn command(ws: &mut Client, json: &str) -> serde_json::Value {
    ws.send(Message::text(json)).await.unwrap();
    next_json(ws).await
}

async fn video_client(addr: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

    let mut head = vec![0u8; RESPONSE_HEAD.len()];
    timeout(WAIT, stream.read_exact(&mut head))
        .await
        .expect("no response head")
        .unwrap();
    assert_eq!(head, RESPONSE_HEAD);
    stream
}

/// Read one multipart part and return its body
async fn read_part(stream: &mut TcpStream) -> Vec<u8> {
    let mut header = Vec::new();
    while !header.ends_with(b"\r\n\r\n") {
        let byte = timeout(WAIT, stream.read_u8())
            .await
            .expect("no part header")
            .unwrap();
        header.push(byte);
    }

    let header = String::from_utf8(header).unwrap();
    assert!(header.starts_with(&format!("{BOUNDARY}\r\n")));
    assert!(header.contains("Content-Type: image/jpeg\r\n"));
    let len: usize = header
        .lines()
        .find_map(|l| l.strip_prefix("Content-Length: "))
        .unwrap()
        .trim()
        .parse()
        .unwrap();

    let mut body = vec![0u8; len + 2];
    timeout(WAIT, stream.read_exact(&mut body))
        .await
        .expect("no part body")
        .unwrap();
    assert!(body.ends_with(b"\r\n"));
    body.truncate(len);
    body
}

#[tokio::test]
async fn test_start_streams_decodable_jpeg() {
    let rig = rig(config()).await;
    let mut control = control_client(rig.control).await;
    let mut video = video_client(rig.video).await;

    let reply = command(&mut control, r#"{"type":"start"}"#).await;
    assert_eq!(reply, serde_json::json!({"type": "status", "message": "Monitoring started"}));
    assert!(rig.camera.is_running());

    let jpeg = read_part(&mut video).await;
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    let image = image::load_from_memory_with_format(&jpeg, image::ImageFormat::Jpeg).unwrap();
    assert_eq!((image.width(), image.height()), (32, 24));

    // Keeps streaming
    read_part(&mut video).await;

    rig.service.stop().await;
    assert!(!rig.camera.is_running());
}

#[tokio::test]
async fn test_audio_on_streams_pcm() {
    let rig = rig(config()).await;
    let mut control = control_client(rig.control).await;

    let reply = command(&mut control, r#"{"type":"audioOn"}"#).await;
    assert_eq!(reply["message"], "Audio monitoring started");

    let chunk = loop {
        let msg = timeout(WAIT, control.next()).await.unwrap().unwrap().unwrap();
        if let Message::Binary(data) = msg {
            break data;
        }
    };
    assert_eq!(chunk.len(), AUDIO_SAMPLE_RATE as usize / 50 * 2);

    let reply = command(&mut control, r#"{"type":"audioOff"}"#).await;
    assert_eq!(reply["message"], "Audio monitoring stopped");
    assert!(!rig.microphone.is_running());

    rig.service.stop().await;
}

#[tokio::test]
async fn test_errors_are_per_command() {
    let rig = rig(config()).await;
    let mut control = control_client(rig.control).await;

    let reply = command(&mut control, r#"{"type":"bogus"}"#).await;
    assert_eq!(reply, serde_json::json!({"type": "error", "message": "Unknown command: bogus"}));

    let reply = command(&mut control, "not json").await;
    assert_eq!(reply["type"], "error");
    assert!(reply["message"]
        .as_str()
        .unwrap()
        .starts_with("Invalid JSON command: "));

    rig.capabilities.set(Capability::Camera, false);
    let reply = command(&mut control, r#"{"type":"switchCamera","data":{"facing":"front"}}"#).await;
    assert_eq!(reply["message"], "Camera permission not granted.");
    assert_eq!(rig.camera.starts(), 0);

    // The connection is still usable
    let reply = command(&mut control, r#"{"type":"getIp"}"#).await;
    assert_eq!(reply, serde_json::json!({"type": "ipAddress", "ip": "192.168.7.7"}));

    rig.service.stop().await;
}

#[tokio::test]
async fn test_command_burst_does_not_starve_other_viewers() {
    let rig = rig(config().event_queue_depth(4)).await;
    let mut noisy = control_client(rig.control).await;
    let mut quiet = control_client(rig.control).await;

    // The noisy viewer never reads its replies
    for _ in 0..500 {
        noisy.send(Message::text(r#"{"type":"bogus"}"#)).await.unwrap();
    }

    let reply = command(&mut quiet, r#"{"type":"getIp"}"#).await;
    assert_eq!(reply, serde_json::json!({"type": "ipAddress", "ip": "192.168.7.7"}));

    let reply = command(&mut quiet, r#"{"type":"start"}"#).await;
    assert_eq!(reply["message"], "Monitoring started");
    assert_eq!(rig.service.status().await.control_viewers, 2);

    rig.service.stop().await;
}

#[tokio::test]
async fn test_capture_stops_after_last_viewer_leaves() {
    let rig = rig(config()).await;
    let mut control = control_client(rig.control).await;
    command(&mut control, r#"{"type":"start"}"#).await;
    assert!(rig.camera.is_running());

    control.close(None).await.unwrap();
    drop(control);

    let camera = rig.camera.clone();
    eventually("camera release", move || !camera.is_running()).await;

    let status = rig.service.status().await;
    assert_eq!(status.control_viewers, 0);
    assert_eq!(status.capture.unwrap().viewers, 0);

    rig.service.stop().await;
}

#[tokio::test]
async fn test_network_loss_stops_capture() {
    let rig = rig(config()).await;
    let mut control = control_client(rig.control).await;
    command(&mut control, r#"{"type":"start"}"#).await;
    command(&mut control, r#"{"type":"audioOn"}"#).await;

    rig.network.set_connected(false);
    let (camera, microphone) = (rig.camera.clone(), rig.microphone.clone());
    eventually("capture release", move || {
        !camera.is_running() && !microphone.is_running()
    })
    .await;

    // Gated, but still acknowledged
    let reply = command(&mut control, r#"{"type":"start"}"#).await;
    assert_eq!(reply["message"], "Monitoring started");
    assert!(!rig.camera.is_running());

    rig.service.stop().await;
}

#[tokio::test]
async fn test_stop_closes_endpoints_and_restart_works() {
    let rig = rig(config()).await;
    let mut video = video_client(rig.video).await;
    let _control = control_client(rig.control).await;

    rig.service.stop().await;
    rig.service.stop().await;

    let mut buf = [0u8; 8];
    let read = timeout(WAIT, video.read(&mut buf)).await.unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
    assert_err!(TcpStream::connect(rig.video).await);

    let addrs = assert_ok!(rig.service.start().await);
    let mut control = control_client(addrs.control).await;
    let reply = command(&mut control, r#"{"type":"start"}"#).await;
    assert_eq!(reply["message"], "Monitoring started");
    assert!(rig.camera.is_running());
    assert_eq!(rig.camera.starts(), 1);

    rig.service.stop().await;
}
