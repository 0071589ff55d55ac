//! Service configuration

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

/// Default MJPEG port
pub const DEFAULT_VIDEO_PORT: u16 = 8081;

/// Default WebSocket audio/control port
pub const DEFAULT_CONTROL_PORT: u16 = 8082;

/// Default JPEG quality factor
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Relay and supervisor configuration options
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Address for the MJPEG video endpoint
    pub video_addr: SocketAddr,

    /// Address for the WebSocket audio/control endpoint
    pub control_addr: SocketAddr,

    /// Maximum concurrent viewers per relay (0 = unlimited)
    pub max_viewers: usize,

    /// Enable TCP_NODELAY on accepted sockets
    pub tcp_nodelay: bool,

    /// JPEG quality factor (1..=100)
    pub jpeg_quality: u8,

    /// Outbound parts queued per video viewer before frames are skipped
    pub video_queue_depth: usize,

    /// Outbound messages queued per control viewer before audio is skipped
    pub control_queue_depth: usize,

    /// Microphone chunks buffered between the source and the relay
    pub audio_queue_depth: usize,

    /// Control events buffered for the coordinator; a full queue stalls
    /// the reading connection
    pub event_queue_depth: usize,

    /// Delay between the last viewer leaving and capture stopping
    pub idle_grace: Duration,

    /// Longest silence tolerated from connected viewers
    pub liveness_window: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            video_addr: SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::UNSPECIFIED,
                DEFAULT_VIDEO_PORT,
            )),
            control_addr: SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::UNSPECIFIED,
                DEFAULT_CONTROL_PORT,
            )),
            max_viewers: 0,
            tcp_nodelay: true, // frames are latency-sensitive
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            video_queue_depth: 4,
            control_queue_depth: 64,
            audio_queue_depth: 32,
            event_queue_depth: 64,
            idle_grace: Duration::from_secs(10),
            liveness_window: Duration::from_secs(15),
        }
    }
}

impl MonitorConfig {
    /// Config bound to loopback on OS-assigned ports
    pub fn loopback() -> Self {
        let any = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0));
        Self {
            video_addr: any,
            control_addr: any,
            ..Default::default()
        }
    }

    /// Set the video endpoint address
    pub fn video_addr(mut self, addr: SocketAddr) -> Self {
        self.video_addr = addr;
        self
    }

    /// Set the control endpoint address
    pub fn control_addr(mut self, addr: SocketAddr) -> Self {
        self.control_addr = addr;
        self
    }

    /// Set maximum viewers per relay
    pub fn max_viewers(mut self, max: usize) -> Self {
        self.max_viewers = max;
        self
    }

    /// Set JPEG quality, clamped to 1..=100
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Set the per-viewer video queue depth (at least 1)
    pub fn video_queue_depth(mut self, depth: usize) -> Self {
        self.video_queue_depth = depth.max(1);
        self
    }

    /// Set the per-viewer control queue depth (at least 1)
    pub fn control_queue_depth(mut self, depth: usize) -> Self {
        self.control_queue_depth = depth.max(1);
        self
    }

    /// Set the control event queue depth (at least 1)
    pub fn event_queue_depth(mut self, depth: usize) -> Self {
        self.event_queue_depth = depth.max(1);
        self
    }

    /// Set the idle grace window
    pub fn idle_grace(mut self, grace: Duration) -> Self {
        self.idle_grace = grace;
        self
    }

    /// Set the viewer liveness window
    pub fn liveness_window(mut self, window: Duration) -> Self {
        self.liveness_window = window;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();

        assert_eq!(config.video_addr.port(), 8081);
        assert_eq!(config.control_addr.port(), 8082);
        assert_eq!(config.max_viewers, 0);
        assert_eq!(config.jpeg_quality, DEFAULT_JPEG_QUALITY);
        assert_eq!(config.idle_grace, Duration::from_secs(10));
        assert_eq!(config.liveness_window, Duration::from_secs(15));
        assert!(config.tcp_nodelay);
        assert_eq!(config.event_queue_depth, 64);
    }

    #[test]
    fn test_loopback() {
        let config = MonitorConfig::loopback();

        assert!(config.video_addr.ip().is_loopback());
        assert_eq!(config.video_addr.port(), 0);
        assert_eq!(config.control_addr.port(), 0);
    }

    #[test]
    fn test_builder_quality_clamped() {
        assert_eq!(MonitorConfig::default().jpeg_quality(0).jpeg_quality, 1);
        assert_eq!(MonitorConfig::default().jpeg_quality(200).jpeg_quality, 100);
        assert_eq!(MonitorConfig::default().jpeg_quality(85).jpeg_quality, 85);
    }

    #[test]
    fn test_builder_queue_depth_minimum() {
        let config = MonitorConfig::default()
            .video_queue_depth(0)
            .control_queue_depth(0)
            .event_queue_depth(0);

        assert_eq!(config.video_queue_depth, 1);
        assert_eq!(config.control_queue_depth, 1);
        assert_eq!(config.event_queue_depth, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let video: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        let control: SocketAddr = "127.0.0.1:9002".parse().unwrap();
        let config = MonitorConfig::default()
            .video_addr(video)
            .control_addr(control)
            .max_viewers(8)
            .idle_grace(Duration::from_secs(3))
            .liveness_window(Duration::from_secs(6));

        assert_eq!(config.video_addr, video);
        assert_eq!(config.control_addr, control);
        assert_eq!(config.max_viewers, 8);
        assert_eq!(config.idle_grace, Duration::from_secs(3));
        assert_eq!(config.liveness_window, Duration::from_secs(6));
    }
}
