//! Test-pattern capture sources
//!
//! Stand-ins for real camera and microphone hardware. Each source runs its
//! own capture thread while started, the same way a platform capture
//! callback would, and exposes a [`SourceProbe`] so tests and demos can see
//! what the supervisor asked it to do.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;

use super::{AudioSink, CameraSource, Facing, FrameSink, MicrophoneSource};
use crate::codec::{Plane, RawFrame};
use crate::error::{Error, Result};
use crate::AUDIO_SAMPLE_RATE;

const FACING_FRONT: u8 = 1;
const FACING_BACK: u8 = 2;

/// Observable state of a synthetic source
#[derive(Debug, Default)]
pub struct SourceProbe {
    running: AtomicBool,
    starts: AtomicU64,
    stops: AtomicU64,
    emitted: AtomicU64,
    facing: AtomicU8,
}

impl SourceProbe {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of successful `start` calls
    pub fn starts(&self) -> u64 {
        self.starts.load(Ordering::Relaxed)
    }

    /// Number of `stop` calls that stopped a running source
    pub fn stops(&self) -> u64 {
        self.stops.load(Ordering::Relaxed)
    }

    /// Frames or chunks emitted so far
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Facing of the current or most recent camera binding
    pub fn facing(&self) -> Option<Facing> {
        match self.facing.load(Ordering::Relaxed) {
            FACING_FRONT => Some(Facing::Front),
            FACING_BACK => Some(Facing::Back),
            _ => None,
        }
    }
}

/// A running capture thread
struct Worker {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl Worker {
    fn spawn(name: &str, body: impl FnOnce(Arc<AtomicBool>) + Send + 'static) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(flag))?;
        Ok(Self { stop, thread })
    }

    fn join(self) {
        self.stop.store(true, Ordering::Release);
        if self.thread.join().is_err() {
            tracing::error!("Synthetic capture thread panicked");
        }
    }
}

/// Build one YUV 4:2:0 test-pattern frame
///
/// Luma is a diagonal gradient that shifts with `frame_number`. Chroma is
/// tinted by facing so a switch is visible in the output.
pub fn test_pattern(frame_number: u64, width: u32, height: u32, facing: Facing) -> RawFrame {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    let base = (frame_number % 256) as u8;

    let mut y = vec![0u8; w * h];
    for row in 0..h {
        for col in 0..w {
            y[row * w + col] = base.wrapping_add(((row + col) % 256) as u8);
        }
    }

    let (u, v) = match facing {
        Facing::Front => (96, 160),
        Facing::Back => (160, 96),
    };

    RawFrame::yuv420(
        width,
        height,
        Plane::packed(y, w),
        Plane::packed(vec![u; cw * ch], cw),
        Plane::packed(vec![v; cw * ch], cw),
    )
}

/// Build one chunk of 16-bit little-endian mono PCM
///
/// A 440 Hz tone at 30% amplitude, continuous across chunks.
pub fn tone_chunk(chunk_number: u64, samples_per_chunk: usize) -> Bytes {
    let frequency = 440.0;
    let rate = f64::from(AUDIO_SAMPLE_RATE);
    let mut pcm = Vec::with_capacity(samples_per_chunk * 2);

    for i in 0..samples_per_chunk {
        let t = (chunk_number as f64 * samples_per_chunk as f64 + i as f64) / rate;
        let value = (2.0 * std::f64::consts::PI * frequency * t).sin() * 0.3;
        let sample = (value * f64::from(i16::MAX)) as i16;
        pcm.extend_from_slice(&sample.to_le_bytes());
    }

    Bytes::from(pcm)
}

/// Camera producing [`test_pattern`] frames at a fixed rate
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    interval: Duration,
    probe: Arc<SourceProbe>,
    worker: Option<Worker>,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            interval: Duration::from_millis(1000 / u64::from(fps.max(1))),
            probe: Arc::new(SourceProbe::default()),
            worker: None,
        }
    }

    pub fn probe(&self) -> Arc<SourceProbe> {
        Arc::clone(&self.probe)
    }
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new(320, 240, 15)
    }
}

impl CameraSource for SyntheticCamera {
    fn start(&mut self, facing: Facing, sink: FrameSink) -> Result<()> {
        if self.worker.is_some() {
            return Err(Error::CaptureBusy("synthetic camera already bound".into()));
        }

        let (width, height, interval) = (self.width, self.height, self.interval);
        let probe = Arc::clone(&self.probe);
        self.worker = Some(Worker::spawn("synthetic-camera", move |stop| {
            let mut frame_number = 0u64;
            while !stop.load(Ordering::Acquire) && !sink.is_closed() {
                sink.emit(test_pattern(frame_number, width, height, facing));
                probe.emitted.fetch_add(1, Ordering::Relaxed);
                frame_number += 1;
                thread::sleep(interval);
            }
        })?);

        let code = match facing {
            Facing::Front => FACING_FRONT,
            Facing::Back => FACING_BACK,
        };
        self.probe.facing.store(code, Ordering::Relaxed);
        self.probe.starts.fetch_add(1, Ordering::Relaxed);
        self.probe.running.store(true, Ordering::Release);
        tracing::debug!(facing = %facing, width, height, "Synthetic camera started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.join();
            self.probe.stops.fetch_add(1, Ordering::Relaxed);
            self.probe.running.store(false, Ordering::Release);
            tracing::debug!("Synthetic camera stopped");
        }
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Microphone producing a [`tone_chunk`] every 20 ms
pub struct SyntheticMicrophone {
    samples_per_chunk: usize,
    probe: Arc<SourceProbe>,
    worker: Option<Worker>,
}

impl SyntheticMicrophone {
    /// 20 ms of audio per chunk
    pub const CHUNK_DURATION: Duration = Duration::from_millis(20);

    pub fn new() -> Self {
        Self {
            samples_per_chunk: AUDIO_SAMPLE_RATE as usize / 50,
            probe: Arc::new(SourceProbe::default()),
            worker: None,
        }
    }

    pub fn probe(&self) -> Arc<SourceProbe> {
        Arc::clone(&self.probe)
    }
}

impl Default for SyntheticMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

impl MicrophoneSource for SyntheticMicrophone {
    fn start(&mut self, sink: AudioSink) -> Result<()> {
        if self.worker.is_some() {
            return Err(Error::CaptureBusy("synthetic microphone already recording".into()));
        }

        let samples = self.samples_per_chunk;
        let probe = Arc::clone(&self.probe);
        self.worker = Some(Worker::spawn("synthetic-microphone", move |stop| {
            let mut chunk_number = 0u64;
            while !stop.load(Ordering::Acquire) {
                if !sink.emit(tone_chunk(chunk_number, samples)) {
                    break;
                }
                probe.emitted.fetch_add(1, Ordering::Relaxed);
                chunk_number += 1;
                thread::sleep(Self::CHUNK_DURATION);
            }
        })?);

        self.probe.starts.fetch_add(1, Ordering::Relaxed);
        self.probe.running.store(true, Ordering::Release);
        tracing::debug!(sample_rate = AUDIO_SAMPLE_RATE, "Synthetic microphone started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.join();
            self.probe.stops.fetch_add(1, Ordering::Relaxed);
            self.probe.running.store(false, Ordering::Release);
            tracing::debug!("Synthetic microphone stopped");
        }
    }
}

impl Drop for SyntheticMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}
