//! Test infrastructure for seqplay integration tests.
//!
//! Provides a scripted producer, test devices and helpers for driving the
//! engine without real audio hardware.

#![allow(dead_code, unused_imports)]

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

pub use seqplay::bridge::ChunkSink;
pub use seqplay::codec::{self, ChannelPair};
pub use seqplay::config::EngineConfig;
pub use seqplay::device::{AudioDevice, ManualDevice};
pub use seqplay::event::{EngineEvent, Subscriber};
pub use seqplay::render::RenderCallback;
pub use seqplay::sequence::SequenceFormat;
pub use seqplay::sources::{BuildInfo, Generator};
pub use seqplay::{Engine, EngineError, PlayerState};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Engine timings scaled down so tests finish quickly.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        init_timeout_ms: 2000,
        stop_settle_ms: 5,
        play_grace_ms: 100,
        time_poll_ms: 5,
        ring_capacity: 16,
        chunk_channel_capacity: 4,
        push_backoff_ms: 1,
        device_buffer_frames: 128,
    }
}

/// What the scripted producer does on handshake and per stream.
#[derive(Clone, Debug)]
pub struct Script {
    pub handshake_delay: Duration,
    pub handshake_error: Option<String>,
    pub chunks: usize,
    pub chunk_frames: usize,
    pub chunk_delay: Duration,
    /// Fails the stream instead of emitting this chunk
    pub fail_at: Option<usize>,
    /// Emits a 3 byte chunk instead of this chunk
    pub malformed_at: Option<usize>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            handshake_delay: Duration::ZERO,
            handshake_error: None,
            chunks: 4,
            chunk_frames: 128,
            chunk_delay: Duration::ZERO,
            fail_at: None,
            malformed_at: None,
        }
    }
}

/// Counters shared by every producer a factory builds.
#[derive(Debug, Default)]
pub struct Counters {
    pub handshakes: AtomicUsize,
    pub streams: AtomicUsize,
    pub emitted: AtomicUsize,
}

impl Counters {
    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    pub fn streams(&self) -> usize {
        self.streams.load(Ordering::SeqCst)
    }

    pub fn emitted(&self) -> usize {
        self.emitted.load(Ordering::SeqCst)
    }
}

pub struct ScriptedGenerator {
    script: Script,
    counters: Arc<Counters>,
}

/// Sample value every frame of the `stream`th stream carries, as rendered.
pub fn stream_level(stream: usize) -> f32 {
    stream_tag(stream) as f32 / 32768.0
}

fn stream_tag(stream: usize) -> i16 {
    (stream * 1000) as i16
}

impl Generator for ScriptedGenerator {
    fn handshake(&mut self) -> anyhow::Result<BuildInfo> {
        self.counters.handshakes.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.script.handshake_delay);

        if let Some(message) = &self.script.handshake_error {
            anyhow::bail!("{message}");
        }

        Ok(BuildInfo {
            version: "1.2.3".to_string(),
            build_date: "2024-05-01".to_string(),
            hash: "abc123".to_string(),
        })
    }

    fn stream(
        &mut self,
        _content: &[u8],
        _format: SequenceFormat,
        sink: &mut ChunkSink,
    ) -> anyhow::Result<()> {
        let stream = self.counters.streams.fetch_add(1, Ordering::SeqCst) + 1;
        let tag = stream_tag(stream);

        for i in 0..self.script.chunks {
            std::thread::sleep(self.script.chunk_delay);

            if self.script.fail_at == Some(i) {
                anyhow::bail!("scripted failure at chunk {i}");
            }
            if self.script.malformed_at == Some(i) {
                sink.emit(vec![0; 3])?;
                continue;
            }

            let frames = vec![(tag, -tag); self.script.chunk_frames];
            sink.emit(codec::encode_frames(&frames))?;
            self.counters.emitted.fetch_add(1, Ordering::SeqCst);
        }

        Ok(())
    }
}

/// Builds an engine around a [`ManualDevice`] and a scripted producer.
pub fn engine_with(script: Script) -> (Engine, ManualDevice, Arc<Counters>) {
    engine_with_config(script, test_config())
}

pub fn engine_with_config(script: Script, config: EngineConfig) -> (Engine, ManualDevice, Arc<Counters>) {
    let device = ManualDevice::new();
    let (engine, counters) = engine_on_device(script, config, device.clone());
    (engine, device, counters)
}

pub fn engine_on_device<D: AudioDevice + 'static>(
    script: Script,
    config: EngineConfig,
    device: D,
) -> (Engine, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let factory_counters = counters.clone();

    let engine = Engine::new(
        config,
        move || -> Box<dyn Generator> {
            Box::new(ScriptedGenerator {
                script: script.clone(),
                counters: factory_counters.clone(),
            })
        },
        device,
    );

    (engine, counters)
}

/// Device that reports every connect as failed.
///
/// With `connect_anyway` the callback is still attached, like hardware that
/// raises an error while actually playing.
pub struct FlakyDevice {
    pub inner: ManualDevice,
    pub connect_anyway: bool,
}

impl AudioDevice for FlakyDevice {
    fn configure(&mut self, sample_rate: u32) -> seqplay::Result<()> {
        self.inner.configure(sample_rate)
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn connect(&mut self, callback: RenderCallback) -> seqplay::Result<()> {
        if self.connect_anyway {
            self.inner.connect(callback)?;
        }
        Err(EngineError::PlaybackFailed(
            "Device reported a start failure".to_string(),
        ))
    }

    fn disconnect(&mut self) -> Option<RenderCallback> {
        self.inner.disconnect()
    }

    fn current_time(&self) -> f64 {
        self.inner.current_time()
    }

    fn close(&mut self) {
        self.inner.close()
    }
}

/// Drives a [`ManualDevice`] from a background task, one period per
/// millisecond, and records every non-silent sample it renders.
pub struct Renderer {
    running: Arc<AtomicBool>,
    rendered: Arc<parking_lot::Mutex<Vec<f32>>>,
}

impl Renderer {
    pub fn start(device: &ManualDevice) -> Self {
        let device = device.clone();
        let running = Arc::new(AtomicBool::new(true));
        let rendered = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let task_running = running.clone();
        let task_rendered = rendered.clone();
        tokio::spawn(async move {
            while task_running.load(Ordering::SeqCst) {
                let pair = device.render(128);
                task_rendered
                    .lock()
                    .extend(pair.left.iter().copied().filter(|v| *v != 0.0));
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        Self { running, rendered }
    }

    /// Non-silent left channel samples rendered since the last take.
    pub fn take(&self) -> Vec<f32> {
        std::mem::take(&mut *self.rendered.lock())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Polls `condition` until it holds or [`TIMEOUT`] passes.
pub async fn wait_until<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + TIMEOUT;

    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    condition()
}

/// Collects all events from a subscriber within a timeout period.
/// Returns events in the order they were received.
pub async fn collect_events(subscriber: &mut Subscriber, timeout: Duration) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match subscriber.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Empty) => {
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Err(TryRecvError::Lagged(n)) => {
                eprintln!("Warning: subscriber lagged, missed {n} events");
            }
            Err(TryRecvError::Closed) => break,
        }
    }

    events
}

/// Waits for a specific event within [`TIMEOUT`].
pub async fn wait_for_event<F>(subscriber: &mut Subscriber, matches: F) -> Option<EngineEvent>
where
    F: Fn(&EngineEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + TIMEOUT;

    loop {
        match subscriber.try_recv() {
            Ok(event) if matches(&event) => return Some(event),
            Ok(_) => continue,
            Err(TryRecvError::Empty) => {
                if tokio::time::Instant::now() >= deadline {
                    return None;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Closed) => return None,
        }
    }
}

pub fn is_error(event: &EngineEvent) -> bool {
    matches!(event, EngineEvent::Error { .. })
}
