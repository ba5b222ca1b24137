//! Audio output devices and their clocks.
//!
//! A device owns the realtime clock that drives the render callback. The
//! callback lives in a slot the render side only ever `try_lock`s, so
//! connecting or disconnecting from the control side can cost at most one
//! silent period and never blocks the clock.

use crate::{
    codec::{quantize, ChannelPair},
    constants::RENDER_QUANTUM,
    error::{EngineError, Result},
    render::RenderCallback,
    sources::Sample,
};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapProd};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

/// An output that periodically invokes a connected [`RenderCallback`].
pub trait AudioDevice: Send {
    /// Opens the device at `sample_rate`, reopening it if the rate changed.
    fn configure(&mut self, sample_rate: u32) -> Result<()>;

    fn sample_rate(&self) -> u32;

    /// Attaches the render path. Replaces any previous callback.
    fn connect(&mut self, callback: RenderCallback) -> Result<()>;

    /// Detaches the render path, handing the callback back to the caller.
    fn disconnect(&mut self) -> Option<RenderCallback>;

    /// Seconds of audio the device clock has rendered since it was opened.
    fn current_time(&self) -> f64;

    fn close(&mut self);
}

type CallbackSlot = Arc<Mutex<Option<RenderCallback>>>;
type TapSlot = Arc<Mutex<Option<HeapProd<Sample>>>>;

fn render_period(slot: &CallbackSlot, left: &mut [f32], right: &mut [f32]) {
    match slot.try_lock() {
        Some(mut guard) => match guard.as_mut() {
            Some(callback) => callback.render(left, right),
            None => {
                left.fill(0.0);
                right.fill(0.0);
            }
        },
        // Control side is swapping the callback, output one silent period
        None => {
            left.fill(0.0);
            right.fill(0.0);
        }
    }
}

#[derive(Default)]
struct DeviceClock {
    frames: AtomicU64,
    sample_rate: AtomicU32,
}

impl DeviceClock {
    fn seconds(&self) -> f64 {
        let sample_rate = self.sample_rate.load(Ordering::Acquire);
        if sample_rate == 0 {
            return 0.0;
        }
        self.frames.load(Ordering::Acquire) as f64 / sample_rate as f64
    }

    fn restart(&self, sample_rate: u32) {
        self.frames.store(0, Ordering::Release);
        self.sample_rate.store(sample_rate, Ordering::Release);
    }
}

/// Software device rendering fixed periods on a dedicated thread, paced by
/// the wall clock the way a sound card would pace its interrupts.
pub struct ClockedDevice {
    buffer_frames: usize,
    slot: CallbackSlot,
    tap: TapSlot,
    clock: Arc<DeviceClock>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ClockedDevice {
    pub fn new(buffer_frames: usize) -> Self {
        Self {
            buffer_frames: buffer_frames.max(1),
            slot: Default::default(),
            tap: Default::default(),
            clock: Default::default(),
            running: Default::default(),
            thread: None,
        }
    }

    /// Mirrors every rendered frame into `tap`, dropping frames when it is full.
    pub fn set_tap(&mut self, tap: HeapProd<Sample>) {
        *self.tap.lock() = Some(tap);
    }

    fn open(&mut self, sample_rate: u32) -> Result<()> {
        self.clock.restart(sample_rate);
        self.running.store(true, Ordering::Release);

        let buffer_frames = self.buffer_frames;
        let slot = self.slot.clone();
        let tap = self.tap.clone();
        let clock = self.clock.clone();
        let running = self.running.clone();

        let thread = std::thread::Builder::new()
            .name("seqplay-render".to_string())
            .spawn(move || {
                run_clock(buffer_frames, sample_rate, slot, tap, clock, running)
            })
            .map_err(|e| EngineError::PlaybackFailed(format!("Failed to start device: {e}")))?;

        self.thread = Some(thread);
        debug!("Opened clocked device at {sample_rate} Hz, {buffer_frames} frames per period");
        Ok(())
    }
}

impl Default for ClockedDevice {
    fn default() -> Self {
        Self::new(RENDER_QUANTUM)
    }
}

fn run_clock(
    buffer_frames: usize,
    sample_rate: u32,
    slot: CallbackSlot,
    tap: TapSlot,
    clock: Arc<DeviceClock>,
    running: Arc<AtomicBool>,
) {
    let mut left = vec![0.0; buffer_frames];
    let mut right = vec![0.0; buffer_frames];
    let start_time = Instant::now();
    let mut rendered_frames: u64 = 0;

    while running.load(Ordering::Acquire) {
        render_period(&slot, &mut left, &mut right);

        if let Some(mut tap) = tap.try_lock() {
            if let Some(tap) = tap.as_mut() {
                for (l, r) in left.iter().zip(&right) {
                    let _ = tap.try_push((quantize(*l), quantize(*r)));
                }
            }
        }

        rendered_frames += buffer_frames as u64;
        clock.frames.store(rendered_frames, Ordering::Release);

        // Pace against the start instant so sleep jitter doesn't accumulate
        let deadline =
            start_time + Duration::from_secs_f64(rendered_frames as f64 / sample_rate as f64);
        if let Some(wait) = deadline.checked_duration_since(Instant::now()) {
            std::thread::sleep(wait);
        }
    }
}

impl AudioDevice for ClockedDevice {
    fn configure(&mut self, sample_rate: u32) -> Result<()> {
        if sample_rate == 0 {
            return Err(EngineError::PlaybackFailed(
                "Sample rate must be positive".to_string(),
            ));
        }
        if self.thread.is_some() && self.sample_rate() == sample_rate {
            return Ok(());
        }

        self.close();
        self.open(sample_rate)
    }

    fn sample_rate(&self) -> u32 {
        self.clock.sample_rate.load(Ordering::Acquire)
    }

    fn connect(&mut self, callback: RenderCallback) -> Result<()> {
        if self.thread.is_none() {
            return Err(EngineError::PlaybackFailed(
                "Device is not open".to_string(),
            ));
        }
        *self.slot.lock() = Some(callback);
        Ok(())
    }

    fn disconnect(&mut self) -> Option<RenderCallback> {
        self.slot.lock().take()
    }

    fn current_time(&self) -> f64 {
        self.clock.seconds()
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Render thread panicked");
            }
            debug!("Closed clocked device");
        }
    }
}

impl Drop for ClockedDevice {
    fn drop(&mut self) {
        self.close();
    }
}

struct ManualState {
    slot: CallbackSlot,
    clock: DeviceClock,
    open: AtomicBool,
}

/// Device whose clock only advances when [`ManualDevice::render`] is called.
///
/// Cloning yields another handle to the same device, so a test or an offline
/// renderer can keep driving it after handing it to the engine.
#[derive(Clone)]
pub struct ManualDevice {
    state: Arc<ManualState>,
}

impl ManualDevice {
    pub fn new() -> Self {
        Self {
            state: Arc::new(ManualState {
                slot: Default::default(),
                clock: Default::default(),
                open: AtomicBool::new(false),
            }),
        }
    }

    /// Renders `frames` frames through the connected callback (or silence).
    pub fn render(&self, frames: usize) -> ChannelPair {
        let mut pair = ChannelPair {
            left: vec![0.0; frames],
            right: vec![0.0; frames],
        };
        render_period(&self.state.slot, &mut pair.left, &mut pair.right);
        self.state
            .clock
            .frames
            .fetch_add(frames as u64, Ordering::AcqRel);
        pair
    }

    pub fn is_connected(&self) -> bool {
        self.state.slot.lock().is_some()
    }

    pub fn is_open(&self) -> bool {
        self.state.open.load(Ordering::Acquire)
    }
}

impl Default for ManualDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for ManualDevice {
    fn configure(&mut self, sample_rate: u32) -> Result<()> {
        if sample_rate == 0 {
            return Err(EngineError::PlaybackFailed(
                "Sample rate must be positive".to_string(),
            ));
        }
        if !self.is_open() || self.sample_rate() != sample_rate {
            self.state.clock.restart(sample_rate);
            self.state.open.store(true, Ordering::Release);
        }
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.state.clock.sample_rate.load(Ordering::Acquire)
    }

    fn connect(&mut self, callback: RenderCallback) -> Result<()> {
        if !self.is_open() {
            return Err(EngineError::PlaybackFailed(
                "Device is not open".to_string(),
            ));
        }
        *self.state.slot.lock() = Some(callback);
        Ok(())
    }

    fn disconnect(&mut self) -> Option<RenderCallback> {
        self.state.slot.lock().take()
    }

    fn current_time(&self) -> f64 {
        self.state.clock.seconds()
    }

    fn close(&mut self) {
        self.disconnect();
        self.state.open.store(false, Ordering::Release);
    }
}
