//! Realtime render callback.
//!
//! Runs on the device clock. Must not block, allocate or panic.

use crate::buffer::ChunkConsumer;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

/// Flags the render callback raises for the control side to observe.
#[derive(Debug, Default)]
pub struct RenderSignals {
    ended: AtomicBool,
    frames_rendered: AtomicU64,
}

impl RenderSignals {
    /// Whether the stream ended and every queued frame was played.
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Real (non-silent) frames delivered to the device so far.
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Acquire)
    }

    pub fn has_rendered(&self) -> bool {
        self.frames_rendered() > 0
    }
}

pub struct RenderCallback {
    consumer: ChunkConsumer,
    signals: Arc<RenderSignals>,
    ended: bool,
}

impl RenderCallback {
    pub fn new(consumer: ChunkConsumer) -> Self {
        Self {
            consumer,
            signals: Arc::new(RenderSignals::default()),
            ended: false,
        }
    }

    pub fn signals(&self) -> Arc<RenderSignals> {
        self.signals.clone()
    }

    /// Renders one device period into both channels.
    ///
    /// After the end has been signalled the callback keeps producing silence
    /// until it is disconnected.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        if self.ended {
            left.fill(0.0);
            right.fill(0.0);
            return;
        }

        let pull = self.consumer.pull(left, right);

        if pull.frames_written > 0 {
            self.signals
                .frames_rendered
                .fetch_add(pull.frames_written as u64, Ordering::AcqRel);
        }

        if pull.ended_and_drained {
            self.ended = true;
            self.signals.ended.store(true, Ordering::Release);
        }
    }

    /// Drops queued audio and clears the end state.
    pub fn reset(&mut self) {
        self.consumer.reset();
        self.ended = false;
        self.signals.ended.store(false, Ordering::Release);
    }

    pub fn buffered_frames(&self) -> usize {
        self.consumer.buffered_frames()
    }
}
