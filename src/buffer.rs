//! Lock-free chunk ring between the bridge and the render callback.
//!
//! The bridge pushes decoded channel pairs of any length, the render callback
//! pulls exactly one device period at a time and pads with silence on underrun.
//! Exactly one producer and one consumer exist per ring.

use crate::codec::ChannelPair;
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

#[derive(Default)]
struct RingState {
    ended: AtomicBool,
    /// Frames pushed but not yet pulled, including the partially drained head
    buffered_frames: AtomicUsize,
}

/// Creates a ring holding up to `capacity` queued chunks.
pub fn chunk_ring(capacity: usize) -> (ChunkProducer, ChunkConsumer) {
    let capacity = capacity.max(1);
    let (queue_tx, queue_rx) = HeapRb::<ChannelPair>::new(capacity).split();
    // Every queued pair plus the one being drained can be waiting for reclaim
    let (spent_tx, spent_rx) = HeapRb::<ChannelPair>::new(capacity + 1).split();
    let state = Arc::new(RingState::default());

    let producer = ChunkProducer {
        queue: queue_tx,
        spent: spent_rx,
        state: state.clone(),
    };
    let consumer = ChunkConsumer {
        queue: queue_rx,
        spent: spent_tx,
        state,
        current: None,
        cursor: 0,
        drained_reported: false,
    };

    (producer, consumer)
}

#[derive(Debug)]
pub enum PushError {
    /// Ring is full, retry later
    Full(ChannelPair),
    /// `mark_ended` was already called, the pair is rejected
    Ended(ChannelPair),
}

impl PushError {
    pub fn into_inner(self) -> ChannelPair {
        match self {
            PushError::Full(pair) | PushError::Ended(pair) => pair,
        }
    }
}

/// Write half, owned by the bridge.
pub struct ChunkProducer {
    queue: HeapProd<ChannelPair>,
    spent: HeapCons<ChannelPair>,
    state: Arc<RingState>,
}

impl ChunkProducer {
    /// Appends a pair without blocking.
    pub fn push(&mut self, pair: ChannelPair) -> Result<(), PushError> {
        self.reclaim();

        if self.is_ended() {
            return Err(PushError::Ended(pair));
        }
        if pair.is_empty() {
            return Ok(());
        }

        // Count before publishing so the consumer can never subtract first
        let frames = pair.frames();
        self.state.buffered_frames.fetch_add(frames, Ordering::AcqRel);

        self.queue.try_push(pair).map_err(|pair| {
            self.state.buffered_frames.fetch_sub(frames, Ordering::AcqRel);
            PushError::Full(pair)
        })
    }

    /// Marks the end of the stream. Idempotent.
    pub fn mark_ended(&mut self) {
        self.reclaim();
        self.state.ended.store(true, Ordering::Release);
    }

    pub fn is_ended(&self) -> bool {
        self.state.ended.load(Ordering::Acquire)
    }

    pub fn buffered_frames(&self) -> usize {
        self.state.buffered_frames.load(Ordering::Acquire)
    }

    /// Frees pairs the consumer has finished with, off the render thread.
    fn reclaim(&mut self) {
        while let Some(pair) = self.spent.try_pop() {
            drop(pair);
        }
    }
}

/// Outcome of a single [`ChunkConsumer::pull`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pull {
    /// Real frames delivered, the rest of the request is silence
    pub frames_written: usize,
    /// True exactly once, when the ended ring has been fully drained
    pub ended_and_drained: bool,
}

/// Read half, owned by the render callback.
pub struct ChunkConsumer {
    queue: HeapCons<ChannelPair>,
    spent: HeapProd<ChannelPair>,
    state: Arc<RingState>,
    current: Option<ChannelPair>,
    cursor: usize,
    drained_reported: bool,
}

impl ChunkConsumer {
    /// Fills both output slices, crossing chunk boundaries and padding any
    /// shortfall with silence. Never blocks and never allocates.
    pub fn pull(&mut self, left: &mut [f32], right: &mut [f32]) -> Pull {
        let requested = left.len().min(right.len());
        let mut written = 0;

        while written < requested {
            if self.current.is_none() && !self.advance() {
                break;
            }
            let Some(current) = self.current.as_ref() else {
                break;
            };

            let count = (current.frames() - self.cursor).min(requested - written);
            left[written..written + count]
                .copy_from_slice(&current.left[self.cursor..self.cursor + count]);
            right[written..written + count]
                .copy_from_slice(&current.right[self.cursor..self.cursor + count]);

            written += count;
            self.cursor += count;

            if self.cursor >= current.frames() {
                self.retire_current();
            }
        }

        left[written..].fill(0.0);
        right[written..].fill(0.0);

        if written > 0 {
            self.state
                .buffered_frames
                .fetch_sub(written, Ordering::AcqRel);
        }

        Pull {
            frames_written: written,
            ended_and_drained: self.check_drained(),
        }
    }

    /// Clears all queued pairs, the cursor and the ended flag.
    ///
    /// Called from the control side once the callback is disconnected.
    pub fn reset(&mut self) {
        while let Some(pair) = self.queue.try_pop() {
            drop(pair);
        }
        self.current = None;
        self.cursor = 0;
        self.drained_reported = false;
        self.state.buffered_frames.store(0, Ordering::Release);
        self.state.ended.store(false, Ordering::Release);
    }

    pub fn buffered_frames(&self) -> usize {
        self.state.buffered_frames.load(Ordering::Acquire)
    }

    pub fn is_ended(&self) -> bool {
        self.state.ended.load(Ordering::Acquire)
    }

    fn advance(&mut self) -> bool {
        match self.queue.try_pop() {
            Some(pair) => {
                self.current = Some(pair);
                self.cursor = 0;
                true
            }
            None => false,
        }
    }

    fn retire_current(&mut self) {
        self.cursor = 0;
        if let Some(pair) = self.current.take() {
            // Only fails if the producer stopped reclaiming, then we free here
            let _ = self.spent.try_push(pair);
        }
    }

    fn check_drained(&mut self) -> bool {
        if self.drained_reported || self.current.is_some() {
            return false;
        }
        // Acquire pairs with the producer's release so every push is visible
        if !self.state.ended.load(Ordering::Acquire) {
            return false;
        }
        if self.advance() {
            return false;
        }

        self.drained_reported = true;
        true
    }
}
