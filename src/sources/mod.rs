//! Producers of PCM audio.
//!
//! A [`Generator`] is the compute unit behind the bridge. It runs on the
//! bridge's worker thread, so it may block or be slow without affecting
//! the realtime render path.

pub mod sine;

use crate::{bridge::ChunkSink, sequence::SequenceFormat};
use serde::{Deserialize, Serialize};

/// A stereo sample pair (left, right) as 16-bit signed integers.
pub type Sample = (i16, i16);

/// Static metadata reported by a producer during the handshake.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct BuildInfo {
    pub version: String,
    pub build_date: String,
    pub hash: String,
}

/// Trait for producers that turn a sequence description into PCM chunks.
pub trait Generator: Send + 'static {
    /// Brings the producer up and reports its build metadata.
    fn handshake(&mut self) -> anyhow::Result<BuildInfo>;

    /// Generates the whole sequence, handing interleaved 16-bit little-endian
    /// stereo chunks to `sink` as they become available.
    ///
    /// Should return early once `sink.emit` fails, which means the stream
    /// was stopped.
    fn stream(
        &mut self,
        content: &[u8],
        format: SequenceFormat,
        sink: &mut ChunkSink,
    ) -> anyhow::Result<()>;
}
