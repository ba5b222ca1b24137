//! Conversion between interleaved 16-bit little-endian stereo PCM and
//! normalized per-channel float samples.

use crate::{
    constants::BYTES_PER_FRAME,
    error::{EngineError, Result},
};
use byteorder::{ByteOrder, LittleEndian};
use itertools::Itertools;

const I16_SCALE: f32 = 32768.0;

/// Two equal-length channels of normalized samples in [-1.0, 1.0].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChannelPair {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl ChannelPair {
    pub fn with_capacity(frames: usize) -> Self {
        Self {
            left: Vec::with_capacity(frames),
            right: Vec::with_capacity(frames),
        }
    }

    pub fn frames(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }
}

/// Decodes a raw PCM chunk into a channel pair.
///
/// Fails with [`EngineError::MalformedChunk`] unless the length is a multiple
/// of four bytes.
pub fn decode(bytes: &[u8]) -> Result<ChannelPair> {
    if bytes.len() % BYTES_PER_FRAME != 0 {
        return Err(EngineError::MalformedChunk { len: bytes.len() });
    }

    let mut pair = ChannelPair::with_capacity(bytes.len() / BYTES_PER_FRAME);

    let samples = bytes
        .chunks_exact(2)
        .map(|sample| LittleEndian::read_i16(sample) as f32 / I16_SCALE);

    for (left, right) in samples.tuples() {
        pair.left.push(left);
        pair.right.push(right);
    }

    Ok(pair)
}

/// Quantizes a normalized sample back to a signed 16-bit value.
pub fn quantize(sample: f32) -> i16 {
    (sample * I16_SCALE)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Encodes a channel pair as interleaved 16-bit little-endian PCM.
pub fn encode(pair: &ChannelPair) -> Vec<u8> {
    let mut bytes = vec![0; pair.frames() * BYTES_PER_FRAME];

    for (frame, (left, right)) in bytes
        .chunks_exact_mut(BYTES_PER_FRAME)
        .zip(pair.left.iter().zip(&pair.right))
    {
        LittleEndian::write_i16(&mut frame[0..2], quantize(*left));
        LittleEndian::write_i16(&mut frame[2..4], quantize(*right));
    }

    bytes
}

/// Encodes interleaved integer frames directly, as a producer would emit them.
pub fn encode_frames(frames: &[(i16, i16)]) -> Vec<u8> {
    let mut bytes = vec![0; frames.len() * BYTES_PER_FRAME];

    for (frame, (left, right)) in bytes.chunks_exact_mut(BYTES_PER_FRAME).zip(frames) {
        LittleEndian::write_i16(&mut frame[0..2], *left);
        LittleEndian::write_i16(&mut frame[2..4], *right);
    }

    bytes
}
