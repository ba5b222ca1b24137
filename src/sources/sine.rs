//! Stand-in producer synthesizing a stereo sine tone.
//!
//! Only the sample-rate hint of the sequence is honored; the tone itself
//! comes from configuration.

use super::{BuildInfo, Generator, Sample};
use crate::{
    bridge::ChunkSink,
    codec,
    config::SineConfig,
    sequence::{Sequence, SequenceFormat},
};

pub struct SineGenerator {
    config: SineConfig,
}

impl SineGenerator {
    pub fn new(config: SineConfig) -> Self {
        Self { config }
    }
}

impl Generator for SineGenerator {
    fn handshake(&mut self) -> anyhow::Result<BuildInfo> {
        Ok(BuildInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            build_date: String::new(),
            hash: "sine".to_string(),
        })
    }

    fn stream(
        &mut self,
        content: &[u8],
        format: SequenceFormat,
        sink: &mut ChunkSink,
    ) -> anyhow::Result<()> {
        let sample_rate = Sequence::new(content, format)?.sample_rate() as f64;
        let total_frames = (self.config.duration_secs.max(0.0) * sample_rate) as usize;
        let chunk_frames = self.config.chunk_frames.max(1);

        let step = self.config.frequency / sample_rate;
        let mut phase = 0.0;
        let mut emitted = 0;

        while emitted < total_frames {
            let frames = chunk_frames.min(total_frames - emitted);
            let chunk: Vec<Sample> = (0..frames)
                .map(|_| {
                    let sample = sine_wave(phase, self.config.amplitude);
                    // Wrap around 1.0 so precision holds over long tones
                    phase = (phase + step) % 1.0;
                    (sample, sample)
                })
                .collect();

            sink.emit(codec::encode_frames(&chunk))?;
            emitted += frames;
        }

        Ok(())
    }
}

fn sine_wave(phase: f64, amplitude: f64) -> i16 {
    let sample = (phase * std::f64::consts::TAU).sin();
    (sample * i16::MAX as f64 * amplitude.clamp(0.0, 1.0)) as i16
}
