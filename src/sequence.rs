//! Sequence sources and their sample-rate hints.

use crate::{
    constants::DEFAULT_SAMPLE_RATE,
    error::{EngineError, Result},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::OnceLock};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceFormat {
    #[default]
    Text,
    Json,
}

impl SequenceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SequenceFormat::Text => "text",
            SequenceFormat::Json => "json",
        }
    }
}

impl fmt::Display for SequenceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SequenceFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(SequenceFormat::Text),
            "json" => Ok(SequenceFormat::Json),
            other => Err(EngineError::InvalidInput(format!(
                "Unsupported format: {other}"
            ))),
        }
    }
}

/// An immutable sequence description handed to the producer.
#[derive(Clone, Debug, PartialEq)]
pub struct Sequence {
    content: Vec<u8>,
    format: SequenceFormat,
}

impl Sequence {
    pub fn new(content: impl Into<Vec<u8>>, format: SequenceFormat) -> Result<Self> {
        let content = content.into();
        if content.is_empty() {
            return Err(EngineError::InvalidInput("Input is required".to_string()));
        }

        Ok(Self { content, format })
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn format(&self) -> SequenceFormat {
        self.format
    }

    /// Sample rate the sequence asks for, 44100 Hz when it says nothing usable.
    pub fn sample_rate(&self) -> u32 {
        let hinted = match self.format {
            SequenceFormat::Text => sample_rate_from_text(&String::from_utf8_lossy(&self.content)),
            SequenceFormat::Json => sample_rate_from_json(&self.content),
        };

        hinted.unwrap_or(DEFAULT_SAMPLE_RATE)
    }
}

fn samplerate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^@samplerate\s+(\d+)").expect("valid samplerate regex"))
}

/// First `@samplerate <n>` directive wins. Malformed directives are skipped.
pub fn sample_rate_from_text(text: &str) -> Option<u32> {
    text.lines()
        .map(str::trim)
        .filter(|line| line.starts_with("@samplerate"))
        .find_map(|line| {
            samplerate_re()
                .captures(line)
                .and_then(|caps| caps[1].parse::<u32>().ok())
        })
        .filter(|rate| *rate > 0)
}

#[derive(Deserialize)]
struct JsonSequence {
    options: Option<JsonOptions>,
}

#[derive(Deserialize)]
struct JsonOptions {
    samplerate: Option<serde_json::Value>,
}

/// Reads `options.samplerate`; absent, non-numeric, fractional or unparsable
/// input yields `None`.
pub fn sample_rate_from_json(json: &[u8]) -> Option<u32> {
    let sequence: JsonSequence = serde_json::from_slice(json).ok()?;
    let rate = sequence.options?.samplerate?;

    let rate = match rate.as_u64() {
        Some(rate) => rate,
        // Integral floats such as 48000.0 are still a valid rate
        None => {
            let rate = rate.as_f64()?;
            if !rate.is_finite() || rate.fract() != 0.0 || rate < 0.0 || rate > u32::MAX as f64 {
                return None;
            }
            rate as u64
        }
    };

    u32::try_from(rate).ok().filter(|rate| *rate > 0)
}
