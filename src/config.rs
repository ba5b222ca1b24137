use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use tokio::fs::read_to_string;

pub const CONFIG_FILE: &str = "Seqplay.toml";

/// Timing and sizing knobs of the streaming engine.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on the producer handshake
    pub init_timeout_ms: u64,

    /// Pause between stopping old playback and starting a new stream
    pub stop_settle_ms: u64,

    /// How long a failed play waits for evidence that audio is flowing anyway
    pub play_grace_ms: u64,

    /// Period of the current-time poll
    pub time_poll_ms: u64,

    /// Decoded chunks the ring can hold
    pub ring_capacity: usize,

    /// Raw chunks in flight between the worker and the bridge
    pub chunk_channel_capacity: usize,

    /// Retry delay when the ring is full
    pub push_backoff_ms: u64,

    /// Frames per render period
    pub device_buffer_frames: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            init_timeout_ms: 30_000,
            stop_settle_ms: 100,
            play_grace_ms: 300,
            time_poll_ms: 100,
            ring_capacity: 256,
            chunk_channel_capacity: 16,
            push_backoff_ms: 5,
            device_buffer_frames: crate::constants::RENDER_QUANTUM,
        }
    }
}

impl EngineConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn stop_settle(&self) -> Duration {
        Duration::from_millis(self.stop_settle_ms)
    }

    pub fn play_grace(&self) -> Duration {
        Duration::from_millis(self.play_grace_ms)
    }

    pub fn time_poll(&self) -> Duration {
        // A zero period would make tokio's interval panic
        Duration::from_millis(self.time_poll_ms.max(1))
    }

    pub fn push_backoff(&self) -> Duration {
        Duration::from_millis(self.push_backoff_ms.max(1))
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Serve the rendered output as a WAV stream over TCP
    pub enabled: bool,
    pub listen: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "127.0.0.1:7878".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SineConfig {
    pub frequency: f64,
    pub duration_secs: f64,
    pub amplitude: f64,
    pub chunk_frames: usize,
}

impl Default for SineConfig {
    fn default() -> Self {
        Self {
            frequency: 440.0,
            duration_secs: 10.0,
            amplitude: 0.5,
            chunk_frames: 4096,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub monitor: MonitorConfig,
    pub sine: SineConfig,
}

/// Loads `Seqplay.toml` from the working directory, or defaults if it is missing.
pub async fn load() -> Result<Config> {
    load_from(CONFIG_FILE).await
}

pub async fn load_from(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let config = match read_to_string(path).await {
        Ok(config) => config,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No {} found, using default configuration", path.display());
            return Ok(Config::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: Config = toml::from_str(&config)?;

    Ok(config)
}
