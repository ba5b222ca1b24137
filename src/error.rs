//! Error taxonomy for the streaming engine.

use std::time::Duration;

/// Errors surfaced by the engine to its caller.
///
/// `Clone` so a single initialization outcome can be handed to every waiter.
#[derive(thiserror::Error, Clone, Debug, PartialEq)]
pub enum EngineError {
    /// The producer handshake failed or the worker died before answering
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// The producer did not report readiness in time
    #[error("Initialization timed out after {0:?}")]
    InitializationTimeout(Duration),

    /// Empty sequence, unsupported format or unreadable input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Engine is not initialized")]
    NotInitialized,

    #[error("No sequence loaded")]
    NoSequenceLoaded,

    /// PCM chunk whose byte length is not a whole number of stereo frames
    #[error("Malformed PCM chunk of {len} bytes")]
    MalformedChunk { len: usize },

    /// Failure reported by the producer mid-stream
    #[error("Stream error: {0}")]
    StreamError(String),

    /// Audio device or render path failure
    #[error("Playback failed: {0}")]
    PlaybackFailed(String),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
