//! seqplay library crate
//!
//! Streams PCM audio from a background producer into a realtime render path.
//! The main binary is in main.rs.

#[macro_use]
extern crate log;

pub mod bridge;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod net;
pub mod player;
pub mod render;
pub mod sequence;
pub mod sources;

pub use error::{EngineError, Result};
pub use player::{Engine, PlayerState};

// Test modules
#[cfg(test)]
mod buffer_tests;
#[cfg(test)]
mod sequence_tests;
