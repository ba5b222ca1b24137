// Define some constants for the audio parameters
pub const DEFAULT_SAMPLE_RATE: u32 = 44100; // 44.1 kHz unless the sequence says otherwise
pub const BIT_DEPTH: u16 = 16; // 16 bits per sample
pub const CHANNELS: u16 = 2; // Stereo channel
pub const BYTES_PER_FRAME: usize = (BIT_DEPTH as usize / 8) * CHANNELS as usize;

/// Frames rendered per device period (the platform render quantum).
pub const RENDER_QUANTUM: usize = 128;
