//! Common types for pdaudio
//!
//! Constants and small enums shared by the buffer, bridge, port and engine
//! modules.

use serde::{Deserialize, Serialize};

/// Native block size of the DSP engine in frames (Pure Data's default)
pub const DSP_BLOCK_SIZE: usize = 64;

/// Default number of frames per hand-off buffer
///
/// Must be an integer multiple of the bridge's native block size.
/// 1024 frames @ 44.1kHz = ~23ms per buffer.
pub const DEFAULT_BLOCK_FRAMES: usize = 1024;

/// Number of buffers per direction (one in flight, one being prepared)
pub const DOUBLE_BUFFER_LEN: usize = 2;

/// Upper bound on channels per direction
pub const MAX_CHANNELS: usize = 512;

/// Default sample rate (CD rate, supported by every backend)
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Sample rates accepted by the engine
pub const SUPPORTED_SAMPLE_RATES: [u32; 12] = [
    8000, 11025, 16000, 22050, 24000, 32000, 44100, 48000, 64000, 88200, 96000, 192000,
];

/// Sample encoding of a buffer
///
/// A buffer is always one or the other, never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Signed 16-bit PCM
    #[default]
    Int16,
    /// 32-bit float in [-1.0, 1.0]
    Float32,
}

impl SampleFormat {
    /// Size of one sample in bytes
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::Int16 => 2,
            SampleFormat::Float32 => 4,
        }
    }
}

impl std::fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleFormat::Int16 => write!(f, "int16"),
            SampleFormat::Float32 => write!(f, "float32"),
        }
    }
}

/// Direction of an audio path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Capture (hardware → DSP)
    Input,
    /// Playback (DSP → hardware)
    Output,
}

impl Direction {
    pub fn name(&self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}
