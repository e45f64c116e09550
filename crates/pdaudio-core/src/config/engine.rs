//! Engine configuration
//!
//! Channel counts, sample rate and buffer geometry for one engine instance,
//! plus the patch and search paths to load at startup.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::port::PortConfig;
use crate::types::{
    Direction, SampleFormat, DEFAULT_BLOCK_FRAMES, DEFAULT_SAMPLE_RATE, DOUBLE_BUFFER_LEN, MAX_CHANNELS,
    SUPPORTED_SAMPLE_RATES,
};

/// Reasons a configuration is rejected
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No input or output channels configured")]
    NoChannels,

    #[error("{count} {} channels exceeds the maximum of {MAX_CHANNELS}", direction.name())]
    TooManyChannels { direction: Direction, count: usize },

    #[error("Block size must be at least one frame")]
    ZeroBlockFrames,

    #[error("Unsupported sample rate: {0}Hz")]
    UnsupportedSampleRate(u32),

    #[error("Block of {frames} frames is not a multiple of the DSP block size {block_size}")]
    BlockNotMultiple { frames: usize, block_size: usize },
}

/// Patch to open once the engine is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchConfig {
    /// File name, relative to `dir`
    pub file: String,
    /// Directory containing the patch
    #[serde(default = "default_patch_dir")]
    pub dir: PathBuf,
}

fn default_patch_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Configuration for an [`AudioEngine`](crate::AudioEngine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capture channels (0 disables the input path)
    pub input_channels: usize,

    pub output_channels: usize,

    pub sample_rate: u32,

    /// Frames per hand-off buffer; a multiple of the DSP block size
    pub block_frames: usize,

    pub sample_format: SampleFormat,

    /// Extra directories searched for patches and abstractions
    pub search_paths: Vec<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<PatchConfig>,

    /// Output device name for hardware ports (None = system default)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            input_channels: 0,
            output_channels: 2,
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_frames: DEFAULT_BLOCK_FRAMES,
            sample_format: SampleFormat::default(),
            search_paths: Vec::new(),
            patch: None,
            device: None,
        }
    }
}

impl EngineConfig {
    /// Create config with the given channel counts and rate, defaults elsewhere
    pub fn new(input_channels: usize, output_channels: usize, sample_rate: u32) -> Self {
        Self {
            input_channels,
            output_channels,
            sample_rate,
            ..Default::default()
        }
    }

    /// Check everything that does not depend on the DSP engine
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input_channels + self.output_channels == 0 {
            return Err(ConfigError::NoChannels);
        }
        for (direction, count) in [
            (Direction::Input, self.input_channels),
            (Direction::Output, self.output_channels),
        ] {
            if count > MAX_CHANNELS {
                return Err(ConfigError::TooManyChannels { direction, count });
            }
        }
        if self.block_frames == 0 {
            return Err(ConfigError::ZeroBlockFrames);
        }
        if !SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(ConfigError::UnsupportedSampleRate(self.sample_rate));
        }
        Ok(())
    }

    /// DSP ticks per buffer for an engine with `block_size` frames per tick
    pub fn ticks_per_block(&self, block_size: usize) -> Result<usize, ConfigError> {
        if block_size == 0 || self.block_frames % block_size != 0 {
            return Err(ConfigError::BlockNotMultiple {
                frames: self.block_frames,
                block_size,
            });
        }
        Ok(self.block_frames / block_size)
    }

    /// Interleaved samples per output buffer
    pub fn output_samples(&self) -> usize {
        self.block_frames * self.output_channels
    }

    /// Interleaved samples per input buffer
    pub fn input_samples(&self) -> usize {
        self.block_frames * self.input_channels
    }

    /// Real-time duration of one buffer
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.block_frames as f64 / self.sample_rate.max(1) as f64)
    }

    /// Output latency in milliseconds: the primed buffer plus the one in play
    pub fn latency_ms(&self) -> f32 {
        (DOUBLE_BUFFER_LEN * self.block_frames) as f32 / self.sample_rate.max(1) as f32 * 1000.0
    }

    pub fn port_config(&self) -> PortConfig {
        PortConfig {
            input_channels: self.input_channels,
            output_channels: self.output_channels,
            sample_rate: self.sample_rate,
            block_frames: self.block_frames,
            format: self.sample_format,
        }
    }

    pub fn with_input_channels(mut self, channels: usize) -> Self {
        self.input_channels = channels;
        self
    }

    pub fn with_output_channels(mut self, channels: usize) -> Self {
        self.output_channels = channels;
        self
    }

    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Set the buffer size in frames
    pub fn with_block_frames(mut self, frames: usize) -> Self {
        self.block_frames = frames;
        self
    }

    pub fn with_sample_format(mut self, format: SampleFormat) -> Self {
        self.sample_format = format;
        self
    }

    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    /// Open `file` from `dir` at startup
    pub fn with_patch(mut self, file: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        self.patch = Some(PatchConfig {
            file: file.into(),
            dir: dir.into(),
        });
        self
    }

    pub fn with_device(mut self, name: impl Into<String>) -> Self {
        self.device = Some(name.into());
        self
    }
}
