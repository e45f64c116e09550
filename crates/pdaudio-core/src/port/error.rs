//! Platform audio port error types

use thiserror::Error;

/// Errors that can occur in a platform audio port
#[derive(Error, Debug)]
pub enum PortError {
    /// No audio devices available
    #[error("No audio output devices found")]
    NoDevices,

    /// Failed to get default device
    #[error("Failed to get default audio device: {0}")]
    NoDefaultDevice(String),

    /// Failed to get or apply a device configuration
    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    /// Failed to build audio stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    /// Failed to start/play stream
    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),

    /// Stream error during playback
    #[error("Audio stream error: {0}")]
    StreamError(String),

    /// Unsupported sample format
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// Operation requires `open` first
    #[error("Audio port is not open")]
    NotOpen,

    /// Port was opened twice
    #[error("Audio port is already open")]
    AlreadyOpen,

    /// Hand-off queue has no free slot
    #[error("Audio port queue full for {0} buffer")]
    QueueFull(&'static str),

    /// Driver thread exited
    #[error("Audio driver thread is gone")]
    DriverGone,

    /// Failed to spawn a driver thread
    #[error("Failed to spawn audio driver thread: {0}")]
    ThreadSpawn(std::io::Error),

    /// WAV file read/write error
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

/// Result type for port operations
pub type PortResult<T> = Result<T, PortError>;
