//! Engine error types

use std::path::PathBuf;
use thiserror::Error;

use super::state::ErrorKind;
use crate::bridge::BridgeError;
use crate::config::ConfigError;
use crate::port::PortError;

/// Errors returned by engine and control operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid engine configuration
    #[error("Invalid engine configuration: {0}")]
    Config(#[from] ConfigError),

    /// DSP engine rejected the setup
    #[error("Failed to initialize engine: {0}")]
    Init(String),

    /// Audio port could not be opened
    #[error("Failed to open audio port: {0}")]
    PortOpen(#[source] PortError),

    /// Patch missing or unparsable
    #[error("Failed to load patch '{path}': {reason}")]
    PatchLoad { path: PathBuf, reason: String },

    /// Block processing failed
    #[error("DSP processing failed: {0}")]
    DspProcess(String),

    /// Audio port failure while running
    #[error("Audio port error: {0}")]
    PlatformIo(#[from] PortError),

    /// Operation after `close()`
    #[error("Engine is closed")]
    Closed,

    /// Failed to spawn the mixer thread
    #[error("Failed to spawn mixer thread: {0}")]
    ThreadSpawn(std::io::Error),

    /// Control message rejected by the DSP engine
    #[error("DSP bridge error: {0}")]
    Bridge(#[source] BridgeError),
}

impl EngineError {
    /// Category recorded in the last-error slot
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Config(_)
            | EngineError::Init(_)
            | EngineError::PortOpen(_)
            | EngineError::ThreadSpawn(_) => ErrorKind::Init,
            EngineError::PatchLoad { .. } => ErrorKind::PatchLoad,
            EngineError::DspProcess(_) => ErrorKind::DspProcess,
            EngineError::PlatformIo(_) => ErrorKind::PlatformIo,
            EngineError::Closed => ErrorKind::EngineClosed,
            EngineError::Bridge(e) if e.is_patch_error() => ErrorKind::PatchLoad,
            EngineError::Bridge(e) if e.is_init_error() => ErrorKind::Init,
            EngineError::Bridge(_) => ErrorKind::DspProcess,
        }
    }
}

impl From<BridgeError> for EngineError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::PatchNotFound(path) => EngineError::PatchLoad {
                path,
                reason: "file not found".to_string(),
            },
            BridgeError::PatchOpenFailed { path, reason } => EngineError::PatchLoad { path, reason },
            e if e.is_init_error() => EngineError::Init(e.to_string()),
            e => EngineError::Bridge(e),
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
