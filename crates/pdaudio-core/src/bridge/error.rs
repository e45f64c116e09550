//! Error types for DSP bridges
//!
//! Covers engine initialization, patch loading, message sending and block
//! processing.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during DSP bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Failed to initialize the DSP engine
    #[error("Failed to initialize DSP engine: {0}")]
    InitializationFailed(String),

    /// Channel/rate combination rejected by the engine
    #[error("Failed to configure audio: {input_channels} in / {output_channels} out @ {sample_rate}Hz - {reason}")]
    AudioConfigFailed {
        input_channels: usize,
        output_channels: usize,
        sample_rate: u32,
        reason: String,
    },

    /// Engine already initialized with a different configuration
    #[error("DSP engine already initialized as {current}, cannot reconfigure to {requested}")]
    AlreadyInitialized { current: String, requested: String },

    /// Operation requires `init` first
    #[error("DSP engine not initialized")]
    NotInitialized,

    /// Failed to open a patch file
    #[error("Failed to open patch '{path}': {reason}")]
    PatchOpenFailed { path: PathBuf, reason: String },

    /// Patch file not found
    #[error("Patch file not found: {0}")]
    PatchNotFound(PathBuf),

    /// Failed to close a patch
    #[error("Failed to close patch: {0}")]
    PatchCloseFailed(String),

    /// Failed to send a message to the engine
    #[error("Failed to send {msg_type} to receiver '{receiver}': {reason}")]
    SendFailed {
        msg_type: String,
        receiver: String,
        reason: String,
    },

    /// Block processing was asked for a frame count the engine cannot produce
    #[error("Block of {frames} frames is not {ticks} ticks of {block_size}")]
    BlockMismatch {
        frames: usize,
        ticks: usize,
        block_size: usize,
    },

    /// Block processing failed
    #[error("DSP processing failed: {0}")]
    ProcessFailed(String),

    /// IO error while resolving search paths or patches
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether the error came from opening or closing a patch
    pub fn is_patch_error(&self) -> bool {
        matches!(
            self,
            BridgeError::PatchOpenFailed { .. }
                | BridgeError::PatchNotFound(_)
                | BridgeError::PatchCloseFailed(_)
        )
    }

    /// Whether the error came from engine setup
    pub fn is_init_error(&self) -> bool {
        matches!(
            self,
            BridgeError::InitializationFailed(_)
                | BridgeError::AudioConfigFailed { .. }
                | BridgeError::AlreadyInitialized { .. }
                | BridgeError::NotInitialized
        )
    }
}

/// Result type for DSP bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
