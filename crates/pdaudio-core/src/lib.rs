//! pdaudio core - real-time audio callback engine
//!
//! Bridges a block-based DSP interpreter (Pure Data or the built-in tone
//! engine) to a platform audio device through a double-buffered hand-off
//! between a dedicated mixer thread and the driver's completion callbacks.

pub mod buffer;
pub mod bridge;
pub mod config;
pub mod control;
pub mod engine;
pub mod port;
pub mod types;

#[cfg(feature = "pd")]
pub mod pd;

#[cfg(test)]
pub(crate) mod testing;

pub use bridge::{Atom, BridgeError, BridgeMessage, DspBridge, PatchHandle, Receiver, ToneBridge};
pub use buffer::{DoubleBuffer, SampleBuffer, Samples};
pub use config::EngineConfig;
pub use control::ControlSurface;
pub use engine::{AudioEngine, EngineError, EngineResult, EngineState, ErrorKind, StatsSnapshot};
pub use port::{PlatformAudioPort, PlayState, PortConfig, PortError, PortEvents};
pub use types::*;
