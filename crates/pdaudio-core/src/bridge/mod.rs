//! DSP bridge - the narrow interface to the synthesis engine
//!
//! The engine is consumed through two entry points: "process N ticks of
//! interleaved audio" and "send a message to a named receiver". Everything
//! else about it (graph evaluation, patch format) stays behind the trait.
//!
//! # Architecture
//!
//! ```text
//!   caller threads                         mixer thread
//!  ┌────────────────┐                   ┌────────────────┐
//!  │ ControlSurface │                   │     Mixer      │
//!  │ send_* / open  │                   │ process_block  │
//!  └───────┬────────┘                   └───────┬────────┘
//!          │                                    │
//!          └──────────►┌──────────────┐◄────────┘
//!                      │ SharedBridge │  one mutex, one engine
//!                      │  (DspBridge) │
//!                      └──────┬───────┘
//!                             │ drain_messages
//!                             ▼
//!                      ┌──────────────┐
//!                      │  Dispatcher  │──► Receiver callbacks
//!                      └──────────────┘
//! ```
//!
//! # Implementations
//!
//! - [`ToneBridge`]: built-in oscillator engine, always available
//! - `PdBridge`: Pure Data through libpd-rs (feature `pd`)

mod dispatcher;
mod error;
mod shared;
mod tone;

use std::path::{Path, PathBuf};

use crate::buffer::SampleBuffer;
use crate::types::DSP_BLOCK_SIZE;

pub use dispatcher::{Dispatcher, Receiver};
pub use error::{BridgeError, BridgeResult};
pub use shared::SharedBridge;
pub use tone::{ToneBridge, ToneSettings, Waveform, LEVEL_SOURCE};

/// Receiver name reserved for engine-level messages
pub const ENGINE_RECEIVER: &str = "pd";

/// Selector toggling DSP computation on [`ENGINE_RECEIVER`]
pub const DSP_SELECTOR: &str = "dsp";

/// One element of a list or message payload
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Float(f32),
    Symbol(String),
}

impl Atom {
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Atom::Float(f) => Some(*f),
            Atom::Symbol(_) => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Atom::Symbol(s) => Some(s),
            Atom::Float(_) => None,
        }
    }

    /// Parse a command-line style token: numbers become floats, anything else a symbol
    pub fn parse(token: &str) -> Self {
        match token.parse::<f32>() {
            Ok(f) => Atom::Float(f),
            Err(_) => Atom::Symbol(token.to_string()),
        }
    }
}

impl From<f32> for Atom {
    fn from(value: f32) -> Self {
        Atom::Float(value)
    }
}

impl From<&str> for Atom {
    fn from(value: &str) -> Self {
        Atom::Symbol(value.to_string())
    }
}

impl std::fmt::Display for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Atom::Float(v) => write!(f, "{}", v),
            Atom::Symbol(s) => f.write_str(s),
        }
    }
}

/// Handle to an open patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchHandle {
    /// Engine-assigned instance id (`$0` for Pure Data)
    pub id: i32,
    /// Resolved path of the patch file
    pub path: PathBuf,
}

impl PatchHandle {
    pub fn instance_id(&self) -> i32 {
        self.id
    }
}

/// Message emitted by the engine towards the application
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeMessage {
    /// Console output
    Print(String),
    Bang { source: String },
    Float { source: String, value: f32 },
    Symbol { source: String, value: String },
    List { source: String, atoms: Vec<Atom> },
    Message {
        source: String,
        selector: String,
        atoms: Vec<Atom>,
    },
}

impl BridgeMessage {
    /// Source name the message was sent from (`None` for console output)
    pub fn source(&self) -> Option<&str> {
        match self {
            BridgeMessage::Print(_) => None,
            BridgeMessage::Bang { source }
            | BridgeMessage::Float { source, .. }
            | BridgeMessage::Symbol { source, .. }
            | BridgeMessage::List { source, .. }
            | BridgeMessage::Message { source, .. } => Some(source),
        }
    }
}

/// A block-based DSP engine
///
/// Every method is called with the bridge's lock held (see [`SharedBridge`]),
/// so implementations need no internal synchronization. The `send_*` methods
/// return `Ok(true)` if the receiver exists and `Ok(false)` if it does not.
pub trait DspBridge: Send + 'static {
    /// One-time setup. Repeating it with the same configuration is a no-op.
    fn init(
        &mut self,
        input_channels: usize,
        output_channels: usize,
        sample_rate: u32,
    ) -> BridgeResult<()>;

    /// Native block size in frames
    fn block_size(&self) -> usize {
        DSP_BLOCK_SIZE
    }

    /// Render `ticks` blocks into `output`, reading from `input`
    ///
    /// `ticks × block_size()` always equals `output.frames()`. When no input
    /// channels are configured `input` has zero samples.
    fn process_block(
        &mut self,
        ticks: usize,
        input: &SampleBuffer,
        output: &mut SampleBuffer,
    ) -> BridgeResult<()>;

    /// Enable or disable DSP computation (`pd dsp 1|0`)
    fn set_dsp_enabled(&mut self, enabled: bool) -> BridgeResult<bool> {
        let flag = if enabled { 1.0 } else { 0.0 };
        self.send_message(ENGINE_RECEIVER, DSP_SELECTOR, &[Atom::Float(flag)])
    }

    fn add_search_path(&mut self, path: &Path) -> BridgeResult<()>;

    /// Open `name` from `dir`
    fn open_patch(&mut self, name: &str, dir: &Path) -> BridgeResult<PatchHandle>;

    fn close_patch(&mut self, handle: &PatchHandle) -> BridgeResult<()>;

    fn send_bang(&mut self, receiver: &str) -> BridgeResult<bool>;

    fn send_float(&mut self, receiver: &str, value: f32) -> BridgeResult<bool>;

    fn send_symbol(&mut self, receiver: &str, value: &str) -> BridgeResult<bool>;

    fn send_list(&mut self, receiver: &str, atoms: &[Atom]) -> BridgeResult<bool>;

    fn send_message(&mut self, receiver: &str, selector: &str, atoms: &[Atom])
        -> BridgeResult<bool>;

    /// Start forwarding messages sent to `source` into [`drain_messages`](Self::drain_messages)
    fn bind(&mut self, _source: &str) -> BridgeResult<()> {
        Ok(())
    }

    fn unbind(&mut self, _source: &str) {}

    /// Hand every pending outbound message to `sink`
    fn drain_messages(&mut self, _sink: &mut dyn FnMut(BridgeMessage)) {}

    /// Free engine resources; called once at teardown
    fn release(&mut self) {}
}
