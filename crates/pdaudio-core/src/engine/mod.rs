//! Audio engine - the double-buffered hand-off between mixer and driver
//!
//! # Architecture
//!
//! ```text
//!   mixer thread                              driver thread
//!  ┌─────────────────────┐                 ┌──────────────────┐
//!  │ wait input ready    │◄── input_ready ──│ capture finished │
//!  │ process_block (lock)│                 │                  │
//!  │ wait output ready   │◄─ output_consumed│ playback finished│
//!  │ enqueue_output ─────┼────────────────►│ play buffer      │
//!  │ enqueue_input ──────┼────────────────►│ capture buffer   │
//!  └─────────────────────┘                 └──────────────────┘
//! ```
//!
//! Buffers travel by value: the mixer moves a [`SampleBuffer`] into the port
//! and the port moves it back through [`PortEvents`]. A buffer is therefore
//! either owned by the mixer or by the driver, never both.
//!
//! [`SampleBuffer`]: crate::buffer::SampleBuffer
//! [`PortEvents`]: crate::port::PortEvents

mod error;
mod lifecycle;
mod mixer;
mod signal;
mod state;

pub use error::{EngineError, EngineResult};
pub use lifecycle::AudioEngine;
pub use signal::{ReadySignal, Wake};
pub use state::{EngineState, ErrorKind, ErrorState, MixerStats, StatsSnapshot};
