//! Platform audio ports
//!
//! A port moves sample buffers between the mixer thread and a device. The
//! mixer hands it whole buffers by value; the port gives each one back
//! through [`PortEvents`] once the device has played (output) or filled
//! (input) it. Those callbacks may fire on any thread, including a driver or
//! real-time callback thread, and never block beyond a short mutex.
//!
//! # Variants
//!
//! | Port                  | Model                     | Backing                     |
//! |-----------------------|---------------------------|-----------------------------|
//! | [`NullPort`]          | immediate return          | none (offline rendering)    |
//! | [`CallbackQueuePort`] | device pulls from a queue | [`ClockDevice`], CPAL       |
//! | [`BlockingStreamPort`]| blocking writes on a thread | [`FrameSink`]/[`FrameSource`] |
//!
//! # Contract
//!
//! - `enqueue_*` never blocks. If it fails, the buffer has already been
//!   handed back through the events when it returns.
//! - `set_play_state(Paused)` returns every buffer the port holds before it
//!   returns.
//! - `close` is idempotent and a no-op if `open` never succeeded.
//! - Asynchronous device failures surface as `Err` from the next enqueue.

mod blocking;
#[cfg(feature = "cpal")]
mod cpal_device;
mod error;
mod null;
mod queue;
mod stream;

use std::sync::Arc;

use crate::buffer::SampleBuffer;
use crate::engine::ReadySignal;
use crate::types::SampleFormat;

pub use blocking::BlockingStreamPort;
#[cfg(feature = "cpal")]
pub use cpal_device::CpalDevice;
pub use error::{PortError, PortResult};
pub use null::NullPort;
pub use queue::{CallbackDevice, CallbackQueuePort, ClockDevice, QueueDriver};
pub use stream::{ClockedSink, DiscardSink, FrameSink, FrameSource, SilenceSource, WavSink, WavSource};

/// Stream parameters a port is opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortConfig {
    pub input_channels: usize,
    pub output_channels: usize,
    pub sample_rate: u32,
    /// Frames per hand-off buffer
    pub block_frames: usize,
    pub format: SampleFormat,
}

impl PortConfig {
    pub fn has_input(&self) -> bool {
        self.input_channels > 0
    }

    /// Real-time duration of one buffer
    pub fn block_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.block_frames as f64 / self.sample_rate.max(1) as f64)
    }
}

/// Play state of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Playing,
    Paused,
}

/// Completion callbacks from the port back to the engine
///
/// Cheap to clone; every clone feeds the same pair of ready signals.
#[derive(Clone)]
pub struct PortEvents {
    output: Arc<ReadySignal<SampleBuffer>>,
    input: Arc<ReadySignal<SampleBuffer>>,
}

impl PortEvents {
    pub fn new(
        output: Arc<ReadySignal<SampleBuffer>>,
        input: Arc<ReadySignal<SampleBuffer>>,
    ) -> Self {
        Self { output, input }
    }

    /// An output buffer has been played and may be refilled
    pub fn output_consumed(&self, buffer: SampleBuffer) {
        self.output.deliver(buffer);
    }

    /// An input buffer has been filled by the device
    pub fn input_ready(&self, buffer: SampleBuffer) {
        self.input.deliver(buffer);
    }
}

impl std::fmt::Debug for PortEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortEvents")
            .field("output_pending", &self.output.pending())
            .field("input_pending", &self.input.pending())
            .finish()
    }
}

/// The native audio driver abstraction the engine talks to
pub trait PlatformAudioPort: Send + 'static {
    /// Acquire the device
    fn open(&mut self, config: &PortConfig, events: PortEvents) -> PortResult<()>;

    /// Hand a filled buffer to the device for playback
    fn enqueue_output(&mut self, buffer: SampleBuffer) -> PortResult<()>;

    /// Hand an empty buffer to the device for capture
    fn enqueue_input_request(&mut self, buffer: SampleBuffer) -> PortResult<()>;

    fn set_play_state(&mut self, state: PlayState) -> PortResult<()>;

    /// Release the device
    fn close(&mut self);
}
