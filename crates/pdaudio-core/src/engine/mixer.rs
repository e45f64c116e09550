//! Mixer loop - the producer side of the double buffer
//!
//! Runs on its own thread while the engine is playing. Each iteration:
//!
//! 1. with input configured, wait until the input buffer to drain is home
//! 2. render one block under the bridge lock (silence on failure)
//! 3. wait until the previous output buffer has been played
//! 4. hand the fresh output buffer to the port
//! 5. with input configured, hand the drained input buffer back for capture
//!
//! The buffer handed off in step 4 is the one written in step 2; the buffer
//! written in the next step 2 is the other slot, which step 3 guaranteed is
//! back from the port. A stop request short-circuits both waits.

use std::sync::Arc;

use super::signal::{ReadySignal, Wake};
use super::state::{ErrorKind, ErrorState, MixerStats};
use crate::bridge::{DspBridge, SharedBridge};
use crate::buffer::{DoubleBuffer, SampleBuffer};
use crate::port::{PlatformAudioPort, PortError};

/// Ready signals for both directions
#[derive(Clone, Default)]
pub(crate) struct Signals {
    pub output: Arc<ReadySignal<SampleBuffer>>,
    pub input: Arc<ReadySignal<SampleBuffer>>,
}

impl Signals {
    pub fn arm(&self) {
        self.output.arm();
        self.input.arm();
    }

    pub fn stop(&self) {
        self.output.stop();
        self.input.stop();
    }

    pub fn notify(&self) {
        self.output.notify();
        self.input.notify();
    }
}

/// Everything the mixer thread owns while it runs
///
/// Moved onto the thread by `play()` and handed back through the join handle.
pub(crate) struct Mixer<B, P> {
    pub port: P,
    pub output: DoubleBuffer,
    pub input: DoubleBuffer,
    pub bridge: SharedBridge<B>,
    pub signals: Signals,
    pub errors: Arc<ErrorState>,
    pub stats: Arc<MixerStats>,
    pub ticks: usize,
    pub has_input: bool,
}

/// Collect returned buffers until `done` holds; `false` means stop was requested
fn await_buffers(
    signal: &ReadySignal<SampleBuffer>,
    buffers: &mut DoubleBuffer,
    done: fn(&DoubleBuffer) -> bool,
) -> bool {
    loop {
        if signal.is_stopped() {
            return false;
        }
        signal.drain(|b| buffers.reclaim(b));
        if done(buffers) {
            return true;
        }
        if signal.wait_until_ready_or_stopped(|b| buffers.reclaim(b)) == Wake::Stopped {
            return false;
        }
    }
}

fn prepared_is_home(buffers: &DoubleBuffer) -> bool {
    buffers.prepared().is_some()
}

impl<B: DspBridge, P: PlatformAudioPort> Mixer<B, P> {
    /// Return every buffer the port has handed back so far
    pub fn reclaim_returned(&mut self) {
        let Self {
            output,
            input,
            signals,
            ..
        } = self;
        signals.output.drain(|b| output.reclaim(b));
        signals.input.drain(|b| input.reclaim(b));
    }

    /// Silence the outputs and hand the first buffers to the port
    ///
    /// Output slot 0 goes out as one block of silence; the mixer renders into
    /// slot 1 first. Input slot 0 goes out for capture while slot 1 (silent)
    /// is processed first, so the input signal starts raised.
    pub fn prime(&mut self) -> Result<(), PortError> {
        self.output.silence_all();
        self.output.rewind();
        self.input.silence_all();
        self.input.rewind();

        if let Some(buffer) = self.output.hand_off() {
            self.port.enqueue_output(buffer)?;
            self.stats.output_enqueued();
        }
        if self.has_input {
            if let Some(buffer) = self.input.hand_off() {
                self.port.enqueue_input_request(buffer)?;
                self.stats.input_requested();
            }
            self.signals.input.raise();
        }
        self.signals.notify();
        Ok(())
    }

    pub fn run(mut self) -> Self {
        log::debug!("Mixer loop started ({} ticks per block)", self.ticks);

        loop {
            if self.signals.output.is_stopped() {
                break;
            }
            if self.has_input && !await_buffers(&self.signals.input, &mut self.input, prepared_is_home) {
                break;
            }

            self.render();

            if !await_buffers(&self.signals.output, &mut self.output, DoubleBuffer::is_complete) {
                break;
            }

            if let Err(e) = self.submit() {
                log::error!("Mixer: audio port failed, stopping: {}", e);
                self.errors.record_fatal(ErrorKind::PlatformIo);
                break;
            }
            self.stats.cycle();
        }

        log::debug!("Mixer loop stopped");
        self
    }

    /// Step 2: fill the prepared output buffer under the bridge lock
    fn render(&mut self) {
        let ticks = self.ticks;
        let (Some(input), Some(output)) = (self.input.prepared(), self.output.prepared_mut()) else {
            log::error!("Mixer: prepared buffer is not home, skipping block");
            return;
        };

        let result = self
            .bridge
            .with(|bridge| bridge.process_block(ticks, input, &mut *output));

        match result {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                log::warn!("Mixer: DSP block failed, substituting silence: {}", e);
                self.errors.record(ErrorKind::DspProcess);
                output.silence();
                self.stats.silent_block();
            }
            None => {
                output.silence();
                self.stats.silent_block();
            }
        }
    }

    /// Steps 4 and 5: hand off output, then the drained input
    fn submit(&mut self) -> Result<(), PortError> {
        if let Some(buffer) = self.output.hand_off() {
            self.port.enqueue_output(buffer)?;
            self.stats.output_enqueued();
        }
        if self.has_input {
            if let Some(buffer) = self.input.hand_off() {
                self.port.enqueue_input_request(buffer)?;
                self.stats.input_requested();
            }
        }
        Ok(())
    }
}
