//! NullPort - no device, buffers come straight back

use super::{PlatformAudioPort, PlayState, PortConfig, PortError, PortEvents, PortResult};
use crate::buffer::SampleBuffer;

/// Port without a device
///
/// Output buffers are returned as soon as they are enqueued and input
/// requests come back filled with silence, so the mixer runs as fast as the
/// bridge can render.
#[derive(Debug, Default)]
pub struct NullPort {
    events: Option<PortEvents>,
    state: Option<PlayState>,
    blocks_played: u64,
}

impl NullPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output buffers received while playing
    pub fn blocks_played(&self) -> u64 {
        self.blocks_played
    }

    fn events(&self) -> PortResult<&PortEvents> {
        self.events.as_ref().ok_or(PortError::NotOpen)
    }
}

impl PlatformAudioPort for NullPort {
    fn open(&mut self, config: &PortConfig, events: PortEvents) -> PortResult<()> {
        if self.events.is_some() {
            return Err(PortError::AlreadyOpen);
        }
        log::info!(
            "NullPort opened: {} in / {} out @ {}Hz, {} frames",
            config.input_channels,
            config.output_channels,
            config.sample_rate,
            config.block_frames
        );
        self.events = Some(events);
        self.state = Some(PlayState::Paused);
        Ok(())
    }

    fn enqueue_output(&mut self, buffer: SampleBuffer) -> PortResult<()> {
        let playing = self.state == Some(PlayState::Playing);
        self.events()?.output_consumed(buffer);
        if playing {
            self.blocks_played += 1;
        }
        Ok(())
    }

    fn enqueue_input_request(&mut self, mut buffer: SampleBuffer) -> PortResult<()> {
        buffer.silence();
        self.events()?.input_ready(buffer);
        Ok(())
    }

    fn set_play_state(&mut self, state: PlayState) -> PortResult<()> {
        if self.events.is_none() {
            return Err(PortError::NotOpen);
        }
        self.state = Some(state);
        Ok(())
    }

    fn close(&mut self) {
        if self.events.take().is_some() {
            log::info!("NullPort closed after {} blocks", self.blocks_played);
        }
        self.state = None;
    }
}
