//! AudioEngine - lifecycle of the real-time audio path
//!
//! ```text
//!            play()            pause()
//!  Created ─────────► Playing ─────────► Paused
//!     │                  ▲                  │
//!     │                  └──────────────────┘
//!     │                        play()
//!     └────────── close() from any state ──────────► Closed
//! ```
//!
//! While playing, the [`Mixer`] (port + both double buffers) lives on the
//! `audio-mixer` thread. `pause()` stops and joins it, and the thread hands
//! the mixer back through its join handle.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::error::{EngineError, EngineResult};
use super::mixer::{Mixer, Signals};
use super::state::{EngineState, ErrorKind, ErrorState, MixerStats, StatsSnapshot};
use crate::bridge::{Atom, DspBridge, PatchHandle, Receiver, SharedBridge};
use crate::buffer::DoubleBuffer;
use crate::config::EngineConfig;
use crate::control::ControlSurface;
use crate::port::{PlatformAudioPort, PlayState, PortError, PortEvents};
use crate::types::Direction;

/// A double-buffered audio engine driving bridge `B` through port `P`
pub struct AudioEngine<B: DspBridge, P: PlatformAudioPort> {
    config: EngineConfig,
    ticks: usize,
    bridge: SharedBridge<B>,
    control: ControlSurface<B>,
    signals: Signals,
    errors: Arc<ErrorState>,
    stats: Arc<MixerStats>,
    state: EngineState,
    /// Mixer while not playing
    parked: Option<Mixer<B, P>>,
    /// Mixer thread while playing
    running: Option<JoinHandle<Option<Mixer<B, P>>>>,
}

impl<B: DspBridge, P: PlatformAudioPort> AudioEngine<B, P> {
    /// Initialize the bridge, open the port and allocate all four buffers
    ///
    /// Nothing is allocated on the audio path after this returns.
    pub fn create(config: EngineConfig, mut bridge: B, mut port: P) -> EngineResult<Self> {
        config.validate()?;

        bridge.init(config.input_channels, config.output_channels, config.sample_rate)?;

        let ticks = match config.ticks_per_block(bridge.block_size()) {
            Ok(ticks) => ticks,
            Err(e) => {
                bridge.release();
                return Err(e.into());
            }
        };

        for path in &config.search_paths {
            if let Err(e) = bridge.add_search_path(path) {
                log::warn!("Failed to add search path {}: {}", path.display(), e);
            }
        }

        let signals = Signals::default();
        let events = PortEvents::new(Arc::clone(&signals.output), Arc::clone(&signals.input));
        if let Err(e) = port.open(&config.port_config(), events) {
            bridge.release();
            return Err(EngineError::PortOpen(e));
        }

        let format = config.sample_format;
        let output = DoubleBuffer::new(Direction::Output, format, config.block_frames, config.output_channels);
        // With no input channels these stay empty and are never handed off
        let input = DoubleBuffer::new(Direction::Input, format, config.block_frames, config.input_channels);

        let errors = Arc::new(ErrorState::new());
        let stats = Arc::new(MixerStats::new());
        let bridge = SharedBridge::new(bridge);
        let control = ControlSurface::new(bridge.clone(), Arc::clone(&errors));

        let mixer = Mixer {
            port,
            output,
            input,
            bridge: bridge.clone(),
            signals: signals.clone(),
            errors: Arc::clone(&errors),
            stats: Arc::clone(&stats),
            ticks,
            has_input: config.input_channels > 0,
        };

        log::info!(
            "Audio engine created: {} in / {} out @ {}Hz, {} frames ({} ticks, {:.1}ms), {}",
            config.input_channels,
            config.output_channels,
            config.sample_rate,
            config.block_frames,
            ticks,
            config.latency_ms(),
            config.sample_format
        );

        Ok(Self {
            config,
            ticks,
            bridge,
            control,
            signals,
            errors,
            stats,
            state: EngineState::Created,
            parked: Some(mixer),
            running: None,
        })
    }

    fn fail<T>(&self, err: EngineError) -> EngineResult<T> {
        self.errors.record(err.kind());
        Err(err)
    }

    /// Start (or resume) the mixer thread
    ///
    /// A no-op while already playing.
    pub fn play(&mut self) -> EngineResult<()> {
        if self.mixer_died() {
            // Reap the exited thread so the port and buffers are parked again
            self.pause()?;
        }
        match self.state {
            EngineState::Closed => return self.fail(EngineError::Closed),
            EngineState::Playing => return Ok(()),
            EngineState::Created | EngineState::Paused => {}
        }
        if self.errors.is_fatal() {
            return self.fail(EngineError::PlatformIo(PortError::DriverGone));
        }
        let Some(mut mixer) = self.parked.take() else {
            return self.fail(EngineError::PlatformIo(PortError::DriverGone));
        };

        mixer.reclaim_returned();
        let input_ready = !mixer.has_input || mixer.input.is_complete();
        if !mixer.output.is_complete() || !input_ready {
            self.parked = Some(mixer);
            return self.fail(EngineError::PlatformIo(PortError::StreamError(
                "buffers still owned by the port".to_string(),
            )));
        }

        match self.control.set_dsp_enabled(true) {
            Ok(true) => {}
            Ok(false) => log::warn!("DSP engine ignored the dsp-on message"),
            Err(e) => {
                self.parked = Some(mixer);
                return Err(e);
            }
        }

        self.signals.arm();
        if let Err(e) = mixer.port.set_play_state(PlayState::Playing) {
            self.parked = Some(mixer);
            return self.fail(e.into());
        }
        if let Err(e) = mixer.prime() {
            if let Err(e) = mixer.port.set_play_state(PlayState::Paused) {
                log::warn!("Failed to pause port after priming error: {}", e);
            }
            mixer.reclaim_returned();
            self.parked = Some(mixer);
            return self.fail(e.into());
        }

        // The thread picks the mixer up from this channel, so a failed spawn
        // leaves it here to be parked again
        let (handoff_tx, handoff_rx) = crossbeam::channel::bounded::<Mixer<B, P>>(1);
        let thread_rx = handoff_rx.clone();
        if let Err(e) = handoff_tx.try_send(mixer) {
            self.parked = Some(e.into_inner());
            return self.fail(EngineError::Init("mixer hand-off channel closed".to_string()));
        }

        let spawned = thread::Builder::new()
            .name("audio-mixer".into())
            .spawn(move || thread_rx.recv().ok().map(Mixer::run));

        match spawned {
            Ok(handle) => {
                self.running = Some(handle);
                self.state = EngineState::Playing;
                log::info!("Audio engine playing");
                Ok(())
            }
            Err(e) => {
                self.signals.stop();
                if let Ok(mut mixer) = handoff_rx.try_recv() {
                    if let Err(e) = mixer.port.set_play_state(PlayState::Paused) {
                        log::warn!("Failed to pause port after spawn error: {}", e);
                    }
                    mixer.reclaim_returned();
                    self.parked = Some(mixer);
                }
                self.fail(EngineError::ThreadSpawn(e))
            }
        }
    }

    /// Stop the mixer thread and wait for it to exit
    ///
    /// Returns promptly even if the driver never delivers another buffer.
    /// A no-op unless playing.
    pub fn pause(&mut self) -> EngineResult<()> {
        match self.state {
            EngineState::Closed => return self.fail(EngineError::Closed),
            EngineState::Created | EngineState::Paused => return Ok(()),
            EngineState::Playing => {}
        }

        self.signals.stop();
        if let Some(mut mixer) = self.join_mixer() {
            if let Err(e) = mixer.port.set_play_state(PlayState::Paused) {
                log::error!("Failed to pause audio port: {}", e);
                self.errors.record(ErrorKind::PlatformIo);
            }
            mixer.reclaim_returned();
            if !mixer.output.is_complete() || (mixer.has_input && !mixer.input.is_complete()) {
                log::warn!(
                    "Port kept {} output / {} input buffers after pause",
                    mixer.output.in_flight(),
                    mixer.input.in_flight()
                );
            }
            self.parked = Some(mixer);
        }

        self.state = EngineState::Paused;
        log::info!("Audio engine paused ({})", self.stats.snapshot());
        Ok(())
    }

    /// Tear everything down: port, then bridge, then buffers
    ///
    /// Safe to call in any state; a second call does nothing.
    pub fn close(&mut self) {
        if self.state == EngineState::Closed {
            return;
        }

        self.signals.stop();
        let mixer = match self.join_mixer() {
            Some(mixer) => Some(mixer),
            None => self.parked.take(),
        };

        if let Some(mut mixer) = mixer {
            if let Err(e) = mixer.port.set_play_state(PlayState::Paused) {
                log::debug!("Port pause during close failed: {}", e);
            }
            mixer.port.close();
            mixer.reclaim_returned();
            if mixer.output.in_flight() + mixer.input.in_flight() > 0 {
                log::warn!("Closing with buffers still owned by the port");
            }
        }

        self.control.unsubscribe_all();
        if let Some(mut bridge) = self.bridge.take() {
            if let Err(e) = bridge.set_dsp_enabled(false) {
                log::debug!("dsp-off during close failed: {}", e);
            }
            bridge.release();
        }

        self.state = EngineState::Closed;
        log::info!("Audio engine closed");
    }

    fn join_mixer(&mut self) -> Option<Mixer<B, P>> {
        let handle = self.running.take()?;
        match handle.join() {
            Ok(mixer) => mixer,
            Err(_) => {
                log::error!("Mixer thread panicked");
                self.errors.record_fatal(ErrorKind::DspProcess);
                None
            }
        }
    }

    pub fn open_patch(&self, name: &str, dir: impl AsRef<std::path::Path>) -> EngineResult<PatchHandle> {
        self.control.open_patch(name, dir)
    }

    pub fn close_patch(&self, handle: &PatchHandle) -> EngineResult<()> {
        self.control.close_patch(handle)
    }

    pub fn add_search_path(&self, path: impl AsRef<std::path::Path>) -> EngineResult<()> {
        self.control.add_search_path(path)
    }

    pub fn send_bang(&self, receiver: &str) -> EngineResult<bool> {
        self.control.send_bang(receiver)
    }

    pub fn send_float(&self, receiver: &str, value: f32) -> EngineResult<bool> {
        self.control.send_float(receiver, value)
    }

    pub fn send_symbol(&self, receiver: &str, value: &str) -> EngineResult<bool> {
        self.control.send_symbol(receiver, value)
    }

    pub fn send_list(&self, receiver: &str, atoms: &[Atom]) -> EngineResult<bool> {
        self.control.send_list(receiver, atoms)
    }

    pub fn send_message(&self, receiver: &str, selector: &str, atoms: &[Atom]) -> EngineResult<bool> {
        self.control.send_message(receiver, selector, atoms)
    }

    pub fn set_dsp_enabled(&self, enabled: bool) -> EngineResult<bool> {
        self.control.set_dsp_enabled(enabled)
    }

    pub fn subscribe(&self, source: &str, receiver: Arc<dyn Receiver>) -> EngineResult<()> {
        self.control.subscribe(source, receiver)
    }

    pub fn unsubscribe(&self, source: &str, receiver: &Arc<dyn Receiver>) -> EngineResult<()> {
        self.control.unsubscribe(source, receiver)
    }

    pub fn poll_messages(&self) -> EngineResult<usize> {
        self.control.poll_messages()
    }

    /// Most recently recorded error, not cleared by reading
    pub fn last_error(&self) -> ErrorKind {
        self.errors.last()
    }

    /// Current state; a mixer stopped by a fatal error reports `Paused`
    pub fn state(&self) -> EngineState {
        if self.mixer_died() {
            EngineState::Paused
        } else {
            self.state
        }
    }

    fn mixer_died(&self) -> bool {
        self.state == EngineState::Playing && self.errors.is_fatal()
    }

    /// A handle for sending control messages from other threads
    pub fn control(&self) -> ControlSurface<B> {
        self.control.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// DSP ticks rendered per buffer
    pub fn ticks_per_block(&self) -> usize {
        self.ticks
    }

    /// The port, while the mixer thread is not running
    pub fn port(&self) -> Option<&P> {
        self.parked.as_ref().map(|m| &m.port)
    }
}

impl<B: DspBridge, P: PlatformAudioPort> Drop for AudioEngine<B, P> {
    fn drop(&mut self) {
        self.close();
    }
}

