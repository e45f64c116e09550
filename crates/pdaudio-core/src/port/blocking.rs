//! BlockingStreamPort - blocking writes on a dedicated driver thread
//!
//! The blocking-stream model: the device accepts one buffer per blocking
//! write call. A driver thread owns the sink and source, receives buffers over
//! a channel, performs the write (or read), then fires the completion
//! callback. Commands are processed in order, so a pause acknowledgement
//! implies every earlier buffer has already been returned.
//!
//! ```text
//!  mixer ──Output(buf)──► ┌───────────────┐ ─write──► FrameSink
//!        ──Input(buf)───► │ driver thread │ ◄─read─── FrameSource
//!        ──Pause(ack)───► └───────┬───────┘
//!                                 │ output_consumed / input_ready
//!                                 ▼
//!                            PortEvents
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, Sender};

use super::stream::{FrameSink, FrameSource, SilenceSource};
use super::{PlatformAudioPort, PlayState, PortConfig, PortError, PortEvents, PortResult};
use crate::buffer::SampleBuffer;

enum DriverCommand {
    Output(SampleBuffer),
    Input(SampleBuffer),
    Play,
    Pause(Sender<()>),
    Shutdown,
}

/// First asynchronous failure reported by the driver thread
type Fault = Arc<Mutex<Option<String>>>;

struct StreamDriver {
    command_rx: Receiver<DriverCommand>,
    sink: Box<dyn FrameSink>,
    source: Box<dyn FrameSource>,
    events: PortEvents,
    fault: Fault,
    playing: bool,
}

impl StreamDriver {
    fn run(mut self) {
        log::debug!("Stream driver started");

        while let Ok(cmd) = self.command_rx.recv() {
            match cmd {
                DriverCommand::Output(buffer) => {
                    if self.playing {
                        if let Err(e) = self.sink.write(&buffer) {
                            self.record_fault(format!("write failed: {}", e));
                        }
                    }
                    self.events.output_consumed(buffer);
                }
                DriverCommand::Input(mut buffer) => {
                    if self.playing {
                        if let Err(e) = self.source.read(&mut buffer) {
                            self.record_fault(format!("read failed: {}", e));
                            buffer.silence();
                        }
                    } else {
                        buffer.silence();
                    }
                    self.events.input_ready(buffer);
                }
                DriverCommand::Play => self.playing = true,
                DriverCommand::Pause(ack) => {
                    self.playing = false;
                    let _ = ack.send(());
                }
                DriverCommand::Shutdown => break,
            }
        }

        if let Err(e) = self.sink.finish() {
            log::error!("Stream driver: failed to finish sink: {}", e);
        }
        log::debug!("Stream driver stopped");
    }

    fn record_fault(&self, message: String) {
        log::error!("Stream driver: {}", message);
        let mut fault = self.fault.lock().unwrap_or_else(PoisonError::into_inner);
        fault.get_or_insert(message);
    }
}

struct DriverHandle {
    command_tx: Sender<DriverCommand>,
    thread_handle: JoinHandle<()>,
    events: PortEvents,
}

/// Port backed by a blocking [`FrameSink`] (and optionally a [`FrameSource`])
pub struct BlockingStreamPort {
    sink: Option<Box<dyn FrameSink>>,
    source: Option<Box<dyn FrameSource>>,
    driver: Option<DriverHandle>,
    fault: Fault,
}

impl BlockingStreamPort {
    pub fn new(sink: impl FrameSink) -> Self {
        Self {
            sink: Some(Box::new(sink)),
            source: None,
            driver: None,
            fault: Arc::new(Mutex::new(None)),
        }
    }

    /// Capture from `source` instead of silence
    pub fn with_source(mut self, source: impl FrameSource) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    fn current_fault(&self) -> Option<String> {
        self.fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn send_buffer(&mut self, command: DriverCommand) -> PortResult<()> {
        let Some(driver) = &self.driver else {
            return Err(PortError::NotOpen);
        };

        if let Some(message) = self.current_fault() {
            give_back(&driver.events, command);
            return Err(PortError::StreamError(message));
        }

        driver.command_tx.send(command).map_err(|e| {
            give_back(&driver.events, e.0);
            PortError::DriverGone
        })
    }
}

// Return a buffer that never reached the driver
fn give_back(events: &PortEvents, command: DriverCommand) {
    match command {
        DriverCommand::Output(buffer) => events.output_consumed(buffer),
        DriverCommand::Input(buffer) => events.input_ready(buffer),
        _ => {}
    }
}

impl PlatformAudioPort for BlockingStreamPort {
    fn open(&mut self, config: &PortConfig, events: PortEvents) -> PortResult<()> {
        if self.driver.is_some() {
            return Err(PortError::AlreadyOpen);
        }

        let mut sink = self
            .sink
            .take()
            .ok_or_else(|| PortError::ConfigError("sink already consumed by a previous open".into()))?;
        let mut source = self
            .source
            .take()
            .unwrap_or_else(|| Box::new(SilenceSource));

        sink.prepare(config)?;
        if config.has_input() {
            source.prepare(config)?;
        }

        let (command_tx, command_rx) = crossbeam::channel::unbounded();
        let driver = StreamDriver {
            command_rx,
            sink,
            source,
            events: events.clone(),
            fault: Arc::clone(&self.fault),
            playing: false,
        };

        let thread_handle = thread::Builder::new()
            .name("audio-stream-driver".into())
            .spawn(move || driver.run())
            .map_err(PortError::ThreadSpawn)?;

        log::info!(
            "BlockingStreamPort opened: {} in / {} out @ {}Hz, {} frames",
            config.input_channels,
            config.output_channels,
            config.sample_rate,
            config.block_frames
        );

        self.driver = Some(DriverHandle {
            command_tx,
            thread_handle,
            events,
        });
        Ok(())
    }

    fn enqueue_output(&mut self, buffer: SampleBuffer) -> PortResult<()> {
        self.send_buffer(DriverCommand::Output(buffer))
    }

    fn enqueue_input_request(&mut self, buffer: SampleBuffer) -> PortResult<()> {
        self.send_buffer(DriverCommand::Input(buffer))
    }

    fn set_play_state(&mut self, state: PlayState) -> PortResult<()> {
        let driver = self.driver.as_ref().ok_or(PortError::NotOpen)?;
        match state {
            PlayState::Playing => driver
                .command_tx
                .send(DriverCommand::Play)
                .map_err(|_| PortError::DriverGone),
            PlayState::Paused => {
                let (ack_tx, ack_rx) = crossbeam::channel::bounded(1);
                driver
                    .command_tx
                    .send(DriverCommand::Pause(ack_tx))
                    .map_err(|_| PortError::DriverGone)?;
                ack_rx.recv().map_err(|_| PortError::DriverGone)
            }
        }
    }

    fn close(&mut self) {
        let Some(driver) = self.driver.take() else {
            return;
        };
        let _ = driver.command_tx.send(DriverCommand::Shutdown);
        if driver.thread_handle.join().is_err() {
            log::error!("Stream driver thread panicked");
        }
        log::info!("BlockingStreamPort closed");
    }
}

impl Drop for BlockingStreamPort {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferId;
    use crate::engine::ReadySignal;
    use crate::types::{Direction, SampleFormat};

    /// Sink recording the first sample of every write
    struct RecordingSink {
        written: Arc<Mutex<Vec<f32>>>,
        fail: bool,
    }

    impl FrameSink for RecordingSink {
        fn write(&mut self, buffer: &SampleBuffer) -> PortResult<()> {
            if self.fail {
                return Err(PortError::StreamError("device unplugged".into()));
            }
            self.written.lock().unwrap().push(buffer.get_f32(0).unwrap_or(0.0));
            Ok(())
        }
    }

    fn setup(fail: bool) -> (
        BlockingStreamPort,
        Arc<ReadySignal<SampleBuffer>>,
        Arc<ReadySignal<SampleBuffer>>,
        Arc<Mutex<Vec<f32>>>,
    ) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let mut port = BlockingStreamPort::new(RecordingSink {
            written: Arc::clone(&written),
            fail,
        });
        let output = Arc::new(ReadySignal::new());
        let input = Arc::new(ReadySignal::new());
        let config = PortConfig {
            input_channels: 1,
            output_channels: 2,
            sample_rate: 48000,
            block_frames: 64,
            format: SampleFormat::Float32,
        };
        port.open(&config, PortEvents::new(Arc::clone(&output), Arc::clone(&input)))
            .unwrap();
        (port, output, input, written)
    }

    fn buffer(direction: Direction, slot: usize, value: f32) -> SampleBuffer {
        let mut buf = SampleBuffer::new(BufferId { direction, slot }, SampleFormat::Float32, 64, 2);
        buf.set_f32(0, value);
        buf
    }

    #[test]
    fn test_writes_while_playing_and_returns_buffers() {
        let (mut port, output, input, written) = setup(false);
        port.set_play_state(PlayState::Playing).unwrap();
        port.enqueue_output(buffer(Direction::Output, 0, 0.25)).unwrap();
        port.enqueue_output(buffer(Direction::Output, 1, 0.5)).unwrap();
        port.enqueue_input_request(buffer(Direction::Input, 0, 0.75)).unwrap();

        // Pause acknowledges only after every earlier command ran
        port.set_play_state(PlayState::Paused).unwrap();
        assert_eq!(output.pending(), 2);
        assert_eq!(input.pending(), 1);
        assert_eq!(*written.lock().unwrap(), vec![0.25, 0.5]);

        // Silence source overwrote the capture buffer
        input.drain(|b| assert!(b.is_silent()));

        // Paused: returned unwritten
        port.enqueue_output(buffer(Direction::Output, 0, 0.9)).unwrap();
        port.set_play_state(PlayState::Paused).unwrap();
        assert_eq!(written.lock().unwrap().len(), 2);

        port.close();
        port.close();
    }

    #[test]
    fn test_write_failure_surfaces_on_next_enqueue() {
        let (mut port, output, _input, _written) = setup(true);
        port.set_play_state(PlayState::Playing).unwrap();
        port.enqueue_output(buffer(Direction::Output, 0, 0.1)).unwrap();
        port.set_play_state(PlayState::Paused).unwrap();

        let err = port.enqueue_output(buffer(Direction::Output, 1, 0.1)).unwrap_err();
        assert!(matches!(err, PortError::StreamError(_)));
        // Rejected buffer was handed back too
        assert_eq!(output.pending(), 2);
    }

    #[test]
    fn test_enqueue_before_open_fails() {
        let mut port = BlockingStreamPort::new(super::super::DiscardSink::new());
        assert!(matches!(
            port.enqueue_output(buffer(Direction::Output, 0, 0.0)),
            Err(PortError::NotOpen)
        ));
        // Never opened: close is a no-op
        port.close();
    }
}
