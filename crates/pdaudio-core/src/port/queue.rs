//! CallbackQueuePort - the buffer-queue model
//!
//! The mixer pushes whole buffers into a lock-free `rtrb` ring. A device
//! callback pulls audio out of the [`QueueDriver`] in whatever period size the
//! device uses; once a whole buffer has been played (or captured) the driver
//! hands it back through [`PortEvents`].
//!
//! ```text
//!  mixer ──push──► [rtrb ring, depth 2] ──pop──► QueueDriver ◄── device callback
//!                                                    │         render / capture
//!                                                    ▼
//!                                          output_consumed / input_ready
//! ```
//!
//! The device callback is the only regular user of the driver lock; the
//! control thread takes it briefly to change play state or flush at pause.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{PlatformAudioPort, PlayState, PortConfig, PortError, PortEvents, PortResult};
use crate::buffer::SampleBuffer;
use crate::types::DOUBLE_BUFFER_LEN;

/// Device-side state: the queues, the partially played/captured buffers and
/// the completion callbacks
pub struct QueueDriver {
    output_rx: rtrb::Consumer<SampleBuffer>,
    input_rx: rtrb::Consumer<SampleBuffer>,
    current_output: Option<SampleBuffer>,
    output_pos: usize,
    current_input: Option<SampleBuffer>,
    input_pos: usize,
    events: PortEvents,
    playing: bool,
    underruns: u64,
    overruns: u64,
}

impl QueueDriver {
    fn new(
        output_rx: rtrb::Consumer<SampleBuffer>,
        input_rx: rtrb::Consumer<SampleBuffer>,
        events: PortEvents,
    ) -> Self {
        Self {
            output_rx,
            input_rx,
            current_output: None,
            output_pos: 0,
            current_input: None,
            input_pos: 0,
            events,
            playing: false,
            underruns: 0,
            overruns: 0,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Device periods that ran out of queued output
    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    /// Device periods captured with no buffer to put them in
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Fill one device period of interleaved output
    ///
    /// Called from the device callback. Gaps in the queue render silence.
    pub fn render(&mut self, out: &mut [f32]) {
        if !self.playing {
            out.fill(0.0);
            return;
        }

        let mut written = 0;
        while written < out.len() {
            if self.current_output.is_none() {
                match self.output_rx.pop() {
                    Ok(buffer) => {
                        self.current_output = Some(buffer);
                        self.output_pos = 0;
                    }
                    Err(_) => {
                        out[written..].fill(0.0);
                        self.underruns += 1;
                        return;
                    }
                }
            }

            let Some(buffer) = self.current_output.as_ref() else {
                break;
            };
            let n = buffer.read_f32(self.output_pos, &mut out[written..]);
            written += n;
            self.output_pos += n;

            if self.output_pos >= buffer.sample_count() {
                if let Some(done) = self.current_output.take() {
                    self.events.output_consumed(done);
                }
            }
        }
    }

    /// Store one device period of interleaved input
    pub fn capture(&mut self, input: &[f32]) {
        if !self.playing {
            return;
        }

        let mut read = 0;
        while read < input.len() {
            if self.current_input.is_none() {
                match self.input_rx.pop() {
                    Ok(buffer) => {
                        self.current_input = Some(buffer);
                        self.input_pos = 0;
                    }
                    Err(_) => {
                        self.overruns += 1;
                        return;
                    }
                }
            }

            let Some(buffer) = self.current_input.as_mut() else {
                break;
            };
            let n = buffer.write_f32(self.input_pos, &input[read..]);
            read += n;
            self.input_pos += n;

            if self.input_pos >= buffer.sample_count() {
                if let Some(done) = self.current_input.take() {
                    self.events.input_ready(done);
                }
            }
        }
    }

    fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }

    /// Stop and hand every held buffer back
    ///
    /// Partially captured input is zeroed before it is returned.
    pub fn flush(&mut self) {
        self.playing = false;

        if let Some(buffer) = self.current_output.take() {
            self.events.output_consumed(buffer);
        }
        while let Ok(buffer) = self.output_rx.pop() {
            self.events.output_consumed(buffer);
        }

        if let Some(mut buffer) = self.current_input.take() {
            buffer.silence();
            self.events.input_ready(buffer);
        }
        while let Ok(mut buffer) = self.input_rx.pop() {
            buffer.silence();
            self.events.input_ready(buffer);
        }
        self.output_pos = 0;
        self.input_pos = 0;
    }
}

/// Lock the driver from a control path, recovering from a poisoned lock
pub(crate) fn lock_driver(driver: &Mutex<QueueDriver>) -> MutexGuard<'_, QueueDriver> {
    driver.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A device that pumps a [`QueueDriver`] from its own callback
pub trait CallbackDevice: Send + 'static {
    /// Start calling `render` (and `capture` when input is configured)
    ///
    /// Failures after a successful start set `fault`.
    fn start(
        &mut self,
        driver: Arc<Mutex<QueueDriver>>,
        config: &PortConfig,
        fault: Arc<AtomicBool>,
    ) -> PortResult<()>;

    /// Stop the callbacks; must be safe to call when never started
    fn stop(&mut self);
}

/// Software clock standing in for a sound card
///
/// A thread renders one period every `period_frames / sample_rate` seconds
/// and captures silence.
pub struct ClockDevice {
    period_frames: usize,
    running: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    thread_handle: Option<JoinHandle<()>>,
}

impl ClockDevice {
    pub fn new(period_frames: usize) -> Self {
        Self {
            period_frames: period_frames.max(1),
            running: Arc::new(AtomicBool::new(false)),
            frames: Arc::new(AtomicU64::new(0)),
            thread_handle: None,
        }
    }

    /// Shared counter of frames rendered so far
    pub fn frames_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.frames)
    }
}

impl Default for ClockDevice {
    fn default() -> Self {
        Self::new(256)
    }
}

impl CallbackDevice for ClockDevice {
    fn start(
        &mut self,
        driver: Arc<Mutex<QueueDriver>>,
        config: &PortConfig,
        _fault: Arc<AtomicBool>,
    ) -> PortResult<()> {
        if self.thread_handle.is_some() {
            return Err(PortError::AlreadyOpen);
        }

        let period_frames = self.period_frames;
        let mut out = vec![0.0f32; period_frames * config.output_channels];
        let silence = vec![0.0f32; period_frames * config.input_channels];
        let period = Duration::from_secs_f64(period_frames as f64 / config.sample_rate.max(1) as f64);
        let running = Arc::clone(&self.running);
        let frames = Arc::clone(&self.frames);
        running.store(true, Ordering::Release);

        let handle = thread::Builder::new()
            .name("audio-clock".into())
            .spawn(move || {
                let mut next = Instant::now();
                while running.load(Ordering::Acquire) {
                    {
                        let mut driver = lock_driver(&driver);
                        driver.render(&mut out);
                        if !silence.is_empty() {
                            driver.capture(&silence);
                        }
                    }
                    frames.fetch_add(period_frames as u64, Ordering::Relaxed);

                    next += period;
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
            })
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                PortError::ThreadSpawn(e)
            })?;

        self.thread_handle = Some(handle);
        log::debug!("ClockDevice started: {} frames per period", period_frames);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                log::error!("Audio clock thread panicked");
            }
            log::debug!("ClockDevice stopped");
        }
    }
}

struct QueueShared {
    output_tx: rtrb::Producer<SampleBuffer>,
    input_tx: rtrb::Producer<SampleBuffer>,
    driver: Arc<Mutex<QueueDriver>>,
    fault: Arc<AtomicBool>,
    events: PortEvents,
}

/// Port driving a [`CallbackDevice`] through a buffer queue
pub struct CallbackQueuePort<D: CallbackDevice> {
    device: D,
    shared: Option<QueueShared>,
}

impl<D: CallbackDevice> CallbackQueuePort<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            shared: None,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    fn shared(&mut self) -> PortResult<&mut QueueShared> {
        self.shared.as_mut().ok_or(PortError::NotOpen)
    }
}

impl<D: CallbackDevice> PlatformAudioPort for CallbackQueuePort<D> {
    fn open(&mut self, config: &PortConfig, events: PortEvents) -> PortResult<()> {
        if self.shared.is_some() {
            return Err(PortError::AlreadyOpen);
        }

        let (output_tx, output_rx) = rtrb::RingBuffer::new(DOUBLE_BUFFER_LEN);
        let (input_tx, input_rx) = rtrb::RingBuffer::new(DOUBLE_BUFFER_LEN);
        let driver = Arc::new(Mutex::new(QueueDriver::new(output_rx, input_rx, events.clone())));
        let fault = Arc::new(AtomicBool::new(false));

        self.device
            .start(Arc::clone(&driver), config, Arc::clone(&fault))?;

        log::info!(
            "CallbackQueuePort opened: {} in / {} out @ {}Hz, {} frames",
            config.input_channels,
            config.output_channels,
            config.sample_rate,
            config.block_frames
        );

        self.shared = Some(QueueShared {
            output_tx,
            input_tx,
            driver,
            fault,
            events,
        });
        Ok(())
    }

    fn enqueue_output(&mut self, buffer: SampleBuffer) -> PortResult<()> {
        let shared = self.shared()?;
        if shared.fault.load(Ordering::Acquire) {
            shared.events.output_consumed(buffer);
            return Err(PortError::StreamError("device reported a failure".into()));
        }
        // Input-only streams: the device never renders, so nothing would pop it
        if buffer.sample_count() == 0 {
            shared.events.output_consumed(buffer);
            return Ok(());
        }
        shared.output_tx.push(buffer).map_err(|e| match e {
            rtrb::PushError::Full(buffer) => {
                shared.events.output_consumed(buffer);
                PortError::QueueFull("output")
            }
        })
    }

    fn enqueue_input_request(&mut self, buffer: SampleBuffer) -> PortResult<()> {
        let shared = self.shared()?;
        if shared.fault.load(Ordering::Acquire) {
            shared.events.input_ready(buffer);
            return Err(PortError::StreamError("device reported a failure".into()));
        }
        shared.input_tx.push(buffer).map_err(|e| match e {
            rtrb::PushError::Full(buffer) => {
                shared.events.input_ready(buffer);
                PortError::QueueFull("input")
            }
        })
    }

    fn set_play_state(&mut self, state: PlayState) -> PortResult<()> {
        let shared = self.shared()?;
        let mut driver = lock_driver(&shared.driver);
        match state {
            PlayState::Playing => driver.set_playing(true),
            PlayState::Paused => driver.flush(),
        }
        Ok(())
    }

    fn close(&mut self) {
        let Some(shared) = self.shared.take() else {
            return;
        };

        // Stop the callbacks before tearing down the queues they read
        self.device.stop();
        let mut driver = lock_driver(&shared.driver);
        driver.flush();
        log::info!(
            "CallbackQueuePort closed ({} underruns, {} overruns)",
            driver.underruns(),
            driver.overruns()
        );
    }
}

impl<D: CallbackDevice> Drop for CallbackQueuePort<D> {
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

    /// Device that never calls back; tests pump the driver by hand
    #[derive(Default)]
    struct ManualDevice {
        driver: Option<Arc<Mutex<QueueDriver>>>,
        stops: usize,
    }

    impl CallbackDevice for ManualDevice {
        fn start(
            &mut self,
            driver: Arc<Mutex<QueueDriver>>,
            _config: &PortConfig,
            _fault: Arc<AtomicBool>,
        ) -> PortResult<()> {
            self.driver = Some(driver);
            Ok(())
        }

        fn stop(&mut self) {
            self.stops += 1;
        }
    }

    fn config(input_channels: usize) -> PortConfig {
        PortConfig {
            input_channels,
            output_channels: 2,
            sample_rate: 48000,
            block_frames: 64,
            format: SampleFormat::Float32,
        }
    }

    fn buffer(direction: Direction, slot: usize, channels: usize, value: f32) -> SampleBuffer {
        let mut buf = SampleBuffer::new(BufferId { direction, slot }, SampleFormat::Float32, 64, channels);
        let n = buf.sample_count();
        buf.write_f32(0, &vec![value; n]);
        buf
    }

    fn open(
        input_channels: usize,
    ) -> (
        CallbackQueuePort<ManualDevice>,
        Arc<ReadySignal<SampleBuffer>>,
        Arc<ReadySignal<SampleBuffer>>,
    ) {
        let output = Arc::new(ReadySignal::new());
        let input = Arc::new(ReadySignal::new());
        let mut port = CallbackQueuePort::new(ManualDevice::default());
        port.open(
            &config(input_channels),
            PortEvents::new(Arc::clone(&output), Arc::clone(&input)),
        )
        .unwrap();
        (port, output, input)
    }

    #[test]
    fn test_render_across_device_periods() {
        let (mut port, output, _input) = open(0);
        port.set_play_state(PlayState::Playing).unwrap();
        port.enqueue_output(buffer(Direction::Output, 0, 2, 0.5)).unwrap();

        let driver = Arc::clone(port.device().driver.as_ref().unwrap());
        // 128 samples per buffer, device period of 48 samples
        let mut period = vec![0.0f32; 48];
        lock_driver(&driver).render(&mut period);
        lock_driver(&driver).render(&mut period);
        assert_eq!(output.pending(), 0);

        lock_driver(&driver).render(&mut period);
        assert_eq!(output.pending(), 1);
        // Last 16 samples came from an empty queue
        assert_eq!(period[31], 0.5);
        assert_eq!(period[32], 0.0);
        assert_eq!(lock_driver(&driver).underruns(), 1);
    }

    #[test]
    fn test_queue_depth_is_bounded() {
        let (mut port, output, _input) = open(0);
        port.enqueue_output(buffer(Direction::Output, 0, 2, 0.1)).unwrap();
        port.enqueue_output(buffer(Direction::Output, 1, 2, 0.1)).unwrap();

        let err = port
            .enqueue_output(buffer(Direction::Output, 0, 2, 0.1))
            .unwrap_err();
        assert!(matches!(err, PortError::QueueFull("output")));
        assert_eq!(output.pending(), 1);
    }

    #[test]
    fn test_pause_flushes_everything() {
        let (mut port, output, input) = open(1);
        port.set_play_state(PlayState::Playing).unwrap();
        port.enqueue_output(buffer(Direction::Output, 0, 2, 0.5)).unwrap();
        port.enqueue_input_request(buffer(Direction::Input, 0, 1, 0.9)).unwrap();

        let driver = Arc::clone(port.device().driver.as_ref().unwrap());
        lock_driver(&driver).capture(&[0.25; 16]);

        port.set_play_state(PlayState::Paused).unwrap();
        assert_eq!(output.pending(), 1);
        assert_eq!(input.pending(), 1);
        input.drain(|b| assert!(b.is_silent()));
        assert!(!lock_driver(&driver).is_playing());
    }

    #[test]
    fn test_capture_completes_buffer() {
        let (mut port, _output, input) = open(1);
        port.set_play_state(PlayState::Playing).unwrap();
        port.enqueue_input_request(buffer(Direction::Input, 0, 1, 0.0)).unwrap();

        let driver = Arc::clone(port.device().driver.as_ref().unwrap());
        lock_driver(&driver).capture(&[0.25; 40]);
        assert_eq!(input.pending(), 0);
        lock_driver(&driver).capture(&[0.25; 40]);
        assert_eq!(input.pending(), 1);
        input.drain(|b| assert_eq!(b.get_f32(63), Some(0.25)));
    }

    #[test]
    fn test_empty_output_returns_at_once() {
        let (mut port, output, _input) = open(1);
        port.set_play_state(PlayState::Playing).unwrap();
        for slot in [0, 1, 0] {
            port.enqueue_output(buffer(Direction::Output, slot, 0, 0.0)).unwrap();
        }
        assert_eq!(output.pending(), 3);
    }

    #[test]
    fn test_fault_surfaces_on_enqueue() {
        let (mut port, output, _input) = open(0);
        port.shared.as_ref().unwrap().fault.store(true, Ordering::Release);
        let err = port
            .enqueue_output(buffer(Direction::Output, 0, 2, 0.0))
            .unwrap_err();
        assert!(matches!(err, PortError::StreamError(_)));
        assert_eq!(output.pending(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut port, _output, _input) = open(0);
        port.close();
        port.close();
        assert_eq!(port.device().stops, 1);

        let mut never_opened = CallbackQueuePort::new(ManualDevice::default());
        never_opened.close();
        assert_eq!(never_opened.device().stops, 0);
    }

    #[test]
    fn test_clock_device_pumps_driver() {
        let output = Arc::new(ReadySignal::new());
        let input = Arc::new(ReadySignal::new());
        let device = ClockDevice::new(64);
        let frames = device.frames_counter();
        let mut port = CallbackQueuePort::new(device);
        port.open(&config(0), PortEvents::new(Arc::clone(&output), input))
            .unwrap();
        port.set_play_state(PlayState::Playing).unwrap();
        port.enqueue_output(buffer(Direction::Output, 0, 2, 0.5)).unwrap();

        let mut got = 0;
        while got == 0 {
            output.wait_until_ready_or_stopped(|_| got += 1);
        }
        port.close();
        assert!(frames.load(Ordering::Relaxed) >= 64);
    }
}
