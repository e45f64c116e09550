//! Scripted bridge and port for engine tests

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::bridge::{Atom, BridgeError, BridgeResult, DspBridge, PatchHandle, DSP_SELECTOR, ENGINE_RECEIVER};
use crate::buffer::{BufferId, SampleBuffer};
use crate::port::{PlatformAudioPort, PlayState, PortConfig, PortError, PortEvents, PortResult};
use crate::types::DSP_BLOCK_SIZE;

/// Value the fake bridge writes into every rendered sample
pub const FILL: f32 = 0.5;

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// Buffers currently owned by the port, shared by the fake bridge and port
///
/// The bridge reports a violation whenever it is asked to write a buffer the
/// port still holds.
#[derive(Clone, Default)]
pub struct OwnershipTracker {
    held: Arc<Mutex<HashSet<BufferId>>>,
    violations: Arc<AtomicUsize>,
}

impl OwnershipTracker {
    fn held(&self) -> MutexGuard<'_, HashSet<BufferId>> {
        self.held.lock().unwrap()
    }

    pub fn acquire(&self, id: BufferId) {
        if !self.held().insert(id) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn release(&self, id: BufferId) {
        self.held().remove(&id);
    }

    pub fn check_writable(&self, id: BufferId) {
        if self.held().contains(&id) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }
}

/// What the fake bridge saw
#[derive(Debug, Default)]
pub struct BridgeLog {
    pub init_calls: usize,
    pub ticks: Vec<usize>,
    pub frames: Vec<usize>,
    pub sample_counts: Vec<usize>,
    pub output_slots: Vec<usize>,
    /// First input sample of each block, `None` without input channels
    pub first_inputs: Vec<Option<f32>>,
    /// Every `pd dsp` message, in order
    pub dsp: Vec<bool>,
    pub floats: Vec<(String, f32)>,
    pub released: bool,
}

/// Handle the test keeps after moving the bridge into the engine
#[derive(Clone, Default)]
pub struct BridgeProbe {
    log: Arc<Mutex<BridgeLog>>,
    fail_blocks: Arc<AtomicUsize>,
}

impl BridgeProbe {
    pub fn log(&self) -> MutexGuard<'_, BridgeLog> {
        self.log.lock().unwrap()
    }

    /// Make the next `n` process calls fail
    pub fn fail_next_blocks(&self, n: usize) {
        self.fail_blocks.store(n, Ordering::SeqCst);
    }

    pub fn blocks(&self) -> usize {
        self.log().ticks.len()
    }
}

pub struct FakeBridge {
    probe: BridgeProbe,
    block_size: usize,
    reject_init: bool,
    tracker: Option<OwnershipTracker>,
}

impl FakeBridge {
    pub fn new() -> (Self, BridgeProbe) {
        let probe = BridgeProbe::default();
        let bridge = Self {
            probe: probe.clone(),
            block_size: DSP_BLOCK_SIZE,
            reject_init: false,
            tracker: None,
        };
        (bridge, probe)
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn rejecting_init(mut self) -> Self {
        self.reject_init = true;
        self
    }

    pub fn with_tracker(mut self, tracker: OwnershipTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }
}

impl DspBridge for FakeBridge {
    fn init(&mut self, input_channels: usize, output_channels: usize, sample_rate: u32) -> BridgeResult<()> {
        self.probe.log().init_calls += 1;
        if self.reject_init {
            return Err(BridgeError::AudioConfigFailed {
                input_channels,
                output_channels,
                sample_rate,
                reason: "rejected".to_string(),
            });
        }
        Ok(())
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn process_block(&mut self, ticks: usize, input: &SampleBuffer, output: &mut SampleBuffer) -> BridgeResult<()> {
        if let Some(tracker) = &self.tracker {
            tracker.check_writable(output.id());
        }
        {
            let mut log = self.probe.log();
            log.ticks.push(ticks);
            log.frames.push(output.frames());
            log.sample_counts.push(output.sample_count());
            log.output_slots.push(output.slot());
            log.first_inputs.push(input.get_f32(0));
        }

        // Garbage first, so a failed block is only silent if the engine cleans up
        for i in 0..output.sample_count() {
            output.set_f32(i, FILL);
        }

        let pending = self.probe.fail_blocks.load(Ordering::SeqCst);
        if pending > 0 {
            self.probe.fail_blocks.store(pending - 1, Ordering::SeqCst);
            return Err(BridgeError::ProcessFailed("scripted failure".to_string()));
        }
        Ok(())
    }

    fn add_search_path(&mut self, _path: &Path) -> BridgeResult<()> {
        Ok(())
    }

    fn open_patch(&mut self, name: &str, dir: &Path) -> BridgeResult<PatchHandle> {
        if name.ends_with(".pd") {
            Ok(PatchHandle {
                id: 1001,
                path: dir.join(name),
            })
        } else {
            Err(BridgeError::PatchNotFound(PathBuf::from(name)))
        }
    }

    fn close_patch(&mut self, _handle: &PatchHandle) -> BridgeResult<()> {
        Ok(())
    }

    fn send_bang(&mut self, receiver: &str) -> BridgeResult<bool> {
        Ok(receiver == "known")
    }

    fn send_float(&mut self, receiver: &str, value: f32) -> BridgeResult<bool> {
        self.probe.log().floats.push((receiver.to_string(), value));
        Ok(receiver == "known")
    }

    fn send_symbol(&mut self, receiver: &str, _value: &str) -> BridgeResult<bool> {
        Ok(receiver == "known")
    }

    fn send_list(&mut self, receiver: &str, _atoms: &[Atom]) -> BridgeResult<bool> {
        Ok(receiver == "known")
    }

    fn send_message(&mut self, receiver: &str, selector: &str, atoms: &[Atom]) -> BridgeResult<bool> {
        if receiver == ENGINE_RECEIVER && selector == DSP_SELECTOR {
            let on = atoms.first().and_then(Atom::as_float).unwrap_or(0.0) != 0.0;
            self.probe.log().dsp.push(on);
            return Ok(true);
        }
        Ok(receiver == "known")
    }

    fn release(&mut self) {
        self.probe.log().released = true;
    }
}

/// What the fake port saw
#[derive(Debug, Default)]
pub struct PortLog {
    pub opens: usize,
    pub closes: usize,
    pub play_states: Vec<PlayState>,
    /// Slot and whether it was silent, per enqueued output buffer
    pub outputs: Vec<(usize, bool)>,
    pub input_requests: usize,
}

#[derive(Default)]
struct PortShared {
    log: PortLog,
    events: Option<PortEvents>,
    held_outputs: VecDeque<SampleBuffer>,
    held_inputs: VecDeque<SampleBuffer>,
    fail_outputs_after: Option<usize>,
    reject_open: bool,
}

/// Handle the test keeps after moving the port into the engine
#[derive(Clone, Default)]
pub struct PortProbe {
    shared: Arc<Mutex<PortShared>>,
}

impl PortProbe {
    fn lock(&self) -> MutexGuard<'_, PortShared> {
        self.shared.lock().unwrap()
    }

    pub fn log(&self) -> MappedLog<'_> {
        MappedLog(self.lock())
    }

    /// Fail every output enqueue once `n` buffers have been accepted
    pub fn fail_outputs_after(&self, n: usize) {
        self.lock().fail_outputs_after = Some(n);
    }

    pub fn reject_open(&self) {
        self.lock().reject_open = true;
    }

    pub fn held_outputs(&self) -> usize {
        self.lock().held_outputs.len()
    }

    /// Play the oldest held output buffer, as a driver callback would
    pub fn consume_output(&self, tracker: Option<&OwnershipTracker>) -> bool {
        let (buffer, events) = {
            let mut shared = self.lock();
            (shared.held_outputs.pop_front(), shared.events.clone())
        };
        match (buffer, events) {
            (Some(buffer), Some(events)) => {
                if let Some(tracker) = tracker {
                    tracker.release(buffer.id());
                }
                events.output_consumed(buffer);
                true
            }
            _ => false,
        }
    }

    /// Fill the oldest held input buffer with `value` and return it
    pub fn capture_input(&self, value: f32) -> bool {
        let (buffer, events) = {
            let mut shared = self.lock();
            (shared.held_inputs.pop_front(), shared.events.clone())
        };
        match (buffer, events) {
            (Some(mut buffer), Some(events)) => {
                for i in 0..buffer.sample_count() {
                    buffer.set_f32(i, value);
                }
                events.input_ready(buffer);
                true
            }
            _ => false,
        }
    }
}

pub struct MappedLog<'a>(MutexGuard<'a, PortShared>);

impl std::ops::Deref for MappedLog<'_> {
    type Target = PortLog;

    fn deref(&self) -> &PortLog {
        &self.0.log
    }
}

/// Port that holds buffers until the test (or a pause) gives them back
///
/// In auto-return mode it behaves like a device with zero latency: outputs
/// come straight back and input requests are filled at once.
pub struct HoldingPort {
    probe: PortProbe,
    auto_return: bool,
    tracker: Option<OwnershipTracker>,
    open: bool,
}

impl HoldingPort {
    pub fn new() -> (Self, PortProbe) {
        let probe = PortProbe::default();
        let port = Self {
            probe: probe.clone(),
            auto_return: false,
            tracker: None,
            open: false,
        };
        (port, probe)
    }

    pub fn auto_return(mut self) -> Self {
        self.auto_return = true;
        self
    }

    pub fn with_tracker(mut self, tracker: OwnershipTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    fn events(&self) -> PortResult<PortEvents> {
        self.probe.lock().events.clone().ok_or(PortError::NotOpen)
    }

    fn return_all(&self) {
        let (outputs, inputs, events) = {
            let mut shared = self.probe.lock();
            let outputs: Vec<_> = shared.held_outputs.drain(..).collect();
            let inputs: Vec<_> = shared.held_inputs.drain(..).collect();
            (outputs, inputs, shared.events.clone())
        };
        let Some(events) = events else { return };
        for buffer in outputs {
            if let Some(tracker) = &self.tracker {
                tracker.release(buffer.id());
            }
            events.output_consumed(buffer);
        }
        for buffer in inputs {
            events.input_ready(buffer);
        }
    }
}

impl PlatformAudioPort for HoldingPort {
    fn open(&mut self, _config: &PortConfig, events: PortEvents) -> PortResult<()> {
        let mut shared = self.probe.lock();
        if shared.reject_open {
            return Err(PortError::NoDevices);
        }
        shared.log.opens += 1;
        shared.events = Some(events);
        self.open = true;
        Ok(())
    }

    fn enqueue_output(&mut self, buffer: SampleBuffer) -> PortResult<()> {
        let events = self.events()?;
        let accepted = {
            let mut shared = self.probe.lock();
            let limit = shared.fail_outputs_after;
            if limit.map_or(false, |n| shared.log.outputs.len() >= n) {
                false
            } else {
                shared.log.outputs.push((buffer.slot(), buffer.is_silent()));
                true
            }
        };

        if !accepted {
            events.output_consumed(buffer);
            return Err(PortError::StreamError("scripted device failure".to_string()));
        }

        if let Some(tracker) = &self.tracker {
            tracker.acquire(buffer.id());
        }
        if self.auto_return {
            if let Some(tracker) = &self.tracker {
                tracker.release(buffer.id());
            }
            events.output_consumed(buffer);
        } else {
            self.probe.lock().held_outputs.push_back(buffer);
        }
        Ok(())
    }

    fn enqueue_input_request(&mut self, buffer: SampleBuffer) -> PortResult<()> {
        let events = self.events()?;
        self.probe.lock().log.input_requests += 1;
        if self.auto_return {
            events.input_ready(buffer);
        } else {
            self.probe.lock().held_inputs.push_back(buffer);
        }
        Ok(())
    }

    fn set_play_state(&mut self, state: PlayState) -> PortResult<()> {
        if !self.open {
            return Err(PortError::NotOpen);
        }
        self.probe.lock().log.play_states.push(state);
        if state == PlayState::Paused {
            self.return_all();
        }
        Ok(())
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.return_all();
        self.open = false;
        let mut shared = self.probe.lock();
        shared.log.closes += 1;
        shared.events = None;
    }
}
