//! Engine lifecycle state, last-error slot and mixer counters

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

/// Lifecycle state of an [`AudioEngine`](super::AudioEngine)
///
/// `Created → Playing ⇄ Paused → Closed`. Nothing leaves `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Created,
    Playing,
    Paused,
    Closed,
}

impl EngineState {
    pub fn name(&self) -> &'static str {
        match self {
            EngineState::Created => "created",
            EngineState::Playing => "playing",
            EngineState::Paused => "paused",
            EngineState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Category of the most recently recorded error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ErrorKind {
    #[default]
    None = 0,
    Init = 1,
    PatchLoad = 2,
    DspProcess = 3,
    PlatformIo = 4,
    EngineClosed = 5,
}

impl ErrorKind {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ErrorKind::Init,
            2 => ErrorKind::PatchLoad,
            3 => ErrorKind::DspProcess,
            4 => ErrorKind::PlatformIo,
            5 => ErrorKind::EngineClosed,
            _ => ErrorKind::None,
        }
    }

    pub fn is_error(&self) -> bool {
        *self != ErrorKind::None
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::None => "none",
            ErrorKind::Init => "init",
            ErrorKind::PatchLoad => "patch-load",
            ErrorKind::DspProcess => "dsp-process",
            ErrorKind::PlatformIo => "platform-io",
            ErrorKind::EngineClosed => "engine-closed",
        };
        f.write_str(name)
    }
}

/// Single last-error slot shared by the engine, mixer thread and control handles
///
/// Lock-free so the mixer can record per-block failures without blocking.
#[derive(Debug, Default)]
pub struct ErrorState {
    last: AtomicU8,
    fatal: AtomicBool,
}

impl ErrorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, kind: ErrorKind) {
        self.last.store(kind as u8, Ordering::Release);
    }

    /// Record an error that stops the real-time loop
    pub fn record_fatal(&self, kind: ErrorKind) {
        self.record(kind);
        self.fatal.store(true, Ordering::Release);
    }

    /// Most recent error, not cleared by reading
    pub fn last(&self) -> ErrorKind {
        ErrorKind::from_u8(self.last.load(Ordering::Acquire))
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::Acquire)
    }
}

/// Counters updated by the mixer thread
#[derive(Debug, Default)]
pub struct MixerStats {
    cycles: AtomicU64,
    silent_blocks: AtomicU64,
    outputs_enqueued: AtomicU64,
    inputs_requested: AtomicU64,
}

impl MixerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn silent_block(&self) {
        self.silent_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn output_enqueued(&self) {
        self.outputs_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn input_requested(&self) {
        self.inputs_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            silent_blocks: self.silent_blocks.load(Ordering::Relaxed),
            outputs_enqueued: self.outputs_enqueued.load(Ordering::Relaxed),
            inputs_requested: self.inputs_requested.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`MixerStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Completed mixer iterations
    pub cycles: u64,
    /// Blocks replaced with silence after a DSP failure
    pub silent_blocks: u64,
    /// Output buffers handed to the port (priming included)
    pub outputs_enqueued: u64,
    /// Input buffers handed to the port for capture (priming included)
    pub inputs_requested: u64,
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cycles={} silent={} out={} in={}",
            self.cycles, self.silent_blocks, self.outputs_enqueued, self.inputs_requested
        )
    }
}
