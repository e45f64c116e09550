//! ToneBridge - built-in oscillator engine
//!
//! A small stand-in for a patch interpreter: one oscillator, an input monitor
//! and a handful of named receivers. "Patches" are YAML presets:
//!
//! ```yaml
//! freq: 220.0
//! gain: 0.3
//! wave: saw
//! monitor: 0.0
//! ```
//!
//! # Receivers
//!
//! | name      | payload              | effect                          |
//! |-----------|----------------------|---------------------------------|
//! | `freq`    | float (Hz)           | oscillator frequency            |
//! | `gain`    | float 0-1            | oscillator level                |
//! | `monitor` | float 0-1            | input pass-through level        |
//! | `wave`    | symbol               | `sine`, `square` or `saw`       |
//! | `tone`    | list `[freq, gain]`  | both at once; bang resets phase |
//! | `pd`      | message `dsp 0/1`    | DSP on/off                      |
//!
//! Binding `level` reports the peak of the last rendered block on every drain.

use std::collections::HashSet;
use std::f32::consts::TAU;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{Atom, BridgeError, BridgeMessage, BridgeResult, DspBridge, PatchHandle};
use super::{DSP_SELECTOR, ENGINE_RECEIVER};
use crate::buffer::SampleBuffer;
use crate::types::{DSP_BLOCK_SIZE, MAX_CHANNELS};

/// Outbound source carrying the last block's peak level
pub const LEVEL_SOURCE: &str = "level";

const RECEIVERS: [&str; 6] = ["freq", "gain", "monitor", "wave", "tone", ENGINE_RECEIVER];

/// First id handed out for an opened preset
const FIRST_PATCH_ID: i32 = 1000;

/// Cap on queued console lines between drains
const MAX_PENDING_PRINTS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    #[default]
    Sine,
    Square,
    Saw,
}

impl Waveform {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sine" => Some(Waveform::Sine),
            "square" => Some(Waveform::Square),
            "saw" => Some(Waveform::Saw),
            _ => None,
        }
    }

    /// Value at `phase` in [0, 1)
    #[inline]
    fn sample(&self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => (phase * TAU).sin(),
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Saw => 2.0 * phase - 1.0,
        }
    }
}

/// Oscillator preset, also the on-disk patch format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneSettings {
    pub freq: f32,
    pub gain: f32,
    pub monitor: f32,
    pub wave: Waveform,
}

impl Default for ToneSettings {
    fn default() -> Self {
        Self {
            freq: 440.0,
            gain: 0.25,
            monitor: 0.0,
            wave: Waveform::Sine,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ToneConfig {
    input_channels: usize,
    output_channels: usize,
    sample_rate: u32,
}

impl std::fmt::Display for ToneConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} in / {} out @ {}Hz",
            self.input_channels, self.output_channels, self.sample_rate
        )
    }
}

/// Single-oscillator engine implementing [`DspBridge`]
#[derive(Debug)]
pub struct ToneBridge {
    config: Option<ToneConfig>,
    dsp_enabled: bool,
    settings: ToneSettings,
    phase: f32,
    last_peak: f32,
    search_paths: Vec<PathBuf>,
    patches: Vec<PatchHandle>,
    next_patch_id: i32,
    bound: HashSet<String>,
    pending: Vec<BridgeMessage>,
}

impl Default for ToneBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl ToneBridge {
    pub fn new() -> Self {
        Self {
            config: None,
            dsp_enabled: false,
            settings: ToneSettings::default(),
            phase: 0.0,
            last_peak: 0.0,
            search_paths: Vec::new(),
            patches: Vec::new(),
            next_patch_id: FIRST_PATCH_ID,
            bound: HashSet::new(),
            pending: Vec::new(),
        }
    }

    pub fn settings(&self) -> &ToneSettings {
        &self.settings
    }

    pub fn is_dsp_enabled(&self) -> bool {
        self.dsp_enabled
    }

    pub fn open_patch_count(&self) -> usize {
        self.patches.len()
    }

    fn print(&mut self, text: String) {
        log::debug!("[tone] {}", text);
        if self.pending.len() < MAX_PENDING_PRINTS {
            self.pending.push(BridgeMessage::Print(text));
        }
    }

    fn resolve_patch(&self, name: &str, dir: &Path) -> BridgeResult<PathBuf> {
        let direct = dir.join(name);
        if direct.is_file() {
            return Ok(direct);
        }
        self.search_paths
            .iter()
            .map(|p| p.join(name))
            .find(|p| p.is_file())
            .ok_or(BridgeError::PatchNotFound(direct))
    }

    /// Apply a payload to a receiver, returning whether the receiver exists
    fn apply(&mut self, receiver: &str, atoms: &[Atom]) -> bool {
        let first_float = atoms.first().and_then(Atom::as_float);
        match receiver {
            "freq" => {
                if let Some(f) = first_float {
                    self.settings.freq = f.max(0.0);
                }
            }
            "gain" => {
                if let Some(g) = first_float {
                    self.settings.gain = g.clamp(0.0, 1.0);
                }
            }
            "monitor" => {
                if let Some(m) = first_float {
                    self.settings.monitor = m.clamp(0.0, 1.0);
                }
            }
            "wave" => match atoms.first().and_then(Atom::as_symbol) {
                Some(name) => match Waveform::from_name(name) {
                    Some(wave) => self.settings.wave = wave,
                    None => self.print(format!("wave: unknown waveform '{}'", name)),
                },
                None => self.print("wave: expected a symbol".to_string()),
            },
            "tone" => {
                if let Some(f) = first_float {
                    self.settings.freq = f.max(0.0);
                }
                if let Some(g) = atoms.get(1).and_then(Atom::as_float) {
                    self.settings.gain = g.clamp(0.0, 1.0);
                }
            }
            ENGINE_RECEIVER => {}
            _ => return false,
        }
        true
    }
}

impl DspBridge for ToneBridge {
    fn init(
        &mut self,
        input_channels: usize,
        output_channels: usize,
        sample_rate: u32,
    ) -> BridgeResult<()> {
        let requested = ToneConfig {
            input_channels,
            output_channels,
            sample_rate,
        };

        if let Some(current) = self.config {
            if current == requested {
                return Ok(());
            }
            return Err(BridgeError::AlreadyInitialized {
                current: current.to_string(),
                requested: requested.to_string(),
            });
        }

        let reason = if sample_rate == 0 {
            Some("sample rate must be positive")
        } else if input_channels + output_channels == 0 {
            Some("at least one channel is required")
        } else if input_channels > MAX_CHANNELS || output_channels > MAX_CHANNELS {
            Some("too many channels")
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(BridgeError::AudioConfigFailed {
                input_channels,
                output_channels,
                sample_rate,
                reason: reason.to_string(),
            });
        }

        log::info!("ToneBridge initialized: {}", requested);
        self.config = Some(requested);
        Ok(())
    }

    fn process_block(
        &mut self,
        ticks: usize,
        input: &SampleBuffer,
        output: &mut SampleBuffer,
    ) -> BridgeResult<()> {
        let config = self.config.ok_or(BridgeError::NotInitialized)?;

        let frames = output.frames();
        if ticks * DSP_BLOCK_SIZE != frames {
            return Err(BridgeError::BlockMismatch {
                frames,
                ticks,
                block_size: DSP_BLOCK_SIZE,
            });
        }

        if !self.dsp_enabled {
            output.silence();
            self.last_peak = 0.0;
            return Ok(());
        }

        let out_channels = output.channels();
        let in_channels = input.channels();
        let step = self.settings.freq / config.sample_rate as f32;
        let ToneSettings {
            gain, monitor, wave, ..
        } = self.settings;

        for frame in 0..frames {
            let mut value = wave.sample(self.phase) * gain;

            if monitor > 0.0 && in_channels > 0 && input.frames() == frames {
                let base = frame * in_channels;
                let sum: f32 = (0..in_channels)
                    .filter_map(|ch| input.get_f32(base + ch))
                    .sum();
                value += monitor * sum / in_channels as f32;
            }

            let base = frame * out_channels;
            for ch in 0..out_channels {
                output.set_f32(base + ch, value);
            }

            self.phase = (self.phase + step).fract();
        }

        self.last_peak = output.peak();
        Ok(())
    }

    fn add_search_path(&mut self, path: &Path) -> BridgeResult<()> {
        if !path.is_dir() {
            log::warn!("ToneBridge: search path {} is not a directory", path.display());
        }
        if !self.search_paths.iter().any(|p| p == path) {
            self.search_paths.push(path.to_path_buf());
        }
        Ok(())
    }

    fn open_patch(&mut self, name: &str, dir: &Path) -> BridgeResult<PatchHandle> {
        let path = self.resolve_patch(name, dir)?;

        let contents = std::fs::read_to_string(&path).map_err(|e| BridgeError::PatchOpenFailed {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let settings: ToneSettings =
            serde_yaml::from_str(&contents).map_err(|e| BridgeError::PatchOpenFailed {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        let handle = PatchHandle {
            id: self.next_patch_id,
            path,
        };
        self.next_patch_id += 1;
        self.settings = settings;
        self.patches.push(handle.clone());

        log::info!("ToneBridge: opened preset {} (id={})", handle.path.display(), handle.id);
        self.print(format!("opened {}", handle.path.display()));
        Ok(handle)
    }

    fn close_patch(&mut self, handle: &PatchHandle) -> BridgeResult<()> {
        let index = self
            .patches
            .iter()
            .position(|p| p.id == handle.id)
            .ok_or_else(|| BridgeError::PatchCloseFailed(format!("no open patch with id {}", handle.id)))?;
        self.patches.remove(index);

        if self.patches.is_empty() {
            self.settings = ToneSettings::default();
        }
        log::debug!("ToneBridge: closed preset id={}", handle.id);
        Ok(())
    }

    fn send_bang(&mut self, receiver: &str) -> BridgeResult<bool> {
        if receiver == "tone" {
            self.phase = 0.0;
        }
        Ok(RECEIVERS.contains(&receiver))
    }

    fn send_float(&mut self, receiver: &str, value: f32) -> BridgeResult<bool> {
        Ok(self.apply(receiver, &[Atom::Float(value)]))
    }

    fn send_symbol(&mut self, receiver: &str, value: &str) -> BridgeResult<bool> {
        Ok(self.apply(receiver, &[Atom::Symbol(value.to_string())]))
    }

    fn send_list(&mut self, receiver: &str, atoms: &[Atom]) -> BridgeResult<bool> {
        Ok(self.apply(receiver, atoms))
    }

    fn send_message(
        &mut self,
        receiver: &str,
        selector: &str,
        atoms: &[Atom],
    ) -> BridgeResult<bool> {
        if receiver == ENGINE_RECEIVER && selector == DSP_SELECTOR {
            let on = atoms.first().and_then(Atom::as_float).unwrap_or(0.0) != 0.0;
            if on != self.dsp_enabled {
                log::debug!("ToneBridge: dsp {}", if on { "on" } else { "off" });
            }
            self.dsp_enabled = on;
            return Ok(true);
        }

        match selector {
            "float" | "symbol" | "list" | "set" => Ok(self.apply(receiver, atoms)),
            _ if RECEIVERS.contains(&receiver) => {
                self.print(format!("{}: no method for '{}'", receiver, selector));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn bind(&mut self, source: &str) -> BridgeResult<()> {
        self.bound.insert(source.to_string());
        Ok(())
    }

    fn unbind(&mut self, source: &str) {
        self.bound.remove(source);
    }

    fn drain_messages(&mut self, sink: &mut dyn FnMut(BridgeMessage)) {
        for message in self.pending.drain(..) {
            sink(message);
        }
        if self.bound.contains(LEVEL_SOURCE) {
            sink(BridgeMessage::Float {
                source: LEVEL_SOURCE.to_string(),
                value: self.last_peak,
            });
        }
    }

    fn release(&mut self) {
        self.dsp_enabled = false;
        self.patches.clear();
        self.bound.clear();
        self.pending.clear();
        self.config = None;
        log::debug!("ToneBridge released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferId;
    use crate::types::{Direction, SampleFormat};

    fn buffer(direction: Direction, frames: usize, channels: usize) -> SampleBuffer {
        SampleBuffer::new(
            BufferId { direction, slot: 0 },
            SampleFormat::Float32,
            frames,
            channels,
        )
    }

    fn ready_bridge() -> ToneBridge {
        let mut bridge = ToneBridge::new();
        bridge.init(0, 2, 48000).unwrap();
        bridge.set_dsp_enabled(true).unwrap();
        bridge
    }

    #[test]
    fn test_init_is_idempotent() {
        let mut bridge = ToneBridge::new();
        bridge.init(0, 2, 44100).unwrap();
        bridge.init(0, 2, 44100).unwrap();

        let err = bridge.init(0, 2, 48000).unwrap_err();
        assert!(matches!(err, BridgeError::AlreadyInitialized { .. }));
        assert!(err.is_init_error());
    }

    #[test]
    fn test_init_rejects_bad_config() {
        assert!(ToneBridge::new().init(0, 0, 44100).is_err());
        assert!(ToneBridge::new().init(0, 2, 0).is_err());
        assert!(ToneBridge::new().init(0, MAX_CHANNELS + 1, 44100).is_err());
    }

    #[test]
    fn test_silent_until_dsp_enabled() {
        let mut bridge = ToneBridge::new();
        bridge.init(0, 2, 48000).unwrap();
        let input = buffer(Direction::Input, 256, 0);
        let mut output = buffer(Direction::Output, 256, 2);
        output.set_f32(0, 0.9);

        bridge.process_block(4, &input, &mut output).unwrap();
        assert!(output.is_silent());

        assert!(bridge.set_dsp_enabled(true).unwrap());
        bridge.process_block(4, &input, &mut output).unwrap();
        assert!(!output.is_silent());
        assert!(output.peak() <= 0.25 + 1e-6);
    }

    #[test]
    fn test_block_mismatch_is_rejected() {
        let mut bridge = ready_bridge();
        let input = buffer(Direction::Input, 256, 0);
        let mut output = buffer(Direction::Output, 256, 2);
        let err = bridge.process_block(3, &input, &mut output).unwrap_err();
        assert!(matches!(err, BridgeError::BlockMismatch { frames: 256, .. }));
    }

    #[test]
    fn test_receivers_report_existence() {
        let mut bridge = ready_bridge();
        assert!(bridge.send_float("freq", 220.0).unwrap());
        assert!(bridge.send_float("gain", 2.0).unwrap());
        assert!(bridge.send_symbol("wave", "square").unwrap());
        assert!(bridge.send_bang("tone").unwrap());
        assert!(!bridge.send_float("nope", 1.0).unwrap());
        assert!(!bridge.send_bang("nope").unwrap());

        assert_eq!(bridge.settings().freq, 220.0);
        assert_eq!(bridge.settings().gain, 1.0);
        assert_eq!(bridge.settings().wave, Waveform::Square);

        assert!(bridge
            .send_list("tone", &[Atom::Float(110.0), Atom::Float(0.5)])
            .unwrap());
        assert_eq!(bridge.settings().freq, 110.0);
        assert_eq!(bridge.settings().gain, 0.5);

        assert!(bridge.send_message("gain", "set", &[Atom::Float(0.1)]).unwrap());
        assert_eq!(bridge.settings().gain, 0.1);
        assert!(!bridge.send_message("nope", "set", &[]).unwrap());
    }

    #[test]
    fn test_square_wave_full_scale() {
        let mut bridge = ready_bridge();
        bridge.send_symbol("wave", "square").unwrap();
        bridge.send_float("gain", 1.0).unwrap();

        let input = buffer(Direction::Input, 64, 0);
        let mut output = buffer(Direction::Output, 64, 2);
        bridge.process_block(1, &input, &mut output).unwrap();
        assert_eq!(output.get_f32(0), Some(1.0));
        assert_eq!(output.get_f32(1), Some(1.0));
    }

    #[test]
    fn test_monitor_passes_input() {
        let mut bridge = ToneBridge::new();
        bridge.init(1, 1, 48000).unwrap();
        bridge.set_dsp_enabled(true).unwrap();
        bridge.send_float("gain", 0.0).unwrap();
        bridge.send_float("monitor", 1.0).unwrap();

        let mut input = buffer(Direction::Input, 64, 1);
        input.write_f32(0, &[0.5; 64]);
        let mut output = buffer(Direction::Output, 64, 1);
        bridge.process_block(1, &input, &mut output).unwrap();
        assert!((output.get_f32(10).unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_open_and_close_preset() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("low.yaml"), "freq: 110.0\nwave: saw\n").unwrap();
        std::fs::write(dir.path().join("bad.yaml"), "freq: [not a number\n").unwrap();

        let mut bridge = ready_bridge();
        let handle = bridge.open_patch("low.yaml", dir.path()).unwrap();
        assert_eq!(handle.id, FIRST_PATCH_ID);
        assert_eq!(bridge.settings().freq, 110.0);
        assert_eq!(bridge.settings().wave, Waveform::Saw);
        // Missing fields fall back to defaults
        assert_eq!(bridge.settings().gain, ToneSettings::default().gain);

        let err = bridge.open_patch("missing.yaml", dir.path()).unwrap_err();
        assert!(matches!(err, BridgeError::PatchNotFound(_)));
        let err = bridge.open_patch("bad.yaml", dir.path()).unwrap_err();
        assert!(matches!(err, BridgeError::PatchOpenFailed { .. }));

        bridge.close_patch(&handle).unwrap();
        assert_eq!(bridge.settings(), &ToneSettings::default());
        assert!(bridge.close_patch(&handle).is_err());
    }

    #[test]
    fn test_search_path_resolution() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("p.yaml"), "gain: 0.5\n").unwrap();

        let mut bridge = ready_bridge();
        bridge.add_search_path(dir.path()).unwrap();
        let handle = bridge.open_patch("p.yaml", Path::new("/nonexistent")).unwrap();
        assert_eq!(handle.path, dir.path().join("p.yaml"));
    }

    #[test]
    fn test_level_binding_reports_peak() {
        let mut bridge = ready_bridge();
        bridge.send_float("gain", 0.5).unwrap();
        bridge.send_symbol("wave", "square").unwrap();
        bridge.send_symbol("wave", "triangle").unwrap();

        let input = buffer(Direction::Input, 64, 0);
        let mut output = buffer(Direction::Output, 64, 2);
        bridge.process_block(1, &input, &mut output).unwrap();

        let mut messages = Vec::new();
        bridge.drain_messages(&mut |m| messages.push(m));
        // Unbound: only the console line about the bad waveform
        assert_eq!(messages.len(), 1);
        assert!(matches!(&messages[0], BridgeMessage::Print(t) if t.contains("triangle")));

        bridge.bind(LEVEL_SOURCE).unwrap();
        messages.clear();
        bridge.drain_messages(&mut |m| messages.push(m));
        assert_eq!(
            messages,
            vec![BridgeMessage::Float {
                source: LEVEL_SOURCE.to_string(),
                value: 0.5
            }]
        );
    }
}
