//! PdBridge - libpd-rs behind the DspBridge trait

use std::collections::HashMap;
use std::path::Path;
use std::sync::Once;

use crossbeam::channel::{Receiver, Sender};
use libpd_rs::functions::patch::PatchFileHandle;
use libpd_rs::functions::receive::{self, ReceiverHandle};
use libpd_rs::functions::{send, verbose_print_state};
use libpd_rs::types::Atom as PdAtom;
use libpd_rs::{Pd, PdAudioContext};

use crate::bridge::{Atom, BridgeError, BridgeMessage, BridgeResult, DspBridge, PatchHandle};
use crate::buffer::{SampleBuffer, Samples};
use crate::types::DSP_BLOCK_SIZE;

/// Messages queued between drains; hooks drop anything beyond this
const MESSAGE_QUEUE_LEN: usize = 1024;

static VERBOSE_INIT: Once = Once::new();

/// Route a console line to the matching log level
fn log_print(msg: &str) {
    if msg.contains("error") || msg.contains("can't") || msg.contains("couldn't") {
        log::error!("[PD] {}", msg);
    } else if msg.contains("warning") || msg.contains("deprecated") {
        log::warn!("[PD] {}", msg);
    } else {
        log::info!("[PD] {}", msg);
    }
}

fn to_pd_atoms(atoms: &[Atom]) -> Vec<PdAtom> {
    atoms
        .iter()
        .map(|a| match a {
            Atom::Float(f) => PdAtom::Float(*f as _),
            Atom::Symbol(s) => PdAtom::Symbol(s.clone()),
        })
        .collect()
}

fn from_pd_atoms(atoms: &[PdAtom]) -> Vec<Atom> {
    atoms
        .iter()
        .map(|a| match a {
            PdAtom::Float(f) => Atom::Float(*f as f32),
            PdAtom::Symbol(s) => Atom::Symbol(s.clone()),
        })
        .collect()
}

/// Install the inbound hooks for the current instance, feeding `tx`
fn install_hooks(tx: &Sender<BridgeMessage>) {
    let print_tx = tx.clone();
    receive::on_print(move |msg: &str| {
        let msg = msg.trim();
        if msg.is_empty() {
            return;
        }
        log_print(msg);
        let _ = print_tx.try_send(BridgeMessage::Print(msg.to_string()));
    });

    let bang_tx = tx.clone();
    receive::on_bang(move |source: &str| {
        let _ = bang_tx.try_send(BridgeMessage::Bang {
            source: source.to_string(),
        });
    });

    let float_tx = tx.clone();
    receive::on_float(move |source: &str, value| {
        let _ = float_tx.try_send(BridgeMessage::Float {
            source: source.to_string(),
            value: value as f32,
        });
    });

    let symbol_tx = tx.clone();
    receive::on_symbol(move |source: &str, value: &str| {
        let _ = symbol_tx.try_send(BridgeMessage::Symbol {
            source: source.to_string(),
            value: value.to_string(),
        });
    });

    let list_tx = tx.clone();
    receive::on_list(move |source: &str, list: &[PdAtom]| {
        let _ = list_tx.try_send(BridgeMessage::List {
            source: source.to_string(),
            atoms: from_pd_atoms(list),
        });
    });

    let message_tx = tx.clone();
    receive::on_message(move |source: &str, selector: &str, list: &[PdAtom]| {
        let _ = message_tx.try_send(BridgeMessage::Message {
            source: source.to_string(),
            selector: selector.to_string(),
            atoms: from_pd_atoms(list),
        });
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PdConfig {
    input_channels: usize,
    output_channels: usize,
    sample_rate: u32,
}

impl std::fmt::Display for PdConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} in / {} out @ {}Hz",
            self.input_channels, self.output_channels, self.sample_rate
        )
    }
}

struct Running {
    pd: Pd,
    ctx: PdAudioContext,
    config: PdConfig,
}

/// Pure Data instance implementing [`DspBridge`]
pub struct PdBridge {
    running: Option<Running>,
    patches: HashMap<i32, PatchFileHandle>,
    listeners: HashMap<String, ReceiverHandle>,
    message_tx: Sender<BridgeMessage>,
    message_rx: Receiver<BridgeMessage>,
    audio_active: bool,
}

// SAFETY: every method runs with the SharedBridge mutex held and makes this
// instance current before touching libpd, so the instance is never used from
// two threads at once.
unsafe impl Send for PdBridge {}

impl Default for PdBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl PdBridge {
    pub fn new() -> Self {
        let (message_tx, message_rx) = crossbeam::channel::bounded(MESSAGE_QUEUE_LEN);
        Self {
            running: None,
            patches: HashMap::new(),
            listeners: HashMap::new(),
            message_tx,
            message_rx,
            audio_active: false,
        }
    }

    pub fn is_audio_active(&self) -> bool {
        self.audio_active
    }

    pub fn open_patch_count(&self) -> usize {
        self.patches.len()
    }

    /// The running instance, made current for the calling thread
    fn current(&self) -> BridgeResult<&Running> {
        let running = self.running.as_ref().ok_or(BridgeError::NotInitialized)?;
        running.pd.set_as_current();
        Ok(running)
    }

    fn send_failed(msg_type: &str, receiver: &str, reason: impl std::fmt::Display) -> bool {
        log::debug!("PD: {} to '{}' not delivered: {}", msg_type, receiver, reason);
        false
    }
}

impl DspBridge for PdBridge {
    fn init(
        &mut self,
        input_channels: usize,
        output_channels: usize,
        sample_rate: u32,
    ) -> BridgeResult<()> {
        let requested = PdConfig {
            input_channels,
            output_channels,
            sample_rate,
        };
        if let Some(running) = &self.running {
            if running.config == requested {
                return Ok(());
            }
            return Err(BridgeError::AlreadyInitialized {
                current: running.config.to_string(),
                requested: requested.to_string(),
            });
        }

        VERBOSE_INIT.call_once(|| verbose_print_state(true));

        let pd = Pd::init_and_configure(input_channels as i32, output_channels as i32, sample_rate as i32)
            .map_err(|e| BridgeError::AudioConfigFailed {
                input_channels,
                output_channels,
                sample_rate,
                reason: e.to_string(),
            })?;
        pd.set_as_current();
        install_hooks(&self.message_tx);
        let ctx = pd.audio_context();

        log::info!("PdBridge initialized: {}", requested);
        self.running = Some(Running {
            pd,
            ctx,
            config: requested,
        });
        Ok(())
    }

    fn block_size(&self) -> usize {
        // libpd is compiled with a fixed 64-frame block
        let size = libpd_rs::functions::block_size();
        if size > 0 {
            size as usize
        } else {
            DSP_BLOCK_SIZE
        }
    }

    fn process_block(
        &mut self,
        ticks: usize,
        input: &SampleBuffer,
        output: &mut SampleBuffer,
    ) -> BridgeResult<()> {
        let running = self.current()?;
        let ticks = ticks as i32;
        match (input.samples(), output.samples_mut()) {
            (Samples::Int16(inp), Samples::Int16(out)) => running.ctx.process_short(ticks, inp, out),
            (Samples::Float32(inp), Samples::Float32(out)) => running.ctx.process_float(ticks, inp, out),
            _ => {
                return Err(BridgeError::ProcessFailed(
                    "input and output sample formats differ".to_string(),
                ))
            }
        }
        Ok(())
    }

    fn set_dsp_enabled(&mut self, enabled: bool) -> BridgeResult<bool> {
        let running = self.current()?;
        running
            .pd
            .activate_audio(enabled)
            .map_err(|e| BridgeError::ProcessFailed(format!("Failed to set audio active: {}", e)))?;
        self.audio_active = enabled;
        Ok(true)
    }

    fn add_search_path(&mut self, path: &Path) -> BridgeResult<()> {
        let running = self.current()?;
        running
            .pd
            .add_path_to_search_paths(path)
            .map_err(|e| BridgeError::InitializationFailed(format!("Failed to add search path: {}", e)))?;
        log::debug!("Added PD search path: {}", path.display());
        Ok(())
    }

    fn open_patch(&mut self, name: &str, dir: &Path) -> BridgeResult<PatchHandle> {
        self.current()?;
        let path = dir.join(name);
        if !path.exists() {
            return Err(BridgeError::PatchNotFound(path));
        }

        let file = libpd_rs::functions::patch::open_patch(&path).map_err(|e| BridgeError::PatchOpenFailed {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let dollar_zero = match libpd_rs::functions::patch::get_dollar_zero(&file) {
            Ok(id) => id,
            Err(e) => {
                let _ = libpd_rs::functions::patch::close_patch(file);
                return Err(BridgeError::PatchOpenFailed {
                    path,
                    reason: format!("Failed to get $0: {}", e),
                });
            }
        };

        self.patches.insert(dollar_zero, file);
        log::info!("Opened PD patch: {} ($0={})", path.display(), dollar_zero);
        Ok(PatchHandle {
            id: dollar_zero,
            path,
        })
    }

    fn close_patch(&mut self, handle: &PatchHandle) -> BridgeResult<()> {
        self.current()?;
        let file = self
            .patches
            .remove(&handle.id)
            .ok_or_else(|| BridgeError::PatchCloseFailed(format!("no open patch with $0={}", handle.id)))?;
        libpd_rs::functions::patch::close_patch(file).map_err(|e| BridgeError::PatchCloseFailed(e.to_string()))?;
        log::debug!("Closed PD patch $0={}", handle.id);
        Ok(())
    }

    fn send_bang(&mut self, receiver: &str) -> BridgeResult<bool> {
        self.current()?;
        Ok(match send::send_bang_to(receiver) {
            Ok(()) => true,
            Err(e) => Self::send_failed("bang", receiver, e),
        })
    }

    fn send_float(&mut self, receiver: &str, value: f32) -> BridgeResult<bool> {
        self.current()?;
        Ok(match send::send_float_to(receiver, value as _) {
            Ok(()) => true,
            Err(e) => Self::send_failed("float", receiver, e),
        })
    }

    fn send_symbol(&mut self, receiver: &str, value: &str) -> BridgeResult<bool> {
        self.current()?;
        Ok(match send::send_symbol_to(receiver, value) {
            Ok(()) => true,
            Err(e) => Self::send_failed("symbol", receiver, e),
        })
    }

    fn send_list(&mut self, receiver: &str, atoms: &[Atom]) -> BridgeResult<bool> {
        self.current()?;
        Ok(match send::send_list_to(receiver, &to_pd_atoms(atoms)) {
            Ok(()) => true,
            Err(e) => Self::send_failed("list", receiver, e),
        })
    }

    fn send_message(&mut self, receiver: &str, selector: &str, atoms: &[Atom]) -> BridgeResult<bool> {
        self.current()?;
        Ok(match send::send_message_to(receiver, selector, &to_pd_atoms(atoms)) {
            Ok(()) => true,
            Err(e) => Self::send_failed("message", receiver, e),
        })
    }

    fn bind(&mut self, source: &str) -> BridgeResult<()> {
        self.current()?;
        if self.listeners.contains_key(source) {
            return Ok(());
        }
        let handle = receive::start_listening_from(source).map_err(|e| BridgeError::SendFailed {
            msg_type: "bind".to_string(),
            receiver: source.to_string(),
            reason: e.to_string(),
        })?;
        self.listeners.insert(source.to_string(), handle);
        Ok(())
    }

    fn unbind(&mut self, source: &str) {
        if self.current().is_err() {
            return;
        }
        if let Some(handle) = self.listeners.remove(source) {
            receive::stop_listening_from(handle);
        }
    }

    fn drain_messages(&mut self, sink: &mut dyn FnMut(BridgeMessage)) {
        if self.current().is_ok() {
            receive::receive_messages_from_pd();
        }
        for message in self.message_rx.try_iter() {
            sink(message);
        }
    }

    fn release(&mut self) {
        if self.current().is_err() {
            return;
        }
        if self.audio_active {
            if let Err(e) = self.set_dsp_enabled(false) {
                log::warn!("PD: failed to stop audio: {}", e);
            }
        }
        for (_, handle) in self.listeners.drain() {
            receive::stop_listening_from(handle);
        }
        for (id, file) in self.patches.drain() {
            if let Err(e) = libpd_rs::functions::patch::close_patch(file) {
                log::warn!("PD: failed to close patch $0={}: {}", id, e);
            }
        }
        self.running = None;
        log::debug!("PdBridge released");
    }
}

impl Drop for PdBridge {
    fn drop(&mut self) {
        self.release();
    }
}
