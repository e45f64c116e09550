//! pdaudio-player - run a patch through the pdaudio engine from the command line
//!
//! Loads the engine config, opens the patch, plays for a while, sends any
//! `--set` messages, then pauses and closes. Run with `--help` for flags.

mod args;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use pdaudio_core::bridge::Receiver;
use pdaudio_core::config::{default_config_path, load_config, save_config, DEFAULT_CONFIG_FILE};
use pdaudio_core::port::{
    BlockingStreamPort, CallbackQueuePort, ClockDevice, ClockedSink, NullPort, WavSink, WavSource,
};
use pdaudio_core::{AudioEngine, Atom, DspBridge, EngineConfig, ErrorKind, PlatformAudioPort, ToneBridge};

use args::{Args, Output, USAGE};

/// How often engine messages are polled while playing
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Prints engine console output and every bound source
struct ConsoleReceiver;

impl Receiver for ConsoleReceiver {
    fn on_print(&self, text: &str) {
        println!("[engine] {}", text);
    }

    fn on_float(&self, source: &str, value: f32) {
        log::debug!("{} <- {}", source, value);
    }
}

fn main() {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse(std::env::args().skip(1))?;
    if args.help {
        println!("{}", USAGE);
        return Ok(());
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| default_config_path(DEFAULT_CONFIG_FILE));
    let mut config: EngineConfig = load_config(&config_path);
    if let Some(patch) = &args.patch {
        let dir = args.dir.clone().unwrap_or_else(|| PathBuf::from("."));
        config = config.with_patch(patch.clone(), dir);
    }
    if args.input.is_some() && config.input_channels == 0 {
        config.input_channels = 1;
    }

    if let Some(path) = &args.save_config {
        save_config(&config, path)?;
        println!("Saved config to {}", path.display());
        return Ok(());
    }

    log::info!("pdaudio-player starting up ({} for {:?})", config_path.display(), args.duration());

    match &args.output {
        Output::Null => with_bridge(&args, config, NullPort::new()),
        Output::Clock => with_bridge(&args, config, CallbackQueuePort::new(ClockDevice::default())),
        Output::Wav(path) => {
            let sink = WavSink::new(path);
            let port = if args.fast {
                BlockingStreamPort::new(sink)
            } else {
                BlockingStreamPort::new(ClockedSink::new(sink))
            };
            let port = match &args.input {
                Some(input) => port.with_source(WavSource::new(input)),
                None => port,
            };
            with_bridge(&args, config, port)
        }
        Output::Cpal => cpal_output(&args, config),
    }
}

#[cfg(feature = "cpal")]
fn cpal_output(args: &Args, config: EngineConfig) -> Result<()> {
    let device = match &config.device {
        Some(name) => pdaudio_core::port::CpalDevice::new().with_output_device(name.clone()),
        None => pdaudio_core::port::CpalDevice::new(),
    };
    with_bridge(args, config, CallbackQueuePort::new(device))
}

#[cfg(not(feature = "cpal"))]
fn cpal_output(_args: &Args, _config: EngineConfig) -> Result<()> {
    anyhow::bail!("--cpal requires building with the `cpal` feature")
}

fn with_bridge<P: PlatformAudioPort>(args: &Args, config: EngineConfig, port: P) -> Result<()> {
    if args.pd {
        return pd_bridge(args, config, port);
    }
    play(args, config, ToneBridge::new(), port)
}

#[cfg(feature = "pd")]
fn pd_bridge<P: PlatformAudioPort>(args: &Args, config: EngineConfig, port: P) -> Result<()> {
    play(args, config, pdaudio_core::pd::PdBridge::new(), port)
}

#[cfg(not(feature = "pd"))]
fn pd_bridge<P: PlatformAudioPort>(_args: &Args, _config: EngineConfig, _port: P) -> Result<()> {
    anyhow::bail!("--pd requires building with the `pd` feature")
}

fn send(engine: &AudioEngine<impl DspBridge, impl PlatformAudioPort>, receiver: &str, value: &Atom) -> Result<()> {
    let delivered = match value {
        Atom::Float(f) => engine.send_float(receiver, *f)?,
        Atom::Symbol(s) => engine.send_symbol(receiver, s)?,
    };
    if !delivered {
        log::warn!("No receiver named '{}'", receiver);
    }
    Ok(())
}

fn play<B: DspBridge, P: PlatformAudioPort>(args: &Args, config: EngineConfig, bridge: B, port: P) -> Result<()> {
    let patch = config.patch.clone();
    let mut engine = AudioEngine::create(config, bridge, port).context("Failed to create audio engine")?;

    let console: Arc<dyn Receiver> = Arc::new(ConsoleReceiver);
    engine.subscribe("pdaudio", Arc::clone(&console))?;

    let handle = match &patch {
        Some(patch) => Some(
            engine
                .open_patch(&patch.file, &patch.dir)
                .with_context(|| format!("Failed to open patch {}", patch.file))?,
        ),
        None => {
            log::info!("No patch configured, playing the engine's defaults");
            None
        }
    };

    engine.play()?;
    for (receiver, value) in &args.sends {
        send(&engine, receiver, value)?;
    }

    let deadline = Instant::now() + args.duration();
    while Instant::now() < deadline {
        let pending = engine.poll_messages()?;
        if pending > 0 {
            log::debug!("Dispatched {} engine messages", pending);
        }
        if engine.last_error() == ErrorKind::PlatformIo {
            log::error!("Audio device failed, stopping early");
            break;
        }
        thread::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
    }

    engine.pause()?;
    engine.poll_messages()?;
    if let Some(handle) = &handle {
        engine.close_patch(handle)?;
    }

    let stats = engine.stats();
    let last_error = engine.last_error();
    engine.close();

    println!("Stats: {}", stats);
    println!("Last error: {}", last_error);
    if last_error.is_error() {
        anyhow::bail!("engine reported {}", last_error);
    }
    Ok(())
}

