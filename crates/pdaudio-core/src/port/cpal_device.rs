//! CpalDevice - sound card callbacks through CPAL
//!
//! CPAL streams are not `Send`, so they are built, played and dropped on a
//! dedicated keeper thread. The port talks to that thread over a channel:
//! one reply when the streams are running (or failed to start), one stop
//! request at close.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleRate, Stream, StreamConfig};
use crossbeam::channel::{Receiver, Sender};

use super::queue::{CallbackDevice, QueueDriver};
use super::{PortConfig, PortError, PortResult};

/// Hardware device opened through the default CPAL host
#[derive(Default)]
pub struct CpalDevice {
    output_device: Option<String>,
    stop_tx: Option<Sender<()>>,
    keeper: Option<JoinHandle<()>>,
}

impl CpalDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the output device with this name instead of the default one
    pub fn with_output_device(mut self, name: impl Into<String>) -> Self {
        self.output_device = Some(name.into());
        self
    }
}

fn stream_config(channels: usize, config: &PortConfig) -> PortResult<StreamConfig> {
    let channels = u16::try_from(channels)
        .map_err(|_| PortError::ConfigError(format!("{} channels", channels)))?;
    Ok(StreamConfig {
        channels,
        sample_rate: SampleRate(config.sample_rate),
        buffer_size: CpalBufferSize::Default,
    })
}

fn find_output_device(host: &cpal::Host, name: Option<&str>) -> PortResult<cpal::Device> {
    match name {
        Some(name) => host
            .output_devices()
            .map_err(|e| PortError::ConfigError(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| PortError::NoDefaultDevice(format!("device '{}' not found", name))),
        None => host.default_output_device().ok_or(PortError::NoDevices),
    }
}

/// Build and start the streams; runs on the keeper thread
fn build_streams(
    output_device: Option<&str>,
    driver: &Arc<Mutex<QueueDriver>>,
    config: &PortConfig,
    fault: &Arc<AtomicBool>,
) -> PortResult<Vec<Stream>> {
    let host = cpal::default_host();
    let mut streams = Vec::with_capacity(2);

    if config.output_channels > 0 {
        let device = find_output_device(&host, output_device)?;
        log::info!(
            "CpalDevice: output on {}",
            device.name().unwrap_or_else(|_| "<unnamed>".into())
        );

        let render_driver = Arc::clone(driver);
        let render_fault = Arc::clone(fault);
        let stream = device
            .build_output_stream(
                &stream_config(config.output_channels, config)?,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    match render_driver.try_lock() {
                        Ok(mut driver) => driver.render(data),
                        Err(TryLockError::Poisoned(p)) => p.into_inner().render(data),
                        // Control thread is flushing; play silence for this period
                        Err(TryLockError::WouldBlock) => data.fill(0.0),
                    }
                },
                move |err| {
                    log::error!("Output audio stream error: {}", err);
                    render_fault.store(true, Ordering::Release);
                },
                None,
            )
            .map_err(|e| PortError::StreamBuildError(e.to_string()))?;
        streams.push(stream);
    }

    if config.input_channels > 0 {
        let device = host.default_input_device().ok_or(PortError::NoDevices)?;
        log::info!(
            "CpalDevice: input on {}",
            device.name().unwrap_or_else(|_| "<unnamed>".into())
        );

        let capture_driver = Arc::clone(driver);
        let capture_fault = Arc::clone(fault);
        let stream = device
            .build_input_stream(
                &stream_config(config.input_channels, config)?,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    match capture_driver.try_lock() {
                        Ok(mut driver) => driver.capture(data),
                        Err(TryLockError::Poisoned(p)) => p.into_inner().capture(data),
                        Err(TryLockError::WouldBlock) => {}
                    }
                },
                move |err| {
                    log::error!("Input audio stream error: {}", err);
                    capture_fault.store(true, Ordering::Release);
                },
                None,
            )
            .map_err(|e| PortError::StreamBuildError(e.to_string()))?;
        streams.push(stream);
    }

    for stream in &streams {
        stream
            .play()
            .map_err(|e| PortError::StreamPlayError(e.to_string()))?;
    }
    Ok(streams)
}

impl CallbackDevice for CpalDevice {
    fn start(
        &mut self,
        driver: Arc<Mutex<QueueDriver>>,
        config: &PortConfig,
        fault: Arc<AtomicBool>,
    ) -> PortResult<()> {
        if self.keeper.is_some() {
            return Err(PortError::AlreadyOpen);
        }

        let (ready_tx, ready_rx) = crossbeam::channel::bounded::<PortResult<()>>(1);
        let (stop_tx, stop_rx): (Sender<()>, Receiver<()>) = crossbeam::channel::bounded(1);
        let output_device = self.output_device.clone();
        let config = *config;

        let keeper = thread::Builder::new()
            .name("cpal-stream-keeper".into())
            .spawn(move || {
                match build_streams(output_device.as_deref(), &driver, &config, &fault) {
                    Ok(streams) => {
                        let _ = ready_tx.send(Ok(()));
                        // Streams live until stop is requested or the port is dropped
                        let _ = stop_rx.recv();
                        drop(streams);
                        log::debug!("CpalDevice: streams dropped");
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(PortError::ThreadSpawn)?;

        let started = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(PortError::StreamError("stream keeper exited".into())));
        match started {
            Ok(()) => {
                self.stop_tx = Some(stop_tx);
                self.keeper = Some(keeper);
                Ok(())
            }
            Err(e) => {
                let _ = keeper.join();
                Err(e)
            }
        }
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(keeper) = self.keeper.take() {
            if keeper.join().is_err() {
                log::error!("CPAL stream keeper thread panicked");
            }
        }
    }
}
