//! Frame sinks and sources for the blocking stream port
//!
//! A sink consumes whole output buffers with a blocking write; a source fills
//! whole input buffers with a blocking read. Both are prepared once with the
//! port configuration before the driver thread starts.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use super::{PortConfig, PortError, PortResult};
use crate::buffer::{SampleBuffer, Samples};
use crate::types::SampleFormat;

/// Blocking consumer of output buffers
pub trait FrameSink: Send + 'static {
    fn prepare(&mut self, _config: &PortConfig) -> PortResult<()> {
        Ok(())
    }

    /// Write one buffer, blocking until the device accepted it
    fn write(&mut self, buffer: &SampleBuffer) -> PortResult<()>;

    /// Flush and release the device
    fn finish(&mut self) -> PortResult<()> {
        Ok(())
    }
}

/// Blocking producer of input buffers
pub trait FrameSource: Send + 'static {
    fn prepare(&mut self, _config: &PortConfig) -> PortResult<()> {
        Ok(())
    }

    /// Fill one buffer completely
    fn read(&mut self, buffer: &mut SampleBuffer) -> PortResult<()>;
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn prepare(&mut self, config: &PortConfig) -> PortResult<()> {
        (**self).prepare(config)
    }

    fn write(&mut self, buffer: &SampleBuffer) -> PortResult<()> {
        (**self).write(buffer)
    }

    fn finish(&mut self) -> PortResult<()> {
        (**self).finish()
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn prepare(&mut self, config: &PortConfig) -> PortResult<()> {
        (**self).prepare(config)
    }

    fn read(&mut self, buffer: &mut SampleBuffer) -> PortResult<()> {
        (**self).read(buffer)
    }
}

/// Sink that drops everything
#[derive(Debug, Default)]
pub struct DiscardSink {
    blocks: u64,
}

impl DiscardSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocks(&self) -> u64 {
        self.blocks
    }
}

impl FrameSink for DiscardSink {
    fn write(&mut self, _buffer: &SampleBuffer) -> PortResult<()> {
        self.blocks += 1;
        Ok(())
    }
}

/// Writes output to a WAV file in the buffer's own sample format
pub struct WavSink {
    path: PathBuf,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    frames_written: u64,
}

impl WavSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
            frames_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSink for WavSink {
    fn prepare(&mut self, config: &PortConfig) -> PortResult<()> {
        let (bits_per_sample, sample_format) = match config.format {
            SampleFormat::Int16 => (16, hound::SampleFormat::Int),
            SampleFormat::Float32 => (32, hound::SampleFormat::Float),
        };
        let channels = u16::try_from(config.output_channels).map_err(|_| {
            PortError::ConfigError(format!("{} channels", config.output_channels))
        })?;
        let spec = hound::WavSpec {
            channels,
            sample_rate: config.sample_rate,
            bits_per_sample,
            sample_format,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(hound::Error::IoError)?;
        }
        self.writer = Some(hound::WavWriter::create(&self.path, spec)?);
        log::info!("WavSink: writing {}", self.path.display());
        Ok(())
    }

    fn write(&mut self, buffer: &SampleBuffer) -> PortResult<()> {
        let writer = self.writer.as_mut().ok_or(PortError::NotOpen)?;
        match buffer.samples() {
            Samples::Int16(samples) => {
                for &s in samples.iter() {
                    writer.write_sample(s)?;
                }
            }
            Samples::Float32(samples) => {
                for &s in samples.iter() {
                    writer.write_sample(s)?;
                }
            }
        }
        self.frames_written += buffer.frames() as u64;
        Ok(())
    }

    fn finish(&mut self) -> PortResult<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
            log::info!(
                "WavSink: finalized {} ({} frames)",
                self.path.display(),
                self.frames_written
            );
        }
        Ok(())
    }
}

/// Paces any sink to real time, one buffer duration per write
pub struct ClockedSink<S> {
    inner: S,
    period: Duration,
    next: Option<Instant>,
}

impl<S: FrameSink> ClockedSink<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            period: Duration::ZERO,
            next: None,
        }
    }
}

impl<S: FrameSink> FrameSink for ClockedSink<S> {
    fn prepare(&mut self, config: &PortConfig) -> PortResult<()> {
        self.period = config.block_duration();
        self.inner.prepare(config)
    }

    fn write(&mut self, buffer: &SampleBuffer) -> PortResult<()> {
        self.inner.write(buffer)?;

        let now = Instant::now();
        let deadline = match self.next {
            // Resync after a pause or a long stall instead of bursting to catch up
            Some(next) if next + self.period >= now => next + self.period,
            _ => now + self.period,
        };
        self.next = Some(deadline);
        if deadline > now {
            thread::sleep(deadline - now);
        }
        Ok(())
    }

    fn finish(&mut self) -> PortResult<()> {
        self.inner.finish()
    }
}

/// Capture source producing silence
#[derive(Debug, Default)]
pub struct SilenceSource;

impl FrameSource for SilenceSource {
    fn read(&mut self, buffer: &mut SampleBuffer) -> PortResult<()> {
        buffer.silence();
        Ok(())
    }
}

/// Capture source playing a WAV file in a loop
///
/// The file's channel count must match the configured input channels.
pub struct WavSource {
    path: PathBuf,
    samples: Vec<f32>,
    position: usize,
}

impl WavSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            samples: Vec::new(),
            position: 0,
        }
    }
}

impl FrameSource for WavSource {
    fn prepare(&mut self, config: &PortConfig) -> PortResult<()> {
        let mut reader = hound::WavReader::open(&self.path)?;
        let spec = reader.spec();

        if spec.channels as usize != config.input_channels {
            return Err(PortError::ConfigError(format!(
                "{} has {} channels, input is configured for {}",
                self.path.display(),
                spec.channels,
                config.input_channels
            )));
        }
        if spec.sample_rate != config.sample_rate {
            log::warn!(
                "WavSource: {} is {}Hz, stream runs at {}Hz (no resampling)",
                self.path.display(),
                spec.sample_rate,
                config.sample_rate
            );
        }

        self.samples = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<f32>, _>>()?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<Vec<f32>, _>>()?
            }
        };
        self.position = 0;

        log::info!(
            "WavSource: loaded {} ({} samples)",
            self.path.display(),
            self.samples.len()
        );
        Ok(())
    }

    fn read(&mut self, buffer: &mut SampleBuffer) -> PortResult<()> {
        if self.samples.is_empty() {
            buffer.silence();
            return Ok(());
        }

        let total = buffer.sample_count();
        let mut offset = 0;
        while offset < total {
            let n = buffer.write_f32(offset, &self.samples[self.position..]);
            offset += n;
            self.position += n;
            if self.position >= self.samples.len() {
                self.position = 0;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferId;
    use crate::types::Direction;

    fn config(format: SampleFormat) -> PortConfig {
        PortConfig {
            input_channels: 1,
            output_channels: 2,
            sample_rate: 8000,
            block_frames: 64,
            format,
        }
    }

    fn buffer(direction: Direction, format: SampleFormat, channels: usize) -> SampleBuffer {
        SampleBuffer::new(BufferId { direction, slot: 0 }, format, 64, channels)
    }

    #[test]
    fn test_wav_sink_writes_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/render.wav");

        let mut sink = WavSink::new(&path);
        sink.prepare(&config(SampleFormat::Int16)).unwrap();
        let mut buf = buffer(Direction::Output, SampleFormat::Int16, 2);
        buf.set_f32(0, 0.5);
        sink.write(&buf).unwrap();
        sink.write(&buf).unwrap();
        sink.finish().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.duration(), 128);
    }

    #[test]
    fn test_wav_source_loops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for s in [0.25f32, -0.25, 0.5] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let mut source = WavSource::new(&path);
        source.prepare(&config(SampleFormat::Float32)).unwrap();
        let mut buf = buffer(Direction::Input, SampleFormat::Float32, 1);
        source.read(&mut buf).unwrap();

        let samples = buf.as_f32().unwrap();
        assert_eq!(&samples[..4], &[0.25, -0.25, 0.5, 0.25]);
    }

    #[test]
    fn test_wav_source_rejects_channel_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        hound::WavWriter::create(&path, spec).unwrap().finalize().unwrap();

        let mut source = WavSource::new(&path);
        let err = source.prepare(&config(SampleFormat::Int16)).unwrap_err();
        assert!(matches!(err, PortError::ConfigError(_)));
    }

    #[test]
    fn test_clocked_sink_paces_writes() {
        let mut cfg = config(SampleFormat::Int16);
        cfg.block_frames = 80; // 10ms at 8kHz
        let mut sink = ClockedSink::new(DiscardSink::new());
        sink.prepare(&cfg).unwrap();

        let buf = buffer(Direction::Output, SampleFormat::Int16, 2);
        let start = Instant::now();
        for _ in 0..3 {
            sink.write(&buf).unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(25));
    }
}
