//! SampleBuffer - one fixed-length block of interleaved audio

use crate::types::{Direction, SampleFormat};

/// Convert a 16-bit sample to float in [-1.0, 1.0)
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Convert a float sample to 16-bit, clamping out-of-range values
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

/// Identity of a buffer within the engine: which direction and which slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId {
    pub direction: Direction,
    pub slot: usize,
}

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.direction.name(), self.slot)
    }
}

/// Sample storage, boxed so the length can never change after allocation
#[derive(Debug)]
pub enum Samples {
    Int16(Box<[i16]>),
    Float32(Box<[f32]>),
}

impl Samples {
    fn zeroed(format: SampleFormat, len: usize) -> Self {
        match format {
            SampleFormat::Int16 => Samples::Int16(vec![0; len].into_boxed_slice()),
            SampleFormat::Float32 => Samples::Float32(vec![0.0; len].into_boxed_slice()),
        }
    }

    pub fn format(&self) -> SampleFormat {
        match self {
            Samples::Int16(_) => SampleFormat::Int16,
            Samples::Float32(_) => SampleFormat::Float32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Samples::Int16(s) => s.len(),
            Samples::Float32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A block of `frames × channels` interleaved samples
///
/// The sample count is fixed at construction. Contents are overwritten in
/// place every cycle.
#[derive(Debug)]
pub struct SampleBuffer {
    id: BufferId,
    frames: usize,
    channels: usize,
    samples: Samples,
}

impl SampleBuffer {
    /// Allocate a zeroed buffer
    pub fn new(id: BufferId, format: SampleFormat, frames: usize, channels: usize) -> Self {
        Self {
            id,
            frames,
            channels,
            samples: Samples::zeroed(format, frames * channels),
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Slot index within the owning double buffer
    pub fn slot(&self) -> usize {
        self.id.slot
    }

    pub fn format(&self) -> SampleFormat {
        self.samples.format()
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Total interleaved sample count (`frames × channels`)
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut Samples {
        &mut self.samples
    }

    pub fn as_i16(&self) -> Option<&[i16]> {
        match &self.samples {
            Samples::Int16(s) => Some(s),
            Samples::Float32(_) => None,
        }
    }

    pub fn as_i16_mut(&mut self) -> Option<&mut [i16]> {
        match &mut self.samples {
            Samples::Int16(s) => Some(s),
            Samples::Float32(_) => None,
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.samples {
            Samples::Float32(s) => Some(s),
            Samples::Int16(_) => None,
        }
    }

    pub fn as_f32_mut(&mut self) -> Option<&mut [f32]> {
        match &mut self.samples {
            Samples::Float32(s) => Some(s),
            Samples::Int16(_) => None,
        }
    }

    /// Overwrite the whole buffer with zeros
    pub fn silence(&mut self) {
        match &mut self.samples {
            Samples::Int16(s) => s.fill(0),
            Samples::Float32(s) => s.fill(0.0),
        }
    }

    pub fn is_silent(&self) -> bool {
        match &self.samples {
            Samples::Int16(s) => s.iter().all(|&x| x == 0),
            Samples::Float32(s) => s.iter().all(|&x| x == 0.0),
        }
    }

    /// Interleaved sample at `index` as float
    pub fn get_f32(&self, index: usize) -> Option<f32> {
        match &self.samples {
            Samples::Int16(s) => s.get(index).map(|&x| i16_to_f32(x)),
            Samples::Float32(s) => s.get(index).copied(),
        }
    }

    /// Store a float sample at `index`, converting to the buffer's format
    #[inline]
    pub fn set_f32(&mut self, index: usize, value: f32) {
        match &mut self.samples {
            Samples::Int16(s) => {
                if let Some(x) = s.get_mut(index) {
                    *x = f32_to_i16(value);
                }
            }
            Samples::Float32(s) => {
                if let Some(x) = s.get_mut(index) {
                    *x = value;
                }
            }
        }
    }

    /// Copy samples starting at `offset` into `dst` as float
    ///
    /// Returns the number of samples copied (bounded by both lengths).
    pub fn read_f32(&self, offset: usize, dst: &mut [f32]) -> usize {
        let available = self.sample_count().saturating_sub(offset);
        let n = available.min(dst.len());
        match &self.samples {
            Samples::Int16(s) => {
                for (d, &x) in dst[..n].iter_mut().zip(&s[offset..offset + n]) {
                    *d = i16_to_f32(x);
                }
            }
            Samples::Float32(s) => dst[..n].copy_from_slice(&s[offset..offset + n]),
        }
        n
    }

    /// Copy float samples from `src` into the buffer starting at `offset`
    ///
    /// Returns the number of samples written.
    pub fn write_f32(&mut self, offset: usize, src: &[f32]) -> usize {
        let available = self.sample_count().saturating_sub(offset);
        let n = available.min(src.len());
        match &mut self.samples {
            Samples::Int16(s) => {
                for (d, &x) in s[offset..offset + n].iter_mut().zip(&src[..n]) {
                    *d = f32_to_i16(x);
                }
            }
            Samples::Float32(s) => s[offset..offset + n].copy_from_slice(&src[..n]),
        }
        n
    }

    /// Peak absolute amplitude as float
    pub fn peak(&self) -> f32 {
        match &self.samples {
            Samples::Int16(s) => s
                .iter()
                .map(|&x| i16_to_f32(x).abs())
                .fold(0.0, f32::max),
            Samples::Float32(s) => s.iter().map(|x| x.abs()).fold(0.0, f32::max),
        }
    }
}
