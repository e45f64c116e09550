//! DoubleBuffer - two sample buffers and the index of the one being prepared

use crate::types::{Direction, SampleFormat, DOUBLE_BUFFER_LEN};

use super::sample::{BufferId, SampleBuffer};

/// Two buffers per direction: one being prepared by the mixer, one in flight
///
/// A slot holding `None` is owned by hardware. `prepare_index` points at
/// the slot the mixer fills (output) or drains (input) next; handing that
/// buffer off toggles the index.
#[derive(Debug)]
pub struct DoubleBuffer {
    direction: Direction,
    slots: [Option<SampleBuffer>; DOUBLE_BUFFER_LEN],
    prepare_index: usize,
}

impl DoubleBuffer {
    /// Allocate both buffers up front
    pub fn new(direction: Direction, format: SampleFormat, frames: usize, channels: usize) -> Self {
        let slots = std::array::from_fn(|slot| {
            Some(SampleBuffer::new(
                BufferId { direction, slot },
                format,
                frames,
                channels,
            ))
        });

        Self {
            direction,
            slots,
            prepare_index: 0,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Index of the slot the mixer works on next
    pub fn prepare_index(&self) -> usize {
        self.prepare_index
    }

    /// The buffer being prepared, if the mixer currently owns it
    pub fn prepared(&self) -> Option<&SampleBuffer> {
        self.slots[self.prepare_index].as_ref()
    }

    pub fn prepared_mut(&mut self) -> Option<&mut SampleBuffer> {
        self.slots[self.prepare_index].as_mut()
    }

    /// Whether the mixer owns the buffer in `slot`
    pub fn is_home(&self, slot: usize) -> bool {
        self.slots.get(slot).map_or(false, Option::is_some)
    }

    /// Whether the slot that is not being prepared has come back from hardware
    pub fn in_flight_returned(&self) -> bool {
        self.is_home(self.prepare_index ^ 1)
    }

    /// Whether both buffers are owned by the mixer
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Number of buffers currently owned by hardware
    pub fn in_flight(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }

    /// Move the prepared buffer out for the port and flip the index
    ///
    /// Returns `None` (and leaves the index untouched) if the prepared slot
    /// is still owned by hardware.
    pub fn hand_off(&mut self) -> Option<SampleBuffer> {
        let buffer = self.slots[self.prepare_index].take()?;
        self.prepare_index ^= 1;
        Some(buffer)
    }

    /// Return a buffer given back by the port to its slot
    pub fn reclaim(&mut self, buffer: SampleBuffer) {
        let slot = buffer.slot();
        debug_assert_eq!(buffer.id().direction, self.direction);
        debug_assert!(self.slots[slot].is_none(), "{} reclaimed twice", buffer.id());
        self.slots[slot] = Some(buffer);
    }

    /// Zero every buffer the mixer owns
    pub fn silence_all(&mut self) {
        for buffer in self.slots.iter_mut().flatten() {
            buffer.silence();
        }
    }

    /// Point the prepare index back at slot 0
    pub fn rewind(&mut self) {
        self.prepare_index = 0;
    }
}
