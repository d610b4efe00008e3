//! Fixed ring of host-readable transfer buffers.
//!
//! Frame `k` copies into slot `k mod n` while slot `(k - 1) mod n`, filled on
//! the previous frame, is mapped and read. With `n >= 2` the slot being
//! written and the slot being read are never the same buffer.

use crate::error::GpuError;
use crate::gpu::{GraphicsDevice, TransferBufferId};

/// Smallest ring that keeps the write and read slots apart.
pub const MIN_RING_SIZE: usize = 2;

#[derive(Debug, Clone, Copy)]
pub struct TransferSlot {
    buffer: TransferBufferId,
    /// Sequence number of the frame whose copy is in flight in this slot
    pending: Option<u64>,
}

impl TransferSlot {
    pub fn buffer(&self) -> TransferBufferId {
        self.buffer
    }
}

#[derive(Debug)]
pub struct PixelTransferRing {
    slots: Vec<TransferSlot>,
    index: usize,
    width: u32,
    height: u32,
}

impl PixelTransferRing {
    /// Allocates `count` buffers (at least [`MIN_RING_SIZE`]) sized for a
    /// `width x height` RGBA8 frame. Nothing is leaked if an allocation fails.
    pub fn allocate<D: GraphicsDevice + ?Sized>(
        device: &mut D,
        count: usize,
        width: u32,
        height: u32,
    ) -> Result<Self, GpuError> {
        let count = count.max(MIN_RING_SIZE);
        let mut slots = Vec::with_capacity(count);
        for _ in 0..count {
            match device.create_transfer_buffer(width, height) {
                Ok(buffer) => slots.push(TransferSlot {
                    buffer,
                    pending: None,
                }),
                Err(err) => {
                    for slot in slots {
                        device.destroy_transfer_buffer(slot.buffer);
                    }
                    return Err(err);
                }
            }
        }
        log::debug!("allocated {count} transfer buffers for {width}x{height}");
        Ok(Self {
            slots,
            index: 0,
            width,
            height,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn read_index(&self) -> usize {
        (self.index + self.slots.len() - 1) % self.slots.len()
    }

    pub fn write_slot(&self) -> &TransferSlot {
        &self.slots[self.index]
    }

    pub fn read_slot(&self) -> &TransferSlot {
        &self.slots[self.read_index()]
    }

    /// Records that the write slot now holds the copy of frame `sequence`,
    /// or nothing when the copy could not be issued.
    pub fn mark_written(&mut self, sequence: Option<u64>) {
        self.slots[self.index].pending = sequence;
    }

    /// Takes the read slot's pending frame, leaving the slot empty.
    pub fn take_readable(&mut self) -> Option<(TransferBufferId, u64)> {
        let read = self.read_index();
        debug_assert_ne!(read, self.index, "read and write slots alias");
        let slot = &mut self.slots[read];
        slot.pending.take().map(|sequence| (slot.buffer, sequence))
    }

    pub fn advance(&mut self) {
        self.index = (self.index + 1) % self.slots.len();
    }

    /// Frees every buffer. In-flight copies are abandoned with them.
    pub fn release<D: GraphicsDevice + ?Sized>(self, device: &mut D) {
        let abandoned = self.slots.iter().filter(|s| s.pending.is_some()).count();
        if abandoned > 0 {
            log::debug!("abandoning {abandoned} in-flight pixel transfers");
        }
        for slot in self.slots {
            device.destroy_transfer_buffer(slot.buffer);
        }
    }
}
