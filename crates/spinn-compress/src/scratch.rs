//! Scratch memory for on-chip compression
//!
//! Memory comes from the chip allocator when it has room. Otherwise it is
//! taken from spare blocks: stretches of synaptic matrix that the synapse
//! expander will regenerate once compression is over.
//!
//! ```text
//! allocate(chip, size)
//!   ├─ malloc_sdram ─ ok ──────────────────────────► Device grant
//!   ├─ refused ─► first spare block with size ≥ request ─► Stolen grant
//!   └─ no block fits ─────────────────────────────────► OutOfScratch
//! ```

use crate::error::{CompressionError, Result};
use crate::transport::{AppId, Transceiver};
use spinn_chip::ChipCoordinate;
use tracing::debug;

/// Reclaimable memory on one chip
///
/// `address` and `size` are the recorded base and remaining length. Stolen
/// bytes are taken from the front, so the still-free span starts at
/// [`free_address`](Self::free_address).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpareBlock {
    /// Recorded base address
    pub address: u32,
    /// Bytes still available
    pub size: u32,
    consumed: u32,
}

impl SpareBlock {
    /// Untouched block
    pub const fn new(address: u32, size: u32) -> Self {
        Self {
            address,
            size,
            consumed: 0,
        }
    }

    /// Start of the bytes not yet handed out
    pub const fn free_address(&self) -> u32 {
        self.address.wrapping_add(self.consumed)
    }
}

/// Spare blocks of one chip, in collection order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpareMemoryPool {
    blocks: Vec<SpareBlock>,
}

impl SpareMemoryPool {
    /// Empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool of untouched blocks
    pub fn from_blocks(blocks: impl IntoIterator<Item = (u32, u32)>) -> Self {
        Self {
            blocks: blocks
                .into_iter()
                .map(|(address, size)| SpareBlock::new(address, size))
                .collect(),
        }
    }

    /// Add a block at the end
    pub fn push(&mut self, address: u32, size: u32) {
        self.blocks.push(SpareBlock::new(address, size));
    }

    /// Blocks in order
    pub fn blocks(&self) -> &[SpareBlock] {
        &self.blocks
    }

    /// Recorded `(base, remaining)` pairs
    pub fn recorded(&self) -> Vec<(u32, u32)> {
        self.blocks.iter().map(|b| (b.address, b.size)).collect()
    }

    /// Number of blocks
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// No blocks
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Take `size` bytes from the first block that has them
    ///
    /// Returns the start of the stolen bytes, which is the block's free
    /// address rather than its recorded base: a second steal from the same
    /// block lands after the first instead of on top of it. The block's
    /// remaining size drops by `size` and never goes below zero.
    pub fn steal(&mut self, size: u32) -> Option<u32> {
        let block = self.blocks.iter_mut().find(|b| b.size >= size)?;
        let address = block.free_address();
        block.size -= size;
        block.consumed += size;
        Some(address)
    }
}

/// Where a grant came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScratchSource {
    /// The chip allocator
    Device,
    /// A spare block
    Stolen,
}

/// Memory handed to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchGrant {
    /// Start address
    pub address: u32,
    /// Length in bytes
    pub size: u32,
    /// Provenance of the memory
    pub source: ScratchSource,
}

/// Allocates scratch memory on chips
#[derive(Debug, Clone, Copy)]
pub struct ScratchAllocator<'a> {
    transceiver: &'a dyn Transceiver,
    app_id: AppId,
}

impl<'a> ScratchAllocator<'a> {
    /// Allocator charging allocations to `app_id`
    pub fn new(transceiver: &'a dyn Transceiver, app_id: AppId) -> Self {
        Self { transceiver, app_id }
    }

    /// Get `size` bytes on `chip`, stealing from `pool` if the chip refuses
    ///
    /// # Errors
    ///
    /// - [`CompressionError::OutOfScratch`] if the chip refuses and no block fits
    /// - [`CompressionError::Transport`] for transport failures other than a refusal
    pub fn allocate(&self, chip: ChipCoordinate, size: u32, pool: &mut SpareMemoryPool) -> Result<ScratchGrant> {
        match self.transceiver.malloc_sdram(chip, size, self.app_id) {
            Ok(address) => {
                debug!("Allocated {} bytes at 0x{:08x} on {}", size, address, chip);
                Ok(ScratchGrant {
                    address,
                    size,
                    source: ScratchSource::Device,
                })
            }
            Err(e) if e.is_allocation_refusal() => {
                let address = pool
                    .steal(size)
                    .ok_or(CompressionError::OutOfScratch { chip, size })?;
                debug!(
                    "Chip {} refused {} bytes ({}); stole 0x{:08x} from spare memory",
                    chip, size, e, address
                );
                Ok(ScratchGrant {
                    address,
                    size,
                    source: ScratchSource::Stolen,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steal_is_first_fit() {
        let mut pool = SpareMemoryPool::from_blocks([(0x1000, 100), (0x2000, 50)]);
        assert_eq!(pool.steal(60), Some(0x1000));
        assert_eq!(pool.recorded(), vec![(0x1000, 40), (0x2000, 50)]);

        // first block has only 40 left, so the second is used
        assert_eq!(pool.steal(45), Some(0x2000));
        assert_eq!(pool.recorded(), vec![(0x1000, 40), (0x2000, 5)]);

        assert_eq!(pool.steal(200), None);
        assert_eq!(pool.recorded(), vec![(0x1000, 40), (0x2000, 5)]);
    }

    #[test]
    fn repeated_steals_do_not_overlap() {
        let mut pool = SpareMemoryPool::from_blocks([(0x1000, 100)]);
        let a = pool.steal(30).unwrap();
        let b = pool.steal(30).unwrap();
        assert_eq!(b, a + 30);
        assert_eq!(pool.blocks()[0].free_address(), 0x1000 + 60);
        assert_eq!(pool.recorded(), vec![(0x1000, 40)]);
    }

    #[test]
    fn exact_fit_empties_block() {
        let mut pool = SpareMemoryPool::from_blocks([(0x1000, 40)]);
        assert_eq!(pool.steal(40), Some(0x1000));
        assert_eq!(pool.steal(1), None);
        assert_eq!(pool.recorded(), vec![(0x1000, 0)]);
    }
}
