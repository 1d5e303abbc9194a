//! A block device backed by kernel memory.

use alloc::{vec, vec::Vec};
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    block::{BlockDevice, BlockId, Direction},
    error::{ErrorKind, Result},
    param::BLOCK_SIZE,
    sync::KSpinLock,
};

/// A disk whose blocks live in memory.
///
/// Useful before a real driver is up, and for checking what the buffer cache sends to its device:
/// every transfer is counted.
pub struct RamDisk {
    /// The device number this disk answers to.
    device: u32,
    /// The contents of each block.
    blocks: KSpinLock<Vec<[u8; BLOCK_SIZE]>>,
    /// Number of reads served.
    reads: AtomicUsize,
    /// Number of writes served.
    writes: AtomicUsize,
}
impl RamDisk {
    /// Make a zero-filled disk with `num_blocks` blocks, answering to device number `device`.
    pub fn new(device: u32, num_blocks: usize) -> Self {
        Self {
            device,
            blocks: KSpinLock::new(vec![[0; BLOCK_SIZE]; num_blocks]),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Get a copy of a block, without counting it as a read.
    pub fn contents(&self, block: u32) -> Option<[u8; BLOCK_SIZE]> {
        self.blocks.lock().get(block as usize).copied()
    }

    /// Overwrite a block, without counting it as a write.
    ///
    /// This is for loading a disk image before anything uses the disk.
    pub fn set_contents(&self, block: u32, data: &[u8; BLOCK_SIZE]) -> Result<()> {
        let mut blocks = self.blocks.lock();
        let slot = blocks.get_mut(block as usize).ok_or(ErrorKind::Io)?;
        *slot = *data;
        Ok(())
    }

    /// Get the number of reads served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// Get the number of writes served so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

impl BlockDevice for RamDisk {
    fn transfer(
        &self,
        direction: Direction,
        id: BlockId,
        data: &mut [u8; BLOCK_SIZE],
    ) -> Result<()> {
        if id.device != self.device {
            log::error!("Block {id} sent to RAM disk {}", self.device);
            return Err(ErrorKind::Io.into());
        }
        let mut blocks = self.blocks.lock();
        let Some(block) = blocks.get_mut(id.block as usize) else {
            log::error!("Block {id} is past the end of the RAM disk");
            return Err(ErrorKind::Io.into());
        };
        log::trace!("RAM disk {direction:?} of block {id}");
        match direction {
            Direction::Read => {
                data.copy_from_slice(block);
                self.reads.fetch_add(1, Ordering::Relaxed);
            }
            Direction::Write => {
                block.copy_from_slice(data);
                self.writes.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}
