//! The interface to block storage devices.

mod ramdisk;

pub use ramdisk::RamDisk;

use crate::{error::Result, param::BLOCK_SIZE};

/// Names one block on one device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId {
    /// The device number.
    pub device: u32,
    /// The block number on the device.
    pub block: u32,
}
impl core::fmt::Display for BlockId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.device, self.block)
    }
}

/// Which way a transfer moves data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Copy the block from the device into memory.
    Read,
    /// Copy memory out to the block on the device.
    Write,
}

/// A device that stores data in fixed-size blocks.
pub trait BlockDevice: Sync {
    /// Move exactly one block between the device and `data`, returning once it's done.
    ///
    /// For [`Direction::Write`], `data` is only read.
    fn transfer(&self, direction: Direction, id: BlockId, data: &mut [u8; BLOCK_SIZE])
    -> Result<()>;
}

impl<D: BlockDevice + ?Sized> BlockDevice for &D {
    fn transfer(
        &self,
        direction: Direction,
        id: BlockId,
        data: &mut [u8; BLOCK_SIZE],
    ) -> Result<()> {
        (**self).transfer(direction, id, data)
    }
}
