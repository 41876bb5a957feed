//! sdspi-disk - Block Device support
//!
//! The contract a filesystem layer drives a disk through: initialize once,
//! then query status, read and write whole blocks, and issue control
//! commands. Exactly one physical drive, index 0, is addressable.

mod block;
pub use block::*;

bitflags::bitflags! {
    /// Disk status bits, as reported by `initialize` and `status`.
    #[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
    pub struct Status: u8 {
        /// The drive has not been initialized, or initialization failed.
        const NOT_INITIALIZED = 0x01;
        /// No medium in the drive.
        const NO_DISK = 0x02;
        /// The medium is write protected.
        const WRITE_PROTECTED = 0x04;
    }
}

impl Status {
    /// Can the drive be read from?
    pub fn is_ready(self) -> bool {
        !self.contains(Status::NOT_INITIALIZED)
    }
}

/// Control commands for [`BlockDevice::ioctl`].
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IoctlCmd {
    /// Wait until the drive has finished any pending write.
    Sync,
    /// Number of addressable blocks on the medium.
    GetSectorCount,
    /// Size of one block in bytes.
    GetSectorSize,
    /// Erase block size in units of blocks.
    GetBlockSize,
    /// Tell the drive a range of blocks is no longer in use.
    Trim {
        /// First unused block.
        start: BlockIdx,
        /// Last unused block, inclusive.
        end: BlockIdx,
    },
}

/// What a successful [`BlockDevice::ioctl`] hands back.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IoctlData {
    /// The drive is idle.
    Synced,
    /// Answer to [`IoctlCmd::GetSectorCount`].
    SectorCount(BlockCount),
    /// Answer to [`IoctlCmd::GetSectorSize`].
    SectorSize(u16),
}

/// Represents a block device - a device which can read and write blocks (or
/// sectors). Only supports devices which are <= 2 TiB in size.
pub trait BlockDevice {
    /// The errors that the `BlockDevice` can return. Must be debug formattable.
    type Error: core::fmt::Debug;
    /// Bring the drive up and report its status.
    fn initialize(&mut self, drive: u8) -> Result<Status, Self::Error>;
    /// Report the drive status without touching the medium.
    fn status(&self, drive: u8) -> Result<Status, Self::Error>;
    /// Read one or more blocks, starting at the given block index.
    fn read(
        &mut self,
        drive: u8,
        blocks: &mut [Block],
        start_block_idx: BlockIdx,
    ) -> Result<(), Self::Error>;
    /// Write one or more blocks, starting at the given block index.
    fn write(
        &mut self,
        drive: u8,
        blocks: &[Block],
        start_block_idx: BlockIdx,
    ) -> Result<(), Self::Error>;
    /// Run a control command.
    fn ioctl(&mut self, drive: u8, cmd: IoctlCmd) -> Result<IoctlData, Self::Error>;
}

impl<T> BlockDevice for &mut T
where
    T: BlockDevice,
{
    type Error = T::Error;

    fn initialize(&mut self, drive: u8) -> Result<Status, Self::Error> {
        (*self).initialize(drive)
    }

    fn status(&self, drive: u8) -> Result<Status, Self::Error> {
        (**self).status(drive)
    }

    fn read(
        &mut self,
        drive: u8,
        blocks: &mut [Block],
        start_block_idx: BlockIdx,
    ) -> Result<(), Self::Error> {
        (*self).read(drive, blocks, start_block_idx)
    }

    fn write(
        &mut self,
        drive: u8,
        blocks: &[Block],
        start_block_idx: BlockIdx,
    ) -> Result<(), Self::Error> {
        (*self).write(drive, blocks, start_block_idx)
    }

    fn ioctl(&mut self, drive: u8, cmd: IoctlCmd) -> Result<IoctlData, Self::Error> {
        (*self).ioctl(drive, cmd)
    }
}
