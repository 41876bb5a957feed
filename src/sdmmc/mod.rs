//! sdspi-disk - SDMMC Protocol
//!
//! Implements the SD/MMC protocol on some generic SPI interface.
//!
//! Everything is synchronous and polled. Each public operation takes the
//! bus, brackets its work with card select and deselect, and returns once
//! the card has answered or a deadline has passed. Nothing is retried here;
//! a failed operation is reported and recovery is left to the caller.

mod acquire;
mod bus;
use bus::CardBus;

use super::sdmmc_proto::*;
use super::timer::TickSource;
use super::{Block, BlockCount, BlockDevice, BlockIdx, IoctlCmd, IoctlData, Status};

use core::convert::TryFrom;

use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;
#[cfg(feature = "log")]
use log::{debug, trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace, warn};

/// The SPI clock rates the driver asks for.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ClockSpeed {
    /// 100-400 kHz, required while a card is being identified.
    Slow,
    /// Full speed, used once a card has been initialized.
    Fast,
}

/// Lets the driver change the SPI clock rate.
///
/// Implement this on the same type that implements `Transfer<u8>`.
pub trait BusClock {
    /// Switch the bus to the given speed.
    fn set_clock_speed(&mut self, speed: ClockSpeed);
}

bitflags::bitflags! {
    /// The kind of card found by `initialize`. Empty if there is no usable card.
    #[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
    pub struct CardType: u8 {
        /// MMC version 3
        const MMC = 0x01;
        /// SD version 1
        const SD1 = 0x02;
        /// SD version 2
        const SD2 = 0x04;
        /// Any SD card
        const SDC = Self::SD1.bits | Self::SD2.bits;
        /// Takes block numbers, not byte offsets, as data addresses
        const BLOCK = 0x08;
    }
}

/// The possible errors `SdMmcSpi` can generate.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// Bad drive number, empty transfer, out of range address or unsupported
    /// control command. The bus was not touched.
    ParamError,
    /// The card has not been initialized
    NotReady,
    /// The card is write protected
    WriteProtected,
    /// The card or the bus failed part way through the operation
    GenericError(Fault),
}

/// Why an operation ended in [`Error::GenericError`].
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Fault {
    /// We got an error from the SPI peripheral
    Transport,
    /// Couldn't set the card select pin
    Gpio,
    /// The card stayed busy for longer than the ready timeout
    CardBusy,
    /// The card didn't accept this command
    CommandRejected(u8),
    /// No data token arrived in time
    ReadTimeout,
    /// The card sent this instead of a data start token
    BadToken(u8),
    /// The card answered a data block with this data response
    WriteRejected(u8),
    /// The Card Specific Data register didn't describe a usable size
    BadRegister,
}

impl From<Fault> for Error {
    fn from(fault: Fault) -> Error {
        Error::GenericError(fault)
    }
}

/// Tunables for talking to the card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone)]
pub struct Options {
    /// How long the card may stay busy before a command or a data block.
    pub ready_timeout_ms: u32,
    /// How long to wait for the start of a data block when reading.
    pub data_token_timeout_ms: u32,
    /// How long the whole of card identification may take.
    pub init_timeout_ms: u32,
    /// Dummy bytes clocked out before the first command.
    pub wake_up_bytes: u8,
    /// Bytes to read while looking for a command response.
    pub response_polls: u8,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            ready_timeout_ms: 500,
            data_token_timeout_ms: 200,
            init_timeout_ms: 1000,
            wake_up_bytes: 10,
            response_polls: 10,
        }
    }
}

/// An SD or MMC card on an SPI bus.
///
/// Built from an SPI peripheral, a Chip Select pin and a millisecond tick.
/// We need Chip Select to be separate so we can clock out some bytes without
/// Chip Select asserted (which puts the card into SPI mode).
///
/// There is a single card behind each `SdMmcSpi`, addressed as drive 0.
pub struct SdMmcSpi<SPI, CS, T>
where
    SPI: Transfer<u8> + BusClock,
    CS: OutputPin,
    T: TickSource,
{
    status: Status,
    card_type: CardType,
    spi: SPI,
    cs: CS,
    ticks: T,
    options: Options,
}

impl<SPI, CS, T> SdMmcSpi<SPI, CS, T>
where
    SPI: Transfer<u8> + BusClock,
    CS: OutputPin,
    T: TickSource,
{
    /// Create a new SD/MMC controller using a raw SPI interface.
    ///
    /// Nothing is sent until the card is initialized.
    pub fn new(spi: SPI, cs: CS, ticks: T) -> Self {
        Self::new_with_options(spi, cs, ticks, Options::default())
    }

    /// Create a new SD/MMC controller with the given timing options.
    pub fn new_with_options(spi: SPI, cs: CS, ticks: T, options: Options) -> Self {
        SdMmcSpi {
            status: Status::NOT_INITIALIZED,
            card_type: CardType::empty(),
            spi,
            cs,
            ticks,
            options,
        }
    }

    /// What kind of card was found the last time it was initialized.
    pub fn card_type(&self) -> CardType {
        self.card_type
    }

    /// Feed in the state of the socket's card detect and write protect
    /// switches.
    ///
    /// A removed card has to be initialized again once it is back.
    pub fn update_socket(&mut self, card_present: bool, write_protected: bool) {
        if card_present {
            self.status.remove(Status::NO_DISK);
        } else {
            self.status.insert(Status::NO_DISK | Status::NOT_INITIALIZED);
        }
        self.status.set(Status::WRITE_PROTECTED, write_protected);
        debug!("Socket changed, status now {:?}", self.status);
    }

    /// Take back the SPI peripheral, the Chip Select pin and the tick.
    pub fn free(self) -> (SPI, CS, T) {
        (self.spi, self.cs, self.ticks)
    }

    fn check_drive(drive: u8) -> Result<(), Error> {
        if drive == 0 {
            Ok(())
        } else {
            Err(Error::ParamError)
        }
    }

    /// Validate a transfer request and work out the address to send.
    fn start_transfer(&self, drive: u8, count: usize, start: BlockIdx) -> Result<u32, Error> {
        Self::check_drive(drive)?;
        if count == 0 {
            return Err(Error::ParamError);
        }
        if self.status.contains(Status::NOT_INITIALIZED) {
            return Err(Error::NotReady);
        }
        if self.card_type.contains(CardType::BLOCK) {
            Ok(start.0)
        } else {
            start
                .0
                .checked_mul(Block::LEN_U32)
                .ok_or(Error::ParamError)
        }
    }

    /// Run `f` with the bus. The card is deselected afterwards no matter how
    /// `f` ends.
    fn with_bus<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut CardBus<SPI, CS, T>) -> R,
    {
        let mut bus = CardBus::new(&mut self.spi, &mut self.cs, &self.ticks, &self.options);
        f(&mut bus)
    }

    fn read_sector_count(bus: &mut CardBus<SPI, CS, T>) -> Result<BlockCount, Fault> {
        if bus.card_command(CMD9, 0)? != R1_READY_STATE {
            return Err(Fault::CommandRejected(CMD9));
        }
        let mut register = [0u8; 16];
        bus.receive_block(&mut register)?;
        let csd = Csd::from_register(register);
        csd.sector_count()
            .map(BlockCount)
            .ok_or(Fault::BadRegister)
    }
}

/// The block count for SET_WR_BLK_ERASE_COUNT, saturated to 32 bits.
fn pre_erase_count(blocks: usize) -> u32 {
    u32::try_from(blocks).unwrap_or(u32::MAX)
}

impl<SPI, CS, T> BlockDevice for SdMmcSpi<SPI, CS, T>
where
    SPI: Transfer<u8> + BusClock,
    CS: OutputPin,
    T: TickSource,
{
    type Error = Error;

    /// Identify the card and get it ready for data transfer.
    ///
    /// Returns the new status; the card is usable if `NOT_INITIALIZED` is
    /// clear. A failed attempt leaves the card type empty and can simply be
    /// repeated.
    fn initialize(&mut self, drive: u8) -> Result<Status, Error> {
        Self::check_drive(drive)?;
        if self.status.contains(Status::NO_DISK) {
            return Ok(self.status);
        }

        self.spi.set_clock_speed(ClockSpeed::Slow);
        let init_timeout_ms = self.options.init_timeout_ms;
        let card_type = self.with_bus(|bus| -> Result<CardType, Fault> {
            bus.wake_up()?;
            acquire::negotiate(bus, init_timeout_ms)
        });
        self.card_type = card_type.unwrap_or_else(|_e| {
            warn!("Bus failure during init: {:?}", _e);
            CardType::empty()
        });

        if self.card_type.is_empty() {
            warn!("No usable card found");
            self.status.insert(Status::NOT_INITIALIZED);
        } else {
            debug!("Card type: {:?}", self.card_type);
            self.spi.set_clock_speed(ClockSpeed::Fast);
            self.status.remove(Status::NOT_INITIALIZED);
        }
        Ok(self.status)
    }

    fn status(&self, drive: u8) -> Result<Status, Error> {
        Self::check_drive(drive)?;
        Ok(self.status)
    }

    /// Read one or more blocks, starting at the given block index.
    fn read(
        &mut self,
        drive: u8,
        blocks: &mut [Block],
        start_block_idx: BlockIdx,
    ) -> Result<(), Error> {
        let address = self.start_transfer(drive, blocks.len(), start_block_idx)?;
        trace!("Read {} blocks @ {}", blocks.len(), start_block_idx.0);
        self.with_bus(|bus| -> Result<(), Fault> {
            if blocks.len() == 1 {
                // Start a single-block read
                if bus.card_command(CMD17, address)? != R1_READY_STATE {
                    return Err(Fault::CommandRejected(CMD17));
                }
                bus.receive_block(&mut blocks[0].contents)
            } else {
                // Start a multi-block read
                if bus.card_command(CMD18, address)? != R1_READY_STATE {
                    return Err(Fault::CommandRejected(CMD18));
                }
                let received = blocks
                    .iter_mut()
                    .try_for_each(|block| bus.receive_block(&mut block.contents));
                // Stop the read, however far it got. The R1 doesn't matter.
                let stopped = bus.card_command(CMD12, 0).map(|_r1| ());
                received.and(stopped)
            }
        })?;
        Ok(())
    }

    /// Write one or more blocks, starting at the given block index.
    fn write(
        &mut self,
        drive: u8,
        blocks: &[Block],
        start_block_idx: BlockIdx,
    ) -> Result<(), Error> {
        let address = self.start_transfer(drive, blocks.len(), start_block_idx)?;
        if self.status.contains(Status::WRITE_PROTECTED) {
            return Err(Error::WriteProtected);
        }
        trace!("Write {} blocks @ {}", blocks.len(), start_block_idx.0);
        let card_type = self.card_type;
        self.with_bus(|bus| -> Result<(), Fault> {
            if blocks.len() == 1 {
                // Start a single-block write
                if bus.card_command(CMD24, address)? != R1_READY_STATE {
                    return Err(Fault::CommandRejected(CMD24));
                }
                bus.transmit_block(DATA_START_BLOCK, &blocks[0].contents)
            } else {
                if card_type.intersects(CardType::SDC) {
                    // Only a hint, so the answer is ignored
                    bus.card_command(ACMD23, pre_erase_count(blocks.len()))?;
                }
                // Start a multi-block write
                if bus.card_command(CMD25, address)? != R1_READY_STATE {
                    return Err(Fault::CommandRejected(CMD25));
                }
                let sent = blocks.iter().try_for_each(|block| {
                    bus.transmit_block(WRITE_MULTIPLE_TOKEN, &block.contents)
                });
                // Stop the write
                let stopped = bus.transmit_stop();
                sent.and(stopped)
            }
        })?;
        Ok(())
    }

    /// Run a control command.
    ///
    /// `Sync` waits for the card to finish programming. `GetSectorCount`
    /// reads the capacity from the CSD register. Anything else beyond
    /// `GetSectorSize` isn't supported.
    fn ioctl(&mut self, drive: u8, cmd: IoctlCmd) -> Result<IoctlData, Error> {
        Self::check_drive(drive)?;
        if self.status.contains(Status::NOT_INITIALIZED) {
            return Err(Error::NotReady);
        }
        trace!("ioctl {:?}", cmd);
        self.with_bus(|bus| -> Result<IoctlData, Error> {
            match cmd {
                IoctlCmd::Sync => {
                    if bus.select()? {
                        Ok(IoctlData::Synced)
                    } else {
                        Err(Error::GenericError(Fault::CardBusy))
                    }
                }
                IoctlCmd::GetSectorCount => {
                    Ok(IoctlData::SectorCount(Self::read_sector_count(bus)?))
                }
                IoctlCmd::GetSectorSize => Ok(IoctlData::SectorSize(Block::LEN as u16)),
                IoctlCmd::GetBlockSize | IoctlCmd::Trim { .. } => Err(Error::ParamError),
            }
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pre_erase_count_saturates() {
        assert_eq!(pre_erase_count(0), 0);
        assert_eq!(pre_erase_count(2), 2);
        assert_eq!(pre_erase_count(u32::MAX as usize), u32::MAX);
        assert_eq!(pre_erase_count(usize::MAX), u32::MAX);
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
