//! # sdspi-disk
//!
//! > An SD/MMC card block driver written in Embedded Rust
//!
//! This crate drives a single SD or MMC card over SPI and presents it as a
//! block device with 512-byte blocks, ready to sit underneath a FAT
//! filesystem. It is written in pure-Rust, is `#![no_std]` and does not use
//! `alloc`. All transfers are synchronous and polled, and every wait on the
//! card is bounded by a timeout driven from a millisecond tick.
//!
//! SD v2 (standard and high capacity), SD v1 and MMC v3 cards are
//! recognised. CRCs on data read from the card are not checked.
//!
//! ## Using the crate
//!
//! You will need an SPI peripheral that implements
//! `embedded_hal::blocking::spi::Transfer<u8>` and [`BusClock`] (so the
//! driver can drop to a slow clock while the card is identified), an
//! `OutputPin` for card select, and a [`TickSource`].
//!
//! ```rust
//! # struct DummySpi;
//! # struct DummyCsPin;
//! # struct DummyTicks;
//! # impl embedded_hal::blocking::spi::Transfer<u8> for DummySpi {
//! #   type Error = ();
//! #   fn transfer<'w>(&mut self, data: &'w mut [u8]) -> Result<&'w [u8], ()> { Ok(data) }
//! # }
//! # impl sdspi_disk::BusClock for DummySpi {
//! #   fn set_clock_speed(&mut self, _speed: sdspi_disk::ClockSpeed) {}
//! # }
//! # impl embedded_hal::digital::v2::OutputPin for DummyCsPin {
//! #   type Error = ();
//! #   fn set_low(&mut self) -> Result<(), ()> { Ok(()) }
//! #   fn set_high(&mut self) -> Result<(), ()> { Ok(()) }
//! # }
//! # impl sdspi_disk::TickSource for DummyTicks {
//! #   fn now_ms(&self) -> u32 { 0 }
//! # }
//! # let (sdmmc_spi, sdmmc_cs, ticks) = (DummySpi, DummyCsPin, DummyTicks);
//! use sdspi_disk::{Block, BlockDevice, BlockIdx, IoctlCmd, SdMmcSpi};
//!
//! let mut card = SdMmcSpi::new(sdmmc_spi, sdmmc_cs, ticks);
//! match card.initialize(0) {
//!     Ok(status) if status.is_ready() => {
//!         let mut blocks = [Block::new()];
//!         card.read(0, &mut blocks, BlockIdx(0)).unwrap();
//!         let size = card.ioctl(0, IoctlCmd::GetSectorCount).unwrap();
//!         println!("{:?}", size);
//!     }
//!     other => println!("No card: {:?}", other),
//! }
//! ```
//!
//! ## Features
//!
//! * `defmt-log`: By turning off the default features and enabling the `defmt-log` feature you can
//! configure this crate to log messages over defmt instead.
//!
//! Make sure that either the `log` feature or the `defmt-log` feature is enabled.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

// ****************************************************************************
//
// Imports
//
// ****************************************************************************


#[macro_use]
mod structure;

pub mod block_device;
pub mod sdmmc;
pub mod sdmmc_proto;
pub mod timer;

pub use crate::block_device::{
    Block, BlockCount, BlockDevice, BlockIdx, IoctlCmd, IoctlData, Status,
};
pub use crate::sdmmc::Error as SdMmcError;
pub use crate::sdmmc::{BusClock, CardType, ClockSpeed, Fault, Options, SdMmcSpi};
pub use crate::timer::TickSource;

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
