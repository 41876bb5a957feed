use embedded_hal::{blocking::spi::Transfer, digital::v2::OutputPin};

use crate::sdmmc_proto::*;
use crate::timer::{Deadline, TickSource};

#[cfg(feature = "log")]
use log::{trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{trace, warn};

use super::{Fault, Options};

/// Exclusive use of the SPI bus and the card select line for the length of
/// one driver operation.
///
/// This struct is responsible for the byte-level side of the protocol:
/// selecting the card and waiting for it to be ready, command frames,
/// and framing of data blocks. The card is always deselected when it is
/// dropped, whichever way the operation ended.
pub struct CardBus<'a, SPI, CS, T>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
    T: TickSource,
{
    spi: &'a mut SPI,
    cs: &'a mut CS,
    ticks: &'a T,
    options: &'a Options,
}

impl<'a, SPI, CS, T> Drop for CardBus<'a, SPI, CS, T>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
    T: TickSource,
{
    fn drop(&mut self) {
        self.deselect().ok();
    }
}

impl<'a, SPI, CS, T> CardBus<'a, SPI, CS, T>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
    T: TickSource,
{
    pub fn new(spi: &'a mut SPI, cs: &'a mut CS, ticks: &'a T, options: &'a Options) -> Self {
        CardBus {
            spi,
            cs,
            ticks,
            options,
        }
    }

    pub fn ticks(&self) -> &'a T {
        self.ticks
    }

    /// Send one byte and receive one byte.
    fn exchange(&mut self, out: u8) -> Result<u8, Fault> {
        self.spi
            .transfer(&mut [out])
            .map(|b| b[0])
            .map_err(|_e| Fault::Transport)
    }

    /// Receive a byte from the SD card by clocking in an 0xFF byte.
    pub fn receive(&mut self) -> Result<u8, Fault> {
        self.exchange(BUS_IDLE)
    }

    /// Send a byte to the SD card.
    pub fn send(&mut self, out: u8) -> Result<(), Fault> {
        let _ = self.exchange(out)?;
        Ok(())
    }

    /// Clock out dummy bytes with the card deselected. A freshly powered
    /// card needs at least 74 clocks before it will take a command.
    pub fn wake_up(&mut self) -> Result<(), Fault> {
        self.cs.set_high().map_err(|_| Fault::Gpio)?;
        for _ in 0..self.options.wake_up_bytes {
            self.receive()?;
        }
        Ok(())
    }

    /// Spin until the card returns 0xFF, or the timeout passes.
    fn wait_ready(&mut self, timeout_ms: u32) -> Result<bool, Fault> {
        let deadline = Deadline::start(self.ticks, timeout_ms);
        while !deadline.expired() {
            if self.receive()? == BUS_IDLE {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Release the card. The trailing clock makes it let go of DO.
    pub fn deselect(&mut self) -> Result<(), Fault> {
        self.cs.set_high().map_err(|_| Fault::Gpio)?;
        self.receive()?;
        Ok(())
    }

    /// Assert card select and wait for the card to be ready.
    ///
    /// Returns `false`, with the card deselected again, if it stayed busy.
    pub fn select(&mut self) -> Result<bool, Fault> {
        self.cs.set_low().map_err(|_| Fault::Gpio)?;
        self.receive()?;
        if self.wait_ready(self.options.ready_timeout_ms)? {
            return Ok(true);
        }
        warn!("Card still busy after {} ms", self.options.ready_timeout_ms);
        self.deselect()?;
        Ok(false)
    }

    /// Perform a command, returning the R1 status.
    ///
    /// Application-specific commands get their APP_CMD escape first. If the
    /// escape itself fails with anything worse than "idle", that status is
    /// returned and the command is not sent.
    pub fn card_command(&mut self, command: u8, arg: u32) -> Result<u8, Fault> {
        if command & ACMD_FLAG != 0 {
            let r1 = self.transmit_command(CMD55, 0)?;
            if r1 > R1_IDLE_STATE {
                trace!("APP_CMD failed with {:x}", r1);
                return Ok(r1);
            }
        }
        self.transmit_command(command & !ACMD_FLAG, arg)
    }

    fn transmit_command(&mut self, command: u8, arg: u32) -> Result<u8, Fault> {
        // STOP_TRANSMISSION interrupts a transfer in progress, so the card
        // can't be expected to be ready for it.
        if command != CMD12 {
            self.deselect()?;
            if !self.select()? {
                return Ok(R1_NO_RESPONSE);
            }
        }

        let frame = [
            0x40 | command,
            (arg >> 24) as u8,
            (arg >> 16) as u8,
            (arg >> 8) as u8,
            arg as u8,
            command_crc(command),
        ];
        for b in frame.iter() {
            self.send(*b)?;
        }

        // skip stuff byte for stop read
        if command == CMD12 {
            let _result = self.receive()?;
        }

        let mut result = R1_NO_RESPONSE;
        for _ in 0..self.options.response_polls {
            result = self.receive()?;
            if result & R1_NOT_RECEIVED == 0 {
                break;
            }
        }
        trace!("CMD{}({:x}) -> {:x}", command, arg, result);
        Ok(result)
    }

    /// Read the four bytes trailing an R3 or R7 response.
    pub fn read_ocr(&mut self) -> Result<[u8; 4], Fault> {
        let mut ocr = [0u8; 4];
        for b in ocr.iter_mut() {
            *b = self.receive()?;
        }
        Ok(ocr)
    }

    /// Read one data packet into `buffer`, which is filled completely.
    ///
    /// The trailing CRC is clocked out and thrown away; the card's own
    /// checks are all the integrity protection a read gets.
    pub fn receive_block(&mut self, buffer: &mut [u8]) -> Result<(), Fault> {
        let deadline = Deadline::start(self.ticks, self.options.data_token_timeout_ms);
        let mut token = BUS_IDLE;
        while !deadline.expired() {
            token = self.receive()?;
            if token != BUS_IDLE {
                break;
            }
        }
        if token == BUS_IDLE {
            warn!("Timed out waiting for a data token");
            return Err(Fault::ReadTimeout);
        }
        if token != DATA_START_BLOCK {
            warn!("Got data token {:x}", token);
            return Err(Fault::BadToken(token));
        }

        for b in buffer.iter_mut() {
            *b = self.receive()?;
        }

        // CRC16
        self.receive()?;
        self.receive()?;
        Ok(())
    }

    /// Send one data packet, headed by `token`, and check that the card
    /// accepted it.
    pub fn transmit_block(&mut self, token: u8, buffer: &[u8]) -> Result<(), Fault> {
        self.wait_for_write_ready()?;
        self.send(token)?;
        for &b in buffer.iter() {
            self.send(b)?;
        }
        // Dummy CRC16
        self.send(0xFF)?;
        self.send(0xFF)?;
        let status = self.receive()?;
        if (status & DATA_RES_MASK) != DATA_RES_ACCEPTED {
            warn!("Data response {:x}", status);
            return Err(Fault::WriteRejected(status));
        }
        Ok(())
    }

    /// End a multiple block write. The stop token is not followed by data.
    pub fn transmit_stop(&mut self) -> Result<(), Fault> {
        self.wait_for_write_ready()?;
        self.send(STOP_TRAN_TOKEN)
    }

    fn wait_for_write_ready(&mut self) -> Result<(), Fault> {
        if self.wait_ready(self.options.ready_timeout_ms)? {
            Ok(())
        } else {
            warn!("Card busy, can't send data");
            Err(Fault::CardBusy)
        }
    }
}
