//! Card identification and initialization.
//!
//! Runs with the bus at the slow clock. The card is probed with GO_IDLE,
//! sorted into SD v2, SD v1 or MMC by how it answers SEND_IF_COND and
//! SD_SEND_OP_COND, and polled until it leaves the idle state. All of that
//! shares one overall deadline.

use embedded_hal::{blocking::spi::Transfer, digital::v2::OutputPin};

use crate::sdmmc_proto::*;
use crate::timer::{Deadline, TickSource};
use crate::Block;

#[cfg(feature = "log")]
use log::{debug, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, warn};

use super::bus::CardBus;
use super::{CardType, Fault};

/// Where the negotiation currently is.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Phase {
    /// Ask for the interface condition; only SD v2 cards understand it.
    CheckVoltage,
    /// SD v2: ACMD41 with HCS until the card is ready.
    NegotiateSdV2,
    /// SD v2: read the OCR to learn the addressing mode.
    ReadOcr,
    /// Not SD v2: find out whether ACMD41 is understood at all.
    ProbeSdV1,
    /// SD v1 or MMC: poll `command` until the card is ready.
    NegotiateLegacy { command: u8, card_type: CardType },
    /// Byte addressed cards get their block length pinned to 512.
    SetBlockLength(CardType),
    Done(CardType),
    Failed,
}

/// Bring the card out of idle and work out what it is.
///
/// Returns an empty `CardType` if the card didn't answer the way any
/// supported card would, or didn't finish within `timeout_ms`.
pub fn negotiate<SPI, CS, T>(
    bus: &mut CardBus<'_, SPI, CS, T>,
    timeout_ms: u32,
) -> Result<CardType, Fault>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
    T: TickSource,
{
    let r1 = bus.card_command(CMD0, 0)?;
    if r1 != R1_IDLE_STATE {
        warn!("No idle response to GO_IDLE_STATE: {:x}", r1);
        return Ok(CardType::empty());
    }

    let deadline = Deadline::start(bus.ticks(), timeout_ms);
    let mut phase = Phase::CheckVoltage;
    loop {
        debug!("Init phase {:?}", phase);
        phase = match phase {
            Phase::CheckVoltage => {
                if bus.card_command(CMD8, CMD8_ARG_VHS_CHECK)? <= R1_IDLE_STATE {
                    let r7 = bus.read_ocr()?;
                    if r7[2] == R7_VOLTAGE_ACCEPTED && r7[3] == R7_CHECK_PATTERN {
                        Phase::NegotiateSdV2
                    } else {
                        warn!("Bad interface condition echo {:x} {:x}", r7[2], r7[3]);
                        Phase::Failed
                    }
                } else {
                    Phase::ProbeSdV1
                }
            }
            Phase::NegotiateSdV2 => {
                if poll_until_ready(bus, &deadline, ACMD41, ACMD41_HCS)? {
                    Phase::ReadOcr
                } else {
                    Phase::Failed
                }
            }
            Phase::ReadOcr => {
                if bus.card_command(CMD58, 0)? == R1_READY_STATE {
                    let ocr = bus.read_ocr()?;
                    if ocr[0] & OCR_CCS != 0 {
                        Phase::Done(CardType::SD2 | CardType::BLOCK)
                    } else {
                        Phase::Done(CardType::SD2)
                    }
                } else {
                    Phase::Failed
                }
            }
            Phase::ProbeSdV1 => {
                if bus.card_command(ACMD41, 0)? <= R1_IDLE_STATE {
                    Phase::NegotiateLegacy {
                        command: ACMD41,
                        card_type: CardType::SD1,
                    }
                } else {
                    Phase::NegotiateLegacy {
                        command: CMD1,
                        card_type: CardType::MMC,
                    }
                }
            }
            Phase::NegotiateLegacy { command, card_type } => {
                if poll_until_ready(bus, &deadline, command, 0)? {
                    Phase::SetBlockLength(card_type)
                } else {
                    Phase::Failed
                }
            }
            Phase::SetBlockLength(card_type) => {
                if bus.card_command(CMD16, Block::LEN_U32)? == R1_READY_STATE {
                    Phase::Done(card_type)
                } else {
                    Phase::Failed
                }
            }
            Phase::Done(card_type) => return Ok(card_type),
            Phase::Failed => return Ok(CardType::empty()),
        };
    }
}

/// Send `command` until the card reports ready. `false` means the deadline
/// passed first.
fn poll_until_ready<SPI, CS, T>(
    bus: &mut CardBus<'_, SPI, CS, T>,
    deadline: &Deadline<'_, T>,
    command: u8,
    arg: u32,
) -> Result<bool, Fault>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
    T: TickSource,
{
    while !deadline.expired() {
        if bus.card_command(command, arg)? == R1_READY_STATE {
            return Ok(!deadline.expired());
        }
    }
    warn!("Card still idle at the init deadline");
    Ok(false)
}
