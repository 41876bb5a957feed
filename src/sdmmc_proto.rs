//! sdspi-disk - Constants from the SD and MMC specifications
//!
//! Command indices, fixed command CRCs, R1 status bits and data tokens for
//! SPI mode, plus the two layouts of the Card Specific Data register.

//==============================================================================

// Card commands. Application-specific commands carry `ACMD_FLAG` and are sent
// behind an APP_CMD escape.

/// Marks an application-specific command; never sent on the wire.
pub const ACMD_FLAG: u8 = 0x80;

/// GO_IDLE_STATE - init card in spi mode if CS low
pub const CMD0: u8 = 0x00;
/// SEND_OP_COND - start the MMC initialization process
pub const CMD1: u8 = 0x01;
/// SEND_IF_COND - verify SD Memory Card interface operating condition
pub const CMD8: u8 = 0x08;
/// SEND_CSD - read the Card Specific Data (CSD register)
pub const CMD9: u8 = 0x09;
/// STOP_TRANSMISSION - end multiple block read sequence
pub const CMD12: u8 = 0x0C;
/// SET_BLOCKLEN - set the block length for byte addressed cards
pub const CMD16: u8 = 0x10;
/// READ_SINGLE_BLOCK - read a single data block from the card
pub const CMD17: u8 = 0x11;
/// READ_MULTIPLE_BLOCK - read a multiple data blocks from the card
pub const CMD18: u8 = 0x12;
/// WRITE_BLOCK - write a single data block to the card
pub const CMD24: u8 = 0x18;
/// WRITE_MULTIPLE_BLOCK - write blocks of data until a STOP_TRANSMISSION
pub const CMD25: u8 = 0x19;
/// APP_CMD - escape for application specific command
pub const CMD55: u8 = 0x37;
/// READ_OCR - read the OCR register of a card
pub const CMD58: u8 = 0x3A;
/// SET_WR_BLK_ERASE_COUNT - pre-erase hint before a multiple block write
pub const ACMD23: u8 = ACMD_FLAG | 0x17;
/// SD_SEND_OP_COMD - Sends host capacity support information and activates
/// the card's initialization process
pub const ACMD41: u8 = ACMD_FLAG | 0x29;

//==============================================================================

// Command frame CRCs. In SPI mode only CMD0 and CMD8 are CRC checked before
// CRC mode is switched on, so those two carry their real CRC7; everything
// else gets a dummy CRC with the end bit set.

/// CRC7 + end bit of `CMD0(0)`
pub const CMD0_CRC: u8 = 0x95;
/// CRC7 + end bit of `CMD8(0x1AA)`
pub const CMD8_CRC: u8 = 0x87;
/// Dummy CRC + end bit
pub const DUMMY_CRC: u8 = 0x01;

/// Argument for CMD8: 2.7-3.6V supply range plus the `0xAA` check pattern
pub const CMD8_ARG_VHS_CHECK: u32 = 0x1AA;
/// Voltage accepted byte echoed in the R7 response
pub const R7_VOLTAGE_ACCEPTED: u8 = 0x01;
/// Check pattern echoed in the R7 response
pub const R7_CHECK_PATTERN: u8 = 0xAA;

/// ACMD41 host capacity support bit
pub const ACMD41_HCS: u32 = 1 << 30;
/// OCR card capacity status bit, as found in the first OCR byte
pub const OCR_CCS: u8 = 0x40;

//==============================================================================

/// status for card in the ready state
pub const R1_READY_STATE: u8 = 0x00;

/// status for card in the idle state
pub const R1_IDLE_STATE: u8 = 0x01;

/// status bit for illegal command
pub const R1_ILLEGAL_COMMAND: u8 = 0x04;

/// any R1 has this bit clear; 0xFF is what an absent or deselected card
/// gives back
pub const R1_NOT_RECEIVED: u8 = 0x80;

/// returned by the command layer when the card never became ready
pub const R1_NO_RESPONSE: u8 = 0xFF;

/// start data token for read or write single block
pub const DATA_START_BLOCK: u8 = 0xFE;

/// stop token for write multiple blocks
pub const STOP_TRAN_TOKEN: u8 = 0xFD;

/// start data token for write multiple blocks
pub const WRITE_MULTIPLE_TOKEN: u8 = 0xFC;

/// mask for data response tokens after a write block operation
pub const DATA_RES_MASK: u8 = 0x1F;

/// write data accepted token
pub const DATA_RES_ACCEPTED: u8 = 0x05;

/// What the card clocks out when it is idle and not busy
pub const BUS_IDLE: u8 = 0xFF;

/// Returns the CRC byte that goes at the end of a command frame.
pub fn command_crc(command: u8) -> u8 {
    match command {
        CMD0 => CMD0_CRC,
        CMD8 => CMD8_CRC,
        _ => DUMMY_CRC,
    }
}

//==============================================================================

/// Card Specific Data, version 1. Also used for MMC cards.
#[derive(Default)]
pub struct CsdV1 {
    /// The 16-bytes of data in this Card Specific Data block
    pub data: [u8; 16],
}

/// Card Specific Data, version 2 (high capacity SD cards)
#[derive(Default)]
pub struct CsdV2 {
    /// The 16-bytes of data in this Card Specific Data block
    pub data: [u8; 16],
}

/// Card Specific Data
pub enum Csd {
    /// A version 1 CSD
    V1(CsdV1),
    /// A version 2 CSD
    V2(CsdV2),
}

impl Csd {
    /// Pick the layout from the CSD_STRUCTURE bits of a raw register.
    ///
    /// Only `0b01` means version 2. Every other value, including the MMC
    /// structure versions, is read with the legacy layout.
    pub fn from_register(data: [u8; 16]) -> Csd {
        if data[0] >> 6 == 1 {
            Csd::V2(CsdV2 { data })
        } else {
            Csd::V1(CsdV1 { data })
        }
    }

    /// The card capacity in 512-byte sectors, or `None` if the register
    /// describes a size that can't be expressed that way.
    pub fn sector_count(&self) -> Option<u32> {
        match self {
            Csd::V1(csd) => csd.card_capacity_blocks(),
            Csd::V2(csd) => csd.card_capacity_blocks(),
        }
    }
}

impl CsdV1 {
    fn data(&self) -> &[u8; 16] {
        &self.data
    }

    define_field!(csd_ver, u8, 0, 6, 2);
    define_field!(read_block_length, u8, 5, 0, 4);
    define_field!(device_size, u32, [(6, 0, 2), (7, 0, 8), (8, 6, 2)]);
    define_field!(device_size_multiplier, u8, [(9, 0, 2), (10, 7, 1)]);

    /// Returns the card capacity in 512-byte blocks
    ///
    /// Capacity is `(C_SIZE + 1) << (C_SIZE_MULT + READ_BL_LEN + 2)` bytes.
    pub fn card_capacity_blocks(&self) -> Option<u32> {
        let exponent = self.device_size_multiplier() + self.read_block_length() + 2;
        let shift = exponent.checked_sub(9)?;
        (self.device_size() + 1).checked_shl(u32::from(shift))
    }
}

impl CsdV2 {
    fn data(&self) -> &[u8; 16] {
        &self.data
    }

    define_field!(csd_ver, u8, 0, 6, 2);
    define_field!(read_block_length, u8, 5, 0, 4);
    define_field!(device_size, u32, [(7, 0, 6), (8, 0, 8), (9, 0, 8)]);

    /// Returns the card capacity in 512-byte blocks
    pub fn card_capacity_blocks(&self) -> Option<u32> {
        // 22-bit C_SIZE in 512 KiB units, so this can't overflow
        Some((self.device_size() + 1) << 10)
    }
}
