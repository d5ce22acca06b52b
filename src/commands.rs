//! Single command words understood by RHD/RHS chips
//!
//! Every command is encoded into one fixed-width word. RHD chips use
//! 16-bit words, RHS chips 32-bit words with four extra flag bits.
//!
//! ## RHD layout
//!
//! ```text
//!   15 14 13          8 7               0
//!  +-----+-------------+-----------------+
//!  | op  |   address   |       data      |
//!  +-----+-------------+-----------------+
//! ```
//!
//! ## RHS layout
//!
//! ```text
//!   31 30 29 28 27 26 25 24 23       16 15                        0
//!  +-----+--+--+--+--+-----+-----------+---------------------------+
//!  | op  |U |M |D |H |  0  |  address  |            data           |
//!  +-----+--+--+--+--+-----+-----------+---------------------------+
//! ```
//!
//! Opcodes are `00` for convert, `11` for register read and `10` for
//! register write. Calibration commands are full-word constants.

use bitflags::bitflags;
use log::warn;
use thiserror::Error;

use crate::registers::ChipFamily;

const RHD_CALIBRATE: u32 = 0x5500;
const RHD_CLEAR_CALIBRATION: u32 = 0x6A00;
const RHS_CALIBRATE: u32 = 0x5500_0000;
const RHS_CLEAR_CALIBRATION: u32 = 0x6A00_0000;
const RHS_COMPLIANCE_RESET: u32 = 0xD0FF_0000;

const OP_CONVERT: u32 = 0b00;
const OP_READ: u32 = 0b11;
const OP_WRITE: u32 = 0b10;

const RHD_MAX_ADDRESS: u16 = 63;
const RHD_MAX_DATA: u16 = 0xFF;
const RHS_MAX_ADDRESS: u16 = 255;
const RHS_MAX_CONVERT_CHANNEL: u16 = 15;

bitflags! {
    /// Modifier bits of RHS commands. `D` and `H` are only meaningful
    /// on convert commands; RHD commands carry no flags.
    pub struct CommandFlags: u32 {
        /// Update triggered registers
        const U = 1 << 29;
        /// Clear the compliance monitor
        const M = 1 << 28;
        /// Convert the DC amplifier as well
        const D = 1 << 27;
        /// Hold fast settle on the converted channel
        const H = 1 << 26;
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("Channel {channel} exceeds maximum of {max} for {family:?}")]
    ChannelOutOfRange { channel: u16, max: u16, family: ChipFamily },
    #[error("Register address {address} exceeds maximum of {max} for {family:?}")]
    AddressOutOfRange { address: u16, max: u16, family: ChipFamily },
    #[error("Data 0x{data:x} does not fit in the {family:?} data field")]
    DataOutOfRange { data: u16, family: ChipFamily },
    #[error("Flags {flags:?} are not valid on this {family:?} command")]
    InvalidFlags { flags: CommandFlags, family: ChipFamily },
    #[error("{command} is not available on {family:?} chips")]
    Unsupported { command: &'static str, family: ChipFamily },
    #[error("0x{word:08x} is not a valid {family:?} command word")]
    UnknownWord { word: u32, family: ChipFamily },
}

/// A single chip command
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Sample an amplifier or auxiliary channel
    Convert { channel: u16, flags: CommandFlags },
    /// Read a register; the value appears two commands later
    RegisterRead { address: u16, flags: CommandFlags },
    /// Write `data` into a register
    RegisterWrite { address: u16, data: u16, flags: CommandFlags },
    /// Start ADC self-calibration (takes nine command cycles)
    Calibrate,
    /// Clear ADC calibration
    ClearCalibration,
    /// Reset the compliance monitor (RHS only)
    ComplianceReset,
}

impl Command {

    pub fn convert(channel: u16) -> Command {
        Command::Convert { channel, flags: CommandFlags::empty() }
    }

    pub fn read(address: u16) -> Command {
        Command::RegisterRead { address, flags: CommandFlags::empty() }
    }

    pub fn write(address: u16, data: u16) -> Command {
        Command::RegisterWrite { address, data, flags: CommandFlags::empty() }
    }

    /// Register write with the `U` flag set so triggered registers
    /// take the new value immediately.
    pub fn write_update(address: u16, data: u16) -> Command {
        Command::RegisterWrite { address, data, flags: CommandFlags::U }
    }

    fn flags(&self) -> CommandFlags {
        match self {
            Command::Convert { flags, .. } => *flags,
            Command::RegisterRead { flags, .. } => *flags,
            Command::RegisterWrite { flags, .. } => *flags,
            _ => CommandFlags::empty()
        }
    }

    /// Encode for the given chip family. RHD words occupy the lower 16
    /// bits of the result.
    pub fn encode(&self, family: ChipFamily) -> Result<u32, CommandError> {
        match family {
            ChipFamily::Rhd => self.encode_rhd().map(|w| w as u32),
            ChipFamily::Rhs => self.encode_rhs(),
        }
    }

    /// Encode into a 16-bit RHD word.
    ///
    /// ```
    /// use librhx::commands::Command;
    ///
    /// assert_eq!(Command::write(5, 0x12).encode_rhd().unwrap(), 0x8512);
    /// assert_eq!(Command::Calibrate.encode_rhd().unwrap(), 0x5500);
    /// ```
    pub fn encode_rhd(&self) -> Result<u16, CommandError> {
        let family = ChipFamily::Rhd;

        let flags = self.flags();
        if !flags.is_empty() {
            return Err(fail(CommandError::InvalidFlags { flags, family }));
        }

        let word = match *self {
            Command::Convert { channel, .. } => {
                check_address(channel, RHD_MAX_ADDRESS, family, true)?;
                (OP_CONVERT << 14) | ((channel as u32) << 8)
            },
            Command::RegisterRead { address, .. } => {
                check_address(address, RHD_MAX_ADDRESS, family, false)?;
                (OP_READ << 14) | ((address as u32) << 8)
            },
            Command::RegisterWrite { address, data, .. } => {
                check_address(address, RHD_MAX_ADDRESS, family, false)?;
                if data > RHD_MAX_DATA {
                    return Err(fail(CommandError::DataOutOfRange { data, family }));
                }
                (OP_WRITE << 14) | ((address as u32) << 8) | (data as u32)
            },
            Command::Calibrate => RHD_CALIBRATE,
            Command::ClearCalibration => RHD_CLEAR_CALIBRATION,
            Command::ComplianceReset => {
                return Err(fail(CommandError::Unsupported {
                    command: "Compliance reset", family }));
            }
        };

        Ok(word as u16)
    }

    /// Encode into a 32-bit RHS word.
    ///
    /// ```
    /// use librhx::commands::Command;
    ///
    /// assert_eq!(Command::write(5, 0x12).encode_rhs().unwrap(), 0x80050012);
    /// assert_eq!(Command::ComplianceReset.encode_rhs().unwrap(), 0xD0FF0000);
    /// ```
    pub fn encode_rhs(&self) -> Result<u32, CommandError> {
        let family = ChipFamily::Rhs;

        let flags = self.flags();
        let convert_only = CommandFlags::D | CommandFlags::H;
        if !matches!(self, Command::Convert { .. }) && flags.intersects(convert_only) {
            return Err(fail(CommandError::InvalidFlags { flags, family }));
        }

        let word = match *self {
            Command::Convert { channel, .. } => {
                check_address(channel, RHS_MAX_CONVERT_CHANNEL, family, true)?;
                (OP_CONVERT << 30) | flags.bits() | ((channel as u32) << 16)
            },
            Command::RegisterRead { address, .. } => {
                check_address(address, RHS_MAX_ADDRESS, family, false)?;
                (OP_READ << 30) | flags.bits() | ((address as u32) << 16)
            },
            Command::RegisterWrite { address, data, .. } => {
                check_address(address, RHS_MAX_ADDRESS, family, false)?;
                (OP_WRITE << 30) | flags.bits() | ((address as u32) << 16) | (data as u32)
            },
            Command::Calibrate => RHS_CALIBRATE,
            Command::ClearCalibration => RHS_CLEAR_CALIBRATION,
            Command::ComplianceReset => RHS_COMPLIANCE_RESET,
        };

        Ok(word)
    }

    /// Decode a command word produced by [`Command::encode`]. Reading
    /// register 255 with `M` set decodes as
    /// [`ComplianceReset`][`Command::ComplianceReset`].
    pub fn decode(word: u32, family: ChipFamily) -> Result<Command, CommandError> {
        match family {
            ChipFamily::Rhd => Self::decode_rhd(word),
            ChipFamily::Rhs => Self::decode_rhs(word),
        }
    }

    fn decode_rhd(word: u32) -> Result<Command, CommandError> {
        let family = ChipFamily::Rhd;

        if word > 0xFFFF {
            return Err(CommandError::UnknownWord { word, family });
        }

        match word {
            RHD_CALIBRATE => return Ok(Command::Calibrate),
            RHD_CLEAR_CALIBRATION => return Ok(Command::ClearCalibration),
            _ => {}
        }

        let address = ((word >> 8) & 0x3F) as u16;
        let data = (word & 0xFF) as u16;

        match word >> 14 {
            OP_CONVERT => Ok(Command::convert(address)),
            OP_READ => Ok(Command::read(address)),
            OP_WRITE => Ok(Command::write(address, data)),
            _ => Err(CommandError::UnknownWord { word, family })
        }
    }

    fn decode_rhs(word: u32) -> Result<Command, CommandError> {
        let family = ChipFamily::Rhs;

        match word {
            RHS_CALIBRATE => return Ok(Command::Calibrate),
            RHS_CLEAR_CALIBRATION => return Ok(Command::ClearCalibration),
            RHS_COMPLIANCE_RESET => return Ok(Command::ComplianceReset),
            _ => {}
        }

        // bits 25 and 24 are unused
        if word & (0b11 << 24) != 0 {
            return Err(CommandError::UnknownWord { word, family });
        }

        let flags = CommandFlags::from_bits_truncate(word);
        let address = ((word >> 16) & 0xFF) as u16;
        let data = (word & 0xFFFF) as u16;

        match word >> 30 {
            OP_CONVERT => Ok(Command::Convert { channel: address, flags }),
            OP_READ => Ok(Command::RegisterRead { address, flags }),
            OP_WRITE => Ok(Command::RegisterWrite { address, data, flags }),
            _ => Err(CommandError::UnknownWord { word, family })
        }
    }
}

fn check_address(value: u16, max: u16, family: ChipFamily, channel: bool) -> Result<(), CommandError> {
    if value <= max {
        return Ok(());
    }

    Err(fail(if channel {
        CommandError::ChannelOutOfRange { channel: value, max, family }
    } else {
        CommandError::AddressOutOfRange { address: value, max, family }
    }))
}

fn fail(err: CommandError) -> CommandError {
    warn!("{}", err);
    err
}


#[cfg(test)]
mod tests {

    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn rhd_words() {
        assert_eq!(Command::write(5, 0x12).encode_rhd().unwrap(), 0x8512);
        assert_eq!(Command::read(63).encode_rhd().unwrap(), 0xFF00);
        assert_eq!(Command::read(40).encode_rhd().unwrap(), 0xE800);
        assert_eq!(Command::convert(0).encode_rhd().unwrap(), 0x0000);
        assert_eq!(Command::convert(32).encode_rhd().unwrap(), 0x2000);
        assert_eq!(Command::Calibrate.encode_rhd().unwrap(), 0x5500);
        assert_eq!(Command::ClearCalibration.encode_rhd().unwrap(), 0x6A00);
    }

    #[test]
    fn rhs_words() {
        assert_eq!(Command::write(5, 0x12).encode_rhs().unwrap(), 0x80050012);
        assert_eq!(Command::read(255).encode_rhs().unwrap(), 0xC0FF0000);
        assert_eq!(Command::convert(15).encode_rhs().unwrap(), 0x000F0000);
        assert_eq!(Command::write_update(96, 0x80C8).encode_rhs().unwrap(), 0xA06080C8);
        assert_eq!(Command::Calibrate.encode_rhs().unwrap(), 0x55000000);
        assert_eq!(Command::ClearCalibration.encode_rhs().unwrap(), 0x6A000000);
        assert_eq!(Command::ComplianceReset.encode_rhs().unwrap(), 0xD0FF0000);

        let cmd = Command::RegisterRead { address: 255, flags: CommandFlags::M };
        assert_eq!(cmd.encode_rhs().unwrap(), 0xD0FF0000);

        let cmd = Command::Convert { channel: 3, flags: CommandFlags::D | CommandFlags::H };
        assert_eq!(cmd.encode_rhs().unwrap(), 0x0C030000);
    }

    #[test]
    fn family_dispatch() {
        let cmd = Command::write(5, 0x12);
        assert_eq!(cmd.encode(ChipFamily::Rhd).unwrap(), 0x8512);
        assert_eq!(cmd.encode(ChipFamily::Rhs).unwrap(), 0x80050012);
    }

    #[test]
    fn out_of_range() {
        assert_matches!(Command::write(64, 0).encode_rhd(),
            Err(CommandError::AddressOutOfRange { address: 64, max: 63, .. }));
        assert_matches!(Command::write(1, 0x100).encode_rhd(),
            Err(CommandError::DataOutOfRange { data: 0x100, .. }));
        assert_matches!(Command::convert(64).encode_rhd(),
            Err(CommandError::ChannelOutOfRange { channel: 64, .. }));
        assert_matches!(Command::convert(16).encode_rhs(),
            Err(CommandError::ChannelOutOfRange { channel: 16, max: 15, .. }));
        assert_matches!(Command::read(256).encode_rhs(),
            Err(CommandError::AddressOutOfRange { address: 256, .. }));
    }

    #[test]
    fn invalid_flags() {
        assert_matches!(Command::write_update(1, 0).encode_rhd(),
            Err(CommandError::InvalidFlags { .. }));

        let cmd = Command::RegisterWrite { address: 1, data: 0, flags: CommandFlags::H };
        assert_matches!(cmd.encode_rhs(), Err(CommandError::InvalidFlags { .. }));

        assert_matches!(Command::ComplianceReset.encode_rhd(),
            Err(CommandError::Unsupported { .. }));
    }

    #[test]
    fn decoding() {
        assert_eq!(Command::decode(0x8512, ChipFamily::Rhd).unwrap(), Command::write(5, 0x12));
        assert_eq!(Command::decode(0x5500, ChipFamily::Rhd).unwrap(), Command::Calibrate);
        assert_eq!(Command::decode(0xFF00, ChipFamily::Rhd).unwrap(), Command::read(63));
        assert_matches!(Command::decode(0x4000, ChipFamily::Rhd),
            Err(CommandError::UnknownWord { .. }));
        assert_matches!(Command::decode(0x10000, ChipFamily::Rhd),
            Err(CommandError::UnknownWord { .. }));

        assert_eq!(Command::decode(0xD0FF0000, ChipFamily::Rhs).unwrap(),
            Command::ComplianceReset);
        assert_eq!(Command::decode(0xA06080C8, ChipFamily::Rhs).unwrap(),
            Command::write_update(96, 0x80C8));
        assert_matches!(Command::decode(0x01000000, ChipFamily::Rhs),
            Err(CommandError::UnknownWord { .. }));
    }
}
