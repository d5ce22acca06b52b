//! In-memory model of RHD/RHS chip configuration registers
//!
//! A [`RegisterSet`] holds the named fields of one chip family. Setters
//! validate their arguments completely before touching any field, so a
//! failed call leaves the set unchanged. The per-address bit layout the
//! chip expects is produced by [`RegisterSet::get_register_value`].

use bitvec::prelude::{BitArray, Lsb0};
use log::warn;
use thiserror::Error;

use crate::calibration::{CalibrationError, StimStepSize, ChargeRecoveryCurrentLimit};
use crate::commands::Command;

pub mod rhd;
pub mod rhs;

pub use rhd::RhdRegisters;
pub use rhs::{RhsRegisters, ChannelSwitch};

/// Midpoint of the impedance check DAC
pub const ZCHECK_DAC_MIDPOINT: u16 = 128;

/// Per-channel bit mask for 64-channel RHD chips; byte `n` holds channels
/// `8n..8n+8` with channel `8n` in the LSB.
pub type ChannelMask64 = BitArray<[u8; 8], Lsb0>;

/// Per-channel bit mask for 16-channel RHS chips
pub type ChannelMask16 = BitArray<[u16; 1], Lsb0>;


/// The two chip families understood by the command protocol
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChipFamily {
    /// Recording-only chips; 16-bit commands
    Rhd,
    /// Stimulation/recording chips; 32-bit commands
    Rhs,
}

impl ChipFamily {

    /// Width of a command word in bits
    pub fn word_bits(self) -> u32 {
        match self {
            ChipFamily::Rhd => 16,
            ChipFamily::Rhs => 32,
        }
    }

    /// Capacity of one command RAM bank in words
    pub fn max_command_list_length(self) -> usize {
        match self {
            ChipFamily::Rhd => 1024,
            ChipFamily::Rhs => 8192,
        }
    }

    /// Number of amplifier channels a single chip exposes on one
    /// stream
    pub fn channels_per_stream(self) -> usize {
        match self {
            ChipFamily::Rhd => 32,
            ChipFamily::Rhs => 16,
        }
    }

    /// Highest readable register address; reading it is harmless so
    /// it doubles as the no-op command
    pub fn dummy_register(self) -> u16 {
        match self {
            ChipFamily::Rhd => 63,
            ChipFamily::Rhs => 255,
        }
    }

    /// A register read with no side effects, used for padding
    pub fn dummy_command(self) -> Command {
        Command::read(self.dummy_register())
    }

    /// Address of the impedance check DAC register
    pub fn zcheck_dac_register(self) -> u16 {
        match self {
            ChipFamily::Rhd => 6,
            ChipFamily::Rhs => 3,
        }
    }
}


/// Errors raised by register setters and accessors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegisterError {
    /// Argument outside the legal range of a register field
    #[error("{field} = {value} is outside {min}..={max}")]
    FieldOutOfRange { field: &'static str, value: i64, min: i64, max: i64 },
    /// No such register for this family
    #[error("Register {0} does not exist")]
    UnknownRegister(u16),
    /// Operation only exists on the other chip family
    #[error("{operation} is not supported by {family:?} chips")]
    WrongFamily { operation: &'static str, family: ChipFamily },
    /// Sample rate is not a positive number
    #[error("Invalid sample rate: {0} Hz")]
    InvalidSampleRate(f64),
    /// Analog target could not be converted
    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),
}

pub(crate) fn check_range(field: &'static str, value: i64, min: i64, max: i64)
    -> Result<(), RegisterError> {

    if value < min || value > max {
        warn!("{} = {} is outside {}..={}", field, value, min, max);
        return Err(RegisterError::FieldOutOfRange { field, value, min, max });
    }

    Ok(())
}

pub(crate) fn check_sample_rate(rate: f64) -> Result<(), RegisterError> {
    if !rate.is_finite() || rate <= 0.0 {
        warn!("Invalid sample rate: {}", rate);
        return Err(RegisterError::InvalidSampleRate(rate));
    }
    Ok(())
}


/// Impedance check capacitor selection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ZcheckScale {
    Cs100fF = 0b00,
    Cs1pF = 0b01,
    Cs10pF = 0b11,
}

/// Which amplifier inputs are connected during impedance checks
/// (RHD2216 only)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZcheckPolarity {
    PositiveInput,
    NegativeInput,
}

/// State of an auxiliary digital output pin
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DigOut {
    Low,
    High,
    HiZ,
}

impl DigOut {
    // (value, hiz) bits
    pub(crate) fn bits(self) -> (u16, u16) {
        match self {
            DigOut::Low => (0, 0),
            DigOut::High => (1, 0),
            DigOut::HiZ => (0, 1),
        }
    }
}

/// Lower bandwidth register bank. RHD chips only have `Primary`; RHS
/// chips switch channels to `Settle` while recovering from stimulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BandwidthBank {
    Primary = 0,
    Settle = 1,
}


/// Register state of one chip, tagged by family
#[derive(Clone, Debug)]
pub enum RegisterSet {
    Rhd(RhdRegisters),
    Rhs(RhsRegisters),
}

impl RegisterSet {

    /// Create a register set with power-on defaults. `stim_step` is only
    /// used by RHS chips.
    ///
    /// ```
    /// use librhx::registers::{RegisterSet, ChipFamily};
    /// use librhx::calibration::StimStepSize;
    ///
    /// let regs = RegisterSet::new(ChipFamily::Rhd, 30000.0, StimStepSize::Step1uA).unwrap();
    /// assert_eq!(regs.get_register_value(0).unwrap(), 0xDE);
    /// assert_eq!(regs.get_register_value(1).unwrap(), 0x42);
    /// ```
    pub fn new(family: ChipFamily, sample_rate: f64, stim_step: StimStepSize)
        -> Result<RegisterSet, RegisterError> {

        match family {
            ChipFamily::Rhd => Ok(RegisterSet::Rhd(RhdRegisters::new(sample_rate)?)),
            ChipFamily::Rhs => Ok(RegisterSet::Rhs(RhsRegisters::new(sample_rate, stim_step)?)),
        }
    }

    pub fn family(&self) -> ChipFamily {
        match self {
            RegisterSet::Rhd(_) => ChipFamily::Rhd,
            RegisterSet::Rhs(_) => ChipFamily::Rhs,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        match self {
            RegisterSet::Rhd(r) => r.sample_rate(),
            RegisterSet::Rhs(r) => r.sample_rate(),
        }
    }

    /// Change the sample rate; sample-rate dependent fields (bias
    /// currents, DSP cutoff code) are re-derived.
    pub fn set_sample_rate(&mut self, rate: f64) -> Result<(), RegisterError> {
        match self {
            RegisterSet::Rhd(r) => r.set_sample_rate(rate),
            RegisterSet::Rhs(r) => r.set_sample_rate(rate),
        }
    }

    /// Set the amplifier upper bandwidth. Returns the achieved bandwidth.
    pub fn set_upper_bandwidth(&mut self, freq: f64) -> Result<f64, RegisterError> {
        match self {
            RegisterSet::Rhd(r) => r.set_upper_bandwidth(freq),
            RegisterSet::Rhs(r) => r.set_upper_bandwidth(freq),
        }
    }

    /// Set the amplifier lower bandwidth of a register bank. Returns the
    /// achieved bandwidth.
    pub fn set_lower_bandwidth(&mut self, freq: f64, bank: BandwidthBank)
        -> Result<f64, RegisterError> {

        match self {
            RegisterSet::Rhd(r) => {
                if bank != BandwidthBank::Primary {
                    return Err(wrong_family("Settle lower bandwidth", ChipFamily::Rhd));
                }
                r.set_lower_bandwidth(freq)
            },
            RegisterSet::Rhs(r) => r.set_lower_bandwidth(freq, bank),
        }
    }

    /// Set the DSP offset removal cutoff. Returns the achieved cutoff.
    pub fn set_dsp_cutoff_freq(&mut self, freq: f64) -> Result<f64, RegisterError> {
        match self {
            RegisterSet::Rhd(r) => r.set_dsp_cutoff_freq(freq),
            RegisterSet::Rhs(r) => r.set_dsp_cutoff_freq(freq),
        }
    }

    /// Currently programmed DSP cutoff in Hz
    pub fn dsp_cutoff_freq(&self) -> f64 {
        match self {
            RegisterSet::Rhd(r) => r.dsp_cutoff_freq(),
            RegisterSet::Rhs(r) => r.dsp_cutoff_freq(),
        }
    }

    pub fn enable_dsp(&mut self, enable: bool) {
        match self {
            RegisterSet::Rhd(r) => r.enable_dsp(enable),
            RegisterSet::Rhs(r) => r.enable_dsp(enable),
        }
    }

    pub fn enable_zcheck(&mut self, enable: bool) {
        match self {
            RegisterSet::Rhd(r) => r.enable_zcheck(enable),
            RegisterSet::Rhs(r) => r.enable_zcheck(enable),
        }
    }

    pub fn set_zcheck_scale(&mut self, scale: ZcheckScale) {
        match self {
            RegisterSet::Rhd(r) => r.set_zcheck_scale(scale),
            RegisterSet::Rhs(r) => r.set_zcheck_scale(scale),
        }
    }

    /// Select the amplifier connected to the impedance check DAC
    pub fn set_zcheck_channel(&mut self, channel: u16) -> Result<(), RegisterError> {
        match self {
            RegisterSet::Rhd(r) => r.set_zcheck_channel(channel),
            RegisterSet::Rhs(r) => r.set_zcheck_channel(channel),
        }
    }

    /// Set the stimulation step size (RHS only)
    pub fn set_stim_step_size(&mut self, step: StimStepSize) -> Result<(), RegisterError> {
        self.rhs_mut("Stim step size")?.set_stim_step_size(step);
        Ok(())
    }

    /// Set the charge recovery current limit (RHS only)
    pub fn set_charge_recovery_current_limit(&mut self, limit: ChargeRecoveryCurrentLimit)
        -> Result<(), RegisterError> {

        self.rhs_mut("Charge recovery current limit")?.set_charge_recovery_current_limit(limit);
        Ok(())
    }

    /// Set the charge recovery target voltage (RHS only). Returns the
    /// achieved voltage.
    pub fn set_charge_recovery_target_voltage(&mut self, volts: f64)
        -> Result<f64, RegisterError> {

        self.rhs_mut("Charge recovery target voltage")?.set_charge_recovery_target_voltage(volts)
    }

    /// Pack the current field values into the bit layout of register
    /// `addr`.
    pub fn get_register_value(&self, addr: u16) -> Result<u16, RegisterError> {
        match self {
            RegisterSet::Rhd(r) => r.get_register_value(addr),
            RegisterSet::Rhs(r) => r.get_register_value(addr),
        }
    }

    pub fn as_rhd(&self) -> Option<&RhdRegisters> {
        match self {
            RegisterSet::Rhd(r) => Some(r),
            _ => None
        }
    }

    pub fn as_rhs(&self) -> Option<&RhsRegisters> {
        match self {
            RegisterSet::Rhs(r) => Some(r),
            _ => None
        }
    }

    /// Mutable access to the RHD registers, or a `WrongFamily` error
    /// naming `operation`.
    pub fn rhd_mut(&mut self, operation: &'static str) -> Result<&mut RhdRegisters, RegisterError> {
        match self {
            RegisterSet::Rhd(r) => Ok(r),
            RegisterSet::Rhs(_) => Err(wrong_family(operation, ChipFamily::Rhs))
        }
    }

    /// Mutable access to the RHS registers, or a `WrongFamily` error
    /// naming `operation`.
    pub fn rhs_mut(&mut self, operation: &'static str) -> Result<&mut RhsRegisters, RegisterError> {
        match self {
            RegisterSet::Rhs(r) => Ok(r),
            RegisterSet::Rhd(_) => Err(wrong_family(operation, ChipFamily::Rhd))
        }
    }
}

fn wrong_family(operation: &'static str, family: ChipFamily) -> RegisterError {
    warn!("{} is not supported by {:?} chips", operation, family);
    RegisterError::WrongFamily { operation, family }
}


#[cfg(test)]
mod tests {

    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn family_properties() {
        assert_eq!(ChipFamily::Rhd.word_bits(), 16);
        assert_eq!(ChipFamily::Rhs.word_bits(), 32);
        assert_eq!(ChipFamily::Rhd.max_command_list_length(), 1024);
        assert_eq!(ChipFamily::Rhs.max_command_list_length(), 8192);
        assert_eq!(ChipFamily::Rhd.zcheck_dac_register(), 6);
        assert_eq!(ChipFamily::Rhs.zcheck_dac_register(), 3);
    }

    #[test]
    fn family_specific_setters() {
        let mut rhd = RegisterSet::new(ChipFamily::Rhd, 30000.0, StimStepSize::Step1uA).unwrap();
        assert_matches!(rhd.set_stim_step_size(StimStepSize::Step2uA),
            Err(RegisterError::WrongFamily { family: ChipFamily::Rhd, .. }));
        assert_matches!(rhd.set_lower_bandwidth(1000.0, BandwidthBank::Settle),
            Err(RegisterError::WrongFamily { .. }));

        let mut rhs = RegisterSet::new(ChipFamily::Rhs, 30000.0, StimStepSize::Step1uA).unwrap();
        assert_matches!(rhs.set_stim_step_size(StimStepSize::Step2uA), Ok(()));
        assert_matches!(rhs.rhd_mut("test"), Err(RegisterError::WrongFamily { .. }));
    }

    #[test]
    fn invalid_sample_rate() {
        assert_matches!(RegisterSet::new(ChipFamily::Rhd, 0.0, StimStepSize::Step1uA),
            Err(RegisterError::InvalidSampleRate(_)));
        assert_matches!(RegisterSet::new(ChipFamily::Rhs, f64::NAN, StimStepSize::Step1uA),
            Err(RegisterError::InvalidSampleRate(_)));
    }

    #[test]
    fn failed_setter_leaves_state() {
        let mut regs = RegisterSet::new(ChipFamily::Rhd, 30000.0, StimStepSize::Step1uA).unwrap();
        let before: Vec<u16> = (0..22).map(|a| regs.get_register_value(a).unwrap()).collect();

        assert!(regs.set_upper_bandwidth(-5.0).is_err());
        assert!(regs.set_lower_bandwidth(0.001, BandwidthBank::Primary).is_err());
        assert!(regs.set_zcheck_channel(64).is_err());

        let after: Vec<u16> = (0..22).map(|a| regs.get_register_value(a).unwrap()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn default_bandwidths_reproduce_power_on_state() {
        let fresh = RegisterSet::new(ChipFamily::Rhd, 30000.0, StimStepSize::Step1uA).unwrap();
        let mut regs = fresh.clone();

        regs.set_upper_bandwidth(7500.0).unwrap();
        regs.set_lower_bandwidth(1.0, BandwidthBank::Primary).unwrap();

        assert_eq!(regs.get_register_value(0).unwrap(), 0xDE);
        assert_eq!(regs.get_register_value(1).unwrap(), 0x42);
        for addr in 0..22 {
            assert_eq!(regs.get_register_value(addr).unwrap(),
                fresh.get_register_value(addr).unwrap(), "register {}", addr);
        }
    }
}
