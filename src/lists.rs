//! Fixed-purpose command sequences
//!
//! A [`CommandList`] is an ordered run of encoded command words for one
//! chip family, ready to be uploaded into one of the controller's command
//! RAM banks. Builders either produce exactly the contracted length or
//! return an error; lists are never truncated silently.

use std::f64::consts::PI;

use log::{debug, warn};
use thiserror::Error;

use crate::commands::{Command, CommandError};
use crate::registers::{ChipFamily, RegisterError, RhdRegisters, RhsRegisters, ZCHECK_DAC_MIDPOINT};
use crate::registers::rhs::{RHS_NEG_MAGNITUDE_BASE, RHS_POS_MAGNITUDE_BASE};
use crate::calibration::ChargeRecoveryCurrentLimit;

/// Shortest RHD register configuration sequence
pub const RHD_CONFIG_MIN_LENGTH: usize = 60;
/// Length of the RHD auxiliary sampling list
pub const RHD_AUX_SAMPLING_LENGTH: usize = 60;
/// Length of an RHS per-channel update slot
pub const RHS_UPDATE_SLOT_LENGTH: usize = 128;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandListError {
    #[error("Requested {requested} commands; at least {minimum} are required")]
    TooShort { requested: usize, minimum: usize },
    #[error("List of {length} commands exceeds the command RAM ({capacity} words)")]
    TooLong { length: usize, capacity: usize },
    #[error("Waveform frequency {frequency} Hz is too low; minimum is {minimum} Hz")]
    FrequencyTooLow { frequency: f64, minimum: f64 },
    #[error("Waveform frequency {frequency} Hz is too high; maximum is {maximum} Hz")]
    FrequencyTooHigh { frequency: f64, maximum: f64 },
    #[error("Waveform amplitude {0} is outside 0..=128")]
    InvalidAmplitude(f64),
    #[error("Invalid sample rate: {0} Hz")]
    InvalidSampleRate(f64),
    #[error("Command error: {0}")]
    Command(#[from] CommandError),
    #[error("Register error: {0}")]
    Register(#[from] RegisterError),
}


/// An ordered sequence of encoded command words for one chip family
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandList {
    family: ChipFamily,
    words: Vec<u32>,
}

impl CommandList {

    /// Create an empty list
    pub fn new(family: ChipFamily) -> Self {
        CommandList { family, words: Vec::new() }
    }

    fn with_capacity(family: ChipFamily, capacity: usize) -> Self {
        CommandList { family, words: Vec::with_capacity(capacity) }
    }

    pub fn family(&self) -> ChipFamily {
        self.family
    }

    /// Encode and append a command
    pub fn push(&mut self, cmd: Command) -> Result<(), CommandError> {
        self.words.push(cmd.encode(self.family)?);
        Ok(())
    }

    fn push_all<I: IntoIterator<Item=Command>>(&mut self, cmds: I) -> Result<(), CommandError> {
        for cmd in cmds {
            self.push(cmd)?;
        }
        Ok(())
    }

    fn push_reads<I: IntoIterator<Item=u16>>(&mut self, addresses: I) -> Result<(), CommandError> {
        self.push_all(addresses.into_iter().map(Command::read))
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Encoded words; RHD words occupy the lower 16 bits
    pub fn view(&self) -> &[u32] {
        &self.words
    }

    pub fn into_words(self) -> Vec<u32> {
        self.words
    }

    /// Pad with the family's dummy register read up to `length`
    /// commands. Fails if the list is already longer.
    pub fn pad_to(&mut self, length: usize) -> Result<(), CommandListError> {
        if self.len() > length {
            warn!("Cannot pad {} commands down to {}", self.len(), length);
            return Err(CommandListError::TooShort { requested: length, minimum: self.len() });
        }

        let dummy = self.family.dummy_command().encode(self.family)?;
        self.words.resize(length, dummy);

        Ok(())
    }

    /// Little-endian bytes of every word in the family's word width
    pub fn to_bytevec(&self) -> Vec<u8> {
        match self.family {
            ChipFamily::Rhd => {
                let mut vec = Vec::with_capacity(self.len() * 2);
                for word in &self.words {
                    vec.extend_from_slice(&(*word as u16).to_le_bytes());
                }
                vec
            },
            ChipFamily::Rhs => {
                let mut vec = Vec::with_capacity(self.len() * 4);
                for word in &self.words {
                    vec.extend_from_slice(&word.to_le_bytes());
                }
                vec
            }
        }
    }

    /// Decode every word back into a [`Command`]
    pub fn decode(&self) -> Result<Vec<Command>, CommandError> {
        self.words.iter().map(|w| Command::decode(*w, self.family)).collect()
    }

    fn check_capacity(self) -> Result<Self, CommandListError> {
        let capacity = self.family.max_command_list_length();
        if self.len() > capacity {
            warn!("List of {} commands exceeds command RAM ({})", self.len(), capacity);
            return Err(CommandListError::TooLong { length: self.len(), capacity });
        }
        cmddbg!("list", self.family, self.words);
        Ok(self)
    }

    /// `length` copies of a single command
    pub fn filled(family: ChipFamily, length: usize, cmd: Command) -> Result<Self, CommandListError> {
        let word = cmd.encode(family)?;
        CommandList { family, words: vec![word; length] }.check_capacity()
    }

    /// Full RHD register configuration.
    ///
    /// ## List layout
    ///
    /// ```text
    ///  +---------+-----------------+-----------+--------------+-----------+
    ///  | 2 dummy | writes 0-17     | ROM reads | reads 0-17   | calibrate |
    ///  +---------+-----------------+-----------+--------------+-----------+
    ///  | writes 18-21 | 1 dummy | padding                               |
    ///  +--------------+---------+---------------------------------------+
    /// ```
    ///
    /// Registers 3 and 6 are left to the auxiliary and impedance check
    /// lists. When `calibrate` is false the calibration slot holds a
    /// dummy read. At least [`RHD_CONFIG_MIN_LENGTH`] commands are
    /// required.
    pub fn rhd_register_config(regs: &RhdRegisters, calibrate: bool, length: usize)
        -> Result<Self, CommandListError> {

        if length < RHD_CONFIG_MIN_LENGTH {
            warn!("RHD configuration needs at least {} commands; got {}",
                RHD_CONFIG_MIN_LENGTH, length);
            return Err(CommandListError::TooShort {
                requested: length, minimum: RHD_CONFIG_MIN_LENGTH });
        }

        let mut list = CommandList::with_capacity(ChipFamily::Rhd, length);
        let dummy = ChipFamily::Rhd.dummy_register();

        list.push_reads(vec![dummy, dummy])?;

        for addr in [0u16, 1, 2, 4, 5, 7].iter().copied().chain(8..=17) {
            list.push(Command::write(addr, regs.get_register_value(addr)?))?;
        }

        list.push_rhd_rom_reads()?;
        list.push_reads(0..=17)?;

        list.push(if calibrate { Command::Calibrate } else { Command::read(dummy) })?;

        for addr in 18..=21 {
            list.push(Command::write(addr, regs.get_register_value(addr)?))?;
        }

        list.push(Command::read(dummy))?;
        list.pad_to(length)?;

        debug!("RHD register configuration: {} commands, calibrate = {}", length, calibrate);

        list.check_capacity()
    }

    // Chip ID, amplifier count, polarity, die revision, MISO marker,
    // chip name and company designation
    fn push_rhd_rom_reads(&mut self) -> Result<(), CommandError> {
        self.push_reads(vec![63, 62, 61, 60, 59])?;
        self.push_reads(48..=55)?;
        self.push_reads(40..=44)
    }

    /// RHD readback without any writes: dummies, ROM and the 22 RAM
    /// registers, padded to `length`.
    pub fn rhd_register_readback(length: usize) -> Result<Self, CommandListError> {
        let mut list = CommandList::new(ChipFamily::Rhd);
        let dummy = ChipFamily::Rhd.dummy_register();

        list.push_reads(vec![dummy, dummy])?;
        list.push_rhd_rom_reads()?;
        list.push_reads(0..=21)?;

        list.pad_to(length)?;
        list.check_capacity()
    }

    /// The 60-command RHD auxiliary sampling list. AUX inputs 1 to 3
    /// (channels 32, 33, 34) are sampled in every group of four, while
    /// the fourth slot cycles the temperature sensor switches through
    /// register 3 and takes two temperature readings (channel 49) and
    /// one supply voltage reading (channel 48).
    pub fn rhd_aux_sampling(regs: &RhdRegisters) -> Result<Self, CommandListError> {
        let en = regs.temp_sensor_enabled();
        let mut list = CommandList::with_capacity(ChipFamily::Rhd, RHD_AUX_SAMPLING_LENGTH);

        let fourth = [
            Command::write(3, regs.register3_with_temp(en, false)),
            Command::write(3, regs.register3_with_temp(en, en)),
            Command::convert(49),
            Command::write(3, regs.register3_with_temp(false, en)),
            Command::convert(49),
            Command::write(3, regs.register3_with_temp(false, false)),
            Command::convert(48),
        ];

        for cmd in fourth.iter().copied()
            .chain(std::iter::repeat(Command::read(ChipFamily::Rhd.dummy_register())).take(8)) {

            list.push_all(vec![Command::convert(32), Command::convert(33), Command::convert(34)])?;
            list.push(cmd)?;
        }

        list.check_capacity()
    }

    /// Full RHS register configuration. With `update_stim_params` the
    /// stim step, charge recovery and per-channel magnitude registers
    /// are written too. Requests shorter than the unpadded sequence
    /// fail.
    pub fn rhs_register_config(regs: &RhsRegisters, update_stim_params: bool, length: usize)
        -> Result<Self, CommandListError> {

        let mut list = CommandList::new(ChipFamily::Rhs);
        let dummy = ChipFamily::Rhs.dummy_register();

        list.push_reads(vec![dummy, dummy])?;

        // stimulation stays disarmed while the chip is configured
        list.push_all(vec![Command::write(32, 0), Command::write(33, 0)])?;

        for addr in (0u16..=8).chain([10u16, 12].iter().copied()) {
            list.push(Command::write(addr, regs.get_register_value(addr)?))?;
        }

        if update_stim_params {
            for addr in (34u16..=37).chain(RHS_NEG_MAGNITUDE_BASE..RHS_NEG_MAGNITUDE_BASE+16)
                .chain(RHS_POS_MAGNITUDE_BASE..RHS_POS_MAGNITUDE_BASE+16) {
                list.push(Command::write_update(addr, regs.get_register_value(addr)?))?;
            }
        }

        for addr in [38u16, 42, 44, 46, 48].iter().copied() {
            list.push(Command::write_update(addr, regs.get_register_value(addr)?))?;
        }

        list.push(Command::write(32, regs.get_register_value(32)?))?;
        list.push(Command::write(33, regs.get_register_value(33)?))?;

        list.push_reads(251..=255)?;
        list.push_reads((0u16..=8).chain([10u16, 12].iter().copied()).chain(32..=38))?;
        list.push(Command::ComplianceReset)?;
        list.push(Command::read(dummy))?;

        if length < list.len() {
            warn!("RHS configuration needs at least {} commands; got {}", list.len(), length);
            return Err(CommandListError::TooShort { requested: length, minimum: list.len() });
        }

        list.pad_to(length)?;

        debug!("RHS register configuration: {} commands, stim params = {}",
            length, update_stim_params);

        list.check_capacity()
    }

    /// RHS readback of every register and the ROM, padded to `length`
    pub fn rhs_register_readback(length: usize) -> Result<Self, CommandListError> {
        let mut list = CommandList::new(ChipFamily::Rhs);
        let dummy = ChipFamily::Rhs.dummy_register();

        list.push_reads(vec![dummy, dummy])?;
        list.push_reads(RhsRegisters::register_addresses())?;
        list.push_reads(251..=255)?;

        list.pad_to(length)?;
        list.check_capacity()
    }

    /// Update the positive and negative current of `channel` and emit
    /// the two writes that program it, padded to
    /// [`RHS_UPDATE_SLOT_LENGTH`]. The register set is left unchanged if
    /// any argument is out of range.
    pub fn set_stim_magnitudes(regs: &mut RhsRegisters, channel: u16, pos_magnitude: i32,
        pos_trim: i32, neg_magnitude: i32, neg_trim: i32) -> Result<Self, CommandListError> {

        regs.set_stim_magnitude(channel, pos_magnitude, pos_trim, neg_magnitude, neg_trim)?;

        let pos = RHS_POS_MAGNITUDE_BASE + channel;
        let neg = RHS_NEG_MAGNITUDE_BASE + channel;

        let mut list = CommandList::with_capacity(ChipFamily::Rhs, RHS_UPDATE_SLOT_LENGTH);
        list.push(Command::write_update(pos, regs.get_register_value(pos)?))?;
        list.push(Command::write_update(neg, regs.get_register_value(neg)?))?;
        list.pad_to(RHS_UPDATE_SLOT_LENGTH)?;

        list.check_capacity()
    }

    /// Program the charge recovery current limit and target voltage,
    /// padded to [`RHS_UPDATE_SLOT_LENGTH`].
    pub fn config_charge_recovery(regs: &mut RhsRegisters, limit: ChargeRecoveryCurrentLimit,
        target_voltage: f64) -> Result<Self, CommandListError> {

        regs.set_charge_recovery_target_voltage(target_voltage)?;
        regs.set_charge_recovery_current_limit(limit);

        let mut list = CommandList::with_capacity(ChipFamily::Rhs, RHS_UPDATE_SLOT_LENGTH);
        list.push(Command::write(36, regs.get_register_value(36)?))?;
        list.push(Command::write(37, regs.get_register_value(37)?))?;
        list.pad_to(RHS_UPDATE_SLOT_LENGTH)?;

        list.check_capacity()
    }

    /// Sine wave on the impedance check DAC, one write per sample for
    /// a single period of `round(sample_rate / frequency)` samples.
    /// A `frequency` of 0 fills the whole command RAM with the DAC
    /// midpoint. `amplitude` is in DAC steps (0 to 128).
    ///
    /// ```
    /// use librhx::lists::CommandList;
    /// use librhx::registers::ChipFamily;
    ///
    /// let list = CommandList::zcheck_dac(ChipFamily::Rhd, 30000.0, 1000.0, 128.0).unwrap();
    /// assert_eq!(list.len(), 30);
    /// ```
    pub fn zcheck_dac(family: ChipFamily, sample_rate: f64, frequency: f64, amplitude: f64)
        -> Result<Self, CommandListError> {

        if amplitude.is_nan() || amplitude < 0.0 || amplitude > 128.0 {
            warn!("Impedance check amplitude {} is outside 0..=128", amplitude);
            return Err(CommandListError::InvalidAmplitude(amplitude));
        }

        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            warn!("Impedance check sample rate {} Hz is invalid", sample_rate);
            return Err(CommandListError::InvalidSampleRate(sample_rate));
        }

        let capacity = family.max_command_list_length();
        let register = family.zcheck_dac_register();
        let minimum = sample_rate / capacity as f64;

        if frequency.is_nan() || frequency < 0.0 {
            warn!("Impedance check frequency {} Hz is invalid", frequency);
            return Err(CommandListError::FrequencyTooLow { frequency, minimum });
        }

        if frequency == 0.0 {
            return CommandList::filled(family, capacity,
                Command::write(register, ZCHECK_DAC_MIDPOINT));
        }

        let maximum = sample_rate / 4.0;
        if frequency > maximum {
            warn!("Impedance check frequency {} Hz exceeds {} Hz", frequency, maximum);
            return Err(CommandListError::FrequencyTooHigh { frequency, maximum });
        }

        let period = (sample_rate / frequency).round() as usize;
        if period > capacity {
            warn!("Impedance check frequency {} Hz is below {} Hz", frequency, minimum);
            return Err(CommandListError::FrequencyTooLow { frequency, minimum });
        }

        let mut list = CommandList::with_capacity(family, period);
        let omega = 2.0 * PI * frequency;

        for i in 0..period {
            let t = i as f64 / sample_rate;
            let value = dac_code!(amplitude * (omega * t).sin() + ZCHECK_DAC_MIDPOINT as f64);
            list.push(Command::write(register, value as u16))?;
        }

        debug!("Impedance check waveform: {} Hz, {} samples", frequency, period);

        list.check_capacity()
    }
}
