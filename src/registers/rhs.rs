use bitvec::prelude::BitArray;
use log::debug;

use crate::calibration::{upper_bandwidth_setting, lower_bandwidth_setting, dsp_cutoff_code,
    dsp_cutoff_table, charge_recovery_dac, StimStepSize, ChargeRecoveryCurrentLimit};
use super::{RegisterError, ChannelMask16, ZcheckScale, DigOut, BandwidthBank, ZCHECK_DAC_MIDPOINT,
    check_range, check_sample_rate};

/// Number of amplifier/stimulator channels on an RHS chip
pub const RHS_CHANNELS: u16 = 16;

/// First negative current magnitude register
pub const RHS_NEG_MAGNITUDE_BASE: u16 = 64;
/// First positive current magnitude register
pub const RHS_POS_MAGNITUDE_BASE: u16 = 96;

/// Register 32 value that arms stimulation
pub const STIM_ENABLE_A: u16 = 0xAAAA;
/// Register 33 value that arms stimulation
pub const STIM_ENABLE_B: u16 = 0x00FF;

const MASK_AND_STIM_REGISTERS: [u16; 13] = [10, 12, 32, 33, 34, 35, 36, 37, 38, 42, 44, 46, 48];

const DEFAULT_UPPER_BANDWIDTH: f64 = 7500.0;
const DEFAULT_LOWER_BANDWIDTH: f64 = 1.0;
const DEFAULT_SETTLE_BANDWIDTH: f64 = 1000.0;
const DEFAULT_DSP_CUTOFF: f64 = 1.0;


/// Per-channel switches held in the 16-bit mask registers of RHS chips
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelSwitch {
    /// AC amplifier power (register 8)
    AmpPower,
    /// Amplifier fast settle (register 10)
    AmpFastSettle,
    /// Use the `Settle` lower bandwidth bank (register 12)
    LowerBandwidthSettle,
    /// DC amplifier power (register 38)
    DcAmpPower,
    /// Stimulator on (register 42)
    StimOn,
    /// Positive stimulation polarity (register 44)
    StimPolarity,
    /// Charge recovery switch (register 46)
    ChargeRecovery,
    /// Current-limited charge recovery (register 48)
    CurrentLimitedChargeRecovery,
}


#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
struct RlCodes {
    dac1: u8,
    dac2: u8,
    dac3: u8,
}

impl RlCodes {
    fn packed(&self) -> u16 {
        ((self.dac3 as u16) << 13) | ((self.dac2 as u16) << 7) | (self.dac1 as u16)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct StimMagnitude {
    magnitude: u8,
    trim: i8,
}

impl StimMagnitude {
    const ZERO: StimMagnitude = StimMagnitude { magnitude: 0, trim: 0 };

    fn packed(&self) -> u16 {
        (((self.trim as i16 + 128) as u16) << 8) | (self.magnitude as u16)
    }
}


/// Register state of an RHS stimulation/recording chip
#[derive(Clone, Debug)]
pub struct RhsRegisters {
    sample_rate: f64,
    dsp_cutoff_request: f64,

    adc_buffer_bias: u8,
    mux_bias: u8,

    dig_out_open_drain: bool,
    dig_out: [DigOut; 2],
    weak_miso: bool,
    twos_comp: bool,
    abs_mode: bool,
    dsp_en: bool,
    dsp_cutoff_freq: u8,

    zcheck_select: u8,
    zcheck_dac_power: bool,
    zcheck_load: bool,
    zcheck_scale: ZcheckScale,
    zcheck_en: bool,

    rh1_dac1: u8,
    rh1_dac2: u8,
    rh2_dac1: u8,
    rh2_dac2: u8,
    rl: [RlCodes; 2],

    amp_power: ChannelMask16,
    amp_fast_settle: ChannelMask16,
    amp_fl_select: ChannelMask16,
    dc_amp_power: ChannelMask16,
    stim_on: ChannelMask16,
    stim_pol: ChannelMask16,
    charge_recovery_switch: ChannelMask16,
    cl_charge_recovery_en: ChannelMask16,

    stim_enabled: bool,
    stim_step: StimStepSize,
    charge_recovery_dac: u8,
    current_limit: ChargeRecoveryCurrentLimit,

    neg_current: [StimMagnitude; RHS_CHANNELS as usize],
    pos_current: [StimMagnitude; RHS_CHANNELS as usize],
}

impl RhsRegisters {

    /// Create a new register set with power-on defaults. Stimulation is
    /// disarmed, all magnitudes are zero and the charge recovery target
    /// sits at 0 V.
    pub fn new(sample_rate: f64, stim_step: StimStepSize) -> Result<RhsRegisters, RegisterError> {

        check_sample_rate(sample_rate)?;
        let upper = upper_bandwidth_setting(DEFAULT_UPPER_BANDWIDTH)?;
        let lower = lower_bandwidth_setting(DEFAULT_LOWER_BANDWIDTH)?;
        let settle = lower_bandwidth_setting(DEFAULT_SETTLE_BANDWIDTH)?;
        let (dsp_code, _) = dsp_cutoff_code(DEFAULT_DSP_CUTOFF, sample_rate)?;

        let all = BitArray::new([0xFFFFu16]);

        Ok(RhsRegisters {
            sample_rate,
            dsp_cutoff_request: DEFAULT_DSP_CUTOFF,

            adc_buffer_bias: 32,
            mux_bias: 40,

            dig_out_open_drain: false,
            dig_out: [DigOut::HiZ; 2],
            weak_miso: true,
            twos_comp: false,
            abs_mode: false,
            dsp_en: true,
            dsp_cutoff_freq: dsp_code,

            zcheck_select: 0,
            zcheck_dac_power: true,
            zcheck_load: false,
            zcheck_scale: ZcheckScale::Cs100fF,
            zcheck_en: false,

            rh1_dac1: upper.rh1_dac1,
            rh1_dac2: upper.rh1_dac2,
            rh2_dac1: upper.rh2_dac1,
            rh2_dac2: upper.rh2_dac2,
            rl: [
                RlCodes { dac1: lower.rl_dac1, dac2: lower.rl_dac2, dac3: lower.rl_dac3 },
                RlCodes { dac1: settle.rl_dac1, dac2: settle.rl_dac2, dac3: settle.rl_dac3 },
            ],

            amp_power: all,
            amp_fast_settle: BitArray::ZERO,
            amp_fl_select: BitArray::ZERO,
            dc_amp_power: all,
            stim_on: BitArray::ZERO,
            stim_pol: BitArray::ZERO,
            charge_recovery_switch: BitArray::ZERO,
            cl_charge_recovery_en: BitArray::ZERO,

            stim_enabled: false,
            stim_step,
            charge_recovery_dac: 128,
            current_limit: ChargeRecoveryCurrentLimit::Limit1nA,

            neg_current: [StimMagnitude::ZERO; RHS_CHANNELS as usize],
            pos_current: [StimMagnitude::ZERO; RHS_CHANNELS as usize],
        })
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Change the sample rate and re-derive the DSP cutoff code. RHS
    /// bias currents do not depend on the sample rate.
    pub fn set_sample_rate(&mut self, rate: f64) -> Result<(), RegisterError> {
        check_sample_rate(rate)?;
        let (dsp_code, actual) = dsp_cutoff_code(self.dsp_cutoff_request, rate)?;

        self.sample_rate = rate;
        self.dsp_cutoff_freq = dsp_code;

        debug!("RHS sample rate {} Hz; DSP cutoff {:.3} Hz", rate, actual);

        Ok(())
    }

    /// Set auxiliary digital output `output` (1 or 2)
    pub fn set_dig_out(&mut self, output: u8, state: DigOut) -> Result<(), RegisterError> {
        check_range("digital output", output as i64, 1, 2)?;
        self.dig_out[(output - 1) as usize] = state;
        Ok(())
    }

    pub fn set_dig_out_open_drain(&mut self, enable: bool) {
        self.dig_out_open_drain = enable;
    }

    pub fn enable_dsp(&mut self, enable: bool) {
        self.dsp_en = enable;
    }

    pub fn set_dsp_cutoff_freq(&mut self, freq: f64) -> Result<f64, RegisterError> {
        let (code, actual) = dsp_cutoff_code(freq, self.sample_rate)?;
        self.dsp_cutoff_request = freq;
        self.dsp_cutoff_freq = code;
        Ok(actual)
    }

    pub fn dsp_cutoff_freq(&self) -> f64 {
        dsp_cutoff_table(self.sample_rate)[self.dsp_cutoff_freq as usize]
    }

    pub fn set_twos_complement(&mut self, enable: bool) {
        self.twos_comp = enable;
    }

    pub fn set_abs_mode(&mut self, enable: bool) {
        self.abs_mode = enable;
    }

    pub fn enable_zcheck(&mut self, enable: bool) {
        self.zcheck_en = enable;
    }

    pub fn set_zcheck_scale(&mut self, scale: ZcheckScale) {
        self.zcheck_scale = scale;
    }

    pub fn set_zcheck_channel(&mut self, channel: u16) -> Result<(), RegisterError> {
        check_range("zcheck channel", channel as i64, 0, (RHS_CHANNELS - 1) as i64)?;
        self.zcheck_select = channel as u8;
        Ok(())
    }

    pub fn set_upper_bandwidth(&mut self, freq: f64) -> Result<f64, RegisterError> {
        let setting = upper_bandwidth_setting(freq)?;

        self.rh1_dac1 = setting.rh1_dac1;
        self.rh1_dac2 = setting.rh1_dac2;
        self.rh2_dac1 = setting.rh2_dac1;
        self.rh2_dac2 = setting.rh2_dac2;

        Ok(setting.actual)
    }

    /// Program the RL ladder of `bank`. Returns the achieved bandwidth.
    pub fn set_lower_bandwidth(&mut self, freq: f64, bank: BandwidthBank)
        -> Result<f64, RegisterError> {

        let setting = lower_bandwidth_setting(freq)?;

        self.rl[bank as usize] = RlCodes {
            dac1: setting.rl_dac1,
            dac2: setting.rl_dac2,
            dac3: setting.rl_dac3,
        };

        Ok(setting.actual)
    }

    fn switch_mask(&self, switch: ChannelSwitch) -> &ChannelMask16 {
        match switch {
            ChannelSwitch::AmpPower => &self.amp_power,
            ChannelSwitch::AmpFastSettle => &self.amp_fast_settle,
            ChannelSwitch::LowerBandwidthSettle => &self.amp_fl_select,
            ChannelSwitch::DcAmpPower => &self.dc_amp_power,
            ChannelSwitch::StimOn => &self.stim_on,
            ChannelSwitch::StimPolarity => &self.stim_pol,
            ChannelSwitch::ChargeRecovery => &self.charge_recovery_switch,
            ChannelSwitch::CurrentLimitedChargeRecovery => &self.cl_charge_recovery_en,
        }
    }

    fn switch_mask_mut(&mut self, switch: ChannelSwitch) -> &mut ChannelMask16 {
        match switch {
            ChannelSwitch::AmpPower => &mut self.amp_power,
            ChannelSwitch::AmpFastSettle => &mut self.amp_fast_settle,
            ChannelSwitch::LowerBandwidthSettle => &mut self.amp_fl_select,
            ChannelSwitch::DcAmpPower => &mut self.dc_amp_power,
            ChannelSwitch::StimOn => &mut self.stim_on,
            ChannelSwitch::StimPolarity => &mut self.stim_pol,
            ChannelSwitch::ChargeRecovery => &mut self.charge_recovery_switch,
            ChannelSwitch::CurrentLimitedChargeRecovery => &mut self.cl_charge_recovery_en,
        }
    }

    /// Set a per-channel switch for `channel` (0 to 15)
    pub fn set_channel_switch(&mut self, switch: ChannelSwitch, channel: u16, state: bool)
        -> Result<(), RegisterError> {

        check_range("channel", channel as i64, 0, (RHS_CHANNELS - 1) as i64)?;
        self.switch_mask_mut(switch).set(channel as usize, state);
        Ok(())
    }

    /// Set a per-channel switch for every channel
    pub fn set_channel_switch_all(&mut self, switch: ChannelSwitch, state: bool) {
        *self.switch_mask_mut(switch) = if state {
            BitArray::new([0xFFFF])
        } else {
            BitArray::ZERO
        };
    }

    pub fn channel_switch(&self, switch: ChannelSwitch, channel: u16) -> bool {
        self.switch_mask(switch).get(channel as usize).map(|b| *b).unwrap_or(false)
    }

    /// Arm or disarm stimulation on the whole chip
    pub fn enable_stim(&mut self, enable: bool) {
        self.stim_enabled = enable;
    }

    pub fn stim_enabled(&self) -> bool {
        self.stim_enabled
    }

    pub fn set_stim_step_size(&mut self, step: StimStepSize) {
        self.stim_step = step;
    }

    pub fn stim_step_size(&self) -> StimStepSize {
        self.stim_step
    }

    pub fn set_charge_recovery_current_limit(&mut self, limit: ChargeRecoveryCurrentLimit) {
        self.current_limit = limit;
    }

    pub fn charge_recovery_current_limit(&self) -> ChargeRecoveryCurrentLimit {
        self.current_limit
    }

    /// Set the charge recovery target voltage. Returns the voltage the
    /// DAC actually produces.
    pub fn set_charge_recovery_target_voltage(&mut self, volts: f64) -> Result<f64, RegisterError> {
        let (code, actual) = charge_recovery_dac(volts)?;
        self.charge_recovery_dac = code;
        Ok(actual)
    }

    /// Set the positive and negative current magnitudes of `channel`.
    /// Magnitudes are in units of the stim step size (0 to 255), trims
    /// are signed fine adjustments (-128 to 127). Nothing is changed
    /// unless every argument is in range.
    pub fn set_stim_magnitude(&mut self, channel: u16, pos_magnitude: i32, pos_trim: i32,
        neg_magnitude: i32, neg_trim: i32) -> Result<(), RegisterError> {

        check_range("channel", channel as i64, 0, (RHS_CHANNELS - 1) as i64)?;
        check_range("positive magnitude", pos_magnitude as i64, 0, 255)?;
        check_range("positive trim", pos_trim as i64, -128, 127)?;
        check_range("negative magnitude", neg_magnitude as i64, 0, 255)?;
        check_range("negative trim", neg_trim as i64, -128, 127)?;

        self.pos_current[channel as usize] = StimMagnitude {
            magnitude: pos_magnitude as u8,
            trim: pos_trim as i8
        };
        self.neg_current[channel as usize] = StimMagnitude {
            magnitude: neg_magnitude as u8,
            trim: neg_trim as i8
        };

        Ok(())
    }

    /// Pack the field values into the layout of register `addr`.
    pub fn get_register_value(&self, addr: u16) -> Result<u16, RegisterError> {
        let b = |v: bool| v as u16;
        let raw = |m: &ChannelMask16| m.as_raw_slice()[0];

        let value = match addr {
            0 => ((self.adc_buffer_bias as u16) << 6) | (self.mux_bias as u16),
            1 => {
                let (out1, out1_hiz) = self.dig_out[0].bits();
                let (out2, out2_hiz) = self.dig_out[1].bits();
                (b(self.dig_out_open_drain) << 12) |
                    (out2 << 11) |
                    (out2_hiz << 10) |
                    (out1 << 9) |
                    (out1_hiz << 8) |
                    (b(self.weak_miso) << 7) |
                    (b(self.twos_comp) << 6) |
                    (b(self.abs_mode) << 5) |
                    (b(self.dsp_en) << 4) |
                    (self.dsp_cutoff_freq as u16)
            },
            2 => ((self.zcheck_select as u16) << 8) |
                (b(self.zcheck_dac_power) << 6) |
                (b(self.zcheck_load) << 5) |
                ((self.zcheck_scale as u16) << 3) |
                b(self.zcheck_en),
            3 => ZCHECK_DAC_MIDPOINT,
            4 => ((self.rh1_dac2 as u16) << 6) | (self.rh1_dac1 as u16),
            5 => ((self.rh2_dac2 as u16) << 6) | (self.rh2_dac1 as u16),
            6 => self.rl[BandwidthBank::Primary as usize].packed(),
            7 => self.rl[BandwidthBank::Settle as usize].packed(),
            8 => raw(&self.amp_power),
            10 => raw(&self.amp_fast_settle),
            12 => raw(&self.amp_fl_select),
            32 => if self.stim_enabled { STIM_ENABLE_A } else { 0 },
            33 => if self.stim_enabled { STIM_ENABLE_B } else { 0 },
            34 => {
                let r = self.stim_step.registers();
                ((r.sel3 as u16) << 13) | ((r.sel2 as u16) << 7) | (r.sel1 as u16)
            },
            35 => {
                let r = self.stim_step.registers();
                ((r.nbias as u16) << 4) | (r.pbias as u16)
            },
            36 => self.charge_recovery_dac as u16,
            37 => {
                let r = self.current_limit.registers();
                ((r.sel3 as u16) << 13) | ((r.sel2 as u16) << 7) | (r.sel1 as u16)
            },
            38 => raw(&self.dc_amp_power),
            42 => raw(&self.stim_on),
            44 => raw(&self.stim_pol),
            46 => raw(&self.charge_recovery_switch),
            48 => raw(&self.cl_charge_recovery_en),
            64..=79 => self.neg_current[(addr - RHS_NEG_MAGNITUDE_BASE) as usize].packed(),
            96..=111 => self.pos_current[(addr - RHS_POS_MAGNITUDE_BASE) as usize].packed(),
            _ => return Err(RegisterError::UnknownRegister(addr))
        };

        Ok(value)
    }

    /// Every address `get_register_value` understands, ascending
    pub fn register_addresses() -> impl Iterator<Item=u16> {
        (0u16..=8).chain(MASK_AND_STIM_REGISTERS.iter().copied())
            .chain(64u16..=79)
            .chain(96u16..=111)
    }
}
