use bitvec::prelude::BitArray;
use log::debug;

use crate::calibration::{upper_bandwidth_setting, lower_bandwidth_setting, dsp_cutoff_code,
    dsp_cutoff_table};
use super::{RegisterError, ChannelMask64, ZcheckScale, ZcheckPolarity, DigOut, ZCHECK_DAC_MIDPOINT,
    check_range, check_sample_rate};

/// Number of writable RHD registers (addresses 0 to 21)
pub const RHD_NUM_REGISTERS: u16 = 22;
/// Number of amplifier channels on the largest RHD chip
pub const RHD_MAX_CHANNELS: u16 = 64;

const DEFAULT_UPPER_BANDWIDTH: f64 = 7500.0;
const DEFAULT_LOWER_BANDWIDTH: f64 = 1.0;
const DEFAULT_DSP_CUTOFF: f64 = 1.0;

// Sample rate (exclusive upper bound) → (mux load, mux bias, ADC buffer bias)
const BIAS_TABLE: [(f64, u8, u8, u8); 9] = [
    (3334.0, 0, 40, 32),
    (4001.0, 0, 40, 16),
    (5001.0, 0, 40, 8),
    (6251.0, 0, 32, 8),
    (8001.0, 0, 26, 8),
    (10001.0, 0, 18, 4),
    (12501.0, 0, 16, 3),
    (15001.0, 0, 7, 3),
    (f64::INFINITY, 0, 4, 2),
];

fn sample_rate_biases(rate: f64) -> (u8, u8, u8) {
    for &(limit, load, mux, adc) in BIAS_TABLE.iter() {
        if rate < limit {
            return (load, mux, adc);
        }
    }
    // unreachable, last bound is infinite
    (0, 4, 2)
}


/// Register state of an RHD recording chip
#[derive(Clone, Debug)]
pub struct RhdRegisters {
    sample_rate: f64,
    dsp_cutoff_request: f64,

    // Register 0
    adc_reference_bw: u8,
    amp_fast_settle: bool,
    amp_vref_enable: bool,
    adc_comparator_bias: u8,
    adc_comparator_select: u8,

    // Register 1
    vdd_sense_enable: bool,
    adc_buffer_bias: u8,

    // Register 2
    mux_bias: u8,

    // Register 3
    mux_load: u8,
    temp_s1: bool,
    temp_s2: bool,
    temp_en: bool,
    dig_out: DigOut,

    // Register 4
    weak_miso: bool,
    twos_comp: bool,
    abs_mode: bool,
    dsp_en: bool,
    dsp_cutoff_freq: u8,

    // Register 5
    zcheck_dac_power: bool,
    zcheck_load: bool,
    zcheck_scale: ZcheckScale,
    zcheck_conn_all: bool,
    zcheck_polarity: ZcheckPolarity,
    zcheck_en: bool,

    // Register 7
    zcheck_select: u8,

    // Registers 8 to 13
    off_chip_rh1: bool,
    off_chip_rh2: bool,
    off_chip_rl: bool,
    adc_aux_en: [bool; 3],
    rh1_dac1: u8,
    rh1_dac2: u8,
    rh2_dac1: u8,
    rh2_dac2: u8,
    rl_dac1: u8,
    rl_dac2: u8,
    rl_dac3: u8,

    // Registers 14 to 21
    amp_power: ChannelMask64,
}

impl RhdRegisters {

    /// Create a new register set with power-on defaults: DSP offset
    /// removal at 1 Hz, 7.5 kHz upper and 1 Hz lower bandwidth, all
    /// amplifiers and auxiliary inputs powered.
    pub fn new(sample_rate: f64) -> Result<RhdRegisters, RegisterError> {

        check_sample_rate(sample_rate)?;
        let (mux_load, mux_bias, adc_buffer_bias) = sample_rate_biases(sample_rate);
        let upper = upper_bandwidth_setting(DEFAULT_UPPER_BANDWIDTH)?;
        let lower = lower_bandwidth_setting(DEFAULT_LOWER_BANDWIDTH)?;
        let (dsp_code, _) = dsp_cutoff_code(DEFAULT_DSP_CUTOFF, sample_rate)?;

        Ok(RhdRegisters {
            sample_rate,
            dsp_cutoff_request: DEFAULT_DSP_CUTOFF,

            adc_reference_bw: 3,
            amp_fast_settle: false,
            amp_vref_enable: true,
            adc_comparator_bias: 3,
            adc_comparator_select: 2,

            vdd_sense_enable: true,
            adc_buffer_bias,

            mux_bias,

            mux_load,
            temp_s1: false,
            temp_s2: false,
            temp_en: false,
            dig_out: DigOut::HiZ,

            weak_miso: true,
            twos_comp: false,
            abs_mode: false,
            dsp_en: true,
            dsp_cutoff_freq: dsp_code,

            zcheck_dac_power: true,
            zcheck_load: false,
            zcheck_scale: ZcheckScale::Cs100fF,
            zcheck_conn_all: false,
            zcheck_polarity: ZcheckPolarity::PositiveInput,
            zcheck_en: false,

            zcheck_select: 0,

            off_chip_rh1: false,
            off_chip_rh2: false,
            off_chip_rl: false,
            adc_aux_en: [true; 3],
            rh1_dac1: upper.rh1_dac1,
            rh1_dac2: upper.rh1_dac2,
            rh2_dac1: upper.rh2_dac1,
            rh2_dac2: upper.rh2_dac2,
            rl_dac1: lower.rl_dac1,
            rl_dac2: lower.rl_dac2,
            rl_dac3: lower.rl_dac3,

            amp_power: BitArray::new([0xFF; 8]),
        })
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Change the sample rate. The MUX and ADC buffer biases and the DSP
    /// cutoff code are re-derived for the new rate.
    pub fn set_sample_rate(&mut self, rate: f64) -> Result<(), RegisterError> {
        check_sample_rate(rate)?;
        let (dsp_code, actual) = dsp_cutoff_code(self.dsp_cutoff_request, rate)?;
        let (mux_load, mux_bias, adc_buffer_bias) = sample_rate_biases(rate);

        self.sample_rate = rate;
        self.mux_load = mux_load;
        self.mux_bias = mux_bias;
        self.adc_buffer_bias = adc_buffer_bias;
        self.dsp_cutoff_freq = dsp_code;

        debug!("RHD sample rate {} Hz; mux bias {}, ADC buffer bias {}, DSP cutoff {:.3} Hz",
            rate, mux_bias, adc_buffer_bias, actual);

        Ok(())
    }

    pub fn set_fast_settle(&mut self, enable: bool) {
        self.amp_fast_settle = enable;
    }

    pub fn set_dig_out(&mut self, state: DigOut) {
        self.dig_out = state;
    }

    /// Enable or disable auxiliary ADC input `input` (1 to 3)
    pub fn set_aux_input_enabled(&mut self, input: u8, enable: bool) -> Result<(), RegisterError> {
        check_range("auxiliary input", input as i64, 1, 3)?;
        self.adc_aux_en[(input - 1) as usize] = enable;
        Ok(())
    }

    /// Power the on-chip temperature sensor
    pub fn set_temp_sensor_enabled(&mut self, enable: bool) {
        self.temp_en = enable;
    }

    pub fn temp_sensor_enabled(&self) -> bool {
        self.temp_en
    }

    pub fn enable_dsp(&mut self, enable: bool) {
        self.dsp_en = enable;
    }

    pub fn dsp_enabled(&self) -> bool {
        self.dsp_en
    }

    /// Select the DSP offset removal cutoff closest to `freq`. Returns
    /// the achieved cutoff.
    pub fn set_dsp_cutoff_freq(&mut self, freq: f64) -> Result<f64, RegisterError> {
        let (code, actual) = dsp_cutoff_code(freq, self.sample_rate)?;
        self.dsp_cutoff_request = freq;
        self.dsp_cutoff_freq = code;
        Ok(actual)
    }

    /// Currently programmed DSP cutoff in Hz
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

    pub fn set_zcheck_polarity(&mut self, polarity: ZcheckPolarity) {
        self.zcheck_polarity = polarity;
    }

    /// Connect all electrodes to the impedance check DAC
    pub fn set_zcheck_connect_all(&mut self, connect: bool) {
        self.zcheck_conn_all = connect;
    }

    pub fn set_zcheck_channel(&mut self, channel: u16) -> Result<(), RegisterError> {
        check_range("zcheck channel", channel as i64, 0, (RHD_MAX_CHANNELS - 1) as i64)?;
        self.zcheck_select = channel as u8;
        Ok(())
    }

    /// Program the RH1/RH2 ladders for the requested upper bandwidth.
    /// Returns the achieved bandwidth.
    pub fn set_upper_bandwidth(&mut self, freq: f64) -> Result<f64, RegisterError> {
        let setting = upper_bandwidth_setting(freq)?;

        self.rh1_dac1 = setting.rh1_dac1;
        self.rh1_dac2 = setting.rh1_dac2;
        self.rh2_dac1 = setting.rh2_dac1;
        self.rh2_dac2 = setting.rh2_dac2;

        Ok(setting.actual)
    }

    /// Program the RL ladder for the requested lower bandwidth. Returns
    /// the achieved bandwidth.
    pub fn set_lower_bandwidth(&mut self, freq: f64) -> Result<f64, RegisterError> {
        let setting = lower_bandwidth_setting(freq)?;

        self.rl_dac1 = setting.rl_dac1;
        self.rl_dac2 = setting.rl_dac2;
        self.rl_dac3 = setting.rl_dac3;

        Ok(setting.actual)
    }

    /// Power amplifier `channel` (0 to 63) up or down
    pub fn set_amp_power(&mut self, channel: u16, power: bool) -> Result<(), RegisterError> {
        check_range("amplifier channel", channel as i64, 0, (RHD_MAX_CHANNELS - 1) as i64)?;
        self.amp_power.set(channel as usize, power);
        Ok(())
    }

    pub fn amp_power(&self, channel: u16) -> bool {
        self.amp_power.get(channel as usize).map(|b| *b).unwrap_or(false)
    }

    pub fn power_up_all_amps(&mut self) {
        self.amp_power = BitArray::new([0xFF; 8]);
    }

    pub fn power_down_all_amps(&mut self) {
        self.amp_power = BitArray::ZERO;
    }

    // Register 3 with explicit temperature sensor switch states; the
    // auxiliary sampling list cycles these on every pass.
    pub(crate) fn register3_with_temp(&self, s1: bool, s2: bool) -> u16 {
        let (value, hiz) = self.dig_out.bits();
        ((self.mux_load as u16) << 5) |
            ((s2 as u16) << 4) |
            ((s1 as u16) << 3) |
            ((self.temp_en as u16) << 2) |
            (hiz << 1) |
            value
    }

    /// Pack the field values into the layout of register `addr` (0 to
    /// 21).
    pub fn get_register_value(&self, addr: u16) -> Result<u16, RegisterError> {
        let b = |v: bool| v as u16;

        let value = match addr {
            0 => ((self.adc_reference_bw as u16) << 6) |
                (b(self.amp_fast_settle) << 5) |
                (b(self.amp_vref_enable) << 4) |
                ((self.adc_comparator_bias as u16) << 2) |
                (self.adc_comparator_select as u16),
            1 => (b(self.vdd_sense_enable) << 6) | (self.adc_buffer_bias as u16),
            2 => self.mux_bias as u16,
            3 => self.register3_with_temp(self.temp_s1, self.temp_s2),
            4 => (b(self.weak_miso) << 7) |
                (b(self.twos_comp) << 6) |
                (b(self.abs_mode) << 5) |
                (b(self.dsp_en) << 4) |
                (self.dsp_cutoff_freq as u16),
            5 => (b(self.zcheck_dac_power) << 6) |
                (b(self.zcheck_load) << 5) |
                ((self.zcheck_scale as u16) << 3) |
                (b(self.zcheck_conn_all) << 2) |
                (b(self.zcheck_polarity == ZcheckPolarity::NegativeInput) << 1) |
                b(self.zcheck_en),
            6 => ZCHECK_DAC_MIDPOINT,
            7 => self.zcheck_select as u16,
            8 => (b(self.off_chip_rh1) << 7) | (self.rh1_dac1 as u16),
            9 => (b(self.adc_aux_en[0]) << 7) | (self.rh1_dac2 as u16),
            10 => (b(self.off_chip_rh2) << 7) | (self.rh2_dac1 as u16),
            11 => (b(self.adc_aux_en[1]) << 7) | (self.rh2_dac2 as u16),
            12 => (b(self.off_chip_rl) << 7) | (self.rl_dac1 as u16),
            13 => (b(self.adc_aux_en[2]) << 7) |
                ((self.rl_dac3 as u16) << 6) |
                (self.rl_dac2 as u16),
            14..=21 => self.amp_power.as_raw_slice()[(addr - 14) as usize] as u16,
            _ => return Err(RegisterError::UnknownRegister(addr))
        };

        Ok(value)
    }
}
