//! Analog calibration curves
//!
//! The amplifier bandwidth of RHD/RHS chips is set by three on-chip resistor
//! ladders (RH1, RH2 and RL). Each ladder is driven by a coarse and a fine
//! DAC (and, for RL, an additional range-extension bit). The relationship
//! between resistance and cutoff frequency is only known empirically, so the
//! functions in this module use quadratic (cubic for very low RL) fits in log
//! space and invert them where needed. Stimulation step and charge-recovery
//! current limits are discrete and come from fixed lookup tables.

use std::collections::HashMap;
use std::f64::consts::PI;
use log::{debug, warn};
use num_derive::FromPrimitive;
use thiserror::Error;

/// Highest upper bandwidth the amplifiers handle well
pub const MAX_UPPER_BANDWIDTH: f64 = 30000.0;
/// Highest lower bandwidth the amplifiers handle well
pub const MAX_LOWER_BANDWIDTH: f64 = 1500.0;
/// Lower bandwidth targets below this need the RL range-extension bit
pub const RL_EXTENSION_THRESHOLD: f64 = 0.15;
/// Number of selectable DSP offset removal cutoffs
pub const DSP_CUTOFF_LEVELS: usize = 15;
/// Volts per code of the charge-recovery target voltage DAC
pub const CHARGE_RECOVERY_DAC_STEP: f64 = 0.0047058;

const RH1_BASE: f64 = 2200.0;
const RH1_DAC1_UNIT: f64 = 600.0;
const RH1_DAC2_UNIT: f64 = 29400.0;
const RH1_DAC1_STEPS: u32 = 63;
const RH1_DAC2_STEPS: u32 = 31;

const RH2_BASE: f64 = 8700.0;
const RH2_DAC1_UNIT: f64 = 763.0;
const RH2_DAC2_UNIT: f64 = 38400.0;
const RH2_DAC1_STEPS: u32 = 63;
const RH2_DAC2_STEPS: u32 = 31;

const RL_BASE: f64 = 3500.0;
const RL_DAC1_UNIT: f64 = 175.0;
const RL_DAC2_UNIT: f64 = 12700.0;
const RL_DAC3_UNIT: f64 = 3_000_000.0;
const RL_DAC1_STEPS: u32 = 127;
const RL_DAC2_STEPS: u32 = 63;

// The RL fit is invalid below 5.1 kΩ and switches formula at 30 kΩ
const RL_MIN_FIT: f64 = 5100.0;
const RL_FIT_SWITCH: f64 = 30000.0;


/// Errors raised while converting analog targets into DAC codes
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// Frequency is not a positive number
    #[error("Invalid target frequency: {0} Hz")]
    InvalidFrequency(f64),
    /// Target lies outside what the resistor ladders can produce
    #[error("Bandwidth of {requested} Hz cannot be reached; closest achievable is {limit} Hz")]
    Unreachable { requested: f64, limit: f64 },
    /// Voltage is not a finite number
    #[error("Invalid target voltage: {0} V")]
    InvalidVoltage(f64),
    /// Current is not a finite number
    #[error("Invalid stimulation current: {0} A")]
    InvalidCurrent(f64),
    /// Min/Max step sizes have no precise current and cannot be used
    /// for magnitude calculations
    #[error("Step size {0:?} does not correspond to a precise current")]
    ImpreciseStep(StimStepSize),
}


fn solve_log_quadratic(a: f64, b: f64, c: f64) -> f64 {
    10.0f64.powf((-b - (b*b - 4.0*a*c).sqrt()) / (2.0*a))
}

/// Target RH1 resistance (Ω) for an upper bandwidth (Hz)
pub fn rh1_from_upper_bandwidth(upper: f64) -> f64 {
    let l = upper.log10();
    0.9730 * 10.0f64.powf(8.0968 - 1.1892*l + 0.04767*l*l)
}

/// Target RH2 resistance (Ω) for an upper bandwidth (Hz)
pub fn rh2_from_upper_bandwidth(upper: f64) -> f64 {
    let l = upper.log10();
    1.0191 * 10.0f64.powf(8.1009 - 1.0821*l + 0.03383*l*l)
}

/// Target RL resistance (Ω) for a lower bandwidth (Hz)
pub fn rl_from_lower_bandwidth(lower: f64) -> f64 {
    let l = lower.log10();
    if lower < 4.0 {
        1.0061 * 10.0f64.powf(4.9391 - 1.2088*l + 0.5698*l*l + 0.1442*l*l*l)
    } else {
        1.0061 * 10.0f64.powf(4.7351 - 0.5916*l + 0.08482*l*l)
    }
}

/// Upper bandwidth (Hz) estimated from an RH1 resistance (Ω)
pub fn upper_bandwidth_from_rh1(rh1: f64) -> f64 {
    solve_log_quadratic(0.04767, -1.1892, 8.0968 - (rh1 / 0.9730).log10())
}

/// Upper bandwidth (Hz) estimated from an RH2 resistance (Ω)
pub fn upper_bandwidth_from_rh2(rh2: f64) -> f64 {
    solve_log_quadratic(0.03383, -1.0821, 8.1009 - (rh2 / 1.0191).log10())
}

/// Lower bandwidth (Hz) estimated from an RL resistance (Ω)
pub fn lower_bandwidth_from_rl(rl: f64) -> f64 {
    let rl = if rl < RL_MIN_FIT { RL_MIN_FIT } else { rl };

    if rl < RL_FIT_SWITCH {
        solve_log_quadratic(0.08482, -0.5916, 4.7351 - (rl / 1.0061).log10())
    } else {
        solve_log_quadratic(0.3303, -1.2100, 4.9873 - (rl / 1.0061).log10())
    }
}

// Greedily add `unit` to `actual` at most `steps` times, as long as
// `actual` stays below `target - margin`. Returns the number of steps
// taken which is the DAC code for this stage.
fn ladder_stage(actual: &mut f64, target: f64, unit: f64, steps: u32, margin: f64) -> u8 {
    let mut code = 0u8;
    for _ in 0..steps {
        if *actual < target - margin {
            *actual += unit;
            code += 1;
        }
    }
    code
}


/// DAC codes for both upper bandwidth resistor ladders along with the
/// bandwidth these codes actually produce.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UpperBandwidthSetting {
    pub rh1_dac1: u8,
    pub rh1_dac2: u8,
    pub rh2_dac1: u8,
    pub rh2_dac2: u8,
    /// Achieved upper bandwidth in Hz
    pub actual: f64,
}

/// Compute the RH1/RH2 DAC codes closest to the requested upper
/// bandwidth. Requests above [`MAX_UPPER_BANDWIDTH`] are clamped and
/// requests below the ladders' range saturate at their largest codes.
///
/// Each ladder is searched coarse-then-fine starting from its base
/// resistance, stopping just below the target at each stage to match the
/// discrete steps of the hardware. The achieved bandwidth is the geometric
/// mean of the two independently inverted estimates.
///
/// ```
/// use librhx::calibration::upper_bandwidth_setting;
///
/// let setting = upper_bandwidth_setting(7500.0).unwrap();
/// assert_eq!((setting.rh1_dac1, setting.rh1_dac2), (22, 0));
/// assert_eq!((setting.rh2_dac1, setting.rh2_dac2), (23, 0));
/// ```
pub fn upper_bandwidth_setting(requested: f64) -> Result<UpperBandwidthSetting, CalibrationError> {

    if requested.is_nan() || requested <= 0.0 {
        warn!("Upper bandwidth must be positive; got {}", requested);
        return Err(CalibrationError::InvalidFrequency(requested));
    }

    let upper = if requested > MAX_UPPER_BANDWIDTH { MAX_UPPER_BANDWIDTH } else { requested };

    let rh1_target = rh1_from_upper_bandwidth(upper);
    let mut rh1 = RH1_BASE;
    let rh1_dac2 = ladder_stage(&mut rh1, rh1_target, RH1_DAC2_UNIT, RH1_DAC2_STEPS,
        RH1_DAC2_UNIT - RH1_DAC1_UNIT / 2.0);
    let rh1_dac1 = ladder_stage(&mut rh1, rh1_target, RH1_DAC1_UNIT, RH1_DAC1_STEPS,
        RH1_DAC1_UNIT / 2.0);

    let rh2_target = rh2_from_upper_bandwidth(upper);
    let mut rh2 = RH2_BASE;
    let rh2_dac2 = ladder_stage(&mut rh2, rh2_target, RH2_DAC2_UNIT, RH2_DAC2_STEPS,
        RH2_DAC2_UNIT - RH2_DAC1_UNIT / 2.0);
    let rh2_dac1 = ladder_stage(&mut rh2, rh2_target, RH2_DAC1_UNIT, RH2_DAC1_STEPS,
        RH2_DAC1_UNIT / 2.0);

    let actual = (upper_bandwidth_from_rh1(rh1) * upper_bandwidth_from_rh2(rh2)).sqrt();

    // Saturated ladders report the bandwidth they reach
    if rh1 < rh1_target - RH1_DAC1_UNIT / 2.0 || rh2 < rh2_target - RH2_DAC1_UNIT / 2.0 {
        warn!("Upper bandwidth {} Hz is out of reach; using {} Hz", requested, actual);
    }

    debug!("Upper bandwidth {} Hz → RH1 ({}, {}), RH2 ({}, {}), actual {:.1} Hz",
        requested, rh1_dac1, rh1_dac2, rh2_dac1, rh2_dac2, actual);

    Ok(UpperBandwidthSetting { rh1_dac1, rh1_dac2, rh2_dac1, rh2_dac2, actual })
}


/// DAC codes for the RL ladder along with the bandwidth they produce.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LowerBandwidthSetting {
    pub rl_dac1: u8,
    pub rl_dac2: u8,
    pub rl_dac3: u8,
    /// Achieved lower bandwidth in Hz
    pub actual: f64,
}

/// Compute the RL DAC codes closest to the requested lower bandwidth.
/// Requests above [`MAX_LOWER_BANDWIDTH`] are clamped. Targets below
/// [`RL_EXTENSION_THRESHOLD`] engage the range-extension bit (DAC3) before
/// the coarse and fine stages run.
pub fn lower_bandwidth_setting(requested: f64) -> Result<LowerBandwidthSetting, CalibrationError> {

    if requested.is_nan() || requested <= 0.0 {
        warn!("Lower bandwidth must be positive; got {}", requested);
        return Err(CalibrationError::InvalidFrequency(requested));
    }

    let lower = if requested > MAX_LOWER_BANDWIDTH { MAX_LOWER_BANDWIDTH } else { requested };

    let rl_target = rl_from_lower_bandwidth(lower);
    let mut rl = RL_BASE;
    let mut rl_dac3 = 0u8;

    if lower < RL_EXTENSION_THRESHOLD {
        rl += RL_DAC3_UNIT;
        rl_dac3 = 1;
    }

    let rl_dac2 = ladder_stage(&mut rl, rl_target, RL_DAC2_UNIT, RL_DAC2_STEPS,
        RL_DAC2_UNIT - RL_DAC1_UNIT / 2.0);
    let rl_dac1 = ladder_stage(&mut rl, rl_target, RL_DAC1_UNIT, RL_DAC1_STEPS,
        RL_DAC1_UNIT / 2.0);

    let actual = lower_bandwidth_from_rl(rl);

    if rl < rl_target - RL_DAC1_UNIT / 2.0 {
        warn!("Lower bandwidth {} Hz is out of reach; limit is {} Hz", requested, actual);
        return Err(CalibrationError::Unreachable { requested, limit: actual });
    }

    debug!("Lower bandwidth {} Hz → RL ({}, {}, {}), actual {:.3} Hz",
        requested, rl_dac1, rl_dac2, rl_dac3, actual);

    Ok(LowerBandwidthSetting { rl_dac1, rl_dac2, rl_dac3, actual })
}


/// All DSP offset removal cutoffs (Hz) for a sample rate. Index 0 is not
/// a valid setting and is always 0.0; index `n` holds
/// `fs · ln(2ⁿ/(2ⁿ−1)) / 2π`.
pub fn dsp_cutoff_table(sample_rate: f64) -> [f64; DSP_CUTOFF_LEVELS+1] {
    let mut table = [0.0f64; DSP_CUTOFF_LEVELS+1];

    for n in 1..=DSP_CUTOFF_LEVELS {
        let x = 2.0f64.powi(n as i32);
        table[n] = sample_rate * (x / (x - 1.0)).ln() / (2.0 * PI);
    }

    table
}

/// Pick the DSP cutoff code closest (on a log scale) to the requested
/// frequency. Requests above the highest or below the lowest available
/// cutoff are clamped to codes 1 and 15 respectively. Returns the code
/// and the cutoff it produces.
pub fn dsp_cutoff_code(requested: f64, sample_rate: f64) -> Result<(u8, f64), CalibrationError> {

    if requested.is_nan() || requested <= 0.0 {
        warn!("DSP cutoff must be positive; got {}", requested);
        return Err(CalibrationError::InvalidFrequency(requested));
    }

    let table = dsp_cutoff_table(sample_rate);

    let code = if requested > table[1] {
        1
    } else if requested < table[DSP_CUTOFF_LEVELS] {
        DSP_CUTOFF_LEVELS
    } else {
        let target = requested.log10();
        let mut best = 1usize;
        let mut min_diff = f64::MAX;
        for n in 1..=DSP_CUTOFF_LEVELS {
            let diff = (target - table[n].log10()).abs();
            if diff < min_diff {
                min_diff = diff;
                best = n;
            }
        }
        best
    };

    Ok((code as u8, table[code]))
}


/// Stimulation current step sizes supported by RHS chips. `Min` and `Max`
/// are the extremes of the DACs and do not correspond to a precise
/// current.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, FromPrimitive)]
pub enum StimStepSize {
    Min = 0,
    Step10nA,
    Step20nA,
    Step50nA,
    Step100nA,
    Step200nA,
    Step500nA,
    Step1uA,
    Step2uA,
    Step5uA,
    Step10uA,
    Max,
}

/// Register values programming a stim step size
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StimStepRegisters {
    pub sel1: u8,
    pub sel2: u8,
    pub sel3: u8,
    pub pbias: u8,
    pub nbias: u8,
}

/// Charge recovery current limits supported by RHS chips. As with
/// [`StimStepSize`], `Min` and `Max` are imprecise boundaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, FromPrimitive)]
pub enum ChargeRecoveryCurrentLimit {
    Min = 0,
    Limit1nA,
    Limit2nA,
    Limit5nA,
    Limit10nA,
    Limit20nA,
    Limit50nA,
    Limit100nA,
    Limit200nA,
    Limit500nA,
    Limit1uA,
    Max,
}

/// Register values programming a charge recovery current limit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CurrentLimitRegisters {
    pub sel1: u8,
    pub sel2: u8,
    pub sel3: u8,
}

lazy_static! {
    static ref STIM_STEP_TABLE: HashMap<StimStepSize, (StimStepRegisters, f64)> = {
        use StimStepSize::*;
        let regs = |sel1, sel2, sel3, bias| StimStepRegisters {
            sel1, sel2, sel3, pbias: bias, nbias: bias
        };

        let mut map = HashMap::with_capacity(12);
        map.insert(Min,       (regs(127, 63, 3,  6), f64::NAN));
        map.insert(Step10nA,  (regs( 64, 19, 3,  6), 10.0e-9));
        map.insert(Step20nA,  (regs( 40, 40, 1,  7), 20.0e-9));
        map.insert(Step50nA,  (regs( 64, 40, 0,  7), 50.0e-9));
        map.insert(Step100nA, (regs( 30, 20, 0,  7), 100.0e-9));
        map.insert(Step200nA, (regs( 25, 10, 0,  8), 200.0e-9));
        map.insert(Step500nA, (regs(101,  3, 0,  9), 500.0e-9));
        map.insert(Step1uA,   (regs( 98,  1, 0, 10), 1.0e-6));
        map.insert(Step2uA,   (regs( 94,  0, 0, 11), 2.0e-6));
        map.insert(Step5uA,   (regs( 38,  0, 0, 14), 5.0e-6));
        map.insert(Step10uA,  (regs( 15,  0, 0, 15), 10.0e-6));
        map.insert(Max,       (regs(  0,  0, 0, 15), f64::NAN));
        map
    };

    static ref CURRENT_LIMIT_TABLE: HashMap<ChargeRecoveryCurrentLimit, (CurrentLimitRegisters, f64)> = {
        use ChargeRecoveryCurrentLimit::*;
        let regs = |sel1, sel2, sel3| CurrentLimitRegisters { sel1, sel2, sel3 };

        // register values not yet verified on hardware
        let mut map = HashMap::with_capacity(12);
        map.insert(Min,        (regs(127, 63, 3), f64::NAN));
        map.insert(Limit1nA,   (regs(  0, 30, 2), 1.0e-9));
        map.insert(Limit2nA,   (regs( 31, 15, 2), 2.0e-9));
        map.insert(Limit5nA,   (regs(  6, 15, 0), 5.0e-9));
        map.insert(Limit10nA,  (regs(120,  7, 0), 10.0e-9));
        map.insert(Limit20nA,  (regs( 64,  3, 0), 20.0e-9));
        map.insert(Limit50nA,  (regs( 25,  1, 0), 50.0e-9));
        map.insert(Limit100nA, (regs( 28,  0, 0), 100.0e-9));
        map.insert(Limit200nA, (regs( 14,  0, 0), 200.0e-9));
        map.insert(Limit500nA, (regs(  5,  0, 0), 500.0e-9));
        map.insert(Limit1uA,   (regs(  2,  0, 0), 1.0e-6));
        map.insert(Max,        (regs(  0,  0, 0), f64::NAN));
        map
    };
}

// Choose the entry closest to `amps` among the precise ones, provided it
// lies within `tolerance` (relative) of it.
fn nearest_entry<K: Copy>(entries: &[(K, f64)], amps: f64, tolerance: f64) -> Option<K> {
    if !amps.is_finite() || amps <= 0.0 {
        return None;
    }

    entries.iter()
        .filter(|(_, value)| !value.is_nan())
        .map(|(key, value)| (*key, ((amps - value) / value).abs()))
        .filter(|(_, diff)| *diff <= tolerance)
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(key, _)| key)
}

impl StimStepSize {

    /// Every step size in ascending order, sentinels included
    pub const ALL: [StimStepSize; 12] = [
        StimStepSize::Min, StimStepSize::Step10nA, StimStepSize::Step20nA,
        StimStepSize::Step50nA, StimStepSize::Step100nA, StimStepSize::Step200nA,
        StimStepSize::Step500nA, StimStepSize::Step1uA, StimStepSize::Step2uA,
        StimStepSize::Step5uA, StimStepSize::Step10uA, StimStepSize::Max,
    ];

    /// Register values (step selectors and bias) for this step size
    pub fn registers(self) -> StimStepRegisters {
        STIM_STEP_TABLE[&self].0
    }

    /// Step size in amps; NaN for the `Min`/`Max` sentinels.
    pub fn to_amps(self) -> f64 {
        STIM_STEP_TABLE[&self].1
    }

    /// Find the step size whose current is within a relative `tolerance`
    /// of `amps`. Sentinels are never returned.
    ///
    /// ```
    /// use librhx::calibration::StimStepSize;
    ///
    /// assert_eq!(StimStepSize::nearest(1.02e-6, 0.05), Some(StimStepSize::Step1uA));
    /// assert_eq!(StimStepSize::nearest(1.5e-6, 0.05), None);
    /// ```
    pub fn nearest(amps: f64, tolerance: f64) -> Option<StimStepSize> {
        let entries: Vec<(StimStepSize, f64)> = Self::ALL.iter()
            .map(|s| (*s, s.to_amps()))
            .collect();
        nearest_entry(&entries, amps, tolerance)
    }

    /// Convert a current into a magnitude code (0–255) for this step size
    pub fn magnitude_for(self, amps: f64) -> Result<u8, CalibrationError> {
        if !amps.is_finite() {
            return Err(CalibrationError::InvalidCurrent(amps));
        }

        let step = self.to_amps();
        if step.is_nan() {
            return Err(CalibrationError::ImpreciseStep(self));
        }

        Ok(dac_code!(amps.abs() / step, 255u32) as u8)
    }
}

impl ChargeRecoveryCurrentLimit {

    /// Every current limit in ascending order, sentinels included
    pub const ALL: [ChargeRecoveryCurrentLimit; 12] = [
        ChargeRecoveryCurrentLimit::Min, ChargeRecoveryCurrentLimit::Limit1nA,
        ChargeRecoveryCurrentLimit::Limit2nA, ChargeRecoveryCurrentLimit::Limit5nA,
        ChargeRecoveryCurrentLimit::Limit10nA, ChargeRecoveryCurrentLimit::Limit20nA,
        ChargeRecoveryCurrentLimit::Limit50nA, ChargeRecoveryCurrentLimit::Limit100nA,
        ChargeRecoveryCurrentLimit::Limit200nA, ChargeRecoveryCurrentLimit::Limit500nA,
        ChargeRecoveryCurrentLimit::Limit1uA, ChargeRecoveryCurrentLimit::Max,
    ];

    pub fn registers(self) -> CurrentLimitRegisters {
        CURRENT_LIMIT_TABLE[&self].0
    }

    /// Current limit in amps; NaN for the `Min`/`Max` sentinels.
    pub fn to_amps(self) -> f64 {
        CURRENT_LIMIT_TABLE[&self].1
    }

    pub fn nearest(amps: f64, tolerance: f64) -> Option<ChargeRecoveryCurrentLimit> {
        let entries: Vec<(ChargeRecoveryCurrentLimit, f64)> = Self::ALL.iter()
            .map(|s| (*s, s.to_amps()))
            .collect();
        nearest_entry(&entries, amps, tolerance)
    }
}

/// Convert a charge recovery target voltage into the 8-bit DAC code
/// (128 is 0 V). Returns the code and the voltage it produces.
pub fn charge_recovery_dac(volts: f64) -> Result<(u8, f64), CalibrationError> {
    if !volts.is_finite() {
        warn!("Charge recovery target must be finite; got {}", volts);
        return Err(CalibrationError::InvalidVoltage(volts));
    }

    let code = dac_code!(volts / CHARGE_RECOVERY_DAC_STEP + 128.0, 255u32);
    let actual = CHARGE_RECOVERY_DAC_STEP * (code as f64 - 128.0);

    Ok((code as u8, actual))
}


#[cfg(test)]
mod tests {

    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn upper_bandwidth_default() {
        let s = upper_bandwidth_setting(7500.0).unwrap();
        assert_eq!(s.rh1_dac1, 22);
        assert_eq!(s.rh1_dac2, 0);
        assert_eq!(s.rh2_dac1, 23);
        assert_eq!(s.rh2_dac2, 0);
        assert!(s.actual > 7000.0 && s.actual < 8000.0);
    }

    #[test]
    fn upper_bandwidth_is_clamped() {
        let high = upper_bandwidth_setting(50000.0).unwrap();
        let max = upper_bandwidth_setting(MAX_UPPER_BANDWIDTH).unwrap();
        assert_eq!(high, max);
    }

    #[test]
    fn upper_bandwidth_monotonic() {
        let mut previous = 0.0;
        let mut freq = 100.0;
        while freq <= 20000.0 {
            let actual = upper_bandwidth_setting(freq).unwrap().actual;
            assert!(actual >= previous, "{} Hz gave {} < {}", freq, actual, previous);
            previous = actual;
            freq *= 1.07;
        }
    }

    #[test]
    fn upper_bandwidth_rejects_garbage() {
        assert_matches!(upper_bandwidth_setting(0.0),
            Err(CalibrationError::InvalidFrequency(_)));
        assert_matches!(upper_bandwidth_setting(-10.0),
            Err(CalibrationError::InvalidFrequency(_)));
        assert_matches!(upper_bandwidth_setting(f64::NAN),
            Err(CalibrationError::InvalidFrequency(_)));
    }

    #[test]
    fn upper_bandwidth_saturates() {
        // both ladders run out long before this
        let s = upper_bandwidth_setting(5.0).unwrap();
        assert_eq!((s.rh1_dac1, s.rh1_dac2), (RH1_DAC1_STEPS as u8, RH1_DAC2_STEPS as u8));
        assert_eq!((s.rh2_dac1, s.rh2_dac2), (RH2_DAC1_STEPS as u8, RH2_DAC2_STEPS as u8));
        assert!(s.actual > 5.0);
        assert_eq!(upper_bandwidth_setting(1.0).unwrap(), s);
    }

    #[test]
    fn lower_bandwidth_one_hertz() {
        let s = lower_bandwidth_setting(1.0).unwrap();
        assert_eq!((s.rl_dac1, s.rl_dac2, s.rl_dac3), (44, 6, 0));
        assert!(s.actual > 0.9 && s.actual < 1.2);
    }

    #[test]
    fn lower_bandwidth_extension_bit() {
        let s = lower_bandwidth_setting(0.1).unwrap();
        assert_eq!(s.rl_dac3, 1);

        let s = lower_bandwidth_setting(10.0).unwrap();
        assert_eq!(s.rl_dac3, 0);
    }

    #[test]
    fn lower_bandwidth_unreachable() {
        assert_matches!(lower_bandwidth_setting(0.01),
            Err(CalibrationError::Unreachable { .. }));
        assert_matches!(lower_bandwidth_setting(0.0),
            Err(CalibrationError::InvalidFrequency(_)));
    }

    #[test]
    fn lower_bandwidth_is_clamped() {
        assert_eq!(lower_bandwidth_setting(5000.0).unwrap(),
            lower_bandwidth_setting(MAX_LOWER_BANDWIDTH).unwrap());
    }

    #[test]
    fn rl_fit_floor() {
        // below 5.1 kΩ the fit is pinned
        assert_eq!(lower_bandwidth_from_rl(1000.0), lower_bandwidth_from_rl(5100.0));
    }

    #[test]
    fn dsp_cutoff_lookup() {
        let table = dsp_cutoff_table(30000.0);
        assert_eq!(table[0], 0.0);
        assert!((table[1] - 3309.5).abs() < 1.0);

        let (code, actual) = dsp_cutoff_code(1.0, 30000.0).unwrap();
        assert_eq!(code, 12);
        assert!((actual - 1.1658).abs() < 1e-3);

        // clamping
        assert_eq!(dsp_cutoff_code(10000.0, 30000.0).unwrap().0, 1);
        assert_eq!(dsp_cutoff_code(0.001, 30000.0).unwrap().0, 15);
        assert_matches!(dsp_cutoff_code(-1.0, 30000.0),
            Err(CalibrationError::InvalidFrequency(_)));
    }

    #[test]
    fn stim_step_recovers_itself() {
        for step in StimStepSize::ALL.iter() {
            if *step == StimStepSize::Min || *step == StimStepSize::Max {
                assert!(step.to_amps().is_nan());
                continue;
            }
            assert_eq!(StimStepSize::nearest(step.to_amps(), 0.01), Some(*step));
        }
    }

    #[test]
    fn current_limit_recovers_itself() {
        for limit in ChargeRecoveryCurrentLimit::ALL.iter() {
            if limit.to_amps().is_nan() {
                continue;
            }
            assert_eq!(ChargeRecoveryCurrentLimit::nearest(limit.to_amps(), 0.01),
                Some(*limit));
        }
        assert!(ChargeRecoveryCurrentLimit::Max.to_amps().is_nan());
    }

    #[test]
    fn stim_step_registers() {
        let regs = StimStepSize::Step1uA.registers();
        assert_eq!(regs, StimStepRegisters { sel1: 98, sel2: 1, sel3: 0, pbias: 10, nbias: 10 });
    }

    #[test]
    fn magnitude_codes() {
        assert_eq!(StimStepSize::Step1uA.magnitude_for(25.0e-6).unwrap(), 25);
        assert_eq!(StimStepSize::Step1uA.magnitude_for(-25.0e-6).unwrap(), 25);
        assert_eq!(StimStepSize::Step1uA.magnitude_for(1.0).unwrap(), 255);
        assert_matches!(StimStepSize::Max.magnitude_for(1.0e-6),
            Err(CalibrationError::ImpreciseStep(StimStepSize::Max)));
    }

    #[test]
    fn charge_recovery_voltage() {
        assert_eq!(charge_recovery_dac(0.0).unwrap().0, 128);
        assert_eq!(charge_recovery_dac(10.0).unwrap().0, 255);
        assert_eq!(charge_recovery_dac(-10.0).unwrap().0, 0);
        let (code, actual) = charge_recovery_dac(0.1).unwrap();
        assert_eq!(code, 149);
        assert!((actual - 0.0988).abs() < 1e-3);
        assert_matches!(charge_recovery_dac(f64::NAN),
            Err(CalibrationError::InvalidVoltage(_)));
    }
}
