//! Stimulation sequencer programming for RHS controllers
//!
//! Each stimulation channel runs a small sequencer clocked at the sample
//! rate. After a trigger the sequencer counts ticks and fires the events
//! of its [`StimEventTable`] as the counter reaches them. When the counter
//! reaches [`StimEvent::RepeatStim`] with pulses remaining it jumps back
//! to [`StimEvent::StartStim`].

use log::{debug, warn};
use num_derive::FromPrimitive;
use thiserror::Error;

/// Event time that is never reached
pub const EVENT_NEVER: u16 = 65535;
/// Default end-of-sequence marker
pub const EVENT_END_DEFAULT: u16 = 65534;
/// Number of external trigger sources
pub const TRIGGER_SOURCES: u8 = 32;
/// Largest number of pulses in one train
pub const MAX_PULSES: u16 = 256;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StimError {
    #[error("Trigger source {0} is outside 0..=31")]
    InvalidTriggerSource(u8),
    #[error("Pulse count {0} is outside 1..=256")]
    InvalidPulseCount(u16),
    #[error("Duration {name} = {value} µs is invalid")]
    InvalidDuration { name: &'static str, value: f64 },
    #[error("Invalid sample rate: {0} Hz")]
    InvalidSampleRate(f64),
    #[error("Charge recovery ends ({off} µs) before it starts ({on} µs)")]
    ChargeRecoveryOrder { on: f64, off: f64 },
    #[error("{event:?} at {ticks} ticks does not fit in the sequencer")]
    Overflow { event: StimEvent, ticks: u64 },
}

/// Events of the per-channel stimulation sequencer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, FromPrimitive)]
pub enum StimEvent {
    AmpSettleOn = 0,
    AmpSettleOff,
    AmpSettleOnRepeat,
    AmpSettleOffRepeat,
    StartStim,
    StimPhase2,
    StimPhase3,
    EndStim,
    RepeatStim,
    ChargeRecoveryOn,
    ChargeRecoveryOff,
}

impl StimEvent {
    pub const COUNT: usize = 11;
}

/// Pulse shape
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
pub enum StimShape {
    Biphasic = 0,
    BiphasicWithInterphaseDelay = 1,
    Triphasic = 2,
}

/// Polarity of the first phase
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StimPolarity {
    NegativeFirst,
    PositiveFirst,
}

/// Trigger sensitivity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerType {
    Level = 0,
    Edge = 1,
}


/// Per-channel trigger register
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StimTrigger {
    source: u8,
    enabled: bool,
    trigger_type: TriggerType,
    active_low: bool,
}

impl StimTrigger {

    /// A disabled trigger on source 0
    pub const DISABLED: StimTrigger = StimTrigger {
        source: 0,
        enabled: false,
        trigger_type: TriggerType::Edge,
        active_low: false,
    };

    pub fn new(source: u8, enabled: bool, trigger_type: TriggerType, active_low: bool)
        -> Result<StimTrigger, StimError> {

        if source >= TRIGGER_SOURCES {
            warn!("Trigger source {} is outside 0..=31", source);
            return Err(StimError::InvalidTriggerSource(source));
        }

        Ok(StimTrigger { source, enabled, trigger_type, active_low })
    }

    /// Packed register value: `enabled<<7 | active_low<<6 | edge<<5 |
    /// source`
    pub fn register(&self) -> u16 {
        ((self.enabled as u16) << 7) |
            ((self.active_low as u16) << 6) |
            ((self.trigger_type as u16) << 5) |
            (self.source as u16)
    }
}


/// Per-channel pulse parameter register
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StimParams {
    pulses: u16,
    shape: StimShape,
    polarity: StimPolarity,
}

impl StimParams {

    pub const DEFAULT: StimParams = StimParams {
        pulses: 1,
        shape: StimShape::Biphasic,
        polarity: StimPolarity::NegativeFirst,
    };

    pub fn new(pulses: u16, shape: StimShape, polarity: StimPolarity) -> Result<StimParams, StimError> {
        if pulses == 0 || pulses > MAX_PULSES {
            warn!("Pulse count {} is outside 1..=256", pulses);
            return Err(StimError::InvalidPulseCount(pulses));
        }

        Ok(StimParams { pulses, shape, polarity })
    }

    /// Packed register value: `(pulses-1) | shape<<8 |
    /// negative_first<<10`
    ///
    /// ```
    /// use librhx::stim::{StimParams, StimShape, StimPolarity};
    ///
    /// let p = StimParams::new(10, StimShape::Triphasic, StimPolarity::NegativeFirst).unwrap();
    /// assert_eq!(p.register(), 9 | (2 << 8) | (1 << 10));
    /// ```
    pub fn register(&self) -> u16 {
        (self.pulses - 1) |
            ((self.shape as u16) << 8) |
            (((self.polarity == StimPolarity::NegativeFirst) as u16) << 10)
    }
}


/// Event times of one channel, in sample ticks after the trigger
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StimEventTable {
    events: [u16; StimEvent::COUNT],
    end: u16,
}

impl Default for StimEventTable {
    fn default() -> Self {
        StimEventTable { events: [EVENT_NEVER; StimEvent::COUNT], end: EVENT_END_DEFAULT }
    }
}

impl StimEventTable {

    pub fn get(&self, event: StimEvent) -> u16 {
        self.events[event as usize]
    }

    /// Tick at which the sequence ends and the channel re-arms
    pub fn end(&self) -> u16 {
        self.end
    }

    /// Event times in sequencer order, `end` last
    pub fn as_array(&self) -> [u16; StimEvent::COUNT + 1] {
        let mut out = [EVENT_NEVER; StimEvent::COUNT + 1];
        out[..StimEvent::COUNT].copy_from_slice(&self.events);
        out[StimEvent::COUNT] = self.end;
        out
    }

    fn set(&mut self, event: StimEvent, ticks: u64) -> Result<(), StimError> {
        if ticks >= EVENT_END_DEFAULT as u64 {
            warn!("{:?} at {} ticks does not fit in the sequencer", event, ticks);
            return Err(StimError::Overflow { event, ticks });
        }
        self.events[event as usize] = ticks as u16;
        Ok(())
    }
}


/// Complete description of a stimulation waveform. Durations are in
/// microseconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StimWaveform {
    pub shape: StimShape,
    pub polarity: StimPolarity,
    pub first_phase: f64,
    pub second_phase: f64,
    pub interphase_delay: f64,
    pub pulses: u16,
    pub pulse_train_period: f64,
    pub post_trigger_delay: f64,
    pub refractory_period: f64,
    pub enable_amp_settle: bool,
    pub pre_stim_amp_settle: f64,
    pub post_stim_amp_settle: f64,
    pub maintain_amp_settle: bool,
    pub enable_charge_recovery: bool,
    pub post_stim_charge_recovery_on: f64,
    pub post_stim_charge_recovery_off: f64,
}

impl Default for StimWaveform {
    fn default() -> Self {
        StimWaveform {
            shape: StimShape::Biphasic,
            polarity: StimPolarity::NegativeFirst,
            first_phase: 100.0,
            second_phase: 100.0,
            interphase_delay: 100.0,
            pulses: 1,
            pulse_train_period: 10000.0,
            post_trigger_delay: 0.0,
            refractory_period: 1000.0,
            enable_amp_settle: true,
            pre_stim_amp_settle: 0.0,
            post_stim_amp_settle: 0.0,
            maintain_amp_settle: false,
            enable_charge_recovery: false,
            post_stim_charge_recovery_on: 0.0,
            post_stim_charge_recovery_off: 0.0,
        }
    }
}

// Each duration must fit in the sequencer range on its own
fn to_ticks(name: &'static str, event: StimEvent, micros: f64, sample_rate: f64)
    -> Result<u64, StimError> {

    if !micros.is_finite() || micros < 0.0 {
        warn!("Duration {} = {} µs is invalid", name, micros);
        return Err(StimError::InvalidDuration { name, value: micros });
    }

    let ticks = (micros * sample_rate / 1.0e6).round();
    if ticks > EVENT_END_DEFAULT as f64 {
        warn!("Duration {} = {} µs does not fit in the sequencer", name, micros);
        return Err(StimError::Overflow { event, ticks: ticks as u64 });
    }

    Ok(ticks as u64)
}

impl StimWaveform {

    /// Pulse parameter register for this waveform
    pub fn params(&self) -> Result<StimParams, StimError> {
        StimParams::new(self.pulses, self.shape, self.polarity)
    }

    /// Convert the waveform into sequencer event times at `sample_rate`.
    /// Events the waveform does not use stay at [`EVENT_NEVER`].
    ///
    /// ```
    /// use librhx::stim::{StimWaveform, StimEvent};
    ///
    /// let table = StimWaveform::default().to_events(30000.0).unwrap();
    /// assert_eq!(table.get(StimEvent::StartStim), 0);
    /// assert_eq!(table.get(StimEvent::StimPhase2), 3);
    /// assert_eq!(table.get(StimEvent::EndStim), 6);
    /// assert_eq!(table.get(StimEvent::RepeatStim), 65535);
    /// ```
    pub fn to_events(&self, sample_rate: f64) -> Result<StimEventTable, StimError> {

        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(StimError::InvalidSampleRate(sample_rate));
        }

        self.params()?;

        let t = |name, event, us| to_ticks(name, event, us, sample_rate);
        use StimEvent::*;

        let first = t("first phase", StimPhase2, self.first_phase)?;
        let second = t("second phase", EndStim, self.second_phase)?;
        let interphase = t("interphase delay", StimPhase3, self.interphase_delay)?;
        let period = t("pulse train period", RepeatStim, self.pulse_train_period)?;
        let delay = t("post trigger delay", StartStim, self.post_trigger_delay)?;
        let refractory = t("refractory period", EndStim, self.refractory_period)?;
        let settle_pre = t("pre-stim amp settle", AmpSettleOn, self.pre_stim_amp_settle)?;
        let settle_post = t("post-stim amp settle", AmpSettleOff, self.post_stim_amp_settle)?;
        let recovery_on = t("charge recovery on", ChargeRecoveryOn,
            self.post_stim_charge_recovery_on)?;
        let recovery_off = t("charge recovery off", ChargeRecoveryOff,
            self.post_stim_charge_recovery_off)?;

        let mut table = StimEventTable::default();

        let start = delay;
        let phase2 = start + first;
        let end_stim = match self.shape {
            StimShape::Biphasic => phase2 + second,
            StimShape::BiphasicWithInterphaseDelay => {
                let phase3 = phase2 + interphase;
                table.set(StimEvent::StimPhase3, phase3)?;
                phase3 + second
            },
            StimShape::Triphasic => {
                let phase3 = phase2 + second;
                table.set(StimEvent::StimPhase3, phase3)?;
                phase3 + first
            }
        };

        table.set(StimEvent::StartStim, start)?;
        table.set(StimEvent::StimPhase2, phase2)?;
        table.set(StimEvent::EndStim, end_stim)?;

        let repeat = if self.pulses > 1 {
            let repeat = start + period;
            table.set(StimEvent::RepeatStim, repeat)?;
            Some(repeat)
        } else {
            None
        };

        if self.enable_amp_settle {
            table.set(StimEvent::AmpSettleOn, start.saturating_sub(settle_pre))?;
            table.set(StimEvent::AmpSettleOff, end_stim + settle_post)?;
            if let (Some(repeat), false) = (repeat, self.maintain_amp_settle) {
                table.set(StimEvent::AmpSettleOnRepeat, repeat.saturating_sub(settle_pre))?;
                table.set(StimEvent::AmpSettleOffRepeat, end_stim + settle_post)?;
            }
        }

        if self.enable_charge_recovery {
            if recovery_off < recovery_on {
                warn!("Charge recovery ends before it starts");
                return Err(StimError::ChargeRecoveryOrder {
                    on: self.post_stim_charge_recovery_on,
                    off: self.post_stim_charge_recovery_off
                });
            }
            table.set(StimEvent::ChargeRecoveryOn, end_stim + recovery_on)?;
            table.set(StimEvent::ChargeRecoveryOff, end_stim + recovery_off)?;
        }

        let last = table.events.iter()
            .filter(|e| **e != EVENT_NEVER)
            .map(|e| *e as u64)
            .max()
            .unwrap_or(0);
        let end = last + refractory;
        if end > EVENT_END_DEFAULT as u64 {
            warn!("Sequence end at {} ticks does not fit in the sequencer", end);
            return Err(StimError::Overflow { event: StimEvent::EndStim, ticks: end });
        }
        table.end = end as u16;

        debug!("Stim events at {} Hz: {:?}, end {}", sample_rate, table.events, table.end);

        Ok(table)
    }
}


/// Trigger, pulse parameters and event times of one stimulation channel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StimProgram {
    pub trigger: StimTrigger,
    pub params: StimParams,
    pub events: StimEventTable,
}

impl Default for StimProgram {
    fn default() -> Self {
        StimProgram {
            trigger: StimTrigger::DISABLED,
            params: StimParams::DEFAULT,
            events: StimEventTable::default(),
        }
    }
}

impl StimProgram {

    /// Build the program of a channel triggered by `trigger` and
    /// producing `waveform`.
    pub fn from_waveform(trigger: StimTrigger, waveform: &StimWaveform, sample_rate: f64)
        -> Result<StimProgram, StimError> {

        Ok(StimProgram {
            trigger,
            params: waveform.params()?,
            events: waveform.to_events(sample_rate)?,
        })
    }
}


#[cfg(test)]
mod tests {

    use super::*;
    use assert_matches::assert_matches;
    use num_traits::FromPrimitive;

    #[test]
    fn trigger_register() {
        let trig = StimTrigger::new(5, true, TriggerType::Edge, true).unwrap();
        assert_eq!(trig.register(), 0x80 | 0x40 | 0x20 | 5);

        let trig = StimTrigger::new(31, false, TriggerType::Level, false).unwrap();
        assert_eq!(trig.register(), 31);

        assert_matches!(StimTrigger::new(32, true, TriggerType::Edge, false),
            Err(StimError::InvalidTriggerSource(32)));
        assert_eq!(StimTrigger::DISABLED.register(), 0x20);
    }

    #[test]
    fn params_register() {
        let p = StimParams::new(1, StimShape::Biphasic, StimPolarity::PositiveFirst).unwrap();
        assert_eq!(p.register(), 0);

        let p = StimParams::new(256, StimShape::BiphasicWithInterphaseDelay,
            StimPolarity::NegativeFirst).unwrap();
        assert_eq!(p.register(), 255 | (1 << 8) | (1 << 10));

        assert_matches!(StimParams::new(0, StimShape::Biphasic, StimPolarity::NegativeFirst),
            Err(StimError::InvalidPulseCount(0)));
        assert_matches!(StimParams::new(257, StimShape::Biphasic, StimPolarity::NegativeFirst),
            Err(StimError::InvalidPulseCount(257)));
    }

    #[test]
    fn default_table() {
        let table = StimEventTable::default();
        for i in 0..StimEvent::COUNT {
            let event = StimEvent::from_usize(i).unwrap();
            assert_eq!(table.get(event), EVENT_NEVER);
        }
        assert_eq!(table.end(), EVENT_END_DEFAULT);
        assert_eq!(table.as_array()[StimEvent::COUNT], 65534);
    }

    #[test]
    fn biphasic_single_pulse() {
        let waveform = StimWaveform {
            post_trigger_delay: 1000.0,
            pre_stim_amp_settle: 200.0,
            post_stim_amp_settle: 500.0,
            ..StimWaveform::default()
        };
        let table = waveform.to_events(30000.0).unwrap();

        assert_eq!(table.get(StimEvent::StartStim), 30);
        assert_eq!(table.get(StimEvent::StimPhase2), 33);
        assert_eq!(table.get(StimEvent::StimPhase3), EVENT_NEVER);
        assert_eq!(table.get(StimEvent::EndStim), 36);
        assert_eq!(table.get(StimEvent::AmpSettleOn), 24);
        assert_eq!(table.get(StimEvent::AmpSettleOff), 51);
        assert_eq!(table.get(StimEvent::AmpSettleOnRepeat), EVENT_NEVER);
        assert_eq!(table.get(StimEvent::RepeatStim), EVENT_NEVER);
        assert_eq!(table.end(), 51 + 30);
    }

    #[test]
    fn triphasic_train() {
        let waveform = StimWaveform {
            shape: StimShape::Triphasic,
            pulses: 5,
            pulse_train_period: 1000.0,
            enable_charge_recovery: true,
            post_stim_charge_recovery_on: 100.0,
            post_stim_charge_recovery_off: 300.0,
            ..StimWaveform::default()
        };
        let table = waveform.to_events(30000.0).unwrap();

        assert_eq!(table.get(StimEvent::StimPhase3), 6);
        assert_eq!(table.get(StimEvent::EndStim), 9);
        assert_eq!(table.get(StimEvent::RepeatStim), 30);
        assert_eq!(table.get(StimEvent::AmpSettleOnRepeat), 30);
        assert_eq!(table.get(StimEvent::ChargeRecoveryOn), 12);
        assert_eq!(table.get(StimEvent::ChargeRecoveryOff), 18);
    }

    #[test]
    fn maintained_settle() {
        let waveform = StimWaveform {
            pulses: 3,
            maintain_amp_settle: true,
            ..StimWaveform::default()
        };
        let table = waveform.to_events(30000.0).unwrap();
        assert_eq!(table.get(StimEvent::AmpSettleOnRepeat), EVENT_NEVER);
        assert_eq!(table.get(StimEvent::AmpSettleOffRepeat), EVENT_NEVER);
    }

    #[test]
    fn invalid_waveforms() {
        let waveform = StimWaveform { post_trigger_delay: 3.0e6, ..StimWaveform::default() };
        assert_matches!(waveform.to_events(30000.0), Err(StimError::Overflow { .. }));

        let waveform = StimWaveform { first_phase: -1.0, ..StimWaveform::default() };
        assert_matches!(waveform.to_events(30000.0),
            Err(StimError::InvalidDuration { name: "first phase", .. }));

        let waveform = StimWaveform {
            enable_charge_recovery: true,
            post_stim_charge_recovery_on: 500.0,
            post_stim_charge_recovery_off: 100.0,
            ..StimWaveform::default()
        };
        assert_matches!(waveform.to_events(30000.0), Err(StimError::ChargeRecoveryOrder { .. }));

        let waveform = StimWaveform { pulses: 0, ..StimWaveform::default() };
        assert_matches!(waveform.to_events(30000.0), Err(StimError::InvalidPulseCount(0)));

        assert_matches!(StimWaveform::default().to_events(0.0), Err(StimError::InvalidSampleRate(_)));
    }

    #[test]
    fn huge_durations() {
        let waveform = StimWaveform { first_phase: 1e300, ..StimWaveform::default() };
        assert_matches!(waveform.to_events(30000.0),
            Err(StimError::Overflow { event: StimEvent::StimPhase2, .. }));

        let waveform = StimWaveform { refractory_period: f64::MAX, ..StimWaveform::default() };
        assert_matches!(waveform.to_events(30000.0),
            Err(StimError::Overflow { event: StimEvent::EndStim, .. }));

        let waveform = StimWaveform {
            enable_charge_recovery: true,
            post_stim_charge_recovery_on: 0.0,
            post_stim_charge_recovery_off: 1e20,
            ..StimWaveform::default()
        };
        assert_matches!(waveform.to_events(30000.0),
            Err(StimError::Overflow { event: StimEvent::ChargeRecoveryOff, .. }));

        // each phase fits on its own, their sum does not
        let waveform = StimWaveform {
            first_phase: 2.0e6,
            second_phase: 2.0e6,
            ..StimWaveform::default()
        };
        assert_matches!(waveform.to_events(30000.0), Err(StimError::Overflow { .. }));
    }
}
