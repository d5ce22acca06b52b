//! Board-level state of an acquisition controller
//!
//! The [`Board`] tracks everything that is not a chip register: sample
//! rate, enabled data streams, per-port cable delays, auxiliary command
//! bank selection, analog output routing and (on stimulation
//! controllers) the per-channel stim sequencer programs. It also maps
//! channel names such as `"B-017"` onto the (stream, channel) address of
//! the sample in the data the controller returns.

use std::collections::HashMap;
use std::fmt;

use bitvec::prelude::{BitArray, Lsb0};
use log::{debug, warn};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use thiserror::Error;

use crate::registers::ChipFamily;
use crate::stim::{StimProgram, StimError};

/// FPGA reference clock in Hz
pub const FPGA_CLOCK: f64 = 100.0e6;
/// Clock cycles per sample period
pub const CYCLES_PER_SAMPLE: f64 = 2800.0;

/// Propagation velocity of the SPI cable in m/s
pub const CABLE_VELOCITY: f64 = 0.555 * 2.99792458e8;
const XILINX_LVDS_OUTPUT_DELAY: f64 = 1.9e-9;
const CHIP_DELAY: f64 = 9.0e-9;
const XILINX_LVDS_INPUT_DELAY: f64 = 1.4e-9;
const MISO_SETTLE_TIME: f64 = 6.7e-9;
const FIXED_DELAY: f64 = XILINX_LVDS_OUTPUT_DELAY + CHIP_DELAY + XILINX_LVDS_INPUT_DELAY +
    MISO_SETTLE_TIME;

/// Largest cable delay the FPGA accepts
pub const MAX_CABLE_DELAY: u8 = 15;
/// Cable length assumed until the caller sets one, in feet
pub const DEFAULT_CABLE_LENGTH_FEET: f64 = 3.0;
const METERS_PER_FOOT: f64 = 0.3048;

/// Number of auxiliary command banks per slot
pub const AUX_COMMAND_BANKS: u8 = 16;
/// Number of analog output DACs
pub const NUM_DACS: usize = 8;
/// Largest DAC threshold in µV
pub const DAC_THRESHOLD_LIMIT: i32 = 6389;

/// Enabled-stream mask; bit `n` enables stream `n`
pub type StreamMask = BitArray<[u32; 1], Lsb0>;


#[derive(Error, Debug, Clone, PartialEq)]
pub enum BoardError {
    #[error("Board has not been reset")]
    NotReset,
    #[error("Sample rate has not been set")]
    SampleRateUnset,
    #[error("Stream {stream} exceeds maximum of {max}")]
    InvalidStream { stream: usize, max: usize },
    #[error("Channel {channel} exceeds maximum of {max}")]
    InvalidChannel { channel: usize, max: usize },
    #[error("Port {port:?} does not exist on {controller:?}")]
    InvalidPort { port: BoardPort, controller: ControllerType },
    #[error("Cable delay {0} is outside 1..=15")]
    InvalidCableDelay(u8),
    #[error("Cable length {0} m is invalid")]
    InvalidCableLength(f64),
    #[error("Invalid sample rate: {0} Hz")]
    InvalidSampleRate(f64),
    #[error("Auxiliary command slot {0} does not exist")]
    InvalidAuxSlot(usize),
    #[error("Auxiliary command bank {0} is outside 0..=15")]
    InvalidBank(u8),
    #[error("Command list length {length} is outside 1..={max}")]
    InvalidCommandLength { length: usize, max: usize },
    #[error("DAC {0} does not exist")]
    InvalidDac(usize),
    #[error("DAC threshold {0} µV is out of range")]
    InvalidDacThreshold(i32),
    #[error("DAC {setting} value {value} is out of range")]
    InvalidDacSetting { setting: &'static str, value: u8 },
    #[error("Data source {0:?} is assigned to more than one stream")]
    DuplicateDataSource(DataSource),
    #[error("{setting} is not supported by {controller:?}")]
    NotSupported { setting: &'static str, controller: ControllerType },
    #[error("Stimulation error: {0}")]
    Stim(#[from] StimError),
}

fn fail(err: BoardError) -> BoardError {
    warn!("{}", err);
    err
}


/// Per-channel sample rates supported by the controllers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, FromPrimitive)]
pub enum SampleRate {
    S1000 = 0,
    S1250,
    S1500,
    S2000,
    S2500,
    S3000,
    S3333,
    S4000,
    S5000,
    S6250,
    S8000,
    S10000,
    S12500,
    S15000,
    S20000,
    S25000,
    S30000,
}

struct SampleRateInfo {
    name: &'static str,
    m: u32,
    d: u32,
}

lazy_static! {
    static ref SAMPLE_RATE_TABLE: HashMap<SampleRate, SampleRateInfo> = {
        use SampleRate::*;
        let info = |name, m, d| SampleRateInfo { name, m, d };

        let mut map = HashMap::new();
        map.insert(S1000, info("1.00 kS/s", 7, 125));
        map.insert(S1250, info("1.25 kS/s", 7, 100));
        map.insert(S1500, info("1.50 kS/s", 21, 250));
        map.insert(S2000, info("2.00 kS/s", 14, 125));
        map.insert(S2500, info("2.50 kS/s", 35, 250));
        map.insert(S3000, info("3.00 kS/s", 21, 125));
        map.insert(S3333, info("3.33 kS/s", 14, 75));
        map.insert(S4000, info("4.00 kS/s", 28, 125));
        map.insert(S5000, info("5.00 kS/s", 7, 25));
        map.insert(S6250, info("6.25 kS/s", 7, 20));
        map.insert(S8000, info("8.00 kS/s", 112, 250));
        map.insert(S10000, info("10.0 kS/s", 14, 25));
        map.insert(S12500, info("12.5 kS/s", 7, 10));
        map.insert(S15000, info("15.0 kS/s", 21, 25));
        map.insert(S20000, info("20.0 kS/s", 28, 25));
        map.insert(S25000, info("25.0 kS/s", 35, 25));
        map.insert(S30000, info("30.0 kS/s", 42, 25));
        map
    };
}

impl SampleRate {

    pub const COUNT: usize = 17;

    /// All rates in ascending order
    pub fn all() -> impl Iterator<Item=SampleRate> {
        (0..Self::COUNT).filter_map(SampleRate::from_usize)
    }

    /// Clock synthesizer multiplier
    pub fn multiplier(self) -> u32 {
        SAMPLE_RATE_TABLE[&self].m
    }

    /// Clock synthesizer divider
    pub fn divider(self) -> u32 {
        SAMPLE_RATE_TABLE[&self].d
    }

    /// Sample rate in Hz, `100 MHz · M / D / 2 / 2800`
    ///
    /// ```
    /// use librhx::board::SampleRate;
    ///
    /// assert_eq!(SampleRate::S30000.hz(), 30000.0);
    /// assert!((SampleRate::S3333.hz() - 3333.33).abs() < 0.01);
    /// ```
    pub fn hz(self) -> f64 {
        FPGA_CLOCK * self.multiplier() as f64 / self.divider() as f64 / 2.0 / CYCLES_PER_SAMPLE
    }

    /// The supported rate closest to `hz`
    pub fn nearest(hz: f64) -> SampleRate {
        let mut best = SampleRate::S30000;
        let mut diff = f64::MAX;
        for rate in Self::all() {
            let d = (rate.hz() - hz).abs();
            if d < diff {
                diff = d;
                best = rate;
            }
        }
        best
    }
}

impl fmt::Display for SampleRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", SAMPLE_RATE_TABLE[self].name)
    }
}


/// Headstage connector
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, FromPrimitive)]
pub enum BoardPort {
    A = 0, B, C, D, E, F, G, H,
}

impl BoardPort {

    pub const ALL: [BoardPort; 8] = [
        BoardPort::A, BoardPort::B, BoardPort::C, BoardPort::D,
        BoardPort::E, BoardPort::F, BoardPort::G, BoardPort::H,
    ];

    pub fn from_letter(c: char) -> Option<BoardPort> {
        if !c.is_ascii_uppercase() {
            return None;
        }
        BoardPort::from_u32(c as u32 - 'A' as u32)
    }

    pub fn letter(self) -> char {
        (b'A' + self as u8) as char
    }
}


/// Controller variants
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControllerType {
    /// USB2 recording controller, RHD chips, dynamically assigned streams
    RecordUsb2,
    /// USB3 recording controller, RHD chips, four streams per port
    RecordUsb3,
    /// Stimulation/recording controller, RHS chips, two streams per port
    StimRecord,
}

impl ControllerType {

    pub fn family(self) -> ChipFamily {
        match self {
            ControllerType::StimRecord => ChipFamily::Rhs,
            _ => ChipFamily::Rhd,
        }
    }

    pub fn max_streams(self) -> usize {
        match self {
            ControllerType::RecordUsb3 => 32,
            _ => 8,
        }
    }

    pub fn num_ports(self) -> usize {
        match self {
            ControllerType::RecordUsb3 => 8,
            _ => 4,
        }
    }

    pub fn streams_per_port(self) -> usize {
        match self {
            ControllerType::StimRecord => 2,
            _ => 4,
        }
    }

    pub fn channels_per_stream(self) -> usize {
        self.family().channels_per_stream()
    }

    /// Number of auxiliary command slots per port
    pub fn aux_slots(self) -> usize {
        match self {
            ControllerType::StimRecord => 4,
            _ => 3,
        }
    }

    /// Auxiliary command list length installed by the default sequence
    pub fn default_aux_command_length(self) -> usize {
        match self {
            ControllerType::StimRecord => 128,
            _ => 60,
        }
    }

    fn check_port(self, port: BoardPort) -> Result<(), BoardError> {
        if port as usize >= self.num_ports() {
            return Err(fail(BoardError::InvalidPort { port, controller: self }));
        }
        Ok(())
    }

    // Physical data source feeding each stream
    fn stream_source(self, stream: usize, table: &DataSourceTable) -> Option<DataSource> {
        match self {
            ControllerType::RecordUsb2 => table.get(stream),
            ControllerType::RecordUsb3 => {
                let port = BoardPort::from_usize(stream / 4)?;
                let k = stream % 4;
                Some(DataSource { port, miso: Miso::from_usize(k / 2)?, ddr: k % 2 == 1 })
            },
            ControllerType::StimRecord => {
                let port = BoardPort::from_usize(stream / 2)?;
                Some(DataSource { port, miso: Miso::from_usize(stream % 2)?, ddr: false })
            },
        }
    }
}


/// Return data line of a port
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, FromPrimitive)]
pub enum Miso {
    Miso1 = 0,
    Miso2 = 1,
}

/// Physical origin of a data stream
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DataSource {
    pub port: BoardPort,
    pub miso: Miso,
    pub ddr: bool,
}

impl DataSource {

    /// Numeric tag `port·2 + miso + 8·ddr`. The second chip of a port
    /// carries the tag of the first one plus one.
    pub fn tag(&self) -> u8 {
        (self.port as u8) * 2 + (self.miso as u8) + if self.ddr { 8 } else { 0 }
    }

    /// Inverse of [`tag`][`DataSource::tag`] for ports A to D
    pub fn from_tag(tag: u8) -> Option<DataSource> {
        if tag > 15 {
            return None;
        }
        let base = tag % 8;
        Some(DataSource {
            port: BoardPort::from_u8(base / 2)?,
            miso: Miso::from_u8(base % 2)?,
            ddr: tag >= 8,
        })
    }
}


/// Assignment of data sources to the eight streams of a USB2 controller
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataSourceTable {
    sources: [DataSource; 8],
}

impl Default for DataSourceTable {
    /// Stream `n` reads data source tag `n`: A1, A2, B1, B2 and so on
    fn default() -> Self {
        let mut sources = [DataSource { port: BoardPort::A, miso: Miso::Miso1, ddr: false }; 8];
        for (idx, src) in sources.iter_mut().enumerate() {
            src.port = BoardPort::ALL[idx / 2];
            src.miso = if idx % 2 == 0 { Miso::Miso1 } else { Miso::Miso2 };
        }
        DataSourceTable { sources }
    }
}

impl DataSourceTable {

    /// Build a table, rejecting ports beyond D and sources used twice
    pub fn new(sources: [DataSource; 8]) -> Result<DataSourceTable, BoardError> {
        for (idx, src) in sources.iter().enumerate() {
            ControllerType::RecordUsb2.check_port(src.port)?;
            if sources[..idx].contains(src) {
                return Err(fail(BoardError::DuplicateDataSource(*src)));
            }
        }
        Ok(DataSourceTable { sources })
    }

    pub fn get(&self, stream: usize) -> Option<DataSource> {
        self.sources.get(stream).copied()
    }

    fn set(&mut self, stream: usize, source: DataSource) -> Result<(), BoardError> {
        ControllerType::RecordUsb2.check_port(source.port)?;
        match self.sources.get_mut(stream) {
            Some(slot) => { *slot = source; Ok(()) },
            None => Err(fail(BoardError::InvalidStream { stream, max: 7 }))
        }
    }
}


/// Address of one sample within the returned data. Name resolution
/// failures yield [`StreamChannel::NOT_FOUND`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamChannel {
    pub stream: i32,
    pub channel: i32,
}

impl StreamChannel {
    pub const NOT_FOUND: StreamChannel = StreamChannel { stream: -1, channel: -1 };

    pub fn is_found(&self) -> bool {
        *self != Self::NOT_FOUND
    }
}

/// What a channel name refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaveKind {
    /// Amplifier channel numbered from 0 across the port
    Amplifier(u16),
    /// Auxiliary input 1 to 6; 4 to 6 belong to the port's second chip
    Aux(u8),
}

/// Parsed channel name such as `"A-005"` or `"C-AUX2"`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaveName {
    pub port: BoardPort,
    pub kind: WaveKind,
}

impl WaveName {

    pub fn parse(name: &str) -> Option<WaveName> {
        let mut parts = name.splitn(2, '-');
        let prefix = parts.next()?;
        let rest = parts.next()?;

        let mut letters = prefix.chars();
        let port = BoardPort::from_letter(letters.next()?)?;
        if letters.next().is_some() {
            return None;
        }

        let kind = if let Some(aux) = rest.strip_prefix("AUX") {
            if aux.len() != 1 {
                return None;
            }
            let n = aux.parse::<u8>().ok()?;
            if !(1..=6).contains(&n) {
                return None;
            }
            WaveKind::Aux(n)
        } else {
            if rest.len() != 3 || !rest.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            WaveKind::Amplifier(rest.parse::<u16>().ok()?)
        };

        Some(WaveName { port, kind })
    }
}

/// Resolve a channel name into its (stream, channel) address within the
/// returned data, where streams are numbered densely over the enabled
/// ones only.
///
/// The first enabled stream fed by the named port anchors the search.
/// Amplifier channels are counted across the enabled streams of the
/// contiguous run of streams belonging to that port (at most
/// [`ControllerType::streams_per_port`]). AUX1 to AUX3 come from the
/// anchor stream; AUX4 to AUX6 come from the second chip, found one or
/// two streams after the anchor with the anchor's data source tag plus
/// one. RHS chips have no auxiliary inputs.
///
/// ```
/// use librhx::board::{stream_channel_from_wave_name, ControllerType, DataSourceTable,
///     StreamChannel, StreamMask};
///
/// let mut enabled = StreamMask::ZERO;
/// enabled.set(0, true);
/// enabled.set(1, true);
/// let table = DataSourceTable::default();
///
/// let addr = stream_channel_from_wave_name(ControllerType::RecordUsb2, &table, &enabled, "A-AUX5");
/// assert_eq!(addr, StreamChannel { stream: 1, channel: 1 });
/// ```
pub fn stream_channel_from_wave_name(controller: ControllerType, table: &DataSourceTable,
    enabled: &StreamMask, name: &str) -> StreamChannel {

    let result = resolve(controller, table, enabled, name);

    match result {
        Some((physical, channel)) => {
            let addr = StreamChannel {
                stream: enabled[..physical].count_ones() as i32,
                channel: channel as i32,
            };
            debug!("{} → stream {} (physical {}), channel {}", name, addr.stream, physical,
                addr.channel);
            addr
        },
        None => {
            debug!("{} does not resolve on {:?}", name, controller);
            StreamChannel::NOT_FOUND
        }
    }
}

fn resolve(controller: ControllerType, table: &DataSourceTable, enabled: &StreamMask, name: &str)
    -> Option<(usize, usize)> {

    let wave = WaveName::parse(name)?;
    if wave.port as usize >= controller.num_ports() {
        return None;
    }

    let max = controller.max_streams();
    let is_enabled = |s: usize| s < max && enabled.get(s).map(|b| *b).unwrap_or(false);
    let source = |s: usize| controller.stream_source(s, table);

    let begin = (0..max).find(|s| {
        is_enabled(*s) && source(*s).map(|src| src.port == wave.port).unwrap_or(false)
    })?;
    let begin_source = source(begin)?;

    match wave.kind {
        WaveKind::Aux(aux) => {
            if controller.family() != ChipFamily::Rhd {
                return None;
            }
            if controller == ControllerType::RecordUsb3 {
                // fixed layout: AUX 1-3 on MISO1, AUX 4-6 on MISO2
                let offset = if aux < 4 { 0 } else { 2 };
                let stream = wave.port as usize * controller.streams_per_port() + offset;
                if !is_enabled(stream) {
                    return None;
                }
                return Some((stream, ((aux - 1) % 3) as usize));
            }
            if aux < 4 {
                return Some((begin, (aux - 1) as usize));
            }
            (begin+1..=begin+2)
                .filter(|s| is_enabled(*s))
                .find(|s| source(*s).map(|src| {
                    src.port == wave.port && src.tag() == begin_source.tag() + 1
                }).unwrap_or(false))
                .map(|s| (s, (aux - 4) as usize))
        },
        WaveKind::Amplifier(channel) => {
            let per_stream = controller.channels_per_stream();
            let run = (begin..max)
                .take(controller.streams_per_port())
                .take_while(|s| source(*s).map(|src| src.port == wave.port).unwrap_or(false));

            run.filter(|s| is_enabled(*s))
                .nth(channel as usize / per_stream)
                .map(|s| (s, channel as usize % per_stream))
        }
    }
}


/// Cable delay for a cable of `meters` at `sample_rate`, at least 1.
/// Delays beyond [`MAX_CABLE_DELAY`] are clamped.
///
/// ```
/// use librhx::board::cable_delay;
///
/// assert_eq!(cable_delay(0.0, 30000.0).unwrap(), 3);
/// ```
pub fn cable_delay(meters: f64, sample_rate: f64) -> Result<u8, BoardError> {
    if !meters.is_finite() || meters < 0.0 {
        return Err(fail(BoardError::InvalidCableLength(meters)));
    }
    if !sample_rate.is_finite() || sample_rate <= 0.0 {
        return Err(fail(BoardError::InvalidSampleRate(sample_rate)));
    }

    let t_step = 1.0 / (CYCLES_PER_SAMPLE * sample_rate);
    let round_trip = 2.0 * meters / CABLE_VELOCITY + FIXED_DELAY;
    let delay = ((round_trip / t_step) + 1.0 + 0.5).floor();

    let delay = if delay < 1.0 {
        1
    } else if delay > MAX_CABLE_DELAY as f64 {
        warn!("Cable of {} m needs delay {}; clamped to {}", meters, delay, MAX_CABLE_DELAY);
        MAX_CABLE_DELAY
    } else {
        delay as u8
    };

    Ok(delay)
}

/// Cable length in meters that the given delay compensates for
pub fn estimate_cable_length_meters(delay: u8, sample_rate: f64) -> f64 {
    let t_step = 1.0 / (CYCLES_PER_SAMPLE * sample_rate);
    let distance = CABLE_VELOCITY * ((delay as f64 - 1.0) * t_step - FIXED_DELAY);
    if distance < 0.0 { 0.0 } else { distance / 2.0 }
}

pub fn estimate_cable_length_feet(delay: u8, sample_rate: f64) -> f64 {
    estimate_cable_length_meters(delay, sample_rate) / METERS_PER_FOOT
}


/// What a stimulation channel does while recovering amplifiers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AmpSettleMode {
    /// Switch to the settle lower-bandwidth bank
    SwitchLowerBandwidth,
    /// Hold amplifier fast settle
    FastSettle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChargeRecoveryMode {
    CurrentLimited,
    Switch,
}

/// Routing of one analog output
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct DacConfig {
    pub enabled: bool,
    pub stream: u8,
    pub channel: u8,
    /// Threshold in µV
    pub threshold: i32,
    pub threshold_enabled: bool,
}


/// One board-level assignment
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BoardSetting {
    Reset,
    GlobalSettle(bool),
    AmpSettleMode(AmpSettleMode),
    ChargeRecoveryMode(ChargeRecoveryMode),
    SampleRate(SampleRate),
    AuxCommandBank { port: BoardPort, slot: usize, bank: u8 },
    AuxCommandLength { slot: usize, length: usize },
    ContinuousRun(bool),
    MaxTimeStep(u32),
    CableLengthMeters { port: BoardPort, meters: f64 },
    CableDelay { port: BoardPort, delay: u8 },
    DspSettle(bool),
    DataSource { stream: usize, source: DataSource },
    DisableAllStreams,
    EnableStream { stream: usize, enable: bool },
    ClearStimPrograms,
    StimProgram { stream: usize, channel: usize, program: StimProgram },
    Dac { dac: usize, config: DacConfig },
    DacGain(u8),
    DacNoiseSuppress(u8),
    TtlOutThresholdMode(bool),
    ExternalDigitalOut { port: BoardPort, enable: bool },
    TtlOut(u16),
}

/// The reset-time configuration of `controller`, in the order it must be
/// applied.
pub fn default_sequence(controller: ControllerType) -> Vec<BoardSetting> {
    let stim = controller == ControllerType::StimRecord;
    let ports = &BoardPort::ALL[..controller.num_ports()];
    let mut seq = vec![BoardSetting::Reset];

    if stim {
        seq.push(BoardSetting::GlobalSettle(false));
        seq.push(BoardSetting::AmpSettleMode(AmpSettleMode::SwitchLowerBandwidth));
        seq.push(BoardSetting::ChargeRecoveryMode(ChargeRecoveryMode::CurrentLimited));
    }

    seq.push(BoardSetting::SampleRate(SampleRate::S30000));

    for slot in 0..controller.aux_slots() {
        for port in ports {
            seq.push(BoardSetting::AuxCommandBank { port: *port, slot, bank: 0 });
        }
        seq.push(BoardSetting::AuxCommandLength {
            slot, length: controller.default_aux_command_length() });
    }

    seq.push(BoardSetting::ContinuousRun(true));
    seq.push(BoardSetting::MaxTimeStep(0));

    for port in ports {
        seq.push(BoardSetting::CableLengthMeters {
            port: *port, meters: DEFAULT_CABLE_LENGTH_FEET * METERS_PER_FOOT });
    }

    seq.push(BoardSetting::DspSettle(false));

    if controller == ControllerType::RecordUsb2 {
        let table = DataSourceTable::default();
        for stream in 0..controller.max_streams() {
            if let Some(source) = table.get(stream) {
                seq.push(BoardSetting::DataSource { stream, source });
            }
        }
    }

    seq.push(BoardSetting::DisableAllStreams);
    seq.push(BoardSetting::EnableStream { stream: 0, enable: true });

    if stim {
        seq.push(BoardSetting::ClearStimPrograms);
    }

    for dac in 0..NUM_DACS {
        seq.push(BoardSetting::Dac { dac, config: DacConfig::default() });
    }
    seq.push(BoardSetting::DacGain(0));
    seq.push(BoardSetting::DacNoiseSuppress(0));

    seq.push(BoardSetting::TtlOutThresholdMode(false));
    for port in ports {
        seq.push(BoardSetting::ExternalDigitalOut { port: *port, enable: false });
    }
    seq.push(BoardSetting::TtlOut(0));

    seq
}


/// Board-level state of one controller
#[derive(Clone, Debug)]
pub struct Board {
    controller: ControllerType,
    reset: bool,
    sample_rate: Option<SampleRate>,

    global_settle: bool,
    amp_settle_mode: AmpSettleMode,
    charge_recovery_mode: ChargeRecoveryMode,

    aux_command_banks: Vec<[u8; 4]>,
    aux_command_lengths: [usize; 4],
    continuous_run: bool,
    max_time_step: u32,

    cable_lengths: [f64; 8],
    cable_delays: [u8; 8],
    dsp_settle: bool,

    data_sources: DataSourceTable,
    enabled_streams: StreamMask,

    stim_programs: Vec<StimProgram>,

    dacs: [DacConfig; NUM_DACS],
    dac_gain: u8,
    dac_noise_suppress: u8,

    ttl_out_threshold_mode: bool,
    external_digital_out: [bool; 8],
    ttl_out: u16,
}

impl Board {

    /// A board in its power-on state; nothing is usable until a
    /// [`BoardSetting::Reset`] has been applied.
    pub fn new(controller: ControllerType) -> Board {
        Board {
            controller,
            reset: false,
            sample_rate: None,
            global_settle: false,
            amp_settle_mode: AmpSettleMode::SwitchLowerBandwidth,
            charge_recovery_mode: ChargeRecoveryMode::CurrentLimited,
            aux_command_banks: vec![[0; 4]; controller.num_ports()],
            aux_command_lengths: [0; 4],
            continuous_run: false,
            max_time_step: 0,
            cable_lengths: [0.0; 8],
            cable_delays: [1; 8],
            dsp_settle: false,
            data_sources: DataSourceTable::default(),
            enabled_streams: StreamMask::ZERO,
            stim_programs: Vec::new(),
            dacs: [DacConfig::default(); NUM_DACS],
            dac_gain: 0,
            dac_noise_suppress: 0,
            ttl_out_threshold_mode: false,
            external_digital_out: [false; 8],
            ttl_out: 0,
        }
    }

    /// Apply [`default_sequence`] in order
    pub fn initialize(&mut self) -> Result<(), BoardError> {
        for setting in default_sequence(self.controller) {
            self.apply(setting)?;
        }
        debug!("Board initialized for {:?}", self.controller);
        Ok(())
    }

    fn unsupported(&self, setting: &'static str) -> BoardError {
        fail(BoardError::NotSupported { setting, controller: self.controller })
    }

    fn require_stim(&self, setting: &'static str) -> Result<(), BoardError> {
        if self.controller != ControllerType::StimRecord {
            return Err(self.unsupported(setting));
        }
        Ok(())
    }

    fn check_stream(&self, stream: usize) -> Result<(), BoardError> {
        let max = self.controller.max_streams();
        if stream >= max {
            return Err(fail(BoardError::InvalidStream { stream, max: max - 1 }));
        }
        Ok(())
    }

    /// Apply one setting, validated against the current state
    pub fn apply(&mut self, setting: BoardSetting) -> Result<(), BoardError> {

        if setting == BoardSetting::Reset {
            *self = Board::new(self.controller);
            self.reset = true;
            return Ok(());
        }

        if !self.reset {
            return Err(fail(BoardError::NotReset));
        }

        match setting {
            BoardSetting::Reset => {},
            BoardSetting::GlobalSettle(enable) => {
                self.require_stim("Global settle")?;
                self.global_settle = enable;
            },
            BoardSetting::AmpSettleMode(mode) => {
                self.require_stim("Amplifier settle mode")?;
                self.amp_settle_mode = mode;
            },
            BoardSetting::ChargeRecoveryMode(mode) => {
                self.require_stim("Charge recovery mode")?;
                self.charge_recovery_mode = mode;
            },
            BoardSetting::SampleRate(rate) => self.set_sample_rate(rate)?,
            BoardSetting::AuxCommandBank { port, slot, bank } => {
                self.controller.check_port(port)?;
                if slot >= self.controller.aux_slots() {
                    return Err(fail(BoardError::InvalidAuxSlot(slot)));
                }
                if bank >= AUX_COMMAND_BANKS {
                    return Err(fail(BoardError::InvalidBank(bank)));
                }
                self.aux_command_banks[port as usize][slot] = bank;
            },
            BoardSetting::AuxCommandLength { slot, length } => {
                if slot >= self.controller.aux_slots() {
                    return Err(fail(BoardError::InvalidAuxSlot(slot)));
                }
                let max = self.controller.family().max_command_list_length();
                if length == 0 || length > max {
                    return Err(fail(BoardError::InvalidCommandLength { length, max }));
                }
                self.aux_command_lengths[slot] = length;
            },
            BoardSetting::ContinuousRun(enable) => self.continuous_run = enable,
            BoardSetting::MaxTimeStep(steps) => self.max_time_step = steps,
            BoardSetting::CableLengthMeters { port, meters } =>
                self.set_cable_length_meters(port, meters)?,
            BoardSetting::CableDelay { port, delay } => self.set_cable_delay(port, delay)?,
            BoardSetting::DspSettle(enable) => self.dsp_settle = enable,
            BoardSetting::DataSource { stream, source } => {
                if self.controller != ControllerType::RecordUsb2 {
                    return Err(self.unsupported("Data source assignment"));
                }
                self.data_sources.set(stream, source)?;
            },
            BoardSetting::DisableAllStreams => self.enabled_streams = StreamMask::ZERO,
            BoardSetting::EnableStream { stream, enable } => {
                self.check_stream(stream)?;
                self.enabled_streams.set(stream, enable);
            },
            BoardSetting::ClearStimPrograms => {
                self.require_stim("Stimulation programs")?;
                let count = self.controller.max_streams() * self.controller.channels_per_stream();
                self.stim_programs = vec![StimProgram::default(); count];
            },
            BoardSetting::StimProgram { stream, channel, program } =>
                self.set_stim_program(stream, channel, program)?,
            BoardSetting::Dac { dac, config } => self.set_dac(dac, config)?,
            BoardSetting::DacGain(gain) => {
                if gain > 7 {
                    return Err(fail(BoardError::InvalidDacSetting { setting: "gain", value: gain }));
                }
                self.dac_gain = gain;
            },
            BoardSetting::DacNoiseSuppress(level) => {
                if level > 127 {
                    return Err(fail(BoardError::InvalidDacSetting {
                        setting: "noise suppression", value: level }));
                }
                self.dac_noise_suppress = level;
            },
            BoardSetting::TtlOutThresholdMode(enable) => self.ttl_out_threshold_mode = enable,
            BoardSetting::ExternalDigitalOut { port, enable } => {
                self.controller.check_port(port)?;
                self.external_digital_out[port as usize] = enable;
            },
            BoardSetting::TtlOut(value) => self.ttl_out = value,
        }

        Ok(())
    }

    pub fn controller(&self) -> ControllerType {
        self.controller
    }

    pub fn sample_rate(&self) -> Option<SampleRate> {
        self.sample_rate
    }

    /// Change the sample rate and recompute every port's cable delay
    /// from its stored cable length.
    pub fn set_sample_rate(&mut self, rate: SampleRate) -> Result<(), BoardError> {
        let hz = rate.hz();
        let mut delays = self.cable_delays;
        for port in 0..self.controller.num_ports() {
            delays[port] = cable_delay(self.cable_lengths[port], hz)?;
        }

        self.sample_rate = Some(rate);
        self.cable_delays = delays;
        debug!("Board sample rate {}; cable delays {:?}", rate, &self.cable_delays[..]);

        Ok(())
    }

    /// Set the cable length of `port` and derive its delay
    pub fn set_cable_length_meters(&mut self, port: BoardPort, meters: f64)
        -> Result<(), BoardError> {

        self.controller.check_port(port)?;
        let rate = self.sample_rate.ok_or_else(|| fail(BoardError::SampleRateUnset))?;
        let delay = cable_delay(meters, rate.hz())?;

        self.cable_lengths[port as usize] = meters;
        self.cable_delays[port as usize] = delay;

        Ok(())
    }

    pub fn set_cable_length_feet(&mut self, port: BoardPort, feet: f64) -> Result<(), BoardError> {
        self.set_cable_length_meters(port, feet * METERS_PER_FOOT)
    }

    /// Set the delay of `port` directly. The stored cable length is
    /// updated to the length that delay compensates for.
    pub fn set_cable_delay(&mut self, port: BoardPort, delay: u8) -> Result<(), BoardError> {
        self.controller.check_port(port)?;
        if delay < 1 || delay > MAX_CABLE_DELAY {
            return Err(fail(BoardError::InvalidCableDelay(delay)));
        }
        let rate = self.sample_rate.ok_or_else(|| fail(BoardError::SampleRateUnset))?;

        self.cable_delays[port as usize] = delay;
        self.cable_lengths[port as usize] = estimate_cable_length_meters(delay, rate.hz());

        Ok(())
    }

    pub fn cable_delay(&self, port: BoardPort) -> u8 {
        self.cable_delays[port as usize]
    }

    pub fn cable_length_meters(&self, port: BoardPort) -> f64 {
        self.cable_lengths[port as usize]
    }

    pub fn enabled_streams(&self) -> &StreamMask {
        &self.enabled_streams
    }

    pub fn num_enabled_streams(&self) -> usize {
        self.enabled_streams.count_ones()
    }

    pub fn data_sources(&self) -> &DataSourceTable {
        &self.data_sources
    }

    pub fn aux_command_bank(&self, port: BoardPort, slot: usize) -> Option<u8> {
        self.aux_command_banks.get(port as usize).and_then(|b| b.get(slot)).copied()
    }

    pub fn aux_command_length(&self, slot: usize) -> Option<usize> {
        self.aux_command_lengths.get(slot).copied()
    }

    pub fn continuous_run(&self) -> bool {
        self.continuous_run
    }

    pub fn dsp_settle(&self) -> bool {
        self.dsp_settle
    }

    pub fn global_settle(&self) -> bool {
        self.global_settle
    }

    pub fn amp_settle_mode(&self) -> AmpSettleMode {
        self.amp_settle_mode
    }

    pub fn charge_recovery_mode(&self) -> ChargeRecoveryMode {
        self.charge_recovery_mode
    }

    pub fn dac(&self, dac: usize) -> Option<&DacConfig> {
        self.dacs.get(dac)
    }

    pub fn ttl_out(&self) -> u16 {
        self.ttl_out
    }

    /// Route analog output `dac`
    pub fn set_dac(&mut self, dac: usize, config: DacConfig) -> Result<(), BoardError> {
        if dac >= NUM_DACS {
            return Err(fail(BoardError::InvalidDac(dac)));
        }
        self.check_stream(config.stream as usize)?;
        let per_stream = self.controller.channels_per_stream();
        if config.channel as usize >= per_stream {
            return Err(fail(BoardError::InvalidChannel {
                channel: config.channel as usize, max: per_stream - 1 }));
        }
        if config.threshold.abs() > DAC_THRESHOLD_LIMIT {
            return Err(fail(BoardError::InvalidDacThreshold(config.threshold)));
        }

        self.dacs[dac] = config;
        Ok(())
    }

    /// Install the stimulation program of one channel
    pub fn set_stim_program(&mut self, stream: usize, channel: usize, program: StimProgram)
        -> Result<(), BoardError> {

        self.require_stim("Stimulation programs")?;
        self.check_stream(stream)?;
        let per_stream = self.controller.channels_per_stream();
        if channel >= per_stream {
            return Err(fail(BoardError::InvalidChannel { channel, max: per_stream - 1 }));
        }

        let idx = stream * per_stream + channel;
        match self.stim_programs.get_mut(idx) {
            Some(slot) => { *slot = program; Ok(()) },
            // stim tables are created by ClearStimPrograms
            None => Err(fail(BoardError::NotReset))
        }
    }

    pub fn stim_program(&self, stream: usize, channel: usize) -> Option<&StimProgram> {
        let per_stream = self.controller.channels_per_stream();
        if channel >= per_stream {
            return None;
        }
        self.stim_programs.get(stream * per_stream + channel)
    }

    /// Resolve a channel name against the current stream state
    pub fn stream_channel_from_wave_name(&self, name: &str) -> StreamChannel {
        stream_channel_from_wave_name(self.controller, &self.data_sources,
            &self.enabled_streams, name)
    }
}


#[cfg(test)]
mod tests {

    use super::*;
    use crate::stim::{StimWaveform, StimTrigger, TriggerType, EVENT_NEVER, StimEvent};
    use assert_matches::assert_matches;

    fn mask(streams: &[usize]) -> StreamMask {
        let mut m = StreamMask::ZERO;
        for s in streams {
            m.set(*s, true);
        }
        m
    }

    #[test]
    fn sample_rate_table() {
        assert_eq!(SampleRate::all().count(), 17);
        for rate in SampleRate::all() {
            let nominal = rate.hz();
            assert!(nominal >= 1000.0 && nominal <= 30000.0);
            assert_eq!(SampleRate::nearest(nominal), rate);
        }
        assert_eq!(SampleRate::S1000.hz(), 1000.0);
        assert_eq!(SampleRate::S20000.hz(), 20000.0);
        assert_eq!(SampleRate::S6250.to_string(), "6.25 kS/s");
    }

    #[test]
    fn wave_names() {
        assert_eq!(WaveName::parse("A-005"),
            Some(WaveName { port: BoardPort::A, kind: WaveKind::Amplifier(5) }));
        assert_eq!(WaveName::parse("H-AUX6"),
            Some(WaveName { port: BoardPort::H, kind: WaveKind::Aux(6) }));
        assert_eq!(WaveName::parse("A-05"), None);
        assert_eq!(WaveName::parse("A-0x5"), None);
        assert_eq!(WaveName::parse("A-AUX7"), None);
        assert_eq!(WaveName::parse("AB-005"), None);
        assert_eq!(WaveName::parse("a-005"), None);
        assert_eq!(WaveName::parse("A005"), None);
        assert_eq!(WaveName::parse("I-005"), None);
    }

    #[test]
    fn data_source_tags() {
        let table = DataSourceTable::default();
        for stream in 0..8 {
            assert_eq!(table.get(stream).unwrap().tag() as usize, stream);
        }
        let ddr = DataSource { port: BoardPort::C, miso: Miso::Miso2, ddr: true };
        assert_eq!(ddr.tag(), 13);
        assert_eq!(DataSource::from_tag(13), Some(ddr));
        assert_eq!(DataSource::from_tag(16), None);

        let mut sources = [DataSource::from_tag(0).unwrap(); 8];
        for (i, s) in sources.iter_mut().enumerate() {
            *s = DataSource::from_tag(i as u8).unwrap();
        }
        assert_matches!(DataSourceTable::new(sources), Ok(_));
        sources[3] = sources[0];
        assert_matches!(DataSourceTable::new(sources), Err(BoardError::DuplicateDataSource(_)));
    }

    #[test]
    fn usb2_resolution() {
        let table = DataSourceTable::default();
        let usb2 = ControllerType::RecordUsb2;

        // A1, A2 and B1 enabled
        let enabled = mask(&[0, 1, 2]);
        let r = |name| stream_channel_from_wave_name(usb2, &table, &enabled, name);

        assert_eq!(r("A-000"), StreamChannel { stream: 0, channel: 0 });
        assert_eq!(r("A-031"), StreamChannel { stream: 0, channel: 31 });
        assert_eq!(r("A-032"), StreamChannel { stream: 1, channel: 0 });
        assert_eq!(r("A-064"), StreamChannel::NOT_FOUND);
        assert_eq!(r("B-010"), StreamChannel { stream: 2, channel: 10 });
        assert_eq!(r("A-AUX2"), StreamChannel { stream: 0, channel: 1 });
        assert_eq!(r("A-AUX4"), StreamChannel { stream: 1, channel: 0 });
        assert_eq!(r("B-AUX4"), StreamChannel::NOT_FOUND);
        assert_eq!(r("C-000"), StreamChannel::NOT_FOUND);
        assert_eq!(r("E-000"), StreamChannel::NOT_FOUND);
    }

    #[test]
    fn usb2_dense_renumbering() {
        let table = DataSourceTable::default();
        // A2 and C1 only
        let enabled = mask(&[1, 4]);
        let r = |name| stream_channel_from_wave_name(ControllerType::RecordUsb2, &table,
            &enabled, name);

        assert_eq!(r("A-000"), StreamChannel { stream: 0, channel: 0 });
        // anchored on A2, there is no second chip
        assert_eq!(r("A-AUX4"), StreamChannel::NOT_FOUND);
        assert_eq!(r("A-032"), StreamChannel::NOT_FOUND);
        assert_eq!(r("C-005"), StreamChannel { stream: 1, channel: 5 });
    }

    #[test]
    fn usb3_resolution() {
        let table = DataSourceTable::default();
        let usb3 = ControllerType::RecordUsb3;
        // port A MISO1 + DDR, port H MISO1
        let enabled = mask(&[0, 1, 28]);
        let r = |name| stream_channel_from_wave_name(usb3, &table, &enabled, name);

        assert_eq!(r("A-040"), StreamChannel { stream: 1, channel: 8 });
        assert_eq!(r("H-003"), StreamChannel { stream: 2, channel: 3 });
        assert_eq!(r("H-AUX1"), StreamChannel { stream: 2, channel: 0 });
        assert_eq!(r("A-AUX5"), StreamChannel::NOT_FOUND);

        let enabled = mask(&[0, 2]);
        let r = |name| stream_channel_from_wave_name(usb3, &table, &enabled, name);
        assert_eq!(r("A-AUX5"), StreamChannel { stream: 1, channel: 1 });

        // AUX 1-3 live on offset 0 only, even when a later stream of the
        // port is enabled
        let enabled = mask(&[1, 2]);
        let r = |name| stream_channel_from_wave_name(usb3, &table, &enabled, name);
        assert_eq!(r("A-AUX1"), StreamChannel::NOT_FOUND);
        assert_eq!(r("A-AUX6"), StreamChannel { stream: 1, channel: 2 });
        assert_eq!(r("A-000"), StreamChannel { stream: 0, channel: 0 });
    }

    #[test]
    fn rhs_resolution() {
        let table = DataSourceTable::default();
        let stim = ControllerType::StimRecord;
        let enabled = mask(&[0, 1, 6]);
        let r = |name| stream_channel_from_wave_name(stim, &table, &enabled, name);

        assert_eq!(r("A-015"), StreamChannel { stream: 0, channel: 15 });
        assert_eq!(r("A-016"), StreamChannel { stream: 1, channel: 0 });
        assert_eq!(r("A-032"), StreamChannel::NOT_FOUND);
        assert_eq!(r("D-002"), StreamChannel { stream: 2, channel: 2 });
        assert_eq!(r("A-AUX1"), StreamChannel::NOT_FOUND);
        assert_eq!(r("E-000"), StreamChannel::NOT_FOUND);
    }

    #[test]
    fn resolution_is_total() {
        let table = DataSourceTable::default();
        let ports = ['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H'];

        for controller in [ControllerType::RecordUsb2, ControllerType::RecordUsb3,
            ControllerType::StimRecord].iter().copied() {

            let max = controller.max_streams();
            for pattern in [0b1u32, 0b1011, 0b1111_0000, 0xFFFF_FFFF].iter().copied() {
                let mut enabled = StreamMask::new([pattern]);
                for s in max..32 {
                    enabled.set(s, false);
                }
                let n = enabled.count_ones() as i32;

                for p in ports.iter() {
                    let mut names: Vec<String> = (0..130).map(|c| format!("{}-{:03}", p, c)).collect();
                    names.extend((1..=6).map(|a| format!("{}-AUX{}", p, a)));

                    for name in names {
                        let addr = stream_channel_from_wave_name(controller, &table, &enabled, &name);
                        if addr.is_found() {
                            assert!(addr.stream >= 0 && addr.stream < n, "{} {:?}", name, addr);
                            assert!(addr.channel >= 0 &&
                                (addr.channel as usize) < controller.channels_per_stream());
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn cable_delay_round_trip() {
        let fs = 30000.0;
        let step = CABLE_VELOCITY / (CYCLES_PER_SAMPLE * fs) / 2.0;

        for tenths in 0..=100 {
            let meters = tenths as f64 / 10.0;
            let delay = cable_delay(meters, fs).unwrap();
            assert!(delay >= 1);
            let estimate = estimate_cable_length_meters(delay, fs);
            assert!((estimate - meters).abs() <= step, "{} m → {} → {} m", meters, delay, estimate);
        }

        assert_eq!(cable_delay(1000.0, fs).unwrap(), MAX_CABLE_DELAY);
        assert_eq!(cable_delay(0.0, 1000.0).unwrap(), 1);
        assert_matches!(cable_delay(-1.0, fs), Err(BoardError::InvalidCableLength(_)));
        assert_matches!(cable_delay(1.0, f64::NAN), Err(BoardError::InvalidSampleRate(_)));
        assert_matches!(cable_delay(1.0, 0.0), Err(BoardError::InvalidSampleRate(_)));
    }

    #[test]
    fn direct_cable_delay() {
        let mut board = Board::new(ControllerType::StimRecord);
        board.initialize().unwrap();

        board.set_cable_delay(BoardPort::A, 7).unwrap();
        assert_eq!(board.cable_delay(BoardPort::A), 7);

        assert_matches!(board.set_cable_delay(BoardPort::A, 0),
            Err(BoardError::InvalidCableDelay(0)));
        assert_matches!(board.set_cable_delay(BoardPort::A, 16),
            Err(BoardError::InvalidCableDelay(16)));
        assert_eq!(board.cable_delay(BoardPort::A), 7);
    }

    #[test]
    fn stim_program_lookup() {
        let mut board = Board::new(ControllerType::StimRecord);
        board.initialize().unwrap();

        let trigger = StimTrigger::new(3, true, TriggerType::Edge, false).unwrap();
        let program = StimProgram::from_waveform(trigger, &StimWaveform::default(), 30000.0)
            .unwrap();
        board.set_stim_program(0, 15, program).unwrap();

        assert_eq!(board.stim_program(0, 15), Some(&program));
        // channel 16 of stream 0 is not channel 0 of stream 1
        assert_eq!(board.stim_program(0, 16), None);
        assert_eq!(board.stim_program(1, 0), Some(&StimProgram::default()));
        assert_eq!(board.stim_program(8, 0), None);
    }

    #[test]
    fn default_sequence_order() {
        for controller in [ControllerType::RecordUsb2, ControllerType::RecordUsb3,
            ControllerType::StimRecord].iter().copied() {

            let seq = default_sequence(controller);
            let pos = |s: &BoardSetting| seq.iter().position(|x| x == s).unwrap();

            assert_eq!(seq[0], BoardSetting::Reset);
            let rate = pos(&BoardSetting::SampleRate(SampleRate::S30000));
            let disable = pos(&BoardSetting::DisableAllStreams);
            let enable = pos(&BoardSetting::EnableStream { stream: 0, enable: true });
            let cable = seq.iter().position(|s| matches!(s, BoardSetting::CableLengthMeters { .. }))
                .unwrap();

            assert!(rate < cable);
            assert!(cable < disable);
            assert_eq!(disable + 1, enable);

            let has_sources = seq.iter().any(|s| matches!(s, BoardSetting::DataSource { .. }));
            assert_eq!(has_sources, controller == ControllerType::RecordUsb2);

            let has_stim = seq.contains(&BoardSetting::ClearStimPrograms);
            assert_eq!(has_stim, controller == ControllerType::StimRecord);
            if has_stim {
                assert!(pos(&BoardSetting::ClearStimPrograms) > enable);
                assert!(pos(&BoardSetting::GlobalSettle(false)) < rate);
            }
        }
    }

    #[test]
    fn initialize_board() {
        let mut board = Board::new(ControllerType::StimRecord);
        assert_matches!(board.apply(BoardSetting::DspSettle(true)), Err(BoardError::NotReset));

        board.initialize().unwrap();
        assert_eq!(board.sample_rate(), Some(SampleRate::S30000));
        assert_eq!(board.num_enabled_streams(), 1);
        assert!(board.enabled_streams()[0]);
        assert_eq!(board.aux_command_length(3), Some(128));
        assert!(board.cable_delay(BoardPort::A) >= 1);

        let program = board.stim_program(7, 15).unwrap();
        assert_eq!(program.events.get(StimEvent::StartStim), EVENT_NEVER);
        assert_eq!(program.events.end(), 65534);
    }

    #[test]
    fn out_of_order_fails() {
        let mut board = Board::new(ControllerType::RecordUsb2);
        board.apply(BoardSetting::Reset).unwrap();
        // cable delays need a sample rate
        assert_matches!(board.apply(BoardSetting::CableLengthMeters {
            port: BoardPort::A, meters: 1.0 }), Err(BoardError::SampleRateUnset));
        assert_matches!(board.apply(BoardSetting::ClearStimPrograms),
            Err(BoardError::NotSupported { .. }));
    }

    #[test]
    fn sample_rate_recomputes_delays() {
        let mut board = Board::new(ControllerType::RecordUsb3);
        board.initialize().unwrap();
        board.set_cable_length_meters(BoardPort::H, 5.0).unwrap();
        let fast = board.cable_delay(BoardPort::H);

        board.set_sample_rate(SampleRate::S1000).unwrap();
        let slow = board.cable_delay(BoardPort::H);
        assert!(slow < fast);
        assert_eq!(board.cable_length_meters(BoardPort::H), 5.0);

        board.set_cable_length_feet(BoardPort::A, 10.0).unwrap();
        assert!((board.cable_length_meters(BoardPort::A) - 3.048).abs() < 1e-9);
    }

    #[test]
    fn board_validation() {
        let mut board = Board::new(ControllerType::RecordUsb2);
        board.initialize().unwrap();

        assert_matches!(board.apply(BoardSetting::EnableStream { stream: 8, enable: true }),
            Err(BoardError::InvalidStream { stream: 8, max: 7 }));
        assert_matches!(board.apply(BoardSetting::CableDelay { port: BoardPort::E, delay: 3 }),
            Err(BoardError::InvalidPort { .. }));
        assert_matches!(board.apply(BoardSetting::CableDelay { port: BoardPort::A, delay: 16 }),
            Err(BoardError::InvalidCableDelay(16)));
        assert_matches!(board.apply(BoardSetting::AuxCommandBank {
            port: BoardPort::A, slot: 0, bank: 16 }), Err(BoardError::InvalidBank(16)));
        assert_matches!(board.apply(BoardSetting::AuxCommandLength { slot: 0, length: 1025 }),
            Err(BoardError::InvalidCommandLength { .. }));
        assert_matches!(board.apply(BoardSetting::DacGain(8)), Err(_));

        let config = DacConfig { enabled: true, stream: 0, channel: 32, ..DacConfig::default() };
        assert_matches!(board.set_dac(0, config), Err(BoardError::InvalidChannel { .. }));
        let config = DacConfig { enabled: true, stream: 1, channel: 31, threshold: -200,
            threshold_enabled: true };
        assert_matches!(board.set_dac(7, config), Ok(()));

        board.apply(BoardSetting::CableDelay { port: BoardPort::B, delay: 6 }).unwrap();
        assert_eq!(board.cable_delay(BoardPort::B), 6);
        assert!(board.cable_length_meters(BoardPort::B) > 0.0);
    }

    #[test]
    fn stim_programs() {
        let mut board = Board::new(ControllerType::StimRecord);
        board.initialize().unwrap();

        let trigger = StimTrigger::new(3, true, TriggerType::Edge, false).unwrap();
        let program = StimProgram::from_waveform(trigger, &StimWaveform::default(), 30000.0)
            .unwrap();
        board.set_stim_program(2, 4, program).unwrap();
        assert_eq!(board.stim_program(2, 4), Some(&program));

        assert_matches!(board.set_stim_program(2, 16, program),
            Err(BoardError::InvalidChannel { .. }));
    }
}
