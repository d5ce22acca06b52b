use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use thiserror::Error;

use crate::board::{Board, BoardError, BoardPort, ControllerType, SampleRate, StreamChannel};
use crate::calibration::{CalibrationError, StimStepSize, ChargeRecoveryCurrentLimit};
use crate::commands::CommandError;
use crate::lists::{CommandList, CommandListError};
use crate::registers::{BandwidthBank, ChipFamily, RegisterError, RegisterSet};
use crate::stim::{StimError, StimProgram, StimTrigger, StimWaveform};

/// Stim step size of a freshly created RHS controller
pub const DEFAULT_STIM_STEP: StimStepSize = StimStepSize::Step1uA;

/// Failure reported by a [`CommandTransport`]
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct TransportError(pub String);

#[derive(Error, Debug)]
pub enum RhxError {
    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("Register error: {0}")]
    Register(#[from] RegisterError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Command list error: {0}")]
    CommandList(#[from] CommandListError),

    #[error("Board error: {0}")]
    Board(#[from] BoardError),

    #[error("Stimulation error: {0}")]
    Stim(#[from] StimError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Transport lock poisoned")]
    LockPoisoned,

    #[error("{found:?} command list cannot be sent to a {expected:?} controller")]
    FamilyMismatch { expected: ChipFamily, found: ChipFamily },
}


/// The link that moves command words to the FPGA. Implementations own
/// the actual I/O; this crate only produces the words and polls the
/// FIFO occupancy.
pub trait CommandTransport: Send {

    /// Transmit `words` in order. RHD words occupy the lower 16 bits.
    fn send_words(&mut self, words: &[u32]) -> Result<(), TransportError>;

    /// Number of data words waiting in the controller's FIFO
    fn words_in_fifo(&mut self) -> Result<u32, TransportError>;
}

fn lock<T>(transport: &Mutex<T>) -> Result<std::sync::MutexGuard<'_, T>, RhxError> {
    transport.lock().map_err(|_| {
        warn!("Transport lock poisoned");
        RhxError::LockPoisoned
    })
}


/// Read-only handle to the FIFO occupancy of a controller. This is the
/// only part of a [`Controller`] that may be used from another thread
/// while acquisition is running.
pub struct FifoMonitor<T: CommandTransport> {
    transport: Arc<Mutex<T>>,
}

impl<T: CommandTransport> Clone for FifoMonitor<T> {
    fn clone(&self) -> Self {
        FifoMonitor { transport: self.transport.clone() }
    }
}

impl<T: CommandTransport> FifoMonitor<T> {
    pub fn words_in_fifo(&self) -> Result<u32, RhxError> {
        Ok(lock(&self.transport)?.words_in_fifo()?)
    }
}


/// A headstage controller: the register state of its chips, the board
/// state and the transport to the hardware.
///
/// Register and board state are owned by the controller and only change
/// through `&mut self`; callers serialise configuration themselves
/// (typically by not reconfiguring while streaming). The transport is
/// shared with any [`FifoMonitor`] handed out.
///
/// ## Example
///
/// ```
/// use librhx::controller::{Controller, CommandTransport, TransportError};
/// use librhx::board::ControllerType;
///
/// #[derive(Default)]
/// struct Null;
///
/// impl CommandTransport for Null {
///     fn send_words(&mut self, _: &[u32]) -> Result<(), TransportError> { Ok(()) }
///     fn words_in_fifo(&mut self) -> Result<u32, TransportError> { Ok(0) }
/// }
///
/// let mut ctrl = Controller::new(ControllerType::RecordUsb2, Null).unwrap();
/// ctrl.initialize().unwrap();
/// let list = ctrl.create_register_config(true, 60).unwrap();
/// ctrl.upload(&list).unwrap();
/// ```
pub struct Controller<T: CommandTransport> {
    registers: RegisterSet,
    board: Board,
    transport: Arc<Mutex<T>>,
}

impl<T: CommandTransport> Controller<T> {

    /// Create a controller with power-on register defaults at 30 kS/s.
    /// The board is not configured until [`Controller::initialize`].
    pub fn new(controller_type: ControllerType, transport: T) -> Result<Self, RhxError> {
        let registers = RegisterSet::new(controller_type.family(), SampleRate::S30000.hz(),
            DEFAULT_STIM_STEP)?;

        Ok(Controller {
            registers,
            board: Board::new(controller_type),
            transport: Arc::new(Mutex::new(transport)),
        })
    }

    /// Apply the board's default configuration sequence and bring the
    /// registers in line with the resulting sample rate.
    pub fn initialize(&mut self) -> Result<(), RhxError> {
        self.board.initialize()?;
        if let Some(rate) = self.board.sample_rate() {
            self.registers.set_sample_rate(rate.hz())?;
        }
        info!("Initialized {:?} controller", self.board.controller());
        Ok(())
    }

    pub fn controller_type(&self) -> ControllerType {
        self.board.controller()
    }

    pub fn family(&self) -> ChipFamily {
        self.registers.family()
    }

    pub fn registers(&self) -> &RegisterSet {
        &self.registers
    }

    /// Mutable access for register fields without a dedicated setter
    pub fn registers_mut(&mut self) -> &mut RegisterSet {
        &mut self.registers
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut Board {
        &mut self.board
    }

    /// Change the sample rate of registers and board together. Cable
    /// delays are recomputed.
    pub fn set_sample_rate(&mut self, rate: SampleRate) -> Result<(), RhxError> {
        let mut registers = self.registers.clone();
        registers.set_sample_rate(rate.hz())?;
        self.board.set_sample_rate(rate)?;
        self.registers = registers;
        Ok(())
    }

    pub fn set_upper_bandwidth(&mut self, freq: f64) -> Result<f64, RhxError> {
        Ok(self.registers.set_upper_bandwidth(freq)?)
    }

    pub fn set_lower_bandwidth(&mut self, freq: f64) -> Result<f64, RhxError> {
        Ok(self.registers.set_lower_bandwidth(freq, BandwidthBank::Primary)?)
    }

    /// Lower bandwidth used while amplifiers settle after stimulation
    /// (RHS only)
    pub fn set_lower_settle_bandwidth(&mut self, freq: f64) -> Result<f64, RhxError> {
        Ok(self.registers.set_lower_bandwidth(freq, BandwidthBank::Settle)?)
    }

    pub fn set_dsp_cutoff_freq(&mut self, freq: f64) -> Result<f64, RhxError> {
        Ok(self.registers.set_dsp_cutoff_freq(freq)?)
    }

    pub fn set_stim_step_size(&mut self, step: StimStepSize) -> Result<(), RhxError> {
        Ok(self.registers.set_stim_step_size(step)?)
    }

    pub fn set_charge_recovery_current_limit(&mut self, limit: ChargeRecoveryCurrentLimit)
        -> Result<(), RhxError> {
        Ok(self.registers.set_charge_recovery_current_limit(limit)?)
    }

    pub fn set_charge_recovery_target_voltage(&mut self, volts: f64) -> Result<f64, RhxError> {
        Ok(self.registers.set_charge_recovery_target_voltage(volts)?)
    }

    pub fn set_cable_length_meters(&mut self, port: BoardPort, meters: f64) -> Result<(), RhxError> {
        Ok(self.board.set_cable_length_meters(port, meters)?)
    }

    pub fn set_cable_length_feet(&mut self, port: BoardPort, feet: f64) -> Result<(), RhxError> {
        Ok(self.board.set_cable_length_feet(port, feet)?)
    }

    pub fn enable_data_stream(&mut self, stream: usize, enable: bool) -> Result<(), RhxError> {
        Ok(self.board.apply(crate::board::BoardSetting::EnableStream { stream, enable })?)
    }

    /// Program the stim sequencer of one channel from a waveform
    /// description, at the current sample rate.
    pub fn set_stim_waveform(&mut self, stream: usize, channel: usize, trigger: StimTrigger,
        waveform: &StimWaveform) -> Result<(), RhxError> {

        let program = StimProgram::from_waveform(trigger, waveform, self.registers.sample_rate())?;
        self.board.set_stim_program(stream, channel, program)?;
        Ok(())
    }

    /// Full register configuration list. For RHD chips `flag` selects ADC
    /// calibration, for RHS chips it selects writing stim parameters.
    pub fn create_register_config(&self, flag: bool, length: usize) -> Result<CommandList, RhxError> {
        let list = match &self.registers {
            RegisterSet::Rhd(r) => CommandList::rhd_register_config(r, flag, length)?,
            RegisterSet::Rhs(r) => CommandList::rhs_register_config(r, flag, length)?,
        };
        Ok(list)
    }

    pub fn create_register_readback(&self, length: usize) -> Result<CommandList, RhxError> {
        let list = match self.family() {
            ChipFamily::Rhd => CommandList::rhd_register_readback(length)?,
            ChipFamily::Rhs => CommandList::rhs_register_readback(length)?,
        };
        Ok(list)
    }

    /// Auxiliary sampling list (RHD only)
    pub fn create_aux_sampling(&self) -> Result<CommandList, RhxError> {
        match &self.registers {
            RegisterSet::Rhd(r) => Ok(CommandList::rhd_aux_sampling(r)?),
            RegisterSet::Rhs(_) => Err(RegisterError::WrongFamily {
                operation: "Auxiliary sampling list", family: ChipFamily::Rhs }.into())
        }
    }

    pub fn create_zcheck_dac(&self, frequency: f64, amplitude: f64) -> Result<CommandList, RhxError> {
        Ok(CommandList::zcheck_dac(self.family(), self.registers.sample_rate(), frequency,
            amplitude)?)
    }

    /// Update the currents of one channel (RHS only)
    pub fn create_set_stim_magnitudes(&mut self, channel: u16, pos_magnitude: i32, pos_trim: i32,
        neg_magnitude: i32, neg_trim: i32) -> Result<CommandList, RhxError> {

        let regs = self.registers.rhs_mut("Stim magnitudes")?;
        Ok(CommandList::set_stim_magnitudes(regs, channel, pos_magnitude, pos_trim,
            neg_magnitude, neg_trim)?)
    }

    /// Program charge recovery (RHS only)
    pub fn create_config_charge_recovery(&mut self, limit: ChargeRecoveryCurrentLimit,
        target_voltage: f64) -> Result<CommandList, RhxError> {

        let regs = self.registers.rhs_mut("Charge recovery")?;
        Ok(CommandList::config_charge_recovery(regs, limit, target_voltage)?)
    }

    pub fn stream_channel_from_wave_name(&self, name: &str) -> StreamChannel {
        self.board.stream_channel_from_wave_name(name)
    }

    /// Send a command list through the transport
    pub fn upload(&self, list: &CommandList) -> Result<(), RhxError> {
        let expected = self.family();
        if list.family() != expected {
            warn!("Refusing to upload {:?} list to {:?} controller", list.family(), expected);
            return Err(RhxError::FamilyMismatch { expected, found: list.family() });
        }

        cmddbg!("upload", expected, list.view());
        lock(&self.transport)?.send_words(list.view())?;
        debug!("Uploaded {} commands", list.len());

        Ok(())
    }

    pub fn words_in_fifo(&self) -> Result<u32, RhxError> {
        Ok(lock(&self.transport)?.words_in_fifo()?)
    }

    /// Handle that can poll the FIFO from another thread
    pub fn fifo_monitor(&self) -> FifoMonitor<T> {
        FifoMonitor { transport: self.transport.clone() }
    }
}
