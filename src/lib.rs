//! Register model and command protocol for RHD and RHS headstage chips
//! and the FPGA controllers that drive them.
//!
//! The crate computes register images from physical parameters
//! ([`registers`], [`calibration`]), encodes them into command words
//! ([`commands`]) and assembles the command lists the controller plays
//! back every sample ([`lists`]). Board-level state such as sample rate,
//! cable delays and data stream routing lives in [`board`], stimulation
//! sequencing in [`stim`]. A [`Controller`] ties these together with a
//! user supplied [`CommandTransport`].
//!
//! ```
//! use librhx::registers::{RegisterSet, ChipFamily};
//! use librhx::calibration::StimStepSize;
//! use librhx::lists::CommandList;
//!
//! let regs = RegisterSet::new(ChipFamily::Rhd, 30000.0, StimStepSize::Step1uA).unwrap();
//! assert_eq!(regs.get_register_value(0).unwrap(), 0xDE);
//!
//! let list = CommandList::rhd_register_config(regs.as_rhd().unwrap(), true, 60).unwrap();
//! assert_eq!(list.len(), 60);
//! ```

#[macro_use] extern crate lazy_static;
#[macro_use] mod macros;

pub mod calibration;
pub mod registers;
pub mod commands;
pub mod lists;
pub mod stim;
pub mod board;
pub mod controller;

pub use registers::{ChipFamily, RegisterSet, RegisterError};
pub use commands::{Command, CommandFlags, CommandError};
pub use lists::{CommandList, CommandListError};
pub use board::{Board, BoardError, BoardPort, ControllerType, SampleRate, StreamChannel};
pub use controller::{Controller, CommandTransport, FifoMonitor, RhxError, TransportError};
