use std::sync::{Arc, Mutex};

use librhx::board::{cable_delay, estimate_cable_length_meters};
use librhx::calibration::StimStepSize;
use librhx::registers::rhs::RhsRegisters;
use librhx::{Board, BoardPort, ChipFamily, Command, CommandList, CommandTransport, Controller,
    ControllerType, RegisterError, RegisterSet, RhxError, SampleRate, StreamChannel,
    TransportError};
use assert_matches::assert_matches;


// Transport that shares its log with the test so words can be inspected
// after the controller has been moved around.
#[derive(Clone, Default)]
struct SharedRecorder {
    words: Arc<Mutex<Vec<u32>>>,
}

impl CommandTransport for SharedRecorder {
    fn send_words(&mut self, words: &[u32]) -> Result<(), TransportError> {
        self.words.lock().unwrap().extend_from_slice(words);
        Ok(())
    }

    fn words_in_fifo(&mut self) -> Result<u32, TransportError> {
        Ok(self.words.lock().unwrap().len() as u32)
    }
}


#[test]
fn rhd_power_on_registers() {
    let regs = RegisterSet::new(ChipFamily::Rhd, 30000.0, StimStepSize::Step1uA).unwrap();
    assert_eq!(regs.get_register_value(0).unwrap(), 0xDE);
    assert_eq!(regs.get_register_value(1).unwrap(), 0x42);

    for addr in 0..=21 {
        assert_matches!(regs.get_register_value(addr), Ok(_));
    }
    assert_matches!(regs.get_register_value(22), Err(RegisterError::UnknownRegister(22)));
}

#[test]
fn rhs_register_addresses_are_total() {
    let regs = RhsRegisters::new(30000.0, StimStepSize::Step1uA).unwrap();
    for addr in RhsRegisters::register_addresses() {
        assert_matches!(regs.get_register_value(addr), Ok(_), "register {}", addr);
    }
}

#[test]
fn rhd_config_contents() {
    let regs = RegisterSet::new(ChipFamily::Rhd, 30000.0, StimStepSize::Step1uA).unwrap();
    let list = CommandList::rhd_register_config(regs.as_rhd().unwrap(), true, 60).unwrap();
    let cmds = list.decode().unwrap();

    assert_eq!(cmds.len(), 60);
    assert!(cmds.contains(&Command::write(0, 0xDE)));
    assert!(cmds.contains(&Command::Calibrate));

    let plain = CommandList::rhd_register_config(regs.as_rhd().unwrap(), false, 60).unwrap();
    assert!(!plain.decode().unwrap().contains(&Command::Calibrate));

    assert_matches!(CommandList::rhd_register_config(regs.as_rhd().unwrap(), true, 59), Err(_));
    assert_matches!(CommandList::rhd_register_config(regs.as_rhd().unwrap(), true, 1025),
        Err(_));
}

#[test]
fn cable_delay_round_trip() {
    for rate in SampleRate::all() {
        for delay in 4..=15u8 {
            let meters = estimate_cable_length_meters(delay, rate.hz());
            if meters > 0.0 {
                assert_eq!(cable_delay(meters, rate.hz()).unwrap(), delay,
                    "{} delay {}", rate, delay);
            }
        }
    }

    let mut board = Board::new(ControllerType::RecordUsb3);
    board.initialize().unwrap();
    board.set_cable_length_meters(BoardPort::H, 4.0).unwrap();
    let delay = board.cable_delay(BoardPort::H);
    assert!(delay > 3);
    assert!(estimate_cable_length_meters(delay, 30000.0) <= 4.0 + 1.0);
}

#[test]
fn rhs_controller_session() {
    let transport = SharedRecorder::default();
    let log = transport.words.clone();

    let mut ctrl = Controller::new(ControllerType::StimRecord, transport).unwrap();
    ctrl.initialize().unwrap();

    assert!(ctrl.set_dsp_cutoff_freq(1.0).unwrap() > 0.0);
    let list = ctrl.create_register_config(true, 128).unwrap();
    ctrl.upload(&list).unwrap();

    let words = log.lock().unwrap().clone();
    assert_eq!(words.len(), 128);
    for word in words.iter() {
        assert_matches!(Command::decode(*word, ChipFamily::Rhs), Ok(_));
    }
    assert_eq!(ctrl.fifo_monitor().words_in_fifo().unwrap(), 128);

    let rhd = CommandList::rhd_register_readback(60).unwrap();
    assert_matches!(ctrl.upload(&rhd), Err(RhxError::FamilyMismatch { .. }));
    assert_eq!(log.lock().unwrap().len(), 128);
}

#[test]
fn wave_names_follow_enabled_streams() {
    let mut ctrl = Controller::new(ControllerType::RecordUsb2, SharedRecorder::default()).unwrap();
    ctrl.initialize().unwrap();

    assert_eq!(ctrl.stream_channel_from_wave_name("A-000"),
        StreamChannel { stream: 0, channel: 0 });
    assert_eq!(ctrl.stream_channel_from_wave_name("B-000"), StreamChannel::NOT_FOUND);
    assert_eq!(ctrl.stream_channel_from_wave_name("nonsense"), StreamChannel::NOT_FOUND);

    ctrl.enable_data_stream(2, true).unwrap();
    assert_eq!(ctrl.stream_channel_from_wave_name("B-005"),
        StreamChannel { stream: 1, channel: 5 });
}

#[test]
fn fifo_monitor_is_shared_across_threads() {
    let mut ctrl = Controller::new(ControllerType::RecordUsb2, SharedRecorder::default()).unwrap();
    ctrl.initialize().unwrap();
    let list = ctrl.create_register_readback(60).unwrap();
    ctrl.upload(&list).unwrap();

    let handles: Vec<_> = (0..4).map(|_| {
        let monitor = ctrl.fifo_monitor();
        std::thread::spawn(move || monitor.words_in_fifo().unwrap())
    }).collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 60);
    }
}
