use crate::mocks::OSC_RESET;
use crate::registers::{con, osc};
use crate::status::{ClockState, OperationMode, OperationStatus, OscillatorStatus};

#[test]
fn test_operation_status_from_register() {
    assert_eq!(OperationMode::Mixed, OperationStatus::from_register(0).mode);
    assert_eq!(OperationMode::Sleep, OperationStatus::from_register(con::OPMOD.pack(1)).mode);
    assert_eq!(OperationMode::InternalLoopback, OperationStatus::from_register(con::OPMOD.pack(2)).mode);
    assert_eq!(OperationMode::ListenOnly, OperationStatus::from_register(con::OPMOD.pack(3)).mode);
    assert_eq!(OperationMode::Config, OperationStatus::from_register(con::OPMOD.pack(4)).mode);
    assert_eq!(OperationMode::ExternalLoopback, OperationStatus::from_register(con::OPMOD.pack(5)).mode);
    assert_eq!(OperationMode::Can2_0, OperationStatus::from_register(con::OPMOD.pack(6)).mode);
    assert_eq!(OperationMode::Restricted, OperationStatus::from_register(con::OPMOD.pack(7)).mode);

    assert_eq!(OperationMode::Sleep, OperationStatus::from_register(con::REQOP.pack(1)).requested);
}

#[test]
fn test_operation_status_of_reset_value() {
    let status = OperationStatus::from_register(con::DEFAULT);

    assert_eq!(OperationMode::Config, status.mode);
    assert_eq!(OperationMode::Config, status.requested);
    assert!(status.txq_reserved);
    assert!(status.store_transmit_event);
    assert!(!status.error_trans_listen_only_mode);
    assert!(!status.transmit_esi_gateway);
    assert!(!status.restrict_retransmission);
}

#[test]
fn test_operation_status_flags() {
    assert!(OperationStatus::from_register(con::SERR2LOM.mask()).error_trans_listen_only_mode);
    assert!(OperationStatus::from_register(con::ESIGM.mask()).transmit_esi_gateway);
    assert!(OperationStatus::from_register(con::RTXAT.mask()).restrict_retransmission);
}

#[test]
fn test_con_reset_value() {
    assert_eq!(0x0498_0760, con::DEFAULT);
}

#[test]
fn test_oscillator_status_from_register() {
    let status = OscillatorStatus::from_register(OSC_RESET);

    assert!(status.sclk_ready);
    assert!(status.oscillator_ready);
    assert!(!status.pll_ready);
    assert!(!status.pll_enabled);
    assert!(!status.oscillator_disabled);
}

#[test]
fn test_oscillator_classification() {
    assert_eq!(ClockState::Ready, OscillatorStatus::from_register(OSC_RESET).classify());
    assert_eq!(
        ClockState::Disabled,
        OscillatorStatus::from_register(osc::OSCDIS.mask()).classify()
    );
    assert_eq!(ClockState::Indeterminate, OscillatorStatus::from_register(0).classify());
    assert_eq!(
        ClockState::Indeterminate,
        OscillatorStatus::from_register(osc::OSCDIS.mask() | osc::OSCRDY.mask()).classify()
    );
}

#[test]
fn test_oscillator_classification_pll() {
    let locked = osc::PLLEN.mask() | osc::PLLRDY.mask() | osc::OSCRDY.mask() | osc::SCLKRDY.mask();
    assert_eq!(ClockState::Ready, OscillatorStatus::from_register(locked).classify());

    let unlocked = osc::PLLEN.mask() | osc::OSCRDY.mask() | osc::SCLKRDY.mask();
    assert_eq!(ClockState::Indeterminate, OscillatorStatus::from_register(unlocked).classify());
}
