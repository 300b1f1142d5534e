use crate::registers::{con, osc};
use serde::{Deserialize, Serialize};

///  Operation status read from C1CON register
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OperationStatus {
    /// Current operation mode
    pub mode: OperationMode,

    /// Mode requested last
    pub requested: OperationMode,

    /// True if TXQ is enabled an reserves space in RAM
    pub txq_reserved: bool,

    /// True if transmitted messages are stored in TEF and RAM space is reserved
    pub store_transmit_event: bool,

    /// True => Transition to listen-only mode on system error bit
    /// False => Transition to restricted-operation mode on system error bit
    pub error_trans_listen_only_mode: bool,

    /// True => ESI is transmitted recessive when ESI of message is high or CAN controller error passive
    /// False => ESI reflects error stratus of CAN controller
    pub transmit_esi_gateway: bool,

    /// True => Restricted retransmission attempts. TXAT is used
    /// False => Unlimited number of retransmission attempts, TXAT will be ignored
    pub restrict_retransmission: bool,
}

impl OperationStatus {
    pub(crate) fn from_register(register: u32) -> Self {
        Self {
            mode: OperationMode::from_bits(con::OPMOD.unpack(register)),
            requested: OperationMode::from_bits(con::REQOP.unpack(register)),
            txq_reserved: con::TXQEN.is_set(register),
            store_transmit_event: con::STEF.is_set(register),
            error_trans_listen_only_mode: con::SERR2LOM.is_set(register),
            transmit_esi_gateway: con::ESIGM.is_set(register),
            restrict_retransmission: con::RTXAT.is_set(register),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationMode {
    /// Normal CAN FD mode, supports mixing of CAN FD and classic CAN 2.0 frames
    Mixed = 0b000,
    /// Module is in sleep mode
    Sleep = 0b001,
    /// Module is in internal loopback mode
    InternalLoopback = 0b010,
    /// Module is in listen-only mode
    ListenOnly = 0b011,
    /// Module is in configuration mode
    Config = 0b100,
    /// Module is in external loopback mode
    ExternalLoopback = 0b101,
    /// Module is in normal CAN 2.0 mode, possible error frames on CAN FD frames
    Can2_0 = 0b110,
    /// Module is in restricted operation mode
    Restricted = 0b111,
}

impl OperationMode {
    /// Maps the three bit OPMOD/REQOP value
    pub(crate) fn from_bits(bits: u32) -> Self {
        match bits & 0b111 {
            0b000 => Self::Mixed,
            0b001 => Self::Sleep,
            0b010 => Self::InternalLoopback,
            0b011 => Self::ListenOnly,
            0b100 => Self::Config,
            0b101 => Self::ExternalLoopback,
            0b110 => Self::Can2_0,
            _ => Self::Restricted,
        }
    }
}

/// Oscillator status bits of the OSC register
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OscillatorStatus {
    /// Clock output is ready
    pub sclk_ready: bool,
    /// Oscillator is stable
    pub oscillator_ready: bool,
    /// PLL is locked
    pub pll_ready: bool,
    /// PLL is enabled
    pub pll_enabled: bool,
    /// Oscillator is disabled
    pub oscillator_disabled: bool,
}

/// Classification of the oscillator status after reset
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClockState {
    /// Oscillator running, nothing to do
    Ready,
    /// Oscillator disabled, default configuration must be written
    Disabled,
    /// Unexpected combination, device needs a power cycle
    Indeterminate,
}

impl OscillatorStatus {
    pub(crate) fn from_register(register: u32) -> Self {
        Self {
            sclk_ready: osc::SCLKRDY.is_set(register),
            oscillator_ready: osc::OSCRDY.is_set(register),
            pll_ready: osc::PLLRDY.is_set(register),
            pll_enabled: osc::PLLEN.is_set(register),
            oscillator_disabled: osc::OSCDIS.is_set(register),
        }
    }

    /// Exactly one of "ready" or "disabled" is expected after reset
    pub fn classify(&self) -> ClockState {
        if self.pll_enabled && !self.pll_ready {
            return ClockState::Indeterminate;
        }

        match (self.oscillator_ready, self.oscillator_disabled) {
            (true, false) => ClockState::Ready,
            (false, true) => ClockState::Disabled,
            _ => ClockState::Indeterminate,
        }
    }
}
