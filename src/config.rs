//!# Configuration
//!
//!```
//!# use mcp2517fd::config::{ClockConfiguration, PLLSetting};
//! // 2 MHz input is multiplied by the PLL
//! let clock = ClockConfiguration::for_input(2_000_000).unwrap();
//! assert_eq!(PLLSetting::TenTimesPLL, clock.pll);
//! assert_eq!(20_000_000, clock.system_clock_hz(2_000_000).unwrap());
//!```
use crate::registers::osc;
use serde::{Deserialize, Serialize};

/// Lowest supported input clock
pub const MIN_INPUT_CLOCK_HZ: u32 = 1_000_000;

/// Highest supported input and system clock
pub const MAX_CLOCK_HZ: u32 = 40_000_000;

/// Inputs up to this frequency get the 10x PLL
pub const PLL_THRESHOLD_HZ: u32 = MAX_CLOCK_HZ / 10;

/// MTU of classic CAN frames as reported by the host
pub const CAN_MTU: usize = 16;

/// MTU of CAN FD frames as reported by the host
pub const CANFD_MTU: usize = 72;

/// Configuration errors, detected before touching the device
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Input clock outside of [1 MHz, 40 MHz]
    ClockOutOfRange(u32),
    /// Resulting system clock above 40 MHz
    SystemClockTooHigh(u32),
    /// MTU is neither classic CAN nor CAN FD
    UnsupportedMtu(usize),
    /// Bit timing outside of the controller limits
    InvalidBitTiming,
}

/// Entire driver configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Frequency of the clock connected to the controller
    pub input_clock_hz: u32,

    /// Frame format and FIFO sizing
    pub mtu: MtuMode,

    /// Optional operating modes requested by the host
    pub ctrl: ControlModes,

    /// Upper bound for the SPI clock
    pub max_spi_speed_hz: u32,

    /// Divisor for the clock output pin
    pub clock_output: ClockOutputDivisor,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            input_clock_hz: MAX_CLOCK_HZ,
            mtu: MtuMode::Fd,
            ctrl: ControlModes::default(),
            max_spi_speed_hz: 20_000_000,
            clock_output: ClockOutputDivisor::DivideBy10,
        }
    }
}

impl Configuration {
    /// SPI clock used during bring-up, before the PLL may be running
    pub fn setup_spi_speed(&self) -> u32 {
        self.max_spi_speed_hz.min(self.input_clock_hz / 2)
    }

    /// SPI clock used once the controller runs on its resolved system clock
    pub fn run_spi_speed(&self, system_clock_hz: u32) -> u32 {
        self.max_spi_speed_hz.min(system_clock_hz / 2)
    }

    /// Clock configuration derived from the input clock
    pub fn clock(&self) -> Result<ClockConfiguration, ConfigError> {
        let mut clock = ClockConfiguration::for_input(self.input_clock_hz)?;
        clock.clock_output = self.clock_output;

        Ok(clock)
    }
}

/// Optional operating modes
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlModes {
    /// Internal loopback instead of normal operation
    pub loopback: bool,
    /// Listen only, no acknowledgement or transmission
    pub listen_only: bool,
    /// No retransmission after lost arbitration or errors
    pub one_shot: bool,
    /// Non-ISO CRC for CAN FD frames
    pub fd_non_iso: bool,
}

/// Frame format, determines FIFO sizing
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MtuMode {
    /// 8 byte payload, 32 receive slots, 30 transmit slots
    Classic,
    /// 64 byte payload, 17 receive slots, 8 transmit slots
    Fd,
}

impl MtuMode {
    /// Maps the MTU reported by the host
    pub fn from_mtu(mtu: usize) -> Result<Self, ConfigError> {
        match mtu {
            CAN_MTU => Ok(Self::Classic),
            CANFD_MTU => Ok(Self::Fd),
            mtu => Err(ConfigError::UnsupportedMtu(mtu)),
        }
    }

    /// Maximum payload length in bytes
    pub fn payload_size(&self) -> u16 {
        match self {
            Self::Classic => 8,
            Self::Fd => 64,
        }
    }

    pub fn rx_slots(&self) -> u8 {
        match self {
            Self::Classic => 32,
            Self::Fd => 17,
        }
    }

    pub fn tx_slots(&self) -> u8 {
        match self {
            Self::Classic => 30,
            Self::Fd => 8,
        }
    }

    /// Payload size register code (PLSIZE)
    pub fn plsize(&self) -> PayloadSize {
        match self {
            Self::Classic => PayloadSize::EightBytes,
            Self::Fd => PayloadSize::SixtyFourBytes,
        }
    }

    /// Transmit message object: header + payload
    pub fn tx_element_size(&self) -> u16 {
        8 + self.payload_size()
    }

    /// Receive message object: header + timestamp + payload
    pub fn rx_element_size(&self) -> u16 {
        8 + 4 + self.payload_size()
    }

    /// Transmit event object: header + timestamp
    pub fn tef_element_size(&self) -> u16 {
        8 + 4
    }
}

/// Payload size of a FIFO element
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PayloadSize {
    EightBytes = 0b000,
    TwelveBytes = 0b001,
    SixteenBytes = 0b010,
    TwentyBytes = 0b011,
    TwentyFourBytes = 0b100,
    ThirtyTwoBytes = 0b101,
    FortyEightBytes = 0b110,
    SixtyFourBytes = 0b111,
}

/// Oscillator/Clock configuration
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ClockConfiguration {
    /// Divisor for clock output
    pub clock_output: ClockOutputDivisor,

    /// Divisor for system clock
    pub system_clock: SystemClockDivisor,

    /// Disable clock/oscillator?
    pub disable_clock: bool,

    /// PLL configuration
    pub pll: PLLSetting,
}

impl ClockConfiguration {
    /// Selects the PLL for inputs of at most 4 MHz
    pub fn for_input(input_hz: u32) -> Result<Self, ConfigError> {
        Self::verify_input(input_hz)?;

        let pll = if input_hz <= PLL_THRESHOLD_HZ {
            PLLSetting::TenTimesPLL
        } else {
            PLLSetting::DirectXTALOscillator
        };

        Ok(Self {
            pll,
            ..Default::default()
        })
    }

    /// Input clock must be within [1 MHz, 40 MHz]
    pub fn verify_input(input_hz: u32) -> Result<(), ConfigError> {
        if !(MIN_INPUT_CLOCK_HZ..=MAX_CLOCK_HZ).contains(&input_hz) {
            return Err(ConfigError::ClockOutOfRange(input_hz));
        }

        Ok(())
    }

    /// Resolves the controller system clock for the given input clock
    pub fn system_clock_hz(&self, input_hz: u32) -> Result<u32, ConfigError> {
        Self::verify_input(input_hz)?;

        let mut clock = input_hz as u64;
        if self.pll == PLLSetting::TenTimesPLL {
            clock *= 10;
        }
        if self.system_clock == SystemClockDivisor::DivideBy2 {
            clock /= 2;
        }

        if clock > MAX_CLOCK_HZ as u64 {
            return Err(ConfigError::SystemClockTooHigh(clock.min(u32::MAX as u64) as u32));
        }

        Ok(clock as u32)
    }

    /// Maps register values to configuration
    pub(crate) fn from_register(register: u32) -> Self {
        Self {
            clock_output: ClockOutputDivisor::from_register(register),
            system_clock: SystemClockDivisor::from_register(register),
            disable_clock: osc::OSCDIS.is_set(register),
            pll: PLLSetting::from_register(register),
        }
    }

    /// Encodes the configuration to the OSC register
    pub(crate) fn as_register(&self) -> u32 {
        osc::CLKODIV.pack(self.clock_output as u32)
            | osc::SCLKDIV.pack(self.system_clock as u32)
            | osc::OSCDIS.pack(self.disable_clock as u32)
            | osc::PLLEN.pack(self.pll as u32)
    }

    /// Writable bits of the OSC register
    pub(crate) fn register_mask() -> u32 {
        osc::CLKODIV.mask() | osc::SCLKDIV.mask() | osc::OSCDIS.mask() | osc::PLLEN.mask()
    }

    /// Ready bits which must all be set before the clock is usable
    pub(crate) fn ready_mask(&self) -> u32 {
        let mut mask = osc::OSCRDY.mask() | osc::SCLKRDY.mask();

        if self.pll == PLLSetting::TenTimesPLL {
            mask |= osc::PLLRDY.mask();
        }

        mask
    }
}

/// Divisor for clock output
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockOutputDivisor {
    DivideBy10 = 0b11,
    DivideBy4 = 0b10,
    DivideBy2 = 0b01,
    #[default]
    DivideBy1 = 0b00,
}

impl ClockOutputDivisor {
    /// Maps register values to configuration
    pub(crate) fn from_register(register: u32) -> Self {
        match osc::CLKODIV.unpack(register) {
            0b11 => Self::DivideBy10,
            0b10 => Self::DivideBy4,
            0b01 => Self::DivideBy2,
            _ => Self::DivideBy1,
        }
    }
}

/// Divisor for system clock
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SystemClockDivisor {
    DivideBy2 = 0b1,
    #[default]
    DivideBy1 = 0b0,
}

impl SystemClockDivisor {
    /// Maps register values to configuration
    pub(crate) fn from_register(register: u32) -> Self {
        if osc::SCLKDIV.is_set(register) {
            Self::DivideBy2
        } else {
            Self::DivideBy1
        }
    }
}

/// PLL configuration
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum PLLSetting {
    /// System clock from 10x PLL
    TenTimesPLL = 0b1,
    /// System clock comes directly from XTAL oscillator
    #[default]
    DirectXTALOscillator = 0b0,
}

impl PLLSetting {
    /// Maps register values to configuration
    pub(crate) fn from_register(register: u32) -> Self {
        if osc::PLLEN.is_set(register) {
            Self::TenTimesPLL
        } else {
            Self::DirectXTALOscillator
        }
    }
}
