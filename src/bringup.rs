//!# Bring-up
//!
//! Reset sequence after power-up, device identification and the operation mode gate.
//!
//! The sequence runs as a state machine:
//!
//! `PowerOn -> AwaitOscillatorSettle -> Reset -> AwaitOscillatorSettle2 -> ReadClockStatus`,
//! then depending on the oscillator status `ClockReady`, `ClockDisabledConfigureDefault`
//! or `Indeterminate` (fatal). Afterwards the CON register is compared against its reset
//! value. A mismatch triggers one forced reset before giving up.
use crate::can::CanError;
use crate::codec::RegisterCodec;
use crate::config::ClockConfiguration;
use crate::registers::{con, osc, Decoded};
use crate::status::{ClockState, OperationMode, OperationStatus, OscillatorStatus};
use embedded_hal::delay::DelayNs;
use embedded_hal::spi::SpiDevice;
use embedded_time::duration::Milliseconds;
use embedded_time::Clock;
use log::{debug, error};

/// Oscillator start-up time after power-up and reset
pub const OSCILLATOR_SETTLE_MS: u32 = 5;

/// Window for the oscillator and PLL to report ready
pub const CLOCK_LOCK_TIMEOUT_MS: u32 = 500;

/// Window for a requested operation mode to be reached
pub const MODE_TIMEOUT_MS: u32 = 2;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BringUpState {
    PowerOn,
    AwaitOscillatorSettle,
    Reset,
    AwaitOscillatorSettle2,
    ReadClockStatus,
    ClockReady,
    ClockDisabledConfigureDefault,
    Indeterminate,
    VerifyMode,
    ForceDefaults,
    FinalVerify,
    Done,
}

/// How the device was identified
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BringUpPath {
    /// CON matched its reset value right away
    Immediate,
    /// Defaults had to be forced with a second reset
    Forced,
}

/// Runs the reset and identification sequence
pub struct BringUp<'a, D, DL> {
    codec: &'a mut RegisterCodec<D>,
    delay: &'a mut DL,
    state: BringUpState,
    forced: bool,
}

impl<'a, D, DL> BringUp<'a, D, DL>
where
    D: SpiDevice<u8>,
    DL: DelayNs,
{
    pub fn new(codec: &'a mut RegisterCodec<D>, delay: &'a mut DL) -> Self {
        Self {
            codec,
            delay,
            state: BringUpState::PowerOn,
            forced: false,
        }
    }

    pub fn state(&self) -> BringUpState {
        self.state
    }

    /// Steps through the sequence until the device is identified or rejected
    pub fn run(mut self) -> Result<BringUpPath, CanError<D::Error>> {
        while self.state != BringUpState::Done {
            let next = self.step()?;
            debug!("Bring-up: {:?} -> {:?}", self.state, next);
            self.state = next;
        }

        Ok(if self.forced {
            BringUpPath::Forced
        } else {
            BringUpPath::Immediate
        })
    }

    fn step(&mut self) -> Result<BringUpState, CanError<D::Error>> {
        Ok(match self.state {
            BringUpState::PowerOn => BringUpState::AwaitOscillatorSettle,
            BringUpState::AwaitOscillatorSettle => {
                self.delay.delay_ms(OSCILLATOR_SETTLE_MS);
                BringUpState::Reset
            }
            BringUpState::Reset => {
                // only valid in Config mode, the clock status below tells whether it took
                self.codec.reset()?;
                BringUpState::AwaitOscillatorSettle2
            }
            BringUpState::AwaitOscillatorSettle2 => {
                self.delay.delay_ms(OSCILLATOR_SETTLE_MS);
                BringUpState::ReadClockStatus
            }
            BringUpState::ReadClockStatus => {
                let register = self.codec.read(osc::ADDRESS)?;

                match OscillatorStatus::from_register(register).classify() {
                    ClockState::Ready => BringUpState::ClockReady,
                    ClockState::Disabled => BringUpState::ClockDisabledConfigureDefault,
                    ClockState::Indeterminate => {
                        error!(
                            "Oscillator in unexpected state {}. Device may be in a strange state, power-cycle required",
                            Decoded {
                                fields: osc::FIELDS,
                                value: register
                            }
                        );
                        BringUpState::Indeterminate
                    }
                }
            }
            BringUpState::ClockDisabledConfigureDefault => {
                let value = osc::CLKODIV.pack(osc::DEFAULT_CLKODIV);
                self.codec.write_masked(osc::ADDRESS, value, 0xFF)?;
                BringUpState::VerifyMode
            }
            BringUpState::ClockReady => BringUpState::VerifyMode,
            BringUpState::Indeterminate => return Err(CanError::DeviceIndeterminate),
            BringUpState::VerifyMode => {
                if self.matches_default()? {
                    BringUpState::Done
                } else {
                    BringUpState::ForceDefaults
                }
            }
            BringUpState::ForceDefaults => {
                self.forced = true;
                self.codec.write(con::ADDRESS, con::DEFAULT)?;
                self.delay.delay_ms(OSCILLATOR_SETTLE_MS);
                self.codec.reset()?;
                self.delay.delay_ms(OSCILLATOR_SETTLE_MS);
                BringUpState::FinalVerify
            }
            BringUpState::FinalVerify => {
                if !self.matches_default()? {
                    return Err(CanError::DeviceNotFound);
                }
                BringUpState::Done
            }
            BringUpState::Done => BringUpState::Done,
        })
    }

    /// Compares CON against its reset value, logs the reason of a final mismatch
    fn matches_default(&mut self) -> Result<bool, CanError<D::Error>> {
        let register = self.codec.read(con::ADDRESS)?;
        if register & con::DEFAULT_MASK == con::DEFAULT {
            return Ok(true);
        }

        if self.state == BringUpState::FinalVerify {
            if register == 0 || register == u32::MAX {
                error!("CON register reads 0x{register:08x}. Wrong wiring?");
            } else {
                error!(
                    "Device stuck in {:?} mode: {}",
                    OperationStatus::from_register(register).mode,
                    Decoded {
                        fields: con::FIELDS,
                        value: register
                    }
                );
            }
        } else {
            debug!("CON 0x{register:08x} does not match reset value, forcing defaults");
        }

        Ok(false)
    }
}

/// Writes the oscillator configuration and waits until all required ready bits are set
pub fn configure_oscillator<D, CLK>(
    codec: &mut RegisterCodec<D>,
    configuration: &ClockConfiguration,
    clock: &CLK,
) -> Result<(), CanError<D::Error>>
where
    D: SpiDevice<u8>,
    CLK: Clock,
{
    codec.write_masked(osc::ADDRESS, configuration.as_register(), ClockConfiguration::register_mask())?;

    let ready = configuration.ready_mask();
    let target = clock
        .try_now()?
        .checked_add(Milliseconds::new(CLOCK_LOCK_TIMEOUT_MS))
        .ok_or(CanError::ClockError)?;

    loop {
        let register = codec.read_masked(osc::ADDRESS, ready)?;
        if register == ready {
            debug!("Oscillator ready: {configuration:?}");
            return Ok(());
        }

        if clock.try_now()? > target {
            error!(
                "Oscillator did not lock within {CLOCK_LOCK_TIMEOUT_MS} ms: {}",
                Decoded {
                    fields: osc::FIELDS,
                    value: register
                }
            );
            return Err(CanError::ClockLockTimeout);
        }
    }
}

/// Requests the given mode, only the REQOP field is written. `con` provides the
/// remaining bits of the written bytes.
pub fn request_mode<D: SpiDevice<u8>>(
    codec: &mut RegisterCodec<D>,
    con: u32,
    mode: OperationMode,
) -> Result<(), CanError<D::Error>> {
    let value = con::REQOP.replace(con, mode as u32);
    codec.write_masked(con::ADDRESS, value, con::REQOP.mask())
}

/// Reads the current operation mode
pub fn read_mode<D: SpiDevice<u8>>(codec: &mut RegisterCodec<D>) -> Result<OperationMode, CanError<D::Error>> {
    let register = codec.read_masked(con::ADDRESS, con::OPMOD.mask())?;

    Ok(OperationStatus::from_register(register).mode)
}

/// Waits max. 2 ms for the given mode to be reached
pub fn wait_for_mode<D, CLK>(codec: &mut RegisterCodec<D>, mode: OperationMode, clock: &CLK) -> Result<(), CanError<D::Error>>
where
    D: SpiDevice<u8>,
    CLK: Clock,
{
    let target = clock
        .try_now()?
        .checked_add(Milliseconds::new(MODE_TIMEOUT_MS))
        .ok_or(CanError::ClockError)?;

    loop {
        let current = read_mode(codec)?;
        if current == mode {
            return Ok(());
        }

        if clock.try_now()? > target {
            debug!("Device did not enter {mode:?} mode within timeout. Current mode: {current:?}");
            return Err(CanError::ModeTimeout(mode));
        }
    }
}
