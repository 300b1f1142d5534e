//!# Platform collaborators
//!
//! Power rails and the interrupt line are owned by the board. The driver only switches
//! them on and off around its own lifecycle.
use bitflags::bitflags;
use core::fmt::Debug;

/// Switchable power supply
pub trait Regulator {
    type Error: Debug;

    fn enable(&mut self) -> Result<(), Self::Error>;

    fn disable(&mut self) -> Result<(), Self::Error>;
}

/// Interrupt line of the controller
pub trait InterruptLine {
    fn enable(&mut self);

    fn disable(&mut self);
}

/// Board resources of one controller instance
pub struct Board<R, I> {
    /// Optional core supply
    pub power: Option<R>,
    /// Optional transceiver supply
    pub transceiver: Option<R>,
    pub irq: I,
}

impl<R: Regulator, I: InterruptLine> Board<R, I> {
    pub fn new(power: Option<R>, transceiver: Option<R>, irq: I) -> Self {
        Self {
            power,
            transceiver,
            irq,
        }
    }
}

/// Switches an optional supply, missing supplies are a no-op
pub(crate) fn power_enable<R: Regulator>(regulator: &mut Option<R>, enable: bool) -> Result<(), R::Error> {
    match regulator {
        Some(regulator) if enable => regulator.enable(),
        Some(regulator) => regulator.disable(),
        None => Ok(()),
    }
}

bitflags! {
    /// What suspend tore down, so resume can restore exactly that
    #[derive(Default)]
    pub struct AfterSuspend: u8 {
        const UP = 1;
        const DOWN = 2;
        const POWER = 4;
        const RESTART = 8;
    }
}
