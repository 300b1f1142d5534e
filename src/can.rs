//!# CAN Controller device
//!
//! [MCP2517FD] owns the bus and the board resources of one controller. Methods taking
//! `&mut self` are serialized by the borrow, which covers the open/stop/suspend
//! sequences. The pending slot mask and the channels are additionally guarded by
//! critical sections, so completions and received frames can be consumed through
//! shared references.
//!
//! Typical sequence: [MCP2517FD::probe] once, then [MCP2517FD::open], [MCP2517FD::send]
//! from the host queue and [MCP2517FD::handle_interrupt] from the interrupt line.
use crate::bittiming::{BitTimingConst, BitTimings, DATA, NOMINAL};
use crate::bringup::{configure_oscillator, request_mode, wait_for_mode, BringUp, BringUpPath};
use crate::channel::Channel;
use crate::codec::RegisterCodec;
use crate::config::{ClockConfiguration, ConfigError, Configuration, MtuMode};
use crate::fifo::{configure_fifos, FifoLayout};
use crate::frame::CanFrame;
use crate::platform::{power_enable, AfterSuspend, Board, InterruptLine, Regulator};
use crate::registers::{con, dbtcfg, int, nbtcfg, tdc, tscon};
use crate::rx::{ReceivedFrame, RxPath, Statistics, TxCompletion, COMPLETION_QUEUE_SIZE, RX_QUEUE_SIZE};
use crate::status::OperationMode;
use crate::transport::{TransferTag, Transport};
use crate::tx::{SlotGrant, SlotMask, TxPath};
use core::fmt::Debug;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicBool, Ordering};
use embedded_hal::delay::DelayNs;
use embedded_time::Clock;
use log::{debug, error, info, warn};

/// SPI word size
const WORD_SIZE: u8 = 8;

/// Possible CAN errors during bring-up, setup, transmission and reception
#[derive(Debug, PartialEq)]
pub enum CanError<E> {
    /// SPI bus transfer error
    TransportError(E),
    /// Masked register access with an empty mask
    InvalidMask,
    /// Access outside of the address space or the RAM window
    InvalidAddress(u16),
    /// No controller in a known state found
    DeviceNotFound,
    /// Oscillator status makes no sense, power cycle required
    DeviceIndeterminate,
    /// Oscillator or PLL not ready within timeout
    ClockLockTimeout,
    /// MTU is neither classic CAN nor CAN FD
    UnsupportedMtu(usize),
    /// All transmit slots are pending
    NoFreeSlot,
    /// Bus rejected an asynchronous transfer of the given slot
    TransportBusy(u8),
    /// Internal clock error
    ClockError,
    /// Input clock outside of [1 MHz, 40 MHz]
    ClockOutOfRange(u32),
    /// System clock above 40 MHz
    SystemClockTooHigh(u32),
    /// Bit timing outside of the controller limits
    InvalidBitTiming,
    /// Device did not enter the given mode within timeout of 2 ms
    ModeTimeout(OperationMode),
    /// Regulator could not be switched
    PowerError,
    /// Operation not allowed in the current lifecycle state
    InvalidState,
}

impl<E> From<embedded_time::clock::Error> for CanError<E> {
    fn from(_error: embedded_time::clock::Error) -> Self {
        CanError::ClockError
    }
}

impl<E> From<ConfigError> for CanError<E> {
    fn from(error: ConfigError) -> Self {
        match error {
            ConfigError::ClockOutOfRange(hz) => CanError::ClockOutOfRange(hz),
            ConfigError::SystemClockTooHigh(hz) => CanError::SystemClockTooHigh(hz),
            ConfigError::UnsupportedMtu(mtu) => CanError::UnsupportedMtu(mtu),
            ConfigError::InvalidBitTiming => CanError::InvalidBitTiming,
        }
    }
}

/// Lifecycle of the network interface
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InterfaceState {
    /// Not probed yet or probe failed
    Detached,
    /// Probed, controller sleeping
    Down,
    /// Opened, controller running
    Up,
    Suspended,
}

/// Main MCP2517FD CAN controller device
pub struct MCP2517FD<D: Transport, R: Regulator, I: InterruptLine, CLK: Clock> {
    codec: RegisterCodec<D>,
    board: Board<R, I>,
    config: Configuration,
    timings: BitTimings,

    /// CON bits kept across mode requests
    con: u32,
    system_clock_hz: u32,

    state: InterfaceState,
    after_suspend: AfterSuspend,
    /// Supplies switched on by the driver, only those are switched off again
    core_on: bool,
    transceiver_on: bool,
    force_quit: AtomicBool,

    slots: SlotMask,
    tx: Option<TxPath>,
    rx: RxPath,

    /// System clock
    clock: PhantomData<CLK>,
}

impl<D, R, I, CLK> MCP2517FD<D, R, I, CLK>
where
    D: Transport,
    R: Regulator,
    I: InterruptLine,
    CLK: Clock,
{
    pub fn new(bus: D, board: Board<R, I>, config: Configuration) -> Self {
        Self {
            codec: RegisterCodec::new(bus),
            board,
            config,
            timings: BitTimings::default(),
            con: con::DEFAULT,
            system_clock_hz: 0,
            state: InterfaceState::Detached,
            after_suspend: AfterSuspend::empty(),
            core_on: false,
            transceiver_on: false,
            force_quit: AtomicBool::new(false),
            slots: SlotMask::new(0),
            tx: None,
            rx: RxPath::default(),
            clock: Default::default(),
        }
    }

    /// Identifies the controller and puts it to sleep until opened
    pub fn probe<DL: DelayNs>(&mut self, delay: &mut DL) -> Result<(), CanError<D::Error>> {
        if self.state != InterfaceState::Detached {
            return Err(CanError::InvalidState);
        }

        let result = self.probe_device(delay);

        if let Err(err) = &result {
            if matches!(err, CanError::DeviceNotFound) {
                error!("Cannot initialize MCP2517FD. Wrong wiring?");
            } else {
                error!("Probe failed: {err:?}");
            }
            // only undoes what was acquired
            self.power(Supply::Core, false).ok();
        }

        result
    }

    fn probe_device<DL: DelayNs>(&mut self, delay: &mut DL) -> Result<(), CanError<D::Error>> {
        ClockConfiguration::verify_input(self.config.input_clock_hz)?;
        let system_clock_hz = self.config.clock()?.system_clock_hz(self.config.input_clock_hz)?;

        self.setup_bus(self.config.setup_spi_speed())?;
        self.power(Supply::Core, true)?;

        BringUp::new(&mut self.codec, delay).run()?;

        // no clock source for polling here, the controller applies the request on its own
        request_mode(&mut self.codec, self.con, OperationMode::Sleep)?;

        self.system_clock_hz = system_clock_hz;
        self.state = InterfaceState::Down;
        info!("MCP2517FD successfully initialized");

        Ok(())
    }

    /// Brings the controller up and starts normal operation
    pub fn open<DL: DelayNs>(&mut self, delay: &mut DL, clock: &CLK) -> Result<(), CanError<D::Error>> {
        if self.state != InterfaceState::Down {
            return Err(CanError::InvalidState);
        }

        self.power(Supply::Transceiver, true)?;
        self.force_quit.store(false, Ordering::SeqCst);

        if let Err(err) = self.setup(delay, clock) {
            error!("Open failed: {err:?}");
            self.open_clean();
            return Err(err);
        }

        self.board.irq.enable();
        self.state = InterfaceState::Up;

        Ok(())
    }

    fn setup<DL: DelayNs>(&mut self, delay: &mut DL, clock: &CLK) -> Result<(), CanError<D::Error>> {
        self.setup_bus(self.config.setup_spi_speed())?;

        if BringUp::new(&mut self.codec, delay).run()? == BringUpPath::Forced {
            warn!("Controller needed a forced reset");
        }

        let clock_config = self.config.clock()?;
        configure_oscillator(&mut self.codec, &clock_config, clock)?;
        self.system_clock_hz = clock_config.system_clock_hz(self.config.input_clock_hz)?;

        self.con = self.control_register();
        self.codec.write(con::ADDRESS, self.con)?;

        self.write_bit_timing()?;
        self.codec.write(tscon::ADDRESS, tscon::TBCEN.mask())?;

        let layout = configure_fifos(&mut self.codec, self.con, self.config.mtu, self.config.ctrl.one_shot, clock)?;
        self.install(layout);

        let enable = int::TEFIE.mask() | int::RXIE.mask() | int::RXOVIE.mask();
        self.codec.write_masked(int::ADDRESS, enable, 0xFFFF_0000)?;

        let mode = self.run_mode();
        request_mode(&mut self.codec, self.con, mode)?;
        wait_for_mode(&mut self.codec, mode, clock)?;

        self.setup_bus(self.config.run_spi_speed(self.system_clock_hz))?;
        debug!("Running in {mode:?} mode at {} Hz", self.system_clock_hz);

        Ok(())
    }

    /// Reverse cleanup of a failed open
    fn open_clean(&mut self) {
        self.board.irq.disable();
        self.tx = None;
        self.slots.reset(0);
        self.power(Supply::Transceiver, false).ok();
    }

    /// Stops normal operation and puts the controller to sleep
    pub fn stop(&mut self) -> Result<(), CanError<D::Error>> {
        if self.state != InterfaceState::Up {
            return Err(CanError::InvalidState);
        }

        self.force_quit.store(true, Ordering::SeqCst);
        self.board.irq.disable();

        let result = request_mode(&mut self.codec, self.con, OperationMode::Sleep);
        self.slots.clear();
        // completions refer to slots which are no longer pending
        self.rx.completions().clear();
        self.state = InterfaceState::Down;
        self.power(Supply::Transceiver, false)?;

        result
    }

    /// Quiesces interrupts and power, the FIFO layout stays untouched
    pub fn suspend(&mut self) -> Result<(), CanError<D::Error>> {
        if !matches!(self.state, InterfaceState::Up | InterfaceState::Down) {
            return Err(CanError::InvalidState);
        }

        self.force_quit.store(true, Ordering::SeqCst);
        self.board.irq.disable();

        if self.state == InterfaceState::Up {
            self.power(Supply::Transceiver, false)?;
            self.after_suspend = AfterSuspend::UP;
        } else {
            self.after_suspend = AfterSuspend::DOWN;
        }

        self.power(Supply::Core, false)?;
        self.after_suspend |= AfterSuspend::POWER;
        self.state = InterfaceState::Suspended;

        Ok(())
    }

    /// Restores what [Self::suspend] tore down
    pub fn resume(&mut self) -> Result<(), CanError<D::Error>> {
        if self.state != InterfaceState::Suspended {
            return Err(CanError::InvalidState);
        }

        if self.after_suspend.contains(AfterSuspend::POWER) {
            self.power(Supply::Core, true)?;
        }

        if self.after_suspend.contains(AfterSuspend::UP) {
            self.power(Supply::Transceiver, true)?;
            self.after_suspend |= AfterSuspend::RESTART;
        }

        if self.after_suspend.contains(AfterSuspend::RESTART) {
            let mode = self.run_mode();
            request_mode(&mut self.codec, self.con, mode)?;
            self.state = InterfaceState::Up;
        } else {
            self.state = InterfaceState::Down;
        }

        self.after_suspend = AfterSuspend::empty();
        self.force_quit.store(false, Ordering::SeqCst);
        self.board.irq.enable();

        Ok(())
    }

    /// Reserves a slot and transmits the frame
    pub fn send(&mut self, frame: &CanFrame) -> Result<SlotGrant, CanError<D::Error>> {
        let grant = self.acquire_slot()?;
        self.transmit(grant.slot, frame)?;

        Ok(grant)
    }

    /// Reserves the lowest free transmit slot
    pub fn acquire_slot(&self) -> Result<SlotGrant, CanError<D::Error>> {
        if self.state != InterfaceState::Up {
            return Err(CanError::InvalidState);
        }

        let grant = self.slots.acquire().ok_or(CanError::NoFreeSlot)?;
        if grant.stop_queue {
            debug!("Last transmit slot {} taken, stopping queue", grant.slot);
        }

        Ok(grant)
    }

    /// Transmits the frame in an already reserved slot
    pub fn transmit(&mut self, slot: u8, frame: &CanFrame) -> Result<(), CanError<D::Error>> {
        if !self.slots.is_pending(slot) {
            return Err(CanError::InvalidState);
        }

        let tx = self.tx.as_mut().ok_or(CanError::InvalidState)?;
        tx.transmit(self.codec.device_mut(), &self.slots, slot, frame)
    }

    /// Called by the bus once an asynchronous transfer finished. Returns true if the
    /// stopped queue may be woken, as the slot only became free now.
    pub fn transfer_complete(&self, tag: TransferTag) -> bool {
        let wake = self.slots.finish_transfer(tag);
        if wake {
            debug!("Transfer {tag:?} done, waking queue");
        }

        wake
    }

    /// Interrupt handler
    pub fn handle_interrupt(&mut self) -> Result<(), CanError<D::Error>> {
        if self.force_quit.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.board.irq.disable();
        let result = self.rx.service(&mut self.codec, &self.slots, &self.force_quit);
        self.board.irq.enable();

        result
    }

    /// Sets nominal and data bit timing, applied on the next open
    pub fn set_bittiming(&mut self, timings: BitTimings) -> Result<(), CanError<D::Error>> {
        if self.state == InterfaceState::Up {
            return Err(CanError::InvalidState);
        }

        timings.validate()?;
        self.timings = timings;

        Ok(())
    }

    /// Changes frame format and FIFO sizing, applied on the next open
    pub fn set_mtu(&mut self, mtu: usize) -> Result<(), CanError<D::Error>> {
        if self.state == InterfaceState::Up {
            return Err(CanError::InvalidState);
        }

        self.config.mtu = MtuMode::from_mtu(mtu)?;
        Ok(())
    }

    /// Powers the controller down and returns the bus
    pub fn release(mut self) -> D {
        if self.state == InterfaceState::Up {
            self.stop().ok();
        }

        self.power(Supply::Core, false).ok();
        self.codec.release()
    }

    /// Resolved controller clock, reported to the host
    pub fn clock_frequency(&self) -> u32 {
        self.system_clock_hz
    }

    /// Bit timing limits of arbitration and data phase
    pub fn bittiming_const(&self) -> (BitTimingConst, BitTimingConst) {
        (NOMINAL, DATA)
    }

    pub fn bittiming(&self) -> BitTimings {
        self.timings
    }

    pub fn state(&self) -> InterfaceState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == InterfaceState::Up
    }

    pub fn is_queue_stopped(&self) -> bool {
        self.slots.is_stopped()
    }

    pub fn force_quit(&self) -> bool {
        self.force_quit.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> &Channel<ReceivedFrame, RX_QUEUE_SIZE> {
        self.rx.received()
    }

    pub fn completions(&self) -> &Channel<TxCompletion, COMPLETION_QUEUE_SIZE> {
        self.rx.completions()
    }

    pub fn statistics(&self) -> Statistics {
        self.rx.statistics()
    }

    pub fn slots(&self) -> &SlotMask {
        &self.slots
    }

    pub fn tx(&self) -> Option<&TxPath> {
        self.tx.as_ref()
    }

    pub fn codec(&self) -> &RegisterCodec<D> {
        &self.codec
    }

    pub fn codec_mut(&mut self) -> &mut RegisterCodec<D> {
        &mut self.codec
    }

    pub fn board(&self) -> &Board<R, I> {
        &self.board
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    fn install(&mut self, layout: FifoLayout) {
        self.slots.reset(layout.tx_count());
        self.rx.set_layout(layout.tef, layout.rx);
        self.tx = Some(TxPath::new(layout.prepared, layout.mode == MtuMode::Fd));
    }

    fn write_bit_timing(&mut self) -> Result<(), CanError<D::Error>> {
        self.timings.validate()?;

        self.codec.write(nbtcfg::ADDRESS, self.timings.nominal.as_nominal_register())?;

        if self.config.mtu == MtuMode::Fd {
            self.codec.write(dbtcfg::ADDRESS, self.timings.data.as_data_register())?;
            self.codec.write(tdc::ADDRESS, self.timings.data.as_tdc_register())?;
        }

        Ok(())
    }

    /// CON value for normal operation, requesting Config mode
    fn control_register(&self) -> u32 {
        let ctrl = &self.config.ctrl;

        let mut value = con::DEFAULT & !con::TXQEN.mask();
        value = con::STEF.replace(value, 1);
        value = con::ISOCRCEN.replace(value, !ctrl.fd_non_iso as u32);
        value = con::RTXAT.replace(value, ctrl.one_shot as u32);

        con::REQOP.replace(value, OperationMode::Config as u32)
    }

    fn run_mode(&self) -> OperationMode {
        let ctrl = &self.config.ctrl;

        if ctrl.listen_only {
            OperationMode::ListenOnly
        } else if ctrl.loopback {
            OperationMode::InternalLoopback
        } else if self.config.mtu == MtuMode::Fd {
            OperationMode::Mixed
        } else {
            OperationMode::Can2_0
        }
    }

    fn setup_bus(&mut self, speed: u32) -> Result<(), CanError<D::Error>> {
        let bus = self.codec.device_mut();
        bus.set_word_size(WORD_SIZE).map_err(CanError::TransportError)?;
        bus.set_clock_speed(speed).map_err(CanError::TransportError)
    }

    /// Switches a supply, keeping enable and disable calls balanced
    fn power(&mut self, supply: Supply, enable: bool) -> Result<(), CanError<D::Error>> {
        let (regulator, on) = match supply {
            Supply::Core => (&mut self.board.power, &mut self.core_on),
            Supply::Transceiver => (&mut self.board.transceiver, &mut self.transceiver_on),
        };

        if *on == enable {
            return Ok(());
        }

        power_enable(regulator, enable).map_err(|err| {
            error!("Failed to switch {supply:?} supply: {err:?}");
            CanError::PowerError
        })?;
        *on = enable;

        Ok(())
    }
}

#[derive(Copy, Clone, Debug)]
enum Supply {
    Core,
    Transceiver,
}

impl<D, R, I, CLK> Debug for MCP2517FD<D, R, I, CLK>
where
    D: Transport,
    R: Regulator,
    I: InterruptLine,
    CLK: Clock,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MCP2517FD")
            .field("state", &self.state)
            .field("system_clock_hz", &self.system_clock_hz)
            .field("pending", &self.slots.pending())
            .finish()
    }
}
