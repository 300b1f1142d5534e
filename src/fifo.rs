//!# FIFO layout
//!
//! The controller places its FIFOs into message RAM on its own, in FIFO order and
//! starting with the transmit event FIFO. The driver programs sizes only and reads
//! back the assigned windows while the controller sits in internal loopback mode.
//!
//! FIFO 1 receives. Transmit slot `i` uses FIFO `1 + tx_count - i`, so slot 0 gets
//! the highest FIFO number, the highest RAM address and the highest priority.
use crate::bringup::{request_mode, wait_for_mode};
use crate::can::CanError;
use crate::codec::RegisterCodec;
use crate::config::MtuMode;
use crate::registers::{fifocon, fifoua, fltcon, fltmask, fltobj, tefcon, FilterControlByte, FILTER_COUNT, RAM_SIZE, RAM_START, TEFUA};
use crate::status::OperationMode;
use crate::tx::PreparedMessage;
use alloc::vec::Vec;
use embedded_hal::spi::SpiDevice;
use embedded_time::Clock;
use log::{debug, warn};

/// FIFO receiving all frames
pub const RX_FIFO: u8 = 1;

/// Retransmission attempts unless one-shot mode is requested (unlimited)
const TXAT_UNLIMITED: u32 = 0b11;

/// Ring of equally sized message objects inside the RAM window
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FifoDescriptor {
    /// Absolute address of the first element
    pub start: u16,
    /// Absolute address right after the last element
    pub end: u16,
    /// Absolute address of the next element to consume
    pub cursor: u16,
    pub element_size: u16,
    pub element_count: u8,
}

impl FifoDescriptor {
    pub fn new(start: u16, element_size: u16, element_count: u8) -> Self {
        Self {
            start,
            end: start + element_size * element_count as u16,
            cursor: start,
            element_size,
            element_count,
        }
    }

    /// Moves the cursor to the next element, wrapping at the end boundary
    pub fn advance(&mut self) {
        self.cursor += self.element_size;

        if self.cursor + self.element_size > self.end {
            self.cursor = self.start;
        }
    }

    /// Rewinds the cursor to the first element
    pub fn rewind(&mut self) {
        self.cursor = self.start;
    }
}

/// FIFO layout discovered during setup
#[derive(Debug)]
pub struct FifoLayout {
    pub mode: MtuMode,
    pub tef: FifoDescriptor,
    pub rx: FifoDescriptor,
    /// Indexed by slot
    pub tx: Vec<FifoDescriptor>,
    /// Transfer pairs, indexed by slot
    pub prepared: Vec<PreparedMessage>,
}

impl FifoLayout {
    pub fn tx_count(&self) -> u8 {
        self.tx.len() as u8
    }
}

/// FIFO number of the given transmit slot
pub fn tx_fifo(mode: MtuMode, slot: u8) -> u8 {
    RX_FIFO + mode.tx_slots() - slot
}

/// Transmit priority of a slot, the controller sends higher values first
pub fn tx_priority(mode: MtuMode, slot: u8) -> u8 {
    mode.tx_slots() - 1 - slot
}

/// Control register values, derived from the MTU mode
pub(crate) struct FifoPlan {
    mode: MtuMode,
    one_shot: bool,
}

impl FifoPlan {
    pub(crate) fn new(mode: MtuMode, one_shot: bool) -> Self {
        Self { mode, one_shot }
    }

    pub(crate) fn tef_control(&self) -> u32 {
        tefcon::FSIZE.pack(self.mode.tx_slots() as u32 - 1)
            | tefcon::TEFTSEN.mask()
            | tefcon::TEFNEIE.mask()
            | tefcon::TEFOVIE.mask()
    }

    pub(crate) fn rx_control(&self) -> u32 {
        fifocon::PLSIZE.pack(self.mode.plsize() as u32)
            | fifocon::FSIZE.pack(self.mode.rx_slots() as u32 - 1)
            | fifocon::TFNRFNIE.mask()
            | fifocon::TFHRFHIE.mask()
            | fifocon::TFERFFIE.mask()
            | fifocon::RXTSEN.mask()
            | fifocon::FRESET.mask()
    }

    pub(crate) fn tx_control(&self, slot: u8) -> u32 {
        let attempts = if self.one_shot { 0 } else { TXAT_UNLIMITED };

        fifocon::TXEN.mask()
            | fifocon::FRESET.mask()
            | fifocon::TXPRI.pack(tx_priority(self.mode, slot) as u32)
            | fifocon::TXAT.pack(attempts)
            | fifocon::FSIZE.pack(0)
            | fifocon::PLSIZE.pack(self.mode.plsize() as u32)
    }
}

/// Programs all FIFOs and filters, then discovers the RAM windows. Expects Config mode
/// and returns to it. `con` holds the CON bits kept across mode requests.
pub fn configure_fifos<D, CLK>(
    codec: &mut RegisterCodec<D>,
    con: u32,
    mode: MtuMode,
    one_shot: bool,
    clock: &CLK,
) -> Result<FifoLayout, CanError<D::Error>>
where
    D: SpiDevice<u8>,
    CLK: Clock,
{
    let plan = FifoPlan::new(mode, one_shot);
    let tx_count = mode.tx_slots();

    codec.write(tefcon::ADDRESS, plan.tef_control())?;
    codec.write(fifocon::address(RX_FIFO), plan.rx_control())?;

    configure_filters(codec)?;

    for slot in 0..tx_count {
        codec.write(fifocon::address(tx_fifo(mode, slot)), plan.tx_control(slot))?;
    }

    // RAM pointers are only assigned outside of Config mode
    request_mode(codec, con, OperationMode::InternalLoopback)?;
    wait_for_mode(codec, OperationMode::InternalLoopback, clock)?;

    let mut tx = Vec::with_capacity(tx_count as usize);
    let mut prepared = Vec::with_capacity(tx_count as usize);
    let mut next_start = None;

    // highest slot sits lowest in RAM
    for slot in (0..tx_count).rev() {
        let fifo = tx_fifo(mode, slot);
        let start = read_user_address(codec, fifoua(fifo), mode.tx_element_size())?;

        if let Some(previous) = next_start {
            if start <= previous {
                warn!("Transmit FIFO {fifo} at 0x{start:03x} not above 0x{previous:03x}");
            }
        }
        next_start = Some(start);

        tx.push(FifoDescriptor::new(start, mode.tx_element_size(), 1));
        prepared.push(PreparedMessage::new(slot, fifo, start));
    }
    tx.reverse();
    prepared.reverse();

    // each slot ends where the next lower slot starts
    for slot in 1..tx.len() {
        tx[slot].end = tx[slot - 1].start;
    }

    let lowest_tx = tx.last().map(|fifo| fifo.start).unwrap_or(RAM_START + RAM_SIZE);

    let mut rx = FifoDescriptor::new(
        read_user_address(codec, fifoua(RX_FIFO), mode.rx_element_size())?,
        mode.rx_element_size(),
        mode.rx_slots(),
    );
    rx.end = lowest_tx;

    let mut tef = FifoDescriptor::new(
        read_user_address(codec, TEFUA, mode.tef_element_size())?,
        mode.tef_element_size(),
        tx_count,
    );
    tef.end = rx.start;

    request_mode(codec, con, OperationMode::Config)?;
    wait_for_mode(codec, OperationMode::Config, clock)?;

    debug!(
        "FIFO layout: TEF 0x{:03x}-0x{:03x}, RX 0x{:03x}-0x{:03x}, TX 0x{:03x}-0x{:03x}",
        tef.start,
        tef.end,
        rx.start,
        rx.end,
        lowest_tx,
        tx.first().map(|fifo| fifo.end).unwrap_or(lowest_tx)
    );

    Ok(FifoLayout {
        mode,
        tef,
        rx,
        tx,
        prepared,
    })
}

/// Disables all filters, then lets filter 0 pass everything into the receive FIFO
fn configure_filters<D: SpiDevice<u8>>(codec: &mut RegisterCodec<D>) -> Result<(), CanError<D::Error>> {
    for filter in (0..FILTER_COUNT).step_by(4) {
        codec.write(fltcon::register(filter), 0)?;
    }

    for filter in 0..FILTER_COUNT {
        codec.write(fltobj(filter), 0)?;
        codec.write(fltmask(filter), 0)?;
    }

    let control: u8 = FilterControlByte::new().with_flten(true).with_fbp(RX_FIFO).into();
    let field = fltcon::byte(0);

    codec.write_masked(fltcon::register(0), field.pack(control as u32), field.mask())
}

/// Reads a user address register and converts it to an absolute RAM address
fn read_user_address<D: SpiDevice<u8>>(
    codec: &mut RegisterCodec<D>,
    register: u16,
    element_size: u16,
) -> Result<u16, CanError<D::Error>> {
    let offset = codec.read(register)?;
    let address = offset as u64 + RAM_START as u64;

    if address + element_size as u64 > (RAM_START + RAM_SIZE) as u64 {
        warn!("User address register 0x{register:03x} points outside of RAM: 0x{offset:08x}");
        return Err(CanError::InvalidAddress(address.min(u16::MAX as u64) as u16));
    }

    Ok(address as u16)
}
