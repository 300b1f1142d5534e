//!# Transmit path
//!
//! Every transmit FIFO holds exactly one message object, so a FIFO is a priority slot.
//! A slot is taken from the [SlotMask] before the frame is handed to the bus and
//! given back once its event shows up in the transmit event FIFO. The slot's buffers
//! belong to the bus until it reports both transfers complete, so a slot is only
//! free again once both conditions hold.
//!
//!```
//!# use mcp2517fd::transport::TransferTag;
//!# use mcp2517fd::tx::SlotMask;
//! let mask = SlotMask::new(2);
//!
//! let first = mask.acquire().unwrap();
//! assert_eq!(0, first.slot);
//! assert!(!first.stop_queue);
//!
//! // last free slot stops the queue preemptively
//! let second = mask.acquire().unwrap();
//! assert_eq!(1, second.slot);
//! assert!(second.stop_queue);
//! assert!(mask.acquire().is_none());
//!
//! // releasing a slot of a stopped queue asks for a wake up
//! assert!(mask.release(0));
//! assert_eq!(0, mask.acquire().unwrap().slot);
//!
//! // buffers still owned by the bus delay the wake up
//! mask.begin_transfer(TransferTag::Payload(1));
//! assert!(!mask.release(1));
//! assert!(mask.finish_transfer(TransferTag::Payload(1)));
//!```
use crate::can::CanError;
use crate::codec::Instruction;
use crate::frame::CanFrame;
use crate::message::{TxHeader, HEADER_SIZE, MAX_PAYLOAD_CAN_FD};
use crate::registers::{fifocon, FifoControlReg1};
use crate::transport::{PreparedTransfer, TransferTag, Transport};
use alloc::vec::Vec;
use bytes::BytesMut;
use core::cell::Cell;
use critical_section::Mutex;
use log::{debug, warn};

/// Size of the instruction header preceding every transfer
const COMMAND_SIZE: usize = 2;

/// Result of a successful slot reservation
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SlotGrant {
    pub slot: u8,
    /// Set when the granted slot was the last free one, upstream must pause
    pub stop_queue: bool,
}

#[derive(Copy, Clone, Default)]
struct SlotState {
    pending: u32,
    /// Payload transfers not yet reported complete by the bus
    payloads: u32,
    /// Doorbell transfers not yet reported complete by the bus
    doorbells: u32,
    count: u8,
    stopped: bool,
}

impl SlotState {
    fn busy(&self) -> u32 {
        self.pending | self.payloads | self.doorbells
    }

    fn is_free(&self, slot: u8) -> bool {
        self.busy() & (1 << slot) == 0
    }
}

/// Pending transmit slots and outstanding bus transfers, one bit per slot
pub struct SlotMask {
    state: Mutex<Cell<SlotState>>,
}

impl SlotMask {
    pub fn new(count: u8) -> Self {
        Self {
            state: Mutex::new(Cell::new(SlotState {
                count: count.min(32),
                ..Default::default()
            })),
        }
    }

    /// Marks the lowest free slot as pending
    pub fn acquire(&self) -> Option<SlotGrant> {
        critical_section::with(|cs| {
            let cell = self.state.borrow(cs);
            let mut state = cell.get();

            let all = Self::all(state.count);
            let free = !state.busy() & all;
            if free == 0 {
                state.stopped = true;
                cell.set(state);
                return None;
            }

            let slot = free.trailing_zeros() as u8;
            state.pending |= 1 << slot;

            let stop_queue = state.busy() & all == all;
            state.stopped |= stop_queue;
            cell.set(state);

            Some(SlotGrant { slot, stop_queue })
        })
    }

    /// Clears the pending bit, returns true if the stopped queue may be woken
    pub fn release(&self, slot: u8) -> bool {
        critical_section::with(|cs| {
            let cell = self.state.borrow(cs);
            let mut state = cell.get();

            if slot >= state.count || state.pending & (1 << slot) == 0 {
                return false;
            }

            state.pending &= !(1 << slot);
            let wake = Self::wake(&mut state, slot);
            cell.set(state);

            wake
        })
    }

    /// Marks a transfer as handed to the bus
    pub fn begin_transfer(&self, tag: TransferTag) {
        let bit = Self::bit(tag.slot());

        critical_section::with(|cs| {
            let cell = self.state.borrow(cs);
            let mut state = cell.get();
            match tag {
                TransferTag::Payload(_) => state.payloads |= bit,
                TransferTag::Doorbell(_) => state.doorbells |= bit,
            }
            cell.set(state);
        });
    }

    /// Bus completion of a transfer, returns true if the stopped queue may be woken
    pub fn finish_transfer(&self, tag: TransferTag) -> bool {
        let slot = tag.slot();
        let bit = Self::bit(slot);

        critical_section::with(|cs| {
            let cell = self.state.borrow(cs);
            let mut state = cell.get();

            let outstanding = match tag {
                TransferTag::Payload(_) => &mut state.payloads,
                TransferTag::Doorbell(_) => &mut state.doorbells,
            };
            if *outstanding & bit == 0 {
                return false;
            }
            *outstanding &= !bit;

            let wake = Self::wake(&mut state, slot);
            cell.set(state);

            wake
        })
    }

    /// True while the bus owns one of the slot's buffers
    pub fn in_transfer(&self, slot: u8) -> bool {
        let bit = Self::bit(slot);
        critical_section::with(|cs| {
            let state = self.state.borrow(cs).get();
            (state.payloads | state.doorbells) & bit != 0
        })
    }

    /// Drops all pending bits and sets a new slot count
    pub fn reset(&self, count: u8) {
        critical_section::with(|cs| {
            self.state.borrow(cs).set(SlotState {
                count: count.min(32),
                ..Default::default()
            })
        });
    }

    /// Drops all pending bits, transfers still owned by the bus stay tracked
    pub fn clear(&self) {
        critical_section::with(|cs| {
            let cell = self.state.borrow(cs);
            let state = cell.get();
            cell.set(SlotState {
                count: state.count,
                payloads: state.payloads,
                doorbells: state.doorbells,
                ..Default::default()
            });
        });
    }

    pub fn pending(&self) -> u32 {
        critical_section::with(|cs| self.state.borrow(cs).get().pending)
    }

    pub fn is_pending(&self, slot: u8) -> bool {
        slot < 32 && self.pending() & (1 << slot) != 0
    }

    pub fn count(&self) -> u8 {
        critical_section::with(|cs| self.state.borrow(cs).get().count)
    }

    pub fn is_stopped(&self) -> bool {
        critical_section::with(|cs| self.state.borrow(cs).get().stopped)
    }

    /// Wakes a stopped queue once the slot is entirely free
    fn wake(state: &mut SlotState, slot: u8) -> bool {
        if !state.stopped || !state.is_free(slot) {
            return false;
        }

        state.stopped = false;
        true
    }

    fn bit(slot: u8) -> u32 {
        1u32.checked_shl(slot as u32).unwrap_or(0)
    }

    fn all(count: u8) -> u32 {
        if count >= 32 {
            u32::MAX
        } else {
            (1u32 << count) - 1
        }
    }
}

/// Transfer pair of one transmit slot, built once after the RAM layout is known
#[derive(Debug)]
pub struct PreparedMessage {
    slot: u8,
    fifo: u8,
    address: u16,
    /// Command header, object header and payload
    buffer: BytesMut,
    /// Transmit request + pointer increment
    doorbell: [u8; 3],
}

impl PreparedMessage {
    pub fn new(slot: u8, fifo: u8, address: u16) -> Self {
        let mut buffer = BytesMut::zeroed(COMMAND_SIZE + HEADER_SIZE + MAX_PAYLOAD_CAN_FD);
        buffer[..COMMAND_SIZE].copy_from_slice(&Instruction::Write.header(address));

        let mut doorbell = [0u8; 3];
        doorbell[..COMMAND_SIZE].copy_from_slice(&Instruction::Write.header(fifocon::address(fifo) + 1));
        doorbell[COMMAND_SIZE] = FifoControlReg1::new().with_txreq(true).with_uinc(true).into();

        Self {
            slot,
            fifo,
            address,
            buffer,
            doorbell,
        }
    }

    /// Encodes the frame into the slot buffer, returns the number of bytes to transfer
    pub fn prepare(&mut self, frame: &CanFrame, fd_mode: bool) -> usize {
        let (header, length) = TxHeader::for_frame(frame, self.slot, fd_mode);
        let padded = (length + 3) & !3;

        // stale bytes of the previous frame must never reach the bus
        self.buffer[COMMAND_SIZE..].fill(0);

        let object = &mut self.buffer[COMMAND_SIZE..];
        object[..HEADER_SIZE].copy_from_slice(&header.to_wire());
        let available = length.min(frame.len).min(frame.data.len());
        object[HEADER_SIZE..HEADER_SIZE + available].copy_from_slice(&frame.data[..available]);

        COMMAND_SIZE + HEADER_SIZE + padded
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    pub fn fifo(&self) -> u8 {
        self.fifo
    }

    /// Absolute RAM address of the slot's message object
    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn doorbell(&self) -> &[u8] {
        &self.doorbell
    }
}

/// Transmit side of an opened controller
#[derive(Debug)]
pub struct TxPath {
    slots: Vec<PreparedMessage>,
    fd_mode: bool,
}

impl TxPath {
    pub fn new(slots: Vec<PreparedMessage>, fd_mode: bool) -> Self {
        Self { slots, fd_mode }
    }

    pub fn slots(&self) -> &[PreparedMessage] {
        &self.slots
    }

    /// Writes the frame into the slot's FIFO and rings the doorbell. The pending bit
    /// of the slot must already be set, it stays set on failure. A slot whose buffers
    /// are still owned by the bus is left untouched and reported busy.
    pub fn transmit<T: Transport>(
        &mut self,
        bus: &mut T,
        mask: &SlotMask,
        slot: u8,
        frame: &CanFrame,
    ) -> Result<(), CanError<T::Error>> {
        let fd_mode = self.fd_mode;
        let message = self.slots.get_mut(slot as usize).ok_or(CanError::InvalidState)?;

        if mask.in_transfer(slot) {
            debug!("Slot {slot} still owned by the bus");
            return Err(CanError::TransportBusy(slot));
        }

        let length = message.prepare(frame, fd_mode);

        let payload = PreparedTransfer {
            tag: TransferTag::Payload(slot),
            data: &message.buffer[..length],
        };
        if bus.submit_async(payload).is_err() {
            warn!("Payload transfer of slot {slot} rejected by bus");
            return Err(CanError::TransportBusy(slot));
        }
        mask.begin_transfer(payload.tag);

        let doorbell = PreparedTransfer {
            tag: TransferTag::Doorbell(slot),
            data: &message.doorbell,
        };
        if bus.submit_async(doorbell).is_err() {
            warn!("Doorbell transfer of slot {slot} rejected by bus");
            return Err(CanError::TransportBusy(slot));
        }
        mask.begin_transfer(doorbell.tag);

        debug!("Queued {} bytes in slot {slot} (FIFO {})", length, message.fifo);
        Ok(())
    }
}
