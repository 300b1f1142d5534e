//!# Receive and event path
//!
//! Runs from the interrupt handler. Consumed elements of the transmit event FIFO free
//! their transmit slot and produce a [TxCompletion], received elements become
//! [ReceivedFrame]s. Both are handed to the host through bounded channels.
use crate::can::CanError;
use crate::channel::Channel;
use crate::codec::RegisterCodec;
use crate::fifo::{FifoDescriptor, RX_FIFO};
use crate::frame::CanFrame;
use crate::message::{self, RxHeader, TxHeader, HEADER_SIZE, MAX_PAYLOAD_CAN_FD, TIMESTAMP_SIZE};
use crate::registers::{fifocon, fifosta, int, tefcon, tefsta, FifoControlReg1, FifoStatusReg0};
use crate::tx::SlotMask;
use core::sync::atomic::{AtomicBool, Ordering};
use embedded_hal::spi::SpiDevice;
use log::{debug, warn};

/// Capacity of the receive channel
pub const RX_QUEUE_SIZE: usize = 64;

/// Capacity of the completion channel
pub const COMPLETION_QUEUE_SIZE: usize = 32;

/// Transmission confirmed by the transmit event FIFO
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TxCompletion {
    pub slot: u8,
    pub timestamp: u32,
    /// Set if the queue was stopped and may be woken
    pub wake_queue: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReceivedFrame {
    pub frame: CanFrame,
    pub timestamp: u32,
    /// Filter which accepted the frame
    pub filter_hit: u8,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Statistics {
    pub received: u32,
    pub completed: u32,
    pub rx_overflows: u32,
    /// Items lost because a channel was full
    pub dropped: u32,
    /// Events without a matching pending slot
    pub unexpected_events: u32,
    pub tef_overflows: u32,
}

/// Event side of an opened controller
pub struct RxPath {
    pub(crate) tef: FifoDescriptor,
    pub(crate) rx: FifoDescriptor,
    received: Channel<ReceivedFrame, RX_QUEUE_SIZE>,
    completions: Channel<TxCompletion, COMPLETION_QUEUE_SIZE>,
    statistics: Statistics,
}

impl Default for RxPath {
    fn default() -> Self {
        Self::new(FifoDescriptor::default(), FifoDescriptor::default())
    }
}

impl RxPath {
    pub fn new(tef: FifoDescriptor, rx: FifoDescriptor) -> Self {
        Self {
            tef,
            rx,
            received: Channel::new(),
            completions: Channel::new(),
            statistics: Statistics::default(),
        }
    }

    /// Installs a newly discovered layout, queued items are kept
    pub fn set_layout(&mut self, tef: FifoDescriptor, rx: FifoDescriptor) {
        self.tef = tef;
        self.rx = rx;
    }

    pub fn received(&self) -> &Channel<ReceivedFrame, RX_QUEUE_SIZE> {
        &self.received
    }

    pub fn completions(&self) -> &Channel<TxCompletion, COMPLETION_QUEUE_SIZE> {
        &self.completions
    }

    pub fn statistics(&self) -> Statistics {
        self.statistics
    }

    /// Handles all pending interrupt sources once
    pub fn service<D: SpiDevice<u8>>(
        &mut self,
        codec: &mut RegisterCodec<D>,
        slots: &SlotMask,
        force_quit: &AtomicBool,
    ) -> Result<(), CanError<D::Error>> {
        let flags = codec.read_masked(int::ADDRESS, int::FLAGS.mask())?;

        if int::TEFIF.is_set(flags) {
            self.drain_tef(codec, slots, force_quit)?;
        }

        if int::RXIF.is_set(flags) {
            self.drain_rx(codec, force_quit)?;
        }

        if int::RXOVIF.is_set(flags) {
            self.statistics.rx_overflows += 1;
            warn!("Receive FIFO overflow");
            codec.write_masked(fifosta::address(RX_FIFO), 0, fifosta::RXOVIF.mask())?;
        }

        Ok(())
    }

    fn drain_tef<D: SpiDevice<u8>>(
        &mut self,
        codec: &mut RegisterCodec<D>,
        slots: &SlotMask,
        force_quit: &AtomicBool,
    ) -> Result<(), CanError<D::Error>> {
        for _ in 0..self.tef.element_count {
            if force_quit.load(Ordering::Relaxed) {
                return Ok(());
            }

            let status = codec.read_masked(tefsta::ADDRESS, tefsta::TEFNEIF.mask())?;
            if status == 0 {
                break;
            }

            let mut object = [0u8; HEADER_SIZE + TIMESTAMP_SIZE];
            codec.read_bytes(self.tef.cursor, &mut object)?;

            let mut header = [0u8; HEADER_SIZE];
            header.copy_from_slice(&object[..HEADER_SIZE]);
            let slot = TxHeader::from_wire(header).sequence();
            let timestamp = message::timestamp(&object).unwrap_or_default();

            codec.write_masked(tefcon::ADDRESS, tefcon::UINC.mask(), tefcon::UINC.mask())?;
            self.tef.advance();

            if !slots.is_pending(slot) {
                warn!("Transmit event for slot {slot} which is not pending");
                self.statistics.unexpected_events += 1;
                continue;
            }

            let wake_queue = slots.release(slot);
            self.statistics.completed += 1;

            let completion = TxCompletion {
                slot,
                timestamp,
                wake_queue,
            };
            if self.completions.send(completion).is_err() {
                self.statistics.dropped += 1;
            }
        }

        let overflow = codec.read_masked(tefsta::ADDRESS, tefsta::TEFOVIF.mask())?;
        if overflow != 0 {
            self.statistics.tef_overflows += 1;
            warn!("Transmit event FIFO overflow");
            codec.write_masked(tefsta::ADDRESS, 0, tefsta::TEFOVIF.mask())?;
        }

        Ok(())
    }

    fn drain_rx<D: SpiDevice<u8>>(&mut self, codec: &mut RegisterCodec<D>, force_quit: &AtomicBool) -> Result<(), CanError<D::Error>> {
        let payload_size = (self.rx.element_size as usize)
            .saturating_sub(HEADER_SIZE + TIMESTAMP_SIZE)
            .min(MAX_PAYLOAD_CAN_FD);
        let doorbell: u8 = FifoControlReg1::new().with_uinc(true).into();

        for _ in 0..self.rx.element_count {
            if force_quit.load(Ordering::Relaxed) {
                break;
            }

            let mut status = [0u8; 1];
            codec.read_bytes(fifosta::address(RX_FIFO), &mut status)?;
            if !FifoStatusReg0::from(status[0]).tfnrfnif() {
                break;
            }

            let mut object = [0u8; HEADER_SIZE + TIMESTAMP_SIZE + MAX_PAYLOAD_CAN_FD];
            let object = &mut object[..HEADER_SIZE + TIMESTAMP_SIZE + payload_size];
            codec.read_bytes(self.rx.cursor, object)?;

            codec.write_bytes(fifocon::address(RX_FIFO) + 1, &[doorbell])?;
            self.rx.advance();

            let mut header = [0u8; HEADER_SIZE];
            header.copy_from_slice(&object[..HEADER_SIZE]);
            let header = RxHeader::from_wire(header);

            let frame = match header.to_frame(&object[HEADER_SIZE + TIMESTAMP_SIZE..]) {
                Some(frame) => frame,
                None => {
                    warn!("Dropping received object with invalid header {header:?}");
                    self.statistics.dropped += 1;
                    continue;
                }
            };

            let received = ReceivedFrame {
                frame,
                timestamp: message::timestamp(object).unwrap_or_default(),
                filter_hit: header.filter_hit(),
            };
            self.statistics.received += 1;

            if self.received.send(received).is_err() {
                debug!("Receive channel full, dropping frame");
                self.statistics.dropped += 1;
            }
        }

        Ok(())
    }
}
