//!# SPI transport
//!
//! Blocking register traffic goes through [embedded_hal::spi::SpiDevice]. On top of that
//! the driver needs bus speed control and a fire-and-forget submission used by the
//! transmit path. The bus reports the completion of every accepted submission back
//! through [crate::can::MCP2517FD::transfer_complete], identified by its [TransferTag].
use embedded_hal::spi::SpiDevice;

/// Asynchronous submission rejected by the bus layer
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BusBusy;

/// Identifies an asynchronous transfer of a transmit slot
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferTag {
    /// Message object write into the slot's RAM window
    Payload(u8),
    /// Transmit request + pointer increment of the slot's FIFO
    Doorbell(u8),
}

impl TransferTag {
    pub fn slot(&self) -> u8 {
        match self {
            TransferTag::Payload(slot) | TransferTag::Doorbell(slot) => *slot,
        }
    }
}

/// Transfer handed to [Transport::submit_async]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PreparedTransfer<'a> {
    pub tag: TransferTag,
    /// Command header followed by the payload
    pub data: &'a [u8],
}

/// SPI bus as seen by the driver
pub trait Transport: SpiDevice<u8> {
    /// Sets the SPI clock
    fn set_clock_speed(&mut self, hz: u32) -> Result<(), Self::Error>;

    /// Sets the number of bits per word
    fn set_word_size(&mut self, bits: u8) -> Result<(), Self::Error>;

    /// Queues a write transfer. The driver leaves `transfer.data` untouched until the
    /// completion of `transfer.tag` is reported back, so a DMA capable bus may keep
    /// pointing at it.
    fn submit_async(&mut self, transfer: PreparedTransfer<'_>) -> Result<(), BusBusy>;
}
