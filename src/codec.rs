//!# Register codec
//!
//! Every access starts with a two byte command header (instruction in the top nibble,
//! 12-bit address below), followed by the register payload in little endian order.
//!
//! Masked accesses only transfer the bytes covering the mask:
//!
//!```
//!# use mcp2517fd::codec::ByteSpan;
//! // mask covering bits 8..=19 touches bytes 1 and 2 only
//! let span = ByteSpan::of_mask(0x000F_FF00).unwrap();
//! assert_eq!(1, span.first);
//! assert_eq!(2, span.last);
//! assert_eq!(2, span.len());
//!```
use crate::can::CanError;
use crate::registers::ADDRESS_SPACE;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use embedded_hal::spi::{Operation as SpiOperation, SpiDevice};

/// Register operation type
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    Reset = 0b0000,
    Write = 0b0010,
    Read = 0b0011,
}

impl Instruction {
    /// Encodes the big endian command header for the given address
    pub fn header(self, address: u16) -> [u8; 2] {
        let mut buffer = [0u8; 2];
        BigEndian::write_u16(&mut buffer, ((self as u16) << 12) | (address & 0x0FFF));

        buffer
    }
}

/// Inclusive byte range of a 32-bit register covered by a mask
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ByteSpan {
    pub first: u8,
    pub last: u8,
}

impl ByteSpan {
    /// Returns None for an empty mask
    pub fn of_mask(mask: u32) -> Option<Self> {
        if mask == 0 {
            return None;
        }

        Some(Self {
            first: (mask.trailing_zeros() / 8) as u8,
            last: ((31 - mask.leading_zeros()) / 8) as u8,
        })
    }

    /// Number of payload bytes transferred
    pub fn len(&self) -> usize {
        (self.last - self.first + 1) as usize
    }

    fn range(&self) -> core::ops::RangeInclusive<usize> {
        self.first as usize..=self.last as usize
    }
}

/// Register level access to the controller over a SPI device
#[derive(Debug)]
pub struct RegisterCodec<D> {
    device: D,
}

impl<D: SpiDevice<u8>> RegisterCodec<D> {
    pub fn new(device: D) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Returns the underlying device
    pub fn release(self) -> D {
        self.device
    }

    /// Reset internal registers to default and switch to Configuration mode
    pub fn reset(&mut self) -> Result<(), CanError<D::Error>> {
        let buffer = Instruction::Reset.header(0);
        self.device.write(&buffer).map_err(CanError::TransportError)
    }

    /// 4-byte SFR read
    pub fn read(&mut self, register: u16) -> Result<u32, CanError<D::Error>> {
        let mut data = [0u8; 4];
        self.read_bytes(register, &mut data)?;

        Ok(LittleEndian::read_u32(&data))
    }

    /// 4-byte SFR write
    pub fn write(&mut self, register: u16, value: u32) -> Result<(), CanError<D::Error>> {
        let mut data = [0u8; 4];
        LittleEndian::write_u32(&mut data, value);

        self.write_bytes(register, &data)
    }

    /// Reads only the bytes covered by `mask`, returns the register value masked accordingly
    pub fn read_masked(&mut self, register: u16, mask: u32) -> Result<u32, CanError<D::Error>> {
        let span = ByteSpan::of_mask(mask).ok_or(CanError::InvalidMask)?;
        let mut data = [0u8; 4];

        self.read_bytes(Self::offset(register, span)?, &mut data[span.range()])?;

        Ok(LittleEndian::read_u32(&data) & mask)
    }

    /// Writes only the bytes covered by `mask`. Bits outside of `mask` but inside the
    /// transferred bytes are taken from `value`.
    pub fn write_masked(&mut self, register: u16, value: u32, mask: u32) -> Result<(), CanError<D::Error>> {
        let span = ByteSpan::of_mask(mask).ok_or(CanError::InvalidMask)?;
        let mut data = [0u8; 4];
        LittleEndian::write_u32(&mut data, value);

        self.write_bytes(Self::offset(register, span)?, &data[span.range()])
    }

    /// Reads raw bytes starting at the given address (SFR or RAM)
    pub fn read_bytes(&mut self, address: u16, data: &mut [u8]) -> Result<(), CanError<D::Error>> {
        Self::verify_span(address, data.len())?;
        let header = Instruction::Read.header(address);

        let mut operations = [SpiOperation::Write(&header), SpiOperation::Read(data)];
        self.device.transaction(&mut operations).map_err(CanError::TransportError)
    }

    /// Writes raw bytes starting at the given address (SFR or RAM)
    pub fn write_bytes(&mut self, address: u16, data: &[u8]) -> Result<(), CanError<D::Error>> {
        Self::verify_span(address, data.len())?;

        // header and payload in one buffer, so the device sees a single write
        let mut buffer = [0u8; 2 + 4];
        if data.len() <= 4 {
            buffer[..2].copy_from_slice(&Instruction::Write.header(address));
            buffer[2..2 + data.len()].copy_from_slice(data);

            return self
                .device
                .write(&buffer[..2 + data.len()])
                .map_err(CanError::TransportError);
        }

        let header = Instruction::Write.header(address);
        let mut operations = [SpiOperation::Write(&header), SpiOperation::Write(data)];
        self.device.transaction(&mut operations).map_err(CanError::TransportError)
    }

    /// Address of the first transferred byte
    fn offset(register: u16, span: ByteSpan) -> Result<u16, CanError<D::Error>> {
        register
            .checked_add(span.first as u16)
            .ok_or(CanError::InvalidAddress(register))
    }

    /// Address plus transferred bytes must stay inside the 12-bit address space
    fn verify_span(address: u16, length: usize) -> Result<(), CanError<D::Error>> {
        if address as u32 + length as u32 > ADDRESS_SPACE {
            return Err(CanError::InvalidAddress(address));
        }

        Ok(())
    }
}
