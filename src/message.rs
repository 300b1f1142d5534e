//!# CAN message objects
//! Message objects in RAM start with a two word header. Headers are modelled MSB
//! first, so every 32-bit word is swapped to little endian on the way to the wire.
//!
//! ## Header encoding example
//! ```
//!# use mcp2517fd::frame::CanFrame;
//!# use mcp2517fd::message::{TxHeader, DLC};
//!# use embedded_can::{Id, StandardId};
//!#
//! let id = Id::Standard(StandardId::new(0x123).unwrap());
//! // 22 bytes are not a valid FD length, the next valid one is 24
//! let frame = CanFrame::new_fd(id, &[0u8; 22], true).unwrap();
//!
//! let (header, length) = TxHeader::for_frame(&frame, 3, true);
//! assert_eq!(DLC::TwentyFour, header.data_length_code());
//! assert_eq!(24, length);
//! assert_eq!(3, header.sequence());
//! ```

use crate::frame::CanFrame;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use embedded_can::{ExtendedId, Id, StandardId};
use modular_bitfield_msb::prelude::*;

pub const STANDARD_IDENTIFIER_MASK: u16 = 0x7FF;

pub const EXTENDED_IDENTIFIER_MASK: u32 = 0x3FFFF;

pub const MAX_PAYLOAD_CAN_2_0: usize = 8;

pub const MAX_PAYLOAD_CAN_FD: usize = 64;

/// Size of the object header in bytes
pub const HEADER_SIZE: usize = 8;

/// Size of the timestamp following the header of RX and TEF objects
pub const TIMESTAMP_SIZE: usize = 4;

/// Data length code
#[derive(BitfieldSpecifier, Debug, Eq, PartialEq, Ord, PartialOrd, Copy, Clone)]
#[allow(clippy::upper_case_acronyms)]
#[bits = 4]
pub enum DLC {
    Zero,
    One,
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Twelve,
    Sixteen,
    Twenty,
    TwentyFour,
    ThirtyTwo,
    FortyEight,
    SixtyFour,
}

impl DLC {
    /// Exact mapping, None for lengths without a code
    pub fn from_length(value: usize) -> Option<Self> {
        match value {
            0 => Some(Self::Zero),
            1 => Some(Self::One),
            2 => Some(Self::Two),
            3 => Some(Self::Three),
            4 => Some(Self::Four),
            5 => Some(Self::Five),
            6 => Some(Self::Six),
            7 => Some(Self::Seven),
            8 => Some(Self::Eight),
            12 => Some(Self::Twelve),
            16 => Some(Self::Sixteen),
            20 => Some(Self::Twenty),
            24 => Some(Self::TwentyFour),
            32 => Some(Self::ThirtyTwo),
            48 => Some(Self::FortyEight),
            64 => Some(Self::SixtyFour),
            _ => None,
        }
    }

    /// Smallest code holding at least `length` bytes, saturating at 64
    pub fn round_up(length: usize) -> Self {
        let mut length = length.min(MAX_PAYLOAD_CAN_FD);

        loop {
            if let Some(dlc) = Self::from_length(length) {
                return dlc;
            }
            length += 1;
        }
    }

    /// Payload length of a FD frame
    pub fn length(&self) -> usize {
        match self {
            Self::Zero => 0,
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
            Self::Four => 4,
            Self::Five => 5,
            Self::Six => 6,
            Self::Seven => 7,
            Self::Eight => 8,
            Self::Twelve => 12,
            Self::Sixteen => 16,
            Self::Twenty => 20,
            Self::TwentyFour => 24,
            Self::ThirtyTwo => 32,
            Self::FortyEight => 48,
            Self::SixtyFour => 64,
        }
    }

    /// Payload length of a classic frame, codes above eight still mean eight bytes
    pub fn classic_length(&self) -> usize {
        self.length().min(MAX_PAYLOAD_CAN_2_0)
    }
}

/// Transmit message object header, also the first two words of a TEF object
#[bitfield(bits = 64)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct TxHeader {
    // T0
    #[skip]
    __: B2,
    /// standard ID in FD mode can be extended to 12 bits if sid11 is set
    pub sid11: bool,
    /// 18 lsb of extended ID
    pub extended_identifier: B18,
    /// standard ID bits or msb 11 bits of extended ID
    pub standard_identifier: B11,
    // T1
    #[skip]
    __: B16,
    /// Sequence keeping track of transmitted messages in Transmit Event FIFO
    pub sequence: B7,
    /// In normal ESI mode, set if node is error passive, cleared if node is error active
    pub error_status_indicator: bool,
    /// Bit distinguishing between CAN and CAN FD formats
    pub fd_frame: bool,
    /// Enables bit rate switching in CAN FD frames
    pub bit_rate_switch: bool,
    /// Set if the frame is a RTR frame
    pub remote_transmission_request: bool,
    /// Set if extended ID is used
    pub identifier_extension_flag: bool,
    /// 4 bits identifying the payload length
    pub data_length_code: DLC,
}

impl TxHeader {
    /// Encodes the header of the given frame and returns it with the payload length
    /// to transfer. Without `fd_mode` every frame goes out as classic frame.
    pub fn for_frame(frame: &CanFrame, sequence: u8, fd_mode: bool) -> (Self, usize) {
        let mut header = Self::new();
        header.set_sequence(sequence & 0x7F);

        let length = if fd_mode && frame.fd {
            let dlc = DLC::round_up(frame.len);
            header.set_fd_frame(true);
            header.set_bit_rate_switch(frame.brs);
            header.set_error_status_indicator(frame.esi);
            header.set_data_length_code(dlc);
            dlc.length()
        } else {
            let length = frame.len.min(MAX_PAYLOAD_CAN_2_0);
            header.set_remote_transmission_request(frame.rtr);
            header.set_data_length_code(DLC::round_up(length));
            length
        };

        match frame.identifier {
            Id::Standard(sid) => header.set_standard_identifier(sid.as_raw()),
            Id::Extended(eid) => {
                header.set_extended_identifier(eid.as_raw() & EXTENDED_IDENTIFIER_MASK);
                header.set_standard_identifier((eid.as_raw() >> 18) as u16 & STANDARD_IDENTIFIER_MASK);
                header.set_identifier_extension_flag(true);
            }
        }

        // remote frames carry no payload
        let length = if header.remote_transmission_request() { 0 } else { length };

        (header, length)
    }

    /// Header in RAM order
    pub fn to_wire(self) -> [u8; HEADER_SIZE] {
        let mut bytes = self.into_bytes();
        swap_words(&mut bytes);

        bytes
    }

    pub fn from_wire(mut bytes: [u8; HEADER_SIZE]) -> Self {
        swap_words(&mut bytes);
        Self::from_bytes(bytes)
    }
}

/// Receive message object header
#[bitfield(bits = 64)]
#[derive(Copy, Clone, Default, PartialEq, Eq, Debug)]
pub struct RxHeader {
    // R0
    #[skip]
    __: B2,
    /// In FD mode the standard ID can be extended to 12 bit using r1
    pub sid11: bool,
    /// Extended Identifier
    pub extended_identifier: B18,
    /// Standard Identifier
    pub standard_identifier: B11,
    #[skip]
    __: B16,
    /// Filter Hit, number of filter that matched
    pub filter_hit: B5,
    #[skip]
    __: B2,
    /// Error Status Indicator
    pub error_status_indicator: bool,
    /// FD Frame; distinguishes between CAN and CAN FD formats
    pub fd_frame: bool,
    /// Bit Rate Switch; indicates if data bit rate was switched
    pub bit_rate_switch: bool,
    /// Remote Transmission Request; not used in CAN FD
    pub remote_transmission_request: bool,
    /// Identifier Extension Flag; distinguishes between base and extended format
    pub identifier_extension_flag: bool,
    /// Data Length Code
    pub data_length_code: DLC,
}

impl RxHeader {
    pub fn from_wire(mut bytes: [u8; HEADER_SIZE]) -> Self {
        swap_words(&mut bytes);
        Self::from_bytes(bytes)
    }

    /// Header in RAM order
    pub fn to_wire(self) -> [u8; HEADER_SIZE] {
        let mut bytes = self.into_bytes();
        swap_words(&mut bytes);

        bytes
    }

    pub fn id(&self) -> Option<Id> {
        if self.identifier_extension_flag() {
            let id = ((self.standard_identifier() as u32) << 18) | (self.extended_identifier());
            ExtendedId::new(id).map(Id::Extended)
        } else {
            StandardId::new(self.standard_identifier()).map(Id::Standard)
        }
    }

    /// Payload length in bytes
    pub fn length(&self) -> usize {
        if self.fd_frame() {
            self.data_length_code().length()
        } else {
            self.data_length_code().classic_length()
        }
    }

    /// Builds the frame from this header and the payload following the timestamp
    pub fn to_frame(&self, payload: &[u8]) -> Option<CanFrame> {
        let mut frame = if self.fd_frame() {
            CanFrame::new_fd(self.id()?, &[], self.bit_rate_switch())?
        } else {
            let mut frame = CanFrame::new_fd(self.id()?, &[], false)?;
            frame.fd = false;
            frame.rtr = self.remote_transmission_request();
            frame
        };

        let length = self.length();
        frame.esi = self.error_status_indicator();
        frame.len = length;

        if !frame.rtr {
            let available = length.min(payload.len());
            frame.data[..available].copy_from_slice(&payload[..available]);
        }

        Some(frame)
    }

    /// Header of a received frame, as the controller would store it
    pub fn for_frame(frame: &CanFrame, filter_hit: u8) -> Self {
        let (tx, _) = TxHeader::for_frame(frame, 0, frame.fd);

        Self::new()
            .with_extended_identifier(tx.extended_identifier())
            .with_standard_identifier(tx.standard_identifier())
            .with_identifier_extension_flag(tx.identifier_extension_flag())
            .with_remote_transmission_request(tx.remote_transmission_request())
            .with_fd_frame(tx.fd_frame())
            .with_bit_rate_switch(tx.bit_rate_switch())
            .with_error_status_indicator(tx.error_status_indicator())
            .with_data_length_code(tx.data_length_code())
            .with_filter_hit(filter_hit & 0x1F)
    }
}

/// Reads the timestamp word following a RX or TEF header
pub fn timestamp(object: &[u8]) -> Option<u32> {
    object.get(HEADER_SIZE..HEADER_SIZE + TIMESTAMP_SIZE).map(LittleEndian::read_u32)
}

/// Converts between MSB first header words and little endian RAM words
pub(crate) fn swap_words(buffer: &mut [u8]) {
    for word in buffer.chunks_exact_mut(4) {
        let num = BigEndian::read_u32(word);
        LittleEndian::write_u32(word, num);
    }
}
