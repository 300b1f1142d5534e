//!# CAN frame
//!
//! Classic and FD frames share one type. [embedded_can::Frame] covers the classic
//! constructors, FD frames are built with [CanFrame::new_fd].
//!
//!```
//!# use mcp2517fd::frame::CanFrame;
//!# use embedded_can::{Frame, Id, StandardId};
//! let id = Id::Standard(StandardId::new(0x123).unwrap());
//!
//! let classic = CanFrame::new(id, &[1, 2, 3]).unwrap();
//! assert_eq!(3, classic.dlc());
//! assert!(!classic.is_fd());
//!
//! let fd = CanFrame::new_fd(id, &[0u8; 20], true).unwrap();
//! assert_eq!(&[0u8; 20], fd.data());
//! assert!(fd.is_fd());
//!```
use crate::message::MAX_PAYLOAD_CAN_FD;
use crate::message::MAX_PAYLOAD_CAN_2_0;
use embedded_can::{Frame, Id};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CanFrame {
    pub identifier: Id,
    /// Remote transmission request, classic frames only
    pub rtr: bool,
    /// FD format
    pub fd: bool,
    /// Bit rate switch for the data phase
    pub brs: bool,
    /// Error state indicator
    pub esi: bool,
    /// Payload length in bytes
    pub len: usize,
    pub data: [u8; MAX_PAYLOAD_CAN_FD],
}

impl CanFrame {
    /// Creates a FD frame with up to 64 payload bytes
    pub fn new_fd(id: impl Into<Id>, data: &[u8], brs: bool) -> Option<Self> {
        if data.len() > MAX_PAYLOAD_CAN_FD {
            return None;
        }

        let mut frame = Self::empty(id.into());
        frame.fd = true;
        frame.brs = brs;
        frame.len = data.len();
        frame.data[..data.len()].copy_from_slice(data);

        Some(frame)
    }

    pub fn is_fd(&self) -> bool {
        self.fd
    }

    fn empty(identifier: Id) -> Self {
        Self {
            identifier,
            rtr: false,
            fd: false,
            brs: false,
            esi: false,
            len: 0,
            data: [0; MAX_PAYLOAD_CAN_FD],
        }
    }
}

impl Frame for CanFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_PAYLOAD_CAN_2_0 {
            return None;
        }

        let mut frame = Self::empty(id.into());
        frame.len = data.len();
        frame.data[..data.len()].copy_from_slice(data);

        Some(frame)
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > MAX_PAYLOAD_CAN_2_0 {
            return None;
        }

        let mut frame = Self::empty(id.into());
        frame.rtr = true;
        frame.len = dlc;

        Some(frame)
    }

    fn is_extended(&self) -> bool {
        matches!(self.identifier, Id::Extended(_))
    }

    fn is_remote_frame(&self) -> bool {
        self.rtr
    }

    fn id(&self) -> Id {
        self.identifier
    }

    fn dlc(&self) -> usize {
        self.len
    }

    fn data(&self) -> &[u8] {
        if self.rtr {
            return &[];
        }

        &self.data[..self.len.min(MAX_PAYLOAD_CAN_FD)]
    }
}
