#![cfg_attr(not(test), no_std)]
#![cfg_attr(feature = "strict", deny(warnings))]
#![allow(clippy::identity_op)]

//! # Driver for the MCP2517FD CAN-FD controller
//!
//! Register level driver talking to the controller over SPI.
//!
//! Crate currently offers the following features:
//! * CAN2.0 and CAN FD format support
//! * Standard and extended ID formats for CAN frames
//! * Bring-up state machine with device identification
//! * FIFO layout discovery, one transmit FIFO per priority slot
//! * Asynchronous transmission with completion reporting through the transmit event FIFO
//! * Interrupt driven reception into a bounded channel
//! * no_std support
//!
//! ## Register access
//!
//!```
//!use mcp2517fd::codec::Instruction;
//!
//! // read of the OSC register: instruction in the top nibble, address below
//!assert_eq!([0x3E, 0x00], Instruction::Read.header(0xE00));
//!```
//!
//! ## Lifecycle
//!
//! [can::MCP2517FD::probe] identifies the controller once. [can::MCP2517FD::open] runs the
//! bring-up again, configures oscillator, bit timing and FIFOs and enters normal
//! operation. Frames are sent with [can::MCP2517FD::send], the interrupt line drives
//! [can::MCP2517FD::handle_interrupt] which fills [can::MCP2517FD::received] and
//! [can::MCP2517FD::completions].

extern crate alloc;

pub mod bittiming;
pub mod bringup;
pub mod can;
pub mod channel;
pub mod codec;
pub mod config;
pub mod fifo;
pub mod frame;
pub mod message;
pub mod platform;
pub mod registers;
pub mod rx;
pub mod status;
pub mod transport;
pub mod tx;

#[cfg(test)]
pub(crate) mod mocks;
#[cfg(test)]
mod tests;
