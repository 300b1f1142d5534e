//! # Register map
//!
//! Every 32-bit special function register is described by a table of [Field]s
//! (name, bit offset, bit width). The register codec and the driver pack and
//! unpack values through these descriptors instead of open-coded shifts.
//!
//! Registers that are only ever touched one byte at a time (FIFO doorbells,
//! status bytes, filter control bytes) are additionally modelled as byte
//! bitfields.
#![allow(unused_braces)]
use core::fmt;
use modular_bitfield_msb::prelude::*;

/// Start of the message RAM window
pub const RAM_START: u16 = 0x400;

/// Size of the message RAM window in bytes
pub const RAM_SIZE: u16 = 0x800;

/// Size of the 12-bit address space
pub const ADDRESS_SPACE: u32 = 0x1000;

/// Number of filter/mask pairs
pub const FILTER_COUNT: u8 = 32;

/// A sub-field of a 32-bit register
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub offset: u8,
    pub width: u8,
}

impl Field {
    pub const fn new(name: &'static str, offset: u8, width: u8) -> Self {
        Self { name, offset, width }
    }

    /// Single bit flag
    pub const fn bit(name: &'static str, offset: u8) -> Self {
        Self::new(name, offset, 1)
    }

    /// Register mask covering the field
    pub const fn mask(&self) -> u32 {
        (((1u64 << self.width) - 1) << self.offset) as u32
    }

    /// Shifts the value into position, dropping bits not covered by the field
    pub const fn pack(&self, value: u32) -> u32 {
        ((value as u64) << self.offset) as u32 & self.mask()
    }

    /// Extracts the field value from a register value
    pub const fn unpack(&self, register: u32) -> u32 {
        (register & self.mask()) >> self.offset
    }

    /// Replaces the field inside the given register value
    pub const fn replace(&self, register: u32, value: u32) -> u32 {
        (register & !self.mask()) | self.pack(value)
    }

    pub const fn is_set(&self, register: u32) -> bool {
        register & self.mask() != 0
    }
}

/// Display adapter printing all named fields of a register value
pub struct Decoded<'a> {
    pub fields: &'a [Field],
    pub value: u32,
}

impl fmt::Display for Decoded<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x} [", self.value)?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}={}", field.name, field.unpack(self.value))?;
        }
        write!(f, "]")
    }
}

/// CAN control register (C1CON)
pub mod con {
    use super::Field;

    pub const ADDRESS: u16 = 0x000;

    pub const DNCNT: Field = Field::new("DNCNT", 0, 5);
    pub const ISOCRCEN: Field = Field::bit("ISOCRCEN", 5);
    pub const PXEDIS: Field = Field::bit("PXEDIS", 6);
    pub const WAKFIL: Field = Field::bit("WAKFIL", 8);
    pub const WFT: Field = Field::new("WFT", 9, 2);
    pub const BUSY: Field = Field::bit("BUSY", 11);
    pub const BRSDIS: Field = Field::bit("BRSDIS", 12);
    pub const RTXAT: Field = Field::bit("RTXAT", 16);
    pub const ESIGM: Field = Field::bit("ESIGM", 17);
    pub const SERR2LOM: Field = Field::bit("SERR2LOM", 18);
    pub const STEF: Field = Field::bit("STEF", 19);
    pub const TXQEN: Field = Field::bit("TXQEN", 20);
    pub const OPMOD: Field = Field::new("OPMOD", 21, 3);
    pub const REQOP: Field = Field::new("REQOP", 24, 3);
    pub const ABAT: Field = Field::bit("ABAT", 27);
    pub const TXBWS: Field = Field::new("TXBWS", 28, 4);

    pub const FIELDS: &[Field] = &[
        DNCNT, ISOCRCEN, PXEDIS, WAKFIL, WFT, BUSY, BRSDIS, RTXAT, ESIGM, SERR2LOM, STEF, TXQEN, OPMOD, REQOP,
        ABAT, TXBWS,
    ];

    const CONFIG_MODE: u32 = 0b100;

    /// Register content after reset
    pub const DEFAULT: u32 = ISOCRCEN.pack(1)
        | PXEDIS.pack(1)
        | WAKFIL.pack(1)
        | WFT.pack(3)
        | STEF.pack(1)
        | TXQEN.pack(1)
        | OPMOD.pack(CONFIG_MODE)
        | REQOP.pack(CONFIG_MODE);

    /// Bits compared against [DEFAULT] when identifying the device
    pub const DEFAULT_MASK: u32 = DNCNT.mask()
        | ISOCRCEN.mask()
        | PXEDIS.mask()
        | WAKFIL.mask()
        | WFT.mask()
        | BRSDIS.mask()
        | RTXAT.mask()
        | ESIGM.mask()
        | SERR2LOM.mask()
        | STEF.mask()
        | TXQEN.mask()
        | OPMOD.mask()
        | REQOP.mask()
        | ABAT.mask()
        | TXBWS.mask();
}

/// Nominal bit time configuration register (C1NBTCFG)
pub mod nbtcfg {
    use super::Field;

    pub const ADDRESS: u16 = 0x004;

    pub const SJW: Field = Field::new("SJW", 0, 7);
    pub const TSEG2: Field = Field::new("TSEG2", 8, 7);
    pub const TSEG1: Field = Field::new("TSEG1", 16, 8);
    pub const BRP: Field = Field::new("BRP", 24, 8);

    pub const FIELDS: &[Field] = &[SJW, TSEG2, TSEG1, BRP];
}

/// Data bit time configuration register (C1DBTCFG)
pub mod dbtcfg {
    use super::Field;

    pub const ADDRESS: u16 = 0x008;

    pub const SJW: Field = Field::new("SJW", 0, 4);
    pub const TSEG2: Field = Field::new("TSEG2", 8, 4);
    pub const TSEG1: Field = Field::new("TSEG1", 16, 5);
    pub const BRP: Field = Field::new("BRP", 24, 8);

    pub const FIELDS: &[Field] = &[SJW, TSEG2, TSEG1, BRP];
}

/// Transmitter delay compensation register (C1TDC)
pub mod tdc {
    use super::Field;

    pub const ADDRESS: u16 = 0x00C;

    pub const TDCV: Field = Field::new("TDCV", 0, 6);
    pub const TDCO: Field = Field::new("TDCO", 8, 7);
    pub const TDCMOD: Field = Field::new("TDCMOD", 16, 2);
    pub const SID11EN: Field = Field::bit("SID11EN", 24);
    pub const EDGFLTEN: Field = Field::bit("EDGFLTEN", 25);

    /// TDCMOD value for automatic measurement
    pub const MODE_AUTO: u32 = 0b10;
}

/// Time stamp control register (C1TSCON)
pub mod tscon {
    use super::Field;

    pub const ADDRESS: u16 = 0x014;

    pub const TBCPRE: Field = Field::new("TBCPRE", 0, 10);
    pub const TBCEN: Field = Field::bit("TBCEN", 16);
}

/// Interrupt register (C1INT), flags in the lower and enables in the upper half
pub mod int {
    use super::Field;

    pub const ADDRESS: u16 = 0x01C;

    pub const TXIF: Field = Field::bit("TXIF", 0);
    pub const RXIF: Field = Field::bit("RXIF", 1);
    pub const TBCIF: Field = Field::bit("TBCIF", 2);
    pub const MODIF: Field = Field::bit("MODIF", 3);
    pub const TEFIF: Field = Field::bit("TEFIF", 4);
    pub const ECCIF: Field = Field::bit("ECCIF", 8);
    pub const SPICRCIF: Field = Field::bit("SPICRCIF", 9);
    pub const TXATIF: Field = Field::bit("TXATIF", 10);
    pub const RXOVIF: Field = Field::bit("RXOVIF", 11);
    pub const SERRIF: Field = Field::bit("SERRIF", 12);
    pub const CERRIF: Field = Field::bit("CERRIF", 13);
    pub const WAKIF: Field = Field::bit("WAKIF", 14);
    pub const IVMIF: Field = Field::bit("IVMIF", 15);
    pub const TXIE: Field = Field::bit("TXIE", 16);
    pub const RXIE: Field = Field::bit("RXIE", 17);
    pub const TEFIE: Field = Field::bit("TEFIE", 20);
    pub const RXOVIE: Field = Field::bit("RXOVIE", 27);

    /// Flag half of the register
    pub const FLAGS: Field = Field::new("IF", 0, 16);

    pub const FIELDS: &[Field] = &[
        TXIF, RXIF, TBCIF, MODIF, TEFIF, ECCIF, SPICRCIF, TXATIF, RXOVIF, SERRIF, CERRIF, WAKIF, IVMIF,
    ];
}

/// Transmit event FIFO control register (C1TEFCON)
pub mod tefcon {
    use super::Field;

    pub const ADDRESS: u16 = 0x040;

    pub const TEFNEIE: Field = Field::bit("TEFNEIE", 0);
    pub const TEFHIE: Field = Field::bit("TEFHIE", 1);
    pub const TEFFIE: Field = Field::bit("TEFFIE", 2);
    pub const TEFOVIE: Field = Field::bit("TEFOVIE", 3);
    pub const TEFTSEN: Field = Field::bit("TEFTSEN", 5);
    pub const UINC: Field = Field::bit("UINC", 8);
    pub const FRESET: Field = Field::bit("FRESET", 10);
    pub const FSIZE: Field = Field::new("FSIZE", 24, 5);
}

/// Transmit event FIFO status register (C1TEFSTA)
pub mod tefsta {
    use super::Field;

    pub const ADDRESS: u16 = 0x044;

    pub const TEFNEIF: Field = Field::bit("TEFNEIF", 0);
    pub const TEFOVIF: Field = Field::bit("TEFOVIF", 3);
}

/// Transmit event FIFO user address register (C1TEFUA)
pub const TEFUA: u16 = 0x048;

/// FIFO control register (C1FIFOCONm), FIFO indices start at 1
pub mod fifocon {
    use super::Field;

    pub const TFNRFNIE: Field = Field::bit("TFNRFNIE", 0);
    pub const TFHRFHIE: Field = Field::bit("TFHRFHIE", 1);
    pub const TFERFFIE: Field = Field::bit("TFERFFIE", 2);
    pub const RXOVIE: Field = Field::bit("RXOVIE", 3);
    pub const TXATIE: Field = Field::bit("TXATIE", 4);
    pub const RXTSEN: Field = Field::bit("RXTSEN", 5);
    pub const RTREN: Field = Field::bit("RTREN", 6);
    pub const TXEN: Field = Field::bit("TXEN", 7);
    pub const UINC: Field = Field::bit("UINC", 8);
    pub const TXREQ: Field = Field::bit("TXREQ", 9);
    pub const FRESET: Field = Field::bit("FRESET", 10);
    pub const TXPRI: Field = Field::new("TXPRI", 16, 5);
    pub const TXAT: Field = Field::new("TXAT", 21, 2);
    pub const FSIZE: Field = Field::new("FSIZE", 24, 5);
    pub const PLSIZE: Field = Field::new("PLSIZE", 29, 3);

    pub const FIELDS: &[Field] = &[
        TFNRFNIE, TFHRFHIE, TFERFFIE, RXOVIE, TXATIE, RXTSEN, RTREN, TXEN, UINC, TXREQ, FRESET, TXPRI, TXAT, FSIZE,
        PLSIZE,
    ];

    pub const fn address(fifo: u8) -> u16 {
        0x05C + 12 * (fifo as u16 - 1)
    }
}

/// FIFO status register (C1FIFOSTAm)
pub mod fifosta {
    use super::Field;

    pub const TFNRFNIF: Field = Field::bit("TFNRFNIF", 0);
    pub const RXOVIF: Field = Field::bit("RXOVIF", 3);
    pub const FIFOCI: Field = Field::new("FIFOCI", 8, 5);

    pub const fn address(fifo: u8) -> u16 {
        0x060 + 12 * (fifo as u16 - 1)
    }
}

/// FIFO user address register (C1FIFOUAm)
pub const fn fifoua(fifo: u8) -> u16 {
    0x064 + 12 * (fifo as u16 - 1)
}

/// Filter control registers, four filters per 32-bit register
pub mod fltcon {
    use super::Field;

    pub const FLTEN: Field = Field::bit("FLTEN", 7);
    pub const FBP: Field = Field::new("FBP", 0, 5);

    /// Address of the 32-bit register holding the given filter byte
    pub const fn register(filter: u8) -> u16 {
        0x1D0 + (filter as u16 & !0x3)
    }

    /// Field covering the control byte of the given filter inside its register
    pub const fn byte(filter: u8) -> Field {
        Field::new("FLTCON", (filter % 4) * 8, 8)
    }
}

/// Filter object register (C1FLTOBJm)
pub const fn fltobj(filter: u8) -> u16 {
    0x1F0 + 8 * filter as u16
}

/// Filter mask register (C1MASKm)
pub const fn fltmask(filter: u8) -> u16 {
    0x1F4 + 8 * filter as u16
}

/// Oscillator control register (OSC)
pub mod osc {
    use super::Field;

    pub const ADDRESS: u16 = 0xE00;

    pub const PLLEN: Field = Field::bit("PLLEN", 0);
    pub const OSCDIS: Field = Field::bit("OSCDIS", 2);
    pub const SCLKDIV: Field = Field::bit("SCLKDIV", 4);
    pub const CLKODIV: Field = Field::new("CLKODIV", 5, 2);
    pub const PLLRDY: Field = Field::bit("PLLRDY", 8);
    pub const OSCRDY: Field = Field::bit("OSCRDY", 10);
    pub const SCLKRDY: Field = Field::bit("SCLKRDY", 12);

    pub const FIELDS: &[Field] = &[PLLEN, OSCDIS, SCLKDIV, CLKODIV, PLLRDY, OSCRDY, SCLKRDY];

    /// Clock output divider written when the oscillator was found disabled (divide by 10)
    pub const DEFAULT_CLKODIV: u32 = 0b11;
}

#[bitfield]
#[derive(Default)]
#[repr(u8)]
/// Second byte of FIFO Control register
pub struct FifoControlReg1 {
    #[skip]
    __: B5,
    /// FIFO Reset bit
    pub freset: bool,
    /// Message Send Request bit
    pub txreq: bool,
    /// Increment FIFO Head/Tail bit
    pub uinc: bool,
}

#[bitfield]
#[derive(Default)]
#[repr(u8)]
/// First byte of FIFO Status register
pub struct FifoStatusReg0 {
    /// Message Aborted Status bit
    pub txabt: bool,
    /// Message Lost Arbitration Status bit
    pub txlarb: bool,
    /// Error Detected During Transmission bit
    pub txerr: bool,
    /// Transmit Attempts Exhausted Interrupt Pending bit
    pub txatif: bool,
    /// Receive FIFO Overflow Interrupt Flag bit
    pub rxovif: bool,
    /// Transmit/Receive FIFO Empty/Full Interrupt Flag bit
    pub tferffif: bool,
    /// Transmit/Receive FIFO Half Empty/Half Full Interrupt Flag bit
    pub tfhrfhif: bool,
    /// Transmit/Receive FIFO Not Full/Not Empty Interrupt Flag bit
    pub tfnrfnif: bool,
}

#[bitfield]
#[derive(Default)]
#[repr(u8)]
/// Control byte of a single filter
pub struct FilterControlByte {
    /// Filter enable
    pub flten: bool,
    #[skip]
    __: B2,
    /// FIFO receiving matching messages
    pub fbp: B5,
}
