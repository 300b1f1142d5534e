use crate::can::CanError;
use crate::codec::{ByteSpan, Instruction, RegisterCodec};
use crate::mocks::{Access, SimError, SimulatedChip, OSC_RESET};
use crate::registers::{con, osc, tefcon, tscon};

#[test]
fn test_instruction_header() {
    assert_eq!([0x00, 0x00], Instruction::Reset.header(0));
    assert_eq!([0x20, 0x03], Instruction::Write.header(0x003));
    assert_eq!([0x3E, 0x00], Instruction::Read.header(osc::ADDRESS));
    assert_eq!([0x34, 0x00], Instruction::Read.header(0x400));
}

#[test]
fn test_instruction_header_address_truncated() {
    assert_eq!([0x2F, 0xFF], Instruction::Write.header(0x1FFF));
}

#[test]
fn test_byte_span_of_mask() {
    assert_eq!(ByteSpan { first: 0, last: 3 }, ByteSpan::of_mask(u32::MAX).unwrap());
    assert_eq!(ByteSpan { first: 3, last: 3 }, ByteSpan::of_mask(con::REQOP.mask()).unwrap());
    assert_eq!(ByteSpan { first: 2, last: 3 }, ByteSpan::of_mask(0xFFFF_0000).unwrap());
    assert_eq!(ByteSpan { first: 1, last: 1 }, ByteSpan::of_mask(0x0000_1500).unwrap());
    assert_eq!(1, ByteSpan::of_mask(0x0000_0080).unwrap().len());
    assert!(ByteSpan::of_mask(0).is_none());
}

#[test]
fn test_read_register() {
    let mut codec = RegisterCodec::new(SimulatedChip::default());

    assert_eq!(OSC_RESET, codec.read(osc::ADDRESS).unwrap());
    assert_eq!(con::DEFAULT, codec.read(con::ADDRESS).unwrap());

    assert_eq!(
        Access {
            instruction: Instruction::Read,
            address: osc::ADDRESS,
            length: 4,
            asynchronous: false
        },
        codec.device().accesses[0]
    );
}

#[test]
fn test_write_register_little_endian() {
    let mut codec = RegisterCodec::new(SimulatedChip::default());

    codec.write(tscon::ADDRESS, 0x1234_5678).unwrap();

    assert_eq!([0x78, 0x56, 0x34, 0x12], codec.device().memory[0x014..0x018]);
    assert_eq!(1, codec.device().accesses.len());
}

#[test]
fn test_read_masked_transfers_covered_bytes_only() {
    let mut chip = SimulatedChip::default();
    chip.store(tefcon::ADDRESS, 0x1234_5678);
    let mut codec = RegisterCodec::new(chip);

    assert_eq!(0x0004_5600, codec.read_masked(tefcon::ADDRESS, 0x000F_FF00).unwrap());

    let access = codec.device().accesses[0];
    assert_eq!(tefcon::ADDRESS + 1, access.address);
    assert_eq!(2, access.length);
}

#[test]
fn test_write_masked_transfers_covered_bytes_only() {
    let mut chip = SimulatedChip::default();
    chip.store(tscon::ADDRESS, 0x1111_1111);
    let mut codec = RegisterCodec::new(chip);

    codec.write_masked(tscon::ADDRESS, 0xAABB_CCDD, 0x00FF_0000).unwrap();

    assert_eq!(0x11BB_1111, codec.device().register(tscon::ADDRESS));

    let access = codec.device().accesses[0];
    assert_eq!(tscon::ADDRESS + 2, access.address);
    assert_eq!(1, access.length);
}

#[test]
fn test_write_masked_takes_uncovered_bits_of_touched_bytes_from_value() {
    let mut chip = SimulatedChip::default();
    chip.store(tscon::ADDRESS, 0xFFFF_FFFF);
    let mut codec = RegisterCodec::new(chip);

    codec.write_masked(tscon::ADDRESS, 0x0000_0000, 0x0001_0000).unwrap();

    assert_eq!(0xFF00_FFFF, codec.device().register(tscon::ADDRESS));
}

#[test]
fn test_empty_mask_rejected_without_transfer() {
    let mut codec = RegisterCodec::new(SimulatedChip::default());

    assert_eq!(CanError::InvalidMask, codec.read_masked(con::ADDRESS, 0).unwrap_err());
    assert_eq!(CanError::InvalidMask, codec.write_masked(con::ADDRESS, 1, 0).unwrap_err());
    assert!(codec.device().accesses.is_empty());
}

#[test]
fn test_access_beyond_address_space() {
    let mut codec = RegisterCodec::new(SimulatedChip::default());
    let mut buffer = [0u8; 4];

    assert_eq!(CanError::InvalidAddress(0xFFE), codec.read_bytes(0xFFE, &mut buffer).unwrap_err());
    assert_eq!(CanError::InvalidAddress(0xFFD), codec.write_bytes(0xFFD, &buffer).unwrap_err());
    assert!(codec.device().accesses.is_empty());

    // last addressable byte is fine
    codec.read_bytes(0xFFF, &mut buffer[..1]).unwrap();
}

#[test]
fn test_masked_access_at_top_of_u16_range() {
    let mut codec = RegisterCodec::new(SimulatedChip::default());

    assert_eq!(CanError::InvalidAddress(0xFFFF), codec.read_masked(0xFFFF, 0x0000_FF00).unwrap_err());
    assert_eq!(CanError::InvalidAddress(0xFFFF), codec.write_masked(0xFFFF, 0, 0xFF00_0000).unwrap_err());
    assert_eq!(CanError::InvalidAddress(0x1001), codec.read_masked(0xFFE, 0xFF00_0000).unwrap_err());
    assert!(codec.device().accesses.is_empty());
}

#[test]
fn test_ram_round_trip() {
    let mut codec = RegisterCodec::new(SimulatedChip::default());
    let data = [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];

    codec.write_bytes(0x400, &data).unwrap();

    let mut read = [0u8; 12];
    codec.read_bytes(0x400, &mut read).unwrap();
    assert_eq!(data, read);
}

#[test]
fn test_reset() {
    let mut chip = SimulatedChip::default();
    chip.store(con::ADDRESS, 0);
    let mut codec = RegisterCodec::new(chip);

    codec.reset().unwrap();

    assert_eq!(1, codec.device().resets);
    assert_eq!(Instruction::Reset, codec.device().accesses[0].instruction);
    assert_eq!(con::DEFAULT, codec.device().register(con::ADDRESS));
}

#[test]
fn test_transport_error() {
    let mut chip = SimulatedChip::default();
    chip.fail_transfers = true;
    let mut codec = RegisterCodec::new(chip);

    assert_eq!(
        CanError::TransportError(SimError::Fault),
        codec.read(con::ADDRESS).unwrap_err()
    );
    assert_eq!(CanError::TransportError(SimError::Fault), codec.reset().unwrap_err());
}
