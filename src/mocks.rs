use crate::codec::Instruction;
use crate::message::{RxHeader, HEADER_SIZE, TIMESTAMP_SIZE};
use crate::platform::{InterruptLine, Regulator};
use crate::registers::{con, fifocon, fifoua, fifosta, int, osc, tefcon, tefsta, RAM_SIZE, RAM_START, TEFUA};
use crate::status::OperationMode;
use crate::transport::{BusBusy, PreparedTransfer, TransferTag, Transport};
use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;
use byteorder::{ByteOrder, LittleEndian};
use core::cell::Cell;
use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{Error as SpiErrorTrait, ErrorKind, ErrorType, Operation, SpiDevice};
use embedded_time::clock::Error;
use embedded_time::duration::Duration;
use embedded_time::fixed_point::FixedPoint;
use embedded_time::fraction::Fraction;
use embedded_time::timer::param::{Armed, OneShot};
use embedded_time::{Clock, Instant, Timer};
use mockall::mock;

/// OSC register after reset: oscillator and system clock ready, clock output divided by 10
pub const OSC_RESET: u32 = 0x0000_1460;

/// Clock advancing by a fixed step on every query
#[derive(Debug, PartialEq, Eq)]
pub struct TestClock {
    pub now: Cell<u64>,
    pub step: u64,
}

impl TestClock {
    /// `step` in microseconds
    pub fn ticking(step: u64) -> Self {
        Self {
            now: Cell::new(0),
            step,
        }
    }
}

impl Clock for TestClock {
    type T = u64;
    const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000);

    fn try_now(&self) -> Result<Instant<Self>, Error> {
        let now = self.now.get();
        self.now.set(now + self.step);

        Ok(Instant::new(now))
    }

    fn new_timer<Dur>(&self, duration: Dur) -> Timer<OneShot, Armed, Self, Dur>
    where
        Dur: Duration + FixedPoint,
    {
        Timer::new(self, duration)
    }
}

/// Sums up all requested delays
#[derive(Debug, Default)]
pub struct RecordingDelay {
    pub total_ns: u64,
    pub calls: u32,
}

impl DelayNs for RecordingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += ns as u64;
        self.calls += 1;
    }
}

mock! {
    pub Regulator {}

    impl Regulator for Regulator {
        type Error = u32;

        fn enable(&mut self) -> Result<(), u32>;
        fn disable(&mut self) -> Result<(), u32>;
    }
}

mock! {
    pub Irq {}

    impl InterruptLine for Irq {
        fn enable(&mut self);
        fn disable(&mut self);
    }
}

/// Interrupt line accepting any number of calls
pub fn permissive_irq() -> MockIrq {
    let mut irq = MockIrq::new();
    irq.expect_enable().return_const(());
    irq.expect_disable().return_const(());
    irq
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SimError {
    Fault,
}

impl SpiErrorTrait for SimError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// One SPI command as seen by the chip
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Access {
    pub instruction: Instruction,
    pub address: u16,
    /// Payload bytes after the command header
    pub length: usize,
    /// Submitted through [Transport::submit_async]
    pub asynchronous: bool,
}

/// Ring state of one FIFO in RAM
#[derive(Copy, Clone, Debug, Default)]
pub struct SimFifo {
    pub base: u16,
    pub element_size: u16,
    pub count: u8,
    pub head: u8,
    pub len: u8,
}

impl SimFifo {
    fn head_address(&self) -> u16 {
        self.base + self.head as u16 * self.element_size
    }

    fn tail_address(&self) -> u16 {
        let tail = (self.head + self.len) % self.count.max(1);
        self.base + tail as u16 * self.element_size
    }

    fn pop(&mut self) {
        if self.len > 0 {
            self.len -= 1;
            self.head = (self.head + 1) % self.count.max(1);
        }
    }
}

/// Register file and message RAM of a controller behind a SPI device
pub struct SimulatedChip {
    pub memory: Vec<u8>,
    pub mode: OperationMode,
    pub modes: Vec<OperationMode>,
    pub accesses: Vec<Access>,
    pub resets: u32,

    /// Returned for all OSC reads
    pub osc_override: Option<u32>,
    /// Returned for all CON reads, mode requests are ignored
    pub con_stuck: Option<u32>,
    /// CON content surviving the next reset command
    pub stale_con: Option<u32>,
    /// PLL reports ready once enabled
    pub pll_locks: bool,
    /// Asynchronous submissions are rejected
    pub busy: bool,
    /// Blocking transactions fail
    pub fail_transfers: bool,

    pub speeds: Vec<u32>,
    pub word_size: Option<u8>,
    pub submitted: Vec<TransferTag>,

    /// FIFOs written since the last reset
    pub configured: [bool; 32],
    pub layout_assigned: bool,
    pub tef: SimFifo,
    /// Indexed by FIFO number, 0 unused
    pub fifos: [SimFifo; 32],
    pub in_flight: VecDeque<u8>,
    /// Message objects taken from transmit FIFOs, in completion order
    pub transmitted: Vec<Vec<u8>>,
    pub rx_overflow: bool,
    /// Transmit event lost because the TEF was full
    pub tef_overflow: bool,
    pub timestamp: u32,
}

impl Default for SimulatedChip {
    fn default() -> Self {
        let mut chip = Self {
            memory: vec![0; 0x1000],
            mode: OperationMode::Config,
            modes: Vec::new(),
            accesses: Vec::new(),
            resets: 0,
            osc_override: None,
            con_stuck: None,
            stale_con: None,
            pll_locks: true,
            busy: false,
            fail_transfers: false,
            speeds: Vec::new(),
            word_size: None,
            submitted: Vec::new(),
            configured: [false; 32],
            layout_assigned: false,
            tef: SimFifo::default(),
            fifos: [SimFifo::default(); 32],
            in_flight: VecDeque::new(),
            transmitted: Vec::new(),
            rx_overflow: false,
            tef_overflow: false,
            timestamp: 0,
        };
        chip.power_on();
        chip
    }
}

impl SimulatedChip {
    /// Restores the reset defaults without counting a reset command
    fn power_on(&mut self) {
        self.memory.iter_mut().for_each(|byte| *byte = 0);
        self.store(con::ADDRESS, con::DEFAULT);
        self.store(osc::ADDRESS, OSC_RESET);

        self.mode = OperationMode::Config;
        self.configured = [false; 32];
        self.layout_assigned = false;
        self.tef = SimFifo::default();
        self.fifos = [SimFifo::default(); 32];
        self.in_flight.clear();
        self.rx_overflow = false;
        self.tef_overflow = false;
    }

    /// Raw register content, without computed status bits
    pub fn register(&self, address: u16) -> u32 {
        LittleEndian::read_u32(&self.memory[address as usize..address as usize + 4])
    }

    pub fn store(&mut self, address: u16, value: u32) {
        LittleEndian::write_u32(&mut self.memory[address as usize..address as usize + 4], value);
    }

    /// Accesses of the given kind
    pub fn accesses_of(&self, instruction: Instruction) -> Vec<Access> {
        self.accesses
            .iter()
            .filter(|access| access.instruction == instruction)
            .copied()
            .collect()
    }

    /// Blocking writes touching the given register
    pub fn writes_to(&self, register: u16) -> Vec<Access> {
        self.accesses
            .iter()
            .filter(|access| {
                access.instruction == Instruction::Write
                    && access.address >= register
                    && access.address < register + 4
                    && !access.asynchronous
            })
            .copied()
            .collect()
    }

    /// Transmits the oldest requested frame and stores its event in the TEF
    pub fn complete_next(&mut self) -> Option<u8> {
        let fifo = self.in_flight.pop_front()?;
        let state = self.fifos[fifo as usize];

        let start = state.base as usize;
        let object = self.memory[start..start + state.element_size as usize].to_vec();
        self.transmitted.push(object.clone());

        // TXREQ drops once the frame is on the wire
        let control = fifocon::address(fifo);
        let value = self.register(control) & !fifocon::TXREQ.mask();
        self.store(control, value);

        if self.tef.len < self.tef.count {
            self.timestamp += 100;
            let tail = self.tef.tail_address() as usize;
            self.memory[tail..tail + HEADER_SIZE].copy_from_slice(&object[..HEADER_SIZE]);
            LittleEndian::write_u32(&mut self.memory[tail + HEADER_SIZE..tail + HEADER_SIZE + 4], self.timestamp);
            self.tef.len += 1;
        } else {
            self.tef_overflow = true;
        }

        Some(fifo)
    }

    pub fn complete_all(&mut self) -> usize {
        let mut count = 0;
        while self.complete_next().is_some() {
            count += 1;
        }
        count
    }

    /// Stores a received frame in the receive FIFO, returns false on overflow
    pub fn inject_rx(&mut self, header: RxHeader, payload: &[u8]) -> bool {
        let fifo = &mut self.fifos[1];
        if fifo.count == 0 || fifo.len == fifo.count {
            self.rx_overflow = true;
            return false;
        }

        self.timestamp += 100;
        let tail = fifo.tail_address() as usize;
        let size = fifo.element_size as usize;
        fifo.len += 1;

        let object = &mut self.memory[tail..tail + size];
        object.iter_mut().for_each(|byte| *byte = 0);
        object[..HEADER_SIZE].copy_from_slice(&header.to_wire());
        LittleEndian::write_u32(&mut object[HEADER_SIZE..HEADER_SIZE + TIMESTAMP_SIZE], self.timestamp);

        let length = payload.len().min(size - HEADER_SIZE - TIMESTAMP_SIZE);
        object[HEADER_SIZE + TIMESTAMP_SIZE..HEADER_SIZE + TIMESTAMP_SIZE + length].copy_from_slice(&payload[..length]);

        true
    }

    /// Runs one SPI command, returns the bytes clocked out by the chip
    fn process(&mut self, operations: &mut [Operation<'_, u8>], asynchronous: bool) {
        let mut header = [0u8; 2];
        let mut position = 0usize;
        let mut command: Option<(Instruction, u16)> = None;
        let mut length = 0usize;

        let mut feed = |chip: &mut Self, input: u8| -> u8 {
            if position < 2 {
                header[position] = input;
                position += 1;

                if position == 2 {
                    let raw = u16::from_be_bytes(header);
                    let address = raw & 0x0FFF;
                    command = match raw >> 12 {
                        0b0000 => Some((Instruction::Reset, address)),
                        0b0010 => Some((Instruction::Write, address)),
                        0b0011 => Some((Instruction::Read, address)),
                        _ => None,
                    };

                    if let Some((Instruction::Reset, _)) = command {
                        chip.resets += 1;
                        chip.power_on();

                        if let Some(stale) = chip.stale_con.take() {
                            chip.store(con::ADDRESS, stale);
                            chip.mode = OperationMode::from_bits(con::OPMOD.unpack(stale));
                        }
                    }
                }
                return 0;
            }

            let output = match command {
                Some((Instruction::Write, address)) => {
                    chip.write_byte(address + length as u16, input);
                    0
                }
                Some((Instruction::Read, address)) => chip.read_byte(address + length as u16),
                _ => 0,
            };
            length += 1;

            output
        };

        for operation in operations.iter_mut() {
            match operation {
                Operation::Write(data) => {
                    for byte in data.iter() {
                        feed(self, *byte);
                    }
                }
                Operation::Read(data) => {
                    for byte in data.iter_mut() {
                        *byte = feed(self, 0);
                    }
                }
                Operation::Transfer(read, write) => {
                    for index in 0..read.len().max(write.len()) {
                        let output = feed(self, write.get(index).copied().unwrap_or(0));
                        if let Some(byte) = read.get_mut(index) {
                            *byte = output;
                        }
                    }
                }
                Operation::TransferInPlace(data) => {
                    for byte in data.iter_mut() {
                        *byte = feed(self, *byte);
                    }
                }
                Operation::DelayNs(_) => {}
            }
        }

        if let Some((instruction, address)) = command {
            self.accesses.push(Access {
                instruction,
                address,
                length,
                asynchronous,
            });
        }
    }

    fn read_byte(&self, address: u16) -> u8 {
        let address = address & 0x0FFF;
        let aligned = address & !0x3;
        let shift = 8 * (address & 0x3) as u32;

        match self.computed(aligned) {
            Some(value) => (value >> shift) as u8,
            None => self.memory[address as usize],
        }
    }

    /// Registers whose content depends on FIFO state or test overrides
    fn computed(&self, aligned: u16) -> Option<u32> {
        if aligned == con::ADDRESS {
            return self.con_stuck;
        }
        if aligned == osc::ADDRESS {
            return self.osc_override;
        }
        if aligned == int::ADDRESS {
            let mut value = self.register(int::ADDRESS) & 0xFFFF_0000;
            // TEFIF only reflects sources enabled in TEFCON
            let tef_control = self.register(tefcon::ADDRESS);
            let tef_not_empty = self.tef.len > 0 && tefcon::TEFNEIE.is_set(tef_control);
            let tef_overflow = self.tef_overflow && tefcon::TEFOVIE.is_set(tef_control);
            if tef_not_empty || tef_overflow {
                value |= int::TEFIF.mask();
            }
            if self.fifos[1].len > 0 {
                value |= int::RXIF.mask();
            }
            if self.rx_overflow {
                value |= int::RXOVIF.mask();
            }
            return Some(value);
        }
        if aligned == tefsta::ADDRESS {
            let mut value = 0;
            if self.tef.len > 0 {
                value |= tefsta::TEFNEIF.mask();
            }
            if self.tef_overflow {
                value |= tefsta::TEFOVIF.mask();
            }
            return Some(value);
        }
        if aligned == TEFUA {
            return Some(self.user_address(&self.tef));
        }

        if let Some(fifo) = Self::fifo_of(aligned, fifoua(1)) {
            return Some(self.user_address(&self.fifos[fifo as usize]));
        }

        let fifo = Self::fifo_of(aligned, fifosta::address(1))?;
        if self.is_transmit(fifo) {
            let pending = self.in_flight.contains(&fifo);
            return Some(if pending { 0 } else { fifosta::TFNRFNIF.mask() });
        }

        let mut value = 0;
        if self.fifos[fifo as usize].len > 0 {
            value |= fifosta::TFNRFNIF.mask();
        }
        if self.rx_overflow {
            value |= fifosta::RXOVIF.mask();
        }
        Some(value)
    }

    fn user_address(&self, fifo: &SimFifo) -> u32 {
        if !self.layout_assigned {
            return 0;
        }

        (fifo.head_address() - RAM_START) as u32
    }

    /// FIFO number of a per-FIFO register, `first` is the register of FIFO 1
    fn fifo_of(aligned: u16, first: u16) -> Option<u8> {
        if aligned < first || aligned >= first + 12 * 31 || (aligned - first) % 12 != 0 {
            return None;
        }

        Some(((aligned - first) / 12 + 1) as u8)
    }

    fn is_transmit(&self, fifo: u8) -> bool {
        fifocon::TXEN.is_set(self.register(fifocon::address(fifo)))
    }

    fn write_byte(&mut self, address: u16, value: u8) {
        let address = address & 0x0FFF;
        let aligned = address & !0x3;
        let index = address & 0x3;

        // writes to a stuck device go nowhere
        if self.con_stuck.is_some() && aligned == con::ADDRESS {
            return;
        }

        self.memory[address as usize] = value;

        if aligned == con::ADDRESS {
            self.con_written(index);
        } else if aligned == osc::ADDRESS && index == 0 {
            self.osc_written();
        } else if aligned == tefcon::ADDRESS && index == 1 {
            let register = self.register(tefcon::ADDRESS);
            if tefcon::UINC.is_set(register) {
                self.tef.pop();
                self.store(tefcon::ADDRESS, register & !tefcon::UINC.mask());
            }
        } else if aligned == tefsta::ADDRESS && index == 0 {
            if value & tefsta::TEFOVIF.mask() as u8 == 0 {
                self.tef_overflow = false;
            }
        } else if let Some(fifo) = Self::fifo_of(aligned, fifocon::address(1)) {
            self.fifo_control_written(fifo, index);
        } else if let Some(fifo) = Self::fifo_of(aligned, fifosta::address(1)) {
            if fifo == 1 && index == 0 && value & fifosta::RXOVIF.mask() as u8 == 0 {
                self.rx_overflow = false;
            }
        }
    }

    fn con_written(&mut self, index: u16) {
        let register = self.register(con::ADDRESS);

        if index == 3 {
            let requested = OperationMode::from_bits(con::REQOP.unpack(register));
            if requested != self.mode {
                self.mode = requested;
                self.modes.push(requested);

                if !matches!(requested, OperationMode::Config | OperationMode::Sleep) && !self.layout_assigned {
                    self.assign_ram();
                }
            }
        }

        // OPMOD is read only
        let register = con::OPMOD.replace(self.register(con::ADDRESS), self.mode as u32);
        self.store(con::ADDRESS, register);
    }

    fn osc_written(&mut self) {
        let mut register = self.register(osc::ADDRESS) & 0xFF;

        if !osc::OSCDIS.is_set(register) {
            register |= osc::OSCRDY.mask();
        }
        register |= osc::SCLKRDY.mask();
        if osc::PLLEN.is_set(register) && self.pll_locks {
            register |= osc::PLLRDY.mask();
        }

        self.store(osc::ADDRESS, register);
    }

    fn fifo_control_written(&mut self, fifo: u8, index: u16) {
        self.configured[fifo as usize] = true;

        if index != 1 {
            return;
        }

        let address = fifocon::address(fifo);
        let mut register = self.register(address);

        if fifocon::TXREQ.is_set(register) && self.is_transmit(fifo) && !self.in_flight.contains(&fifo) {
            self.in_flight.push_back(fifo);
        }
        if fifocon::UINC.is_set(register) && !self.is_transmit(fifo) {
            self.fifos[fifo as usize].pop();
        }

        register &= !(fifocon::UINC.mask() | fifocon::FRESET.mask());
        self.store(address, register);
    }

    /// Places TEF and all configured FIFOs into RAM, in FIFO order
    fn assign_ram(&mut self) {
        let mut next = RAM_START;

        let tef_control = self.register(tefcon::ADDRESS);
        let tef_size = if tefcon::TEFTSEN.is_set(tef_control) { 12 } else { 8 };
        self.tef = SimFifo {
            base: next,
            element_size: tef_size,
            count: tefcon::FSIZE.unpack(tef_control) as u8 + 1,
            ..Default::default()
        };
        next += tef_size * self.tef.count as u16;

        for fifo in 1..32u8 {
            if !self.configured[fifo as usize] {
                continue;
            }

            let control = self.register(fifocon::address(fifo));
            let payload = match fifocon::PLSIZE.unpack(control) {
                0b000 => 8,
                0b001 => 12,
                0b010 => 16,
                0b011 => 20,
                0b100 => 24,
                0b101 => 32,
                0b110 => 48,
                _ => 64,
            };

            let mut element_size = 8 + payload;
            if !fifocon::TXEN.is_set(control) && fifocon::RXTSEN.is_set(control) {
                element_size += 4;
            }

            self.fifos[fifo as usize] = SimFifo {
                base: next,
                element_size,
                count: fifocon::FSIZE.unpack(control) as u8 + 1,
                ..Default::default()
            };
            next += element_size * self.fifos[fifo as usize].count as u16;
        }

        assert!(next <= RAM_START + RAM_SIZE, "FIFOs exceed message RAM");
        self.layout_assigned = true;
    }
}

impl ErrorType for SimulatedChip {
    type Error = SimError;
}

impl SpiDevice<u8> for SimulatedChip {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), SimError> {
        if self.fail_transfers {
            return Err(SimError::Fault);
        }

        self.process(operations, false);
        Ok(())
    }
}

impl Transport for SimulatedChip {
    fn set_clock_speed(&mut self, hz: u32) -> Result<(), SimError> {
        self.speeds.push(hz);
        Ok(())
    }

    fn set_word_size(&mut self, bits: u8) -> Result<(), SimError> {
        self.word_size = Some(bits);
        Ok(())
    }

    fn submit_async(&mut self, transfer: PreparedTransfer<'_>) -> Result<(), BusBusy> {
        if self.busy {
            return Err(BusBusy);
        }

        self.submitted.push(transfer.tag);
        self.process(&mut [Operation::Write(transfer.data)], true);
        Ok(())
    }
}
