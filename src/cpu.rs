//! 6502 CPU emulation (NES variant: decimal mode is wired but ignored).
//!
//! The CPU executes one full instruction at a time and then "owes" the
//! remaining cycles of that instruction: each call to [`tick`] is one CPU
//! cycle, and a tick that still has skip cycles outstanding does nothing else.
//! Interrupts are checked at instruction boundaries, NMI before IRQ.

pub(crate) mod instructions;

use crate::bus::CpuBus;
use bincode::{Decode, Encode};
use crate::num::GetBit;
use thiserror::Error;

pub const STACK_START: u16 = 0x0100;
pub const NMI_VECTOR: u16 = 0xFFFA;
pub const RESET_VECTOR: u16 = 0xFFFC;
pub const IRQ_VECTOR: u16 = 0xFFFE;

const INTERRUPT_CYCLES: u32 = 7;
const RESET_CYCLES: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("unknown opcode {opcode:02X} at PC {pc:04X}")]
    UnknownOpcode { opcode: u8, pc: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusReadContext {
    HardwareInterruptHandler,
    Brk,
    PushStack,
}

#[derive(Debug, Clone, Copy, Encode, Decode)]
pub struct StatusFlags {
    pub negative: bool,
    pub overflow: bool,
    pub decimal: bool,
    pub interrupt_disable: bool,
    pub zero: bool,
    pub carry: bool,
}

impl StatusFlags {
    #[must_use]
    pub fn new() -> Self {
        // I defaults to 1, everything else to 0
        Self {
            negative: false,
            overflow: false,
            decimal: false,
            interrupt_disable: true,
            zero: false,
            carry: false,
        }
    }

    pub fn set_negative(&mut self, negative: bool) -> &mut Self {
        self.negative = negative;
        self
    }

    pub fn set_overflow(&mut self, overflow: bool) -> &mut Self {
        self.overflow = overflow;
        self
    }

    pub fn set_zero(&mut self, zero: bool) -> &mut Self {
        self.zero = zero;
        self
    }

    pub fn set_carry(&mut self, carry: bool) -> &mut Self {
        self.carry = carry;
        self
    }

    #[must_use]
    pub fn to_byte(self, read_ctx: StatusReadContext) -> u8 {
        // The B flag is set by BRK and PHP pushes, clear in NMI/IRQ pushes
        let b_flag = match read_ctx {
            StatusReadContext::Brk | StatusReadContext::PushStack => 0x10,
            StatusReadContext::HardwareInterruptHandler => 0x00,
        };

        // Bit 5 (U) is unused and always reads as 1
        (u8::from(self.negative) << 7)
            | (u8::from(self.overflow) << 6)
            | 0x20
            | b_flag
            | (u8::from(self.decimal) << 3)
            | (u8::from(self.interrupt_disable) << 2)
            | (u8::from(self.zero) << 1)
            | u8::from(self.carry)
    }

    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        Self {
            negative: byte.bit(7),
            overflow: byte.bit(6),
            decimal: byte.bit(3),
            interrupt_disable: byte.bit(2),
            zero: byte.bit(1),
            carry: byte.bit(0),
        }
    }
}

impl Default for StatusFlags {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct CpuRegisters {
    pub accumulator: u8,
    pub x: u8,
    pub y: u8,
    pub status: StatusFlags,
    pub pc: u16,
    pub sp: u8,
}

impl CpuRegisters {
    fn new(reset_vector: u16) -> Self {
        Self { accumulator: 0, x: 0, y: 0, status: StatusFlags::new(), pc: reset_vector, sp: 0xFD }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterruptType {
    Nmi,
    Irq,
    Brk,
}

impl InterruptType {
    fn vector(self) -> u16 {
        match self {
            Self::Nmi => NMI_VECTOR,
            Self::Irq | Self::Brk => IRQ_VECTOR,
        }
    }

    fn status_read_context(self) -> StatusReadContext {
        match self {
            Self::Brk => StatusReadContext::Brk,
            Self::Nmi | Self::Irq => StatusReadContext::HardwareInterruptHandler,
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct CpuState {
    pub registers: CpuRegisters,
    total_cycles: u64,
    skip_cycles: u32,
    strict_opcodes: bool,
}

impl CpuState {
    /// Create a new CPU with the PC pointing at the RESET vector.
    pub fn new(bus: &mut CpuBus<'_>, strict_opcodes: bool) -> Self {
        let reset_vector = read_address_u16(bus, RESET_VECTOR);

        Self {
            registers: CpuRegisters::new(reset_vector),
            total_cycles: 0,
            skip_cycles: RESET_CYCLES,
            strict_opcodes,
        }
    }

    #[must_use]
    pub fn at_instruction_boundary(&self) -> bool {
        self.skip_cycles == 0
    }
}

/// Run the CPU for one cycle.
///
/// # Errors
///
/// Returns an error on an unknown opcode when the CPU was constructed in
/// strict mode; otherwise unknown opcodes are logged and treated as 2-cycle
/// NOPs.
pub fn tick(state: &mut CpuState, bus: &mut CpuBus<'_>) -> Result<(), CpuError> {
    state.total_cycles += 1;
    state.skip_cycles += bus.take_dmc_stall();

    if state.skip_cycles > 0 {
        state.skip_cycles -= 1;
        return Ok(());
    }

    // Instruction boundary: NMI has priority over IRQ, and IRQ is masked by
    // the I flag. NMI is edge triggered and cannot be masked.
    if bus.nmi_triggered() {
        bus.acknowledge_nmi();
        interrupt_sequence(state, bus, InterruptType::Nmi);
        state.skip_cycles = INTERRUPT_CYCLES - 1;
        return Ok(());
    }
    if !state.registers.status.interrupt_disable && bus.irq_triggered() {
        interrupt_sequence(state, bus, InterruptType::Irq);
        state.skip_cycles = INTERRUPT_CYCLES - 1;
        return Ok(());
    }

    let cycles = instructions::execute(state, bus)?;
    state.skip_cycles = cycles - 1;

    Ok(())
}

/// Reset the CPU, as if the console's reset button was pressed: the PC reloads
/// from the RESET vector, the stack pointer drops by 3 without anything being
/// pushed, and IRQs are disabled. A/X/Y survive.
pub fn reset(state: &mut CpuState, bus: &mut CpuBus<'_>) {
    state.registers.pc = read_address_u16(bus, RESET_VECTOR);
    state.registers.sp = state.registers.sp.wrapping_sub(3);
    state.registers.status.interrupt_disable = true;
    state.skip_cycles = RESET_CYCLES;
}

fn interrupt_sequence(state: &mut CpuState, bus: &mut CpuBus<'_>, interrupt_type: InterruptType) {
    let registers = &mut state.registers;

    if interrupt_type == InterruptType::Brk {
        // BRK skips the signature byte after the opcode
        registers.pc = registers.pc.wrapping_add(1);
    }

    let [pc_lsb, pc_msb] = registers.pc.to_le_bytes();
    let status_byte = registers.status.to_byte(interrupt_type.status_read_context());
    stack_push(registers, bus, pc_msb);
    stack_push(registers, bus, pc_lsb);
    stack_push(registers, bus, status_byte);

    registers.status.interrupt_disable = true;
    registers.pc = read_address_u16(bus, interrupt_type.vector());
}

fn stack_push(registers: &mut CpuRegisters, bus: &mut CpuBus<'_>, value: u8) {
    bus.write_address(STACK_START | u16::from(registers.sp), value);
    registers.sp = registers.sp.wrapping_sub(1);
}

fn stack_pop(registers: &mut CpuRegisters, bus: &mut CpuBus<'_>) -> u8 {
    registers.sp = registers.sp.wrapping_add(1);
    bus.read_address(STACK_START | u16::from(registers.sp))
}

fn read_address_u16(bus: &mut CpuBus<'_>, address: u16) -> u16 {
    let lsb = bus.read_address(address);
    let msb = bus.read_address(address.wrapping_add(1));
    u16::from_le_bytes([lsb, msb])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::cartridge::{from_ines_file, tests::ines_image};
    use crate::bus::{Bus, IrqSource};

    fn new_test_state() -> (Bus, CpuState) {
        let mapper = from_ines_file(&ines_image(0, 2, 1)).expect("valid image");
        let mut bus = Bus::from_cartridge(mapper);
        let mut state = CpuState::new(&mut bus.cpu(), false);
        state.skip_cycles = 0;
        state.registers.pc = 0x0200;
        (bus, state)
    }

    fn run_one_instruction(bus: &mut Bus, state: &mut CpuState) -> u64 {
        let start_cycles = state.total_cycles;
        let start_pc = state.registers.pc;
        loop {
            tick(state, &mut bus.cpu()).expect("no CPU fault");
            if state.at_instruction_boundary() && state.registers.pc != start_pc {
                break;
            }
        }
        state.total_cycles - start_cycles
    }

    #[test]
    fn skip_cycles_match_instruction_cost() {
        let (mut bus, mut state) = new_test_state();

        // LDA #$42
        bus.cpu().write_address(0x0200, 0xA9);
        bus.cpu().write_address(0x0201, 0x42);

        assert_eq!(run_one_instruction(&mut bus, &mut state), 2);
        assert_eq!(state.registers.accumulator, 0x42);
    }

    #[test]
    fn nmi_takes_seven_cycles_and_vectors() {
        let (mut bus, mut state) = new_test_state();

        bus.ppu().registers_mut().set_vblank_flag(true);
        bus.cpu().write_address(0x2000, 0x80);
        bus.tick();
        assert!(bus.cpu().nmi_triggered());

        let cycles = run_one_instruction(&mut bus, &mut state);
        assert_eq!(cycles, 7);
        // NROM with zeroed PRG: the NMI vector reads as 0
        assert_eq!(state.registers.pc, 0x0000);
        assert!(state.registers.status.interrupt_disable);
        assert!(!bus.cpu().nmi_triggered());

        // Pushed status has B clear, U set
        let pushed_status = bus.cpu().read_address(0x0100 | u16::from(state.registers.sp + 1));
        assert_eq!(pushed_status & 0x30, 0x20);
    }

    #[test]
    fn nmi_edge_requires_transition() {
        let (mut bus, _state) = new_test_state();

        bus.ppu().registers_mut().set_vblank_flag(true);
        bus.cpu().write_address(0x2000, 0x80);
        bus.tick();
        bus.cpu().acknowledge_nmi();

        // Line still high: no new edge
        bus.tick();
        assert!(!bus.cpu().nmi_triggered());

        // Drop and raise the line again
        bus.ppu().registers_mut().set_vblank_flag(false);
        bus.tick();
        bus.ppu().registers_mut().set_vblank_flag(true);
        bus.tick();
        assert!(bus.cpu().nmi_triggered());
    }

    #[test]
    fn irq_respects_interrupt_disable() {
        let (mut bus, mut state) = new_test_state();

        bus.cpu().interrupt_lines().set_irq_low_pull(IrqSource::ApuFrameCounter, true);

        // NOP with I set: no interrupt taken
        bus.cpu().write_address(0x0200, 0xEA);
        state.registers.status.interrupt_disable = true;
        assert_eq!(run_one_instruction(&mut bus, &mut state), 2);
        assert_eq!(state.registers.pc, 0x0201);

        // Clearing I lets the IRQ through at the next boundary
        state.registers.status.interrupt_disable = false;
        let cycles = run_one_instruction(&mut bus, &mut state);
        assert_eq!(cycles, 7);
        assert!(state.registers.status.interrupt_disable);
    }

    #[test]
    fn reset_drops_stack_pointer_without_pushing() {
        let (mut bus, mut state) = new_test_state();

        state.registers.sp = 0xFD;
        let stack_before: Vec<u8> =
            (0..=255u16).map(|i| bus.cpu().read_address(0x0100 | i)).collect();

        reset(&mut state, &mut bus.cpu());
        assert_eq!(state.registers.sp, 0xFA);
        assert!(state.registers.status.interrupt_disable);

        let stack_after: Vec<u8> =
            (0..=255u16).map(|i| bus.cpu().read_address(0x0100 | i)).collect();
        assert_eq!(stack_before, stack_after);
    }

    #[test]
    fn reset_twice_is_reset_once_plus_stack_drop() {
        let (mut bus, mut state) = new_test_state();

        reset(&mut state, &mut bus.cpu());
        let pc_after_one = state.registers.pc;
        reset(&mut state, &mut bus.cpu());
        assert_eq!(state.registers.pc, pc_after_one);
    }

    #[test]
    fn dmc_stall_extends_instruction() {
        let (mut bus, mut state) = new_test_state();

        bus.cpu().write_address(0x0200, 0xEA);
        bus.cpu().add_dmc_stall(4);

        assert_eq!(run_one_instruction(&mut bus, &mut state), 6);
    }
}
