//! Instruction decoding and execution.
//!
//! Decoding uses a flat 256-entry table mapping each opcode to an operation
//! and addressing mode; base cycle costs come from a parallel table, with
//! page-crossing and branch penalties added during execution. The documented
//! instruction set is covered along with the undocumented opcodes games rely
//! on: the extra NOPs, the combined RMW+ALU group (SLO/RLA/SRE/RRA/DCP/ISB),
//! LAX, and SAX.

use crate::bus::CpuBus;
use crate::cpu::{
    CpuError, CpuRegisters, CpuState, InterruptType, StatusFlags, StatusReadContext,
    interrupt_sequence, stack_pop, stack_push,
};
use crate::num::GetBit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddressingMode {
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    IndirectX,
    IndirectY,
}

impl AddressingMode {
    /// Whether read instructions in this mode pay the +1 page-crossing cycle.
    fn has_page_cross_penalty(self) -> bool {
        matches!(self, Self::AbsoluteX | Self::AbsoluteY | Self::IndirectY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadOp {
    Adc,
    And,
    Bit,
    Cmp,
    Cpx,
    Cpy,
    Eor,
    Lda,
    Ldx,
    Ldy,
    Ora,
    Sbc,
    // LAX (undocumented): LDA and LDX at once
    Lax,
    // Undocumented NOPs still perform the operand read
    Nop,
}

impl ReadOp {
    fn execute(self, registers: &mut CpuRegisters, value: u8) {
        match self {
            Self::Adc => {
                registers.accumulator = add(registers.accumulator, value, &mut registers.status);
            }
            Self::And => {
                registers.accumulator = and(registers.accumulator, value, &mut registers.status);
            }
            Self::Bit => {
                bit_test(registers.accumulator, value, &mut registers.status);
            }
            Self::Cmp => {
                compare(registers.accumulator, value, &mut registers.status);
            }
            Self::Cpx => {
                compare(registers.x, value, &mut registers.status);
            }
            Self::Cpy => {
                compare(registers.y, value, &mut registers.status);
            }
            Self::Eor => {
                registers.accumulator = xor(registers.accumulator, value, &mut registers.status);
            }
            Self::Lda => {
                registers.accumulator = value;
                registers.status.set_negative(value.bit(7)).set_zero(value == 0);
            }
            Self::Ldx => {
                registers.x = value;
                registers.status.set_negative(value.bit(7)).set_zero(value == 0);
            }
            Self::Ldy => {
                registers.y = value;
                registers.status.set_negative(value.bit(7)).set_zero(value == 0);
            }
            Self::Ora => {
                registers.accumulator = or(registers.accumulator, value, &mut registers.status);
            }
            Self::Sbc => {
                registers.accumulator =
                    subtract(registers.accumulator, value, &mut registers.status);
            }
            Self::Lax => {
                registers.accumulator = value;
                registers.x = value;
                registers.status.set_negative(value.bit(7)).set_zero(value == 0);
            }
            Self::Nop => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreOp {
    Sta,
    Stx,
    Sty,
    // SAX (undocumented): store A & X
    Sax,
}

impl StoreOp {
    fn value(self, registers: &CpuRegisters) -> u8 {
        match self {
            Self::Sta => registers.accumulator,
            Self::Stx => registers.x,
            Self::Sty => registers.y,
            Self::Sax => registers.accumulator & registers.x,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModifyOp {
    Asl,
    Dec,
    Inc,
    Lsr,
    Rol,
    Ror,
    // Undocumented RMW+ALU combinations
    Slo,
    Rla,
    Sre,
    Rra,
    Dcp,
    Isb,
}

impl ModifyOp {
    /// Apply the modify operation, returning the new memory value. The
    /// combined undocumented ops also update the accumulator and flags as
    /// their ALU half dictates.
    fn execute(self, registers: &mut CpuRegisters, value: u8) -> u8 {
        let flags = &mut registers.status;
        match self {
            Self::Asl => shift_left(value, flags),
            Self::Dec => {
                let modified = value.wrapping_sub(1);
                flags.set_negative(modified.bit(7)).set_zero(modified == 0);
                modified
            }
            Self::Inc => {
                let modified = value.wrapping_add(1);
                flags.set_negative(modified.bit(7)).set_zero(modified == 0);
                modified
            }
            Self::Lsr => logical_shift_right(value, flags),
            Self::Rol => rotate_left(value, flags),
            Self::Ror => rotate_right(value, flags),
            Self::Slo => {
                let modified = shift_left(value, flags);
                registers.accumulator = or(registers.accumulator, modified, &mut registers.status);
                modified
            }
            Self::Rla => {
                let modified = rotate_left(value, flags);
                registers.accumulator = and(registers.accumulator, modified, &mut registers.status);
                modified
            }
            Self::Sre => {
                let modified = logical_shift_right(value, flags);
                registers.accumulator = xor(registers.accumulator, modified, &mut registers.status);
                modified
            }
            Self::Rra => {
                let modified = rotate_right(value, flags);
                registers.accumulator =
                    add(registers.accumulator, modified, &mut registers.status);
                modified
            }
            Self::Dcp => {
                let modified = value.wrapping_sub(1);
                compare(registers.accumulator, modified, &mut registers.status);
                modified
            }
            Self::Isb => {
                let modified = value.wrapping_add(1);
                registers.accumulator =
                    subtract(registers.accumulator, modified, &mut registers.status);
                modified
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BranchCondition {
    CarryClear,
    CarrySet,
    Zero,
    NotZero,
    Minus,
    Plus,
    OverflowClear,
    OverflowSet,
}

impl BranchCondition {
    fn check(self, flags: StatusFlags) -> bool {
        match self {
            Self::CarryClear => !flags.carry,
            Self::CarrySet => flags.carry,
            Self::Zero => flags.zero,
            Self::NotZero => !flags.zero,
            Self::Minus => flags.negative,
            Self::Plus => !flags.negative,
            Self::OverflowClear => !flags.overflow,
            Self::OverflowSet => flags.overflow,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImpliedOp {
    Clc,
    Cld,
    Cli,
    Clv,
    Sec,
    Sed,
    Sei,
    Tax,
    Tay,
    Tsx,
    Txa,
    Txs,
    Tya,
    Dex,
    Dey,
    Inx,
    Iny,
    Nop,
}

impl ImpliedOp {
    fn execute(self, registers: &mut CpuRegisters) {
        match self {
            Self::Clc => {
                registers.status.carry = false;
            }
            Self::Cld => {
                registers.status.decimal = false;
            }
            Self::Cli => {
                registers.status.interrupt_disable = false;
            }
            Self::Clv => {
                registers.status.overflow = false;
            }
            Self::Sec => {
                registers.status.carry = true;
            }
            Self::Sed => {
                registers.status.decimal = true;
            }
            Self::Sei => {
                registers.status.interrupt_disable = true;
            }
            Self::Tax => {
                registers.x = registers.accumulator;
                set_nz(registers.x, &mut registers.status);
            }
            Self::Tay => {
                registers.y = registers.accumulator;
                set_nz(registers.y, &mut registers.status);
            }
            Self::Tsx => {
                registers.x = registers.sp;
                set_nz(registers.x, &mut registers.status);
            }
            Self::Txa => {
                registers.accumulator = registers.x;
                set_nz(registers.accumulator, &mut registers.status);
            }
            Self::Txs => {
                registers.sp = registers.x;
            }
            Self::Tya => {
                registers.accumulator = registers.y;
                set_nz(registers.accumulator, &mut registers.status);
            }
            Self::Dex => {
                registers.x = registers.x.wrapping_sub(1);
                set_nz(registers.x, &mut registers.status);
            }
            Self::Dey => {
                registers.y = registers.y.wrapping_sub(1);
                set_nz(registers.y, &mut registers.status);
            }
            Self::Inx => {
                registers.x = registers.x.wrapping_add(1);
                set_nz(registers.x, &mut registers.status);
            }
            Self::Iny => {
                registers.y = registers.y.wrapping_add(1);
                set_nz(registers.y, &mut registers.status);
            }
            Self::Nop => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Instruction {
    Read(ReadOp, AddressingMode),
    Store(StoreOp, AddressingMode),
    Modify(ModifyOp, AddressingMode),
    ModifyAccumulator(ModifyOp),
    Branch(BranchCondition),
    Implied(ImpliedOp),
    JumpAbsolute,
    JumpIndirect,
    Jsr,
    Rts,
    Rti,
    Brk,
    PushAccumulator,
    PushStatus,
    PullAccumulator,
    PullStatus,
}

// Base cycle cost per opcode; 0 marks opcodes outside the implemented set.
// Page-crossing and taken-branch penalties are added during execution.
#[rustfmt::skip]
const OPCODE_CYCLES: [u8; 256] = [
    7, 6, 0, 8, 3, 3, 5, 5, 3, 2, 2, 0, 4, 4, 6, 6,
    2, 5, 0, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7,
    6, 6, 0, 8, 3, 3, 5, 5, 4, 2, 2, 0, 4, 4, 6, 6,
    2, 5, 0, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7,
    6, 6, 0, 8, 3, 3, 5, 5, 3, 2, 2, 0, 3, 4, 6, 6,
    2, 5, 0, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7,
    6, 6, 0, 8, 3, 3, 5, 5, 4, 2, 2, 0, 5, 4, 6, 6,
    2, 5, 0, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7,
    2, 6, 2, 6, 3, 3, 3, 3, 2, 2, 2, 0, 4, 4, 4, 4,
    2, 6, 0, 0, 4, 4, 4, 4, 2, 5, 2, 0, 0, 5, 0, 0,
    2, 6, 2, 6, 3, 3, 3, 3, 2, 2, 2, 0, 4, 4, 4, 4,
    2, 5, 0, 5, 4, 4, 4, 4, 2, 4, 2, 0, 4, 4, 4, 4,
    2, 6, 2, 8, 3, 3, 5, 5, 2, 2, 2, 0, 4, 4, 6, 6,
    2, 5, 0, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7,
    2, 6, 2, 8, 3, 3, 5, 5, 2, 2, 2, 2, 4, 4, 6, 6,
    2, 5, 0, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7,
];

fn decode(opcode: u8) -> Option<Instruction> {
    use self::AddressingMode as Mode;
    use self::Instruction as I;

    let instruction = match opcode {
        0x00 => I::Brk,
        0x01 => I::Read(ReadOp::Ora, Mode::IndirectX),
        0x03 => I::Modify(ModifyOp::Slo, Mode::IndirectX),
        0x04 | 0x44 | 0x64 => I::Read(ReadOp::Nop, Mode::ZeroPage),
        0x05 => I::Read(ReadOp::Ora, Mode::ZeroPage),
        0x06 => I::Modify(ModifyOp::Asl, Mode::ZeroPage),
        0x07 => I::Modify(ModifyOp::Slo, Mode::ZeroPage),
        0x08 => I::PushStatus,
        0x09 => I::Read(ReadOp::Ora, Mode::Immediate),
        0x0A => I::ModifyAccumulator(ModifyOp::Asl),
        0x0C => I::Read(ReadOp::Nop, Mode::Absolute),
        0x0D => I::Read(ReadOp::Ora, Mode::Absolute),
        0x0E => I::Modify(ModifyOp::Asl, Mode::Absolute),
        0x0F => I::Modify(ModifyOp::Slo, Mode::Absolute),
        0x10 => I::Branch(BranchCondition::Plus),
        0x11 => I::Read(ReadOp::Ora, Mode::IndirectY),
        0x13 => I::Modify(ModifyOp::Slo, Mode::IndirectY),
        0x14 | 0x34 | 0x54 | 0x74 | 0xD4 | 0xF4 => I::Read(ReadOp::Nop, Mode::ZeroPageX),
        0x15 => I::Read(ReadOp::Ora, Mode::ZeroPageX),
        0x16 => I::Modify(ModifyOp::Asl, Mode::ZeroPageX),
        0x17 => I::Modify(ModifyOp::Slo, Mode::ZeroPageX),
        0x18 => I::Implied(ImpliedOp::Clc),
        0x19 => I::Read(ReadOp::Ora, Mode::AbsoluteY),
        0x1A | 0x3A | 0x5A | 0x7A | 0xDA | 0xEA | 0xFA => I::Implied(ImpliedOp::Nop),
        0x1B => I::Modify(ModifyOp::Slo, Mode::AbsoluteY),
        0x1C | 0x3C | 0x5C | 0x7C | 0xDC | 0xFC => I::Read(ReadOp::Nop, Mode::AbsoluteX),
        0x1D => I::Read(ReadOp::Ora, Mode::AbsoluteX),
        0x1E => I::Modify(ModifyOp::Asl, Mode::AbsoluteX),
        0x1F => I::Modify(ModifyOp::Slo, Mode::AbsoluteX),
        0x20 => I::Jsr,
        0x21 => I::Read(ReadOp::And, Mode::IndirectX),
        0x23 => I::Modify(ModifyOp::Rla, Mode::IndirectX),
        0x24 => I::Read(ReadOp::Bit, Mode::ZeroPage),
        0x25 => I::Read(ReadOp::And, Mode::ZeroPage),
        0x26 => I::Modify(ModifyOp::Rol, Mode::ZeroPage),
        0x27 => I::Modify(ModifyOp::Rla, Mode::ZeroPage),
        0x28 => I::PullStatus,
        0x29 => I::Read(ReadOp::And, Mode::Immediate),
        0x2A => I::ModifyAccumulator(ModifyOp::Rol),
        0x2C => I::Read(ReadOp::Bit, Mode::Absolute),
        0x2D => I::Read(ReadOp::And, Mode::Absolute),
        0x2E => I::Modify(ModifyOp::Rol, Mode::Absolute),
        0x2F => I::Modify(ModifyOp::Rla, Mode::Absolute),
        0x30 => I::Branch(BranchCondition::Minus),
        0x31 => I::Read(ReadOp::And, Mode::IndirectY),
        0x33 => I::Modify(ModifyOp::Rla, Mode::IndirectY),
        0x35 => I::Read(ReadOp::And, Mode::ZeroPageX),
        0x36 => I::Modify(ModifyOp::Rol, Mode::ZeroPageX),
        0x37 => I::Modify(ModifyOp::Rla, Mode::ZeroPageX),
        0x38 => I::Implied(ImpliedOp::Sec),
        0x39 => I::Read(ReadOp::And, Mode::AbsoluteY),
        0x3B => I::Modify(ModifyOp::Rla, Mode::AbsoluteY),
        0x3D => I::Read(ReadOp::And, Mode::AbsoluteX),
        0x3E => I::Modify(ModifyOp::Rol, Mode::AbsoluteX),
        0x3F => I::Modify(ModifyOp::Rla, Mode::AbsoluteX),
        0x40 => I::Rti,
        0x41 => I::Read(ReadOp::Eor, Mode::IndirectX),
        0x43 => I::Modify(ModifyOp::Sre, Mode::IndirectX),
        0x45 => I::Read(ReadOp::Eor, Mode::ZeroPage),
        0x46 => I::Modify(ModifyOp::Lsr, Mode::ZeroPage),
        0x47 => I::Modify(ModifyOp::Sre, Mode::ZeroPage),
        0x48 => I::PushAccumulator,
        0x49 => I::Read(ReadOp::Eor, Mode::Immediate),
        0x4A => I::ModifyAccumulator(ModifyOp::Lsr),
        0x4C => I::JumpAbsolute,
        0x4D => I::Read(ReadOp::Eor, Mode::Absolute),
        0x4E => I::Modify(ModifyOp::Lsr, Mode::Absolute),
        0x4F => I::Modify(ModifyOp::Sre, Mode::Absolute),
        0x50 => I::Branch(BranchCondition::OverflowClear),
        0x51 => I::Read(ReadOp::Eor, Mode::IndirectY),
        0x53 => I::Modify(ModifyOp::Sre, Mode::IndirectY),
        0x55 => I::Read(ReadOp::Eor, Mode::ZeroPageX),
        0x56 => I::Modify(ModifyOp::Lsr, Mode::ZeroPageX),
        0x57 => I::Modify(ModifyOp::Sre, Mode::ZeroPageX),
        0x58 => I::Implied(ImpliedOp::Cli),
        0x59 => I::Read(ReadOp::Eor, Mode::AbsoluteY),
        0x5B => I::Modify(ModifyOp::Sre, Mode::AbsoluteY),
        0x5D => I::Read(ReadOp::Eor, Mode::AbsoluteX),
        0x5E => I::Modify(ModifyOp::Lsr, Mode::AbsoluteX),
        0x5F => I::Modify(ModifyOp::Sre, Mode::AbsoluteX),
        0x60 => I::Rts,
        0x61 => I::Read(ReadOp::Adc, Mode::IndirectX),
        0x63 => I::Modify(ModifyOp::Rra, Mode::IndirectX),
        0x65 => I::Read(ReadOp::Adc, Mode::ZeroPage),
        0x66 => I::Modify(ModifyOp::Ror, Mode::ZeroPage),
        0x67 => I::Modify(ModifyOp::Rra, Mode::ZeroPage),
        0x68 => I::PullAccumulator,
        0x69 => I::Read(ReadOp::Adc, Mode::Immediate),
        0x6A => I::ModifyAccumulator(ModifyOp::Ror),
        0x6C => I::JumpIndirect,
        0x6D => I::Read(ReadOp::Adc, Mode::Absolute),
        0x6E => I::Modify(ModifyOp::Ror, Mode::Absolute),
        0x6F => I::Modify(ModifyOp::Rra, Mode::Absolute),
        0x70 => I::Branch(BranchCondition::OverflowSet),
        0x71 => I::Read(ReadOp::Adc, Mode::IndirectY),
        0x73 => I::Modify(ModifyOp::Rra, Mode::IndirectY),
        0x75 => I::Read(ReadOp::Adc, Mode::ZeroPageX),
        0x76 => I::Modify(ModifyOp::Ror, Mode::ZeroPageX),
        0x77 => I::Modify(ModifyOp::Rra, Mode::ZeroPageX),
        0x78 => I::Implied(ImpliedOp::Sei),
        0x79 => I::Read(ReadOp::Adc, Mode::AbsoluteY),
        0x7B => I::Modify(ModifyOp::Rra, Mode::AbsoluteY),
        0x7D => I::Read(ReadOp::Adc, Mode::AbsoluteX),
        0x7E => I::Modify(ModifyOp::Ror, Mode::AbsoluteX),
        0x7F => I::Modify(ModifyOp::Rra, Mode::AbsoluteX),
        0x80 | 0x82 | 0x89 | 0xC2 | 0xE2 => I::Read(ReadOp::Nop, Mode::Immediate),
        0x81 => I::Store(StoreOp::Sta, Mode::IndirectX),
        0x83 => I::Store(StoreOp::Sax, Mode::IndirectX),
        0x84 => I::Store(StoreOp::Sty, Mode::ZeroPage),
        0x85 => I::Store(StoreOp::Sta, Mode::ZeroPage),
        0x86 => I::Store(StoreOp::Stx, Mode::ZeroPage),
        0x87 => I::Store(StoreOp::Sax, Mode::ZeroPage),
        0x88 => I::Implied(ImpliedOp::Dey),
        0x8A => I::Implied(ImpliedOp::Txa),
        0x8C => I::Store(StoreOp::Sty, Mode::Absolute),
        0x8D => I::Store(StoreOp::Sta, Mode::Absolute),
        0x8E => I::Store(StoreOp::Stx, Mode::Absolute),
        0x8F => I::Store(StoreOp::Sax, Mode::Absolute),
        0x90 => I::Branch(BranchCondition::CarryClear),
        0x91 => I::Store(StoreOp::Sta, Mode::IndirectY),
        0x94 => I::Store(StoreOp::Sty, Mode::ZeroPageX),
        0x95 => I::Store(StoreOp::Sta, Mode::ZeroPageX),
        0x96 => I::Store(StoreOp::Stx, Mode::ZeroPageY),
        0x97 => I::Store(StoreOp::Sax, Mode::ZeroPageY),
        0x98 => I::Implied(ImpliedOp::Tya),
        0x99 => I::Store(StoreOp::Sta, Mode::AbsoluteY),
        0x9A => I::Implied(ImpliedOp::Txs),
        0x9D => I::Store(StoreOp::Sta, Mode::AbsoluteX),
        0xA0 => I::Read(ReadOp::Ldy, Mode::Immediate),
        0xA1 => I::Read(ReadOp::Lda, Mode::IndirectX),
        0xA2 => I::Read(ReadOp::Ldx, Mode::Immediate),
        0xA3 => I::Read(ReadOp::Lax, Mode::IndirectX),
        0xA4 => I::Read(ReadOp::Ldy, Mode::ZeroPage),
        0xA5 => I::Read(ReadOp::Lda, Mode::ZeroPage),
        0xA6 => I::Read(ReadOp::Ldx, Mode::ZeroPage),
        0xA7 => I::Read(ReadOp::Lax, Mode::ZeroPage),
        0xA8 => I::Implied(ImpliedOp::Tay),
        0xA9 => I::Read(ReadOp::Lda, Mode::Immediate),
        0xAA => I::Implied(ImpliedOp::Tax),
        0xAC => I::Read(ReadOp::Ldy, Mode::Absolute),
        0xAD => I::Read(ReadOp::Lda, Mode::Absolute),
        0xAE => I::Read(ReadOp::Ldx, Mode::Absolute),
        0xAF => I::Read(ReadOp::Lax, Mode::Absolute),
        0xB0 => I::Branch(BranchCondition::CarrySet),
        0xB1 => I::Read(ReadOp::Lda, Mode::IndirectY),
        0xB3 => I::Read(ReadOp::Lax, Mode::IndirectY),
        0xB4 => I::Read(ReadOp::Ldy, Mode::ZeroPageX),
        0xB5 => I::Read(ReadOp::Lda, Mode::ZeroPageX),
        0xB6 => I::Read(ReadOp::Ldx, Mode::ZeroPageY),
        0xB7 => I::Read(ReadOp::Lax, Mode::ZeroPageY),
        0xB8 => I::Implied(ImpliedOp::Clv),
        0xB9 => I::Read(ReadOp::Lda, Mode::AbsoluteY),
        0xBA => I::Implied(ImpliedOp::Tsx),
        0xBC => I::Read(ReadOp::Ldy, Mode::AbsoluteX),
        0xBD => I::Read(ReadOp::Lda, Mode::AbsoluteX),
        0xBE => I::Read(ReadOp::Ldx, Mode::AbsoluteY),
        0xBF => I::Read(ReadOp::Lax, Mode::AbsoluteY),
        0xC0 => I::Read(ReadOp::Cpy, Mode::Immediate),
        0xC1 => I::Read(ReadOp::Cmp, Mode::IndirectX),
        0xC3 => I::Modify(ModifyOp::Dcp, Mode::IndirectX),
        0xC4 => I::Read(ReadOp::Cpy, Mode::ZeroPage),
        0xC5 => I::Read(ReadOp::Cmp, Mode::ZeroPage),
        0xC6 => I::Modify(ModifyOp::Dec, Mode::ZeroPage),
        0xC7 => I::Modify(ModifyOp::Dcp, Mode::ZeroPage),
        0xC8 => I::Implied(ImpliedOp::Iny),
        0xC9 => I::Read(ReadOp::Cmp, Mode::Immediate),
        0xCA => I::Implied(ImpliedOp::Dex),
        0xCC => I::Read(ReadOp::Cpy, Mode::Absolute),
        0xCD => I::Read(ReadOp::Cmp, Mode::Absolute),
        0xCE => I::Modify(ModifyOp::Dec, Mode::Absolute),
        0xCF => I::Modify(ModifyOp::Dcp, Mode::Absolute),
        0xD0 => I::Branch(BranchCondition::NotZero),
        0xD1 => I::Read(ReadOp::Cmp, Mode::IndirectY),
        0xD3 => I::Modify(ModifyOp::Dcp, Mode::IndirectY),
        0xD5 => I::Read(ReadOp::Cmp, Mode::ZeroPageX),
        0xD6 => I::Modify(ModifyOp::Dec, Mode::ZeroPageX),
        0xD7 => I::Modify(ModifyOp::Dcp, Mode::ZeroPageX),
        0xD8 => I::Implied(ImpliedOp::Cld),
        0xD9 => I::Read(ReadOp::Cmp, Mode::AbsoluteY),
        0xDB => I::Modify(ModifyOp::Dcp, Mode::AbsoluteY),
        0xDD => I::Read(ReadOp::Cmp, Mode::AbsoluteX),
        0xDE => I::Modify(ModifyOp::Dec, Mode::AbsoluteX),
        0xDF => I::Modify(ModifyOp::Dcp, Mode::AbsoluteX),
        0xE0 => I::Read(ReadOp::Cpx, Mode::Immediate),
        0xE1 => I::Read(ReadOp::Sbc, Mode::IndirectX),
        0xE3 => I::Modify(ModifyOp::Isb, Mode::IndirectX),
        0xE4 => I::Read(ReadOp::Cpx, Mode::ZeroPage),
        0xE5 => I::Read(ReadOp::Sbc, Mode::ZeroPage),
        0xE6 => I::Modify(ModifyOp::Inc, Mode::ZeroPage),
        0xE7 => I::Modify(ModifyOp::Isb, Mode::ZeroPage),
        0xE8 => I::Implied(ImpliedOp::Inx),
        0xE9 | 0xEB => I::Read(ReadOp::Sbc, Mode::Immediate),
        0xEC => I::Read(ReadOp::Cpx, Mode::Absolute),
        0xED => I::Read(ReadOp::Sbc, Mode::Absolute),
        0xEE => I::Modify(ModifyOp::Inc, Mode::Absolute),
        0xEF => I::Modify(ModifyOp::Isb, Mode::Absolute),
        0xF0 => I::Branch(BranchCondition::Zero),
        0xF1 => I::Read(ReadOp::Sbc, Mode::IndirectY),
        0xF3 => I::Modify(ModifyOp::Isb, Mode::IndirectY),
        0xF5 => I::Read(ReadOp::Sbc, Mode::ZeroPageX),
        0xF6 => I::Modify(ModifyOp::Inc, Mode::ZeroPageX),
        0xF7 => I::Modify(ModifyOp::Isb, Mode::ZeroPageX),
        0xF8 => I::Implied(ImpliedOp::Sed),
        0xF9 => I::Read(ReadOp::Sbc, Mode::AbsoluteY),
        0xFB => I::Modify(ModifyOp::Isb, Mode::AbsoluteY),
        0xFD => I::Read(ReadOp::Sbc, Mode::AbsoluteX),
        0xFE => I::Modify(ModifyOp::Inc, Mode::AbsoluteX),
        0xFF => I::Modify(ModifyOp::Isb, Mode::AbsoluteX),
        _ => return None,
    };

    Some(instruction)
}

/// Fetch, decode, and execute one instruction, returning its cycle cost.
pub(crate) fn execute(state: &mut CpuState, bus: &mut CpuBus<'_>) -> Result<u32, CpuError> {
    let opcode_pc = state.registers.pc;
    let opcode = fetch_operand(&mut state.registers, bus);

    let Some(instruction) = decode(opcode) else {
        if state.strict_opcodes {
            return Err(CpuError::UnknownOpcode { opcode, pc: opcode_pc });
        }
        log::warn!("Unknown opcode {opcode:02X} at PC {opcode_pc:04X}; treating as a 2-cycle NOP");
        return Ok(2);
    };

    let base_cycles = u32::from(OPCODE_CYCLES[opcode as usize]);
    let extra_cycles = execute_instruction(state, bus, instruction);

    Ok(base_cycles + extra_cycles)
}

fn execute_instruction(
    state: &mut CpuState,
    bus: &mut CpuBus<'_>,
    instruction: Instruction,
) -> u32 {
    let registers = &mut state.registers;

    match instruction {
        Instruction::Read(op, AddressingMode::Immediate) => {
            let value = fetch_operand(registers, bus);
            op.execute(registers, value);
            0
        }
        Instruction::Read(op, mode) => {
            let (address, page_crossed) = resolve_address(registers, bus, mode);
            let value = bus.read_address(address);
            op.execute(registers, value);
            u32::from(page_crossed && mode.has_page_cross_penalty())
        }
        Instruction::Store(op, mode) => {
            let (address, _) = resolve_address(registers, bus, mode);
            bus.write_address(address, op.value(registers));
            0
        }
        Instruction::Modify(op, mode) => {
            let (address, _) = resolve_address(registers, bus, mode);
            let value = bus.read_address(address);
            let modified = op.execute(registers, value);
            bus.write_address(address, modified);
            0
        }
        Instruction::ModifyAccumulator(op) => {
            let accumulator = registers.accumulator;
            registers.accumulator = op.execute(registers, accumulator);
            0
        }
        Instruction::Branch(condition) => {
            let offset = fetch_operand(registers, bus) as i8;
            if !condition.check(registers.status) {
                return 0;
            }

            let old_pc = registers.pc;
            registers.pc = old_pc.wrapping_add(offset as u16);
            1 + u32::from(page_crossed(old_pc, registers.pc))
        }
        Instruction::Implied(op) => {
            op.execute(registers);
            0
        }
        Instruction::JumpAbsolute => {
            registers.pc = fetch_operand_u16(registers, bus);
            0
        }
        Instruction::JumpIndirect => {
            let pointer = fetch_operand_u16(registers, bus);
            // Hardware bug: the pointer's high byte read does not carry into
            // the next page, so ($xxFF) wraps within its page
            let lsb = bus.read_address(pointer);
            let msb_address = (pointer & 0xFF00) | (pointer.wrapping_add(1) & 0x00FF);
            let msb = bus.read_address(msb_address);
            registers.pc = u16::from_le_bytes([lsb, msb]);
            0
        }
        Instruction::Jsr => {
            let target = fetch_operand_u16(registers, bus);
            // Push the address of the last operand byte; RTS adds 1
            let return_address = registers.pc.wrapping_sub(1);
            let [lsb, msb] = return_address.to_le_bytes();
            stack_push(registers, bus, msb);
            stack_push(registers, bus, lsb);
            registers.pc = target;
            0
        }
        Instruction::Rts => {
            let lsb = stack_pop(registers, bus);
            let msb = stack_pop(registers, bus);
            registers.pc = u16::from_le_bytes([lsb, msb]).wrapping_add(1);
            0
        }
        Instruction::Rti => {
            let status = stack_pop(registers, bus);
            registers.status = StatusFlags::from_byte(status);
            let lsb = stack_pop(registers, bus);
            let msb = stack_pop(registers, bus);
            registers.pc = u16::from_le_bytes([lsb, msb]);
            0
        }
        Instruction::Brk => {
            interrupt_sequence(state, bus, InterruptType::Brk);
            0
        }
        Instruction::PushAccumulator => {
            let value = registers.accumulator;
            stack_push(registers, bus, value);
            0
        }
        Instruction::PushStatus => {
            let value = registers.status.to_byte(StatusReadContext::PushStack);
            stack_push(registers, bus, value);
            0
        }
        Instruction::PullAccumulator => {
            registers.accumulator = stack_pop(registers, bus);
            let accumulator = registers.accumulator;
            set_nz(accumulator, &mut registers.status);
            0
        }
        Instruction::PullStatus => {
            let value = stack_pop(registers, bus);
            registers.status = StatusFlags::from_byte(value);
            0
        }
    }
}

fn fetch_operand(registers: &mut CpuRegisters, bus: &mut CpuBus<'_>) -> u8 {
    let operand = bus.read_address(registers.pc);
    registers.pc = registers.pc.wrapping_add(1);
    operand
}

fn fetch_operand_u16(registers: &mut CpuRegisters, bus: &mut CpuBus<'_>) -> u16 {
    let lsb = fetch_operand(registers, bus);
    let msb = fetch_operand(registers, bus);
    u16::from_le_bytes([lsb, msb])
}

/// Resolve the effective address for every mode with an operand in memory,
/// reporting whether indexing crossed a page boundary.
fn resolve_address(
    registers: &mut CpuRegisters,
    bus: &mut CpuBus<'_>,
    mode: AddressingMode,
) -> (u16, bool) {
    match mode {
        AddressingMode::ZeroPage => (fetch_operand(registers, bus).into(), false),
        AddressingMode::ZeroPageX => {
            let operand = fetch_operand(registers, bus);
            (operand.wrapping_add(registers.x).into(), false)
        }
        AddressingMode::ZeroPageY => {
            let operand = fetch_operand(registers, bus);
            (operand.wrapping_add(registers.y).into(), false)
        }
        AddressingMode::Absolute => (fetch_operand_u16(registers, bus), false),
        AddressingMode::AbsoluteX => {
            let base = fetch_operand_u16(registers, bus);
            let address = base.wrapping_add(registers.x.into());
            (address, page_crossed(base, address))
        }
        AddressingMode::AbsoluteY => {
            let base = fetch_operand_u16(registers, bus);
            let address = base.wrapping_add(registers.y.into());
            (address, page_crossed(base, address))
        }
        AddressingMode::IndirectX => {
            let pointer = fetch_operand(registers, bus).wrapping_add(registers.x);
            (read_zero_page_u16(bus, pointer), false)
        }
        AddressingMode::IndirectY => {
            let pointer = fetch_operand(registers, bus);
            let base = read_zero_page_u16(bus, pointer);
            let address = base.wrapping_add(registers.y.into());
            (address, page_crossed(base, address))
        }
        AddressingMode::Immediate => unreachable!("immediate mode has no effective address"),
    }
}

/// Read a 16-bit pointer from the zero page, wrapping within the page.
fn read_zero_page_u16(bus: &mut CpuBus<'_>, pointer: u8) -> u16 {
    let lsb = bus.read_address(pointer.into());
    let msb = bus.read_address(pointer.wrapping_add(1).into());
    u16::from_le_bytes([lsb, msb])
}

fn page_crossed(a: u16, b: u16) -> bool {
    a & 0xFF00 != b & 0xFF00
}

fn set_nz(value: u8, flags: &mut StatusFlags) {
    flags.set_negative(value.bit(7)).set_zero(value == 0);
}

fn add(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    let carry = u16::from(flags.carry);
    let sum = u16::from(accumulator) + u16::from(value) + carry;
    let result = sum as u8;

    let bit_6_carry = (accumulator & 0x7F) + (value & 0x7F) + (carry as u8) >= 0x80;
    let overflow = bit_6_carry != (sum >= 0x100);

    flags
        .set_negative(result.bit(7))
        .set_overflow(overflow)
        .set_zero(result == 0)
        .set_carry(sum >= 0x100);

    result
}

fn subtract(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    // SBC is just ADC with the operand inverted
    add(accumulator, value ^ 0xFF, flags)
}

fn compare(register: u8, value: u8, flags: &mut StatusFlags) {
    let diff = register.wrapping_sub(value);
    flags.set_negative(diff.bit(7)).set_zero(register == value).set_carry(register >= value);
}

fn and(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    let result = accumulator & value;
    set_nz(result, flags);
    result
}

fn or(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    let result = accumulator | value;
    set_nz(result, flags);
    result
}

fn xor(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    let result = accumulator ^ value;
    set_nz(result, flags);
    result
}

fn bit_test(accumulator: u8, value: u8, flags: &mut StatusFlags) {
    flags
        .set_negative(value.bit(7))
        .set_overflow(value.bit(6))
        .set_zero(accumulator & value == 0);
}

fn shift_left(value: u8, flags: &mut StatusFlags) -> u8 {
    let result = value << 1;
    flags.set_carry(value.bit(7));
    set_nz(result, flags);
    result
}

fn logical_shift_right(value: u8, flags: &mut StatusFlags) -> u8 {
    let result = value >> 1;
    flags.set_carry(value.bit(0));
    set_nz(result, flags);
    result
}

fn rotate_left(value: u8, flags: &mut StatusFlags) -> u8 {
    let result = (value << 1) | u8::from(flags.carry);
    flags.set_carry(value.bit(7));
    set_nz(result, flags);
    result
}

fn rotate_right(value: u8, flags: &mut StatusFlags) -> u8 {
    let result = (value >> 1) | (u8::from(flags.carry) << 7);
    flags.set_carry(value.bit(0));
    set_nz(result, flags);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::bus::cartridge::{from_ines_file, tests::ines_image};

    struct TestCpu {
        bus: Bus,
        state: CpuState,
    }

    impl TestCpu {
        fn new(program: &[u8]) -> Self {
            let mapper = from_ines_file(&ines_image(0, 2, 1)).expect("valid image");
            let mut bus = Bus::from_cartridge(mapper);
            let mut state = CpuState::new(&mut bus.cpu(), false);
            state.registers.pc = 0x0200;

            for (i, &byte) in program.iter().enumerate() {
                bus.cpu().write_address(0x0200 + i as u16, byte);
            }

            Self { bus, state }
        }

        fn write(&mut self, address: u16, value: u8) {
            self.bus.cpu().write_address(address, value);
        }

        fn read(&mut self, address: u16) -> u8 {
            self.bus.cpu().read_address(address)
        }

        fn step(&mut self) -> u32 {
            execute(&mut self.state, &mut self.bus.cpu()).expect("no CPU fault")
        }

        fn registers(&mut self) -> &mut CpuRegisters {
            &mut self.state.registers
        }
    }

    #[test]
    fn lda_immediate_sets_flags() {
        let mut cpu = TestCpu::new(&[0xA9, 0x00, 0xA9, 0x80]);

        assert_eq!(cpu.step(), 2);
        assert_eq!(cpu.registers().accumulator, 0x00);
        assert!(cpu.registers().status.zero);
        assert!(!cpu.registers().status.negative);

        assert_eq!(cpu.step(), 2);
        assert_eq!(cpu.registers().accumulator, 0x80);
        assert!(!cpu.registers().status.zero);
        assert!(cpu.registers().status.negative);
    }

    #[test]
    fn lda_absolute_x_page_cross_costs_extra_cycle() {
        // LDA $02F0,X
        let mut cpu = TestCpu::new(&[0xBD, 0xF0, 0x02, 0xBD, 0xF0, 0x02]);
        cpu.write(0x02F5, 0x11);
        cpu.write(0x0310, 0x22);

        cpu.registers().x = 0x05;
        assert_eq!(cpu.step(), 4);
        assert_eq!(cpu.registers().accumulator, 0x11);

        cpu.registers().x = 0x20;
        assert_eq!(cpu.step(), 5);
        assert_eq!(cpu.registers().accumulator, 0x22);
    }

    #[test]
    fn indirect_indexed_page_cross() {
        // LDA ($80),Y with ($80) -> $00FF and Y = 1: effective address $0100,
        // 5 base cycles + 1 for the page crossing
        let mut cpu = TestCpu::new(&[0xB1, 0x80]);
        cpu.write(0x0080, 0xFF);
        cpu.write(0x0081, 0x00);
        cpu.write(0x0100, 0x55);

        cpu.registers().y = 0x01;
        assert_eq!(cpu.step(), 6);
        assert_eq!(cpu.registers().accumulator, 0x55);
    }

    #[test]
    fn indexed_indirect_wraps_in_zero_page() {
        // LDA ($FE,X) with X = 3: pointer at $01/$02
        let mut cpu = TestCpu::new(&[0xA1, 0xFE]);
        cpu.write(0x0001, 0x34);
        cpu.write(0x0002, 0x02);
        cpu.write(0x0234, 0x99);

        cpu.registers().x = 0x03;
        assert_eq!(cpu.step(), 6);
        assert_eq!(cpu.registers().accumulator, 0x99);
    }

    #[test]
    fn sta_absolute_x_always_pays_index_cycle() {
        // STA $02F0,X without a page cross still takes 5 cycles
        let mut cpu = TestCpu::new(&[0x9D, 0xF0, 0x02]);
        cpu.registers().accumulator = 0x42;
        cpu.registers().x = 0x01;

        assert_eq!(cpu.step(), 5);
        assert_eq!(cpu.read(0x02F1), 0x42);
    }

    #[test]
    fn adc_carry_and_overflow() {
        let mut cpu = TestCpu::new(&[0x69, 0x01, 0x69, 0x01, 0x69, 0x7F]);

        // 0xFF + 1 = 0x00 with carry, no signed overflow
        cpu.registers().accumulator = 0xFF;
        cpu.step();
        assert_eq!(cpu.registers().accumulator, 0x00);
        assert!(cpu.registers().status.carry);
        assert!(cpu.registers().status.zero);
        assert!(!cpu.registers().status.overflow);

        // 0 + 1 + carry = 2
        cpu.step();
        assert_eq!(cpu.registers().accumulator, 0x02);
        assert!(!cpu.registers().status.carry);

        // 0x02 + 0x7F = 0x81: positive + positive = negative, signed overflow
        cpu.step();
        assert_eq!(cpu.registers().accumulator, 0x81);
        assert!(cpu.registers().status.overflow);
        assert!(cpu.registers().status.negative);
    }

    #[test]
    fn sbc_borrow_semantics() {
        // SBC #$01 with carry set: no borrow
        let mut cpu = TestCpu::new(&[0xE9, 0x01, 0xE9, 0x01]);

        cpu.registers().accumulator = 0x10;
        cpu.registers().status.carry = true;
        cpu.step();
        assert_eq!(cpu.registers().accumulator, 0x0F);
        assert!(cpu.registers().status.carry);

        // 0x00 - 1 borrows
        cpu.registers().accumulator = 0x00;
        cpu.step();
        assert_eq!(cpu.registers().accumulator, 0xFF);
        assert!(!cpu.registers().status.carry);
    }

    #[test]
    fn compare_sets_carry_on_greater_or_equal() {
        let mut cpu = TestCpu::new(&[0xC9, 0x10, 0xC9, 0x20, 0xC9, 0x21]);

        cpu.registers().accumulator = 0x20;
        cpu.step();
        assert!(cpu.registers().status.carry);
        assert!(!cpu.registers().status.zero);

        cpu.step();
        assert!(cpu.registers().status.carry);
        assert!(cpu.registers().status.zero);

        cpu.step();
        assert!(!cpu.registers().status.carry);
        assert!(cpu.registers().status.negative);
    }

    #[test]
    fn bit_test_flags_come_from_memory() {
        let mut cpu = TestCpu::new(&[0x24, 0x10]);
        cpu.write(0x0010, 0xC0);

        cpu.registers().accumulator = 0x01;
        cpu.step();
        assert!(cpu.registers().status.zero);
        assert!(cpu.registers().status.negative);
        assert!(cpu.registers().status.overflow);
    }

    #[test]
    fn asl_accumulator_and_memory() {
        let mut cpu = TestCpu::new(&[0x0A, 0x0E, 0x10, 0x02]);

        cpu.registers().accumulator = 0x81;
        assert_eq!(cpu.step(), 2);
        assert_eq!(cpu.registers().accumulator, 0x02);
        assert!(cpu.registers().status.carry);

        cpu.write(0x0210, 0x40);
        assert_eq!(cpu.step(), 6);
        assert_eq!(cpu.read(0x0210), 0x80);
        assert!(!cpu.registers().status.carry);
        assert!(cpu.registers().status.negative);
    }

    #[test]
    fn rotate_through_carry() {
        let mut cpu = TestCpu::new(&[0x2A, 0x6A]);

        cpu.registers().accumulator = 0x80;
        cpu.registers().status.carry = false;
        cpu.step();
        assert_eq!(cpu.registers().accumulator, 0x00);
        assert!(cpu.registers().status.carry);
        assert!(cpu.registers().status.zero);

        cpu.registers().accumulator = 0x01;
        cpu.step();
        assert_eq!(cpu.registers().accumulator, 0x80);
        assert!(cpu.registers().status.carry);
    }

    #[test]
    fn jmp_indirect_page_boundary_bug() {
        // JMP ($02FF): low byte from $02FF, high byte from $0200
        let mut cpu = TestCpu::new(&[0x6C, 0xFF, 0x02]);
        cpu.write(0x02FF, 0x34);
        cpu.write(0x0300, 0x99);
        cpu.write(0x0200, 0x12);

        assert_eq!(cpu.step(), 5);
        assert_eq!(cpu.registers().pc, 0x1234);
    }

    #[test]
    fn branch_cycle_accounting() {
        // BNE forward (taken, same page), BNE (not taken), BEQ across a page
        let mut cpu = TestCpu::new(&[0xD0, 0x02]);

        cpu.registers().status.zero = false;
        assert_eq!(cpu.step(), 3);
        assert_eq!(cpu.registers().pc, 0x0204);

        cpu.write(0x0204, 0xD0);
        cpu.write(0x0205, 0x10);
        cpu.registers().status.zero = true;
        assert_eq!(cpu.step(), 2);
        assert_eq!(cpu.registers().pc, 0x0206);

        // Branch from near the top of the page across the boundary
        cpu.write(0x02F0, 0xF0);
        cpu.write(0x02F1, 0x20);
        cpu.registers().pc = 0x02F0;
        assert_eq!(cpu.step(), 4);
        assert_eq!(cpu.registers().pc, 0x0312);
    }

    #[test]
    fn jsr_rts_round_trip() {
        let mut cpu = TestCpu::new(&[0x20, 0x00, 0x03]);
        cpu.write(0x0300, 0x60);

        assert_eq!(cpu.step(), 6);
        assert_eq!(cpu.registers().pc, 0x0300);

        assert_eq!(cpu.step(), 6);
        assert_eq!(cpu.registers().pc, 0x0203);
    }

    #[test]
    fn brk_and_rti() {
        let mut cpu = TestCpu::new(&[0x00, 0xFF]);
        // IRQ/BRK vector -> $0300, where an RTI awaits
        // (the vector lives in cartridge space, unwritable on NROM, so point
        // the PC there manually after checking the push)
        let sp_before = cpu.registers().sp;

        assert_eq!(cpu.step(), 7);
        assert!(cpu.registers().status.interrupt_disable);

        // BRK pushed PC+1 (skipping the signature byte) and status with B set
        let sp = cpu.registers().sp;
        assert_eq!(sp, sp_before.wrapping_sub(3));
        let status = cpu.read(0x0100 | u16::from(sp.wrapping_add(1)));
        assert_eq!(status & 0x30, 0x30);
        let pc_lsb = cpu.read(0x0100 | u16::from(sp.wrapping_add(2)));
        let pc_msb = cpu.read(0x0100 | u16::from(sp.wrapping_add(3)));
        assert_eq!(u16::from_le_bytes([pc_lsb, pc_msb]), 0x0202);

        // RTI restores the pushed state
        cpu.write(0x0300, 0x40);
        cpu.registers().pc = 0x0300;
        assert_eq!(cpu.step(), 6);
        assert_eq!(cpu.registers().pc, 0x0202);
    }

    #[test]
    fn php_pushes_b_and_u_set() {
        let mut cpu = TestCpu::new(&[0x08, 0x28]);

        cpu.registers().status.carry = true;
        cpu.step();
        let sp = cpu.registers().sp;
        let pushed = cpu.read(0x0100 | u16::from(sp.wrapping_add(1)));
        assert_eq!(pushed & 0x30, 0x30);
        assert_eq!(pushed & 0x01, 0x01);

        // PLP restores flags from the stack
        cpu.registers().status.carry = false;
        cpu.step();
        assert!(cpu.registers().status.carry);
    }

    #[test]
    fn stack_pointer_wraps() {
        let mut cpu = TestCpu::new(&[0x48, 0x48]);

        cpu.registers().sp = 0x00;
        cpu.registers().accumulator = 0xAA;
        cpu.step();
        assert_eq!(cpu.registers().sp, 0xFF);
        assert_eq!(cpu.read(0x0100), 0xAA);

        cpu.registers().accumulator = 0xBB;
        cpu.step();
        assert_eq!(cpu.registers().sp, 0xFE);
        assert_eq!(cpu.read(0x01FF), 0xBB);
    }

    #[test]
    fn lax_loads_both_registers() {
        let mut cpu = TestCpu::new(&[0xA7, 0x42]);
        cpu.write(0x0042, 0x8F);

        assert_eq!(cpu.step(), 3);
        assert_eq!(cpu.registers().accumulator, 0x8F);
        assert_eq!(cpu.registers().x, 0x8F);
        assert!(cpu.registers().status.negative);
    }

    #[test]
    fn sax_stores_a_and_x() {
        let mut cpu = TestCpu::new(&[0x87, 0x42]);

        cpu.registers().accumulator = 0xF0;
        cpu.registers().x = 0x3C;
        assert_eq!(cpu.step(), 3);
        assert_eq!(cpu.read(0x0042), 0x30);
    }

    #[test]
    fn dcp_decrements_then_compares() {
        let mut cpu = TestCpu::new(&[0xC7, 0x42]);
        cpu.write(0x0042, 0x11);

        cpu.registers().accumulator = 0x10;
        assert_eq!(cpu.step(), 5);
        assert_eq!(cpu.read(0x0042), 0x10);
        assert!(cpu.registers().status.zero);
        assert!(cpu.registers().status.carry);
    }

    #[test]
    fn isb_increments_then_subtracts() {
        let mut cpu = TestCpu::new(&[0xE7, 0x42]);
        cpu.write(0x0042, 0x0F);

        cpu.registers().accumulator = 0x20;
        cpu.registers().status.carry = true;
        assert_eq!(cpu.step(), 5);
        assert_eq!(cpu.read(0x0042), 0x10);
        assert_eq!(cpu.registers().accumulator, 0x10);
    }

    #[test]
    fn slo_shifts_and_ors() {
        let mut cpu = TestCpu::new(&[0x07, 0x42]);
        cpu.write(0x0042, 0x81);

        cpu.registers().accumulator = 0x01;
        assert_eq!(cpu.step(), 5);
        assert_eq!(cpu.read(0x0042), 0x02);
        assert_eq!(cpu.registers().accumulator, 0x03);
        assert!(cpu.registers().status.carry);
    }

    #[test]
    fn rra_rotates_then_adds() {
        let mut cpu = TestCpu::new(&[0x67, 0x42]);
        cpu.write(0x0042, 0x03);

        cpu.registers().accumulator = 0x10;
        cpu.registers().status.carry = false;
        assert_eq!(cpu.step(), 5);
        // 0x03 ror -> 0x01 with carry out; 0x10 + 0x01 + 1 = 0x12
        assert_eq!(cpu.read(0x0042), 0x01);
        assert_eq!(cpu.registers().accumulator, 0x12);
    }

    #[test]
    fn unknown_opcode_is_a_two_cycle_nop_by_default() {
        // 0x02 is a KIL opcode, outside the implemented set
        let mut cpu = TestCpu::new(&[0x02, 0xEA]);

        assert_eq!(cpu.step(), 2);
        assert_eq!(cpu.registers().pc, 0x0201);
    }

    #[test]
    fn unknown_opcode_errors_in_strict_mode() {
        let mut cpu = TestCpu::new(&[0x02]);
        cpu.state.strict_opcodes = true;

        let result = execute(&mut cpu.state, &mut cpu.bus.cpu());
        assert_eq!(result, Err(CpuError::UnknownOpcode { opcode: 0x02, pc: 0x0200 }));
    }

    #[test]
    fn undocumented_nop_reads_have_correct_widths() {
        // NOP zp, NOP abs, NOP #imm all advance the PC past their operands
        let mut cpu = TestCpu::new(&[0x04, 0x10, 0x0C, 0x00, 0x03, 0x80, 0x7F]);

        assert_eq!(cpu.step(), 3);
        assert_eq!(cpu.registers().pc, 0x0202);
        assert_eq!(cpu.step(), 4);
        assert_eq!(cpu.registers().pc, 0x0205);
        assert_eq!(cpu.step(), 2);
        assert_eq!(cpu.registers().pc, 0x0207);
    }
}
