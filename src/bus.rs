//! The CPU and PPU address spaces, memory-mapped registers, interrupt lines,
//! and the OAM DMA engine.
//!
//! CPU address mapping:
//! * $0000-$07FF: 2KB internal RAM
//! * $0800-$1FFF: mirrors of internal RAM
//! * $2000-$2007: memory-mapped PPU registers
//! * $2008-$3FFF: mirrors of the PPU registers
//! * $4000-$4017: APU and I/O registers
//! * $4018-$401F: disabled test-mode registers
//! * $4020-$FFFF: cartridge board
//!
//! PPU address mapping (14-bit):
//! * $0000-$1FFF: pattern tables, routed through the cartridge (CHR ROM/RAM)
//! * $2000-$3EFF: nametables, mirroring controlled by the cartridge
//! * $3F00-$3FFF: 32 bytes of palette RAM, mirrored
//!
//! The `Bus` owns all of this state; the CPU, PPU, and APU borrow it for the
//! duration of a tick through the `CpuBus` / `PpuBus` views.

pub mod cartridge;

use crate::bus::cartridge::Mapper;
use crate::input::JoypadState;
use crate::num::GetBit;
use bincode::de::{BorrowDecoder, Decoder};
use bincode::enc::Encoder;
use bincode::error::{DecodeError, EncodeError};
use bincode::{BorrowDecode, Decode, Encode};
use tinyvec::ArrayVec;

pub const CPU_RAM_START: u16 = 0x0000;
pub const CPU_RAM_END: u16 = 0x1FFF;
pub const CPU_RAM_MASK: u16 = 0x07FF;

pub const CPU_PPU_REGISTERS_START: u16 = 0x2000;
pub const CPU_PPU_REGISTERS_END: u16 = 0x3FFF;
pub const CPU_PPU_REGISTERS_MASK: u16 = 0x0007;

pub const CPU_IO_REGISTERS_START: u16 = 0x4000;
pub const CPU_IO_REGISTERS_END: u16 = 0x4017;

pub const CPU_IO_TEST_MODE_START: u16 = 0x4018;
pub const CPU_IO_TEST_MODE_END: u16 = 0x401F;

pub const CPU_CARTRIDGE_START: u16 = 0x4020;
pub const CPU_CARTRIDGE_END: u16 = 0xFFFF;

pub const PALETTE_RAM_MASK: u16 = 0x001F;

const OAMDMA_ADDRESS: u16 = 0x4014;
const JOY1_ADDRESS: u16 = 0x4016;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum PpuWriteToggle {
    First,
    Second,
}

impl PpuWriteToggle {
    fn toggle(self) -> Self {
        match self {
            Self::First => Self::Second,
            Self::Second => Self::First,
        }
    }
}

/// CPU-visible PPU register state: the CTRL/MASK/STATUS shadows, the OAM
/// address, the PPUDATA read buffer, and the loopy v/t/x scrolling registers
/// with their shared write toggle.
#[derive(Debug, Clone, Encode, Decode)]
pub struct PpuRegisters {
    ppu_ctrl: u8,
    ppu_mask: u8,
    ppu_status: u8,
    oam_addr: u8,
    ppu_data_buffer: u8,
    write_toggle: PpuWriteToggle,
    // Loopy registers: 15-bit current (v) and temporary (t) VRAM addresses,
    // each decoding as coarse_x:5 | coarse_y:5 | nametable:2 | fine_y:3,
    // plus the 3-bit fine X scroll
    pub(crate) vram_address: u16,
    pub(crate) temp_vram_address: u16,
    pub(crate) fine_x_scroll: u8,
}

impl PpuRegisters {
    fn new() -> Self {
        Self {
            ppu_ctrl: 0,
            ppu_mask: 0,
            ppu_status: 0,
            oam_addr: 0,
            ppu_data_buffer: 0,
            write_toggle: PpuWriteToggle::First,
            vram_address: 0,
            temp_vram_address: 0,
            fine_x_scroll: 0,
        }
    }

    pub fn nmi_enabled(&self) -> bool {
        self.ppu_ctrl.bit(7)
    }

    pub fn double_height_sprites(&self) -> bool {
        self.ppu_ctrl.bit(5)
    }

    pub fn sprite_height(&self) -> u8 {
        if self.double_height_sprites() { 16 } else { 8 }
    }

    pub fn bg_pattern_table_address(&self) -> u16 {
        if self.ppu_ctrl.bit(4) { 0x1000 } else { 0x0000 }
    }

    pub fn sprite_pattern_table_address(&self) -> u16 {
        if self.ppu_ctrl.bit(3) { 0x1000 } else { 0x0000 }
    }

    pub fn ppu_data_addr_increment(&self) -> u16 {
        if self.ppu_ctrl.bit(2) { 32 } else { 1 }
    }

    pub fn emphasize_blue(&self) -> bool {
        self.ppu_mask.bit(7)
    }

    pub fn emphasize_green(&self) -> bool {
        self.ppu_mask.bit(6)
    }

    pub fn emphasize_red(&self) -> bool {
        self.ppu_mask.bit(5)
    }

    pub fn sprites_enabled(&self) -> bool {
        self.ppu_mask.bit(4)
    }

    pub fn bg_enabled(&self) -> bool {
        self.ppu_mask.bit(3)
    }

    pub fn left_edge_sprites_enabled(&self) -> bool {
        self.ppu_mask.bit(2)
    }

    pub fn left_edge_bg_enabled(&self) -> bool {
        self.ppu_mask.bit(1)
    }

    pub fn greyscale(&self) -> bool {
        self.ppu_mask.bit(0)
    }

    pub fn rendering_enabled(&self) -> bool {
        self.bg_enabled() || self.sprites_enabled()
    }

    pub fn vblank_flag(&self) -> bool {
        self.ppu_status.bit(7)
    }

    pub fn set_vblank_flag(&mut self, vblank: bool) {
        if vblank {
            self.ppu_status |= 1 << 7;
        } else {
            self.ppu_status &= !(1 << 7);
        }
    }

    pub fn set_sprite_zero_hit(&mut self, sprite_zero_hit: bool) {
        if sprite_zero_hit {
            self.ppu_status |= 1 << 6;
        } else {
            self.ppu_status &= !(1 << 6);
        }
    }

    pub fn sprite_zero_hit(&self) -> bool {
        self.ppu_status.bit(6)
    }

    pub fn set_sprite_overflow(&mut self, sprite_overflow: bool) {
        if sprite_overflow {
            self.ppu_status |= 1 << 5;
        } else {
            self.ppu_status &= !(1 << 5);
        }
    }

    /// Level of the PPU's NMI output line.
    fn nmi_line_level(&self) -> bool {
        self.nmi_enabled() && self.vblank_flag()
    }
}

#[allow(clippy::upper_case_acronyms)]
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum ApuRegister {
    SQ1_VOL,
    SQ1_SWEEP,
    SQ1_LO,
    SQ1_HI,
    SQ2_VOL,
    SQ2_SWEEP,
    SQ2_LO,
    SQ2_HI,
    TRI_LINEAR,
    TRI_LO,
    TRI_HI,
    NOISE_VOL,
    NOISE_LO,
    NOISE_HI,
    DMC_FREQ,
    DMC_RAW,
    DMC_START,
    DMC_LEN,
    SND_CHN,
    FRAME_COUNTER,
}

// Needed for ArrayVec
impl Default for ApuRegister {
    fn default() -> Self {
        Self::SQ1_VOL
    }
}

impl ApuRegister {
    fn from_relative_address(relative_addr: u16) -> Option<Self> {
        match relative_addr {
            0x00 => Some(Self::SQ1_VOL),
            0x01 => Some(Self::SQ1_SWEEP),
            0x02 => Some(Self::SQ1_LO),
            0x03 => Some(Self::SQ1_HI),
            0x04 => Some(Self::SQ2_VOL),
            0x05 => Some(Self::SQ2_SWEEP),
            0x06 => Some(Self::SQ2_LO),
            0x07 => Some(Self::SQ2_HI),
            0x08 => Some(Self::TRI_LINEAR),
            0x0A => Some(Self::TRI_LO),
            0x0B => Some(Self::TRI_HI),
            0x0C => Some(Self::NOISE_VOL),
            0x0E => Some(Self::NOISE_LO),
            0x0F => Some(Self::NOISE_HI),
            0x10 => Some(Self::DMC_FREQ),
            0x11 => Some(Self::DMC_RAW),
            0x12 => Some(Self::DMC_START),
            0x13 => Some(Self::DMC_LEN),
            0x15 => Some(Self::SND_CHN),
            0x17 => Some(Self::FRAME_COUNTER),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct ApuRegisterWrite {
    pub register: ApuRegister,
    pub value: u8,
}

/// APU/controller register file at $4000-$4017. APU register writes are queued
/// here and drained by the APU on its next cycle; the APU pushes its status
/// byte back so that $4015 reads see live channel state.
#[derive(Debug, Clone)]
pub struct IoRegisters {
    dirty_writes: ArrayVec<[ApuRegisterWrite; 8]>,
    apu_status: u8,
    snd_chn_read: bool,
    joypad_state: [JoypadState; 2],
    strobe: bool,
    shift_registers: [u8; 2],
}

// JOY1/JOY2 reads leave the highest 3 bits at the open-bus value of the $40xx
// page
const IO_OPEN_BUS_BITS: u8 = 0x40;

impl IoRegisters {
    fn new() -> Self {
        Self {
            dirty_writes: ArrayVec::new(),
            apu_status: 0,
            snd_chn_read: false,
            joypad_state: [JoypadState::default(); 2],
            strobe: false,
            shift_registers: [0; 2],
        }
    }

    fn read_address(&mut self, address: u16) -> u8 {
        match address {
            0x4015 => {
                self.snd_chn_read = true;
                self.apu_status
            }
            0x4016 => self.read_controller(0),
            0x4017 => self.read_controller(1),
            _ => cpu_open_bus(address),
        }
    }

    fn read_controller(&mut self, index: usize) -> u8 {
        if self.strobe {
            // While strobe is high the shift register is continuously
            // reloaded, so reads always report the A button
            return IO_OPEN_BUS_BITS | (self.joypad_state[index].to_register_byte() & 0x01);
        }

        let bit = self.shift_registers[index] & 0x01;
        // 1s shift in from the top once all 8 buttons have been read
        self.shift_registers[index] = 0x80 | (self.shift_registers[index] >> 1);
        IO_OPEN_BUS_BITS | bit
    }

    fn write_address(&mut self, address: u16, value: u8) {
        if address == JOY1_ADDRESS {
            if value.bit(0) {
                self.strobe = true;
                self.latch_controllers();
            } else {
                if self.strobe {
                    self.latch_controllers();
                }
                self.strobe = false;
            }
            return;
        }

        let relative_addr = address - CPU_IO_REGISTERS_START;
        let Some(register) = ApuRegister::from_relative_address(relative_addr) else {
            return;
        };

        if self.dirty_writes.len() == self.dirty_writes.capacity() {
            // The queue is drained every CPU cycle; a single instruction can
            // never produce this many I/O writes
            log::warn!("APU register write queue overflow; dropping write to {register:?}");
            return;
        }
        self.dirty_writes.push(ApuRegisterWrite { register, value });
    }

    fn latch_controllers(&mut self) {
        self.shift_registers =
            [self.joypad_state[0].to_register_byte(), self.joypad_state[1].to_register_byte()];
    }

    pub fn drain_dirty_writes(&mut self) -> ArrayVec<[ApuRegisterWrite; 8]> {
        std::mem::take(&mut self.dirty_writes)
    }

    pub fn set_apu_status(&mut self, apu_status: u8) {
        self.apu_status = apu_status;
    }

    pub fn get_and_clear_snd_chn_read(&mut self) -> bool {
        let snd_chn_read = self.snd_chn_read;
        self.snd_chn_read = false;
        snd_chn_read
    }
}

// Encode/Decode by hand: tinyvec's ArrayVec has no bincode impls, so the dirty
// queue round-trips through a Vec.
impl Encode for IoRegisters {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        let dirty_writes: Vec<ApuRegisterWrite> = self.dirty_writes.iter().copied().collect();
        dirty_writes.encode(encoder)?;
        self.apu_status.encode(encoder)?;
        self.snd_chn_read.encode(encoder)?;
        self.joypad_state.encode(encoder)?;
        self.strobe.encode(encoder)?;
        self.shift_registers.encode(encoder)?;

        Ok(())
    }
}

fn io_registers_from_parts(
    dirty_writes: Vec<ApuRegisterWrite>,
    apu_status: u8,
    snd_chn_read: bool,
    joypad_state: [JoypadState; 2],
    strobe: bool,
    shift_registers: [u8; 2],
) -> IoRegisters {
    IoRegisters {
        dirty_writes: dirty_writes.into_iter().collect(),
        apu_status,
        snd_chn_read,
        joypad_state,
        strobe,
        shift_registers,
    }
}

impl<Context> Decode<Context> for IoRegisters {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        Ok(io_registers_from_parts(
            Decode::decode(decoder)?,
            Decode::decode(decoder)?,
            Decode::decode(decoder)?,
            Decode::decode(decoder)?,
            Decode::decode(decoder)?,
            Decode::decode(decoder)?,
        ))
    }
}

impl<'de, Context> BorrowDecode<'de, Context> for IoRegisters {
    fn borrow_decode<D: BorrowDecoder<'de, Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, DecodeError> {
        Ok(io_registers_from_parts(
            BorrowDecode::borrow_decode(decoder)?,
            BorrowDecode::borrow_decode(decoder)?,
            BorrowDecode::borrow_decode(decoder)?,
            BorrowDecode::borrow_decode(decoder)?,
            BorrowDecode::borrow_decode(decoder)?,
            BorrowDecode::borrow_decode(decoder)?,
        ))
    }
}

/// Sources that can pull the CPU's IRQ line low. Each source owns one bit of
/// the pulldown mask; the CPU sees the OR of all bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum IrqSource {
    ApuDmc,
    ApuFrameCounter,
    Mapper,
}

impl IrqSource {
    fn to_low_pull_bit(self) -> u8 {
        match self {
            Self::ApuDmc => 0x01,
            Self::ApuFrameCounter => 0x02,
            Self::Mapper => 0x04,
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct InterruptLines {
    nmi_line: bool,
    nmi_triggered: bool,
    irq_low_pulls: u8,
}

impl InterruptLines {
    fn new() -> Self {
        Self { nmi_line: false, nmi_triggered: false, irq_low_pulls: 0 }
    }

    /// Sample the PPU's NMI output; a false-to-true transition latches the
    /// CPU's pending-NMI flag.
    fn tick(&mut self, nmi_line: bool) {
        if nmi_line && !self.nmi_line {
            self.nmi_triggered = true;
        }
        self.nmi_line = nmi_line;
    }

    pub fn nmi_triggered(&self) -> bool {
        self.nmi_triggered
    }

    pub fn clear_nmi_triggered(&mut self) {
        self.nmi_triggered = false;
    }

    pub fn irq_triggered(&self) -> bool {
        self.irq_low_pulls != 0
    }

    pub fn set_irq_low_pull(&mut self, source: IrqSource, value: bool) {
        if value {
            self.irq_low_pulls |= source.to_low_pull_bit();
        } else {
            self.irq_low_pulls &= !source.to_low_pull_bit();
        }
    }
}

/// Sprite OAM DMA engine. While active it occupies the CPU's master-clock
/// slot: a dummy phase that waits for an odd CPU cycle, then alternating
/// read/write cycles copying 256 bytes from `page << 8` into OAM.
#[derive(Debug, Clone, Encode, Decode)]
struct OamDma {
    page: u8,
    offset: u8,
    data: u8,
    active: bool,
    dummy: bool,
}

impl OamDma {
    fn new() -> Self {
        Self { page: 0, offset: 0, data: 0, active: false, dummy: true }
    }

    fn start(&mut self, page: u8) {
        self.page = page;
        self.offset = 0;
        self.active = true;
        self.dummy = true;
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Bus {
    mapper: Mapper,
    cpu_internal_ram: [u8; 2048],
    ppu_registers: PpuRegisters,
    io_registers: IoRegisters,
    ppu_vram: [u8; 4096],
    ppu_palette_ram: [u8; 32],
    ppu_oam: [u8; 256],
    interrupt_lines: InterruptLines,
    oam_dma: OamDma,
    dmc_stall_cycles: u32,
    cpu_cycle_count: u64,
}

impl Bus {
    pub(crate) fn from_cartridge(mapper: Mapper) -> Self {
        Self {
            mapper,
            // Deterministic startup state; real hardware powers on with
            // unpredictable RAM contents
            cpu_internal_ram: [0; 2048],
            ppu_registers: PpuRegisters::new(),
            io_registers: IoRegisters::new(),
            ppu_vram: [0; 4096],
            ppu_palette_ram: [0; 32],
            ppu_oam: [0; 256],
            interrupt_lines: InterruptLines::new(),
            oam_dma: OamDma::new(),
            dmc_stall_cycles: 0,
            cpu_cycle_count: 0,
        }
    }

    pub fn cpu(&mut self) -> CpuBus<'_> {
        CpuBus(self)
    }

    pub fn ppu(&mut self) -> PpuBus<'_> {
        PpuBus(self)
    }

    pub fn set_joypad_state(&mut self, index: usize, joypad_state: JoypadState) {
        self.io_registers.joypad_state[index] = joypad_state;
    }

    pub fn joypad_state(&self, index: usize) -> JoypadState {
        self.io_registers.joypad_state[index]
    }

    /// Sample the interrupt lines; called once per master-clock tick, after
    /// the PPU dot.
    pub fn tick(&mut self) {
        self.interrupt_lines.set_irq_low_pull(IrqSource::Mapper, self.mapper.interrupt_flag());
        self.interrupt_lines.tick(self.ppu_registers.nmi_line_level());
    }

    /// Per-CPU-cycle bus work; called once per CPU cycle slot, whether the
    /// slot went to the CPU or to DMA.
    pub fn tick_cpu(&mut self) {
        self.cpu_cycle_count += 1;
        self.mapper.tick_cpu();
    }

    pub fn oam_dma_active(&self) -> bool {
        self.oam_dma.active
    }

    /// Run one DMA sub-step in place of a CPU cycle.
    pub fn oam_dma_step(&mut self) {
        if self.oam_dma.dummy {
            if self.cpu_cycle_count & 1 == 1 {
                self.oam_dma.dummy = false;
            }
        } else if self.cpu_cycle_count & 1 == 0 {
            let address = (u16::from(self.oam_dma.page) << 8) | u16::from(self.oam_dma.offset);
            self.oam_dma.data = self.cpu().read_address(address);
        } else {
            let oam_addr = self.ppu_registers.oam_addr;
            self.ppu_oam[oam_addr as usize] = self.oam_dma.data;
            self.ppu_registers.oam_addr = oam_addr.wrapping_add(1);

            self.oam_dma.offset = self.oam_dma.offset.wrapping_add(1);
            if self.oam_dma.offset == 0 {
                self.oam_dma.active = false;
                self.oam_dma.dummy = true;
            }
        }
    }

    pub(crate) fn move_rom_from(&mut self, other: &mut Self) {
        self.mapper.move_rom_from(&mut other.mapper);
    }

    fn ppu_read_address(&mut self, address: u16) -> u8 {
        // The PPU bus only has 14-bit addressing
        let address = address & 0x3FFF;

        match address {
            0x0000..=0x3EFF => self.mapper.read_ppu_address(address, &self.ppu_vram),
            0x3F00..=0x3FFF => self.ppu_palette_ram[map_palette_address(address)],
            0x4000..=0xFFFF => unreachable!("address is <= 0x3FFF after masking"),
        }
    }

    fn ppu_write_address(&mut self, address: u16, value: u8) {
        let address = address & 0x3FFF;

        match address {
            0x0000..=0x3EFF => self.mapper.write_ppu_address(address, value, &mut self.ppu_vram),
            0x3F00..=0x3FFF => {
                self.ppu_palette_ram[map_palette_address(address)] = value;
            }
            0x4000..=0xFFFF => unreachable!("address is <= 0x3FFF after masking"),
        }
    }
}

/// A view of the bus exposing the operations the CPU and APU may perform.
pub struct CpuBus<'a>(&'a mut Bus);

impl CpuBus<'_> {
    pub fn read_address(&mut self, address: u16) -> u8 {
        match address {
            address @ CPU_RAM_START..=CPU_RAM_END => {
                self.0.cpu_internal_ram[(address & CPU_RAM_MASK) as usize]
            }
            address @ CPU_PPU_REGISTERS_START..=CPU_PPU_REGISTERS_END => {
                let relative_addr = (address - CPU_PPU_REGISTERS_START) & CPU_PPU_REGISTERS_MASK;
                self.read_ppu_register(relative_addr)
            }
            address @ CPU_IO_REGISTERS_START..=CPU_IO_REGISTERS_END => {
                self.0.io_registers.read_address(address)
            }
            address @ CPU_IO_TEST_MODE_START..=CPU_IO_TEST_MODE_END => cpu_open_bus(address),
            address @ CPU_CARTRIDGE_START..=CPU_CARTRIDGE_END => {
                self.0.mapper.read_cpu_address(address)
            }
        }
    }

    pub fn write_address(&mut self, address: u16, value: u8) {
        match address {
            address @ CPU_RAM_START..=CPU_RAM_END => {
                self.0.cpu_internal_ram[(address & CPU_RAM_MASK) as usize] = value;
            }
            address @ CPU_PPU_REGISTERS_START..=CPU_PPU_REGISTERS_END => {
                let relative_addr = (address - CPU_PPU_REGISTERS_START) & CPU_PPU_REGISTERS_MASK;
                self.write_ppu_register(relative_addr, value);
            }
            OAMDMA_ADDRESS => {
                self.0.oam_dma.start(value);
            }
            address @ CPU_IO_REGISTERS_START..=CPU_IO_REGISTERS_END => {
                self.0.io_registers.write_address(address, value);
            }
            CPU_IO_TEST_MODE_START..=CPU_IO_TEST_MODE_END => {}
            address @ CPU_CARTRIDGE_START..=CPU_CARTRIDGE_END => {
                self.0.mapper.write_cpu_address(address, value);
            }
        }
    }

    fn read_ppu_register(&mut self, relative_addr: u16) -> u8 {
        let registers = &mut self.0.ppu_registers;
        match relative_addr {
            // PPUCTRL / PPUMASK / OAMADDR / PPUSCROLL / PPUADDR are write-only
            0x00 | 0x01 | 0x03 | 0x05 | 0x06 => 0,
            0x02 => {
                // Reading PPUSTATUS clears the vblank flag and resets the
                // scroll/address write toggle; stale data-buffer bits fill the
                // unused low bits
                let value = (registers.ppu_status & 0xE0) | (registers.ppu_data_buffer & 0x1F);
                registers.set_vblank_flag(false);
                registers.write_toggle = PpuWriteToggle::First;
                value
            }
            0x04 => self.0.ppu_oam[registers.oam_addr as usize],
            0x07 => {
                let address = registers.vram_address & 0x3FFF;
                let increment = registers.ppu_data_addr_increment();
                registers.vram_address = registers.vram_address.wrapping_add(increment);

                if address >= 0x3F00 {
                    // Palette reads bypass the buffer; the buffer refills with
                    // the nametable byte underneath the palette
                    let value = self.0.ppu_palette_ram[map_palette_address(address)];
                    self.0.ppu_registers.ppu_data_buffer = self.0.ppu_read_address(address - 0x1000);
                    value
                } else {
                    let value = self.0.ppu_registers.ppu_data_buffer;
                    self.0.ppu_registers.ppu_data_buffer = self.0.ppu_read_address(address);
                    value
                }
            }
            _ => panic!("invalid PPU register address: {relative_addr}"),
        }
    }

    fn write_ppu_register(&mut self, relative_addr: u16, value: u8) {
        let registers = &mut self.0.ppu_registers;
        match relative_addr {
            0x00 => {
                registers.ppu_ctrl = value;
                // Base nametable bits go into loopy t
                registers.temp_vram_address =
                    (registers.temp_vram_address & 0xF3FF) | (u16::from(value & 0x03) << 10);
            }
            0x01 => {
                registers.ppu_mask = value;
            }
            0x02 => {}
            0x03 => {
                registers.oam_addr = value;
            }
            0x04 => {
                self.0.ppu_oam[registers.oam_addr as usize] = value;
                registers.oam_addr = registers.oam_addr.wrapping_add(1);
            }
            0x05 => {
                match registers.write_toggle {
                    PpuWriteToggle::First => {
                        // Coarse X and fine X
                        registers.temp_vram_address =
                            (registers.temp_vram_address & 0xFFE0) | u16::from(value >> 3);
                        registers.fine_x_scroll = value & 0x07;
                    }
                    PpuWriteToggle::Second => {
                        // Coarse Y and fine Y
                        registers.temp_vram_address = (registers.temp_vram_address & 0x0C1F)
                            | (u16::from(value & 0x07) << 12)
                            | (u16::from(value & 0xF8) << 2);
                    }
                }
                registers.write_toggle = registers.write_toggle.toggle();
            }
            0x06 => {
                match registers.write_toggle {
                    PpuWriteToggle::First => {
                        // High byte, with the top two bits masked off
                        registers.temp_vram_address = (registers.temp_vram_address & 0x00FF)
                            | (u16::from(value & 0x3F) << 8);
                    }
                    PpuWriteToggle::Second => {
                        registers.temp_vram_address =
                            (registers.temp_vram_address & 0xFF00) | u16::from(value);
                        registers.vram_address = registers.temp_vram_address;
                    }
                }
                registers.write_toggle = registers.write_toggle.toggle();
            }
            0x07 => {
                let address = registers.vram_address & 0x3FFF;
                let increment = registers.ppu_data_addr_increment();
                registers.vram_address = registers.vram_address.wrapping_add(increment);

                self.0.ppu_write_address(address, value);
            }
            _ => panic!("invalid PPU register address: {relative_addr}"),
        }
    }

    pub fn nmi_triggered(&self) -> bool {
        self.0.interrupt_lines.nmi_triggered()
    }

    pub fn acknowledge_nmi(&mut self) {
        self.0.interrupt_lines.clear_nmi_triggered();
    }

    pub fn irq_triggered(&self) -> bool {
        self.0.interrupt_lines.irq_triggered()
    }

    pub fn interrupt_lines(&mut self) -> &mut InterruptLines {
        &mut self.0.interrupt_lines
    }

    pub fn io_registers_mut(&mut self) -> &mut IoRegisters {
        &mut self.0.io_registers
    }

    /// Post a DMC DMA stall; the CPU consumes it at its next cycle.
    pub fn add_dmc_stall(&mut self, cycles: u32) {
        self.0.dmc_stall_cycles += cycles;
    }

    pub fn take_dmc_stall(&mut self) -> u32 {
        std::mem::take(&mut self.0.dmc_stall_cycles)
    }
}

/// A view of the bus exposing the operations the PPU may perform.
pub struct PpuBus<'a>(&'a mut Bus);

impl PpuBus<'_> {
    pub fn read_address(&mut self, address: u16) -> u8 {
        self.0.ppu_read_address(address)
    }

    pub fn write_address(&mut self, address: u16, value: u8) {
        self.0.ppu_write_address(address, value);
    }

    pub fn registers(&self) -> &PpuRegisters {
        &self.0.ppu_registers
    }

    pub fn registers_mut(&mut self) -> &mut PpuRegisters {
        &mut self.0.ppu_registers
    }

    pub fn oam(&self) -> &[u8; 256] {
        &self.0.ppu_oam
    }

    pub fn palette_ram(&self) -> &[u8; 32] {
        &self.0.ppu_palette_ram
    }

    pub fn reset(&mut self) {
        self.0.ppu_registers.ppu_ctrl = 0x00;
        self.0.ppu_registers.ppu_mask = 0x00;
        self.0.ppu_registers.ppu_data_buffer = 0x00;
        self.0.ppu_registers.write_toggle = PpuWriteToggle::First;
        self.0.mapper.reset();
    }
}

fn map_palette_address(address: u16) -> usize {
    let palette_relative_addr = (address & PALETTE_RAM_MASK) as usize;
    if palette_relative_addr >= 0x10 && palette_relative_addr.trailing_zeros() >= 2 {
        // $3F10/$3F14/$3F18/$3F1C mirror $3F00/$3F04/$3F08/$3F0C
        palette_relative_addr - 0x10
    } else {
        palette_relative_addr
    }
}

pub(crate) fn cpu_open_bus(address: u16) -> u8 {
    (address >> 8) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::cartridge::tests::ines_image;
    use crate::bus::cartridge::from_ines_file;
    use crate::input::{Button, JoypadState};

    fn new_test_bus() -> Bus {
        let mapper = from_ines_file(&ines_image(0, 2, 1)).expect("valid image");
        Bus::from_cartridge(mapper)
    }

    #[test]
    fn internal_ram_is_mirrored() {
        let mut bus = new_test_bus();

        bus.cpu().write_address(0x0000, 0x12);
        assert_eq!(bus.cpu().read_address(0x0800), 0x12);
        assert_eq!(bus.cpu().read_address(0x1000), 0x12);
        assert_eq!(bus.cpu().read_address(0x1800), 0x12);

        bus.cpu().write_address(0x1FFF, 0x34);
        assert_eq!(bus.cpu().read_address(0x07FF), 0x34);
    }

    #[test]
    fn ppustatus_read_clears_vblank_and_write_toggle() {
        let mut bus = new_test_bus();

        bus.ppu().registers_mut().set_vblank_flag(true);
        bus.cpu().write_address(0x2005, 0x10);
        assert_eq!(bus.ppu_registers.write_toggle, PpuWriteToggle::Second);

        let status = bus.cpu().read_address(0x2002);
        assert_eq!(status & 0x80, 0x80);
        assert!(!bus.ppu().registers().vblank_flag());
        assert_eq!(bus.ppu_registers.write_toggle, PpuWriteToggle::First);
    }

    #[test]
    fn ppu_registers_are_mirrored_every_8_bytes() {
        let mut bus = new_test_bus();

        bus.ppu().registers_mut().set_vblank_flag(true);
        let status = bus.cpu().read_address(0x3FFA);
        assert_eq!(status & 0x80, 0x80);
    }

    #[test]
    fn loopy_address_write_sequence() {
        let mut bus = new_test_bus();

        bus.cpu().write_address(0x2006, 0x23);
        bus.cpu().write_address(0x2006, 0x45);
        assert_eq!(bus.ppu_registers.vram_address, 0x2345);
    }

    #[test]
    fn ppudata_read_is_buffered() {
        let mut bus = new_test_bus();

        bus.cpu().write_address(0x2006, 0x20);
        bus.cpu().write_address(0x2006, 0x00);
        bus.ppu().write_address(0x2000, 0xAB);
        bus.ppu().write_address(0x2001, 0xCD);

        bus.cpu().write_address(0x2006, 0x20);
        bus.cpu().write_address(0x2006, 0x00);
        // First read returns the stale buffer, subsequent reads lag by one
        let _ = bus.cpu().read_address(0x2007);
        assert_eq!(bus.cpu().read_address(0x2007), 0xAB);
        assert_eq!(bus.cpu().read_address(0x2007), 0xCD);
    }

    #[test]
    fn palette_reads_bypass_the_buffer() {
        let mut bus = new_test_bus();
        bus.ppu_palette_ram[0x01] = 0x2A;

        bus.cpu().write_address(0x2006, 0x3F);
        bus.cpu().write_address(0x2006, 0x01);
        assert_eq!(bus.cpu().read_address(0x2007), 0x2A);
    }

    #[test]
    fn palette_mirroring() {
        let mut bus = new_test_bus();

        bus.ppu().write_address(0x3F10, 0x2B);
        assert_eq!(bus.ppu().read_address(0x3F00), 0x2B);
        bus.ppu().write_address(0x3F04, 0x15);
        assert_eq!(bus.ppu().read_address(0x3F24), 0x15);
    }

    #[test]
    fn controller_shift_order_and_padding() {
        let mut bus = new_test_bus();

        let mut joypad = JoypadState::new();
        joypad.set_button(Button::A, true);
        joypad.set_button(Button::Select, true);
        joypad.set_button(Button::Down, true);
        bus.set_joypad_state(0, joypad);

        // Strobe high then low to latch
        bus.cpu().write_address(0x4016, 0x01);
        bus.cpu().write_address(0x4016, 0x00);

        // Shift order: A, B, Select, Start, Up, Down, Left, Right
        let expected = [1, 0, 1, 0, 0, 1, 0, 0];
        for (i, &bit) in expected.iter().enumerate() {
            let value = bus.cpu().read_address(0x4016);
            assert_eq!(value, 0x40 | bit, "bit {i}");
        }

        // Further reads shift in 1s
        assert_eq!(bus.cpu().read_address(0x4016), 0x41);
        assert_eq!(bus.cpu().read_address(0x4016), 0x41);
    }

    #[test]
    fn reads_while_strobe_high_report_a() {
        let mut bus = new_test_bus();

        let mut joypad = JoypadState::new();
        joypad.set_button(Button::A, true);
        bus.set_joypad_state(0, joypad);

        bus.cpu().write_address(0x4016, 0x01);
        assert_eq!(bus.cpu().read_address(0x4016), 0x41);
        assert_eq!(bus.cpu().read_address(0x4016), 0x41);
    }

    #[test]
    fn oam_dma_copies_a_page_with_correct_stall() {
        let mut bus = new_test_bus();

        for i in 0..=255u16 {
            bus.cpu().write_address(0x0200 + i, i as u8);
        }

        // The $4014 write lands on an even CPU cycle
        for _ in 0..100 {
            bus.tick_cpu();
        }
        bus.cpu().write_address(0x4014, 0x02);
        bus.tick_cpu();
        assert!(bus.oam_dma_active());

        let mut stall_cycles = 0u32;
        while bus.oam_dma_active() {
            bus.oam_dma_step();
            bus.tick_cpu();
            stall_cycles += 1;
        }

        assert_eq!(stall_cycles, 513);
        for i in 0..=255usize {
            assert_eq!(bus.ppu_oam[i], i as u8, "OAM[{i}]");
        }
    }

    #[test]
    fn oam_dma_odd_start_takes_514_cycles() {
        let mut bus = new_test_bus();

        // The $4014 write lands on an odd CPU cycle
        for _ in 0..101 {
            bus.tick_cpu();
        }
        bus.cpu().write_address(0x4014, 0x03);
        bus.tick_cpu();

        let mut stall_cycles = 0u32;
        while bus.oam_dma_active() {
            bus.oam_dma_step();
            bus.tick_cpu();
            stall_cycles += 1;
        }

        assert_eq!(stall_cycles, 514);
    }

    #[test]
    fn test_mode_region_reads_open_bus() {
        let mut bus = new_test_bus();
        assert_eq!(bus.cpu().read_address(0x4018), 0x40);
    }
}
