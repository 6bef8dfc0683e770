mod mmc1;
mod nrom;

use crate::bus::cartridge::Cartridge;
use bincode::{Decode, Encode};

pub(crate) use mmc1::Mmc1;
pub(crate) use nrom::{Nrom, Uxrom};

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum ChrType {
    ROM,
    RAM,
}

impl ChrType {
    pub(crate) fn to_map_result(self, address: u32) -> PpuMapResult {
        match self {
            Self::ROM => PpuMapResult::ChrROM(address),
            Self::RAM => PpuMapResult::ChrRAM(address),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum NametableMirroring {
    Horizontal,
    Vertical,
    SingleScreenLower,
    SingleScreenUpper,
    FourScreen,
}

impl NametableMirroring {
    /// Map a nametable address ($2000-$3EFF) to an index into the console's
    /// nametable VRAM. Only `FourScreen` addresses the upper 2KB.
    pub(crate) fn map_to_vram(self, address: u16) -> u16 {
        debug_assert!((0x2000..=0x3EFF).contains(&address));

        let relative_addr = address & 0x0FFF;

        match self {
            Self::Horizontal => ((relative_addr & 0x0800) >> 1) | (relative_addr & 0x03FF),
            Self::Vertical => relative_addr & 0x07FF,
            Self::SingleScreenLower => relative_addr & 0x03FF,
            Self::SingleScreenUpper => 0x0400 | (relative_addr & 0x03FF),
            Self::FourScreen => relative_addr,
        }
    }
}

/// Where a CPU address landed after bank translation.
#[derive(Debug, Clone, Copy)]
pub(crate) enum CpuMapResult {
    PrgROM(u32),
    PrgRAM(u32),
    None,
}

impl CpuMapResult {
    pub(crate) fn read(self, cartridge: &Cartridge) -> u8 {
        match self {
            Self::PrgROM(address) => cartridge.get_prg_rom(address),
            Self::PrgRAM(address) => cartridge.get_prg_ram(address),
            Self::None => 0xFF,
        }
    }

    pub(crate) fn write(self, value: u8, cartridge: &mut Cartridge) {
        if let Self::PrgRAM(address) = self {
            cartridge.set_prg_ram(address, value);
        }
    }
}

/// Where a PPU address landed after bank translation.
#[derive(Debug, Clone, Copy)]
pub(crate) enum PpuMapResult {
    ChrROM(u32),
    ChrRAM(u32),
    Vram(u16),
}

impl PpuMapResult {
    pub(crate) fn read(self, cartridge: &Cartridge, vram: &[u8; 4096]) -> u8 {
        match self {
            Self::ChrROM(address) => cartridge.get_chr_rom(address),
            Self::ChrRAM(address) => cartridge.get_chr_ram(address),
            Self::Vram(address) => vram[address as usize],
        }
    }

    pub(crate) fn write(self, value: u8, cartridge: &mut Cartridge, vram: &mut [u8; 4096]) {
        match self {
            Self::ChrROM(_) => {}
            Self::ChrRAM(address) => {
                cartridge.set_chr_ram(address, value);
            }
            Self::Vram(address) => {
                vram[address as usize] = value;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BankSizeKb {
    Four,
    Eight,
    Sixteen,
    ThirtyTwo,
}

impl BankSizeKb {
    fn shift(self) -> u32 {
        match self {
            Self::Four => 12,
            Self::Eight => 13,
            Self::Sixteen => 14,
            Self::ThirtyTwo => 15,
        }
    }

    fn address_mask(self) -> u16 {
        match self {
            Self::Four => 0x0FFF,
            Self::Eight => 0x1FFF,
            Self::Sixteen => 0x3FFF,
            Self::ThirtyTwo => 0x7FFF,
        }
    }

    pub(crate) fn to_absolute_address<B: Into<u32>>(self, bank_number: B, address: u16) -> u32 {
        (bank_number.into() << self.shift()) + u32::from(address & self.address_mask())
    }

    pub(crate) fn to_absolute_address_last_bank(self, memory_len: u32, address: u16) -> u32 {
        let last_bank_address = memory_len.saturating_sub(1 << self.shift());
        last_bank_address + u32::from(address & self.address_mask())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn horizontal_mirroring() {
        // $2000 and $2400 share the first table, $2800 and $2C00 the second
        assert_eq!(NametableMirroring::Horizontal.map_to_vram(0x2000), 0x0000);
        assert_eq!(NametableMirroring::Horizontal.map_to_vram(0x2400), 0x0000);
        assert_eq!(NametableMirroring::Horizontal.map_to_vram(0x2800), 0x0400);
        assert_eq!(NametableMirroring::Horizontal.map_to_vram(0x2C00), 0x0400);
    }

    #[test]
    fn vertical_mirroring() {
        assert_eq!(NametableMirroring::Vertical.map_to_vram(0x2000), 0x0000);
        assert_eq!(NametableMirroring::Vertical.map_to_vram(0x2400), 0x0400);
        assert_eq!(NametableMirroring::Vertical.map_to_vram(0x2800), 0x0000);
        assert_eq!(NametableMirroring::Vertical.map_to_vram(0x2C00), 0x0400);
    }

    #[test]
    fn single_screen_mirroring() {
        assert_eq!(NametableMirroring::SingleScreenLower.map_to_vram(0x2C13), 0x0013);
        assert_eq!(NametableMirroring::SingleScreenUpper.map_to_vram(0x2C13), 0x0413);
    }

    #[test]
    fn four_screen_uses_full_vram() {
        assert_eq!(NametableMirroring::FourScreen.map_to_vram(0x2C00), 0x0C00);
    }

    #[test]
    fn last_bank_addressing() {
        // 128KB PRG ROM, 16KB banks: last bank starts at 0x1C000
        assert_eq!(
            BankSizeKb::Sixteen.to_absolute_address_last_bank(128 * 1024, 0xC000),
            0x1C000
        );
        assert_eq!(
            BankSizeKb::Sixteen.to_absolute_address_last_bank(128 * 1024, 0xFFFF),
            0x1FFFF
        );
    }
}
