use crate::bus::cartridge::MapperImpl;
use crate::bus::cartridge::mappers::{
    BankSizeKb, ChrType, CpuMapResult, NametableMirroring, PpuMapResult,
};
use bincode::{Decode, Encode};
use crate::num::GetBit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum PrgBankingMode {
    Switch32Kb,
    Switch16KbFirstBankFixed,
    Switch16KbLastBankFixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum ChrBankingMode {
    Single8KbBank,
    Two4KbBanks,
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Mmc1 {
    chr_type: ChrType,
    shift_register: u8,
    shift_register_len: u8,
    written_this_cycle: bool,
    written_last_cycle: bool,
    nametable_mirroring: NametableMirroring,
    prg_banking_mode: PrgBankingMode,
    chr_banking_mode: ChrBankingMode,
    chr_bank_0: u8,
    chr_bank_1: u8,
    prg_bank: u8,
}

impl Mmc1 {
    pub(crate) fn new(chr_type: ChrType) -> Self {
        Self {
            chr_type,
            shift_register: 0,
            shift_register_len: 0,
            written_this_cycle: false,
            written_last_cycle: false,
            nametable_mirroring: NametableMirroring::SingleScreenLower,
            prg_banking_mode: PrgBankingMode::Switch16KbLastBankFixed,
            chr_banking_mode: ChrBankingMode::Single8KbBank,
            chr_bank_0: 0,
            chr_bank_1: 0,
            prg_bank: 0,
        }
    }

    fn write_control(&mut self, control: u8) {
        self.nametable_mirroring = match control & 0x03 {
            0x00 => NametableMirroring::SingleScreenLower,
            0x01 => NametableMirroring::SingleScreenUpper,
            0x02 => NametableMirroring::Vertical,
            0x03 => NametableMirroring::Horizontal,
            _ => unreachable!("value & 0x03 is always <= 0x03"),
        };

        self.prg_banking_mode = match control & 0x0C {
            0x00 | 0x04 => PrgBankingMode::Switch32Kb,
            0x08 => PrgBankingMode::Switch16KbFirstBankFixed,
            0x0C => PrgBankingMode::Switch16KbLastBankFixed,
            _ => unreachable!("value & 0x0C is always 0x00/0x04/0x08/0x0C"),
        };

        self.chr_banking_mode = if control.bit(4) {
            ChrBankingMode::Two4KbBanks
        } else {
            ChrBankingMode::Single8KbBank
        };
    }
}

impl MapperImpl<Mmc1> {
    fn map_cpu_address(&self, address: u16) -> CpuMapResult {
        match address {
            0x0000..=0x401F => panic!("invalid CPU map address: 0x{address:04X}"),
            0x4020..=0x5FFF => CpuMapResult::None,
            0x6000..=0x7FFF => {
                if !self.cartridge.prg_ram.is_empty() {
                    CpuMapResult::PrgRAM(u32::from(address & 0x1FFF))
                } else {
                    CpuMapResult::None
                }
            }
            0x8000..=0xFFFF => match self.data.prg_banking_mode {
                PrgBankingMode::Switch32Kb => {
                    // The low bank bit is ignored in 32KB mode
                    let bank = self.data.prg_bank >> 1;
                    CpuMapResult::PrgROM(BankSizeKb::ThirtyTwo.to_absolute_address(bank, address))
                }
                PrgBankingMode::Switch16KbFirstBankFixed => match address {
                    0x8000..=0xBFFF => CpuMapResult::PrgROM(u32::from(address) & 0x3FFF),
                    0xC000..=0xFFFF => CpuMapResult::PrgROM(
                        BankSizeKb::Sixteen.to_absolute_address(self.data.prg_bank, address),
                    ),
                    _ => unreachable!("match arm is unreachable"),
                },
                PrgBankingMode::Switch16KbLastBankFixed => match address {
                    0x8000..=0xBFFF => CpuMapResult::PrgROM(
                        BankSizeKb::Sixteen.to_absolute_address(self.data.prg_bank, address),
                    ),
                    0xC000..=0xFFFF => {
                        CpuMapResult::PrgROM(BankSizeKb::Sixteen.to_absolute_address_last_bank(
                            self.cartridge.prg_rom.len() as u32,
                            address,
                        ))
                    }
                    _ => unreachable!("match arm is unreachable"),
                },
            },
        }
    }

    pub(crate) fn read_cpu_address(&self, address: u16) -> u8 {
        self.map_cpu_address(address).read(&self.cartridge)
    }

    pub(crate) fn write_cpu_address(&mut self, address: u16, value: u8) {
        match address {
            0x0000..=0x401F => panic!("invalid CPU map address: 0x{address:04X}"),
            0x4020..=0x5FFF => {}
            0x6000..=0x7FFF => {
                self.map_cpu_address(address).write(value, &mut self.cartridge);
            }
            0x8000..=0xFFFF => {
                self.data.written_this_cycle = true;

                if value.bit(7) {
                    // Reset the serial port and force last-bank-fixed PRG mode
                    // (control |= 0x0C)
                    self.data.shift_register = 0;
                    self.data.shift_register_len = 0;
                    self.data.prg_banking_mode = PrgBankingMode::Switch16KbLastBankFixed;
                    return;
                }

                // Writes on consecutive CPU cycles are ignored (RMW instructions
                // write twice; MMC1 only sees the first)
                if self.data.written_last_cycle {
                    return;
                }

                self.data.shift_register = (self.data.shift_register >> 1) | ((value & 0x01) << 4);
                self.data.shift_register_len += 1;

                if self.data.shift_register_len == 5 {
                    let shift_register = self.data.shift_register;

                    self.data.shift_register = 0;
                    self.data.shift_register_len = 0;

                    // Bits 13-14 of the address select the destination register
                    match address {
                        0x8000..=0x9FFF => self.data.write_control(shift_register),
                        0xA000..=0xBFFF => self.data.chr_bank_0 = shift_register,
                        0xC000..=0xDFFF => self.data.chr_bank_1 = shift_register,
                        0xE000..=0xFFFF => self.data.prg_bank = shift_register & 0x0F,
                        _ => unreachable!("match arm is unreachable"),
                    }
                }
            }
        }
    }

    pub(crate) fn map_ppu_address(&self, address: u16) -> PpuMapResult {
        match address {
            0x0000..=0x1FFF => match self.data.chr_banking_mode {
                ChrBankingMode::Two4KbBanks => {
                    let bank =
                        if address < 0x1000 { self.data.chr_bank_0 } else { self.data.chr_bank_1 };
                    let chr_address = BankSizeKb::Four.to_absolute_address(bank, address);
                    self.data.chr_type.to_map_result(chr_address)
                }
                ChrBankingMode::Single8KbBank => {
                    // The low bank bit is ignored in 8KB mode
                    let bank = self.data.chr_bank_0 >> 1;
                    let chr_address = BankSizeKb::Eight.to_absolute_address(bank, address);
                    self.data.chr_type.to_map_result(chr_address)
                }
            },
            0x2000..=0x3EFF => {
                PpuMapResult::Vram(self.data.nametable_mirroring.map_to_vram(address))
            }
            _ => panic!("invalid PPU map address: 0x{address:04X}"),
        }
    }

    pub(crate) fn mirroring(&self) -> NametableMirroring {
        self.data.nametable_mirroring
    }

    pub(crate) fn tick_cpu(&mut self) {
        self.data.written_last_cycle = self.data.written_this_cycle;
        self.data.written_this_cycle = false;
    }

    pub(crate) fn reset(&mut self) {
        let chr_type = self.data.chr_type;
        self.data = Mmc1::new(chr_type);
    }
}
