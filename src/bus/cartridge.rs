//! Cartridge loading and mapper dispatch.
//!
//! An iNES image is parsed into a `Cartridge` (the backing PRG/CHR/WRAM
//! storage) wrapped by one of the supported mapper types, which own all bank
//! translation logic. The `Mapper` enum is the single polymorphic point in the
//! emulator; everything else is static dispatch.

mod mappers;

use crate::bus::cartridge::mappers::{ChrType, Mmc1, Nrom, Uxrom};
use crate::num::GetBit;
use bincode::de::{BorrowDecoder, Decoder};
use bincode::enc::Encoder;
use bincode::error::{DecodeError, EncodeError};
use bincode::{BorrowDecode, Decode, Encode};
use std::mem;
use thiserror::Error;

pub use mappers::NametableMirroring;

const INES_MAGIC: [u8; 4] = [0x4E, 0x45, 0x53, 0x1A];
const HEADER_LEN: usize = 16;
const TRAINER_LEN: usize = 512;

const PRG_ROM_UNIT: usize = 16 * 1024;
const CHR_ROM_UNIT: usize = 8 * 1024;
const PRG_RAM_LEN: usize = 8 * 1024;
const CHR_RAM_LEN: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub(crate) struct Cartridge {
    pub(crate) prg_rom: Vec<u8>,
    pub(crate) prg_ram: Vec<u8>,
    pub(crate) chr_rom: Vec<u8>,
    pub(crate) chr_ram: Vec<u8>,
}

// Encode/Decode are implemented by hand so that save states never carry ROM
// bytes; ROM is re-attached after load via `move_rom_from`.
impl Encode for Cartridge {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        self.prg_ram.encode(encoder)?;
        self.chr_ram.encode(encoder)?;

        Ok(())
    }
}

impl<Context> Decode<Context> for Cartridge {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let prg_ram = Decode::decode(decoder)?;
        let chr_ram = Decode::decode(decoder)?;

        Ok(Self { prg_rom: vec![], prg_ram, chr_rom: vec![], chr_ram })
    }
}

impl<'de, Context> BorrowDecode<'de, Context> for Cartridge {
    fn borrow_decode<D: BorrowDecoder<'de, Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, DecodeError> {
        let prg_ram = BorrowDecode::borrow_decode(decoder)?;
        let chr_ram = BorrowDecode::borrow_decode(decoder)?;

        Ok(Self { prg_rom: vec![], prg_ram, chr_rom: vec![], chr_ram })
    }
}

impl Cartridge {
    pub(crate) fn get_prg_rom(&self, address: u32) -> u8 {
        self.prg_rom[(address as usize) & (self.prg_rom.len() - 1)]
    }

    pub(crate) fn get_prg_ram(&self, address: u32) -> u8 {
        if self.prg_ram.is_empty() {
            return 0xFF;
        }
        self.prg_ram[(address as usize) & (self.prg_ram.len() - 1)]
    }

    pub(crate) fn set_prg_ram(&mut self, address: u32, value: u8) {
        if self.prg_ram.is_empty() {
            return;
        }
        let prg_ram_len = self.prg_ram.len();
        self.prg_ram[(address as usize) & (prg_ram_len - 1)] = value;
    }

    pub(crate) fn get_chr_rom(&self, address: u32) -> u8 {
        self.chr_rom[(address as usize) & (self.chr_rom.len() - 1)]
    }

    pub(crate) fn get_chr_ram(&self, address: u32) -> u8 {
        self.chr_ram[(address as usize) & (self.chr_ram.len() - 1)]
    }

    pub(crate) fn set_chr_ram(&mut self, address: u32, value: u8) {
        let chr_ram_len = self.chr_ram.len();
        self.chr_ram[(address as usize) & (chr_ram_len - 1)] = value;
    }

    fn move_rom_from(&mut self, other: &mut Self) {
        self.prg_rom = mem::take(&mut other.prg_rom);
        self.chr_rom = mem::take(&mut other.chr_rom);
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct MapperImpl<MapperData> {
    pub(crate) cartridge: Cartridge,
    pub(crate) data: MapperData,
}

macro_rules! match_each_variant {
    ($mapper:expr, $inner:ident => $expr:expr) => {
        match $mapper {
            Mapper::Nrom($inner) => $expr,
            Mapper::Mmc1($inner) => $expr,
            Mapper::Uxrom($inner) => $expr,
        }
    };
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) enum Mapper {
    Nrom(MapperImpl<Nrom>),
    Mmc1(MapperImpl<Mmc1>),
    Uxrom(MapperImpl<Uxrom>),
}

impl Mapper {
    /// User-readable mapper name, for logging only.
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Nrom(..) => "NROM",
            Self::Mmc1(..) => "MMC1",
            Self::Uxrom(..) => "UxROM",
        }
    }

    pub(crate) fn read_cpu_address(&self, address: u16) -> u8 {
        match_each_variant!(self, mapper => mapper.read_cpu_address(address))
    }

    pub(crate) fn write_cpu_address(&mut self, address: u16, value: u8) {
        match_each_variant!(self, mapper => mapper.write_cpu_address(address, value));
    }

    pub(crate) fn read_ppu_address(&self, address: u16, vram: &[u8; 4096]) -> u8 {
        match_each_variant!(self, mapper => {
            mapper.map_ppu_address(address).read(&mapper.cartridge, vram)
        })
    }

    pub(crate) fn write_ppu_address(&mut self, address: u16, value: u8, vram: &mut [u8; 4096]) {
        match_each_variant!(self, mapper => {
            mapper.map_ppu_address(address).write(value, &mut mapper.cartridge, vram)
        });
    }

    pub(crate) fn mirroring(&self) -> NametableMirroring {
        match_each_variant!(self, mapper => mapper.mirroring())
    }

    /// Per-CPU-cycle processing; MMC1 uses this to ignore back-to-back writes.
    pub(crate) fn tick_cpu(&mut self) {
        if let Self::Mmc1(mmc1) = self {
            mmc1.tick_cpu();
        }
    }

    /// Whether the board is currently asserting IRQ. None of the supported
    /// boards generate IRQs, but the bus wires this into the CPU's pulldown
    /// mask so that boards which do can plug in behind the same interface.
    pub(crate) fn interrupt_flag(&self) -> bool {
        false
    }

    pub(crate) fn reset(&mut self) {
        match self {
            Self::Nrom(..) => {}
            Self::Mmc1(mmc1) => mmc1.reset(),
            Self::Uxrom(uxrom) => uxrom.reset(),
        }
    }

    pub(crate) fn move_rom_from(&mut self, other: &mut Self) {
        let other_cartridge = match_each_variant!(other, mapper => &mut mapper.cartridge);
        match_each_variant!(self, mapper => mapper.cartridge.move_rom_from(other_cartridge));
    }
}

#[derive(Debug, Error)]
pub enum CartridgeError {
    #[error("ROM image too short to contain an iNES header")]
    Truncated,
    #[error("invalid or unsupported file format")]
    Format,
    #[error("unsupported mapper: {mapper_number}")]
    UnsupportedMapper { mapper_number: u8 },
}

#[derive(Debug, Clone)]
struct INesHeader {
    mapper_number: u8,
    prg_rom_size: usize,
    chr_rom_size: usize,
    chr_type: ChrType,
    nametable_mirroring: NametableMirroring,
    has_trainer: bool,
}

impl INesHeader {
    fn parse(file_bytes: &[u8]) -> Result<Self, CartridgeError> {
        if file_bytes.len() < HEADER_LEN {
            return Err(CartridgeError::Truncated);
        }
        let header = &file_bytes[..HEADER_LEN];

        // "NES" followed by the MS-DOS EOF character
        if header[..4] != INES_MAGIC {
            return Err(CartridgeError::Format);
        }

        let prg_rom_size = PRG_ROM_UNIT * usize::from(header[4]);
        let chr_rom_size = CHR_ROM_UNIT * usize::from(header[5]);

        let has_trainer = header[6].bit(2);

        let is_nes_2 = header[7] & 0x0C == 0x08;

        // Old dumping tools wrote garbage ("DiskDude!") into bytes 7-15; if the
        // reserved tail is non-zero on a plain iNES image, the mapper high
        // nibble cannot be trusted
        let mapper_high_nibble = if !is_nes_2 && header[12..16].iter().any(|&byte| byte != 0) {
            0
        } else {
            header[7] & 0xF0
        };
        let mapper_number = mapper_high_nibble | (header[6] >> 4);

        let chr_type = if chr_rom_size == 0 { ChrType::RAM } else { ChrType::ROM };

        let nametable_mirroring = if header[6].bit(3) {
            NametableMirroring::FourScreen
        } else if header[6].bit(0) {
            NametableMirroring::Vertical
        } else {
            NametableMirroring::Horizontal
        };

        Ok(Self {
            mapper_number,
            prg_rom_size,
            chr_rom_size,
            chr_type,
            nametable_mirroring,
            has_trainer,
        })
    }
}

/// Parse cartridge data out of an iNES image and wrap it in its mapper.
///
/// # Errors
///
/// Returns an error if the bytes do not look like an iNES file or the mapper
/// is not one of the supported boards.
pub(crate) fn from_ines_file(file_bytes: &[u8]) -> Result<Mapper, CartridgeError> {
    let header = INesHeader::parse(file_bytes)?;

    let prg_rom_start = if header.has_trainer { HEADER_LEN + TRAINER_LEN } else { HEADER_LEN };
    let prg_rom_end = prg_rom_start + header.prg_rom_size;
    let chr_rom_end = prg_rom_end + header.chr_rom_size;

    if file_bytes.len() < chr_rom_end || header.prg_rom_size == 0 {
        return Err(CartridgeError::Truncated);
    }

    let prg_rom = Vec::from(&file_bytes[prg_rom_start..prg_rom_end]);
    let chr_rom = Vec::from(&file_bytes[prg_rom_end..chr_rom_end]);

    let chr_ram_len = match header.chr_type {
        ChrType::RAM => CHR_RAM_LEN,
        ChrType::ROM => 0,
    };

    let cartridge = Cartridge {
        prg_rom,
        prg_ram: vec![0; PRG_RAM_LEN],
        chr_rom,
        chr_ram: vec![0; chr_ram_len],
    };

    let mapper = match header.mapper_number {
        0 => Mapper::Nrom(MapperImpl {
            cartridge,
            data: Nrom::new(header.chr_type, header.nametable_mirroring),
        }),
        1 => Mapper::Mmc1(MapperImpl { cartridge, data: Mmc1::new(header.chr_type) }),
        2 => Mapper::Uxrom(MapperImpl {
            cartridge,
            data: Uxrom::new(header.chr_type, header.nametable_mirroring),
        }),
        mapper_number => return Err(CartridgeError::UnsupportedMapper { mapper_number }),
    };

    log::info!("Mapper number: {} ({})", header.mapper_number, mapper.name());
    log::info!("PRG ROM size: {}", header.prg_rom_size);
    log::info!("CHR ROM size: {}", header.chr_rom_size);
    log::info!("CHR memory type: {:?}", header.chr_type);
    log::info!(
        "Hardwired nametable mirroring: {:?} (not applicable to all mappers)",
        header.nametable_mirroring
    );

    Ok(mapper)
}
