//! Versioned save-state blobs.
//!
//! A save state is a bincode encoding of the full mutable emulation state:
//! bus (RAM, registers, DMA, controller shift state, cartridge WRAM + mapper
//! registers), CPU, PPU, and APU. ROM bytes are deliberately excluded by the
//! cartridge's Encode impl and re-attached from the live emulator after a
//! load, so loading never requires re-reading the ROM file.

use crate::apu::ApuState;
use crate::bus::Bus;
use crate::cpu::CpuState;
use crate::ppu::PpuState;
use bincode::config::Configuration;
use bincode::error::{DecodeError, EncodeError};
use bincode::{Decode, Encode};
use thiserror::Error;

const SAVE_STATE_VERSION: u32 = 1;

fn bincode_config() -> Configuration {
    bincode::config::standard()
}

#[derive(Debug, Error)]
pub enum SaveStateError {
    #[error("error serializing state: {0}")]
    Encode(#[from] EncodeError),
    #[error("error deserializing state: {0}")]
    Decode(#[from] DecodeError),
    #[error("save state version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

#[derive(Encode, Decode)]
pub(crate) struct EmulationState {
    pub(crate) bus: Bus,
    pub(crate) cpu: CpuState,
    pub(crate) ppu: PpuState,
    pub(crate) apu: ApuState,
    pub(crate) master_ticks: u64,
}

pub(crate) fn save_state(
    bus: &Bus,
    cpu: &CpuState,
    ppu: &PpuState,
    apu: &ApuState,
    master_ticks: u64,
) -> Result<Vec<u8>, SaveStateError> {
    let mut bytes = bincode::encode_to_vec(SAVE_STATE_VERSION, bincode_config())?;
    bytes.extend(bincode::encode_to_vec(bus, bincode_config())?);
    bytes.extend(bincode::encode_to_vec(cpu, bincode_config())?);
    bytes.extend(bincode::encode_to_vec(ppu, bincode_config())?);
    bytes.extend(bincode::encode_to_vec(apu, bincode_config())?);
    bytes.extend(bincode::encode_to_vec(master_ticks, bincode_config())?);

    Ok(bytes)
}

pub(crate) fn load_state(bytes: &[u8]) -> Result<EmulationState, SaveStateError> {
    let (version, version_len): (u32, usize) =
        bincode::decode_from_slice(bytes, bincode_config())?;
    if version != SAVE_STATE_VERSION {
        return Err(SaveStateError::VersionMismatch {
            expected: SAVE_STATE_VERSION,
            found: version,
        });
    }

    let (state, _) = bincode::decode_from_slice(&bytes[version_len..], bincode_config())?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_mismatch_is_rejected() {
        let bytes =
            bincode::encode_to_vec(SAVE_STATE_VERSION + 1, bincode_config()).expect("encodable");

        assert!(matches!(
            load_state(&bytes),
            Err(SaveStateError::VersionMismatch { expected: SAVE_STATE_VERSION, .. })
        ));
    }
}
