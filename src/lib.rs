#![forbid(unsafe_code)]

//! NES emulation core.
//!
//! The emulator is a synchronous discrete-event simulator driven by a master
//! clock: one [`Emulator::tick`] advances the PPU by one dot, and every third
//! tick advances the CPU and APU by one cycle. The host is responsible for
//! windowing, audio output, input capture, and file I/O; it drives the core
//! through [`Emulator`], reads the frame buffer once per frame, feeds joypad
//! state in, and drains audio samples from the lock-free queue on its audio
//! thread.

mod api;
mod apu;
mod audio;
mod bus;
mod cpu;
mod input;
mod num;
mod ppu;
mod serialize;

pub use api::{Emulator, EmulationError, NesConfig, TickEffect};
pub use audio::{AudioReceiver, DEFAULT_SAMPLE_RATE, NES_AUDIO_FREQUENCY};
pub use bus::cartridge::{CartridgeError, NametableMirroring};
pub use cpu::CpuError;
pub use input::{Button, JoypadState, Player};
pub use ppu::{FrameBuffer, SCREEN_HEIGHT, SCREEN_WIDTH};
pub use serialize::SaveStateError;
