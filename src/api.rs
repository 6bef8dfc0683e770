//! Public emulator API: construction from an iNES image, the master clock,
//! frame/audio/input access, reset, and save states.

use crate::audio::{self, AudioReceiver, AudioSender, DEFAULT_SAMPLE_RATE};
use crate::bus::cartridge::CartridgeError;
use crate::bus::{Bus, cartridge};
use crate::cpu::{CpuError, CpuState};
use crate::input::{Button, JoypadState, Player};
use crate::ppu::{FrameBuffer, PpuState};
use crate::serialize::{self, SaveStateError};
use crate::apu::ApuState;
use crate::{apu, cpu, ppu};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NesConfig {
    /// Output sample rate the APU resamples to (Hz)
    pub audio_sample_rate: u32,
    /// If true, an unknown opcode is an error instead of a logged 2-cycle NOP
    pub strict_opcodes: bool,
}

impl Default for NesConfig {
    fn default() -> Self {
        Self { audio_sample_rate: DEFAULT_SAMPLE_RATE, strict_opcodes: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickEffect {
    None,
    /// The PPU rolled over into the pre-render scanline; the frame buffer
    /// holds a complete frame
    FrameComplete,
}

#[derive(Debug, Error)]
pub enum EmulationError {
    #[error("CPU fault: {0}")]
    Cpu(#[from] CpuError),
}

/// The emulated console. Owns every subsystem; the CPU, PPU, and APU receive
/// narrow views of the bus for the duration of each tick.
pub struct Emulator {
    bus: Bus,
    cpu: CpuState,
    ppu: PpuState,
    apu: ApuState,
    master_ticks: u64,
    audio_sender: AudioSender,
    audio_receiver: Option<AudioReceiver>,
}

impl Emulator {
    /// Create a new emulator instance from iNES ROM bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid iNES image or use an
    /// unsupported mapper.
    pub fn create(rom_bytes: &[u8], config: NesConfig) -> Result<Self, CartridgeError> {
        let mapper = cartridge::from_ines_file(rom_bytes)?;
        let mut bus = Bus::from_cartridge(mapper);

        let cpu = CpuState::new(&mut bus.cpu(), config.strict_opcodes);
        let ppu = PpuState::new();
        let mut apu = ApuState::new(config.audio_sample_rate);

        init_apu(&mut apu, &mut bus);

        let (audio_sender, audio_receiver) = audio::new_sample_queue();

        Ok(Self {
            bus,
            cpu,
            ppu,
            apu,
            master_ticks: 0,
            audio_sender,
            audio_receiver: Some(audio_receiver),
        })
    }

    /// Advance the master clock by one tick: one PPU dot, with the CPU and
    /// APU advancing one cycle on every third tick. While an OAM DMA transfer
    /// is active it occupies the CPU's cycle slots.
    ///
    /// # Errors
    ///
    /// Propagates a CPU fault on an unknown opcode in strict mode; otherwise
    /// this method only fails on bugs.
    pub fn tick(&mut self) -> Result<TickEffect, EmulationError> {
        ppu::tick(&mut self.ppu, &mut self.bus.ppu());

        if self.master_ticks % 3 == 0 {
            apu::tick(&mut self.apu, &mut self.bus.cpu());

            if self.bus.oam_dma_active() {
                self.bus.oam_dma_step();
            } else {
                cpu::tick(&mut self.cpu, &mut self.bus.cpu())?;
            }
            self.bus.tick_cpu();

            for sample in self.apu.drain_samples() {
                self.audio_sender.push(sample);
            }
        }

        // Latch the PPU's NMI edge after the dot
        self.bus.tick();
        self.master_ticks += 1;

        if self.ppu.take_frame_complete() {
            Ok(TickEffect::FrameComplete)
        } else {
            Ok(TickEffect::None)
        }
    }

    /// Run until the current frame completes.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Self::tick`].
    pub fn run_until_frame(&mut self) -> Result<(), EmulationError> {
        while self.tick()? != TickEffect::FrameComplete {}
        Ok(())
    }

    /// The 256x240 frame buffer, one packed 0x00RRGGBB pixel per entry,
    /// complete as of the last [`TickEffect::FrameComplete`].
    #[must_use]
    pub fn frame_buffer(&self) -> &FrameBuffer {
        self.ppu.frame_buffer()
    }

    pub fn set_joypad_state(&mut self, player: Player, joypad_state: JoypadState) {
        let index = match player {
            Player::One => 0,
            Player::Two => 1,
        };
        self.bus.set_joypad_state(index, joypad_state);
    }

    pub fn set_button(&mut self, player: Player, button: Button, pressed: bool) {
        let index = match player {
            Player::One => 0,
            Player::Two => 1,
        };
        let mut joypad_state = self.bus.joypad_state(index);
        joypad_state.set_button(button, pressed);
        self.bus.set_joypad_state(index, joypad_state);
    }

    /// Take the consumer half of the audio sample queue. The first call
    /// returns the handle for the host audio thread; later calls return None.
    pub fn take_audio_receiver(&mut self) -> Option<AudioReceiver> {
        self.audio_receiver.take()
    }

    /// Soft reset, as if the console's reset button was pressed.
    pub fn reset(&mut self) {
        cpu::reset(&mut self.cpu, &mut self.bus.cpu());
        ppu::reset(&mut self.ppu, &mut self.bus.ppu());
        apu::reset(&mut self.apu, &mut self.bus.cpu());
    }

    /// Serialize the full emulation state into an opaque blob.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn save_state(&self) -> Result<Vec<u8>, SaveStateError> {
        serialize::save_state(&self.bus, &self.cpu, &self.ppu, &self.apu, self.master_ticks)
    }

    /// Restore a previously saved state. On failure the current state is left
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns an error on a version mismatch or a malformed blob.
    pub fn load_state(&mut self, bytes: &[u8]) -> Result<(), SaveStateError> {
        let mut state = serialize::load_state(bytes)?;

        // Save states do not carry ROM; move it over from the live cartridge
        state.bus.move_rom_from(&mut self.bus);

        self.bus = state.bus;
        self.cpu = state.cpu;
        self.ppu = state.ppu;
        self.apu = state.apu;
        self.master_ticks = state.master_ticks;

        Ok(())
    }
}

fn init_apu(apu: &mut ApuState, bus: &mut Bus) {
    // Writing $4017 resets the frame counter; run the APU for a few cycles to
    // settle, mirroring the power-on sequence
    bus.cpu().write_address(0x4017, 0x00);
    for _ in 0..10 {
        apu::tick(apu, &mut bus.cpu());
    }
}
