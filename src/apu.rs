//! APU (audio processing unit) emulation.
//!
//! Five channels (two pulse, triangle, noise, DMC) are driven once per CPU
//! cycle, with a frame counter subdividing CPU time into quarter-frame clocks
//! (envelopes, the triangle linear counter) and half-frame clocks (length
//! counters, sweeps). Channel outputs run through the nonlinear mixer and a
//! downsample counter decides which mixed samples become host audio samples.

mod dmc;
mod noise;
mod pulse;
mod triangle;
mod units;

use crate::apu::dmc::DeltaModulationChannel;
use crate::apu::noise::NoiseChannel;
use crate::apu::pulse::PulseChannel;
use crate::apu::triangle::TriangleChannel;
use crate::audio::{DownsampleAction, DownsampleCounter};
use crate::bus::{ApuRegister, ApuRegisterWrite, CpuBus, IrqSource};
use bincode::{Decode, Encode};
use crate::num::GetBit;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum FrameCounterMode {
    FourStep,
    FiveStep,
}

/// The frame counter divides CPU time into quarter- and half-frame pulses.
///
/// 4-step mode: quarter-frame clocks at CPU cycles 7457/14913/22371/29829,
/// half-frame clocks at 14913/29829, an IRQ at 29829 unless inhibited, and a
/// 29830-cycle period. 5-step mode: quarter at 7457/14913/22371/37281, half at
/// 14913/37281, no IRQ, 37282-cycle period.
#[derive(Debug, Clone, Encode, Decode)]
struct FrameCounter {
    cpu_ticks: u16,
    mode: FrameCounterMode,
    interrupt_inhibit_flag: bool,
}

impl FrameCounter {
    fn new() -> Self {
        Self { cpu_ticks: 0, mode: FrameCounterMode::FourStep, interrupt_inhibit_flag: false }
    }

    fn process_register_update(&mut self, value: u8) {
        self.mode = if value.bit(7) { FrameCounterMode::FiveStep } else { FrameCounterMode::FourStep };
        self.interrupt_inhibit_flag = value.bit(6);
        self.cpu_ticks = 0;
    }

    fn tick(&mut self) {
        self.cpu_ticks += 1;

        let period = match self.mode {
            FrameCounterMode::FourStep => 29830,
            FrameCounterMode::FiveStep => 37282,
        };
        if self.cpu_ticks == period {
            self.cpu_ticks = 0;
        }
    }

    fn generate_quarter_frame_clock(&self) -> bool {
        match self.cpu_ticks {
            7457 | 14913 | 22371 => true,
            29829 => self.mode == FrameCounterMode::FourStep,
            37281 => true,
            _ => false,
        }
    }

    fn generate_half_frame_clock(&self) -> bool {
        match self.cpu_ticks {
            14913 => true,
            29829 => self.mode == FrameCounterMode::FourStep,
            37281 => true,
            _ => false,
        }
    }

    fn should_set_interrupt_flag(&self) -> bool {
        self.mode == FrameCounterMode::FourStep
            && !self.interrupt_inhibit_flag
            && self.cpu_ticks == 29829
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct ApuState {
    pulse_1: PulseChannel,
    pulse_2: PulseChannel,
    triangle: TriangleChannel,
    noise: NoiseChannel,
    dmc: DeltaModulationChannel,
    frame_counter: FrameCounter,
    frame_counter_interrupt_flag: bool,
    downsample_counter: DownsampleCounter,
    sample_queue: VecDeque<f32>,
}

impl ApuState {
    pub fn new(audio_sample_rate: u32) -> Self {
        Self {
            pulse_1: PulseChannel::new_channel_1(),
            pulse_2: PulseChannel::new_channel_2(),
            triangle: TriangleChannel::new(),
            noise: NoiseChannel::new(),
            dmc: DeltaModulationChannel::new(),
            frame_counter: FrameCounter::new(),
            frame_counter_interrupt_flag: false,
            downsample_counter: DownsampleCounter::new(audio_sample_rate),
            sample_queue: VecDeque::new(),
        }
    }

    fn process_register_updates(
        &mut self,
        writes: impl IntoIterator<Item = ApuRegisterWrite>,
        bus: &mut CpuBus<'_>,
    ) {
        for ApuRegisterWrite { register, value } in writes {
            match register {
                ApuRegister::SQ1_VOL => self.pulse_1.process_vol_update(value),
                ApuRegister::SQ1_SWEEP => self.pulse_1.process_sweep_update(value),
                ApuRegister::SQ1_LO => self.pulse_1.process_lo_update(value),
                ApuRegister::SQ1_HI => self.pulse_1.process_hi_update(value),
                ApuRegister::SQ2_VOL => self.pulse_2.process_vol_update(value),
                ApuRegister::SQ2_SWEEP => self.pulse_2.process_sweep_update(value),
                ApuRegister::SQ2_LO => self.pulse_2.process_lo_update(value),
                ApuRegister::SQ2_HI => self.pulse_2.process_hi_update(value),
                ApuRegister::TRI_LINEAR => self.triangle.process_tri_linear_update(value),
                ApuRegister::TRI_LO => self.triangle.process_lo_update(value),
                ApuRegister::TRI_HI => self.triangle.process_hi_update(value),
                ApuRegister::NOISE_VOL => self.noise.process_vol_update(value),
                ApuRegister::NOISE_LO => self.noise.process_lo_update(value),
                ApuRegister::NOISE_HI => self.noise.process_hi_update(value),
                ApuRegister::DMC_FREQ => self.dmc.process_dmc_freq_update(value),
                ApuRegister::DMC_RAW => self.dmc.process_dmc_raw_update(value),
                ApuRegister::DMC_START => self.dmc.process_dmc_start_update(value),
                ApuRegister::DMC_LEN => self.dmc.process_dmc_len_update(value),
                ApuRegister::SND_CHN => {
                    self.pulse_1.process_snd_chn_update(value);
                    self.pulse_2.process_snd_chn_update(value);
                    self.triangle.process_snd_chn_update(value);
                    self.noise.process_snd_chn_update(value);
                    self.dmc.process_snd_chn_update(value, bus);
                }
                ApuRegister::FRAME_COUNTER => {
                    self.frame_counter.process_register_update(value);
                    if self.frame_counter.interrupt_inhibit_flag {
                        self.frame_counter_interrupt_flag = false;
                    }
                    // Writing with bit 7 set clocks the frame units immediately
                    if value.bit(7) {
                        self.clock_quarter_frame();
                        self.clock_half_frame();
                    }
                }
            }
        }
    }

    fn clock_quarter_frame(&mut self) {
        self.pulse_1.clock_quarter_frame();
        self.pulse_2.clock_quarter_frame();
        self.triangle.clock_quarter_frame();
        self.noise.clock_quarter_frame();
    }

    fn clock_half_frame(&mut self) {
        self.pulse_1.clock_half_frame();
        self.pulse_2.clock_half_frame();
        self.triangle.clock_half_frame();
        self.noise.clock_half_frame();
    }

    fn tick_cpu(&mut self, bus: &mut CpuBus<'_>) {
        self.pulse_1.tick_cpu();
        self.pulse_2.tick_cpu();
        self.triangle.tick_cpu();
        self.noise.tick_cpu();
        self.dmc.tick_cpu(bus);
        self.frame_counter.tick();

        if self.frame_counter.generate_quarter_frame_clock() {
            self.clock_quarter_frame();
        }
        if self.frame_counter.generate_half_frame_clock() {
            self.clock_half_frame();
        }

        if self.frame_counter.should_set_interrupt_flag() {
            self.frame_counter_interrupt_flag = true;
        }
    }

    fn status(&self) -> u8 {
        (u8::from(self.dmc.interrupt_flag()) << 7)
            | (u8::from(self.frame_counter_interrupt_flag) << 6)
            | (u8::from(self.dmc.bytes_remaining() > 0) << 4)
            | (u8::from(self.noise.length_counter_nonzero()) << 3)
            | (u8::from(self.triangle.length_counter_nonzero()) << 2)
            | (u8::from(self.pulse_2.length_counter_nonzero()) << 1)
            | u8::from(self.pulse_1.length_counter_nonzero())
    }

    fn mix_samples(&self) -> f32 {
        let pulse_1 = self.pulse_1.sample();
        let pulse_2 = self.pulse_2.sample();
        let triangle = self.triangle.sample();
        let noise = self.noise.sample();
        let dmc = self.dmc.sample();

        // Formulas from https://www.nesdev.org/wiki/APU_Mixer
        let pulse_mix = if pulse_1 > 0 || pulse_2 > 0 {
            95.88 / (8128.0 / f64::from(pulse_1 + pulse_2) + 100.0)
        } else {
            0.0
        };

        let tnd_mix = if triangle > 0 || noise > 0 || dmc > 0 {
            159.79
                / (1.0
                    / (f64::from(triangle) / 8227.0
                        + f64::from(noise) / 12241.0
                        + f64::from(dmc) / 22638.0)
                    + 100.0)
        } else {
            0.0
        };

        (pulse_mix + tnd_mix) as f32
    }

    /// Drain the samples accumulated since the last call. The caller moves
    /// them into the host-facing sample queue.
    pub fn drain_samples(&mut self) -> std::collections::vec_deque::Drain<'_, f32> {
        self.sample_queue.drain(..)
    }
}

/// Run the APU for one CPU cycle.
pub fn tick(state: &mut ApuState, bus: &mut CpuBus<'_>) {
    // A $4015 read acknowledges the frame counter IRQ
    if bus.io_registers_mut().get_and_clear_snd_chn_read() {
        state.frame_counter_interrupt_flag = false;
    }

    let writes = bus.io_registers_mut().drain_dirty_writes();
    state.process_register_updates(writes, bus);

    state.tick_cpu(bus);

    bus.interrupt_lines()
        .set_irq_low_pull(IrqSource::ApuFrameCounter, state.frame_counter_interrupt_flag);
    bus.interrupt_lines().set_irq_low_pull(IrqSource::ApuDmc, state.dmc.interrupt_flag());

    bus.io_registers_mut().set_apu_status(state.status());

    if state.downsample_counter.increment() == DownsampleAction::OutputSample {
        let mixed_sample = state.mix_samples();
        state.sample_queue.push_back(mixed_sample);
    }
}

/// Reset the APU: silence every channel and restore the frame counter, as the
/// console's reset line does.
pub fn reset(state: &mut ApuState, bus: &mut CpuBus<'_>) {
    state.process_register_updates(
        [ApuRegisterWrite { register: ApuRegister::SND_CHN, value: 0x00 }],
        bus,
    );
    state.frame_counter = FrameCounter::new();
    state.frame_counter_interrupt_flag = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::DEFAULT_SAMPLE_RATE;
    use crate::bus::Bus;
    use crate::bus::cartridge::{from_ines_file, tests::ines_image};

    fn new_test_apu() -> (Bus, ApuState) {
        let mapper = from_ines_file(&ines_image(0, 2, 1)).expect("valid image");
        (Bus::from_cartridge(mapper), ApuState::new(DEFAULT_SAMPLE_RATE))
    }

    fn run_cpu_cycles(bus: &mut Bus, state: &mut ApuState, cycles: u32) {
        for _ in 0..cycles {
            tick(state, &mut bus.cpu());
        }
    }

    #[test]
    fn length_counter_counts_down_by_half_frames() {
        let (mut bus, mut state) = new_test_apu();

        // Enable both pulse channels, then load pulse 1's length counter with
        // table index 1 (254)
        bus.cpu().write_address(0x4015, 0x03);
        bus.cpu().write_address(0x4003, 0x08);
        run_cpu_cycles(&mut bus, &mut state, 1);

        // 127 half-frame clocks: one per 14913-or-so cycles, two per sequence
        for _ in 0..127 {
            state.clock_half_frame();
        }
        assert_eq!(bus.cpu().read_address(0x4015) & 0x01, 0x01);

        for _ in 0..127 {
            state.clock_half_frame();
        }
        run_cpu_cycles(&mut bus, &mut state, 1);
        assert_eq!(bus.cpu().read_address(0x4015) & 0x01, 0x00);
    }

    #[test]
    fn frame_counter_irq_fires_at_29829() {
        let (mut bus, mut state) = new_test_apu();

        run_cpu_cycles(&mut bus, &mut state, 29828);
        assert!(!state.frame_counter_interrupt_flag);

        run_cpu_cycles(&mut bus, &mut state, 1);
        assert!(state.frame_counter_interrupt_flag);
        assert!(bus.cpu().irq_triggered());
    }

    #[test]
    fn five_step_mode_raises_no_irq() {
        let (mut bus, mut state) = new_test_apu();

        bus.cpu().write_address(0x4017, 0x80);
        run_cpu_cycles(&mut bus, &mut state, 40000);
        assert!(!state.frame_counter_interrupt_flag);
    }

    #[test]
    fn status_read_acknowledges_frame_irq() {
        let (mut bus, mut state) = new_test_apu();

        run_cpu_cycles(&mut bus, &mut state, 29829);
        assert!(state.frame_counter_interrupt_flag);

        let status = bus.cpu().read_address(0x4015);
        assert_eq!(status & 0x40, 0x40);

        run_cpu_cycles(&mut bus, &mut state, 1);
        assert!(!state.frame_counter_interrupt_flag);
        assert!(!bus.cpu().irq_triggered());
    }

    #[test]
    fn irq_inhibit_clears_pending_frame_irq() {
        let (mut bus, mut state) = new_test_apu();

        run_cpu_cycles(&mut bus, &mut state, 29829);
        assert!(state.frame_counter_interrupt_flag);

        bus.cpu().write_address(0x4017, 0x40);
        run_cpu_cycles(&mut bus, &mut state, 1);
        assert!(!state.frame_counter_interrupt_flag);
    }

    #[test]
    fn five_step_write_clocks_units_immediately() {
        let (mut bus, mut state) = new_test_apu();

        bus.cpu().write_address(0x4015, 0x01);
        bus.cpu().write_address(0x4003, 0x08);
        run_cpu_cycles(&mut bus, &mut state, 1);

        // Writing $4017 with bit 7 set clocks a half-frame immediately,
        // dropping the just-loaded length counter from 254 to 253
        bus.cpu().write_address(0x4017, 0x80);
        run_cpu_cycles(&mut bus, &mut state, 1);

        for _ in 0..253 {
            state.clock_half_frame();
        }
        run_cpu_cycles(&mut bus, &mut state, 1);
        assert_eq!(bus.cpu().read_address(0x4015) & 0x01, 0x00);
    }

    #[test]
    fn mixer_output_stays_in_range() {
        let (mut bus, mut state) = new_test_apu();

        // Silence mixes to exactly zero
        assert_eq!(state.mix_samples(), 0.0);

        // Drive every channel to its maximum output level
        bus.cpu().write_address(0x4015, 0x1F);
        bus.cpu().write_address(0x4000, 0xFF);
        bus.cpu().write_address(0x4004, 0xFF);
        bus.cpu().write_address(0x4011, 0x7F);
        run_cpu_cycles(&mut bus, &mut state, 4);

        let sample = state.mix_samples();
        assert!(sample >= 0.0 && sample <= 1.0, "sample out of range: {sample}");
    }

    #[test]
    fn samples_accumulate_at_the_output_rate() {
        let (mut bus, mut state) = new_test_apu();

        // ~0.1 seconds of CPU time
        run_cpu_cycles(&mut bus, &mut state, 178_977);
        let samples: Vec<f32> = state.drain_samples().collect();

        let expected = f64::from(DEFAULT_SAMPLE_RATE) * 0.1;
        assert!(
            (samples.len() as f64 - expected).abs() < 3.0,
            "expected ~{expected} samples, got {}",
            samples.len()
        );
    }
}
