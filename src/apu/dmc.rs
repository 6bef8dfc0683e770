//! The delta modulation channel (DMC): plays 1-bit delta-encoded samples
//! fetched from CPU memory, stealing CPU cycles for each byte fetch, and can
//! raise an IRQ when a sample finishes.
//!
//! Output levels are 0-127.

use crate::bus::CpuBus;
use bincode::{Decode, Encode};
use crate::num::GetBit;

// NTSC timer periods, in CPU cycles
const DMC_PERIOD_LOOKUP_TABLE: [u16; 16] =
    [428, 380, 340, 320, 286, 254, 226, 214, 190, 160, 142, 128, 106, 84, 72, 54];

// A byte fetch steals CPU cycles; hardware takes 1-4 depending on alignment,
// approximated here as a flat 4-cycle stall
const DMA_STALL_CYCLES: u32 = 4;

const SAMPLE_ADDRESS_START: u16 = 0xC000;

#[derive(Debug, Clone, Encode, Decode)]
struct DmcOutputUnit {
    output_level: u8,
    shift_register: u8,
    bits_remaining: u8,
    silence_flag: bool,
}

impl DmcOutputUnit {
    fn new() -> Self {
        Self { output_level: 0, shift_register: 0, bits_remaining: 8, silence_flag: true }
    }

    fn clock(&mut self, sample_buffer: &mut Option<u8>) {
        if !self.silence_flag {
            let new_output_level = if self.shift_register.bit(0) {
                self.output_level + 2
            } else {
                self.output_level.wrapping_sub(2)
            };
            if new_output_level < 128 {
                self.output_level = new_output_level;
            }
        }

        self.shift_register >>= 1;
        self.bits_remaining -= 1;

        if self.bits_remaining == 0 {
            self.bits_remaining = 8;
            match sample_buffer.take() {
                Some(sample_bits) => {
                    self.shift_register = sample_bits;
                    self.silence_flag = false;
                }
                None => {
                    self.silence_flag = true;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct DeltaModulationChannel {
    enabled: bool,
    timer_counter: u16,
    timer_period: u16,
    sample_buffer: Option<u8>,
    output_unit: DmcOutputUnit,
    sample_address: u16,
    current_address: u16,
    sample_length: u16,
    bytes_remaining: u16,
    loop_flag: bool,
    irq_enabled: bool,
    interrupt_flag: bool,
}

impl DeltaModulationChannel {
    pub(crate) fn new() -> Self {
        Self {
            enabled: false,
            timer_counter: DMC_PERIOD_LOOKUP_TABLE[0] - 1,
            timer_period: DMC_PERIOD_LOOKUP_TABLE[0],
            sample_buffer: None,
            output_unit: DmcOutputUnit::new(),
            sample_address: SAMPLE_ADDRESS_START,
            current_address: SAMPLE_ADDRESS_START,
            sample_length: 1,
            bytes_remaining: 0,
            loop_flag: false,
            irq_enabled: false,
            interrupt_flag: false,
        }
    }

    pub(crate) fn process_dmc_freq_update(&mut self, dmc_freq_value: u8) {
        self.irq_enabled = dmc_freq_value.bit(7);
        self.loop_flag = dmc_freq_value.bit(6);
        self.timer_period = DMC_PERIOD_LOOKUP_TABLE[(dmc_freq_value & 0x0F) as usize];

        if !self.irq_enabled {
            self.interrupt_flag = false;
        }
    }

    pub(crate) fn process_dmc_raw_update(&mut self, dmc_raw_value: u8) {
        self.output_unit.output_level = dmc_raw_value & 0x7F;
    }

    pub(crate) fn process_dmc_start_update(&mut self, dmc_start_value: u8) {
        self.sample_address = SAMPLE_ADDRESS_START | (u16::from(dmc_start_value) << 6);
    }

    pub(crate) fn process_dmc_len_update(&mut self, dmc_len_value: u8) {
        self.sample_length = (u16::from(dmc_len_value) << 4) + 1;
    }

    pub(crate) fn process_snd_chn_update(&mut self, snd_chn_value: u8, bus: &mut CpuBus<'_>) {
        self.interrupt_flag = false;

        self.enabled = snd_chn_value.bit(4);
        if self.enabled && self.bytes_remaining == 0 {
            self.restart();
            self.fill_sample_buffer(bus);
        } else if !self.enabled {
            self.bytes_remaining = 0;
            self.sample_buffer = None;
        }
    }

    fn restart(&mut self) {
        self.current_address = self.sample_address;
        self.bytes_remaining = self.sample_length;
    }

    fn fill_sample_buffer(&mut self, bus: &mut CpuBus<'_>) {
        if self.sample_buffer.is_some() || self.bytes_remaining == 0 {
            return;
        }

        self.sample_buffer = Some(bus.read_address(self.current_address));
        bus.add_dmc_stall(DMA_STALL_CYCLES);

        self.current_address = if self.current_address == 0xFFFF {
            SAMPLE_ADDRESS_START
        } else {
            self.current_address + 1
        };
        self.bytes_remaining -= 1;

        if self.bytes_remaining == 0 {
            if self.loop_flag {
                self.restart();
            } else if self.irq_enabled {
                self.interrupt_flag = true;
            }
        }
    }

    pub(crate) fn tick_cpu(&mut self, bus: &mut CpuBus<'_>) {
        if self.timer_counter == 0 {
            self.timer_counter = self.timer_period - 1;
            self.clock(bus);
        } else {
            self.timer_counter -= 1;
        }
    }

    fn clock(&mut self, bus: &mut CpuBus<'_>) {
        self.output_unit.clock(&mut self.sample_buffer);
        self.fill_sample_buffer(bus);
    }

    pub(crate) fn bytes_remaining(&self) -> u16 {
        self.bytes_remaining
    }

    pub(crate) fn interrupt_flag(&self) -> bool {
        self.interrupt_flag
    }

    pub(crate) fn sample(&self) -> u8 {
        self.output_unit.output_level
    }
}
