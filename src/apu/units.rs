//! Divider units shared by the APU channels: length counters, envelopes, and
//! the phase timers that drive channel sequencers.

use bincode::{Decode, Encode};
use crate::num::GetBit;

const LENGTH_COUNTER_LOOKUP_TABLE: [u8; 32] = [
    10, 254, 20, 2, 40, 4, 80, 6, 160, 8, 60, 10, 14, 12, 26, 14, 12, 16, 24, 18, 48, 20, 96, 22,
    192, 24, 72, 26, 16, 28, 32, 30,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum LengthCounterChannel {
    Pulse1,
    Pulse2,
    Triangle,
    Noise,
}

impl LengthCounterChannel {
    fn snd_chn_enabled_mask(self) -> u8 {
        match self {
            Self::Pulse1 => 0x01,
            Self::Pulse2 => 0x02,
            Self::Triangle => 0x04,
            Self::Noise => 0x08,
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct LengthCounter {
    channel: LengthCounterChannel,
    pub(crate) counter: u8,
    enabled: bool,
    halted: bool,
}

impl LengthCounter {
    pub(crate) fn new(channel: LengthCounterChannel) -> Self {
        Self { channel, counter: 0, enabled: false, halted: false }
    }

    pub(crate) fn process_snd_chn_update(&mut self, snd_chn_value: u8) {
        self.enabled = snd_chn_value & self.channel.snd_chn_enabled_mask() != 0;
        if !self.enabled {
            self.counter = 0;
        }
    }

    /// Halt comes from bit 5 of the volume register (pulse/noise) or bit 7 of
    /// the linear counter register (triangle).
    pub(crate) fn set_halted(&mut self, halted: bool) {
        self.halted = halted;
    }

    pub(crate) fn process_hi_update(&mut self, hi_value: u8) {
        if self.enabled {
            self.counter = LENGTH_COUNTER_LOOKUP_TABLE[(hi_value >> 3) as usize];
        }
    }

    pub(crate) fn clock(&mut self) {
        if !self.halted && self.counter > 0 {
            self.counter -= 1;
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct Envelope {
    divider: u8,
    divider_period: u8,
    decay_level_counter: u8,
    start_flag: bool,
    loop_flag: bool,
    constant_volume_flag: bool,
}

impl Envelope {
    pub(crate) fn new() -> Self {
        Self {
            divider: 0,
            divider_period: 0,
            decay_level_counter: 0,
            start_flag: false,
            loop_flag: false,
            constant_volume_flag: false,
        }
    }

    pub(crate) fn volume(&self) -> u8 {
        if self.constant_volume_flag { self.divider_period } else { self.decay_level_counter }
    }

    pub(crate) fn process_vol_update(&mut self, vol_value: u8) {
        self.loop_flag = vol_value.bit(5);
        self.constant_volume_flag = vol_value.bit(4);
        self.divider_period = vol_value & 0x0F;
    }

    pub(crate) fn process_hi_update(&mut self) {
        self.start_flag = true;
    }

    pub(crate) fn clock(&mut self) {
        if self.start_flag {
            self.start_flag = false;

            self.divider = self.divider_period;
            self.decay_level_counter = 0x0F;
        } else if self.divider == 0 {
            self.divider = self.divider_period;

            if self.decay_level_counter > 0 {
                self.decay_level_counter -= 1;
            } else if self.loop_flag {
                self.decay_level_counter = 0x0F;
            }
        } else {
            self.divider -= 1;
        }
    }
}

/// An 11-bit timer that advances a channel sequencer on underflow. Pulse
/// timers clock every other CPU cycle and reset their phase on a period high
/// write; the triangle timer clocks every CPU cycle and keeps its phase.
#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct PhaseTimer<
    const MAX_PHASE: u8,
    const CPU_TICKS_PER_CLOCK: u8,
    const CAN_RESET_PHASE: bool,
> {
    cpu_ticks: u8,
    divider: u16,
    pub(crate) divider_period: u16,
    pub(crate) phase: u8,
}

impl<const MAX_PHASE: u8, const CPU_TICKS_PER_CLOCK: u8, const CAN_RESET_PHASE: bool>
    PhaseTimer<MAX_PHASE, CPU_TICKS_PER_CLOCK, CAN_RESET_PHASE>
{
    pub(crate) fn new() -> Self {
        Self { cpu_ticks: 0, divider: 0, divider_period: 0, phase: 0 }
    }

    pub(crate) fn process_lo_update(&mut self, lo_value: u8) {
        self.divider_period = (self.divider_period & 0xFF00) | u16::from(lo_value);
    }

    pub(crate) fn process_hi_update(&mut self, hi_value: u8) {
        self.divider_period = (u16::from(hi_value & 0x07) << 8) | (self.divider_period & 0x00FF);
        if CAN_RESET_PHASE {
            self.phase = 0;
        }
    }

    pub(crate) fn tick_cpu(&mut self, sequencer_enabled: bool) {
        self.cpu_ticks += 1;
        if self.cpu_ticks < CPU_TICKS_PER_CLOCK {
            return;
        }
        self.cpu_ticks = 0;

        if self.divider == 0 {
            self.divider = self.divider_period;
            if sequencer_enabled {
                self.phase = (self.phase + 1) & (MAX_PHASE - 1);
            }
        } else {
            self.divider -= 1;
        }
    }
}

pub(crate) type PulsePhaseTimer = PhaseTimer<8, 2, true>;
pub(crate) type TrianglePhaseTimer = PhaseTimer<32, 1, false>;
