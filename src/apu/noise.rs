//! The noise channel: a 15-bit linear feedback shift register clocked by a
//! period-table timer, gated by a length counter and an envelope.

use crate::apu::units::{Envelope, LengthCounter, LengthCounterChannel};
use bincode::{Decode, Encode};
use crate::num::GetBit;

// NTSC noise periods, in CPU cycles
const NOISE_PERIOD_LOOKUP_TABLE: [u16; 16] =
    [4, 8, 16, 32, 64, 96, 128, 160, 202, 254, 380, 508, 762, 1016, 2034, 4068];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum LfsrMode {
    Bit1Feedback,
    Bit6Feedback,
}

#[derive(Debug, Clone, Encode, Decode)]
struct LinearFeedbackShiftRegister {
    register: u16,
    mode: LfsrMode,
}

impl LinearFeedbackShiftRegister {
    fn new() -> Self {
        Self { register: 1, mode: LfsrMode::Bit1Feedback }
    }

    fn clock(&mut self) {
        let feedback = match self.mode {
            LfsrMode::Bit1Feedback => (self.register & 0x01) ^ ((self.register >> 1) & 0x01),
            LfsrMode::Bit6Feedback => (self.register & 0x01) ^ ((self.register >> 6) & 0x01),
        };

        self.register = (self.register >> 1) | (feedback << 14);
    }

    fn output_silenced(&self) -> bool {
        self.register.bit(0)
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct NoiseChannel {
    lfsr: LinearFeedbackShiftRegister,
    timer_counter: u16,
    timer_period: u16,
    length_counter: LengthCounter,
    envelope: Envelope,
}

impl NoiseChannel {
    pub(crate) fn new() -> Self {
        Self {
            lfsr: LinearFeedbackShiftRegister::new(),
            timer_counter: 0,
            timer_period: NOISE_PERIOD_LOOKUP_TABLE[0],
            length_counter: LengthCounter::new(LengthCounterChannel::Noise),
            envelope: Envelope::new(),
        }
    }

    pub(crate) fn process_vol_update(&mut self, vol_value: u8) {
        self.envelope.process_vol_update(vol_value);
        self.length_counter.set_halted(vol_value.bit(5));
    }

    pub(crate) fn process_lo_update(&mut self, lo_value: u8) {
        self.lfsr.mode =
            if lo_value.bit(7) { LfsrMode::Bit6Feedback } else { LfsrMode::Bit1Feedback };
        self.timer_period = NOISE_PERIOD_LOOKUP_TABLE[(lo_value & 0x0F) as usize];
    }

    pub(crate) fn process_hi_update(&mut self, hi_value: u8) {
        self.envelope.process_hi_update();
        self.length_counter.process_hi_update(hi_value);
    }

    pub(crate) fn process_snd_chn_update(&mut self, snd_chn_value: u8) {
        self.length_counter.process_snd_chn_update(snd_chn_value);
    }

    pub(crate) fn clock_quarter_frame(&mut self) {
        self.envelope.clock();
    }

    pub(crate) fn clock_half_frame(&mut self) {
        self.length_counter.clock();
    }

    pub(crate) fn tick_cpu(&mut self) {
        if self.timer_counter == 0 {
            self.timer_counter = self.timer_period - 1;
            self.lfsr.clock();
        } else {
            self.timer_counter -= 1;
        }
    }

    pub(crate) fn length_counter_nonzero(&self) -> bool {
        self.length_counter.counter > 0
    }

    pub(crate) fn sample(&self) -> u8 {
        if self.lfsr.output_silenced() || self.length_counter.counter == 0 {
            0
        } else {
            self.envelope.volume()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lfsr_starts_at_1_and_shifts_feedback_into_bit_14() {
        let mut lfsr = LinearFeedbackShiftRegister::new();
        assert_eq!(lfsr.register, 1);

        // bit0=1, bit1=0: feedback 1
        lfsr.clock();
        assert_eq!(lfsr.register, 0x4000);

        // bit0=0, bit1=0: feedback 0
        lfsr.clock();
        assert_eq!(lfsr.register, 0x2000);
    }

    #[test]
    fn bit6_feedback_mode() {
        let mut lfsr = LinearFeedbackShiftRegister::new();
        lfsr.register = 0x0041;
        lfsr.mode = LfsrMode::Bit6Feedback;

        // bit0=1, bit6=1: feedback 0
        lfsr.clock();
        assert_eq!(lfsr.register, 0x0020);
    }

    #[test]
    fn output_silenced_while_bit_0_set() {
        let mut channel = NoiseChannel::new();
        channel.process_snd_chn_update(0x08);
        channel.process_vol_update(0x1F);
        channel.process_hi_update(0x00);

        // LFSR register is 1: bit 0 set, silenced
        assert_eq!(channel.sample(), 0);

        // After one clock bit 0 clears and the envelope volume comes through
        channel.lfsr.clock();
        assert_eq!(channel.sample(), 0x0F);
    }
}
