//! The two pulse wave channels: an 11-bit timer driving an 8-step duty
//! sequencer, gated by a length counter and an envelope, with a sweep unit
//! that can slide the timer period.

use crate::apu::units::{Envelope, LengthCounter, LengthCounterChannel, PulsePhaseTimer};
use bincode::{Decode, Encode};
use crate::num::GetBit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum DutyCycle {
    OneEighth,
    OneFourth,
    OneHalf,
    ThreeFourths,
}

impl DutyCycle {
    fn from_vol(vol_value: u8) -> Self {
        match vol_value & 0xC0 {
            0x00 => Self::OneEighth,
            0x40 => Self::OneFourth,
            0x80 => Self::OneHalf,
            0xC0 => Self::ThreeFourths,
            _ => unreachable!("value & 0xC0 is always 0x00/0x40/0x80/0xC0"),
        }
    }

    fn waveform(self) -> [u8; 8] {
        match self {
            Self::OneEighth => [0, 1, 0, 0, 0, 0, 0, 0],
            Self::OneFourth => [0, 1, 1, 0, 0, 0, 0, 0],
            Self::OneHalf => [0, 1, 1, 1, 1, 0, 0, 0],
            Self::ThreeFourths => [1, 0, 0, 1, 1, 1, 1, 1],
        }
    }
}

/// Pulse 1 negates its sweep delta in ones' complement (an extra -1), pulse 2
/// in two's complement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub(crate) enum SweepNegateBehavior {
    OnesComplement,
    TwosComplement,
}

impl SweepNegateBehavior {
    fn negate(self, value: u16) -> u16 {
        match self {
            Self::OnesComplement => !value,
            Self::TwosComplement => (!value).wrapping_add(1),
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
struct PulseSweep {
    enabled: bool,
    divider: u8,
    divider_period: u8,
    negate_flag: bool,
    negate_behavior: SweepNegateBehavior,
    shift: u8,
    reload_flag: bool,
    target_period: u16,
}

impl PulseSweep {
    fn new(negate_behavior: SweepNegateBehavior) -> Self {
        Self {
            enabled: false,
            divider: 0,
            divider_period: 0,
            negate_flag: false,
            negate_behavior,
            shift: 0,
            reload_flag: false,
            target_period: 0,
        }
    }

    fn process_sweep_update(&mut self, sweep_value: u8, timer_period: u16) {
        self.reload_flag = true;

        self.enabled = sweep_value.bit(7);
        self.divider_period = (sweep_value >> 4) & 0x07;
        self.negate_flag = sweep_value.bit(3);
        self.shift = sweep_value & 0x07;

        self.target_period = self.compute_target_period(timer_period);
    }

    fn compute_target_period(&self, timer_period: u16) -> u16 {
        let delta = timer_period >> self.shift;
        let signed_delta =
            if self.negate_flag { self.negate_behavior.negate(delta) } else { delta };

        timer_period.wrapping_add(signed_delta)
    }

    fn is_channel_muted(&self, timer_period: u16) -> bool {
        timer_period < 8 || self.target_period > 0x07FF
    }

    fn clock(&mut self, timer_period: &mut u16) {
        if self.divider == 0 && self.enabled && !self.is_channel_muted(*timer_period) {
            *timer_period = self.target_period;
            self.target_period = self.compute_target_period(*timer_period);
        }

        if self.divider == 0 || self.reload_flag {
            self.divider = self.divider_period;
            self.reload_flag = false;
        } else {
            self.divider -= 1;
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub(crate) struct PulseChannel {
    timer: PulsePhaseTimer,
    duty_cycle: DutyCycle,
    length_counter: LengthCounter,
    envelope: Envelope,
    sweep: PulseSweep,
}

impl PulseChannel {
    pub(crate) fn new_channel_1() -> Self {
        Self {
            timer: PulsePhaseTimer::new(),
            duty_cycle: DutyCycle::OneEighth,
            length_counter: LengthCounter::new(LengthCounterChannel::Pulse1),
            envelope: Envelope::new(),
            sweep: PulseSweep::new(SweepNegateBehavior::OnesComplement),
        }
    }

    pub(crate) fn new_channel_2() -> Self {
        Self {
            timer: PulsePhaseTimer::new(),
            duty_cycle: DutyCycle::OneEighth,
            length_counter: LengthCounter::new(LengthCounterChannel::Pulse2),
            envelope: Envelope::new(),
            sweep: PulseSweep::new(SweepNegateBehavior::TwosComplement),
        }
    }

    pub(crate) fn process_vol_update(&mut self, vol_value: u8) {
        self.duty_cycle = DutyCycle::from_vol(vol_value);
        self.length_counter.set_halted(vol_value.bit(5));
        self.envelope.process_vol_update(vol_value);
    }

    pub(crate) fn process_sweep_update(&mut self, sweep_value: u8) {
        self.sweep.process_sweep_update(sweep_value, self.timer.divider_period);
    }

    pub(crate) fn process_lo_update(&mut self, lo_value: u8) {
        self.timer.process_lo_update(lo_value);
    }

    pub(crate) fn process_hi_update(&mut self, hi_value: u8) {
        self.timer.process_hi_update(hi_value);
        self.length_counter.process_hi_update(hi_value);
        self.envelope.process_hi_update();
    }

    pub(crate) fn process_snd_chn_update(&mut self, snd_chn_value: u8) {
        self.length_counter.process_snd_chn_update(snd_chn_value);
    }

    pub(crate) fn clock_quarter_frame(&mut self) {
        self.envelope.clock();
    }

    pub(crate) fn clock_half_frame(&mut self) {
        self.length_counter.clock();
        self.sweep.clock(&mut self.timer.divider_period);
    }

    pub(crate) fn tick_cpu(&mut self) {
        self.timer.tick_cpu(true);
    }

    pub(crate) fn length_counter_nonzero(&self) -> bool {
        self.length_counter.counter > 0
    }

    pub(crate) fn sample(&self) -> u8 {
        if self.length_counter.counter == 0 || self.sweep.is_channel_muted(self.timer.divider_period)
        {
            return 0;
        }

        let wave_step = self.duty_cycle.waveform()[self.timer.phase as usize];
        wave_step * self.envelope.volume()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_channel_1() -> PulseChannel {
        let mut channel = PulseChannel::new_channel_1();
        channel.process_snd_chn_update(0x01);
        // Constant volume 15, one-half duty
        channel.process_vol_update(0x9F);
        channel
    }

    #[test]
    fn muted_below_period_8() {
        let mut channel = enabled_channel_1();
        channel.process_lo_update(0x07);
        channel.process_hi_update(0x00);

        // Advance to a high phase of the duty cycle
        for _ in 0..4 {
            channel.tick_cpu();
            channel.tick_cpu();
        }
        assert_eq!(channel.sample(), 0);

        channel.process_lo_update(0x08);
        channel.process_hi_update(0x00);
        for _ in 0..18 {
            channel.tick_cpu();
        }
        assert_ne!(channel.sample(), 0);
    }

    #[test]
    fn sweep_target_overflow_mutes() {
        let mut channel = enabled_channel_1();
        channel.process_lo_update(0xFF);
        channel.process_hi_update(0x07);

        // Shift 0, no negate: target = 2 * period > 0x7FF
        channel.process_sweep_update(0x80);
        assert_eq!(channel.sample(), 0);
    }

    #[test]
    fn pulse_1_sweep_negate_uses_ones_complement() {
        let sweep = PulseSweep {
            negate_flag: true,
            shift: 1,
            ..PulseSweep::new(SweepNegateBehavior::OnesComplement)
        };
        // period + !(period >> 1) = 0x400 + !0x200 = 0x400 - 0x201
        assert_eq!(sweep.compute_target_period(0x400), 0x400 - 0x201);

        let sweep = PulseSweep {
            negate_flag: true,
            shift: 1,
            ..PulseSweep::new(SweepNegateBehavior::TwosComplement)
        };
        assert_eq!(sweep.compute_target_period(0x400), 0x400 - 0x200);
    }

    #[test]
    fn sweep_clock_slides_period() {
        let mut channel = enabled_channel_1();
        channel.process_lo_update(0x00);
        channel.process_hi_update(0x01);

        // Enabled, period 0, shift 1, no negate: period grows by period >> 1
        channel.process_sweep_update(0x81);
        channel.clock_half_frame();
        assert_eq!(channel.timer.divider_period, 0x100 + 0x80);
    }
}
