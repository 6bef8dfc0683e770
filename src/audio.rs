//! Audio plumbing between the emulation thread and the host's audio callback.
//!
//! The APU produces one mixed sample whenever the downsample counter fires;
//! those samples cross the thread boundary through a bounded lock-free
//! single-producer / single-consumer ring. The producer side lives in the
//! emulator, the consumer side is handed to the host exactly once.

use bincode::{Decode, Encode};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

// 236.25MHz / 11 / 12
pub const NES_AUDIO_FREQUENCY: f64 = 1_789_772.727_272_727_3;

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

// Must hold a comfortable number of audio callbacks' worth of samples; at
// 44.1kHz this is roughly a third of a second.
const RING_CAPACITY: usize = 16384;

struct SampleRing {
    buffer: Box<[AtomicU32]>,
    mask: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "ring capacity must be a power of two: {capacity}");

        let buffer: Vec<AtomicU32> = (0..capacity).map(|_| AtomicU32::new(0)).collect();
        Self {
            buffer: buffer.into_boxed_slice(),
            mask: capacity - 1,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }
}

/// Producer half of the sample ring. Owned by the emulator; pushes are
/// non-blocking and overwrite the oldest sample when the ring is full.
pub struct AudioSender {
    ring: Arc<SampleRing>,
}

impl AudioSender {
    pub fn push(&self, sample: f32) {
        let ring = &self.ring;
        let tail = ring.tail.load(Ordering::Relaxed);
        let head = ring.head.load(Ordering::Acquire);

        if tail.wrapping_sub(head) == ring.buffer.len() {
            // Full: advance head past the oldest sample. The consumer may pop
            // it concurrently, in which case the slot is free either way.
            let _ = ring.head.compare_exchange(
                head,
                head.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Relaxed,
            );
        }

        ring.buffer[tail & ring.mask].store(sample.to_bits(), Ordering::Relaxed);
        ring.tail.store(tail.wrapping_add(1), Ordering::Release);
    }
}

/// Consumer half of the sample ring, for the host audio callback.
pub struct AudioReceiver {
    ring: Arc<SampleRing>,
}

impl AudioReceiver {
    /// Pop the oldest sample, or None if the ring is empty.
    pub fn pop(&self) -> Option<f32> {
        let ring = &self.ring;
        loop {
            let head = ring.head.load(Ordering::Acquire);
            let tail = ring.tail.load(Ordering::Acquire);
            if head == tail {
                return None;
            }

            let bits = ring.buffer[head & ring.mask].load(Ordering::Relaxed);

            // The producer may have advanced head to reclaim this slot; retry
            // from the new head if so.
            if ring
                .head
                .compare_exchange(head, head.wrapping_add(1), Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return Some(f32::from_bits(bits));
            }
        }
    }

    /// Fill an output buffer, zero-padding whatever the ring cannot supply.
    pub fn fill(&self, out: &mut [f32]) {
        for slot in out {
            *slot = self.pop().unwrap_or(0.0);
        }
    }

    /// Number of samples currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        let head = self.ring.head.load(Ordering::Acquire);
        let tail = self.ring.tail.load(Ordering::Acquire);
        tail.wrapping_sub(head)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn new_sample_queue() -> (AudioSender, AudioReceiver) {
    let ring = Arc::new(SampleRing::new(RING_CAPACITY));
    (AudioSender { ring: Arc::clone(&ring) }, AudioReceiver { ring })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownsampleAction {
    None,
    OutputSample,
}

/// Decides which CPU-rate samples become host-rate output samples by tracking
/// the fractional ratio between the APU clock and the output frequency.
#[derive(Debug, Clone, Encode, Decode)]
pub struct DownsampleCounter {
    sample_count: u64,
    next_output_count: u64,
    next_output_count_float: f64,
    output_count_increment: f64,
}

impl DownsampleCounter {
    #[must_use]
    pub fn new(output_frequency: u32) -> Self {
        let output_count_increment = NES_AUDIO_FREQUENCY / f64::from(output_frequency);
        Self {
            sample_count: 0,
            next_output_count: output_count_increment.round() as u64,
            next_output_count_float: output_count_increment,
            output_count_increment,
        }
    }

    #[must_use]
    pub fn increment(&mut self) -> DownsampleAction {
        self.sample_count += 1;

        if self.sample_count == self.next_output_count {
            self.next_output_count_float += self.output_count_increment;
            self.next_output_count = self.next_output_count_float.round() as u64;

            DownsampleAction::OutputSample
        } else {
            DownsampleAction::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_preserves_fifo_order() {
        let (sender, receiver) = new_sample_queue();

        for i in 0..100 {
            sender.push(i as f32);
        }
        for i in 0..100 {
            assert_eq!(receiver.pop(), Some(i as f32));
        }
        assert_eq!(receiver.pop(), None);
    }

    #[test]
    fn overflow_drops_oldest() {
        let (sender, receiver) = new_sample_queue();

        for i in 0..(RING_CAPACITY + 10) {
            sender.push(i as f32);
        }

        assert_eq!(receiver.len(), RING_CAPACITY);
        // The first 10 samples were overwritten.
        assert_eq!(receiver.pop(), Some(10.0));
    }

    #[test]
    fn fill_zero_pads_on_underrun() {
        let (sender, receiver) = new_sample_queue();
        sender.push(0.25);

        let mut out = [1.0_f32; 4];
        receiver.fill(&mut out);
        assert_eq!(out, [0.25, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn downsample_counter_hits_target_rate() {
        let mut counter = DownsampleCounter::new(44_100);

        let mut emitted = 0u32;
        for _ in 0..NES_AUDIO_FREQUENCY as u64 {
            if counter.increment() == DownsampleAction::OutputSample {
                emitted += 1;
            }
        }

        // One second of CPU cycles should produce one second of output audio,
        // within a sample.
        assert!((i64::from(emitted) - 44_100).abs() <= 1, "emitted {emitted} samples");
    }
}
