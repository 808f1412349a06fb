//! Sample buffers shared between the engine and real-time audio callbacks.
//!
//! Uses `ringbuf::HeapRb<f32>` which provides a wait-free `push_slice` /
//! `pop_slice` safe to call from a cpal callback. The engine side (non-RT)
//! produces playback samples and consumes captured samples; the callbacks do
//! the opposite.

pub mod chunk;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half of an f32 sample ring.
pub type SampleProducer = ringbuf::HeapProd<f32>;

/// Consumer half of an f32 sample ring.
pub type SampleConsumer = ringbuf::HeapCons<f32>;

/// Capture ring: 2^20 samples ≈ 21.8 s at 48 kHz, enough to ride out a
/// stalled relay without dropping microphone audio.
pub const CAPTURE_RING_CAPACITY: usize = 1 << 20;

/// Playback ring: 2^18 samples ≈ 5.4 s at 48 kHz. The jitter buffer only
/// schedules 200 ms ahead, so this never fills in practice.
pub const PLAYBACK_RING_CAPACITY: usize = 1 << 18;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_sample_ring(capacity: usize) -> (SampleProducer, SampleConsumer) {
    HeapRb::<f32>::new(capacity).split()
}
