//! Fixed-size playback window handed from the jitter buffer to the device.

use std::time::Duration;

/// Samples per playback buffer: 320 ms at 24 kHz.
pub const PLAYBACK_CHUNK_SAMPLES: usize = 7_680;

/// A contiguous block of mono f32 samples bound to one hardware source.
///
/// Owned by the jitter buffer until it is scheduled, then by the device for
/// its playback lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Playback length, computed in integer nanoseconds so that consecutive
    /// buffers abut exactly on the timeline.
    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Exact duration of `samples` frames at `sample_rate`.
pub fn samples_to_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(samples as u64 * 1_000_000_000 / sample_rate as u64)
}
