//! Speech playback: the jitter buffer and the device seam it schedules onto.
//!
//! `PlaybackDevice` is the only extensibility point: `VirtualDevice` (manually
//! advanced clock, used in tests and dry runs) and `CpalPlayback` (real output)
//! implement it, and `AudioStreamer` never touches anything else.

pub mod streamer;
pub mod virtual_device;

#[cfg(feature = "audio-cpal")]
pub mod cpal_output;

pub use streamer::{AudioStreamer, StreamerConfig, StreamerSnapshot};
pub use virtual_device::VirtualDevice;

#[cfg(feature = "audio-cpal")]
pub use cpal_output::CpalPlayback;

use std::fmt;
use std::time::Duration;

use crate::buffering::chunk::PlaybackBuffer;
use crate::error::Result;

/// Identifier of one scheduled hardware source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "src-{}", self.0)
    }
}

/// Contract for an output device with its own clock.
///
/// All times are device time: the duration since the device clock started.
pub trait PlaybackDevice: Send + 'static {
    /// Current device time. Source of truth for "now" during scheduling.
    fn current_time(&self) -> Duration;

    /// Whether the host has suspended the device clock.
    fn is_suspended(&self) -> bool;

    /// Un-suspend the device clock. No-op when already running.
    fn resume(&mut self);

    /// Schedule `buffer` to start playing at device time `start_at`.
    fn schedule(&mut self, buffer: PlaybackBuffer, start_at: Duration) -> SourceId;

    /// Stop and disconnect a scheduled source.
    ///
    /// # Errors
    /// `AylaError::SourceAlreadyStopped` if the source already finished or
    /// was stopped. Callers treat this as a no-op.
    fn stop_source(&mut self, id: SourceId) -> Result<()>;

    /// Sources that finished playing since the previous call, in end order.
    fn take_ended(&mut self) -> Vec<SourceId>;

    /// Set the output gain immediately.
    fn set_gain(&mut self, gain: f32);

    /// Ramp the output gain linearly to `target` over `over`.
    fn ramp_gain(&mut self, target: f32, over: Duration);

    /// Reconnect the gain stage to the output after a hard stop.
    fn reconnect(&mut self);
}

impl<D: PlaybackDevice + ?Sized> PlaybackDevice for Box<D> {
    fn current_time(&self) -> Duration {
        (**self).current_time()
    }

    fn is_suspended(&self) -> bool {
        (**self).is_suspended()
    }

    fn resume(&mut self) {
        (**self).resume()
    }

    fn schedule(&mut self, buffer: PlaybackBuffer, start_at: Duration) -> SourceId {
        (**self).schedule(buffer, start_at)
    }

    fn stop_source(&mut self, id: SourceId) -> Result<()> {
        (**self).stop_source(id)
    }

    fn take_ended(&mut self) -> Vec<SourceId> {
        (**self).take_ended()
    }

    fn set_gain(&mut self, gain: f32) {
        (**self).set_gain(gain)
    }

    fn ramp_gain(&mut self, target: f32, over: Duration) {
        (**self).ramp_gain(target, over)
    }

    fn reconnect(&mut self) {
        (**self).reconnect()
    }
}
