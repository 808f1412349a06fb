//! In-memory playback device with a manually advanced clock.
//!
//! `VirtualDevice` is a cheap clonable handle: hand one clone to the
//! `AudioStreamer` and keep another to move time forward and inspect what was
//! scheduled. Nothing is rendered.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{PlaybackDevice, SourceId};
use crate::buffering::chunk::PlaybackBuffer;
use crate::error::{AylaError, Result};

/// One source as seen by the device.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    pub start: Duration,
    pub duration: Duration,
    pub samples: usize,
    pub stopped: bool,
}

impl ScheduledSource {
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }
}

/// Gain-stage operations, in call order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GainEvent {
    Set { at: Duration, gain: f32 },
    Ramp { at: Duration, target: f32, over: Duration },
    Reconnect { at: Duration },
}

#[derive(Debug)]
struct State {
    now: Duration,
    suspended: bool,
    next_id: u64,
    sources: Vec<ScheduledSource>,
    reported: Vec<SourceId>,
    gain: f32,
    gain_events: Vec<GainEvent>,
}

#[derive(Debug, Clone)]
pub struct VirtualDevice {
    state: Arc<Mutex<State>>,
}

impl Default for VirtualDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualDevice {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                now: Duration::ZERO,
                suspended: false,
                next_id: 0,
                sources: Vec::new(),
                reported: Vec::new(),
                gain: 1.0,
                gain_events: Vec::new(),
            })),
        }
    }

    /// Move the device clock forward. A suspended clock does not move.
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock();
        if !state.suspended {
            state.now += by;
        }
    }

    /// Simulate the host auto-suspending the output device.
    pub fn suspend(&self) {
        self.state.lock().suspended = true;
    }

    /// Every source ever scheduled, in scheduling order.
    pub fn scheduled(&self) -> Vec<ScheduledSource> {
        self.state.lock().sources.clone()
    }

    /// Sources that are neither stopped nor finished at the current time.
    pub fn active_sources(&self) -> Vec<ScheduledSource> {
        let state = self.state.lock();
        state
            .sources
            .iter()
            .filter(|s| !s.stopped && s.end() > state.now)
            .cloned()
            .collect()
    }

    pub fn gain(&self) -> f32 {
        self.state.lock().gain
    }

    pub fn gain_events(&self) -> Vec<GainEvent> {
        self.state.lock().gain_events.clone()
    }
}

impl PlaybackDevice for VirtualDevice {
    fn current_time(&self) -> Duration {
        self.state.lock().now
    }

    fn is_suspended(&self) -> bool {
        self.state.lock().suspended
    }

    fn resume(&mut self) {
        self.state.lock().suspended = false;
    }

    fn schedule(&mut self, buffer: PlaybackBuffer, start_at: Duration) -> SourceId {
        let mut state = self.state.lock();
        let id = SourceId(state.next_id);
        state.next_id += 1;
        state.sources.push(ScheduledSource {
            id,
            start: start_at,
            duration: buffer.duration(),
            samples: buffer.len(),
            stopped: false,
        });
        id
    }

    fn stop_source(&mut self, id: SourceId) -> Result<()> {
        let mut state = self.state.lock();
        let now = state.now;
        let source = state
            .sources
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(AylaError::SourceAlreadyStopped(id.0))?;
        if source.stopped || source.end() <= now {
            return Err(AylaError::SourceAlreadyStopped(id.0));
        }
        source.stopped = true;
        Ok(())
    }

    fn take_ended(&mut self) -> Vec<SourceId> {
        let mut state = self.state.lock();
        let now = state.now;
        let mut ended: Vec<(Duration, SourceId)> = state
            .sources
            .iter()
            .filter(|s| !s.stopped && s.end() <= now && !state.reported.contains(&s.id))
            .map(|s| (s.end(), s.id))
            .collect();
        ended.sort();
        state.reported.extend(ended.iter().map(|(_, id)| *id));
        ended.into_iter().map(|(_, id)| id).collect()
    }

    fn set_gain(&mut self, gain: f32) {
        let mut state = self.state.lock();
        let at = state.now;
        state.gain = gain;
        state.gain_events.push(GainEvent::Set { at, gain });
    }

    fn ramp_gain(&mut self, target: f32, over: Duration) {
        let mut state = self.state.lock();
        let at = state.now;
        state.gain = target;
        state.gain_events.push(GainEvent::Ramp { at, target, over });
    }

    fn reconnect(&mut self) {
        let mut state = self.state.lock();
        let at = state.now;
        state.gain_events.push(GainEvent::Reconnect { at });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn buffer_ms(v: usize) -> PlaybackBuffer {
        PlaybackBuffer::new(vec![0.0; v * 24], 24_000)
    }

    #[test]
    fn reports_each_ended_source_once() {
        let mut device = VirtualDevice::new();
        let a = device.schedule(buffer_ms(100), ms(0));
        let b = device.schedule(buffer_ms(100), ms(100));

        device.advance(ms(150));
        assert_eq!(device.take_ended(), vec![a]);
        assert!(device.take_ended().is_empty());

        device.advance(ms(100));
        assert_eq!(device.take_ended(), vec![b]);
    }

    #[test]
    fn stopping_a_finished_source_is_an_error() {
        let mut device = VirtualDevice::new();
        let a = device.schedule(buffer_ms(100), ms(0));
        let b = device.schedule(buffer_ms(100), ms(100));
        device.advance(ms(120));

        assert!(matches!(
            device.stop_source(a),
            Err(AylaError::SourceAlreadyStopped(0))
        ));
        device.stop_source(b).expect("b is still playing");
        assert!(device.stop_source(b).is_err(), "double stop is reported");

        device.advance(ms(500));
        assert!(
            !device.take_ended().contains(&b),
            "stopped sources never report a natural end"
        );
    }

    #[test]
    fn suspended_clock_does_not_advance() {
        let mut device = VirtualDevice::new();
        device.suspend();
        device.advance(ms(100));
        assert_eq!(device.current_time(), Duration::ZERO);
        device.resume();
        device.advance(ms(100));
        assert_eq!(device.current_time(), ms(100));
    }
}
