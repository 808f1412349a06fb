//! Jitter buffer: turns bursty PCM chunks into a gapless playback timeline.
//!
//! ## Scheduling pass
//!
//! ```text
//! submit(bytes) ─► pending ─► 7680-sample chunks ─► ready queue
//!                                                      │
//!                   while ready && scheduled < now + lookahead:
//!                       device.schedule(chunk, max(scheduled, now))
//!                       scheduled += chunk.duration
//!                                                      │
//!       ready empty + complete ──► stop playing
//!       ready empty             ──► underrun poll every 100 ms
//!       otherwise               ──► next pass at scheduled - now - lead
//! ```
//!
//! The pass never loops on the wall clock. Every deferral is a deadline in a
//! `TimerSet` and fires from `tick()`, which re-samples the device clock.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{PlaybackDevice, SourceId};
use crate::{
    buffering::chunk::{PlaybackBuffer, PLAYBACK_CHUNK_SAMPLES},
    codec::{pcm16_to_f32, PLAYBACK_SAMPLE_RATE},
    error::{AylaError, Result},
    ipc::events::{PlaybackEvent, PlaybackEventKind},
    timer::TimerSet,
};

/// Broadcast channel capacity for playback events.
const BROADCAST_CAP: usize = 256;

/// Jitter buffer tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamerConfig {
    /// Sample rate of submitted PCM (Hz). Default: 24000.
    pub sample_rate: u32,
    /// Samples per scheduled buffer. Default: 7680 (320 ms at 24 kHz).
    pub chunk_samples: usize,
    /// Delay before the first buffer of a stream starts. Default: 100 ms.
    pub initial_buffer_ms: u64,
    /// How far ahead of the device clock buffers are scheduled. Default: 200 ms.
    pub lookahead_ms: u64,
    /// Underrun watch interval. Default: 100 ms.
    pub underrun_poll_ms: u64,
    /// How long before the timeline runs dry the next pass fires. Default: 50 ms.
    pub reschedule_lead_ms: u64,
    /// Gain fade-out on `stop()`. Default: 100 ms.
    pub stop_ramp_ms: u64,
    /// Delay before the gain stage is re-armed after `stop()`. Default: 100 ms.
    pub rearm_delay_ms: u64,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            sample_rate: PLAYBACK_SAMPLE_RATE,
            chunk_samples: PLAYBACK_CHUNK_SAMPLES,
            initial_buffer_ms: 100,
            lookahead_ms: 200,
            underrun_poll_ms: 100,
            reschedule_lead_ms: 50,
            stop_ramp_ms: 100,
            rearm_delay_ms: 100,
        }
    }
}

impl StreamerConfig {
    /// Reject configurations that would underrun on every poll.
    ///
    /// # Errors
    /// `AylaError::InvalidConfig` when the lookahead does not exceed both the
    /// poll interval and the initial buffering delay, or a size is zero.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.chunk_samples == 0 {
            return Err(AylaError::InvalidConfig(
                "sample_rate and chunk_samples must be non-zero".into(),
            ));
        }
        if self.underrun_poll_ms == 0 {
            return Err(AylaError::InvalidConfig(
                "underrun_poll_ms must be non-zero".into(),
            ));
        }
        if self.lookahead_ms <= self.underrun_poll_ms {
            return Err(AylaError::InvalidConfig(format!(
                "lookahead ({} ms) must exceed the underrun poll interval ({} ms)",
                self.lookahead_ms, self.underrun_poll_ms
            )));
        }
        if self.lookahead_ms <= self.initial_buffer_ms {
            return Err(AylaError::InvalidConfig(format!(
                "lookahead ({} ms) must exceed the initial buffering delay ({} ms)",
                self.lookahead_ms, self.initial_buffer_ms
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamerTimer {
    Pass,
    UnderrunPoll,
    RearmGain,
}

/// Jitter buffer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamerSnapshot {
    pub chunks_submitted: usize,
    pub chunks_dropped: usize,
    pub buffers_scheduled: usize,
    pub underruns: usize,
    pub completions: usize,
}

/// Jitter-buffered PCM player bound to one output device.
pub struct AudioStreamer<D: PlaybackDevice = Box<dyn PlaybackDevice>> {
    config: StreamerConfig,
    device: D,
    /// Samples not yet forming a full chunk.
    pending: Vec<f32>,
    /// Full (or final partial) chunks waiting to be scheduled.
    ready: VecDeque<PlaybackBuffer>,
    /// Device time at which the next buffer starts.
    scheduled_time: Duration,
    is_playing: bool,
    is_stream_complete: bool,
    /// Scheduled sources that may still be playing.
    in_flight: Vec<SourceId>,
    /// The only source whose end can complete the stream.
    end_of_queue: Option<SourceId>,
    timers: TimerSet<StreamerTimer>,
    volume: f32,
    events_tx: broadcast::Sender<PlaybackEvent>,
    seq: u64,
    stats: StreamerSnapshot,
}

impl<D: PlaybackDevice> AudioStreamer<D> {
    /// Create a streamer. Nothing plays until the first `submit`.
    ///
    /// # Errors
    /// `AylaError::InvalidConfig` if `config` fails validation.
    pub fn new(config: StreamerConfig, device: D) -> Result<Self> {
        config.validate()?;
        let (events_tx, _) = broadcast::channel(BROADCAST_CAP);
        let scheduled_time = device.current_time();
        Ok(Self {
            config,
            device,
            pending: Vec::new(),
            ready: VecDeque::new(),
            scheduled_time,
            is_playing: false,
            is_stream_complete: false,
            in_flight: Vec::new(),
            end_of_queue: None,
            timers: TimerSet::new(),
            volume: 1.0,
            events_tx,
            seq: 0,
            stats: StreamerSnapshot::default(),
        })
    }

    /// Subscribe to Started / Progress / Completed events.
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events_tx.subscribe()
    }

    /// Append PCM16 LE bytes to the stream.
    ///
    /// # Errors
    /// `AylaError::MalformedAudioChunk` for an odd byte count. The chunk is
    /// dropped and the stream carries on.
    pub fn submit(&mut self, pcm: &[u8]) -> Result<()> {
        match pcm16_to_f32(pcm) {
            Ok(samples) => {
                self.submit_samples(&samples);
                Ok(())
            }
            Err(e) => {
                self.stats.chunks_dropped += 1;
                warn!(bytes = pcm.len(), "dropping malformed audio chunk: {e}");
                Err(e)
            }
        }
    }

    /// Append already-normalized samples to the stream.
    pub fn submit_samples(&mut self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        if self.device.is_suspended() {
            debug!("output device suspended, resuming before scheduling");
            self.device.resume();
        }

        self.stats.chunks_submitted += 1;
        self.pending.extend_from_slice(samples);
        let chunk = self.config.chunk_samples;
        while self.pending.len() >= chunk {
            let rest = self.pending.split_off(chunk);
            let full = std::mem::replace(&mut self.pending, rest);
            self.ready
                .push_back(PlaybackBuffer::new(full, self.config.sample_rate));
        }

        if !self.is_playing {
            self.is_playing = true;
            self.is_stream_complete = false;
            let now = self.device.current_time();
            let warm_start = now + Duration::from_millis(self.config.initial_buffer_ms);
            self.scheduled_time = self.scheduled_time.max(warm_start);
            info!(
                start_ms = self.scheduled_time.as_secs_f64() * 1000.0,
                "playback stream started"
            );
            self.emit(PlaybackEventKind::Started, self.scheduled_time);
            self.schedule_pass();
        }
    }

    /// Signal that no more audio will arrive for this stream.
    ///
    /// The sub-chunk remainder is flushed as a final short buffer. With
    /// nothing left to play, `Completed` fires immediately.
    pub fn mark_complete(&mut self) {
        self.is_stream_complete = true;
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            debug!(samples = tail.len(), "flushing partial tail chunk");
            self.ready
                .push_back(PlaybackBuffer::new(tail, self.config.sample_rate));
        }

        if self.ready.is_empty() && self.end_of_queue.is_none() {
            self.is_playing = false;
            self.timers.cancel_where(|t| *t == StreamerTimer::UnderrunPoll);
            self.complete_stream();
        } else if self.is_playing {
            self.schedule_pass();
        }
    }

    /// Advance the streamer: observe finished sources, then fire due timers.
    pub fn tick(&mut self) {
        for id in self.device.take_ended() {
            self.on_source_ended(id);
        }

        let now = self.device.current_time();
        let mark = self.timers.mark();
        while let Some((_, timer)) = self.timers.pop_due(now, mark) {
            match timer {
                StreamerTimer::Pass => self.schedule_pass(),
                StreamerTimer::UnderrunPoll => {
                    if self.ready.is_empty() {
                        let next = now + Duration::from_millis(self.config.underrun_poll_ms);
                        self.timers.schedule(next, StreamerTimer::UnderrunPoll);
                    } else {
                        debug!(ready = self.ready.len(), "underrun poll found audio");
                        self.schedule_pass();
                    }
                }
                StreamerTimer::RearmGain => {
                    self.device.reconnect();
                    self.device.set_gain(self.volume);
                    debug!(gain = self.volume, "output stage re-armed");
                }
            }
        }
    }

    /// Hard stop: drop everything queued, silence the output, re-arm shortly after.
    ///
    /// Safe to call repeatedly and after playback has ended on its own.
    pub fn stop(&mut self) {
        let now = self.device.current_time();
        let dropped = self.ready.len();

        self.is_playing = false;
        self.is_stream_complete = false;
        self.ready.clear();
        self.pending.clear();
        for id in self.in_flight.drain(..) {
            if let Err(e) = self.device.stop_source(id) {
                debug!(%id, "source already finished: {e}");
            }
        }
        self.end_of_queue = None;
        self.timers.clear();
        self.scheduled_time = now;

        self.emit(PlaybackEventKind::Progress, now);
        self.device
            .ramp_gain(0.0, Duration::from_millis(self.config.stop_ramp_ms));
        self.timers.schedule(
            now + Duration::from_millis(self.config.rearm_delay_ms),
            StreamerTimer::RearmGain,
        );
        info!(dropped_chunks = dropped, "playback stopped");
    }

    /// Wake the device and prepare the timeline for a new stream.
    pub fn resume(&mut self) {
        if self.device.is_suspended() {
            info!("resuming suspended output device");
            self.device.resume();
        }
        self.is_stream_complete = false;
        let now = self.device.current_time();
        self.scheduled_time = self
            .scheduled_time
            .max(now + Duration::from_millis(self.config.initial_buffer_ms));
        self.device.set_gain(self.volume);
    }

    /// Set the single gain stage, clamped to [0, 1].
    pub fn set_volume(&mut self, gain: f32) {
        self.volume = gain.clamp(0.0, 1.0);
        self.device.set_gain(self.volume);
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn is_stream_complete(&self) -> bool {
        self.is_stream_complete
    }

    pub fn scheduled_time(&self) -> Duration {
        self.scheduled_time
    }

    /// Chunks waiting to be scheduled.
    pub fn queued_chunks(&self) -> usize {
        self.ready.len()
    }

    /// Samples buffered below the chunk size.
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    /// Whether any deferred pass, poll or re-arm is outstanding.
    pub fn has_pending_timers(&self) -> bool {
        !self.timers.is_empty()
    }

    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn snapshot(&self) -> StreamerSnapshot {
        self.stats
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn schedule_pass(&mut self) {
        let now = self.device.current_time();
        let horizon = now + Duration::from_millis(self.config.lookahead_ms);

        while self.scheduled_time < horizon {
            let Some(buffer) = self.ready.pop_front() else {
                break;
            };
            let start = self.scheduled_time.max(now);
            let duration = buffer.duration();
            let samples = buffer.len();
            let id = self.device.schedule(buffer, start);
            self.in_flight.push(id);
            self.end_of_queue = self.ready.is_empty().then_some(id);
            self.scheduled_time = start + duration;
            self.stats.buffers_scheduled += 1;
            debug!(
                %id,
                samples,
                start_ms = start.as_secs_f64() * 1000.0,
                "buffer scheduled"
            );
        }

        self.emit(PlaybackEventKind::Progress, now);

        if self.ready.is_empty() {
            if self.is_stream_complete {
                self.is_playing = false;
                self.timers.cancel_where(|t| *t == StreamerTimer::UnderrunPoll);
            } else if !self.timers.any(|t| *t == StreamerTimer::UnderrunPoll) {
                let next = now + Duration::from_millis(self.config.underrun_poll_ms);
                self.timers.schedule(next, StreamerTimer::UnderrunPoll);
            }
        } else {
            self.timers.cancel_where(|t| {
                matches!(t, StreamerTimer::Pass | StreamerTimer::UnderrunPoll)
            });
            let lead = Duration::from_millis(self.config.reschedule_lead_ms);
            let delay = self.scheduled_time.saturating_sub(now).saturating_sub(lead);
            self.timers.schedule(now + delay, StreamerTimer::Pass);
        }
    }

    fn on_source_ended(&mut self, id: SourceId) {
        self.in_flight.retain(|s| *s != id);
        if self.end_of_queue != Some(id) {
            return;
        }
        self.end_of_queue = None;
        if self.is_stream_complete && self.ready.is_empty() {
            self.complete_stream();
        } else {
            self.stats.underruns += 1;
            debug!(%id, ready = self.ready.len(), "timeline ran dry before stream completion");
        }
    }

    fn complete_stream(&mut self) {
        self.stats.completions += 1;
        let now = self.device.current_time();
        info!("playback stream completed");
        self.emit(PlaybackEventKind::Completed, now);
    }

    fn emit(&mut self, kind: PlaybackEventKind, at: Duration) {
        let event = PlaybackEvent {
            seq: self.seq,
            kind,
            device_time_ms: at.as_secs_f64() * 1000.0,
            is_playing: self.is_playing,
        };
        self.seq = self.seq.saturating_add(1);
        let _ = self.events_tx.send(event);
    }
}
