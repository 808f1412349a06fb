//! Real output device: a cpal stream fed by an SPSC ring buffer.
//!
//! ## Clock
//!
//! The device clock is the number of frames the output callback has rendered,
//! silence included. Scheduling a buffer pads the ring with silence up to its
//! start frame, so "start at t" means "the callback reaches this sample at t".
//!
//! ## Rate conversion
//!
//! Abutting buffers share one converter run, so there is no reset or padding
//! at the join. The few frames the converter still owes at the end of a
//! buffer count toward its end frame and are pushed ahead of the next one.
//! They are flushed on their own when the run is broken (gap, stop, rate
//! change) or the ring is about to drain.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send`, but `PlaybackDevice` must be `Send`. The stream
//! is therefore opened and owned by a dedicated `ayla-playback` thread; a
//! bounded channel returns the negotiated rate (or the open error) to `open`.
//! The callback only touches the ring consumer and atomics.

use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, SampleFormat, SizedSample, Stream, StreamConfig,
};
use tracing::{debug, error, info, warn};

use super::{PlaybackDevice, SourceId};
use crate::{
    audio::resample::RateConverter,
    buffering::{
        chunk::PlaybackBuffer, create_sample_ring, Consumer, Producer, SampleConsumer,
        SampleProducer, PLAYBACK_RING_CAPACITY,
    },
    codec::PLAYBACK_SAMPLE_RATE,
    error::{AylaError, Result},
};

/// Input block for the 24 kHz -> device-rate converter (20 ms).
const RESAMPLE_BLOCK: usize = 480;

/// Owed converter frames are pushed once less than this much audio is queued.
const TAIL_FLUSH_MS: u64 = 40;

/// State shared with the output callback.
struct Shared {
    frames_played: AtomicU64,
    running: AtomicBool,
    suspended: AtomicBool,
    /// Ring samples before this index are discarded unplayed.
    discard_until: AtomicU64,
    /// Ring samples consumed by the callback, played or discarded.
    samples_popped: AtomicU64,
    /// Target gain as `f32` bits.
    gain_target: AtomicU32,
    gain_ramp_frames: AtomicU32,
    /// Bumped on every gain change so the callback picks it up once.
    gain_generation: AtomicU32,
}

impl Shared {
    fn set_gain(&self, target: f32, ramp_frames: u32) {
        self.gain_target.store(target.to_bits(), Ordering::Relaxed);
        self.gain_ramp_frames.store(ramp_frames, Ordering::Relaxed);
        self.gain_generation.fetch_add(1, Ordering::Release);
    }
}

/// Callback-local gain follower.
struct GainStage {
    current: f32,
    step: f32,
    remaining: u32,
    target: f32,
    seen_generation: u32,
}

impl GainStage {
    fn new() -> Self {
        Self {
            current: 1.0,
            step: 0.0,
            remaining: 0,
            target: 1.0,
            seen_generation: 0,
        }
    }

    fn sync(&mut self, shared: &Shared) {
        let generation = shared.gain_generation.load(Ordering::Acquire);
        if generation == self.seen_generation {
            return;
        }
        self.seen_generation = generation;
        self.target = f32::from_bits(shared.gain_target.load(Ordering::Relaxed));
        self.remaining = shared.gain_ramp_frames.load(Ordering::Relaxed);
        if self.remaining == 0 {
            self.current = self.target;
        } else {
            self.step = (self.target - self.current) / self.remaining as f32;
        }
    }

    fn next(&mut self) -> f32 {
        if self.remaining > 0 {
            self.remaining -= 1;
            self.current = if self.remaining == 0 {
                self.target
            } else {
                self.current + self.step
            };
        }
        self.current
    }
}

#[derive(Debug, Clone, Copy)]
struct SourceSpan {
    id: SourceId,
    end_frame: u64,
    stopped: bool,
    reported: bool,
}

/// Producer side of the output ring: device-frame bookkeeping and the
/// 24 kHz -> device-rate converter run.
struct RingWriter {
    producer: SampleProducer,
    converter: RateConverter,
    converter_from: u32,
    device_rate: u32,
    /// Device frame at which the next pushed sample will play.
    write_cursor: u64,
    /// Ring samples ever pushed.
    pushed_total: u64,
}

impl RingWriter {
    fn new(producer: SampleProducer, device_rate: u32) -> Result<Self> {
        Ok(Self {
            producer,
            converter: RateConverter::new(PLAYBACK_SAMPLE_RATE, device_rate, RESAMPLE_BLOCK)?,
            converter_from: PLAYBACK_SAMPLE_RATE,
            device_rate,
            write_cursor: 0,
            pushed_total: 0,
        })
    }

    fn push(&mut self, samples: &[f32]) {
        let written = self.producer.push_slice(samples);
        if written < samples.len() {
            warn!(dropped = samples.len() - written, "playback ring full");
        }
        self.write_cursor += written as u64;
        self.pushed_total += written as u64;
    }

    /// Device frame where the audio written so far ends, owed frames included.
    fn end_frame(&self) -> u64 {
        self.write_cursor + self.converter.pending_output()
    }

    fn owes_frames(&self) -> bool {
        self.converter.pending_output() > 0
    }

    /// Push whatever the converter still owes and start a new run.
    fn flush_tail(&mut self) {
        let tail = self.converter.flush();
        if !tail.is_empty() {
            self.push(&tail);
        }
    }

    /// Write `buffer` so its first sample plays at `start_frame`, returning
    /// the frame where it ends. `playhead` is the frame the callback reaches
    /// once the live ring contents are played.
    fn write(&mut self, buffer: &PlaybackBuffer, start_frame: u64, playhead: u64) -> Result<u64> {
        if self.write_cursor < playhead {
            // The ring underflowed; owed frames are already late.
            self.converter.reset();
            self.write_cursor = playhead;
        }
        if buffer.sample_rate != self.converter_from {
            self.flush_tail();
            self.converter =
                RateConverter::new(buffer.sample_rate, self.device_rate, RESAMPLE_BLOCK)?;
            self.converter_from = buffer.sample_rate;
        }

        // One frame of slack absorbs nanosecond rounding of the start time.
        if start_frame > self.end_frame() + 1 {
            self.flush_tail();
            let gap = (start_frame - self.write_cursor) as usize;
            self.push(&vec![0.0; gap]);
        }

        let samples = self.converter.process(&buffer.samples);
        self.push(&samples);
        Ok(self.end_frame())
    }

    /// Forget queued audio: the next sample written plays at `played`.
    fn discard(&mut self, played: u64) {
        self.converter.reset();
        self.write_cursor = played;
    }
}

/// Output device backed by the default (or a named) cpal output.
pub struct CpalPlayback {
    shared: Arc<Shared>,
    writer: RingWriter,
    device_rate: u32,
    sources: Vec<SourceSpan>,
    next_id: u64,
    thread: Option<JoinHandle<()>>,
}

impl CpalPlayback {
    /// Open an output by name, falling back to the default output.
    ///
    /// # Errors
    /// `NoDefaultOutputDevice` when the host has no outputs; `AudioStream`
    /// when cpal cannot build or start the stream.
    pub fn open(preferred_device: Option<&str>) -> Result<Self> {
        let (producer, consumer) = create_sample_ring(PLAYBACK_RING_CAPACITY);
        let shared = Arc::new(Shared {
            frames_played: AtomicU64::new(0),
            running: AtomicBool::new(true),
            suspended: AtomicBool::new(false),
            discard_until: AtomicU64::new(0),
            samples_popped: AtomicU64::new(0),
            gain_target: AtomicU32::new(1f32.to_bits()),
            gain_ramp_frames: AtomicU32::new(0),
            gain_generation: AtomicU32::new(0),
        });

        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<u32>>(1);
        let thread_shared = Arc::clone(&shared);
        let preferred = preferred_device.map(str::to_owned);
        let thread = std::thread::Builder::new()
            .name("ayla-playback".into())
            .spawn(move || {
                let stream = match build_stream(preferred.as_deref(), consumer, &thread_shared) {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                while thread_shared.running.load(Ordering::Acquire) {
                    std::thread::park_timeout(Duration::from_millis(50));
                }
                drop(stream);
                debug!("playback stream closed");
            })?;

        let device_rate = ready_rx
            .recv()
            .map_err(|_| AylaError::AudioStream("playback thread exited during open".into()))??;
        let writer = RingWriter::new(producer, device_rate)?;

        Ok(Self {
            shared,
            writer,
            device_rate,
            sources: Vec::new(),
            next_id: 0,
            thread: Some(thread),
        })
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    fn frames_played(&self) -> u64 {
        self.shared.frames_played.load(Ordering::Acquire)
    }

    fn duration_to_frames(&self, d: Duration) -> u64 {
        (d.as_nanos() * self.device_rate as u128 / 1_000_000_000) as u64
    }

    /// Samples in the ring that will still be played.
    fn live_queued(&self) -> u64 {
        let popped = self.shared.samples_popped.load(Ordering::Acquire);
        let discard = self.shared.discard_until.load(Ordering::Acquire);
        self.writer.pushed_total.saturating_sub(popped.max(discard))
    }

    /// Push the owed tail before the callback runs out of queued audio.
    fn flush_if_draining(&mut self) {
        let low_water = u64::from(self.device_rate) * TAIL_FLUSH_MS / 1_000;
        if self.writer.owes_frames() && self.live_queued() < low_water {
            self.writer.flush_tail();
        }
    }
}

impl PlaybackDevice for CpalPlayback {
    fn current_time(&self) -> Duration {
        let frames = self.frames_played();
        Duration::from_nanos((frames as u128 * 1_000_000_000 / self.device_rate as u128) as u64)
    }

    fn is_suspended(&self) -> bool {
        self.shared.suspended.load(Ordering::Acquire)
    }

    fn resume(&mut self) {
        self.shared.suspended.store(false, Ordering::Release);
    }

    fn schedule(&mut self, buffer: PlaybackBuffer, start_at: Duration) -> SourceId {
        let id = SourceId(self.next_id);
        self.next_id += 1;

        let playhead = self.frames_played() + self.live_queued();
        let start_frame = self.duration_to_frames(start_at);
        let end_frame = match self.writer.write(&buffer, start_frame, playhead) {
            Ok(end) => end,
            Err(e) => {
                error!(%id, "dropping buffer, resampler unavailable: {e}");
                self.writer.end_frame()
            }
        };

        self.sources.push(SourceSpan {
            id,
            end_frame,
            stopped: false,
            reported: false,
        });
        id
    }

    /// The ring is FIFO, so stopping any source discards everything pushed
    /// so far. Buffers scheduled afterwards are unaffected.
    fn stop_source(&mut self, id: SourceId) -> Result<()> {
        let played = self.frames_played();
        let span = self
            .sources
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(AylaError::SourceAlreadyStopped(id.0))?;
        if span.stopped || span.end_frame <= played {
            return Err(AylaError::SourceAlreadyStopped(id.0));
        }
        span.stopped = true;
        self.shared
            .discard_until
            .store(self.writer.pushed_total, Ordering::Release);
        self.writer.discard(played);
        Ok(())
    }

    fn take_ended(&mut self) -> Vec<SourceId> {
        self.flush_if_draining();
        let played = self.frames_played();
        let mut ended = Vec::new();
        for span in &mut self.sources {
            if !span.stopped && !span.reported && span.end_frame <= played {
                span.reported = true;
                ended.push(span.id);
            }
        }
        self.sources
            .retain(|s| !(s.reported || (s.stopped && s.end_frame <= played)));
        ended
    }

    fn set_gain(&mut self, gain: f32) {
        self.shared.set_gain(gain, 0);
    }

    fn ramp_gain(&mut self, target: f32, over: Duration) {
        let frames = self.duration_to_frames(over).min(u32::MAX as u64) as u32;
        self.shared.set_gain(target, frames);
    }

    /// Snap the gain stage to silence, cancelling any ramp in progress.
    fn reconnect(&mut self) {
        self.shared.set_gain(0.0, 0);
        debug!("playback output stage reconnected");
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}

fn build_stream(
    preferred: Option<&str>,
    consumer: SampleConsumer,
    shared: &Arc<Shared>,
) -> Result<(Stream, u32)> {
    let host = cpal::default_host();
    let named = preferred.and_then(|wanted| {
        let found = host
            .output_devices()
            .ok()?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false));
        if found.is_none() {
            warn!(wanted, "preferred output device not found, falling back");
        }
        found
    });
    let device = named
        .or_else(|| host.default_output_device())
        .ok_or(AylaError::NoDefaultOutputDevice)?;

    let supported = device
        .default_output_config()
        .map_err(|e| AylaError::AudioDevice(e.to_string()))?;
    let rate = supported.sample_rate().0;
    let config: StreamConfig = supported.config();
    info!(
        device = device.name().unwrap_or_default().as_str(),
        sample_rate = rate,
        channels = config.channels,
        "opening output device"
    );

    let stream = match supported.sample_format() {
        SampleFormat::F32 => output_stream::<f32>(&device, &config, consumer, shared),
        SampleFormat::I16 => output_stream::<i16>(&device, &config, consumer, shared),
        SampleFormat::U16 => output_stream::<u16>(&device, &config, consumer, shared),
        fmt => Err(AylaError::AudioStream(format!(
            "unsupported sample format: {fmt:?}"
        ))),
    }?;
    stream
        .play()
        .map_err(|e| AylaError::AudioStream(e.to_string()))?;
    Ok((stream, rate))
}

fn output_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut consumer: SampleConsumer,
    shared: &Arc<Shared>,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = usize::from(config.channels.max(1));
    let shared = Arc::clone(shared);
    let mut gain = GainStage::new();
    let mut popped: u64 = 0;

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                if shared.suspended.load(Ordering::Acquire) {
                    data.fill(T::EQUILIBRIUM);
                    return;
                }
                let discard_until = shared.discard_until.load(Ordering::Acquire);
                while popped < discard_until && consumer.try_pop().is_some() {
                    popped += 1;
                }
                gain.sync(&shared);
                for frame in data.chunks_mut(channels) {
                    let sample = match consumer.try_pop() {
                        Some(s) => {
                            popped += 1;
                            s
                        }
                        None => 0.0,
                    };
                    frame.fill(T::from_sample(sample * gain.next()));
                }
                shared.samples_popped.store(popped, Ordering::Release);
                shared
                    .frames_played
                    .fetch_add((data.len() / channels) as u64, Ordering::Release);
            },
            |err| error!("playback stream error: {err}"),
            None,
        )
        .map_err(|e| AylaError::AudioStream(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::chunk::PLAYBACK_CHUNK_SAMPLES;

    fn shared() -> Shared {
        Shared {
            frames_played: AtomicU64::new(0),
            running: AtomicBool::new(true),
            suspended: AtomicBool::new(false),
            discard_until: AtomicU64::new(0),
            samples_popped: AtomicU64::new(0),
            gain_target: AtomicU32::new(1f32.to_bits()),
            gain_ramp_frames: AtomicU32::new(0),
            gain_generation: AtomicU32::new(0),
        }
    }

    #[test]
    fn gain_ramps_linearly_to_target() {
        let shared = shared();
        let mut stage = GainStage::new();
        shared.set_gain(0.0, 4);
        stage.sync(&shared);
        let steps: Vec<f32> = (0..5).map(|_| stage.next()).collect();
        assert_eq!(steps, vec![0.75, 0.5, 0.25, 0.0, 0.0]);
    }

    #[test]
    fn immediate_gain_applies_on_sync() {
        let shared = shared();
        let mut stage = GainStage::new();
        shared.set_gain(0.0, 4);
        stage.sync(&shared);
        stage.next();
        shared.set_gain(0.8, 0);
        stage.sync(&shared);
        assert_eq!(stage.next(), 0.8);
        stage.sync(&shared);
        assert_eq!(stage.next(), 0.8, "same generation is not re-applied");
    }

    fn speech_buffer(value: f32) -> PlaybackBuffer {
        PlaybackBuffer::new(vec![value; PLAYBACK_CHUNK_SAMPLES], PLAYBACK_SAMPLE_RATE)
    }

    fn drain(consumer: &mut SampleConsumer) -> Vec<f32> {
        std::iter::from_fn(|| consumer.try_pop()).collect()
    }

    #[test]
    fn abutting_buffers_join_without_padding() {
        let (producer, mut consumer) = create_sample_ring(PLAYBACK_RING_CAPACITY);
        let mut writer = RingWriter::new(producer, 48_000).unwrap();

        let first_end = writer.write(&speech_buffer(0.5), 0, 0).unwrap();
        assert_eq!(first_end, 15_360);
        let second_end = writer.write(&speech_buffer(0.5), first_end, 0).unwrap();
        assert_eq!(second_end, 2 * 15_360);
        writer.flush_tail();

        let out = drain(&mut consumer);
        assert_eq!(out.len(), 2 * 15_360);
        assert_eq!(writer.write_cursor, 2 * 15_360);
        let join = &out[15_360 - 200..15_360 + 200];
        assert!(join.iter().all(|s| (s - 0.5).abs() < 1e-3), "no silence at the join");
    }

    #[test]
    fn gap_flushes_tail_then_pads_to_start() {
        let (producer, mut consumer) = create_sample_ring(PLAYBACK_RING_CAPACITY);
        let mut writer = RingWriter::new(producer, 48_000).unwrap();

        writer.write(&speech_buffer(0.5), 0, 0).unwrap();
        let end = writer.write(&speech_buffer(0.5), 20_000, 0).unwrap();
        assert_eq!(end, 20_000 + 15_360);
        writer.flush_tail();

        let out = drain(&mut consumer);
        assert_eq!(out.len(), 20_000 + 15_360);
        assert!(out[15_400..19_990].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn discard_restarts_at_the_playhead() {
        let (producer, _consumer) = create_sample_ring(PLAYBACK_RING_CAPACITY);
        let mut writer = RingWriter::new(producer, 48_000).unwrap();

        writer.write(&speech_buffer(0.5), 4_800, 0).unwrap();
        assert!(writer.owes_frames());
        writer.discard(9_600);
        assert!(!writer.owes_frames());
        assert_eq!(writer.end_frame(), 9_600);

        let end = writer.write(&speech_buffer(0.5), 9_600, 9_600).unwrap();
        assert_eq!(end, 9_600 + 15_360);
    }
}
