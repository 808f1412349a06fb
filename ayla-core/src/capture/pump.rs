//! Blocking microphone pump.
//!
//! ## Stages (per iteration)
//!
//! ```text
//! 1. Drain the capture ring (up to 960 samples)
//! 2. Resample device rate → 16 kHz
//! 3. Cut 4096-sample frames, clamp, encode PCM16 base64, measure peak
//! 4. Hand each MicChunk to the relay over a crossbeam channel
//! ```
//!
//! Runs on its own thread (or `spawn_blocking`) until `running` is cleared or
//! the receiving side hangs up.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{debug, info};

use super::MicChunk;
use crate::{
    audio::resample::RateConverter,
    buffering::{Consumer, SampleConsumer},
    codec::{encode_base64, f32_to_pcm16},
    error::Result,
};

/// Samples per upstream frame (256 ms at 16 kHz).
pub const MIC_FRAME_SAMPLES: usize = 4_096;

/// Samples drained from the ring per iteration.
const DRAIN_CHUNK: usize = 960;

/// Sleep when the ring is empty.
const SLEEP_EMPTY_MS: u64 = 5;

/// Resample-and-frame stage, separated from the loop so it can be driven
/// directly.
pub struct MicFramer {
    resampler: RateConverter,
    target_rate: u32,
    frame_samples: usize,
    pending: Vec<f32>,
}

impl MicFramer {
    pub fn new(capture_rate: u32, target_rate: u32, frame_samples: usize) -> Result<Self> {
        Ok(Self {
            resampler: RateConverter::new(capture_rate, target_rate, DRAIN_CHUNK)?,
            target_rate,
            frame_samples: frame_samples.max(1),
            pending: Vec::with_capacity(frame_samples * 2),
        })
    }

    /// Feed captured samples, returning every frame completed by them.
    pub fn push(&mut self, samples: &[f32]) -> Vec<MicChunk> {
        let resampled = self.resampler.process(samples);
        self.pending.extend_from_slice(&resampled);

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_samples {
            let frame: Vec<f32> = self.pending.drain(..self.frame_samples).collect();
            let (bytes, peak) = f32_to_pcm16(&frame);
            frames.push(MicChunk {
                data: encode_base64(&bytes),
                sample_rate: self.target_rate,
                peak,
            });
        }
        frames
    }

    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }
}

#[derive(Debug, Default)]
pub struct PumpDiagnostics {
    pub samples_in: AtomicUsize,
    pub frames_out: AtomicUsize,
}

pub struct PumpContext {
    pub consumer: SampleConsumer,
    pub framer: MicFramer,
    pub running: Arc<AtomicBool>,
    pub tx: Sender<MicChunk>,
    pub diagnostics: Arc<PumpDiagnostics>,
}

/// Run until `ctx.running` becomes false or the receiver is dropped.
pub fn run(mut ctx: PumpContext) {
    info!("microphone pump started");
    let mut raw = vec![0f32; DRAIN_CHUNK];

    while ctx.running.load(Ordering::Relaxed) {
        let n = ctx.consumer.pop_slice(&mut raw);
        if n == 0 {
            std::thread::sleep(Duration::from_millis(SLEEP_EMPTY_MS));
            continue;
        }
        ctx.diagnostics.samples_in.fetch_add(n, Ordering::Relaxed);

        for chunk in ctx.framer.push(&raw[..n]) {
            debug!(peak = chunk.peak, "microphone frame ready");
            if ctx.tx.send(chunk).is_err() {
                info!("microphone relay hung up, stopping pump");
                return;
            }
            ctx.diagnostics.frames_out.fetch_add(1, Ordering::Relaxed);
        }
    }
    info!("microphone pump stopped");
}
