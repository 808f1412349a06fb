//! Fixed-ratio sample-rate conversion with a rubato `FastFixedIn` session.
//!
//! Both directions need it: speech arrives at 24 kHz and most output devices
//! run at 44.1/48 kHz, while microphones capture at the device rate and the
//! dialogue service wants 16 kHz. Equal rates skip rubato entirely.
//!
//! A converter is one continuous run: interpolation history carries across
//! `process` calls, the leading `output_delay` frames are dropped, and `flush`
//! tops the output up to exactly `round(fed * ratio)` frames before starting
//! a fresh run.
//!
//! ```ignore
//! let mut rc = RateConverter::new(24_000, 48_000, 480)?;
//! let mut out = rc.process(&first);
//! out.extend(rc.process(&second));
//! out.extend(rc.flush());
//! assert_eq!(out.len(), (first.len() + second.len()) * 2);
//! ```

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{AylaError, Result};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` in passthrough mode.
    resampler: Option<FastFixedIn<f32>>,
    /// Partial input block carried between calls.
    input_buf: Vec<f32>,
    chunk_size: usize,
    /// `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
    ratio: f64,
    /// Input frames fed in the current run.
    fed: u64,
    /// Output frames returned in the current run.
    emitted: u64,
    /// Leading output frames still to drop.
    skip: usize,
}

impl RateConverter {
    /// # Errors
    /// `AylaError::InvalidConfig` for a zero rate or chunk size,
    /// `AylaError::AudioDevice` if rubato fails to initialise.
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> Result<Self> {
        if from_rate == 0 || to_rate == 0 || chunk_size == 0 {
            return Err(AylaError::InvalidConfig(format!(
                "cannot resample {from_rate} Hz -> {to_rate} Hz in blocks of {chunk_size}"
            )));
        }
        let ratio = to_rate as f64 / from_rate as f64;
        if from_rate == to_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
                ratio,
                fed: 0,
                emitted: 0,
                skip: 0,
            });
        }

        let resampler =
            FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
                .map_err(|e| AylaError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let skip = resampler.output_delay();
        tracing::info!(from_rate, to_rate, chunk_size, max_out, delay = skip, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf: vec![vec![0f32; max_out]; 1],
            ratio,
            fed: 0,
            emitted: 0,
            skip,
        })
    }

    /// Convert `samples`, returning whatever output is ready (may be empty).
    /// The rest stays in the run and comes out of later calls or `flush`.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        if self.resampler.is_none() {
            return samples.to_vec();
        }
        self.input_buf.extend_from_slice(samples);
        self.fed += samples.len() as u64;

        let mut result = Vec::new();
        while self.input_buf.len() >= self.chunk_size {
            self.convert_block(&mut result);
        }
        result.truncate(self.pending_output() as usize);
        self.emitted += result.len() as u64;
        result
    }

    /// Output frames owed for input already fed.
    pub fn pending_output(&self) -> u64 {
        if self.resampler.is_none() {
            return 0;
        }
        let expected = (self.fed as f64 * self.ratio).round() as u64;
        expected.saturating_sub(self.emitted)
    }

    /// Push the run through with silence, return exactly the owed output,
    /// then start a new run.
    pub fn flush(&mut self) -> Vec<f32> {
        let owed = self.pending_output() as usize;
        let mut result = Vec::with_capacity(owed);
        // A padded block yields about chunk_size * ratio frames.
        for _ in 0..4 {
            if result.len() >= owed {
                break;
            }
            self.input_buf.resize(self.chunk_size, 0.0);
            self.convert_block(&mut result);
        }
        result.truncate(owed);
        self.reset();
        result
    }

    /// Drop carried input and history; the next call starts a new run.
    pub fn reset(&mut self) {
        self.input_buf.clear();
        self.fed = 0;
        self.emitted = 0;
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
            self.skip = resampler.output_delay();
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    /// Output samples per input sample.
    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    fn convert_block(&mut self, out: &mut Vec<f32>) {
        let Some(resampler) = self.resampler.as_mut() else {
            return;
        };
        let block = &self.input_buf[..self.chunk_size];
        match resampler.process_into_buffer(&[block], &mut self.output_buf, None) {
            Ok((_consumed, produced)) => {
                let dropped = self.skip.min(produced);
                self.skip -= dropped;
                out.extend_from_slice(&self.output_buf[0][dropped..produced]);
            }
            Err(e) => error!("resampler process error: {e}"),
        }
        self.input_buf.drain(..self.chunk_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(16_000, 16_000, 960).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples), samples);
        assert!(rc.flush().is_empty());
    }

    #[test]
    fn capture_48k_to_16k_length() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        let out = rc.process(&vec![0.0f32; 960]);
        assert!(
            (out.len() as isize - 320).unsigned_abs() <= 10,
            "output len={} expected~320",
            out.len()
        );
    }

    #[test]
    fn playback_24k_to_48k_doubles() {
        let mut rc = RateConverter::new(24_000, 48_000, 480).unwrap();
        assert!((rc.ratio() - 2.0).abs() < f64::EPSILON);
        let out = rc.process(&vec![0.1f32; 480 * 4]);
        assert!((out.len() as isize - 3840).unsigned_abs() <= 32);
        assert_eq!(out.len() as u64 + rc.pending_output(), 3840);
    }

    #[test]
    fn continuous_run_is_exact_and_seamless() {
        let mut rc = RateConverter::new(24_000, 48_000, 480).unwrap();
        let mut out = rc.process(&vec![0.5f32; 7_680]);
        let first = out.len() as u64 + rc.pending_output();
        assert_eq!(first, 15_360, "first buffer ends on its exact frame");
        out.extend(rc.process(&vec![0.5f32; 7_680]));
        out.extend(rc.flush());
        assert_eq!(out.len(), 2 * 15_360);
        assert!(
            out[15_000..15_700].iter().all(|s| (s - 0.5).abs() < 1e-3),
            "no dip where the buffers meet"
        );
        assert_eq!(rc.pending_output(), 0);
    }

    #[test]
    fn odd_ratio_flush_tops_up_exactly() {
        let mut rc = RateConverter::new(24_000, 44_100, 480).unwrap();
        let mut out = rc.process(&vec![0.2f32; 1_000]);
        out.extend(rc.process(&vec![0.2f32; 333]));
        out.extend(rc.flush());
        assert_eq!(out.len(), (1_333.0f64 * 44_100.0 / 24_000.0).round() as usize);
    }

    #[test]
    fn partial_block_waits_for_flush() {
        let mut rc = RateConverter::new(24_000, 48_000, 480).unwrap();
        assert!(rc.process(&vec![0.0f32; 100]).is_empty());
        assert_eq!(rc.pending_output(), 200);
        let tail = rc.flush();
        assert_eq!(tail.len(), 200);
        assert!(rc.flush().is_empty(), "flush drains the remainder");
    }

    #[test]
    fn reset_discards_carried_input() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        rc.process(&vec![0.0f32; 500]);
        rc.reset();
        assert!(rc.process(&vec![0.0f32; 500]).is_empty());
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(matches!(
            RateConverter::new(0, 16_000, 960),
            Err(AylaError::InvalidConfig(_))
        ));
    }
}
