//! Microphone capture via cpal.
//!
//! The input callback runs on an OS audio thread. It downmixes to mono into a
//! scratch buffer sized once per callback shape and pushes into the SPSC ring;
//! it never locks and never performs I/O. Everything after the ring (resampling,
//! PCM16 encoding, the uplink) happens in `capture::pump`.
//!
//! `cpal::Stream` is `!Send` on Windows and macOS, so `MicCapture` must be
//! opened and dropped on the same thread.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, Stream, StreamConfig,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

#[cfg(feature = "audio-cpal")]
use crate::buffering::Producer;
use crate::{
    buffering::SampleProducer,
    error::{AylaError, Result},
};

/// Handle to a live microphone stream. **Not `Send`.**
pub struct MicCapture {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    running: Arc<AtomicBool>,
    /// Device capture rate (Hz).
    pub sample_rate: u32,
}

/// Average interleaved frames into mono, converting each sample with `to_f32`.
#[cfg_attr(not(feature = "audio-cpal"), allow(dead_code))]
fn downmix_into<T: Copy>(data: &[T], channels: usize, out: &mut Vec<f32>, to_f32: fn(T) -> f32) {
    let channels = channels.max(1);
    let frames = data.len() / channels;
    out.resize(frames, 0.0);
    for (frame, slot) in data.chunks_exact(channels).zip(out.iter_mut()) {
        let sum: f32 = frame.iter().map(|s| to_f32(*s)).sum();
        *slot = sum / channels as f32;
    }
}

impl MicCapture {
    /// Open an input by name, falling back to the default input and then to
    /// the first available one.
    ///
    /// # Errors
    /// `NoDefaultInputDevice` when the host has no inputs; `AudioStream` when
    /// cpal cannot build the stream or the sample format is unsupported.
    #[cfg(feature = "audio-cpal")]
    pub fn open(
        mut producer: SampleProducer,
        running: Arc<AtomicBool>,
        preferred_device: Option<&str>,
    ) -> Result<Self> {
        let host = cpal::default_host();

        let preferred = preferred_device.and_then(|wanted| {
            let found = host
                .input_devices()
                .ok()?
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false));
            if found.is_none() {
                warn!(wanted, "preferred input device not found, falling back");
            }
            found
        });

        let device = match preferred.or_else(|| host.default_input_device()) {
            Some(device) => device,
            None => host
                .input_devices()
                .map_err(|e| AylaError::AudioDevice(e.to_string()))?
                .next()
                .ok_or(AylaError::NoDefaultInputDevice)?,
        };

        let supported = device
            .default_input_config()
            .map_err(|e| AylaError::AudioDevice(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        info!(
            device = device.name().unwrap_or_default().as_str(),
            sample_rate, channels, "opening microphone"
        );

        let config: StreamConfig = supported.config();
        let flag = Arc::clone(&running);
        let mut mono: Vec<f32> = Vec::new();
        let mut push = move |samples: &[f32]| {
            let written = producer.push_slice(samples);
            if written < samples.len() {
                warn!(dropped = samples.len() - written, "capture ring full");
            }
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _| {
                    if !flag.load(Ordering::Relaxed) {
                        return;
                    }
                    if channels == 1 {
                        push(data);
                    } else {
                        downmix_into(data, channels, &mut mono, |s| s);
                        push(&mono);
                    }
                },
                |err| error!("microphone stream error: {err}"),
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _| {
                    if !flag.load(Ordering::Relaxed) {
                        return;
                    }
                    downmix_into(data, channels, &mut mono, |s| s as f32 / 32768.0);
                    push(&mono);
                },
                |err| error!("microphone stream error: {err}"),
                None,
            ),
            SampleFormat::U8 => device.build_input_stream(
                &config,
                move |data: &[u8], _| {
                    if !flag.load(Ordering::Relaxed) {
                        return;
                    }
                    downmix_into(data, channels, &mut mono, |s| (s as f32 - 128.0) / 128.0);
                    push(&mono);
                },
                |err| error!("microphone stream error: {err}"),
                None,
            ),
            fmt => {
                return Err(AylaError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| AylaError::AudioStream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AylaError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    #[cfg(not(feature = "audio-cpal"))]
    pub fn open(
        _producer: SampleProducer,
        _running: Arc<AtomicBool>,
        _preferred_device: Option<&str>,
    ) -> Result<Self> {
        Err(AylaError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    /// The callback no-ops from its next invocation on.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_channels() {
        let mut out = Vec::new();
        downmix_into(&[1.0f32, 0.0, 0.5, 0.5, -1.0, -1.0], 2, &mut out, |s| s);
        assert_eq!(out, vec![0.5, 0.5, -1.0]);
    }

    #[test]
    fn downmix_converts_integer_samples() {
        let mut out = Vec::new();
        downmix_into(&[i16::MIN, 0, 16384], 1, &mut out, |s| s as f32 / 32768.0);
        assert_eq!(out, vec![-1.0, 0.0, 0.5]);
    }
}
