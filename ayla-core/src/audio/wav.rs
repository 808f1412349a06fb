//! WAV export of session audio (speech as received, or microphone as sent).

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::info;

use crate::buffering::chunk::samples_to_duration;
use crate::error::{AylaError, Result};

/// Streams mono PCM16 audio into a WAV file.
pub struct WavRecorder {
    writer: hound::WavWriter<BufWriter<File>>,
    path: PathBuf,
    sample_rate: u32,
    samples_written: usize,
}

impl WavRecorder {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let path = path.as_ref().to_path_buf();
        let writer = hound::WavWriter::create(&path, spec)?;
        Ok(Self {
            writer,
            path,
            sample_rate,
            samples_written: 0,
        })
    }

    /// Append raw PCM16 LE bytes, as carried by session audio chunks.
    ///
    /// # Errors
    /// `MalformedAudioChunk` for an odd byte count; nothing is written.
    pub fn write_pcm16(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() % 2 != 0 {
            return Err(AylaError::MalformedAudioChunk { len: bytes.len() });
        }
        for pair in bytes.chunks_exact(2) {
            self.writer
                .write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
        }
        self.samples_written += bytes.len() / 2;
        Ok(())
    }

    /// Append normalized samples, clamped and scaled by `0x7FFF`.
    pub fn write_samples(&mut self, samples: &[f32]) -> Result<()> {
        for &s in samples {
            self.writer
                .write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        self.samples_written += samples.len();
        Ok(())
    }

    pub fn samples_written(&self) -> usize {
        self.samples_written
    }

    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples_written, self.sample_rate)
    }

    /// Write the header sizes and close the file. Returns the recorded length.
    pub fn finalize(self) -> Result<Duration> {
        let duration = self.duration();
        self.writer.finalize()?;
        info!(
            path = %self.path.display(),
            duration_ms = duration.as_millis() as u64,
            "wav recording finalized"
        );
        Ok(duration)
    }
}

/// Read a WAV file as mono f32, averaging channels. Returns samples and rate.
pub fn read_wav_mono(path: impl AsRef<Path>) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int if spec.bits_per_sample <= 16 => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<std::result::Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            return Err(AylaError::UnsupportedFormat(format!(
                "{}-bit integer WAV",
                spec.bits_per_sample
            )))
        }
    };

    if channels == 1 {
        return Ok((interleaved, spec.sample_rate));
    }
    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}
