//! PCM16 payload codec.
//!
//! The dialogue session delivers speech as base64-encoded 16-bit little-endian
//! mono PCM, and expects microphone audio in the same shape. Everything here
//! is stateless.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::{AylaError, Result};

/// Sample rate of synthesized speech from the dialogue service (Hz).
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Sample rate the dialogue service expects for microphone audio (Hz).
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

const BYTES_PER_SAMPLE: usize = 2;

/// Decode a base64 payload into raw bytes. No partial output on failure.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(data.trim())?)
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Convert PCM16 LE bytes into normalized f32 samples (`i16 / 32768`).
///
/// # Errors
/// `AylaError::MalformedAudioChunk` when the byte count is odd.
pub fn pcm16_to_f32(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % BYTES_PER_SAMPLE != 0 {
        return Err(AylaError::MalformedAudioChunk { len: bytes.len() });
    }
    Ok(bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect())
}

/// Convert f32 samples to PCM16 LE bytes, returning the peak absolute level.
///
/// Samples are clamped to [-1, 1] and scaled by `0x7FFF`.
pub fn f32_to_pcm16(samples: &[f32]) -> (Vec<u8>, f32) {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    let mut peak = 0f32;
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        peak = peak.max(clamped.abs());
        let value = (clamped * i16::MAX as f32) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    (out, peak)
}

/// Playback length of a PCM16 mono chunk, rounded to whole milliseconds.
pub fn chunk_duration_ms(byte_len: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    let samples = (byte_len / BYTES_PER_SAMPLE) as f64;
    (samples / sample_rate as f64 * 1000.0).round() as u64
}

/// Sample layout described by a session mime type such as `audio/pcm;rate=24000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl PcmFormat {
    pub fn mono16(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            bits_per_sample: 16,
        }
    }

    /// Parse `audio/pcm`, `audio/L16` or `audio/L<bits>` with an optional
    /// `rate=` parameter. A missing rate falls back to `default_rate`.
    ///
    /// # Errors
    /// `AylaError::UnsupportedFormat` for non-audio types or sample widths
    /// other than 16 bits.
    pub fn from_mime(mime_type: &str, default_rate: u32) -> Result<Self> {
        let mut parts = mime_type.split(';').map(str::trim);
        let file_type = parts.next().unwrap_or_default();
        let (kind, format) = file_type.split_once('/').unwrap_or((file_type, ""));
        if !kind.eq_ignore_ascii_case("audio") {
            return Err(AylaError::UnsupportedFormat(mime_type.to_string()));
        }

        let mut parsed = Self::mono16(default_rate);
        if let Some(bits) = format.strip_prefix('L') {
            if let Ok(bits) = bits.parse::<u16>() {
                parsed.bits_per_sample = bits;
            }
        }

        for param in parts {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            match key.trim() {
                "rate" => {
                    if let Ok(rate) = value.trim().parse::<u32>() {
                        parsed.sample_rate = rate;
                    }
                }
                "channels" => {
                    if let Ok(channels) = value.trim().parse::<u16>() {
                        parsed.channels = channels;
                    }
                }
                _ => {}
            }
        }

        if parsed.bits_per_sample != 16 {
            return Err(AylaError::UnsupportedFormat(format!(
                "{mime_type}: only 16-bit PCM is supported"
            )));
        }
        if parsed.channels != 1 {
            return Err(AylaError::UnsupportedFormat(format!(
                "{mime_type}: only mono PCM is supported"
            )));
        }
        Ok(parsed)
    }

    /// Mime type string understood by the dialogue service.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_little_endian_samples() {
        let bytes = [0x00, 0x80, 0xff, 0x7f, 0x00, 0x00];
        let samples = pcm16_to_f32(&bytes).expect("even length decodes");
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0], -1.0);
        assert!((samples[1] - 32767.0 / 32768.0).abs() < 1e-6);
        assert_eq!(samples[2], 0.0);
    }

    #[test]
    fn odd_trailing_byte_is_malformed() {
        let err = pcm16_to_f32(&[0, 0, 1]).unwrap_err();
        assert!(matches!(err, AylaError::MalformedAudioChunk { len: 3 }));
    }

    #[test]
    fn malformed_base64_is_rejected() {
        assert!(matches!(
            decode_base64("not*base64!"),
            Err(AylaError::MalformedBase64(_))
        ));
    }

    #[test]
    fn base64_payload_decodes_to_pcm() {
        let (bytes, peak) = f32_to_pcm16(&[0.5, -0.25, 2.0]);
        assert!((peak - 1.0).abs() < 1e-6, "peak is measured after clamping");
        let decoded = decode_base64(&encode_base64(&bytes)).expect("decode");
        let samples = pcm16_to_f32(&decoded).expect("pcm");
        assert!((samples[0] - 0.5).abs() < 1e-3);
        assert!((samples[1] + 0.25).abs() < 1e-3);
        assert!((samples[2] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn duration_of_one_playback_chunk() {
        assert_eq!(chunk_duration_ms(7680 * 2, PLAYBACK_SAMPLE_RATE), 320);
        assert_eq!(chunk_duration_ms(2400 * 2, PLAYBACK_SAMPLE_RATE), 100);
        assert_eq!(chunk_duration_ms(100, 0), 0);
    }

    #[test]
    fn parses_session_mime_types() {
        let fmt = PcmFormat::from_mime("audio/pcm;rate=24000", 16_000).expect("pcm");
        assert_eq!(fmt, PcmFormat::mono16(24_000));

        let fmt = PcmFormat::from_mime("audio/L16; rate=16000", 24_000).expect("L16");
        assert_eq!(fmt.sample_rate, 16_000);

        let fmt = PcmFormat::from_mime("audio/pcm", 24_000).expect("default rate");
        assert_eq!(fmt.sample_rate, 24_000);
        assert_eq!(fmt.mime_type(), "audio/pcm;rate=24000");
    }

    #[test]
    fn rejects_non_pcm16_mime_types() {
        assert!(PcmFormat::from_mime("audio/L8;rate=8000", 24_000).is_err());
        assert!(PcmFormat::from_mime("video/mp4", 24_000).is_err());
        assert!(PcmFormat::from_mime("audio/pcm;rate=24000;channels=2", 24_000).is_err());
    }
}
