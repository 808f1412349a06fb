//! Uplink used when no dialogue service is attached: frames are counted,
//! logged and optionally written to a WAV file.

use std::path::Path;

use ayla_core::audio::WavRecorder;
use ayla_core::codec::{decode_base64, PcmFormat, CAPTURE_SAMPLE_RATE};
use ayla_core::{DialogueUplink, Result};
use tracing::debug;

pub struct LoggingUplink {
    recorder: Option<WavRecorder>,
    record_rate: u32,
    frames: usize,
    bytes: usize,
}

impl LoggingUplink {
    pub fn new() -> Self {
        Self {
            recorder: None,
            record_rate: CAPTURE_SAMPLE_RATE,
            frames: 0,
            bytes: 0,
        }
    }

    /// Also write every relayed frame to `path`.
    pub fn recording_to(path: &Path, sample_rate: u32) -> Result<Self> {
        Ok(Self {
            recorder: Some(WavRecorder::create(path, sample_rate)?),
            record_rate: sample_rate,
            ..Self::new()
        })
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Close the WAV file, if any. Returns the recorded length in seconds.
    pub fn finish(self) -> Result<Option<f64>> {
        match self.recorder {
            Some(recorder) => Ok(Some(recorder.finalize()?.as_secs_f64())),
            None => Ok(None),
        }
    }
}

impl Default for LoggingUplink {
    fn default() -> Self {
        Self::new()
    }
}

impl DialogueUplink for LoggingUplink {
    fn send_audio(&mut self, data: &str, mime_type: &str) -> Result<()> {
        let bytes = decode_base64(data)?;
        self.frames += 1;
        self.bytes += bytes.len();
        debug!(mime_type, bytes = bytes.len(), total = self.bytes, "uplink frame");
        if let Some(recorder) = self.recorder.as_mut() {
            let format = PcmFormat::from_mime(mime_type, self.record_rate)?;
            if format.sample_rate == self.record_rate {
                recorder.write_pcm16(&bytes)?;
            }
        }
        Ok(())
    }
}
