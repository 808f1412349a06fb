//! Microphone → dialogue service.
//!
//! ```text
//! MicCapture (cpal callback) ─► SPSC ring ─► pump::run (blocking thread)
//!                                               resample → 16 kHz
//!                                               4096-sample frames → PCM16 base64
//!                                                        │ crossbeam channel
//!                                                        ▼
//!                                  MicrophoneRelay::on_data / on_volume
//!                                      ├─► DialogueUplink::send_audio
//!                                      └─► MicLevelEvent (≤ 1 per 200 ms)
//! ```

pub mod pump;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::{
    codec::{PcmFormat, CAPTURE_SAMPLE_RATE},
    error::Result,
    ipc::events::MicLevelEvent,
};

const BROADCAST_CAP: usize = 64;

/// Upstream half of the dialogue session.
pub trait DialogueUplink: Send + 'static {
    /// Send one base64 PCM16 frame with its mime type.
    fn send_audio(&mut self, data: &str, mime_type: &str) -> Result<()>;
}

impl<U: DialogueUplink + ?Sized> DialogueUplink for Box<U> {
    fn send_audio(&mut self, data: &str, mime_type: &str) -> Result<()> {
        (**self).send_audio(data, mime_type)
    }
}

/// One encoded microphone frame.
#[derive(Debug, Clone, PartialEq)]
pub struct MicChunk {
    /// Base64 PCM16 LE mono.
    pub data: String,
    pub sample_rate: u32,
    /// Peak absolute level of the frame in [0, 1].
    pub peak: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayConfig {
    /// Rate the dialogue service expects. Default: 16000.
    pub sample_rate: u32,
    /// Samples per upstream frame. Default: 4096.
    pub frame_samples: usize,
    /// Minimum spacing of level events. Default: 200.
    pub level_interval_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            sample_rate: CAPTURE_SAMPLE_RATE,
            frame_samples: pump::MIC_FRAME_SAMPLES,
            level_interval_ms: 200,
        }
    }
}

/// Forwards encoded microphone frames upstream and meters their level.
pub struct MicrophoneRelay<U: DialogueUplink = Box<dyn DialogueUplink>> {
    uplink: U,
    sample_rate: u32,
    mime_type: String,
    level_interval: Duration,
    last_level_at: Option<Duration>,
    levels_tx: broadcast::Sender<MicLevelEvent>,
    seq: u64,
    frames_sent: usize,
    send_errors: usize,
}

impl<U: DialogueUplink> MicrophoneRelay<U> {
    pub fn new(config: &RelayConfig, uplink: U) -> Self {
        let (levels_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            uplink,
            sample_rate: config.sample_rate,
            mime_type: PcmFormat::mono16(config.sample_rate).mime_type(),
            level_interval: Duration::from_millis(config.level_interval_ms),
            last_level_at: None,
            levels_tx,
            seq: 0,
            frames_sent: 0,
            send_errors: 0,
        }
    }

    pub fn subscribe_levels(&self) -> broadcast::Receiver<MicLevelEvent> {
        self.levels_tx.subscribe()
    }

    /// Send one frame upstream. A failed send is logged and counted; the
    /// relay keeps going.
    pub fn on_data(&mut self, chunk: &MicChunk) {
        let mime = if chunk.sample_rate == self.sample_rate {
            self.mime_type.clone()
        } else {
            debug!(rate = chunk.sample_rate, "relaying microphone audio at a non-default rate");
            PcmFormat::mono16(chunk.sample_rate).mime_type()
        };
        match self.uplink.send_audio(&chunk.data, &mime) {
            Ok(()) => self.frames_sent += 1,
            Err(e) => {
                self.send_errors += 1;
                warn!("failed to relay microphone frame: {e}");
            }
        }
    }

    /// Report a level reading taken at `now`. Returns whether it was emitted.
    pub fn on_volume(&mut self, level: f32, now: Duration) -> bool {
        if let Some(last) = self.last_level_at {
            if now.saturating_sub(last) <= self.level_interval {
                return false;
            }
        }
        self.last_level_at = Some(now);
        let event = MicLevelEvent {
            seq: self.seq,
            level: level.clamp(0.0, 1.0),
        };
        self.seq = self.seq.saturating_add(1);
        let _ = self.levels_tx.send(event);
        true
    }

    pub fn frames_sent(&self) -> usize {
        self.frames_sent
    }

    pub fn send_errors(&self) -> usize {
        self.send_errors
    }

    pub fn uplink(&self) -> &U {
        &self.uplink
    }

    pub fn into_uplink(self) -> U {
        self.uplink
    }
}
