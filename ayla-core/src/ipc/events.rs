//! Event types consumed and emitted by the engine.
//!
//! | Event | Direction | Channel |
//! |-------|-----------|---------|
//! | `SessionEvent` | dialogue session → engine | `AylaEngine::handle` |
//! | `PlaybackEvent` | jitter buffer → listeners | `AudioStreamer::subscribe` |
//! | `EngineStatusEvent` | engine → listeners | `AylaEngine::subscribe_status` |
//! | `MicLevelEvent` | capture relay → listeners | `MicrophoneRelay::subscribe_levels` |

use serde::{Deserialize, Serialize};

use crate::codec::PLAYBACK_SAMPLE_RATE;

// ---------------------------------------------------------------------------
// Dialogue session events
// ---------------------------------------------------------------------------

fn default_playback_mime() -> String {
    format!("audio/pcm;rate={PLAYBACK_SAMPLE_RATE}")
}

/// Everything the dialogue session can tell the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// Base64 PCM16 speech audio, optionally carrying the text it speaks.
    #[serde(rename_all = "camelCase")]
    AudioChunk {
        data: String,
        #[serde(default = "default_playback_mime")]
        mime_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    /// Partial or full transcription of the speech being streamed.
    Transcript { text: String },
    /// The user barged in; playback and animation must reset now.
    Interrupted,
    /// The model finished its speaking turn.
    TurnComplete,
    /// The session was torn down.
    Closed,
    /// The session failed; treated like `Closed`, with a reason.
    Error { message: String },
}

// ---------------------------------------------------------------------------
// Playback events
// ---------------------------------------------------------------------------

/// Emitted by the jitter buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    pub kind: PlaybackEventKind,
    /// Device time in milliseconds. For `Started` this is the time the first
    /// buffer will start; otherwise the device time when the event fired.
    pub device_time_ms: f64,
    pub is_playing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackEventKind {
    /// A new stream began buffering.
    Started,
    /// Heartbeat emitted on every scheduling pass.
    Progress,
    /// The last buffer of a completed stream finished playing.
    Completed,
}

// ---------------------------------------------------------------------------
// Microphone level events
// ---------------------------------------------------------------------------

/// Throttled microphone level for UI meters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MicLevelEvent {
    pub seq: u64,
    /// Peak absolute sample level of the latest capture block, in [0.0, 1.0].
    pub level: f32,
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Engine created, nothing streamed yet.
    Idle,
    /// Session open, waiting for speech.
    Connected,
    /// Speech audio is playing.
    Speaking,
    /// Speech finished; waiting for the user.
    Listening,
    /// The user barged in and playback was cut.
    Interrupted,
    /// Session closed normally.
    Closed,
    /// Session failed.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_chunk_deserializes_with_default_mime() {
        let raw = r#"{"type":"audioChunk","data":"AAA="}"#;
        let event: SessionEvent = serde_json::from_str(raw).expect("audio chunk");
        assert_eq!(
            event,
            SessionEvent::AudioChunk {
                data: "AAA=".into(),
                mime_type: "audio/pcm;rate=24000".into(),
                text: None,
            }
        );
    }

    #[test]
    fn session_events_use_camel_case_tags_and_fields() {
        let event = SessionEvent::AudioChunk {
            data: "AAA=".into(),
            mime_type: "audio/pcm;rate=16000".into(),
            text: Some("salam".into()),
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "audioChunk");
        assert_eq!(json["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(json["text"], "salam");

        let json = serde_json::to_value(SessionEvent::TurnComplete).expect("serialize");
        assert_eq!(json["type"], "turnComplete");

        let parsed: SessionEvent =
            serde_json::from_str(r#"{"type":"error","message":"socket closed"}"#)
                .expect("error event");
        assert_eq!(
            parsed,
            SessionEvent::Error {
                message: "socket closed".into()
            }
        );
    }

    #[test]
    fn playback_event_serializes_with_lowercase_kind() {
        let event = PlaybackEvent {
            seq: 4,
            kind: PlaybackEventKind::Completed,
            device_time_ms: 1250.0,
            is_playing: false,
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["kind"], "completed");
        assert_eq!(json["deviceTimeMs"], 1250.0);
        assert_eq!(json["isPlaying"], false);
    }

    #[test]
    fn engine_status_rejects_non_lowercase_values() {
        assert!(serde_json::from_str::<EngineStatus>(r#""Speaking""#).is_err());
        let status: EngineStatus = serde_json::from_str(r#""speaking""#).expect("lowercase");
        assert_eq!(status, EngineStatus::Speaking);
    }
}
