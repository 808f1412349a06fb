//! # ayla-core
//!
//! Real-time speech playback and lip-sync engine for a conversational avatar.
//!
//! ## Architecture
//!
//! ```text
//! SessionEvent ─► AylaEngine::handle
//!                    ├─► codec::decode ─► AudioStreamer (jitter buffer) ─► PlaybackDevice
//!                    │                         │ PlaybackEvent (broadcast)
//!                    └─► WordAccumulator ◄─────┘ Completed flushes the last word
//!                            │
//!                            ▼
//!                        Animator ─► CharacterRig::update_morph_weights
//!
//! MicCapture ─► SPSC ring ─► capture::pump ─► MicrophoneRelay ─► DialogueUplink
//! ```
//!
//! Everything above the device is single-threaded and driven by
//! `AylaEngine::tick()`. Deferred work is a deadline in a `TimerSet`, so tests
//! drive the whole engine with `VirtualDevice` and a manually advanced clock.
//! The cpal callbacks only touch lock-free ring buffers and atomics.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod capture;
pub mod codec;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod lipsync;
pub mod playback;
pub mod timer;

// Convenience re-exports for downstream crates
pub use capture::{DialogueUplink, MicChunk, MicrophoneRelay, RelayConfig};
pub use engine::{AylaEngine, EngineConfig};
pub use error::{AylaError, Result};
pub use ipc::events::{
    EngineStatus, EngineStatusEvent, MicLevelEvent, PlaybackEvent, PlaybackEventKind,
    SessionEvent,
};
pub use lipsync::{AnimatorConfig, CharacterRig, MorphTarget, MorphWeight};
pub use playback::{AudioStreamer, PlaybackDevice, StreamerConfig, VirtualDevice};

#[cfg(feature = "audio-cpal")]
pub use playback::CpalPlayback;
