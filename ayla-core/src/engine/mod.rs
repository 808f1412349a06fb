//! `AylaEngine`: one dialogue session's playback and lip-sync.
//!
//! ## Event flow
//!
//! ```text
//! SessionEvent::AudioChunk ─► decode ─► AudioStreamer::submit
//!                                └────► WordAccumulator::on_audio ─► Word
//!                                                                    ├─► GreetingDetector
//!                                                                    └─► Animator::enqueue_word
//! SessionEvent::TurnComplete ─► AudioStreamer::mark_complete
//! PlaybackEvent::Completed ───► WordAccumulator::flush ─► Animator::enqueue_word
//! SessionEvent::Interrupted ──► stop + interrupt (two independent resets)
//! SessionEvent::Closed/Error ─► stop + disconnect(final word)
//! ```
//!
//! ## Driving
//!
//! Nothing runs on its own. The host calls `tick()` at a steady cadence
//! (10 ms in the `ayla` binary); each tick reads the device clock once, lets
//! the streamer observe finished buffers and due timers, reacts to playback
//! events, then advances the animator.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::{
    capture::RelayConfig,
    codec::{chunk_duration_ms, decode_base64, PcmFormat},
    error::{AylaError, Result},
    ipc::events::{
        EngineStatus, EngineStatusEvent, PlaybackEvent, PlaybackEventKind, SessionEvent,
    },
    lipsync::{
        greeting::DEFAULT_GREETING_KEYWORDS, Animator, AnimatorConfig, CharacterRig,
        GreetingDetector, Word, WordAccumulator,
    },
    playback::{AudioStreamer, PlaybackDevice, StreamerConfig},
};

/// Broadcast channel capacity for status events.
const BROADCAST_CAP: usize = 64;

/// Configuration for `AylaEngine`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub streamer: StreamerConfig,
    pub animator: AnimatorConfig,
    pub relay: RelayConfig,
    /// Words that trigger the greeting gesture (case-insensitive substring).
    pub greeting_keywords: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            streamer: StreamerConfig::default(),
            animator: AnimatorConfig::default(),
            relay: RelayConfig::default(),
            greeting_keywords: DEFAULT_GREETING_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
        }
    }
}

impl EngineConfig {
    /// # Errors
    /// `AylaError::InvalidConfig` naming the first invalid section.
    pub fn validate(&self) -> Result<()> {
        self.streamer.validate()?;
        self.animator.validate()?;
        if self.relay.sample_rate == 0 || self.relay.frame_samples == 0 {
            return Err(AylaError::InvalidConfig(
                "relay sample_rate and frame_samples must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Session-scoped coordinator of the jitter buffer and the animator.
pub struct AylaEngine<D = Box<dyn PlaybackDevice>, R = Box<dyn CharacterRig>>
where
    D: PlaybackDevice,
    R: CharacterRig,
{
    config: EngineConfig,
    streamer: AudioStreamer<D>,
    animator: Animator<R>,
    words: WordAccumulator,
    greeting: GreetingDetector,
    playback_rx: broadcast::Receiver<PlaybackEvent>,
    status: EngineStatus,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    chunks_dropped: usize,
}

impl<D: PlaybackDevice, R: CharacterRig> AylaEngine<D, R> {
    /// # Errors
    /// `AylaError::InvalidConfig` if `config` fails validation.
    pub fn new(config: EngineConfig, device: D, rig: R) -> Result<Self> {
        config.validate()?;
        let streamer = AudioStreamer::new(config.streamer.clone(), device)?;
        let animator = Animator::new(config.animator.clone(), rig)?;
        let playback_rx = streamer.subscribe();
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        Ok(Self {
            greeting: GreetingDetector::new(&config.greeting_keywords),
            config,
            streamer,
            animator,
            words: WordAccumulator::new(),
            playback_rx,
            status: EngineStatus::Idle,
            status_tx,
            chunks_dropped: 0,
        })
    }

    /// The session opened: wake the output device and start listening.
    pub fn connect(&mut self) {
        self.streamer.resume();
        self.set_status(EngineStatus::Connected, None);
        info!("dialogue session connected");
    }

    /// Apply one session event.
    ///
    /// # Errors
    /// A malformed or unsupported audio chunk is logged, dropped and returned
    /// as an error; the session carries on.
    pub fn handle(&mut self, event: SessionEvent) -> Result<()> {
        let result = match event {
            SessionEvent::AudioChunk {
                data,
                mime_type,
                text,
            } => self.on_audio_chunk(&data, &mime_type, text.as_deref()),
            SessionEvent::Transcript { text } => {
                debug!(text = text.as_str(), "transcription received");
                self.words.on_transcript(text);
                Ok(())
            }
            SessionEvent::Interrupted => {
                self.interrupt();
                Ok(())
            }
            SessionEvent::TurnComplete => {
                debug!("turn complete");
                self.streamer.mark_complete();
                Ok(())
            }
            SessionEvent::Closed => {
                self.disconnect(EngineStatus::Closed, None);
                Ok(())
            }
            SessionEvent::Error { message } => {
                warn!(message = message.as_str(), "dialogue session failed");
                self.disconnect(EngineStatus::Error, Some(message));
                Ok(())
            }
        };
        self.drain_playback_events();
        result
    }

    /// Advance playback and animation to the current device time.
    pub fn tick(&mut self) {
        self.streamer.tick();
        self.drain_playback_events();
        let now = self.streamer.device().current_time();
        self.animator.tick(now);
    }

    /// Barge-in: cut playback and animation, forget the word in progress.
    pub fn interrupt(&mut self) {
        let now = self.streamer.device().current_time();
        self.streamer.stop();
        self.animator.interrupt(now);
        self.words.clear();
        self.set_status(EngineStatus::Interrupted, None);
        info!("interrupted by user");
    }

    pub fn set_volume(&mut self, gain: f32) {
        self.streamer.set_volume(gain);
    }

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_playback(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.streamer.subscribe()
    }

    /// Audio chunks rejected as malformed or unsupported.
    pub fn chunks_dropped(&self) -> usize {
        self.chunks_dropped
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn streamer(&self) -> &AudioStreamer<D> {
        &self.streamer
    }

    pub fn animator(&self) -> &Animator<R> {
        &self.animator
    }

    pub fn words(&self) -> &WordAccumulator {
        &self.words
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn on_audio_chunk(&mut self, data: &str, mime_type: &str, text: Option<&str>) -> Result<()> {
        let outcome = PcmFormat::from_mime(mime_type, self.config.streamer.sample_rate)
            .and_then(|format| Ok((format, decode_base64(data)?)));
        let (format, bytes) = match outcome {
            Ok(decoded) => decoded,
            Err(e) => {
                self.chunks_dropped += 1;
                warn!(mime_type, "dropping audio chunk: {e}");
                return Err(e);
            }
        };
        if format.sample_rate != self.config.streamer.sample_rate {
            warn!(
                received = format.sample_rate,
                expected = self.config.streamer.sample_rate,
                "audio chunk sample rate differs from playback rate"
            );
        }

        if let Err(e) = self.streamer.submit(&bytes) {
            self.chunks_dropped += 1;
            return Err(e);
        }

        // Lip-sync follows what is heard: the bytes play at the playback rate.
        let duration_ms = chunk_duration_ms(bytes.len(), self.config.streamer.sample_rate);
        if let Some(word) = self.words.on_audio(text, duration_ms) {
            self.play_word(word);
        }
        Ok(())
    }

    fn play_word(&mut self, word: Word) {
        if self.greeting.matches(&word.text) {
            info!(text = word.text.as_str(), "greeting detected");
            self.animator.rig_mut().play_greeting_gesture();
        }
        self.animator.enqueue_word(&word.text, word.duration_ms);
    }

    fn disconnect(&mut self, status: EngineStatus, detail: Option<String>) {
        let now = self.streamer.device().current_time();
        self.streamer.stop();
        let final_word = self.words.flush();
        self.words.clear();
        self.animator.disconnect(final_word, now);
        self.set_status(status, detail);
        info!(?status, "dialogue session ended");
    }

    fn drain_playback_events(&mut self) {
        loop {
            match self.playback_rx.try_recv() {
                Ok(event) => self.on_playback_event(&event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "playback event listener lagged");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    fn on_playback_event(&mut self, event: &PlaybackEvent) {
        match event.kind {
            PlaybackEventKind::Started => self.set_status(EngineStatus::Speaking, None),
            PlaybackEventKind::Progress => {}
            PlaybackEventKind::Completed => {
                if let Some(word) = self.words.flush() {
                    self.play_word(word);
                }
                if self.status == EngineStatus::Speaking {
                    self.set_status(EngineStatus::Listening, None);
                }
            }
        }
    }

    fn set_status(&mut self, status: EngineStatus, detail: Option<String>) {
        if self.status == status && detail.is_none() {
            return;
        }
        self.status = status;
        let _ = self.status_tx.send(EngineStatusEvent { status, detail });
    }
}
