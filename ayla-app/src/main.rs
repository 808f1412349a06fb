//! Ayla host binary.
//!
//! Drives `AylaEngine` from a recorded dialogue session (`--session`), relays
//! the live microphone (`--mic`), or both. `--dry-run` swaps the sound card
//! for a `VirtualDevice` whose clock advances one tick per interval.
//!
//! ## Runtime note
//!
//! The engine is single-threaded and not `Send` once a cpal input stream is
//! attached, so everything runs on a current-thread Tokio runtime. The only
//! other threads are the cpal callbacks, the playback owner thread and the
//! microphone pump.

mod replay;
mod rig;
mod settings;
mod uplink;

use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use ayla_core::{
    audio::{list_devices, MicCapture, WavRecorder},
    buffering::{create_sample_ring, CAPTURE_RING_CAPACITY},
    capture::pump::{self, MicFramer, PumpContext},
    codec::decode_base64,
    AylaEngine, CpalPlayback, EngineStatusEvent, MicChunk, MicLevelEvent, MicrophoneRelay,
    PlaybackDevice, SessionEvent, VirtualDevice,
};
use clap::Parser;
use crossbeam_channel::Receiver;
use replay::{read_session, ReplayCursor};
use rig::LoggingRig;
use settings::{default_settings_path, load_settings, save_settings, AppSettings};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uplink::LoggingUplink;

/// Frames buffered between the pump thread and the relay.
const MIC_CHANNEL_CAP: usize = 32;

#[derive(Debug, Parser)]
#[command(name = "ayla", version, about = "Real-time speech playback and lip-sync host")]
struct Args {
    /// Session log to replay: JSON lines of `{ "atMs": .., "event": .. }`.
    #[arg(long)]
    session: Option<PathBuf>,

    /// Settings file. Defaults to the platform data directory.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Write the session's decoded speech to this WAV file.
    #[arg(long)]
    wav_out: Option<PathBuf>,

    /// Write relayed microphone frames to this WAV file.
    #[arg(long)]
    mic_wav: Option<PathBuf>,

    /// Use a virtual output device instead of the sound card.
    #[arg(long)]
    dry_run: bool,

    /// Relay the microphone upstream while running.
    #[arg(long)]
    mic: bool,

    /// Print audio endpoints as JSON lines and exit.
    #[arg(long)]
    list_devices: bool,

    /// Write the effective settings to the settings file and exit.
    #[arg(long)]
    save_settings: bool,

    /// Keep driving the engine this long after the last replayed event.
    #[arg(long, default_value_t = 3_000)]
    linger_ms: u64,
}

struct MicSession {
    capture: MicCapture,
    running: Arc<AtomicBool>,
    pump: JoinHandle<()>,
    frames: Receiver<MicChunk>,
    relay: MicrophoneRelay<LoggingUplink>,
    levels: broadcast::Receiver<MicLevelEvent>,
}

impl MicSession {
    fn start(settings: &AppSettings, mic_wav: Option<&Path>) -> Result<Self> {
        let relay_config = &settings.engine.relay;
        let (producer, consumer) = create_sample_ring(CAPTURE_RING_CAPACITY);
        let running = Arc::new(AtomicBool::new(true));
        let capture = MicCapture::open(
            producer,
            Arc::clone(&running),
            settings.preferred_input_device.as_deref(),
        )
        .context("opening microphone")?;

        let framer = MicFramer::new(
            capture.sample_rate,
            relay_config.sample_rate,
            relay_config.frame_samples,
        )?;
        let (tx, frames) = crossbeam_channel::bounded(MIC_CHANNEL_CAP);
        let ctx = PumpContext {
            consumer,
            framer,
            running: Arc::clone(&running),
            tx,
            diagnostics: Arc::default(),
        };
        let pump = std::thread::Builder::new()
            .name("ayla-mic-pump".into())
            .spawn(move || pump::run(ctx))
            .context("spawning microphone pump")?;

        let uplink = match mic_wav {
            Some(path) => LoggingUplink::recording_to(path, relay_config.sample_rate)?,
            None => LoggingUplink::new(),
        };
        let relay = MicrophoneRelay::new(relay_config, uplink);
        let levels = relay.subscribe_levels();
        info!(capture_rate = capture.sample_rate, "microphone relay started");
        Ok(Self {
            capture,
            running,
            pump,
            frames,
            relay,
            levels,
        })
    }

    fn pump_once(&mut self, now: Duration) {
        while let Ok(chunk) = self.frames.try_recv() {
            self.relay.on_data(&chunk);
            self.relay.on_volume(chunk.peak, now);
        }
        loop {
            match self.levels.try_recv() {
                Ok(level) => debug!(seq = level.seq, level = level.level, "microphone level"),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    }

    fn shutdown(self) -> Result<()> {
        self.capture.stop();
        self.running.store(false, Ordering::Relaxed);
        drop(self.frames);
        if self.pump.join().is_err() {
            warn!("microphone pump panicked");
        }
        let frames = self.relay.frames_sent();
        let errors = self.relay.send_errors();
        let recorded = self.relay.into_uplink().finish()?;
        info!(frames, errors, recorded_secs = recorded.unwrap_or(0.0), "microphone relay stopped");
        Ok(())
    }
}

fn record_speech(wav: &mut WavRecorder, data: &str) {
    match decode_base64(data).and_then(|bytes| wav.write_pcm16(&bytes)) {
        Ok(()) => {}
        Err(e) => warn!("skipping speech chunk in wav output: {e}"),
    }
}

fn log_status(rx: &mut broadcast::Receiver<EngineStatusEvent>) {
    loop {
        match rx.try_recv() {
            Ok(event) => info!(
                status = ?event.status,
                detail = event.detail.as_deref().unwrap_or(""),
                "engine status"
            ),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ayla=info")),
        )
        .init();

    let args = Args::parse();

    if args.list_devices {
        for device in list_devices() {
            println!("{}", serde_json::to_string(&device)?);
        }
        return Ok(());
    }

    let settings_path = args.settings.clone().unwrap_or_else(default_settings_path);
    let settings = load_settings(&settings_path);
    if args.save_settings {
        save_settings(&settings_path, &settings)
            .with_context(|| format!("writing {}", settings_path.display()))?;
        info!(path = %settings_path.display(), "settings saved");
        return Ok(());
    }

    let entries = match &args.session {
        Some(path) => read_session(path)?,
        None => Vec::new(),
    };
    let relay_mic = args.mic || settings.relay_microphone;
    if entries.is_empty() && !relay_mic {
        bail!("nothing to do: pass --session with a non-empty log and/or --mic");
    }
    info!(events = entries.len(), dry_run = args.dry_run, "Ayla starting");

    let virtual_device = args.dry_run.then(VirtualDevice::new);
    let device: Box<dyn PlaybackDevice> = match &virtual_device {
        Some(device) => Box::new(device.clone()),
        None => Box::new(CpalPlayback::open(settings.preferred_output_device.as_deref())?),
    };
    let rig = LoggingRig::new();
    let rig_stats = rig.stats();
    let mut engine = AylaEngine::new(settings.engine.clone(), device, rig)?;
    let mut status_rx = engine.subscribe_status();
    engine.connect();
    engine.set_volume(settings.volume);

    let mut speech_wav = match &args.wav_out {
        Some(path) => Some(WavRecorder::create(path, settings.engine.streamer.sample_rate)?),
        None => None,
    };
    let mut mic = if relay_mic {
        Some(MicSession::start(&settings, args.mic_wav.as_deref())?)
    } else {
        None
    };

    let mut cursor = ReplayCursor::new(entries);
    let replaying = !cursor.is_exhausted();
    let linger = Duration::from_millis(args.linger_ms);
    let tick = settings.tick_interval();
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let started = Instant::now();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("shutdown requested");
                break;
            }
            _ = interval.tick() => {}
        }

        let elapsed = match &virtual_device {
            Some(device) => {
                device.advance(tick);
                device.current_time()
            }
            None => started.elapsed(),
        };

        for entry in cursor.due(elapsed) {
            if let (Some(wav), SessionEvent::AudioChunk { data, .. }) =
                (speech_wav.as_mut(), &entry.event)
            {
                record_speech(wav, data);
            }
            if let Err(e) = engine.handle(entry.event.clone()) {
                warn!(at_ms = entry.at_ms, "session event rejected: {e}");
            }
        }
        engine.tick();
        log_status(&mut status_rx);

        if let Some(mic) = mic.as_mut() {
            mic.pump_once(started.elapsed());
        }

        if replaying && mic.is_none() && cursor.is_exhausted() {
            let settled = engine.animator().is_idle()
                && !engine.animator().has_pending_timers()
                && !engine.streamer().is_playing()
                && !engine.streamer().has_pending_timers();
            if settled || elapsed > cursor.last_at() + linger {
                break;
            }
        }
    }

    engine.handle(SessionEvent::Closed)?;
    log_status(&mut status_rx);

    let snapshot = engine.streamer().snapshot();
    {
        let rig = rig_stats.lock();
        info!(
            buffers = snapshot.buffers_scheduled,
            underruns = snapshot.underruns,
            completions = snapshot.completions,
            dropped_chunks = engine.chunks_dropped(),
            rig_updates = rig.updates,
            greetings = rig.greetings,
            "session finished"
        );
    }

    if let Some(wav) = speech_wav {
        wav.finalize().context("finalizing speech wav")?;
    }
    if let Some(mic) = mic {
        mic.shutdown()?;
    }
    Ok(())
}
