use std::sync::Arc;
use std::time::Duration;

use ayla_core::codec::encode_base64;
use ayla_core::lipsync::{collapse_soft_consonants, sanitize, sanitize::ALPHABET, WordAccumulator};
use ayla_core::playback::virtual_device::ScheduledSource;
use ayla_core::{
    AylaEngine, CharacterRig, EngineConfig, EngineStatus, MorphTarget, MorphWeight,
    PlaybackEvent, PlaybackEventKind, SessionEvent, VirtualDevice,
};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

#[derive(Clone, Default)]
struct RecordingRig {
    updates: Arc<Mutex<Vec<Vec<MorphWeight>>>>,
    greetings: Arc<Mutex<usize>>,
}

impl CharacterRig for RecordingRig {
    fn update_morph_weights(&mut self, weights: &[MorphWeight]) {
        self.updates.lock().push(weights.to_vec());
    }

    fn play_greeting_gesture(&mut self) {
        *self.greetings.lock() += 1;
    }
}

type Engine = AylaEngine<VirtualDevice, RecordingRig>;

fn session() -> (Engine, VirtualDevice, RecordingRig) {
    let device = VirtualDevice::new();
    let rig = RecordingRig::default();
    let mut engine = AylaEngine::new(EngineConfig::default(), device.clone(), rig.clone())
        .expect("default config is valid");
    engine.connect();
    (engine, device, rig)
}

fn speech(samples: usize, text: Option<&str>) -> SessionEvent {
    let bytes: Vec<u8> = (0..samples)
        .flat_map(|i| (((i % 64) as i16 - 32) * 256).to_le_bytes())
        .collect();
    SessionEvent::AudioChunk {
        data: encode_base64(&bytes),
        mime_type: "audio/pcm;rate=24000".into(),
        text: text.map(str::to_owned),
    }
}

fn run_for(engine: &mut Engine, device: &VirtualDevice, ms: u64) {
    for _ in 0..ms / 10 {
        device.advance(Duration::from_millis(10));
        engine.tick();
    }
}

fn drain(rx: &mut broadcast::Receiver<PlaybackEvent>) -> Vec<PlaybackEvent> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(ev) => out.push(ev),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return out,
        }
    }
}

fn assert_abutting(sources: &[ScheduledSource]) {
    for pair in sources.windows(2) {
        assert_eq!(
            pair[1].start,
            pair[0].end(),
            "{} should start where {} ends",
            pair[1].id,
            pair[0].id
        );
    }
}

#[test]
fn bursty_stream_schedules_without_gaps() {
    let (mut engine, device, _) = session();

    // Irregular network bursts: sizes unrelated to the 7680-sample chunking.
    for (samples, gap_ms) in [(5000, 0), (9000, 40), (300, 10), (12000, 120), (4000, 30)] {
        run_for(&mut engine, &device, gap_ms);
        engine.handle(speech(samples, None)).unwrap();
    }
    engine.handle(SessionEvent::TurnComplete).unwrap();
    run_for(&mut engine, &device, 2_000);

    let sources = device.scheduled();
    let total: usize = sources.iter().map(|s| s.samples).sum();
    assert_eq!(total, 30_300);
    assert_eq!(sources.len(), 4, "three full chunks plus the flushed tail");
    assert_abutting(&sources);
}

#[test]
fn timeline_never_moves_backwards_across_turns() {
    let (mut engine, device, _) = session();
    let mut last = engine.streamer().scheduled_time();

    for turn in 0..3 {
        engine.handle(speech(7680 * 2 + 100 * turn, Some("salam"))).unwrap();
        assert!(engine.streamer().scheduled_time() >= last);
        last = engine.streamer().scheduled_time();

        run_for(&mut engine, &device, 150);
        assert!(engine.streamer().scheduled_time() >= last);
        last = engine.streamer().scheduled_time();

        engine.handle(SessionEvent::TurnComplete).unwrap();
        run_for(&mut engine, &device, 1_000);
        assert!(engine.streamer().scheduled_time() >= last);
        last = engine.streamer().scheduled_time();
    }

    let sources = device.scheduled();
    for pair in sources.windows(2) {
        assert!(pair[1].start >= pair[0].end(), "buffers never overlap");
    }
}

#[test]
fn three_chunks_complete_exactly_once() {
    let (mut engine, device, _) = session();
    let mut rx = engine.subscribe_playback();

    for _ in 0..3 {
        engine.handle(speech(7680, None)).unwrap();
    }
    engine.handle(SessionEvent::TurnComplete).unwrap();
    run_for(&mut engine, &device, 3_000);

    let events = drain(&mut rx);
    let completed = events
        .iter()
        .filter(|e| e.kind == PlaybackEventKind::Completed)
        .count();
    assert_eq!(completed, 1);
    assert_eq!(events.first().map(|e| e.kind), Some(PlaybackEventKind::Started));
    assert!(events.windows(2).all(|w| w[1].seq == w[0].seq + 1));
    assert_eq!(engine.streamer().snapshot().completions, 1);
    assert_eq!(engine.status(), EngineStatus::Listening);
}

#[test]
fn repeated_stop_is_harmless() {
    let (mut engine, device, _) = session();
    engine.handle(speech(7680 * 4, Some("salam"))).unwrap();
    run_for(&mut engine, &device, 200);

    engine.handle(SessionEvent::Interrupted).unwrap();
    engine.handle(SessionEvent::Interrupted).unwrap();
    assert_eq!(engine.streamer().queued_chunks(), 0);
    assert_eq!(engine.streamer().pending_samples(), 0);
    assert!(device.active_sources().is_empty());

    // And once more after everything has drained.
    run_for(&mut engine, &device, 1_000);
    engine.handle(SessionEvent::Interrupted).unwrap();
    assert!(device.active_sources().is_empty());
    assert!((device.gain() - 0.0).abs() < f32::EPSILON);
    run_for(&mut engine, &device, 200);
    assert!((device.gain() - 1.0).abs() < f32::EPSILON);
}

#[test]
fn interruption_lands_on_full_neutral_pose() {
    let (mut engine, device, rig) = session();
    engine.handle(speech(4800, Some("salam"))).unwrap();
    engine.handle(speech(4800, Some("necəsən"))).unwrap();
    run_for(&mut engine, &device, 120);
    assert!(rig.updates.lock().iter().flatten().any(|w| w.weight > 0.0));

    engine.handle(SessionEvent::Interrupted).unwrap();
    assert_eq!(engine.animator().queued_frames(), 0);
    assert!(!engine.animator().is_animating());
    run_for(&mut engine, &device, 50);

    let last = rig.updates.lock().last().cloned().expect("rig was driven");
    assert_eq!(last.len(), 8);
    for target in [
        MorphTarget::MergedOpenMouth,
        MorphTarget::LipOpen,
        MorphTarget::TightO,
        MorphTarget::DentalLip,
        MorphTarget::Explosive,
        MorphTarget::Wide,
        MorphTarget::Affricate,
        MorphTarget::Tight,
    ] {
        let w = last.iter().find(|w| w.target == target).expect("target sent");
        assert_eq!(w.weight, 0.0, "{target} not neutral");
    }
    assert!(!engine.animator().has_pending_timers());
}

#[test]
fn word_accumulation_follows_audio() {
    let mut acc = WordAccumulator::new();
    assert!(acc.on_audio(Some("salam"), 100).is_none());
    assert!(acc.on_audio(Some(""), 50).is_none());
    let first = acc.on_audio(Some("necesen"), 80).expect("salam flushed");
    assert_eq!((first.text.as_str(), first.duration_ms), ("salam", 150));
    let second = acc.flush().expect("necesen pending");
    assert_eq!((second.text.as_str(), second.duration_ms), ("necesen", 80));
}

#[test]
fn sanitizer_output_is_closed_and_stable() {
    for text in [
        "Salam, necəsən?",
        "STRESS test!!",
        "Üç qardaş - 3 brothers",
        "    ",
        "ŞŞŞrrr",
    ] {
        let out = sanitize(text);
        assert!(out
            .iter()
            .all(|c| ALPHABET.contains(*c) || c.is_ascii_digit() || *c == '_'));
        assert_eq!(collapse_soft_consonants(&out), out);
    }
}

#[test]
fn per_character_slots_stay_in_bounds() {
    let config = EngineConfig::default().animator;
    for (duration_ms, chars) in [(1, 1), (10, 10), (320, 3), (5_000, 2), (160, 1), (30, 1)] {
        let per = config.char_duration(duration_ms, chars);
        assert!(
            (Duration::from_millis(20)..=Duration::from_millis(150)).contains(&per),
            "{duration_ms} ms over {chars} chars gave {per:?}"
        );
    }
}

#[test]
fn greeting_word_waves_once() {
    let (mut engine, device, rig) = session();
    engine.handle(speech(4800, Some("Hello"))).unwrap();
    engine.handle(SessionEvent::TurnComplete).unwrap();
    run_for(&mut engine, &device, 1_000);
    assert_eq!(*rig.greetings.lock(), 1);
    assert!(engine.animator().is_idle());
    assert!(engine.animator().weights().is_neutral());
}
