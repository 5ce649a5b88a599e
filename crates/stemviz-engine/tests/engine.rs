//! End-to-end engine scenarios over synthetic stem files.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use stemviz_engine::{EngineConfig, StemDesc, VisualEngine};

/// Write a mono 16-bit PCM WAV with a sine tone.
fn write_wav(path: &PathBuf, secs: f64, freq: f32) {
    let sample_rate = 22_050u32;
    let count = (secs * sample_rate as f64) as usize;
    let data_len = (count * 2) as u32;

    let mut bytes = Vec::with_capacity(44 + count * 2);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
    bytes.extend_from_slice(&1u16.to_le_bytes()); // mono
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    for i in 0..count {
        let s = (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin();
        bytes.extend_from_slice(&((s * 0.6 * i16::MAX as f32) as i16).to_le_bytes());
    }
    std::fs::write(path, bytes).unwrap();
}

struct StemFiles {
    dir: PathBuf,
    stems: Vec<StemDesc>,
}

impl StemFiles {
    fn create(tag: &str, names: &[&str]) -> Self {
        let dir = std::env::temp_dir().join(format!("stemviz-test-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let stems = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let path = dir.join(format!("{name}.wav"));
                write_wav(&path, 6.0, 110.0 * (i + 1) as f32);
                StemDesc {
                    name: name.to_string(),
                    path,
                }
            })
            .collect();
        Self { dir, stems }
    }
}

impl Drop for StemFiles {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.dir).ok();
    }
}

fn engine_over(files: &StemFiles) -> VisualEngine {
    VisualEngine::new(EngineConfig::silent(files.stems.clone())).unwrap()
}

#[test]
fn plays_pauses_and_reports_time() {
    let files = StemFiles::create("basic", &["main", "drums", "bass"]);
    let mut engine = engine_over(&files);
    engine.when_ready();
    assert!((engine.duration() - 6.0).abs() < 0.05);

    engine.play();
    assert!(engine.is_playing());
    std::thread::sleep(Duration::from_millis(120));

    let paused_at = engine.pause();
    assert!(paused_at > 0.05, "paused at {paused_at}");
    assert!((engine.current_time() - paused_at).abs() < 1e-6);
}

#[test]
fn seek_is_observable_immediately_on_all_stems() {
    let files = StemFiles::create("seek", &["main", "drums"]);
    let mut engine = engine_over(&files);
    engine.when_ready();

    engine.seek(3.0);
    assert!((engine.current_time() - 3.0).abs() < 1e-6);

    engine.play();
    std::thread::sleep(Duration::from_millis(200));
    // Drift correction has had two windows to run; snapshots taken on
    // the analysis thread must sit near the main playhead
    let t = engine.current_time();
    assert!(t > 3.1 && t < 3.6, "time {t}");
}

#[test]
fn pause_resize_resume_round_trip() {
    let files = StemFiles::create("resize", &["main", "drums"]);
    let mut engine = engine_over(&files);
    engine.when_ready();
    engine.play();
    std::thread::sleep(Duration::from_millis(100));

    let captured = engine.pause();
    let origin = engine.scene().core().position();
    engine.resize(640.0, 480.0);
    engine.play();
    let resumed = engine.current_time();
    assert!(
        (resumed - captured).abs() < 0.05,
        "captured {captured}, resumed {resumed}"
    );
    // Resize only touches the projection; the spawn origin stays put
    assert_eq!(engine.scene().core().position(), origin);
}

#[test]
fn unresolvable_stems_never_hang() {
    let stems: Vec<StemDesc> = ["main", "silent_a", "silent_b"]
        .iter()
        .map(|name| StemDesc {
            name: name.to_string(),
            path: PathBuf::from(format!("/nonexistent/{name}.wav")),
        })
        .collect();
    let mut config = EngineConfig::silent(stems);
    config.load_timeout = Duration::from_millis(200);
    config.load_retries = 2;

    let mut engine = VisualEngine::new(config).unwrap();
    let start = Instant::now();
    engine.when_ready();
    assert!(
        start.elapsed() < Duration::from_millis(200) * 3 + Duration::from_millis(500),
        "when_ready took {:?}",
        start.elapsed()
    );

    // Playback proceeds with whatever state the stems reached
    engine.play();
    assert!(engine.is_playing());
    assert_eq!(engine.duration(), 0.0);
    assert!(engine.tick(1.0 / 60.0).is_some());
}

#[test]
fn dispose_silences_every_entry_point() {
    let files = StemFiles::create("dispose", &["main"]);
    let mut engine = engine_over(&files);
    engine.when_ready();
    engine.play();
    engine.dispose();
    engine.dispose();

    engine.play();
    engine.seek(2.0);
    engine.resize(100.0, 100.0);
    engine.set_pointer_position(Some(0.5), Some(0.5));
    engine.pointer_up();
    assert!(!engine.pointer_down(0.5, 0.5));
    assert!(engine.tick(1.0 / 60.0).is_none());
    assert_eq!(engine.current_time(), 0.0);
    assert_eq!(engine.duration(), 0.0);
    assert_eq!(engine.pause(), 0.0);
}

#[test]
fn duration_callback_fires_once_ready() {
    let files = StemFiles::create("callbacks", &["main", "drums"]);
    let mut engine = engine_over(&files);

    let heard = std::sync::Arc::new(std::sync::Mutex::new((None::<f64>, None::<String>)));
    let heard_duration = heard.clone();
    let heard_track = heard.clone();
    engine.on_duration_change(Box::new(move |secs| {
        heard_duration.lock().unwrap().0 = Some(secs);
    }));
    engine.on_track_change(Box::new(move |name| {
        heard_track.lock().unwrap().1 = Some(name.to_string());
    }));

    engine.when_ready();
    engine.tick(1.0 / 60.0);

    let heard = heard.lock().unwrap();
    let duration = heard.0.expect("duration callback");
    assert!((duration - 6.0).abs() < 0.05);
    assert_eq!(heard.1.as_deref(), Some("main"));
}

#[test]
fn frame_plan_carries_overlay_in_early_window() {
    let files = StemFiles::create("overlay", &["main"]);
    let mut engine = engine_over(&files);
    engine.when_ready();

    // Playback at t=0 sits inside the opening fade
    let plan = engine.tick(1.0 / 60.0).unwrap();
    let (_, opacity) = plan.overlay().expect("opening fade overlay");
    assert!(opacity > 0.9);

    // The plan spells out the pass order: capture everything but the
    // core, then the core over the capture, then the wash
    let passes = plan.passes();
    assert_eq!(passes.len(), 3);
    assert!(passes[0].captures_refraction && !passes[0].core);
    assert!(passes[1].samples_refraction && passes[1].core && !passes[1].particles);
    assert!(passes[2].wash.is_some());
}

#[test]
fn analysis_snapshots_reach_the_scene() {
    let files = StemFiles::create("analysis", &["main", "drums"]);
    let mut engine = engine_over(&files);
    engine.when_ready();
    engine.seek(1.0);
    engine.play();
    std::thread::sleep(Duration::from_millis(150));

    // A pure tone stem must register nonzero band energy by now
    engine.tick(1.0 / 60.0);
    assert!(engine.fps() >= 0.0);
}
