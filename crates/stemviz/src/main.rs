//! Host application: a nannou window around the engine.
//!
//! Usage: `stemviz <main.wav> [stem2.wav stem3.wav ...]`
//! With no arguments, every audio file in ./stems/ is loaded, sorted by
//! name, first file audible.

mod render;

use nannou::prelude::*;
use std::path::PathBuf;
use std::time::Instant;

use stemviz_engine::{EngineConfig, FramePlan, StemDesc, VisualEngine};

const SEEK_STEP_SECS: f64 = 5.0;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    nannou::app(model).update(update).run();
}

struct Model {
    engine: VisualEngine,
    plan: Option<FramePlan>,
    last_frame: Instant,
}

fn stem_manifest() -> Vec<StemDesc> {
    let args: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    let paths = if args.is_empty() {
        let mut found: Vec<PathBuf> = std::fs::read_dir("stems")
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| {
                        matches!(
                            p.extension().and_then(|e| e.to_str()),
                            Some("wav" | "mp3" | "flac" | "ogg" | "m4a")
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        found.sort();
        found
    } else {
        args
    };

    paths
        .into_iter()
        .map(|path| StemDesc {
            name: path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("stem")
                .to_string(),
            path,
        })
        .collect()
}

fn model(app: &App) -> Model {
    app.new_window()
        .size(1280, 720)
        .title("stemviz")
        .view(render::view)
        .key_pressed(key_pressed)
        .mouse_moved(mouse_moved)
        .mouse_pressed(mouse_pressed)
        .mouse_released(mouse_released)
        .resized(resized)
        .build()
        .expect("failed to create window");

    let stems = stem_manifest();
    if stems.is_empty() {
        log::error!("no stems given and nothing found in ./stems/");
        std::process::exit(1);
    }
    for (i, stem) in stems.iter().enumerate() {
        let role = if i == 0 { "main (audible)" } else { "silent" };
        log::info!("stem {}: '{}' [{}] {}", i, stem.name, role, stem.path.display());
    }

    let mut engine = match VisualEngine::new(EngineConfig::new(stems)) {
        Ok(engine) => engine,
        Err(err) => {
            log::error!("engine construction failed: {err}");
            std::process::exit(1);
        }
    };
    engine.on_duration_change(Box::new(|secs| log::info!("track duration: {secs:.1}s")));
    engine.on_track_change(Box::new(|name| log::info!("now playing: {name}")));

    Model {
        engine,
        plan: None,
        last_frame: Instant::now(),
    }
}

fn update(_app: &App, model: &mut Model, _update: Update) {
    let dt = model.last_frame.elapsed().as_secs_f32();
    model.last_frame = Instant::now();
    model.plan = model.engine.tick(dt);
}

fn key_pressed(_app: &App, model: &mut Model, key: Key) {
    match key {
        Key::Space => {
            if model.engine.is_playing() {
                model.engine.pause();
            } else {
                model.engine.play();
            }
        }
        Key::Left => {
            let t = model.engine.current_time();
            model.engine.seek((t - SEEK_STEP_SECS).max(0.0));
        }
        Key::Right => {
            let t = model.engine.current_time();
            model.engine.seek(t + SEEK_STEP_SECS);
        }
        _ => {}
    }
}

/// Window position -> normalized [0,1] coordinates, origin top-left.
fn normalized(app: &App, pos: Point2) -> (f32, f32) {
    let rect = app.window_rect();
    let x = ((pos.x - rect.left()) / rect.w()).clamp(0.0, 1.0);
    let y = ((rect.top() - pos.y) / rect.h()).clamp(0.0, 1.0);
    (x, y)
}

fn mouse_moved(app: &App, model: &mut Model, pos: Point2) {
    let (x, y) = normalized(app, pos);
    model.engine.set_pointer_position(Some(x), Some(y));
    model.engine.pointer_move(x, y);
}

fn mouse_pressed(app: &App, model: &mut Model, button: MouseButton) {
    if button == MouseButton::Left {
        let (x, y) = normalized(app, app.mouse.position());
        model.engine.pointer_down(x, y);
    }
}

fn mouse_released(_app: &App, model: &mut Model, button: MouseButton) {
    if button == MouseButton::Left {
        model.engine.pointer_up();
    }
}

fn resized(_app: &App, model: &mut Model, size: Vec2) {
    model.engine.resize(size.x, size.y);
}
