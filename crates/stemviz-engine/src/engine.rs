//! Public control surface of the engine.
//!
//! One `VisualEngine` owns the transport and the scene director and is
//! the only type a host needs to touch. Every public method checks the
//! disposed flag first; after `dispose` everything is a silent no-op.

use glam::Vec3;

use crate::audio::transport::MultiTrackTransport;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::scene::director::{FramePlan, SceneDirector};

pub type TrackChangeCallback = Box<dyn FnMut(&str)>;
pub type DurationChangeCallback = Box<dyn FnMut(f64)>;

pub struct VisualEngine {
    transport: MultiTrackTransport,
    director: SceneDirector,
    main_stem: String,
    on_track_change: Option<TrackChangeCallback>,
    on_duration_change: Option<DurationChangeCallback>,
    announced_duration: f64,
    announced_track: bool,
    last_plan_view: Option<FramePlan>,
    dragging: bool,
    disposed: bool,
}

impl VisualEngine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let transport = MultiTrackTransport::new(&config)?;
        let director = SceneDirector::new(config.roles.clone(), config.model_path.as_deref());
        let main_stem = config
            .stems
            .first()
            .map(|s| s.name.clone())
            .unwrap_or_default();

        Ok(Self {
            transport,
            director,
            main_stem,
            on_track_change: None,
            on_duration_change: None,
            announced_duration: 0.0,
            announced_track: false,
            last_plan_view: None,
            dragging: false,
            disposed: false,
        })
    }

    pub fn on_track_change(&mut self, callback: TrackChangeCallback) {
        self.on_track_change = Some(callback);
    }

    pub fn on_duration_change(&mut self, callback: DurationChangeCallback) {
        self.on_duration_change = Some(callback);
    }

    /// Block until every stem load has settled (bounded wait).
    pub fn when_ready(&self) {
        if self.disposed {
            return;
        }
        self.transport.when_ready();
    }

    pub fn play(&mut self) {
        if self.disposed {
            return;
        }
        self.transport.play();
    }

    /// Pause playback; returns the time it stopped at.
    pub fn pause(&mut self) -> f64 {
        if self.disposed {
            return 0.0;
        }
        self.transport.pause()
    }

    pub fn seek(&mut self, secs: f64) {
        if self.disposed {
            return;
        }
        self.transport.seek(secs);
    }

    pub fn is_playing(&self) -> bool {
        !self.disposed && self.transport.is_playing()
    }

    pub fn current_time(&self) -> f64 {
        if self.disposed {
            return 0.0;
        }
        self.transport.current_time()
    }

    pub fn duration(&self) -> f64 {
        if self.disposed {
            return 0.0;
        }
        self.transport.duration()
    }

    pub fn fps(&self) -> f32 {
        self.director.fps()
    }

    /// Advance one frame and return what to draw. `None` after dispose.
    pub fn tick(&mut self, real_dt: f32) -> Option<FramePlan> {
        if self.disposed {
            return None;
        }

        let snapshots = self.transport.snapshots();
        let time = self.transport.current_time();
        let plan = self.director.tick(real_dt, time, &snapshots);

        self.announce_changes();

        self.last_plan_view = Some(plan);
        Some(plan)
    }

    /// Fire host callbacks when the duration becomes known or the main
    /// track first resolves.
    fn announce_changes(&mut self) {
        let duration = self.transport.duration();
        if duration > 0.0 && (duration - self.announced_duration).abs() > 1e-9 {
            self.announced_duration = duration;
            if let Some(cb) = &mut self.on_duration_change {
                cb(duration);
            }
            if !self.announced_track {
                self.announced_track = true;
                let name = self.main_stem.clone();
                if let Some(cb) = &mut self.on_track_change {
                    cb(&name);
                }
            }
        }
    }

    /// Normalized pointer position over the canvas, or `None` when the
    /// pointer leaves. Drives the camera hover offset.
    pub fn set_pointer_position(&mut self, x: Option<f32>, y: Option<f32>) {
        if self.disposed {
            return;
        }
        self.director.set_pointer(x.zip(y));
    }

    /// Pointer press at normalized coordinates. Returns true when the
    /// core body was hit and a drag started.
    pub fn pointer_down(&mut self, x: f32, y: f32) -> bool {
        if self.disposed {
            return false;
        }
        let Some(world) = self.pointer_world(x, y) else {
            return false;
        };
        self.dragging = self.director.core_mut().pointer_down(world);
        self.dragging
    }

    pub fn pointer_move(&mut self, x: f32, y: f32) {
        if self.disposed || !self.dragging {
            return;
        }
        if let Some(world) = self.pointer_world(x, y) {
            self.director.core_mut().pointer_drag(world);
        }
    }

    pub fn pointer_up(&mut self) {
        if self.disposed {
            return;
        }
        self.dragging = false;
        self.director.core_mut().pointer_up();
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        if self.disposed {
            return;
        }
        self.director.set_aspect(width, height);
    }

    /// Idempotent teardown; all later calls are no-ops.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.transport.dispose();
    }

    /// Read access to the scene for the host's renderer.
    pub fn scene(&self) -> &SceneDirector {
        &self.director
    }

    fn pointer_world(&self, x: f32, y: f32) -> Option<Vec3> {
        let plan = self.last_plan_view.as_ref()?;
        Some(self.director.pointer_to_world(plan, x, y))
    }
}

impl Drop for VisualEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}
