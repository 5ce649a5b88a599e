//! Per-frame orchestration: choreography, particles, core body, camera
//! and the three-pass frame plan.

use glam::{Mat4, Vec3, Vec4Swizzles};
use std::collections::HashMap;
use std::time::Instant;

use crate::audio::stem::StemAnalysis;
use crate::config::StemRoles;
use crate::scene::camera::{CameraInputs, CandidateLoudness, OrbitCamera};
use crate::scene::choreography::{self, Overlay};
use crate::scene::core_body::CoreBody;
use crate::scene::particles::{ParticlePool, PoolInputs};

/// A single stalled frame must not explode the physics.
const MAX_DT: f32 = 0.1;

/// Late/early overlay color (cold blue wash).
const OVERLAY_COLOR: Vec3 = Vec3::new(0.25, 0.4, 1.0);

/// One planned render pass: what it draws and how its output is used.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PassPlan {
    pub particles: bool,
    pub smoke: bool,
    pub core: bool,
    /// Rendered off-screen and kept as the refraction source.
    pub captures_refraction: bool,
    /// Draws over the captured pre-pass, sampling it (the core's
    /// see-through look).
    pub samples_refraction: bool,
    /// Full-screen additive wash.
    pub wash: Option<(Vec3, f32)>,
}

/// Pass 1: everything but the core, captured as the refraction source.
const OCCLUSION_PREPASS: PassPlan = PassPlan {
    particles: true,
    smoke: true,
    core: false,
    captures_refraction: true,
    samples_refraction: false,
    wash: None,
};

/// Pass 2: the core alone, consuming the pre-pass capture.
const MAIN_PASS: PassPlan = PassPlan {
    particles: false,
    smoke: false,
    core: true,
    captures_refraction: false,
    samples_refraction: true,
    wash: None,
};

/// What the host must draw this frame. Passes come in execution order:
/// the occlusion pre-pass (core hidden, captured as the refraction
/// source), the main pass (core visible, sampling it), and a third
/// overlay pass only when an overlay window is active.
#[derive(Clone, Copy)]
pub struct FramePlan {
    pub view: Mat4,
    pub projection: Mat4,
    passes: [PassPlan; 3],
    pass_count: usize,
}

impl FramePlan {
    fn plan(view: Mat4, projection: Mat4, overlay: Option<(Vec3, f32)>) -> Self {
        let mut passes = [OCCLUSION_PREPASS, MAIN_PASS, MAIN_PASS];
        let mut pass_count = 2;
        if let Some(wash) = overlay {
            passes[2] = PassPlan {
                particles: false,
                smoke: false,
                core: false,
                captures_refraction: false,
                samples_refraction: false,
                wash: Some(wash),
            };
            pass_count = 3;
        }
        Self {
            view,
            projection,
            passes,
            pass_count,
        }
    }

    /// The passes to execute, in order.
    pub fn passes(&self) -> &[PassPlan] {
        &self.passes[..self.pass_count]
    }

    /// The overlay wash, when a third pass is planned.
    pub fn overlay(&self) -> Option<(Vec3, f32)> {
        self.passes().iter().find_map(|p| p.wash)
    }
}

/// Once-per-second frame rate estimate.
struct FpsSampler {
    frames: u32,
    window_started: Instant,
    fps: f32,
}

impl FpsSampler {
    fn new() -> Self {
        Self {
            frames: 0,
            window_started: Instant::now(),
            fps: 0.0,
        }
    }

    fn tick(&mut self) {
        self.frames += 1;
        let elapsed = self.window_started.elapsed().as_secs_f32();
        if elapsed >= 1.0 {
            self.fps = self.frames as f32 / elapsed;
            self.frames = 0;
            self.window_started = Instant::now();
        }
    }
}

pub struct SceneDirector {
    roles: StemRoles,
    pool: ParticlePool,
    core: CoreBody,
    camera: OrbitCamera,
    fps: FpsSampler,
    aspect: f32,
    pointer: Option<(f32, f32)>,
}

fn energy(snapshots: &HashMap<String, StemAnalysis>, name: &str) -> f32 {
    snapshots.get(name).map_or(0.0, |s| s.bands.overall)
}

impl SceneDirector {
    pub fn new(roles: StemRoles, model_path: Option<&std::path::Path>) -> Self {
        Self {
            roles,
            pool: ParticlePool::new(),
            core: CoreBody::new(model_path),
            camera: OrbitCamera::new(),
            fps: FpsSampler::new(),
            aspect: 16.0 / 9.0,
            pointer: None,
        }
    }

    pub fn set_aspect(&mut self, width: f32, height: f32) {
        if width > 0.0 && height > 0.0 {
            self.aspect = width / height;
        }
    }

    pub fn set_pointer(&mut self, pointer: Option<(f32, f32)>) {
        self.pointer = pointer;
    }

    pub fn fps(&self) -> f32 {
        self.fps.fps
    }

    pub fn pool(&self) -> &ParticlePool {
        &self.pool
    }

    pub fn core(&self) -> &CoreBody {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut CoreBody {
        &mut self.core
    }

    /// Advance the whole scene one frame and produce the frame plan.
    pub fn tick(
        &mut self,
        real_dt: f32,
        playback_time: f64,
        snapshots: &HashMap<String, StemAnalysis>,
    ) -> FramePlan {
        let dt = real_dt.min(MAX_DT).max(0.0);
        let levels = choreography::at(playback_time);

        let drive_energy = energy(snapshots, &self.roles.drive);
        let bass_snapshot = snapshots.get(&self.roles.bass);
        let bass_energy = bass_snapshot.map_or(0.0, |s| s.bands.bass);
        let kick = bass_snapshot.map_or(0.0, |s| s.percussion.kick);
        let jitter_energy = energy(snapshots, &self.roles.jitter);
        let vocal_snapshot = snapshots.get(&self.roles.pulse);
        let vocal_energy = vocal_snapshot.map_or(0.0, |s| s.bands.overall);
        let modifier_energy = energy(snapshots, &self.roles.modifier);
        let transient = snapshots
            .get(&self.roles.drive)
            .map_or(0.0, |s| s.percussion.transient);

        self.core.update(
            dt,
            playback_time,
            vocal_energy,
            modifier_energy,
            levels.core_scale,
        );

        self.pool.update(&PoolInputs {
            dt,
            levels: &levels,
            drive_energy,
            drive_active: drive_energy > 0.05,
            bass_energy,
            kick,
            jitter_energy,
            transient,
            origin: self.core.position(),
        });

        let candidates = CandidateLoudness([
            energy(snapshots, &self.roles.candidates[0]),
            energy(snapshots, &self.roles.candidates[1]),
            energy(snapshots, &self.roles.candidates[2]),
            energy(snapshots, &self.roles.candidates[3]),
        ]);
        let bass_index = self.candidate_index(&self.roles.bass);
        let drive_index = self.candidate_index(&self.roles.drive);

        let camera_inputs = CameraInputs {
            dt,
            time: playback_time,
            levels: &levels,
            bass_energy,
            kick,
            jitter_energy,
            candidates,
            bass_index,
            drive_index,
            pointer: self.pointer,
        };
        self.camera.update(&camera_inputs);

        let overlay = match levels.overlay {
            Overlay::None => None,
            Overlay::EarlyFade { opacity } => Some((Vec3::ZERO, opacity)),
            Overlay::VocalDriven => {
                let opacity = vocal_energy * 0.6;
                (opacity > 0.01).then_some((OVERLAY_COLOR, opacity))
            }
            Overlay::LateScripted { opacity } => Some((OVERLAY_COLOR, opacity)),
        };

        self.fps.tick();

        FramePlan::plan(
            self.camera.view_matrix(&camera_inputs),
            OrbitCamera::projection_matrix(self.aspect),
            overlay,
        )
    }

    fn candidate_index(&self, name: &str) -> usize {
        self.roles
            .candidates
            .iter()
            .position(|c| c == name)
            .unwrap_or(usize::MAX)
    }

    /// Map a normalized pointer position onto the world plane through
    /// the origin, facing the camera. Used for core body drags.
    pub fn pointer_to_world(&self, plan: &FramePlan, x: f32, y: f32) -> Vec3 {
        // Clip-space ray endpoints for this pixel
        let ndc_x = x * 2.0 - 1.0;
        let ndc_y = 1.0 - y * 2.0;
        let inverse = (plan.projection * plan.view).inverse();

        let near = inverse * glam::Vec4::new(ndc_x, ndc_y, -1.0, 1.0);
        let far = inverse * glam::Vec4::new(ndc_x, ndc_y, 1.0, 1.0);
        let near = near.xyz() / near.w;
        let far = far.xyz() / far.w;

        let dir = (far - near).normalize_or_zero();
        let normal = -dir;
        let denom = dir.dot(normal);
        if denom.abs() < 1e-6 {
            return Vec3::ZERO;
        }
        // Intersect with the plane through the origin facing the camera
        let t = (-near).dot(normal) / denom;
        near + dir * t
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StemDesc, StemRoles};

    fn roles() -> StemRoles {
        let stems: Vec<StemDesc> = ["main", "bass", "drums", "synth", "fx"]
            .iter()
            .map(|n| StemDesc {
                name: n.to_string(),
                path: std::path::PathBuf::new(),
            })
            .collect();
        StemRoles::from_manifest(&stems)
    }

    #[test]
    fn tick_with_no_snapshots_is_neutral() {
        let mut director = SceneDirector::new(roles(), None);
        let plan = director.tick(1.0 / 60.0, 100.0, &HashMap::new());
        assert!(plan.overlay().is_none());
        assert_eq!(plan.passes().len(), 2);
        assert!(director.pool().active_count() >= crate::scene::particles::MIN_PARTICLES);
    }

    #[test]
    fn prepass_captures_everything_but_the_core() {
        let mut director = SceneDirector::new(roles(), None);
        let plan = director.tick(1.0 / 60.0, 100.0, &HashMap::new());
        let prepass = plan.passes()[0];
        assert!(prepass.particles && prepass.smoke);
        assert!(!prepass.core);
        assert!(prepass.captures_refraction);
        assert!(!prepass.samples_refraction);
    }

    #[test]
    fn main_pass_draws_only_the_core_over_the_capture() {
        let mut director = SceneDirector::new(roles(), None);
        let plan = director.tick(1.0 / 60.0, 100.0, &HashMap::new());
        let main = plan.passes()[1];
        assert!(main.core);
        assert!(!main.particles && !main.smoke);
        assert!(main.samples_refraction);
        assert!(!main.captures_refraction);
    }

    #[test]
    fn dt_is_clamped_against_stalls() {
        let mut director = SceneDirector::new(roles(), None);
        // A 10-second stall must not fling particles out of the world
        director.tick(10.0, 100.0, &HashMap::new());
        for inst in director.pool().instances() {
            for c in inst.position {
                assert!(c.abs() < 100.0, "particle at {c}");
            }
        }
    }

    #[test]
    fn early_overlay_is_planned() {
        let mut director = SceneDirector::new(roles(), None);
        let plan = director.tick(1.0 / 60.0, 1.0, &HashMap::new());
        let (_, opacity) = plan.overlay().expect("early fade window");
        assert!(opacity > 0.8);
        // The wash is appended as a third pass drawing nothing else
        assert_eq!(plan.passes().len(), 3);
        let wash = plan.passes()[2];
        assert!(!wash.particles && !wash.smoke && !wash.core);
        assert!(wash.wash.is_some());
    }

    #[test]
    fn vocal_overlay_needs_vocal_energy() {
        let mid =
            (choreography::OVERLAY_VOCAL_WINDOW.0 + choreography::OVERLAY_VOCAL_WINDOW.1) / 2.0;
        let mut director = SceneDirector::new(roles(), None);

        let plan = director.tick(1.0 / 60.0, mid, &HashMap::new());
        assert!(plan.overlay().is_none());

        let mut snapshots = HashMap::new();
        let mut loud = StemAnalysis::default();
        loud.bands.overall = 0.8;
        snapshots.insert("main".to_string(), loud);
        let plan = director.tick(1.0 / 60.0, mid, &snapshots);
        let (_, opacity) = plan.overlay().expect("vocal-driven overlay");
        assert!((opacity - 0.48).abs() < 1e-3);
    }

    #[test]
    fn pointer_ray_hits_world_near_origin_plane() {
        let mut director = SceneDirector::new(roles(), None);
        let plan = director.tick(1.0 / 60.0, 100.0, &HashMap::new());
        let world = director.pointer_to_world(&plan, 0.5, 0.5);
        // Center of the screen looks at the look-at target, which
        // wanders within ~0.5 units of the origin
        assert!(world.length() < 2.0, "center ray hit {world}");
    }
}
