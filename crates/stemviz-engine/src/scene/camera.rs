//! Orbit camera with loudness heuristics, pointer hover offset and
//! bass shake.

use glam::{Mat4, Vec3};
use rand::Rng;

use crate::scene::choreography::Levels;

const BASE_ROTATION_SPEED: f32 = 0.12;

/// Radius targets for the priority cascade.
const BURST_RADIUS: f32 = 28.0;
const WALK_RADIUS_RANGE: (f32, f32) = (12.0, 25.0);
const ZERO_BASS_RADIUS: f32 = 3.0;
const LERP_RADIUS_RANGE: (f32, f32) = (3.0, 12.0);
/// Bass energy below this counts as "no bass at all".
const ZERO_BASS_GATE: f32 = 0.02;

/// Radius smoothing rates (per second), normal vs ethereal.
const RADIUS_RATE: f32 = 1.5;
const RADIUS_RATE_ETHEREAL: f32 = 0.4;

/// Random-walk retarget interval bounds.
const WALK_INTERVAL: (f32, f32) = (0.8, 2.0);

/// Progressive speed multiplier easing rate.
const PROGRESSIVE_RATE: f32 = 0.3;

/// Pointer hover: full effect after this much continuous hover, and a
/// much lazier relaxation once the pointer leaves.
const HOVER_FADE_SECS: f32 = 2.0;
const HOVER_RELAX_FACTOR: f32 = 10.0;
const HOVER_MAX_YAW: f32 = 0.6;
const HOVER_MAX_TILT: f32 = 0.35;
/// Low-pass on the raw pointer offset itself.
const HOVER_SMOOTH_ALPHA: f32 = 0.04;

/// Shake gates and damping.
const LOUDNESS_FLOOR: f32 = 0.05;
const SHAKE_STRENGTH: f32 = 0.35;
const SHAKE_DAMPING: f32 = 0.85;

const TILT_HEIGHT: f32 = 0.35;
const FOV_Y: f32 = std::f32::consts::FRAC_PI_3;

/// Loudness of the four candidate stems, transport order.
#[derive(Clone, Copy, Default)]
pub struct CandidateLoudness(pub [f32; 4]);

impl CandidateLoudness {
    /// Index of the loudest candidate, if any clears the floor.
    fn loudest(&self) -> Option<usize> {
        let (idx, max) = self
            .0
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |acc, (i, v)| if v > acc.1 { (i, v) } else { acc });
        (max > LOUDNESS_FLOOR).then_some(idx)
    }
}

pub struct CameraInputs<'a> {
    pub dt: f32,
    pub time: f64,
    pub levels: &'a Levels,
    pub bass_energy: f32,
    pub kick: f32,
    pub jitter_energy: f32,
    pub candidates: CandidateLoudness,
    /// Candidate index of the bass stem (shake gate).
    pub bass_index: usize,
    /// Candidate index of the drive stem (random-walk gate).
    pub drive_index: usize,
    /// Normalized pointer position over the canvas, if hovering.
    pub pointer: Option<(f32, f32)>,
}

/// Pointer-offset fade-in/fade-out is asymmetric, so hover is an
/// explicit state machine instead of one smoothing constant.
enum Hover {
    Idle,
    Entering { since: f32 },
    Steady,
}

pub struct OrbitCamera {
    angle: f32,
    radius: f32,
    walk_target: f32,
    walk_countdown: f32,
    progressive_mult: f32,
    hover: Hover,
    hover_weight: f32,
    hover_yaw: f32,
    hover_tilt: f32,
    shake: Vec3,
}

impl OrbitCamera {
    pub fn new() -> Self {
        Self {
            angle: 0.0,
            radius: LERP_RADIUS_RANGE.1,
            walk_target: WALK_RADIUS_RANGE.0,
            walk_countdown: 0.0,
            progressive_mult: 1.0,
            hover: Hover::Idle,
            hover_weight: 0.0,
            hover_yaw: 0.0,
            hover_tilt: 0.0,
            shake: Vec3::ZERO,
        }
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn update(&mut self, inputs: &CameraInputs) {
        let dt = inputs.dt;
        let mut rng = rand::rng();
        let loudest = inputs.candidates.loudest();

        // Radius target, highest priority first
        let target = if inputs.levels.burst {
            BURST_RADIUS
        } else if loudest == Some(inputs.drive_index) {
            self.walk_countdown -= dt;
            if self.walk_countdown <= 0.0 {
                self.walk_target = rng.random_range(WALK_RADIUS_RANGE.0..WALK_RADIUS_RANGE.1);
                self.walk_countdown = rng.random_range(WALK_INTERVAL.0..WALK_INTERVAL.1);
            }
            self.walk_target
        } else if inputs.bass_energy < ZERO_BASS_GATE {
            ZERO_BASS_RADIUS
        } else {
            LERP_RADIUS_RANGE.0
                + inputs.bass_energy * (LERP_RADIUS_RANGE.1 - LERP_RADIUS_RANGE.0)
        };

        let rate = if inputs.levels.ethereal {
            RADIUS_RATE_ETHEREAL
        } else {
            RADIUS_RATE
        };
        self.radius += (target - self.radius) * (rate * dt).min(1.0);

        // Rotation: bass multiplier is instantaneous, the per-stem
        // progressive multiplier eases so speed changes feel like
        // acceleration
        let progressive_target = match loudest {
            Some(i) => 1.0 + i as f32 * 0.5,
            None => 1.0,
        };
        self.progressive_mult +=
            (progressive_target - self.progressive_mult) * (PROGRESSIVE_RATE * dt).min(1.0);
        let bass_mult = 1.0 + inputs.bass_energy * 2.0;
        self.angle += BASE_ROTATION_SPEED * bass_mult * self.progressive_mult * dt;

        self.update_hover(inputs);
        self.update_shake(inputs, &mut rng);
    }

    fn update_hover(&mut self, inputs: &CameraInputs) {
        let dt = inputs.dt;
        match inputs.pointer {
            Some((x, y)) => {
                match self.hover {
                    Hover::Idle => self.hover = Hover::Entering { since: 0.0 },
                    Hover::Entering { ref mut since } => {
                        *since += dt;
                        if *since >= HOVER_FADE_SECS {
                            self.hover = Hover::Steady;
                        }
                    }
                    Hover::Steady => {}
                }
                let fade_in = dt / HOVER_FADE_SECS;
                self.hover_weight = (self.hover_weight + fade_in).min(1.0);

                let target_yaw = (x - 0.5) * 2.0 * HOVER_MAX_YAW;
                let target_tilt = (y - 0.5) * 2.0 * HOVER_MAX_TILT;
                self.hover_yaw += (target_yaw - self.hover_yaw) * HOVER_SMOOTH_ALPHA;
                self.hover_tilt += (target_tilt - self.hover_tilt) * HOVER_SMOOTH_ALPHA;
            }
            None => {
                self.hover = Hover::Idle;
                let relax = dt / (HOVER_FADE_SECS * HOVER_RELAX_FACTOR);
                self.hover_weight = (self.hover_weight - relax).max(0.0);
            }
        }
    }

    fn update_shake(&mut self, inputs: &CameraInputs, rng: &mut impl Rng) {
        let bass_is_loudest = inputs.candidates.loudest() == Some(inputs.bass_index);
        if bass_is_loudest {
            let magnitude = (inputs.kick * 0.6 + inputs.bass_energy * 0.4) * SHAKE_STRENGTH;
            self.shake += Vec3::new(
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
            ) * magnitude;
        }
        self.shake *= SHAKE_DAMPING.powf(inputs.dt * 60.0);
    }

    /// Eye position for the current state.
    pub fn eye(&self, inputs: &CameraInputs) -> Vec3 {
        let t = inputs.time as f32;
        let yaw = self.angle + self.hover_yaw * self.hover_weight;
        let tilt = TILT_HEIGHT + self.hover_tilt * self.hover_weight;

        let mut eye = Vec3::new(
            yaw.cos() * self.radius,
            tilt * self.radius,
            yaw.sin() * self.radius,
        );

        // Sinusoidal wander from the jitter stem, broader drift in
        // ethereal mode
        let wander = 0.2 + inputs.jitter_energy;
        eye += Vec3::new((t * 0.31).sin(), (t * 0.17).sin(), (t * 0.23).sin()) * wander;
        if inputs.levels.ethereal {
            eye += Vec3::new((t * 0.05).sin(), (t * 0.04).cos(), (t * 0.06).sin()) * 2.0;
        }

        eye + self.shake
    }

    /// Look-at target wanders gently around the origin.
    pub fn target(&self, inputs: &CameraInputs) -> Vec3 {
        let t = inputs.time as f32;
        Vec3::new((t * 0.11).sin(), (t * 0.07).sin(), (t * 0.13).cos()) * 0.4
    }

    pub fn view_matrix(&self, inputs: &CameraInputs) -> Mat4 {
        Mat4::look_at_rh(self.eye(inputs), self.target(inputs), Vec3::Y)
    }

    pub fn projection_matrix(aspect: f32) -> Mat4 {
        Mat4::perspective_rh(FOV_Y, aspect.max(0.01), 0.1, 500.0)
    }
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self::new()
    }
}
