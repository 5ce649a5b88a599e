//! Audio-reactive particle pool.
//!
//! A preallocated arena with a logical active count: growing and
//! shrinking just move the count, respawns recycle slots in place, and
//! the flat instance buffer is refilled rather than rebuilt. Nothing
//! here allocates per frame once the pool has warmed up.

use glam::Vec3;
use rand::Rng;
use std::collections::VecDeque;

use crate::scene::choreography::{DeathRate, Levels};

/// Backing capacity; the active count never exceeds this.
pub const MAX_PARTICLES: usize = 7_000;
/// Active-count floor.
pub const MIN_PARTICLES: usize = 3_000;

/// Drive-stem energy below this keeps the pool at the floor.
const COUNT_ENERGY_FLOOR: f32 = 0.05;
/// Slots added/removed per update at most, so count changes read as a
/// swell instead of a pop.
const COUNT_STEP: usize = 100;

/// World half-extent; any axis beyond this reflects inward.
const WORLD_BOUND: f32 = 50.0;
const BOUNCE: f32 = -0.9;

/// Per-tick velocity damping at 60Hz.
const DAMPING: f32 = 0.98;

const LIFETIME_MIN: f32 = 0.75;
const LIFETIME_MAX: f32 = 5.0;
const TRAIL_CAP: usize = 30;
const TRAIL_CHANCE: f32 = 0.7;

const OUTWARD_FORCE: f32 = 1.6;
const PULL_FORCE: f32 = 9.0;
const ORBIT_SPEED: f32 = 3.5;
const ORBIT_SPRING: f32 = 1.8;
const JITTER_FORCE: f32 = 6.0;
const BURST_IMPULSE: f32 = 14.0;
/// Transient score that counts as a hit worth bursting on.
const BURST_TRANSIENT_GATE: f32 = 0.5;

/// How fast the serum size factor chases its target.
const SIZE_FACTOR_ALPHA: f32 = 0.1;

const BASE_COLOR: Vec3 = Vec3::new(0.85, 0.85, 0.92);
const BASS_HUE: Vec3 = Vec3::new(1.0, 0.45, 0.2);
const TIMELINE_HUE: Vec3 = Vec3::new(0.3, 0.5, 1.0);

/// Everything the pool needs for one update, pre-digested from the
/// stem snapshots by the director.
pub struct PoolInputs<'a> {
    pub dt: f32,
    pub levels: &'a Levels,
    /// Drive stem overall energy (count, orbit, size factor, speed).
    pub drive_energy: f32,
    pub drive_active: bool,
    pub bass_energy: f32,
    pub kick: f32,
    /// Jitter stem overall energy (vertical wobble).
    pub jitter_energy: f32,
    pub transient: f32,
    /// Spawn origin: the core body's current position.
    pub origin: Vec3,
}

struct Particle {
    pos: Vec3,
    vel: Vec3,
    life: f32,
    lifetime: f32,
    base_size: f32,
    size: f32,
    color: Vec3,
    has_trail: bool,
    trail: VecDeque<Vec3>,
}

impl Particle {
    fn spawn(rng: &mut impl Rng, origin: Vec3) -> Self {
        let mut p = Self {
            pos: Vec3::ZERO,
            vel: Vec3::ZERO,
            life: 1.0,
            lifetime: 1.0,
            base_size: 1.0,
            size: 1.0,
            color: BASE_COLOR,
            has_trail: rng.random::<f32>() < TRAIL_CHANCE,
            trail: VecDeque::with_capacity(TRAIL_CAP),
        };
        p.respawn(rng, origin);
        p
    }

    fn respawn(&mut self, rng: &mut impl Rng, origin: Vec3) {
        self.pos = origin + random_unit(rng) * rng.random_range(0.0..0.5);
        self.vel = random_unit(rng) * rng.random_range(0.5..3.0);
        self.life = 1.0;
        self.lifetime = rng.random_range(LIFETIME_MIN..LIFETIME_MAX);
        self.base_size = rng.random_range(0.5..2.0);
        self.size = self.base_size;
        self.color = BASE_COLOR;
        self.trail.clear();
    }
}

/// Uniformly distributed direction on the unit sphere.
fn random_unit(rng: &mut impl Rng) -> Vec3 {
    loop {
        let v = Vec3::new(
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
        );
        let len_sq = v.length_squared();
        if len_sq > 1e-6 && len_sq <= 1.0 {
            return v / len_sq.sqrt();
        }
    }
}

/// One particle's slice of the flat render buffer.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ParticleInstance {
    pub position: [f32; 3],
    pub size: f32,
    pub color: [f32; 3],
    pub life: f32,
}

/// A fading trail polyline for one particle.
pub struct TrailStrip<'a> {
    pub points: &'a VecDeque<Vec3>,
    pub color: Vec3,
    pub thickness: f32,
}

pub struct ParticlePool {
    particles: Vec<Particle>,
    active: usize,
    size_factor: f32,
    trail_thickness: f32,
    instances: Vec<ParticleInstance>,
}

impl ParticlePool {
    pub fn new() -> Self {
        let mut rng = rand::rng();
        let particles = (0..MAX_PARTICLES)
            .map(|_| Particle::spawn(&mut rng, Vec3::ZERO))
            .collect();
        Self {
            particles,
            active: MIN_PARTICLES,
            size_factor: 1.0,
            trail_thickness: 1.0,
            instances: Vec::with_capacity(MAX_PARTICLES),
        }
    }

    pub fn active_count(&self) -> usize {
        self.active
    }

    /// Pool size target for the current drive energy and ceiling.
    fn target_count(&self, drive_energy: f32, ceiling: usize) -> usize {
        if drive_energy <= COUNT_ENERGY_FLOOR {
            return MIN_PARTICLES;
        }
        let t = ((drive_energy - COUNT_ENERGY_FLOOR) / (1.0 - COUNT_ENERGY_FLOOR)).min(1.0);
        MIN_PARTICLES + (t * (ceiling - MIN_PARTICLES) as f32) as usize
    }

    pub fn update(&mut self, inputs: &PoolInputs) {
        let mut rng = rand::rng();
        let dt = inputs.dt;
        let levels = inputs.levels;

        // Elastic count, stepped so swells aren't pops
        let target = self.target_count(inputs.drive_energy, levels.particle_ceiling);
        if self.active < target {
            let grown = (self.active + COUNT_STEP).min(target);
            for p in &mut self.particles[self.active..grown] {
                p.respawn(&mut rng, inputs.origin);
            }
            self.active = grown;
        } else if self.active > target {
            self.active = self.active.saturating_sub(COUNT_STEP).max(target);
        }

        // Serum size factor: 3x when the drive stem is silent, 1x at
        // full energy, chased rather than snapped
        let factor_target = 3.0 - 2.0 * inputs.drive_energy.clamp(0.0, 1.0);
        self.size_factor += (factor_target - self.size_factor) * SIZE_FACTOR_ALPHA;

        self.trail_thickness = (0.5 + inputs.drive_energy * 2.0) * levels.trail_spike;

        let drive_active = inputs.drive_active && !levels.drive_disabled;
        let orbit_radius = 8.0 + inputs.drive_energy * 12.0;
        let burst = levels.burst || inputs.transient > BURST_TRANSIENT_GATE;
        let burst_strength = if levels.burst { 1.0 } else { inputs.transient };
        let damping = DAMPING.powf(dt * 60.0);
        let size_scale =
            (0.5 + inputs.bass_energy * 1.0 + inputs.kick * 0.5) * self.size_factor;

        let death_rate = match levels.death_rate {
            DeathRate::Scripted(rate) => rate,
            DeathRate::StemDelegated => inputs.drive_energy * 1.5,
        };

        for (index, p) in self.particles[..self.active].iter_mut().enumerate() {
            let radial = p.pos;
            let dist = radial.length();
            let outward = if dist > 1e-4 { radial / dist } else { Vec3::ZERO };

            if levels.pull_strength > 0.0 {
                p.vel -= outward * PULL_FORCE * levels.pull_strength * dt;
            } else {
                p.vel += outward * OUTWARD_FORCE * dt;

                if drive_active && index % 2 == 0 {
                    let tangent = Vec3::new(-p.pos.z, 0.0, p.pos.x).normalize_or_zero();
                    p.vel += tangent * ORBIT_SPEED * dt;
                    p.vel += outward * (orbit_radius - dist) * ORBIT_SPRING * dt;
                }
            }

            if inputs.jitter_energy > 0.0 {
                p.vel.y +=
                    rng.random_range(-1.0..1.0) * inputs.jitter_energy * JITTER_FORCE * dt;
            }

            if burst {
                // A particle sitting at the exact center has no outward
                // direction; give it a random one
                let dir = if dist > 1e-4 {
                    outward
                } else {
                    random_unit(&mut rng)
                };
                p.vel += dir * BURST_IMPULSE * burst_strength * dt;
            }

            p.vel *= damping;
            // Drive stem speeds displacement up without feeding back
            // into the velocity integrator
            p.pos += p.vel * dt * (1.0 + inputs.drive_energy * 0.5);

            // Reflect off the world bounds with 10% energy loss
            if p.pos.x.abs() > WORLD_BOUND {
                p.pos.x *= BOUNCE;
            }
            if p.pos.y.abs() > WORLD_BOUND {
                p.pos.y *= BOUNCE;
            }
            if p.pos.z.abs() > WORLD_BOUND {
                p.pos.z *= BOUNCE;
            }

            p.size = p.base_size * size_scale;
            p.color = BASE_COLOR
                .lerp(BASS_HUE, inputs.bass_energy.clamp(0.0, 1.0))
                .lerp(TIMELINE_HUE, levels.timeline_hue);

            if p.has_trail {
                if p.trail.len() == TRAIL_CAP {
                    p.trail.pop_front();
                }
                p.trail.push_back(p.pos);
            }

            p.life -= dt * death_rate / p.lifetime;
            if p.life <= 0.0 {
                p.respawn(&mut rng, inputs.origin);
            }
            p.life = p.life.clamp(0.0, 1.0);
        }
    }

    /// Per-particle instances without touching the cached buffer.
    pub fn instances(&self) -> impl Iterator<Item = ParticleInstance> + '_ {
        self.particles[..self.active].iter().map(|p| ParticleInstance {
            position: p.pos.to_array(),
            size: p.size,
            color: p.color.to_array(),
            life: p.life,
        })
    }

    /// Flat per-particle instances for the renderer, refilled in place.
    pub fn render_buffer(&mut self) -> &[ParticleInstance] {
        self.instances.clear();
        self.instances
            .extend(self.particles[..self.active].iter().map(|p| ParticleInstance {
                position: p.pos.to_array(),
                size: p.size,
                color: p.color.to_array(),
                life: p.life,
            }));
        &self.instances
    }

    /// Trails for every active particle that carries one.
    pub fn trails(&self) -> impl Iterator<Item = TrailStrip<'_>> {
        let thickness = self.trail_thickness;
        self.particles[..self.active]
            .iter()
            .filter(|p| p.has_trail && p.trail.len() > 1)
            .map(move |p| TrailStrip {
                points: &p.trail,
                color: p.color,
                thickness,
            })
    }
}

impl Default for ParticlePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::choreography;

    fn quiet_inputs(levels: &Levels) -> PoolInputs<'_> {
        PoolInputs {
            dt: 1.0 / 60.0,
            levels,
            drive_energy: 0.0,
            drive_active: false,
            bass_energy: 0.0,
            kick: 0.0,
            jitter_energy: 0.0,
            transient: 0.0,
            origin: Vec3::ZERO,
        }
    }

    #[test]
    fn count_stays_in_bounds() {
        let levels = choreography::at(100.0);
        let mut pool = ParticlePool::new();
        for energy in [0.0, 0.3, 1.0, 0.0, 1.0] {
            for _ in 0..200 {
                let inputs = PoolInputs {
                    drive_energy: energy,
                    ..quiet_inputs(&levels)
                };
                pool.update(&inputs);
                assert!(pool.active_count() >= MIN_PARTICLES);
                assert!(pool.active_count() <= MAX_PARTICLES);
            }
        }
    }

    #[test]
    fn count_converges_for_constant_energy() {
        let levels = choreography::at(100.0);
        let mut pool = ParticlePool::new();
        let inputs = PoolInputs {
            drive_energy: 0.5,
            ..quiet_inputs(&levels)
        };
        for _ in 0..200 {
            pool.update(&inputs);
        }
        let target = pool.target_count(0.5, levels.particle_ceiling);
        let settled = pool.active_count();
        assert!(
            settled.abs_diff(target) <= 1,
            "settled {settled}, target {target}"
        );
        pool.update(&inputs);
        assert!(pool.active_count().abs_diff(settled) <= 1);
    }

    #[test]
    fn burst_window_raises_ceiling_to_transient_max() {
        let mid_burst =
            (choreography::BURST_WINDOW.0 + choreography::BURST_WINDOW.1) / 2.0;
        let levels = choreography::at(mid_burst);
        let mut pool = ParticlePool::new();
        let inputs = PoolInputs {
            drive_energy: 1.0,
            ..quiet_inputs(&levels)
        };
        for _ in 0..100 {
            pool.update(&inputs);
        }
        assert_eq!(pool.active_count(), MAX_PARTICLES);
    }

    #[test]
    fn life_stays_normalized_and_pool_length_is_invariant() {
        // Delegated death phase with a loud drive stem kills fast
        let levels = choreography::at(choreography::DEATH_DELEGATE_FROM + 5.0);
        let mut pool = ParticlePool::new();
        let inputs = PoolInputs {
            drive_energy: 1.0,
            bass_energy: 1.0,
            kick: 1.0,
            transient: 1.0,
            ..quiet_inputs(&levels)
        };
        let len_before = pool.particles.len();
        for _ in 0..300 {
            pool.update(&inputs);
            for p in &pool.particles[..pool.active] {
                assert!((0.0..=1.0).contains(&p.life), "life {}", p.life);
            }
        }
        assert_eq!(pool.particles.len(), len_before);
    }

    #[test]
    fn particles_stay_reflected_inside_world_bounds() {
        let levels = choreography::at(100.0);
        let mut pool = ParticlePool::new();
        let inputs = PoolInputs {
            drive_energy: 1.0,
            transient: 1.0,
            jitter_energy: 1.0,
            ..quiet_inputs(&levels)
        };
        for _ in 0..600 {
            pool.update(&inputs);
        }
        for p in &pool.particles[..pool.active] {
            assert!(p.pos.x.abs() <= WORLD_BOUND * 1.01);
            assert!(p.pos.y.abs() <= WORLD_BOUND * 1.01);
            assert!(p.pos.z.abs() <= WORLD_BOUND * 1.01);
        }
    }

    #[test]
    fn trails_are_bounded_and_majority_assigned() {
        let levels = choreography::at(100.0);
        let mut pool = ParticlePool::new();
        let inputs = quiet_inputs(&levels);
        for _ in 0..50 {
            pool.update(&inputs);
        }
        let with_trail = pool.particles[..pool.active]
            .iter()
            .filter(|p| p.has_trail)
            .count();
        let share = with_trail as f32 / pool.active as f32;
        assert!(share > 0.6 && share < 0.8, "trail share {share}");
        for p in &pool.particles[..pool.active] {
            assert!(p.trail.len() <= TRAIL_CAP);
        }
    }

    #[test]
    fn render_buffer_matches_active_count() {
        let levels = choreography::at(100.0);
        let mut pool = ParticlePool::new();
        pool.update(&quiet_inputs(&levels));
        let count = pool.active_count();
        assert_eq!(pool.render_buffer().len(), count);
    }
}
