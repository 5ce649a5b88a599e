//! The glowing focal body at the center of the scene.
//!
//! A unit sphere by default, optionally replaced by a loaded model
//! normalized to the same bounding radius so the audio-reactive scale
//! math never cares which mesh is installed. Draggable inside an
//! annulus, eased back to center on release, wrapped in a small smoke
//! pool that one stem can flare and recolor.

use glam::Vec3;
use rand::Rng;
use std::path::Path;

/// Sphere tessellation (latitude x longitude rings).
const SPHERE_RINGS: usize = 12;
const SPHERE_SEGMENTS: usize = 18;

/// Pulse smoothing on the vocal energy.
const PULSE_ALPHA: f32 = 0.2;
const PULSE_MIN_SCALE: f32 = 0.8;
const PULSE_RANGE: f32 = 1.2;
/// Slow idle breathing, always on.
const BREATH_RATE: f32 = 0.8;
const BREATH_DEPTH: f32 = 0.05;

/// Pointer-down grow: +0.5 scale eased in over 300ms.
const GROW_AMOUNT: f32 = 0.5;
const GROW_SECS: f32 = 0.3;
/// Release return-to-center duration.
const RETURN_SECS: f32 = 5.0;

/// Drag annulus around the origin.
const DRAG_MIN_RADIUS: f32 = 2.0;
const DRAG_MAX_RADIUS: f32 = 20.0;

const SMOKE_COUNT: usize = 200;
const SMOKE_BASE_COLOR: Vec3 = Vec3::new(0.55, 0.55, 0.6);
const SMOKE_WARNING_HUE: Vec3 = Vec3::new(1.0, 0.3, 0.1);
/// Modifier signal below this snaps the smoke effect fully off.
const MODIFIER_EPSILON: f32 = 0.01;
const MODIFIER_IMPULSE: f32 = 4.0;

/// Triangle mesh in model space, bounding radius 1.
pub struct CoreMesh {
    pub triangles: Vec<[Vec3; 3]>,
}

impl CoreMesh {
    /// Default UV sphere.
    pub fn sphere() -> Self {
        let mut vertices = vec![vec![Vec3::ZERO; SPHERE_SEGMENTS + 1]; SPHERE_RINGS + 1];
        for (ring, row) in vertices.iter_mut().enumerate() {
            let phi = std::f32::consts::PI * ring as f32 / SPHERE_RINGS as f32;
            for (seg, v) in row.iter_mut().enumerate() {
                let theta = std::f32::consts::TAU * seg as f32 / SPHERE_SEGMENTS as f32;
                *v = Vec3::new(
                    phi.sin() * theta.cos(),
                    phi.cos(),
                    phi.sin() * theta.sin(),
                );
            }
        }

        let mut triangles = Vec::with_capacity(SPHERE_RINGS * SPHERE_SEGMENTS * 2);
        for ring in 0..SPHERE_RINGS {
            for seg in 0..SPHERE_SEGMENTS {
                let a = vertices[ring][seg];
                let b = vertices[ring + 1][seg];
                let c = vertices[ring + 1][seg + 1];
                let d = vertices[ring][seg + 1];
                triangles.push([a, b, c]);
                triangles.push([a, c, d]);
            }
        }
        Self { triangles }
    }

    /// Load a wavefront OBJ (v/f statements only), re-centered and
    /// rescaled to bounding radius 1. Any problem falls back to the
    /// sphere.
    pub fn load_or_sphere(path: &Path) -> Self {
        match Self::load_obj(path) {
            Ok(mesh) => {
                log::info!("core mesh loaded from {}", path.display());
                mesh
            }
            Err(reason) => {
                log::warn!(
                    "core mesh {} unusable ({reason}), using sphere",
                    path.display()
                );
                Self::sphere()
            }
        }
    }

    fn load_obj(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;

        let mut vertices: Vec<Vec3> = Vec::new();
        let mut faces: Vec<[usize; 3]> = Vec::new();

        for line in text.lines() {
            let mut parts = line.split_whitespace();
            match parts.next() {
                Some("v") => {
                    let mut coord = || -> Result<f32, String> {
                        parts
                            .next()
                            .ok_or("short vertex line")?
                            .parse()
                            .map_err(|e| format!("bad vertex: {e}"))
                    };
                    let (x, y, z) = (coord()?, coord()?, coord()?);
                    vertices.push(Vec3::new(x, y, z));
                }
                Some("f") => {
                    let mut index = || -> Result<usize, String> {
                        let token = parts.next().ok_or("short face line")?;
                        // "f 1/2/3" style: vertex index is the first field
                        let vert = token.split('/').next().unwrap_or(token);
                        let i: isize = vert.parse().map_err(|e| format!("bad face: {e}"))?;
                        if i < 1 {
                            return Err("unsupported face index".into());
                        }
                        Ok(i as usize - 1)
                    };
                    faces.push([index()?, index()?, index()?]);
                }
                _ => {}
            }
        }

        if vertices.is_empty() || faces.is_empty() {
            return Err("no geometry".into());
        }

        // Re-center on the centroid, scale to bounding radius 1
        let centroid = vertices.iter().copied().sum::<Vec3>() / vertices.len() as f32;
        let radius = vertices
            .iter()
            .map(|v| (*v - centroid).length())
            .fold(0.0f32, f32::max);
        if radius < 1e-6 {
            return Err("degenerate geometry".into());
        }
        for v in &mut vertices {
            *v = (*v - centroid) / radius;
        }

        let mut triangles = Vec::with_capacity(faces.len());
        for face in faces {
            let get = |i: usize| vertices.get(i).copied().ok_or("face index out of range");
            triangles.push([get(face[0])?, get(face[1])?, get(face[2])?]);
        }
        Ok(Self { triangles })
    }
}

/// Simple ambient particle around the body.
#[derive(Clone, Copy)]
pub struct SmokeParticle {
    pub pos: Vec3,
    pub vel: Vec3,
    pub life: f32,
    pub size: f32,
    pub color: Vec3,
}

enum DragState {
    Idle,
    Dragging,
    Returning { from: Vec3, elapsed: f32 },
}

pub struct CoreBody {
    mesh: CoreMesh,
    position: Vec3,
    pulse: f32,
    scale: f32,
    /// Pointer-grow progress in 0-1; the scale contribution is eased.
    grow_phase: f32,
    drag: DragState,
    smoke: Vec<SmokeParticle>,
}

fn ease_out_cubic(t: f32) -> f32 {
    let inv = 1.0 - t.clamp(0.0, 1.0);
    1.0 - inv * inv * inv
}

impl CoreBody {
    pub fn new(model_path: Option<&Path>) -> Self {
        let mesh = match model_path {
            Some(path) => CoreMesh::load_or_sphere(path),
            None => CoreMesh::sphere(),
        };
        let mut rng = rand::rng();
        let smoke = (0..SMOKE_COUNT)
            .map(|_| spawn_smoke(&mut rng, Vec3::ZERO))
            .collect();
        Self {
            mesh,
            position: Vec3::ZERO,
            pulse: 0.0,
            scale: PULSE_MIN_SCALE,
            grow_phase: 0.0,
            drag: DragState::Idle,
            smoke,
        }
    }

    pub fn mesh(&self) -> &CoreMesh {
        &self.mesh
    }

    /// Current world position; the particle pool spawns here.
    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn smoke(&self) -> &[SmokeParticle] {
        &self.smoke
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.drag, DragState::Dragging)
    }

    /// Pointer-down at a world-space point. Returns true when the point
    /// hits the body and a drag begins.
    pub fn pointer_down(&mut self, world: Vec3) -> bool {
        let hit = (world - self.position).length() <= self.scale.max(1.0);
        if hit {
            self.drag = DragState::Dragging;
        }
        hit
    }

    /// Drag update; target clamped to the annulus around the origin.
    pub fn pointer_drag(&mut self, world: Vec3) {
        if !matches!(self.drag, DragState::Dragging) {
            return;
        }
        let dist = world.length();
        self.position = if dist < 1e-4 {
            // Degenerate drag to the exact origin: keep the old direction
            self.position.normalize_or_zero() * DRAG_MIN_RADIUS
        } else {
            world / dist * dist.clamp(DRAG_MIN_RADIUS, DRAG_MAX_RADIUS)
        };
    }

    pub fn pointer_up(&mut self) {
        if matches!(self.drag, DragState::Dragging) {
            self.drag = DragState::Returning {
                from: self.position,
                elapsed: 0.0,
            };
        }
    }

    pub fn update(
        &mut self,
        dt: f32,
        playback_time: f64,
        vocal_energy: f32,
        modifier_energy: f32,
        core_scale_level: f32,
    ) {
        // Drag lifecycle
        match &mut self.drag {
            DragState::Idle | DragState::Dragging => {}
            DragState::Returning { from, elapsed } => {
                *elapsed += dt;
                let t = *elapsed / RETURN_SECS;
                if t >= 1.0 {
                    self.position = Vec3::ZERO;
                    self.drag = DragState::Idle;
                } else {
                    self.position = from.lerp(Vec3::ZERO, ease_out_cubic(t));
                }
            }
        }

        // Grow phase runs over GROW_SECS; the eased curve front-loads
        // the size change while the pointer is held
        let step = dt / GROW_SECS;
        if matches!(self.drag, DragState::Dragging) {
            self.grow_phase = (self.grow_phase + step).min(1.0);
        } else {
            self.grow_phase = (self.grow_phase - step).max(0.0);
        }
        let grow = GROW_AMOUNT * ease_out_cubic(self.grow_phase);

        // Pulse: smoothed vocal energy into a size range, breathing on top
        self.pulse += (vocal_energy.clamp(0.0, 1.0) - self.pulse) * PULSE_ALPHA;
        let breath = 1.0 + BREATH_DEPTH * (playback_time as f32 * BREATH_RATE).sin();
        self.scale =
            (PULSE_MIN_SCALE + self.pulse * PULSE_RANGE) * breath * core_scale_level + grow;

        self.update_smoke(dt, modifier_energy);
    }

    fn update_smoke(&mut self, dt: f32, modifier_energy: f32) {
        let mut rng = rand::rng();
        let flare = modifier_energy >= MODIFIER_EPSILON;

        for p in &mut self.smoke {
            if flare {
                let outward = (p.pos - self.position).normalize_or_zero();
                p.vel += outward * modifier_energy * MODIFIER_IMPULSE * dt;
                p.color = SMOKE_BASE_COLOR.lerp(SMOKE_WARNING_HUE, modifier_energy.min(1.0));
            } else {
                // Below epsilon the tint snaps off instead of fading
                p.color = SMOKE_BASE_COLOR;
            }

            p.pos += p.vel * dt;
            p.life -= dt * 0.6;
            if p.life <= 0.0 {
                *p = spawn_smoke(&mut rng, self.position);
            }
        }
    }
}

fn spawn_smoke(rng: &mut impl Rng, origin: Vec3) -> SmokeParticle {
    let dir = Vec3::new(
        rng.random_range(-1.0..1.0),
        rng.random_range(-1.0..1.0),
        rng.random_range(-1.0..1.0),
    )
    .normalize_or_zero();
    SmokeParticle {
        pos: origin + dir * rng.random_range(0.8..1.4),
        vel: dir * rng.random_range(0.2..0.8),
        life: rng.random_range(0.4..1.0),
        size: rng.random_range(0.2..0.6),
        color: SMOKE_BASE_COLOR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sphere_mesh_has_unit_radius() {
        let mesh = CoreMesh::sphere();
        assert!(!mesh.triangles.is_empty());
        for tri in &mesh.triangles {
            for v in tri {
                assert!((v.length() - 1.0).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn missing_model_falls_back_to_sphere() {
        let fallback = CoreMesh::load_or_sphere(Path::new("/nonexistent/model.obj"));
        let sphere = CoreMesh::sphere();
        assert_eq!(fallback.triangles.len(), sphere.triangles.len());
    }

    #[test]
    fn obj_is_recentered_and_normalized() {
        let dir = std::env::temp_dir();
        let path = dir.join("stemviz-core-test.obj");
        // Unit-ish tetrahedron offset far from the origin
        std::fs::write(
            &path,
            "v 100 100 100\nv 102 100 100\nv 100 102 100\nv 100 100 102\n\
             f 1 2 3\nf 1 3 4\nf 1 2 4\nf 2 3 4\n",
        )
        .unwrap();

        let mesh = CoreMesh::load_obj(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let max_radius = mesh
            .triangles
            .iter()
            .flatten()
            .map(|v| v.length())
            .fold(0.0f32, f32::max);
        assert!((max_radius - 1.0).abs() < 1e-4, "radius {max_radius}");
    }

    #[test]
    fn drag_clamps_to_annulus() {
        let mut body = CoreBody::new(None);
        assert!(body.pointer_down(Vec3::ZERO));

        body.pointer_drag(Vec3::new(100.0, 0.0, 0.0));
        assert!((body.position().length() - DRAG_MAX_RADIUS).abs() < 1e-4);

        body.pointer_drag(Vec3::new(0.1, 0.0, 0.0));
        assert!((body.position().length() - DRAG_MIN_RADIUS).abs() < 1e-4);
    }

    #[test]
    fn release_returns_to_center() {
        let mut body = CoreBody::new(None);
        body.pointer_down(Vec3::ZERO);
        body.pointer_drag(Vec3::new(10.0, 0.0, 0.0));
        body.pointer_up();

        let start = body.position().length();
        for _ in 0..(RETURN_SECS * 60.0) as usize + 10 {
            body.update(1.0 / 60.0, 0.0, 0.0, 0.0, 1.0);
        }
        assert!(body.position().length() < 1e-4, "started at {start}");
        assert!(!body.is_dragging());
    }

    #[test]
    fn grow_eases_in_while_dragging() {
        let mut body = CoreBody::new(None);
        body.update(1.0 / 60.0, 0.0, 0.0, 0.0, 1.0);
        let resting = body.scale();

        body.pointer_down(Vec3::ZERO);
        for _ in 0..30 {
            body.update(1.0 / 60.0, 0.0, 0.0, 0.0, 1.0);
        }
        assert!(
            (body.scale() - resting - GROW_AMOUNT).abs() < 0.05,
            "scale {} vs resting {resting}",
            body.scale()
        );
    }

    #[test]
    fn grow_is_front_loaded_not_linear() {
        let mut body = CoreBody::new(None);
        body.update(1.0 / 60.0, 0.0, 0.0, 0.0, 1.0);
        let resting = body.scale();

        // Half the grow window: the eased curve has already covered
        // 0.875 of the distance where a linear ramp would sit at 0.5
        body.pointer_down(Vec3::ZERO);
        let half_ticks = (GROW_SECS * 60.0 / 2.0) as usize;
        for _ in 0..half_ticks {
            body.update(1.0 / 60.0, 0.0, 0.0, 0.0, 1.0);
        }
        let grown = body.scale() - resting;
        assert!(
            (grown - GROW_AMOUNT * 0.875).abs() < 0.02,
            "grow at midpoint: {grown}"
        );
        assert!(grown > GROW_AMOUNT * 0.5 + 0.05, "grow looks linear: {grown}");
    }

    #[test]
    fn smoke_tint_snaps_off_below_epsilon() {
        let mut body = CoreBody::new(None);
        body.update(1.0 / 60.0, 0.0, 0.0, 1.0, 1.0);
        assert!(body.smoke().iter().any(|p| p.color != SMOKE_BASE_COLOR));

        body.update(1.0 / 60.0, 0.0, 0.0, MODIFIER_EPSILON / 2.0, 1.0);
        assert!(body.smoke().iter().all(|p| p.color == SMOKE_BASE_COLOR));
    }

    #[test]
    fn smoke_pool_is_fixed_size() {
        let mut body = CoreBody::new(None);
        for _ in 0..500 {
            body.update(1.0 / 60.0, 0.0, 0.5, 0.0, 1.0);
        }
        assert_eq!(body.smoke().len(), SMOKE_COUNT);
    }
}
