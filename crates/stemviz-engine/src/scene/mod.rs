//! Visual side of the engine: choreography, particles, the core body,
//! the orbit camera and the director that runs them per frame.

pub mod camera;
pub mod choreography;
pub mod core_body;
pub mod director;
pub mod particles;

pub use director::{FramePlan, PassPlan, SceneDirector};
pub use particles::{ParticleInstance, ParticlePool};
