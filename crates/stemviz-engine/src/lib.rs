//! Music-driven particle scene engine.
//!
//! Decodes a multi-stem recording, keeps every stem's playback clock in
//! sync with the audible main stem, analyzes each stem's spectrum on an
//! independent tick, and drives an audio-reactive particle scene with a
//! choreography keyed to absolute playback time.
//!
//! The host constructs a [`VisualEngine`], forwards pointer/resize
//! events, calls [`VisualEngine::tick`] once per frame, and draws the
//! returned frame plan.

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod scene;

pub use config::{EngineConfig, StemDesc, StemRoles, UserConfig};
pub use engine::VisualEngine;
pub use error::EngineError;
pub use scene::{FramePlan, PassPlan, SceneDirector};
