//! Engine error types.
//!
//! Only construction can fail loudly; everything after that degrades
//! (missing stems go silent, a bad model falls back to the sphere).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The host requested audible output but no output device exists.
    #[error("no audio output device available")]
    NoOutputDevice,

    /// The output stream could not be built or started.
    #[error("audio output stream failed: {0}")]
    OutputStream(String),

    /// The engine was constructed with an empty stem manifest.
    #[error("stem manifest is empty")]
    EmptyManifest,
}

/// Recoverable per-stem load failure. Logged, never propagated to the host.
#[derive(Debug, Error)]
pub enum StemLoadError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to decode {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("load timed out after {attempts} attempts")]
    TimedOut { attempts: u32 },
}
