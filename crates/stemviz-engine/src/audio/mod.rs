//! Audio side of the engine: decoding, synchronized playback, and
//! per-stem spectral analysis.

pub mod analyzer;
pub mod decode;
pub mod fft;
pub mod loader;
pub mod output;
pub mod stem;
pub mod transport;

pub use analyzer::{BandEnergies, PercussionScores, SpectralAnalyzer};
pub use stem::{StemAnalysis, StemPlayer};
pub use transport::MultiTrackTransport;
