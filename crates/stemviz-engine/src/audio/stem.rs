//! Per-stem playback clock and analysis state.

use std::sync::Arc;
use std::time::Instant;

use crate::audio::analyzer::{BandEnergies, FrequencyFrame, PercussionScores, SpectralAnalyzer};
use crate::audio::decode::StemBuffer;
use crate::audio::fft::{FftContext, FFT_SIZE};

/// Window for the RMS loudness estimate, ~23ms at 44.1kHz.
const RMS_WINDOW: usize = 1024;

/// Wall-clock playback cursor. Silent stems run on this alone; the
/// audible main stem gets periodically re-aligned to the device cursor.
#[derive(Clone, Debug)]
pub struct StemClock {
    base: f64,
    started: Option<Instant>,
}

impl StemClock {
    pub fn new() -> Self {
        Self {
            base: 0.0,
            started: None,
        }
    }

    pub fn playing(&self) -> bool {
        self.started.is_some()
    }

    pub fn position(&self) -> f64 {
        match self.started {
            Some(t) => self.base + t.elapsed().as_secs_f64(),
            None => self.base,
        }
    }

    pub fn play(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
    }

    pub fn pause(&mut self) -> f64 {
        self.base = self.position();
        self.started = None;
        self.base
    }

    /// Jump to `secs`, preserving the play/pause state.
    pub fn seek(&mut self, secs: f64) {
        self.base = secs.max(0.0);
        if self.started.is_some() {
            self.started = Some(Instant::now());
        }
    }
}

impl Default for StemClock {
    fn default() -> Self {
        Self::new()
    }
}

/// One analysis tick's worth of data for a stem. Cloned into the
/// snapshot cache the render thread reads.
#[derive(Clone, Default)]
pub struct StemAnalysis {
    pub bands: BandEnergies,
    pub percussion: PercussionScores,
    /// Half-spectrum magnitudes straight off the FFT.
    pub raw_frequency: Vec<f32>,
    /// The windowed time-domain samples the FFT consumed.
    pub raw_time_domain: Vec<f32>,
    pub rms: f32,
    /// Playback position the tick was taken at.
    pub position: f64,
}

/// A single stem: decoded buffer (once loaded), its clock, and the
/// spectral analyzer that tracks its percussion state across ticks.
pub struct StemPlayer {
    pub name: String,
    buffer: Option<StemBuffer>,
    pub clock: StemClock,
    analyzer: SpectralAnalyzer,
    analysis: StemAnalysis,
    magnitudes: Vec<f32>,
}

impl StemPlayer {
    pub fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            buffer: None,
            clock: StemClock::new(),
            analyzer: SpectralAnalyzer::new(),
            analysis: StemAnalysis::default(),
            magnitudes: Vec::with_capacity(FFT_SIZE / 2),
        }
    }

    /// Like [`Self::pending`] but with user detector tuning applied.
    pub fn pending_tuned(name: &str, user: &crate::config::UserConfig) -> Self {
        Self {
            analyzer: SpectralAnalyzer::with_tuning(user),
            ..Self::pending(name)
        }
    }

    /// Test constructor with a synthetic buffer already in place.
    pub fn from_samples(name: &str, samples: Vec<f32>, sample_rate: u32) -> Self {
        let mut player = Self::pending(name);
        player.install(StemBuffer::from_samples(samples, sample_rate));
        player
    }

    pub fn ready(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn duration_secs(&self) -> f64 {
        self.buffer.as_ref().map_or(0.0, |b| b.duration_secs())
    }

    pub fn install(&mut self, buffer: StemBuffer) {
        self.buffer = Some(buffer);
    }

    pub fn samples(&self) -> Option<(&Arc<Vec<f32>>, u32)> {
        self.buffer.as_ref().map(|b| (&b.samples, b.sample_rate))
    }

    pub fn analysis(&self) -> &StemAnalysis {
        &self.analysis
    }

    /// Run one analysis tick at the clock's current position.
    ///
    /// A stem that is paused keeps feeding the same window, so the
    /// detectors see zero flux and their scores decay naturally. A stem
    /// with no buffer (still loading, or given up) feeds silence.
    pub fn refresh_analysis(&mut self, ctx: &mut FftContext) {
        let position = self.position();

        let (window, sample_rate): (&[f32], u32) = match &self.buffer {
            Some(buf) => {
                let end = ((position * buf.sample_rate as f64) as usize).min(buf.samples.len());
                let start = end.saturating_sub(FFT_SIZE);
                (&buf.samples[start..end], buf.sample_rate)
            }
            None => (&[], 44_100),
        };

        ctx.magnitudes(window, &mut self.magnitudes);

        let (bands, percussion) = self.analyzer.analyze(&FrequencyFrame {
            magnitudes: &self.magnitudes,
            sample_rate,
        });

        let rms_window = &window[window.len().saturating_sub(RMS_WINDOW)..];
        let rms = if rms_window.is_empty() {
            0.0
        } else {
            (rms_window.iter().map(|s| s * s).sum::<f32>() / rms_window.len() as f32).sqrt()
        };

        self.analysis = StemAnalysis {
            bands,
            percussion,
            raw_frequency: self.magnitudes.clone(),
            raw_time_domain: window.to_vec(),
            rms,
            position,
        };
    }

    /// Clock position clamped to the stem's duration once known.
    pub fn position(&self) -> f64 {
        let pos = self.clock.position();
        match &self.buffer {
            Some(buf) => pos.min(buf.duration_secs()),
            None => pos,
        }
    }
}
