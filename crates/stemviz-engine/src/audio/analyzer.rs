//! Per-stem spectral analysis.
//!
//! Converts one frame of frequency magnitudes into smoothed band
//! energies (bass/mid/treble/overall) and percussion scores
//! (kick/snare/hihat/transient) via per-band spectral flux and
//! energy-above-rolling-average onset detection.

use crate::config::UserConfig;

/// Band edges in Hz: bass 20-250, mid 250-4000, treble 4000-20000
const BASS_RANGE: (f32, f32) = (20.0, 250.0);
const MID_RANGE: (f32, f32) = (250.0, 4000.0);
const TREBLE_RANGE: (f32, f32) = (4000.0, 20_000.0);

/// Detector sub-ranges in Hz
const KICK_RANGE: (f32, f32) = (0.0, 80.0);
const SNARE_LOW_RANGE: (f32, f32) = (200.0, 600.0);
const SNARE_HIGH_RANGE: (f32, f32) = (3000.0, 8000.0);
const HIHAT_RANGE: (f32, f32) = (6000.0, 14_000.0);

/// Snare blends its low band 60/40 with its high band
const SNARE_LOW_WEIGHT: f32 = 0.6;

/// EMA factor for band energies
const BAND_ALPHA: f32 = 0.5;

/// Geometric decay applied to a percussion score on ticks with no event
const SCORE_DECAY: f32 = 0.85;

/// Rolling-average window for detector energies (ticks)
const ENERGY_WINDOW: usize = 8;

/// Trailing window for the transient detector's global flux (ticks)
const TRANSIENT_WINDOW: usize = 5;

/// Transient fires when flux exceeds its trailing average by this much
const TRANSIENT_DELTA: f32 = 0.02;
/// ...and the absolute flux is at least this
const TRANSIENT_FLOOR: f32 = 0.05;

/// Compressive output curve: noise floor subtracted, then pow 0.7 so
/// quiet passages stay visible without clipping loud ones
const SHAPE_FLOOR: f32 = 0.02;
const SHAPE_POWER: f32 = 0.7;

/// One frame of frequency magnitudes from the analysis tick.
/// Not retained; the analyzer copies what it needs for flux.
pub struct FrequencyFrame<'a> {
    /// Magnitude per bin, roughly 0-1
    pub magnitudes: &'a [f32],
    /// Sample rate the FFT was computed at (derives bin width)
    pub sample_rate: u32,
}

/// Smoothed band energies, each in 0-1.
#[derive(Clone, Debug, Default)]
pub struct BandEnergies {
    pub bass: f32,
    pub mid: f32,
    pub treble: f32,
    pub overall: f32,
    /// Raw per-bin magnitudes for callers needing finer resolution
    pub bass_bins: Vec<f32>,
    pub mid_bins: Vec<f32>,
    pub treble_bins: Vec<f32>,
}

/// Percussion scores, each in 0-1 with trailing ×0.85 decay.
#[derive(Clone, Copy, Debug, Default)]
pub struct PercussionScores {
    pub kick: f32,
    pub snare: f32,
    pub hihat: f32,
    pub transient: f32,
}

/// Per-detector tuning. Defaults follow the config template.
#[derive(Clone, Copy)]
struct Detector {
    flux_threshold: f32,
    peak_threshold: f32,
    /// Fires when energy exceeds rolling average times this...
    energy_ratio: f32,
    /// ...or exceeds this absolute floor
    energy_floor: f32,
    flux_weight: f32,
    energy_weight: f32,
    peak_bonus: f32,
    /// EMA factor; tighter (higher) on bass for snappier response
    alpha: f32,
}

/// State for one percussion channel.
#[derive(Clone)]
struct DetectorState {
    smoothed: f32,
    history: [f32; ENERGY_WINDOW],
    history_idx: usize,
    history_len: usize,
    value: f32,
}

impl DetectorState {
    fn new() -> Self {
        Self {
            smoothed: 0.0,
            history: [0.0; ENERGY_WINDOW],
            history_idx: 0,
            history_len: 0,
            value: 0.0,
        }
    }

    fn rolling_average(&self) -> f32 {
        if self.history_len == 0 {
            return 0.0;
        }
        self.history[..self.history_len].iter().sum::<f32>() / self.history_len as f32
    }

    fn push(&mut self, energy: f32) {
        self.history[self.history_idx] = energy;
        self.history_idx = (self.history_idx + 1) % ENERGY_WINDOW;
        self.history_len = (self.history_len + 1).min(ENERGY_WINDOW);
    }
}

/// Stateful per-stem analyzer. All smoothing history is owned by the
/// instance so multiple engines never interfere.
pub struct SpectralAnalyzer {
    kick: Detector,
    snare: Detector,
    hihat: Detector,

    kick_state: DetectorState,
    snare_state: DetectorState,
    hihat_state: DetectorState,

    bands: BandEnergies,
    transient: f32,

    prev_magnitudes: Vec<f32>,
    flux_history: [f32; TRANSIENT_WINDOW],
    flux_idx: usize,
    flux_len: usize,
}

impl SpectralAnalyzer {
    pub fn new() -> Self {
        Self::with_tuning(&UserConfig::default())
    }

    pub fn with_tuning(user: &UserConfig) -> Self {
        let energy_ratio = user.energy_ratio();
        Self {
            kick: Detector {
                flux_threshold: user.kick_flux_threshold(),
                peak_threshold: 0.30,
                energy_ratio,
                energy_floor: 0.25,
                flux_weight: 8.0,
                energy_weight: 2.0,
                peak_bonus: 0.25,
                alpha: 0.15,
            },
            snare: Detector {
                flux_threshold: user.snare_flux_threshold(),
                peak_threshold: 0.25,
                energy_ratio,
                energy_floor: 0.20,
                flux_weight: 10.0,
                energy_weight: 2.5,
                peak_bonus: 0.2,
                alpha: 0.12,
            },
            hihat: Detector {
                flux_threshold: user.hihat_flux_threshold(),
                peak_threshold: 0.18,
                energy_ratio,
                energy_floor: 0.12,
                flux_weight: 12.0,
                energy_weight: 3.0,
                peak_bonus: 0.15,
                alpha: 0.09,
            },
            kick_state: DetectorState::new(),
            snare_state: DetectorState::new(),
            hihat_state: DetectorState::new(),
            bands: BandEnergies::default(),
            transient: 0.0,
            prev_magnitudes: Vec::new(),
            flux_history: [0.0; TRANSIENT_WINDOW],
            flux_idx: 0,
            flux_len: 0,
        }
    }

    /// Analyze one frame. An empty frame yields the current (decaying)
    /// state without firing anything; a fresh analyzer returns all
    /// zeros for it.
    pub fn analyze(&mut self, frame: &FrequencyFrame) -> (BandEnergies, PercussionScores) {
        let mags = frame.magnitudes;
        if mags.is_empty() || frame.sample_rate == 0 {
            self.decay_scores();
            return (self.bands.clone(), self.scores());
        }

        // bin width = sample_rate / (2 * N) for a half-spectrum frame
        let bin_hz = frame.sample_rate as f32 / (2.0 * mags.len() as f32);
        let bins = |range: (f32, f32)| -> (usize, usize) {
            let lo = (range.0 / bin_hz).floor() as usize;
            let hi = ((range.1 / bin_hz).ceil() as usize).min(mags.len());
            (lo.min(hi), hi)
        };

        // Band energies
        let (b_lo, b_hi) = bins(BASS_RANGE);
        let (m_lo, m_hi) = bins(MID_RANGE);
        let (t_lo, t_hi) = bins(TREBLE_RANGE);

        let bass_avg = band_average(mags, b_lo, b_hi);
        let mid_avg = band_average(mags, m_lo, m_hi);
        let treble_avg = band_average(mags, t_lo, t_hi);

        let bass_raw = shape(bass_avg);
        let mid_raw = shape(mid_avg);
        let treble_raw = shape(treble_avg);
        // Mean of the band averages, not of the whole spectrum: a pure
        // tone should still register as overall energy
        let overall_raw = shape((bass_avg + mid_avg + treble_avg) / 3.0);

        self.bands.bass = ema(self.bands.bass, bass_raw, BAND_ALPHA);
        self.bands.mid = ema(self.bands.mid, mid_raw, BAND_ALPHA);
        self.bands.treble = ema(self.bands.treble, treble_raw, BAND_ALPHA);
        self.bands.overall = ema(self.bands.overall, overall_raw, BAND_ALPHA);

        self.bands.bass_bins.clear();
        self.bands.bass_bins.extend_from_slice(&mags[b_lo..b_hi]);
        self.bands.mid_bins.clear();
        self.bands.mid_bins.extend_from_slice(&mags[m_lo..m_hi]);
        self.bands.treble_bins.clear();
        self.bands.treble_bins.extend_from_slice(&mags[t_lo..t_hi]);

        // Spectral flux: positive frame-to-frame increases, per bin
        let have_prev = self.prev_magnitudes.len() == mags.len();
        let flux_in = |lo: usize, hi: usize| -> f32 {
            if !have_prev || hi <= lo {
                return 0.0;
            }
            let sum: f32 = mags[lo..hi]
                .iter()
                .zip(self.prev_magnitudes[lo..hi].iter())
                .map(|(cur, prev)| (cur - prev).max(0.0))
                .sum();
            sum / (hi - lo) as f32
        };

        let global_flux = flux_in(0, mags.len());

        // Percussion channels
        let (k_lo, k_hi) = bins(KICK_RANGE);
        let (sl_lo, sl_hi) = bins(SNARE_LOW_RANGE);
        let (sh_lo, sh_hi) = bins(SNARE_HIGH_RANGE);
        let (h_lo, h_hi) = bins(HIHAT_RANGE);

        let kick_energy = band_average(mags, k_lo, k_hi);
        let kick_flux = flux_in(k_lo, k_hi);
        let kick_peak = band_peak(mags, k_lo, k_hi);
        Self::run_detector(
            &self.kick,
            &mut self.kick_state,
            kick_energy,
            kick_flux,
            kick_peak,
        );

        let snare_energy = SNARE_LOW_WEIGHT * band_average(mags, sl_lo, sl_hi)
            + (1.0 - SNARE_LOW_WEIGHT) * band_average(mags, sh_lo, sh_hi);
        let snare_flux = SNARE_LOW_WEIGHT * flux_in(sl_lo, sl_hi)
            + (1.0 - SNARE_LOW_WEIGHT) * flux_in(sh_lo, sh_hi);
        let snare_peak = band_peak(mags, sl_lo, sl_hi).max(band_peak(mags, sh_lo, sh_hi));
        Self::run_detector(
            &self.snare,
            &mut self.snare_state,
            snare_energy,
            snare_flux,
            snare_peak,
        );

        let hihat_energy = band_average(mags, h_lo, h_hi);
        let hihat_flux = flux_in(h_lo, h_hi);
        let hihat_peak = band_peak(mags, h_lo, h_hi);
        Self::run_detector(
            &self.hihat,
            &mut self.hihat_state,
            hihat_energy,
            hihat_flux,
            hihat_peak,
        );

        // Transient channel: global flux against its own trailing average
        let flux_avg = if self.flux_len == 0 {
            0.0
        } else {
            self.flux_history[..self.flux_len].iter().sum::<f32>() / self.flux_len as f32
        };
        if global_flux - flux_avg > TRANSIENT_DELTA && global_flux > TRANSIENT_FLOOR {
            self.transient = ((global_flux - flux_avg) * 10.0).clamp(0.0, 1.0);
        } else {
            self.transient *= SCORE_DECAY;
        }
        self.flux_history[self.flux_idx] = global_flux;
        self.flux_idx = (self.flux_idx + 1) % TRANSIENT_WINDOW;
        self.flux_len = (self.flux_len + 1).min(TRANSIENT_WINDOW);

        self.prev_magnitudes.clear();
        self.prev_magnitudes.extend_from_slice(mags);

        (self.bands.clone(), self.scores())
    }

    fn run_detector(det: &Detector, state: &mut DetectorState, energy: f32, flux: f32, peak: f32) {
        state.smoothed = ema(state.smoothed, energy, det.alpha);
        let avg = state.rolling_average();

        let onset = flux > det.flux_threshold || peak > det.peak_threshold;
        let loud = state.smoothed > avg * det.energy_ratio || state.smoothed > det.energy_floor;

        if onset && loud {
            let mut strength = flux * det.flux_weight + (state.smoothed - avg) * det.energy_weight;
            if peak > det.peak_threshold {
                strength += det.peak_bonus;
            }
            // Detection strength sets the score outright, so a quieter
            // re-fire pulls a loud previous value down
            state.value = strength.clamp(0.0, 1.0);
        } else {
            state.value *= SCORE_DECAY;
        }

        state.push(state.smoothed);
    }

    fn decay_scores(&mut self) {
        self.kick_state.value *= SCORE_DECAY;
        self.snare_state.value *= SCORE_DECAY;
        self.hihat_state.value *= SCORE_DECAY;
        self.transient *= SCORE_DECAY;
    }

    fn scores(&self) -> PercussionScores {
        PercussionScores {
            kick: self.kick_state.value,
            snare: self.snare_state.value,
            hihat: self.hihat_state.value,
            transient: self.transient,
        }
    }
}

impl Default for SpectralAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn ema(current: f32, new: f32, alpha: f32) -> f32 {
    current * (1.0 - alpha) + new * alpha
}

fn band_average(mags: &[f32], lo: usize, hi: usize) -> f32 {
    if hi <= lo {
        return 0.0;
    }
    mags[lo..hi].iter().sum::<f32>() / (hi - lo) as f32
}

fn band_peak(mags: &[f32], lo: usize, hi: usize) -> f32 {
    if hi <= lo {
        return 0.0;
    }
    mags[lo..hi].iter().copied().fold(0.0f32, f32::max)
}

fn shape(v: f32) -> f32 {
    ((v - SHAPE_FLOOR) / (1.0 - SHAPE_FLOOR))
        .clamp(0.0, 1.0)
        .powf(SHAPE_POWER)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 44_100;
    const BINS: usize = 1024;

    fn frame(mags: &[f32]) -> FrequencyFrame {
        FrequencyFrame {
            magnitudes: mags,
            sample_rate: SR,
        }
    }

    /// Put energy into every bin covering the given Hz range.
    fn spike(range: (f32, f32), level: f32) -> Vec<f32> {
        let bin_hz = SR as f32 / (2.0 * BINS as f32);
        let mut mags = vec![0.0; BINS];
        let lo = (range.0 / bin_hz) as usize;
        let hi = ((range.1 / bin_hz).ceil() as usize).min(BINS);
        for m in &mut mags[lo..hi] {
            *m = level;
        }
        mags
    }

    #[test]
    fn zero_frame_on_fresh_analyzer_is_all_zero() {
        let mut analyzer = SpectralAnalyzer::new();
        let mags = vec![0.0; BINS];
        let (bands, scores) = analyzer.analyze(&frame(&mags));

        assert_eq!(bands.bass, 0.0);
        assert_eq!(bands.mid, 0.0);
        assert_eq!(bands.treble, 0.0);
        assert_eq!(bands.overall, 0.0);
        assert_eq!(scores.kick, 0.0);
        assert_eq!(scores.snare, 0.0);
        assert_eq!(scores.hihat, 0.0);
        assert_eq!(scores.transient, 0.0);
    }

    #[test]
    fn empty_frame_never_panics() {
        let mut analyzer = SpectralAnalyzer::new();
        let (bands, scores) = analyzer.analyze(&frame(&[]));
        assert_eq!(bands.overall, 0.0);
        assert_eq!(scores.kick, 0.0);
    }

    #[test]
    fn outputs_stay_in_unit_range() {
        let mut analyzer = SpectralAnalyzer::new();
        let loud = vec![1.0; BINS];
        let quiet = vec![0.01; BINS];

        for i in 0..50 {
            let mags = if i % 2 == 0 { &loud } else { &quiet };
            let (bands, scores) = analyzer.analyze(&frame(mags));
            for v in [
                bands.bass,
                bands.mid,
                bands.treble,
                bands.overall,
                scores.kick,
                scores.snare,
                scores.hihat,
                scores.transient,
            ] {
                assert!((0.0..=1.0).contains(&v), "value {v} out of range");
            }
        }
    }

    #[test]
    fn kick_spike_fires_then_decays_geometrically() {
        let mut analyzer = SpectralAnalyzer::new();
        let silence = vec![0.0; BINS];

        // Settle the rolling averages on silence
        for _ in 0..10 {
            analyzer.analyze(&frame(&silence));
        }

        let kick = spike((20.0, 80.0), 0.9);
        let (_, scores) = analyzer.analyze(&frame(&kick));
        assert!(scores.kick > 0.25, "kick did not fire: {}", scores.kick);

        let fired = scores.kick;
        let (_, scores) = analyzer.analyze(&frame(&silence));
        assert!(
            (scores.kick - fired * SCORE_DECAY).abs() < 1e-6,
            "expected geometric decay, got {} from {}",
            scores.kick,
            fired
        );
    }

    #[test]
    fn quieter_refire_lowers_the_score() {
        let mut analyzer = SpectralAnalyzer::new();
        let silence = vec![0.0; BINS];
        for _ in 0..10 {
            analyzer.analyze(&frame(&silence));
        }

        // A loud hit saturates the score...
        let loud = spike((20.0, 80.0), 0.9);
        let (_, scores) = analyzer.analyze(&frame(&loud));
        let first = scores.kick;
        assert!(first > 0.9, "loud hit: {first}");

        // ...then a sustained half-level hit re-fires on its peak and
        // must replace the score, not hold the stale louder one
        let softer = spike((20.0, 80.0), 0.5);
        let (_, scores) = analyzer.analyze(&frame(&softer));
        assert!(
            scores.kick < first * 0.8,
            "stale score held: {} after {first}",
            scores.kick
        );
        assert!(scores.kick > 0.3, "re-fire missed: {}", scores.kick);
    }

    #[test]
    fn kick_spike_does_not_fire_snare() {
        let mut analyzer = SpectralAnalyzer::new();
        let silence = vec![0.0; BINS];
        for _ in 0..10 {
            analyzer.analyze(&frame(&silence));
        }

        let kick = spike((20.0, 80.0), 0.9);
        let (_, scores) = analyzer.analyze(&frame(&kick));
        assert!(scores.snare < 0.05, "snare fired on a kick: {}", scores.snare);
    }

    #[test]
    fn decay_is_monotone_between_events() {
        let mut analyzer = SpectralAnalyzer::new();
        let silence = vec![0.0; BINS];
        for _ in 0..10 {
            analyzer.analyze(&frame(&silence));
        }

        let hit = spike((20.0, 80.0), 0.9);
        analyzer.analyze(&frame(&hit));

        let mut prev = analyzer.scores();
        for _ in 0..20 {
            let (_, scores) = analyzer.analyze(&frame(&silence));
            assert!(scores.kick <= prev.kick + 1e-9);
            assert!(scores.snare <= prev.snare + 1e-9);
            assert!(scores.hihat <= prev.hihat + 1e-9);
            assert!(scores.transient <= prev.transient + 1e-9);
            prev = scores;
        }
    }

    #[test]
    fn transient_fires_on_broadband_onset() {
        let mut analyzer = SpectralAnalyzer::new();
        let silence = vec![0.0; BINS];
        for _ in 0..10 {
            analyzer.analyze(&frame(&silence));
        }

        let broadband = vec![0.5; BINS];
        let (_, scores) = analyzer.analyze(&frame(&broadband));
        assert!(scores.transient > 0.5, "transient: {}", scores.transient);
    }

    #[test]
    fn band_split_separates_bass_from_treble() {
        let mut analyzer = SpectralAnalyzer::new();
        let bass_only = spike((20.0, 250.0), 0.8);

        let mut bands = BandEnergies::default();
        for _ in 0..10 {
            bands = analyzer.analyze(&frame(&bass_only)).0;
        }
        assert!(bands.bass > 0.4);
        assert!(bands.treble < 0.05);
        assert!(!bands.bass_bins.is_empty());
    }
}
