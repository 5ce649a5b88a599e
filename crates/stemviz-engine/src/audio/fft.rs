//! Windowed FFT tap used by the analysis tick.

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// FFT size. At 44.1kHz this gives ~21.5Hz bins, enough resolution
/// for the 20-80Hz kick range.
pub const FFT_SIZE: usize = 2048;

/// Pre-allocated FFT resources, one per analysis thread.
pub struct FftContext {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
}

impl FftContext {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        let window: Vec<f32> = (0..FFT_SIZE)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / FFT_SIZE as f32).cos()))
            .collect();

        Self {
            fft,
            window,
            buffer: vec![Complex::new(0.0, 0.0); FFT_SIZE],
        }
    }

    /// Compute half-spectrum magnitudes (roughly 0-1) for a window of
    /// samples. Shorter windows are zero-padded.
    pub fn magnitudes(&mut self, samples: &[f32], out: &mut Vec<f32>) {
        let n = samples.len().min(FFT_SIZE);
        for i in 0..FFT_SIZE {
            let s = if i < n { samples[i] } else { 0.0 };
            self.buffer[i] = Complex::new(s * self.window[i], 0.0);
        }

        self.fft.process(&mut self.buffer);

        out.clear();
        // Hann window halves the coherent gain, hence 4/N instead of 2/N
        let scale = 4.0 / FFT_SIZE as f32;
        out.extend(self.buffer[..FFT_SIZE / 2].iter().map(|c| c.norm() * scale));
    }
}

impl Default for FftContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sine_peaks_in_expected_bin() {
        let mut ctx = FftContext::new();
        let sr = 44_100.0;
        let freq = 440.0;
        let samples: Vec<f32> = (0..FFT_SIZE)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sr).sin())
            .collect();

        let mut mags = Vec::new();
        ctx.magnitudes(&samples, &mut mags);

        let peak_bin = mags
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();

        let expected = (freq / (sr / FFT_SIZE as f32)).round() as usize;
        assert!(
            (peak_bin as i32 - expected as i32).abs() <= 1,
            "peak at {peak_bin}, expected {expected}"
        );
        assert!(mags[peak_bin] > 0.5, "peak magnitude {}", mags[peak_bin]);
    }

    #[test]
    fn empty_input_is_all_zero() {
        let mut ctx = FftContext::new();
        let mut mags = Vec::new();
        ctx.magnitudes(&[], &mut mags);
        assert_eq!(mags.len(), FFT_SIZE / 2);
        assert!(mags.iter().all(|&m| m == 0.0));
    }
}
