//! EEG band-power extraction.
//!
//! Each tick analyses the full 2 s window of every electrode:
//!
//! ```text
//! window ─ mean ─▶ × Hamming ─▶ FFT ─▶ |X[k]| / N ─▶ ×2 (k ≠ 0, N/2) ─▶ mean of bins per band
//! ```
//!
//! Band edges map to bins with `floor(f · N / fs)`; each band averages the
//! half-open bin range `[bin(low), bin(high))`, so wide bands such as Gamma
//! are not inflated by their bin count.  The four per-channel
//! results are averaged into one [`BandPowerSample`].

use std::f64::consts::PI;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::buffer::EegBuffers;
use crate::types::{Band, BandPowerSample};

/// Symmetric Hamming window of length `n`.
pub fn hamming(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / (n - 1) as f64).cos())
        .collect()
}

/// FFT bin holding frequency `freq_hz` for an `n`-point transform.
pub fn bin_index(freq_hz: f64, n: usize, sample_rate: f64) -> usize {
    (freq_hz * n as f64 / sample_rate).floor() as usize
}

/// Reusable band-power analyser for one window length.
pub struct BandPowerExtractor {
    n: usize,
    sample_rate: f64,
    window: Vec<f64>,
    fft: Arc<dyn Fft<f64>>,
    bands: [(usize, usize); 5],
    scratch: Vec<f64>,
    spectrum: Vec<Complex<f64>>,
}

impl BandPowerExtractor {
    /// # Panics
    /// Panics if `window_len < 2`.
    pub fn new(window_len: usize, sample_rate: f64) -> Self {
        assert!(window_len >= 2, "band-power window needs at least two samples");
        let mut planner = FftPlanner::new();
        let nyquist_bin = window_len / 2;
        let bands = Band::ALL.map(|band| {
            let (lo, hi) = band.range_hz();
            (
                bin_index(lo, window_len, sample_rate).min(nyquist_bin + 1),
                bin_index(hi, window_len, sample_rate).min(nyquist_bin + 1),
            )
        });
        Self {
            n: window_len,
            sample_rate,
            window: hamming(window_len),
            fft: planner.plan_fft_forward(window_len),
            bands,
            scratch: Vec::with_capacity(window_len),
            spectrum: vec![Complex::default(); window_len],
        }
    }

    pub fn window_len(&self) -> usize {
        self.n
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// One-sided magnitude spectrum of `signal` (length must equal the
    /// window length), bins `0..=N/2`.
    pub fn magnitude_spectrum(&mut self, signal: &[f64]) -> Vec<f64> {
        debug_assert_eq!(signal.len(), self.n);
        let mean = signal.iter().sum::<f64>() / self.n as f64;
        for ((slot, &x), &w) in self.spectrum.iter_mut().zip(signal).zip(&self.window) {
            *slot = Complex { re: (x - mean) * w, im: 0.0 };
        }
        self.fft.process(&mut self.spectrum);

        let nyquist = self.n / 2;
        let norm = 1.0 / self.n as f64;
        (0..=nyquist)
            .map(|k| {
                let mag = self.spectrum[k].norm() * norm;
                let edge = k == 0 || (self.n % 2 == 0 && k == nyquist);
                if edge {
                    mag
                } else {
                    2.0 * mag
                }
            })
            .collect()
    }

    /// Band powers of a single channel window, in [`Band::ALL`] order.
    ///
    /// An empty bin range (band above Nyquist) reads as `0.0`.
    pub fn channel_band_powers(&mut self, signal: &[f64]) -> [f64; 5] {
        let spectrum = self.magnitude_spectrum(signal);
        self.bands.map(|(lo, hi)| {
            let hi = hi.min(spectrum.len());
            if lo >= hi {
                return 0.0;
            }
            spectrum[lo..hi].iter().sum::<f64>() / (hi - lo) as f64
        })
    }

    /// Analyse every electrode ring and average per band.
    ///
    /// A zero-filled window (no data yet) yields an all-zero sample.
    pub fn extract(&mut self, buffers: &EegBuffers) -> BandPowerSample {
        let mut totals = [0.0; 5];
        let channels = buffers.channels();
        let mut scratch = std::mem::take(&mut self.scratch);
        for ring in channels {
            ring.copy_to(&mut scratch);
            let powers = self.channel_band_powers(&scratch);
            for (t, p) in totals.iter_mut().zip(powers) {
                *t += p;
            }
        }
        self.scratch = scratch;
        let count = channels.len().max(1) as f64;
        BandPowerSample::from_array(totals.map(|t| t / count))
    }
}
