//! PPG heart-rate estimation and worn-state detection.
//!
//! Heart rate, once per second over the 10 s infrared window:
//!
//! ```text
//! infrared ─▶ filtfilt(15-tap low-pass, odd padding)
//!          ─▶ − degree-6 polynomial fit ─▶ min–max → [0, 1]
//!          ─▶ adaptive-threshold peaks (0.6 s refractory)
//!          ─▶ mean of 60 / interval over 30–220 BPM intervals
//! ```
//!
//! Worn state does not depend on the heart rate.  It compares the mean
//! infrared level of the 2 s diagnostic window against a perfusion
//! threshold and only flips after several consecutive agreeing ticks.

use std::f64::consts::PI;

use log::debug;

use crate::buffer::PpgBuffers;
use crate::protocol::{PPG_CHANNELS, PPG_FREQUENCY, PPG_INFRARED};

/// Mean infrared level separating on-head from off-head.
///
/// Observed means are ≈220 000 on the head and ≈8 500 off it; 43 000 sits
/// near their geometric midpoint with more than 5× margin on either side.
pub const DEFAULT_PERFUSION_THRESHOLD: f64 = 43_000.0;

/// Consecutive contradicting ticks required to flip the worn flag.
pub const DEFAULT_WORN_HYSTERESIS: u8 = 3;

/// How the raw per-tick worn classification is made.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WornStrategy {
    /// Mean infrared level of the diagnostic window above `threshold`.
    Perfusion { threshold: f64 },
    /// Heart rate inside `[min_bpm, max_bpm]`.
    ///
    /// Kept for comparison only: loose contact can produce rhythmic
    /// artefacts that pass a plausibility check, so this strategy reports
    /// "worn" for a headset lying on a desk far more often.
    HeartRateRange { min_bpm: f64, max_bpm: f64 },
}

impl Default for WornStrategy {
    fn default() -> Self {
        WornStrategy::Perfusion {
            threshold: DEFAULT_PERFUSION_THRESHOLD,
        }
    }
}

/// Tunables for [`PpgDetector`].
#[derive(Debug, Clone)]
pub struct PpgConfig {
    pub sample_rate: f64,
    /// Low-pass kernel length; must be odd.  Default: `15`.
    pub filter_taps: usize,
    /// Low-pass cutoff in Hz.  Default: `4.0` (240 BPM).
    pub filter_cutoff_hz: f64,
    /// Degree of the baseline-drift polynomial.  Default: `6`.
    pub detrend_degree: usize,
    /// Minimum time between accepted peaks in seconds.  Default: `0.6`.
    pub refractory_secs: f64,
    /// Threshold decay per second, in units of the signal standard deviation.
    /// Default: `1.0`.
    pub threshold_decay: f64,
    /// Plausible heart-rate range; intervals outside it are discarded.
    pub min_bpm: f64,
    pub max_bpm: f64,
    pub worn_strategy: WornStrategy,
    pub worn_hysteresis: u8,
}

impl Default for PpgConfig {
    fn default() -> Self {
        Self {
            sample_rate: PPG_FREQUENCY,
            filter_taps: 15,
            filter_cutoff_hz: 4.0,
            detrend_degree: 6,
            refractory_secs: 0.6,
            threshold_decay: 1.0,
            min_bpm: 30.0,
            max_bpm: 220.0,
            worn_strategy: WornStrategy::default(),
            worn_hysteresis: DEFAULT_WORN_HYSTERESIS,
        }
    }
}

// ── Filtering ────────────────────────────────────────────────────────────────

/// Hamming-windowed sinc low-pass with unit DC gain.
///
/// # Panics
/// Panics if `taps` is even or zero.
pub fn lowpass_kernel(taps: usize, cutoff_hz: f64, sample_rate: f64) -> Vec<f64> {
    assert!(taps % 2 == 1, "low-pass kernel needs an odd number of taps");
    let centre = (taps - 1) as f64 / 2.0;
    let fc = 2.0 * cutoff_hz / sample_rate;
    let mut h: Vec<f64> = (0..taps)
        .map(|i| {
            let x = i as f64 - centre;
            let sinc = if x == 0.0 { fc } else { (PI * fc * x).sin() / (PI * x) };
            let w = if taps == 1 {
                1.0
            } else {
                0.54 - 0.46 * (2.0 * PI * i as f64 / (taps - 1) as f64).cos()
            };
            sinc * w
        })
        .collect();
    let sum: f64 = h.iter().sum();
    h.iter_mut().for_each(|v| *v /= sum);
    h
}

/// Odd (point-symmetric) extension by `pad` samples on each side.
///
/// Left: `2·x[0] − x[i]`, right: `2·x[n−1] − x[n−1−i]` for `i = 1..=pad`.
fn odd_extend(x: &[f64], pad: usize) -> Vec<f64> {
    let n = x.len();
    let mut out = Vec::with_capacity(n + 2 * pad);
    out.extend((1..=pad).rev().map(|i| 2.0 * x[0] - x[i]));
    out.extend_from_slice(x);
    out.extend((1..=pad).map(|i| 2.0 * x[n - 1] - x[n - 1 - i]));
    out
}

/// Causal FIR pass whose history is primed with the first sample, i.e. the
/// filter starts in the steady state of a constant input.
fn fir_forward(kernel: &[f64], x: &[f64]) -> Vec<f64> {
    let first = x.first().copied().unwrap_or(0.0);
    (0..x.len())
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, &b)| b * if k <= i { x[i - k] } else { first })
                .sum()
        })
        .collect()
}

/// Zero-phase forward-backward FIR filtering.
///
/// The signal is odd-extended by `3 · taps` samples (clamped to `n − 1`)
/// before filtering so the boundaries do not ring.
pub fn filtfilt(kernel: &[f64], x: &[f64]) -> Vec<f64> {
    let n = x.len();
    if n < 2 {
        return x.to_vec();
    }
    let pad = (3 * kernel.len()).min(n - 1);
    let ext = odd_extend(x, pad);
    let mut y = fir_forward(kernel, &ext);
    y.reverse();
    let mut y = fir_forward(kernel, &y);
    y.reverse();
    y.drain(..pad);
    y.truncate(n);
    y
}

// ── Detrending ───────────────────────────────────────────────────────────────

/// Subtract the least-squares polynomial of `degree` fitted over time.
///
/// Time is mapped onto `[−1, 1]` to keep the normal equations well
/// conditioned.  When the fit is not solvable the mean is removed instead.
pub fn detrend_polynomial(x: &[f64], degree: usize) -> Vec<f64> {
    let n = x.len();
    let terms = degree + 1;
    let mean = || x.iter().sum::<f64>() / n.max(1) as f64;
    if n < terms + 1 {
        let m = mean();
        return x.iter().map(|v| v - m).collect();
    }

    let t_of = |i: usize| 2.0 * i as f64 / (n - 1) as f64 - 1.0;

    // Normal equations A·c = b with A[j][k] = Σ t^(j+k), b[j] = Σ x·t^j.
    let mut power_sums = vec![0.0; 2 * degree + 1];
    let mut rhs = vec![0.0; terms];
    for (i, &v) in x.iter().enumerate() {
        let t = t_of(i);
        let mut p = 1.0;
        for (j, s) in power_sums.iter_mut().enumerate() {
            *s += p;
            if j < terms {
                rhs[j] += v * p;
            }
            p *= t;
        }
    }
    let mut a: Vec<Vec<f64>> = (0..terms)
        .map(|j| (0..terms).map(|k| power_sums[j + k]).collect())
        .collect();

    let Some(coeffs) = solve_linear(&mut a, &mut rhs) else {
        let m = mean();
        return x.iter().map(|v| v - m).collect();
    };

    x.iter()
        .enumerate()
        .map(|(i, &v)| {
            let t = t_of(i);
            // Horner evaluation.
            let fit = coeffs.iter().rev().fold(0.0, |acc, &c| acc * t + c);
            v - fit
        })
        .collect()
}

/// Gaussian elimination with partial pivoting.  Returns `None` for a
/// (numerically) singular system.
fn solve_linear(a: &mut [Vec<f64>], b: &mut [f64]) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let f = a[row][col] / a[col][col];
            if f == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= f * a[col][k];
            }
            b[row] -= f * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Rescale to `[0, 1]`.  Returns `None` for a flat or non-finite signal.
pub fn normalize_min_max(x: &[f64]) -> Option<Vec<f64>> {
    let (lo, hi) = x
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let span = hi - lo;
    if !span.is_finite() || span <= f64::EPSILON * hi.abs().max(1.0) {
        return None;
    }
    Some(x.iter().map(|v| (v - lo) / span).collect())
}

// ── Peaks and heart rate ─────────────────────────────────────────────────────

fn std_dev(x: &[f64]) -> f64 {
    let n = x.len() as f64;
    let mean = x.iter().sum::<f64>() / n;
    (x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

/// Adaptive-threshold peak detection.
///
/// The threshold starts at the first sample, jumps up to the signal
/// whenever the signal exceeds it, and otherwise decays by
/// `decay_per_sec · σ / fs` per sample.  A sample is a peak when it exceeds
/// the threshold, is a local maximum, and lies at least `refractory_secs`
/// after the previous accepted peak.
pub fn detect_peaks(
    signal: &[f64],
    sample_rate: f64,
    refractory_secs: f64,
    decay_per_sec: f64,
) -> Vec<usize> {
    let n = signal.len();
    if n < 3 {
        return vec![];
    }
    let sigma = std_dev(signal);
    if !sigma.is_finite() || sigma == 0.0 {
        return vec![];
    }
    let decay = decay_per_sec * sigma / sample_rate;
    let refractory = (refractory_secs * sample_rate).ceil() as usize;

    let mut threshold = signal[0];
    let mut peaks: Vec<usize> = Vec::new();
    for i in 1..n - 1 {
        let x = signal[i];
        if x > threshold {
            threshold = x;
            let local_max = x > signal[i - 1] && x >= signal[i + 1];
            let clear = peaks.last().map_or(true, |&p| i - p >= refractory);
            if local_max && clear {
                peaks.push(i);
            }
        } else {
            threshold -= decay;
        }
    }
    peaks
}

/// Mean heart rate over consecutive peak intervals.
///
/// Intervals whose rate falls outside `[min_bpm, max_bpm]` are dropped from
/// the average.  Fewer than three peaks, or no plausible interval, gives `0`.
pub fn heart_rate_bpm(peaks: &[usize], sample_rate: f64, min_bpm: f64, max_bpm: f64) -> f64 {
    if peaks.len() < 3 {
        return 0.0;
    }
    let rates: Vec<f64> = peaks
        .windows(2)
        .map(|w| 60.0 * sample_rate / (w[1] - w[0]) as f64)
        .filter(|bpm| (min_bpm..=max_bpm).contains(bpm))
        .collect();
    if rates.is_empty() {
        0.0
    } else {
        rates.iter().sum::<f64>() / rates.len() as f64
    }
}

// ── Worn state ───────────────────────────────────────────────────────────────

/// Hysteretic worn flag.
///
/// The visible flag only flips after `threshold` consecutive raw
/// classifications disagree with it; any agreeing classification resets the
/// counter.  Starts as "not worn".
#[derive(Debug, Clone)]
pub struct WornState {
    worn: bool,
    contradictions: u8,
    threshold: u8,
}

impl WornState {
    pub fn new(threshold: u8) -> Self {
        Self {
            worn: false,
            contradictions: 0,
            threshold: threshold.max(1),
        }
    }

    pub fn is_worn(&self) -> bool {
        self.worn
    }

    /// Consecutive raw classifications currently contradicting the flag.
    pub fn confidence(&self) -> u8 {
        self.contradictions
    }

    /// Feed one raw classification and return the visible flag.
    pub fn update(&mut self, raw_worn: bool) -> bool {
        if raw_worn == self.worn {
            self.contradictions = 0;
        } else {
            self.contradictions += 1;
            if self.contradictions >= self.threshold {
                self.worn = raw_worn;
                self.contradictions = 0;
            }
        }
        self.worn
    }
}

// ── Detector ─────────────────────────────────────────────────────────────────

/// Result of one PPG tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PpgReading {
    /// Rounded heart rate in BPM; `0` when no valid estimate exists.
    pub heart_rate: u32,
    pub worn: bool,
    /// Mean level of each diagnostic window (ambient, infrared, red).
    pub perfusion: [f64; PPG_CHANNELS],
}

/// Runs the heart-rate pipeline and owns the worn flag.
pub struct PpgDetector {
    config: PpgConfig,
    kernel: Vec<f64>,
    worn: WornState,
    last: PpgReading,
}

impl PpgDetector {
    pub fn new(config: PpgConfig) -> Self {
        let kernel = lowpass_kernel(config.filter_taps, config.filter_cutoff_hz, config.sample_rate);
        let worn = WornState::new(config.worn_hysteresis);
        Self {
            config,
            kernel,
            worn,
            last: PpgReading {
                heart_rate: 0,
                worn: false,
                perfusion: [0.0; PPG_CHANNELS],
            },
        }
    }

    pub fn is_worn(&self) -> bool {
        self.worn.is_worn()
    }

    pub fn last(&self) -> PpgReading {
        self.last
    }

    /// Heart rate of one window, `0.0` if it cannot be estimated.
    pub fn estimate_heart_rate(&self, window: &[f64]) -> f64 {
        let filtered = filtfilt(&self.kernel, window);
        let detrended = detrend_polynomial(&filtered, self.config.detrend_degree);
        let Some(normalized) = normalize_min_max(&detrended) else {
            return 0.0;
        };
        let peaks = detect_peaks(
            &normalized,
            self.config.sample_rate,
            self.config.refractory_secs,
            self.config.threshold_decay,
        );
        let bpm = heart_rate_bpm(&peaks, self.config.sample_rate, self.config.min_bpm, self.config.max_bpm);
        debug!("ppg: {} peaks → {bpm:.1} BPM", peaks.len());
        bpm
    }

    /// One 1 s tick over the current buffers.
    pub fn tick(&mut self, buffers: &PpgBuffers) -> PpgReading {
        let infrared = buffers.infrared();
        let bpm = if infrared.is_filled() {
            self.estimate_heart_rate(&infrared.to_vec())
        } else {
            0.0
        };

        let perfusion: [f64; PPG_CHANNELS] = std::array::from_fn(|ch| buffers.diagnostic(ch).mean());
        // A diagnostic ring not refilled since the last (re)connect still
        // holds the previous session's level.
        let raw_worn = match self.config.worn_strategy {
            WornStrategy::Perfusion { threshold } => {
                buffers.diagnostic(PPG_INFRARED).is_filled() && perfusion[PPG_INFRARED] > threshold
            }
            WornStrategy::HeartRateRange { min_bpm, max_bpm } => bpm >= min_bpm && bpm <= max_bpm,
        };
        let worn = self.worn.update(raw_worn);

        self.last = PpgReading {
            heart_rate: bpm.round() as u32,
            worn,
            perfusion,
        };
        self.last
    }
}
