//! Band powers → effect intensities.
//!
//! Each controlled band is reduced to its share of total power, then pushed
//! through a sigmoid.  The baseline-relative transform centres the sigmoid
//! on the running mean of that band's share, so the effect responds to a
//! listener's deviation from their own norm rather than to absolute levels.
//!
//! Intensities live in the open interval `(0, 1)` and are forced to exactly
//! `0.0` when the headset is not worn, while the rings are still warming up,
//! or when the sample has no usable total power.

use log::{debug, info};

use crate::error::ConfigError;
use crate::types::{Band, BandPowerSample, EffectIntensity};

/// Incremental arithmetic mean.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMean {
    mean: f64,
    count: u64,
}

impl RunningMean {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, x: f64) -> f64 {
        self.count += 1;
        self.mean += (x - self.mean) / self.count as f64;
        self.mean
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Each band's share of the total, in [`Band::ALL`] order.
///
/// An all-zero or non-finite total yields all zeros, never NaN.
pub fn band_fractions(sample: &BandPowerSample) -> [f64; 5] {
    let powers = sample.as_array();
    let total: f64 = powers.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return [0.0; 5];
    }
    powers.map(|p| p / total)
}

/// Keep a sigmoid output strictly inside `(0, 1)` despite float saturation.
fn clamp_open(y: f64) -> f64 {
    y.clamp(f64::MIN_POSITIVE, 1.0 - f64::EPSILON)
}

/// `1 / (1 + e^(−steepness·(v − midpoint)))`.
pub fn fixed_sigmoid(v: f64, midpoint: f64, steepness: f64) -> f64 {
    clamp_open(1.0 / (1.0 + (-steepness * (v - midpoint)).exp()))
}

/// `1 / (1 + e^(−smoothness·(v − mean)·sensitivity))`, optionally mirrored.
pub fn baseline_sigmoid(v: f64, mean: f64, smoothness: f64, sensitivity: f64, invert: bool) -> f64 {
    let y = 1.0 / (1.0 + (-smoothness * (v - mean) * sensitivity).exp());
    clamp_open(if invert { 1.0 - y } else { y })
}

/// How one band's fraction becomes an intensity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transform {
    Fixed { midpoint: f64, steepness: f64 },
    Baseline { smoothness: f64, sensitivity: f64, invert: bool },
}

impl Transform {
    fn validate(&self, band: Band) -> Result<(), ConfigError> {
        let check = |parameter: &'static str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::NonPositive { band, parameter, value })
            }
        };
        match *self {
            Transform::Fixed { steepness, .. } => check("steepness", steepness),
            Transform::Baseline { smoothness, sensitivity, .. } => {
                check("smoothness", smoothness)?;
                check("sensitivity", sensitivity)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandMapping {
    pub band: Band,
    pub transform: Transform,
}

/// Controlled bands, first entry is the primary one driving the mix.
#[derive(Debug, Clone)]
pub struct MapperConfig {
    pub mappings: Vec<BandMapping>,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            mappings: vec![BandMapping {
                band: Band::Alpha,
                transform: Transform::Baseline {
                    smoothness: 10.0,
                    sensitivity: 1.0,
                    invert: false,
                },
            }],
        }
    }
}

#[derive(Debug, Clone)]
struct Channel {
    mapping: BandMapping,
    baseline: RunningMean,
}

/// Stateful mapper; owns one running baseline per controlled band.
#[derive(Debug, Clone)]
pub struct EffectMapper {
    channels: Vec<Channel>,
}

impl EffectMapper {
    pub fn new(config: MapperConfig) -> Result<Self, ConfigError> {
        let mut channels: Vec<Channel> = Vec::with_capacity(config.mappings.len());
        for mapping in config.mappings {
            mapping.transform.validate(mapping.band)?;
            if channels.iter().any(|c| c.mapping.band == mapping.band) {
                return Err(ConfigError::DuplicateBand { band: mapping.band });
            }
            info!("mapper: {} → {:?}", mapping.band, mapping.transform);
            channels.push(Channel {
                mapping,
                baseline: RunningMean::new(),
            });
        }
        Ok(Self { channels })
    }

    /// Band whose intensity drives the effect mix.
    pub fn primary(&self) -> Option<Band> {
        self.channels.first().map(|c| c.mapping.band)
    }

    pub fn baseline(&self, band: Band) -> Option<RunningMean> {
        self.channels
            .iter()
            .find(|c| c.mapping.band == band)
            .map(|c| c.baseline)
    }

    /// Map one band-power sample.
    ///
    /// Only a worn, warmed-up sample with a finite non-zero total is mapped
    /// and folded into the baselines; anything else reads as `0.0`.
    pub fn update(&mut self, sample: &BandPowerSample, worn: bool, warming_up: bool) -> Vec<EffectIntensity> {
        let fractions = band_fractions(sample);
        let degenerate = fractions.iter().all(|&f| f == 0.0);
        let active = worn && !warming_up && !degenerate;

        self.channels
            .iter_mut()
            .map(|channel| {
                let band = channel.mapping.band;
                let v = fractions[band as usize];
                if active {
                    channel.baseline.update(v);
                }
                let value = if !active {
                    0.0
                } else {
                    match channel.mapping.transform {
                        Transform::Fixed { midpoint, steepness } => fixed_sigmoid(v, midpoint, steepness),
                        Transform::Baseline { smoothness, sensitivity, invert } => {
                            baseline_sigmoid(v, channel.baseline.mean(), smoothness, sensitivity, invert)
                        }
                    }
                };
                debug!("mapper: {band} frac={v:.3} base={:.3} → {value:.3}", channel.baseline.mean());
                EffectIntensity { band, value }
            })
            .collect()
    }
}
