use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// One EEG notification from a single electrode.
///
/// Classic firmware sends one notification per electrode carrying
/// **12 samples** at 256 Hz, decoded from 12-bit packed values and scaled by
/// 0.48828125 µV/LSB.
#[derive(Debug, Clone)]
pub struct RawEegFrame {
    /// Sequential packet index emitted by the headset (wraps at 0xFFFF).
    pub index: u16,
    /// Electrode channel index:
    /// * 0 = TP9 (left rear)
    /// * 1 = AF7 (left front)
    /// * 2 = AF8 (right front)
    /// * 3 = TP10 (right rear)
    pub electrode: usize,
    /// Voltage samples in µV, oldest first.
    pub samples: Vec<f64>,
}

/// One PPG notification from a single optical channel.
///
/// Six raw 24-bit ADC samples at 64 Hz.
#[derive(Debug, Clone)]
pub struct RawPpgFrame {
    /// Sequential packet index (wraps at 0xFFFF).
    pub index: u16,
    /// Optical channel:
    /// * 0 = ambient
    /// * 1 = infrared
    /// * 2 = red
    pub ppg_channel: usize,
    /// Raw ADC values, not scaled to physical units.
    pub samples: Vec<u32>,
}

/// A reassembled JSON reply from the control characteristic.
#[derive(Debug, Clone)]
pub struct ControlResponse {
    /// The raw, un-parsed JSON string.
    pub raw: String,
    /// Key-value pairs from the parsed JSON object.
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl ControlResponse {
    /// Return code of a command acknowledgement (`{"rc":0}`), if present.
    pub fn return_code(&self) -> Option<i64> {
        self.fields.get("rc").and_then(|v| v.as_i64())
    }
}

/// Everything a live link delivers to the service loop.
#[derive(Debug, Clone)]
pub enum SensorEvent {
    Eeg(RawEegFrame),
    Ppg(RawPpgFrame),
    Control(ControlResponse),
    /// The BLE link was lost.  No further events follow on this session.
    Disconnected,
}

// ── Bands ────────────────────────────────────────────────────────────────────

/// The five canonical EEG frequency bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Band {
    Theta,
    Alpha,
    #[serde(rename = "Low beta")]
    LowBeta,
    #[serde(rename = "High beta")]
    HighBeta,
    Gamma,
}

impl Band {
    /// All bands, lowest frequency first.  Also the storage order of
    /// [`BandPowerSample`].
    pub const ALL: [Band; 5] = [
        Band::Theta,
        Band::Alpha,
        Band::LowBeta,
        Band::HighBeta,
        Band::Gamma,
    ];

    /// Half-open frequency range `[low, high)` in Hz.
    pub fn range_hz(self) -> (f64, f64) {
        match self {
            Band::Theta => (4.0, 8.0),
            Band::Alpha => (8.0, 12.0),
            Band::LowBeta => (12.0, 16.0),
            Band::HighBeta => (16.0, 25.0),
            Band::Gamma => (25.0, 45.0),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Band::Theta => "Theta",
            Band::Alpha => "Alpha",
            Band::LowBeta => "Low beta",
            Band::HighBeta => "High beta",
            Band::Gamma => "Gamma",
        }
    }

    fn position(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-band power estimate averaged over the four electrodes.
///
/// Produced once per band-power tick and never mutated afterwards.  All
/// values are finite and non-negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BandPowerSample {
    powers: [f64; 5],
}

impl BandPowerSample {
    /// Build a sample from values in [`Band::ALL`] order.  Negative or
    /// non-finite inputs are stored as `0.0`.
    pub fn from_array(powers: [f64; 5]) -> Self {
        Self {
            powers: powers.map(|p| if p.is_finite() && p > 0.0 { p } else { 0.0 }),
        }
    }

    pub fn get(&self, band: Band) -> f64 {
        self.powers[band.position()]
    }

    /// Values in [`Band::ALL`] order.
    pub fn as_array(&self) -> [f64; 5] {
        self.powers
    }

    pub fn iter(&self) -> impl Iterator<Item = (Band, f64)> + '_ {
        Band::ALL.iter().map(move |&b| (b, self.get(b)))
    }

    pub fn is_zero(&self) -> bool {
        self.powers.iter().all(|&p| p == 0.0)
    }
}

/// One effect intensity computed for a controlled band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EffectIntensity {
    pub band: Band,
    /// In `[0, 1)`; exactly `0.0` whenever the headset is not worn.
    pub value: f64,
}

/// The 10 Hz record published to consumers.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedSample {
    pub band_powers: BandPowerSample,
    pub worn: bool,
    /// Most recent heart rate in BPM, `0` when no valid estimate exists.
    pub heart_rate: u32,
    /// `true` until every EEG ring has been filled once since the last
    /// (re)connection.  Band powers from a warm-up window are not a
    /// flatline reading.
    pub warming_up: bool,
    pub intensities: Vec<EffectIntensity>,
}

// ── Connection ───────────────────────────────────────────────────────────────

/// Coarse lifecycle state of the managed headset link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Searching,
    Connecting,
    Connected,
    Streaming,
    Reconnecting,
    Error,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Searching => "searching",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status broadcast emitted on every connection transition.
///
/// Each variant carries only what is meaningful for its state, so a status
/// listener (an LED driver, a dashboard) never has to guess which fields are
/// populated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StatusUpdate {
    Idle,
    Searching { name_prefix: String },
    Connecting { device: String },
    Connected { device: String },
    Streaming { device: String },
    Reconnecting {
        device: String,
        attempt: u32,
        #[serde(rename = "delay_ms", serialize_with = "serialize_millis")]
        delay: Duration,
    },
    Error { reason: String },
}

impl StatusUpdate {
    pub fn state(&self) -> ConnectionState {
        match self {
            StatusUpdate::Idle => ConnectionState::Idle,
            StatusUpdate::Searching { .. } => ConnectionState::Searching,
            StatusUpdate::Connecting { .. } => ConnectionState::Connecting,
            StatusUpdate::Connected { .. } => ConnectionState::Connected,
            StatusUpdate::Streaming { .. } => ConnectionState::Streaming,
            StatusUpdate::Reconnecting { .. } => ConnectionState::Reconnecting,
            StatusUpdate::Error { .. } => ConnectionState::Error,
        }
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_power_sample_sanitises_input() {
        let s = BandPowerSample::from_array([1.0, -2.0, f64::NAN, f64::INFINITY, 0.5]);
        assert_eq!(s.as_array(), [1.0, 0.0, 0.0, 0.0, 0.5]);
        assert_eq!(s.get(Band::Gamma), 0.5);
    }

    #[test]
    fn status_update_serialises_as_tagged_object() {
        let update = StatusUpdate::Reconnecting {
            device: "Muse-AB12".into(),
            attempt: 2,
            delay: Duration::from_millis(4250),
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["state"], "reconnecting");
        assert_eq!(json["attempt"], 2);
        assert_eq!(json["delay_ms"], 4250);
        assert_eq!(update.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn band_ranges_are_contiguous() {
        for pair in Band::ALL.windows(2) {
            assert_eq!(pair[0].range_hz().1, pair[1].range_hz().0);
        }
    }
}
