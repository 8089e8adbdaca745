//! Control-change output to the audio-effect unit.
//!
//! | Parameter | Source |
//! |---|---|
//! | rate, depth, feedback, gain | fixed [`EffectConfig`] values, sent on every connect |
//! | mix | primary band intensity × 127, rate-limited |

use std::time::Duration;

use log::{debug, info};
use tokio::time::Instant;

/// A three-byte control-change message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlChange {
    /// 0–15.
    pub channel: u8,
    /// 0–127.
    pub controller: u8,
    /// 0–127.
    pub value: u8,
}

impl ControlChange {
    pub fn new(channel: u8, controller: u8, value: u8) -> Self {
        Self {
            channel: channel & 0x0F,
            controller: controller & 0x7F,
            value: value.min(127),
        }
    }

    /// `[0xB0 | channel, controller, value]`.
    pub fn to_bytes(self) -> [u8; 3] {
        [0xB0 | self.channel, self.controller, self.value]
    }
}

/// Destination for control-change messages.
pub trait ControlSink {
    fn send(&mut self, message: ControlChange) -> anyhow::Result<()>;
}

/// Sink that only logs each message.
#[derive(Debug, Default)]
pub struct LogSink;

impl ControlSink for LogSink {
    fn send(&mut self, message: ControlChange) -> anyhow::Result<()> {
        let [status, cc, value] = message.to_bytes();
        info!("cc {status:02X} {cc:02X} {value:02X}");
        Ok(())
    }
}

/// Sink that records every message; handy for tests and offline runs.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    pub sent: Vec<ControlChange>,
}

impl ControlSink for RecordingSink {
    fn send(&mut self, message: ControlChange) -> anyhow::Result<()> {
        self.sent.push(message);
        Ok(())
    }
}

/// Controller numbers of the effect parameters.
#[derive(Debug, Clone, Copy)]
pub struct Controllers {
    pub rate: u8,
    pub depth: u8,
    pub feedback: u8,
    pub mix: u8,
    pub gain: u8,
}

impl Default for Controllers {
    fn default() -> Self {
        Self {
            rate: 20,
            depth: 21,
            feedback: 22,
            mix: 23,
            gain: 24,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EffectConfig {
    /// MIDI channel, 0-based.
    pub channel: u8,
    pub controllers: Controllers,
    pub rate: u8,
    pub depth: u8,
    pub feedback: u8,
    pub gain: u8,
    /// Minimum spacing between two mix messages.  Default: 50 ms.
    pub min_interval: Duration,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            controllers: Controllers::default(),
            rate: 40,
            depth: 90,
            feedback: 30,
            gain: 100,
            min_interval: Duration::from_millis(50),
        }
    }
}

/// Scale an intensity in `[0, 1]` to a 7-bit value.
pub fn intensity_to_value(intensity: f64) -> u8 {
    if !intensity.is_finite() {
        return 0;
    }
    (intensity.clamp(0.0, 1.0) * 127.0).round() as u8
}

/// Drives a [`ControlSink`] from mapper output.
pub struct EffectController<S> {
    config: EffectConfig,
    sink: S,
    last_mix: Option<u8>,
    last_sent_at: Option<Instant>,
}

impl<S: ControlSink> EffectController<S> {
    pub fn new(config: EffectConfig, sink: S) -> Self {
        Self {
            config,
            sink,
            last_mix: None,
            last_sent_at: None,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn last_mix(&self) -> Option<u8> {
        self.last_mix
    }

    fn cc(&self, controller: u8, value: u8) -> ControlChange {
        ControlChange::new(self.config.channel, controller, value)
    }

    /// Send the fixed parameters and a silent mix.  Called on every
    /// (re)connection, since the effect unit may have been power-cycled.
    pub fn on_connect(&mut self) -> anyhow::Result<()> {
        let c = self.config.controllers;
        let fixed = [
            self.cc(c.rate, self.config.rate),
            self.cc(c.depth, self.config.depth),
            self.cc(c.feedback, self.config.feedback),
            self.cc(c.gain, self.config.gain),
            self.cc(c.mix, 0),
        ];
        for message in fixed {
            self.sink.send(message)?;
        }
        self.last_mix = Some(0);
        self.last_sent_at = Some(Instant::now());
        info!(
            "effects: fixed params rate={} depth={} feedback={} gain={}",
            self.config.rate, self.config.depth, self.config.feedback, self.config.gain
        );
        Ok(())
    }

    /// Push a new mix intensity.  Returns `true` if a message was sent.
    ///
    /// Unchanged values are suppressed, and changes arriving within
    /// `min_interval` of the previous send are dropped; the next tick carries
    /// the current value anyway.
    pub fn update(&mut self, intensity: f64, worn: bool) -> anyhow::Result<bool> {
        let value = if worn { intensity_to_value(intensity) } else { 0 };
        if self.last_mix == Some(value) {
            return Ok(false);
        }
        let now = Instant::now();
        if let Some(at) = self.last_sent_at {
            if now.duration_since(at) < self.config.min_interval {
                return Ok(false);
            }
        }
        self.sink.send(self.cc(self.config.controllers.mix, value))?;
        debug!("effects: mix {value}");
        self.last_mix = Some(value);
        self.last_sent_at = Some(now);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_change_bytes() {
        assert_eq!(ControlChange::new(2, 23, 64).to_bytes(), [0xB2, 23, 64]);
        assert_eq!(ControlChange::new(0x1F, 0xFF, 200).to_bytes(), [0xBF, 0x7F, 127]);
    }

    #[test]
    fn intensity_scaling() {
        assert_eq!(intensity_to_value(0.0), 0);
        assert_eq!(intensity_to_value(0.5), 64);
        assert_eq!(intensity_to_value(1.0), 127);
        assert_eq!(intensity_to_value(f64::NAN), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_sends_fixed_parameters() {
        let mut fx = EffectController::new(EffectConfig::default(), RecordingSink::default());
        fx.on_connect().unwrap();
        let sent = &fx.sink().sent;
        assert_eq!(sent.len(), 5);
        assert_eq!(sent[0], ControlChange::new(0, 20, 40));
        assert_eq!(sent[4], ControlChange::new(0, 23, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn mix_is_rate_limited_and_deduplicated() {
        let mut fx = EffectController::new(EffectConfig::default(), RecordingSink::default());
        fx.on_connect().unwrap();

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(fx.update(0.5, true).unwrap());
        assert!(!fx.update(0.5, true).unwrap(), "unchanged value");

        tokio::time::advance(Duration::from_millis(20)).await;
        assert!(!fx.update(0.9, true).unwrap(), "inside the 50 ms window");

        tokio::time::advance(Duration::from_millis(40)).await;
        assert!(fx.update(0.9, true).unwrap());
        assert_eq!(fx.last_mix(), Some(114));
    }

    #[tokio::test(start_paused = true)]
    async fn not_worn_forces_zero_mix() {
        let mut fx = EffectController::new(EffectConfig::default(), RecordingSink::default());
        fx.on_connect().unwrap();
        tokio::time::advance(Duration::from_millis(100)).await;
        fx.update(0.8, true).unwrap();
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(fx.update(0.8, false).unwrap());
        assert_eq!(fx.last_mix(), Some(0));
    }
}
