/// Shared helpers: a scripted in-memory transport and synthetic frames.
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;

use muse_fx::protocol::{EEG_FREQUENCY, EEG_SAMPLES_PER_READING, PPG_FREQUENCY, PPG_SAMPLES_PER_READING};
use muse_fx::transport::{Link, Session, Transport};
use muse_fx::types::{RawEegFrame, RawPpgFrame, SensorEvent};

#[derive(Debug, Clone)]
pub struct MockDevice {
    pub name: String,
}

/// What the next `connect` call does.
#[allow(unused)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    Connect,
    FailConnect,
    FailStart,
}

/// State visible to the test while the transport is owned by the manager.
#[derive(Default)]
pub struct Shared {
    pub enumerations: u32,
    pub connects: u32,
    pub starts: u32,
    pub disconnects: u32,
    /// Sender of the most recent session.
    pub sender: Option<mpsc::Sender<SensorEvent>>,
}

pub struct MockTransport {
    pub devices: Vec<MockDevice>,
    pub advertises: bool,
    pub script: VecDeque<Outcome>,
    /// Used once `script` runs dry.
    pub fallback: Outcome,
    pub shared: Arc<Mutex<Shared>>,
}

#[allow(unused)]
impl MockTransport {
    pub fn new(outcomes: impl IntoIterator<Item = Outcome>, fallback: Outcome) -> Self {
        Self {
            devices: vec![MockDevice { name: "Muse-AB12".into() }],
            advertises: true,
            script: outcomes.into_iter().collect(),
            fallback,
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    pub fn connecting() -> Self {
        Self::new([], Outcome::Connect)
    }

    pub fn no_devices(mut self) -> Self {
        self.devices.clear();
        self
    }

    pub fn silent(mut self) -> Self {
        self.advertises = false;
        self
    }
}

pub struct MockLink {
    fail_start: bool,
    shared: Arc<Mutex<Shared>>,
}

impl Link for MockLink {
    async fn start_streaming(&mut self) -> Result<()> {
        self.shared.lock().unwrap().starts += 1;
        if self.fail_start {
            Err(anyhow!("start rejected (rc=69)"))
        } else {
            Ok(())
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.shared.lock().unwrap().disconnects += 1;
        Ok(())
    }
}

impl Transport for MockTransport {
    type Device = MockDevice;
    type Link = MockLink;

    fn device_name(&self, device: &MockDevice) -> String {
        device.name.clone()
    }

    async fn bonded_devices(&mut self, name_prefix: &str) -> Result<Vec<MockDevice>> {
        self.shared.lock().unwrap().enumerations += 1;
        Ok(self
            .devices
            .iter()
            .filter(|d| d.name.starts_with(name_prefix))
            .cloned()
            .collect())
    }

    async fn wait_for_advertisement(&mut self, _device: &MockDevice) -> Result<()> {
        if self.advertises {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        } else {
            std::future::pending().await
        }
    }

    async fn connect(&mut self, _device: &MockDevice) -> Result<Session<MockLink>> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let outcome = self.script.pop_front().unwrap_or(self.fallback);
        let mut shared = self.shared.lock().unwrap();
        shared.connects += 1;
        if outcome == Outcome::FailConnect {
            return Err(anyhow!("gatt error 133"));
        }
        let (tx, rx) = mpsc::channel(256);
        shared.sender = Some(tx);
        Ok(Session {
            link: MockLink {
                fail_start: outcome == Outcome::FailStart,
                shared: Arc::clone(&self.shared),
            },
            events: rx,
        })
    }
}

/// Poll until a session sender exists.
#[allow(unused)]
pub async fn wait_for_sender(shared: &Arc<Mutex<Shared>>) -> mpsc::Sender<SensorEvent> {
    loop {
        if let Some(tx) = shared.lock().unwrap().sender.clone() {
            return tx;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ── Synthetic frames ─────────────────────────────────────────────────────────

/// `seconds` of EEG on all four electrodes, `f(t)` µV.
#[allow(unused)]
pub fn eeg_frames(seconds: f64, f: impl Fn(f64) -> f64) -> Vec<SensorEvent> {
    let frames = (seconds * EEG_FREQUENCY / EEG_SAMPLES_PER_READING as f64).ceil() as usize;
    let mut out = Vec::with_capacity(frames * 4);
    for k in 0..frames {
        let samples: Vec<f64> = (0..EEG_SAMPLES_PER_READING)
            .map(|i| f((k * EEG_SAMPLES_PER_READING + i) as f64 / EEG_FREQUENCY))
            .collect();
        for electrode in 0..4 {
            out.push(SensorEvent::Eeg(RawEegFrame {
                index: k as u16,
                electrode,
                samples: samples.clone(),
            }));
        }
    }
    out
}

/// `seconds` of PPG: ambient and red at a fixed level, infrared `f(t)`.
#[allow(unused)]
pub fn ppg_frames(seconds: f64, f: impl Fn(f64) -> f64) -> Vec<SensorEvent> {
    let frames = (seconds * PPG_FREQUENCY / PPG_SAMPLES_PER_READING as f64).ceil() as usize;
    let mut out = Vec::with_capacity(frames * 3);
    for k in 0..frames {
        for channel in 0..3 {
            let samples = (0..PPG_SAMPLES_PER_READING)
                .map(|i| {
                    let t = (k * PPG_SAMPLES_PER_READING + i) as f64 / PPG_FREQUENCY;
                    if channel == 1 { f(t) } else { 5_000.0 }
                })
                .map(|v| v.max(0.0) as u32)
                .collect();
            out.push(SensorEvent::Ppg(RawPpgFrame {
                index: k as u16,
                ppg_channel: channel,
                samples,
            }));
        }
    }
    out
}

/// On-head infrared: 72 BPM pulse around 220 000.
#[allow(unused)]
pub fn pulse(t: f64) -> f64 {
    220_000.0 + 2_000.0 * (2.0 * PI * 1.2 * t).sin()
}

/// 10 Hz tone, squarely in the alpha band.
#[allow(unused)]
pub fn alpha_tone(t: f64) -> f64 {
    20.0 * (2.0 * PI * 10.0 * t).sin()
}
