//! The headless run loop.
//!
//! ```text
//! Session.events ──▶ rings ──┬─ 100 ms ─▶ band powers ─▶ mapper ─▶ effects
//!                            │                              └──▶ ProcessedSample (broadcast)
//!                            └─ 1 s ───▶ heart rate + worn flag
//! ```
//!
//! One `tokio::select!` loop owns every piece of pipeline state.  On link
//! loss the loop hands control to [`ConnectionManager::recover`]; ticks and
//! ring writes pause until it returns, and resume with the rings marked as
//! warming up.

use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::band_power::BandPowerExtractor;
use crate::buffer::{EegBuffers, PpgBuffers};
use crate::config::Config;
use crate::connection::{ConnectionManager, DisconnectHandle};
use crate::effects::{ControlSink, EffectController};
use crate::error::{ConfigError, LinkError};
use crate::mapper::EffectMapper;
use crate::ppg::{PpgDetector, PpgReading};
use crate::protocol::{EEG_FREQUENCY, EEG_WINDOW_SAMPLES, PPG_INFRARED};
use crate::transport::{Session, Transport};
use crate::types::{ProcessedSample, SensorEvent};

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Band-power / mapper tick.  Default: 100 ms (10 Hz).
    pub tick_interval: Duration,
    /// Heart-rate / worn tick.  Default: 1 s.
    pub ppg_interval: Duration,
    /// Status summary log period.  Default: 5 s.
    pub status_interval: Duration,
    /// Wait before retrying auto-connect when no headset is bonded.
    /// Default: 6 s.
    pub idle_retry_delay: Duration,
    /// Capacity of the [`ProcessedSample`] broadcast.  Default: 64.
    pub sample_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            ppg_interval: Duration::from_secs(1),
            status_interval: Duration::from_secs(5),
            idle_retry_delay: Duration::from_secs(6),
            sample_capacity: 64,
        }
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

/// Counters for the periodic status line.
#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
    pub eeg_frames: u64,
    pub ppg_frames: u64,
    pub dropped_frames: u64,
    pub samples: u64,
}

/// All per-connection signal state: rings, extractors, mapper and effects.
pub struct Pipeline<S> {
    eeg: EegBuffers,
    ppg: PpgBuffers,
    extractor: BandPowerExtractor,
    detector: PpgDetector,
    mapper: EffectMapper,
    effects: EffectController<S>,
    counters: Counters,
    last: Option<ProcessedSample>,
}

impl<S: ControlSink> Pipeline<S> {
    pub fn new(config: &Config, sink: S) -> Result<Self, ConfigError> {
        Ok(Self {
            eeg: EegBuffers::new(),
            ppg: PpgBuffers::new(),
            extractor: BandPowerExtractor::new(EEG_WINDOW_SAMPLES, EEG_FREQUENCY),
            detector: PpgDetector::new(config.ppg.clone()),
            mapper: EffectMapper::new(config.mapper.clone())?,
            effects: EffectController::new(config.effects.clone(), sink),
            counters: Counters::default(),
            last: None,
        })
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn last_sample(&self) -> Option<&ProcessedSample> {
        self.last.as_ref()
    }

    pub fn ppg_reading(&self) -> PpgReading {
        self.detector.last()
    }

    pub fn effects(&self) -> &EffectController<S> {
        &self.effects
    }

    /// Called after every (re)connection.
    pub fn on_connect(&mut self) {
        self.eeg.reset_fill();
        self.ppg.reset_fill();
        if let Err(e) = self.effects.on_connect() {
            warn!("effects: could not send fixed parameters: {e:#}");
        }
    }

    pub fn ingest(&mut self, event: SensorEvent) {
        match event {
            SensorEvent::Eeg(frame) => {
                if self.eeg.push_frame(&frame) {
                    self.counters.eeg_frames += 1;
                } else {
                    self.counters.dropped_frames += 1;
                }
            }
            SensorEvent::Ppg(frame) => {
                if self.ppg.push_frame(&frame) {
                    self.counters.ppg_frames += 1;
                } else {
                    self.counters.dropped_frames += 1;
                }
            }
            SensorEvent::Control(resp) => match resp.return_code() {
                Some(0) | None => info!("control: {}", resp.raw),
                Some(rc) => warn!("control: command rejected (rc={rc}): {}", resp.raw),
            },
            SensorEvent::Disconnected => {}
        }
    }

    /// 10 Hz tick: band powers → intensities → effect mix.
    pub fn tick(&mut self) -> ProcessedSample {
        let band_powers = self.extractor.extract(&self.eeg);
        let warming_up = !self.eeg.is_filled();
        let worn = self.detector.is_worn();
        let intensities = self.mapper.update(&band_powers, worn, warming_up);

        let primary = self
            .mapper
            .primary()
            .and_then(|band| intensities.iter().find(|i| i.band == band))
            .map_or(0.0, |i| i.value);
        if let Err(e) = self.effects.update(primary, worn) {
            warn!("effects: send failed: {e:#}");
        }

        let sample = ProcessedSample {
            band_powers,
            worn,
            heart_rate: self.detector.last().heart_rate,
            warming_up,
            intensities,
        };
        self.counters.samples += 1;
        self.last = Some(sample.clone());
        sample
    }

    /// 1 Hz tick: heart rate and worn flag.
    pub fn ppg_tick(&mut self) -> PpgReading {
        let was_worn = self.detector.is_worn();
        let reading = self.detector.tick(&self.ppg);
        if reading.worn != was_worn {
            info!(
                "worn: {} (IR level {:.0})",
                if reading.worn { "on head" } else { "off head" },
                reading.perfusion[PPG_INFRARED]
            );
        }
        debug!("ppg: hr={} worn={} perfusion={:?}", reading.heart_rate, reading.worn, reading.perfusion);
        reading
    }
}

// ── Service ──────────────────────────────────────────────────────────────────

fn ticker(period: Duration) -> Interval {
    let mut t = interval_at(Instant::now() + period, period);
    t.set_missed_tick_behavior(MissedTickBehavior::Skip);
    t
}

pub struct Service<T: Transport, S> {
    manager: ConnectionManager<T>,
    pipeline: Pipeline<S>,
    config: ServiceConfig,
    samples_tx: broadcast::Sender<ProcessedSample>,
}

impl<T: Transport, S: ControlSink> Service<T, S> {
    pub fn new(transport: T, config: Config, sink: S) -> Result<Self, ConfigError> {
        let pipeline = Pipeline::new(&config, sink)?;
        let (samples_tx, _) = broadcast::channel(config.service.sample_capacity.max(1));
        Ok(Self {
            manager: ConnectionManager::new(transport, config.connection),
            pipeline,
            config: config.service,
            samples_tx,
        })
    }

    /// 10 Hz stream of processed samples.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessedSample> {
        self.samples_tx.subscribe()
    }

    pub fn manager(&self) -> &ConnectionManager<T> {
        &self.manager
    }

    pub fn pipeline(&self) -> &Pipeline<S> {
        &self.pipeline
    }

    pub fn disconnect_handle(&self) -> DisconnectHandle {
        self.manager.disconnect_handle()
    }

    /// Auto-connect and stream until the user disconnects (`Ok`) or the
    /// manager lands in `Error` (`Err`).
    ///
    /// With no bonded headset the service idles for `idle_retry_delay` and
    /// tries again.
    pub async fn run(&mut self) -> Result<(), LinkError> {
        loop {
            let session = match self.manager.auto_connect().await {
                Ok(session) => session,
                Err(LinkError::Cancelled) => return Ok(()),
                Err(e @ (LinkError::DeviceAbsent | LinkError::Transient(_))) => {
                    info!(
                        "service: {e}; retrying in {} s",
                        self.config.idle_retry_delay.as_secs()
                    );
                    let token = self.manager.cancel_token();
                    tokio::select! {
                        _ = token.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(self.config.idle_retry_delay) => continue,
                    }
                }
                Err(e) => return Err(e),
            };
            return self.stream(session).await;
        }
    }

    /// Drive one session, recovering across link losses.
    pub async fn stream(&mut self, mut session: Session<T::Link>) -> Result<(), LinkError> {
        loop {
            self.pipeline.on_connect();
            let token = self.manager.cancel_token();
            let mut tick = ticker(self.config.tick_interval);
            let mut ppg_tick = ticker(self.config.ppg_interval);
            let mut status_tick = ticker(self.config.status_interval);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        self.manager.disconnect(Some(&mut session.link)).await;
                        return Ok(());
                    }
                    event = session.events.recv() => match event {
                        Some(SensorEvent::Disconnected) | None => break,
                        Some(event) => self.pipeline.ingest(event),
                    },
                    _ = tick.tick() => {
                        let sample = self.pipeline.tick();
                        let _ = self.samples_tx.send(sample);
                    }
                    _ = ppg_tick.tick() => {
                        self.pipeline.ppg_tick();
                    }
                    _ = status_tick.tick() => self.log_status(),
                }
            }

            drop(session);
            session = match self.manager.recover().await {
                Ok(session) => session,
                Err(LinkError::Cancelled) => return Ok(()),
                Err(e) => return Err(e),
            };
        }
    }

    fn log_status(&self) {
        let c = self.pipeline.counters();
        let ppg = self.pipeline.ppg_reading();
        let bands = self
            .pipeline
            .last_sample()
            .map(|s| {
                s.band_powers
                    .iter()
                    .map(|(band, p)| format!("{band}={p:.2}"))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();
        info!(
            "status: {} | eeg {} ppg {} dropped {} | worn={} hr={} | {bands}",
            self.manager.state(),
            c.eeg_frames,
            c.ppg_frames,
            c.dropped_frames,
            ppg.worn,
            ppg.heart_rate,
        );
    }
}
