//! # muse-fx
//!
//! Headless bridge from an [Interaxon Muse](https://choosemuse.com/) headset
//! (Classic firmware, EEG + PPG) to an audio-effect unit.
//!
//! EEG band powers drive the effect mix through an adaptive mapper; the PPG
//! sensor supplies heart rate and an on-head ("worn") flag that silences
//! the effect when the headset is taken off.  A connection manager keeps
//! the BLE link alive with exponential backoff.
//!
//! ## Quick start
//!
//! ```no_run
//! use muse_fx::prelude::*;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = BleTransport::new().await?;
//!     let mut service = Service::new(transport, Config::default(), LogSink)?;
//!
//!     let mut samples = service.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(s) = samples.recv().await {
//!             println!("worn={} hr={} {:?}", s.worn, s.heart_rate, s.intensities);
//!         }
//!     });
//!
//!     service.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`prelude`] | One-line glob import of the most commonly needed types |
//! | [`service`] | The run loop and the signal [`service::Pipeline`] |
//! | [`connection`] | Lifecycle state machine, reconnect backoff, user disconnect |
//! | [`transport`] | Radio abstraction the manager is generic over |
//! | [`ble`] | btleplug implementation of [`transport::Transport`] |
//! | [`buffer`] | Fixed-size sample rings |
//! | [`band_power`] | FFT band-power extraction |
//! | [`ppg`] | Heart rate and worn-state detection |
//! | [`mapper`] | Band powers → effect intensities |
//! | [`effects`] | Control-change output |
//! | [`backoff`] | Jittered exponential delays |
//! | [`config`] | Aggregate configuration |
//! | [`error`] | Link and configuration errors |
//! | [`types`] | Frames, samples, connection state and status updates |
//! | [`protocol`] | GATT UUIDs, sampling constants, and command encoding |
//! | [`parse`] | Byte-to-sample decoders for EEG, PPG, and control replies |

pub mod backoff;
pub mod band_power;
pub mod ble;
pub mod buffer;
pub mod config;
pub mod connection;
pub mod effects;
pub mod error;
pub mod mapper;
pub mod parse;
pub mod ppg;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod types;

// ── Prelude ───────────────────────────────────────────────────────────────────

/// Convenience re-exports for downstream crates.
pub mod prelude {
    // ── Service ───────────────────────────────────────────────────────────────
    pub use crate::config::Config;
    pub use crate::service::{Service, ServiceConfig};

    // ── Connection ────────────────────────────────────────────────────────────
    pub use crate::ble::{BleDevice, BleTransport};
    pub use crate::connection::{ConnectionConfig, ConnectionManager, DisconnectHandle};
    pub use crate::error::LinkError;
    pub use crate::transport::{Link, Session, Transport};

    // ── Effects ───────────────────────────────────────────────────────────────
    pub use crate::effects::{ControlChange, ControlSink, EffectConfig, LogSink};
    pub use crate::mapper::{BandMapping, MapperConfig, Transform};

    // ── Data types ────────────────────────────────────────────────────────────
    pub use crate::types::{
        Band, BandPowerSample, ConnectionState, EffectIntensity, ProcessedSample, SensorEvent,
        StatusUpdate,
    };
}
