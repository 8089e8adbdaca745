//! The seam between the connection manager and a radio stack.
//!
//! [`crate::ble::BleTransport`] implements it on top of btleplug; tests plug
//! in a scripted in-memory transport.  Everything runs on one
//! current-thread runtime, so the futures need not be `Send`.

#![allow(async_fn_in_trait)]

use std::fmt;

use anyhow::Result;
use tokio::sync::mpsc;

use crate::types::SensorEvent;

/// A live, subscribed connection to one headset.
pub trait Link {
    /// Issue the start-streaming command sequence.  Success is the
    /// acknowledgement that moves the manager to `Streaming`.
    async fn start_streaming(&mut self) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;
}

/// What a successful connect hands back.
pub struct Session<L> {
    pub link: L,
    /// Decoded sensor data followed by at most one
    /// [`SensorEvent::Disconnected`].  A closed channel also means link loss.
    pub events: mpsc::Receiver<SensorEvent>,
}

impl<L> fmt::Debug for Session<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

pub trait Transport {
    type Device: Clone + fmt::Debug;
    type Link: Link;

    /// Human-readable device name for logs and status updates.
    fn device_name(&self, device: &Self::Device) -> String;

    /// Previously bonded devices whose name starts with `name_prefix`,
    /// most recently used first.
    async fn bonded_devices(&mut self, name_prefix: &str) -> Result<Vec<Self::Device>>;

    /// Resolve once `device` is seen advertising.  May run forever; the
    /// caller bounds it.
    async fn wait_for_advertisement(&mut self, device: &Self::Device) -> Result<()>;

    /// GATT connect and subscribe to every characteristic the pipeline
    /// consumes.
    async fn connect(&mut self, device: &Self::Device) -> Result<Session<Self::Link>>;
}
