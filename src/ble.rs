use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::parse::{parse_eeg_frame, parse_ppg_frame, ControlAccumulator};
use crate::protocol::{
    decode_response, encode_command, CONTROL_CHARACTERISTIC, EEG_CHANNEL_NAMES,
    EEG_CHARACTERISTICS, MUSE_SERVICE_UUID, PPG_CHANNEL_NAMES, PPG_CHARACTERISTICS,
    PRESET_EEG_PPG,
};
use crate::transport::{Link, Session, Transport};
use crate::types::{ControlResponse, SensorEvent};

/// GATT connect hard timeout.  BlueZ's `Device1.Connect` can block forever
/// when the headset is out of range.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(15);

// ── BleDevice ────────────────────────────────────────────────────────────────

/// A headset known to the local adapter.
#[derive(Clone, Debug)]
pub struct BleDevice {
    /// Advertised name (e.g. `"Muse-AB12"`).
    pub name: String,
    /// Platform identifier: a UUID on macOS / Windows, a MAC address on Linux.
    pub id: String,
    peripheral: Peripheral,
}

// ── BleTransport ─────────────────────────────────────────────────────────────

/// [`Transport`] over the first local Bluetooth adapter.
pub struct BleTransport {
    adapter: Adapter,
}

impl BleTransport {
    /// Acquire the first adapter.
    ///
    /// On macOS `CBCentralManager` starts in an "unknown" state and silently
    /// ignores scans until it reports *poweredOn*, so we poll for up to 3 s.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await.context("bluetooth manager")?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;

        #[cfg(target_os = "macos")]
        {
            use btleplug::api::CentralState;

            let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
            loop {
                match adapter.adapter_state().await {
                    Ok(CentralState::PoweredOn) => {
                        info!("macOS: adapter is PoweredOn");
                        break;
                    }
                    Ok(state) => {
                        if tokio::time::Instant::now() >= deadline {
                            warn!("macOS: adapter still {state:?} after 3 s, proceeding");
                            break;
                        }
                        debug!("macOS: adapter state = {state:?}, waiting…");
                    }
                    Err(e) => {
                        warn!("macOS: adapter_state() error: {e}");
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        Ok(Self { adapter })
    }
}

/// Adapter events that prove a peripheral is currently on the air.
fn advertised_id(event: &CentralEvent) -> Option<&PeripheralId> {
    match event {
        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => Some(id),
        CentralEvent::ManufacturerDataAdvertisement { id, .. }
        | CentralEvent::ServiceDataAdvertisement { id, .. }
        | CentralEvent::ServicesAdvertisement { id, .. } => Some(id),
        _ => None,
    }
}

impl Transport for BleTransport {
    type Device = BleDevice;
    type Link = BleLink;

    fn device_name(&self, device: &BleDevice) -> String {
        device.name.clone()
    }

    async fn bonded_devices(&mut self, name_prefix: &str) -> Result<Vec<BleDevice>> {
        let mut found = vec![];
        for p in self.adapter.peripherals().await? {
            let Ok(Some(props)) = p.properties().await else {
                continue;
            };
            let Some(name) = props.local_name else {
                continue;
            };
            if name.starts_with(name_prefix) {
                let id = p.id().to_string();
                debug!("bonded: {name}  id={id}");
                found.push(BleDevice { name, id, peripheral: p });
            }
        }
        info!("bonded: {} device(s) match {name_prefix:?}", found.len());
        Ok(found)
    }

    async fn wait_for_advertisement(&mut self, device: &BleDevice) -> Result<()> {
        let target = device.peripheral.id();
        let mut events = self.adapter.events().await?;
        let filter = ScanFilter {
            services: vec![MUSE_SERVICE_UUID],
        };
        self.adapter.start_scan(filter).await?;
        while let Some(event) = events.next().await {
            if advertised_id(&event) == Some(&target) {
                self.adapter.stop_scan().await.ok();
                return Ok(());
            }
        }
        self.adapter.stop_scan().await.ok();
        Err(anyhow!("adapter event stream ended"))
    }

    async fn connect(&mut self, device: &BleDevice) -> Result<Session<BleLink>> {
        // A timed-out or cancelled advertisement watch leaves the scan running.
        self.adapter.stop_scan().await.ok();

        let peripheral = device.peripheral.clone();
        let name = device.name.clone();

        tokio::time::timeout(CONNECT_TIMEOUT, peripheral.connect())
            .await
            .map_err(|_| anyhow!("BLE connect() timed out after 10 s"))??;

        // BlueZ reports the connection before its GATT cache is populated;
        // discovering too early returns an empty service set.
        #[cfg(target_os = "linux")]
        tokio::time::sleep(Duration::from_millis(600)).await;

        tokio::time::timeout(DISCOVERY_TIMEOUT, peripheral.discover_services())
            .await
            .map_err(|_| anyhow!("discover_services() timed out after 15 s"))??;
        info!("{name}: connected and services discovered");

        let chars: BTreeSet<Characteristic> = peripheral.characteristics();
        let find_char = |uuid: Uuid| -> Result<Characteristic> {
            chars
                .iter()
                .find(|c| c.uuid == uuid)
                .cloned()
                .ok_or_else(|| anyhow!("Characteristic {uuid} not found"))
        };

        let control_char = find_char(CONTROL_CHARACTERISTIC)?;
        peripheral.subscribe(&control_char).await?;
        for (&uuid, label) in EEG_CHARACTERISTICS.iter().zip(EEG_CHANNEL_NAMES) {
            let c = find_char(uuid).with_context(|| format!("EEG {label}"))?;
            peripheral.subscribe(&c).await?;
        }
        for (&uuid, label) in PPG_CHARACTERISTICS.iter().zip(PPG_CHANNEL_NAMES) {
            match find_char(uuid) {
                Ok(c) => peripheral.subscribe(&c).await?,
                Err(e) => warn!("{name}: PPG {label}: {e}; heart rate and worn detection will stay idle"),
            }
        }

        let (tx, rx) = mpsc::channel::<SensorEvent>(256);
        let watcher = spawn_disconnect_watcher(self.adapter.clone(), peripheral.id(), tx.clone());
        let dispatcher = spawn_dispatcher(peripheral.clone(), tx);

        Ok(Session {
            link: BleLink {
                peripheral,
                control_char,
                name,
                tasks: vec![watcher, dispatcher],
            },
            events: rx,
        })
    }
}

// ── Background tasks ─────────────────────────────────────────────────────────

/// `DeviceDisconnected` on the adapter stream usually fires well before the
/// notification stream closes.
fn spawn_disconnect_watcher(
    adapter: Adapter,
    peripheral_id: PeripheralId,
    tx: mpsc::Sender<SensorEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match adapter.events().await {
            Ok(mut events) => {
                while let Some(event) = events.next().await {
                    if let CentralEvent::DeviceDisconnected(id) = event {
                        if id == peripheral_id {
                            info!("disconnect watcher: {id:?} disconnected");
                            let _ = tx.send(SensorEvent::Disconnected).await;
                            break;
                        }
                    }
                }
            }
            Err(e) => warn!("disconnect watcher: could not subscribe to adapter events: {e}"),
        }
    })
}

fn spawn_dispatcher(peripheral: Peripheral, tx: mpsc::Sender<SensorEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut notifications = match peripheral.notifications().await {
            Ok(n) => n,
            Err(e) => {
                warn!("dispatcher: could not get notification stream: {e}");
                let _ = tx.send(SensorEvent::Disconnected).await;
                return;
            }
        };
        let mut control = ControlAccumulator::new();
        let mut count: u64 = 0;

        while let Some(notif) = notifications.next().await {
            let data = &notif.value;
            let uuid = notif.uuid;
            count += 1;
            if count <= 5 || count % 2000 == 0 {
                debug!("dispatcher: notif #{count} uuid={uuid} len={}", data.len());
            }

            let event = if uuid == CONTROL_CHARACTERISTIC {
                control
                    .push(&decode_response(data))
                    .and_then(|json| control_response(json).map(SensorEvent::Control))
            } else if let Some(electrode) = EEG_CHARACTERISTICS.iter().position(|&u| u == uuid) {
                parse_eeg_frame(data, electrode).map(SensorEvent::Eeg)
            } else if let Some(channel) = PPG_CHARACTERISTICS.iter().position(|&u| u == uuid) {
                parse_ppg_frame(data, channel).map(SensorEvent::Ppg)
            } else {
                debug!("dispatcher: unexpected notification from {uuid}");
                None
            };

            if let Some(event) = event {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        }

        info!("dispatcher: notification stream ended");
        let _ = tx.send(SensorEvent::Disconnected).await;
    })
}

fn control_response(json: String) -> Option<ControlResponse> {
    match serde_json::from_str::<serde_json::Value>(&json) {
        Ok(serde_json::Value::Object(fields)) => Some(ControlResponse { raw: json, fields }),
        Ok(_) => None,
        Err(e) => {
            warn!("control JSON parse error: {e} | raw: {json}");
            None
        }
    }
}

// ── BleLink ──────────────────────────────────────────────────────────────────

/// Command handle for a subscribed headset.
pub struct BleLink {
    peripheral: Peripheral,
    control_char: Characteristic,
    name: String,
    tasks: Vec<JoinHandle<()>>,
}

impl BleLink {
    /// Send a raw command string (e.g. `"h"`, `"d"`, `"p50"`).
    pub async fn send_command(&self, cmd: &str) -> Result<()> {
        let payload = encode_command(cmd);
        self.peripheral
            .write(&self.control_char, &payload, WriteType::WithoutResponse)
            .await
            .with_context(|| format!("command {cmd:?}"))?;
        Ok(())
    }
}

impl Link for BleLink {
    /// `h` → `s` → `p50` → `d`, then a `v1` device-info request.
    async fn start_streaming(&mut self) -> Result<()> {
        self.send_command("h").await?;
        self.send_command("s").await?;
        self.send_command(PRESET_EEG_PPG).await?;
        self.send_command("d").await?;
        if let Err(e) = self.send_command("v1").await {
            warn!("{}: device-info request failed: {e:#}", self.name);
        }
        info!("{}: streaming EEG + PPG", self.name);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

impl Drop for BleLink {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
