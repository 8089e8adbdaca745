//! Connection lifecycle manager.
//!
//! ```text
//!        ┌──────────── user disconnect (from any state) ─────────────┐
//!        ▼                                                            │
//!      Idle ─▶ Searching ─▶ Connecting ─▶ Connected ─▶ Streaming ─────┤
//!        ▲         │             │                       │  ▲         │
//!        └─ absent/cancelled     └─▶ Error    link lost  ▼  │ success │
//!                                      ▲            Reconnecting ─────┘
//!                                      └──── ceiling ────┘
//! ```
//!
//! Every transition updates a [`watch`] channel with the new
//! [`ConnectionState`] and broadcasts a [`StatusUpdate`].  Waits that a user
//! disconnect must be able to abort (advertisement watches, backoff sleeps,
//! connect attempts) are raced against a [`CancellationToken`] reachable
//! through a cloneable [`DisconnectHandle`].

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{info, warn};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::error::LinkError;
use crate::transport::{Link, Session, Transport};
use crate::types::{ConnectionState, StatusUpdate};

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bonded devices are filtered by this name prefix.  Default: `"Muse"`.
    pub name_prefix: String,
    /// Upper bound on waiting for a live advertisement before connecting
    /// anyway.  Default: 30 s.
    pub advertisement_timeout: Duration,
    /// GATT connect attempts before `Error`.  Default: 3.
    pub connect_attempts: u32,
    /// Pause between initial connect attempts.  Default: 2 s.
    pub connect_retry_delay: Duration,
    pub backoff: Backoff,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name_prefix: "Muse".into(),
            advertisement_timeout: Duration::from_secs(30),
            connect_attempts: 3,
            connect_retry_delay: Duration::from_secs(2),
            backoff: Backoff::default(),
        }
    }
}

type SharedToken = Arc<Mutex<CancellationToken>>;

fn current(shared: &SharedToken) -> CancellationToken {
    shared.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Cloneable trigger for a user-initiated disconnect.
///
/// Cancels whatever the manager is currently waiting on; the owner of the
/// manager then calls [`ConnectionManager::disconnect`] to settle in `Idle`.
#[derive(Debug, Clone)]
pub struct DisconnectHandle {
    shared: SharedToken,
}

impl DisconnectHandle {
    pub fn disconnect(&self) {
        info!("connection: user disconnect requested");
        current(&self.shared).cancel();
    }

    pub fn is_requested(&self) -> bool {
        current(&self.shared).is_cancelled()
    }
}

/// Race `fut` against `token`.
async fn cancellable<F: Future>(token: &CancellationToken, fut: F) -> Result<F::Output, LinkError> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(LinkError::Cancelled),
        out = fut => Ok(out),
    }
}

pub struct ConnectionManager<T: Transport> {
    transport: T,
    config: ConnectionConfig,
    device: Option<T::Device>,
    attempts: u32,
    token: SharedToken,
    state_tx: watch::Sender<ConnectionState>,
    status_tx: broadcast::Sender<StatusUpdate>,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T, config: ConnectionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let (status_tx, _) = broadcast::channel(64);
        Self {
            transport,
            config,
            device: None,
            attempts: 0,
            token: Arc::new(Mutex::new(CancellationToken::new())),
            state_tx,
            status_tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusUpdate> {
        self.status_tx.subscribe()
    }

    pub fn disconnect_handle(&self) -> DisconnectHandle {
        DisconnectHandle {
            shared: Arc::clone(&self.token),
        }
    }

    /// Token a caller can await to notice a user disconnect.
    pub fn cancel_token(&self) -> CancellationToken {
        current(&self.token)
    }

    /// Failed reconnect attempts since the last success.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn device(&self) -> Option<&T::Device> {
        self.device.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn device_label(&self) -> String {
        self.device
            .as_ref()
            .map(|d| self.transport.device_name(d))
            .unwrap_or_else(|| "unknown".into())
    }

    fn transition(&mut self, update: StatusUpdate) {
        let next = update.state();
        let prev = self.state_tx.send_replace(next);
        if prev != next {
            info!("connection: {prev} → {next}");
        }
        let _ = self.status_tx.send(update);
    }

    /// A fresh token for a user-initiated operation, so a past disconnect
    /// does not abort a new connect.
    fn begin_user_operation(&mut self) -> CancellationToken {
        let mut guard = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_cancelled() {
            *guard = CancellationToken::new();
        }
        guard.clone()
    }

    /// Map a failed top-level operation onto its resting state.
    fn settle(&mut self, err: &LinkError) {
        if err.is_benign() {
            info!("connection: {err}");
            self.transition(StatusUpdate::Idle);
        } else {
            warn!("connection: {err}");
            self.transition(StatusUpdate::Error {
                reason: err.to_string(),
            });
        }
    }

    // ── Connect ──────────────────────────────────────────────────────────────

    /// Connect to the most recent bonded device matching the name prefix.
    ///
    /// Waits up to `advertisement_timeout` for the device to advertise, then
    /// connects regardless.  No bonded device, or a user disconnect, leaves
    /// the manager `Idle`.
    pub async fn auto_connect(&mut self) -> Result<Session<T::Link>, LinkError> {
        let token = self.begin_user_operation();
        let result = self.auto_connect_inner(&token).await;
        if let Err(e) = &result {
            self.settle(e);
        }
        result
    }

    async fn auto_connect_inner(&mut self, token: &CancellationToken) -> Result<Session<T::Link>, LinkError> {
        let prefix = self.config.name_prefix.clone();
        self.transition(StatusUpdate::Searching {
            name_prefix: prefix.clone(),
        });

        let devices = cancellable(token, self.transport.bonded_devices(&prefix)).await??;
        let device = devices.into_iter().next().ok_or(LinkError::DeviceAbsent)?;
        let name = self.transport.device_name(&device);
        info!("connection: bonded device {name}, waiting for advertisement");

        let wait = tokio::time::timeout(
            self.config.advertisement_timeout,
            self.transport.wait_for_advertisement(&device),
        );
        match cancellable(token, wait).await? {
            Ok(Ok(())) => info!("connection: {name} is advertising"),
            Ok(Err(e)) => warn!("connection: advertisement watch failed ({e:#}), connecting anyway"),
            Err(_) => warn!(
                "connection: no advertisement from {name} within {:?}, connecting anyway",
                self.config.advertisement_timeout
            ),
        }

        self.connect_with_retries(device, token).await
    }

    /// Connect to a device chosen by the user.
    ///
    /// `picker` resolves to the selection, or `None` if the user dismissed
    /// it; a dismissed picker returns [`LinkError::Cancelled`] and leaves the
    /// manager `Idle`.
    pub async fn connect_selected<P>(&mut self, picker: P) -> Result<Session<T::Link>, LinkError>
    where
        P: Future<Output = Option<T::Device>>,
    {
        let token = self.begin_user_operation();
        self.transition(StatusUpdate::Searching {
            name_prefix: self.config.name_prefix.clone(),
        });
        let result = match cancellable(&token, picker).await {
            Ok(Some(device)) => self.connect_with_retries(device, &token).await,
            Ok(None) => Err(LinkError::Cancelled),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            self.settle(e);
        }
        result
    }

    async fn connect_with_retries(
        &mut self,
        device: T::Device,
        token: &CancellationToken,
    ) -> Result<Session<T::Link>, LinkError> {
        self.device = Some(device.clone());
        self.attempts = 0;
        let total = self.config.connect_attempts.max(1);
        for attempt in 1..=total {
            self.transition(StatusUpdate::Connecting {
                device: self.device_label(),
            });
            match self.establish(&device, token).await {
                Ok(session) => return Ok(session),
                Err(LinkError::Transient(e)) => {
                    warn!("connection: connect attempt {attempt}/{total} failed: {e:#}");
                    if attempt < total {
                        cancellable(token, tokio::time::sleep(self.config.connect_retry_delay)).await?;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(LinkError::ConnectFailed { attempts: total })
    }

    /// One GATT connect plus start command.  `Connected` after the connect,
    /// `Streaming` once the start sequence is accepted.
    async fn establish(
        &mut self,
        device: &T::Device,
        token: &CancellationToken,
    ) -> Result<Session<T::Link>, LinkError> {
        let mut session = cancellable(token, self.transport.connect(device)).await??;
        let name = self.transport.device_name(device);
        self.transition(StatusUpdate::Connected { device: name.clone() });

        match cancellable(token, session.link.start_streaming()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = session.link.disconnect().await;
                return Err(e.context("start streaming").into());
            }
            Err(e) => {
                let _ = session.link.disconnect().await;
                return Err(e);
            }
        }
        self.transition(StatusUpdate::Streaming { device: name });
        Ok(session)
    }

    // ── Link loss ────────────────────────────────────────────────────────────

    /// Record a transport-reported link loss: `Streaming → Reconnecting`.
    ///
    /// The broadcast carries `attempt: 0` and no delay; each subsequent
    /// retry broadcasts its own attempt number and backoff delay.
    pub fn link_lost(&mut self) {
        warn!("connection: link to {} lost", self.device_label());
        self.transition(StatusUpdate::Reconnecting {
            device: self.device_label(),
            attempt: 0,
            delay: Duration::ZERO,
        });
    }

    /// Retry under exponential backoff until a connect succeeds, the attempt
    /// ceiling is hit, or the user disconnects.
    pub async fn reconnect(&mut self) -> Result<Session<T::Link>, LinkError> {
        let token = self.cancel_token();
        let result = self.reconnect_inner(&token).await;
        if let Err(e) = &result {
            self.settle(e);
        }
        result
    }

    async fn reconnect_inner(&mut self, token: &CancellationToken) -> Result<Session<T::Link>, LinkError> {
        let device = self.device.clone().ok_or(LinkError::DeviceAbsent)?;
        let backoff = self.config.backoff;
        loop {
            if backoff.exhausted(self.attempts) {
                return Err(LinkError::CeilingExceeded {
                    attempts: self.attempts,
                });
            }
            let delay = backoff.delay(self.attempts);
            self.transition(StatusUpdate::Reconnecting {
                device: self.device_label(),
                attempt: self.attempts + 1,
                delay,
            });
            info!(
                "connection: reconnect attempt {}/{} in {:.1} s",
                self.attempts + 1,
                backoff.max_attempts,
                delay.as_secs_f64()
            );
            cancellable(token, tokio::time::sleep(delay)).await?;

            match self.establish(&device, token).await {
                Ok(session) => {
                    info!("connection: reconnected after {} failed attempts", self.attempts);
                    self.attempts = 0;
                    return Ok(session);
                }
                Err(LinkError::Transient(e)) => {
                    self.attempts += 1;
                    warn!("connection: reconnect attempt {} failed: {e:#}", self.attempts);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// [`link_lost`](Self::link_lost) followed by [`reconnect`](Self::reconnect).
    pub async fn recover(&mut self) -> Result<Session<T::Link>, LinkError> {
        self.link_lost();
        self.reconnect().await
    }

    // ── Disconnect ───────────────────────────────────────────────────────────

    /// User disconnect: cancel pending waits, drop the link, go `Idle`.
    pub async fn disconnect(&mut self, link: Option<&mut T::Link>) {
        current(&self.token).cancel();
        if let Some(link) = link {
            if let Err(e) = link.disconnect().await {
                warn!("connection: disconnect failed: {e:#}");
            }
        }
        self.attempts = 0;
        self.transition(StatusUpdate::Idle);
    }
}
