mod common;
use common::{MockTransport, Outcome};

use std::time::Duration;

use muse_fx::connection::{ConnectionConfig, ConnectionManager};
use muse_fx::error::LinkError;
use muse_fx::types::{ConnectionState, StatusUpdate};
use tokio::sync::broadcast;
use tokio::time::Instant;

fn manager(transport: MockTransport) -> ConnectionManager<MockTransport> {
    ConnectionManager::new(transport, ConnectionConfig::default())
}

fn drain(rx: &mut broadcast::Receiver<StatusUpdate>) -> Vec<StatusUpdate> {
    let mut out = vec![];
    while let Ok(update) = rx.try_recv() {
        out.push(update);
    }
    out
}

fn states(updates: &[StatusUpdate]) -> Vec<ConnectionState> {
    updates.iter().map(StatusUpdate::state).collect()
}

// ── Auto-connect ──────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn auto_connect_walks_the_happy_path() {
    let mut m = manager(MockTransport::connecting());
    let mut status = m.subscribe_status();
    let state = m.subscribe_state();

    let session = m.auto_connect().await;
    assert!(session.is_ok());
    assert_eq!(m.state(), ConnectionState::Streaming);
    assert_eq!(*state.borrow(), ConnectionState::Streaming);

    use ConnectionState::*;
    assert_eq!(states(&drain(&mut status)), vec![Searching, Connecting, Connected, Streaming]);
    let shared = m.transport().shared.lock().unwrap();
    assert_eq!((shared.connects, shared.starts), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn no_bonded_device_is_idle_not_error() {
    let mut m = manager(MockTransport::connecting().no_devices());
    let err = m.auto_connect().await.unwrap_err();
    assert!(matches!(err, LinkError::DeviceAbsent));
    assert_eq!(m.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn name_prefix_filters_bonded_devices() {
    let config = ConnectionConfig {
        name_prefix: "Muse-ZZ".into(),
        ..ConnectionConfig::default()
    };
    let mut m = ConnectionManager::new(MockTransport::connecting(), config);
    assert!(matches!(m.auto_connect().await, Err(LinkError::DeviceAbsent)));
}

#[tokio::test(start_paused = true)]
async fn silent_device_is_connected_after_advertisement_timeout() {
    let mut m = manager(MockTransport::connecting().silent());
    let start = Instant::now();
    assert!(m.auto_connect().await.is_ok());
    assert!(start.elapsed() >= Duration::from_secs(30));
    assert!(start.elapsed() < Duration::from_secs(31));
    assert_eq!(m.state(), ConnectionState::Streaming);
}

#[tokio::test(start_paused = true)]
async fn connect_gives_up_after_configured_attempts() {
    let mut m = manager(MockTransport::new([], Outcome::FailConnect));
    let err = m.auto_connect().await.unwrap_err();
    assert!(matches!(err, LinkError::ConnectFailed { attempts: 3 }));
    assert_eq!(m.state(), ConnectionState::Error);
    assert_eq!(m.transport().shared.lock().unwrap().connects, 3);
}

#[tokio::test(start_paused = true)]
async fn rejected_start_command_is_retried() {
    let mut m = manager(MockTransport::new([Outcome::FailStart], Outcome::Connect));
    let mut status = m.subscribe_status();
    assert!(m.auto_connect().await.is_ok());

    use ConnectionState::*;
    assert_eq!(
        states(&drain(&mut status)),
        vec![Searching, Connecting, Connected, Connecting, Connected, Streaming]
    );
    let shared = m.transport().shared.lock().unwrap();
    assert_eq!(shared.disconnects, 1, "half-open link is torn down");
}

// ── Manual selection ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn dismissed_picker_returns_to_idle() {
    let mut m = manager(MockTransport::connecting());
    let err = m.connect_selected(async { None }).await.unwrap_err();
    assert!(matches!(err, LinkError::Cancelled));
    assert_eq!(m.state(), ConnectionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn picked_device_connects() {
    let mut m = manager(MockTransport::connecting());
    let picked = common::MockDevice { name: "Muse-CD34".into() };
    assert!(m.connect_selected(async { Some(picked) }).await.is_ok());
    assert_eq!(m.state(), ConnectionState::Streaming);
    assert_eq!(m.device().unwrap().name, "Muse-CD34");
}

// ── Reconnect ─────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn reconnect_ceiling_ends_in_error() {
    let mut m = manager(MockTransport::new([Outcome::Connect], Outcome::FailConnect));
    let mut status = m.subscribe_status();
    m.auto_connect().await.unwrap();
    drain(&mut status);

    let err = m.recover().await.unwrap_err();
    assert!(matches!(err, LinkError::CeilingExceeded { attempts: 10 }));
    assert_eq!(m.attempts(), 10);
    assert_eq!(m.state(), ConnectionState::Error);

    let updates = drain(&mut status);
    let retries: Vec<u32> = updates
        .iter()
        .filter_map(|u| match u {
            StatusUpdate::Reconnecting { attempt, .. } if *attempt > 0 => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(retries, (1..=10).collect::<Vec<_>>());
    assert_eq!(updates.last().map(StatusUpdate::state), Some(ConnectionState::Error));
    assert_eq!(m.transport().shared.lock().unwrap().connects, 11);
}

#[tokio::test(start_paused = true)]
async fn reconnect_delays_follow_backoff() {
    let mut m = manager(MockTransport::new([Outcome::Connect], Outcome::FailConnect));
    let mut status = m.subscribe_status();
    m.auto_connect().await.unwrap();
    drain(&mut status);
    let _ = m.recover().await;

    let backoff = m.config().backoff;
    for update in drain(&mut status) {
        if let StatusUpdate::Reconnecting { attempt, delay, .. } = update {
            if attempt == 0 {
                continue;
            }
            let k = attempt - 1;
            let lo = backoff.nominal(k);
            let hi = backoff.delay_with(k, Duration::from_secs(1));
            assert!(delay >= lo && delay <= hi, "attempt {attempt}: {delay:?}");
        }
    }
}

#[tokio::test(start_paused = true)]
async fn successful_reconnect_resets_attempts() {
    let script = [Outcome::Connect, Outcome::FailConnect, Outcome::FailConnect, Outcome::Connect];
    let mut m = manager(MockTransport::new(script, Outcome::FailConnect));
    m.auto_connect().await.unwrap();

    let mut state = m.subscribe_state();
    m.link_lost();
    assert!(state.has_changed().unwrap());
    assert_eq!(*state.borrow_and_update(), ConnectionState::Reconnecting);

    assert!(m.reconnect().await.is_ok());
    assert_eq!(m.attempts(), 0);
    assert_eq!(m.state(), ConnectionState::Streaming);
    assert_eq!(m.transport().shared.lock().unwrap().starts, 2);
}

// ── User disconnect ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_backoff_sleep() {
    let mut m = manager(MockTransport::new([Outcome::Connect], Outcome::FailConnect));
    m.auto_connect().await.unwrap();
    let handle = m.disconnect_handle();

    let user = async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.disconnect();
    };
    let (result, ()) = tokio::join!(m.recover(), user);
    assert!(matches!(result, Err(LinkError::Cancelled)));
    assert_eq!(m.state(), ConnectionState::Idle);
    // The first backoff sleep (≥ 1 s) never finished, so no retry happened.
    assert_eq!(m.transport().shared.lock().unwrap().connects, 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_advertisement_wait() {
    let mut m = manager(MockTransport::connecting().silent());
    let handle = m.disconnect_handle();
    let user = async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.disconnect();
    };
    let (result, ()) = tokio::join!(m.auto_connect(), user);
    assert!(matches!(result, Err(LinkError::Cancelled)));
    assert_eq!(m.state(), ConnectionState::Idle);
    assert_eq!(m.transport().shared.lock().unwrap().connects, 0);
}

#[tokio::test(start_paused = true)]
async fn new_connect_after_disconnect_is_not_cancelled() {
    let mut m = manager(MockTransport::connecting());
    let mut session = m.auto_connect().await.unwrap();
    let handle = m.disconnect_handle();
    handle.disconnect();
    assert!(handle.is_requested());
    m.disconnect(Some(&mut session.link)).await;
    assert_eq!(m.state(), ConnectionState::Idle);
    assert_eq!(m.transport().shared.lock().unwrap().disconnects, 1);

    assert!(m.auto_connect().await.is_ok());
    assert!(!handle.is_requested());
}
