use anyhow::Result;
use log::{error, info};

use muse_fx::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // ── Logging ───────────────────────────────────────────────────────────────
    //   RUST_LOG=muse_fx=debug cargo run
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::default();
    let transport = BleTransport::new().await?;
    let mut service = Service::new(transport, config, LogSink)?;

    // ── Status listener ───────────────────────────────────────────────────────
    let mut status = service.manager().subscribe_status();
    tokio::spawn(async move {
        while let Ok(update) = status.recv().await {
            match serde_json::to_string(&update) {
                Ok(json) => info!("status {json}"),
                Err(e) => error!("status encode: {e}"),
            }
        }
    });

    // ── Ctrl-C → user disconnect ──────────────────────────────────────────────
    let handle = service.disconnect_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.disconnect();
        }
    });

    info!("muse-fx: waiting for a bonded headset. Ctrl-C to quit.");
    match service.run().await {
        Ok(()) => {
            info!("muse-fx: disconnected");
            Ok(())
        }
        Err(e) => {
            error!("muse-fx: {e}");
            Err(e.into())
        }
    }
}
