//! `todosync-relay` -- sync relay for todosync clients.
//!
//! Keeps the latest task record per identity and pushes every change to the
//! clients watching that identity. Records are opaque to the relay.
//!
//! ```bash
//! # Run on default address 0.0.0.0:9100
//! cargo run --bin todosync-relay
//!
//! # Run on custom address
//! TODOSYNC_RELAY_ADDR=127.0.0.1:8080 cargo run --bin todosync-relay
//! ```

use std::sync::Arc;

use clap::Parser;
use todosync_relay::config::{RelayCliArgs, RelayConfig};
use todosync_relay::relay::{self, RelayState};
use todosync_relay::store::StateStore;

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        max_payload_size = config.max_payload_size,
        "starting todosync relay"
    );

    let state = Arc::new(RelayState::with_config(
        config.max_payload_size,
        StateStore::new(),
    ));

    match relay::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}
