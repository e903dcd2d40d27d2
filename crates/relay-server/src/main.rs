//! ============================================================================
//! x-relay: Authorization-Code Relay Server
//! ============================================================================
//! Reads configuration from the environment (and `.env`), binds the HTTP
//! listener and, when configured, starts the engagement job beside it.
//! ============================================================================

use anyhow::{anyhow, Result};
use std::sync::Arc;
use tracing::{info, warn};

use relay_core::{serve, EngagementJob, Protocol, Relay, RelayConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("x_relay=debug".parse()?)
                .add_directive("relay_core=debug".parse()?),
        )
        .init();

    let config = RelayConfig::from_env()?;
    info!(
        "Starting x-relay on {} ({:?}, {} actions, {:?})",
        config.bind,
        config.protocol,
        config.actions.len(),
        config.failure_policy
    );

    let relay = Arc::new(Relay::new(config)?);
    report_missing_credentials(&relay);

    if let Some(engage) = relay.config().engage.clone() {
        let oauth = match relay.config().protocol {
            Protocol::OAuth2 => relay.oauth2_client().ok(),
            Protocol::OAuth1 => None,
        };
        EngagementJob::new(
            relay.api().clone(),
            oauth,
            relay.vault(),
            engage.target_user_id,
            engage.interval,
        )
        .spawn();
    }

    let bind = relay.config().bind.clone();
    let server = tiny_http::Server::http(&bind)
        .map_err(|e| anyhow!("Failed to start HTTP server on {}: {}", bind, e))?;
    info!("Listening on http://{}", bind);

    serve(relay, Arc::new(server)).await
}

/// Missing credentials are not fatal; log them so the operator sees the
/// problem before the first browser does.
fn report_missing_credentials(relay: &Relay) {
    let missing = match relay.config().protocol {
        Protocol::OAuth2 => relay.config().require_oauth2().err(),
        Protocol::OAuth1 => relay.config().require_oauth1().err(),
    };
    if let Some(err) = missing {
        warn!("{}; login requests will fail until this is fixed", err);
    }
}
