//! ============================================================================
//! HTTP Listener
//! ============================================================================
//! Blocking `tiny_http` accept loop on the blocking pool; each request is
//! handed to the tokio runtime so a slow callback never stalls the next one.
//! ============================================================================

use anyhow::{anyhow, Result};
use std::sync::Arc;
use tiny_http::{Header, Response, Server};
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::relay::{Relay, RelayRequest};

/// Accept requests until `server.unblock()` is called
pub async fn serve(relay: Arc<Relay>, server: Arc<Server>) -> Result<()> {
    let runtime = Handle::current();
    tokio::task::spawn_blocking(move || accept_loop(relay, server, runtime))
        .await
        .map_err(|e| anyhow!("HTTP accept loop terminated abnormally: {}", e))
}

fn accept_loop(relay: Arc<Relay>, server: Arc<Server>, runtime: Handle) {
    for request in server.incoming_requests() {
        let relay = Arc::clone(&relay);
        runtime.spawn(async move { respond(&relay, request).await });
    }
    info!("HTTP listener stopped");
}

async fn respond(relay: &Relay, request: tiny_http::Request) {
    let incoming = RelayRequest::from_target(request.method().as_str(), request.url());
    let reply = relay.handle(&incoming).await;

    let mut response = Response::from_string(reply.body).with_status_code(reply.status);
    for (name, value) in &reply.headers {
        match Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            Ok(header) => response.add_header(header),
            Err(()) => warn!("Dropping unrepresentable response header {}", name),
        }
    }

    if let Err(e) = request.respond(response) {
        warn!("Failed to write response for {}: {}", incoming.path, e);
    }
}
