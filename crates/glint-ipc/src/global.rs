//! The process-wide transport.
//!
//! Components that talk to the host share one connection. It is created
//! lazily, connected by [`init`], and lives until the process exits.

use std::sync::OnceLock;

use tracing::info;

use crate::error::{TransportError, TransportResult};
use crate::transport::{Transport, TransportConfig};

static TRANSPORT: OnceLock<Transport> = OnceLock::new();

/// Set the configuration of the shared transport.
///
/// Only effective before the transport is first used; returns whether the
/// configuration was applied.
pub fn configure(config: TransportConfig) -> bool {
    TRANSPORT.set(Transport::new(config)).is_ok()
}

/// The shared transport, created disconnected on first use.
pub fn transport() -> &'static Transport {
    TRANSPORT.get_or_init(|| Transport::new(TransportConfig::default()))
}

/// Connect the shared transport to the local service on `port`.
///
/// A no-op when it is already connected.
pub async fn init(port: u16) -> TransportResult<&'static Transport> {
    let transport = transport();
    if transport.is_connected() {
        return Ok(transport);
    }
    match transport.connect(("127.0.0.1", port)).await {
        Ok(()) => info!(port, "Connected to host service"),
        Err(TransportError::AlreadyConnected) => {}
        Err(e) => return Err(e),
    }
    Ok(transport)
}
