//! Socket IPC for glint.
//!
//! A [`Transport`] keeps one newline-delimited JSON connection to a local
//! host-side service. Requests carry a correlation id and resolve with the
//! matching response; messages without a pending id are routed to
//! subscribers by their `type`.
//!
//! [`ExecService`] is the host side of that protocol: it answers `exec`
//! requests by running scripts from a configured directory.
//!
//! # Example
//!
//! ```ignore
//! use glint_ipc::{Transport, TransportConfig};
//! use serde_json::json;
//!
//! let transport = Transport::new(TransportConfig::default());
//! transport.connect("127.0.0.1:3499").await?;
//!
//! let mut battery = transport.subscribe("battery.sh");
//! let reply = transport
//!     .send("exec", json!({ "label": "main", "path": "battery.sh", "args": [] }))
//!     .await?;
//! ```

mod error;
pub mod global;
mod service;
mod transport;

pub use error::{TransportError, TransportResult};
pub use service::{ExecService, ServiceConfig};
pub use transport::{Subscription, Transport, TransportConfig};
