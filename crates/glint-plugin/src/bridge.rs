//! The capability bridge handed to every mounted component.

use std::fmt;
use std::sync::Arc;

use glint_ipc::{Subscription, Transport};
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use crate::host::HostRpc;
use crate::types::{PluginError, PluginResult};

/// Host capabilities available to plugins.
///
/// One bridge is built per host session and cloned into every mounted
/// component. Plugins reach the socket transport only through it.
#[derive(Clone)]
pub struct CapabilityBridge {
    host: Arc<dyn HostRpc>,
    transport: Transport,
    label: Arc<str>,
}

impl fmt::Debug for CapabilityBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityBridge")
            .field("label", &self.label)
            .field("connected", &self.transport.is_connected())
            .finish_non_exhaustive()
    }
}

impl CapabilityBridge {
    pub fn new(host: Arc<dyn HostRpc>, transport: Transport, label: impl Into<Arc<str>>) -> Self {
        Self {
            host,
            transport,
            label: label.into(),
        }
    }

    /// Session label sent with exec requests.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Call a named host command.
    pub async fn invoke(&self, command: &str, args: Value) -> PluginResult<Value> {
        debug!(command, "invoke");
        self.host.invoke(command, args).await
    }

    /// Receive every event of type `event` pushed over the transport.
    pub fn listen(&self, event: &str) -> Subscription {
        self.transport.subscribe(event)
    }

    /// Run a script through the exec service and return its result.
    pub async fn exec(&self, path: &str, args: &[String]) -> PluginResult<Value> {
        self.exec_request(path, args, false).await
    }

    /// Like [`exec`](Self::exec), but every JSON line the script prints is
    /// also pushed as an event named after the script file.
    pub async fn poll(&self, path: &str, args: &[String]) -> PluginResult<Value> {
        self.exec_request(path, args, true).await
    }

    async fn exec_request(&self, path: &str, args: &[String], polls: bool) -> PluginResult<Value> {
        let mut payload = json!({
            "label": &*self.label,
            "path": path,
            "args": args,
        });
        if polls {
            payload["polls"] = Value::Bool(true);
        }

        let response = self.transport.send("exec", payload).await?;
        if response.get("ok") == Some(&Value::Bool(false)) {
            let message = match response.get("error") {
                Some(Value::String(message)) => message.clone(),
                Some(other) => other.to_string(),
                None => "exec failed".to_string(),
            };
            return Err(PluginError::Remote { message });
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Open an absolute URL with the host's default handler.
    pub async fn open_external(&self, url: &str) -> PluginResult<()> {
        if Url::parse(url).is_err() {
            return Err(PluginError::invalid(format!("Invalid URL: {url}")));
        }
        self.host.open_external(url).await
    }
}

#[cfg(test)]
mod tests {
    use glint_ipc::TransportConfig;

    use super::*;
    use crate::host::MemoryHost;

    fn bridge(host: Arc<MemoryHost>) -> CapabilityBridge {
        CapabilityBridge::new(host, Transport::new(TransportConfig::default()), "main")
    }

    #[tokio::test]
    async fn test_open_external_validates_before_host() {
        let host = Arc::new(MemoryHost::new());
        let bridge = bridge(host.clone());

        let err = bridge.open_external("not a url").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid URL: not a url");
        assert!(host.opened().is_empty());

        bridge.open_external("https://example.com").await.unwrap();
        assert_eq!(host.opened(), vec!["https://example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_exec_while_disconnected() {
        let bridge = bridge(Arc::new(MemoryHost::new()));
        let err = bridge.exec("cpu.sh", &[]).await.unwrap_err();
        assert!(matches!(err, PluginError::Transport(e) if !e.to_string().is_empty()));
    }

    #[tokio::test]
    async fn test_invoke_unknown_command() {
        let bridge = bridge(Arc::new(MemoryHost::new()));
        let err = bridge.invoke("nope", Value::Null).await.unwrap_err();
        assert!(matches!(err, PluginError::UnknownCommand { .. }));
    }
}
