//! Host-side exec service.
//!
//! Listens for transport connections and answers `exec` requests by running
//! scripts that live under a fixed directory.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use glint_core::{GlintConfig, Message};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TransportResult;

/// Exec service settings.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Directory script paths are resolved against.
    pub scripts_dir: PathBuf,

    /// Longest accepted request line, in bytes.
    pub max_frame_len: usize,
}

impl From<&GlintConfig> for ServiceConfig {
    fn from(config: &GlintConfig) -> Self {
        Self {
            scripts_dir: config.scripts_dir.clone(),
            max_frame_len: config.ipc.max_frame_len,
        }
    }
}

/// Why a request was answered with `ok: false`.
#[derive(Debug, Error)]
enum RequestError {
    #[error("Unknown request type: {0}")]
    UnknownType(String),

    #[error("Missing field '{0}'")]
    MissingField(&'static str),

    #[error("Script path must be relative and inside the scripts directory: {0}")]
    InvalidPath(String),

    #[error("Failed to run {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} exited with {status}: {stderr}")]
    Failed {
        path: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// A parsed `exec` request.
#[derive(Debug)]
struct ExecRequest {
    label: String,
    path: String,
    args: Vec<String>,
    polls: bool,
}

impl ExecRequest {
    fn from_message(message: &Message) -> Result<Self, RequestError> {
        let path = message
            .get("path")
            .and_then(Value::as_str)
            .ok_or(RequestError::MissingField("path"))?
            .to_string();
        let label = message
            .get("label")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let args = match message.get("args") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            _ => Vec::new(),
        };
        let polls = message
            .get("polls")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(Self {
            label,
            path,
            args,
            polls,
        })
    }
}

/// Answers transport requests from plugin hosts.
#[derive(Debug, Clone)]
pub struct ExecService {
    config: Arc<ServiceConfig>,
}

impl ExecService {
    /// Create a service for the given scripts directory.
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Accept connections until `cancel` fires.
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> TransportResult<()> {
        info!(
            addr = ?listener.local_addr().ok(),
            scripts = %self.config.scripts_dir.display(),
            "Exec service listening"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    debug!(%peer, "Accepted connection");
                    let service = self.clone();
                    tokio::spawn(async move {
                        service.handle_connection(stream).await;
                        debug!(%peer, "Connection finished");
                    });
                }
            }
        }

        info!("Exec service stopped");
        Ok(())
    }

    /// Serve one connection until the peer closes it.
    ///
    /// Requests are handled concurrently; responses and poll events share one
    /// ordered writer.
    pub async fn handle_connection<IO>(&self, io: IO)
    where
        IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let codec = LinesCodec::new_with_max_length(self.config.max_frame_len);
        let (mut sink, mut stream) = Framed::new(io, codec).split();
        let (out, mut queue) = mpsc::unbounded_channel::<Message>();

        let writer = tokio::spawn(async move {
            while let Some(message) = queue.recv().await {
                let line = match message.encode() {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode response");
                        continue;
                    }
                };
                if sink.send(line).await.is_err() {
                    break;
                }
            }
        });

        while let Some(frame) = stream.next().await {
            let line = match frame {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "Closing connection after read error");
                    break;
                }
            };
            let request = match Message::decode(&line) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "Ignoring malformed request");
                    continue;
                }
            };

            let service = self.clone();
            let out = out.clone();
            tokio::spawn(async move { service.handle_request(request, out).await });
        }

        drop(out);
        let _ = writer.await;
    }

    async fn handle_request(&self, request: Message, out: mpsc::UnboundedSender<Message>) {
        debug!(kind = %request.kind, id = ?request.id, "Handling request");

        let outcome = match request.kind.as_str() {
            "exec" => match ExecRequest::from_message(&request) {
                Ok(exec) => self.exec(exec, &out).await,
                Err(e) => Err(e),
            },
            other => Err(RequestError::UnknownType(other.to_string())),
        };

        let mut response = Message::new(request.kind.clone());
        if let Some(id) = request.id {
            response = response.with_id(id);
        }
        let response = match outcome {
            Ok(result) => response.insert("ok", true).insert("result", result),
            Err(e) => {
                warn!(kind = %request.kind, error = %e, "Request failed");
                response.insert("ok", false).insert("error", e.to_string())
            }
        };
        let _ = out.send(response);
    }

    /// Resolve a script path, refusing anything that leaves the scripts dir.
    fn resolve(&self, path: &str) -> Result<PathBuf, RequestError> {
        let relative = Path::new(path);
        let contained = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if contained {
            Ok(self.config.scripts_dir.join(relative))
        } else {
            Err(RequestError::InvalidPath(path.to_string()))
        }
    }

    async fn exec(
        &self,
        request: ExecRequest,
        out: &mpsc::UnboundedSender<Message>,
    ) -> Result<Value, RequestError> {
        let script = self.resolve(&request.path)?;
        let spawn_error = |source| RequestError::Spawn {
            path: request.path.clone(),
            source,
        };

        let mut child = Command::new("bash")
            .arg(&script)
            .args(&request.args)
            .current_dir(&self.config.scripts_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        let event = script
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| request.path.clone());
        let mut collected = String::new();

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await.map_err(spawn_error)? {
                if !request.polls {
                    collected.push_str(&line);
                    collected.push('\n');
                    continue;
                }
                match serde_json::from_str::<Value>(&line) {
                    Ok(data) => {
                        let push = Message::new(event.as_str())
                            .insert("label", request.label.as_str())
                            .insert("data", data);
                        let _ = out.send(push);
                    }
                    Err(_) => debug!(script = %request.path, "Skipping non-JSON poll output"),
                }
            }
        }

        let status = child.wait().await.map_err(spawn_error)?;
        let stderr = stderr_task.await.unwrap_or_default();
        if !status.success() {
            return Err(RequestError::Failed {
                path: request.path,
                status,
                stderr: stderr.trim().to_string(),
            });
        }

        let output = collected.trim_end();
        Ok(serde_json::from_str(output).unwrap_or_else(|_| Value::String(output.to_string())))
    }
}
