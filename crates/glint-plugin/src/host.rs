//! The host RPC channel: plugin discovery, file reads, named commands and
//! the system URL opener.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde_json::Value;
use tracing::debug;

use crate::transform::is_plugin_file;
use crate::types::{BoxFuture, PluginError, PluginResult, lock};

/// A host command callable through `invoke`.
pub type CommandHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, PluginResult<Value>> + Send + Sync>;

/// Requests the plugin system makes of its host.
pub trait HostRpc: Send + Sync {
    /// Names of the available plugin files, in load order.
    fn list_plugin_files(&self) -> BoxFuture<'_, PluginResult<Vec<String>>>;

    /// Source text of one plugin file.
    fn read_plugin_file<'a>(&'a self, filename: &'a str) -> BoxFuture<'a, PluginResult<String>>;

    /// Run a named host command.
    fn invoke<'a>(&'a self, command: &'a str, args: Value) -> BoxFuture<'a, PluginResult<Value>>;

    /// Open a URL with the system's default handler.
    fn open_external<'a>(&'a self, url: &'a str) -> BoxFuture<'a, PluginResult<()>>;
}

/// Reject anything that is not a bare file name.
fn check_filename(filename: &str) -> PluginResult<()> {
    if filename.is_empty()
        || filename.contains(['/', '\\'])
        || filename == "."
        || filename.contains("..")
    {
        return Err(PluginError::invalid(format!(
            "Invalid plugin filename: {filename:?}"
        )));
    }
    Ok(())
}

fn filename_arg(args: &Value) -> PluginResult<&str> {
    args.get("filename")
        .and_then(Value::as_str)
        .ok_or_else(|| PluginError::invalid("read_plugin_file requires a `filename` string"))
}

/// Serves plugins from a directory on disk.
pub struct FsHost {
    dir: PathBuf,
    commands: RwLock<HashMap<String, CommandHandler>>,
}

impl FsHost {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            commands: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Register an additional host command. Built-in commands take
    /// precedence over registered ones of the same name.
    pub fn register(&self, name: impl Into<String>, handler: CommandHandler) {
        self.commands
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), handler);
    }

    async fn list(&self) -> PluginResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            PluginError::Discovery {
                message: format!("{}: {e}", self.dir.display()),
            }
        })?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if is_plugin_file(name) {
                    files.push(name.to_string());
                }
            }
        }
        files.sort();
        debug!(dir = %self.dir.display(), count = files.len(), "Listed plugin files");
        Ok(files)
    }

    async fn read(&self, filename: &str) -> PluginResult<String> {
        check_filename(filename)?;
        Ok(tokio::fs::read_to_string(self.dir.join(filename)).await?)
    }
}

impl HostRpc for FsHost {
    fn list_plugin_files(&self) -> BoxFuture<'_, PluginResult<Vec<String>>> {
        Box::pin(self.list())
    }

    fn read_plugin_file<'a>(&'a self, filename: &'a str) -> BoxFuture<'a, PluginResult<String>> {
        Box::pin(self.read(filename))
    }

    fn invoke<'a>(&'a self, command: &'a str, args: Value) -> BoxFuture<'a, PluginResult<Value>> {
        Box::pin(async move {
            match command {
                "list_plugin_files" => Ok(Value::from(self.list().await?)),
                "read_plugin_file" => Ok(Value::from(self.read(filename_arg(&args)?).await?)),
                "version" => Ok(Value::from(env!("CARGO_PKG_VERSION"))),
                _ => {
                    let handler = self
                        .commands
                        .read()
                        .unwrap_or_else(PoisonError::into_inner)
                        .get(command)
                        .cloned();
                    match handler {
                        Some(handler) => handler(args).await,
                        None => Err(PluginError::UnknownCommand {
                            command: command.to_string(),
                        }),
                    }
                }
            }
        })
    }

    fn open_external<'a>(&'a self, url: &'a str) -> BoxFuture<'a, PluginResult<()>> {
        Box::pin(async move {
            debug!(url, "Opening external URL");
            open::that_detached(url)?;
            Ok(())
        })
    }
}

/// An in-memory host for embedding and tests.
#[derive(Default)]
pub struct MemoryHost {
    files: Mutex<Vec<(String, Result<String, String>)>>,
    discovery_error: Mutex<Option<String>>,
    commands: RwLock<HashMap<String, CommandHandler>>,
    opened: Mutex<Vec<String>>,
    reads: AtomicUsize,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugin file.
    pub fn with_file(self, filename: impl Into<String>, source: impl Into<String>) -> Self {
        self.set_file(filename, source);
        self
    }

    /// Add a plugin file whose read fails with `message`.
    pub fn with_failing_file(self, filename: impl Into<String>, message: impl Into<String>) -> Self {
        self.upsert(filename.into(), Err(message.into()));
        self
    }

    /// Make discovery fail with `message`.
    pub fn with_discovery_error(self, message: impl Into<String>) -> Self {
        self.set_discovery_error(Some(message.into()));
        self
    }

    /// Make discovery fail with `message`, or succeed again with `None`.
    pub fn set_discovery_error(&self, message: Option<String>) {
        *lock(&self.discovery_error) = message;
    }

    /// Add or replace a plugin file.
    pub fn set_file(&self, filename: impl Into<String>, source: impl Into<String>) {
        self.upsert(filename.into(), Ok(source.into()));
    }

    pub fn remove_file(&self, filename: &str) {
        lock(&self.files).retain(|(name, _)| name != filename);
    }

    pub fn register(&self, name: impl Into<String>, handler: CommandHandler) {
        self.commands
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), handler);
    }

    /// URLs passed to `open_external`, in call order.
    pub fn opened(&self) -> Vec<String> {
        lock(&self.opened).clone()
    }

    /// Number of `read_plugin_file` calls so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    fn upsert(&self, filename: String, content: Result<String, String>) {
        let mut files = lock(&self.files);
        match files.iter().position(|(name, _)| *name == filename) {
            Some(index) => files[index].1 = content,
            None => files.push((filename, content)),
        }
    }
}

impl HostRpc for MemoryHost {
    fn list_plugin_files(&self) -> BoxFuture<'_, PluginResult<Vec<String>>> {
        let result = match lock(&self.discovery_error).clone() {
            Some(message) => Err(PluginError::Discovery { message }),
            None => Ok(lock(&self.files).iter().map(|(name, _)| name.clone()).collect()),
        };
        Box::pin(async move { result })
    }

    fn read_plugin_file<'a>(&'a self, filename: &'a str) -> BoxFuture<'a, PluginResult<String>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let result = check_filename(filename).and_then(|()| {
            let files = lock(&self.files);
            match files.iter().find(|(name, _)| name == filename) {
                Some((_, Ok(source))) => Ok(source.clone()),
                Some((_, Err(message))) => Err(PluginError::Host {
                    message: message.clone(),
                }),
                None => Err(PluginError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{filename} not found"),
                ))),
            }
        });
        Box::pin(async move { result })
    }

    fn invoke<'a>(&'a self, command: &'a str, args: Value) -> BoxFuture<'a, PluginResult<Value>> {
        let handler = self
            .commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(command)
            .cloned();
        Box::pin(async move {
            match handler {
                Some(handler) => handler(args).await,
                None => Err(PluginError::UnknownCommand {
                    command: command.to_string(),
                }),
            }
        })
    }

    fn open_external<'a>(&'a self, url: &'a str) -> BoxFuture<'a, PluginResult<()>> {
        lock(&self.opened).push(url.to_string());
        Box::pin(async { Ok(()) })
    }
}
