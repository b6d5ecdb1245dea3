//! Core types for the plugin system.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};

use glint_ipc::TransportError;
use thiserror::Error;

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Type alias for boxed futures returned by host methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Errors that can occur in the plugin system.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The host could not list plugin files.
    #[error("Plugin discovery failed: {message}")]
    Discovery { message: String },

    /// A plugin file could not be read.
    #[error("Failed to fetch plugin '{filename}': {message}")]
    Fetch { filename: String, message: String },

    /// A host command failed.
    #[error("{message}")]
    Host { message: String },

    /// No host command is registered under this name.
    #[error("Unknown command: {command}")]
    UnknownCommand { command: String },

    /// A bridge or host call got a malformed argument.
    #[error("{message}")]
    InvalidArgument { message: String },

    /// The socket transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The host-side service answered with `ok: false`.
    #[error("Remote error: {message}")]
    Remote { message: String },

    /// Plugin code failed while rendering, committing or handling an event.
    #[error("Plugin '{name}' failed: {message}")]
    Render { name: String, message: String },

    /// A newer load cycle started before this one finished.
    #[error("Load superseded by generation {generation}")]
    Superseded { generation: u64 },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    pub(crate) fn render(name: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Render {
            name: name.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

/// A plugin file as fetched from the host, valid for one load cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSource {
    pub filename: String,
    pub source: String,
}
