//! Plugin discovery, fetching and compilation.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use globset::{Glob, GlobSet, GlobSetBuilder};
use strum::{Display, EnumString};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::compiler::Compiler;
use crate::component::{Component, PlaceholderKind};
use crate::host::HostRpc;
use crate::transform::plugin_name;
use crate::types::{PluginError, PluginResult, PluginSource};

/// Loader lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Ready,
    Errored,
}

/// One plugin of a load cycle.
#[derive(Debug, Clone)]
pub struct CompiledPlugin {
    /// Filename without its dialect extension.
    pub name: String,

    /// Always present; a placeholder if anything went wrong.
    pub component: Component,

    pub filename: String,

    /// Why the file could not be fetched.
    pub error: Option<String>,
}

/// What observers of the loader see.
#[derive(Debug, Clone, Default)]
pub struct LoaderSnapshot {
    pub state: LoadState,
    pub plugins: Arc<Vec<CompiledPlugin>>,

    /// Discovery failure of the last load.
    pub error: Option<String>,

    /// Generation of the load that produced this snapshot.
    pub generation: u64,
}

/// Loads every plugin the host offers.
///
/// Each call to [`load`](Self::load) starts a new generation. A load that
/// notices a newer generation stops at the next file boundary and publishes
/// nothing.
pub struct PluginLoader {
    host: Arc<dyn HostRpc>,
    compiler: Compiler,
    disabled: GlobSet,
    generation: AtomicU64,
    state: watch::Sender<LoaderSnapshot>,
}

impl fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLoader")
            .field("compiler", &self.compiler)
            .field("generation", &self.generation)
            .field("state", &self.state.borrow().state)
            .finish_non_exhaustive()
    }
}

impl PluginLoader {
    pub fn new(host: Arc<dyn HostRpc>, compiler: Compiler) -> Self {
        Self {
            host,
            compiler,
            disabled: GlobSet::empty(),
            generation: AtomicU64::new(0),
            state: watch::Sender::new(LoaderSnapshot::default()),
        }
    }

    /// Skip files matching any of `patterns`.
    pub fn with_disabled(mut self, patterns: &[String]) -> PluginResult<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| {
                PluginError::invalid(format!("Invalid disabled pattern {pattern:?}: {e}"))
            })?;
            builder.add(glob);
        }
        self.disabled = builder
            .build()
            .map_err(|e| PluginError::invalid(e.to_string()))?;
        Ok(self)
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<LoaderSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> LoaderSnapshot {
        self.state.borrow().clone()
    }

    fn current(&self, generation: u64) -> PluginResult<()> {
        let latest = self.generation.load(Ordering::Acquire);
        if latest != generation {
            debug!(generation, latest, "Load superseded");
            return Err(PluginError::Superseded { generation: latest });
        }
        Ok(())
    }

    /// Discover, fetch and compile every plugin, replacing the previous
    /// collection. Also used for reload.
    pub async fn load(&self) -> PluginResult<Arc<Vec<CompiledPlugin>>> {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.state.send_modify(|snapshot| {
            snapshot.state = LoadState::Loading;
            snapshot.error = None;
            snapshot.generation = generation;
        });

        let filenames = match self.host.list_plugin_files().await {
            Ok(filenames) => filenames,
            Err(err) => {
                self.current(generation)?;
                let err = match err {
                    PluginError::Discovery { .. } => err,
                    other => PluginError::Discovery {
                        message: other.to_string(),
                    },
                };
                warn!(generation, "{err}");
                self.state.send_replace(LoaderSnapshot {
                    state: LoadState::Errored,
                    plugins: Arc::default(),
                    error: Some(err.to_string()),
                    generation,
                });
                return Err(err);
            }
        };
        debug!(generation, count = filenames.len(), "Discovered plugins");

        let mut plugins = Vec::with_capacity(filenames.len());
        for filename in filenames {
            self.current(generation)?;
            if self.disabled.is_match(&filename) {
                debug!(plugin = %filename, "Plugin disabled by configuration");
                continue;
            }

            let name = plugin_name(&filename).to_string();
            let fetched = self
                .host
                .read_plugin_file(&filename)
                .await
                .map(|source| PluginSource {
                    filename: filename.clone(),
                    source,
                });
            match fetched {
                Ok(plugin) => {
                    self.current(generation)?;
                    plugins.push(CompiledPlugin {
                        name,
                        component: self.compiler.compile(&plugin.source, &plugin.filename),
                        filename: plugin.filename,
                        error: None,
                    });
                }
                Err(err) => {
                    let message = err.to_string();
                    let err = PluginError::Fetch {
                        filename: filename.clone(),
                        message: message.clone(),
                    };
                    warn!(generation, "{err}");
                    plugins.push(CompiledPlugin {
                        name,
                        component: Component::placeholder(
                            PlaceholderKind::Fetch,
                            &filename,
                            err.to_string(),
                        ),
                        filename,
                        error: Some(message),
                    });
                }
            }
        }

        self.current(generation)?;
        let plugins = Arc::new(plugins);
        let failed = plugins
            .iter()
            .filter(|plugin| plugin.component.is_placeholder())
            .count();
        info!(
            generation,
            loaded = plugins.len() - failed,
            failed,
            "Loaded plugins"
        );

        self.state.send_replace(LoaderSnapshot {
            state: LoadState::Ready,
            plugins: plugins.clone(),
            error: None,
            generation,
        });
        Ok(plugins)
    }
}
