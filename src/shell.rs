//! The host session behind the `list`, `render` and `watch` commands.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::{Context, Result};
use glint_core::GlintConfig;
use glint_ipc::{ExecService, ServiceConfig, TransportConfig, global};
use glint_plugin::{
    CapabilityBridge, CompiledPlugin, Compiler, Component, FsHost, Instance, Node, PluginLoader,
    PluginResult, SandboxConfig,
};
use itertools::Itertools;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::OutputFormat;

/// Renders allowed per update while state keeps changing.
const MAX_PASSES: usize = 8;

/// Plugins loaded and wired to one capability bridge.
pub struct Session {
    loader: PluginLoader,
    bridge: CapabilityBridge,
}

/// A mounted plugin and its latest output.
struct Mounted {
    plugin: CompiledPlugin,
    instance: Instance,
    node: Node,
}

impl Session {
    /// Build the loader and bridge. With `connect`, the shared transport is
    /// connected to the exec service; failure to connect is not fatal.
    pub async fn start(config: &GlintConfig, connect: bool) -> Result<Self> {
        global::configure(TransportConfig::from(&config.ipc));
        if connect {
            if let Err(e) = global::init(config.ipc.port).await {
                warn!(port = config.ipc.port, "Exec service unavailable: {e}");
            }
        }

        let host = Arc::new(FsHost::new(&config.plugins.dir));
        let compiler = Compiler::new(SandboxConfig::from(&config.plugins));
        let loader = PluginLoader::new(host.clone(), compiler)
            .with_disabled(&config.plugins.disabled)
            .context("Invalid plugin configuration")?;
        let bridge = CapabilityBridge::new(host, global::transport().clone(), config.label.as_str());

        Ok(Self { loader, bridge })
    }

    async fn load(&self) -> Result<Arc<Vec<CompiledPlugin>>> {
        self.loader.load().await.context("Failed to load plugins")
    }

    /// Print every plugin with its load status.
    pub async fn list(&self, format: OutputFormat) -> Result<()> {
        let plugins = self.load().await?;

        match format {
            OutputFormat::Text => {
                if plugins.is_empty() {
                    println!("No plugins found.");
                }
                for plugin in plugins.iter() {
                    println!("{:<24} {:<28} {}", plugin.name, plugin.filename, status(plugin));
                }
            }
            OutputFormat::Json => {
                let rows = plugins
                    .iter()
                    .map(|plugin| {
                        json!({
                            "name": plugin.name,
                            "filename": plugin.filename,
                            "status": status(plugin),
                            "error": plugin.error,
                        })
                    })
                    .collect_vec();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            }
        }
        Ok(())
    }

    /// Render every plugin once, then unmount.
    pub async fn render(&self, format: OutputFormat) -> Result<()> {
        let mut mounted = self.mount_all().await?;
        print_all(&mounted, format)?;
        for entry in &mut mounted {
            entry.instance.unmount().await;
        }
        Ok(())
    }

    /// Render, then keep delivering events and re-rendering changed plugins
    /// until interrupted.
    pub async fn watch(&self, interval: Duration, format: OutputFormat) -> Result<()> {
        let mut mounted = self.mount_all().await?;
        print_all(&mounted, format)?;

        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = ticker.tick() => {
                    for entry in &mut mounted {
                        match entry.instance.pump_events().await {
                            Ok(0) => {}
                            Ok(count) => debug!(plugin = %entry.plugin.name, count, "Delivered events"),
                            Err(e) => warn!("{e}"),
                        }
                        if entry.instance.is_dirty() {
                            entry.node = settle_or_report(&mut entry.instance).await;
                            print_one(entry, format)?;
                        }
                    }
                }
            }
        }

        info!("Stopping");
        for entry in &mut mounted {
            entry.instance.unmount().await;
        }
        Ok(())
    }

    async fn mount_all(&self) -> Result<Vec<Mounted>> {
        let plugins = self.load().await?;
        let mut mounted = Vec::with_capacity(plugins.len());
        for plugin in plugins.iter() {
            let mut instance = plugin
                .component
                .mount(&self.bridge)
                .with_context(|| format!("Failed to mount {}", plugin.filename))?;
            let node = settle_or_report(&mut instance).await;
            mounted.push(Mounted {
                plugin: plugin.clone(),
                instance,
                node,
            });
        }
        Ok(mounted)
    }
}

/// Run the exec service until Ctrl-C.
pub async fn serve(config: &GlintConfig) -> Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", config.ipc.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.ipc.port))?;

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    ExecService::new(ServiceConfig::from(config))
        .serve(listener, cancel)
        .await
        .context("Exec service failed")
}

fn status(plugin: &CompiledPlugin) -> String {
    match &plugin.component {
        Component::Script(script) => format!("ok ({})", script.dialect()),
        Component::Placeholder(placeholder) => placeholder.kind.to_string(),
    }
}

/// Render, run effects and render again while state keeps changing.
async fn settle(instance: &mut Instance) -> PluginResult<Node> {
    let mut node = instance.render().await?;
    for _ in 0..MAX_PASSES {
        instance.commit().await?;
        if !instance.is_dirty() {
            break;
        }
        node = instance.render().await?;
    }
    Ok(node)
}

async fn settle_or_report(instance: &mut Instance) -> Node {
    match settle(instance).await {
        Ok(node) => node,
        Err(e) => {
            warn!("{e}");
            Node::Text(format!("Render Error: {e}"))
        }
    }
}

fn print_all(mounted: &[Mounted], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for entry in mounted {
                print_one(entry, format)?;
            }
        }
        OutputFormat::Json => {
            let rows = mounted.iter().map(entry_json).collect_vec();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }
    Ok(())
}

fn print_one(entry: &Mounted, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("── {} ({})", entry.plugin.name, entry.plugin.filename);
            println!("{}", entry.node.outline());
        }
        OutputFormat::Json => println!("{}", serde_json::to_string(&entry_json(entry))?),
    }
    Ok(())
}

fn entry_json(entry: &Mounted) -> serde_json::Value {
    json!({
        "name": entry.plugin.name,
        "filename": entry.plugin.filename,
        "error": entry.plugin.error,
        "tree": entry.node,
    })
}
