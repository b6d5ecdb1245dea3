//! Run-time UI plugins for glint.
//!
//! Plugins are single source files (`.luax`, or `.tluax` for the typed
//! dialect) fetched from the host at run time. The [`Compiler`] rewrites
//! their markup into `h(...)` calls, runs the module in its own Lua state
//! with a fixed scope, and resolves the exported component. Failures never
//! escape: a plugin that does not compile still yields a [`Component`], one
//! that renders a visible diagnostic.
//!
//! Mounted components reach the host only through the [`CapabilityBridge`]:
//! `invoke`, `listen`, `exec` and `open_external`.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use glint_plugin::{CapabilityBridge, Compiler, FsHost, PluginLoader};
//!
//! let host = Arc::new(FsHost::new("/home/me/.config/glint/plugins"));
//! let loader = PluginLoader::new(host.clone(), Compiler::default());
//! let plugins = loader.load().await?;
//!
//! let bridge = CapabilityBridge::new(host, glint_ipc::global::transport().clone(), "main");
//! for plugin in plugins.iter() {
//!     let mut instance = plugin.component.mount(&bridge)?;
//!     println!("{}", instance.render().await?.text_content());
//! }
//! ```

mod bridge;
mod compiler;
mod component;
mod host;
mod loader;
pub mod lua;
mod node;
mod sandbox;
pub mod transform;
mod types;

pub use bridge::CapabilityBridge;
pub use compiler::{CompileError, CompileStage, Compiler};
pub use component::{Component, Instance, Placeholder, PlaceholderKind};
pub use host::{CommandHandler, FsHost, HostRpc, MemoryHost};
pub use loader::{CompiledPlugin, LoadState, LoaderSnapshot, PluginLoader};
pub use node::{Element, Node};
pub use sandbox::SandboxConfig;
pub use transform::{Dialect, TransformError};
pub use types::{BoxFuture, PluginError, PluginResult, PluginSource};
