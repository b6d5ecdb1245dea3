//! Lua runtime for compiled plugins.
//!
//! This module provides the plugin environment (the `h` element factory,
//! state hooks and logging), conversion of rendered values into [`Node`]s and
//! the bindings that expose the capability bridge as a `props` table.
//!
//! [`Node`]: crate::Node

mod bindings;
mod component;
pub(crate) mod convert;
mod hooks;
pub(crate) mod scope;

pub use component::{ScriptComponent, ScriptInstance};
pub use scope::{SCOPE_BUILTINS, SCOPE_PRIMITIVES};
