//! Core types and configuration for glint.
//!
//! This crate provides the data structures shared by the IPC transport, the
//! plugin system and the host shell: the wire [`Message`] and the
//! [`GlintConfig`] configuration tree.

mod config;
mod error;
mod message;

pub use config::{
    GlintConfig, GlintConfigBuilder, IpcConfig, IpcConfigBuilder, PluginsConfig,
    PluginsConfigBuilder,
};
pub use error::ConfigError;
pub use message::Message;
