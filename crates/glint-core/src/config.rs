//! Host configuration types.

use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Name of the configuration directory under the platform config dir.
const APP_DIR: &str = "glint";

/// Name of the configuration file inside [`GlintConfig::config_dir`].
const CONFIG_FILE: &str = "config.toml";

/// Top-level configuration for a glint host session.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct GlintConfig {
    /// Session label sent along with exec requests.
    #[builder(default = "default_label()")]
    #[serde(default = "default_label")]
    pub label: String,

    /// Root directory exec scripts are resolved against.
    #[builder(default = "GlintConfig::config_dir()")]
    #[serde(default = "GlintConfig::config_dir")]
    pub scripts_dir: PathBuf,

    /// Socket transport settings.
    #[builder(default)]
    #[serde(default)]
    pub ipc: IpcConfig,

    /// Plugin loading settings.
    #[builder(default)]
    #[serde(default)]
    pub plugins: PluginsConfig,
}

/// Settings for the socket transport and the exec service.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
pub struct IpcConfig {
    /// Local port of the host-side service.
    #[builder(default = "3499")]
    #[serde(default = "default_port")]
    pub port: u16,

    /// How long a request waits for its response, in milliseconds.
    #[builder(default = "5000")]
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Longest accepted line on the wire, in bytes.
    #[builder(default = "1024 * 1024")]
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

/// Settings for plugin discovery and the script runtime.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
pub struct PluginsConfig {
    /// Directory plugin source files are listed from.
    #[builder(default = "GlintConfig::config_dir().join(\"plugins\")")]
    #[serde(default = "default_plugin_dir")]
    pub dir: PathBuf,

    /// Glob patterns of plugin names that are never loaded.
    #[builder(default)]
    #[serde(default)]
    pub disabled: Vec<String>,

    /// Memory ceiling of each plugin's script state, in MB (0 = unlimited).
    #[builder(default = "64")]
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: usize,

    /// Instruction budget for module execution and a single render (0 = unlimited).
    #[builder(default = "10_000_000")]
    #[serde(default = "default_max_instructions")]
    pub max_instructions: u64,
}

fn default_label() -> String {
    "main".to_string()
}

fn default_port() -> u16 {
    3499
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_max_frame_len() -> usize {
    1024 * 1024
}

fn default_plugin_dir() -> PathBuf {
    GlintConfig::config_dir().join("plugins")
}

fn default_max_memory_mb() -> usize {
    64
}

fn default_max_instructions() -> u64 {
    10_000_000
}

impl GlintConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref label) = self.label {
            if label.trim().is_empty() {
                return Err("Label cannot be empty".to_string());
            }
        }
        if let Some(ref ipc) = self.ipc {
            if ipc.request_timeout_ms == 0 {
                return Err("Request timeout must be positive".to_string());
            }
        }
        Ok(())
    }
}

impl GlintConfig {
    /// Create a new config builder.
    pub fn builder() -> GlintConfigBuilder {
        GlintConfigBuilder::default()
    }

    /// Platform configuration directory for glint (`~/.config/glint` on Linux).
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }

    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        Self::config_dir().join(CONFIG_FILE)
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Syntax {
            message: e.to_string(),
        })?;
        config.check()?;
        Ok(config)
    }

    /// Load the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        let config: Self = toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.check()?;
        Ok(config)
    }

    /// Load the configuration from `path`, or from the default location.
    ///
    /// A missing file at the default location yields the defaults; a missing
    /// file that was asked for explicitly is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.label.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "label cannot be empty".into(),
            });
        }
        if self.ipc.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                message: "ipc.request_timeout_ms must be positive".into(),
            });
        }
        Ok(())
    }

    /// Override the plugin directory.
    pub fn with_plugin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plugins.dir = dir.into();
        self
    }

    /// Override the service port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.ipc.port = port;
        self
    }
}

impl Default for GlintConfig {
    fn default() -> Self {
        Self {
            label: default_label(),
            scripts_dir: Self::config_dir(),
            ipc: IpcConfig::default(),
            plugins: PluginsConfig::default(),
        }
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            request_timeout_ms: default_request_timeout_ms(),
            max_frame_len: default_max_frame_len(),
        }
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dir: default_plugin_dir(),
            disabled: Vec::new(),
            max_memory_mb: default_max_memory_mb(),
            max_instructions: default_max_instructions(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = GlintConfig::builder()
            .label("bar")
            .scripts_dir("/tmp/scripts")
            .build()
            .unwrap();

        assert_eq!(config.label, "bar");
        assert_eq!(config.scripts_dir, PathBuf::from("/tmp/scripts"));
        assert_eq!(config.ipc.port, 3499);
        assert_eq!(config.ipc.request_timeout_ms, 5000);
    }

    #[test]
    fn test_builder_rejects_empty_label() {
        let result = GlintConfig::builder().label("  ").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = GlintConfig::from_toml(
            r#"
            label = "top"

            [plugins]
            disabled = ["experimental-*"]
            "#,
        )
        .unwrap();

        assert_eq!(config.label, "top");
        assert_eq!(config.plugins.disabled, vec!["experimental-*".to_string()]);
        assert_eq!(config.plugins.max_memory_mb, 64);
        assert_eq!(config.ipc.port, 3499);
    }

    #[test]
    fn test_with_overrides() {
        let config = GlintConfig::default()
            .with_port(4000)
            .with_plugin_dir("/srv/plugins");
        assert_eq!(config.ipc.port, 4000);
        assert_eq!(config.plugins.dir, PathBuf::from("/srv/plugins"));
    }
}
