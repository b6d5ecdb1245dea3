//! glint - a host shell for run-time UI plugins.
//!
//! Usage:
//!   glint list               List plugins and their load status
//!   glint render             Render every plugin once
//!   glint watch              Render, then re-render as events arrive
//!   glint serve              Run the exec service for plugin scripts
//!   glint --help             Show help

mod logging;
mod shell;

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result};
use glint_core::GlintConfig;

use shell::Session;

#[derive(Parser)]
#[command(
    name = "glint",
    version,
    about = "A host shell for run-time UI plugins",
    long_about = "glint loads .luax and .tluax plugins from the plugin directory, \
                  compiles them into components and renders them.\n\n\
                  Plugins reach the host through invoke, listen, exec and \
                  open_external; exec requests go to `glint serve`."
)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Plugin directory, overriding the configuration file
    #[arg(long, global = true)]
    plugin_dir: Option<PathBuf>,

    /// Exec service port, overriding the configuration file
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Log more (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List plugins and their load status
    List {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Render every plugin once
    Render {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Render, then keep delivering events and re-rendering until Ctrl-C
    Watch {
        /// How often to deliver pending events
        #[arg(short, long, default_value = "250")]
        interval_ms: u64,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Run the exec service that plugin `exec` calls talk to
    Serve,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut config = GlintConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(dir) = cli.plugin_dir {
        config = config.with_plugin_dir(dir);
    }
    if let Some(port) = cli.port {
        config = config.with_port(port);
    }

    match cli.command {
        Command::List { format } => {
            Session::start(&config, false).await?.list(format).await?;
        }
        Command::Render { format } => {
            Session::start(&config, true).await?.render(format).await?;
        }
        Command::Watch {
            interval_ms,
            format,
        } => {
            let interval = Duration::from_millis(interval_ms.max(10));
            Session::start(&config, true)
                .await?
                .watch(interval, format)
                .await?;
        }
        Command::Serve => shell::serve(&config).await?,
    }

    Ok(())
}
