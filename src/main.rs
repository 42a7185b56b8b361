//! odev: developer command runner for a local application server.
//!
//! This is the entry point of the tool. It parses the outer command line,
//! loads configuration, installs logging, and races the requested command
//! against the termination signals so that spawned children never outlive
//! the tool.

mod addons;
mod app;
mod args;
mod builtins;
mod command;
mod config;
mod error;
mod events;
mod handlers;
mod logging;
mod memory;
mod option;
mod resolver;
mod runner;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::error;

use crate::app::AppContext;
use crate::config::{default_config_path, home_dir, load_config, Config, Settings};
use crate::error::CliError;
use crate::events::wait_for_exit_signal;
use crate::logging::LogControl;

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "odev",
    version,
    about = "Run, test and inspect a local application server",
    disable_help_subcommand = true
)]
struct Cli {
    /// Path to an odev.toml configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Ignore any odev.toml in the current directory.
    #[arg(long)]
    no_config: bool,
    /// Command, options and values: [command] [--option|-o [value...]]... [value...]
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let config = if let Some(path) = &cli.config {
        load_config(path)?
    } else if cli.no_config {
        Config::default()
    } else {
        match default_config_path() {
            Some(path) => load_config(&path)?,
            None => Config::default(),
        }
    };
    Ok(Settings::from_config(config, &home_dir()))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    let log = LogControl::init(settings.debug)?;
    let app = AppContext::new(settings, log);

    let outcome = tokio::select! {
        result = app.execute(&cli.args) => result,
        signal = wait_for_exit_signal() => {
            let code = app.shutdown(Some(signal));
            std::process::exit(code);
        }
    };
    app.shutdown(None);

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => match err.downcast_ref::<CliError>() {
            Some(local) => {
                error!("{}", local);
                Ok(ExitCode::FAILURE)
            }
            None => Err(err),
        },
    }
}
