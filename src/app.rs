//! Application context.
//!
//! `AppContext` owns everything one run of the tool needs: the resolved
//! settings, the command registry (built against the option registry), the
//! child process registry and the log level control. It is built once at
//! startup and handed by reference to the tokenizer, the command runtime and
//! the handlers.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::addons::AddonCatalog;
use crate::args::parse_arguments;
use crate::builtins;
use crate::command::{Command, CommandRegistry};
use crate::config::Settings;
use crate::events::ExitSignal;
use crate::handlers::stop_processes_on_ports;
use crate::logging::LogControl;
use crate::runner::ChildRegistry;

pub struct AppContext {
    pub settings: Arc<Settings>,
    pub commands: CommandRegistry,
    pub children: ChildRegistry,
    pub log: LogControl,
    pub started_at: Instant,
}

impl AppContext {
    pub fn new(settings: Settings, log: LogControl) -> Self {
        let catalog = Arc::new(AddonCatalog::new(
            settings.addon_paths.values().cloned().collect(),
            settings.addon_packs.clone(),
        ));
        let options = builtins::option_registry(&settings, catalog, &log);
        let commands = builtins::command_registry(&options);
        Self {
            settings: Arc::new(settings),
            commands,
            children: ChildRegistry::new(),
            log,
            started_at: Instant::now(),
        }
    }

    pub fn parse<S: AsRef<str>>(&self, args: &[S]) -> Result<Command> {
        Ok(parse_arguments(&self.commands, args)?)
    }

    /// Parses and runs one invocation.
    ///
    /// Nothing is spawned before option processing has succeeded. Processes
    /// already listening on the command's ports are stopped first.
    pub async fn execute<S: AsRef<str>>(&self, args: &[S]) -> Result<()> {
        let mut command = self.parse(args)?;
        command.process_options().await?;
        if self.log.is_debug() {
            debug!("debug logs active");
        }

        if let Some(port) = command.option("port") {
            stop_processes_on_ports(port.values()).await;
        }
        command.run(self).await
    }

    /// Kills every tracked child and reports the run time. Returns the exit
    /// code for the given signal, or 0 after a normal run.
    pub fn shutdown(&self, signal: Option<ExitSignal>) -> i32 {
        let running = self.children.len();
        if running > 0 {
            warn!("stopping {} running process(es)", running);
            self.children.terminate_all();
        }
        let elapsed = self.started_at.elapsed();
        match signal {
            Some(signal) => {
                info!("{} received after {:.2}s", signal.label(), elapsed.as_secs_f64());
                signal.exit_code()
            }
            None => {
                debug!("done in {:.2}s", elapsed.as_secs_f64());
                0
            }
        }
    }
}
