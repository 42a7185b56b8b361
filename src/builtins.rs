//! Built-in options and commands.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::addons::AddonCatalog;
use crate::command::{Command, CommandDefinition, CommandRegistry};
use crate::config::Settings;
use crate::error::CliError;
use crate::handlers;
use crate::logging::LogControl;
use crate::memory::output::Format;
use crate::memory::readings::Metric;
use crate::memory::{self, Mode};
use crate::option::{OptionForm, OptionOverride, OptionRef, OptionRegistry, OptionSpec};
use crate::resolver::Resolver;

pub const DEFAULT_PORT: &str = "8069";
pub const SHELL_PORT: &str = "8070";

pub fn option_registry(settings: &Settings, catalog: Arc<AddonCatalog>, log: &LogControl) -> OptionRegistry {
    let mut registry = OptionRegistry::default();

    registry.register(
        OptionSpec::new("addons-path")
            .aliases(["path", "paths"])
            .flag("--addons-path")
            .default_values(settings.addon_paths.values().map(|path| path.display().to_string())),
    );
    registry.register(
        OptionSpec::new("addons")
            .aliases(["addon", "module", "modules"])
            .short("i")
            .flag("--init")
            .parser(addon_parser(Arc::clone(&catalog))),
    );
    let community = settings.community_addons().display().to_string();
    registry.register(
        OptionSpec::new("community")
            .aliases(["com"])
            .standalone()
            .effect(move |command: &mut Command| {
                if let Some(paths) = command.option_mut("addons-path") {
                    paths.set_values(vec![community.clone()]);
                }
                Ok(())
            }),
    );
    let community_root = settings.community_root.clone();
    registry.register(
        OptionSpec::new("database")
            .short("d")
            .flag("--database")
            .single_value()
            .default_with(Resolver::from_fn(move || {
                handlers::default_database_name(community_root.clone())
            })),
    );
    let log = log.clone();
    registry.register(
        OptionSpec::new("debug")
            .standalone()
            .auto_include()
            .effect(move |_: &mut Command| {
                log.set_debug(true);
                Ok(())
            }),
    );
    registry.register(OptionSpec::new("dev").flag("--dev").default_values(["all"]));
    registry.register(
        OptionSpec::new("port")
            .short("p")
            .flag("--http-port")
            .single_value()
            .default_values([DEFAULT_PORT])
            .parser(validate_ports),
    );
    registry.register(
        OptionSpec::new("template")
            .short("t")
            .flag("--db_template")
            .single_value(),
    );
    registry.register(
        OptionSpec::new("update")
            .short("u")
            .flag("--update")
            .parser(addon_parser(catalog)),
    );
    registry.register(
        OptionSpec::new("user")
            .short("r")
            .flag("--db_user")
            .single_value(),
    );
    registry
}

pub fn command_registry(options: &OptionRegistry) -> CommandRegistry {
    let mut commands = CommandRegistry::default();

    commands.register(
        CommandDefinition::new("start", handlers::start)
            .options([OptionRef::AllRegistered])
            .default_option("addons")
            .default_args(["--with-demo"]),
        options,
    );
    commands.register(
        CommandDefinition::new("create", handlers::create)
            .aliases(["new"])
            .options([OptionRef::AllRegistered, OptionRef::with("start", OptionOverride::new().standalone())])
            .default_option("addons")
            .default_args(["--with-demo"]),
        options,
    );
    commands.register(
        CommandDefinition::new("drop", handlers::drop_db)
            .options([
                OptionRef::name("debug"),
                OptionRef::with("database", OptionOverride::new().no_default().required()),
            ])
            .default_option("database"),
        options,
    );
    commands.register(
        CommandDefinition::new("test", handlers::start)
            .options([
                OptionRef::AllRegistered,
                OptionRef::with(
                    "tags",
                    OptionOverride::new()
                        .aliases(["tag", "test-tags", "test-tag"])
                        .flag("--test-tags")
                        .required(),
                ),
            ])
            .default_option("tags")
            .default_args(["--log-level", "test", "--stop-after-init", "--test-enable"]),
        options,
    );
    commands.register(
        CommandDefinition::new("shell", handlers::start)
            .aliases(["sh"])
            .options([
                OptionRef::AllRegistered,
                OptionRef::with("port", OptionOverride::new().default_values([SHELL_PORT])),
            ])
            .default_option("addons")
            .default_args(["shell"]),
        options,
    );
    commands.register(
        CommandDefinition::new("database", handlers::list_databases).aliases(["db", "databases"]),
        options,
    );
    commands.register(
        CommandDefinition::new("memory", memory::parse_memory_logs)
            .aliases(["mem"])
            .options(memory_options())
            .default_option("mode"),
        options,
    );
    commands
}

fn memory_options() -> Vec<OptionRef> {
    vec![
        OptionRef::with(
            "mode",
            OptionOverride::new()
                .default_values(["parse"])
                .parser(validate::<Mode>),
        ),
        OptionRef::with(
            "metric",
            OptionOverride::new()
                .default_values(["used"])
                .parser(validate::<Metric>),
        ),
        OptionRef::with(
            "format",
            OptionOverride::new()
                .default_values(["grouped"])
                .parser(validate::<Format>),
        ),
        OptionRef::with("logs-dir", OptionOverride::new().default_values(["memory_data", "logs"])),
        OptionRef::with("output-dir", OptionOverride::new().default_values(["memory_data", "output"])),
        OptionRef::with(
            "sources",
            OptionOverride::new().default_values(["memory_data", "data_sources.ini"]),
        ),
        OptionRef::with(
            "clear",
            OptionOverride::new().standalone().effect(|command: &mut Command| force_mode(command, "clear")),
        ),
        OptionRef::with(
            "edit",
            OptionOverride::new()
                .short("e")
                .standalone()
                .effect(|command: &mut Command| force_mode(command, "edit")),
        ),
        OptionRef::with("csv", OptionOverride::new().standalone()),
        OptionRef::with("local", OptionOverride::new().short("l").standalone()),
        OptionRef::with("mobile", OptionOverride::new().short("m").standalone()),
        OptionRef::with("open", OptionOverride::new().short("o").standalone()),
        OptionRef::with("variance", OptionOverride::new().short("v").standalone()),
    ]
}

fn force_mode(command: &mut Command, mode: &str) -> Result<()> {
    command
        .register_option("mode", OptionForm::Long)?
        .set_values(vec![mode.to_string()]);
    Ok(())
}

/// Expands `addons`/`update` values against the shared catalog.
fn addon_parser(catalog: Arc<AddonCatalog>) -> impl Fn(Vec<String>) -> BoxFuture<'static, Result<Vec<String>>> + Send + Sync {
    move |values| {
        let catalog = Arc::clone(&catalog);
        async move { catalog.expand(values).await }.boxed()
    }
}

async fn validate<T>(values: Vec<String>) -> Result<Vec<String>>
where
    T: FromStr<Err = CliError>,
{
    for value in &values {
        value.parse::<T>()?;
    }
    Ok(values)
}

async fn validate_ports(values: Vec<String>) -> Result<Vec<String>> {
    for value in &values {
        if value.parse::<u16>().map_or(true, |port| port == 0) {
            return Err(CliError::InvalidValue {
                option: "port".to_string(),
                value: value.clone(),
            }
            .into());
        }
    }
    Ok(values)
}
