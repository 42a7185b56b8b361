//! Command definitions and the per-invocation command runtime.
//!
//! A `CommandDefinition` is resolved against the option registry once, at
//! registration, into a `CommandSpec`. Running a command creates a `Command`
//! which collects live options from the command line, fills defaults, parses
//! values, applies effects and finally derives the argument list handed to
//! the command's handler.

use std::sync::Arc;

use anyhow::Result;
use futures::future::{try_join_all, BoxFuture};
use tracing::debug;

use crate::app::AppContext;
use crate::error::CliError;
use crate::option::{LiveOption, OptionForm, OptionRef, OptionRegistry, OptionSpec};
use crate::resolver::Resolver;

/// Invoked last with the processed command and its derived arguments.
pub type Handler =
    for<'a> fn(&'a Command, Vec<String>, &'a AppContext) -> BoxFuture<'a, Result<()>>;

/// Unresolved command definition, as written by the built-ins.
pub struct CommandDefinition {
    name: String,
    aliases: Vec<String>,
    options: Vec<OptionRef>,
    default_option: Option<String>,
    default_args: Option<Resolver<Vec<String>>>,
    handler: Handler,
}

impl CommandDefinition {
    pub fn new(name: impl Into<String>, handler: Handler) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            options: Vec::new(),
            default_option: None,
            default_args: None,
            handler,
        }
    }

    pub fn aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    pub fn options<I>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = OptionRef>,
    {
        self.options = options.into_iter().collect();
        self
    }

    pub fn default_option(mut self, name: impl Into<String>) -> Self {
        self.default_option = Some(name.into());
        self
    }

    pub fn default_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_args = Some(Resolver::strings(args));
        self
    }
}

/// A registered command with its option references fully resolved.
#[derive(Clone)]
pub struct CommandSpec {
    pub name: String,
    pub aliases: Vec<String>,
    pub options: Vec<OptionSpec>,
    pub default_option: Option<String>,
    pub default_args: Option<Resolver<Vec<String>>>,
    pub handler: Handler,
}

impl CommandSpec {
    fn matches(&self, token: &str) -> bool {
        self.name.eq_ignore_ascii_case(token)
    }

    fn lookup(&self, token: &str, form: OptionForm) -> Option<&OptionSpec> {
        self.options.iter().find(|spec| spec.matches(token, form))
    }
}

#[derive(Default)]
pub struct CommandRegistry {
    specs: Vec<Arc<CommandSpec>>,
}

impl CommandRegistry {
    /// Resolves the definition's option references and stores the result,
    /// replacing any command with the same name.
    pub fn register(&mut self, definition: CommandDefinition, options: &OptionRegistry) -> Arc<CommandSpec> {
        let spec = Arc::new(CommandSpec {
            options: options.resolve(definition.options),
            name: definition.name,
            aliases: definition.aliases,
            default_option: definition.default_option,
            default_args: definition.default_args,
            handler: definition.handler,
        });
        match self.specs.iter_mut().find(|existing| existing.name == spec.name) {
            Some(existing) => *existing = Arc::clone(&spec),
            None => self.specs.push(Arc::clone(&spec)),
        }
        spec
    }

    /// Finds a command by name, then by alias (case-insensitive).
    pub fn find(&self, token: &str) -> Result<Arc<CommandSpec>, CliError> {
        self.specs
            .iter()
            .find(|spec| spec.matches(token))
            .or_else(|| {
                self.specs.iter().find(|spec| {
                    spec.aliases
                        .iter()
                        .any(|alias| alias.eq_ignore_ascii_case(token))
                })
            })
            .cloned()
            .ok_or_else(|| CliError::UnknownCommand(token.to_string()))
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &Arc<CommandSpec>> {
        self.specs.iter()
    }
}

/// One invocation of a command.
pub struct Command {
    spec: Arc<CommandSpec>,
    options: Vec<LiveOption>,
}

impl Command {
    pub fn new(spec: Arc<CommandSpec>) -> Self {
        Self {
            spec,
            options: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    /// Live options in the order they were first referenced.
    #[cfg(test)]
    pub fn options(&self) -> &[LiveOption] {
        &self.options
    }

    pub fn option(&self, name: &str) -> Option<&LiveOption> {
        self.options.iter().find(|option| option.name() == name)
    }

    pub fn option_mut(&mut self, name: &str) -> Option<&mut LiveOption> {
        self.options.iter_mut().find(|option| option.name() == name)
    }

    pub fn has_option(&self, name: &str) -> bool {
        self.option(name).is_some()
    }

    /// Values of a live option, empty when the option is not live.
    pub fn values(&self, name: &str) -> &[String] {
        self.option(name).map(LiveOption::values).unwrap_or_default()
    }

    /// Returns the live option named by `token`, creating it on first use.
    ///
    /// Live options are keyed by their definition name, so aliases and the
    /// short form all land on the same instance.
    pub fn register_option(&mut self, token: &str, form: OptionForm) -> Result<&mut LiveOption, CliError> {
        let spec = self
            .spec
            .lookup(token, form)
            .ok_or_else(|| CliError::UnknownOption {
                option: token.to_string(),
                command: self.spec.name.clone(),
            })?;
        let idx = match self.options.iter().position(|option| option.name() == spec.name) {
            Some(idx) => idx,
            None => {
                self.options.push(LiveOption::new(spec.clone(), form));
                self.options.len() - 1
            }
        };
        Ok(&mut self.options[idx])
    }

    /// Fills defaults, checks required options, parses values and applies
    /// effects, in that order.
    pub async fn process_options(&mut self) -> Result<()> {
        let spec = Arc::clone(&self.spec);

        for definition in &spec.options {
            if self.has_option(&definition.name) {
                continue;
            }
            if let Some(default) = &definition.default {
                let values = default.resolve().await?;
                self.register_option(&definition.name, OptionForm::Long)?
                    .add_values(values)?;
            } else if definition.required {
                return Err(CliError::MissingOption(definition.name.clone()).into());
            }
        }

        // Parsers only touch their own option's values.
        let pending = self.options.iter().enumerate().filter_map(|(idx, option)| {
            let parser = option.spec().parser.clone()?;
            let values = option.values().to_vec();
            Some(async move { parser(values).await.map(|parsed| (idx, parsed)) })
        });
        for (idx, parsed) in try_join_all(pending).await? {
            self.options[idx].set_values(parsed);
        }

        // Effects may rewrite other options: strictly in insertion order.
        let mut idx = 0;
        while idx < self.options.len() {
            if let Some(effect) = self.options[idx].spec().effect.clone() {
                effect(self)?;
            }
            idx += 1;
        }
        Ok(())
    }

    /// Builds the argument list for the handler: fixed arguments first, then
    /// each live option's flag followed by its comma-joined values.
    pub async fn derive_args(&self) -> Result<Vec<String>> {
        let mut args = match &self.spec.default_args {
            Some(default_args) => default_args.resolve().await?,
            None => Vec::new(),
        };
        for option in &self.options {
            if let Some(flag) = &option.spec().flag {
                args.push(flag.clone());
            }
            if !option.values().is_empty() {
                args.push(option.values().join(","));
            }
        }
        Ok(args)
    }

    pub async fn run(&self, app: &AppContext) -> Result<()> {
        let args = self.derive_args().await?;
        debug!("running {} with: {}", self.name(), shell_words::join(&args));
        (self.spec.handler)(self, args, app).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::FutureExt;

    use super::*;
    use crate::option::OptionOverride;

    static HANDLER_CALLS: AtomicUsize = AtomicUsize::new(0);

    fn noop<'a>(_: &'a Command, _: Vec<String>, _: &'a AppContext) -> BoxFuture<'a, Result<()>> {
        async { Ok(()) }.boxed()
    }

    fn counting<'a>(_: &'a Command, _: Vec<String>, _: &'a AppContext) -> BoxFuture<'a, Result<()>> {
        HANDLER_CALLS.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }.boxed()
    }

    async fn uppercase(values: Vec<String>) -> Result<Vec<String>> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(values.into_iter().map(|value| value.to_uppercase()).collect())
    }

    async fn duplicate(values: Vec<String>) -> Result<Vec<String>> {
        Ok(values.iter().chain(values.iter()).cloned().collect())
    }

    fn options() -> OptionRegistry {
        let mut registry = OptionRegistry::default();
        registry.register(
            OptionSpec::new("addons-path")
                .aliases(["path"])
                .flag("--addons-path")
                .default_values(["/src/addons", "/src/enterprise"]),
        );
        registry.register(OptionSpec::new("addons").short("i").flag("--init"));
        registry.register(OptionSpec::new("community").standalone().effect(|command: &mut Command| {
            if let Some(paths) = command.option_mut("addons-path") {
                paths.set_values(vec!["/src/addons".to_string()]);
            }
            Ok(())
        }));
        registry.register(
            OptionSpec::new("database")
                .short("d")
                .flag("--database")
                .default_with(Resolver::from_fn(|| async { Ok::<_, anyhow::Error>(vec!["17.0".to_string()]) })),
        );
        registry.register(OptionSpec::new("debug").standalone().auto_include());
        registry
    }

    fn command(definition: CommandDefinition) -> Command {
        let mut commands = CommandRegistry::default();
        Command::new(commands.register(definition, &options()))
    }

    #[test]
    fn find_matches_names_then_aliases() {
        let registry = options();
        let mut commands = CommandRegistry::default();
        commands.register(CommandDefinition::new("start", noop), &registry);
        commands.register(CommandDefinition::new("shell", noop).aliases(["sh"]), &registry);
        assert_eq!(commands.find("START").unwrap().name, "start");
        assert_eq!(commands.find("sh").unwrap().name, "shell");
        assert_eq!(
            commands.find("nope").err(),
            Some(CliError::UnknownCommand("nope".into()))
        );
    }

    #[test]
    fn register_resolves_options_immediately() {
        let mut commands = CommandRegistry::default();
        let spec = commands.register(
            CommandDefinition::new("create", noop)
                .options([OptionRef::AllRegistered, OptionRef::with("start", OptionOverride::new().standalone())]),
            &options(),
        );
        let names: Vec<&str> = spec.options.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["addons-path", "addons", "community", "database", "debug", "start"]);
    }

    #[test]
    fn register_option_is_idempotent_across_aliases() {
        let mut command = command(CommandDefinition::new("start", noop).options([OptionRef::AllRegistered]));
        command.register_option("addons-path", OptionForm::Long).unwrap().add_values(["a"]).unwrap();
        command.register_option("path", OptionForm::Long).unwrap().add_values(["b"]).unwrap();
        assert_eq!(command.options().len(), 1);
        assert_eq!(command.values("addons-path"), ["a", "b"]);
        assert_eq!(command.options()[0].invoked_as(), "--addons-path");
    }

    #[test]
    fn unknown_option_names_the_command() {
        let mut command = command(CommandDefinition::new("drop", noop).options([OptionRef::name("database")]));
        let err = command.register_option("x", OptionForm::Short).err().unwrap();
        assert_eq!(
            err,
            CliError::UnknownOption {
                option: "x".into(),
                command: "drop".into()
            }
        );
    }

    #[tokio::test]
    async fn defaults_fill_missing_options_in_definition_order() {
        let mut command = command(CommandDefinition::new("start", noop).options([OptionRef::AllRegistered]));
        command.register_option("i", OptionForm::Short).unwrap().add_values(["crm"]).unwrap();
        command.process_options().await.unwrap();
        let names: Vec<&str> = command.options().iter().map(|o| o.name()).collect();
        assert_eq!(names, vec!["addons", "addons-path", "database"]);
        assert_eq!(command.values("database"), ["17.0"]);
        assert_eq!(command.option("database").unwrap().invoked_as(), "--database");
        assert_eq!(command.option("addons").unwrap().invoked_as(), "-i");
    }

    #[tokio::test]
    async fn missing_required_option_fails_before_handler() {
        HANDLER_CALLS.store(0, Ordering::SeqCst);
        let mut command = command(
            CommandDefinition::new("drop", counting).options([
                OptionRef::name("debug"),
                OptionRef::with("database", OptionOverride::new().no_default().required()),
            ]),
        );
        let err = command.process_options().await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<CliError>(),
            Some(&CliError::MissingOption("database".into()))
        );
        assert_eq!(HANDLER_CALLS.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_parsers_match_sequential_results() {
        let mut registry = OptionRegistry::default();
        registry.register(OptionSpec::new("a").parser(uppercase));
        registry.register(OptionSpec::new("b").parser(duplicate));
        let mut commands = CommandRegistry::default();
        let spec = commands.register(
            CommandDefinition::new("x", noop).options([OptionRef::AllRegistered]),
            &registry,
        );

        let mut command = Command::new(spec);
        command.register_option("a", OptionForm::Long).unwrap().add_values(["x", "y"]).unwrap();
        command.register_option("b", OptionForm::Long).unwrap().add_values(["z"]).unwrap();
        command.process_options().await.unwrap();

        let sequential_a = uppercase(vec!["x".into(), "y".into()]).await.unwrap();
        let sequential_b = duplicate(vec!["z".into()]).await.unwrap();
        assert_eq!(command.values("a"), sequential_a.as_slice());
        assert_eq!(command.values("b"), sequential_b.as_slice());
    }

    #[tokio::test]
    async fn effects_override_defaults_in_derived_args() {
        let mut command = command(
            CommandDefinition::new("start", noop)
                .options([OptionRef::AllRegistered])
                .default_args(["--with-demo"]),
        );
        command.register_option("community", OptionForm::Long).unwrap();
        command.process_options().await.unwrap();
        let args = command.derive_args().await.unwrap();
        assert_eq!(
            args,
            vec!["--with-demo", "--addons-path", "/src/addons", "--database", "17.0"]
        );
    }

    #[tokio::test]
    async fn options_without_flag_contribute_values_only() {
        let mut command = command(
            CommandDefinition::new("memory", noop)
                .options([OptionRef::with("mode", OptionOverride::new().default_values(["parse"]))]),
        );
        command.process_options().await.unwrap();
        assert_eq!(command.derive_args().await.unwrap(), vec!["parse"]);
    }
}
