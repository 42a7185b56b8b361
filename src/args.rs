//! Turns the raw argument vector into a `Command` with its live options.
//!
//! Grammar: `[command] [--flag|-f [value...]]... [positional...]`. The first
//! token selects the command unless it starts with `-`, in which case the
//! implicit `start` command is used.

use std::sync::LazyLock;

use regex::Regex;

use crate::command::{Command, CommandRegistry};
use crate::error::CliError;
use crate::option::OptionForm;

pub const DEFAULT_COMMAND: &str = "start";

static SHORT_FLAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-(\w+)$").expect("valid regex"));
static LONG_FLAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^--(\w[\w-]*)$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Short(String),
    Long(String),
    Value(String),
}

/// Lowercases flag tokens and splits `--flag=value` into two tokens.
/// Values are kept verbatim.
pub fn normalize<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized = Vec::new();
    for arg in args {
        let arg = arg.as_ref();
        if !arg.starts_with('-') {
            normalized.push(arg.to_string());
            continue;
        }
        match arg.split_once('=') {
            Some((flag, value)) => {
                normalized.push(flag.to_lowercase());
                if !value.is_empty() {
                    normalized.push(value.to_string());
                }
            }
            None => normalized.push(arg.to_lowercase()),
        }
    }
    normalized
}

pub fn classify(token: &str) -> Token {
    if let Some(caps) = LONG_FLAG.captures(token) {
        return Token::Long(caps[1].to_string());
    }
    if let Some(caps) = SHORT_FLAG.captures(token) {
        return Token::Short(caps[1].to_string());
    }
    Token::Value(token.to_string())
}

/// Selects the command and registers every option referenced on the
/// command line.
///
/// Bare values go to the most recently referenced option when it accepts
/// values; a single-valued option stops collecting after one. Everything
/// else is assigned, in bulk, to the command's positional option.
pub fn parse_arguments<S: AsRef<str>>(commands: &CommandRegistry, args: &[S]) -> Result<Command, CliError> {
    let mut tokens = normalize(args);
    let name = match tokens.first() {
        Some(first) if !first.starts_with('-') => tokens.remove(0).to_lowercase(),
        _ => DEFAULT_COMMAND.to_string(),
    };
    let mut command = Command::new(commands.find(&name)?);

    let mut active: Option<String> = None;
    let mut positional = Vec::new();
    for token in tokens.iter().map(|token| classify(token)) {
        match token {
            Token::Short(flag) => {
                active = Some(command.register_option(&flag, OptionForm::Short)?.name().to_string());
            }
            Token::Long(flag) => {
                active = Some(command.register_option(&flag, OptionForm::Long)?.name().to_string());
            }
            Token::Value(value) => {
                let target = active
                    .as_deref()
                    .and_then(|name| command.option_mut(name))
                    .filter(|option| option.accepts_values());
                match target {
                    Some(option) => {
                        option.add_values([value])?;
                        if option.spec().single_value {
                            active = None;
                        }
                    }
                    None => positional.push(value),
                }
            }
        }
    }

    if !positional.is_empty() {
        let Some(default_option) = command.spec().default_option.clone() else {
            return Err(CliError::UnassignedValues {
                command: command.name().to_string(),
                values: positional,
            });
        };
        command
            .register_option(&default_option, OptionForm::Long)?
            .add_values(positional)?;
    }
    Ok(command)
}

#[cfg(test)]
mod tests {
    use futures::future::BoxFuture;
    use futures::FutureExt;

    use super::*;
    use crate::app::AppContext;
    use crate::command::CommandDefinition;
    use crate::option::{OptionOverride, OptionRef, OptionRegistry, OptionSpec};

    fn noop<'a>(_: &'a Command, _: Vec<String>, _: &'a AppContext) -> BoxFuture<'a, anyhow::Result<()>> {
        async { Ok(()) }.boxed()
    }

    fn commands() -> CommandRegistry {
        let mut options = OptionRegistry::default();
        options.register(OptionSpec::new("addons").aliases(["modules"]).short("i").flag("--init"));
        options.register(OptionSpec::new("community").aliases(["com"]).standalone());
        options.register(OptionSpec::new("database").short("d").flag("--database").single_value());
        options.register(OptionSpec::new("logs-dir"));
        options.register(OptionSpec::new("debug").standalone().auto_include());

        let mut commands = CommandRegistry::default();
        commands.register(
            CommandDefinition::new("start", noop)
                .options([OptionRef::AllRegistered])
                .default_option("addons"),
            &options,
        );
        commands.register(
            CommandDefinition::new("create", noop)
                .aliases(["new"])
                .options([OptionRef::AllRegistered, OptionRef::with("start", OptionOverride::new().standalone())])
                .default_option("addons"),
            &options,
        );
        commands.register(
            CommandDefinition::new("drop", noop).options([OptionRef::name("database")]),
            &options,
        );
        commands
    }

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn classifies_tokens() {
        assert_eq!(classify("-d"), Token::Short("d".into()));
        assert_eq!(classify("--logs-dir"), Token::Long("logs-dir".into()));
        assert_eq!(classify("crm"), Token::Value("crm".into()));
        assert_eq!(classify("-"), Token::Value("-".into()));
        assert_eq!(classify("--"), Token::Value("--".into()));
    }

    #[test]
    fn normalize_splits_flag_values_and_lowercases_flags() {
        assert_eq!(
            normalize(["--PORT=8070", "-D", "MyDb", "url=x"]),
            vec!["--port", "8070", "-d", "MyDb", "url=x"]
        );
    }

    #[test]
    fn missing_command_defaults_to_start() {
        let command = parse_arguments(&commands(), &args(&["-i", "crm"])).unwrap();
        assert_eq!(command.name(), "start");
        assert_eq!(command.values("addons"), ["crm"]);

        let command = parse_arguments(&commands(), &Vec::<String>::new()).unwrap();
        assert_eq!(command.name(), "start");
        assert!(command.options().is_empty());
    }

    #[test]
    fn command_token_is_case_insensitive_and_accepts_aliases() {
        let command = parse_arguments(&commands(), &args(&["NEW", "--start"])).unwrap();
        assert_eq!(command.name(), "create");
        assert!(command.has_option("start"));
    }

    #[test]
    fn extra_values_after_single_valued_option_become_positional() {
        let command = parse_arguments(&commands(), &args(&["create", "-d", "mydb", "extra1", "extra2"])).unwrap();
        assert_eq!(command.values("database"), ["mydb"]);
        assert_eq!(command.values("addons"), ["extra1", "extra2"]);
    }

    #[test]
    fn values_follow_the_active_option_until_the_next_flag() {
        let command =
            parse_arguments(&commands(), &args(&["start", "--modules", "crm", "sale", "--com", "web"])).unwrap();
        assert_eq!(command.values("addons"), ["crm", "sale", "web"]);
        assert!(command.values("community").is_empty());
    }

    #[test]
    fn unclaimed_values_without_positional_option_fail() {
        let err = parse_arguments(&commands(), &args(&["drop", "-d", "a", "b", "c"])).err().unwrap();
        assert_eq!(
            err,
            CliError::UnassignedValues {
                command: "drop".into(),
                values: vec!["b".into(), "c".into()],
            }
        );
    }

    #[test]
    fn unknown_option_and_command_are_reported() {
        assert_eq!(
            parse_arguments(&commands(), &args(&["drop", "--port", "1"])).err(),
            Some(CliError::UnknownOption {
                option: "port".into(),
                command: "drop".into()
            })
        );
        assert_eq!(
            parse_arguments(&commands(), &args(&["launch"])).err(),
            Some(CliError::UnknownCommand("launch".into()))
        );
    }
}
