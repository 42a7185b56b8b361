//! User-facing error conditions.
//!
//! `CliError` marks failures caused by the invocation itself (bad command,
//! bad option, bad value). These are printed as a single line without a
//! diagnostic chain; anything else propagates to `main` unchanged.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CliError {
    #[error("unknown command: \"{0}\"")]
    UnknownCommand(String),

    #[error("unknown option: \"{option}\" with command \"{command}\"")]
    UnknownOption { option: String, command: String },

    #[error("missing required option: {0}")]
    MissingOption(String),

    #[error(
        "no default option for command '{command}'; the following values were given without an option name: {}",
        quote_list(.values)
    )]
    UnassignedValues { command: String, values: Vec<String> },

    #[error("option '{0}' does not accept any values")]
    ValuesNotAccepted(String),

    #[error("invalid value \"{value}\" for option '{option}'")]
    InvalidValue { option: String, value: String },

    #[error("unknown mode for memory parsing: {0}")]
    UnknownMode(String),

    #[error("unrecognized metric \"{metric}\": accepted metrics are {}", .accepted.join(", "))]
    UnknownMetric {
        metric: String,
        accepted: Vec<String>,
    },

    #[error("unrecognized output format \"{0}\": accepted formats are grouped, flat")]
    UnknownFormat(String),

    #[error("invalid addons: {}", json_list(.0))]
    InvalidAddons(Vec<String>),

    #[error("source label \"{0}\" is reserved for the suite name")]
    ReservedSourceLabel(String),

    #[error("failed to parse: no sources specified in {0}")]
    NoSources(String),

    #[error("\"{program}\" process exited with code {code}")]
    ProcessExited { program: String, code: i32 },
}

fn quote_list(values: &[String]) -> String {
    values
        .iter()
        .map(|value| format!("\"{}\"", value))
        .collect::<Vec<_>>()
        .join(", ")
}

fn json_list(values: &[String]) -> String {
    values
        .iter()
        .map(|value| serde_json::to_string(value).unwrap_or_else(|_| value.clone()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unassigned_values_lists_every_value() {
        let err = CliError::UnassignedValues {
            command: "drop".into(),
            values: vec!["a".into(), "b".into()],
        };
        assert_eq!(
            err.to_string(),
            "no default option for command 'drop'; the following values were given without an option name: \"a\", \"b\""
        );
    }

    #[test]
    fn invalid_addons_are_json_quoted() {
        let err = CliError::InvalidAddons(vec!["nope".into(), "bad\"one".into()]);
        assert_eq!(err.to_string(), "invalid addons: \"nope\", \"bad\\\"one\"");
    }
}
