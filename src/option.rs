//! Option definitions and their runtime instances.
//!
//! `OptionSpec` is the declarative definition of a flag, `OptionRegistry` is the
//! catalog every command draws its options from, and `LiveOption` holds the
//! values collected for one option during a single command invocation.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::command::Command;
use crate::error::CliError;
use crate::resolver::Resolver;

/// Maps raw option values to their final form (validation, expansion).
pub type ValueParser = Arc<dyn Fn(Vec<String>) -> BoxFuture<'static, Result<Vec<String>>> + Send + Sync>;

/// Runs once per invocation and may rewrite other options of the command.
pub type Effect = Arc<dyn Fn(&mut Command) -> Result<()> + Send + Sync>;

fn boxed_parser<F, Fut>(parser: F) -> ValueParser
where
    F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<String>>> + Send + 'static,
{
    Arc::new(move |values| parser(values).boxed())
}

fn owned_strings<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

/// Declarative definition of a named option.
#[derive(Clone, Default)]
pub struct OptionSpec {
    /// Unique key in the registry.
    pub name: String,
    /// Alternate names accepted in long form.
    pub aliases: Vec<String>,
    /// Name accepted in short form (`-x`).
    pub short: Option<String>,
    /// Flag emitted before the values when building the server arguments.
    pub flag: Option<String>,
    /// Values used when the option is never given explicitly.
    pub default: Option<Resolver<Vec<String>>>,
    /// Fail the invocation when absent and without default.
    pub required: bool,
    /// Boolean toggle: accepts no values.
    pub standalone: bool,
    /// Each occurrence of the flag takes at most one value; further bare
    /// values fall through to the positional list.
    pub single_value: bool,
    pub parser: Option<ValueParser>,
    pub effect: Option<Effect>,
    /// Attached to every command, listed or not.
    pub auto_include: bool,
}

impl OptionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = owned_strings(aliases);
        self
    }

    pub fn short(mut self, short: impl Into<String>) -> Self {
        self.short = Some(short.into());
        self
    }

    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.flag = Some(flag.into());
        self
    }

    pub fn default_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default = Some(Resolver::strings(values));
        self
    }

    pub fn default_with(mut self, resolver: Resolver<Vec<String>>) -> Self {
        self.default = Some(resolver);
        self
    }

    pub fn standalone(mut self) -> Self {
        self.standalone = true;
        self
    }

    pub fn single_value(mut self) -> Self {
        self.single_value = true;
        self
    }

    pub fn auto_include(mut self) -> Self {
        self.auto_include = true;
        self
    }

    pub fn parser<F, Fut>(mut self, parser: F) -> Self
    where
        F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<String>>> + Send + 'static,
    {
        self.parser = Some(boxed_parser(parser));
        self
    }

    pub fn effect<F>(mut self, effect: F) -> Self
    where
        F: Fn(&mut Command) -> Result<()> + Send + Sync + 'static,
    {
        self.effect = Some(Arc::new(effect));
        self
    }

    /// Whether `token` names this option in the given form.
    pub fn matches(&self, token: &str, form: OptionForm) -> bool {
        match form {
            OptionForm::Short => self
                .short
                .as_deref()
                .is_some_and(|short| short.eq_ignore_ascii_case(token)),
            OptionForm::Long => {
                self.name.eq_ignore_ascii_case(token)
                    || self.aliases.iter().any(|alias| alias.eq_ignore_ascii_case(token))
            }
        }
    }
}

impl fmt::Debug for OptionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionSpec")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("short", &self.short)
            .field("flag", &self.flag)
            .field("default", &self.default)
            .field("required", &self.required)
            .field("standalone", &self.standalone)
            .field("single_value", &self.single_value)
            .field("parser", &self.parser.is_some())
            .field("effect", &self.effect.is_some())
            .field("auto_include", &self.auto_include)
            .finish()
    }
}

/// Partial definition applied on top of an existing `OptionSpec`.
///
/// Unset fields keep the value of the definition being overridden.
#[derive(Clone, Default)]
pub struct OptionOverride {
    aliases: Option<Vec<String>>,
    short: Option<String>,
    flag: Option<String>,
    default: Option<Option<Resolver<Vec<String>>>>,
    required: Option<bool>,
    standalone: Option<bool>,
    parser: Option<ValueParser>,
    effect: Option<Effect>,
}

impl OptionOverride {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = Some(owned_strings(aliases));
        self
    }

    pub fn short(mut self, short: impl Into<String>) -> Self {
        self.short = Some(short.into());
        self
    }

    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.flag = Some(flag.into());
        self
    }

    pub fn default_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default = Some(Some(Resolver::strings(values)));
        self
    }

    /// Removes the default of the overridden definition.
    pub fn no_default(mut self) -> Self {
        self.default = Some(None);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = Some(true);
        self
    }

    pub fn standalone(mut self) -> Self {
        self.standalone = Some(true);
        self
    }

    pub fn parser<F, Fut>(mut self, parser: F) -> Self
    where
        F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<String>>> + Send + 'static,
    {
        self.parser = Some(boxed_parser(parser));
        self
    }

    pub fn effect<F>(mut self, effect: F) -> Self
    where
        F: Fn(&mut Command) -> Result<()> + Send + Sync + 'static,
    {
        self.effect = Some(Arc::new(effect));
        self
    }

    fn apply(self, mut base: OptionSpec) -> OptionSpec {
        if let Some(aliases) = self.aliases {
            base.aliases = aliases;
        }
        if let Some(short) = self.short {
            base.short = Some(short);
        }
        if let Some(flag) = self.flag {
            base.flag = Some(flag);
        }
        if let Some(default) = self.default {
            base.default = default;
        }
        if let Some(required) = self.required {
            base.required = required;
        }
        if let Some(standalone) = self.standalone {
            base.standalone = standalone;
        }
        if let Some(parser) = self.parser {
            base.parser = Some(parser);
        }
        if let Some(effect) = self.effect {
            base.effect = Some(effect);
        }
        base
    }
}

/// Reference to option definitions from a command definition.
#[derive(Clone)]
pub enum OptionRef {
    /// An existing definition, as registered.
    ByName(String),
    /// A definition with a partial override on top (or a new one when the
    /// name has no registered definition).
    Override(String, Option<OptionOverride>),
    /// Every definition registered at resolution time.
    AllRegistered,
}

impl OptionRef {
    pub fn name(name: impl Into<String>) -> Self {
        OptionRef::ByName(name.into())
    }

    pub fn with(name: impl Into<String>, patch: OptionOverride) -> Self {
        OptionRef::Override(name.into(), Some(patch))
    }
}

impl From<&str> for OptionRef {
    fn from(value: &str) -> Self {
        if value == "*" {
            OptionRef::AllRegistered
        } else {
            OptionRef::ByName(value.to_string())
        }
    }
}

/// Catalog of option definitions, keyed by name in registration order.
#[derive(Clone, Default)]
pub struct OptionRegistry {
    specs: Vec<OptionSpec>,
}

impl OptionRegistry {
    /// Stores a definition, replacing any previous one with the same name.
    pub fn register(&mut self, spec: OptionSpec) {
        match self.specs.iter_mut().find(|existing| existing.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.specs.push(spec),
        }
    }

    pub fn get(&self, name: &str) -> Option<&OptionSpec> {
        self.specs.iter().find(|spec| spec.name == name)
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &OptionSpec> {
        self.specs.iter()
    }

    /// Expands option references into fully merged definitions.
    ///
    /// References are consumed from a FIFO queue; the wildcard is replaced in
    /// place by every registered name, which then goes through the same merge
    /// as explicit references. Auto-included definitions are appended last
    /// when not already present.
    pub fn resolve<I>(&self, refs: I) -> Vec<OptionSpec>
    where
        I: IntoIterator<Item = OptionRef>,
    {
        let mut queue: VecDeque<OptionRef> = refs.into_iter().collect();
        let mut resolved: Vec<OptionSpec> = Vec::new();

        while let Some(entry) = queue.pop_front() {
            let (name, patch) = match entry {
                OptionRef::AllRegistered => {
                    for spec in self.specs.iter().rev() {
                        queue.push_front(OptionRef::ByName(spec.name.clone()));
                    }
                    continue;
                }
                OptionRef::ByName(name) => (name, None),
                OptionRef::Override(name, patch) => (name, patch),
            };

            let position = resolved.iter().position(|spec| spec.name == name);
            let base = match position {
                Some(idx) => resolved[idx].clone(),
                None => self
                    .get(&name)
                    .cloned()
                    .unwrap_or_else(|| OptionSpec::new(name.as_str())),
            };
            let mut merged = match patch {
                Some(patch) => patch.apply(base),
                None => base,
            };
            merged.name = name;
            match position {
                Some(idx) => resolved[idx] = merged,
                None => resolved.push(merged),
            }
        }

        for spec in self.specs.iter().filter(|spec| spec.auto_include) {
            if !resolved.iter().any(|existing| existing.name == spec.name) {
                resolved.push(spec.clone());
            }
        }
        resolved
    }
}

/// Textual form used to reference an option on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionForm {
    Short,
    Long,
}

/// An option referenced during one invocation, with its collected values.
#[derive(Debug, Clone)]
pub struct LiveOption {
    spec: OptionSpec,
    form: OptionForm,
    values: Vec<String>,
}

impl LiveOption {
    pub fn new(spec: OptionSpec, form: OptionForm) -> Self {
        Self {
            spec,
            form,
            values: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &OptionSpec {
        &self.spec
    }

    /// The option as first referenced: `-x` or `--name`.
    pub fn invoked_as(&self) -> String {
        match (self.form, &self.spec.short) {
            (OptionForm::Short, Some(short)) => format!("-{}", short),
            _ => format!("--{}", self.spec.name),
        }
    }

    pub fn accepts_values(&self) -> bool {
        !self.spec.standalone
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn first_value(&self) -> Option<&str> {
        self.values.first().map(String::as_str)
    }

    /// Appends values given on the command line or by a default.
    pub fn add_values<I, S>(&mut self, values: I) -> Result<(), CliError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut values = values.into_iter().peekable();
        if values.peek().is_some() && !self.accepts_values() {
            return Err(CliError::ValuesNotAccepted(self.invoked_as()));
        }
        self.values.extend(values.map(Into::into));
        Ok(())
    }

    /// Replaces the values outright. Used by parsers and effects.
    pub fn set_values(&mut self, values: Vec<String>) {
        self.values = values;
    }
}
