// src/models.rs

//! Declarative shapes shared between plugins and the core: the command
//! declarations a plugin contributes and the option values a resolved command
//! carries into its hooks.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Option values of a resolved command, keyed by the option's long name.
pub type Options = BTreeMap<String, Value>;

// --- COMMAND DECLARATIONS ---

/// How a command participates in the CLI surface.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    /// A normal, user-invocable command.
    #[default]
    Regular,
    /// Groups subcommands; invoking it directly prints its help.
    Container,
    /// Hidden from the CLI; only reachable through `spawn` from a hook.
    Entrypoint,
}

/// The value shape an option accepts on the command line.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    /// `--name value`
    #[default]
    String,
    /// `--name` (or `--name=false`)
    Boolean,
    /// `--name a --name b`, collected into a list.
    Multiple,
}

/// Declaration of a single command option.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct OptionSpec {
    pub usage: Option<String>,
    #[serde(default)]
    pub required: bool,
    pub shortcut: Option<String>,
    pub default: Option<Value>,
    #[serde(default, rename = "type")]
    pub kind: OptionKind,
}

impl OptionSpec {
    pub fn string(usage: &str) -> Self {
        Self {
            usage: Some(usage.to_string()),
            kind: OptionKind::String,
            ..Default::default()
        }
    }

    pub fn boolean(usage: &str) -> Self {
        Self {
            usage: Some(usage.to_string()),
            kind: OptionKind::Boolean,
            ..Default::default()
        }
    }

    pub fn multiple(usage: &str) -> Self {
        Self {
            usage: Some(usage.to_string()),
            kind: OptionKind::Multiple,
            ..Default::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn shortcut(mut self, shortcut: &str) -> Self {
        self.shortcut = Some(shortcut.to_string());
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// A command as declared by one plugin. Declarations from several plugins
/// for the same command path are merged by the command registry.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CommandSpec {
    pub name: String,
    pub usage: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: CommandKind,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub options: BTreeMap<String, OptionSpec>,
    #[serde(default, rename = "lifecycleEvents")]
    pub lifecycle_events: Vec<String>,
    #[serde(default)]
    pub commands: Vec<CommandSpec>,
    #[serde(default)]
    pub passthrough: bool,
}

impl CommandSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn usage(mut self, usage: &str) -> Self {
        self.usage = Some(usage.to_string());
        self
    }

    pub fn kind(mut self, kind: CommandKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self
    }

    pub fn option(mut self, name: &str, spec: OptionSpec) -> Self {
        self.options.insert(name.to_string(), spec);
        self
    }

    pub fn lifecycle_events(mut self, events: &[&str]) -> Self {
        self.lifecycle_events = events.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn subcommand(mut self, command: CommandSpec) -> Self {
        self.commands.push(command);
        self
    }

    pub fn passthrough(mut self) -> Self {
        self.passthrough = true;
        self
    }
}
