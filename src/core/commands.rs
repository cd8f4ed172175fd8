// src/core/commands.rs

//! # Command Registry
//!
//! Holds the merged tree of commands contributed by every loaded plugin and
//! turns raw command-line arguments into a resolved [`Invocation`].
//!
//! Declarations for the same command path coming from different plugins are
//! merged as long as they agree on shape: options are united, subcommands are
//! merged recursively and the lifecycle event list is taken from whichever
//! declaration provides one. Two different non-empty lifecycle lists, two
//! different kinds, or two different definitions of the same option are a
//! collision.

use crate::core::arg_parser::{ArgCursor, ArgToken};
use crate::models::{CommandKind, CommandSpec, OptionKind, OptionSpec, Options};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Invalid command name \"{name}\" declared by plugin \"{plugin}\".")]
    InvalidName { name: String, plugin: String },
    #[error(
        "Command \"{key}\" declared by plugin \"{plugin}\" collides with the declaration from plugin \"{existing}\": {reason}"
    )]
    Collision {
        key: String,
        plugin: String,
        existing: String,
        reason: String,
    },
    #[error("Command \"{alias}\" cannot be overridden by an alias.")]
    AliasShadowsCommand { alias: String },
    #[error("Alias \"{alias}\" is already defined for command \"{target}\".")]
    DuplicateAlias { alias: String, target: String },
    #[error("Command \"{key}\" cannot override an existing alias.")]
    CommandShadowsAlias { key: String },
    #[error("Unrecognized command \"{command}\".")]
    UnknownCommand { command: String },
    #[error("Unrecognized option \"{option}\" for command \"{command}\".")]
    UnknownOption { option: String, command: String },
    #[error("Unexpected argument \"{argument}\" for command \"{command}\".")]
    UnexpectedArgument { argument: String, command: String },
    #[error("Option \"--{option}\" of command \"{command}\" expects a value.")]
    MissingOptionValue { option: String, command: String },
    #[error("Invalid value \"{value}\" for boolean option \"--{option}\".")]
    InvalidBoolean { option: String, value: String },
    #[error("Missing required option \"--{option}\" for command \"{command}\".")]
    MissingRequiredOption { option: String, command: String },
}

impl CommandError {
    /// Usage errors are caused by what the user typed, as opposed to
    /// registry errors caused by conflicting plugin declarations.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            CommandError::UnknownCommand { .. }
                | CommandError::UnknownOption { .. }
                | CommandError::UnexpectedArgument { .. }
                | CommandError::MissingOptionValue { .. }
                | CommandError::InvalidBoolean { .. }
                | CommandError::MissingRequiredOption { .. }
        )
    }
}

/// A node of the merged command tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Colon-joined path from the root, e.g. `deploy:function`.
    pub key: String,
    pub name: String,
    pub usage: Option<String>,
    pub kind: CommandKind,
    /// The plugin that declared this command first.
    pub plugin: String,
    pub aliases: Vec<String>,
    pub options: BTreeMap<String, OptionSpec>,
    pub lifecycle_events: Vec<String>,
    pub commands: BTreeMap<String, Command>,
    pub passthrough: bool,
}

impl Command {
    fn from_spec(plugin: &str, parent_key: Option<&str>, spec: &CommandSpec) -> Result<Self, CommandError> {
        if !is_valid_name(&spec.name) {
            return Err(CommandError::InvalidName {
                name: spec.name.clone(),
                plugin: plugin.to_string(),
            });
        }
        let key = match parent_key {
            Some(parent) => format!("{}:{}", parent, spec.name),
            None => spec.name.clone(),
        };

        let mut commands = BTreeMap::new();
        for sub in &spec.commands {
            let child = Self::from_spec(plugin, Some(&key), sub)?;
            match commands.get_mut(&child.name) {
                Some(existing) => merge_command(existing, child, plugin)?,
                None => {
                    commands.insert(child.name.clone(), child);
                }
            }
        }

        Ok(Self {
            key,
            name: spec.name.clone(),
            usage: spec.usage.clone(),
            kind: spec.kind,
            plugin: plugin.to_string(),
            aliases: spec.aliases.clone(),
            options: spec.options.clone(),
            lifecycle_events: spec.lifecycle_events.clone(),
            commands,
            passthrough: spec.passthrough,
        })
    }

    /// The command path as individual segments.
    pub fn path(&self) -> Vec<&str> {
        if self.key.is_empty() {
            Vec::new()
        } else {
            self.key.split(':').collect()
        }
    }

    pub fn is_root(&self) -> bool {
        self.key.is_empty()
    }

    /// Subcommands reachable from the command line (entrypoints excluded).
    pub fn visible_commands(&self) -> impl Iterator<Item = &Command> {
        self.commands
            .values()
            .filter(|c| c.kind != CommandKind::Entrypoint)
    }

    /// Human-readable form used in messages, e.g. `deploy function`.
    pub fn display_name(&self) -> String {
        self.key.replace(':', " ")
    }
}

/// The outcome of parsing the command line against the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Run the command at `path` with the parsed options.
    Run(Invocation),
    /// Print help for the command at `path` (the root when empty).
    Help { path: Vec<String> },
    /// Print the program version.
    Version,
}

/// A fully resolved command invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Invocation {
    pub path: Vec<String>,
    pub options: Options,
    /// Extra tokens accepted by passthrough commands.
    pub free_args: Vec<String>,
}

impl Invocation {
    pub fn key(&self) -> String {
        self.path.join(":")
    }
}

/// The merged command tree plus its alias table.
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    root: Command,
    aliases: BTreeMap<String, String>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    /// Creates a registry whose root carries the options every command accepts.
    pub fn new() -> Self {
        let mut options = BTreeMap::new();
        options.insert(
            "help".to_string(),
            OptionSpec::boolean("Show help for the command").shortcut("h"),
        );
        options.insert(
            "version".to_string(),
            OptionSpec::boolean("Show the program version"),
        );
        options.insert(
            "verbose".to_string(),
            OptionSpec::boolean("Show informational log output"),
        );
        options.insert(
            "debug".to_string(),
            OptionSpec::boolean("Show debug log output"),
        );
        options.insert(
            "config".to_string(),
            OptionSpec::string("Path to the service description file").shortcut("c"),
        );
        options.insert(
            "stage".to_string(),
            OptionSpec::string("Stage of the service").shortcut("s"),
        );
        options.insert(
            "region".to_string(),
            OptionSpec::string("Region of the service").shortcut("r"),
        );

        Self {
            root: Command {
                key: String::new(),
                name: String::new(),
                usage: None,
                kind: CommandKind::Container,
                plugin: String::new(),
                aliases: Vec::new(),
                options,
                lifecycle_events: Vec::new(),
                commands: BTreeMap::new(),
                passthrough: false,
            },
            aliases: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &Command {
        &self.root
    }

    pub fn aliases(&self) -> &BTreeMap<String, String> {
        &self.aliases
    }

    // --- REGISTRATION ---

    /// Merges a top-level command declared by `plugin` into the tree.
    pub fn register(&mut self, plugin: &str, spec: &CommandSpec) -> Result<(), CommandError> {
        let command = Command::from_spec(plugin, None, spec)?;
        log::debug!("Registering command '{}' from plugin '{}'.", command.key, plugin);

        self.check_against_aliases(&command)?;
        let mut declared_aliases = Vec::new();
        collect_aliases(&command, &mut declared_aliases);

        // Merge into a copy so a rejected declaration leaves the tree untouched.
        let mut staged = self.clone();
        match staged.root.commands.get_mut(&command.name) {
            Some(existing) => merge_command(existing, command, plugin)?,
            None => {
                staged.root.commands.insert(command.name.clone(), command);
            }
        }
        for (alias, target) in declared_aliases {
            staged.register_alias(&alias, &target)?;
        }

        *self = staged;
        Ok(())
    }

    fn check_against_aliases(&self, command: &Command) -> Result<(), CommandError> {
        if self.aliases.contains_key(&command.key) {
            return Err(CommandError::CommandShadowsAlias {
                key: command.key.clone(),
            });
        }
        command
            .commands
            .values()
            .try_for_each(|sub| self.check_against_aliases(sub))
    }

    fn register_alias(&mut self, alias: &str, target: &str) -> Result<(), CommandError> {
        log::debug!("  -> alias '{}' for '{}'", alias, target);
        if self.lookup_exact(alias, true).is_some() {
            return Err(CommandError::AliasShadowsCommand {
                alias: alias.to_string(),
            });
        }
        match self.aliases.get(alias) {
            Some(existing) if existing == target => Ok(()),
            Some(existing) => Err(CommandError::DuplicateAlias {
                alias: alias.to_string(),
                target: existing.clone(),
            }),
            None => {
                self.aliases.insert(alias.to_string(), target.to_string());
                Ok(())
            }
        }
    }

    // --- LOOKUP ---

    fn lookup_exact(&self, key: &str, allow_entrypoints: bool) -> Option<&Command> {
        let mut node = &self.root;
        for segment in key.split(':') {
            node = node.commands.get(segment)?;
            if node.kind == CommandKind::Entrypoint && !allow_entrypoints {
                return None;
            }
        }
        Some(node)
    }

    /// Finds a command by path, following aliases. Entrypoints are only
    /// returned when `allow_entrypoints` is set.
    pub fn get(&self, path: &[String], allow_entrypoints: bool) -> Result<&Command, CommandError> {
        let key = path.join(":");
        let target = self.aliases.get(&key).map(String::as_str).unwrap_or(&key);
        if target.is_empty() {
            return Ok(&self.root);
        }
        self.lookup_exact(target, allow_entrypoints)
            .ok_or_else(|| CommandError::UnknownCommand {
                command: path.join(" "),
            })
    }

    /// The chain of commands from the root down to `command`, inclusive.
    pub fn ancestry(&self, command: &Command) -> Vec<&Command> {
        let mut chain = vec![&self.root];
        let mut node = &self.root;
        for segment in command.path() {
            match node.commands.get(segment) {
                Some(next) => {
                    chain.push(next);
                    node = next;
                }
                None => break,
            }
        }
        chain
    }

    // --- ARGUMENT RESOLUTION ---

    /// Resolves raw arguments (without the program name) to a command and
    /// its options.
    pub fn resolve(&self, argv: &[String]) -> Result<Resolution, CommandError> {
        let mut cursor = ArgCursor::new(argv);
        let mut path: Vec<String> = Vec::new();
        let mut node = &self.root;

        // Consume leading words while they name a subcommand or an alias.
        while let Some(ArgToken::Word(word)) = cursor.peek() {
            if let Some(child) = node
                .commands
                .get(word)
                .filter(|c| c.kind != CommandKind::Entrypoint)
            {
                path.push(word.to_string());
                node = child;
                cursor.advance();
                continue;
            }

            let candidate = path
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(word))
                .collect::<Vec<_>>()
                .join(":");
            if let Some(target) = self.aliases.get(&candidate) {
                if let Some(aliased) = self.lookup_exact(target, false) {
                    path = target.split(':').map(str::to_string).collect();
                    node = aliased;
                    cursor.advance();
                    continue;
                }
            }
            break;
        }

        let chain = self.ancestry(node);
        let mut options = Options::new();
        let mut free_args = Vec::new();
        let command_name = if path.is_empty() {
            word_or_root(&cursor)
        } else {
            path.join(" ")
        };

        while let Some(token) = cursor.advance() {
            match token {
                ArgToken::Word(word) => {
                    if node.passthrough {
                        free_args.push(word.to_string());
                    } else if node.is_root() || !node.commands.is_empty() {
                        let mut attempted = path.clone();
                        attempted.push(word.to_string());
                        return Err(CommandError::UnknownCommand {
                            command: attempted.join(" "),
                        });
                    } else {
                        return Err(CommandError::UnexpectedArgument {
                            argument: word.to_string(),
                            command: command_name,
                        });
                    }
                }
                ArgToken::Separator => {
                    while let Some(rest) = cursor.advance() {
                        let rest = rest.display();
                        if !node.passthrough {
                            return Err(CommandError::UnexpectedArgument {
                                argument: rest,
                                command: command_name,
                            });
                        }
                        free_args.push(rest);
                    }
                }
                ArgToken::Long { name, inline } | ArgToken::Short { name, inline } => {
                    let is_short = matches!(token, ArgToken::Short { .. });
                    let found = if is_short {
                        find_by_shortcut(&chain, name)
                    } else {
                        find_by_name(&chain, name)
                    };

                    let Some((long_name, spec)) = found else {
                        if node.passthrough {
                            free_args.push(token.display());
                            continue;
                        }
                        return Err(CommandError::UnknownOption {
                            option: token.display(),
                            command: command_name,
                        });
                    };

                    if long_name == "help" {
                        return Ok(Resolution::Help { path });
                    }
                    if long_name == "version" && path.is_empty() {
                        return Ok(Resolution::Version);
                    }

                    let value = read_option_value(&mut cursor, long_name, spec, inline, &command_name)?;
                    match spec.kind {
                        OptionKind::Multiple => {
                            let entry = options
                                .entry(long_name.to_string())
                                .or_insert_with(|| Value::Array(Vec::new()));
                            if let Value::Array(items) = entry {
                                items.push(value);
                            }
                        }
                        _ => {
                            options.insert(long_name.to_string(), value);
                        }
                    }
                }
            }
        }

        if path.is_empty() || node.kind == CommandKind::Container {
            return Ok(Resolution::Help { path });
        }

        // Defaults first, then the required check, so a required option with a
        // default is always satisfied.
        for command in &chain {
            for (name, spec) in &command.options {
                if options.contains_key(name) {
                    continue;
                }
                if let Some(default) = &spec.default {
                    options.insert(name.clone(), default.clone());
                } else if spec.required {
                    return Err(CommandError::MissingRequiredOption {
                        option: name.clone(),
                        command: command_name,
                    });
                }
            }
        }

        Ok(Resolution::Run(Invocation {
            path,
            options,
            free_args,
        }))
    }
}

// --- HELPERS ---

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn word_or_root(cursor: &ArgCursor<'_>) -> String {
    match cursor.peek() {
        Some(ArgToken::Word(w)) => w.to_string(),
        _ => String::new(),
    }
}

fn collect_aliases(command: &Command, out: &mut Vec<(String, String)>) {
    for alias in &command.aliases {
        out.push((alias.clone(), command.key.clone()));
    }
    for sub in command.commands.values() {
        collect_aliases(sub, out);
    }
}

fn find_by_name<'a>(chain: &[&'a Command], name: &str) -> Option<(&'a str, &'a OptionSpec)> {
    chain
        .iter()
        .rev()
        .find_map(|c| c.options.get_key_value(name))
        .map(|(k, v)| (k.as_str(), v))
}

fn find_by_shortcut<'a>(chain: &[&'a Command], shortcut: &str) -> Option<(&'a str, &'a OptionSpec)> {
    chain.iter().rev().find_map(|c| {
        c.options
            .iter()
            .find(|(_, spec)| spec.shortcut.as_deref() == Some(shortcut))
            .map(|(k, v)| (k.as_str(), v))
    })
}

fn read_option_value(
    cursor: &mut ArgCursor<'_>,
    name: &str,
    spec: &OptionSpec,
    inline: Option<&str>,
    command: &str,
) -> Result<Value, CommandError> {
    match spec.kind {
        OptionKind::Boolean => match inline {
            None => Ok(Value::Bool(true)),
            Some("true") | Some("1") => Ok(Value::Bool(true)),
            Some("false") | Some("0") => Ok(Value::Bool(false)),
            Some(other) => Err(CommandError::InvalidBoolean {
                option: name.to_string(),
                value: other.to_string(),
            }),
        },
        OptionKind::String | OptionKind::Multiple => inline
            .or_else(|| cursor.next_word())
            .map(|v| Value::String(v.to_string()))
            .ok_or_else(|| CommandError::MissingOptionValue {
                option: name.to_string(),
                command: command.to_string(),
            }),
    }
}

/// Merges `incoming` into `existing`, both describing the same command path.
fn merge_command(existing: &mut Command, incoming: Command, plugin: &str) -> Result<(), CommandError> {
    let collision = |reason: String| CommandError::Collision {
        key: existing.key.clone(),
        plugin: plugin.to_string(),
        existing: existing.plugin.clone(),
        reason,
    };

    if existing.kind != incoming.kind {
        return Err(collision(format!(
            "declared as {:?} and as {:?}",
            existing.kind, incoming.kind
        )));
    }
    if !existing.lifecycle_events.is_empty()
        && !incoming.lifecycle_events.is_empty()
        && existing.lifecycle_events != incoming.lifecycle_events
    {
        return Err(collision(format!(
            "lifecycle events [{}] differ from [{}]",
            incoming.lifecycle_events.join(", "),
            existing.lifecycle_events.join(", ")
        )));
    }
    for (name, spec) in &incoming.options {
        if let Some(current) = existing.options.get(name) {
            if current != spec {
                return Err(collision(format!("option \"--{}\" is declared differently", name)));
            }
        }
    }

    if existing.lifecycle_events.is_empty() {
        existing.lifecycle_events = incoming.lifecycle_events;
    }
    existing.usage = existing.usage.take().or(incoming.usage);
    existing.passthrough |= incoming.passthrough;
    for alias in incoming.aliases {
        if !existing.aliases.contains(&alias) {
            existing.aliases.push(alias);
        }
    }
    existing.options.extend(incoming.options);

    for (name, child) in incoming.commands {
        match existing.commands.get_mut(&name) {
            Some(current) => merge_command(current, child, plugin)?,
            None => {
                existing.commands.insert(name, child);
            }
        }
    }
    Ok(())
}
