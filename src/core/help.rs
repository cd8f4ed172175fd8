// src/core/help.rs

//! Usage text rendered from the merged command tree.

use crate::core::commands::{Command, CommandRegistry};
use crate::models::{OptionKind, OptionSpec};
use colored::*;
use std::collections::BTreeMap;

const PROGRAM: &str = env!("CARGO_PKG_NAME");

/// Renders help for the command at `path`, or the command overview when
/// `path` is empty or unknown.
pub fn render(registry: &CommandRegistry, path: &[String]) -> String {
    match registry.get(path, false) {
        Ok(command) if !command.is_root() => render_command(registry, command),
        _ => render_root(registry),
    }
}

fn render_root(registry: &CommandRegistry) -> String {
    let mut lines = vec![
        format!("{} {} <command> [options]", "Usage:".bold(), PROGRAM),
        String::new(),
        "Commands:".bold().to_string(),
    ];
    let aliases = aliases_by_target(registry);
    for command in registry.root().visible_commands() {
        push_command_tree(&mut lines, command, &aliases, 1);
    }

    lines.push(String::new());
    lines.push("Global options:".bold().to_string());
    push_options(&mut lines, &registry.root().options);
    lines.push(String::new());
    lines.push(format!(
        "Run '{} <command> --help' for details on a command.",
        PROGRAM
    ));
    lines.join("\n")
}

fn render_command(registry: &CommandRegistry, command: &Command) -> String {
    let mut lines = vec![format!(
        "{} {} {} [options]",
        "Usage:".bold(),
        PROGRAM,
        command.display_name()
    )];
    if let Some(usage) = &command.usage {
        lines.push(String::new());
        lines.push(usage.clone());
    }

    let aliases = aliases_by_target(registry);
    if let Some(names) = aliases.get(command.key.as_str()) {
        lines.push(String::new());
        lines.push(format!("{} {}", "Aliases:".bold(), names.join(", ")));
    }

    if !command.options.is_empty() {
        lines.push(String::new());
        lines.push("Options:".bold().to_string());
        push_options(&mut lines, &command.options);
    }

    let subcommands: Vec<&Command> = command.visible_commands().collect();
    if !subcommands.is_empty() {
        lines.push(String::new());
        lines.push("Subcommands:".bold().to_string());
        for sub in subcommands {
            push_command_tree(&mut lines, sub, &aliases, 1);
        }
    }

    lines.push(String::new());
    lines.push("Global options:".bold().to_string());
    push_options(&mut lines, &registry.root().options);
    lines.join("\n")
}

fn aliases_by_target(registry: &CommandRegistry) -> BTreeMap<&str, Vec<String>> {
    let mut by_target: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (alias, target) in registry.aliases() {
        by_target
            .entry(target.as_str())
            .or_default()
            .push(alias.replace(':', " "));
    }
    by_target
}

fn push_command_tree(
    lines: &mut Vec<String>,
    command: &Command,
    aliases: &BTreeMap<&str, Vec<String>>,
    depth: usize,
) {
    let indent = "  ".repeat(depth);
    let mut name = command.display_name().cyan().to_string();
    if let Some(names) = aliases.get(command.key.as_str()) {
        name = format!("{} ({})", name, names.join(", "));
    }
    lines.push(format!(
        "{}{:<30} {}",
        indent,
        name,
        command.usage.as_deref().unwrap_or_default()
    ));
    for sub in command.visible_commands() {
        push_command_tree(lines, sub, aliases, depth + 1);
    }
}

fn push_options(lines: &mut Vec<String>, options: &BTreeMap<String, OptionSpec>) {
    for (name, spec) in options {
        let mut flag = format!("--{}", name);
        if let Some(shortcut) = &spec.shortcut {
            flag.push_str(&format!(" / -{}", shortcut));
        }
        if spec.kind != OptionKind::Boolean {
            flag.push_str(" <value>");
        }

        let mut description = spec.usage.clone().unwrap_or_default();
        if spec.required {
            description.push_str(&format!(" {}", "(required)".red()));
        }
        if let Some(default) = &spec.default {
            description.push_str(&format!(" (default: {})", default));
        }
        if spec.kind == OptionKind::Multiple {
            description.push_str(" (repeatable)");
        }
        lines.push(format!("  {:<30} {}", flag.yellow(), description));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CommandSpec, OptionSpec};

    fn registry() -> CommandRegistry {
        let mut registry = CommandRegistry::new();
        registry
            .register(
                "Deploy",
                &CommandSpec::new("deploy")
                    .usage("Deploy the service")
                    .alias("d")
                    .lifecycle_events(&["deploy"])
                    .subcommand(
                        CommandSpec::new("function")
                            .usage("Deploy one function")
                            .lifecycle_events(&["deploy"])
                            .option(
                                "function",
                                OptionSpec::string("Function name").shortcut("f").required(),
                            ),
                    ),
            )
            .unwrap();
        registry
    }

    #[test]
    fn root_help_lists_commands_and_aliases() {
        colored::control::set_override(false);
        let text = render(&registry(), &[]);
        assert!(text.contains("Usage: stratus <command> [options]"));
        assert!(text.contains("deploy (d)"));
        assert!(text.contains("deploy function"));
        assert!(text.contains("--help / -h"));
    }

    #[test]
    fn command_help_shows_its_options() {
        colored::control::set_override(false);
        let path = vec!["deploy".to_string(), "function".to_string()];
        let text = render(&registry(), &path);
        assert!(text.contains("Usage: stratus deploy function [options]"));
        assert!(text.contains("Deploy one function"));
        assert!(text.contains("--function / -f <value>"));
        assert!(text.contains("(required)"));
    }
}
