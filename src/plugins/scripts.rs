// src/plugins/scripts.rs

//! # Scripts
//!
//! Binds shell commands to lifecycle hooks and adds script-backed commands,
//! both declared under `custom.scripts`:
//!
//! ```yaml
//! plugins:
//!   - scripts
//! custom:
//!   scripts:
//!     hooks:
//!       before:deploy:deploy: npm run build
//!     commands:
//!       hello: echo hello
//!       migrate:
//!         usage: Runs database migrations
//!         command: ./bin/migrate --stage ${opt:stage, 'dev'} --steps ${opt:steps, 1}
//!         options:
//!           steps: { type: string, usage: Steps to apply, default: "1" }
//! ```
//!
//! Which hooks and commands exist is read from the raw description at load
//! time. The command lines themselves are read from the resolved
//! configuration when the hook fires, so they may contain variables.

use crate::core::config_loader::ServiceDescription;
use crate::core::context::ExecutionContext;
use crate::core::dispatcher::HookCall;
use crate::core::lifecycle::HookKey;
use crate::core::plugin::Plugin;
use crate::core::variables::path::PropertyPath;
use crate::models::{CommandSpec, OptionSpec};
use crate::system::executor;
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

pub const NAME: &str = "scripts";

/// Lifecycle event of every script-backed command.
const RUN_EVENT: &str = "run";

#[derive(Debug, Clone)]
struct ScriptCommand {
    name: String,
    usage: Option<String>,
    options: BTreeMap<String, OptionSpec>,
}

#[derive(Debug)]
pub struct ScriptsPlugin {
    commands: Vec<ScriptCommand>,
    /// Each bound hook and where its command line lives in the configuration.
    bindings: Vec<(HookKey, PropertyPath)>,
}

impl ScriptsPlugin {
    pub fn from_service(service: &ServiceDescription) -> Result<Self> {
        let base = PropertyPath::root().child_key("custom").child_key("scripts");
        let mut plugin = Self {
            commands: Vec::new(),
            bindings: Vec::new(),
        };

        match base.child_key("hooks").lookup(&service.raw) {
            None | Some(Value::Null) => {}
            Some(Value::Object(hooks)) => {
                for key in hooks.keys() {
                    let hook: HookKey = key
                        .parse()
                        .with_context(|| format!("Invalid hook \"{}\" in custom.scripts.hooks", key))?;
                    plugin.bindings.push((hook, base.child_key("hooks").child_key(key)));
                }
            }
            Some(_) => bail!("\"custom.scripts.hooks\" must be a map of hook names to commands."),
        }

        match base.child_key("commands").lookup(&service.raw) {
            None | Some(Value::Null) => {}
            Some(Value::Object(commands)) => {
                for (name, definition) in commands {
                    let usage = definition.get("usage").and_then(Value::as_str).map(str::to_string);
                    let options = match definition.get("options") {
                        Some(options) => serde_json::from_value(options.clone())
                            .with_context(|| format!("Invalid options for script command \"{}\"", name))?,
                        None => BTreeMap::new(),
                    };
                    plugin.commands.push(ScriptCommand {
                        name: name.clone(),
                        usage,
                        options,
                    });
                    plugin.bindings.push((
                        HookKey::during(&format!("{}:{}", name, RUN_EVENT)),
                        base.child_key("commands").child_key(name),
                    ));
                }
            }
            Some(_) => bail!("\"custom.scripts.commands\" must be a map of command names to commands."),
        }

        log::debug!(
            "Scripts plugin bound {} hooks and {} commands.",
            plugin.bindings.len() - plugin.commands.len(),
            plugin.commands.len()
        );
        Ok(plugin)
    }
}

#[async_trait]
impl Plugin for ScriptsPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn commands(&self) -> Vec<CommandSpec> {
        self.commands
            .iter()
            .map(|command| {
                let usage = command
                    .usage
                    .clone()
                    .unwrap_or_else(|| format!("Runs the '{}' script", command.name));
                let spec = CommandSpec::new(&command.name)
                    .usage(&usage)
                    .lifecycle_events(&[RUN_EVENT])
                    .passthrough();
                command
                    .options
                    .iter()
                    .fold(spec, |spec, (name, option)| spec.option(name, option.clone()))
            })
            .collect()
    }

    fn hooks(&self) -> Vec<HookKey> {
        self.bindings.iter().map(|(hook, _)| hook.clone()).collect()
    }

    async fn run_hook(&self, hook: &HookKey, call: HookCall<'_>) -> Result<()> {
        let ctx = call.ctx;
        let Some((_, path)) = self.bindings.iter().find(|(bound, _)| bound == hook) else {
            return Ok(());
        };
        let is_command = self
            .commands
            .iter()
            .any(|c| *hook == HookKey::during(&format!("{}:{}", c.name, RUN_EVENT)));

        let mut lines = command_lines(&ctx.configuration, path)?;
        if is_command && !ctx.free_args.is_empty() {
            // Free arguments extend the last command line.
            if let Some(last) = lines.last_mut() {
                let quoted = shlex::try_join(ctx.free_args.iter().map(String::as_str))
                    .map_err(|e| anyhow!("Cannot quote script arguments: {}", e))?;
                last.push(' ');
                last.push_str(&quoted);
            }
        }

        let env = script_env(ctx);
        for line in lines {
            log::info!("Running script for '{}': {}", hook, line);
            executor::execute_command(&line, ctx.service_dir(), &env).await?;
        }
        Ok(())
    }
}

/// The command lines at `path`: a string, a list of strings, or a map with a
/// `command` entry holding either.
fn command_lines(configuration: &Value, path: &PropertyPath) -> Result<Vec<String>> {
    let value = path
        .lookup(configuration)
        .ok_or_else(|| anyhow!("Script \"{}\" is missing from the configuration.", path))?;
    let value = match value {
        Value::Object(map) => map
            .get("command")
            .ok_or_else(|| anyhow!("Script \"{}\" has no \"command\".", path))?,
        other => other,
    };
    match value {
        Value::String(line) => Ok(vec![line.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| anyhow!("Script \"{}\" must only list strings.", path))
            })
            .collect(),
        _ => bail!("Script \"{}\" must be a string or a list of strings.", path),
    }
}

/// Variables exported to every script.
fn script_env(ctx: &ExecutionContext) -> HashMap<String, String> {
    let mut env = HashMap::from([
        ("STRATUS_SERVICE".to_string(), ctx.service_name().to_string()),
        ("STRATUS_STAGE".to_string(), ctx.stage()),
    ]);
    if let Some(region) = ctx.region() {
        env.insert("STRATUS_REGION".to_string(), region);
    }
    env
}
