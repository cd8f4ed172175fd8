// src/plugins/print.rs

//! `stratus print`: the resolved configuration, or one property of it.

use crate::core::dispatcher::HookCall;
use crate::core::lifecycle::HookKey;
use crate::core::plugin::Plugin;
use crate::core::variables::path::PropertyPath;
use crate::models::{CommandSpec, OptionSpec};
use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::Value;

pub const NAME: &str = "Print";

#[derive(Debug, Default)]
pub struct PrintPlugin;

#[async_trait]
impl Plugin for PrintPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("print")
                .usage("Prints the service configuration with all variables resolved")
                .lifecycle_events(&["print"])
                .option("path", OptionSpec::string("Dotted path of the property to print"))
                .option(
                    "format",
                    OptionSpec::string("Output format: yaml, json or text").default_value("yaml"),
                ),
        ]
    }

    fn hooks(&self) -> Vec<HookKey> {
        vec![HookKey::during("print:print")]
    }

    async fn run_hook(&self, _hook: &HookKey, call: HookCall<'_>) -> Result<()> {
        let ctx = call.ctx;
        let output = render(
            &ctx.configuration,
            ctx.option_str("path"),
            ctx.option_str("format").unwrap_or("yaml"),
        )?;
        println!("{}", output.trim_end());
        Ok(())
    }
}

/// Renders the configuration, or the property at `path`, in `format`.
pub fn render(configuration: &Value, path: Option<&str>, format: &str) -> Result<String> {
    let value = match path {
        Some(path) => PropertyPath::parse_dotted(path)
            .lookup(configuration)
            .ok_or_else(|| anyhow!("Path \"{}\" does not exist in the configuration.", path))?,
        None => configuration,
    };

    match format {
        "yaml" => Ok(serde_yaml_ng::to_string(value)?),
        "json" => Ok(serde_json::to_string_pretty(value)?),
        "text" => match value {
            Value::String(s) => Ok(s.clone()),
            Value::Array(items) if items.iter().all(|i| !i.is_object() && !i.is_array()) => {
                Ok(items.iter().map(scalar_text).collect::<Vec<_>>().join("\n"))
            }
            Value::Array(_) | Value::Object(_) => {
                bail!("Format \"text\" can only print scalars and lists of scalars; use yaml or json.")
            }
            other => Ok(scalar_text(other)),
        },
        other => bail!("Unknown format \"{}\". Use one of: yaml, json, text.", other),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
