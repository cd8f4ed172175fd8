// src/plugins/info.rs

//! `stratus info`: a summary of the resolved service.

use crate::core::context::ExecutionContext;
use crate::core::dispatcher::HookCall;
use crate::core::lifecycle::HookKey;
use crate::core::plugin::Plugin;
use crate::models::CommandSpec;
use anyhow::Result;
use async_trait::async_trait;
use colored::*;
use serde_json::Value;

pub const NAME: &str = "Info";

#[derive(Debug, Default)]
pub struct InfoPlugin;

#[async_trait]
impl Plugin for InfoPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("info")
                .usage("Displays information about the service")
                .lifecycle_events(&["info"]),
        ]
    }

    fn hooks(&self) -> Vec<HookKey> {
        vec![HookKey::during("info:info")]
    }

    async fn run_hook(&self, _hook: &HookKey, call: HookCall<'_>) -> Result<()> {
        println!("\n--- Service '{}' ---", call.ctx.service_name().yellow());
        for (label, value) in summary(call.ctx) {
            println!("  {:<15} {}", label.blue(), value);
        }
        println!("\n---------------------------------");
        Ok(())
    }
}

/// Label and value pairs shown by `info`.
pub fn summary(ctx: &ExecutionContext) -> Vec<(&'static str, String)> {
    let functions = match ctx.configuration.get("functions") {
        Some(Value::Object(map)) if !map.is_empty() => map.keys().cloned().collect::<Vec<_>>().join(", "),
        _ => "(none)".dimmed().to_string(),
    };
    vec![
        ("service:", ctx.service_name().to_string()),
        ("provider:", ctx.service.provider_name.clone()),
        ("stage:", ctx.stage()),
        ("region:", ctx.region().unwrap_or_else(|| "(default)".dimmed().to_string())),
        ("config file:", ctx.service.config_path.display().to_string()),
        ("functions:", functions),
    ]
}
