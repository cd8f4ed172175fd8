// src/plugins/remove.rs

use crate::core::dispatcher::HookCall;
use crate::core::lifecycle::HookKey;
use crate::core::plugin::Plugin;
use crate::models::CommandSpec;
use crate::plugins::package::clean_package;
use anyhow::Result;
use async_trait::async_trait;
use colored::*;
use serde_json::json;

pub const NAME: &str = "Remove";

/// `stratus remove`: asks the provider to tear the service down, then drops
/// the local package.
#[derive(Debug, Default)]
pub struct RemovePlugin;

#[async_trait]
impl Plugin for RemovePlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("remove")
                .usage("Removes the deployed service")
                .lifecycle_events(&["remove"]),
        ]
    }

    fn hooks(&self) -> Vec<HookKey> {
        vec![HookKey::during("remove:remove")]
    }

    async fn run_hook(&self, _hook: &HookKey, call: HookCall<'_>) -> Result<()> {
        let ctx = call.ctx;
        let params = json!({
            "service": ctx.service_name(),
            "stage": ctx.stage(),
            "region": ctx.region(),
        });
        ctx.provider().request("Deployment", "removeService", params).await?;

        clean_package(ctx).await?;
        println!(
            "{} Service '{}' removed from stage '{}'.",
            "✔".green(),
            ctx.service_name().yellow(),
            ctx.stage()
        );
        Ok(())
    }
}
