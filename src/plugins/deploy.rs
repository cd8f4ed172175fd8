// src/plugins/deploy.rs

//! `stratus deploy` and `stratus deploy function`.
//!
//! Deployment itself is delegated to the installed provider handle; this
//! plugin sequences packaging, checks the artifacts exist and reports the
//! outcome.

use crate::constants::CONFIGURATION_ARTIFACT;
use crate::core::context::ExecutionContext;
use crate::core::dispatcher::HookCall;
use crate::core::lifecycle::HookKey;
use crate::core::plugin::Plugin;
use crate::models::{CommandSpec, OptionSpec};
use crate::plugins::package::write_function_artifact;
use crate::plugins::{package_dir, path_exists};
use anyhow::{Result, bail};
use async_trait::async_trait;
use colored::*;
use serde_json::{Value, json};

pub const NAME: &str = "Deploy";

#[derive(Debug, Default)]
pub struct DeployPlugin;

#[async_trait]
impl Plugin for DeployPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("deploy")
                .usage("Deploys the service")
                .lifecycle_events(&["deploy", "finalize"])
                .option(
                    "package",
                    OptionSpec::string("Deploy an existing package directory instead of packaging").shortcut("p"),
                )
                .option("force", OptionSpec::boolean("Deploy even when nothing changed"))
                .subcommand(
                    CommandSpec::new("function")
                        .usage("Deploys a single function")
                        .lifecycle_events(&["initialize", "packageFunction", "deploy"])
                        .option(
                            "function",
                            OptionSpec::string("Name of the function").shortcut("f").required(),
                        )
                        .option("force", OptionSpec::boolean("Deploy even when nothing changed")),
                ),
        ]
    }

    fn hooks(&self) -> Vec<HookKey> {
        vec![
            HookKey::before("deploy:deploy"),
            HookKey::during("deploy:deploy"),
            HookKey::during("deploy:finalize"),
            HookKey::during("deploy:function:initialize"),
            HookKey::during("deploy:function:packageFunction"),
            HookKey::during("deploy:function:deploy"),
        ]
    }

    async fn run_hook(&self, hook: &HookKey, mut call: HookCall<'_>) -> Result<()> {
        match hook.to_string().as_str() {
            "before:deploy:deploy" => {
                if call.ctx.option_str("package").is_none() {
                    call.spawn(&["package"]).await?;
                }
                Ok(())
            }
            "deploy:deploy" => deploy_service(call.ctx).await,
            "deploy:finalize" => {
                println!(
                    "{} Service '{}' deployed to stage '{}'.",
                    "✔".green(),
                    call.ctx.service_name().yellow(),
                    call.ctx.stage()
                );
                Ok(())
            }
            "deploy:function:initialize" => {
                function_config(call.ctx)?;
                Ok(())
            }
            "deploy:function:packageFunction" => {
                let (name, function) = function_config(call.ctx)?;
                let path = write_function_artifact(&package_dir(call.ctx), &name, &function).await?;
                log::debug!("Packaged function '{}' into {}", name, path.display());
                Ok(())
            }
            "deploy:function:deploy" => deploy_function(call.ctx).await,
            _ => Ok(()),
        }
    }
}

async fn deploy_service(ctx: &mut ExecutionContext) -> Result<()> {
    let dir = package_dir(ctx);
    let artifact = dir.join(CONFIGURATION_ARTIFACT);
    if !path_exists(&artifact).await? {
        bail!(
            "No deployment artifacts found in {}. Run 'stratus package' first.",
            dir.display()
        );
    }

    let params = json!({
        "service": ctx.service_name(),
        "stage": ctx.stage(),
        "region": ctx.region(),
        "package": dir.display().to_string(),
        "force": ctx.option_flag("force"),
    });
    log::info!("Deploying service '{}' from {}", ctx.service_name(), dir.display());
    ctx.provider().request("Deployment", "deployService", params).await?;
    Ok(())
}

async fn deploy_function(ctx: &mut ExecutionContext) -> Result<()> {
    let (name, _) = function_config(ctx)?;
    let params = json!({
        "service": ctx.service_name(),
        "stage": ctx.stage(),
        "region": ctx.region(),
        "function": name,
        "package": package_dir(ctx).display().to_string(),
        "force": ctx.option_flag("force"),
    });
    ctx.provider().request("Deployment", "deployFunction", params).await?;
    println!(
        "{} Function '{}' deployed to stage '{}'.",
        "✔".green(),
        name.yellow(),
        ctx.stage()
    );
    Ok(())
}

/// The `--function` name and its resolved configuration.
fn function_config(ctx: &ExecutionContext) -> Result<(String, Value)> {
    let Some(name) = ctx.option_str("function") else {
        bail!("Option \"--function\" is required.");
    };
    match ctx.configuration.get("functions").and_then(|f| f.get(name)) {
        Some(function) => Ok((name.to_string(), function.clone())),
        None => bail!(
            "Function \"{}\" is not defined in service \"{}\".",
            name,
            ctx.service_name()
        ),
    }
}
