// src/plugins/package.rs

//! `stratus package`: writes the resolved configuration, and one file per
//! function, into the package directory.

use crate::constants::CONFIGURATION_ARTIFACT;
use crate::core::context::ExecutionContext;
use crate::core::dispatcher::HookCall;
use crate::core::lifecycle::HookKey;
use crate::core::plugin::Plugin;
use crate::models::{CommandSpec, OptionSpec};
use crate::plugins::{package_dir, path_exists};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};

pub const NAME: &str = "Package";

/// Files written during the current invocation.
#[derive(Debug, Default)]
pub struct PackageState {
    pub artifacts: Vec<PathBuf>,
}

#[derive(Debug, Default)]
pub struct PackagePlugin;

#[async_trait]
impl Plugin for PackagePlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("package")
                .usage("Packages the service for deployment")
                .lifecycle_events(&["cleanup", "initialize", "createDeploymentArtifacts", "finalize"])
                .option(
                    "package",
                    OptionSpec::string("Output directory for the package").shortcut("p"),
                ),
        ]
    }

    fn hooks(&self) -> Vec<HookKey> {
        vec![
            HookKey::during("package:cleanup"),
            HookKey::during("package:createDeploymentArtifacts"),
            HookKey::during("package:finalize"),
        ]
    }

    async fn run_hook(&self, hook: &HookKey, call: HookCall<'_>) -> Result<()> {
        let ctx = call.ctx;
        match hook.event.as_str() {
            "package:cleanup" => clean_package(ctx).await,
            "package:createDeploymentArtifacts" => create_artifacts(ctx).await,
            "package:finalize" => {
                let count = ctx.scratch::<PackageState>(NAME).map_or(0, |s| s.artifacts.len());
                log::info!(
                    "Packaged service '{}' into {} ({} artifacts).",
                    ctx.service_name(),
                    package_dir(ctx).display(),
                    count
                );
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Clears the previous package.
///
/// The default `.stratus` directory is removed whole. A directory named with
/// `--package` may hold other files, so only the artifacts `package` writes
/// are removed from it, and a directory containing the service is refused.
pub async fn clean_package(ctx: &ExecutionContext) -> Result<()> {
    let dir = package_dir(ctx);
    if !path_exists(&dir).await? {
        return Ok(());
    }
    if ctx.option_str("package").is_none() {
        log::debug!("Removing previous package at {}", dir.display());
        return tokio::fs::remove_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to remove package directory {}", dir.display()));
    }

    ensure_outside_service(&dir, &ctx.service.service_dir)?;
    for file_name in artifact_names(&ctx.configuration) {
        let path = dir.join(file_name);
        if path_exists(&path).await? {
            log::debug!("Removing previous artifact {}", path.display());
            tokio::fs::remove_file(&path)
                .await
                .with_context(|| format!("Failed to remove artifact {}", path.display()))?;
        }
    }
    Ok(())
}

fn ensure_outside_service(dir: &Path, service_dir: &Path) -> Result<()> {
    let package = dunce::canonicalize(dir).with_context(|| format!("Failed to resolve {}", dir.display()))?;
    let service =
        dunce::canonicalize(service_dir).with_context(|| format!("Failed to resolve {}", service_dir.display()))?;
    if service.starts_with(&package) {
        bail!(
            "Package directory {} contains the service at {}. Choose a directory inside or beside it.",
            package.display(),
            service.display()
        );
    }
    Ok(())
}

/// File names `package` writes for `configuration`.
fn artifact_names(configuration: &Value) -> Vec<String> {
    let mut names = vec![CONFIGURATION_ARTIFACT.to_string()];
    if let Some(Value::Object(functions)) = configuration.get("functions") {
        names.extend(functions.keys().map(|name| function_artifact_name(name)));
    }
    names
}

fn function_artifact_name(name: &str) -> String {
    format!("{}.json", name)
}

async fn create_artifacts(ctx: &mut ExecutionContext) -> Result<()> {
    let dir = package_dir(ctx);
    let mut written = vec![write_json(&dir, CONFIGURATION_ARTIFACT, &ctx.configuration).await?];
    if let Some(Value::Object(functions)) = ctx.configuration.get("functions") {
        for (name, function) in functions {
            written.push(write_function_artifact(&dir, name, function).await?);
        }
    }
    ctx.scratch_mut::<PackageState>(NAME).artifacts.extend(written);
    Ok(())
}

/// Writes `<dir>/<function>.json`.
pub async fn write_function_artifact(dir: &Path, name: &str, function: &Value) -> Result<PathBuf> {
    write_json(dir, &function_artifact_name(name), function).await
}

async fn write_json(dir: &Path, file_name: &str, value: &Value) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create package directory {}", dir.display()))?;
    let path = dir.join(file_name);
    let content = serde_json::to_string_pretty(value)?;
    tokio::fs::write(&path, content)
        .await
        .with_context(|| format!("Failed to write artifact {}", path.display()))?;
    log::trace!("Wrote artifact {}", path.display());
    Ok(path)
}
