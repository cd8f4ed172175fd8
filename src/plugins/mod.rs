// src/plugins/mod.rs

//! # Built-in Plugins
//!
//! The core plugins are always loaded, in this order: `package`, `deploy`,
//! `remove`, `info`, `print`. The catalog holds plugins a service opts into
//! through its `plugins` section.

pub mod deploy;
pub mod info;
pub mod package;
pub mod print;
pub mod remove;
pub mod scripts;

use crate::constants::PACKAGE_DIR;
use crate::core::context::ExecutionContext;
use crate::core::plugin::{Plugin, PluginCatalog, PluginOrigin, PluginSpec};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Constructors for the always-loaded plugins.
pub fn core_plugins() -> Vec<PluginSpec> {
    vec![
        stateless::<package::PackagePlugin>(package::NAME),
        stateless::<deploy::DeployPlugin>(deploy::NAME),
        stateless::<remove::RemovePlugin>(remove::NAME),
        stateless::<info::InfoPlugin>(info::NAME),
        stateless::<print::PrintPlugin>(print::NAME),
    ]
}

/// Plugins a service may enable by name.
pub fn catalog() -> PluginCatalog {
    let mut catalog = PluginCatalog::new();
    catalog.register(PluginSpec::new(scripts::NAME, PluginOrigin::Service, |ctx| {
        Ok(Arc::new(scripts::ScriptsPlugin::from_service(&ctx.service)?) as Arc<dyn Plugin>)
    }));
    catalog
}

fn stateless<P: Plugin + Default + 'static>(name: &str) -> PluginSpec {
    PluginSpec::new(name, PluginOrigin::Core, |_| Ok(Arc::new(P::default()) as Arc<dyn Plugin>))
}

/// Where packaging writes, and deployment reads, artifacts: `--package` when
/// given, `.stratus` in the service directory otherwise.
pub fn package_dir(ctx: &ExecutionContext) -> PathBuf {
    match ctx.option_str("package") {
        Some(dir) => ctx.service_path(dir),
        None => ctx.service_path(PACKAGE_DIR),
    }
}

/// `try_exists` with the path in the error.
pub async fn path_exists(path: &Path) -> Result<bool> {
    tokio::fs::try_exists(path)
        .await
        .with_context(|| format!("Failed to access {}", path.display()))
}
