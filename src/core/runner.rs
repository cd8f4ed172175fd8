// src/core/runner.rs

//! # Runner
//!
//! One complete invocation, start to finish:
//!
//! 1. load the service description (`--config` or discovery);
//! 2. load plugins in order: core, provider, service-declared, local;
//! 3. resolve the command line against the merged command tree, so usage
//!    errors surface before anything else runs;
//! 4. initialize plugins, then materialize the configuration;
//! 5. dispatch the hook pipeline.

use crate::core::commands::Resolution;
use crate::core::config_loader::{self, ConfigError, ServiceDescription};
use crate::core::context::ExecutionContext;
use crate::core::dispatcher::Dispatcher;
use crate::core::help;
use crate::core::plugin::{self, PluginCatalog, PluginOrigin, PluginSpec};
use crate::core::variables::sources::{EnvResolver, register_builtins};
use crate::core::variables::{ResolveScope, ResolverRegistry, VariableEngine};
use crate::plugins;
use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

/// What a successful invocation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The command ran to completion.
    Completed,
    /// Help text to print; no hook was run.
    Help(String),
    /// The program version to print.
    Version(String),
}

/// Drives invocations for one working directory.
#[derive(Debug, Clone)]
pub struct Runner {
    cwd: PathBuf,
    env: EnvResolver,
    core_plugins: Vec<PluginSpec>,
    provider_plugins: Vec<PluginSpec>,
    catalog: PluginCatalog,
    local_plugins: Vec<PluginSpec>,
}

impl Runner {
    /// A runner with the built-in plugins and the process environment.
    pub fn new(cwd: &Path) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
            env: EnvResolver::from_env(),
            core_plugins: plugins::core_plugins(),
            provider_plugins: Vec::new(),
            catalog: plugins::catalog(),
            local_plugins: Vec::new(),
        }
    }

    /// Replaces the environment snapshot read by the `env` source.
    pub fn with_env(mut self, env: EnvResolver) -> Self {
        self.env = env;
        self
    }

    /// Replaces the core plugin set.
    pub fn with_core_plugins(mut self, specs: Vec<PluginSpec>) -> Self {
        self.core_plugins = specs;
        self
    }

    pub fn with_provider_plugin(mut self, spec: PluginSpec) -> Self {
        self.provider_plugins.push(spec.with_origin(PluginOrigin::Provider));
        self
    }

    /// Makes a plugin available to the `plugins` section of the service.
    pub fn with_catalog_entry(mut self, spec: PluginSpec) -> Self {
        self.catalog.register(spec);
        self
    }

    pub fn with_local_plugin(mut self, spec: PluginSpec) -> Self {
        self.local_plugins.push(spec.with_origin(PluginOrigin::Local));
        self
    }

    /// Runs one invocation. `argv` excludes the program name.
    pub async fn run(&self, argv: &[String]) -> Result<RunOutcome> {
        let explicit_config = find_config_argument(argv);
        let service = match config_loader::load(&self.cwd, explicit_config.as_deref()) {
            Ok(service) => Some(service),
            Err(ConfigError::NotFound { .. }) if explicit_config.is_none() => None,
            Err(e) => return Err(e.into()),
        };
        let detached = service.is_none();
        let service = match service {
            Some(service) => service,
            None => detached_service(&self.cwd)?,
        };

        let mut ctx = ExecutionContext::new(service);
        let specs = self.plugin_specs(&ctx.service, detached)?;
        let loaded = plugin::load(&specs, &ctx)?;

        let invocation = match loaded.commands.resolve(argv)? {
            Resolution::Help { path } => return Ok(RunOutcome::Help(help::render(&loaded.commands, &path))),
            Resolution::Version => return Ok(RunOutcome::Version(env!("CARGO_PKG_VERSION").to_string())),
            Resolution::Run(invocation) => invocation,
        };
        if detached {
            // Only help and version work without a service description.
            config_loader::discover(&self.cwd)?;
        }
        log::info!("Running '{}'.", invocation.path.join(" "));

        ctx.options = invocation.options.clone();
        ctx.free_args = invocation.free_args.clone();
        ctx.command = invocation.path.clone();
        if let Some(provider) = &loaded.provider {
            ctx.set_provider(provider.clone());
        }
        plugin::initialize_all(&loaded, &mut ctx).await?;

        let mut registry = ResolverRegistry::new();
        register_builtins(&mut registry, self.env.clone());
        for (source, resolver) in &loaded.resolvers {
            registry.register(source, resolver.clone());
        }
        let engine = VariableEngine::new(
            registry,
            ResolveScope::new(
                ctx.service.raw.clone(),
                ctx.options.clone(),
                ctx.service.service_dir.clone(),
                ctx.provider(),
                ctx.invocation_id,
            ),
        );
        ctx.configuration = engine
            .resolve_all(&ctx.service.raw)
            .await
            .context("Failed to resolve the service configuration")?;
        ctx.set_variables(engine);

        let dispatcher = Dispatcher::new(loaded);
        dispatcher.run(&invocation.path, &mut ctx).await?;
        Ok(RunOutcome::Completed)
    }

    fn plugin_specs(&self, service: &ServiceDescription, detached: bool) -> Result<Vec<PluginSpec>> {
        let mut specs: Vec<PluginSpec> = self.core_plugins.clone();
        specs.extend(self.provider_plugins.iter().cloned());
        if !detached {
            for name in &service.plugins {
                specs.push(self.catalog.get(name)?);
            }
        }
        specs.extend(self.local_plugins.iter().cloned());
        Ok(specs)
    }
}

/// Finds `--config <path>`, `--config=<path>`, `-c <path>` or `-c=<path>`
/// ahead of full argument parsing, which needs the plugins the file selects.
fn find_config_argument(argv: &[String]) -> Option<PathBuf> {
    let mut args = argv.iter().take_while(|a| a.as_str() != "--");
    while let Some(arg) = args.next() {
        if let Some(value) = arg
            .strip_prefix("--config=")
            .or_else(|| arg.strip_prefix("-c="))
        {
            return Some(PathBuf::from(value));
        }
        if arg == "--config" || arg == "-c" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

/// Stand-in description used to list commands when no service file exists.
fn detached_service(cwd: &Path) -> Result<ServiceDescription> {
    let placeholder: Value = json!({ "service": "(none)", "provider": "(none)" });
    Ok(ServiceDescription::from_value(cwd, placeholder)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn config_argument_is_found_in_every_form() {
        assert_eq!(
            find_config_argument(&args(&["deploy", "--config", "x.yml"])),
            Some(PathBuf::from("x.yml"))
        );
        assert_eq!(
            find_config_argument(&args(&["-c=y.json", "info"])),
            Some(PathBuf::from("y.json"))
        );
        assert_eq!(find_config_argument(&args(&["deploy", "--", "--config", "z"])), None);
    }
}
