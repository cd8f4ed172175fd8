// src/core/plugin.rs

//! # Plugins
//!
//! The typed contract every plugin implements, and the loader that turns an
//! ordered list of plugin constructors into a merged command registry, a hook
//! table and a list of resolvers.
//!
//! Load order is the hook tie-break: for any hook key, handlers run in the
//! order their plugins were loaded.

use crate::core::commands::{CommandError, CommandRegistry};
use crate::core::context::ExecutionContext;
use crate::core::dispatcher::HookCall;
use crate::core::lifecycle::HookKey;
use crate::core::provider::Provider;
use crate::core::variables::Resolver;
use crate::models::CommandSpec;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Plugin \"{0}\" is not available. Check the \"plugins\" section of the service description.")]
    NotFound(String),
    #[error("Failed to construct plugin \"{plugin}\": {source:#}")]
    Construction {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Plugin \"{0}\" is loaded more than once.")]
    Duplicate(String),
    #[error("Plugin \"{plugin}\" binds hook \"{hook}\" more than once.")]
    DuplicateHook { plugin: String, hook: String },
    #[error("Plugin \"{plugin}\" declares invalid commands: {source}")]
    Command {
        plugin: String,
        #[source]
        source: CommandError,
    },
    #[error("Plugin \"{plugin}\" failed to initialize: {source:#}")]
    Initialization {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },
}

// --- CONTRACT ---

/// A unit of functionality contributing commands, hooks and resolvers.
///
/// Handlers are dispatched through [`Plugin::run_hook`] with the key that
/// matched, so a plugin keeps a single `match` over the hooks it declared in
/// [`Plugin::hooks`].
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Plugins tied to one provider are skipped for services using another.
    fn provider_name(&self) -> Option<&str> {
        None
    }

    fn commands(&self) -> Vec<CommandSpec> {
        Vec::new()
    }

    fn hooks(&self) -> Vec<HookKey> {
        Vec::new()
    }

    fn resolvers(&self) -> Vec<(String, Arc<dyn Resolver>)> {
        Vec::new()
    }

    /// A provider handle to install on the execution context.
    fn provider(&self) -> Option<Arc<dyn Provider>> {
        None
    }

    /// Runs once after every plugin is loaded, before variables are resolved.
    async fn initialize(&self, _ctx: &mut ExecutionContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn run_hook(&self, hook: &HookKey, call: HookCall<'_>) -> anyhow::Result<()>;
}

/// Where a plugin comes from; also the order in which groups are loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PluginOrigin {
    Core,
    Provider,
    Service,
    Local,
}

type Factory = dyn Fn(&ExecutionContext) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync;

/// A named plugin constructor.
#[derive(Clone)]
pub struct PluginSpec {
    pub name: String,
    pub origin: PluginOrigin,
    factory: Arc<Factory>,
}

impl fmt::Debug for PluginSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginSpec")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

impl PluginSpec {
    pub fn new<F>(name: &str, origin: PluginOrigin, factory: F) -> Self
    where
        F: Fn(&ExecutionContext) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            origin,
            factory: Arc::new(factory),
        }
    }

    pub fn with_origin(mut self, origin: PluginOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn construct(&self, ctx: &ExecutionContext) -> anyhow::Result<Arc<dyn Plugin>> {
        (self.factory)(ctx)
    }
}

/// Plugins that can be named in the service description, by name.
#[derive(Debug, Clone, Default)]
pub struct PluginCatalog {
    entries: BTreeMap<String, PluginSpec>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: PluginSpec) {
        self.entries.insert(spec.name.clone(), spec);
    }

    pub fn get(&self, name: &str) -> Result<PluginSpec, PluginError> {
        self.entries
            .get(name)
            .cloned()
            .map(|spec| spec.with_origin(PluginOrigin::Service))
            .ok_or_else(|| PluginError::NotFound(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

// --- LOADING ---

/// Plugins bound to one hook key, in load order.
pub type HookTable = HashMap<HookKey, Vec<Arc<dyn Plugin>>>;

/// The result of loading an ordered list of plugin constructors.
pub struct LoadedPlugins {
    pub plugins: Vec<Arc<dyn Plugin>>,
    pub commands: CommandRegistry,
    pub hooks: HookTable,
    /// Resolvers in registration order; later entries shadow earlier ones.
    pub resolvers: Vec<(String, Arc<dyn Resolver>)>,
    pub provider: Option<Arc<dyn Provider>>,
}

impl fmt::Debug for LoadedPlugins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedPlugins")
            .field("plugins", &self.plugins.iter().map(|p| p.name()).collect::<Vec<_>>())
            .field("commands", &self.commands)
            .field("hooks", &self.hooks.len())
            .field("resolvers", &self.resolvers.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl LoadedPlugins {
    /// Plugins bound to `key`, in load order.
    pub fn hooks_for(&self, key: &HookKey) -> &[Arc<dyn Plugin>] {
        self.hooks.get(key).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Constructs every plugin in `specs`, in order, and merges their
/// declarations. Any failure aborts the whole load.
pub fn load(specs: &[PluginSpec], ctx: &ExecutionContext) -> Result<LoadedPlugins, PluginError> {
    let mut loaded = LoadedPlugins {
        plugins: Vec::new(),
        commands: CommandRegistry::new(),
        hooks: HookTable::new(),
        resolvers: Vec::new(),
        provider: None,
    };
    let mut names = HashSet::new();

    for spec in specs {
        let plugin = spec.construct(ctx).map_err(|source| PluginError::Construction {
            plugin: spec.name.clone(),
            source,
        })?;
        let name = plugin.name().to_string();

        if let Some(provider) = plugin.provider_name() {
            if provider != ctx.service.provider_name {
                log::debug!(
                    "Skipping plugin '{}' (provider '{}', service uses '{}').",
                    name,
                    provider,
                    ctx.service.provider_name
                );
                continue;
            }
        }
        if !names.insert(name.clone()) {
            return Err(PluginError::Duplicate(name));
        }
        log::debug!("Loading plugin '{}' ({:?}).", name, spec.origin);

        for command in plugin.commands() {
            loaded
                .commands
                .register(&name, &command)
                .map_err(|source| PluginError::Command {
                    plugin: name.clone(),
                    source,
                })?;
        }

        let mut seen = HashSet::new();
        for key in plugin.hooks() {
            if !seen.insert(key.clone()) {
                return Err(PluginError::DuplicateHook {
                    plugin: name,
                    hook: key.to_string(),
                });
            }
            log::trace!("  -> hook '{}'", key);
            loaded.hooks.entry(key).or_default().push(Arc::clone(&plugin));
        }

        for (source, resolver) in plugin.resolvers() {
            log::trace!("  -> resolver '{}'", source);
            loaded.resolvers.push((source, resolver));
        }
        if let Some(provider) = plugin.provider() {
            loaded.provider = Some(provider);
        }

        loaded.plugins.push(plugin);
    }

    Ok(loaded)
}

/// Runs every plugin's `initialize` step, in load order.
pub async fn initialize_all(loaded: &LoadedPlugins, ctx: &mut ExecutionContext) -> Result<(), PluginError> {
    for plugin in &loaded.plugins {
        plugin
            .initialize(ctx)
            .await
            .map_err(|source| PluginError::Initialization {
                plugin: plugin.name().to_string(),
                source,
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config_loader::ServiceDescription;
    use serde_json::json;
    use std::path::Path;

    struct Named {
        name: String,
        provider: Option<String>,
        hooks: Vec<HookKey>,
    }

    #[async_trait]
    impl Plugin for Named {
        fn name(&self) -> &str {
            &self.name
        }

        fn provider_name(&self) -> Option<&str> {
            self.provider.as_deref()
        }

        fn commands(&self) -> Vec<CommandSpec> {
            vec![CommandSpec::new("deploy").lifecycle_events(&["deploy"])]
        }

        fn hooks(&self) -> Vec<HookKey> {
            self.hooks.clone()
        }

        async fn run_hook(&self, _hook: &HookKey, _call: HookCall<'_>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn spec(name: &str, provider: Option<&str>, hooks: Vec<HookKey>) -> PluginSpec {
        let name = name.to_string();
        let provider = provider.map(str::to_string);
        PluginSpec::new(&name.clone(), PluginOrigin::Core, move |_| {
            Ok(Arc::new(Named {
                name: name.clone(),
                provider: provider.clone(),
                hooks: hooks.clone(),
            }) as Arc<dyn Plugin>)
        })
    }

    fn context() -> ExecutionContext {
        ExecutionContext::new(
            ServiceDescription::from_value(Path::new("."), json!({ "service": "s", "provider": "aws" }))
                .unwrap(),
        )
    }

    #[test]
    fn hooks_keep_load_order_not_name_order() {
        let key = HookKey::during("deploy:deploy");
        let specs = vec![
            spec("zeta", None, vec![key.clone()]),
            spec("alpha", None, vec![key.clone()]),
        ];
        let loaded = load(&specs, &context()).unwrap();
        let order: Vec<&str> = loaded.hooks_for(&key).iter().map(|p| p.name()).collect();
        assert_eq!(order, vec!["zeta", "alpha"]);
    }

    #[test]
    fn provider_specific_plugins_are_filtered() {
        let specs = vec![
            spec("aws-only", Some("aws"), vec![]),
            spec("azure-only", Some("azure"), vec![]),
        ];
        let loaded = load(&specs, &context()).unwrap();
        let names: Vec<&str> = loaded.plugins.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["aws-only"]);
    }

    #[test]
    fn duplicates_and_failing_constructors_abort() {
        let specs = vec![spec("same", None, vec![]), spec("same", None, vec![])];
        assert!(matches!(load(&specs, &context()), Err(PluginError::Duplicate(_))));

        let key = HookKey::before("deploy:deploy");
        let specs = vec![spec("twice", None, vec![key.clone(), key])];
        assert!(matches!(
            load(&specs, &context()),
            Err(PluginError::DuplicateHook { .. })
        ));

        let failing = PluginSpec::new("broken", PluginOrigin::Local, |_| anyhow::bail!("boom"));
        let err = load(&[failing], &context()).unwrap_err();
        assert_eq!(err.to_string(), "Failed to construct plugin \"broken\": boom");
    }

    #[test]
    fn catalog_reports_unknown_plugins() {
        let mut catalog = PluginCatalog::new();
        catalog.register(spec("scripts", None, vec![]));
        assert_eq!(catalog.get("scripts").unwrap().origin, PluginOrigin::Service);
        assert!(matches!(catalog.get("nope"), Err(PluginError::NotFound(_))));
    }
}
