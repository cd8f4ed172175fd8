// src/core/dispatcher.rs

//! # Lifecycle Event Dispatcher
//!
//! Runs the hook pipeline of a resolved command. For every lifecycle event
//! `E` of the command (namespaced by the command path) the dispatcher runs
//! all `before:E` hooks, then all `E` hooks, then all `after:E` hooks, each
//! group in plugin load order. Hooks run strictly one after another and the
//! first failure stops the pipeline.
//!
//! A whole run is wrapped in the run-level events: `initialize` before the
//! command, `finalize` after it succeeds, `error` after it fails.

use crate::constants::{ERROR_EVENT, FINALIZE_EVENT, INITIALIZE_EVENT};
use crate::core::commands::{CommandError, CommandRegistry};
use crate::core::context::ExecutionContext;
use crate::core::lifecycle::{EventId, HookKey};
use crate::core::plugin::{HookTable, LoadedPlugins, Plugin};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("Hook \"{hook}\" of plugin \"{plugin}\" failed: {source:#}")]
    HookFailed {
        plugin: String,
        hook: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Returned by a hook to stop the rest of the current command's lifecycle
/// without failing the run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Lifecycle of \"{command}\" terminated by a hook.")]
pub struct TerminateHookChain {
    pub command: String,
}

/// Everything a hook receives: the context and a way to run other commands.
pub struct HookCall<'a> {
    pub ctx: &'a mut ExecutionContext,
    dispatcher: &'a Dispatcher,
}

impl fmt::Debug for HookCall<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookCall")
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

impl HookCall<'_> {
    /// Runs another command (entrypoints included) over the same context.
    pub async fn spawn(&mut self, path: &[&str]) -> anyhow::Result<()> {
        let path: Vec<String> = path.iter().map(|s| s.to_string()).collect();
        self.dispatcher.invoke(&path, self.ctx, true).await?;
        Ok(())
    }

    /// Runs another command, then stops the calling command's remaining
    /// lifecycle. Return the result directly from the hook.
    pub async fn spawn_and_terminate(&mut self, path: &[&str]) -> anyhow::Result<()> {
        self.spawn(path).await?;
        Err(TerminateHookChain {
            command: self.ctx.command.join(":"),
        }
        .into())
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.dispatcher.commands
    }
}

/// Owns the merged command tree and hook table of one invocation.
pub struct Dispatcher {
    commands: CommandRegistry,
    hooks: HookTable,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("commands", &self.commands)
            .field("hook_keys", &self.hooks.len())
            .finish()
    }
}

impl Dispatcher {
    pub fn new(loaded: LoadedPlugins) -> Self {
        Self {
            commands: loaded.commands,
            hooks: loaded.hooks,
        }
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    fn hooks_for(&self, key: &HookKey) -> &[Arc<dyn Plugin>] {
        self.hooks.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// The ordered hook keys of a command, three per lifecycle event.
    pub fn event_sequence(&self, path: &[String], allow_entrypoints: bool) -> Result<Vec<HookKey>, CommandError> {
        let command = self.commands.get(path, allow_entrypoints)?;
        Ok(command
            .lifecycle_events
            .iter()
            .flat_map(|event| EventId::for_command(&command.key, event).hook_keys())
            .collect())
    }

    /// Runs a top-level command wrapped in the run-level events.
    pub async fn run(&self, path: &[String], ctx: &mut ExecutionContext) -> Result<(), LifecycleError> {
        let outcome = self.run_command(path, ctx).await;

        if let Err(error) = &outcome {
            ctx.set_failure(Some(error.to_string()));
            if let Err(hook_error) = self.run_event(&EventId::new(ERROR_EVENT), ctx).await {
                log::warn!("An error hook failed while handling a failure: {}", hook_error);
            }
            ctx.set_failure(None);
        }
        outcome
    }

    async fn run_command(&self, path: &[String], ctx: &mut ExecutionContext) -> Result<(), LifecycleError> {
        self.run_event(&EventId::new(INITIALIZE_EVENT), ctx).await?;
        self.invoke(path, ctx, false).await?;
        self.run_event(&EventId::new(FINALIZE_EVENT), ctx).await
    }

    /// Dispatches the lifecycle of the command at `path`. Spawned commands
    /// re-enter here with a fresh event list.
    pub fn invoke<'a>(
        &'a self,
        path: &'a [String],
        ctx: &'a mut ExecutionContext,
        allow_entrypoints: bool,
    ) -> BoxFuture<'a, Result<(), LifecycleError>> {
        async move {
            let keys = self.event_sequence(path, allow_entrypoints)?;
            let key_label = path.join(":");

            if keys.iter().all(|key| self.hooks_for(key).is_empty()) {
                log::debug!("No hooks bound for '{}'; nothing to do.", key_label);
                return Ok(());
            }

            let previous = std::mem::replace(&mut ctx.command, path.to_vec());
            let result = self.run_keys(&keys, ctx).await;
            ctx.command = previous;

            match result {
                Err(LifecycleError::HookFailed { source, .. }) if source.is::<TerminateHookChain>() => {
                    log::debug!("Lifecycle of '{}' terminated early.", key_label);
                    Ok(())
                }
                other => other,
            }
        }
        .boxed()
    }

    async fn run_event(&self, event: &EventId, ctx: &mut ExecutionContext) -> Result<(), LifecycleError> {
        self.run_keys(&event.hook_keys(), ctx).await
    }

    async fn run_keys(&self, keys: &[HookKey], ctx: &mut ExecutionContext) -> Result<(), LifecycleError> {
        for key in keys {
            for plugin in self.hooks_for(key) {
                log::trace!("Running hook '{}' of plugin '{}'.", key, plugin.name());
                let call = HookCall {
                    ctx: &mut *ctx,
                    dispatcher: self,
                };
                if let Err(error) = plugin.run_hook(key, call).await {
                    return Err(wrap_hook_error(plugin.name(), key, error));
                }
            }
        }
        Ok(())
    }
}

/// A failure coming out of a spawned command is already attributed to its
/// own hook and passes through unchanged.
fn wrap_hook_error(plugin: &str, key: &HookKey, error: anyhow::Error) -> LifecycleError {
    match error.downcast::<LifecycleError>() {
        Ok(inner) => inner,
        Err(source) => LifecycleError::HookFailed {
            plugin: plugin.to_string(),
            hook: key.to_string(),
            source,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config_loader::ServiceDescription;
    use crate::core::plugin::{PluginOrigin, PluginSpec, load};
    use crate::models::{CommandKind, CommandSpec};
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::Path;
    use std::sync::Mutex;

    type Journal = Arc<Mutex<Vec<String>>>;

    /// Records every hook it runs; fails or spawns on request.
    struct Recorder {
        name: String,
        journal: Journal,
        hooks: Vec<HookKey>,
        fail_on: Option<HookKey>,
        spawn_on: Option<(HookKey, Vec<&'static str>, bool)>,
    }

    #[async_trait]
    impl Plugin for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn commands(&self) -> Vec<CommandSpec> {
            vec![
                CommandSpec::new("deploy")
                    .lifecycle_events(&["package", "deploy"])
                    .subcommand(CommandSpec::new("function").lifecycle_events(&["deploy"])),
                CommandSpec::new("build")
                    .kind(CommandKind::Entrypoint)
                    .lifecycle_events(&["compile"]),
            ]
        }

        fn hooks(&self) -> Vec<HookKey> {
            self.hooks.clone()
        }

        async fn run_hook(&self, hook: &HookKey, mut call: HookCall<'_>) -> anyhow::Result<()> {
            self.journal
                .lock()
                .unwrap()
                .push(format!("{}@{}", self.name, hook));
            if self.fail_on.as_ref() == Some(hook) {
                anyhow::bail!("{} exploded", self.name);
            }
            if let Some((key, path, terminate)) = &self.spawn_on {
                if key == hook {
                    return if *terminate {
                        call.spawn_and_terminate(path).await
                    } else {
                        call.spawn(path).await
                    };
                }
            }
            Ok(())
        }
    }

    fn recorder(name: &str, journal: &Journal, hooks: &[&str]) -> Recorder {
        Recorder {
            name: name.to_string(),
            journal: Arc::clone(journal),
            hooks: hooks.iter().map(|h| h.parse().unwrap()).collect(),
            fail_on: None,
            spawn_on: None,
        }
    }

    fn dispatcher(plugins: Vec<Recorder>) -> Dispatcher {
        let ctx = context();
        let specs: Vec<PluginSpec> = plugins
            .into_iter()
            .map(|plugin| {
                let plugin: Arc<dyn Plugin> = Arc::new(plugin);
                PluginSpec::new(&plugin.name().to_string(), PluginOrigin::Core, move |_| {
                    Ok(Arc::clone(&plugin))
                })
            })
            .collect();
        Dispatcher::new(load(&specs, &ctx).unwrap())
    }

    fn context() -> ExecutionContext {
        ExecutionContext::new(
            ServiceDescription::from_value(Path::new("."), json!({ "service": "s", "provider": "aws" }))
                .unwrap(),
        )
    }

    fn path(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn entries(journal: &Journal) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    #[test]
    fn event_sequence_has_three_slots_per_event() {
        let journal = Journal::default();
        let d = dispatcher(vec![recorder("a", &journal, &[])]);
        let keys: Vec<String> = d
            .event_sequence(&path(&["deploy"]), false)
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            keys,
            vec![
                "before:deploy:package",
                "deploy:package",
                "after:deploy:package",
                "before:deploy:deploy",
                "deploy:deploy",
                "after:deploy:deploy"
            ]
        );
    }

    #[tokio::test]
    async fn hooks_run_by_phase_then_load_order() {
        let journal = Journal::default();
        let hooks = &["after:deploy:function:deploy", "deploy:function:deploy", "before:deploy:function:deploy"];
        let d = dispatcher(vec![
            recorder("zeta", &journal, hooks),
            recorder("alpha", &journal, hooks),
        ]);

        d.run(&path(&["deploy", "function"]), &mut context()).await.unwrap();
        assert_eq!(
            entries(&journal),
            vec![
                "zeta@before:deploy:function:deploy",
                "alpha@before:deploy:function:deploy",
                "zeta@deploy:function:deploy",
                "alpha@deploy:function:deploy",
                "zeta@after:deploy:function:deploy",
                "alpha@after:deploy:function:deploy",
            ]
        );
    }

    #[tokio::test]
    async fn failing_hook_stops_the_pipeline_and_runs_error_hooks() {
        let journal = Journal::default();
        let mut failing = recorder(
            "deployer",
            &journal,
            &["deploy:function:deploy", "after:deploy:function:deploy", "finalize"],
        );
        failing.fail_on = Some(HookKey::during("deploy:function:deploy"));
        let watcher = recorder("watcher", &journal, &["error"]);
        let d = dispatcher(vec![failing, watcher]);

        let err = d
            .run(&path(&["deploy", "function"]), &mut context())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Hook \"deploy:function:deploy\" of plugin \"deployer\" failed: deployer exploded"
        );
        assert_eq!(
            entries(&journal),
            vec!["deployer@deploy:function:deploy", "watcher@error"]
        );
    }

    #[tokio::test]
    async fn failing_error_hook_keeps_the_original_error() {
        let journal = Journal::default();
        let mut failing = recorder("a", &journal, &["deploy:deploy", "error"]);
        failing.fail_on = Some(HookKey::during("deploy:deploy"));
        let mut broken_handler = recorder("b", &journal, &["error"]);
        broken_handler.fail_on = Some(HookKey::during("error"));
        let d = dispatcher(vec![failing, broken_handler]);

        let err = d.run(&path(&["deploy"]), &mut context()).await.unwrap_err();
        assert!(err.to_string().contains("a exploded"));
    }

    #[tokio::test]
    async fn run_level_events_wrap_the_command() {
        let journal = Journal::default();
        let d = dispatcher(vec![recorder(
            "p",
            &journal,
            &["initialize", "deploy:deploy", "finalize"],
        )]);

        d.run(&path(&["deploy"]), &mut context()).await.unwrap();
        assert_eq!(
            entries(&journal),
            vec!["p@initialize", "p@deploy:deploy", "p@finalize"]
        );
    }

    #[tokio::test]
    async fn spawn_runs_entrypoints_and_terminate_skips_the_rest() {
        let journal = Journal::default();
        let mut spawner = recorder("spawner", &journal, &["before:deploy:package", "deploy:package", "deploy:deploy"]);
        spawner.spawn_on = Some((HookKey::before("deploy:package"), vec!["build"], true));
        let builder = recorder("builder", &journal, &["build:compile"]);
        let d = dispatcher(vec![spawner, builder]);

        d.run(&path(&["deploy"]), &mut context()).await.unwrap();
        assert_eq!(
            entries(&journal),
            vec!["spawner@before:deploy:package", "builder@build:compile"]
        );
    }

    #[tokio::test]
    async fn spawned_failures_keep_their_origin() {
        let journal = Journal::default();
        let mut spawner = recorder("spawner", &journal, &["deploy:deploy"]);
        spawner.spawn_on = Some((HookKey::during("deploy:deploy"), vec!["build"], false));
        let mut builder = recorder("builder", &journal, &["build:compile"]);
        builder.fail_on = Some(HookKey::during("build:compile"));
        let d = dispatcher(vec![spawner, builder]);

        let err = d.run(&path(&["deploy"]), &mut context()).await.unwrap_err();
        match err {
            LifecycleError::HookFailed { plugin, hook, .. } => {
                assert_eq!(plugin, "builder");
                assert_eq!(hook, "build:compile");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn commands_without_hooks_succeed() {
        let d = dispatcher(vec![recorder("idle", &Journal::default(), &[])]);
        d.run(&path(&["deploy"]), &mut context()).await.unwrap();
        assert!(matches!(
            d.run(&path(&["build"]), &mut context()).await,
            Err(LifecycleError::Command(CommandError::UnknownCommand { .. }))
        ));
    }
}
