// src/core/context.rs

//! The per-invocation state handed to every plugin constructor and hook.

use crate::constants::DEFAULT_STAGE;
use crate::core::config_loader::ServiceDescription;
use crate::core::provider::{Provider, UnconfiguredProvider};
use crate::core::variables::{VariableEngine, VariableError};
use crate::models::Options;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Mutable state shared by all hooks of one invocation.
///
/// Hooks run one at a time, so no locking is needed around the context
/// itself. Per-plugin state that must survive between hooks goes into the
/// scratch area, keyed by plugin name.
pub struct ExecutionContext {
    pub service: ServiceDescription,
    /// The configuration tree; fully resolved once hooks start running.
    pub configuration: Value,
    pub options: Options,
    pub free_args: Vec<String>,
    /// Path of the command currently being dispatched.
    pub command: Vec<String>,
    pub invocation_id: Uuid,
    provider: Arc<dyn Provider>,
    variables: Option<Arc<VariableEngine>>,
    scratch: HashMap<String, Box<dyn Any + Send + Sync>>,
    failure: Option<String>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("service", &self.service.name)
            .field("command", &self.command)
            .field("options", &self.options)
            .field("provider", &self.provider.name())
            .field("invocation_id", &self.invocation_id)
            .field("scratch", &self.scratch.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    pub fn new(service: ServiceDescription) -> Self {
        let provider: Arc<dyn Provider> = Arc::new(UnconfiguredProvider::new(&service.provider_name));
        Self {
            configuration: service.raw.clone(),
            service,
            options: Options::new(),
            free_args: Vec::new(),
            command: Vec::new(),
            invocation_id: Uuid::new_v4(),
            provider,
            variables: None,
            scratch: HashMap::new(),
            failure: None,
        }
    }

    pub fn service_dir(&self) -> &Path {
        &self.service.service_dir
    }

    // --- PROVIDER ---

    pub fn provider(&self) -> Arc<dyn Provider> {
        Arc::clone(&self.provider)
    }

    pub fn set_provider(&mut self, provider: Arc<dyn Provider>) {
        log::debug!("Installing provider handle '{}'.", provider.name());
        self.provider = provider;
    }

    // --- OPTIONS ---

    pub fn option_str(&self, name: &str) -> Option<&str> {
        self.options.get(name).and_then(Value::as_str)
    }

    pub fn option_flag(&self, name: &str) -> bool {
        matches!(self.options.get(name), Some(Value::Bool(true)))
    }

    /// The resolved `service` property, or the name as written before
    /// resolution.
    pub fn service_name(&self) -> &str {
        self.configuration
            .get("service")
            .and_then(Value::as_str)
            .unwrap_or(&self.service.name)
    }

    /// `--stage`, then `provider.stage`, then the default stage.
    pub fn stage(&self) -> String {
        self.option_str("stage")
            .or_else(|| self.configuration.pointer("/provider/stage").and_then(Value::as_str))
            .unwrap_or(DEFAULT_STAGE)
            .to_string()
    }

    /// `--region`, then `provider.region`.
    pub fn region(&self) -> Option<String> {
        self.option_str("region")
            .or_else(|| self.configuration.pointer("/provider/region").and_then(Value::as_str))
            .map(str::to_string)
    }

    // --- VARIABLES ---

    pub fn variables(&self) -> Option<&Arc<VariableEngine>> {
        self.variables.as_ref()
    }

    pub fn set_variables(&mut self, engine: Arc<VariableEngine>) {
        self.variables = Some(engine);
    }

    /// Resolves references in `value` with the invocation's engine, sharing its
    /// memo cache. Without an engine the value is returned as is.
    pub async fn resolve(&self, value: Value) -> Result<Value, VariableError> {
        match &self.variables {
            Some(engine) => engine.resolve_value(value).await,
            None => Ok(value),
        }
    }

    // --- SCRATCH ---

    pub fn scratch<T: Any + Send + Sync>(&self, plugin: &str) -> Option<&T> {
        self.scratch.get(plugin).and_then(|b| b.downcast_ref::<T>())
    }

    /// Returns the plugin's scratch value, creating it with `T::default()`
    /// when absent or when a value of another type is stored.
    pub fn scratch_mut<T: Any + Send + Sync + Default>(&mut self, plugin: &str) -> &mut T {
        let slot = self
            .scratch
            .entry(plugin.to_string())
            .or_insert_with(|| Box::new(T::default()));
        if !slot.is::<T>() {
            *slot = Box::new(T::default());
        }
        match slot.downcast_mut::<T>() {
            Some(value) => value,
            None => unreachable!("scratch slot was just set to the requested type"),
        }
    }

    // --- FAILURE ---

    /// The message of the error being handled, while `error` hooks run.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub(crate) fn set_failure(&mut self, message: Option<String>) {
        self.failure = message;
    }

    /// Resolves a path relative to the service directory.
    pub fn service_path(&self, relative: &str) -> PathBuf {
        self.service.service_dir.join(relative)
    }
}
