// src/core/variables/registry.rs

//! Named resolver implementations, looked up by the source name of a
//! reference (`env` in `${env:HOME}`).

use super::parser::{parse_template, unescape};
use crate::constants::DEFAULT_STAGE;
use crate::core::provider::Provider;
use crate::models::Options;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

/// A single resolution request handed to a [`Resolver`].
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub source: &'a str,
    /// Text after the `:`, already free of nested references.
    pub address: Option<&'a str>,
    /// Parenthesised parameters, already free of nested references.
    pub params: &'a [String],
    pub scope: &'a ResolveScope,
}

impl ResolveRequest<'_> {
    /// The address, or an error naming the source when it is missing.
    pub fn require_address(&self) -> anyhow::Result<&str> {
        match self.address {
            Some(address) if !address.is_empty() => Ok(address),
            _ => anyhow::bail!("Source \"{}\" requires an address", self.source),
        }
    }
}

/// Capability to resolve one source.
///
/// `Ok(None)` means "not found" and lets a fallback take over; `Err` aborts
/// resolution. The returned value may itself contain references, which the
/// engine resolves transitively.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, request: ResolveRequest<'_>) -> anyhow::Result<Option<Value>>;
}

/// Everything resolvers may read. Built once per invocation.
#[derive(Clone)]
pub struct ResolveScope {
    /// The configuration as loaded, before any substitution.
    pub configuration: Value,
    pub options: Options,
    pub service_dir: PathBuf,
    pub provider: Arc<dyn Provider>,
    pub invocation_id: Uuid,
    /// `provider.stage` after resolution, when it holds references. Set by the
    /// engine before any other reference is resolved.
    pub resolved_stage: OnceLock<String>,
}

impl fmt::Debug for ResolveScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveScope")
            .field("options", &self.options)
            .field("service_dir", &self.service_dir)
            .field("provider", &self.provider.name())
            .field("invocation_id", &self.invocation_id)
            .field("resolved_stage", &self.resolved_stage.get())
            .finish_non_exhaustive()
    }
}

impl ResolveScope {
    pub fn new(
        configuration: Value,
        options: Options,
        service_dir: PathBuf,
        provider: Arc<dyn Provider>,
        invocation_id: Uuid,
    ) -> Self {
        Self {
            configuration,
            options,
            service_dir,
            provider,
            invocation_id,
            resolved_stage: OnceLock::new(),
        }
    }

    /// `--stage`, then `provider.stage`, then the default stage.
    ///
    /// Fails while a `provider.stage` that holds references is still being
    /// resolved, i.e. when it depends on the stage itself.
    pub fn stage(&self) -> anyhow::Result<String> {
        if let Some(Value::String(stage)) = self.options.get("stage") {
            return Ok(stage.clone());
        }
        if let Some(stage) = self.resolved_stage.get() {
            return Ok(stage.clone());
        }
        match self.configuration.pointer("/provider/stage") {
            Some(Value::String(stage)) if stage_is_dynamic(stage) => {
                anyhow::bail!("\"provider.stage\" ({}) cannot depend on the stage itself", stage)
            }
            Some(Value::String(stage)) => Ok(unescape(stage).into_owned()),
            Some(other) if !other.is_null() => Ok(other.to_string()),
            _ => Ok(DEFAULT_STAGE.to_string()),
        }
    }

    /// The raw `provider.stage` when it must be resolved before use.
    pub fn dynamic_stage(&self) -> Option<&str> {
        if self.options.get("stage").is_some_and(Value::is_string) {
            return None;
        }
        self.configuration
            .pointer("/provider/stage")
            .and_then(Value::as_str)
            .filter(|stage| stage_is_dynamic(stage))
    }
}

fn stage_is_dynamic(stage: &str) -> bool {
    parse_template(stage).is_ok_and(|template| template.has_references())
}

#[derive(Clone, Default)]
pub struct ResolverRegistry {
    resolvers: HashMap<String, Arc<dyn Resolver>>,
}

impl fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.resolvers.keys().collect();
        names.sort();
        f.debug_struct("ResolverRegistry")
            .field("sources", &names)
            .finish()
    }
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `resolver` under `source`. A later registration for the same
    /// source replaces the earlier one.
    pub fn register(&mut self, source: &str, resolver: Arc<dyn Resolver>) {
        if self.resolvers.insert(source.to_string(), resolver).is_some() {
            log::debug!("Resolver for source '{}' was replaced.", source);
        }
    }

    pub fn get(&self, source: &str) -> Option<Arc<dyn Resolver>> {
        self.resolvers.get(source).cloned()
    }

    pub fn contains(&self, source: &str) -> bool {
        self.resolvers.contains_key(source)
    }
}
