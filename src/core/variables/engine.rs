// src/core/variables/engine.rs

//! # Variable Engine
//!
//! Resolves references in three layers:
//!
//! 1. **Extraction**: a depth-first walk collects every string that holds at
//!    least one reference, together with its [`PropertyPath`].
//! 2. **Keys**: each `(source, address, params)` tuple is resolved through a
//!    single shared future stored in the memo cache. The resolver call runs in
//!    its own task, so concurrent requests for the same key collapse onto one
//!    call and a failing sibling does not cancel calls already in flight.
//! 3. **Transitivity**: a value returned by a resolver is materialized again
//!    before it is cached. A key requested while already on the current
//!    resolution stack, or whose request would close a loop in the dependency
//!    graph, is a cycle.
//!
//! `resolve_all` works on a copy; the caller only sees a tree once every
//! reference in it has been replaced. Escaped `\${` openings are turned into
//! plain text only then, so a later pass never mistakes them for references.

use super::VariableError;
use super::graph::DependencyGraph;
use super::parser::{Reference, Segment, SourceSpec, Template, may_contain_reference, parse_template, unescape};
use super::path::PropertyPath;
use super::registry::{ResolveRequest, ResolveScope, ResolverRegistry};
use crate::constants::{MAX_NEST_DEPTH, MAX_RESOLUTION_PASSES};
use futures::future::{BoxFuture, Shared, try_join_all};
use futures::{FutureExt, TryFutureExt};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

type SharedResolution = Shared<BoxFuture<'static, Result<Option<Value>, VariableError>>>;

/// The resolution stack of the request currently being served.
type Chain = Arc<Vec<ResolutionKey>>;

/// Identity of one resolver call. The cache, the resolution stack and the
/// dependency graph compare keys structurally; `Display` is only for messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct ResolutionKey {
    source: String,
    address: Option<String>,
    params: Vec<String>,
}

impl fmt::Display for ResolutionKey {
    /// `self:custom.a`, `file(./x.yml):db`, `strToBool(true)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)?;
        if !self.params.is_empty() {
            write!(f, "({})", self.params.join(","))?;
        }
        if let Some(address) = &self.address {
            write!(f, ":{}", address)?;
        }
        Ok(())
    }
}

pub struct VariableEngine {
    registry: ResolverRegistry,
    scope: ResolveScope,
    cache: Mutex<HashMap<ResolutionKey, SharedResolution>>,
    graph: DependencyGraph<ResolutionKey>,
}

impl fmt::Debug for VariableEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableEngine")
            .field("registry", &self.registry)
            .field("scope", &self.scope)
            .field("cached_keys", &self.cached_keys())
            .finish_non_exhaustive()
    }
}

impl VariableEngine {
    pub fn new(registry: ResolverRegistry, scope: ResolveScope) -> Arc<Self> {
        Arc::new(Self {
            registry,
            scope,
            cache: Mutex::new(HashMap::new()),
            graph: DependencyGraph::new(),
        })
    }

    pub fn scope(&self) -> &ResolveScope {
        &self.scope
    }

    /// Keys resolved (or being resolved) so far, sorted.
    pub fn cached_keys(&self) -> Vec<String> {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = cache.keys().map(ToString::to_string).collect();
        keys.sort();
        keys
    }

    // --- PUBLIC ENTRY POINTS ---

    /// Returns a copy of `configuration` with every reference replaced.
    pub async fn resolve_all(self: &Arc<Self>, configuration: &Value) -> Result<Value, VariableError> {
        self.pin_stage().await?;
        let mut tree = configuration.clone();

        for pass in 1..=MAX_RESOLUTION_PASSES {
            let found = extract_references(&tree)?;
            if found.is_empty() {
                log::debug!("Configuration fully resolved after {} pass(es).", pass - 1);
                unescape_tree(&mut tree);
                return Ok(tree);
            }
            log::debug!("Resolution pass {}: {} reference(s).", pass, found.len());

            let resolutions = found.iter().map(|(path, raw)| {
                let location = path.to_string();
                Arc::clone(self)
                    .resolve_str(raw.clone(), Chain::default())
                    .map_err(move |inner| VariableError::At {
                        path: location,
                        inner: Box::new(inner),
                    })
            });
            let values = try_join_all(resolutions).await?;

            for ((path, _), value) in found.into_iter().zip(values) {
                path.set(&mut tree, value);
            }
        }

        match extract_references(&tree)?.into_iter().next() {
            Some((path, raw)) => Err(VariableError::Unresolved {
                path: path.to_string(),
                value: raw,
            }),
            None => {
                unescape_tree(&mut tree);
                Ok(tree)
            }
        }
    }

    /// Resolves an arbitrary value against the same memo cache, e.g. a string
    /// a hook builds at run time.
    pub async fn resolve_value(self: &Arc<Self>, value: Value) -> Result<Value, VariableError> {
        self.pin_stage().await?;
        let mut value = Arc::clone(self).materialize(value, Chain::default()).await?;
        unescape_tree(&mut value);
        Ok(value)
    }

    /// Resolves a `provider.stage` that holds references, so every source
    /// that reads the stage sees the same value the hooks will.
    async fn pin_stage(self: &Arc<Self>) -> Result<(), VariableError> {
        let Some(raw) = self.scope.dynamic_stage() else {
            return Ok(());
        };
        if self.scope.resolved_stage.get().is_some() {
            return Ok(());
        }
        let at_stage = |inner| VariableError::At {
            path: "provider.stage".to_string(),
            inner: Box::new(inner),
        };
        let value = Arc::clone(self)
            .resolve_str(raw.to_string(), Chain::default())
            .await
            .map_err(at_stage)?;
        let stage = unescape(&stringify(raw, value).map_err(at_stage)?).into_owned();
        log::debug!("Stage resolved to '{}'.", stage);
        // A concurrent caller may have pinned the same value first.
        let _ = self.scope.resolved_stage.set(stage);
        Ok(())
    }

    // --- RECURSIVE RESOLUTION ---

    fn materialize(self: Arc<Self>, value: Value, chain: Chain) -> BoxFuture<'static, Result<Value, VariableError>> {
        async move {
            let found = extract_references(&value)?;
            if found.is_empty() {
                return Ok(value);
            }
            let resolutions = found
                .iter()
                .map(|(_, raw)| Arc::clone(&self).resolve_str(raw.clone(), Arc::clone(&chain)));
            let resolved = try_join_all(resolutions).await?;

            let mut value = value;
            for ((path, _), replacement) in found.into_iter().zip(resolved) {
                path.set(&mut value, replacement);
            }
            Ok(value)
        }
        .boxed()
    }

    /// A whole-string reference keeps the resolved value's type; anything else
    /// is rendered to a string.
    fn resolve_str(self: Arc<Self>, input: String, chain: Chain) -> BoxFuture<'static, Result<Value, VariableError>> {
        async move {
            let template = parse_template(&input)?;
            if let Some(reference) = template.as_single_reference() {
                return self.resolve_reference(reference.clone(), chain).await;
            }
            if !template.has_references() {
                return Ok(Value::String(input));
            }
            self.render(template, chain).await.map(Value::String)
        }
        .boxed()
    }

    fn render(self: Arc<Self>, template: Template, chain: Chain) -> BoxFuture<'static, Result<String, VariableError>> {
        async move {
            let parts = template.segments.into_iter().map(|segment| {
                let engine = Arc::clone(&self);
                let chain = Arc::clone(&chain);
                async move {
                    match segment {
                        Segment::Text(text) => Ok(text),
                        Segment::Reference(reference) => {
                            let raw = reference.raw.clone();
                            let value = engine.resolve_reference(reference, chain).await?;
                            stringify(&raw, value)
                        }
                    }
                }
            });
            Ok(try_join_all(parts).await?.concat())
        }
        .boxed()
    }

    /// Tries the primary source, then each fallback in order. "Not found"
    /// moves on to the next candidate; errors abort.
    fn resolve_reference(self: Arc<Self>, reference: Reference, chain: Chain) -> BoxFuture<'static, Result<Value, VariableError>> {
        async move {
            for candidate in reference.sources {
                let spec = match candidate {
                    SourceSpec::Literal(value) => return Ok(value),
                    SourceSpec::Variable(spec) => spec,
                };

                let address = match spec.address {
                    Some(address) => Some(Arc::clone(&self).render(address, Arc::clone(&chain)).await?),
                    None => None,
                };
                let params = try_join_all(
                    spec.params
                        .into_iter()
                        .map(|param| Arc::clone(&self).render(param, Arc::clone(&chain))),
                )
                .await?;

                let key = ResolutionKey {
                    source: spec.source,
                    address,
                    params,
                };
                match Arc::clone(&self).resolve_key(key.clone(), &reference.raw, &chain).await? {
                    Some(value) => return Ok(value),
                    None => log::trace!("'{}' reported not found, trying next fallback.", key),
                }
            }

            Err(VariableError::NotFound {
                reference: reference.raw,
            })
        }
        .boxed()
    }

    async fn resolve_key(
        self: Arc<Self>,
        key: ResolutionKey,
        reference: &str,
        chain: &Chain,
    ) -> Result<Option<Value>, VariableError> {
        if let Some(position) = chain.iter().position(|k| *k == key) {
            let mut cycle = describe(chain.get(position..).unwrap_or_default());
            cycle.push(key.to_string());
            return Err(VariableError::Cycle { chain: cycle });
        }
        if let Some(parent) = chain.last() {
            self.graph
                .add_edge(parent, &key)
                .map_err(|cycle| VariableError::Cycle { chain: describe(&cycle) })?;
        }
        if chain.len() >= MAX_NEST_DEPTH {
            return Err(VariableError::ExcessiveDepth {
                key: key.to_string(),
                limit: MAX_NEST_DEPTH,
            });
        }
        if !self.registry.contains(&key.source) {
            return Err(VariableError::UnknownSource {
                source_name: key.source,
                reference: reference.to_string(),
            });
        }

        let shared = {
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            match cache.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    let mut next_chain = chain.as_ref().clone();
                    next_chain.push(key.clone());
                    let resolution = self.spawn_resolution(key.clone(), Arc::new(next_chain));
                    cache.insert(key, resolution.clone());
                    resolution
                }
            }
        };
        shared.await
    }

    /// Starts the resolver call for `key` in its own task and returns the
    /// shared handle every requester awaits.
    fn spawn_resolution(self: &Arc<Self>, key: ResolutionKey, chain: Chain) -> SharedResolution {
        let engine = Arc::clone(self);
        let id = key.to_string();
        log::trace!("Scheduling resolution of '{}'.", id);

        let handle = tokio::spawn(run_resolution(engine, key, chain));

        async move {
            handle.await.map_err(|e| VariableError::TaskFailed {
                key: id,
                message: e.to_string(),
            })?
        }
        .boxed()
        .shared()
    }
}

/// Body of a resolution task: call the resolver, then materialize whatever it
/// returned with `chain` as the resolution stack.
async fn run_resolution(
    engine: Arc<VariableEngine>,
    key: ResolutionKey,
    chain: Chain,
) -> Result<Option<Value>, VariableError> {
    let id = key.to_string();
    let resolver = engine
        .registry
        .get(&key.source)
        .ok_or_else(|| VariableError::UnknownSource {
            source_name: key.source.clone(),
            reference: id.clone(),
        })?;
    let request = ResolveRequest {
        source: &key.source,
        address: key.address.as_deref(),
        params: &key.params,
        scope: &engine.scope,
    };
    let raw = resolver
        .resolve(request)
        .await
        .map_err(|e| VariableError::ResolverFailed {
            key: id.clone(),
            message: format!("{:#}", e),
        })?;

    match raw {
        Some(value) => {
            let resolved = Arc::clone(&engine).materialize(value, chain).await?;
            log::trace!("Resolved '{}'.", id);
            Ok(Some(resolved))
        }
        None => Ok(None),
    }
}

fn describe(keys: &[ResolutionKey]) -> Vec<String> {
    keys.iter().map(ToString::to_string).collect()
}

// --- TREE HELPERS ---

/// Collects every string in `value` that holds at least one reference.
pub fn extract_references(value: &Value) -> Result<Vec<(PropertyPath, String)>, VariableError> {
    let mut found = Vec::new();
    collect(value, PropertyPath::root(), &mut found)?;
    Ok(found)
}

fn collect(value: &Value, path: PropertyPath, found: &mut Vec<(PropertyPath, String)>) -> Result<(), VariableError> {
    match value {
        Value::String(s) if may_contain_reference(s) => {
            if parse_template(s)?.has_references() {
                found.push((path, s.clone()));
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                collect(item, path.child_index(index), found)?;
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                collect(item, path.child_key(key), found)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Applies [`unescape`] to every string in `value`.
fn unescape_tree(value: &mut Value) {
    match value {
        Value::String(s) => {
            let unescaped = match unescape(s) {
                Cow::Owned(unescaped) => Some(unescaped),
                Cow::Borrowed(_) => None,
            };
            if let Some(unescaped) = unescaped {
                *s = unescaped;
            }
        }
        Value::Array(items) => items.iter_mut().for_each(unescape_tree),
        Value::Object(map) => map.values_mut().for_each(unescape_tree),
        _ => {}
    }
}

fn stringify(reference: &str, value: Value) -> Result<String, VariableError> {
    let kind = match value {
        Value::String(s) => return Ok(s),
        Value::Number(n) => return Ok(n.to_string()),
        Value::Bool(b) => return Ok(b.to_string()),
        Value::Null => "null",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    };
    Err(VariableError::NonScalarEmbed {
        reference: reference.to_string(),
        kind,
    })
}
