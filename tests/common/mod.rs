// tests/common/mod.rs

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use stratus::core::dispatcher::HookCall;
use stratus::core::lifecycle::HookKey;
use stratus::core::plugin::{Plugin, PluginOrigin, PluginSpec};
use stratus::core::provider::Provider;
use stratus::core::variables::{ResolveRequest, Resolver};
use stratus::models::CommandSpec;

pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

pub fn args(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

/// Writes `stratus.json` into `dir`.
pub fn write_service(dir: &Path, description: &Value) {
    std::fs::write(
        dir.join("stratus.json"),
        serde_json::to_string_pretty(description).unwrap(),
    )
    .unwrap();
}

// --- PROBE PLUGIN ---

/// A plugin that records every hook it runs as `name@hook` and keeps the
/// configuration it saw on its first hook.
#[derive(Clone)]
pub struct Probe {
    name: String,
    journal: Journal,
    commands: Vec<CommandSpec>,
    hooks: Vec<HookKey>,
    fail_on: Option<HookKey>,
    resolvers: Vec<(String, Arc<dyn Resolver>)>,
    pub snapshot: Arc<Mutex<Option<Value>>>,
}

impl Probe {
    pub fn new(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            journal: Arc::clone(journal),
            commands: Vec::new(),
            hooks: Vec::new(),
            fail_on: None,
            resolvers: Vec::new(),
            snapshot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn command(mut self, spec: CommandSpec) -> Self {
        self.commands.push(spec);
        self
    }

    pub fn hook(mut self, key: &str) -> Self {
        self.hooks.push(key.parse().unwrap());
        self
    }

    pub fn failing_on(mut self, key: &str) -> Self {
        self.fail_on = Some(key.parse().unwrap());
        self
    }

    pub fn resolver(mut self, source: &str, resolver: Arc<dyn Resolver>) -> Self {
        self.resolvers.push((source.to_string(), resolver));
        self
    }

    pub fn spec(&self) -> PluginSpec {
        let plugin: Arc<dyn Plugin> = Arc::new(self.clone());
        PluginSpec::new(&self.name, PluginOrigin::Local, move |_| Ok(Arc::clone(&plugin)))
    }
}

#[async_trait]
impl Plugin for Probe {
    fn name(&self) -> &str {
        &self.name
    }

    fn commands(&self) -> Vec<CommandSpec> {
        self.commands.clone()
    }

    fn hooks(&self) -> Vec<HookKey> {
        self.hooks.clone()
    }

    fn resolvers(&self) -> Vec<(String, Arc<dyn Resolver>)> {
        self.resolvers.clone()
    }

    async fn run_hook(&self, hook: &HookKey, call: HookCall<'_>) -> anyhow::Result<()> {
        self.journal.lock().unwrap().push(format!("{}@{}", self.name, hook));
        self.snapshot
            .lock()
            .unwrap()
            .get_or_insert_with(|| call.ctx.configuration.clone());
        if self.fail_on.as_ref() == Some(hook) {
            anyhow::bail!("{} gave up", self.name);
        }
        Ok(())
    }
}

// --- RESOLVER ---

/// Serves fixed values by address and counts its invocations. Unknown
/// addresses are "not found".
#[derive(Default)]
pub struct CountingResolver {
    values: HashMap<String, Value>,
    pub calls: AtomicUsize,
}

impl CountingResolver {
    pub fn new(values: &[(&str, Value)]) -> Arc<Self> {
        Arc::new(Self {
            values: values.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for CountingResolver {
    async fn resolve(&self, request: ResolveRequest<'_>) -> anyhow::Result<Option<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(request.address.and_then(|a| self.values.get(a).cloned()))
    }
}

// --- PROVIDER ---

pub type Requests = Arc<Mutex<Vec<(String, String, Value)>>>;

/// A provider plugin whose handle records every request and answers `{}`.
pub struct RecordingProvider {
    requests: Requests,
}

#[async_trait]
impl Provider for RecordingProvider {
    fn name(&self) -> &str {
        "aws"
    }

    async fn request(&self, service: &str, operation: &str, params: Value) -> anyhow::Result<Value> {
        self.requests
            .lock()
            .unwrap()
            .push((service.to_string(), operation.to_string(), params));
        Ok(Value::Object(Default::default()))
    }
}

struct ProviderPlugin {
    requests: Requests,
}

#[async_trait]
impl Plugin for ProviderPlugin {
    fn name(&self) -> &str {
        "FakeAws"
    }

    fn provider_name(&self) -> Option<&str> {
        Some("aws")
    }

    fn provider(&self) -> Option<Arc<dyn Provider>> {
        Some(Arc::new(RecordingProvider {
            requests: Arc::clone(&self.requests),
        }))
    }

    async fn run_hook(&self, _hook: &HookKey, _call: HookCall<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

pub fn recording_provider() -> (PluginSpec, Requests) {
    let requests: Requests = Arc::new(Mutex::new(Vec::new()));
    let shared = Arc::clone(&requests);
    let spec = PluginSpec::new("FakeAws", PluginOrigin::Provider, move |_| {
        Ok(Arc::new(ProviderPlugin {
            requests: Arc::clone(&shared),
        }) as Arc<dyn Plugin>)
    });
    (spec, requests)
}
