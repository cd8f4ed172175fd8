// src/core/variables/sources.rs

//! Built-in variable sources.
//!
//! | source      | example                               |
//! |-------------|---------------------------------------|
//! | `env`       | `${env:HOME}`                         |
//! | `opt`       | `${opt:stage}`, `${opt:}`             |
//! | `self`      | `${self:custom.bucket}`, `${self:}`   |
//! | `file`      | `${file(./extra.yml):db.host}`        |
//! | `strToBool` | `${strToBool(${env:ENABLED})}`        |
//! | `sls`       | `${sls:instanceId}`, `${sls:stage}`   |
//! | `param`     | `${param:domain}`                     |
//! | `cf`        | `${cf:network-prod.VpcId}`            |

use super::path::PropertyPath;
use super::registry::{ResolveRequest, Resolver, ResolverRegistry};
use crate::core::config_loader;
use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

/// Registers every built-in source. `env` reads from the given snapshot.
pub fn register_builtins(registry: &mut ResolverRegistry, env: EnvResolver) {
    registry.register("env", Arc::new(env));
    registry.register("opt", Arc::new(OptResolver));
    registry.register("self", Arc::new(SelfResolver));
    registry.register("file", Arc::new(FileResolver));
    registry.register("strToBool", Arc::new(StrToBoolResolver));
    registry.register("sls", Arc::new(SlsResolver));
    registry.register("param", Arc::new(ParamResolver));
    registry.register("cf", Arc::new(CfResolver));
}

fn lookup_address(value: &Value, address: Option<&str>) -> Option<Value> {
    match address {
        None | Some("") => Some(value.clone()),
        Some(address) => PropertyPath::parse_dotted(address).lookup(value).cloned(),
    }
}

// --- env ---

/// Environment variables captured once, when the resolver is built.
#[derive(Clone, Default)]
pub struct EnvResolver {
    vars: HashMap<String, String>,
}

// Values may be secrets.
impl fmt::Debug for EnvResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvResolver")
            .field("vars", &self.vars.len())
            .finish()
    }
}

impl EnvResolver {
    pub fn from_env() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn with_vars<K: Into<String>, V: Into<String>>(vars: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

#[async_trait]
impl Resolver for EnvResolver {
    async fn resolve(&self, request: ResolveRequest<'_>) -> anyhow::Result<Option<Value>> {
        let name = request.require_address()?;
        Ok(self.vars.get(name).cloned().map(Value::String))
    }
}

// --- opt ---

#[derive(Debug, Clone, Copy)]
pub struct OptResolver;

#[async_trait]
impl Resolver for OptResolver {
    async fn resolve(&self, request: ResolveRequest<'_>) -> anyhow::Result<Option<Value>> {
        let options = &request.scope.options;
        match request.address {
            None | Some("") => Ok(Some(Value::Object(
                options.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            ))),
            Some(name) => Ok(options.get(name).cloned()),
        }
    }
}

// --- self ---

#[derive(Debug, Clone, Copy)]
pub struct SelfResolver;

#[async_trait]
impl Resolver for SelfResolver {
    async fn resolve(&self, request: ResolveRequest<'_>) -> anyhow::Result<Option<Value>> {
        Ok(lookup_address(&request.scope.configuration, request.address))
    }
}

// --- file ---

/// Reads a file relative to the service directory. YAML, JSON and TOML files
/// are parsed; anything else resolves to its text. A missing file is "not
/// found".
#[derive(Debug, Clone, Copy)]
pub struct FileResolver;

#[async_trait]
impl Resolver for FileResolver {
    async fn resolve(&self, request: ResolveRequest<'_>) -> anyhow::Result<Option<Value>> {
        let raw_path = request
            .params
            .first()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| anyhow!("The file source needs a path, e.g. ${{file(./config.yml)}}"))?;
        let expanded = shellexpand::tilde(raw_path);
        let path = request.scope.service_dir.join(Path::new(expanded.as_ref()));
        let path = dunce::simplified(&path).to_path_buf();

        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("File {:?} does not exist.", path);
                return Ok(None);
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", path)),
        };

        let content = match config_loader::parse_document(&path, &text) {
            Ok(value) => value,
            Err(config_loader::ConfigError::UnsupportedFormat(_)) => Value::String(text),
            Err(e) => return Err(e.into()),
        };
        Ok(lookup_address(&content, request.address))
    }
}

// --- strToBool ---

#[derive(Debug, Clone, Copy)]
pub struct StrToBoolResolver;

#[async_trait]
impl Resolver for StrToBoolResolver {
    async fn resolve(&self, request: ResolveRequest<'_>) -> anyhow::Result<Option<Value>> {
        let input = request
            .params
            .first()
            .map(String::as_str)
            .or(request.address)
            .unwrap_or_default();
        match input.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Some(Value::Bool(true))),
            "false" | "0" => Ok(Some(Value::Bool(false))),
            other => bail!("strToBool expects true, false, 1 or 0, got \"{}\"", other),
        }
    }
}

// --- sls ---

#[derive(Debug, Clone, Copy)]
pub struct SlsResolver;

#[async_trait]
impl Resolver for SlsResolver {
    async fn resolve(&self, request: ResolveRequest<'_>) -> anyhow::Result<Option<Value>> {
        match request.require_address()? {
            "instanceId" => Ok(Some(Value::String(request.scope.invocation_id.to_string()))),
            "stage" => Ok(Some(Value::String(request.scope.stage()?))),
            other => bail!("Unknown sls property \"{}\"", other),
        }
    }
}

// --- param ---

/// `params.<stage>.<key>`, falling back to `params.default.<key>`.
#[derive(Debug, Clone, Copy)]
pub struct ParamResolver;

#[async_trait]
impl Resolver for ParamResolver {
    async fn resolve(&self, request: ResolveRequest<'_>) -> anyhow::Result<Option<Value>> {
        let key = request.require_address()?;
        let params = &request.scope.configuration["params"];
        let stage = request.scope.stage()?;

        Ok([stage.as_str(), "default"]
            .iter()
            .find_map(|section| params.get(section).and_then(|p| p.get(key)))
            .cloned())
    }
}

// --- cf ---

/// Reads a stack output through the provider handle:
/// `${cf:stack.OutputKey}` or `${cf(region):stack.OutputKey}`.
#[derive(Debug, Clone, Copy)]
pub struct CfResolver;

#[async_trait]
impl Resolver for CfResolver {
    async fn resolve(&self, request: ResolveRequest<'_>) -> anyhow::Result<Option<Value>> {
        let address = request.require_address()?;
        let (stack, output_key) = address
            .split_once('.')
            .filter(|(stack, key)| !stack.is_empty() && !key.is_empty())
            .ok_or_else(|| anyhow!("Expected \"stackName.OutputKey\", got \"{}\"", address))?;

        let mut params = json!({ "StackName": stack });
        if let Some(region) = request.params.first() {
            params["Region"] = Value::String(region.clone());
        }
        let response = request
            .scope
            .provider
            .request("CloudFormation", "describeStacks", params)
            .await
            .with_context(|| format!("Failed to describe stack \"{}\"", stack))?;

        let output = response["Stacks"]
            .as_array()
            .and_then(|stacks| stacks.first())
            .and_then(|s| s["Outputs"].as_array())
            .and_then(|outputs| {
                outputs
                    .iter()
                    .find(|o| o["OutputKey"].as_str() == Some(output_key))
            })
            .map(|o| o["OutputValue"].clone());
        Ok(output)
    }
}
