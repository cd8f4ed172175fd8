// src/core/config_loader.rs

//! # Config Loader
//!
//! Finds the service description file, parses it into a `serde_json::Value`
//! tree and validates the handful of properties that must be known before any
//! plugin is loaded.
//!
//! The properties that choose which plugins exist (`provider.name` and
//! `plugins`) are read from the raw tree, so they must not contain variable
//! references.

use crate::constants::{SERVICE_FILE_EXTENSIONS, SERVICE_FILE_STEM};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No service description found in '{dir}' (looked for {candidates}).")]
    NotFound { dir: PathBuf, candidates: String },
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse '{path}': {message}")]
    Parse { path: PathBuf, message: String },
    #[error("Unsupported file format for '{0}'.")]
    UnsupportedFormat(PathBuf),
    #[error("The service description in '{0}' must be a map at the top level.")]
    NotAMap(PathBuf),
    #[error("Missing required property \"{0}\" in the service description.")]
    MissingProperty(&'static str),
    #[error("Property \"{property}\" must be {expected}.")]
    InvalidProperty {
        property: &'static str,
        expected: &'static str,
    },
    #[error("Property \"{0}\" cannot contain variable references because it decides which plugins are loaded.")]
    DynamicProperty(&'static str),
}

/// The loaded service description, before variable resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDescription {
    pub service_dir: PathBuf,
    pub config_path: PathBuf,
    /// The `service` property as written; it may still hold references.
    pub name: String,
    pub provider_name: String,
    /// Names of service-declared plugins, in declaration order.
    pub plugins: Vec<String>,
    pub raw: Value,
}

impl ServiceDescription {
    /// A description built in memory, used by tests and embedders that do
    /// not read a file.
    pub fn from_value(service_dir: &Path, raw: Value) -> Result<Self, ConfigError> {
        describe(raw, service_dir.join(format!("{}.yml", SERVICE_FILE_STEM)), service_dir)
    }
}

// --- DISCOVERY ---

/// Looks for `stratus.{yml,yaml,json,toml}` in `dir`, in that order.
pub fn discover(dir: &Path) -> Result<PathBuf, ConfigError> {
    SERVICE_FILE_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}.{}", SERVICE_FILE_STEM, ext)))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| ConfigError::NotFound {
            dir: dir.to_path_buf(),
            candidates: SERVICE_FILE_EXTENSIONS
                .iter()
                .map(|ext| format!("{}.{}", SERVICE_FILE_STEM, ext))
                .collect::<Vec<_>>()
                .join(", "),
        })
}

/// Loads the service description from `explicit` (relative to `cwd`) or by
/// discovery in `cwd`.
pub fn load(cwd: &Path, explicit: Option<&Path>) -> Result<ServiceDescription, ConfigError> {
    let config_path = match explicit {
        Some(path) => cwd.join(path),
        None => discover(cwd)?,
    };
    let config_path = dunce::simplified(&config_path).to_path_buf();
    log::debug!("Loading service description from {:?}", config_path);

    let text = std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Io {
        path: config_path.clone(),
        source,
    })?;
    let raw = parse_document(&config_path, &text)?;

    let service_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cwd.to_path_buf());
    describe(raw, config_path, &service_dir)
}

// --- PARSING ---

/// Parses YAML, JSON or TOML text into a value tree, chosen by extension.
pub fn parse_document(path: &Path, text: &str) -> Result<Value, ConfigError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let parse_error = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    match extension.as_str() {
        "yml" | "yaml" => {
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_yaml_ng::from_str(text).map_err(|e| parse_error(e.to_string()))
        }
        "json" => serde_json::from_str(text).map_err(|e| parse_error(e.to_string())),
        "toml" => {
            let table: toml::Value = toml::from_str(text).map_err(|e| parse_error(e.to_string()))?;
            serde_json::to_value(table).map_err(|e| parse_error(e.to_string()))
        }
        _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
    }
}

// --- VALIDATION ---

fn describe(raw: Value, config_path: PathBuf, service_dir: &Path) -> Result<ServiceDescription, ConfigError> {
    let Value::Object(map) = &raw else {
        return Err(ConfigError::NotAMap(config_path));
    };

    let name = match map.get("service") {
        Some(Value::String(name)) if !name.trim().is_empty() => name.clone(),
        Some(_) => {
            return Err(ConfigError::InvalidProperty {
                property: "service",
                expected: "a non-empty string",
            });
        }
        None => return Err(ConfigError::MissingProperty("service")),
    };

    let provider_name = match map.get("provider") {
        Some(Value::String(name)) => name.clone(),
        Some(Value::Object(provider)) => match provider.get("name") {
            Some(Value::String(name)) => name.clone(),
            Some(_) => {
                return Err(ConfigError::InvalidProperty {
                    property: "provider.name",
                    expected: "a string",
                });
            }
            None => return Err(ConfigError::MissingProperty("provider.name")),
        },
        Some(_) => {
            return Err(ConfigError::InvalidProperty {
                property: "provider",
                expected: "a string or a map with a \"name\"",
            });
        }
        None => return Err(ConfigError::MissingProperty("provider")),
    };
    if provider_name.contains("${") {
        return Err(ConfigError::DynamicProperty("provider.name"));
    }

    let plugins = read_plugin_names(map.get("plugins"))?;

    Ok(ServiceDescription {
        service_dir: dunce::simplified(service_dir).to_path_buf(),
        config_path,
        name,
        provider_name,
        plugins,
        raw,
    })
}

/// Accepts `plugins: [a, b]` or `plugins: { modules: [a, b] }`.
fn read_plugin_names(value: Option<&Value>) -> Result<Vec<String>, ConfigError> {
    let list = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(Value::Object(map)) => match map.get("modules") {
            Some(Value::Array(items)) => items,
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(_) => {
                return Err(ConfigError::InvalidProperty {
                    property: "plugins.modules",
                    expected: "a list of plugin names",
                });
            }
        },
        Some(_) => {
            return Err(ConfigError::InvalidProperty {
                property: "plugins",
                expected: "a list of plugin names",
            });
        }
    };

    list.iter()
        .map(|item| match item {
            Value::String(name) if name.contains("${") => Err(ConfigError::DynamicProperty("plugins")),
            Value::String(name) => Ok(name.clone()),
            _ => Err(ConfigError::InvalidProperty {
                property: "plugins",
                expected: "a list of plugin names",
            }),
        })
        .collect()
}
