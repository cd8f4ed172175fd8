// src/core/variables/mod.rs

//! # Variable Resolution
//!
//! Materializes a configuration tree by replacing every `${source:address}`
//! reference with the value produced by the resolver registered for
//! `source`. See [`engine::VariableEngine`] for the scheduling rules.

pub mod engine;
pub mod graph;
pub mod parser;
pub mod path;
pub mod registry;
pub mod sources;

pub use engine::{VariableEngine, extract_references};
pub use registry::{ResolveRequest, ResolveScope, Resolver, ResolverRegistry};

use parser::SyntaxError;
use thiserror::Error;

/// Errors raised while resolving configuration variables.
///
/// `Clone` so one failure can be handed to every waiter of a shared
/// resolution.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VariableError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error("Unknown variable source \"{source_name}\" in {reference}.")]
    UnknownSource {
        source_name: String,
        reference: String,
    },

    #[error("Value not found for variable {reference} and no fallback applies.")]
    NotFound { reference: String },

    #[error("Cannot resolve \"{key}\": {message}")]
    ResolverFailed { key: String, message: String },

    #[error("Circular variable dependency: {}", .chain.join(" -> "))]
    Cycle { chain: Vec<String> },

    #[error("Resolving \"{key}\" exceeded the maximum nesting depth of {limit}.")]
    ExcessiveDepth { key: String, limit: usize },

    #[error("Variable {reference} resolved to {kind}, which cannot be embedded in a string.")]
    NonScalarEmbed { reference: String, kind: &'static str },

    #[error("Property \"{path}\" still holds an unresolved reference: {value}")]
    Unresolved { path: String, value: String },

    #[error("Resolution task for \"{key}\" failed: {message}")]
    TaskFailed { key: String, message: String },

    #[error("Cannot resolve \"{path}\": {inner}")]
    At {
        path: String,
        #[source]
        inner: Box<VariableError>,
    },
}

impl VariableError {
    /// The innermost error, without the property location wrappers.
    pub fn root_cause(&self) -> &VariableError {
        match self {
            VariableError::At { inner, .. } => inner.root_cause(),
            other => other,
        }
    }
}
