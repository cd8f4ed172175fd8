//! # stratus
//!
//! A plugin-driven lifecycle runner. Plugins contribute commands and hook
//! handlers; a command runs as an ordered sequence of lifecycle events over
//! a service configuration whose `${source:address}` references have been
//! materialized first.
//!
//! [`Runner`] is the entry point for one invocation.

pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
pub mod plugins;
pub mod system;

pub use crate::core::runner::{RunOutcome, Runner};
