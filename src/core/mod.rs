// src/core/mod.rs

pub mod arg_parser;
pub mod commands;
pub mod config_loader;
pub mod context;
pub mod dispatcher;
pub mod help;
pub mod lifecycle;
pub mod plugin;
pub mod provider;
pub mod runner;
pub mod variables;
