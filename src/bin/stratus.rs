// src/bin/stratus.rs

use clap::Parser;
use colored::*;
use std::env;
use stratus::cli::{self, Cli};
use stratus::constants::{DEFAULT_LOG_FILTER, LOG_ENV_VAR};
use stratus::core::commands::CommandError;
use stratus::system::executor::ExecutionError;
use stratus::{RunOutcome, Runner};

/// Parses arguments, runs one invocation and maps its outcome to an exit code.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Cli::parse().args;

    let default_filter = cli::log_level(&args).unwrap_or(DEFAULT_LOG_FILTER);
    env_logger::Builder::from_env(env_logger::Env::default().filter_or(LOG_ENV_VAR, default_filter)).init();

    let result = match env::current_dir() {
        Ok(cwd) => Runner::new(&cwd).run(&args).await,
        Err(e) => Err(anyhow::Error::new(e).context("Cannot read the current directory")),
    };

    match result {
        Ok(RunOutcome::Completed) => {}
        Ok(RunOutcome::Help(text)) => println!("{}", text),
        Ok(RunOutcome::Version(version)) => println!("{}", version),
        Err(e) => {
            // An interrupted script exits the way a shell would, without noise.
            let interrupted = e
                .chain()
                .any(|cause| matches!(cause.downcast_ref::<ExecutionError>(), Some(ExecutionError::Interrupted(_))));
            if interrupted {
                std::process::exit(130);
            }

            eprintln!("\n{}: {:#}", "Error".red().bold(), e);
            if e.downcast_ref::<CommandError>().is_some_and(CommandError::is_usage_error) {
                eprintln!("Run '{} --help' for usage.", env!("CARGO_PKG_NAME"));
            }
            std::process::exit(1);
        }
    }
}
