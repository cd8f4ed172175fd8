// src/constants.rs

/// Base name of the service description file looked up in the working directory.
pub const SERVICE_FILE_STEM: &str = "stratus";

/// Extensions tried, in order, when discovering the service description file.
pub const SERVICE_FILE_EXTENSIONS: &[&str] = &["yml", "yaml", "json", "toml"];

/// Environment variable holding the `env_logger` filter.
pub const LOG_ENV_VAR: &str = "STRATUS_LOG";

/// Default log filter when `STRATUS_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Stage used by the `sls` and `param` sources when neither `--stage` nor
/// `provider.stage` is set.
pub const DEFAULT_STAGE: &str = "dev";

/// Maximum number of times a resolved value may surface new references
/// before resolution is aborted as runaway nesting.
pub const MAX_NEST_DEPTH: usize = 10;

/// Maximum number of full extraction passes over the configuration tree.
pub const MAX_RESOLUTION_PASSES: usize = 4;

/// Run-level event dispatched before the requested command.
pub const INITIALIZE_EVENT: &str = "initialize";

/// Run-level event dispatched after the requested command succeeds.
pub const FINALIZE_EVENT: &str = "finalize";

/// Run-level event dispatched after the requested command fails.
pub const ERROR_EVENT: &str = "error";

/// Directory, relative to the service, where `package` writes its artifacts.
pub const PACKAGE_DIR: &str = ".stratus";

/// Resolved configuration snapshot written into the package directory.
pub const CONFIGURATION_ARTIFACT: &str = "configuration.json";
