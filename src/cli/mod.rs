// src/cli/mod.rs

use clap::Parser;

/// stratus: runs plugin-defined lifecycle commands against a service
/// description.
///
/// Commands, their options and their help text come from the loaded plugins,
/// so everything after the program name is handed to the command registry
/// untouched. Run `stratus --help` for the commands of the current service.
#[derive(Parser, Debug)]
#[command(author, about, long_about = None)]
#[command(disable_help_flag = true, disable_version_flag = true, disable_help_subcommand = true)]
pub struct Cli {
    /// The command path followed by its options and free arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// The default log filter implied by `--verbose` or `--debug`, which must be
/// known before the command line is fully parsed.
pub fn log_level(args: &[String]) -> Option<&'static str> {
    let flags: Vec<&str> = args
        .iter()
        .map(String::as_str)
        .take_while(|a| *a != "--")
        .collect();
    if flags.contains(&"--debug") {
        Some("debug")
    } else if flags.contains(&"--verbose") {
        Some("info")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwards_every_argument() {
        let cli = Cli::parse_from(["stratus", "deploy", "--stage", "prod", "-f", "hello", "--help"]);
        assert_eq!(cli.args, ["deploy", "--stage", "prod", "-f", "hello", "--help"]);
    }

    #[test]
    fn log_level_follows_flags() {
        let args = |raw: &[&str]| raw.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(log_level(&args(&["deploy"])), None);
        assert_eq!(log_level(&args(&["deploy", "--verbose"])), Some("info"));
        assert_eq!(log_level(&args(&["--verbose", "--debug"])), Some("debug"));
        assert_eq!(log_level(&args(&["run", "--", "--debug"])), None);
    }
}
