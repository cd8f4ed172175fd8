// EN: src/system/executor.rs

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::process::{Child, Command as TokioCommand};

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command could not be parsed: {0}")]
    CommandParse(String),
    #[error("Command '{0}' could not be executed: {1}")]
    CommandFailed(String, std::io::Error),
    #[error("Command '{command}' exited with status {code}.")]
    NonZeroExitStatus { command: String, code: i32 },
    #[error("Command '{command}' produced output that was not valid UTF-8")]
    InvalidUtf8Output {
        command: String,
        #[source]
        source: std::string::FromUtf8Error,
    },
    #[error("Command '{0}' was interrupted.")]
    Interrupted(String),
}

/// Splits a command line the way a POSIX shell would, without running a shell.
fn split_command(command_line: &str) -> Result<Option<(String, Vec<String>)>, ExecutionError> {
    let parts = shlex::split(command_line).ok_or_else(|| ExecutionError::CommandParse(command_line.to_string()))?;
    let mut parts = parts.into_iter();
    Ok(parts.next().map(|program| (program, parts.collect())))
}

fn spawn(
    program: &str,
    args: &[String],
    command_line: &str,
    cwd: &Path,
    env_vars: &HashMap<String, String>,
    capture: bool,
) -> Result<Child, ExecutionError> {
    let stdout = || if capture { Stdio::piped() } else { Stdio::inherit() };
    let clean_cwd = dunce::simplified(cwd);
    let mut command = TokioCommand::new(program);
    command
        .args(args)
        .current_dir(clean_cwd)
        .envs(env_vars)
        .stdin(Stdio::null())
        .stdout(stdout())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    match command.spawn() {
        Ok(child) => Ok(child),
        // Built-ins such as `echo` only exist inside `cmd` on Windows.
        Err(e) if e.kind() == ErrorKind::NotFound && cfg!(target_os = "windows") => {
            log::debug!("Command '{}' not found. Retrying with cmd /C.", program);
            TokioCommand::new("cmd")
                .arg("/C")
                .arg(command_line)
                .current_dir(clean_cwd)
                .envs(env_vars)
                .stdin(Stdio::null())
                .stdout(stdout())
                .stderr(Stdio::inherit())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| ExecutionError::CommandFailed(command_line.to_string(), e))
        }
        Err(e) => Err(ExecutionError::CommandFailed(command_line.to_string(), e)),
    }
}

fn check_status(command_line: &str, status: ExitStatus) -> Result<(), ExecutionError> {
    if status.success() {
        Ok(())
    } else {
        Err(ExecutionError::NonZeroExitStatus {
            command: command_line.to_string(),
            code: status.code().unwrap_or(-1),
        })
    }
}

/// Runs a command with inherited output and waits for it. Ctrl+C kills the
/// child and reports [`ExecutionError::Interrupted`].
pub async fn execute_command(
    command_line: &str,
    cwd: &Path,
    env_vars: &HashMap<String, String>,
) -> Result<(), ExecutionError> {
    let trimmed_command = command_line.trim();
    let Some((program, args)) = split_command(trimmed_command)? else {
        return Ok(()); // An empty command is a success, not an error.
    };
    log::debug!("Executing '{}' in {:?}", trimmed_command, cwd);

    let mut child = spawn(&program, &args, trimmed_command, cwd, env_vars, false)?;

    tokio::select! {
        status = child.wait() => {
            let status = status.map_err(|e| ExecutionError::CommandFailed(trimmed_command.to_string(), e))?;
            check_status(trimmed_command, status)
        }
        _ = tokio::signal::ctrl_c() => {
            log::debug!("Interrupt received, killing '{}'.", trimmed_command);
            if let Err(e) = child.kill().await {
                log::warn!("Failed to kill child process: {}", e);
            }
            Err(ExecutionError::Interrupted(trimmed_command.to_string()))
        }
    }
}

/// Runs a command and returns its standard output. Stderr is passed through.
pub async fn execute_and_capture_output(
    command_line: &str,
    cwd: &Path,
    env_vars: &HashMap<String, String>,
) -> Result<String, ExecutionError> {
    let trimmed_command = command_line.trim();
    let Some((program, args)) = split_command(trimmed_command)? else {
        return Ok(String::new());
    };

    let child = spawn(&program, &args, trimmed_command, cwd, env_vars, true)?;
    let output = child
        .wait_with_output()
        .await
        .map_err(|e| ExecutionError::CommandFailed(trimmed_command.to_string(), e))?;
    check_status(trimmed_command, output.status)?;

    String::from_utf8(output.stdout).map_err(|e| ExecutionError::InvalidUtf8Output {
        command: trimmed_command.to_string(),
        source: e,
    })
}
