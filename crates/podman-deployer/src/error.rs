use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Output};
use thiserror::Error;

const LOG_LIMIT: usize = 2048;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Schema compilation failed: {message}")]
    SchemaCompilationFailed { message: String },

    #[error("Config validation failed: {}", join_validation_errors(.errors))]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Config parsing failed: {message}")]
    ParsingFailed { message: String },

    #[error("IO error reading {path}: {message}")]
    IoError { path: PathBuf, message: String },

    #[error("Container CLI binary '{path}' could not be resolved: {reason}")]
    BinaryNotFound { path: String, reason: String },

    #[error("Invalid container name prefix '{prefix}'")]
    InvalidPrefix { prefix: String },

    #[error("Unsupported platform: {platform}")]
    UnsupportedPlatform { platform: String },
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub json_pointer: String,
    pub message: String,
    pub schema_path: String,
}

fn join_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| {
            if e.json_pointer.is_empty() {
                e.message.clone()
            } else {
                format!("{}: {}", e.json_pointer, e.message)
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Output captured from a container CLI invocation that ran to completion.
#[derive(Debug, Clone)]
pub struct CommandLogs {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_status: Option<i32>,
}

impl CommandLogs {
    pub fn from_output(command: String, output: &Output) -> Self {
        Self {
            command,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_status: exit_code(&output.status),
        }
    }
}

impl fmt::Display for CommandLogs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_status {
            Some(code) => write!(f, "`{}` exited with code {}", self.command, code)?,
            None => write!(f, "`{}` was terminated by a signal", self.command)?,
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            write!(f, " (stderr: {})", truncate(stderr, LOG_LIMIT))?;
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            write!(f, " (stdout: {})", truncate(stdout, LOG_LIMIT))?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum DeployerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to spawn container CLI `{command}`: {source}")]
    Spawn { command: String, source: io::Error },

    #[error("Container CLI failed: {logs}")]
    CommandFailed { logs: CommandLogs },

    #[error("Failed to attach {pipe} of `{command}`")]
    PipeUnavailable { command: String, pipe: &'static str },

    #[error("Preflight failed: {message}")]
    Preflight { message: String },

    #[error("Container {name} is closed")]
    Closed { name: String },

    #[error("Cleanup failed: {}", join_errors(.0))]
    Cleanup(Vec<DeployerError>),
}

impl DeployerError {
    pub fn code(&self) -> &'static str {
        match self {
            DeployerError::Config(_) => "PODMAN_DEPLOYER_INVALID_CONFIG",
            DeployerError::Spawn { .. } => "PODMAN_DEPLOYER_SPAWN_ERROR",
            DeployerError::CommandFailed { .. } => "PODMAN_DEPLOYER_COMMAND_FAILED",
            DeployerError::PipeUnavailable { .. } => "PODMAN_DEPLOYER_PIPE_ERROR",
            DeployerError::Preflight { .. } => "PODMAN_DEPLOYER_PREFLIGHT_FAILED",
            DeployerError::Closed { .. } => "PODMAN_DEPLOYER_CLOSED",
            DeployerError::Cleanup(_) => "PODMAN_DEPLOYER_CLEANUP_FAILED",
        }
    }

    /// Captured subprocess output, when the failure came from a finished command.
    pub fn logs(&self) -> Option<&CommandLogs> {
        match self {
            DeployerError::CommandFailed { logs } => Some(logs),
            _ => None,
        }
    }
}

fn join_errors(errors: &[DeployerError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Ordered close-time failures, folded into a single error at the boundary.
#[derive(Debug, Default)]
pub struct CleanupErrors(Vec<DeployerError>);

impl CleanupErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: DeployerError) {
        self.0.push(error);
    }

    pub fn into_result(mut self) -> Result<(), DeployerError> {
        match self.0.len() {
            0 => Ok(()),
            1 => Err(self.0.remove(0)),
            _ => Err(DeployerError::Cleanup(self.0)),
        }
    }
}

pub(crate) fn exit_code(status: &ExitStatus) -> Option<i32> {
    status.code()
}

pub(crate) fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = text[..end].to_string();
    truncated.push_str("… (truncated)");
    truncated
}
