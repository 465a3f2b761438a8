use std::env;
use std::ffi::OsStr;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{CommandLogs, ConfigError, DeployerError};

/// Pipes of a freshly started container, plus the CLI process that owns them.
pub struct ContainerPipes {
    pub stdin: Box<dyn Write + Send>,
    pub stdout: Box<dyn Read + Send>,
    /// The `run` process; kept so it can be reaped once the container is gone.
    pub process: Option<Child>,
}

/// Every interaction with the container CLI binary goes through this trait.
pub trait CliWrapper: Send + Sync {
    fn image_exists(&self, image: &str) -> Result<bool, DeployerError>;

    /// Pulls `image`, optionally for a specific platform (e.g. `linux/arm64`).
    fn pull_image(&self, image: &str, platform: Option<&str>) -> Result<(), DeployerError>;

    /// Starts `image` with `podman_args` before it and `container_args` after
    /// it, returning as soon as the process is running.
    fn deploy(
        &self,
        image: &str,
        podman_args: &[String],
        container_args: &[String],
    ) -> Result<ContainerPipes, DeployerError>;

    fn container_running(&self, name: &str) -> Result<bool, DeployerError>;

    /// Whether a container with this name exists in any state.
    fn container_exists(&self, name: &str) -> Result<bool, DeployerError>;

    fn kill(&self, name: &str) -> Result<(), DeployerError>;

    /// Force-removes the container.
    fn remove(&self, name: &str) -> Result<(), DeployerError>;

    /// Kills then removes. Kill failures are logged only since the container
    /// may already have exited; remove failures are returned.
    fn kill_and_clean(&self, name: &str) -> Result<(), DeployerError> {
        if let Err(err) = self.kill(name) {
            warn!(container = %name, error = %err, "failed to kill container, it probably exited already");
        }
        self.remove(name)
    }
}

/// Appends `:latest` when the reference carries neither a tag nor a digest.
/// A `:` inside a registry host (`localhost:5000/img`) is not a tag.
pub fn decorate_image_name(image: &str) -> String {
    if image.contains('@') {
        return image.to_string();
    }
    let last_component = image.rsplit('/').next().unwrap_or(image);
    if last_component.contains(':') {
        image.to_string()
    } else {
        format!("{}:latest", image)
    }
}

/// Resolves the CLI binary: paths containing a separator are checked as
/// given, bare names are searched in `PATH`.
pub fn resolve_binary(path: &str) -> Result<PathBuf, ConfigError> {
    if path.is_empty() {
        return Err(ConfigError::BinaryNotFound {
            path: path.to_string(),
            reason: "path is empty".to_string(),
        });
    }

    let candidate = Path::new(path);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return if is_executable(candidate) {
            Ok(candidate.to_path_buf())
        } else {
            Err(ConfigError::BinaryNotFound {
                path: path.to_string(),
                reason: "not an executable file".to_string(),
            })
        };
    }

    let search = env::var_os("PATH").unwrap_or_default();
    env::split_paths(&search)
        .map(|dir| dir.join(path))
        .find(|full| is_executable(full))
        .ok_or_else(|| ConfigError::BinaryNotFound {
            path: path.to_string(),
            reason: "not found in PATH".to_string(),
        })
}

pub(crate) fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = path.metadata() else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// [`CliWrapper`] backed by a Podman-compatible binary.
#[derive(Debug, Clone)]
pub struct PodmanCli {
    path: PathBuf,
}

impl PodmanCli {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.path);
        command.args(args);
        command
    }

    /// Runs to completion, failing with captured output on non-zero exit.
    fn run(&self, mut command: Command) -> Result<Output, DeployerError> {
        let cmdline = command_line_string(&command);
        debug!(command = %cmdline, "running container CLI");

        let output = command
            .stdin(Stdio::null())
            .output()
            .map_err(|source| DeployerError::Spawn {
                command: cmdline.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(DeployerError::CommandFailed {
                logs: CommandLogs::from_output(cmdline, &output),
            });
        }
        Ok(output)
    }

    fn ps_names(&self, name: &str, all: bool) -> Result<bool, DeployerError> {
        let mut args = vec!["ps".to_string()];
        if all {
            args.push("-a".to_string());
        }
        args.extend([
            "--filter".to_string(),
            format!("name=^{}$", name),
            "--format".to_string(),
            "{{.Names}}".to_string(),
        ]);
        let output = self.run(self.command(&args))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().any(|line| line.trim() == name))
    }
}

impl CliWrapper for PodmanCli {
    #[instrument(skip(self))]
    fn image_exists(&self, image: &str) -> Result<bool, DeployerError> {
        let image = decorate_image_name(image);
        let output = self.run(self.command([
            "image",
            "ls",
            "--format",
            "{{.Repository}}:{{.Tag}}",
        ]))?;
        let listing = String::from_utf8_lossy(&output.stdout);
        Ok(listing.lines().any(|line| line.trim() == image))
    }

    #[instrument(skip(self))]
    fn pull_image(&self, image: &str, platform: Option<&str>) -> Result<(), DeployerError> {
        let mut args = vec!["pull".to_string()];
        if let Some(platform) = platform.filter(|p| !p.is_empty()) {
            args.push("--platform".to_string());
            args.push(platform.to_string());
        }
        args.push(decorate_image_name(image));

        self.run(self.command(&args))?;
        info!(image = %image, "pulled image");
        Ok(())
    }

    #[instrument(skip(self, podman_args, container_args))]
    fn deploy(
        &self,
        image: &str,
        podman_args: &[String],
        container_args: &[String],
    ) -> Result<ContainerPipes, DeployerError> {
        let mut command = self.command(podman_args);
        command
            .arg(decorate_image_name(image))
            .args(container_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        let cmdline = command_line_string(&command);
        debug!(command = %cmdline, "starting container");

        let mut child = command.spawn().map_err(|source| DeployerError::Spawn {
            command: cmdline.clone(),
            source,
        })?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            (stdin, _) => {
                let pipe = if stdin.is_none() { "stdin" } else { "stdout" };
                // Nothing usable was handed out; do not leave the process behind.
                let _ = child.kill();
                let _ = child.wait();
                return Err(DeployerError::PipeUnavailable {
                    command: cmdline,
                    pipe,
                });
            }
        };

        Ok(ContainerPipes {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            process: Some(child),
        })
    }

    fn container_running(&self, name: &str) -> Result<bool, DeployerError> {
        self.ps_names(name, false)
    }

    fn container_exists(&self, name: &str) -> Result<bool, DeployerError> {
        self.ps_names(name, true)
    }

    #[instrument(skip(self))]
    fn kill(&self, name: &str) -> Result<(), DeployerError> {
        self.run(self.command(["kill", name]))?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn remove(&self, name: &str) -> Result<(), DeployerError> {
        match self.run(self.command(["rm", "--force", name])) {
            Ok(_) => {
                info!(container = %name, "removed container");
                Ok(())
            }
            Err(err) => {
                error!(container = %name, error = %err, "failed to remove container");
                Err(err)
            }
        }
    }
}

fn shell_escape(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    let escaped = arg.replace('\'', "'\\''");
    format!("'{}'", escaped)
}

pub(crate) fn command_line_string(cmd: &Command) -> String {
    let mut s = String::new();
    s.push_str(&cmd.get_program().to_string_lossy());
    for a in cmd.get_args() {
        s.push(' ');
        let a = a.to_string_lossy();
        if a.is_empty() || a.contains(' ') || a.contains('"') || a.contains('\'') {
            s.push_str(&shell_escape(&a));
        } else {
            s.push_str(&a);
        }
    }
    s
}
