//! In-memory [`CliWrapper`] used by unit tests. Deployed "containers" echo
//! every line written to them back with an `echo:` prefix.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::cli_wrapper::{decorate_image_name, CliWrapper, ContainerPipes};
use crate::error::{CommandLogs, DeployerError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ImageExists(String),
    PullImage(String, Option<String>),
    Deploy {
        image: String,
        podman_args: Vec<String>,
        container_args: Vec<String>,
    },
    ContainerRunning(String),
    ContainerExists(String),
    Kill(String),
    Remove(String),
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    images: HashSet<String>,
    running: HashMap<String, bool>,
    outputs: Vec<Output>,
    fail_image_exists: bool,
    fail_pull: bool,
    fail_deploy: bool,
    fail_ps: bool,
    fail_kill: bool,
    fail_remove: bool,
}

#[derive(Default)]
pub struct FakeCli {
    state: Mutex<State>,
}

impl FakeCli {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn pull_count(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::PullImage(..)))
            .count()
    }

    pub fn add_image(&self, image: &str) {
        self.state().images.insert(decorate_image_name(image));
    }

    pub fn set_running(&self, name: &str, running: bool) {
        self.state().running.insert(name.to_string(), running);
    }

    pub fn fail_image_exists(&self, fail: bool) {
        self.state().fail_image_exists = fail;
    }

    pub fn fail_pull(&self, fail: bool) {
        self.state().fail_pull = fail;
    }

    pub fn fail_deploy(&self, fail: bool) {
        self.state().fail_deploy = fail;
    }

    pub fn fail_ps(&self, fail: bool) {
        self.state().fail_ps = fail;
    }

    pub fn fail_kill(&self, fail: bool) {
        self.state().fail_kill = fail;
    }

    pub fn fail_remove(&self, fail: bool) {
        self.state().fail_remove = fail;
    }

    /// Ends the output stream of every deployed container.
    pub fn finish_output(&self) {
        for output in &self.state().outputs {
            output.finish();
        }
    }
}

fn failure(command: String) -> DeployerError {
    DeployerError::CommandFailed {
        logs: CommandLogs {
            command,
            stdout: String::new(),
            stderr: "fake failure".to_string(),
            exit_status: Some(125),
        },
    }
}

impl CliWrapper for FakeCli {
    fn image_exists(&self, image: &str) -> Result<bool, DeployerError> {
        let mut state = self.state();
        state.calls.push(Call::ImageExists(image.to_string()));
        if state.fail_image_exists {
            return Err(failure("podman image ls".to_string()));
        }
        Ok(state.images.contains(&decorate_image_name(image)))
    }

    fn pull_image(&self, image: &str, platform: Option<&str>) -> Result<(), DeployerError> {
        let mut state = self.state();
        state.calls.push(Call::PullImage(
            image.to_string(),
            platform.map(str::to_string),
        ));
        if state.fail_pull {
            return Err(failure(format!("podman pull {}", image)));
        }
        state.images.insert(decorate_image_name(image));
        Ok(())
    }

    fn deploy(
        &self,
        image: &str,
        podman_args: &[String],
        container_args: &[String],
    ) -> Result<ContainerPipes, DeployerError> {
        let mut state = self.state();
        state.calls.push(Call::Deploy {
            image: image.to_string(),
            podman_args: podman_args.to_vec(),
            container_args: container_args.to_vec(),
        });
        if state.fail_deploy {
            return Err(DeployerError::Spawn {
                command: "podman run".to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "fake spawn failure"),
            });
        }

        if let Some(pos) = podman_args.iter().position(|a| a == "--name") {
            if let Some(name) = podman_args.get(pos + 1) {
                state.running.insert(name.clone(), true);
            }
        }

        let output = Output::default();
        state.outputs.push(output.clone());
        Ok(ContainerPipes {
            stdin: Box::new(EchoStdin {
                pending: Vec::new(),
                output: output.clone(),
            }),
            stdout: Box::new(EchoStdout { output }),
            process: None,
        })
    }

    fn container_running(&self, name: &str) -> Result<bool, DeployerError> {
        let mut state = self.state();
        state.calls.push(Call::ContainerRunning(name.to_string()));
        if state.fail_ps {
            return Err(failure("podman ps".to_string()));
        }
        Ok(state.running.get(name).copied().unwrap_or(false))
    }

    fn container_exists(&self, name: &str) -> Result<bool, DeployerError> {
        let mut state = self.state();
        state.calls.push(Call::ContainerExists(name.to_string()));
        if state.fail_ps {
            return Err(failure("podman ps -a".to_string()));
        }
        Ok(state.running.contains_key(name))
    }

    fn kill(&self, name: &str) -> Result<(), DeployerError> {
        let mut state = self.state();
        state.calls.push(Call::Kill(name.to_string()));
        if state.fail_kill {
            return Err(failure(format!("podman kill {}", name)));
        }
        state.running.insert(name.to_string(), false);
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), DeployerError> {
        let mut state = self.state();
        state.calls.push(Call::Remove(name.to_string()));
        if state.fail_remove {
            return Err(failure(format!("podman rm --force {}", name)));
        }
        state.running.remove(name);
        Ok(())
    }
}

#[derive(Default)]
struct Channel {
    data: VecDeque<u8>,
    finished: bool,
}

#[derive(Clone, Default)]
struct Output(Arc<(Mutex<Channel>, Condvar)>);

impl Output {
    fn channel(&self) -> MutexGuard<'_, Channel> {
        self.0 .0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, bytes: &[u8]) {
        self.channel().data.extend(bytes);
        self.0 .1.notify_all();
    }

    fn finish(&self) {
        self.channel().finished = true;
        self.0 .1.notify_all();
    }
}

struct EchoStdin {
    pending: Vec<u8>,
    output: Output,
}

impl Write for EchoStdin {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let mut reply = b"echo:".to_vec();
            reply.extend(line);
            self.output.push(&reply);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for EchoStdin {
    fn drop(&mut self) {
        self.output.finish();
    }
}

struct EchoStdout {
    output: Output,
}

impl Read for EchoStdout {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (lock, cvar) = &*self.output.0;
        let mut channel = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while channel.data.is_empty() && !channel.finished {
            channel = cvar.wait(channel).unwrap_or_else(PoisonError::into_inner);
        }
        let n = buf.len().min(channel.data.len());
        for (slot, byte) in buf.iter_mut().zip(channel.data.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}
