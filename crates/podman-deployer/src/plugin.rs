use std::fmt;
use std::io::{self, Read, Write};
use std::process::Child;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use crate::cli_wrapper::{CliWrapper, ContainerPipes};
use crate::error::{CleanupErrors, DeployerError};
use crate::names::NameAllocator;

/// What the workflow engine sees of a running plugin: a duplex byte stream
/// with an identity and an explicit teardown.
pub trait Plugin: Read + Write + Send {
    /// The container name, usable with `ps`-style introspection.
    fn id(&self) -> &str;

    fn close(&mut self) -> Result<(), DeployerError>;
}

/// Handle to one launched container.
///
/// Reads and writes go straight to the container's stdout and stdin pipes.
/// The pipes are not locked; callers must not race `close` against I/O.
pub struct ContainerPlugin {
    name: String,
    image: String,
    wrapper: Arc<dyn CliWrapper>,
    names: Option<Arc<Mutex<NameAllocator>>>,
    stdin: Option<Box<dyn Write + Send>>,
    stdout: Option<Box<dyn Read + Send>>,
    process: Option<Child>,
    closed: bool,
}

impl ContainerPlugin {
    pub(crate) fn new(
        name: String,
        image: String,
        wrapper: Arc<dyn CliWrapper>,
        pipes: ContainerPipes,
        names: Option<Arc<Mutex<NameAllocator>>>,
    ) -> Self {
        Self {
            name,
            image,
            wrapper,
            names,
            stdin: Some(pipes.stdin),
            stdout: Some(pipes.stdout),
            process: pipes.process,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Hands the container's stdin to the caller so input can be fed from
    /// another thread. Dropping it signals end of input to the container.
    /// Later writes through the plugin fail with `BrokenPipe`.
    pub fn take_stdin(&mut self) -> Option<Box<dyn Write + Send>> {
        self.stdin.take()
    }

    fn closed_error(&self) -> io::Error {
        io::Error::new(
            io::ErrorKind::BrokenPipe,
            DeployerError::Closed {
                name: self.name.clone(),
            },
        )
    }

    /// Kills the container unless it is known to have stopped, then removes
    /// it. A kill failure is reported only when the remove fails as well.
    fn stop_and_remove(&self) -> Result<(), DeployerError> {
        let running = match self.wrapper.container_running(&self.name) {
            Ok(running) => running,
            Err(err) => {
                warn!(container = %self.name, error = %err, "could not determine container state, assuming it may still be running");
                return self.wrapper.kill_and_clean(&self.name);
            }
        };

        if !running {
            debug!(container = %self.name, "container already stopped, skipping kill");
            return self.wrapper.remove(&self.name);
        }

        let kill = self.wrapper.kill(&self.name);
        let remove = self.wrapper.remove(&self.name);
        match (kill, remove) {
            (Ok(()), remove) => remove,
            (Err(err), Ok(())) => {
                warn!(container = %self.name, error = %err, "failed to kill container, removed it anyway");
                Ok(())
            }
            (Err(kill_err), Err(remove_err)) => {
                let mut errors = CleanupErrors::new();
                errors.push(kill_err);
                errors.push(remove_err);
                errors.into_result()
            }
        }
    }

    fn close_pipes(&mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(err) = stdin.flush() {
                warn!(container = %self.name, error = %err, "failed to close container stdin");
            }
        }
        drop(self.stdout.take());
    }

    fn reap(&mut self) {
        let Some(mut child) = self.process.take() else {
            return;
        };
        if !matches!(child.try_wait(), Ok(Some(_))) {
            // The container is gone; only the CLI client may be lingering.
            let _ = child.kill();
        }
        match child.wait() {
            Ok(status) => debug!(container = %self.name, %status, "container CLI process exited"),
            Err(err) => {
                warn!(container = %self.name, error = %err, "failed to wait for container CLI process")
            }
        }
    }

    fn release_name(&self) {
        if let Some(names) = &self.names {
            names
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .release(&self.name);
        }
    }
}

impl Plugin for ContainerPlugin {
    fn id(&self) -> &str {
        &self.name
    }

    /// Stops, removes and disconnects the container. Once it succeeds
    /// further calls are no-ops; after a failed remove, calling it again
    /// retries the removal.
    fn close(&mut self) -> Result<(), DeployerError> {
        if self.closed {
            return Ok(());
        }

        let result = self.stop_and_remove();
        self.close_pipes();
        self.reap();

        if result.is_ok() {
            self.closed = true;
            self.release_name();
        }
        result
    }
}

impl Read for ContainerPlugin {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stdout.as_mut() {
            Some(stdout) => stdout.read(buf),
            None => Err(self.closed_error()),
        }
    }
}

impl Write for ContainerPlugin {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.write(buf),
            None => Err(self.closed_error()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.stdin.as_mut() {
            Some(stdin) => stdin.flush(),
            None => Err(self.closed_error()),
        }
    }
}

impl Drop for ContainerPlugin {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        warn!(container = %self.name, "plugin dropped before its container was removed, cleaning up");
        if let Err(err) = self.close() {
            warn!(container = %self.name, error = %err, "cleanup on drop failed");
        }
    }
}

impl fmt::Debug for ContainerPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerPlugin")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("closed", &self.closed)
            .finish()
    }
}
