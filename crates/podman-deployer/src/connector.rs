use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, instrument};

use crate::args::{base_run_args, ArgsBuilder};
use crate::cli_wrapper::{is_executable, resolve_binary, CliWrapper, PodmanCli};
use crate::config::{Config, ImagePullPolicy};
use crate::error::{ConfigError, DeployerError};
use crate::names::{seed_or_now, NameAllocator};
use crate::plugin::ContainerPlugin;
use crate::schema;

/// Builds [`Connector`]s from validated configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConnectorFactory;

impl ConnectorFactory {
    pub fn new() -> Self {
        Self
    }

    pub fn id(&self) -> &'static str {
        "podman"
    }

    pub fn configuration_schema(&self) -> Value {
        schema::schema()
    }

    /// Validates `config`, resolves the CLI binary and seeds the name
    /// generator. An unresolvable binary is fatal here.
    pub fn create(&self, config: Config) -> Result<Connector, ConfigError> {
        config.validate()?;
        let binary = resolve_binary(&config.podman.path)?;
        debug!(binary = %binary.display(), "resolved container CLI");
        let wrapper = Arc::new(PodmanCli::new(binary.clone()));
        Ok(Connector::build(config, Some(binary), wrapper))
    }
}

/// Launches containers for one configuration. Safe to share between threads;
/// concurrent deployments never receive the same container name.
pub struct Connector {
    config: Config,
    binary: Option<PathBuf>,
    wrapper: Arc<dyn CliWrapper>,
    names: Arc<Mutex<NameAllocator>>,
}

impl Connector {
    fn build(config: Config, binary: Option<PathBuf>, wrapper: Arc<dyn CliWrapper>) -> Self {
        let seed = seed_or_now(config.podman.rng_seed);
        let names = NameAllocator::new(config.effective_prefix(), seed);
        Self {
            config,
            binary,
            wrapper,
            names: Arc::new(Mutex::new(names)),
        }
    }

    /// Uses `wrapper` in place of the subprocess-backed CLI. No binary
    /// preflight is performed.
    pub fn with_wrapper(config: Config, wrapper: Arc<dyn CliWrapper>) -> Self {
        Self::build(config, None, wrapper)
    }

    pub fn wrapper(&self) -> Arc<dyn CliWrapper> {
        self.wrapper.clone()
    }

    /// Pulls the image as the policy demands, then starts a uniquely named
    /// container and returns its handle. Fails without leaving a container
    /// behind.
    #[instrument(skip(self), fields(policy = ?self.config.deployment.image_pull_policy))]
    pub fn deploy(&self, image: &str) -> Result<ContainerPlugin, DeployerError> {
        self.pull_image(image)?;
        self.preflight()?;

        let name = self.next_name();
        let args = self.run_args(&name);
        debug!(container = %name, args = ?args, "launching container");

        let pipes = match self.wrapper.deploy(image, &args, &[]) {
            Ok(pipes) => pipes,
            Err(err) => {
                self.names
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .release(&name);
                return Err(err);
            }
        };
        info!(container = %name, image = %image, "container started");

        Ok(ContainerPlugin::new(
            name,
            image.to_string(),
            self.wrapper.clone(),
            pipes,
            Some(self.names.clone()),
        ))
    }

    fn pull_image(&self, image: &str) -> Result<(), DeployerError> {
        let platform = self.config.deployment.platform.as_deref();
        match self.config.deployment.image_pull_policy {
            ImagePullPolicy::Never => {
                debug!(image = %image, "pull policy is Never, skipping pull");
                Ok(())
            }
            ImagePullPolicy::IfNotPresent => {
                if self.wrapper.image_exists(image)? {
                    debug!(image = %image, "image already present, skipping pull");
                    return Ok(());
                }
                info!(image = %image, "pulling image");
                self.wrapper.pull_image(image, platform)
            }
            ImagePullPolicy::Always => {
                info!(image = %image, "pulling image");
                self.wrapper.pull_image(image, platform)
            }
        }
    }

    fn preflight(&self) -> Result<(), DeployerError> {
        match &self.binary {
            Some(binary) if !is_executable(binary) => Err(DeployerError::Preflight {
                message: format!(
                    "container CLI {} is no longer an executable file",
                    binary.display()
                ),
            }),
            _ => Ok(()),
        }
    }

    fn next_name(&self) -> String {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_name()
    }

    fn run_args(&self, name: &str) -> Vec<String> {
        let deployment = &self.config.deployment;
        let mut args = base_run_args();
        ArgsBuilder::new(&mut args)
            .set_container_name(name)
            .set_env(&deployment.container.env)
            .set_volumes(&deployment.host.binds)
            .set_cgroup_ns(self.config.effective_cgroup_ns())
            .set_network_mode(self.config.effective_network_mode());
        args
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("config", &self.config)
            .field("binary", &self.binary)
            .finish_non_exhaustive()
    }
}
