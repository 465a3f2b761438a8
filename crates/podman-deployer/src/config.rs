use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::ConfigError;
use crate::schema;

pub const DEFAULT_PODMAN_PATH: &str = "podman";
pub const DEFAULT_CONTAINER_NAME_PREFIX: &str = "arcaflow_podman";

static PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").expect("container name prefix pattern")
});

/// Platforms the pull subcommand is allowed to request.
pub const SUPPORTED_PLATFORMS: &[&str] = &[
    "arm32v6",
    "arm32v7",
    "arm64v8",
    "amd64",
    "arm64",
    "linux/arm64",
    "linux/amd64",
    "winamd64",
    "arm32v5",
    "ppc64le",
    "s390x",
    "mips64le",
    "riscv64",
    "i386",
];

/// Drives when an image is fetched from its registry before launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImagePullPolicy {
    /// Pull on every deployment.
    Always,
    /// Pull only when the image is missing from local storage.
    #[default]
    IfNotPresent,
    /// Never pull; launching fails later if the image is absent.
    Never,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub podman: PodmanConfig,
    pub deployment: DeploymentConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PodmanConfig {
    pub path: String,
    #[serde(alias = "containerName")]
    pub container_name_prefix: String,
    pub cgroup_ns: String,
    pub network_mode: String,
    pub rng_seed: u64,
}

impl Default for PodmanConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_PODMAN_PATH.to_string(),
            container_name_prefix: DEFAULT_CONTAINER_NAME_PREFIX.to_string(),
            cgroup_ns: String::new(),
            network_mode: String::new(),
            rng_seed: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeploymentConfig {
    pub container: ContainerConfig,
    pub host: HostConfig,
    pub platform: Option<String>,
    pub image_pull_policy: ImagePullPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    #[serde(rename = "Env")]
    pub env: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    #[serde(rename = "Binds")]
    pub binds: Vec<String>,
    #[serde(rename = "CgroupnsMode")]
    pub cgroupns_mode: String,
    #[serde(rename = "NetworkMode")]
    pub network_mode: String,
}

impl Config {
    /// Validates a raw document against the schema, then deserializes and
    /// checks it.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        schema::validate(&value)?;
        let config: Config =
            serde_json::from_value(value).map_err(|e| ConfigError::ParsingFailed {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(raw).map_err(|e| ConfigError::ParsingFailed {
            message: e.to_string(),
        })?;
        Self::from_value(value)
    }

    /// Loads a JSON or YAML (by `.yaml`/`.yml` extension) configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading deployer config from {}", path.display());

        let raw = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );
        let value: Value = if is_yaml {
            serde_yaml::from_str(&raw).map_err(|e| ConfigError::ParsingFailed {
                message: e.to_string(),
            })?
        } else {
            serde_json::from_str(&raw).map_err(|e| ConfigError::ParsingFailed {
                message: e.to_string(),
            })?
        };

        Self::from_value(value)
    }

    /// Semantic checks the schema cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let prefix = self.effective_prefix();
        if !PREFIX_RE.is_match(prefix) {
            return Err(ConfigError::InvalidPrefix {
                prefix: prefix.to_string(),
            });
        }

        if let Some(platform) = &self.deployment.platform {
            if !SUPPORTED_PLATFORMS.contains(&platform.as_str()) {
                return Err(ConfigError::UnsupportedPlatform {
                    platform: platform.clone(),
                });
            }
        }

        Ok(())
    }

    pub fn effective_prefix(&self) -> &str {
        if self.podman.container_name_prefix.is_empty() {
            DEFAULT_CONTAINER_NAME_PREFIX
        } else {
            &self.podman.container_name_prefix
        }
    }

    pub fn effective_cgroup_ns(&self) -> &str {
        if self.podman.cgroup_ns.is_empty() {
            &self.deployment.host.cgroupns_mode
        } else {
            &self.podman.cgroup_ns
        }
    }

    pub fn effective_network_mode(&self) -> &str {
        if self.podman.network_mode.is_empty() {
            &self.deployment.host.network_mode
        } else {
            &self.podman.network_mode
        }
    }
}
