//! Runs workflow plugins inside containers started through a Podman-compatible
//! CLI, exposing each container as a duplex byte stream over its stdin and
//! stdout.
//!
//! ```no_run
//! use podman_deployer::{Config, ConnectorFactory, Plugin};
//! use std::io::Write;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_json_str(r#"{ "podman": { "path": "podman" } }"#)?;
//! let connector = ConnectorFactory::new().create(config)?;
//! let mut plugin = connector.deploy("quay.io/arcalot/podman-deployer-test-helper:0.1.0")?;
//! plugin.write_all(b"ping\n")?;
//! plugin.close()?;
//! # Ok(())
//! # }
//! ```

pub mod args;
pub mod cli_wrapper;
pub mod config;
pub mod connector;
pub mod error;
pub mod names;
pub mod plugin;
pub mod schema;

#[cfg(test)]
mod fake;

pub use cli_wrapper::{decorate_image_name, resolve_binary, CliWrapper, ContainerPipes, PodmanCli};
pub use config::{Config, ImagePullPolicy};
pub use connector::{Connector, ConnectorFactory};
pub use error::{CommandLogs, ConfigError, DeployerError};
pub use plugin::{ContainerPlugin, Plugin};
