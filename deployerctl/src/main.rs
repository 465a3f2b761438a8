use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use podman_deployer::{CliWrapper, Config, Connector, ConnectorFactory, Plugin};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "deployerctl", version)]
struct Cli {
    /// Deployer configuration, JSON or YAML
    #[arg(long, short, global = true, value_name = "FILE", env = "PODMAN_DEPLOYER_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy an image and connect this process's stdin and stdout to it
    Run {
        #[arg(value_name = "IMAGE")]
        image: String,
    },
    /// Pull an image into local storage
    Pull {
        #[arg(value_name = "IMAGE")]
        image: String,
        /// Overrides deployment.platform from the configuration
        #[arg(long)]
        platform: Option<String>,
    },
    /// Exit with status 0 if the image is present locally, 1 otherwise
    ImageExists {
        #[arg(value_name = "IMAGE")]
        image: String,
    },
    /// Print the configuration JSON schema
    Schema,
    /// Print the effective configuration with defaults applied
    Config,
    /// Print version and exit
    Version,
}

// Container output owns stdout, so logs go to stderr.
fn init_tracing() {
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn connector(config: Config) -> Result<Connector> {
    ConnectorFactory::new()
        .create(config)
        .context("failed to initialize podman connector")
}

fn run(connector: &Connector, image: &str) -> Result<()> {
    let mut plugin = connector
        .deploy(image)
        .with_context(|| format!("failed to deploy {}", image))?;
    info!(container = %plugin.id(), "connected to container");

    let mut input = plugin
        .take_stdin()
        .context("container stdin is not available")?;
    let feeder = thread::spawn(move || -> io::Result<u64> {
        let copied = io::copy(&mut io::stdin().lock(), &mut input)?;
        input.flush()?;
        Ok(copied)
    });

    let copied = io::copy(&mut plugin, &mut io::stdout().lock());

    // A feeder still blocked on our stdin is abandoned; the process exits anyway.
    if feeder.is_finished() {
        match feeder.join() {
            Ok(Err(err)) => warn!(error = %err, "failed to forward stdin to container"),
            Err(_) => warn!("stdin forwarding thread panicked"),
            Ok(Ok(_)) => {}
        }
    }

    plugin.close().context("failed to clean up container")?;
    let copied = copied.context("failed to read container output")?;
    info!(bytes = copied, "container output finished");
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Run { image } => {
            let connector = connector(load_config(cli.config.as_deref())?)?;
            run(&connector, &image)?;
        }
        Commands::Pull { image, platform } => {
            let config = load_config(cli.config.as_deref())?;
            let platform = platform.or_else(|| config.deployment.platform.clone());
            let connector = connector(config)?;
            connector
                .wrapper()
                .pull_image(&image, platform.as_deref())
                .with_context(|| format!("failed to pull {}", image))?;
            println!("{}", podman_deployer::decorate_image_name(&image));
        }
        Commands::ImageExists { image } => {
            let connector = connector(load_config(cli.config.as_deref())?)?;
            let exists = connector
                .wrapper()
                .image_exists(&image)
                .with_context(|| format!("failed to inspect {}", image))?;
            if !exists {
                eprintln!("{} is not present locally", image);
                std::process::exit(1);
            }
            println!("{}", podman_deployer::decorate_image_name(&image));
        }
        Commands::Schema => {
            let schema = ConnectorFactory::new().configuration_schema();
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
        Commands::Config => {
            let config = load_config(cli.config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
        }
    }
    Ok(())
}
