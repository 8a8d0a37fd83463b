mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::{Backend, Config};
use libvirt_aws_core::{
    hypervisor::{Hypervisor, MockBackend},
    store::{StateStore, TagDatabase},
    translator::{RetentionPolicy, Translator},
};
use libvirt_aws_daemon::DaemonState;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "libvirt-aws")]
#[command(about = "EC2-compatible API in front of libvirt", long_about = None)]
struct Cli {
    /// Config file (default: platform config dir)
    #[arg(long, env = "LIBVIRT_AWS_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "LIBVIRT_AWS_BIND_TO")]
    bind_to: Option<String>,

    /// Port to listen on
    #[arg(long, env = "LIBVIRT_AWS_PORT")]
    port: Option<u16>,

    /// libvirt connection URI
    #[arg(long, env = "LIBVIRT_AWS_LIBVIRT_URI")]
    libvirt_uri: Option<String>,

    /// Storage pool holding images and volumes
    #[arg(long, env = "LIBVIRT_AWS_LIBVIRT_IMAGE_POOL")]
    libvirt_image_pool: Option<String>,

    /// Network new instances are attached to
    #[arg(long, env = "LIBVIRT_AWS_LIBVIRT_NETWORK")]
    libvirt_network: Option<String>,

    /// Region reported to clients
    #[arg(long, env = "LIBVIRT_AWS_REGION")]
    region: Option<String>,

    /// Tag database file
    #[arg(long, env = "LIBVIRT_AWS_DATABASE")]
    database: Option<PathBuf>,

    /// Virtualization backend
    #[arg(long, value_enum, env = "LIBVIRT_AWS_BACKEND")]
    backend: Option<Backend>,

    /// What happens to terminated instances (retain|remove)
    #[arg(long, env = "LIBVIRT_AWS_RETENTION")]
    retention: Option<RetentionPolicy>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Flags and environment variables win over the config file.
    fn apply(self, config: &mut Config) {
        if let Some(bind_to) = self.bind_to {
            config.bind_to = bind_to;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(uri) = self.libvirt_uri {
            config.libvirt.uri = uri;
        }
        if let Some(pool) = self.libvirt_image_pool {
            config.libvirt.image_pool = pool;
        }
        if let Some(network) = self.libvirt_network {
            config.libvirt.network = network;
        }
        if let Some(region) = self.region {
            config.region = region;
        }
        if let Some(database) = self.database {
            config.database = Some(database);
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(retention) = self.retention {
            config.instances.retention = retention;
        }
    }
}

#[cfg(feature = "libvirt")]
fn connect_libvirt(config: &Config) -> Result<Arc<dyn Hypervisor>> {
    use libvirt_aws_core::hypervisor::{LibvirtBackend, LibvirtSettings};

    let settings = LibvirtSettings {
        uri: config.libvirt.uri.clone(),
        shutdown_timeout: std::time::Duration::from_secs(config.libvirt.shutdown_timeout_secs),
    };
    let backend = LibvirtBackend::connect(settings)
        .context(format!("Failed to connect to libvirt at {}", config.libvirt.uri))?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "libvirt"))]
fn connect_libvirt(_config: &Config) -> Result<Arc<dyn Hypervisor>> {
    anyhow::bail!("built without libvirt support; rebuild with --features libvirt or use --backend mock")
}

fn hypervisor(config: &Config) -> Result<Arc<dyn Hypervisor>> {
    match config.backend {
        Backend::Libvirt => connect_libvirt(config),
        Backend::Mock => {
            tracing::warn!("Using the mock backend; no virtual machines will be started");
            Ok(Arc::new(MockBackend::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG takes precedence over -v
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    cli.apply(&mut config);

    let tags = match &config.database {
        Some(path) => TagDatabase::open(path)
            .context(format!("Failed to open tag database: {}", path.display()))?,
        None => TagDatabase::in_memory().context("Failed to create tag database")?,
    };

    let hypervisor = hypervisor(&config)?;
    let translator = Translator::new(
        hypervisor,
        Arc::new(StateStore::new()),
        tags,
        config.translator_settings()?,
    );
    tracing::info!(
        "Serving region {} through the {} backend",
        config.region,
        translator.backend_name()
    );

    let state = Arc::new(DaemonState::new(translator, config.auth.clone()));
    libvirt_aws_daemon::serve(state, &config.daemon_config())
        .await
        .context("API server failed")?;

    Ok(())
}
