use anyhow::{Context, Result};
use directories::ProjectDirs;
use libvirt_aws_core::instance::InstanceTypeCatalog;
use libvirt_aws_core::translator::{RetentionPolicy, TranslatorSettings};
use libvirt_aws_daemon::{AuthConfig, DaemonConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Libvirt,
    /// In-memory hypervisor; nothing is actually run.
    Mock,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_bind_to")]
    pub bind_to: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_backend")]
    pub backend: Backend,
    /// Tag database file; tags live in memory when unset.
    #[serde(default)]
    pub database: Option<PathBuf>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub libvirt: LibvirtConfig,
    #[serde(default)]
    pub instances: InstancesConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub instance_types: Vec<InstanceTypeConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LibvirtConfig {
    #[serde(default = "default_uri")]
    pub uri: String,
    #[serde(default = "default_pool")]
    pub image_pool: String,
    #[serde(default = "default_network")]
    pub network: String,
    /// Grace period for ACPI shutdown before the domain is destroyed.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InstancesConfig {
    #[serde(default)]
    pub retention: RetentionPolicy,
    #[serde(default = "default_max_per_request")]
    pub max_per_request: u32,
}

/// Extra instance type, e.g. `{ name = "c5.large", vcpus = 2, memory = "4GiB" }`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct InstanceTypeConfig {
    pub name: String,
    pub vcpus: u32,
    pub memory: String,
}

fn default_bind_to() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    libvirt_aws_daemon::config::DEFAULT_PORT
}

fn default_region() -> String {
    "us-east-2".to_string()
}

/// The mock backend is only ever used when asked for by name.
fn default_backend() -> Backend {
    Backend::Libvirt
}

fn default_request_timeout() -> u64 {
    60
}

fn default_uri() -> String {
    "qemu:///system".to_string()
}

fn default_pool() -> String {
    "default".to_string()
}

fn default_network() -> String {
    "default".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_per_request() -> u32 {
    20
}

impl Default for LibvirtConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            image_pool: default_pool(),
            network: default_network(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for InstancesConfig {
    fn default() -> Self {
        Self {
            retention: RetentionPolicy::default(),
            max_per_request: default_max_per_request(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_to: default_bind_to(),
            port: default_port(),
            region: default_region(),
            backend: default_backend(),
            database: None,
            request_timeout_secs: default_request_timeout(),
            libvirt: LibvirtConfig::default(),
            instances: InstancesConfig::default(),
            auth: AuthConfig::default(),
            instance_types: Vec::new(),
        }
    }
}

impl Config {
    /// Load from the default location; a missing file means defaults.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .context(format!("Failed to parse config file: {}", path.display()))
    }

    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "libvirt-aws", "libvirt-aws")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn daemon_config(&self) -> DaemonConfig {
        DaemonConfig {
            bind_to: self.bind_to.clone(),
            port: self.port,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn translator_settings(&self) -> Result<TranslatorSettings> {
        if self.instances.max_per_request == 0 {
            anyhow::bail!("instances.max_per_request must be at least 1");
        }

        let mut catalog = InstanceTypeCatalog::builtin();
        for extra in &self.instance_types {
            catalog
                .insert(&extra.name, extra.vcpus, &extra.memory)
                .context(format!("Invalid instance type '{}'", extra.name))?;
        }

        Ok(TranslatorSettings {
            region: self.region.clone(),
            pool: self.libvirt.image_pool.clone(),
            network: self.libvirt.network.clone(),
            retention: self.instances.retention,
            max_instances_per_request: self.instances.max_per_request,
            instance_types: catalog,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.port, 5100);
        assert_eq!(config.bind_to, "127.0.0.1");
        assert_eq!(config.libvirt.uri, "qemu:///system");
        assert_eq!(config.backend, Backend::Libvirt);
        assert_eq!(config.instances.retention, RetentionPolicy::Retain);
        assert!(!config.auth.enabled);
        assert!(config.database.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
port = 8788
region = "eu-west-1"
backend = "mock"

[libvirt]
image_pool = "images"

[instances]
retention = "remove"

[auth]
enabled = true
access_keys = ["AKIDEXAMPLE"]

[[instance_types]]
name = "c5.large"
vcpus = 2
memory = "4GiB"
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.port, 8788);
        assert_eq!(config.backend, Backend::Mock);
        assert_eq!(config.libvirt.image_pool, "images");
        assert_eq!(config.libvirt.network, "default");
        assert_eq!(config.auth.access_keys, vec!["AKIDEXAMPLE"]);

        let settings = config.translator_settings().unwrap();
        assert_eq!(settings.region, "eu-west-1");
        assert_eq!(settings.retention, RetentionPolicy::Remove);
        let shape = settings.instance_types.lookup("c5.large").unwrap();
        assert_eq!(shape.vcpus, 2);
        assert_eq!(shape.memory_mib, 4096);
    }

    #[test]
    fn test_bad_instance_type_is_reported() {
        let config = Config {
            instance_types: vec![InstanceTypeConfig {
                name: "broken".to_string(),
                vcpus: 2,
                memory: "lots".to_string(),
            }],
            ..Default::default()
        };
        assert!(config.translator_settings().is_err());
    }

    #[test]
    fn test_unparseable_file_fails() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "port = \"not a number\"").unwrap();
        assert!(Config::load_from(file.path()).is_err());
    }

    #[test]
    fn test_daemon_config() {
        let config = Config {
            request_timeout_secs: 5,
            ..Default::default()
        };
        let daemon = config.daemon_config();
        assert_eq!(daemon.address(), "127.0.0.1:5100");
        assert_eq!(daemon.request_timeout, Duration::from_secs(5));
    }
}
