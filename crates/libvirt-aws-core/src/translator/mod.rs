// Request translation: EC2 actions onto the hypervisor and the resource store
pub mod filters;
mod images;
mod instances;
pub mod params;
mod tags;
mod volumes;
mod zones;

pub use filters::FilterSet;
pub use params::{Filter, Params, TagSpecification};

use crate::hypervisor::Hypervisor;
use crate::instance::InstanceTypeCatalog;
use crate::store::{StateStore, TagDatabase};
use crate::{HypervisorError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

/// Account id reported as the owner of every reservation.
pub const OWNER_ID: &str = "000000000000";

/// What happens to an instance record once its domain is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionPolicy {
    /// Keep it visible as `terminated` for the rest of the process lifetime.
    #[default]
    Retain,
    /// Drop it from the store; describe calls stop returning it.
    Remove,
}

impl std::str::FromStr for RetentionPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "retain" => Ok(RetentionPolicy::Retain),
            "remove" => Ok(RetentionPolicy::Remove),
            other => Err(format!("unknown retention policy '{}' (retain|remove)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranslatorSettings {
    pub region: String,
    /// Storage pool holding images and created volumes.
    pub pool: String,
    /// libvirt network new instances are plugged into.
    pub network: String,
    pub retention: RetentionPolicy,
    pub max_instances_per_request: u32,
    pub instance_types: InstanceTypeCatalog,
}

impl Default for TranslatorSettings {
    fn default() -> Self {
        Self {
            region: "us-east-2".to_string(),
            pool: "default".to_string(),
            network: "default".to_string(),
            retention: RetentionPolicy::Retain,
            max_instances_per_request: 20,
            instance_types: InstanceTypeCatalog::builtin(),
        }
    }
}

impl TranslatorSettings {
    pub fn zones(&self) -> Vec<String> {
        ["a", "b", "c"]
            .iter()
            .map(|suffix| format!("{}{}", self.region, suffix))
            .collect()
    }

    pub fn default_zone(&self) -> String {
        format!("{}a", self.region)
    }

    fn check_zone(&self, field: &str, zone: &str) -> Result<()> {
        if self.zones().iter().any(|z| z == zone) {
            Ok(())
        } else {
            Err(HypervisorError::invalid(
                field,
                format!("'{}' is not an availability zone of {}", zone, self.region),
            ))
        }
    }
}

/// Maps EC2 actions onto hypervisor calls and store updates.
///
/// Cheap to clone; clones share the backend, store and tag database.
#[derive(Clone)]
pub struct Translator {
    hypervisor: Arc<dyn Hypervisor>,
    store: Arc<StateStore>,
    tags: TagDatabase,
    settings: Arc<TranslatorSettings>,
}

impl std::fmt::Debug for Translator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Translator")
            .field("backend", &self.hypervisor.name())
            .field("settings", &self.settings)
            .finish()
    }
}

impl Translator {
    pub fn new(
        hypervisor: Arc<dyn Hypervisor>,
        store: Arc<StateStore>,
        tags: TagDatabase,
        settings: TranslatorSettings,
    ) -> Self {
        Self {
            hypervisor,
            store,
            tags,
            settings: Arc::new(settings),
        }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn settings(&self) -> &TranslatorSettings {
        &self.settings
    }

    pub fn backend_name(&self) -> &'static str {
        self.hypervisor.name()
    }

    /// Run an adapter call on the blocking pool.
    async fn blocking<R, F>(&self, call: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&dyn Hypervisor) -> Result<R> + Send + 'static,
    {
        let hypervisor = self.hypervisor.clone();
        tokio::task::spawn_blocking(move || call(hypervisor.as_ref())).await?
    }
}

/// Drive a mutating sequence on its own task. If the caller is dropped
/// (client gone, request timeout) the sequence still runs to the end, so
/// the store never falls behind an adapter call that already happened.
async fn detached<F, R>(sequence: F) -> Result<R>
where
    F: Future<Output = Result<R>> + Send + 'static,
    R: Send + 'static,
{
    tokio::spawn(sequence).await?
}

/// Listing filter that keeps every record.
fn everything<T>(_: &T) -> bool {
    true
}

fn timestamp(at: &chrono::DateTime<chrono::Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn busy(id: &impl std::fmt::Display, state: &str, action: &str) -> HypervisorError {
    HypervisorError::InvalidStateTransition {
        id: id.to_string(),
        state: state.to_string(),
        action: action.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zones_follow_region() {
        let settings = TranslatorSettings {
            region: "eu-west-1".to_string(),
            ..Default::default()
        };
        assert_eq!(settings.zones(), vec!["eu-west-1a", "eu-west-1b", "eu-west-1c"]);
        assert!(settings.check_zone("AvailabilityZone", "eu-west-1b").is_ok());
        assert!(settings.check_zone("AvailabilityZone", "us-east-2a").is_err());
    }

    #[test]
    fn test_retention_policy_parse() {
        assert_eq!("retain".parse::<RetentionPolicy>().unwrap(), RetentionPolicy::Retain);
        assert_eq!("remove".parse::<RetentionPolicy>().unwrap(), RetentionPolicy::Remove);
        assert!("forget".parse::<RetentionPolicy>().is_err());
    }

    #[test]
    fn test_timestamp_format() {
        let at = chrono::DateTime::parse_from_rfc3339("2024-05-01T10:20:30.123456Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        assert_eq!(timestamp(&at), "2024-05-01T10:20:30.123Z");
    }
}
