// Resource state: emulated instances and volumes, plus their tags
pub mod table;
pub mod tags;

pub use table::{Listing, RecordGuard, Table, TryLock};
pub use tags::{ResourceTag, TagDatabase, TagQuery};

use crate::ids::{InstanceId, VolumeId};
use crate::instance::Instance;
use crate::volume::Volume;
use crate::HypervisorError;

/// Every emulated resource the process knows about. Built empty at start-up
/// and shared by reference; instance and volume ids live in separate tables.
#[derive(Debug)]
pub struct StateStore {
    pub instances: Table<InstanceId, Instance>,
    pub volumes: Table<VolumeId, Volume>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            instances: Table::new(HypervisorError::InstanceNotFound),
            volumes: Table::new(HypervisorError::VolumeNotFound),
        }
    }

    /// Detach (in the store only) every volume attached to `instance`.
    /// Returns the volumes that were cleared.
    pub async fn clear_attachments_to(&self, instance: &InstanceId) -> Vec<VolumeId> {
        let attached: Vec<VolumeId> = self
            .volumes
            .list(|v| v.is_attached_to(instance))
            .iter()
            .map(|v| v.id.clone())
            .collect();

        let mut cleared = Vec::new();
        for id in attached {
            let result = self
                .volumes
                .update(&id, |v| {
                    // Re-check under the lock; it may have moved meanwhile.
                    if v.is_attached_to(instance) {
                        v.attachment = None;
                        true
                    } else {
                        false
                    }
                })
                .await;
            if let Ok(true) = result {
                tracing::info!("Cleared attachment of {} to {}", id, instance);
                cleared.push(id);
            }
        }
        cleared
    }
}
