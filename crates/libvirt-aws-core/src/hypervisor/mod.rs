// Virtualization adapter: the emulator's only path to libvirt
#[cfg(feature = "libvirt")]
pub mod libvirt;
pub mod mock;
pub mod spec;
mod xml;

#[cfg(feature = "libvirt")]
pub use libvirt::{LibvirtBackend, LibvirtSettings};
pub use mock::MockBackend;
pub use spec::{DiskDevice, DiskSpec, DomainSpec, InterfaceSpec, VolumeSpec};

use crate::Result;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

/// Reference to a defined libvirt domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainHandle {
    pub uuid: Uuid,
    pub name: String,
}

impl DomainHandle {
    pub fn key(&self) -> String {
        self.uuid.to_string()
    }
}

/// Reference to a volume inside a libvirt storage pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumeHandle {
    pub pool: String,
    pub name: String,
}

impl VolumeHandle {
    pub fn key(&self) -> String {
        format!("{}/{}", self.pool, self.name)
    }
}

/// Domain run state as reported by libvirt (`virDomainState`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainState {
    NoState,
    Running,
    Blocked,
    Paused,
    ShuttingDown,
    Shutoff,
    Crashed,
    Suspended,
}

impl DomainState {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DomainState::Running
                | DomainState::Blocked
                | DomainState::Paused
                | DomainState::ShuttingDown
        )
    }
}

/// IPv4 address the network's DHCP server leased to one guest interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddress {
    pub mac: String,
    pub ipv4: String,
}

/// Target of a `set_domain_state` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredState {
    Running,
    /// Graceful ACPI shutdown; `force` pulls the plug straight away.
    Shutoff { force: bool },
}

/// Blocking interface to the virtualization service.
///
/// Every call may block on libvirt and must be run off the async executor
/// (`tokio::task::spawn_blocking`). Implementations serialize structural
/// changes to the same handle themselves.
pub trait Hypervisor: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Define the domain and boot it. Fails with `Provision`.
    fn create_domain(&self, spec: &DomainSpec) -> Result<DomainHandle>;

    /// Power off (if needed) and undefine. Fails with `DomainNotFound` or `Backend`.
    fn destroy_domain(&self, handle: &DomainHandle) -> Result<()>;

    /// Start or shut down. Fails with `InvalidStateTransition` when the
    /// domain already is in (or cannot reach) the requested state.
    fn set_domain_state(&self, handle: &DomainHandle, desired: DesiredState) -> Result<()>;

    fn query_domain_state(&self, handle: &DomainHandle) -> Result<DomainState>;

    /// Current definition read back from libvirt.
    fn domain_spec(&self, handle: &DomainHandle) -> Result<DomainSpec>;

    /// Leased IPv4 addresses by MAC. Empty while the domain is inactive.
    fn interface_addresses(&self, handle: &DomainHandle) -> Result<Vec<InterfaceAddress>>;

    fn create_volume(&self, spec: &VolumeSpec) -> Result<VolumeHandle>;

    /// Create a volume and upload `data` into it. Nothing is left behind
    /// when the upload fails.
    fn import_volume(&self, spec: &VolumeSpec, data: &[u8]) -> Result<VolumeHandle>;

    fn list_volumes(&self, pool: &str) -> Result<Vec<VolumeSpec>>;

    fn delete_volume(&self, handle: &VolumeHandle) -> Result<()>;

    fn attach_disk(&self, domain: &DomainHandle, disk: &DiskSpec) -> Result<()>;

    fn detach_disk(&self, domain: &DomainHandle, disk: &DiskSpec) -> Result<()>;
}

/// One mutex per libvirt object so that structural changes to the same
/// domain or volume never interleave, while different objects proceed in
/// parallel.
#[derive(Debug, Default)]
pub struct HandleLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl HandleLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<R>(&self, key: &str, f: impl FnOnce() -> R) -> R {
        // Clone the Arc out so the shard lock is released before we block.
        let lock = self.locks.entry(key.to_string()).or_default().clone();
        let _guard = lock.lock();
        f()
    }

    pub fn forget(&self, key: &str) {
        self.locks.remove(key);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_handle_locks_serialize_same_key() {
        let locks = Arc::new(HandleLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                let max_seen = max_seen.clone();
                std::thread::spawn(move || {
                    locks.with("dom-1", || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(5));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handle_locks_forget() {
        let locks = HandleLocks::new();
        locks.with("a", || ());
        locks.with("b", || ());
        assert_eq!(locks.len(), 2);
        locks.forget("a");
        assert_eq!(locks.len(), 1);
    }
}
