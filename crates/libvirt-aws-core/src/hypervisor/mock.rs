use super::{
    DesiredState, DiskSpec, DomainHandle, DomainSpec, DomainState, HandleLocks, Hypervisor,
    InterfaceAddress, VolumeHandle, VolumeSpec,
};
use crate::{HypervisorError, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Adapter operations, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    CreateDomain,
    DestroyDomain,
    SetState,
    QueryState,
    QueryAddresses,
    CreateVolume,
    ImportVolume,
    ListVolumes,
    DeleteVolume,
    AttachDisk,
    DetachDisk,
}

#[derive(Debug)]
struct MockDomain {
    /// Definitions are kept as XML so every operation goes through the
    /// same encode/decode path the libvirt backend uses.
    xml: String,
    state: DomainState,
    /// One DHCP lease per interface, handed out at definition time.
    leases: Vec<String>,
}

#[derive(Debug)]
struct MockVolume {
    xml: String,
    data: Vec<u8>,
}

/// In-memory hypervisor for tests and for running without libvirt.
///
/// Image volumes referenced by transient boot disks are assumed to exist.
#[derive(Debug, Default)]
pub struct MockBackend {
    domains: DashMap<Uuid, MockDomain>,
    volumes: DashMap<String, MockVolume>,
    locks: HandleLocks,
    /// Pending failure per op: calls to let through first, then the message.
    failures: Mutex<HashMap<MockOp, (u32, String)>>,
    latency: Mutex<Duration>,
    query_latency: Mutex<Duration>,
    next_lease: AtomicU32,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `op` fail with `message`.
    pub fn fail_next(&self, op: MockOp, message: &str) {
        self.fail_after(op, 0, message);
    }

    /// Let `skip` calls of `op` succeed, then fail the one after.
    pub fn fail_after(&self, op: MockOp, skip: u32, message: &str) {
        self.failures.lock().insert(op, (skip, message.to_string()));
    }

    /// Delay applied inside every structural change, to widen race windows.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Delay applied to state and address queries, which take no handle lock.
    pub fn set_query_latency(&self, latency: Duration) {
        *self.query_latency.lock() = latency;
    }

    /// Register a base image volume, as if copied into the pool by an operator.
    pub fn add_image(&self, pool: &str, name: &str, capacity_gib: u64) -> Result<VolumeHandle> {
        self.create_volume(&VolumeSpec::qcow2(pool, name, capacity_gib))
    }

    /// Bytes uploaded through `import_volume`.
    pub fn volume_data(&self, handle: &VolumeHandle) -> Option<Vec<u8>> {
        self.volumes.get(&handle.key()).map(|v| v.data.clone())
    }

    /// Simulate a state change made behind the emulator's back (guest
    /// shutdown, crash).
    pub fn force_state(&self, handle: &DomainHandle, state: DomainState) -> Result<()> {
        let mut domain = self
            .domains
            .get_mut(&handle.uuid)
            .ok_or_else(|| HypervisorError::DomainNotFound(handle.name.clone()))?;
        domain.state = state;
        Ok(())
    }

    /// Simulate `virsh undefine` run by someone else.
    pub fn vanish(&self, handle: &DomainHandle) {
        self.domains.remove(&handle.uuid);
    }

    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }

    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    pub fn has_volume(&self, handle: &VolumeHandle) -> bool {
        self.volumes.contains_key(&handle.key())
    }

    fn check_failure(&self, op: MockOp) -> Result<()> {
        let mut failures = self.failures.lock();
        let Some((skip, _)) = failures.get_mut(&op) else {
            return Ok(());
        };
        if *skip > 0 {
            *skip -= 1;
            return Ok(());
        }

        let message = failures.remove(&op).map(|(_, m)| m).unwrap_or_default();
        match op {
            MockOp::CreateDomain | MockOp::CreateVolume => Err(HypervisorError::Provision(message)),
            _ => Err(HypervisorError::Backend(message)),
        }
    }

    fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
    }

    fn simulate_query_latency(&self) {
        let latency = *self.query_latency.lock();
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
    }

    fn lease(&self) -> String {
        let n = self.next_lease.fetch_add(1, Ordering::Relaxed);
        format!("192.168.{}.{}", 122 + (n / 250) % 100, n % 250 + 2)
    }

    fn insert_volume(&self, spec: &VolumeSpec, data: Vec<u8>) -> Result<VolumeHandle> {
        let handle = VolumeHandle {
            pool: spec.pool.clone(),
            name: spec.name.clone(),
        };
        let key = handle.key();

        self.locks.with(&key, || {
            self.simulate_latency();

            if self.volumes.contains_key(&key) {
                return Err(HypervisorError::Provision(format!(
                    "storage volume '{}' already exists",
                    key
                )));
            }

            let xml = spec
                .to_xml()
                .map_err(|e| HypervisorError::Provision(e.to_string()))?;
            self.volumes.insert(key.clone(), MockVolume { xml, data });
            Ok(handle.clone())
        })
    }

    fn load_spec(&self, handle: &DomainHandle) -> Result<DomainSpec> {
        let domain = self
            .domains
            .get(&handle.uuid)
            .ok_or_else(|| HypervisorError::DomainNotFound(handle.name.clone()))?;
        DomainSpec::from_xml(&domain.xml)
    }

    fn store_spec(&self, handle: &DomainHandle, spec: &DomainSpec) -> Result<()> {
        let xml = spec.to_xml()?;
        let mut domain = self
            .domains
            .get_mut(&handle.uuid)
            .ok_or_else(|| HypervisorError::DomainNotFound(handle.name.clone()))?;
        domain.xml = xml;
        Ok(())
    }
}

impl Hypervisor for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn create_domain(&self, spec: &DomainSpec) -> Result<DomainHandle> {
        self.check_failure(MockOp::CreateDomain)?;

        let handle = DomainHandle {
            uuid: spec.uuid,
            name: spec.name.clone(),
        };

        self.locks.with(&handle.key(), || {
            self.simulate_latency();

            if self.domains.contains_key(&spec.uuid) {
                return Err(HypervisorError::Provision(format!(
                    "domain '{}' already defined",
                    spec.name
                )));
            }

            for disk in spec.disks.iter().filter(|d| !d.transient) {
                let key = VolumeHandle {
                    pool: disk.pool.clone(),
                    name: disk.volume.clone(),
                }
                .key();
                if !self.volumes.contains_key(&key) {
                    return Err(HypervisorError::Provision(format!(
                        "storage volume '{}' not found",
                        key
                    )));
                }
            }

            let xml = spec
                .to_xml()
                .map_err(|e| HypervisorError::Provision(e.to_string()))?;

            let leases = spec.interfaces.iter().map(|_| self.lease()).collect();
            self.domains.insert(
                spec.uuid,
                MockDomain {
                    xml,
                    state: DomainState::Running,
                    leases,
                },
            );

            tracing::debug!("mock: defined and started domain {}", spec.name);
            Ok(handle.clone())
        })
    }

    fn destroy_domain(&self, handle: &DomainHandle) -> Result<()> {
        self.check_failure(MockOp::DestroyDomain)?;

        let key = handle.key();
        let result = self.locks.with(&key, || {
            self.simulate_latency();
            self.domains
                .remove(&handle.uuid)
                .map(|_| ())
                .ok_or_else(|| HypervisorError::DomainNotFound(handle.name.clone()))
        });
        self.locks.forget(&key);
        result
    }

    fn set_domain_state(&self, handle: &DomainHandle, desired: DesiredState) -> Result<()> {
        self.check_failure(MockOp::SetState)?;

        self.locks.with(&handle.key(), || {
            self.simulate_latency();

            let mut domain = self
                .domains
                .get_mut(&handle.uuid)
                .ok_or_else(|| HypervisorError::DomainNotFound(handle.name.clone()))?;

            match desired {
                DesiredState::Running if domain.state.is_active() => {
                    Err(HypervisorError::InvalidStateTransition {
                        id: handle.name.clone(),
                        state: format!("{:?}", domain.state),
                        action: "start".to_string(),
                    })
                }
                DesiredState::Running => {
                    domain.state = DomainState::Running;
                    Ok(())
                }
                DesiredState::Shutoff { .. } if !domain.state.is_active() => {
                    Err(HypervisorError::InvalidStateTransition {
                        id: handle.name.clone(),
                        state: format!("{:?}", domain.state),
                        action: "shut down".to_string(),
                    })
                }
                DesiredState::Shutoff { .. } => {
                    domain.state = DomainState::Shutoff;
                    Ok(())
                }
            }
        })
    }

    fn query_domain_state(&self, handle: &DomainHandle) -> Result<DomainState> {
        self.check_failure(MockOp::QueryState)?;
        self.simulate_query_latency();

        self.domains
            .get(&handle.uuid)
            .map(|d| d.state)
            .ok_or_else(|| HypervisorError::DomainNotFound(handle.name.clone()))
    }

    fn domain_spec(&self, handle: &DomainHandle) -> Result<DomainSpec> {
        self.load_spec(handle)
    }

    fn interface_addresses(&self, handle: &DomainHandle) -> Result<Vec<InterfaceAddress>> {
        self.check_failure(MockOp::QueryAddresses)?;
        self.simulate_query_latency();

        let (active, leases) = {
            let domain = self
                .domains
                .get(&handle.uuid)
                .ok_or_else(|| HypervisorError::DomainNotFound(handle.name.clone()))?;
            (domain.state.is_active(), domain.leases.clone())
        };
        if !active {
            return Ok(Vec::new());
        }

        let spec = self.load_spec(handle)?;
        Ok(spec
            .interfaces
            .iter()
            .zip(leases)
            .map(|(iface, ipv4)| InterfaceAddress {
                mac: iface.mac.clone(),
                ipv4,
            })
            .collect())
    }

    fn create_volume(&self, spec: &VolumeSpec) -> Result<VolumeHandle> {
        self.check_failure(MockOp::CreateVolume)?;
        self.insert_volume(spec, Vec::new())
    }

    fn import_volume(&self, spec: &VolumeSpec, data: &[u8]) -> Result<VolumeHandle> {
        self.check_failure(MockOp::ImportVolume)?;
        if data.len() as u64 > spec.capacity_bytes {
            return Err(HypervisorError::Provision(format!(
                "{} bytes do not fit in volume '{}'",
                data.len(),
                spec.name
            )));
        }
        self.insert_volume(spec, data.to_vec())
    }

    fn list_volumes(&self, pool: &str) -> Result<Vec<VolumeSpec>> {
        self.check_failure(MockOp::ListVolumes)?;

        let prefix = format!("{}/", pool);
        let mut volumes = self
            .volumes
            .iter()
            .filter(|entry| entry.key().starts_with(&prefix))
            .map(|entry| VolumeSpec::from_xml(pool, &entry.value().xml))
            .collect::<Result<Vec<_>>>()?;
        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(volumes)
    }

    fn delete_volume(&self, handle: &VolumeHandle) -> Result<()> {
        self.check_failure(MockOp::DeleteVolume)?;

        let key = handle.key();
        let result = self.locks.with(&key, || {
            self.simulate_latency();
            self.volumes
                .remove(&key)
                .map(|_| ())
                .ok_or_else(|| HypervisorError::Backend(format!("storage volume '{}' not found", key)))
        });
        self.locks.forget(&key);
        result
    }

    fn attach_disk(&self, domain: &DomainHandle, disk: &DiskSpec) -> Result<()> {
        self.check_failure(MockOp::AttachDisk)?;

        self.locks.with(&domain.key(), || {
            self.simulate_latency();

            let volume_key = VolumeHandle {
                pool: disk.pool.clone(),
                name: disk.volume.clone(),
            }
            .key();
            if !self.volumes.contains_key(&volume_key) {
                return Err(HypervisorError::Backend(format!(
                    "storage volume '{}' not found",
                    volume_key
                )));
            }

            let mut spec = self.load_spec(domain)?;
            if spec.disks.iter().any(|d| d.target == disk.target) {
                return Err(HypervisorError::Backend(format!(
                    "target {} already exists",
                    disk.target
                )));
            }
            spec.disks.push(disk.clone());
            self.store_spec(domain, &spec)
        })
    }

    fn detach_disk(&self, domain: &DomainHandle, disk: &DiskSpec) -> Result<()> {
        self.check_failure(MockOp::DetachDisk)?;

        self.locks.with(&domain.key(), || {
            self.simulate_latency();

            let mut spec = self.load_spec(domain)?;
            let before = spec.disks.len();
            spec.disks
                .retain(|d| !(d.volume == disk.volume && d.target == disk.target));
            if spec.disks.len() == before {
                return Err(HypervisorError::Backend(format!(
                    "disk {} is not attached to {}",
                    disk.target, domain.name
                )));
            }
            self.store_spec(domain, &spec)
        })
    }
}
