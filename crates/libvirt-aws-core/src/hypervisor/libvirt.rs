use super::{
    DesiredState, DiskSpec, DomainHandle, DomainSpec, DomainState, HandleLocks, Hypervisor,
    InterfaceAddress, VolumeHandle, VolumeSpec,
};
use crate::{HypervisorError, Result};
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use virt::connect::Connect;
use virt::domain::Domain;
use virt::error::ErrorNumber;
use virt::storage_pool::StoragePool;
use virt::storage_vol::StorageVol;
use virt::stream::Stream;
use virt::sys;

/// Upload chunk size for `import_volume`.
const UPLOAD_CHUNK: usize = 256 * 1024;

/// Connection settings for [`LibvirtBackend`].
#[derive(Debug, Clone)]
pub struct LibvirtSettings {
    pub uri: String,
    /// How long a graceful shutdown may take before the domain is destroyed.
    pub shutdown_timeout: Duration,
}

impl Default for LibvirtSettings {
    fn default() -> Self {
        Self {
            uri: "qemu:///system".to_string(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Hypervisor backed by a live libvirt connection.
pub struct LibvirtBackend {
    conn: Mutex<Connect>,
    settings: LibvirtSettings,
    locks: HandleLocks,
}

impl std::fmt::Debug for LibvirtBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibvirtBackend")
            .field("uri", &self.settings.uri)
            .finish()
    }
}

fn backend_err(context: &str, err: virt::error::Error) -> HypervisorError {
    HypervisorError::Backend(format!("{}: {}", context, err))
}

fn map_domain_state(raw: sys::virDomainState) -> DomainState {
    match raw {
        sys::VIR_DOMAIN_RUNNING => DomainState::Running,
        sys::VIR_DOMAIN_BLOCKED => DomainState::Blocked,
        sys::VIR_DOMAIN_PAUSED => DomainState::Paused,
        sys::VIR_DOMAIN_SHUTDOWN => DomainState::ShuttingDown,
        sys::VIR_DOMAIN_SHUTOFF => DomainState::Shutoff,
        sys::VIR_DOMAIN_CRASHED => DomainState::Crashed,
        sys::VIR_DOMAIN_PMSUSPENDED => DomainState::Suspended,
        _ => DomainState::NoState,
    }
}

impl LibvirtBackend {
    pub fn connect(settings: LibvirtSettings) -> Result<Self> {
        let conn = Connect::open(Some(&settings.uri))
            .map_err(|e| backend_err(&format!("failed to connect to {}", settings.uri), e))?;

        tracing::info!("Connected to libvirt at {}", settings.uri);

        Ok(Self {
            conn: Mutex::new(conn),
            settings,
            locks: HandleLocks::new(),
        })
    }

    fn lookup(&self, handle: &DomainHandle) -> Result<Domain> {
        let conn = self.conn.lock();
        Domain::lookup_by_uuid_string(&conn, &handle.uuid.to_string()).map_err(|e| {
            if e.code() == ErrorNumber::NoDomain {
                HypervisorError::DomainNotFound(handle.name.clone())
            } else {
                backend_err("domain lookup failed", e)
            }
        })
    }

    fn lookup_volume(&self, pool: &str, name: &str) -> Result<StorageVol> {
        let conn = self.conn.lock();
        let pool = StoragePool::lookup_by_name(&conn, pool)
            .map_err(|e| backend_err(&format!("storage pool '{}'", pool), e))?;
        StorageVol::lookup_by_name(&pool, name)
            .map_err(|e| backend_err(&format!("storage volume '{}'", name), e))
    }

    fn state_of(domain: &Domain) -> Result<DomainState> {
        let (raw, _reason) = domain
            .get_state()
            .map_err(|e| backend_err("failed to read domain state", e))?;
        Ok(map_domain_state(raw))
    }

    /// ACPI shutdown, then poll until the guest is off. Destroy once the
    /// timeout runs out.
    fn shutdown(&self, handle: &DomainHandle, domain: &Domain, force: bool) -> Result<()> {
        if !force {
            tracing::info!("Shutting down domain {}", handle.name);
            domain
                .shutdown()
                .map_err(|e| backend_err("shutdown request failed", e))?;

            let start = Instant::now();
            while start.elapsed() < self.settings.shutdown_timeout {
                if !Self::state_of(domain)?.is_active() {
                    tracing::info!("Domain {} shut down gracefully", handle.name);
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(500));
            }

            tracing::warn!("Domain {} did not shut down in time, destroying", handle.name);
        }

        domain
            .destroy()
            .map_err(|e| backend_err("destroy failed", e))?;
        Ok(())
    }

    fn upload(&self, volume: &StorageVol, data: &[u8]) -> Result<()> {
        let stream = {
            let conn = self.conn.lock();
            Stream::new(&conn, 0).map_err(|e| backend_err("failed to open stream", e))?
        };
        volume
            .upload(&stream, 0, data.len() as u64, 0)
            .map_err(|e| backend_err("volume upload failed", e))?;

        let mut sent = 0;
        while sent < data.len() {
            let end = (sent + UPLOAD_CHUNK).min(data.len());
            match stream.send(&data[sent..end]) {
                Ok(0) => {
                    return Err(HypervisorError::Backend(
                        "volume upload stream closed early".to_string(),
                    ))
                }
                Ok(n) => sent += n,
                Err(e) => {
                    let _ = stream.abort();
                    return Err(backend_err("volume upload failed", e));
                }
            }
        }
        stream
            .finish()
            .map_err(|e| backend_err("volume upload failed", e))
    }

    fn device_flags(domain: &Domain) -> Result<u32> {
        let active = domain
            .is_active()
            .map_err(|e| backend_err("failed to read domain activity", e))?;
        Ok(if active {
            sys::VIR_DOMAIN_AFFECT_LIVE | sys::VIR_DOMAIN_AFFECT_CONFIG
        } else {
            sys::VIR_DOMAIN_AFFECT_CONFIG
        })
    }
}

impl Hypervisor for LibvirtBackend {
    fn name(&self) -> &'static str {
        "libvirt"
    }

    fn create_domain(&self, spec: &DomainSpec) -> Result<DomainHandle> {
        let xml = spec
            .to_xml()
            .map_err(|e| HypervisorError::Provision(e.to_string()))?;
        let handle = DomainHandle {
            uuid: spec.uuid,
            name: spec.name.clone(),
        };

        self.locks.with(&handle.key(), || {
            let domain = {
                let conn = self.conn.lock();
                Domain::define_xml(&conn, &xml)
                    .map_err(|e| HypervisorError::Provision(format!("define failed: {}", e)))?
            };

            if let Err(e) = domain.create() {
                // Leave nothing behind when the boot fails.
                let _ = domain.undefine();
                return Err(HypervisorError::Provision(format!("start failed: {}", e)));
            }

            tracing::info!("Defined and started domain {} ({})", spec.name, spec.uuid);
            Ok(handle.clone())
        })
    }

    fn destroy_domain(&self, handle: &DomainHandle) -> Result<()> {
        let key = handle.key();
        let result = self.locks.with(&key, || {
            let domain = self.lookup(handle)?;
            if Self::state_of(&domain)?.is_active() {
                domain
                    .destroy()
                    .map_err(|e| backend_err("destroy failed", e))?;
            }
            domain
                .undefine()
                .map_err(|e| backend_err("undefine failed", e))?;
            tracing::info!("Undefined domain {}", handle.name);
            Ok(())
        });
        self.locks.forget(&key);
        result
    }

    fn set_domain_state(&self, handle: &DomainHandle, desired: DesiredState) -> Result<()> {
        self.locks.with(&handle.key(), || {
            let domain = self.lookup(handle)?;
            let current = Self::state_of(&domain)?;

            match desired {
                DesiredState::Running => {
                    if current.is_active() {
                        return Err(HypervisorError::InvalidStateTransition {
                            id: handle.name.clone(),
                            state: format!("{:?}", current),
                            action: "start".to_string(),
                        });
                    }
                    domain
                        .create()
                        .map_err(|e| backend_err("start failed", e))?;
                    tracing::info!("Started domain {}", handle.name);
                    Ok(())
                }
                DesiredState::Shutoff { force } => {
                    if !current.is_active() {
                        return Err(HypervisorError::InvalidStateTransition {
                            id: handle.name.clone(),
                            state: format!("{:?}", current),
                            action: "shut down".to_string(),
                        });
                    }
                    self.shutdown(handle, &domain, force)
                }
            }
        })
    }

    fn query_domain_state(&self, handle: &DomainHandle) -> Result<DomainState> {
        let domain = self.lookup(handle)?;
        Self::state_of(&domain)
    }

    fn domain_spec(&self, handle: &DomainHandle) -> Result<DomainSpec> {
        let domain = self.lookup(handle)?;
        let xml = domain
            .get_xml_desc(sys::VIR_DOMAIN_XML_INACTIVE)
            .map_err(|e| backend_err("failed to read domain XML", e))?;
        DomainSpec::from_xml(&xml)
    }

    fn interface_addresses(&self, handle: &DomainHandle) -> Result<Vec<InterfaceAddress>> {
        let domain = self.lookup(handle)?;
        if !Self::state_of(&domain)?.is_active() {
            return Ok(Vec::new());
        }

        let interfaces = domain
            .interface_addresses(sys::VIR_DOMAIN_INTERFACE_ADDRESSES_SRC_LEASE, 0)
            .map_err(|e| backend_err("failed to read interface addresses", e))?;

        Ok(interfaces
            .into_iter()
            .filter_map(|iface| {
                let ipv4 = iface
                    .addrs
                    .into_iter()
                    .find(|a| a.typed == sys::VIR_IP_ADDR_TYPE_IPV4 as i64)?;
                Some(InterfaceAddress {
                    mac: iface.hwaddr.to_lowercase(),
                    ipv4: ipv4.addr,
                })
            })
            .collect())
    }

    fn create_volume(&self, spec: &VolumeSpec) -> Result<VolumeHandle> {
        let xml = spec
            .to_xml()
            .map_err(|e| HypervisorError::Provision(e.to_string()))?;
        let handle = VolumeHandle {
            pool: spec.pool.clone(),
            name: spec.name.clone(),
        };

        self.locks.with(&handle.key(), || {
            let conn = self.conn.lock();
            let pool = StoragePool::lookup_by_name(&conn, &spec.pool).map_err(|e| {
                HypervisorError::Provision(format!("storage pool '{}': {}", spec.pool, e))
            })?;
            StorageVol::create_xml(&pool, &xml, 0).map_err(|e| {
                HypervisorError::Provision(format!("volume create failed: {}", e))
            })?;

            tracing::info!("Created storage volume {}", handle.key());
            Ok(handle.clone())
        })
    }

    fn import_volume(&self, spec: &VolumeSpec, data: &[u8]) -> Result<VolumeHandle> {
        let handle = self.create_volume(spec)?;

        let uploaded = self.locks.with(&handle.key(), || {
            let volume = self.lookup_volume(&handle.pool, &handle.name)?;
            self.upload(&volume, data)
        });
        if let Err(e) = uploaded {
            if let Err(cleanup) = self.delete_volume(&handle) {
                tracing::warn!("Failed to remove partial volume {}: {}", handle.key(), cleanup);
            }
            return Err(HypervisorError::Provision(e.to_string()));
        }

        tracing::info!("Uploaded {} bytes into {}", data.len(), handle.key());
        Ok(handle)
    }

    fn list_volumes(&self, pool: &str) -> Result<Vec<VolumeSpec>> {
        let volumes = {
            let conn = self.conn.lock();
            let storage = StoragePool::lookup_by_name(&conn, pool)
                .map_err(|e| backend_err(&format!("storage pool '{}'", pool), e))?;
            storage
                .list_all_volumes(0)
                .map_err(|e| backend_err("failed to list volumes", e))?
        };

        let mut specs = Vec::with_capacity(volumes.len());
        for volume in volumes {
            let xml = volume
                .get_xml_desc(0)
                .map_err(|e| backend_err("failed to read volume XML", e))?;
            specs.push(VolumeSpec::from_xml(pool, &xml)?);
        }
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(specs)
    }

    fn delete_volume(&self, handle: &VolumeHandle) -> Result<()> {
        let key = handle.key();
        let result = self.locks.with(&key, || {
            let volume = self.lookup_volume(&handle.pool, &handle.name)?;
            volume
                .delete(0)
                .map_err(|e| backend_err("volume delete failed", e))?;
            tracing::info!("Deleted storage volume {}", key);
            Ok(())
        });
        self.locks.forget(&key);
        result
    }

    fn attach_disk(&self, domain: &DomainHandle, disk: &DiskSpec) -> Result<()> {
        let xml = disk.to_xml()?;
        self.locks.with(&domain.key(), || {
            let dom = self.lookup(domain)?;
            let flags = Self::device_flags(&dom)?;
            dom.attach_device_flags(&xml, flags)
                .map_err(|e| backend_err("attach failed", e))?;
            tracing::info!("Attached {} to {} as {}", disk.volume, domain.name, disk.target);
            Ok(())
        })
    }

    fn detach_disk(&self, domain: &DomainHandle, disk: &DiskSpec) -> Result<()> {
        let xml = disk.to_xml()?;
        self.locks.with(&domain.key(), || {
            let dom = self.lookup(domain)?;
            let flags = Self::device_flags(&dom)?;
            dom.detach_device_flags(&xml, flags)
                .map_err(|e| backend_err("detach failed", e))?;
            tracing::info!("Detached {} from {}", disk.volume, domain.name);
            Ok(())
        })
    }
}
