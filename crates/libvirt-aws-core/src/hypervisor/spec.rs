use super::xml::{
    self, BootXml, ConsoleXml, DevicesXml, DiskSourceXml, DiskTargetXml, DiskXml, DomainXml,
    DriverXml, FeaturesXml, Flag, FormatXml, InterfaceSourceXml, InterfaceXml, MacXml, ModelXml,
    OsTypeXml, OsXml, ScaledXml, StorageVolumeXml, TransientXml, VcpuXml, VolumeTargetXml,
};
use crate::{HypervisorError, Result};
use uuid::Uuid;

const KIB: u64 = 1024;
const GIB: u64 = 1024 * 1024 * 1024;

/// How the guest sees a disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskDevice {
    Disk,
    /// Read-only optical drive, used for cloud-init seed images.
    Cdrom,
}

impl DiskDevice {
    fn as_str(&self) -> &'static str {
        match self {
            DiskDevice::Disk => "disk",
            DiskDevice::Cdrom => "cdrom",
        }
    }

    fn driver_format(&self) -> &'static str {
        match self {
            DiskDevice::Disk => "qcow2",
            DiskDevice::Cdrom => "raw",
        }
    }
}

/// A block device backed by a libvirt storage pool volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskSpec {
    pub pool: String,
    pub volume: String,
    pub device: DiskDevice,
    /// Guest device name, e.g. `vda`.
    pub target: String,
    pub bus: String,
    /// Guest writes go to a throwaway overlay; the backing volume is shared
    /// read-only between domains.
    pub transient: bool,
    pub serial: Option<String>,
}

impl DiskSpec {
    pub fn volume(pool: &str, volume: &str, target: &str) -> Self {
        Self {
            pool: pool.to_string(),
            volume: volume.to_string(),
            device: DiskDevice::Disk,
            target: target.to_string(),
            bus: "virtio".to_string(),
            transient: false,
            serial: None,
        }
    }

    /// Raw image exposed as an IDE cdrom.
    pub fn cdrom(pool: &str, volume: &str, target: &str) -> Self {
        Self {
            device: DiskDevice::Cdrom,
            bus: "ide".to_string(),
            ..Self::volume(pool, volume, target)
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn to_xml(&self) -> Result<String> {
        xml::to_xml(&self.to_xml_model())
    }

    pub fn from_xml(doc: &str) -> Result<Self> {
        let disk: DiskXml = xml::from_xml(doc)?;
        Self::from_xml_model(&disk).ok_or_else(|| {
            HypervisorError::Xml(format!("disk of type '{}' is not a pool volume", disk.kind))
        })
    }

    pub(crate) fn to_xml_model(&self) -> DiskXml {
        DiskXml {
            kind: "volume".to_string(),
            device: Some(self.device.as_str().to_string()),
            driver: Some(DriverXml {
                name: "qemu".to_string(),
                kind: Some(self.device.driver_format().to_string()),
            }),
            source: Some(DiskSourceXml {
                pool: Some(self.pool.clone()),
                volume: Some(self.volume.clone()),
                file: None,
            }),
            target: DiskTargetXml {
                dev: self.target.clone(),
                bus: Some(self.bus.clone()),
            },
            readonly: (self.device == DiskDevice::Cdrom).then(Flag::default),
            transient: self.transient.then(|| TransientXml {
                share_backing: Some("yes".to_string()),
            }),
            serial: self.serial.clone(),
        }
    }

    /// `None` for disks not backed by a pool volume (plain files, block devices).
    pub(crate) fn from_xml_model(disk: &DiskXml) -> Option<Self> {
        if disk.kind != "volume" {
            return None;
        }
        let source = disk.source.as_ref()?;
        let device = match disk.device.as_deref() {
            None | Some("disk") => DiskDevice::Disk,
            Some("cdrom") => DiskDevice::Cdrom,
            Some(_) => return None,
        };

        Some(Self {
            pool: source.pool.clone()?,
            volume: source.volume.clone()?,
            device,
            target: disk.target.dev.clone(),
            bus: disk.target.bus.clone().unwrap_or_else(|| "virtio".to_string()),
            transient: disk.transient.is_some(),
            serial: disk.serial.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSpec {
    pub network: String,
    pub mac: String,
    pub model: String,
}

impl InterfaceSpec {
    /// Interface on `network` with a random MAC in QEMU's 52:54:00 range.
    pub fn on_network(network: &str) -> Self {
        let bytes = Uuid::new_v4();
        let b = bytes.as_bytes();
        Self {
            network: network.to_string(),
            mac: format!("52:54:00:{:02x}:{:02x}:{:02x}", b[0], b[1], b[2]),
            model: "virtio".to_string(),
        }
    }
}

/// Structured description of a domain, convertible to and from libvirt
/// domain XML without loss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainSpec {
    pub name: String,
    pub uuid: Uuid,
    pub vcpus: u32,
    pub memory_kib: u64,
    pub disks: Vec<DiskSpec>,
    pub interfaces: Vec<InterfaceSpec>,
}

impl DomainSpec {
    pub fn new(name: &str, vcpus: u32, memory_mib: u64) -> Self {
        Self {
            name: name.to_string(),
            uuid: Uuid::new_v4(),
            vcpus,
            memory_kib: memory_mib * KIB,
            disks: Vec::new(),
            interfaces: Vec::new(),
        }
    }

    pub fn with_disk(mut self, disk: DiskSpec) -> Self {
        self.disks.push(disk);
        self
    }

    pub fn with_interface(mut self, interface: InterfaceSpec) -> Self {
        self.interfaces.push(interface);
        self
    }

    pub fn memory_mib(&self) -> u64 {
        self.memory_kib / KIB
    }

    pub fn to_xml(&self) -> Result<String> {
        let domain = DomainXml {
            kind: "kvm".to_string(),
            name: self.name.clone(),
            uuid: self.uuid.to_string(),
            memory: ScaledXml {
                unit: Some("KiB".to_string()),
                value: self.memory_kib,
            },
            vcpu: VcpuXml {
                placement: Some("static".to_string()),
                count: self.vcpus,
            },
            os: OsXml {
                kind: OsTypeXml {
                    arch: None,
                    value: "hvm".to_string(),
                },
                boot: Some(BootXml {
                    dev: "hd".to_string(),
                }),
            },
            features: Some(FeaturesXml {
                acpi: Some(Flag::default()),
                apic: Some(Flag::default()),
            }),
            devices: DevicesXml {
                disk: self.disks.iter().map(DiskSpec::to_xml_model).collect(),
                interface: self
                    .interfaces
                    .iter()
                    .map(|iface| InterfaceXml {
                        kind: "network".to_string(),
                        mac: Some(MacXml {
                            address: iface.mac.clone(),
                        }),
                        source: Some(InterfaceSourceXml {
                            network: Some(iface.network.clone()),
                        }),
                        model: Some(ModelXml {
                            kind: iface.model.clone(),
                        }),
                    })
                    .collect(),
                console: Some(ConsoleXml {
                    kind: "pty".to_string(),
                }),
            },
        };

        xml::to_xml(&domain)
    }

    pub fn from_xml(doc: &str) -> Result<Self> {
        let domain: DomainXml = xml::from_xml(doc)?;

        let uuid = Uuid::parse_str(domain.uuid.trim())
            .map_err(|e| HypervisorError::Xml(format!("invalid domain uuid: {}", e)))?;

        let memory_bytes = xml::scaled_to_bytes(&domain.memory, KIB)?;

        let disks = domain
            .devices
            .disk
            .iter()
            .filter_map(DiskSpec::from_xml_model)
            .collect();

        let interfaces = domain
            .devices
            .interface
            .iter()
            .filter(|iface| iface.kind == "network")
            .filter_map(|iface| {
                Some(InterfaceSpec {
                    network: iface.source.as_ref()?.network.clone()?,
                    mac: iface.mac.as_ref()?.address.clone(),
                    model: iface
                        .model
                        .as_ref()
                        .map(|m| m.kind.clone())
                        .unwrap_or_else(|| "virtio".to_string()),
                })
            })
            .collect();

        Ok(Self {
            name: domain.name,
            uuid,
            vcpus: domain.vcpu.count,
            memory_kib: memory_bytes / KIB,
            disks,
            interfaces,
        })
    }
}

/// A storage pool volume: created for CreateVolume and seed images, listed
/// for DescribeImages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    pub pool: String,
    pub name: String,
    pub capacity_bytes: u64,
    pub format: String,
}

impl VolumeSpec {
    pub fn qcow2(pool: &str, name: &str, capacity_gib: u64) -> Self {
        Self {
            pool: pool.to_string(),
            name: name.to_string(),
            capacity_bytes: capacity_gib * GIB,
            format: "qcow2".to_string(),
        }
    }

    /// Raw volume sized to hold exactly `capacity_bytes`.
    pub fn raw(pool: &str, name: &str, capacity_bytes: u64) -> Self {
        Self {
            pool: pool.to_string(),
            name: name.to_string(),
            capacity_bytes,
            format: "raw".to_string(),
        }
    }

    /// Size rounded up to whole GiB, the unit EC2 reports.
    pub fn capacity_gib(&self) -> u64 {
        self.capacity_bytes.div_ceil(GIB)
    }

    pub fn to_xml(&self) -> Result<String> {
        let volume = StorageVolumeXml {
            kind: Some("file".to_string()),
            name: self.name.clone(),
            capacity: ScaledXml {
                unit: Some("bytes".to_string()),
                value: self.capacity_bytes,
            },
            target: Some(VolumeTargetXml {
                path: None,
                format: Some(FormatXml {
                    kind: self.format.clone(),
                }),
            }),
        };

        xml::to_xml(&volume)
    }

    /// Parse a storage volume document; the pool is not part of the
    /// document and has to be supplied.
    pub fn from_xml(pool: &str, doc: &str) -> Result<Self> {
        let volume: StorageVolumeXml = xml::from_xml(doc)?;
        let bytes = xml::scaled_to_bytes(&volume.capacity, 1)?;

        Ok(Self {
            pool: pool.to_string(),
            name: volume.name,
            capacity_bytes: bytes,
            format: volume
                .target
                .and_then(|t| t.format)
                .map(|f| f.kind)
                .unwrap_or_else(|| "raw".to_string()),
        })
    }
}

#[cfg(test)]
#[path = "spec_tests.rs"]
mod spec_tests;
