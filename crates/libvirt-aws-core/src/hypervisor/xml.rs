//! Serde mirrors of the subset of libvirt's domain, disk and storage volume
//! schemas that the emulator reads and writes. Unknown elements in
//! documents produced by libvirt are ignored on parse.

use crate::{HypervisorError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Flag {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "domain")]
pub(crate) struct DomainXml {
    #[serde(rename = "@type")]
    pub kind: String,
    pub name: String,
    pub uuid: String,
    pub memory: ScaledXml,
    pub vcpu: VcpuXml,
    pub os: OsXml,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<FeaturesXml>,
    #[serde(default)]
    pub devices: DevicesXml,
}

/// A number with a libvirt `unit` attribute (`<memory unit="KiB">`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ScaledXml {
    #[serde(rename = "@unit", default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(rename = "$text")]
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct VcpuXml {
    #[serde(rename = "@placement", default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<String>,
    #[serde(rename = "$text")]
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct OsXml {
    #[serde(rename = "type")]
    pub kind: OsTypeXml,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot: Option<BootXml>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct OsTypeXml {
    #[serde(rename = "@arch", default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(rename = "$text")]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct BootXml {
    #[serde(rename = "@dev")]
    pub dev: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct FeaturesXml {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acpi: Option<Flag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apic: Option<Flag>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct DevicesXml {
    #[serde(default)]
    pub disk: Vec<DiskXml>,
    #[serde(default)]
    pub interface: Vec<InterfaceXml>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console: Option<ConsoleXml>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "disk")]
pub(crate) struct DiskXml {
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(rename = "@device", default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<DriverXml>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<DiskSourceXml>,
    pub target: DiskTargetXml,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readonly: Option<Flag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transient: Option<TransientXml>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct DriverXml {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct DiskSourceXml {
    #[serde(rename = "@pool", default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,
    #[serde(rename = "@volume", default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    #[serde(rename = "@file", default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct DiskTargetXml {
    #[serde(rename = "@dev")]
    pub dev: String,
    #[serde(rename = "@bus", default, skip_serializing_if = "Option::is_none")]
    pub bus: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct TransientXml {
    #[serde(rename = "@shareBacking", default, skip_serializing_if = "Option::is_none")]
    pub share_backing: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct InterfaceXml {
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<MacXml>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<InterfaceSourceXml>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelXml>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct MacXml {
    #[serde(rename = "@address")]
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct InterfaceSourceXml {
    #[serde(rename = "@network", default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ModelXml {
    #[serde(rename = "@type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ConsoleXml {
    #[serde(rename = "@type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "volume")]
pub(crate) struct StorageVolumeXml {
    #[serde(rename = "@type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub name: String,
    pub capacity: ScaledXml,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<VolumeTargetXml>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct VolumeTargetXml {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<FormatXml>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct FormatXml {
    #[serde(rename = "@type")]
    pub kind: String,
}

pub(crate) fn to_xml<T: Serialize>(value: &T) -> Result<String> {
    quick_xml::se::to_string(value).map_err(HypervisorError::from)
}

pub(crate) fn from_xml<'de, T: Deserialize<'de>>(xml: &'de str) -> Result<T> {
    quick_xml::de::from_str(xml).map_err(HypervisorError::from)
}

/// Multiplier for a libvirt scaled-integer unit. Bare `k`/`M`/`G` are
/// binary in libvirt; `KB`/`MB`/`GB` are decimal.
pub(crate) fn unit_multiplier(unit: Option<&str>, default: u64) -> Result<u64> {
    let multiplier = match unit {
        None => default,
        Some("b") | Some("bytes") => 1,
        Some("KB") => 1_000,
        Some("k") | Some("K") | Some("KiB") => 1 << 10,
        Some("MB") => 1_000_000,
        Some("M") | Some("MiB") => 1 << 20,
        Some("GB") => 1_000_000_000,
        Some("G") | Some("GiB") => 1 << 30,
        Some("TB") => 1_000_000_000_000,
        Some("T") | Some("TiB") => 1 << 40,
        Some(other) => {
            return Err(HypervisorError::Xml(format!("unknown unit '{}'", other)));
        }
    };
    Ok(multiplier)
}

/// Convert a scaled value to bytes; `default_unit` applies when libvirt
/// omits the attribute (KiB for memory, bytes for capacity).
pub(crate) fn scaled_to_bytes(scaled: &ScaledXml, default_unit: u64) -> Result<u64> {
    let multiplier = unit_multiplier(scaled.unit.as_deref(), default_unit)?;
    scaled
        .value
        .checked_mul(multiplier)
        .ok_or_else(|| HypervisorError::Xml(format!("value {} overflows", scaled.value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_multiplier() {
        assert_eq!(unit_multiplier(Some("KiB"), 1).unwrap(), 1024);
        assert_eq!(unit_multiplier(Some("k"), 1).unwrap(), 1024);
        assert_eq!(unit_multiplier(Some("KB"), 1).unwrap(), 1000);
        assert_eq!(unit_multiplier(Some("GiB"), 1).unwrap(), 1 << 30);
        assert_eq!(unit_multiplier(None, 1024).unwrap(), 1024);
        assert!(unit_multiplier(Some("furlongs"), 1).is_err());
    }

    #[test]
    fn test_scaled_to_bytes_overflow() {
        let scaled = ScaledXml {
            unit: Some("TiB".to_string()),
            value: u64::MAX,
        };
        assert!(scaled_to_bytes(&scaled, 1).is_err());
    }
}
