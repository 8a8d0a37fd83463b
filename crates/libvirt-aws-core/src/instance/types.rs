use crate::{HypervisorError, Result};
use byte_unit::Byte;
use std::collections::BTreeMap;

pub const DEFAULT_INSTANCE_TYPE: &str = "t2.micro";

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceTypeSpec {
    pub vcpus: u32,
    pub memory_mib: u64,
}

/// Named instance shapes accepted by RunInstances.
#[derive(Debug, Clone)]
pub struct InstanceTypeCatalog {
    types: BTreeMap<String, InstanceTypeSpec>,
}

impl InstanceTypeCatalog {
    pub fn builtin() -> Self {
        let builtin: &[(&str, u32, u64)] = &[
            ("t2.nano", 1, 512),
            ("t2.micro", 1, 1024),
            ("t2.small", 1, 2048),
            ("t2.medium", 2, 4096),
            ("t2.large", 2, 8192),
            ("t3.micro", 2, 1024),
            ("t3.small", 2, 2048),
            ("t3.medium", 2, 4096),
            ("t3.large", 2, 8192),
            ("m5.large", 2, 8192),
            ("m5.xlarge", 4, 16384),
        ];

        let types = builtin
            .iter()
            .map(|(name, vcpus, memory_mib)| {
                (
                    name.to_string(),
                    InstanceTypeSpec {
                        vcpus: *vcpus,
                        memory_mib: *memory_mib,
                    },
                )
            })
            .collect();

        Self { types }
    }

    /// Register (or override) a type; `memory` is a size string such as "8GiB".
    pub fn insert(&mut self, name: &str, vcpus: u32, memory: &str) -> Result<()> {
        if vcpus == 0 {
            return Err(HypervisorError::invalid(
                "vcpus",
                format!("instance type '{}' needs at least one vCPU", name),
            ));
        }

        let bytes = Byte::parse_str(memory, true)
            .map_err(|e| HypervisorError::invalid("memory", format!("'{}': {}", memory, e)))?
            .as_u64();

        if bytes < MIB || bytes % MIB != 0 {
            return Err(HypervisorError::invalid(
                "memory",
                format!("'{}' must be a whole number of MiB", memory),
            ));
        }

        self.types.insert(
            name.to_string(),
            InstanceTypeSpec {
                vcpus,
                memory_mib: bytes / MIB,
            },
        );
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<InstanceTypeSpec> {
        self.types.get(name).copied().ok_or_else(|| {
            HypervisorError::invalid(
                "InstanceType",
                format!("unsupported instance type '{}'", name),
            )
        })
    }
}

impl Default for InstanceTypeCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let catalog = InstanceTypeCatalog::builtin();
        let spec = catalog.lookup("t3.medium").unwrap();
        assert_eq!(spec.vcpus, 2);
        assert_eq!(spec.memory_mib, 4096);
        assert!(catalog.lookup(DEFAULT_INSTANCE_TYPE).is_ok());
    }

    #[test]
    fn test_unknown_type_names_field() {
        let catalog = InstanceTypeCatalog::builtin();
        match catalog.lookup("x9.huge").unwrap_err() {
            HypervisorError::InvalidParameter { field, .. } => assert_eq!(field, "InstanceType"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_insert_custom_type() {
        let mut catalog = InstanceTypeCatalog::builtin();
        catalog.insert("lab.big", 8, "16GiB").unwrap();
        let spec = catalog.lookup("lab.big").unwrap();
        assert_eq!(spec.vcpus, 8);
        assert_eq!(spec.memory_mib, 16384);
    }

    #[test]
    fn test_insert_rejects_bad_sizes() {
        let mut catalog = InstanceTypeCatalog::builtin();
        assert!(catalog.insert("lab.none", 0, "1GiB").is_err());
        assert!(catalog.insert("lab.tiny", 1, "100KiB").is_err());
        assert!(catalog.insert("lab.junk", 1, "lots").is_err());
    }
}
