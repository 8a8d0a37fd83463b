use crate::{
    hypervisor::{DomainHandle, DomainState, InterfaceAddress, InterfaceSpec, VolumeHandle},
    ids::InstanceId,
};
use libvirt_aws_models::InstanceStateInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    Terminated,
}

impl InstanceState {
    /// EC2 numeric state code.
    pub fn code(&self) -> u32 {
        match self {
            InstanceState::Pending => 0,
            InstanceState::Running => 16,
            InstanceState::Terminated => 48,
            InstanceState::Stopping => 64,
            InstanceState::Stopped => 80,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
            InstanceState::Terminated => "terminated",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pending" => Some(InstanceState::Pending),
            "running" => Some(InstanceState::Running),
            "stopping" | "shutting-down" => Some(InstanceState::Stopping),
            "stopped" => Some(InstanceState::Stopped),
            "terminated" => Some(InstanceState::Terminated),
            _ => None,
        }
    }

    pub fn info(&self) -> InstanceStateInfo {
        InstanceStateInfo {
            code: self.code(),
            name: self.name().to_string(),
        }
    }

    /// Instance state implied by an observed domain state.
    pub fn from_domain(state: DomainState) -> Self {
        match state {
            DomainState::NoState => InstanceState::Pending,
            DomainState::Running | DomainState::Blocked | DomainState::Paused => {
                InstanceState::Running
            }
            DomainState::ShuttingDown => InstanceState::Stopping,
            DomainState::Shutoff | DomainState::Crashed | DomainState::Suspended => {
                InstanceState::Stopped
            }
        }
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What the client asked for when the instance was launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    pub instance_type: String,
    pub vcpus: u32,
    pub memory_mib: u64,
    pub image_id: String,
}

/// Guest NIC, as read back from the domain definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    pub network: String,
    pub mac: String,
    /// Last DHCP lease seen. Kept across stop/start like an EC2 private IP.
    pub private_ip: Option<String>,
}

impl From<&InterfaceSpec> for NetworkInterface {
    fn from(spec: &InterfaceSpec) -> Self {
        Self {
            network: spec.network.clone(),
            mac: spec.mac.to_lowercase(),
            private_ip: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Instance {
    pub id: InstanceId,
    /// Shared by all instances launched by one RunInstances call.
    pub reservation_id: String,
    pub state: InstanceState,
    pub domain: DomainHandle,
    pub spec: ResourceSpec,
    pub availability_zone: String,
    pub private_dns_name: String,
    pub interfaces: Vec<NetworkInterface>,
    /// cloud-init seed image built from UserData; deleted with the instance.
    pub seed_volume: Option<VolumeHandle>,
    pub state_reason: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Instance {
    pub fn new(
        id: InstanceId,
        reservation_id: String,
        domain: DomainHandle,
        spec: ResourceSpec,
        availability_zone: String,
    ) -> Self {
        let now = chrono::Utc::now();
        let private_dns_name = format!("{}.internal", id);
        Self {
            id,
            reservation_id,
            state: InstanceState::Pending,
            domain,
            spec,
            availability_zone,
            private_dns_name,
            interfaces: Vec::new(),
            seed_volume: None,
            state_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn update_state(&mut self, state: InstanceState) {
        self.state = state;
        self.updated_at = chrono::Utc::now();
    }

    pub fn update_state_with_reason(&mut self, state: InstanceState, reason: impl Into<String>) {
        self.state_reason = Some(reason.into());
        self.update_state(state);
    }

    pub fn is_terminated(&self) -> bool {
        self.state == InstanceState::Terminated
    }

    /// Address of the primary interface.
    pub fn private_ip(&self) -> Option<&str> {
        self.interfaces.first()?.private_ip.as_deref()
    }

    /// Take over leases for known MACs. Returns whether anything changed.
    pub fn record_addresses(&mut self, addresses: &[InterfaceAddress]) -> bool {
        let mut changed = false;
        for iface in &mut self.interfaces {
            let lease = addresses
                .iter()
                .find(|a| a.mac.eq_ignore_ascii_case(&iface.mac));
            if let Some(lease) = lease {
                if iface.private_ip.as_deref() != Some(lease.ipv4.as_str()) {
                    iface.private_ip = Some(lease.ipv4.clone());
                    changed = true;
                }
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_codes_match_ec2() {
        assert_eq!(InstanceState::Pending.code(), 0);
        assert_eq!(InstanceState::Running.code(), 16);
        assert_eq!(InstanceState::Terminated.code(), 48);
        assert_eq!(InstanceState::Stopping.code(), 64);
        assert_eq!(InstanceState::Stopped.code(), 80);
    }

    #[test]
    fn test_from_name_round_trips() {
        for state in [
            InstanceState::Pending,
            InstanceState::Running,
            InstanceState::Stopping,
            InstanceState::Stopped,
            InstanceState::Terminated,
        ] {
            assert_eq!(InstanceState::from_name(state.name()), Some(state));
        }
        assert_eq!(InstanceState::from_name("rebooting"), None);
    }

    #[test]
    fn test_domain_state_mapping() {
        assert_eq!(InstanceState::from_domain(DomainState::Running), InstanceState::Running);
        assert_eq!(InstanceState::from_domain(DomainState::Paused), InstanceState::Running);
        assert_eq!(InstanceState::from_domain(DomainState::ShuttingDown), InstanceState::Stopping);
        assert_eq!(InstanceState::from_domain(DomainState::Shutoff), InstanceState::Stopped);
        assert_eq!(InstanceState::from_domain(DomainState::Crashed), InstanceState::Stopped);
        assert_eq!(InstanceState::from_domain(DomainState::NoState), InstanceState::Pending);
    }

    #[test]
    fn test_new_instance_starts_pending() {
        let id = InstanceId::generate();
        let domain = DomainHandle {
            uuid: uuid::Uuid::new_v4(),
            name: id.to_string(),
        };
        let spec = ResourceSpec {
            instance_type: "t3.medium".to_string(),
            vcpus: 2,
            memory_mib: 4096,
            image_id: "ami-test".to_string(),
        };
        let mut instance = Instance::new(id.clone(), "r-1".to_string(), domain, spec, "us-east-2a".to_string());
        assert_eq!(instance.state, InstanceState::Pending);
        assert_eq!(instance.private_dns_name, format!("{}.internal", id));

        instance.update_state_with_reason(InstanceState::Stopped, "Client.UserInitiatedShutdown");
        assert_eq!(instance.state, InstanceState::Stopped);
        assert!(!instance.is_terminated());
        assert!(instance.updated_at >= instance.created_at);
    }

    #[test]
    fn test_record_addresses_keeps_last_lease() {
        let id = InstanceId::generate();
        let domain = DomainHandle {
            uuid: uuid::Uuid::new_v4(),
            name: id.to_string(),
        };
        let spec = ResourceSpec {
            instance_type: "t3.micro".to_string(),
            vcpus: 2,
            memory_mib: 1024,
            image_id: "ami-test".to_string(),
        };
        let mut instance = Instance::new(id, "r-1".to_string(), domain, spec, "us-east-2a".to_string());
        instance.interfaces.push(NetworkInterface {
            network: "default".to_string(),
            mac: "52:54:00:aa:bb:cc".to_string(),
            private_ip: None,
        });
        assert_eq!(instance.private_ip(), None);

        let lease = InterfaceAddress {
            mac: "52:54:00:AA:BB:CC".to_string(),
            ipv4: "192.168.122.15".to_string(),
        };
        assert!(instance.record_addresses(&[lease.clone()]));
        assert!(!instance.record_addresses(&[lease]));
        assert_eq!(instance.private_ip(), Some("192.168.122.15"));

        // A stopped domain reports no leases; the address stays.
        assert!(!instance.record_addresses(&[]));
        assert_eq!(instance.private_ip(), Some("192.168.122.15"));
    }
}
