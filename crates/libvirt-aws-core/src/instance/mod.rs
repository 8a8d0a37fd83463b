// Emulated EC2 instances
pub mod state;
pub mod types;

pub use state::{Instance, InstanceState, NetworkInterface, ResourceSpec};
pub use types::{InstanceTypeCatalog, InstanceTypeSpec, DEFAULT_INSTANCE_TYPE};
