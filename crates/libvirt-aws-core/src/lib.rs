pub mod cloudinit;
pub mod error;
pub mod hypervisor;
pub mod ids;
pub mod instance;
pub mod store;
pub mod translator;
pub mod volume;

pub use error::{HypervisorError, Result};
