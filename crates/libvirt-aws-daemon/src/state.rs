use crate::config::AuthConfig;
use libvirt_aws_core::translator::Translator;

/// Shared by every request handler.
#[derive(Debug, Clone)]
pub struct DaemonState {
    pub translator: Translator,
    pub auth: AuthConfig,
}

impl DaemonState {
    pub fn new(translator: Translator, auth: AuthConfig) -> Self {
        Self { translator, auth }
    }
}
