use thiserror::Error;

#[derive(Error, Debug)]
pub enum HypervisorError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid value for parameter {field}: {reason}")]
    InvalidParameter { field: String, reason: String },

    #[error("The instance ID '{0}' does not exist")]
    InstanceNotFound(String),

    #[error("The volume '{0}' does not exist")]
    VolumeNotFound(String),

    #[error("The image id '{0}' does not exist")]
    ImageNotFound(String),

    #[error("Domain '{0}' not found")]
    DomainNotFound(String),

    #[error("Volume '{volume}' is not attached to instance '{instance}'")]
    AttachmentNotFound { volume: String, instance: String },

    #[error("Cannot {action} '{id}' while it is {state}")]
    InvalidStateTransition {
        id: String,
        state: String,
        action: String,
    },

    #[error("Volume '{0}' is in use")]
    VolumeInUse(String),

    #[error("Resource '{0}' already exists")]
    AlreadyExists(String),

    #[error("Provisioning failed: {0}")]
    Provision(String),

    #[error("Hypervisor operation failed: {0}")]
    Backend(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// A multi-resource call failed after some resources were already changed.
    #[error("{source} (already applied: {})", .completed.join(", "))]
    Partial {
        completed: Vec<String>,
        #[source]
        source: Box<HypervisorError>,
    },
}

impl HypervisorError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        HypervisorError::InvalidParameter {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// True for faults caused by the request rather than by the backend.
    pub fn is_client_error(&self) -> bool {
        if let HypervisorError::Partial { source, .. } = self {
            return source.is_client_error();
        }
        matches!(
            self,
            HypervisorError::MissingParameter(_)
                | HypervisorError::InvalidParameter { .. }
                | HypervisorError::InstanceNotFound(_)
                | HypervisorError::VolumeNotFound(_)
                | HypervisorError::ImageNotFound(_)
                | HypervisorError::AttachmentNotFound { .. }
                | HypervisorError::InvalidStateTransition { .. }
                | HypervisorError::VolumeInUse(_)
                | HypervisorError::AlreadyExists(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        if let HypervisorError::Partial { source, .. } = self {
            return source.is_not_found();
        }
        matches!(
            self,
            HypervisorError::InstanceNotFound(_)
                | HypervisorError::VolumeNotFound(_)
                | HypervisorError::ImageNotFound(_)
                | HypervisorError::DomainNotFound(_)
        )
    }

    /// Wrap `self` with the changes that went through before it happened.
    pub fn after(self, completed: Vec<String>) -> Self {
        if completed.is_empty() {
            self
        } else {
            HypervisorError::Partial {
                completed,
                source: Box::new(self),
            }
        }
    }
}

impl From<quick_xml::DeError> for HypervisorError {
    fn from(err: quick_xml::DeError) -> Self {
        HypervisorError::Xml(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HypervisorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_keeps_source_class() {
        let err = HypervisorError::Backend("connection reset".to_string())
            .after(vec!["i-1: running -> stopped".to_string()]);
        assert!(!err.is_client_error());
        assert_eq!(
            err.to_string(),
            "Hypervisor operation failed: connection reset (already applied: i-1: running -> stopped)"
        );

        let err = HypervisorError::InstanceNotFound("i-2".to_string()).after(vec!["i-1".to_string()]);
        assert!(err.is_client_error());
        assert!(err.is_not_found());
    }

    #[test]
    fn test_after_nothing_is_unchanged() {
        let err = HypervisorError::Backend("boom".to_string()).after(Vec::new());
        assert!(matches!(err, HypervisorError::Backend(_)));
    }
}
