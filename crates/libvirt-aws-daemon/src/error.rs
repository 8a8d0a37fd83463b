use crate::xml;
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use libvirt_aws_core::HypervisorError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Caller's fault; `code` is the EC2 error code.
    #[error("{code}: {message}")]
    BadRequest { code: &'static str, message: String },

    #[error("AuthFailure: {0}")]
    AuthFailure(String),

    #[error("InternalError: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            code,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::AuthFailure(_) => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest { code, .. } => code,
            ApiError::AuthFailure(_) => "AuthFailure",
            ApiError::Internal(_) => "InternalError",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest { message, .. } => message,
            ApiError::AuthFailure(msg) | ApiError::Internal(msg) => msg,
        }
    }

    /// EC2 error envelope tagged with the request it answers.
    pub fn render(self, request_id: &str) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{} ({}): {}", self.code(), request_id, self.message());
        } else {
            tracing::debug!("{} ({}): {}", self.code(), request_id, self.message());
        }

        let body = xml::error_document(self.code(), self.message(), request_id);
        (status, [(header::CONTENT_TYPE, xml::CONTENT_TYPE)], body).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.render(&request_id)
    }
}

impl From<HypervisorError> for ApiError {
    fn from(err: HypervisorError) -> Self {
        let message = err.to_string();
        match err {
            HypervisorError::MissingParameter(_) => ApiError::bad_request("MissingParameter", message),
            HypervisorError::InvalidParameter { .. } | HypervisorError::AlreadyExists(_) => {
                ApiError::bad_request("InvalidParameterValue", message)
            }
            HypervisorError::InstanceNotFound(_) => {
                ApiError::bad_request("InvalidInstanceID.NotFound", message)
            }
            HypervisorError::VolumeNotFound(_) => ApiError::bad_request("InvalidVolume.NotFound", message),
            HypervisorError::ImageNotFound(_) => ApiError::bad_request("InvalidAMIID.NotFound", message),
            HypervisorError::AttachmentNotFound { .. } => {
                ApiError::bad_request("InvalidAttachment.NotFound", message)
            }
            HypervisorError::InvalidStateTransition { ref id, .. } if id.starts_with("vol-") => {
                ApiError::bad_request("IncorrectState", message)
            }
            HypervisorError::InvalidStateTransition { .. } => {
                ApiError::bad_request("IncorrectInstanceState", message)
            }
            HypervisorError::VolumeInUse(_) => ApiError::bad_request("VolumeInUse", message),
            HypervisorError::DomainNotFound(_)
            | HypervisorError::Provision(_)
            | HypervisorError::Backend(_)
            | HypervisorError::Database(_)
            | HypervisorError::Xml(_)
            | HypervisorError::Io(_)
            | HypervisorError::Join(_) => ApiError::Internal(message),
            // Code of the failure itself, message naming what already happened.
            HypervisorError::Partial { source, .. } => match ApiError::from(*source) {
                ApiError::BadRequest { code, .. } => ApiError::bad_request(code, message),
                ApiError::AuthFailure(_) => ApiError::AuthFailure(message),
                ApiError::Internal(_) => ApiError::Internal(message),
            },
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_follow_resource_kind() {
        let err: ApiError = HypervisorError::InvalidStateTransition {
            id: "vol-0abc".to_string(),
            state: "in-use".to_string(),
            action: "attach".to_string(),
        }
        .into();
        assert_eq!(err.code(), "IncorrectState");

        let err: ApiError = HypervisorError::InvalidStateTransition {
            id: "i-0abc".to_string(),
            state: "running".to_string(),
            action: "start".to_string(),
        }
        .into();
        assert_eq!(err.code(), "IncorrectInstanceState");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_partial_failure_keeps_code_and_lists_changes() {
        let err: ApiError = HypervisorError::Backend("connection reset".to_string())
            .after(vec!["i-1: running -> stopped".to_string()])
            .into();
        assert_eq!(err.code(), "InternalError");
        assert!(err.message().contains("i-1: running -> stopped"));

        let err: ApiError = HypervisorError::InvalidStateTransition {
            id: "i-2".to_string(),
            state: "terminated".to_string(),
            action: "stop".to_string(),
        }
        .after(vec!["i-1: running -> stopped".to_string()])
        .into();
        assert_eq!(err.code(), "IncorrectInstanceState");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.message().contains("already applied"));
    }

    #[test]
    fn test_missing_image() {
        let err: ApiError = HypervisorError::ImageNotFound("ghost.qcow2".to_string()).into();
        assert_eq!(err.code(), "InvalidAMIID.NotFound");
    }

    #[test]
    fn test_backend_faults_are_internal() {
        let err: ApiError = HypervisorError::Provision("no image".to_string()).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "InternalError");

        let err: ApiError = HypervisorError::InstanceNotFound("i-1".to_string()).into();
        assert_eq!(err.code(), "InvalidInstanceID.NotFound");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
