//! EC2 query-protocol XML documents.

use crate::error::ApiError;
use libvirt_aws_models::{ErrorDetail, ErrorList, ErrorResponse};
use quick_xml::escape::escape;
use serde::Serialize;

pub const CONTENT_TYPE: &str = "text/xml; charset=UTF-8";
pub const DEFAULT_VERSION: &str = "2016-11-15";

const DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
const BODY_ROOT: &str = "body";

/// API version to echo in the namespace; unknown shapes fall back to the
/// default so client input never lands unescaped in an attribute.
pub fn version(requested: Option<&str>) -> &str {
    match requested {
        Some(v) if !v.is_empty() && v.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') => v,
        _ => DEFAULT_VERSION,
    }
}

/// Child elements of a response, without a root.
pub fn body<T: Serialize>(value: &T) -> Result<String, ApiError> {
    let xml = quick_xml::se::to_string_with_root(BODY_ROOT, value)
        .map_err(|e| ApiError::Internal(format!("failed to encode response: {}", e)))?;

    let open = format!("<{}>", BODY_ROOT);
    let close = format!("</{}>", BODY_ROOT);
    Ok(xml
        .strip_prefix(&open)
        .and_then(|rest| rest.strip_suffix(&close))
        .unwrap_or_default()
        .to_string())
}

/// `<{Action}Response xmlns=...><requestId/>{body}</{Action}Response>`
pub fn response_document(action: &str, version: &str, request_id: &str, body: &str) -> String {
    format!(
        r#"{decl}<{action}Response xmlns="http://ec2.amazonaws.com/doc/{version}/"><requestId>{id}</requestId>{body}</{action}Response>"#,
        decl = DECLARATION,
        action = action,
        version = version,
        id = request_id,
        body = body,
    )
}

pub fn error_document(code: &str, message: &str, request_id: &str) -> String {
    let doc = ErrorResponse {
        errors: ErrorList {
            error: ErrorDetail {
                code: code.to_string(),
                message: message.to_string(),
            },
        },
        request_id: request_id.to_string(),
    };

    match quick_xml::se::to_string(&doc) {
        Ok(xml) => format!("{}{}", DECLARATION, xml),
        Err(e) => {
            tracing::warn!("Failed to encode error document: {}", e);
            format!(
                "{}<Response><Errors><Error><Code>{}</Code><Message>{}</Message></Error></Errors><RequestID>{}</RequestID></Response>",
                DECLARATION,
                escape(code),
                escape(message),
                escape(request_id)
            )
        }
    }
}
