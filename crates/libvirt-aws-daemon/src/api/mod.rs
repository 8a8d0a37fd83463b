mod action;
mod dispatch;

pub use action::Action;
pub use dispatch::dispatch;

use crate::{error::ApiError, state::DaemonState, xml};
use axum::{
    extract::{rejection::FormRejection, Form},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Extension,
};
use libvirt_aws_core::translator::Params;
use std::sync::Arc;
use tracing::Instrument;

/// Access key id from a SigV4 `Authorization` header or presigned
/// `X-Amz-Credential` parameter (`AKID/date/region/service/aws4_request`).
fn access_key<'a>(headers: &'a HeaderMap, params: &'a Params) -> Option<&'a str> {
    let scope = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split("Credential=").nth(1))
        .or_else(|| params.get("X-Amz-Credential"))?;
    scope.split('/').next().filter(|k| !k.is_empty())
}

/// `GET /` and `POST /`: the whole EC2 query API.
pub async fn handle(
    Extension(state): Extension<Arc<DaemonState>>,
    headers: HeaderMap,
    form: Result<Form<Vec<(String, String)>>, FormRejection>,
) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();

    let Form(pairs) = match form {
        Ok(form) => form,
        Err(rejection) => {
            return ApiError::bad_request("InvalidParameterValue", rejection.body_text())
                .render(&request_id)
        }
    };
    let params = Params::from_pairs(pairs);

    if !state.auth.allows(access_key(&headers, &params)) {
        return ApiError::AuthFailure("AWS was not able to validate the provided access credentials".to_string())
            .render(&request_id);
    }

    let action = match params.get("Action") {
        Some(name) => match name.parse::<Action>() {
            Ok(action) => action,
            Err(e) => return e.render(&request_id),
        },
        None => {
            return ApiError::bad_request("MissingAction", "The request must contain the parameter Action")
                .render(&request_id)
        }
    };
    let version = xml::version(params.get("Version")).to_string();

    let span = tracing::info_span!("request", action = %action, request_id = %request_id);
    async move {
        if action.is_read_only() {
            tracing::debug!("Handling {}", action);
        } else {
            tracing::info!("Handling {}", action);
        }

        match dispatch(&state.translator, action, &params).await {
            Ok(body) => {
                tracing::debug!("Response body: {}", body);
                let document = xml::response_document(action.name(), &version, &request_id, &body);
                ([(header::CONTENT_TYPE, xml::CONTENT_TYPE)], document).into_response()
            }
            Err(e) => e.render(&request_id),
        }
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_access_key_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static(
                "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240501/us-east-2/ec2/aws4_request, SignedHeaders=host, Signature=abc",
            ),
        );
        assert_eq!(access_key(&headers, &Params::new()), Some("AKIDEXAMPLE"));
    }

    #[test]
    fn test_access_key_from_query() {
        let params = Params::new().with("X-Amz-Credential", "AKIDQUERY/20240501/us-east-2/ec2/aws4_request");
        assert_eq!(access_key(&HeaderMap::new(), &params), Some("AKIDQUERY"));
        assert_eq!(access_key(&HeaderMap::new(), &Params::new()), None);
    }
}
