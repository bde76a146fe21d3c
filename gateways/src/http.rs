//! Shared request plumbing for the provider clients.

use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use studyhall_core::payment::GatewayError;

/// Send `request` and decode a JSON body, mapping transport and status failures.
pub(crate) async fn send_json(request: RequestBuilder) -> Result<Value, GatewayError> {
    let response = request.send().await.map_err(|e| transport_error(&e))?;

    match response.status() {
        status if status.is_success() => response
            .json::<Value>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(GatewayError::Unauthorized),
        status => {
            let body = response.text().await.unwrap_or_default();
            Err(GatewayError::Rejected {
                status: status.as_u16(),
                message: body,
            })
        }
    }
}

fn transport_error(error: &reqwest::Error) -> GatewayError {
    if error.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Network(error.to_string())
    }
}

/// String field lookup on a JSON object
pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}
