use std::time::Duration;

use reqwest::header::{self, HeaderMap};
use reqwest::{Method, StatusCode};
use serde_json::Value as JsonValue;

use crate::auth::{normalize_bearer_authorization, TokenStore};
use crate::signal::{SignalBus, UNAUTHORIZED_TOPIC};
use crate::{wire, ApiError, Result};

/// Successful outcome of one call.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Reply {
    pub(crate) status: u16,
    /// Parsed JSON body; `Null` for 204 and empty bodies.
    pub(crate) body: JsonValue,
}

/// Everything needed to repeat an attempt of one logical call.
#[derive(Clone, Debug)]
pub(crate) struct PreparedCall {
    pub(crate) http: reqwest::Client,
    pub(crate) method: Method,
    pub(crate) url: String,
    /// Caller headers; override the defaults on name collision.
    pub(crate) headers: HeaderMap,
    pub(crate) body: Option<JsonValue>,
    pub(crate) timeout: Duration,
}

/// Performs a single authenticated attempt.
///
/// A 401 clears the stored token and publishes [`UNAUTHORIZED_TOPIC`]
/// before the error is returned.
pub(crate) async fn execute(
    tokens: &dyn TokenStore,
    signals: &dyn SignalBus,
    call: &PreparedCall,
) -> Result<Reply> {
    let mut request = call
        .http
        .request(call.method.clone(), &call.url)
        .timeout(call.timeout)
        .header(header::CONTENT_TYPE, "application/json");

    if let Some(token) = tokens.token().await {
        request = request.header(
            header::AUTHORIZATION,
            normalize_bearer_authorization(&token),
        );
    }
    if let Some(body) = &call.body {
        request = request.json(body);
    }
    request = request.headers(call.headers.clone());

    #[cfg(feature = "tracing")]
    tracing::debug!(method = %call.method, url = %call.url, "sending request");

    let response = request.send().await.map_err(ApiError::network)?;
    let status = response.status();

    if status == StatusCode::NO_CONTENT {
        return Ok(Reply {
            status: status.as_u16(),
            body: JsonValue::Null,
        });
    }

    if !status.is_success() {
        // The status decides the outcome; an unreadable body only loses the message.
        let text = response.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED {
            #[cfg(feature = "tracing")]
            tracing::warn!(url = %call.url, "session rejected, clearing token");

            tokens.clear_token().await;
            signals.publish(UNAUTHORIZED_TOPIC);
        }
        return Err(http_error(status.as_u16(), &text));
    }

    let text = response.text().await.map_err(ApiError::network)?;
    Ok(Reply {
        status: status.as_u16(),
        body: decode_body(&text)?,
    })
}

fn http_error(status: u16, body: &str) -> ApiError {
    let message = wire::error_message(body).unwrap_or_else(|| format!("HTTP {status}"));
    ApiError::Http {
        status,
        message,
        body: serde_json::from_str(body).ok(),
    }
}

fn decode_body(body: &str) -> Result<JsonValue> {
    if body.trim().is_empty() {
        return Ok(JsonValue::Null);
    }
    serde_json::from_str(body).map_err(|err| {
        let preview = body.get(..body.len().min(200)).unwrap_or_default();
        ApiError::Decode(format!(
            "invalid response JSON: {err}; body: {preview:?}"
        ))
    })
}
