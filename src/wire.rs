use serde::Deserialize;

/// Error body returned by the API: `{ "error": "<message>" }`.
#[derive(Debug, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub error: Option<String>,
}

/// Extracts the `error` message from a response body.
///
/// Returns `None` when the body is empty, not JSON, or has no string
/// `error` field.
pub fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error)
        .filter(|message| !message.trim().is_empty())
}
