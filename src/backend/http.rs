//! Shared plumbing for the HTTP adapters.
use crate::error::BotError;
use crate::logutil::truncate_for_log;
use log::debug;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tokio::time::timeout;

/// Client with default headers; per-request timeouts are applied by [`send_json`].
pub fn build_client(headers: &[(String, String)]) -> Result<reqwest::Client, BotError> {
    let mut map = HeaderMap::new();
    for (k, v) in headers {
        let name = HeaderName::from_bytes(k.as_bytes())
            .map_err(|e| BotError::config(format!("invalid header name '{}': {}", k, e)))?;
        let value = HeaderValue::from_str(v)
            .map_err(|e| BotError::config(format!("invalid value for header '{}': {}", k, e)))?;
        map.insert(name, value);
    }
    reqwest::Client::builder()
        .default_headers(map)
        .build()
        .map_err(|e| BotError::config(format!("failed to build HTTP client: {}", e)))
}

/// Send a request and decode a JSON body, mapping every failure into the taxonomy.
pub async fn send_json(
    request: reqwest::RequestBuilder,
    limit: Duration,
) -> Result<Value, BotError> {
    let response = timeout(limit, request.send())
        .await
        .map_err(|_| BotError::connection(format!("request timed out after {}s", limit.as_secs())))??;
    let status = response.status();
    let body = timeout(limit, response.text())
        .await
        .map_err(|_| BotError::connection(format!("response timed out after {}s", limit.as_secs())))??;
    if !status.is_success() {
        return Err(status_error(status, &body));
    }
    serde_json::from_str(&body).map_err(|e| {
        debug!("Unparseable body: {}", truncate_for_log(&body, 200));
        BotError::chat(format!("malformed response: {}", e))
    })
}

/// Turn a non-2xx status into a chat error with a short excerpt of the body.
pub fn status_error(status: StatusCode, body: &str) -> BotError {
    let excerpt = truncate_for_log(body.trim(), 160);
    match status {
        StatusCode::TOO_MANY_REQUESTS => BotError::chat(format!("rate limited (429): {}", excerpt)),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            BotError::chat(format!("authentication failed ({}): {}", status.as_u16(), excerpt))
        }
        s if s.is_server_error() => {
            BotError::chat(format!("provider error ({}): {}", s.as_u16(), excerpt))
        }
        s => BotError::chat(format!("HTTP {}: {}", s.as_u16(), excerpt)),
    }
}

/// String at a JSON pointer, e.g. `/choices/0/message/content`.
pub fn text_at<'a>(v: &'a Value, pointer: &str) -> Option<&'a str> {
    v.pointer(pointer).and_then(|x| x.as_str())
}

/// Error message embedded in a provider body (`{"error": "..."}` or `{"error": {"message": "..."}}`).
pub fn embedded_error(v: &Value) -> Option<String> {
    match v.get("error")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(o) => o
            .get("message")
            .and_then(|m| m.as_str())
            .map(|s| s.to_string()),
        _ => None,
    }
}
