// Shared HTTP plumbing for the identity client and the request gateway

use anyhow::Context;
use reqwest::{header::CONTENT_TYPE, Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{AuthError, Result};

/// How a response body that claims to be JSON is treated when it fails to parse
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum DecodeMode {
    /// Parse errors propagate as `AuthError::Decode`
    Strict,
    /// Unparseable JSON becomes an empty object
    Lenient,
}

/// Status and decoded body of a completed exchange
#[derive(Debug)]
pub(crate) struct Decoded {
    pub status: StatusCode,
    pub body: Value,
}

/// Create the shared HTTP client with configured timeouts
pub fn build_client(config: &Config) -> anyhow::Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(config.http_connect_timeout))
        .timeout(Duration::from_secs(config.http_request_timeout))
        .build()
        .context("Failed to create HTTP client")
}

/// Send a request and decode its body, aborting early when `cancel` fires
pub(crate) async fn fetch(
    builder: RequestBuilder,
    cancel: Option<&CancellationToken>,
    mode: DecodeMode,
) -> Result<Decoded> {
    let exchange = async {
        let response = builder.send().await?;
        decode_response(response, mode).await
    };

    match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(AuthError::Cancelled),
                result = exchange => result,
            }
        }
        None => exchange.await,
    }
}

/// Decode a response by sniffing its Content-Type
///
/// JSON content types are parsed; everything else becomes a JSON string value
/// holding the raw text. An empty JSON body decodes to `null`.
pub(crate) async fn decode_response(response: Response, mode: DecodeMode) -> Result<Decoded> {
    let status = response.status();
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(is_json_content_type)
        .unwrap_or(false);

    let text = response.text().await?;
    let body = decode_text(&text, is_json, mode)?;

    tracing::trace!(status = %status, is_json = is_json, "Decoded response body");

    Ok(Decoded { status, body })
}

fn decode_text(text: &str, is_json: bool, mode: DecodeMode) -> Result<Value> {
    if !is_json {
        return Ok(Value::String(text.to_string()));
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    match serde_json::from_str(text) {
        Ok(value) => Ok(value),
        Err(e) if mode == DecodeMode::Lenient => {
            tracing::debug!(error = %e, "Ignoring malformed JSON body");
            Ok(Value::Object(Default::default()))
        }
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn is_json_content_type(content_type: &str) -> bool {
    let lower = content_type.to_ascii_lowercase();
    lower.contains("application/json") || lower.contains("text/json")
}

/// Pick a human-readable message out of an error body
///
/// A string body is the message itself. Otherwise the first non-empty string
/// among `fields` wins, then `fallback`.
pub(crate) fn error_message(body: &Value, fields: &[&str], fallback: &str) -> String {
    if let Value::String(text) = body {
        if !text.trim().is_empty() {
            return text.clone();
        }
        return fallback.to_string();
    }
    fields
        .iter()
        .find_map(|field| {
            body.get(field)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| fallback.to_string())
}

/// Build a `RequestFailed` error for a non-2xx exchange
pub(crate) fn request_failed(decoded: Decoded, fields: &[&str], fallback: &str) -> AuthError {
    let message = error_message(&decoded.body, fields, fallback);
    AuthError::RequestFailed {
        message,
        status: decoded.status.as_u16(),
        body: decoded.body,
    }
}

/// First few characters of a token, for logs
pub(crate) fn token_preview(token: &str) -> &str {
    let end = token
        .char_indices()
        .nth(8)
        .map(|(idx, _)| idx)
        .unwrap_or(token.len());
    &token[..end]
}
