// Request gateway: authenticated API calls with refresh-and-retry on 401

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::auth::{AuthManager, CredentialStore};
use crate::config::Config;
use crate::error::{AuthError, Result};
use crate::http_client::{self, is_json_content_type, token_preview, DecodeMode};
use crate::navigation::{self, LoginNavigator};

/// Error fields probed, in order, on failed gateway calls
const GATEWAY_ERROR_FIELDS: &[&str] = &["message", "error"];

/// Retries allowed per logical request after a 401
const MAX_AUTH_RETRIES: u32 = 1;

/// Request body: text passes through, JSON gets serialized
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Text(String),
    Json(Value),
}

impl From<Value> for RequestBody {
    fn from(value: Value) -> Self {
        RequestBody::Json(value)
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        RequestBody::Text(text)
    }
}

impl From<&str> for RequestBody {
    fn from(text: &str) -> Self {
        RequestBody::Text(text.to_string())
    }
}

/// Whether the stored bearer token is attached automatically
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum CredentialsMode {
    /// Never attach the stored token
    Omit,
    #[default]
    SameOrigin,
    Include,
}

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
    pub cancel: Option<CancellationToken>,
    pub credentials: CredentialsMode,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn credentials(mut self, mode: CredentialsMode) -> Self {
        self.credentials = mode;
        self
    }
}

/// Single entry point for authenticated API calls
pub struct RequestGateway {
    client: Client,
    config: Arc<Config>,
    auth: Arc<AuthManager>,
    navigator: Arc<dyn LoginNavigator>,
}

impl RequestGateway {
    pub fn new(
        client: Client,
        config: Arc<Config>,
        auth: Arc<AuthManager>,
        navigator: Arc<dyn LoginNavigator>,
    ) -> Self {
        Self {
            client,
            config,
            auth,
            navigator,
        }
    }

    pub async fn get(&self, path: &str, options: RequestOptions) -> Result<Value> {
        self.request(path, options.method(Method::GET)).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        options: RequestOptions,
    ) -> Result<Value> {
        self.request(path, options.method(Method::POST).body(body))
            .await
    }

    pub async fn put(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        options: RequestOptions,
    ) -> Result<Value> {
        self.request(path, options.method(Method::PUT).body(body))
            .await
    }

    pub async fn patch(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        options: RequestOptions,
    ) -> Result<Value> {
        self.request(path, options.method(Method::PATCH).body(body))
            .await
    }

    pub async fn delete(&self, path: &str, options: RequestOptions) -> Result<Value> {
        self.request(path, options.method(Method::DELETE)).await
    }

    /// Execute a request, refreshing the token and retrying once on 401
    pub async fn request(&self, path: &str, options: RequestOptions) -> Result<Value> {
        let url = self.config.api_url(path);
        let request_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let span = tracing::info_span!(
            "gateway_request",
            request_id = %request_id,
            method = %options.method,
            url = %url
        );

        self.request_with_retry(&url, &options).instrument(span).await
    }

    async fn request_with_retry(&self, url: &str, options: &RequestOptions) -> Result<Value> {
        let cancel = options.cancel.as_ref();
        let body = serialize_body(options)?;
        let mut retries = 0;
        let mut refreshed_token: Option<String> = None;

        loop {
            let (headers, sent_token) = self.build_headers(options, refreshed_token.as_deref())?;

            tracing::debug!(attempt = retries + 1, "Sending gateway request");

            let mut builder = self
                .client
                .request(options.method.clone(), url)
                .headers(headers);
            if let Some(ref body) = body {
                builder = builder.body(body.clone());
            }

            let decoded = http_client::fetch(builder, cancel, DecodeMode::Strict).await?;

            if decoded.status.is_success() {
                tracing::debug!(status = %decoded.status, "Request successful");
                return Ok(decoded.body);
            }

            if decoded.status == StatusCode::UNAUTHORIZED && retries < MAX_AUTH_RETRIES {
                tracing::warn!("Received 401, refreshing token and retrying...");

                match self
                    .auth
                    .refresh_after_rejection(sent_token.as_deref(), cancel)
                    .await
                {
                    Ok(token) => {
                        refreshed_token = Some(token);
                        retries += 1;
                        continue;
                    }
                    Err(AuthError::Cancelled) => return Err(AuthError::Cancelled),
                    // Credentials were already cleared by the manager
                    Err(e) => {
                        tracing::warn!(error = %e, "Session could not be renewed");
                        navigation::redirect_to_login(
                            self.navigator.as_ref(),
                            &self.config.login_path,
                        );
                    }
                }
            }

            tracing::error!(
                status = decoded.status.as_u16(),
                attempt = retries + 1,
                "Gateway request failed with error response"
            );
            return Err(http_client::request_failed(
                decoded,
                GATEWAY_ERROR_FIELDS,
                "Request failed",
            ));
        }
    }

    /// Headers for one attempt, plus the stored token that was attached
    ///
    /// After a refresh, `refreshed_token` overrides any caller Authorization.
    fn build_headers(
        &self,
        options: &RequestOptions,
        refreshed_token: Option<&str>,
    ) -> Result<(HeaderMap, Option<String>)> {
        let mut headers = options.headers.clone();

        if !headers.contains_key(ACCEPT) {
            headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        }
        if matches!(options.body, Some(RequestBody::Json(_))) && !headers.contains_key(CONTENT_TYPE)
        {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        let mut sent_token = None;
        match refreshed_token {
            Some(token) => {
                headers.insert(AUTHORIZATION, bearer(token)?);
                sent_token = Some(token.to_string());
            }
            None if options.credentials != CredentialsMode::Omit
                && !headers.contains_key(AUTHORIZATION) =>
            {
                if let Some(token) = self.auth.access_token() {
                    tracing::trace!(token = %token_preview(&token), "Attaching stored bearer token");
                    headers.insert(AUTHORIZATION, bearer(&token)?);
                    sent_token = Some(token);
                }
            }
            None => {}
        }

        Ok((headers, sent_token))
    }

    pub fn store(&self) -> &dyn CredentialStore {
        self.auth.store()
    }
}

fn bearer(token: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| AuthError::InvalidHeader(e.to_string()))
}

/// Encode the body once; every attempt sends the same bytes
fn serialize_body(options: &RequestOptions) -> Result<Option<String>> {
    let body = match &options.body {
        None => None,
        Some(RequestBody::Text(text)) => Some(text.clone()),
        Some(RequestBody::Json(value)) => {
            let json_declared = options
                .headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(is_json_content_type)
                .unwrap_or(true);
            match value {
                Value::String(text) if !json_declared => Some(text.clone()),
                _ => Some(serde_json::to_string(value)?),
            }
        }
    };
    Ok(body)
}
