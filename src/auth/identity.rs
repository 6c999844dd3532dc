// Identity service client: credential acquisition flows

use reqwest::{header::AUTHORIZATION, Client};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::credentials::{CredentialStore, AUTH_TOKEN_KEY};
use super::normalize;
use super::types::{
    CaptchaChallenge, CaptchaVerification, CodeLogin, EmailCodePayload, EmailCodeRequest,
    EmailLogin, GrantType, LoginResult, OAuthErrorBody, PasswordLogin, SmsCodePayload,
    SmsCodeRequest, SmsLogin, TokenData,
};
use crate::config::Config;
use crate::error::{AuthError, Result};
use crate::http_client::{self, DecodeMode};

/// Error fields probed, in order, on failed identity calls
const IDENTITY_ERROR_FIELDS: &[&str] = &["errorMessage", "message", "error"];

/// CAPTCHA issuance never reports through `error`
const CAPTCHA_ERROR_FIELDS: &[&str] = &["errorMessage", "message"];

/// Refresh failures put the OAuth `error` code first
const REFRESH_ERROR_FIELDS: &[&str] = &["error", "message"];

const TOKEN_PATH: &str = "/auth/token";
const CAPTCHA_CREATE_PATH: &str = "/captcha/create";
const CAPTCHA_VERIFY_PATH: &str = "/captcha/verify";
const LOGOUT_PATH: &str = "/auth/logout";
const REVOKE_PATH: &str = "/auth/revoke";
const SMS_CODE_PATH: &str = "/auth/smsVerificationCode";
const EMAIL_CODE_PATH: &str = "/auth/emails";

/// Client for the identity service
///
/// Every operation is stateless; the store is only read to attach the current
/// bearer token to logout and revoke calls.
pub struct IdentityClient {
    client: Client,
    config: Arc<Config>,
    store: Arc<dyn CredentialStore>,
}

impl IdentityClient {
    pub fn new(client: Client, config: Arc<Config>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            client,
            config,
            store,
        }
    }

    /// Username/password grant
    pub async fn login_with_password(
        &self,
        login: &PasswordLogin,
        cancel: Option<&CancellationToken>,
    ) -> Result<LoginResult> {
        tracing::info!(username = %login.username, "Logging in with password");

        let form = [
            ("username", login.username.as_str()),
            ("password", login.password.as_str()),
        ];
        self.token_grant(GrantType::Password, &form, cancel).await
    }

    /// SMS one-time-code grant
    pub async fn login_with_sms_code(
        &self,
        login: &SmsLogin,
        cancel: Option<&CancellationToken>,
    ) -> Result<LoginResult> {
        tracing::info!("Logging in with SMS code");

        let mut form = vec![
            ("phone_number", login.phone_number.as_str()),
            ("code", login.code.code.as_str()),
        ];
        push_captcha_fields(&mut form, &login.code);
        self.token_grant(GrantType::SmsOtp, &form, cancel).await
    }

    /// Email code grant
    pub async fn login_with_email_code(
        &self,
        login: &EmailLogin,
        cancel: Option<&CancellationToken>,
    ) -> Result<LoginResult> {
        tracing::info!(email = %login.email, "Logging in with email code");

        let mut form = vec![
            ("email", login.email.as_str()),
            ("code", login.code.code.as_str()),
        ];
        push_captcha_fields(&mut form, &login.code);
        self.token_grant(GrantType::EmailCode, &form, cancel).await
    }

    /// Exchange a refresh token for a new access token
    ///
    /// A 2xx response without an access token is `MissingAccessToken`.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<TokenData> {
        tracing::info!("Refreshing access token via identity service...");

        let url = self.config.identity_url(TOKEN_PATH);
        let form = [
            ("grant_type", GrantType::RefreshToken.as_str()),
            ("refresh_token", refresh_token),
            ("scope", self.config.scope.as_str()),
        ];

        let decoded = http_client::fetch(
            self.client.post(&url).form(&form),
            cancel,
            DecodeMode::Strict,
        )
        .await?;

        if !decoded.status.is_success() {
            tracing::error!(status = %decoded.status, "Token refresh failed");

            // Try to parse OAuth error for more details
            if let Ok(details) = serde_json::from_value::<OAuthErrorBody>(decoded.body.clone()) {
                if let (Some(error), Some(description)) = (details.error, details.error_description)
                {
                    tracing::error!(
                        "Token refresh error details: error={}, description={}",
                        error,
                        description
                    );
                }
            }

            return Err(http_client::request_failed(
                decoded,
                REFRESH_ERROR_FIELDS,
                "Token refresh failed",
            ));
        }

        let data = normalize::normalize_refresh(&decoded.body).ok_or_else(|| {
            tracing::error!("Refresh response does not contain an access token");
            AuthError::MissingAccessToken
        })?;

        tracing::info!(
            rotated_refresh_token = data.refresh_token.is_some(),
            "Access token refreshed"
        );

        Ok(data)
    }

    /// Issue an image CAPTCHA
    pub async fn create_captcha(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<CaptchaChallenge> {
        let url = self.config.identity_url(CAPTCHA_CREATE_PATH);
        let decoded =
            http_client::fetch(self.client.get(&url), cancel, DecodeMode::Lenient).await?;

        if !decoded.status.is_success() {
            return Err(http_client::request_failed(
                decoded,
                CAPTCHA_ERROR_FIELDS,
                "Failed to create captcha",
            ));
        }

        let captcha = normalize::normalize_captcha(decoded.body);
        tracing::debug!(has_token = !captcha.token.is_empty(), "Captcha issued");
        Ok(captcha)
    }

    /// Check a user-entered CAPTCHA answer
    pub async fn verify_captcha(
        &self,
        verification: &CaptchaVerification,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let url = self.config.identity_url(CAPTCHA_VERIFY_PATH);
        self.post_json(&url, verification, "Captcha verification failed", cancel)
            .await
    }

    /// Send an SMS verification code
    pub async fn send_sms_verification_code(
        &self,
        request: &SmsCodeRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        tracing::info!(purpose = request.purpose, "Requesting SMS verification code");

        let url = self.config.identity_url(SMS_CODE_PATH);
        let payload = SmsCodePayload {
            phone_numbers: [request.phone_number.as_str()],
            purpose: request.purpose,
            message: "",
        };
        self.post_json(&url, &payload, "Failed to send SMS verification code", cancel)
            .await
    }

    /// Send an email verification code
    pub async fn send_email_verification_code(
        &self,
        request: &EmailCodeRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        tracing::info!(email = %request.email, "Requesting email verification code");

        let url = self.config.identity_url(EMAIL_CODE_PATH);
        let payload = EmailCodePayload {
            email: &request.email,
            message_type: &request.message_type,
        };
        self.post_json(&url, &payload, "Failed to send email verification code", cancel)
            .await
    }

    /// End the server-side session (fire-and-forget)
    pub async fn server_logout(&self, cancel: Option<&CancellationToken>) -> Result<()> {
        self.fire_and_forget(LOGOUT_PATH, cancel).await
    }

    /// Revoke the current token server-side (fire-and-forget)
    pub async fn revoke_token(&self, cancel: Option<&CancellationToken>) -> Result<()> {
        self.fire_and_forget(REVOKE_PATH, cancel).await
    }

    async fn token_grant(
        &self,
        grant: GrantType,
        fields: &[(&str, &str)],
        cancel: Option<&CancellationToken>,
    ) -> Result<LoginResult> {
        let url = self.config.identity_url(TOKEN_PATH);
        let mut form = vec![("grant_type", grant.as_str())];
        form.extend(fields.iter().copied());
        form.push(("scope", self.config.scope.as_str()));

        let decoded = http_client::fetch(
            self.client.post(&url).form(&form),
            cancel,
            DecodeMode::Strict,
        )
        .await?;

        if !decoded.status.is_success() {
            tracing::warn!(
                grant_type = grant.as_str(),
                status = %decoded.status,
                "Token grant rejected"
            );
            return Err(http_client::request_failed(
                decoded,
                IDENTITY_ERROR_FIELDS,
                "Login failed",
            ));
        }

        let result = normalize::normalize_login(decoded.body);
        tracing::info!(
            grant_type = grant.as_str(),
            has_token = result.has_token(),
            has_refresh_token = !result.refresh_token.is_empty(),
            "Token grant completed"
        );
        Ok(result)
    }

    async fn post_json<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        payload: &T,
        fallback: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let decoded = http_client::fetch(
            self.client.post(url).json(payload),
            cancel,
            DecodeMode::Lenient,
        )
        .await?;

        if !decoded.status.is_success() {
            return Err(http_client::request_failed(
                decoded,
                IDENTITY_ERROR_FIELDS,
                fallback,
            ));
        }
        Ok(())
    }

    async fn fire_and_forget(&self, path: &str, cancel: Option<&CancellationToken>) -> Result<()> {
        let url = self.config.identity_url(path);
        let mut builder = self.client.post(&url);
        if let Some(token) = self.store.get(AUTH_TOKEN_KEY).filter(|t| !t.is_empty()) {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let decoded = http_client::fetch(builder, cancel, DecodeMode::Lenient).await?;
        if !decoded.status.is_success() {
            tracing::warn!(
                path = path,
                status = %decoded.status,
                body = %body_summary(&decoded.body),
                "Identity service rejected session call, ignoring"
            );
        } else {
            tracing::debug!(path = path, "Identity session call acknowledged");
        }
        Ok(())
    }
}

/// Append whichever CAPTCHA answer fields are set
fn push_captcha_fields<'a>(form: &mut Vec<(&'a str, &'a str)>, code: &'a CodeLogin) {
    if let Some(token) = code.captcha_token.as_deref().filter(|t| !t.is_empty()) {
        form.push(("captcha_token", token));
    }
    if let Some(answer) = code.captcha_code.as_deref().filter(|c| !c.is_empty()) {
        form.push(("captcha_code", answer));
    }
}

fn body_summary(body: &Value) -> String {
    match body {
        Value::String(text) => text.chars().take(200).collect(),
        other => other.to_string(),
    }
}
