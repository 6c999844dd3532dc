// Authentication types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// OAuth grant types accepted by the identity token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantType {
    Password,
    SmsOtp,
    EmailCode,
    RefreshToken,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::Password => "password",
            GrantType::SmsOtp => "sms_otp",
            GrantType::EmailCode => "email_code",
            GrantType::RefreshToken => "refresh_token",
        }
    }
}

/// Credential pair held in the store
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Canonical result of every login flow
///
/// An empty `token` means the response carried no recognizable token field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoginResult {
    pub token: String,
    pub refresh_token: String,
    pub raw: Value,
}

impl LoginResult {
    pub fn has_token(&self) -> bool {
        !self.token.is_empty()
    }

    /// Credential pair to persist, `None` when no token came back
    pub fn credential(&self) -> Option<Credential> {
        if !self.has_token() {
            return None;
        }
        Some(Credential {
            access_token: self.token.clone(),
            refresh_token: Some(self.refresh_token.clone()).filter(|t| !t.is_empty()),
        })
    }
}

/// Image CAPTCHA issued by the identity service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptchaChallenge {
    pub token: String,
    /// Always a `data:` URI, or empty when the response had no image
    pub image_url: String,
    pub raw: Value,
}

/// Token data from a refresh-token grant
#[derive(Debug, Clone, PartialEq)]
pub struct TokenData {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Username/password login
#[derive(Debug, Clone)]
pub struct PasswordLogin {
    pub username: String,
    pub password: String,
}

/// One-time code plus the optional CAPTCHA answer that gates it
#[derive(Debug, Clone, Default)]
pub struct CodeLogin {
    pub code: String,
    pub captcha_token: Option<String>,
    pub captcha_code: Option<String>,
}

/// SMS one-time-code login
#[derive(Debug, Clone)]
pub struct SmsLogin {
    pub phone_number: String,
    pub code: CodeLogin,
}

/// Email code login
#[derive(Debug, Clone)]
pub struct EmailLogin {
    pub email: String,
    pub code: CodeLogin,
}

/// SMS verification code dispatch
#[derive(Debug, Clone)]
pub struct SmsCodeRequest {
    pub phone_number: String,
    pub purpose: u32,
}

impl SmsCodeRequest {
    /// Purpose code the identity service uses for login
    pub const LOGIN_PURPOSE: u32 = 2;

    pub fn login(phone_number: impl Into<String>) -> Self {
        Self {
            phone_number: phone_number.into(),
            purpose: Self::LOGIN_PURPOSE,
        }
    }
}

/// Email verification code dispatch
#[derive(Debug, Clone)]
pub struct EmailCodeRequest {
    pub email: String,
    pub message_type: String,
}

impl EmailCodeRequest {
    pub fn login(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            message_type: "Login".to_string(),
        }
    }
}

/// CAPTCHA verification request body
#[derive(Debug, Clone, Serialize)]
pub struct CaptchaVerification {
    pub token: String,
    pub code: String,
}

/// SMS code request body
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SmsCodePayload<'a> {
    pub phone_numbers: [&'a str; 1],
    pub purpose: u32,
    pub message: &'a str,
}

/// Email code request body
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EmailCodePayload<'a> {
    pub email: &'a str,
    pub message_type: &'a str,
}

/// OAuth error details from a failed token grant
#[derive(Deserialize, Default)]
pub(crate) struct OAuthErrorBody {
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_grant_type_wire_names() {
        assert_eq!(GrantType::Password.as_str(), "password");
        assert_eq!(GrantType::SmsOtp.as_str(), "sms_otp");
        assert_eq!(GrantType::EmailCode.as_str(), "email_code");
        assert_eq!(GrantType::RefreshToken.as_str(), "refresh_token");
    }

    #[test]
    fn test_sms_payload_shape() {
        let payload = SmsCodePayload {
            phone_numbers: ["13800000000"],
            purpose: SmsCodeRequest::LOGIN_PURPOSE,
            message: "",
        };
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({"phoneNumbers": ["13800000000"], "purpose": 2, "message": ""})
        );
    }

    #[test]
    fn test_email_payload_shape() {
        let request = EmailCodeRequest::login("a@b.c");
        let payload = EmailCodePayload {
            email: &request.email,
            message_type: &request.message_type,
        };
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({"email": "a@b.c", "messageType": "Login"})
        );
    }

    #[test]
    fn test_login_result_has_token() {
        let result = LoginResult {
            token: String::new(),
            refresh_token: String::new(),
            raw: json!({"unexpected": true}),
        };
        assert!(!result.has_token());
    }
}
