// Response shape normalization
//
// The identity service is inconsistent about field names, so every extractor is
// an ordered candidate list; the first present, non-empty field wins.

use serde_json::Value;

use super::types::{CaptchaChallenge, LoginResult, TokenData};

pub(crate) const ACCESS_TOKEN_FIELDS: &[&str] = &["access_token", "token", "jwt"];
pub(crate) const REFRESH_TOKEN_FIELDS: &[&str] = &["refresh_token"];
pub(crate) const CAPTCHA_TOKEN_FIELDS: &[&str] = &["token", "captcha_token", "id", "key"];
pub(crate) const CAPTCHA_IMAGE_FIELDS: &[&str] =
    &["image", "imageBase64", "image_base64", "base64", "data"];

const DATA_URI_PREFIX: &str = "data:";
const PNG_DATA_URI_HEADER: &str = "data:image/png;base64,";

/// First candidate field holding a usable value
///
/// Strings must be non-empty; numbers are rendered (CAPTCHA ids are sometimes
/// numeric). Anything else is skipped.
pub(crate) fn probe_field(body: &Value, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| match body.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Normalize a token-endpoint success body into a `LoginResult`
pub(crate) fn normalize_login(body: Value) -> LoginResult {
    if let Value::String(token) = body {
        return LoginResult {
            token: token.clone(),
            refresh_token: String::new(),
            raw: Value::String(token),
        };
    }

    let token = probe_field(&body, ACCESS_TOKEN_FIELDS).unwrap_or_default();
    let refresh_token = probe_field(&body, REFRESH_TOKEN_FIELDS).unwrap_or_default();

    if token.is_empty() {
        tracing::warn!("Token endpoint response has no recognizable access token field");
    }

    LoginResult {
        token,
        refresh_token,
        raw: body,
    }
}

/// Extract refresh-grant token data, `None` when no access token is present
pub(crate) fn normalize_refresh(body: &Value) -> Option<TokenData> {
    let (access_token, refresh_token) = match body {
        Value::String(token) => (token.clone(), None),
        _ => (
            probe_field(body, ACCESS_TOKEN_FIELDS).unwrap_or_default(),
            probe_field(body, REFRESH_TOKEN_FIELDS),
        ),
    };

    if access_token.is_empty() {
        return None;
    }

    Some(TokenData {
        access_token,
        refresh_token,
    })
}

/// Normalize a CAPTCHA issuance body
pub(crate) fn normalize_captcha(body: Value) -> CaptchaChallenge {
    let (token, image_url) = match &body {
        // Bare body is the image itself
        Value::String(image) => (String::new(), to_data_uri(image)),
        Value::Object(_) => (
            probe_field(&body, CAPTCHA_TOKEN_FIELDS).unwrap_or_default(),
            probe_field(&body, CAPTCHA_IMAGE_FIELDS)
                .map(|image| to_data_uri(&image))
                .unwrap_or_default(),
        ),
        _ => (String::new(), String::new()),
    };

    CaptchaChallenge {
        token,
        image_url,
        raw: body,
    }
}

/// Prefix bare base64 with a PNG data-URI header; data URIs pass through
pub fn to_data_uri(image: &str) -> String {
    if image.starts_with(DATA_URI_PREFIX) {
        image.to_string()
    } else {
        format!("{}{}", PNG_DATA_URI_HEADER, image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_login_bare_string() {
        let result = normalize_login(json!("eyJraWQ"));
        assert_eq!(result.token, "eyJraWQ");
        assert_eq!(result.refresh_token, "");
        assert_eq!(result.raw, json!("eyJraWQ"));
    }

    #[test]
    fn test_login_access_token_only() {
        let result = normalize_login(json!({"access_token": "T1"}));
        assert_eq!(result.token, "T1");
        assert_eq!(result.refresh_token, "");
    }

    #[test]
    fn test_login_field_priority() {
        let result = normalize_login(json!({"jwt": "J", "token": "K", "access_token": "A"}));
        assert_eq!(result.token, "A");

        let result = normalize_login(json!({"jwt": "J", "token": "K"}));
        assert_eq!(result.token, "K");

        let result = normalize_login(json!({"jwt": "J", "access_token": ""}));
        assert_eq!(result.token, "J");
    }

    #[test]
    fn test_login_missing_token_is_soft_failure() {
        let body = json!({"user": {"id": 7}});
        let result = normalize_login(body.clone());
        assert_eq!(result.token, "");
        assert!(!result.has_token());
        assert_eq!(result.raw, body);
    }

    #[test]
    fn test_login_with_refresh_token() {
        let result = normalize_login(json!({"access_token": "T1", "refresh_token": "R1"}));
        assert_eq!(result.token, "T1");
        assert_eq!(result.refresh_token, "R1");
    }

    #[test]
    fn test_refresh_requires_access_token() {
        assert_eq!(normalize_refresh(&json!({"refresh_token": "R2"})), None);
        assert_eq!(normalize_refresh(&json!("")), None);

        let data = normalize_refresh(&json!({"access_token": "T2"})).unwrap();
        assert_eq!(data.access_token, "T2");
        assert_eq!(data.refresh_token, None);

        let data = normalize_refresh(&json!({"token": "T3", "refresh_token": "R3"})).unwrap();
        assert_eq!(data.access_token, "T3");
        assert_eq!(data.refresh_token.as_deref(), Some("R3"));
    }

    #[test]
    fn test_captcha_data_uri() {
        assert_eq!(to_data_uri("abc123"), "data:image/png;base64,abc123");
        assert_eq!(
            to_data_uri("data:image/jpeg;base64,xyz"),
            "data:image/jpeg;base64,xyz"
        );
    }

    #[test]
    fn test_captcha_bare_string() {
        let captcha = normalize_captcha(json!("abc123"));
        assert_eq!(captcha.token, "");
        assert_eq!(captcha.image_url, "data:image/png;base64,abc123");
    }

    #[test]
    fn test_captcha_field_variants() {
        let captcha = normalize_captcha(json!({"captcha_token": "C1", "imageBase64": "QUJD"}));
        assert_eq!(captcha.token, "C1");
        assert_eq!(captcha.image_url, "data:image/png;base64,QUJD");

        let captcha = normalize_captcha(json!({"id": 42, "data": "data:image/gif;base64,R0"}));
        assert_eq!(captcha.token, "42");
        assert_eq!(captcha.image_url, "data:image/gif;base64,R0");

        let captcha = normalize_captcha(json!({"key": "K"}));
        assert_eq!(captcha.token, "K");
        assert_eq!(captcha.image_url, "");
    }

    #[test]
    fn test_captcha_non_object_body() {
        let captcha = normalize_captcha(Value::Null);
        assert_eq!(captcha.token, "");
        assert_eq!(captcha.image_url, "");
    }

    proptest! {
        #[test]
        fn prop_bare_string_is_token(body in ".*") {
            let result = normalize_login(Value::String(body.clone()));
            prop_assert_eq!(result.token, body);
            prop_assert_eq!(result.refresh_token, "");
        }

        #[test]
        fn prop_data_uri_is_idempotent(image in "[A-Za-z0-9+/=]{0,64}") {
            let once = to_data_uri(&image);
            prop_assert!(once.starts_with("data:"));
            prop_assert_eq!(to_data_uri(&once), once.clone());
        }
    }
}
