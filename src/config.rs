use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use crate::commands::Command;

/// Fallback identity path used when no identity base URL is configured
pub const DEFAULT_IDENTITY_PATH: &str = "/identity/api";

/// Scope requested by every token grant
pub const DEFAULT_SCOPE: &str = "api offline_access";

/// Auth Gateway - bearer credential client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Identity service base URL (endpoints live under `{base}/api`)
    #[arg(short = 'i', long, env = "IDENTITY_BASE_URL")]
    pub identity_base_url: Option<String>,

    /// Generic API base URL
    #[arg(short = 'a', long, env = "API_BASE_URL")]
    pub api_base_url: Option<String>,

    /// Origin used to resolve relative paths when a base URL is not configured
    #[arg(long, env = "APP_ORIGIN", default_value = "http://localhost")]
    pub app_origin: String,

    /// Current application location, used as the login redirect target
    #[arg(long, env = "APP_LOCATION", default_value = "/")]
    pub app_location: String,

    /// Login view path
    #[arg(long, env = "LOGIN_PATH", default_value = "/login")]
    pub login_path: String,

    /// OAuth scope sent with token grants
    #[arg(long, env = "AUTH_SCOPE", default_value = DEFAULT_SCOPE)]
    pub scope: String,

    /// Path to the SQLite credential database
    #[arg(short = 'd', long, env = "CREDENTIAL_DB_FILE")]
    pub db_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "10")]
    pub http_connect_timeout: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Service endpoints
    pub identity_base_url: Option<String>,
    pub api_base_url: Option<String>,
    pub app_origin: String,

    // Redirect contract
    pub app_location: String,
    pub login_path: String,

    // Token grants
    pub scope: String,

    // Credential storage
    pub credential_db_file: PathBuf,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            identity_base_url: None,
            api_base_url: None,
            app_origin: "http://localhost".to_string(),
            app_location: "/".to_string(),
            login_path: "/login".to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            credential_db_file: default_db_path(),
            http_connect_timeout: 10,
            http_request_timeout: 30,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Build configuration from parsed CLI arguments (CLI > ENV > defaults)
    pub fn from_args(args: &CliArgs) -> Self {
        Config {
            identity_base_url: non_empty(args.identity_base_url.clone()),
            api_base_url: non_empty(args.api_base_url.clone()),
            app_origin: args.app_origin.clone(),
            app_location: args.app_location.clone(),
            login_path: args.login_path.clone(),
            scope: args.scope.clone(),
            credential_db_file: args
                .db_file
                .as_deref()
                .map(expand_tilde)
                .unwrap_or_else(default_db_path),
            http_connect_timeout: args.http_connect_timeout,
            http_request_timeout: args.http_timeout,
            log_level: args.log_level.clone(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("IDENTITY_BASE_URL", self.identity_base_url.as_deref()),
            ("API_BASE_URL", self.api_base_url.as_deref()),
            ("APP_ORIGIN", Some(self.app_origin.as_str())),
        ] {
            if let Some(url) = value {
                reqwest::Url::parse(url)
                    .with_context(|| format!("{} is not a valid absolute URL: {}", name, url))?;
            }
        }

        if !self.login_path.starts_with('/') {
            anyhow::bail!("LOGIN_PATH must start with '/': {}", self.login_path);
        }

        Ok(())
    }

    /// Identity endpoint URL for a path such as `/auth/token`
    ///
    /// A configured base gets the `/api` segment appended; without one the
    /// fixed `/identity/api` path is resolved against the app origin.
    pub fn identity_url(&self, path: &str) -> String {
        match self.identity_base_url.as_deref().map(trim_trailing_slashes) {
            Some(base) if !base.is_empty() => format!("{}/api{}", base, path),
            _ => format!(
                "{}{}{}",
                trim_trailing_slashes(&self.app_origin),
                DEFAULT_IDENTITY_PATH,
                path
            ),
        }
    }

    /// Resolve a gateway path to an absolute URL
    pub fn api_url(&self, path: &str) -> String {
        if is_absolute_url(path) {
            return path.to_string();
        }
        let base = match self.api_base_url.as_deref().map(trim_trailing_slashes) {
            Some(base) if !base.is_empty() => base,
            _ => trim_trailing_slashes(&self.app_origin),
        };
        join_url(base, path)
    }
}

/// True for `http://` and `https://` URLs, case-insensitive
pub fn is_absolute_url(path: &str) -> bool {
    use once_cell::sync::Lazy;
    use regex::Regex;

    static ABSOLUTE_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^https?://").unwrap());
    ABSOLUTE_URL.is_match(path)
}

fn join_url(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

fn trim_trailing_slashes(s: &str) -> &str {
    s.trim_end_matches('/')
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Default credential database location
fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("auth-gateway").join("credentials.sqlite3"))
        .unwrap_or_else(|| PathBuf::from("credentials.sqlite3"))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde("~/test/file.txt");
        assert!(path.to_string_lossy().contains("test/file.txt"));
        assert!(!path.to_string_lossy().starts_with("~"));

        let path = expand_tilde("/absolute/path");
        assert_eq!(path, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_tilde_just_tilde() {
        // Just "~" without slash should not expand
        let path = expand_tilde("~");
        assert_eq!(path, PathBuf::from("~"));
    }

    #[test]
    fn test_identity_url_with_base() {
        let config = Config {
            identity_base_url: Some("https://id.example.com//".to_string()),
            ..Config::default()
        };
        assert_eq!(
            config.identity_url("/auth/token"),
            "https://id.example.com/api/auth/token"
        );
    }

    #[test]
    fn test_identity_url_fallback() {
        let config = Config {
            app_origin: "https://app.example.com/".to_string(),
            ..Config::default()
        };
        assert_eq!(
            config.identity_url("/captcha/create"),
            "https://app.example.com/identity/api/captcha/create"
        );
    }

    #[test]
    fn test_api_url_absolute_passthrough() {
        let config = Config {
            api_base_url: Some("https://api.example.com".to_string()),
            ..Config::default()
        };
        assert_eq!(
            config.api_url("https://other.example.com/x"),
            "https://other.example.com/x"
        );
        assert_eq!(config.api_url("HTTP://upper.example.com"), "HTTP://upper.example.com");
    }

    #[test]
    fn test_api_url_single_separator() {
        let config = Config {
            api_base_url: Some("https://api.example.com///".to_string()),
            ..Config::default()
        };
        assert_eq!(config.api_url("/orders"), "https://api.example.com/orders");
        assert_eq!(config.api_url("orders"), "https://api.example.com/orders");
    }

    #[test]
    fn test_api_url_without_base_uses_origin() {
        let config = Config::default();
        assert_eq!(config.api_url("/orders?page=2"), "http://localhost/orders?page=2");
    }

    #[test]
    fn test_blank_base_url_is_ignored() {
        assert_eq!(non_empty(Some("   ".to_string())), None);
        assert_eq!(non_empty(Some("x".to_string())), Some("x".to_string()));
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());

        let config = Config {
            api_base_url: Some("not a url".to_string()),
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            login_path: "login".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
