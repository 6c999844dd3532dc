// Login redirect contract

use std::sync::Mutex;

/// Where the app is and how it moves to the login view
pub trait LoginNavigator: Send + Sync {
    /// Current path plus query string
    fn current_location(&self) -> String;

    /// Move to `url`; failures are logged by the caller, never escalated
    fn navigate(&self, url: &str) -> anyhow::Result<()>;
}

/// `{login_path}?redirect=<encoded location>`
pub fn login_redirect_url(login_path: &str, current_location: &str) -> String {
    format!(
        "{}?redirect={}",
        login_path,
        urlencoding::encode(current_location)
    )
}

/// Send the user to the login view, best-effort
pub fn redirect_to_login(navigator: &dyn LoginNavigator, login_path: &str) {
    let target = login_redirect_url(login_path, &navigator.current_location());
    if let Err(e) = navigator.navigate(&target) {
        tracing::warn!(target = %target, error = %e, "Login redirect failed");
    }
}

/// Navigator for headless use: records the redirect in the log
pub struct TracingNavigator {
    location: String,
}

impl TracingNavigator {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }
}

impl LoginNavigator for TracingNavigator {
    fn current_location(&self) -> String {
        self.location.clone()
    }

    fn navigate(&self, url: &str) -> anyhow::Result<()> {
        tracing::warn!(target = %url, "Session expired, sign in again");
        Ok(())
    }
}

/// Navigator that keeps every redirect in memory
#[derive(Default)]
pub struct MemoryNavigator {
    location: String,
    redirects: Mutex<Vec<String>>,
}

impl MemoryNavigator {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            redirects: Mutex::new(Vec::new()),
        }
    }

    pub fn redirects(&self) -> Vec<String> {
        self.redirects
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn last_redirect(&self) -> Option<String> {
        self.redirects().pop()
    }
}

impl LoginNavigator for MemoryNavigator {
    fn current_location(&self) -> String {
        self.location.clone()
    }

    fn navigate(&self, url: &str) -> anyhow::Result<()> {
        self.redirects
            .lock()
            .map_err(|e| anyhow::anyhow!("navigator lock poisoned: {}", e))?
            .push(url.to_string());
        Ok(())
    }
}
