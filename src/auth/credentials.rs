// Credential storage: the two well-known token slots

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::types::Credential;

pub const AUTH_TOKEN_KEY: &str = "auth_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Key/value persistence for credentials
///
/// Implementations swallow storage failures: a broken backend reads as empty
/// and writes become no-ops.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

impl Credential {
    /// Load the stored pair, `None` without an access token
    pub fn load(store: &dyn CredentialStore) -> Option<Self> {
        let access_token = store.get(AUTH_TOKEN_KEY).filter(|t| !t.is_empty())?;
        let refresh_token = store.get(REFRESH_TOKEN_KEY).filter(|t| !t.is_empty());
        Some(Self {
            access_token,
            refresh_token,
        })
    }

    /// Write both slots; an absent refresh token leaves the old one in place
    pub fn save(&self, store: &dyn CredentialStore) {
        store.set(AUTH_TOKEN_KEY, &self.access_token);
        if let Some(ref refresh_token) = self.refresh_token {
            store.set(REFRESH_TOKEN_KEY, refresh_token);
        }
    }
}

/// Remove both token slots
pub fn clear_credentials(store: &dyn CredentialStore) {
    store.remove(AUTH_TOKEN_KEY);
    store.remove(REFRESH_TOKEN_KEY);
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: DashMap<String, String>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a credential pair
    pub fn with_tokens(access_token: &str, refresh_token: Option<&str>) -> Self {
        let store = Self::new();
        store.set(AUTH_TOKEN_KEY, access_token);
        if let Some(refresh_token) = refresh_token {
            store.set(REFRESH_TOKEN_KEY, refresh_token);
        }
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries.remove(key);
    }
}

/// Durable store backed by an `auth_kv` table in SQLite
pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteCredentialStore {
    /// Open (or create) the credential database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create credential directory: {}", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Non-persistent database, mostly for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create auth_kv table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// When the slot was last written
    pub fn updated_at(&self, key: &str) -> Option<DateTime<Utc>> {
        let raw: String = self.with_conn(|conn| {
            conn.query_row(
                "SELECT updated_at FROM auth_kv WHERE key = ?",
                [key],
                |row| row.get::<_, String>(0),
            )
            .optional()
        })??;

        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }

    /// Run a query, logging and discarding any failure
    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Option<T> {
        let conn = match self.conn.lock() {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("Credential store lock poisoned: {}", e);
                return None;
            }
        };

        match f(&conn) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "Credential store operation failed");
                None
            }
        }
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn get(&self, key: &str) -> Option<String> {
        self.with_conn(|conn| {
            conn.query_row("SELECT value FROM auth_kv WHERE key = ?", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
        })
        .flatten()
    }

    fn set(&self, key: &str, value: &str) {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO auth_kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                [key, value, now.as_str()],
            )
        });
    }

    fn remove(&self, key: &str) {
        self.with_conn(|conn| conn.execute("DELETE FROM auth_kv WHERE key = ?", [key]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::types::LoginResult;
    use serde_json::json;

    fn exercise_store(store: &dyn CredentialStore) {
        assert_eq!(store.get(AUTH_TOKEN_KEY), None);

        store.set(AUTH_TOKEN_KEY, "T1");
        store.set(REFRESH_TOKEN_KEY, "R1");
        assert_eq!(store.get(AUTH_TOKEN_KEY).as_deref(), Some("T1"));
        assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("R1"));

        store.set(AUTH_TOKEN_KEY, "T2");
        assert_eq!(store.get(AUTH_TOKEN_KEY).as_deref(), Some("T2"));

        store.remove(AUTH_TOKEN_KEY);
        assert_eq!(store.get(AUTH_TOKEN_KEY), None);
        assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("R1"));

        // Removing a missing key is a no-op
        store.remove(AUTH_TOKEN_KEY);
    }

    #[test]
    fn test_memory_store() {
        exercise_store(&MemoryCredentialStore::new());
    }

    #[test]
    fn test_sqlite_store() {
        exercise_store(&SqliteCredentialStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("credentials.sqlite3");

        {
            let store = SqliteCredentialStore::open(&path).unwrap();
            store.set(AUTH_TOKEN_KEY, "persisted");
            assert!(store.updated_at(AUTH_TOKEN_KEY).is_some());
        }

        let store = SqliteCredentialStore::open(&path).unwrap();
        assert_eq!(store.get(AUTH_TOKEN_KEY).as_deref(), Some("persisted"));
        assert_eq!(store.path(), Some(path.as_path()));
        assert_eq!(store.updated_at(REFRESH_TOKEN_KEY), None);
    }

    #[test]
    fn test_credential_load_and_save() {
        let store = MemoryCredentialStore::new();
        assert_eq!(Credential::load(&store), None);

        Credential {
            access_token: "T1".to_string(),
            refresh_token: Some("R1".to_string()),
        }
        .save(&store);

        // Absent refresh token keeps the previous one
        Credential {
            access_token: "T2".to_string(),
            refresh_token: None,
        }
        .save(&store);

        let credential = Credential::load(&store).unwrap();
        assert_eq!(credential.access_token, "T2");
        assert_eq!(credential.refresh_token.as_deref(), Some("R1"));

        clear_credentials(&store);
        assert_eq!(store.get(AUTH_TOKEN_KEY), None);
        assert_eq!(store.get(REFRESH_TOKEN_KEY), None);
    }

    #[test]
    fn test_credential_from_login_result() {
        let result = LoginResult {
            token: "T1".to_string(),
            refresh_token: String::new(),
            raw: json!("T1"),
        };
        assert_eq!(
            result.credential(),
            Some(Credential {
                access_token: "T1".to_string(),
                refresh_token: None,
            })
        );

        let empty = LoginResult {
            token: String::new(),
            refresh_token: "R1".to_string(),
            raw: json!({}),
        };
        assert_eq!(empty.credential(), None);
    }
}
