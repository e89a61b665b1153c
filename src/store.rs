//! The persisted config document (`config.json`).
//!
//! Holds everything the gateway changes at runtime: registered apps, the login
//! credential, the default backend hostname and the run-on-startup flag. It is
//! read once at startup and written through after every change.
//!
//! ```json
//! {
//!   "port": 3000,
//!   "hostname": "localhost",
//!   "credentials": { "username": "admin", "password": "$2b$10$..." },
//!   "apps": [{ "name": "Grafana", "path": "/grafana", "host": "localhost", "port": 3001 }],
//!   "runOnStartup": false
//! }
//! ```
//!
//! Writes use a temp-file-then-rename pattern so a crash never leaves a
//! half-written document behind.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::auth::CredentialStore;
use crate::credentials;
use crate::route_table::{RouteEntry, RouteSink};

/// Monotonic counter to uniquify temp file names across concurrent writes.
static WRITE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Errors reading or writing the config document.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config document {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to serialize config document: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Hash(#[from] credentials::HashError),
}

/// Stored login credential. `password` is a hash from [`credentials`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub username: String,
    pub password: String,
}

/// On-disk shape of `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
    /// Listen port used when `[server] listen` is not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Default backend host for apps that don't name one.
    #[serde(default = "default_hostname")]
    pub hostname: String,
    pub credentials: StoredCredentials,
    #[serde(default)]
    pub apps: Vec<RouteEntry>,
    #[serde(default)]
    pub run_on_startup: bool,
}

fn default_hostname() -> String {
    "localhost".to_string()
}

impl ConfigDocument {
    /// Fresh document with `admin`/`admin`.
    pub fn with_default_credentials() -> Result<Self, credentials::HashError> {
        Ok(Self {
            port: None,
            hostname: default_hostname(),
            credentials: StoredCredentials {
                username: "admin".to_string(),
                password: credentials::hash_password("admin")?,
            },
            apps: Vec::new(),
            run_on_startup: false,
        })
    }

    /// Fill in hosts missing from older documents.
    fn normalize(&mut self) {
        if self.hostname.trim().is_empty() {
            self.hostname = default_hostname();
        }
        for app in &mut self.apps {
            if app.target_host.is_empty() {
                app.target_host.clone_from(&self.hostname);
            }
        }
    }
}

/// Write-through owner of the config document.
pub struct ConfigStore {
    path: PathBuf,
    doc: Mutex<ConfigDocument>,
}

impl ConfigStore {
    /// Load `path`, or create it with default credentials when missing.
    ///
    /// Returns the store and whether the document was freshly created.
    pub async fn open(path: impl Into<PathBuf>) -> Result<(Self, bool), StoreError> {
        let path = path.into();
        let display = path.display().to_string();
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let mut doc: ConfigDocument =
                    serde_json::from_str(&content).map_err(|source| StoreError::Parse {
                        path: display,
                        source,
                    })?;
                doc.normalize();
                info!(apps = doc.apps.len(), "Loaded config document from {}", path.display());
                Ok((Self::from_document(path, doc), false))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let doc = tokio::task::spawn_blocking(ConfigDocument::with_default_credentials)
                    .await
                    .map_err(credentials::HashError::from)??;
                let store = Self::from_document(path, doc);
                store.flush().await?;
                Ok((store, true))
            }
            Err(source) => Err(StoreError::Io {
                path: display,
                source,
            }),
        }
    }

    pub fn from_document(path: impl Into<PathBuf>, mut doc: ConfigDocument) -> Self {
        doc.normalize();
        Self {
            path: path.into(),
            doc: Mutex::new(doc),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current document.
    pub async fn snapshot(&self) -> ConfigDocument {
        self.doc.lock().await.clone()
    }

    /// Apply `change` and write the full document.
    ///
    /// The in-memory change stays even when the write fails.
    pub async fn update<F>(&self, change: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut ConfigDocument),
    {
        let mut doc = self.doc.lock().await;
        change(&mut doc);
        write_atomic(&self.path, &doc).await
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let doc = self.doc.lock().await;
        write_atomic(&self.path, &doc).await
    }

    pub async fn hostname(&self) -> String {
        self.doc.lock().await.hostname.clone()
    }

    pub async fn set_hostname(&self, hostname: &str) -> Result<(), StoreError> {
        let hostname = if hostname.trim().is_empty() {
            default_hostname()
        } else {
            hostname.trim().to_string()
        };
        self.update(|doc| doc.hostname = hostname).await
    }

    pub async fn set_run_on_startup(&self, enabled: bool) -> Result<(), StoreError> {
        self.update(|doc| doc.run_on_startup = enabled).await
    }
}

/// Serialize `doc` to a sibling temp file and rename it over `path`.
async fn write_atomic(path: &Path, doc: &ConfigDocument) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(doc)?;
    let io_err = |source| StoreError::Io {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let seq = WRITE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let file_name = path
        .file_name()
        .map_or_else(|| "config.json".into(), |n| n.to_string_lossy().into_owned());
    let tmp = path.with_file_name(format!(".{file_name}.tmp.{}.{seq}", std::process::id()));

    if let Err(e) = tokio::fs::write(&tmp, &json).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(e));
    }
    debug!(bytes = json.len(), "Saved config document to {}", path.display());
    Ok(())
}

impl RouteSink for ConfigStore {
    fn persist(&self, routes: Vec<RouteEntry>) -> BoxFuture<'_, Result<(), String>> {
        Box::pin(async move {
            self.update(|doc| doc.apps = routes)
                .await
                .map_err(|e| e.to_string())
        })
    }
}

impl CredentialStore for ConfigStore {
    fn verify<'a>(&'a self, username: &'a str, password: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let stored = self.doc.lock().await.credentials.clone();
            // Hash first so a wrong username costs the same as a wrong password.
            let password_ok =
                credentials::verify_password_blocking(password.to_string(), stored.password).await;
            let user_ok =
                credentials::constant_time_eq(stored.username.as_bytes(), username.as_bytes());
            user_ok & password_ok
        })
    }

    fn verify_password<'a>(&'a self, password: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let hash = self.doc.lock().await.credentials.password.clone();
            credentials::verify_password_blocking(password.to_string(), hash).await
        })
    }

    fn set_password(&self, hash: String) -> BoxFuture<'_, Result<(), String>> {
        Box::pin(async move {
            self.update(|doc| doc.credentials.password = hash)
                .await
                .map_err(|e| e.to_string())
        })
    }

    fn set_username(&self, name: String) -> BoxFuture<'_, Result<(), String>> {
        Box::pin(async move {
            self.update(|doc| doc.credentials.username = name)
                .await
                .map_err(|e| e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_creates_default_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let (store, created) = ConfigStore::open(&path).await.unwrap();
        assert!(created);
        assert!(path.exists());
        assert!(store.verify("admin", "admin").await);

        let (_, created_again) = ConfigStore::open(&path).await.unwrap();
        assert!(!created_again);
    }

    #[tokio::test]
    async fn test_open_fills_missing_hosts_from_hostname() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let hash = credentials::hash_password("pw").unwrap();
        let content = serde_json::json!({
            "port": 3000,
            "hostname": "myserver",
            "credentials": { "username": "admin", "password": hash },
            "apps": [{ "name": "App", "port": 8080, "path": "/app" }],
            "runOnStartup": true,
        });
        tokio::fs::write(&path, content.to_string()).await.unwrap();

        let (store, created) = ConfigStore::open(&path).await.unwrap();
        assert!(!created);
        let doc = store.snapshot().await;
        assert_eq!(doc.port, Some(3000));
        assert!(doc.run_on_startup);
        assert_eq!(doc.apps[0].target_host, "myserver");
        assert_eq!(doc.apps[0].target_port, 8080);
    }

    #[tokio::test]
    async fn test_open_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, "{not json").await.unwrap();
        let Err(err) = ConfigStore::open(&path).await else {
            panic!("expected parse error");
        };
        assert!(matches!(err, StoreError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_persist_routes_writes_full_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let (store, _) = ConfigStore::open(&path).await.unwrap();
        store.set_hostname("box.lan").await.unwrap();
        let apps = vec![RouteEntry {
            name: "A".into(),
            path_prefix: "/a".into(),
            target_host: "box.lan".into(),
            target_port: 81,
            icon: None,
        }];
        store.persist(apps.clone()).await.unwrap();

        let on_disk: ConfigDocument =
            serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
        assert_eq!(on_disk.apps, apps);
        assert_eq!(on_disk.hostname, "box.lan");
        assert_eq!(on_disk.credentials.username, "admin");
    }

    #[tokio::test]
    async fn test_verify_is_generic_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = ConfigStore::open(dir.path().join("c.json")).await.unwrap();
        assert!(!store.verify("root", "admin").await);
        assert!(!store.verify("admin", "wrong").await);
        assert!(store.verify_password("admin").await);
    }

    #[tokio::test]
    async fn test_bcrypt_document_from_earlier_install_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let content = serde_json::json!({
            "credentials": {
                "username": "admin",
                "password": "$2b$05$CCCCCCCCCCCCCCCCCCCCC.E5YPO9kmyuRGyh0XouQYb4YMJKvyOeW",
            },
            "apps": [],
        });
        std::fs::write(&path, content.to_string()).unwrap();

        let (store, created) = ConfigStore::open(&path).await.unwrap();
        assert!(!created);
        assert!(store.verify("admin", "U*U").await);
        assert!(!store.verify("admin", "admin").await);
        assert!(store.verify_password("U*U").await);
    }

    #[tokio::test]
    async fn test_credential_changes_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        let (store, _) = ConfigStore::open(&path).await.unwrap();
        store
            .set_password(credentials::hash_password("s3cret").unwrap())
            .await
            .unwrap();
        store.set_username("operator".into()).await.unwrap();

        let (reloaded, _) = ConfigStore::open(&path).await.unwrap();
        assert!(reloaded.verify("operator", "s3cret").await);
        assert!(!reloaded.verify("admin", "admin").await);
    }

    #[tokio::test]
    async fn test_empty_hostname_falls_back_to_localhost() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = ConfigStore::open(dir.path().join("c.json")).await.unwrap();
        store.set_hostname("  ").await.unwrap();
        assert_eq!(store.hostname().await, "localhost");
    }

    #[tokio::test]
    async fn test_write_failure_keeps_memory_change() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes the rename fail.
        let path = dir.path().join("occupied");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), b"x").unwrap();
        let store = ConfigStore::from_document(&path, ConfigDocument::with_default_credentials().unwrap());
        assert!(store.set_run_on_startup(true).await.is_err());
        assert!(store.snapshot().await.run_on_startup);
    }
}
