//! Dynamic route table: path prefix → backend `host:port`.
//!
//! Readers take a copy-on-write snapshot (`Arc<Vec<RouteEntry>>`) so a
//! dispatch always sees either the whole table before a mutation or the whole
//! table after it. Writers are serialized by a separate mutex that is held
//! across the persistence call, so the on-disk order of saves matches the
//! in-memory order of mutations.
//!
//! Persistence failures never roll back the in-memory change; they are
//! returned to the caller as a soft warning in [`Applied::warning`].

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::error::GatewayError;

/// A registered backend application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    /// Display name.
    pub name: String,
    /// URL path prefix, e.g. `/grafana`. Unique across the table.
    #[serde(rename = "path")]
    pub path_prefix: String,
    /// Backend host. Empty in older config documents, filled from the
    /// document's `hostname` at load time.
    #[serde(rename = "host", default)]
    pub target_host: String,
    /// Backend TCP port (1–65535).
    #[serde(rename = "port")]
    pub target_port: u16,
    /// Reference returned by the icon store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl RouteEntry {
    /// `host:port` of the backend.
    pub fn target(&self) -> String {
        format!("{}:{}", self.target_host, self.target_port)
    }
}

/// Partial update for [`RouteTable::update`]. `None` leaves a field unchanged;
/// `icon: Some("")` clears the icon.
#[derive(Debug, Clone, Default)]
pub struct RoutePatch {
    pub name: Option<String>,
    pub path_prefix: Option<String>,
    pub target_host: Option<String>,
    pub target_port: Option<u16>,
    pub icon: Option<String>,
}

/// Result of a successful mutation plus an optional persistence warning.
#[derive(Debug)]
pub struct Applied<T> {
    pub value: T,
    pub warning: Option<String>,
}

/// Write-through sink notified with the full table after every mutation.
pub trait RouteSink: Send + Sync {
    fn persist(&self, routes: Vec<RouteEntry>) -> BoxFuture<'_, Result<(), String>>;
}

/// Cloneable handle; all clones share the same table.
#[derive(Clone)]
pub struct RouteTable {
    inner: Arc<Inner>,
}

struct Inner {
    snapshot: RwLock<Arc<Vec<RouteEntry>>>,
    writer: Mutex<()>,
    sink: Arc<dyn RouteSink>,
}

impl RouteTable {
    /// Build a table from loaded entries. Invalid entries and duplicate
    /// prefixes (after the first) are skipped with a warning.
    pub fn new(entries: Vec<RouteEntry>, sink: Arc<dyn RouteSink>) -> Self {
        let mut table: Vec<RouteEntry> = Vec::with_capacity(entries.len());
        for mut entry in entries {
            if let Err(e) = validate(&entry) {
                warn!(path = %entry.path_prefix, "Skipping invalid route: {e}");
                continue;
            }
            entry.path_prefix = canonical_prefix(&entry.path_prefix).to_string();
            if table.iter().any(|r| r.path_prefix == entry.path_prefix) {
                warn!(path = %entry.path_prefix, "Skipping duplicate route");
                continue;
            }
            table.push(entry);
        }
        Self {
            inner: Arc::new(Inner {
                snapshot: RwLock::new(Arc::new(table)),
                writer: Mutex::new(()),
                sink,
            }),
        }
    }

    /// Point-in-time view of the table.
    pub async fn snapshot(&self) -> Arc<Vec<RouteEntry>> {
        Arc::clone(&*self.inner.snapshot.read().await)
    }

    /// All entries in insertion order.
    pub async fn list(&self) -> Vec<RouteEntry> {
        self.snapshot().await.as_ref().clone()
    }

    pub async fn len(&self) -> usize {
        self.snapshot().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshot().await.is_empty()
    }

    /// Longest-prefix match of `path` against the current snapshot.
    pub async fn resolve(&self, path: &str) -> Option<RouteEntry> {
        longest_match(&self.snapshot().await, path).cloned()
    }

    /// Append a new entry.
    pub async fn add(&self, mut entry: RouteEntry) -> Result<Applied<RouteEntry>, GatewayError> {
        validate(&entry)?;
        entry.path_prefix = canonical_prefix(&entry.path_prefix).to_string();
        let _guard = self.inner.writer.lock().await;
        let current = self.snapshot().await;
        if current.iter().any(|r| r.path_prefix == entry.path_prefix) {
            return Err(GatewayError::Conflict("Path already exists".into()));
        }
        let mut next = current.as_ref().clone();
        next.push(entry.clone());
        info!(path = %entry.path_prefix, target = %entry.target(), "Route added");
        let warning = self.publish(next).await;
        Ok(Applied {
            value: entry,
            warning,
        })
    }

    /// Patch the entry currently registered at `path_prefix`.
    pub async fn update(
        &self,
        path_prefix: &str,
        patch: RoutePatch,
    ) -> Result<Applied<RouteEntry>, GatewayError> {
        let _guard = self.inner.writer.lock().await;
        let current = self.snapshot().await;
        let index = current
            .iter()
            .position(|r| r.path_prefix == canonical_prefix(path_prefix))
            .ok_or_else(|| GatewayError::NotFound("App not found".into()))?;

        let mut updated = current[index].clone();
        if let Some(name) = patch.name {
            updated.name = name;
        }
        if let Some(path) = patch.path_prefix {
            updated.path_prefix = path;
        }
        if let Some(host) = patch.target_host {
            updated.target_host = host;
        }
        if let Some(port) = patch.target_port {
            updated.target_port = port;
        }
        if let Some(icon) = patch.icon {
            updated.icon = if icon.is_empty() { None } else { Some(icon) };
        }
        validate(&updated)?;
        updated.path_prefix = canonical_prefix(&updated.path_prefix).to_string();

        let collides = current
            .iter()
            .enumerate()
            .any(|(i, r)| i != index && r.path_prefix == updated.path_prefix);
        if collides {
            return Err(GatewayError::Conflict("Path already exists".into()));
        }

        let mut next = current.as_ref().clone();
        next[index] = updated.clone();
        info!(old = %path_prefix, path = %updated.path_prefix, target = %updated.target(), "Route updated");
        let warning = self.publish(next).await;
        Ok(Applied {
            value: updated,
            warning,
        })
    }

    /// Remove the entry at `path_prefix`, returning it.
    pub async fn remove(&self, path_prefix: &str) -> Result<Applied<RouteEntry>, GatewayError> {
        let _guard = self.inner.writer.lock().await;
        let current = self.snapshot().await;
        let index = current
            .iter()
            .position(|r| r.path_prefix == canonical_prefix(path_prefix))
            .ok_or_else(|| GatewayError::NotFound("App not found".into()))?;
        let mut next = current.as_ref().clone();
        let removed = next.remove(index);
        info!(path = %path_prefix, "Route removed");
        let warning = self.publish(next).await;
        Ok(Applied {
            value: removed,
            warning,
        })
    }

    /// Swap in the new table, then hand it to the sink. Caller holds `writer`.
    async fn publish(&self, next: Vec<RouteEntry>) -> Option<String> {
        let next = Arc::new(next);
        *self.inner.snapshot.write().await = Arc::clone(&next);
        match self.inner.sink.persist(next.as_ref().clone()).await {
            Ok(()) => None,
            Err(e) => {
                warn!("Route change applied but not saved: {e}");
                Some(format!("Change applied but could not be saved: {e}"))
            }
        }
    }
}

/// Whether `prefix` covers `path` on a segment boundary.
///
/// `/app` matches `/app`, `/app/` and `/app/x`, but not `/application`.
pub fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return path.starts_with('/');
    }
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Pick the longest registered prefix covering `path`.
pub fn longest_match<'a>(routes: &'a [RouteEntry], path: &str) -> Option<&'a RouteEntry> {
    routes
        .iter()
        .filter(|r| prefix_matches(&r.path_prefix, path))
        .max_by_key(|r| r.path_prefix.trim_end_matches('/').len())
}

/// Prefix with trailing slashes dropped, so `/app/` and `/app` are one route.
fn canonical_prefix(prefix: &str) -> &str {
    match prefix.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

/// Check name, prefix shape, host and port.
pub fn validate(entry: &RouteEntry) -> Result<(), GatewayError> {
    if entry.name.trim().is_empty() {
        return Err(GatewayError::Invalid("Name is required".into()));
    }
    if !is_valid_prefix(&entry.path_prefix) {
        return Err(GatewayError::Invalid(
            "Path must start with '/' and contain only letters, digits, '_', '-' and '/'".into(),
        ));
    }
    if entry.target_port == 0 {
        return Err(GatewayError::Invalid("Port must be between 1 and 65535".into()));
    }
    if !is_valid_host(&entry.target_host) {
        return Err(GatewayError::Invalid("Host is invalid".into()));
    }
    Ok(())
}

/// `^/[A-Za-z0-9_/-]*$`
fn is_valid_prefix(path: &str) -> bool {
    path.starts_with('/')
        && path
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'/' | b'-'))
}

fn is_valid_host(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= 253
        && host
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_' | b':' | b'[' | b']'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Records every persisted table; optionally fails.
    #[derive(Default)]
    struct RecordingSink {
        saves: StdMutex<Vec<Vec<RouteEntry>>>,
        fail: bool,
    }

    impl RouteSink for RecordingSink {
        fn persist(&self, routes: Vec<RouteEntry>) -> BoxFuture<'_, Result<(), String>> {
            Box::pin(async move {
                self.saves.lock().unwrap().push(routes);
                if self.fail {
                    Err("disk full".into())
                } else {
                    Ok(())
                }
            })
        }
    }

    fn entry(name: &str, path: &str, port: u16) -> RouteEntry {
        RouteEntry {
            name: name.into(),
            path_prefix: path.into(),
            target_host: "127.0.0.1".into(),
            target_port: port,
            icon: None,
        }
    }

    fn table() -> (RouteTable, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (RouteTable::new(Vec::new(), sink.clone()), sink)
    }

    #[tokio::test]
    async fn test_add_then_list() {
        let (table, sink) = table();
        let e = RouteEntry {
            icon: Some("/icons/a.png".into()),
            ..entry("Grafana", "/grafana", 3001)
        };
        let applied = table.add(e.clone()).await.unwrap();
        assert!(applied.warning.is_none());
        assert_eq!(table.list().await, vec![e.clone()]);
        assert_eq!(sink.saves.lock().unwrap().last().unwrap(), &vec![e]);
    }

    #[tokio::test]
    async fn test_list_keeps_insertion_order() {
        let (table, _) = table();
        table.add(entry("b", "/b", 2)).await.unwrap();
        table.add(entry("a", "/a", 1)).await.unwrap();
        table.add(entry("c", "/c", 3)).await.unwrap();
        let names: Vec<String> = table.list().await.into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_duplicate_prefix_conflicts_and_leaves_table_unchanged() {
        let (table, sink) = table();
        table.add(entry("one", "/app", 1000)).await.unwrap();
        let err = table.add(entry("two", "/app", 2000)).await.unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(_)));
        assert_eq!(table.list().await, vec![entry("one", "/app", 1000)]);
        assert_eq!(sink.saves.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_trailing_slash_names_the_same_route() {
        let (table, _) = table();
        table.add(entry("one", "/app", 1)).await.unwrap();
        let err = table.add(entry("two", "/app/", 2)).await.unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(_)));
        assert_eq!(table.resolve("/app/x").await.unwrap().target_port, 1);

        table.add(entry("other", "/other/", 3)).await.unwrap();
        assert_eq!(table.list().await[1].path_prefix, "/other");
        let patch = RoutePatch {
            path_prefix: Some("/app//".into()),
            ..RoutePatch::default()
        };
        let err = table.update("/other", patch).await.unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(_)));

        // Lookups by either spelling find the stored entry.
        assert_eq!(table.remove("/other/").await.unwrap().value.target_port, 3);
        assert_eq!(table.len().await, 1);

        table.add(entry("root", "/", 4)).await.unwrap();
        assert_eq!(table.resolve("/nothing").await.unwrap().target_port, 4);
    }

    #[tokio::test]
    async fn test_invalid_entries_rejected() {
        let (table, _) = table();
        for bad in [
            entry("", "/x", 1),
            entry("x", "noslash", 1),
            entry("x", "/has space", 1),
            entry("x", "/dots.bad", 1),
            entry("x", "/x", 0),
            RouteEntry {
                target_host: String::new(),
                ..entry("x", "/x", 1)
            },
        ] {
            let err = table.add(bad).await.unwrap_err();
            assert!(matches!(err, GatewayError::Invalid(_)), "{err}");
        }
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn test_update_round_trip_changes_only_patched_fields() {
        let (table, _) = table();
        table
            .add(RouteEntry {
                icon: Some("/icons/x.png".into()),
                ..entry("Old", "/old", 8080)
            })
            .await
            .unwrap();
        let patch = RoutePatch {
            name: Some("New".into()),
            target_port: Some(9090),
            ..RoutePatch::default()
        };
        table.update("/old", patch).await.unwrap();
        let listed = table.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "New");
        assert_eq!(listed[0].target_port, 9090);
        assert_eq!(listed[0].path_prefix, "/old");
        assert_eq!(listed[0].target_host, "127.0.0.1");
        assert_eq!(listed[0].icon.as_deref(), Some("/icons/x.png"));
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let (table, _) = table();
        let err = table
            .update("/nope", RoutePatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_path_collision_conflicts() {
        let (table, _) = table();
        table.add(entry("a", "/a", 1)).await.unwrap();
        table.add(entry("b", "/b", 2)).await.unwrap();
        let patch = RoutePatch {
            path_prefix: Some("/a".into()),
            ..RoutePatch::default()
        };
        let err = table.update("/b", patch).await.unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(_)));

        // Keeping its own prefix is not a collision.
        let patch = RoutePatch {
            path_prefix: Some("/b".into()),
            name: Some("bee".into()),
            ..RoutePatch::default()
        };
        assert_eq!(table.update("/b", patch).await.unwrap().value.name, "bee");
    }

    #[tokio::test]
    async fn test_update_clears_icon_with_empty_string() {
        let (table, _) = table();
        table
            .add(RouteEntry {
                icon: Some("/icons/x.png".into()),
                ..entry("a", "/a", 1)
            })
            .await
            .unwrap();
        let patch = RoutePatch {
            icon: Some(String::new()),
            ..RoutePatch::default()
        };
        assert!(table.update("/a", patch).await.unwrap().value.icon.is_none());
    }

    #[tokio::test]
    async fn test_remove() {
        let (table, _) = table();
        table.add(entry("a", "/a", 1)).await.unwrap();
        let removed = table.remove("/a").await.unwrap();
        assert_eq!(removed.value.path_prefix, "/a");
        assert!(table.is_empty().await);
        let err = table.remove("/a").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_persistence_failure_is_soft() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..RecordingSink::default()
        });
        let table = RouteTable::new(Vec::new(), sink);
        let applied = table.add(entry("a", "/a", 1)).await.unwrap();
        assert!(applied.warning.unwrap().contains("disk full"));
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn test_longest_prefix_wins() {
        let (table, _) = table();
        table.add(entry("app", "/app", 1)).await.unwrap();
        table.add(entry("sub", "/app/sub", 2)).await.unwrap();
        assert_eq!(table.resolve("/app/sub/x").await.unwrap().target_port, 2);
        assert_eq!(table.resolve("/app/sub").await.unwrap().target_port, 2);
        assert_eq!(table.resolve("/app/other").await.unwrap().target_port, 1);
        assert_eq!(table.resolve("/app").await.unwrap().target_port, 1);
        assert!(table.resolve("/application").await.is_none());
        assert!(table.resolve("/other").await.is_none());
    }

    #[test]
    fn test_prefix_matches() {
        assert!(prefix_matches("/", "/anything"));
        assert!(prefix_matches("/app/", "/app/x"));
        assert!(prefix_matches("/app/", "/app"));
        assert!(!prefix_matches("/app", "/apps"));
    }

    #[tokio::test]
    async fn test_new_skips_invalid_and_duplicates() {
        let sink = Arc::new(RecordingSink::default());
        let table = RouteTable::new(
            vec![
                entry("a", "/a", 1),
                entry("dup", "/a/", 2),
                entry("bad", "/b", 0),
            ],
            sink,
        );
        assert_eq!(table.list().await, vec![entry("a", "/a", 1)]);
    }

    #[tokio::test]
    async fn test_snapshot_is_stable_across_mutation() {
        let (table, _) = table();
        table.add(entry("a", "/a", 1)).await.unwrap();
        let before = table.snapshot().await;
        table.add(entry("b", "/b", 2)).await.unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(table.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_adds_are_serialized() {
        let (table, sink) = table();
        let mut handles = Vec::new();
        for i in 1..=20u16 {
            let t = table.clone();
            handles.push(tokio::spawn(async move {
                t.add(entry("n", &format!("/r{i}"), i)).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(table.len().await, 20);
        let saves = sink.saves.lock().unwrap();
        let sizes: Vec<usize> = saves.iter().map(Vec::len).collect();
        assert_eq!(sizes, (1..=20).collect::<Vec<_>>());
    }
}
