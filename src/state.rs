//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::Arc;
use std::time::Instant;

use crate::auth::AuthGate;
use crate::config::Config;
use crate::icons::IconStore;
use crate::proxy::ProxyDispatcher;
use crate::route_table::RouteTable;
use crate::shell::ShellSpec;
use crate::startup::{StartupRegistrar, SystemctlRegistrar};
use crate::store::ConfigStore;

/// Shared application state for the gateway.
#[derive(Clone)]
pub struct AppState {
    /// Immutable settings loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
    /// The persisted config document. Also the route sink and credential store.
    pub store: Arc<ConfigStore>,
    /// Registered apps, read by the proxy fallback on every request.
    pub routes: RouteTable,
    /// Login tickets and the credential check.
    pub auth: AuthGate,
    pub proxy: ProxyDispatcher,
    /// Service-manager hook for `POST /api/startup`.
    pub startup: Arc<dyn StartupRegistrar>,
    pub icons: IconStore,
    /// What each terminal bridge spawns.
    pub shell: ShellSpec,
}

impl AppState {
    /// Wire every component to `store`, seeding the route table from the
    /// document's apps.
    pub async fn new(config: Config, store: Arc<ConfigStore>) -> Self {
        let apps = store.snapshot().await.apps;
        Self {
            start_time: Instant::now(),
            routes: RouteTable::new(apps, store.clone()),
            auth: AuthGate::new(store.clone()),
            proxy: ProxyDispatcher::new(&config.proxy),
            startup: Arc::new(SystemctlRegistrar::new(&config.startup)),
            icons: IconStore::new(&config.server.data_dir),
            shell: ShellSpec::from_config(&config.shell),
            store,
            config: Arc::new(config),
        }
    }
}
