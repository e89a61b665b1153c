//! Router assembly.
//!
//! ```text
//! public:   GET/POST /login, GET /logout, GET /api/health
//! session:  GET /, GET /settings, /api/apps[/{path}], /api/change-*,
//!           POST /api/startup, POST /api/upload-icon, GET /icons/{file},
//!           GET /api/ws
//! fallback: auth check, then longest-prefix proxy dispatch
//! ```

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::icons::MAX_ICON_BYTES;
use crate::routes::{apps, dashboard, health, icons, login, settings};
use crate::{auth, proxy, ws, AppState};

/// Multipart framing on top of the largest icon.
const UPLOAD_BODY_LIMIT: usize = MAX_ICON_BYTES + 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/login", get(login::login_page).post(login::login))
        .route("/logout", get(login::logout))
        .route("/api/health", get(health::health));

    let authed_routes = Router::new()
        .route("/", get(dashboard::dashboard))
        .route("/settings", get(dashboard::settings))
        .route("/api/apps", get(apps::list_apps).post(apps::add_app))
        .route(
            "/api/apps/{path}",
            put(apps::update_app).delete(apps::delete_app),
        )
        .route("/api/change-password", post(settings::change_password))
        .route("/api/change-username", post(settings::change_username))
        .route("/api/change-hostname", post(settings::change_hostname))
        .route("/api/startup", post(settings::set_startup))
        .route(
            "/api/upload-icon",
            post(icons::upload_icon).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/icons/{file}", get(icons::serve_icon))
        .route("/api/ws", get(ws::ws_upgrade))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_session,
        ));

    Router::new()
        .merge(public_routes)
        .merge(authed_routes)
        .fallback(proxy::proxy_fallback)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
