//! HTML pages: `GET /` and `GET /settings`.

use axum::{extract::State, response::Html};

use crate::pages;
use crate::AppState;

pub async fn dashboard(State(state): State<AppState>) -> Html<String> {
    let apps = state.routes.snapshot().await;
    let hostname = state.store.hostname().await;
    Html(pages::dashboard_page(&apps, &hostname))
}

pub async fn settings(State(state): State<AppState>) -> Html<String> {
    let apps = state.routes.snapshot().await;
    let doc = state.store.snapshot().await;
    Html(pages::settings_page(&apps, &doc.hostname, doc.run_on_startup))
}
