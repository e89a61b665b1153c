//! Reverse proxy from a route prefix to its backend.
//!
//! For a request matched to a [`RouteEntry`], the prefix is stripped from the
//! path, hop-by-hop headers are dropped, `Host` is rewritten to the backend's
//! `host:port` and the request is sent over plain HTTP/1.1. The backend's
//! response streams back unbuffered.
//!
//! WebSocket upgrades under a prefix are relayed frame by frame to
//! `ws://host:port/<rewritten path>`.
//!
//! A backend that cannot be reached never surfaces as a raw transport error:
//! the caller gets a 502 page naming the target, the path, the error chain and
//! the usual remediation hints, and nothing about other routes.

use std::time::Duration;

use axum::{
    body::Body,
    extract::{
        ws::{Message as AxMsg, WebSocket, WebSocketUpgrade},
        FromRequestParts, Request, State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode, Uri, Version},
    response::{Html, IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use tokio_tungstenite::tungstenite::Message as TungMsg;
use tracing::{debug, warn};

use crate::auth;
use crate::config::ProxyConfig;
use crate::error::GatewayError;
use crate::pages;
use crate::route_table::RouteEntry;
use crate::AppState;

/// Headers that describe one hop and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Shared HTTP client plus timeouts. Cheap to clone.
#[derive(Clone)]
pub struct ProxyDispatcher {
    client: Client<HttpConnector, Body>,
    connect_timeout: Duration,
    /// `None` waits for response headers indefinitely.
    response_timeout: Option<Duration>,
}

impl ProxyDispatcher {
    pub fn new(config: &ProxyConfig) -> Self {
        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);
        Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
            connect_timeout,
            response_timeout: (config.response_timeout_ms > 0)
                .then(|| Duration::from_millis(config.response_timeout_ms)),
        }
    }

    /// Forward `req` to `route`'s backend and return its response, or the
    /// diagnostic page when the backend is unreachable.
    pub async fn dispatch(&self, route: &RouteEntry, req: Request) -> Response {
        let original_path = req.uri().path().to_string();
        let result = if is_websocket_upgrade(req.headers()) {
            self.forward_websocket(route, req).await
        } else {
            self.forward(route, req).await
        };
        match result {
            Ok(response) => response,
            Err(e) => {
                warn!(route = %route.path_prefix, target = %route.target(), path = %original_path, "Proxy error: {e}");
                unreachable_response(route, &original_path, &e)
            }
        }
    }

    async fn forward(&self, route: &RouteEntry, mut req: Request) -> Result<Response, GatewayError> {
        let target = route.target();
        let upstream = rewrite_path(&route.path_prefix, path_and_query(req.uri()));
        *req.uri_mut() = backend_uri("http", &target, &upstream)?;
        *req.version_mut() = Version::HTTP_11;
        strip_hop_by_hop(req.headers_mut());
        if let Ok(host) = HeaderValue::from_str(&target) {
            req.headers_mut().insert(header::HOST, host);
        }
        debug!(target = %target, upstream = %upstream, method = %req.method(), "Proxying");

        let sent = match self.response_timeout {
            Some(limit) => tokio::time::timeout(limit, self.client.request(req))
                .await
                .map_err(|_| format!("no response within {}ms", limit.as_millis())),
            None => Ok(self.client.request(req).await),
        };
        let resp = match sent {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                return Err(GatewayError::BackendUnreachable {
                    target,
                    message: error_chain(&e),
                })
            }
            Err(message) => return Err(GatewayError::BackendUnreachable { target, message }),
        };

        let (mut parts, body) = resp.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        let body = Body::new(body.map_err(axum::Error::new));
        Ok(Response::from_parts(parts, body))
    }

    /// Connect to the backend first so a dead backend still gets the
    /// diagnostic page instead of a half-open client socket.
    async fn forward_websocket(&self, route: &RouteEntry, req: Request) -> Result<Response, GatewayError> {
        use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;

        let target = route.target();
        let upstream = rewrite_path(&route.path_prefix, path_and_query(req.uri()));
        let unreachable = |message: String| GatewayError::BackendUnreachable {
            target: target.clone(),
            message,
        };

        let (mut parts, _body) = req.into_parts();
        let ws = WebSocketUpgrade::from_request_parts(&mut parts, &())
            .await
            .map_err(|e| GatewayError::Invalid(e.to_string()))?;

        let backend_url = format!("ws://{target}{upstream}");
        let ws_req = backend_url
            .as_str()
            .into_client_request()
            .map_err(|e| unreachable(e.to_string()))?;
        let backend = match tokio::time::timeout(
            self.connect_timeout,
            tokio_tungstenite::connect_async(ws_req),
        )
        .await
        {
            Ok(Ok((backend, _))) => backend,
            Ok(Err(e)) => return Err(unreachable(error_chain(&e))),
            Err(_) => {
                return Err(unreachable(format!(
                    "connect timed out after {}ms",
                    self.connect_timeout.as_millis()
                )))
            }
        };
        debug!(target = %target, upstream = %upstream, "Proxying WebSocket");

        Ok(ws.on_upgrade(move |client| relay_websocket(client, backend)))
    }
}

type BackendSocket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Copy frames both ways until either side closes.
async fn relay_websocket(client: WebSocket, backend: BackendSocket) {
    let (mut backend_sink, mut backend_stream) = backend.split();
    let (mut client_sink, mut client_stream) = client.split();

    let upstream = async {
        while let Some(Ok(msg)) = client_stream.next().await {
            let msg = match msg {
                AxMsg::Text(t) => TungMsg::text(t.as_str()),
                AxMsg::Binary(b) => TungMsg::binary(b),
                AxMsg::Ping(p) => TungMsg::Ping(p),
                AxMsg::Pong(p) => TungMsg::Pong(p),
                AxMsg::Close(_) => break,
            };
            if backend_sink.send(msg).await.is_err() {
                break;
            }
        }
        let _ = backend_sink.close().await;
    };

    let downstream = async {
        while let Some(Ok(msg)) = backend_stream.next().await {
            let msg = match msg {
                TungMsg::Text(t) => AxMsg::Text(t.as_str().into()),
                TungMsg::Binary(b) => AxMsg::Binary(b),
                TungMsg::Ping(p) => AxMsg::Ping(p),
                TungMsg::Pong(p) => AxMsg::Pong(p),
                TungMsg::Close(_) | TungMsg::Frame(_) => break,
            };
            if client_sink.send(msg).await.is_err() {
                break;
            }
        }
        let _ = client_sink.close().await;
    };

    tokio::select! {
        () = upstream => {}
        () = downstream => {}
    }
}

/// Router fallback: gate, then dispatch to the longest matching route.
///
/// Unauthenticated callers are denied before the table is consulted, so a
/// matched and an unmatched path look the same to them.
pub async fn proxy_fallback(State(state): State<AppState>, req: Request) -> Response {
    if !state.auth.is_authenticated(req.headers()).await {
        return auth::deny(req.uri().path());
    }
    match state.routes.resolve(req.uri().path()).await {
        Some(route) => state.proxy.dispatch(&route, req).await,
        None => (StatusCode::NOT_FOUND, Html(pages::not_found_page(req.uri().path()))).into_response(),
    }
}

/// Strip `prefix` from the path, keeping a leading `/` and the query string.
pub fn rewrite_path(prefix: &str, path_and_query: &str) -> String {
    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path_and_query, None),
    };
    let rest = if prefix == "/" {
        path
    } else {
        path.strip_prefix(prefix.trim_end_matches('/')).unwrap_or(path)
    };
    let mut out = if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{rest}")
    };
    if let Some(query) = query {
        out.push('?');
        out.push_str(query);
    }
    out
}

fn path_and_query(uri: &Uri) -> &str {
    uri.path_and_query().map_or("/", |pq| pq.as_str())
}

fn backend_uri(scheme: &str, target: &str, upstream: &str) -> Result<Uri, GatewayError> {
    format!("{scheme}://{target}{upstream}")
        .parse::<Uri>()
        .map_err(|e| GatewayError::BackendUnreachable {
            target: target.to_string(),
            message: format!("invalid backend URI: {e}"),
        })
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Display an error and its sources, joined by `": "`.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if parts.last() != Some(&text) {
            parts.push(text);
        }
        source = cause.source();
    }
    parts.join(": ")
}

fn unreachable_response(route: &RouteEntry, path: &str, err: &GatewayError) -> Response {
    let message = match err {
        GatewayError::BackendUnreachable { message, .. } => message.clone(),
        other => other.to_string(),
    };
    let status = match err {
        GatewayError::Invalid(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    };
    let page = pages::unreachable_page(&route.target_host, route.target_port, path, &message);
    (status, Html(page)).into_response()
}
