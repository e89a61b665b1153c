//! WebSocket session channel for the terminal and tunnel bridges.
//!
//! ## Connection lifecycle
//!
//! 1. Client connects to `GET /api/ws`. The session cookie is checked by the
//!    auth middleware before the upgrade completes.
//! 2. All messages are JSON objects with a `"type"` field. An optional
//!    `"request_id"` on an incoming message is echoed on any `error` it causes.
//! 3. Each connection owns at most one terminal bridge and one tunnel bridge.
//!    On disconnect both are closed: the shell is killed and the socket is
//!    dropped.
//!
//! ## Message types (client → server)
//!
//! | Type              | Fields                                   |
//! |-------------------|------------------------------------------|
//! | `start-terminal`  | —                                        |
//! | `terminal-input`  | `data`, `encoding?` (`"base64"`)         |
//! | `terminal-resize` | `cols`, `rows`                           |
//! | `vnc-connect`     | `host`, `port`                           |
//! | `vnc-data`        | `data` (base64)                          |
//!
//! ## Message types (server → client)
//!
//! | Type               | Key fields                                   |
//! |--------------------|----------------------------------------------|
//! | `terminal-output`  | `data`, `encoding?` (set when not UTF-8)     |
//! | `terminal-error`   | `message`                                    |
//! | `vnc-connected`    | —                                            |
//! | `vnc-data`         | `data` (base64)                              |
//! | `vnc-error`        | `message`                                    |
//! | `vnc-disconnected` | —                                            |
//! | `error`            | `code`, `message`, `request_id?`             |

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::bridge::{TerminalBridge, TunnelBridge, TunnelSignal, OUTPUT_CHANNEL_CAPACITY};
use crate::error::GatewayError;
use crate::AppState;

const BASE64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// `GET /api/ws` — WebSocket upgrade handler.
pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Main WebSocket event loop.
///
/// Outgoing messages are funneled through an mpsc channel so the bridge
/// forwarders can send without holding the socket.
async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Value>(OUTPUT_CHANNEL_CAPACITY);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    error!("WS send: failed to serialize message: {e}");
                    continue;
                }
            };
            if ws_sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut conn = Connection::new(&state, tx.clone());
    info!(conn = %conn.id, "Client connected");

    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => {
                let Ok(parsed) = serde_json::from_str::<Value>(&text) else {
                    let _ = tx
                        .send(error_event("INVALID_JSON", "Failed to parse JSON message", None))
                        .await;
                    continue;
                };
                conn.dispatch(&parsed).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    conn.shutdown().await;
    drop(tx);
    send_task.abort();
    info!(conn = %conn.id, "Client disconnected");
}

/// Bridges owned by one WebSocket connection.
struct Connection {
    id: String,
    tx: mpsc::Sender<Value>,
    shell: crate::shell::ShellSpec,
    connect_timeout: Duration,
    terminal: Option<(Arc<TerminalBridge>, JoinHandle<()>)>,
    tunnel: Option<(Arc<TunnelBridge>, JoinHandle<()>)>,
}

impl Connection {
    fn new(state: &AppState, tx: mpsc::Sender<Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string()[..8].to_string(),
            tx,
            shell: state.shell.clone(),
            connect_timeout: Duration::from_millis(state.config.proxy.connect_timeout_ms),
            terminal: None,
            tunnel: None,
        }
    }

    async fn dispatch(&mut self, msg: &Value) {
        let request_id = msg["request_id"].as_str();
        let result = match msg["type"].as_str().unwrap_or("") {
            "start-terminal" => {
                self.start_terminal().await;
                Ok(())
            }
            "terminal-input" => self.terminal_input(msg).await,
            "terminal-resize" => self.terminal_resize(msg).await,
            "vnc-connect" => {
                self.vnc_connect(msg).await;
                Ok(())
            }
            "vnc-data" => self.vnc_data(msg).await,
            other => Err(GatewayError::Invalid(format!("Unknown message type: {other:?}"))),
        };
        if let Err(e) = result {
            let _ = self.tx.send(error_event(e.code(), &e.to_string(), request_id)).await;
        }
    }

    /// Live terminal bridge, replacing one that has already closed.
    async fn terminal_bridge(&mut self) -> Arc<TerminalBridge> {
        if let Some((bridge, _)) = &self.terminal {
            if !bridge.state().await.is_closed() {
                return Arc::clone(bridge);
            }
        }
        if let Some((_, forwarder)) = self.terminal.take() {
            forwarder.abort();
        }
        let (out_tx, out_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let bridge = Arc::new(TerminalBridge::new(self.shell.clone(), out_tx));
        let forwarder = tokio::spawn(forward_terminal(out_rx, self.tx.clone()));
        self.terminal = Some((Arc::clone(&bridge), forwarder));
        bridge
    }

    async fn start_terminal(&mut self) {
        let bridge = self.terminal_bridge().await;
        if let Err(e) = bridge.start().await {
            error!(conn = %self.id, "Terminal start failed: {e}");
            let _ = self
                .tx
                .send(json!({"type": "terminal-error", "message": e.to_string()}))
                .await;
        }
    }

    async fn terminal_input(&self, msg: &Value) -> Result<(), GatewayError> {
        let data = decode_payload(msg)?;
        if let Some((bridge, _)) = &self.terminal {
            bridge.input(data).await;
        }
        Ok(())
    }

    async fn terminal_resize(&self, msg: &Value) -> Result<(), GatewayError> {
        let dimension = |key: &str| {
            msg[key]
                .as_u64()
                .and_then(|v| u16::try_from(v).ok())
                .filter(|v| *v > 0)
                .ok_or_else(|| GatewayError::Invalid(format!("{key} must be between 1 and 65535")))
        };
        let (cols, rows) = (dimension("cols")?, dimension("rows")?);
        if let Some((bridge, _)) = &self.terminal {
            bridge.resize(cols, rows).await;
        }
        Ok(())
    }

    async fn tunnel_bridge(&mut self) -> Arc<TunnelBridge> {
        if let Some((bridge, _)) = &self.tunnel {
            if !bridge.state().await.is_closed() {
                return Arc::clone(bridge);
            }
        }
        if let Some((_, forwarder)) = self.tunnel.take() {
            forwarder.abort();
        }
        let (sig_tx, sig_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let bridge = Arc::new(TunnelBridge::new(sig_tx, self.connect_timeout));
        let forwarder = tokio::spawn(forward_tunnel(sig_rx, self.tx.clone()));
        self.tunnel = Some((Arc::clone(&bridge), forwarder));
        bridge
    }

    /// Connect in the background so a slow target does not stall the
    /// terminal traffic on the same connection.
    async fn vnc_connect(&mut self, msg: &Value) {
        let host = msg["host"].as_str().unwrap_or("").to_string();
        let port = port_field(&msg["port"]);
        let bridge = self.tunnel_bridge().await;
        let tx = self.tx.clone();
        let conn = self.id.clone();
        tokio::spawn(async move {
            match bridge.connect(&host, port).await {
                Ok(_) => {}
                // Already reported through the tunnel's own error signal.
                Err(GatewayError::TunnelConnectFailure { .. }) => {}
                Err(e) => {
                    debug!(conn = %conn, "vnc-connect rejected: {e}");
                    let _ = tx
                        .send(json!({"type": "vnc-error", "message": e.to_string()}))
                        .await;
                }
            }
        });
    }

    async fn vnc_data(&self, msg: &Value) -> Result<(), GatewayError> {
        let encoded = msg["data"]
            .as_str()
            .ok_or_else(|| GatewayError::Invalid("data is required".into()))?;
        let data = BASE64
            .decode(encoded)
            .map_err(|e| GatewayError::Invalid(format!("data is not valid base64: {e}")))?;
        if let Some((bridge, _)) = &self.tunnel {
            bridge.send(data).await;
        }
        Ok(())
    }

    /// Client disconnect: release everything this connection owns.
    async fn shutdown(&mut self) {
        if let Some((bridge, forwarder)) = self.terminal.take() {
            bridge.close().await;
            forwarder.abort();
        }
        if let Some((bridge, forwarder)) = self.tunnel.take() {
            bridge.close().await;
            forwarder.abort();
        }
    }
}

async fn forward_terminal(mut rx: mpsc::Receiver<Vec<u8>>, tx: mpsc::Sender<Value>) {
    while let Some(chunk) = rx.recv().await {
        if tx.send(terminal_output(chunk)).await.is_err() {
            break;
        }
    }
}

async fn forward_tunnel(mut rx: mpsc::Receiver<TunnelSignal>, tx: mpsc::Sender<Value>) {
    while let Some(signal) = rx.recv().await {
        if tx.send(tunnel_event(signal)).await.is_err() {
            break;
        }
    }
}

/// Text when the chunk is UTF-8, base64 otherwise.
fn terminal_output(chunk: Vec<u8>) -> Value {
    match String::from_utf8(chunk) {
        Ok(text) => json!({"type": "terminal-output", "data": text}),
        Err(e) => json!({
            "type": "terminal-output",
            "data": BASE64.encode(e.into_bytes()),
            "encoding": "base64",
        }),
    }
}

fn tunnel_event(signal: TunnelSignal) -> Value {
    match signal {
        TunnelSignal::Connected => json!({"type": "vnc-connected"}),
        TunnelSignal::Data(bytes) => json!({"type": "vnc-data", "data": BASE64.encode(bytes)}),
        TunnelSignal::Error(message) => json!({"type": "vnc-error", "message": message}),
        TunnelSignal::Disconnected => json!({"type": "vnc-disconnected"}),
    }
}

/// `data` as raw bytes, honouring `encoding: "base64"`.
fn decode_payload(msg: &Value) -> Result<Vec<u8>, GatewayError> {
    let data = msg["data"]
        .as_str()
        .ok_or_else(|| GatewayError::Invalid("data is required".into()))?;
    match msg["encoding"].as_str() {
        Some("base64") => BASE64
            .decode(data)
            .map_err(|e| GatewayError::Invalid(format!("data is not valid base64: {e}"))),
        _ => Ok(data.as_bytes().to_vec()),
    }
}

/// Port as a JSON number or numeric string.
fn port_field(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn error_event(code: &str, message: &str, request_id: Option<&str>) -> Value {
    let mut resp = json!({
        "type": "error",
        "code": code,
        "message": message,
    });
    if let Some(rid) = request_id {
        resp["request_id"] = json!(rid);
    }
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_output_encoding() {
        assert_eq!(
            terminal_output(b"hi\r\n".to_vec()),
            json!({"type": "terminal-output", "data": "hi\r\n"})
        );
        let binary = terminal_output(vec![0xff, 0xfe, b'a']);
        assert_eq!(binary["encoding"], "base64");
        assert_eq!(BASE64.decode(binary["data"].as_str().unwrap()).unwrap(), [0xff, 0xfe, b'a']);
    }

    #[test]
    fn test_tunnel_events() {
        assert_eq!(tunnel_event(TunnelSignal::Connected)["type"], "vnc-connected");
        assert_eq!(tunnel_event(TunnelSignal::Disconnected)["type"], "vnc-disconnected");
        let data = tunnel_event(TunnelSignal::Data(b"RFB 003.008\n".to_vec()));
        assert_eq!(data["data"], BASE64.encode(b"RFB 003.008\n"));
        let err = tunnel_event(TunnelSignal::Error("refused".into()));
        assert_eq!(err, json!({"type": "vnc-error", "message": "refused"}));
    }

    #[test]
    fn test_decode_payload() {
        assert_eq!(decode_payload(&json!({"data": "ls\n"})).unwrap(), b"ls\n");
        assert_eq!(
            decode_payload(&json!({"data": "AAEC", "encoding": "base64"})).unwrap(),
            [0, 1, 2]
        );
        assert!(decode_payload(&json!({"data": "!!", "encoding": "base64"})).is_err());
        assert!(decode_payload(&json!({})).is_err());
    }

    #[test]
    fn test_port_field() {
        assert_eq!(port_field(&json!(5900)), Some(5900));
        assert_eq!(port_field(&json!("5901")), Some(5901));
        assert_eq!(port_field(&json!(70000)), None);
        assert_eq!(port_field(&json!("vnc")), None);
        assert_eq!(port_field(&Value::Null), None);
    }

    #[test]
    fn test_error_event_echoes_request_id() {
        let e = error_event("INVALID", "bad", Some("r1"));
        assert_eq!(e["request_id"], "r1");
        assert!(error_event("INVALID", "bad", None).get("request_id").is_none());
    }
}
