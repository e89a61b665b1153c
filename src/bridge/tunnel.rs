//! Tunnel bridge: a raw, protocol-agnostic TCP relay for one client.
//!
//! The client names a `host`/`port` (typically a VNC server), the bridge
//! opens the connection and then shuttles bytes both ways unmodified. Bytes
//! from the remote arrive as [`TunnelSignal::Data`] in read order; bytes from
//! the client go through [`TunnelBridge::send`].
//!
//! Remote EOF emits [`TunnelSignal::Disconnected`], a socket error emits
//! [`TunnelSignal::Error`]; both leave the bridge `Closed`.
//!
//! The TCP handshake runs without the state lock held, so `state`, `send`
//! and `close` answer immediately while a slow target is still connecting.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::session::{SessionMeta, SessionState};
use super::OUTPUT_CHANNEL_CAPACITY;
use crate::error::GatewayError;

const READ_CHUNK: usize = 16 * 1024;

/// Events pushed to the client side of a tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelSignal {
    Connected,
    Data(Vec<u8>),
    Error(String),
    Disconnected,
}

pub struct TunnelBridge {
    meta: SessionMeta,
    signals: mpsc::Sender<TunnelSignal>,
    connect_timeout: Duration,
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    state: SessionState,
    /// A handshake is in flight. The state stays `Idle` until it lands.
    connecting: bool,
    link: Option<ActiveLink>,
}

struct ActiveLink {
    target: String,
    writer_tx: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl TunnelBridge {
    pub fn new(signals: mpsc::Sender<TunnelSignal>, connect_timeout: Duration) -> Self {
        Self {
            meta: SessionMeta::new(),
            signals,
            connect_timeout,
            inner: Arc::new(Mutex::new(Inner {
                state: SessionState::Idle,
                connecting: false,
                link: None,
            })),
        }
    }

    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// `host:port` of the live connection.
    pub async fn target(&self) -> Option<String> {
        self.inner.lock().await.link.as_ref().map(|l| l.target.clone())
    }

    /// Open the TCP connection. Returns `Ok(false)` when the bridge is not
    /// `Idle`, another connect is in flight, or the bridge was closed before
    /// the handshake finished.
    ///
    /// A failed connect emits [`TunnelSignal::Error`] and leaves the bridge
    /// `Idle`.
    pub async fn connect(&self, host: &str, port: Option<u16>) -> Result<bool, GatewayError> {
        let host = host.trim();
        let port = match port {
            Some(p) if p > 0 && !host.is_empty() => p,
            _ => return Err(GatewayError::InvalidTarget),
        };

        {
            let mut inner = self.inner.lock().await;
            if inner.state != SessionState::Idle || inner.connecting {
                debug!(session = %self.meta.short_id(), state = inner.state.as_str(), "vnc-connect ignored");
                return Ok(false);
            }
            inner.connecting = true;
        }

        let target = format!("{host}:{port}");
        let connected = tokio::time::timeout(self.connect_timeout, TcpStream::connect((host, port))).await;

        let mut inner = self.inner.lock().await;
        inner.connecting = false;
        let outcome = match connected {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("connect timed out after {}ms", self.connect_timeout.as_millis())),
        };
        let stream = match outcome {
            Ok(stream) => stream,
            Err(message) if inner.state == SessionState::Idle => {
                drop(inner);
                return Err(self.connect_failed(&target, message).await);
            }
            Err(message) => {
                debug!(session = %self.meta.short_id(), target = %target, "Connect failed after close: {message}");
                return Ok(false);
            }
        };
        if inner.state != SessionState::Idle {
            debug!(session = %self.meta.short_id(), target = %target, "Closed while connecting, dropping link");
            return Ok(false);
        }
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();

        let cancel = CancellationToken::new();
        let (writer_tx, writer_rx) = mpsc::channel::<Vec<u8>>(OUTPUT_CHANNEL_CAPACITY);
        let _ = self.signals.send(TunnelSignal::Connected).await;

        let read_task = tokio::spawn(pump_remote(
            reader,
            self.signals.clone(),
            cancel.clone(),
            Arc::downgrade(&self.inner),
        ));
        let write_task = tokio::spawn(pump_client(writer, writer_rx, cancel.clone()));

        inner.link = Some(ActiveLink {
            target: target.clone(),
            writer_tx,
            cancel,
            tasks: vec![read_task, write_task],
        });
        inner.state = SessionState::Active;
        info!(session = %self.meta.short_id(), target = %target, "Tunnel connected");
        Ok(true)
    }

    async fn connect_failed(&self, target: &str, message: String) -> GatewayError {
        warn!(session = %self.meta.short_id(), target, "Tunnel connect failed: {message}");
        let _ = self.signals.send(TunnelSignal::Error(message.clone())).await;
        GatewayError::TunnelConnectFailure {
            target: target.to_string(),
            message,
        }
    }

    /// Forward client bytes to the remote. Dropped unless `Active`.
    pub async fn send(&self, data: Vec<u8>) {
        let tx = {
            let inner = self.inner.lock().await;
            match (inner.state, inner.link.as_ref()) {
                (SessionState::Active, Some(link)) => link.writer_tx.clone(),
                _ => return,
            }
        };
        let _ = tx.send(data).await;
    }

    /// Destroy the connection immediately. Idempotent.
    pub async fn close(&self) {
        let link = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                SessionState::Closing | SessionState::Closed => return,
                SessionState::Idle => {
                    inner.state = SessionState::Closed;
                    return;
                }
                SessionState::Active => {
                    inner.state = SessionState::Closing;
                    inner.link.take()
                }
            }
        };

        if let Some(link) = link {
            link.cancel.cancel();
            for task in link.tasks {
                task.abort();
                let _ = task.await;
            }
            info!(session = %self.meta.short_id(), target = %link.target, "Tunnel closed");
        }
        self.inner.lock().await.state = SessionState::Closed;
    }
}

/// Remote → client. Ends the link on EOF or error.
async fn pump_remote(
    mut reader: OwnedReadHalf,
    signals: mpsc::Sender<TunnelSignal>,
    cancel: CancellationToken,
    inner: Weak<Mutex<Inner>>,
) {
    let mut buf = vec![0u8; READ_CHUNK];
    let end = loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            read = reader.read(&mut buf) => match read {
                Ok(0) => break TunnelSignal::Disconnected,
                Ok(n) => {
                    if signals.send(TunnelSignal::Data(buf[..n].to_vec())).await.is_err() {
                        return;
                    }
                }
                Err(e) => break TunnelSignal::Error(e.to_string()),
            }
        }
    };

    let Some(inner) = inner.upgrade() else { return };
    {
        let mut inner = inner.lock().await;
        if inner.state != SessionState::Active {
            return;
        }
        inner.state = SessionState::Closed;
        if let Some(link) = inner.link.take() {
            link.cancel.cancel();
            debug!(target = %link.target, "Tunnel ended by remote");
        }
    }
    let _ = signals.send(end).await;
}

/// Client → remote.
async fn pump_client(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Vec<u8>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(data) => {
                    if let Err(e) = writer.write_all(&data).await {
                        debug!("Tunnel write failed: {e}");
                        break;
                    }
                }
                None => break,
            }
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpSocket};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn bridge() -> (TunnelBridge, mpsc::Receiver<TunnelSignal>) {
        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        (TunnelBridge::new(tx, Duration::from_secs(2)), rx)
    }

    async fn next(rx: &mut mpsc::Receiver<TunnelSignal>) -> TunnelSignal {
        tokio::time::timeout(TIMEOUT, rx.recv())
            .await
            .expect("signal timed out")
            .expect("channel closed")
    }

    async fn echo_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (mut r, mut w) = socket.split();
                    let _ = tokio::io::copy(&mut r, &mut w).await;
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn test_relays_bytes_unmodified() {
        let port = echo_server().await;
        let (bridge, mut rx) = bridge();
        assert!(bridge.connect("127.0.0.1", Some(port)).await.unwrap());
        assert_eq!(next(&mut rx).await, TunnelSignal::Connected);
        assert_eq!(bridge.state().await, SessionState::Active);
        assert_eq!(bridge.target().await.unwrap(), format!("127.0.0.1:{port}"));

        let payload: Vec<u8> = (0..=255u8).cycle().take(40_000).collect();
        bridge.send(payload[..1000].to_vec()).await;
        bridge.send(payload[1000..].to_vec()).await;

        let mut received = Vec::new();
        while received.len() < payload.len() {
            match next(&mut rx).await {
                TunnelSignal::Data(chunk) => received.extend(chunk),
                other => panic!("unexpected signal {other:?}"),
            }
        }
        assert_eq!(received, payload);
        bridge.close().await;
    }

    #[tokio::test]
    async fn test_refused_connect_emits_error_and_stays_idle() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (bridge, mut rx) = bridge();
        let err = bridge.connect("127.0.0.1", Some(port)).await.unwrap_err();
        assert!(matches!(err, GatewayError::TunnelConnectFailure { .. }));
        assert!(matches!(next(&mut rx).await, TunnelSignal::Error(_)));
        assert_eq!(bridge.state().await, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_invalid_target_rejected() {
        let (bridge, mut rx) = bridge();
        for (host, port) in [("", Some(5900)), ("127.0.0.1", None), ("127.0.0.1", Some(0))] {
            let err = bridge.connect(host, port).await.unwrap_err();
            assert!(matches!(err, GatewayError::InvalidTarget));
            assert_eq!(err.to_string(), "Host and port are required");
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(bridge.state().await, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_remote_close_disconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let (bridge, mut rx) = bridge();
        bridge.connect("127.0.0.1", Some(port)).await.unwrap();
        assert_eq!(next(&mut rx).await, TunnelSignal::Connected);
        assert_eq!(next(&mut rx).await, TunnelSignal::Disconnected);
        assert_eq!(bridge.state().await, SessionState::Closed);
        assert!(bridge.target().await.is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let port = echo_server().await;
        let (bridge, mut rx) = bridge();
        bridge.connect("127.0.0.1", Some(port)).await.unwrap();
        assert_eq!(next(&mut rx).await, TunnelSignal::Connected);

        bridge.close().await;
        bridge.close().await;
        assert_eq!(bridge.state().await, SessionState::Closed);

        bridge.send(b"dropped".to_vec()).await;
        assert!(!bridge.connect("127.0.0.1", Some(port)).await.unwrap());
        assert_eq!(bridge.state().await, SessionState::Closed);
    }

    /// Listener with a full accept queue: further handshakes stall.
    async fn stalled_listener() -> (TcpListener, u16, Vec<TcpStream>) {
        let socket = TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let port = socket.local_addr().unwrap().port();
        let listener = socket.listen(0).unwrap();
        let mut fillers = Vec::new();
        for _ in 0..4 {
            let attempt = TcpStream::connect(("127.0.0.1", port));
            if let Ok(Ok(stream)) = tokio::time::timeout(Duration::from_millis(200), attempt).await {
                fillers.push(stream);
            }
        }
        (listener, port, fillers)
    }

    #[tokio::test]
    async fn test_pending_connect_leaves_bridge_responsive() {
        let (_listener, port, _fillers) = stalled_listener().await;
        let (bridge, mut rx) = bridge();
        let bridge = Arc::new(bridge);

        let pending = tokio::spawn({
            let bridge = Arc::clone(&bridge);
            async move { bridge.connect("127.0.0.1", Some(port)).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let state = tokio::time::timeout(Duration::from_millis(200), bridge.state())
            .await
            .expect("state() waited on the handshake");
        assert_ne!(state, SessionState::Closed);
        assert!(!bridge.connect("127.0.0.1", Some(port)).await.unwrap());

        tokio::time::timeout(Duration::from_millis(200), bridge.close())
            .await
            .expect("close() waited on the handshake");
        assert_eq!(bridge.state().await, SessionState::Closed);

        // Whatever the handshake's outcome, the closed bridge never goes live.
        let _ = tokio::time::timeout(TIMEOUT, pending).await.unwrap().unwrap();
        assert_eq!(bridge.state().await, SessionState::Closed);
        assert!(bridge.target().await.is_none());
        while let Ok(signal) = rx.try_recv() {
            assert!(!matches!(signal, TunnelSignal::Error(_)), "{signal:?}");
        }
    }
}
