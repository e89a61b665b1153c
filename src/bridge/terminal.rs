//! Terminal bridge: one interactive shell on a PTY, streamed to one client.
//!
//! ## Lifecycle
//!
//! - [`TerminalBridge::start`] spawns the shell (`Idle → Active`). Calling it
//!   again is a no-op, so a bridge never owns more than one process.
//! - [`TerminalBridge::input`] / [`TerminalBridge::resize`] act on the live
//!   process and are dropped in any other state.
//! - [`TerminalBridge::close`] SIGKILLs the process group, reaps the child and
//!   releases the PTY (`Active → Closing → Closed`). Idempotent.
//! - If the shell exits by itself the bridge goes straight to `Closed`, once
//!   the output it wrote before exiting has been delivered.
//!
//! ## Tasks
//!
//! Three background tasks per live shell: a writer (input channel → PTY
//! master), a reader (PTY master → output channel, in the order the bytes were
//! produced) and an exit watcher that owns the [`Child`] and the reader's
//! handle.

use std::os::fd::OwnedFd;
use std::sync::{Arc, Weak};
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::session::{SessionMeta, SessionState};
use crate::error::GatewayError;
use crate::shell::pty::{allocate_pty, resize_pty, spawn_shell_pty, PtyPair};
use crate::shell::ShellSpec;

/// Bytes per read from the PTY master.
const READ_CHUNK: usize = 4096;

/// How long a naturally exited shell's output may keep draining. Background
/// jobs can hold the PTY open past the shell itself.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// A terminal session bound to one client channel.
pub struct TerminalBridge {
    meta: SessionMeta,
    spec: ShellSpec,
    output: mpsc::Sender<Vec<u8>>,
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    state: SessionState,
    shell: Option<RunningShell>,
}

/// Resources owned while `Active`.
struct RunningShell {
    pid: u32,
    /// Kept for resize; the reader and writer hold their own dups.
    master: OwnedFd,
    stdin_tx: mpsc::Sender<Vec<u8>>,
    kill_tx: Option<oneshot::Sender<()>>,
    watcher: Option<JoinHandle<()>>,
    writer: JoinHandle<()>,
}

impl TerminalBridge {
    /// Create an idle bridge. Output chunks are pushed into `output`.
    pub fn new(spec: ShellSpec, output: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            meta: SessionMeta::new(),
            spec,
            output,
            inner: Arc::new(Mutex::new(Inner {
                state: SessionState::Idle,
                shell: None,
            })),
        }
    }

    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// PID of the live shell, if any.
    pub async fn pid(&self) -> Option<u32> {
        self.inner.lock().await.shell.as_ref().map(|s| s.pid)
    }

    /// Spawn the shell. Returns `Ok(false)` when the bridge is not `Idle`.
    ///
    /// On failure the bridge stays `Idle`.
    pub async fn start(&self) -> Result<bool, GatewayError> {
        let mut inner = self.inner.lock().await;
        if inner.state != SessionState::Idle {
            debug!(session = %self.meta.short_id(), state = inner.state.as_str(), "start-terminal ignored");
            return Ok(false);
        }

        let pty = allocate_pty(self.spec.rows, self.spec.cols)
            .map_err(|e| GatewayError::ProcessSpawnFailure(format!("Failed to allocate PTY: {e}")))?;
        let child = spawn_shell_pty(&pty, &self.spec).map_err(|e| {
            GatewayError::ProcessSpawnFailure(format!("{}: {e}", self.spec.program))
        })?;
        // Only the child may hold the slave, or the master never sees EOF.
        let PtyPair { master, slave } = pty;
        drop(slave);

        let pid = child.id().unwrap_or(0);
        let (writer, reader) = match (master.try_clone(), master.try_clone()) {
            (Ok(w), Ok(r)) => (
                tokio::fs::File::from_std(std::fs::File::from(w)),
                tokio::fs::File::from_std(std::fs::File::from(r)),
            ),
            (Err(e), _) | (_, Err(e)) => {
                // `child` is kill_on_drop.
                return Err(GatewayError::ProcessSpawnFailure(format!(
                    "dup() failed for PTY master: {e}"
                )));
            }
        };

        let sid = self.meta.short_id().to_string();

        let (stdin_tx, mut stdin_rx) = mpsc::channel::<Vec<u8>>(64);
        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(data) = stdin_rx.recv().await {
                if writer.write_all(&data).await.is_err() {
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
        });

        let output = self.output.clone();
        let sid_out = sid.clone();
        let reader_task = tokio::spawn(async move {
            let mut reader = reader;
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if output.send(buf[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(session = %sid_out, "PTY output closed");
        });

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let watcher = tokio::spawn(watch_exit(
            child,
            pid,
            kill_rx,
            reader_task,
            Arc::downgrade(&self.inner),
            sid.clone(),
        ));

        inner.shell = Some(RunningShell {
            pid,
            master,
            stdin_tx,
            kill_tx: Some(kill_tx),
            watcher: Some(watcher),
            writer: writer_task,
        });
        inner.state = SessionState::Active;
        info!(session = %sid, pid, shell = %self.spec.program, "Terminal started");
        Ok(true)
    }

    /// Write raw bytes to the shell. Dropped unless `Active`.
    pub async fn input(&self, data: Vec<u8>) {
        let tx = {
            let inner = self.inner.lock().await;
            match (inner.state, inner.shell.as_ref()) {
                (SessionState::Active, Some(shell)) => shell.stdin_tx.clone(),
                _ => return,
            }
        };
        let _ = tx.send(data).await;
    }

    /// Resize the PTY window. Dropped unless `Active`.
    pub async fn resize(&self, cols: u16, rows: u16) {
        if cols == 0 || rows == 0 {
            return;
        }
        let inner = self.inner.lock().await;
        if let (SessionState::Active, Some(shell)) = (inner.state, inner.shell.as_ref()) {
            if let Err(e) = resize_pty(&shell.master, rows, cols) {
                warn!(session = %self.meta.short_id(), "PTY resize failed: {e}");
            }
        }
    }

    /// Kill the shell and release the PTY. Idempotent.
    pub async fn close(&self) {
        let shell = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                SessionState::Closing | SessionState::Closed => return,
                SessionState::Idle => {
                    inner.state = SessionState::Closed;
                    return;
                }
                SessionState::Active => {
                    inner.state = SessionState::Closing;
                    inner.shell.take()
                }
            }
        };

        if let Some(mut shell) = shell {
            if let Some(tx) = shell.kill_tx.take() {
                let _ = tx.send(());
            }
            // The watcher reaps the child before finishing.
            if let Some(watcher) = shell.watcher.take() {
                let _ = watcher.await;
            }
            shell.writer.abort();
            info!(session = %self.meta.short_id(), pid = shell.pid, "Terminal closed");
        }

        self.inner.lock().await.state = SessionState::Closed;
    }
}

/// Own the child until it exits or a kill is requested.
///
/// A dropped bridge drops `kill_tx`, which also counts as a kill request.
/// After a natural exit the reader runs to EOF before the bridge is marked
/// `Closed`; after a kill it is aborted.
async fn watch_exit(
    mut child: Child,
    pid: u32,
    kill_rx: oneshot::Receiver<()>,
    mut reader: JoinHandle<()>,
    inner: Weak<Mutex<Inner>>,
    sid: String,
) {
    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(s) => info!(session = %sid, code = s.code().unwrap_or(-1), "Shell exited"),
                Err(e) => warn!(session = %sid, "Shell wait error: {e}"),
            }
            if tokio::time::timeout(OUTPUT_DRAIN_GRACE, &mut reader).await.is_err() {
                debug!(session = %sid, "PTY still open after shell exit");
                reader.abort();
            }
            if let Some(inner) = inner.upgrade() {
                let mut inner = inner.lock().await;
                if inner.state == SessionState::Active {
                    inner.state = SessionState::Closed;
                    if let Some(shell) = inner.shell.take() {
                        shell.writer.abort();
                    }
                }
            }
        }
        _ = kill_rx => {
            kill_group(pid);
            let _ = child.kill().await;
            reader.abort();
        }
    }
}

/// SIGKILL the shell's process group (the shell is a session leader).
fn kill_group(pid: u32) {
    let Ok(raw) = i32::try_from(pid) else { return };
    if raw <= 0 {
        return;
    }
    if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        debug!(pid, "killpg failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn sh_spec() -> ShellSpec {
        let mut env = HashMap::new();
        env.insert("TERM".to_string(), "dumb".to_string());
        env.insert("PS1".to_string(), "$ ".to_string());
        ShellSpec {
            program: "/bin/sh".to_string(),
            working_dir: "/".to_string(),
            cols: 80,
            rows: 30,
            env,
        }
    }

    fn bridge() -> (TerminalBridge, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(256);
        (TerminalBridge::new(sh_spec(), tx), rx)
    }

    /// Collect output until `needle` appears or the deadline passes.
    async fn read_until(rx: &mut mpsc::Receiver<Vec<u8>>, needle: &str) -> String {
        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while !String::from_utf8_lossy(&seen).contains(needle) {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(chunk)) => seen.extend_from_slice(&chunk),
                Ok(None) | Err(_) => break,
            }
        }
        String::from_utf8_lossy(&seen).into_owned()
    }

    fn process_alive(pid: u32) -> bool {
        nix::sys::signal::kill(Pid::from_raw(i32::try_from(pid).unwrap()), None).is_ok()
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (bridge, _rx) = bridge();
        assert_eq!(bridge.state().await, SessionState::Idle);
        assert!(bridge.start().await.unwrap());
        let pid = bridge.pid().await.unwrap();
        assert!(!bridge.start().await.unwrap());
        assert_eq!(bridge.pid().await, Some(pid));
        assert_eq!(bridge.state().await, SessionState::Active);
        bridge.close().await;
    }

    #[tokio::test]
    async fn test_echo_reaches_output() {
        let (bridge, mut rx) = bridge();
        bridge.start().await.unwrap();
        bridge.input(b"echo hi\n".to_vec()).await;
        assert!(read_until(&mut rx, "hi").await.contains("hi"));

        // The PTY echoes input, so also check something only the shell prints.
        bridge.input(b"echo $((40+2))\n".to_vec()).await;
        assert!(read_until(&mut rx, "42").await.contains("42"));
        bridge.close().await;
    }

    #[tokio::test]
    async fn test_resize_changes_geometry() {
        let (bridge, mut rx) = bridge();
        bridge.start().await.unwrap();
        bridge.resize(132, 50).await;
        bridge.input(b"stty size\n".to_vec()).await;
        assert!(read_until(&mut rx, "50 132").await.contains("50 132"));
        bridge.close().await;
    }

    #[tokio::test]
    async fn test_close_kills_process() {
        let (bridge, _rx) = bridge();
        bridge.start().await.unwrap();
        let pid = bridge.pid().await.unwrap();
        assert!(process_alive(pid));

        bridge.close().await;
        assert_eq!(bridge.state().await, SessionState::Closed);
        assert!(bridge.pid().await.is_none());
        assert!(!process_alive(pid));

        // Idempotent, and a closed bridge never restarts.
        bridge.close().await;
        assert!(!bridge.start().await.unwrap());
        assert_eq!(bridge.state().await, SessionState::Closed);
    }

    #[tokio::test]
    async fn test_input_and_resize_dropped_while_idle() {
        let (bridge, mut rx) = bridge();
        bridge.input(b"echo nope\n".to_vec()).await;
        bridge.resize(100, 40).await;
        assert_eq!(bridge.state().await, SessionState::Idle);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_spawn_failure_stays_idle() {
        let (tx, _rx) = mpsc::channel(8);
        let spec = ShellSpec {
            program: "/nonexistent/shell".to_string(),
            ..sh_spec()
        };
        let bridge = TerminalBridge::new(spec, tx);
        let err = bridge.start().await.unwrap_err();
        assert!(matches!(err, GatewayError::ProcessSpawnFailure(_)));
        assert_eq!(bridge.state().await, SessionState::Idle);
        assert!(bridge.pid().await.is_none());
    }

    #[tokio::test]
    async fn test_shell_exit_closes_bridge() {
        let (bridge, _rx) = bridge();
        bridge.start().await.unwrap();
        bridge.input(b"exit\n".to_vec()).await;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while bridge.state().await != SessionState::Closed {
            assert!(tokio::time::Instant::now() < deadline, "shell did not exit");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(bridge.pid().await.is_none());
    }

    #[tokio::test]
    async fn test_output_written_just_before_exit_is_delivered() {
        for _ in 0..5 {
            let (bridge, mut rx) = bridge();
            bridge.start().await.unwrap();
            // The echoed command line reads `EN''D$((6*7))`, never the result.
            bridge
                .input(b"seq 1 3000 | tr -d '\\n'; echo; echo EN''D$((6*7)); exit\n".to_vec())
                .await;

            let mut seen = Vec::new();
            let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
            while bridge.state().await != SessionState::Closed {
                assert!(tokio::time::Instant::now() < deadline, "shell did not exit");
                while let Ok(chunk) = rx.try_recv() {
                    seen.extend_from_slice(&chunk);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            while let Ok(chunk) = rx.try_recv() {
                seen.extend_from_slice(&chunk);
            }
            assert!(String::from_utf8_lossy(&seen).contains("END42"));
        }
    }
}
