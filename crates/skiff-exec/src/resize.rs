use skiff_protocol::TerminalSize;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::ExecError;
use crate::terminal;

/// Watches the local terminal for dimension changes and forwards them on a
/// bounded channel. The channel has capacity 1: only the latest geometry
/// matters, so a full channel drops the update instead of blocking the
/// watcher.
pub struct ResizeWatcher {
    handle: JoinHandle<()>,
}

impl ResizeWatcher {
    /// Registers for SIGWINCH and sends the current size immediately. The
    /// channel is empty at registration, so the initial size is always
    /// delivered; the remote side has a starting geometry before any
    /// resize occurs.
    pub fn spawn(tx: mpsc::Sender<TerminalSize>) -> Result<Self, ExecError> {
        let initial = terminal::current_size()?;
        if tx.try_send(initial).is_err() {
            return Err(ExecError::Setup(
                "resize channel rejected the initial terminal size".to_string(),
            ));
        }

        let mut winch = signal(SignalKind::window_change())
            .map_err(|e| ExecError::Setup(format!("failed to register SIGWINCH handler: {e}")))?;

        let handle = tokio::spawn(async move {
            while winch.recv().await.is_some() {
                let Ok(size) = terminal::current_size() else {
                    continue;
                };
                if !offer(&tx, size) {
                    break;
                }
            }
        });

        Ok(Self { handle })
    }

    /// Deregisters the watcher. No size events are delivered afterwards.
    pub fn stop(self) {}
}

impl Drop for ResizeWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Non-blocking send with drop-latest semantics. Returns false once the
/// consumer is gone.
fn offer(tx: &mpsc::Sender<TerminalSize>, size: TerminalSize) -> bool {
    match tx.try_send(size) {
        Ok(()) => {
            trace!(rows = size.rows, cols = size.cols, "forwarded resize");
            true
        }
        Err(TrySendError::Full(_)) => {
            debug!("resize channel full, dropping update");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}
