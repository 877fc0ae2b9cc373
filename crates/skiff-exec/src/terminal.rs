use std::io::IsTerminal;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossterm::terminal;
use skiff_protocol::TerminalSize;

use crate::error::ExecError;

/// Guard that restores the terminal out of raw mode.
///
/// `restore` is idempotent and may be called from any exit path, including
/// the escape-abort notifier racing against normal teardown; the first call
/// wins and `Drop` covers unwind.
pub struct RawModeGuard {
    active: AtomicBool,
}

impl RawModeGuard {
    pub fn restore(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            let _ = terminal::disable_raw_mode();
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Put local stdin into raw mode.
///
/// Returns [`ExecError::NotATerminal`] when stdin is redirected; callers
/// treat that as "run non-interactively" rather than a fatal error.
pub fn enter_raw_mode() -> Result<Arc<RawModeGuard>, ExecError> {
    if !std::io::stdin().is_terminal() {
        return Err(ExecError::NotATerminal);
    }
    terminal::enable_raw_mode()
        .map_err(|e| ExecError::Setup(format!("failed to enable raw mode: {e}")))?;
    Ok(Arc::new(RawModeGuard {
        active: AtomicBool::new(true),
    }))
}

/// Current terminal geometry of the local output device.
pub fn current_size() -> Result<TerminalSize, ExecError> {
    let (cols, rows) = terminal::size()
        .map_err(|e| ExecError::Setup(format!("failed to read terminal size: {e}")))?;
    Ok(TerminalSize {
        rows: rows as u32,
        cols: cols as u32,
    })
}
