//! Interactive exec sessions against the skiff agent: terminal raw-mode
//! control, resize watching, in-band escape detection, and the multiplexed
//! stdin/stdout/stderr exchange.

pub mod client;
pub mod error;
pub mod escape;
pub mod resize;
pub mod resolve;
pub mod session;
pub mod terminal;

#[cfg(test)]
mod testutil;

pub use client::AgentClient;
pub use error::ExecError;
pub use escape::{AbortNotifier, EscapeScanner};
pub use resize::ResizeWatcher;
pub use session::{EXIT_CODE_INTERRUPTED, ExecRequest, ExecSession, SessionState};
pub use terminal::RawModeGuard;
