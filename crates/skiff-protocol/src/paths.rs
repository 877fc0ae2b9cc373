use std::path::PathBuf;

/// Returns the socket path of the local skiff agent.
///
/// `SKIFF_AGENT_SOCKET` overrides the default, which lives in the user's
/// runtime directory.
pub fn default_socket_path() -> PathBuf {
    if let Ok(path) = std::env::var("SKIFF_AGENT_SOCKET") {
        PathBuf::from(path)
    } else if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("skiff-agent.sock")
    } else {
        // SAFETY: getuid() is always safe to call and has no preconditions
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/skiff-agent-{uid}.sock"))
    }
}
