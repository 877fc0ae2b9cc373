use futures_util::{SinkExt, StreamExt};
use skiff_protocol::{ExecFrame, Request, Response, TerminalSize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::AgentClient;
use crate::error::ExecError;

/// Exit code reported when the session is torn down locally (signal or
/// escape sequence) before the remote command reports its own status.
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

const STDIN_CHUNK: usize = 4096;
const OUTBOUND_QUEUE: usize = 32;

/// Lifecycle of one exec session. `Closed` is terminal; a session is never
/// reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Attaching,
    Active,
    ClosingLocal,
    ClosingRemote,
    Closed,
}

/// Validated parameters of one exec invocation. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub alloc_id: String,
    pub task: String,
    pub action: String,
    pub args: Vec<String>,
    pub tty: bool,
    pub stdin_enabled: bool,
    pub escape_char: Option<u8>,
}

impl ExecRequest {
    pub fn validate(&self) -> Result<(), ExecError> {
        if self.tty && !self.stdin_enabled {
            return Err(ExecError::Validation(
                "-i must be enabled when running with a tty".to_string(),
            ));
        }
        Ok(())
    }
}

/// One interactive execution: wires the prepared stdin/stdout/stderr, the
/// resize channel and the cancellation token into a single multiplexed
/// exchange with the agent.
///
/// The session does not manage terminal mode; when the request is
/// interactive the caller has already entered raw mode, started the resize
/// watcher and wrapped stdin in the escape scanner.
pub struct ExecSession {
    state: SessionState,
    token: CancellationToken,
}

impl ExecSession {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            state: SessionState::Idle,
            token,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Cancellation token shared with the signal bridge and the escape
    /// notifier. Firing it is idempotent and is the only local shutdown
    /// path.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Open the exec exchange and pump until the remote command exits, the
    /// agent reports an error, or the token fires. Returns the remote exit
    /// code, or [`EXIT_CODE_INTERRUPTED`] when cancelled before one
    /// arrived.
    pub async fn open<I, O, E>(
        &mut self,
        mut client: AgentClient,
        request: &ExecRequest,
        stdin: I,
        stdout: &mut O,
        stderr: &mut E,
        size_rx: mpsc::Receiver<TerminalSize>,
    ) -> Result<i32, ExecError>
    where
        I: AsyncRead + Unpin + Send + 'static,
        O: AsyncWrite + Unpin,
        E: AsyncWrite + Unpin,
    {
        if self.state != SessionState::Idle {
            return Err(ExecError::Session("session already used".to_string()));
        }
        self.state = SessionState::Attaching;

        match client
            .request(&Request::Exec {
                alloc_id: request.alloc_id.clone(),
                task: request.task.clone(),
                action: request.action.clone(),
                args: request.args.clone(),
                tty: request.tty,
            })
            .await
        {
            Ok(Response::Ok { .. }) => {}
            Ok(Response::Error { message, .. }) => {
                self.state = SessionState::Closed;
                return Err(ExecError::Session(message));
            }
            Err(e) => {
                self.state = SessionState::Closed;
                return Err(e);
            }
        }
        self.state = SessionState::Active;
        debug!(
            alloc_id = %request.alloc_id,
            task = %request.task,
            action = %request.action,
            "exec session active"
        );

        let (mut frames_in, frames_out) = client.into_exec_stream();
        let (out_tx, out_rx) = mpsc::channel::<ExecFrame>(OUTBOUND_QUEUE);

        let bridge = spawn_signal_bridge(self.token.clone())?;
        let writer = spawn_frame_writer(frames_out, out_rx);
        let stdin_pump = spawn_stdin_pump(stdin, out_tx.clone(), self.token.clone());
        let resize_pump = spawn_resize_pump(size_rx, out_tx, self.token.clone());

        let result = loop {
            tokio::select! {
                // remote completion takes precedence over a racing
                // cancellation whenever its frame is already readable
                biased;

                frame = frames_in.next() => match frame {
                    Some(Ok(line)) => match serde_json::from_str::<ExecFrame>(&line) {
                        Ok(ExecFrame::Stdout { data }) => {
                            if let Err(e) = forward(stdout, &data).await {
                                break Err(e.into());
                            }
                        }
                        Ok(ExecFrame::Stderr { data }) => {
                            if let Err(e) = forward(stderr, &data).await {
                                break Err(e.into());
                            }
                        }
                        Ok(ExecFrame::Exited { code }) => {
                            self.state = SessionState::ClosingRemote;
                            break Ok(code);
                        }
                        Ok(ExecFrame::Error { message }) => {
                            self.state = SessionState::ClosingRemote;
                            break Err(ExecError::Session(message));
                        }
                        Ok(other) => {
                            debug!(?other, "ignoring unexpected frame from agent");
                        }
                        Err(e) => {
                            break Err(ExecError::Protocol(format!("malformed frame: {e}")));
                        }
                    },
                    Some(Err(e)) => break Err(e.into()),
                    None => {
                        break Err(ExecError::Session(
                            "agent closed the exec stream before reporting an exit status"
                                .to_string(),
                        ));
                    }
                },

                _ = self.token.cancelled() => {
                    self.state = SessionState::ClosingLocal;
                    debug!("session cancelled locally");
                    break Ok(EXIT_CODE_INTERRUPTED);
                }
            }
        };

        // Stop the pumps; dropping the writer closes our side of the
        // stream, which the agent treats as teardown.
        stdin_pump.abort();
        resize_pump.abort();
        writer.abort();
        bridge.abort();
        self.state = SessionState::Closed;
        result
    }
}

async fn forward<W: AsyncWrite + Unpin>(w: &mut W, data: &[u8]) -> std::io::Result<()> {
    w.write_all(data).await?;
    w.flush().await
}

/// Bridge process-level interrupt/terminate onto the session token.
/// Registered at session start, aborted at session end; never consulted as
/// ambient state elsewhere.
fn spawn_signal_bridge(token: CancellationToken) -> Result<JoinHandle<()>, ExecError> {
    let mut interrupt = signal(SignalKind::interrupt())
        .map_err(|e| ExecError::Setup(format!("failed to register SIGINT handler: {e}")))?;
    let mut terminate = signal(SignalKind::terminate())
        .map_err(|e| ExecError::Setup(format!("failed to register SIGTERM handler: {e}")))?;

    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        debug!("received termination signal, closing session");
        token.cancel();
    }))
}

fn spawn_frame_writer(
    mut sink: crate::client::FrameWriter,
    mut out_rx: mpsc::Receiver<ExecFrame>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let Ok(line) = serde_json::to_string(&frame) else {
                break;
            };
            if sink.send(line).await.is_err() {
                break;
            }
        }
    })
}

fn spawn_stdin_pump<I>(
    mut stdin: I,
    out_tx: mpsc::Sender<ExecFrame>,
    token: CancellationToken,
) -> JoinHandle<()>
where
    I: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; STDIN_CHUNK];
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                read = stdin.read(&mut buf) => match read {
                    Ok(0) => {
                        let _ = out_tx.send(ExecFrame::StdinClosed).await;
                        break;
                    }
                    Ok(n) => {
                        let frame = ExecFrame::Stdin {
                            data: buf[..n].to_vec(),
                        };
                        if out_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("stdin read failed: {e}");
                        break;
                    }
                },
            }
        }
    })
}

fn spawn_resize_pump(
    mut size_rx: mpsc::Receiver<TerminalSize>,
    out_tx: mpsc::Sender<ExecFrame>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                size = size_rx.recv() => match size {
                    Some(s) => {
                        let frame = ExecFrame::Resize {
                            rows: s.rows,
                            cols: s.cols,
                        };
                        if out_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    })
}
