use std::io::IsTerminal;

use anyhow::bail;
use skiff_exec::{
    AgentClient, EscapeScanner, ExecError, ExecRequest, ExecSession, ResizeWatcher, resolve,
    terminal,
};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// `skiff action`: run a predefined action inside the environment of an
/// allocation's task, attaching the local terminal when interactive.
#[derive(clap::Args)]
pub struct ActionArgs {
    /// Job in which the action is defined
    #[arg(long)]
    pub job: String,

    /// Allocation ID or unique prefix. When omitted, a random allocation
    /// is picked from --group
    #[arg(long)]
    pub allocation: Option<String>,

    /// Task group to pick an allocation from (required without
    /// --allocation)
    #[arg(long)]
    pub group: Option<String>,

    /// Task in which the action is defined
    #[arg(long)]
    pub task: Option<String>,

    /// Pass stdin to the remote command; -i=false to disable
    #[arg(
        short = 'i',
        long = "stdin",
        default_value_t = true,
        action = clap::ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub stdin: bool,

    /// Allocate a pseudo-terminal; defaults to true when local stdin is a
    /// terminal
    #[arg(
        short = 't',
        long = "tty",
        action = clap::ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub tty: Option<bool>,

    /// Escape character for pty sessions, or "none" to disable
    #[arg(short = 'e', long = "escape", default_value = "~")]
    pub escape: String,

    /// Action name
    pub action: String,

    /// Extra arguments passed to the action command
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

pub async fn action(args: ActionArgs) -> anyhow::Result<i32> {
    let tty = args
        .tty
        .unwrap_or_else(|| std::io::stdin().is_terminal());

    if tty && !args.stdin {
        bail!("-i must be enabled when running with a tty");
    }

    let escape_char = parse_escape_char(&args.escape)?;

    if args.allocation.is_none() {
        if args.group.is_none() {
            bail!("a group name is required when no allocation is provided");
        }
        if args.task.is_none() {
            bail!("a task name is required when no allocation is provided");
        }
    }

    let mut client = AgentClient::connect().await?;

    let alloc = if let Some(prefix) = &args.allocation {
        resolve::resolve_alloc(&mut client, prefix).await?
    } else {
        // group presence was checked above
        let group = args.group.as_deref().unwrap_or_default();
        resolve::random_job_alloc(&mut client, &args.job, group).await?
    };

    let task = resolve::resolve_task(&alloc, args.task.as_deref())?;

    let request = ExecRequest {
        alloc_id: alloc.id,
        task,
        action: args.action,
        args: args.args,
        tty,
        stdin_enabled: args.stdin,
        escape_char,
    };
    request.validate()?;

    run_session(client, request).await
}

/// Compose terminal setup (only when interactive), open the session, and
/// release scoped resources in reverse acquisition order on every exit
/// path.
async fn run_session(client: AgentClient, mut request: ExecRequest) -> anyhow::Result<i32> {
    let mut session = ExecSession::new(CancellationToken::new());
    let (size_tx, size_rx) = mpsc::channel(1);

    let mut stdin: Box<dyn AsyncRead + Send + Unpin> = if request.stdin_enabled {
        Box::new(tokio::io::stdin())
    } else {
        Box::new(tokio::io::empty())
    };

    let mut raw_guard = None;
    let mut watcher = None;

    if request.tty {
        match terminal::enter_raw_mode() {
            Ok(guard) => {
                watcher = Some(ResizeWatcher::spawn(size_tx.clone())?);

                if let Some(esc) = request.escape_char {
                    let abort_guard = guard.clone();
                    let abort_token = session.token();
                    let notifier = move || {
                        // leave raw mode first so the notice lands at the
                        // start of a line
                        abort_guard.restore();
                        eprintln!("\nConnection closed");
                        abort_token.cancel();
                        true
                    };
                    stdin = Box::new(EscapeScanner::new(stdin, Some(esc), notifier));
                }

                raw_guard = Some(guard);
            }
            Err(ExecError::NotATerminal) => {
                debug!("stdin is not a terminal, running non-interactively");
                request.tty = false;
            }
            Err(e) => return Err(e.into()),
        }
    }
    drop(size_tx);

    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    let result = session
        .open(client, &request, stdin, &mut stdout, &mut stderr, size_rx)
        .await;

    // reverse acquisition order; both releases are idempotent against the
    // escape notifier having fired first
    if let Some(watcher) = watcher {
        watcher.stop();
    }
    if let Some(guard) = raw_guard {
        guard.restore();
    }

    Ok(result?)
}

fn parse_escape_char(raw: &str) -> anyhow::Result<Option<u8>> {
    if raw == "none" {
        return Ok(None);
    }
    let mut bytes = raw.bytes();
    match (bytes.next(), bytes.next()) {
        (Some(b), None) => Ok(Some(b)),
        _ => bail!("-e requires 'none' or a single character"),
    }
}
