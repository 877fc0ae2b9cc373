use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use assert_cmd::Command;
use predicates::prelude::*;
use skiff_protocol::{AllocStub, Allocation, ErrorCode, ExecFrame, Request, Response, TaskInfo};

fn spawn_scripted_agent<F>(socket_path: PathBuf, handler: F) -> thread::JoinHandle<Result<()>>
where
    F: FnOnce(&mut BufReader<UnixStream>, &mut BufWriter<UnixStream>) -> Result<()>
        + Send
        + 'static,
{
    thread::spawn(move || {
        if socket_path.exists() {
            let _ = fs::remove_file(&socket_path);
        }

        let listener =
            UnixListener::bind(&socket_path).with_context(|| "failed to bind mock socket")?;
        let (stream, _) = listener.accept().context("failed to accept client")?;
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .context("failed to set read timeout")?;

        let read_half = stream.try_clone().context("failed to clone stream")?;
        let mut reader = BufReader::new(read_half);
        let mut writer = BufWriter::new(stream);
        handler(&mut reader, &mut writer)
    })
}

fn read_request(reader: &mut BufReader<UnixStream>) -> Result<Request> {
    let mut line = String::new();
    let n = reader.read_line(&mut line)?;
    if n == 0 {
        bail!("client disconnected before request");
    }
    Ok(serde_json::from_str(line.trim_end())?)
}

fn write_response(writer: &mut BufWriter<UnixStream>, resp: &Response) -> Result<()> {
    writeln!(writer, "{}", serde_json::to_string(resp)?)?;
    writer.flush()?;
    Ok(())
}

fn write_ok(writer: &mut BufWriter<UnixStream>, data: serde_json::Value) -> Result<()> {
    write_response(writer, &Response::Ok { data: Some(data) })
}

fn write_frame(writer: &mut BufWriter<UnixStream>, frame: &ExecFrame) -> Result<()> {
    writeln!(writer, "{}", serde_json::to_string(frame)?)?;
    writer.flush()?;
    Ok(())
}

/// Drain client frames until stdin closes or the client disconnects.
fn drain_stdin_frames(reader: &mut BufReader<UnixStream>) -> Result<()> {
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            return Ok(());
        }
        let frame: ExecFrame = serde_json::from_str(line.trim_end())?;
        if frame == ExecFrame::StdinClosed {
            return Ok(());
        }
    }
}

fn stub(id: &str) -> AllocStub {
    AllocStub {
        id: id.to_string(),
        name: "web.api[0]".to_string(),
        job_id: "web".to_string(),
        task_group: "api".to_string(),
        client_status: "running".to_string(),
    }
}

fn alloc(id: &str, tasks: &[&str]) -> Allocation {
    Allocation {
        id: id.to_string(),
        name: "web.api[0]".to_string(),
        job_id: "web".to_string(),
        task_group: "api".to_string(),
        client_status: "running".to_string(),
        tasks: tasks
            .iter()
            .map(|t| TaskInfo {
                name: t.to_string(),
            })
            .collect(),
    }
}

fn skiff(socket: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("skiff").unwrap();
    cmd.env("SKIFF_AGENT_SOCKET", socket);
    cmd
}

#[test]
fn tty_without_stdin_is_a_validation_error() {
    // no agent needed: validation fails before any connection
    let dir = tempfile::tempdir().unwrap();
    skiff(&dir.path().join("none.sock"))
        .args([
            "action", "--job", "web", "--allocation", "abc", "-t", "true", "-i", "false", "ping",
        ])
        .write_stdin("")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("-i must be enabled"));
}

#[test]
fn multi_char_escape_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    skiff(&dir.path().join("none.sock"))
        .args([
            "action", "--job", "web", "--allocation", "abc", "-e", "ab", "ping",
        ])
        .write_stdin("")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("'none' or a single character"));
}

#[test]
fn group_and_task_are_required_without_allocation() {
    let dir = tempfile::tempdir().unwrap();
    skiff(&dir.path().join("none.sock"))
        .args(["action", "--job", "web", "ping"])
        .write_stdin("")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("group name is required"));

    skiff(&dir.path().join("none.sock"))
        .args(["action", "--job", "web", "--group", "api", "ping"])
        .write_stdin("")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("task name is required"));
}

#[test]
fn action_runs_end_to_end_against_group_target() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("agent.sock");

    let agent = spawn_scripted_agent(socket.clone(), |reader, writer| {
        match read_request(reader)? {
            Request::JobAllocs { job_id, group } => {
                assert_eq!(job_id, "web");
                assert_eq!(group, "api");
            }
            other => bail!("expected JobAllocs, got {other:?}"),
        }
        write_ok(writer, serde_json::to_value(vec![stub("abc123")])?)?;

        match read_request(reader)? {
            Request::AllocInfo { alloc_id } => assert_eq!(alloc_id, "abc123"),
            other => bail!("expected AllocInfo, got {other:?}"),
        }
        write_ok(writer, serde_json::to_value(alloc("abc123", &["server"]))?)?;

        match read_request(reader)? {
            Request::Exec {
                alloc_id,
                task,
                action,
                tty,
                ..
            } => {
                assert_eq!(alloc_id, "abc123");
                assert_eq!(task, "server");
                assert_eq!(action, "ping");
                assert!(!tty);
            }
            other => bail!("expected Exec, got {other:?}"),
        }
        write_ok(writer, serde_json::json!({}))?;

        drain_stdin_frames(reader)?;
        write_frame(
            writer,
            &ExecFrame::Stdout {
                data: b"pong\n".to_vec(),
            },
        )?;
        write_frame(writer, &ExecFrame::Exited { code: 0 })?;
        Ok(())
    });

    skiff(&socket)
        .args([
            "action", "--job", "web", "--group", "api", "--task", "server", "ping",
        ])
        .write_stdin("")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("pong"));

    agent.join().unwrap().unwrap();
}

#[test]
fn remote_exit_code_is_propagated() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("agent.sock");

    let agent = spawn_scripted_agent(socket.clone(), |reader, writer| {
        read_request(reader)?; // AllocList
        write_ok(writer, serde_json::to_value(vec![stub("abc123")])?)?;
        read_request(reader)?; // AllocInfo
        write_ok(writer, serde_json::to_value(alloc("abc123", &["server"]))?)?;
        read_request(reader)?; // Exec
        write_ok(writer, serde_json::json!({}))?;
        drain_stdin_frames(reader)?;
        write_frame(writer, &ExecFrame::Exited { code: 3 })?;
        Ok(())
    });

    skiff(&socket)
        .args(["action", "--job", "web", "--allocation", "abc1", "ping"])
        .write_stdin("")
        .assert()
        .code(3);

    agent.join().unwrap().unwrap();
}

#[test]
fn error_frame_prints_message_and_exits_1() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("agent.sock");

    let agent = spawn_scripted_agent(socket.clone(), |reader, writer| {
        read_request(reader)?;
        write_ok(writer, serde_json::to_value(vec![stub("abc123")])?)?;
        read_request(reader)?;
        write_ok(writer, serde_json::to_value(alloc("abc123", &["server"]))?)?;
        read_request(reader)?;
        write_ok(writer, serde_json::json!({}))?;
        drain_stdin_frames(reader)?;
        write_frame(
            writer,
            &ExecFrame::Error {
                message: "task not running".to_string(),
            },
        )?;
        Ok(())
    });

    skiff(&socket)
        .args(["action", "--job", "web", "--allocation", "abc1", "ping"])
        .write_stdin("")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("task not running"));

    agent.join().unwrap().unwrap();
}

#[test]
fn ambiguous_allocation_prefix_lists_candidates() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("agent.sock");

    let agent = spawn_scripted_agent(socket.clone(), |reader, writer| {
        read_request(reader)?;
        write_ok(
            writer,
            serde_json::to_value(vec![stub("abc123"), stub("abc789")])?,
        )?;
        Ok(())
    });

    skiff(&socket)
        .args(["action", "--job", "web", "--allocation", "abc", "ping"])
        .write_stdin("")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("abc123").and(predicate::str::contains("abc789")));

    agent.join().unwrap().unwrap();
}

#[test]
fn rejected_exec_reports_agent_message() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("agent.sock");

    let agent = spawn_scripted_agent(socket.clone(), |reader, writer| {
        read_request(reader)?;
        write_ok(writer, serde_json::to_value(vec![stub("abc123")])?)?;
        read_request(reader)?;
        write_ok(writer, serde_json::to_value(alloc("abc123", &["server"]))?)?;
        read_request(reader)?;
        write_response(
            writer,
            &Response::Error {
                message: "action \"ping\" not found".to_string(),
                code: ErrorCode::ActionNotFound,
            },
        )?;
        Ok(())
    });

    skiff(&socket)
        .args(["action", "--job", "web", "--allocation", "abc1", "ping"])
        .write_stdin("")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not found"));

    agent.join().unwrap().unwrap();
}

#[test]
fn explicit_tty_degrades_when_stdin_is_piped() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("agent.sock");

    let agent = spawn_scripted_agent(socket.clone(), |reader, writer| {
        read_request(reader)?;
        write_ok(writer, serde_json::to_value(vec![stub("abc123")])?)?;
        read_request(reader)?;
        write_ok(writer, serde_json::to_value(alloc("abc123", &["server"]))?)?;
        match read_request(reader)? {
            // the pty request degrades: stdin is a pipe here, not a terminal
            Request::Exec { tty, .. } => assert!(!tty),
            other => bail!("expected Exec, got {other:?}"),
        }
        write_ok(writer, serde_json::json!({}))?;
        drain_stdin_frames(reader)?;
        write_frame(writer, &ExecFrame::Exited { code: 0 })?;
        Ok(())
    });

    skiff(&socket)
        .args([
            "action", "--job", "web", "--allocation", "abc1", "-t", "true", "ping",
        ])
        .write_stdin("")
        .assert()
        .code(0);

    agent.join().unwrap().unwrap();
}

#[test]
fn unknown_agent_socket_is_a_connection_error() {
    let dir = tempfile::tempdir().unwrap();
    skiff(&dir.path().join("missing.sock"))
        .args(["action", "--job", "web", "--allocation", "abc", "ping"])
        .write_stdin("")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("agent is not running"));
}
