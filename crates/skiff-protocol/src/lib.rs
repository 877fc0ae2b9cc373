pub mod paths;

use serde::{Deserialize, Serialize};

/// Unique identifier for an allocation.
pub type AllocId = String;

/// Upper bound on a single JSON line on the wire. Larger lines are a
/// protocol violation and terminate the connection.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Client-to-agent requests sent as JSON-lines over the Unix socket.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    /// List allocation stubs, optionally filtered by an ID prefix.
    AllocList {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },
    /// Fetch full detail for one allocation.
    AllocInfo { alloc_id: AllocId },
    /// List running allocations of one task group of a job.
    JobAllocs { job_id: String, group: String },
    /// Start a predefined action inside a task. On `Ok` the connection
    /// switches to the exec frame phase and carries `ExecFrame`s until a
    /// terminal frame is sent.
    Exec {
        alloc_id: AllocId,
        task: String,
        action: String,
        #[serde(default)]
        args: Vec<String>,
        tty: bool,
    },
}

/// Agent-to-client responses.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    Error {
        message: String,
        code: ErrorCode,
    },
}

/// Error codes for structured error handling.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    AllocNotFound,
    TaskNotFound,
    ActionNotFound,
    TaskNotRunning,
    InvalidRequest,
    AgentError,
}

/// Frames of the multiplexed exec exchange. Stdin, stdin-close and resize
/// frames flow client to agent; stdout, stderr and the terminal frames
/// (`Exited` or `Error`) flow agent to client. Exactly one terminal frame
/// ends a session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum ExecFrame {
    Stdin {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    StdinClosed,
    Resize {
        rows: u32,
        cols: u32,
    },
    Stdout {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    Stderr {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    Exited {
        code: i32,
    },
    Error {
        message: String,
    },
}

/// Terminal geometry. Successive values are last-write-wins; intermediate
/// sizes may be dropped by the producer.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub rows: u32,
    pub cols: u32,
}

/// A named, predefined command bound to a task definition. Owned by job
/// storage; read-only here.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// An action joined with the task and group it is defined on.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JobAction {
    #[serde(flatten)]
    pub action: Action,
    pub task_name: String,
    pub task_group_name: String,
}

/// A task within an allocation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub name: String,
}

/// Summary row returned by allocation list queries.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AllocStub {
    pub id: AllocId,
    pub name: String,
    pub job_id: String,
    pub task_group: String,
    pub client_status: String,
}

/// Full allocation detail.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Allocation {
    pub id: AllocId,
    pub name: String,
    pub job_id: String,
    pub task_group: String,
    pub client_status: String,
    pub tasks: Vec<TaskInfo>,
}

/// Base64 encoding for byte arrays in JSON.
mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
