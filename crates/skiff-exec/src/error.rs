use thiserror::Error;
use tokio_util::codec::LinesCodecError;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("{0}")]
    Validation(String),

    #[error("no allocation found matching {0:?}")]
    AllocNotFound(String),

    #[error(
        "allocation prefix {prefix:?} matched multiple allocations: {}",
        .candidates.join(", ")
    )]
    AmbiguousPrefix {
        prefix: String,
        candidates: Vec<String>,
    },

    #[error("{0}")]
    TaskResolution(String),

    #[error("not a terminal")]
    NotATerminal,

    #[error("setup failed: {0}")]
    Setup(String),

    #[error("{0}")]
    Connect(String),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("{0}")]
    Session(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stream error: {0}")]
    Codec(#[from] LinesCodecError),
}
