use std::path::Path;

use futures_util::{SinkExt, StreamExt};
use skiff_protocol::{MAX_FRAME_BYTES, Request, Response, paths};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use crate::error::ExecError;

pub type FrameReader = FramedRead<OwnedReadHalf, LinesCodec>;
pub type FrameWriter = FramedWrite<OwnedWriteHalf, LinesCodec>;

/// Connection to the local skiff agent: JSON-lines request/response, then
/// frame streaming once an exec session is accepted.
pub struct AgentClient {
    reader: FrameReader,
    writer: FrameWriter,
}

impl AgentClient {
    pub async fn connect() -> Result<Self, ExecError> {
        Self::connect_to(&paths::default_socket_path()).await
    }

    pub async fn connect_to(path: &Path) -> Result<Self, ExecError> {
        let stream = UnixStream::connect(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::ConnectionRefused
                || e.kind() == std::io::ErrorKind::NotFound
            {
                ExecError::Connect(format!(
                    "skiff agent is not running at {}",
                    path.display()
                ))
            } else {
                ExecError::Connect(format!(
                    "failed to connect to skiff agent at {}: {e}",
                    path.display()
                ))
            }
        })?;

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_FRAME_BYTES)),
            writer: FramedWrite::new(write_half, LinesCodec::new_with_max_length(MAX_FRAME_BYTES)),
        })
    }

    /// Send a request and read the response.
    pub async fn request(&mut self, req: &Request) -> Result<Response, ExecError> {
        let line =
            serde_json::to_string(req).map_err(|e| ExecError::Protocol(e.to_string()))?;
        self.writer.send(line).await?;

        match self.reader.next().await {
            Some(Ok(line)) => serde_json::from_str(&line)
                .map_err(|e| ExecError::Protocol(format!("malformed agent response: {e}"))),
            Some(Err(e)) => Err(e.into()),
            None => Err(ExecError::Connect(
                "agent closed the connection".to_string(),
            )),
        }
    }

    /// Hand over the framed halves for the exec frame phase.
    pub fn into_exec_stream(self) -> (FrameReader, FrameWriter) {
        (self.reader, self.writer)
    }
}
