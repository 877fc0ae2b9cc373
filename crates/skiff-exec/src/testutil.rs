//! Mock agent servers for exercising the client against a scripted peer.

use std::future::Future;
use std::path::PathBuf;

use futures_util::{SinkExt, StreamExt};
use skiff_protocol::{ErrorCode, ExecFrame, Request, Response};
use tokio::net::UnixListener;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use crate::client::AgentClient;

/// A one-connection agent bound to a socket in a temp dir, driven by a
/// scripted handler.
pub struct MockAgent {
    socket_path: PathBuf,
    _dir: tempfile::TempDir,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl MockAgent {
    pub fn spawn<F, Fut>(handler: F) -> Self
    where
        F: FnOnce(MockConn) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await?;
            let (read_half, write_half) = stream.into_split();
            let conn = MockConn {
                reader: FramedRead::new(read_half, LinesCodec::new()),
                writer: FramedWrite::new(write_half, LinesCodec::new()),
            };
            handler(conn).await
        });

        Self {
            socket_path,
            _dir: dir,
            handle,
        }
    }

    pub async fn connect(&self) -> AgentClient {
        AgentClient::connect_to(&self.socket_path).await.unwrap()
    }

    /// Propagates any assertion failure or error from the handler.
    pub async fn finish(self) {
        self.handle.await.unwrap().unwrap();
    }
}

pub struct MockConn {
    reader: FramedRead<OwnedReadHalf, LinesCodec>,
    writer: FramedWrite<OwnedWriteHalf, LinesCodec>,
}

impl MockConn {
    pub async fn read_request(&mut self) -> anyhow::Result<Request> {
        let line = self
            .reader
            .next()
            .await
            .ok_or_else(|| anyhow::anyhow!("client disconnected before request"))??;
        Ok(serde_json::from_str(&line)?)
    }

    pub async fn send_ok(&mut self, data: serde_json::Value) -> anyhow::Result<()> {
        self.send_response(&Response::Ok { data: Some(data) }).await
    }

    pub async fn send_error(&mut self, message: &str, code: ErrorCode) -> anyhow::Result<()> {
        self.send_response(&Response::Error {
            message: message.to_string(),
            code,
        })
        .await
    }

    pub async fn send_response(&mut self, resp: &Response) -> anyhow::Result<()> {
        self.writer.send(serde_json::to_string(resp)?).await?;
        Ok(())
    }

    pub async fn send_frame(&mut self, frame: &ExecFrame) -> anyhow::Result<()> {
        self.writer.send(serde_json::to_string(frame)?).await?;
        Ok(())
    }

    /// Next frame from the client, or None on disconnect.
    pub async fn read_frame(&mut self) -> anyhow::Result<Option<ExecFrame>> {
        match self.reader.next().await {
            Some(Ok(line)) => Ok(Some(serde_json::from_str(&line)?)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }
}
