//! Client side of the framed transport.
//!
//! Frames are single-line JSON objects. A [`Connection`] carries one request
//! at a time; callers that share a connection queue behind its lock, which
//! matches the one-at-a-time dispatch on the plugin side.

use crate::error::{Error, Result};
use crate::handshake::Network;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::Mutex;
use tracing::{debug, warn};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Serialize, Deserialize)]
pub struct RequestFrame<R> {
    pub id: u64,
    pub request: R,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: u64,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok(serde_json::Value),
    Err(Error),
}

impl From<Result<serde_json::Value>> for Outcome {
    fn from(result: Result<serde_json::Value>) -> Self {
        match result {
            Ok(value) => Outcome::Ok(value),
            Err(err) => Outcome::Err(err),
        }
    }
}

struct Inner {
    reader: Lines<BufReader<BoxedReader>>,
    writer: BoxedWriter,
    next_id: u64,
    /// Set while a frame is being written; still set on the next call means
    /// the previous writer was cancelled mid-frame and the stream is unusable.
    writing: bool,
    closed: bool,
}

pub struct Connection {
    inner: Mutex<Inner>,
}

impl Connection {
    /// Connect to the address a plugin announced in its handshake line.
    pub async fn connect(network: Network, address: &str) -> Result<Self> {
        match network {
            Network::Tcp => {
                let stream = tokio::net::TcpStream::connect(address).await.map_err(|e| {
                    Error::transport(format!("failed to connect to {address}: {e}"))
                })?;
                stream.set_nodelay(true)?;
                Ok(Self::from_stream(stream))
            }
            #[cfg(unix)]
            Network::Unix => {
                let stream = tokio::net::UnixStream::connect(address).await.map_err(|e| {
                    Error::transport(format!("failed to connect to {address}: {e}"))
                })?;
                Ok(Self::from_stream(stream))
            }
            #[cfg(not(unix))]
            Network::Unix => Err(Error::transport(
                "unix sockets are not supported on this platform",
            )),
        }
    }

    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Self::from_parts(Box::new(read_half), Box::new(write_half))
    }

    pub fn from_parts(reader: BoxedReader, writer: BoxedWriter) -> Self {
        Self {
            inner: Mutex::new(Inner {
                reader: BufReader::new(reader).lines(),
                writer,
                next_id: 1,
                writing: false,
                closed: false,
            }),
        }
    }

    /// Send `request` and wait for its response without a deadline.
    pub async fn call<Req, Resp>(&self, request: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        self.exchange(request).await
    }

    /// Send `request` and wait at most `timeout` for its response. The
    /// deadline also covers waiting behind calls already in flight.
    ///
    /// A response that arrives after the deadline is discarded by whichever
    /// call reads the stream next.
    pub async fn call_with_timeout<Req, Resp>(&self, request: &Req, timeout: Duration) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        match tokio::time::timeout(timeout, self.exchange(request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(format!(
                "no response within {}s",
                timeout.as_secs_f64()
            ))),
        }
    }

    async fn exchange<Req, Resp>(&self, request: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(Error::transport("connection closed"));
        }
        if inner.writing {
            inner.closed = true;
            return Err(Error::transport(
                "connection left in an inconsistent state by a cancelled call",
            ));
        }

        let id = inner.next_id;
        inner.next_id += 1;

        let mut line = serde_json::to_string(&RequestFrame { id, request })?;
        line.push('\n');

        inner.writing = true;
        if let Err(e) = write_frame(&mut inner.writer, line.as_bytes()).await {
            inner.closed = true;
            return Err(e);
        }
        inner.writing = false;

        let value = read_response(&mut inner, id).await?;
        serde_json::from_value(value)
            .map_err(|e| Error::transport(format!("unexpected response payload: {e}")))
    }
}

async fn write_frame(writer: &mut BoxedWriter, bytes: &[u8]) -> Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read frames until the one answering `id`.
///
/// `Lines::next_line` is cancel safe, so abandoning this future on a timeout
/// never loses part of a frame.
async fn read_response(inner: &mut Inner, id: u64) -> Result<serde_json::Value> {
    loop {
        let line = match inner.reader.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                inner.closed = true;
                return Err(Error::transport("plugin closed the connection"));
            }
            Err(e) => {
                inner.closed = true;
                return Err(e.into());
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let frame: ResponseFrame = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(e) => {
                inner.closed = true;
                return Err(e.into());
            }
        };

        if frame.id < id {
            debug!(stale_id = frame.id, "Discarding response to an abandoned request");
            continue;
        }
        if frame.id > id {
            warn!(expected = id, got = frame.id, "Response id from the future");
            inner.closed = true;
            return Err(Error::transport(format!(
                "response id {} does not match request id {id}",
                frame.id
            )));
        }

        return match frame.outcome {
            Outcome::Ok(value) => Ok(value),
            Outcome::Err(err) => Err(err),
        };
    }
}
