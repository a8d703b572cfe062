//! Plugin side of the transport: listen, announce, dispatch.

use crate::connection::{Outcome, RequestFrame, ResponseFrame};
use crate::error::{Error, Result};
use crate::handshake::{HandshakeConfig, HandshakeLine, Network};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::io::{self, Write};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

/// Turns one decoded request into a call on the real implementation.
#[async_trait]
pub trait Dispatch: Send + Sync + 'static {
    type Request: DeserializeOwned + Send;

    async fn dispatch(&self, request: Self::Request) -> Result<serde_json::Value>;
}

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("this binary is a workspace server plugin and is not meant to be executed directly")]
    NotLaunchedByHost,

    #[error("failed to listen for the server connection: {0}")]
    Listen(#[source] io::Error),

    #[error("failed to write the handshake line: {0}")]
    Announce(#[source] io::Error),

    #[error("connection to the server failed: {0}")]
    Connection(#[source] io::Error),
}

/// Serve `dispatcher` over TCP on the loopback interface.
pub async fn serve<D: Dispatch>(config: &HandshakeConfig, dispatcher: D) -> std::result::Result<(), ServeError> {
    serve_on(config, Network::Tcp, dispatcher).await
}

/// Check the cookie, listen, print the handshake line and serve the single
/// connection the server opens. Returns once the server disconnects.
pub async fn serve_on<D: Dispatch>(
    config: &HandshakeConfig,
    network: Network,
    dispatcher: D,
) -> std::result::Result<(), ServeError> {
    if !config.cookie_present() {
        return Err(ServeError::NotLaunchedByHost);
    }

    match network {
        Network::Tcp => {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .map_err(ServeError::Listen)?;
            let address = listener.local_addr().map_err(ServeError::Listen)?;
            announce(&HandshakeLine::announce(config, network, address.to_string()))?;

            let (stream, peer) = listener.accept().await.map_err(ServeError::Listen)?;
            debug!(%peer, "Server connected");
            stream.set_nodelay(true).map_err(ServeError::Connection)?;
            serve_connection(stream, &dispatcher)
                .await
                .map_err(ServeError::Connection)
        }
        #[cfg(unix)]
        Network::Unix => {
            let path = std::env::temp_dir().join(format!("ws-plugin-{}.sock", std::process::id()));
            let _ = std::fs::remove_file(&path);
            let listener = tokio::net::UnixListener::bind(&path).map_err(ServeError::Listen)?;
            announce(&HandshakeLine::announce(
                config,
                network,
                path.to_string_lossy().into_owned(),
            ))?;

            let result = match listener.accept().await {
                Ok((stream, _)) => serve_connection(stream, &dispatcher)
                    .await
                    .map_err(ServeError::Connection),
                Err(e) => Err(ServeError::Listen(e)),
            };
            let _ = std::fs::remove_file(&path);
            result
        }
        #[cfg(not(unix))]
        Network::Unix => Err(ServeError::Listen(io::Error::new(
            io::ErrorKind::Unsupported,
            "unix sockets are not supported on this platform",
        ))),
    }
}

fn announce(line: &HandshakeLine) -> std::result::Result<(), ServeError> {
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{line}").map_err(ServeError::Announce)?;
    stdout.flush().map_err(ServeError::Announce)
}

/// Answer requests on `stream` one at a time until the peer hangs up.
pub async fn serve_connection<S, D>(stream: S, dispatcher: &D) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
    D: Dispatch,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let frame: RequestFrame<serde_json::Value> = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping connection after unreadable frame");
                return Err(io::Error::new(io::ErrorKind::InvalidData, e));
            }
        };

        let outcome: Outcome = match serde_json::from_value::<D::Request>(frame.request) {
            Ok(request) => dispatcher.dispatch(request).await.into(),
            Err(e) => Outcome::Err(Error::transport(format!("malformed request: {e}"))),
        };

        let response = ResponseFrame {
            id: frame.id,
            outcome,
        };
        let mut bytes = serde_json::to_vec(&response)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        bytes.push(b'\n');
        write_half.write_all(&bytes).await?;
        write_half.flush().await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::error::ErrorKind;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Serialize, Deserialize)]
    #[serde(tag = "method", content = "params", rename_all = "snake_case")]
    enum CounterRequest {
        Add { amount: usize },
        Fail,
    }

    struct Counter {
        total: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Dispatch for Counter {
        type Request = CounterRequest;

        async fn dispatch(&self, request: CounterRequest) -> Result<serde_json::Value> {
            match request {
                CounterRequest::Add { amount } => {
                    let total = self.total.fetch_add(amount, Ordering::SeqCst) + amount;
                    Ok(serde_json::json!(total))
                }
                CounterRequest::Fail => Err(Error::application("counter refused")),
            }
        }
    }

    #[tokio::test]
    async fn test_requests_are_dispatched_in_order() {
        let (client, server) = tokio::io::duplex(4096);
        let total = Arc::new(AtomicUsize::new(0));
        let counter = Counter {
            total: total.clone(),
        };
        let server_task = tokio::spawn(async move { serve_connection(server, &counter).await });

        let conn = Connection::from_stream(client);
        let first: usize = conn.call(&CounterRequest::Add { amount: 2 }).await.unwrap();
        let second: usize = conn.call(&CounterRequest::Add { amount: 3 }).await.unwrap();
        assert_eq!((first, second), (2, 5));

        let err = conn.call::<_, usize>(&CounterRequest::Fail).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Application);
        assert_eq!(err.message(), "counter refused");

        drop(conn);
        server_task.await.unwrap().unwrap();
        assert_eq!(total.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_unknown_method_is_reported_not_fatal() {
        #[derive(Serialize)]
        #[serde(tag = "method", content = "params", rename_all = "snake_case")]
        enum Other {
            Reset,
        }

        let (client, server) = tokio::io::duplex(4096);
        let counter = Counter {
            total: Arc::new(AtomicUsize::new(0)),
        };
        tokio::spawn(async move { serve_connection(server, &counter).await });

        let conn = Connection::from_stream(client);
        let err = conn.call::<_, usize>(&Other::Reset).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);

        let after: usize = conn.call(&CounterRequest::Add { amount: 1 }).await.unwrap();
        assert_eq!(after, 1);
    }

    #[tokio::test]
    async fn test_serve_refuses_without_cookie() {
        const CONFIG: HandshakeConfig = HandshakeConfig {
            protocol_version: 1,
            magic_cookie_key: "WS_RPC_TEST_COOKIE_NEVER_SET",
            magic_cookie_value: "never",
        };
        let counter = Counter {
            total: Arc::new(AtomicUsize::new(0)),
        };
        let result = serve(&CONFIG, counter).await;
        assert!(matches!(result, Err(ServeError::NotLaunchedByHost)));
    }
}
