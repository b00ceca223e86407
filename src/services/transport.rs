use futures::{SinkExt, StreamExt, future::BoxFuture};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message},
};
use tracing::debug;

/// Path of the live push endpoint on the game server.
pub const LIVE_PATH: &str = "/ws/live";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open push channel to `{url}`")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },
    #[error("push channel failed")]
    Socket(#[from] tungstenite::Error),
    #[error("invalid push endpoint `{0}`")]
    InvalidUrl(String),
}

/// Factory for push channel connections.
pub trait PushTransport: Send + Sync {
    fn connect(&self) -> BoxFuture<'static, Result<Box<dyn PushChannel>, TransportError>>;
}

/// One open, text-framed push connection.
pub trait PushChannel: Send {
    fn send_text(&mut self, text: String) -> BoxFuture<'_, Result<(), TransportError>>;
    /// Next text frame; `None` once the peer closed the connection.
    fn next_text(&mut self) -> BoxFuture<'_, Result<Option<String>, TransportError>>;
    fn close(&mut self) -> BoxFuture<'_, Result<(), TransportError>>;
}

/// WebSocket push transport.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    /// Derive the live endpoint from the server's HTTP base url.
    pub fn from_server_url(server_url: &str) -> Result<Self, TransportError> {
        let base = server_url.trim_end_matches('/');
        let url = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}{LIVE_PATH}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}{LIVE_PATH}")
        } else if base.starts_with("ws://") || base.starts_with("wss://") {
            format!("{base}{LIVE_PATH}")
        } else {
            return Err(TransportError::InvalidUrl(server_url.to_string()));
        };
        Ok(Self { url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl PushTransport for WsTransport {
    fn connect(&self) -> BoxFuture<'static, Result<Box<dyn PushChannel>, TransportError>> {
        let url = self.url.clone();
        Box::pin(async move {
            let (stream, _response) = connect_async(url.as_str())
                .await
                .map_err(|source| TransportError::Connect {
                    url: url.clone(),
                    source,
                })?;
            debug!(url = %url, "push channel connected");
            Ok(Box::new(WsChannel { stream }) as Box<dyn PushChannel>)
        })
    }
}

struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl PushChannel for WsChannel {
    fn send_text(&mut self, text: String) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.stream.send(Message::Text(text)).await?;
            Ok(())
        })
    }

    fn next_text(&mut self) -> BoxFuture<'_, Result<Option<String>, TransportError>> {
        Box::pin(async move {
            while let Some(message) = self.stream.next().await {
                match message? {
                    Message::Text(text) => return Ok(Some(text)),
                    Message::Close(_) => return Ok(None),
                    // tungstenite answers pings on the next read or write
                    Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                }
            }
            Ok(None)
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            self.stream.close(None).await?;
            Ok(())
        })
    }
}
