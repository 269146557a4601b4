//! Socket abstraction for the reconnect agent.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};

use crate::errors::TransportError;

/// One open feed connection.
#[async_trait]
pub trait FeedTransport: Send {
    /// Send a text frame.
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError>;

    /// Next text frame. `None` once the peer has closed.
    async fn recv_text(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the connection. Safe to call on an already closed transport.
    async fn close(&mut self);
}

/// Opens feed connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new transport.
    async fn connect(&self) -> Result<Box<dyn FeedTransport>, TransportError>;
}

/// Connects to `ws://` / `wss://` feed URLs with an optional bearer token.
#[derive(Clone, Debug)]
pub struct WsConnector {
    url: String,
    token: Option<String>,
}

impl WsConnector {
    /// Connector for `url`, authenticating with `token` when given.
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            url: url.into(),
            token,
        }
    }

    /// Target URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn FeedTransport>, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            let _ = request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws, response) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        info!(url = %self.url, status = %response.status(), "feed connected");
        Ok(Box::new(WsTransport { ws, closed: false }))
    }
}

struct WsTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

#[async_trait]
impl FeedTransport for WsTransport {
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.ws
            .send(Message::text(text))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn recv_text(&mut self) -> Option<Result<String, TransportError>> {
        if self.closed {
            return None;
        }
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => debug!(len = data.len(), "discarding non-UTF8 binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "server closed feed");
                    self.closed = true;
                    return None;
                }
                // tungstenite answers protocol pings itself
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => return Some(Err(TransportError::Io(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(error) = self.ws.close(None).await {
            debug!(%error, "close handshake failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn invalid_url_is_connect_error() {
        let connector = WsConnector::new("not a url", None);
        assert_matches!(connector.connect().await.err(), Some(TransportError::Connect(_)));
    }

    #[tokio::test]
    async fn refused_connection_is_connect_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = WsConnector::new(format!("ws://127.0.0.1:{port}/ws"), Some("t".into()));
        assert_matches!(connector.connect().await.err(), Some(TransportError::Connect(_)));
    }

    #[test]
    fn keeps_url() {
        let connector = WsConnector::new("ws://localhost:8000/ws/admin/activity", None);
        assert_eq!(connector.url(), "ws://localhost:8000/ws/admin/activity");
    }
}
