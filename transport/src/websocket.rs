//! WebSocket streaming transport

use async_trait::async_trait;
use futures::StreamExt;
use soak_bench_core::{Credential, StreamConnection, StreamConnector, StreamEvent, TransportError};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Opens WebSocket connections to one URL
///
/// The credential travels as `Authorization: Bearer ...` on the upgrade
/// request. A refused upgrade surfaces as [`TransportError::Rejected`].
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    /// Connector for a `ws://` or `wss://` URL
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Config` if the URL is not a WebSocket URL.
    pub fn new(url: impl Into<String>) -> Result<Self, TransportError> {
        let url = url.into();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(TransportError::Config(format!(
                "not a WebSocket URL: {url}"
            )));
        }
        Ok(Self { url })
    }

    /// Target URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl StreamConnector for WebSocketConnector {
    fn name(&self) -> &str {
        "websocket"
    }

    async fn connect(
        &self,
        credential: &Credential,
    ) -> Result<Box<dyn StreamConnection>, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Config(e.to_string()))?;

        let bearer = HeaderValue::from_str(&credential.bearer())
            .map_err(|e| TransportError::Config(format!("invalid credential header: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, response) = connect_async(request).await.map_err(map_error)?;
        tracing::trace!(url = %self.url, status = response.status().as_u16(), "WebSocket connected");

        Ok(Box::new(WebSocketConnection { stream }))
    }
}

/// One open WebSocket
pub struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl StreamConnection for WebSocketConnection {
    async fn next_event(&mut self) -> Result<StreamEvent, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    return Ok(StreamEvent::Message { bytes: data.len() })
                }
                Some(Ok(Message::Text(text))) => {
                    return Ok(StreamEvent::Message { bytes: text.len() })
                }
                Some(Ok(Message::Close(_))) | None => return Ok(StreamEvent::Closed),
                // Control frames are answered by tungstenite
                Some(Ok(_)) => continue,
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    return Ok(StreamEvent::Closed)
                }
                Some(Err(e)) => return Err(map_error(e)),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(map_error(e)),
        }
    }
}

impl std::fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnection").finish_non_exhaustive()
    }
}

fn map_error(e: WsError) -> TransportError {
    match e {
        WsError::Http(response) => TransportError::Rejected(response.status().as_u16()),
        WsError::Url(e) => TransportError::Config(e.to_string()),
        other => TransportError::Connection(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::Router;
    use soak_bench_core::{FailureReason, StreamSession};
    use std::time::Duration;

    async fn feed(mut socket: WebSocket) {
        for i in 0..3u8 {
            if socket.send(AxumMessage::Binary(vec![i; 16])).await.is_err() {
                return;
            }
        }
        // Hold until the client closes
        while let Some(Ok(msg)) = socket.recv().await {
            if matches!(msg, AxumMessage::Close(_)) {
                break;
            }
        }
    }

    async fn hang_up(mut socket: WebSocket) {
        let _ = socket.send(AxumMessage::Text("bye".into())).await;
        let _ = socket.send(AxumMessage::Close(None)).await;
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == "Bearer good")
    }

    async fn stream_handler(headers: HeaderMap, ws: WebSocketUpgrade) -> Response {
        if !authorized(&headers) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        ws.on_upgrade(feed)
    }

    async fn hangup_handler(ws: WebSocketUpgrade) -> Response {
        ws.on_upgrade(hang_up)
    }

    async fn serve() -> String {
        let app = Router::new()
            .route("/stream", get(stream_handler))
            .route("/hangup", get(hangup_handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("ws://{addr}")
    }

    #[test]
    fn test_rejects_non_ws_url() {
        assert!(matches!(
            WebSocketConnector::new("http://example.com"),
            Err(TransportError::Config(_))
        ));
        assert!(WebSocketConnector::new("wss://example.com/stream").is_ok());
    }

    #[tokio::test]
    async fn test_receives_frames_then_closes() {
        let base = serve().await;
        let connector = WebSocketConnector::new(format!("{base}/stream")).unwrap();

        let mut conn = connector.connect(&Credential::new("good")).await.unwrap();
        for _ in 0..3 {
            assert_eq!(conn.next_event().await.unwrap(), StreamEvent::Message { bytes: 16 });
        }
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_rejected() {
        let base = serve().await;
        let connector = WebSocketConnector::new(format!("{base}/stream")).unwrap();

        let err = connector.connect(&Credential::new("bad")).await.err().unwrap();
        assert!(matches!(err, TransportError::Rejected(401)));
    }

    #[tokio::test]
    async fn test_server_close_is_an_event() {
        let base = serve().await;
        let connector = WebSocketConnector::new(format!("{base}/hangup")).unwrap();

        let mut conn = connector.connect(&Credential::new("any")).await.unwrap();
        assert_eq!(conn.next_event().await.unwrap(), StreamEvent::Message { bytes: 3 });
        assert_eq!(conn.next_event().await.unwrap(), StreamEvent::Closed);
    }

    #[tokio::test]
    async fn test_session_over_websocket() {
        let base = serve().await;
        let connector = WebSocketConnector::new(format!("{base}/stream")).unwrap();

        let outcome = StreamSession::new(Duration::from_millis(200), Duration::from_secs(2))
            .run(&connector, &Credential::new("good"))
            .await;
        assert!(outcome.success, "{outcome:?}");
        assert_eq!(outcome.accepted, 3);
        assert_eq!(outcome.payload_bytes, 48);

        let interrupted = StreamSession::new(
            Duration::from_millis(200),
            Duration::from_secs(2),
        )
        .run(
            &WebSocketConnector::new(format!("{base}/hangup")).unwrap(),
            &Credential::new("good"),
        )
        .await;
        assert_eq!(interrupted.failure, Some(FailureReason::StreamInterrupted));
    }
}
