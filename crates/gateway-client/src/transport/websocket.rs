//! WebSocket connection over `tokio-tungstenite`

use super::{Frame, GatewayConnection, Incoming};
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::CloseStatus;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsRead = SplitStream<WsStream>;
type WsWrite = SplitSink<WsStream, Message>;

/// WebSocket gateway connection
///
/// The read and write halves sit behind separate locks so a pending read never holds up
/// heartbeats or other outbound traffic.
#[derive(Default)]
pub struct WebSocketConnection {
    reader: Mutex<Option<WsRead>>,
    writer: Mutex<Option<WsWrite>>,
}

impl WebSocketConnection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn transport_error(e: impl std::fmt::Display) -> GatewayError {
    GatewayError::Transport(e.to_string())
}

#[async_trait]
impl GatewayConnection for WebSocketConnection {
    async fn connect(&self, url: &Url) -> GatewayResult<()> {
        let (stream, response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(transport_error)?;
        debug!(status = %response.status(), "WebSocket handshake complete");

        let (write, read) = stream.split();
        *self.writer.lock().await = Some(write);
        *self.reader.lock().await = Some(read);
        Ok(())
    }

    async fn read(&self) -> GatewayResult<Incoming> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(GatewayError::NotConnected)?;

        loop {
            let Some(message) = reader.next().await else {
                return Ok(Incoming::Closed(CloseStatus::abnormal("stream ended")));
            };

            match message.map_err(transport_error)? {
                Message::Text(text) => return Ok(Incoming::Frame(Frame::Text(text))),
                Message::Binary(bytes) => return Ok(Incoming::Frame(Frame::Binary(bytes))),
                Message::Close(frame) => {
                    let status = frame.map_or_else(
                        || CloseStatus::abnormal(""),
                        |f| CloseStatus::new(u16::from(f.code), f.reason.into_owned()),
                    );
                    return Ok(Incoming::Closed(status));
                }
                // tungstenite answers pings on the next write
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {
                    trace!("Skipping control frame");
                }
            }
        }
    }

    async fn send(&self, frame: Frame) -> GatewayResult<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(GatewayError::NotConnected)?;

        let message = match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(bytes) => Message::Binary(bytes),
        };
        writer.send(message).await.map_err(transport_error)
    }

    async fn disconnect(&self) -> GatewayResult<()> {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.close().await {
                debug!(error = %e, "Error closing WebSocket");
            }
        }
        self.reader.lock().await.take();
        Ok(())
    }
}
