//! Shared WebSocket plumbing for the venue recorders.

use futures_util::stream::{SplitSink, SplitStream};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{GatewayError, Result};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsSink = SplitSink<WsStream, Message>;
pub type WsSource = SplitStream<WsStream>;

/// Default deadline for a single WebSocket handshake or ack wait.
pub const WS_OP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

pub async fn connect(url: &str) -> Result<WsStream> {
    let (stream, _response) = tokio::time::timeout(WS_OP_TIMEOUT, connect_async(url))
        .await
        .map_err(|_| GatewayError::TransportTimeout(format!("websocket connect to {}", url)))??;
    Ok(stream)
}
