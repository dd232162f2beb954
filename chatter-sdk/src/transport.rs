//! WebSocket transport.
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves behind a trait seam, so the client loop can run
//! against a scripted transport in tests. The transport moves raw text
//! frames and knows nothing about message semantics.

use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

use crate::error::{Error, Result};

/// Concrete WebSocket stream type (avoids repeating the generic everywhere).
type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Received transport frame, reduced to what the session loop cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// UTF-8 text frame carrying one JSON envelope.
    Text(String),
    /// Ping from the server; the session answers with a pong.
    Ping(Vec<u8>),
    /// Close frame with status code and reason. The stream ends after this.
    Closed { code: u16, reason: String },
}

/// Something that can open physical connections.
pub trait Transport: Send + 'static {
    type Sink: FrameSink;
    type Stream: FrameStream;

    /// Establish one connection. Fails with [`Error::Transport`] if the
    /// server is unreachable or the handshake is rejected.
    fn open(
        &mut self,
        url: &str,
    ) -> impl Future<Output = Result<(Self::Sink, Self::Stream)>> + Send;
}

/// Write half of a connection.
pub trait FrameSink: Send {
    /// Send a text frame. An error here means the connection is dead;
    /// nothing is queued.
    fn send_text(&mut self, text: &str) -> impl Future<Output = Result<()>> + Send;

    /// Send a keepalive ping.
    fn send_ping(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Answer a server ping.
    fn send_pong(&mut self, payload: Vec<u8>) -> impl Future<Output = Result<()>> + Send;

    /// Intentional local close. Best-effort; errors are ignored.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Read half of a connection.
pub trait FrameStream: Send {
    /// Next frame, or `None` when the stream ends. A read error is the
    /// last item before the end.
    fn next(&mut self) -> impl Future<Output = Option<Result<Frame>>> + Send;
}

/// Production transport: `ws://` / `wss://` via tokio-tungstenite.
#[derive(Debug, Default, Clone)]
pub struct WsTransport;

impl Transport for WsTransport {
    type Sink = WsWriter;
    type Stream = WsReader;

    async fn open(&mut self, url: &str) -> Result<(WsWriter, WsReader)> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| Error::Transport(format!("connect to {url} failed: {e}")))?;
        let (sink, stream) = ws_stream.split();
        Ok((WsWriter { sink }, WsReader { stream }))
    }
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl FrameSink for WsWriter {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .map_err(|e| Error::Transport(format!("send failed: {e}")))
    }

    async fn send_ping(&mut self) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Ping(Vec::new()))
            .await
            .map_err(|e| Error::Transport(format!("ping failed: {e}")))
    }

    async fn send_pong(&mut self, payload: Vec<u8>) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Pong(payload))
            .await
            .map_err(|e| Error::Transport(format!("pong failed: {e}")))
    }

    async fn close(&mut self) {
        let _ = self.sink.send(tungstenite::Message::Close(None)).await;
        let _ = self.sink.close().await;
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl FrameStream for WsReader {
    async fn next(&mut self) -> Option<Result<Frame>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Some(Ok(Frame::Text(text.to_string())));
                }
                Some(Ok(tungstenite::Message::Ping(payload))) => {
                    return Some(Ok(Frame::Ping(payload.to_vec())));
                }
                Some(Ok(tungstenite::Message::Close(close_frame))) => {
                    let (code, reason) = close_frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    return Some(Ok(Frame::Closed { code, reason }));
                }
                // Binary, pong, and raw frames carry nothing for us.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Some(Err(Error::Transport(format!("read error: {e}"))));
                }
                None => return None,
            }
        }
    }
}
