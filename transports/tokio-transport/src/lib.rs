/// Tokio-based WebSocket transport implementation for supervision-signal
///
/// This crate provides a concrete implementation of the `sigcore::net`
/// transport traits using tokio-tungstenite. Frames are UTF-8 text.
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

pub use sigcore::net::{Transport, TransportEvent, TransportFactory};

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Tokio-based WebSocket transport
pub struct TokioWebSocketTransport {
    ws_sink: Arc<Mutex<Option<WsSink>>>,
}

impl TokioWebSocketTransport {
    fn new(sink: WsSink) -> Self {
        Self {
            ws_sink: Arc::new(Mutex::new(Some(sink))),
        }
    }
}

#[async_trait]
impl Transport for TokioWebSocketTransport {
    async fn send_text(&self, frame: &str) -> Result<(), anyhow::Error> {
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Socket is closed"))?;

        trace!("--> Sending text frame: {} bytes", frame.len());
        sink.send(Message::text(frame))
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket send error: {}", e))?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), anyhow::Error> {
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Socket is closed"))?;
        trace!("--> Sending ping");
        sink.send(Message::Ping(Default::default()))
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket ping error: {}", e))
    }

    async fn disconnect(&self) {
        if let Some(mut sink) = self.ws_sink.lock().await.take() {
            if let Err(e) = sink.send(Message::Close(None)).await {
                debug!("Close frame not sent: {e}");
            }
            let _ = sink.close().await;
        }
    }
}

/// Factory for creating Tokio WebSocket transports
#[derive(Debug, Default)]
pub struct TokioWebSocketTransportFactory;

impl TokioWebSocketTransportFactory {
    /// Create a new factory instance
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportFactory for TokioWebSocketTransportFactory {
    async fn create_transport(
        &self,
        url: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        info!("Dialing {}", redact_token(url));
        let (client, _response) = connect_async(url)
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket connect failed: {}", e))?;

        let (sink, stream) = client.split();

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let transport = Arc::new(TokioWebSocketTransport::new(sink));

        // Queue Connected before the pump can push any frame.
        let _ = event_tx.send(TransportEvent::Connected).await;
        tokio::task::spawn(read_pump(stream, event_tx));

        Ok((transport, event_rx))
    }
}

async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<TransportEvent>) {
    let clean = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                trace!("<-- Received text frame: {} bytes", text.len());
                if event_tx
                    .send(TransportEvent::TextReceived(text.to_string()))
                    .await
                    .is_err()
                {
                    warn!("Event receiver dropped, closing read pump");
                    break true;
                }
            }
            Some(Ok(Message::Binary(data))) => {
                warn!("Ignoring binary frame of {} bytes", data.len());
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                if event_tx.send(TransportEvent::Heartbeat).await.is_err() {
                    warn!("Event receiver dropped, closing read pump");
                    break true;
                }
            }
            Some(Ok(Message::Close(frame))) => {
                debug!("Received close frame: {frame:?}");
                break true;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!("Error reading from websocket: {e}");
                break false;
            }
            None => {
                trace!("Websocket stream ended");
                break false;
            }
        }
    };

    let _ = event_tx.send(TransportEvent::Disconnected { clean }).await;
}

/// Replaces the value of a `token` query parameter for logging.
pub fn redact_token(url: &str) -> String {
    let Some((base, query)) = url.split_once('?') else {
        return url.to_string();
    };
    let query: Vec<String> = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some(("token", _)) => "token=***".to_string(),
            _ => pair.to_string(),
        })
        .collect();
    format!("{base}?{}", query.join("&"))
}
