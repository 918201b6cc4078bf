//! Provider transports
//!
//! A [`Connector`] produces a [`FrameChannel`]: an unbounded queue of frames
//! towards the provider and a queue of frames received from it. The
//! connection manager only ever sees these two queues; the WebSocket pumps
//! (or the in-memory pairing used by tests) live behind them.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use protocol::Frame;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::ORIGIN;
use tracing::{debug, info, warn};

use crate::error::HidError;

/// Transport-level failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("Connecting to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("Invalid provider endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },
}

impl From<TransportError> for HidError {
    fn from(err: TransportError) -> Self {
        HidError::ProviderUnreachable(err.to_string())
    }
}

/// Both directions of an established connection
#[derive(Debug)]
pub struct FrameChannel {
    pub outgoing: mpsc::UnboundedSender<Frame>,
    pub incoming: mpsc::UnboundedReceiver<Frame>,
}

/// Establishes connections to the provider
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<FrameChannel, TransportError>;
}

/// WebSocket connector for the local provider process
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    origin: Option<String>,
    report_ids: bool,
    connect_timeout: Option<Duration>,
}

impl WebSocketConnector {
    /// Report-id mode is on by default
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            origin: None,
            report_ids: true,
            connect_timeout: None,
        }
    }

    /// Origin header presented to the provider
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Ask the provider to include report ids in input frames
    pub fn with_report_ids(mut self, enabled: bool) -> Self {
        self.report_ids = enabled;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// URL actually dialed; report-id mode selects the `/r1` path
    pub fn endpoint(&self) -> String {
        if self.report_ids {
            format!("{}/r1", self.url.trim_end_matches('/'))
        } else {
            self.url.clone()
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<FrameChannel, TransportError> {
        let endpoint = self.endpoint();
        let invalid = |reason: String| TransportError::InvalidEndpoint {
            url: endpoint.clone(),
            reason,
        };

        let mut request = endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| invalid(e.to_string()))?;
        if let Some(origin) = &self.origin {
            let value = HeaderValue::from_str(origin)
                .map_err(|e| invalid(format!("invalid origin {:?}: {}", origin, e)))?;
            request.headers_mut().insert(ORIGIN, value);
        }

        debug!("Connecting to HID provider at {}", endpoint);
        let connecting = tokio_tungstenite::connect_async(request);
        let result = match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connecting)
                .await
                .map_err(|_| TransportError::Timeout {
                    url: endpoint.clone(),
                    timeout,
                })?,
            None => connecting.await,
        };
        let (socket, _response) = result.map_err(|e| TransportError::Connect {
            url: endpoint.clone(),
            reason: e.to_string(),
        })?;
        info!("Connected to HID provider at {}", endpoint);

        let (mut sink, mut stream) = socket.split();
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<Frame>();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel::<Frame>();

        // Writer: runs until the manager drops its sender
        tokio::spawn(async move {
            while let Some(frame) = outgoing_rx.recv().await {
                let message = match frame {
                    Frame::Text(text) => Message::text(text),
                    Frame::Binary(data) => Message::binary(data),
                };
                if let Err(e) = sink.send(message).await {
                    debug!("WebSocket send failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Reader: runs until the socket closes or the manager stops listening
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let frame = match message {
                    Ok(Message::Text(text)) => Frame::Text(text.as_str().to_owned()),
                    Ok(Message::Binary(data)) => Frame::Binary(data),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("WebSocket receive error: {}", e);
                        break;
                    }
                };
                if incoming_tx.send(frame).is_err() {
                    break;
                }
            }
            debug!("WebSocket reader finished");
        });

        Ok(FrameChannel {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
        })
    }
}

/// Provider end of an in-memory connection
#[derive(Debug)]
pub struct ProviderSide {
    pub from_client: mpsc::UnboundedReceiver<Frame>,
    pub to_client: mpsc::UnboundedSender<Frame>,
}

impl ProviderSide {
    /// Next frame sent by the client, `None` once the client hung up
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Returns false if the client side is gone
    pub fn send(&self, frame: Frame) -> bool {
        self.to_client.send(frame).is_ok()
    }
}

/// Accepts in-memory connections made through a [`MemoryConnector`]
#[derive(Debug)]
pub struct MemoryProvider {
    accepted: mpsc::UnboundedReceiver<ProviderSide>,
}

impl MemoryProvider {
    /// Wait for the next client connection
    pub async fn accept(&mut self) -> Option<ProviderSide> {
        self.accepted.recv().await
    }
}

/// In-process connector paired with a [`MemoryProvider`]
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<ProviderSide>,
    refusing: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn pair() -> (MemoryConnector, MemoryProvider) {
        let (accept_tx, accepted) = mpsc::unbounded_channel();
        (
            MemoryConnector {
                accept_tx,
                refusing: Arc::new(AtomicBool::new(false)),
                attempts: Arc::new(AtomicUsize::new(0)),
            },
            MemoryProvider { accepted },
        )
    }

    /// Make subsequent connection attempts fail
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Number of connection attempts so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<FrameChannel, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        // Let concurrent callers pile onto the same attempt
        tokio::task::yield_now().await;

        let refused = |reason: &str| TransportError::Connect {
            url: "memory://provider".to_string(),
            reason: reason.to_string(),
        };
        if self.refusing.load(Ordering::SeqCst) {
            return Err(refused("connection refused"));
        }

        let (outgoing, from_client) = mpsc::unbounded_channel();
        let (to_client, incoming) = mpsc::unbounded_channel();
        self.accept_tx
            .send(ProviderSide {
                from_client,
                to_client,
            })
            .map_err(|_| refused("provider is gone"))?;

        Ok(FrameChannel { outgoing, incoming })
    }
}
