//! Duplex text transports.
//!
//! The connection lifecycle only needs whole text messages delivered in order, plus a
//! signal when the peer goes away (the stream ends or yields an error). [`Transport`]
//! captures exactly that; [`WebSocketTransport`] is the production implementation.

use crate::{PocaError, Result};
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;
use url::Url;

/// Outbound half of an open transport.
pub type TextSink = Pin<Box<dyn Sink<String, Error = PocaError> + Send>>;

/// Inbound half of an open transport. Ends when the peer closes.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Opens duplex text connections.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a new connection to `url`.
    async fn open(&self, url: &Url) -> Result<(TextSink, TextStream)>;
}

/// WebSocket transport over `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &Url) -> Result<(TextSink, TextStream)> {
        let (ws_stream, _response) =
            connect_async(url.as_str())
                .await
                .map_err(|e| PocaError::ConnectFailed {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;

        debug!("WebSocket handshake with {} complete", url);

        let (ws_sink, ws_stream) = ws_stream.split();

        let sink = ws_sink
            .sink_map_err(PocaError::from)
            .with(|text: String| future::ready(Ok::<_, PocaError>(Message::text(text))));

        let stream = ws_stream.filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => Some(
                    String::from_utf8(bytes.to_vec())
                        .map_err(|_| PocaError::protocol("binary frame is not valid UTF-8")),
                ),
                // Ping/pong and close frames carry no protocol messages
                Ok(_) => None,
                Err(e) => Some(Err(PocaError::from(e))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-process transport for deterministic lifecycle tests.

    use super::*;
    use crate::codec::{self, Envelope};
    use futures::channel::mpsc as fmpsc;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::{mpsc, Notify};

    /// Server side of one in-memory connection.
    pub struct MemoryPeer {
        pub from_client: fmpsc::UnboundedReceiver<String>,
        pub to_client: fmpsc::UnboundedSender<Result<String>>,
    }

    impl MemoryPeer {
        /// Next envelope sent by the client.
        pub async fn recv(&mut self) -> Option<Envelope> {
            let text = self.from_client.next().await?;
            Some(codec::decode(&text).expect("client sent an undecodable message"))
        }

        pub fn send(&self, envelope: Envelope) {
            self.send_raw(codec::encode(&envelope).unwrap());
        }

        pub fn send_raw(&self, text: impl Into<String>) {
            self.to_client
                .unbounded_send(Ok(text.into()))
                .expect("client stream dropped");
        }

        /// Everything the client has sent so far, without waiting.
        pub fn drain(&mut self) -> Vec<Envelope> {
            let mut out = Vec::new();
            while let Some(Some(text)) = self.from_client.next().now_or_never() {
                out.push(codec::decode(&text).unwrap());
            }
            out
        }
    }

    /// Hands every opened connection's server side to the test.
    pub struct MemoryTransport {
        peers: mpsc::UnboundedSender<MemoryPeer>,
        refuse: AtomicBool,
        gate: Mutex<Option<Arc<Notify>>>,
    }

    impl MemoryTransport {
        pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
            let (peers, rx) = mpsc::unbounded_channel();
            (
                Self {
                    peers,
                    refuse: AtomicBool::new(false),
                    gate: Mutex::new(None),
                },
                rx,
            )
        }

        pub fn refuse_connections(&self, refuse: bool) {
            self.refuse.store(refuse, Ordering::SeqCst);
        }

        /// Make every later `open` wait until the returned gate is notified.
        pub fn hold_opens(&self) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            *self.gate.lock().unwrap() = Some(gate.clone());
            gate
        }
    }

    #[async_trait::async_trait]
    impl Transport for MemoryTransport {
        async fn open(&self, url: &Url) -> Result<(TextSink, TextStream)> {
            let gate = self.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if self.refuse.load(Ordering::SeqCst) {
                return Err(PocaError::ConnectFailed {
                    url: url.to_string(),
                    message: "connection refused".to_string(),
                });
            }

            let (client_tx, from_client) = fmpsc::unbounded::<String>();
            let (to_client, client_rx) = fmpsc::unbounded::<Result<String>>();
            self.peers
                .send(MemoryPeer {
                    from_client,
                    to_client,
                })
                .map_err(|_| PocaError::Other("test dropped the peer receiver".into()))?;

            let sink = client_tx.sink_map_err(|e| PocaError::Other(e.to_string()));
            Ok((Box::pin(sink), Box::pin(client_rx)))
        }
    }
}
