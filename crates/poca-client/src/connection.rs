//! Connection lifecycle.
//!
//! A `Connection` owns the transport handle and the Up/Down state machine:
//!
//! - `Down` is the initial state. Lookups issued while Down go to the backlog and are
//!   flushed, in order, exactly once on the next successful `connect()`.
//! - `connect()` replaces any existing handle, spawns a writer task (outbound messages
//!   are queued, never awaited) and a reader task that routes inbound messages.
//! - `close()` or the peer going away moves back to `Down` and fails every lookup whose
//!   Get already went out, since its response can no longer arrive.
//!
//! Each handle is tagged with an epoch so a reader task left over from a replaced
//! handle can never flip the state of the current one.

use crate::codec::{self, Envelope, MessageKind};
use crate::config::ClientConfig;
use crate::ledger::PendingRequests;
use crate::store::MirrorStore;
use crate::transport::{TextSink, TextStream, Transport};
use crate::{ClientId, PocaError, Result};
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

/// Connection state as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    Up,
    #[default]
    Down,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Up => f.write_str("Up"),
            ConnectionState::Down => f.write_str("Down"),
        }
    }
}

struct ConnectionInner {
    state: ConnectionState,
    epoch: u64,
    outbound: Option<mpsc::UnboundedSender<String>>,
    backlog: VecDeque<String>,
    pending: PendingRequests,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl ConnectionInner {
    /// Queue `envelope` on the writer. Returns false when there is no live handle.
    fn send(&self, envelope: &Envelope) -> Result<bool> {
        let Some(outbound) = &self.outbound else {
            return Ok(false);
        };
        let text = codec::encode(envelope)?;
        Ok(outbound.send(text).is_ok())
    }
}

/// Duplex connection to the sync server.
pub struct Connection {
    client: ClientId,
    url: Url,
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    store: Arc<MirrorStore>,
    inner: Arc<Mutex<ConnectionInner>>,
}

impl Connection {
    pub fn new(
        client: ClientId,
        url: Url,
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<MirrorStore>,
    ) -> Self {
        Self {
            client,
            url,
            config,
            transport,
            store,
            inner: Arc::new(Mutex::new(ConnectionInner {
                state: ConnectionState::Down,
                epoch: 0,
                outbound: None,
                backlog: VecDeque::new(),
                pending: PendingRequests::new(),
                reader: None,
                writer: None,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConnectionInner> {
        self.inner.lock().expect("connection lock poisoned")
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Open a fresh handle, closing the current one first.
    pub async fn connect(&self) -> Result<()> {
        self.close();
        let epoch = {
            let mut inner = self.lock();
            inner.epoch += 1;
            inner.epoch
        };

        info!("{}: connecting to {}", self.client, self.url);

        let (sink, stream) =
            tokio::time::timeout(self.config.connect_timeout, self.transport.open(&self.url))
                .await
                .map_err(|_| PocaError::Timeout(self.config.connect_timeout))??;

        let mut inner = self.lock();
        if inner.epoch != epoch {
            debug!(
                "{}: connect to {} superseded by a newer connect or close",
                self.client, self.url
            );
            return Err(PocaError::NotConnected);
        }

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        inner.writer = Some(tokio::spawn(write_loop(
            self.client,
            epoch,
            sink,
            outbound_rx,
            self.inner.clone(),
        )));
        inner.reader = Some(tokio::spawn(read_loop(
            self.client,
            epoch,
            stream,
            self.inner.clone(),
            self.store.clone(),
        )));
        inner.outbound = Some(outbound);
        inner.state = ConnectionState::Up;

        let backlog: Vec<String> = inner.backlog.drain(..).collect();
        for key in &backlog {
            if inner.send(&Envelope::get(key))? {
                inner.pending.mark_dispatched(key);
            }
        }

        info!(
            "{}: connected to {} ({} deferred lookup(s) flushed)",
            self.client,
            self.url,
            backlog.len()
        );
        Ok(())
    }

    /// Close the handle if present and move to Down. Idempotent.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.epoch += 1;
        if let Some(reader) = inner.reader.take() {
            reader.abort();
        }
        // Dropping the sender lets the writer drain queued messages and close the sink.
        let had_handle = inner.outbound.take().is_some();
        inner.writer = None;
        inner.state = ConnectionState::Down;
        let failed = inner.pending.fail_dispatched();

        if had_handle {
            info!(
                "{}: closed connection to {} ({} in-flight lookup(s) failed)",
                self.client, self.url, failed
            );
        }
    }

    /// Close and wait until every queued outbound message has been written.
    pub async fn shutdown(&self) {
        let writer = self.lock().writer.take();
        self.close();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                debug!("{}: writer task ended abnormally: {}", self.client, e);
            }
        }
    }

    /// Issue a Get for `key` and return the continuation the response will complete.
    ///
    /// While Down the Get is deferred to the backlog, or fails with `NotConnected` when
    /// buffering is disabled.
    pub fn get(&self, key: &str) -> Result<oneshot::Receiver<Result<String>>> {
        let (responder, response) = oneshot::channel();
        let mut inner = self.lock();

        if inner.state == ConnectionState::Up && inner.send(&Envelope::get(key))? {
            inner.pending.enqueue(key, responder, true);
        } else if self.config.buffer_while_down {
            debug!("{}: deferring lookup of {} until connected", self.client, key);
            inner.backlog.push_back(key.to_string());
            inner.pending.enqueue(key, responder, false);
        } else {
            return Err(PocaError::NotConnected);
        }

        Ok(response)
    }

    /// Look up the current payload for `key`, waiting for the server's response.
    pub async fn lookup(&self, key: &str) -> Result<String> {
        let response = self.get(key)?;
        let outcome = match self.config.request_timeout {
            Some(limit) => tokio::time::timeout(limit, response)
                .await
                .map_err(|_| PocaError::Timeout(limit))?,
            None => response.await,
        };
        outcome.map_err(|_| PocaError::ConnectionClosed {
            key: key.to_string(),
        })?
    }

    /// Push a new payload for `key`. Dropped while Down.
    pub fn set(&self, key: &str, payload: String) {
        self.send_or_drop(Envelope::set(key, payload));
    }

    /// Fire a named signal. Dropped while Down.
    pub fn emit(&self, signal: &str) {
        self.send_or_drop(Envelope::emit(signal));
    }

    fn send_or_drop(&self, envelope: Envelope) {
        let inner = self.lock();
        match inner.send(&envelope) {
            Ok(true) => {}
            Ok(false) => debug!(
                "{}: connection Down, dropping {} for {}",
                self.client,
                envelope.kind,
                envelope.key_or_empty()
            ),
            Err(e) => error!(
                "{}: failed to encode {} for {}: {}",
                self.client,
                envelope.kind,
                envelope.key_or_empty(),
                e
            ),
        }
    }

    pub fn backlog_len(&self) -> usize {
        self.lock().backlog.len()
    }

    pub fn pending_lookups(&self) -> usize {
        self.lock().pending.total()
    }
}

async fn write_loop(
    client: ClientId,
    epoch: u64,
    mut sink: TextSink,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inner: Arc<Mutex<ConnectionInner>>,
) {
    while let Some(text) = outbound.recv().await {
        if let Err(e) = sink.send(text).await {
            warn!("{}: failed to send message: {}", client, e);
            mark_down(client, epoch, &inner);
            return;
        }
    }
    if let Err(e) = sink.close().await {
        debug!("{}: error closing transport: {}", client, e);
    }
}

async fn read_loop(
    client: ClientId,
    epoch: u64,
    mut stream: TextStream,
    inner: Arc<Mutex<ConnectionInner>>,
    store: Arc<MirrorStore>,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(text) => route_inbound(client, epoch, &text, &inner, &store),
            Err(e) => {
                warn!("{}: transport error: {}", client, e);
                break;
            }
        }
    }
    mark_down(client, epoch, &inner);
}

/// Dispatch one inbound message. Failures are logged and never stop the reader.
///
/// Messages read from a handle that has since been replaced or closed are dropped.
fn route_inbound(
    client: ClientId,
    epoch: u64,
    text: &str,
    inner: &Mutex<ConnectionInner>,
    store: &MirrorStore,
) {
    if inner.lock().expect("connection lock poisoned").epoch != epoch {
        debug!("{}: dropping message from a closed connection", client);
        return;
    }

    let envelope = match codec::decode(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("{}: discarding inbound message: {}", client, e);
            return;
        }
    };
    let key = envelope.key.unwrap_or_default();

    match envelope.kind {
        MessageKind::Get => {
            let mut inner = inner.lock().expect("connection lock poisoned");
            if inner.epoch != epoch {
                debug!(
                    "{}: dropping Get response for {} from a closed connection",
                    client, key
                );
                return;
            }
            match envelope.payload {
                Some(payload) => {
                    inner.pending.resolve(&key, payload);
                }
                None => {
                    warn!("{}: Get response for {} without data", client, key);
                    inner.pending.reject(
                        &key,
                        PocaError::protocol(format!("Get response for {} without data", key)),
                    );
                }
            }
        }
        MessageKind::Set => match envelope.payload {
            Some(payload) => {
                if let Err(e) = store.apply_remote(&key, &payload) {
                    warn!("{}: ignoring Set for {}: {}", client, key, e);
                }
            }
            None => warn!("{}: ignoring Set for {} without data", client, key),
        },
        MessageKind::Error => warn!(
            "{}: server reported an error for {:?}: {}",
            client,
            key,
            envelope.payload.as_deref().unwrap_or("")
        ),
        MessageKind::Emit => warn!("{}: unexpected inbound Emit {:?}", client, key),
    }
}

fn mark_down(client: ClientId, epoch: u64, inner: &Mutex<ConnectionInner>) {
    let mut inner = inner.lock().expect("connection lock poisoned");
    if inner.epoch != epoch {
        return;
    }
    // Retire this handle so the surviving half of it goes quiet.
    inner.epoch += 1;
    inner.state = ConnectionState::Down;
    inner.outbound = None;
    if let Some(reader) = inner.reader.take() {
        reader.abort();
    }
    inner.writer = None;
    let failed = inner.pending.fail_dispatched();
    info!(
        "{}: connection lost ({} in-flight lookup(s) failed)",
        client, failed
    );
}
