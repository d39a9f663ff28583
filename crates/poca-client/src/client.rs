//! Public client surface.

use crate::codec;
use crate::config::{parse_address, ClientConfig};
use crate::connection::{Connection, ConnectionState};
use crate::reactive::Reactive;
use crate::store::MirrorStore;
use crate::transport::{Transport, WebSocketTransport};
use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use url::Url;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of one client instance within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub(crate) fn next() -> Self {
        ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// A client that mirrors server-owned values.
///
/// Each instance owns its own mirrors and dependency sets. Dropping the client closes
/// its connection; queued outbound messages are still written. Use
/// [`shutdown`](Self::shutdown) to wait for that to finish.
pub struct PocaClient {
    id: ClientId,
    store: Arc<MirrorStore>,
    connection: Arc<Connection>,
}

impl PocaClient {
    /// Create a client for `addr` (`host:port`, optionally `ws://` or `wss://`).
    ///
    /// The client starts Down; call [`connect`](Self::connect) to go Up.
    pub fn new(addr: &str) -> Result<Self> {
        Self::with_config(addr, ClientConfig::default())
    }

    pub fn with_config(addr: &str, config: ClientConfig) -> Result<Self> {
        Self::with_transport(addr, config, Arc::new(WebSocketTransport))
    }

    /// Create a client that opens connections through a custom transport.
    pub fn with_transport(
        addr: &str,
        config: ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let url = parse_address(addr)?;
        let id = ClientId::next();
        let store = Arc::new(MirrorStore::new(id));
        let connection = Arc::new(Connection::new(id, url, config, transport, store.clone()));

        debug!("{}: created for {}", id, connection.url());

        Ok(Self {
            id,
            store,
            connection,
        })
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn url(&self) -> &Url {
        self.connection.url()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Connect, replacing any existing connection, and flush deferred lookups.
    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    /// Close the connection and move to Down.
    pub fn close(&self) {
        self.connection.close();
    }

    /// Close the connection and wait for queued outbound messages to be written.
    pub async fn shutdown(&self) {
        self.connection.shutdown().await;
    }

    /// Fetch `key` from the server and mirror it.
    ///
    /// Resets the key's dependents. While Down the lookup waits for the next
    /// `connect()` (unless buffering is disabled).
    pub async fn reactive<T>(&self, key: &str) -> Result<Reactive<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        let payload = self.connection.lookup(key).await?;
        let value: Value = codec::decode_payload(&payload)?;
        // Reject a shape mismatch here rather than on the first read.
        serde_json::from_value::<T>(value.clone())?;

        self.store.init(key, value);
        debug!("{}: mirroring {}", self.id, key);
        Ok(Reactive::new(key, self.store.clone(), self.connection.clone()))
    }

    /// Mirror `key` seeded with `initial`, pushing the seed to the server.
    ///
    /// Does not wait for the server. Resets the key's dependents.
    pub fn reactive_with_default<T>(&self, key: &str, initial: T) -> Result<Reactive<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        let value = serde_json::to_value(&initial)?;
        self.connection.set(key, codec::encode_payload(&value)?);
        self.store.init(key, value);
        Ok(Reactive::new(key, self.store.clone(), self.connection.clone()))
    }

    /// Fire a named signal. Dropped while Down.
    pub fn emit(&self, signal: &str) {
        self.connection.emit(signal);
    }

    /// Lookups deferred until the next connect.
    pub fn deferred_lookups(&self) -> usize {
        self.connection.backlog_len()
    }

    /// Lookups still waiting for a response, deferred ones included.
    pub fn pending_lookups(&self) -> usize {
        self.connection.pending_lookups()
    }
}

impl fmt::Debug for PocaClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PocaClient")
            .field("id", &self.id)
            .field("url", &self.connection.url().as_str())
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for PocaClient {
    fn drop(&mut self) {
        self.connection.close();
    }
}
