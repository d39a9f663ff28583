//! Poca Client - reactive mirrors of server-owned values.
//!
//! A [`PocaClient`] keeps local copies ("mirrors") of named values owned by a sync
//! server, connected over a WebSocket. Reading a mirror inside [`effect`] registers the
//! effect as a dependent; writing a mirror pushes the value to the server and re-runs
//! its dependents immediately. Values pushed by the server re-run dependents too.
//!
//! # Example
//!
//! ```rust,ignore
//! use poca_client::{effect, PocaClient};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Answer {
//!     answer: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> poca_client::Result<()> {
//!     let poca = PocaClient::new("localhost:2341")?;
//!     poca.connect().await?;
//!
//!     let guess = poca.reactive::<serde_json::Value>("guess").await?;
//!     let answer = poca.reactive::<Answer>("answer").await?;
//!
//!     let shown = answer.clone();
//!     effect(move || {
//!         if let Ok(answer) = shown.get() {
//!             println!("Answer is now {}", answer.answer);
//!         }
//!     });
//!
//!     guess.set_field("guess", "50")?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod ledger;
pub mod transport;

mod client;
mod connection;
mod effect;
mod reactive;
mod store;

pub use client::{ClientId, PocaClient};
pub use config::ClientConfig;
pub use connection::ConnectionState;
pub use effect::{effect, is_recording, untracked, Effect};
pub use error::{PocaError, Result};
pub use reactive::Reactive;
pub use transport::{TextSink, TextStream, Transport, WebSocketTransport};
