//! Client synchronization core for the chatter realtime chat server.
//!
//! The SDK keeps one WebSocket connection to the server, authenticates
//! over it with a bearer token, reconnects with bounded linear backoff,
//! and maintains a local ordered message log plus an online-user view
//! that follow server-pushed events. Consumers get a command handle and
//! an event stream:
//!
//! ```rust,no_run
//! use chatter_sdk::{connect, ConnectConfig};
//!
//! # async fn example() {
//! let (handle, mut events) = connect(ConnectConfig::default(), "my-token");
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # }
//! ```
//!
//! Module map: [`transport`] moves raw text frames, [`protocol`] is the
//! wire codec, [`client`] supervises the connection and the auth
//! handshake, [`store`] holds the message log, [`presence`] the online
//! set, and [`api`] the HTTP collaborators (history, presence snapshot).

pub mod api;
pub mod client;
mod dispatch;
pub mod error;
pub mod event;
pub mod presence;
pub mod protocol;
pub mod store;
pub mod transport;

pub use client::{
    ClientHandle, ConnectConfig, ConnectionState, ReconnectConfig, connect,
    connect_with_transport,
};
pub use error::{Error, Result};
pub use event::ClientEvent;
