//! Reconnection-aware websocket layer.
//!
//! [`ResilientSocket`] owns one transport connection at a time and forwards
//! its events to listeners registered per event class (open, message, error,
//! close).
//!
//! # Architecture
//!
//! - [`ConnectionOptions`] holds the target URL, the timeouts and the
//!   reconnection policy. The socket takes ownership of it.
//! - A [`Transport`] does the actual I/O. The default one,
//!   [`TungsteniteFactory`], reconnects on its own with exponential backoff;
//!   another implementation can be injected through
//!   [`ConnectionOptions::set_custom_transport`].
//! - Listener calls are deferred onto a dispatcher task, so a listener may
//!   call back into the socket (`send`, or spawn a `disconnect`) without
//!   running inside the transport's own event handling.
//! - Repeated transport errors without an intervening open (more than the
//!   escalation threshold, 15 by default) produce one extra fatal
//!   [`ErrorEvent`] and force a disconnect.
//!
//! # Usage
//!
//! ```no_run
//! use tcabci_read_client::websocket::{ConnectionOptions, MessageEvent, ResilientSocket};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let socket = ResilientSocket::new(ConnectionOptions::default()).expect("Invalid options");
//!
//!     socket
//!         .add_message_listener(Arc::new(|event: &MessageEvent| {
//!             println!("Received: {:?}", event.data);
//!         }))
//!         .expect("Too many listeners");
//!
//!     socket.connect(false).await.expect("Failed to connect");
//!     socket.send("hello").expect("Failed to send");
//!
//!     tokio::signal::ctrl_c().await.expect("Failed to listen for ctrl+c");
//!     socket.disconnect(1000).await;
//! }
//! ```
//!
//! # Listener lifetime
//!
//! Every disconnect clears all four listener registries. Listeners must be
//! registered again before the next `connect`.

mod dispatch;
pub mod events;
pub mod listeners;
pub mod options;
pub mod socket;
pub mod transport;

// Re-export the main types for easier access
pub use events::{
    CloseEvent, ErrorEvent, EventKind, MessageEvent, OpenEvent, Payload, TransportEvent,
};
pub use listeners::{Listener, ListenerRegistry};
pub use options::{ConnectionOptions, TransportConfig};
pub use socket::{ResilientSocket, SocketState};
pub use transport::{
    ReadyState, Transport, TransportEvents, TransportFactory, TungsteniteFactory,
    TungsteniteTransport, ABNORMAL_CLOSURE, NORMAL_CLOSURE,
};
