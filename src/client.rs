use crate::error::{ReadClientError, Result};
use crate::message::{decode_inbound, Inbound, MessageEnvelope, SignedData};
use crate::subscription::SubscriptionState;
use crate::websocket::{
    CloseEvent, ConnectionOptions, ErrorEvent, Listener, MessageEvent, OpenEvent, ResilientSocket,
    NORMAL_CLOSURE,
};
use log::*;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type ListenCallback = Arc<dyn Fn(Inbound) + Send + Sync + 'static>;
pub type OpenCallback = Arc<dyn Fn(&OpenEvent) + Send + Sync + 'static>;
pub type ErrorCallback = Arc<dyn Fn(&ErrorEvent) + Send + Sync + 'static>;
pub type CloseCallback = Arc<dyn Fn(&CloseEvent) + Send + Sync + 'static>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientStatus {
    pub chain_name: Option<String>,
    pub chain_version: Option<String>,
    pub connected: bool,
    pub subscribed: bool,
}

#[derive(Default)]
struct Callbacks {
    listen: Option<ListenCallback>,
    open: Option<OpenCallback>,
    error: Option<ErrorCallback>,
    close: Option<CloseCallback>,
}

/// Socket-side listeners owned by the client. Created once so that
/// re-registering them on every connect is idempotent.
struct Bridges {
    open: Listener<OpenEvent>,
    message: Listener<MessageEvent>,
    error: Listener<ErrorEvent>,
    close: Listener<CloseEvent>,
}

struct Shared {
    socket: ResilientSocket,
    subscription: Mutex<SubscriptionState>,
    callbacks: Mutex<Callbacks>,
    // Set when the transport dropped and is retrying; the next open resubscribes.
    reopening: AtomicBool,
    is_web: bool,
}

/// Subscription client for a read node.
///
/// # Examples
///
/// ```no_run
/// use tcabci_read_client::client::ReadClient;
/// use tcabci_read_client::message::Inbound;
/// use tcabci_read_client::websocket::ConnectionOptions;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() {
///     let client = ReadClient::new(ConnectionOptions::default()).expect("Invalid options");
///     client.set_listen_callback(Arc::new(|msg: Inbound| println!("Received: {:?}", msg)));
///
///     client.start().await.expect("Failed to connect");
///     client
///         .subscribe(&["your_address"], None, &["storage"])
///         .expect("Failed to subscribe");
///
///     tokio::signal::ctrl_c().await.expect("Failed to listen for ctrl+c");
///     client.stop(1000).await.expect("Failed to stop");
/// }
/// ```
pub struct ReadClient {
    shared: Arc<Shared>,
    bridges: Bridges,
    chain_name: Option<String>,
    chain_version: Option<String>,
}

impl ReadClient {
    pub fn new(options: ConnectionOptions) -> Result<Self> {
        Self::with_web_marker(options, true)
    }

    /// Like [`new`](Self::new), choosing the `is_web` marker sent in every envelope.
    pub fn with_web_marker(options: ConnectionOptions, is_web: bool) -> Result<Self> {
        let shared = Arc::new(Shared {
            socket: ResilientSocket::new(options)?,
            subscription: Mutex::new(SubscriptionState::new()),
            callbacks: Mutex::new(Callbacks::default()),
            reopening: AtomicBool::new(false),
            is_web,
        });
        let bridges = Bridges::new(&shared);
        Ok(Self {
            shared,
            bridges,
            chain_name: None,
            chain_version: None,
        })
    }

    /// Tags [`status`](Self::status) with the chain this client reads from.
    pub fn with_chain(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.chain_name = Some(name.into());
        self.chain_version = Some(version.into());
        self
    }

    pub fn socket(&self) -> &ResilientSocket {
        &self.shared.socket
    }

    // --- Callbacks ---

    pub fn set_listen_callback(&self, callback: ListenCallback) -> &Self {
        self.shared.callbacks().listen = Some(callback);
        self
    }

    pub fn set_open_callback(&self, callback: OpenCallback) -> &Self {
        self.shared.callbacks().open = Some(callback);
        self
    }

    pub fn set_error_callback(&self, callback: ErrorCallback) -> &Self {
        self.shared.callbacks().error = Some(callback);
        self
    }

    pub fn set_close_callback(&self, callback: CloseCallback) -> &Self {
        self.shared.callbacks().close = Some(callback);
        self
    }

    // --- Lifecycle ---

    /// Connects to the read node. Starts from an empty subscription.
    pub async fn start(&self) -> Result<()> {
        if self.is_connected() {
            return Err(ReadClientError::AlreadyConnectedError);
        }
        self.shared.subscription().reset();
        self.shared.reopening.store(false, Ordering::SeqCst);
        self.attach_bridges()?;
        self.shared.socket.connect(false).await
    }

    pub async fn stop(&self, code: u16) -> Result<()> {
        if !self.is_connected() {
            return Err(ReadClientError::NotConnected);
        }
        self.shared.socket.disconnect(code).await;
        self.shared.subscription().reset();
        info!("Read client stopped.");
        Ok(())
    }

    /// Drops the current connection and opens a new one. The subscription is reset.
    pub async fn reconnect(&self, code: u16) -> Result<()> {
        self.shared.socket.disconnect(code).await;
        self.shared.subscription().reset();
        self.shared.reopening.store(false, Ordering::SeqCst);
        self.attach_bridges()?;
        self.shared.socket.connect(true).await
    }

    fn attach_bridges(&self) -> Result<()> {
        let socket = &self.shared.socket;
        socket.add_open_listener(Arc::clone(&self.bridges.open))?;
        socket.add_message_listener(Arc::clone(&self.bridges.message))?;
        socket.add_error_listener(Arc::clone(&self.bridges.error))?;
        socket.add_close_listener(Arc::clone(&self.bridges.close))?;
        Ok(())
    }

    // --- Subscription ---

    /// Subscribes to `addresses`, returning the ones not subscribed before.
    ///
    /// The envelope carries the full merged address set. `signed_data`
    /// replaces the stored tokens when given; `tx_types` must name members of
    /// [`TxType`](crate::types::TxType).
    pub fn subscribe<A, T>(
        &self,
        addresses: &[A],
        signed_data: Option<SignedData>,
        tx_types: &[T],
    ) -> Result<Vec<String>>
    where
        A: AsRef<str>,
        T: AsRef<str>,
    {
        let mut subscription = self.shared.subscription();
        let request = subscription.prepare(addresses, signed_data, tx_types)?;
        if !self.is_connected() {
            return Err(ReadClientError::NotConnected);
        }

        let envelope = MessageEnvelope::subscribe(
            self.shared.is_web,
            request.addresses.clone(),
            request.signed_data.clone(),
            request.tx_types.clone(),
        );
        self.shared.socket.send(envelope.encode()?)?;

        let delta = request.delta.clone();
        debug!(
            "Subscribed to {} addresses ({} new).",
            request.addresses.len(),
            delta.len()
        );
        subscription.commit(request);
        Ok(delta)
    }

    pub fn unsubscribe(&self) -> Result<()> {
        let mut subscription = self.shared.subscription();
        let addresses = subscription.unsubscribe_addresses()?;
        let envelope = MessageEnvelope::unsubscribe(self.shared.is_web, addresses);
        self.shared.socket.send(envelope.encode()?)?;
        subscription.reset();
        debug!("Unsubscribed.");
        Ok(())
    }

    // --- State ---

    pub fn is_connected(&self) -> bool {
        self.shared.socket.ready()
    }

    pub fn is_subscribed(&self) -> bool {
        self.shared.subscription().is_subscribed()
    }

    pub fn subscribed_addresses(&self) -> Vec<String> {
        self.shared.subscription().addresses().to_vec()
    }

    /// Stored signed data, or `None` when there is none.
    pub fn subscribed_signed_data(&self) -> Option<SignedData> {
        let subscription = self.shared.subscription();
        if subscription.signed_data().is_empty() {
            None
        } else {
            Some(subscription.signed_data().clone())
        }
    }

    pub fn status(&self) -> ClientStatus {
        ClientStatus {
            chain_name: self.chain_name.clone(),
            chain_version: self.chain_version.clone(),
            connected: self.is_connected(),
            subscribed: self.is_subscribed(),
        }
    }
}

impl Shared {
    fn subscription(&self) -> MutexGuard<'_, SubscriptionState> {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn callbacks(&self) -> MutexGuard<'_, Callbacks> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Re-sends the full subscription after the transport reopened on its own.
    fn resubscribe(&self) {
        let envelope = {
            let subscription = self.subscription();
            if !subscription.is_subscribed() {
                return;
            }
            MessageEnvelope::subscribe(
                self.is_web,
                subscription.addresses().to_vec(),
                subscription.signed_data().clone(),
                subscription.tx_types().to_vec(),
            )
        };
        info!("Resubscribing to {} addresses...", envelope.addrs.len());
        let sent = envelope
            .encode()
            .and_then(|text| self.socket.send(text));
        if let Err(e) = sent {
            error!("Failed to send resubscription: {}", e);
        }
    }
}

impl Bridges {
    fn new(shared: &Arc<Shared>) -> Self {
        let weak = Arc::downgrade(shared);
        let open: Listener<OpenEvent> = Arc::new({
            let weak = weak.clone();
            move |event: &OpenEvent| {
                let Some(shared) = weak.upgrade() else { return };
                if shared.reopening.swap(false, Ordering::SeqCst) {
                    shared.resubscribe();
                }
                let callback = shared.callbacks().open.clone();
                if let Some(callback) = callback {
                    callback(event);
                }
            }
        });

        let message: Listener<MessageEvent> = Arc::new({
            let weak = weak.clone();
            move |event: &MessageEvent| {
                let Some(shared) = weak.upgrade() else { return };
                let Some(inbound) = decode_inbound(&event.data) else {
                    trace!("Received acknowledgement.");
                    return;
                };
                let callback = shared.callbacks().listen.clone();
                if let Some(callback) = callback {
                    callback(inbound);
                }
            }
        });

        let error: Listener<ErrorEvent> = Arc::new({
            let weak = weak.clone();
            move |event: &ErrorEvent| {
                let Some(shared) = weak.upgrade() else { return };
                let callback = shared.callbacks().error.clone();
                if let Some(callback) = callback {
                    callback(event);
                }
            }
        });

        let close: Listener<CloseEvent> = Arc::new(move |event: &CloseEvent| {
            let Some(shared) = weak.upgrade() else { return };
            if event.will_reconnect {
                shared.reopening.store(true, Ordering::SeqCst);
            } else {
                shared.subscription().reset();
            }
            let callback = shared.callbacks().close.clone();
            if let Some(callback) = callback {
                callback(event);
            }
        });

        Self {
            open,
            message,
            error,
            close,
        }
    }
}

impl Drop for ReadClient {
    fn drop(&mut self) {
        if self.shared.socket.ready() {
            debug!("Read client dropped while connected, closing with code {}.", NORMAL_CLOSURE);
            let socket = self.shared.socket.clone();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { socket.disconnect(NORMAL_CLOSURE).await });
            }
        }
    }
}
