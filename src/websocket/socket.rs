use super::dispatch::Dispatcher;
use super::events::{
    CloseEvent, ErrorEvent, EventKind, MessageEvent, OpenEvent, Payload, TransportEvent,
};
use super::listeners::{Listener, ListenerRegistry};
use super::options::ConnectionOptions;
use super::transport::{ReadyState, Transport, TransportFactory, TungsteniteFactory, NORMAL_CLOSURE};
use crate::error::{ReadClientError, Result};
use log::*;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

const FATAL_ERROR_MESSAGE: &str = "Internet connectivity problem!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Websocket wrapper that owns one transport at a time and delivers its
/// events to registered listeners.
///
/// Cloning yields another handle to the same socket, which is how listeners
/// reach back into it (to `send` or to spawn a `disconnect`).
#[derive(Clone)]
pub struct ResilientSocket {
    inner: Arc<Inner>,
}

struct Inner {
    id: Uuid,
    url: String,
    options: ConnectionOptions,
    factory: Arc<dyn TransportFactory>,
    core: Mutex<Core>,
    listeners: Mutex<Listeners>,
    dispatcher: Dispatcher,
}

struct Core {
    state: SocketState,
    // Bumped every time a transport is attached or detached; events tagged
    // with an older epoch are dropped.
    epoch: u64,
    error_count: u32,
    transport: Option<Arc<dyn Transport>>,
    bridge: Option<JoinHandle<()>>,
    pending: Option<oneshot::Sender<Result<()>>>,
}

struct Listeners {
    open: ListenerRegistry<OpenEvent>,
    message: ListenerRegistry<MessageEvent>,
    error: ListenerRegistry<ErrorEvent>,
    close: ListenerRegistry<CloseEvent>,
}

impl Listeners {
    fn new(capacity: usize) -> Self {
        Self {
            open: ListenerRegistry::new(capacity),
            message: ListenerRegistry::new(capacity),
            error: ListenerRegistry::new(capacity),
            close: ListenerRegistry::new(capacity),
        }
    }

    fn clear(&mut self) {
        self.open.clear();
        self.message.clear();
        self.error.clear();
        self.close.clear();
    }
}

/// A transport that has been unhooked from the socket but not yet closed.
struct Detached {
    transport: Option<Arc<dyn Transport>>,
    bridge: Option<JoinHandle<()>>,
}

impl Detached {
    async fn shutdown(self, code: u16) {
        if let Some(bridge) = self.bridge {
            bridge.abort();
        }
        if let Some(transport) = self.transport {
            transport.close(code).await;
        }
    }

    /// Like [`shutdown`](Self::shutdown), for use from inside the bridge task
    /// itself, which must not abort its own handle.
    async fn shutdown_from_bridge(self, code: u16) {
        drop(self.bridge);
        if let Some(transport) = self.transport {
            transport.close(code).await;
        }
    }
}

impl Core {
    fn detach(&mut self) -> Detached {
        self.epoch += 1;
        if let Some(pending) = self.pending.take() {
            let _ = pending.send(Err(ReadClientError::ConnectAborted));
        }
        Detached {
            transport: self.transport.take(),
            bridge: self.bridge.take(),
        }
    }
}

impl ResilientSocket {
    /// Validates `options` and takes ownership of them.
    pub fn new(options: ConnectionOptions) -> Result<Self> {
        options.check()?;
        let factory: Arc<dyn TransportFactory> = match options.make().custom_transport {
            Some(factory) => factory,
            None => Arc::new(TungsteniteFactory),
        };
        let url = options.url();
        let capacity = options.max_listeners();

        Ok(Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                url,
                options,
                factory,
                core: Mutex::new(Core {
                    state: SocketState::Disconnected,
                    epoch: 0,
                    error_count: 0,
                    transport: None,
                    bridge: None,
                    pending: None,
                }),
                listeners: Mutex::new(Listeners::new(capacity)),
                dispatcher: Dispatcher::new(),
            }),
        })
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn state(&self) -> SocketState {
        self.inner.core().state
    }

    /// True when the socket is open and its transport reports open.
    pub fn ready(&self) -> bool {
        let core = self.inner.core();
        core.state == SocketState::Open
            && core
                .transport
                .as_ref()
                .map_or(false, |t| t.ready_state() == ReadyState::Open)
    }

    /// Consecutive transport errors since the last open or disconnect.
    pub fn error_count(&self) -> u32 {
        self.inner.core().error_count
    }

    /// Creates a transport and resolves once it reports open.
    ///
    /// Fails with [`ReadClientError::AlreadyConnectedError`] if already open and
    /// `force` is false. With `force`, the current connection is disconnected
    /// first (which clears every listener registry).
    pub async fn connect(&self, force: bool) -> Result<()> {
        if self.state() == SocketState::Open {
            if !force {
                return Err(ReadClientError::AlreadyConnectedError);
            }
            self.disconnect(NORMAL_CLOSURE).await;
        }

        let inner = &self.inner;
        inner.dispatcher.start();
        let config = inner.options.make();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let prepared = {
            let mut core = inner.core();
            let stale = core.detach();
            let created =
                inner.factory.create(&inner.url, inner.options.protocols(), &config, events_tx);
            match created {
                Ok(transport) => {
                    core.epoch += 1;
                    let epoch = core.epoch;
                    let (opened_tx, opened_rx) = oneshot::channel();
                    core.transport = Some(transport);
                    core.pending = Some(opened_tx);
                    core.state = SocketState::Connecting;
                    core.bridge = Some(tokio::spawn(run_bridge(
                        Arc::downgrade(inner),
                        epoch,
                        events_rx,
                    )));
                    Ok((stale, opened_rx))
                }
                Err(e) => {
                    core.state = SocketState::Disconnected;
                    Err((stale, e))
                }
            }
        };
        let opened = match prepared {
            Ok((stale, opened)) => {
                stale.shutdown(NORMAL_CLOSURE).await;
                opened
            }
            Err((stale, e)) => {
                stale.shutdown(NORMAL_CLOSURE).await;
                error!("[Socket {}] Failed to create transport: {}", inner.id, e);
                return Err(e);
            }
        };

        info!("[Socket {}] Connecting to {}...", inner.id, inner.url);
        match opened.await {
            Ok(result) => result,
            Err(_) => Err(ReadClientError::ConnectAborted),
        }
    }

    /// Disconnects (if connected) and connects again with a fresh transport.
    pub async fn reconnect(&self, code: u16) -> Result<()> {
        self.disconnect(code).await;
        self.connect(true).await
    }

    /// Detaches and closes the transport with `code`, clearing every
    /// listener registry and the error counter.
    ///
    /// No-op when already disconnected or closing. A connect still in flight
    /// is rejected with [`ReadClientError::ConnectAborted`].
    pub async fn disconnect(&self, code: u16) {
        let inner = &self.inner;
        let (detached, epoch) = {
            let mut core = inner.core();
            match core.state {
                SocketState::Disconnected | SocketState::Closing => return,
                SocketState::Connecting | SocketState::Open => {}
            }
            let detached = core.detach();
            core.state = SocketState::Closing;
            core.error_count = 0;
            (detached, core.epoch)
        };
        inner.listeners().clear();

        info!("[Socket {}] Disconnecting with code {}.", inner.id, code);
        detached.shutdown(code).await;

        let mut core = inner.core();
        if core.epoch == epoch {
            core.state = SocketState::Disconnected;
        }
    }

    /// Forwards `payload` to the transport as-is. No-op without a transport.
    pub fn send(&self, payload: impl Into<Payload>) -> Result<()> {
        let transport = self.inner.core().transport.clone();
        match transport {
            Some(transport) => transport.send(payload.into()),
            None => Ok(()),
        }
    }

    // --- Listener registration ---

    pub fn add_open_listener(&self, listener: Listener<OpenEvent>) -> Result<&Self> {
        self.inner.listeners().open.add(listener)?;
        Ok(self)
    }

    pub fn remove_open_listener(&self, listener: &Listener<OpenEvent>) -> &Self {
        self.inner.listeners().open.remove(listener);
        self
    }

    pub fn add_message_listener(&self, listener: Listener<MessageEvent>) -> Result<&Self> {
        self.inner.listeners().message.add(listener)?;
        Ok(self)
    }

    pub fn remove_message_listener(&self, listener: &Listener<MessageEvent>) -> &Self {
        self.inner.listeners().message.remove(listener);
        self
    }

    pub fn add_error_listener(&self, listener: Listener<ErrorEvent>) -> Result<&Self> {
        self.inner.listeners().error.add(listener)?;
        Ok(self)
    }

    pub fn remove_error_listener(&self, listener: &Listener<ErrorEvent>) -> &Self {
        self.inner.listeners().error.remove(listener);
        self
    }

    pub fn add_close_listener(&self, listener: Listener<CloseEvent>) -> Result<&Self> {
        self.inner.listeners().close.add(listener)?;
        Ok(self)
    }

    pub fn remove_close_listener(&self, listener: &Listener<CloseEvent>) -> &Self {
        self.inner.listeners().close.remove(listener);
        self
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        let listeners = self.inner.listeners();
        match kind {
            EventKind::Open => listeners.open.len(),
            EventKind::Message => listeners.message.len(),
            EventKind::Error => listeners.error.len(),
            EventKind::Close => listeners.close.len(),
        }
    }
}

impl std::fmt::Debug for ResilientSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientSocket")
            .field("id", &self.inner.id)
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues one deferred call per listener registered at this moment.
    fn emit<E, F>(&self, select: F, event: E)
    where
        E: Send + Sync + 'static,
        F: FnOnce(&Listeners) -> Vec<Listener<E>>,
    {
        let snapshot = select(&self.listeners());
        let event = Arc::new(event);
        for listener in snapshot {
            let event = Arc::clone(&event);
            self.dispatcher.schedule(move || listener(event.as_ref()));
        }
    }

    /// Handles one transport event. Returns false once the bridge should stop.
    async fn handle_event(&self, epoch: u64, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Open => {
                let pending = {
                    let mut core = self.core();
                    if core.epoch != epoch {
                        return false;
                    }
                    core.error_count = 0;
                    core.state = SocketState::Open;
                    core.pending.take()
                };
                info!("[Socket {}] Open.", self.id);
                if let Some(pending) = pending {
                    let _ = pending.send(Ok(()));
                }
                self.emit(
                    |l| l.open.snapshot(),
                    OpenEvent {
                        url: self.url.clone(),
                    },
                );
                true
            }
            TransportEvent::Message(data) => {
                if self.core().epoch != epoch {
                    return false;
                }
                self.emit(|l| l.message.snapshot(), MessageEvent { data });
                true
            }
            TransportEvent::Error(message) => self.handle_error(epoch, message).await,
            TransportEvent::Close(event) => {
                let (pending, detached) = {
                    let mut core = self.core();
                    if core.epoch != epoch {
                        return false;
                    }
                    if event.will_reconnect {
                        if core.state == SocketState::Open {
                            core.state = SocketState::Connecting;
                        }
                        (None, None)
                    } else {
                        let pending = core.pending.take();
                        let detached = core.detach();
                        core.state = SocketState::Disconnected;
                        (pending, Some(detached))
                    }
                };
                if event.will_reconnect {
                    warn!(
                        "[Socket {}] Transport closed with code {}, waiting for it to reconnect.",
                        self.id, event.code
                    );
                }
                let code = event.code;
                self.emit(|l| l.close.snapshot(), event);
                match detached {
                    Some(detached) => {
                        warn!("[Socket {}] Transport gave up, disconnected.", self.id);
                        if let Some(pending) = pending {
                            let _ = pending.send(Err(ReadClientError::WebsocketError(format!(
                                "connection closed with code {}",
                                code
                            ))));
                        }
                        detached.shutdown_from_bridge(NORMAL_CLOSURE).await;
                        false
                    }
                    None => true,
                }
            }
        }
    }

    async fn handle_error(&self, epoch: u64, message: String) -> bool {
        let (escalate, pending) = {
            let mut core = self.core();
            if core.epoch != epoch {
                return false;
            }
            core.error_count += 1;
            let pending = if core.state == SocketState::Connecting {
                core.pending.take()
            } else {
                None
            };
            (core.error_count > self.options.error_threshold(), pending)
        };
        error!("[Socket {}] Transport error: {}", self.id, message);
        self.emit(|l| l.error.snapshot(), ErrorEvent::transport(message.clone()));

        // Failed before ever opening: reject the pending connect.
        if let Some(pending) = pending {
            let detached = {
                let mut core = self.core();
                let detached = core.detach();
                core.state = SocketState::Disconnected;
                detached
            };
            let _ = pending.send(Err(ReadClientError::WebsocketError(message)));
            detached.shutdown_from_bridge(NORMAL_CLOSURE).await;
            return false;
        }

        if escalate {
            warn!(
                "[Socket {}] {} consecutive transport errors, forcing disconnect.",
                self.id,
                self.options.error_threshold() + 1
            );
            self.emit(|l| l.error.snapshot(), ErrorEvent::fatal(FATAL_ERROR_MESSAGE));
            // Close listeners learn the socket is down before the registries go.
            self.emit(
                |l| l.close.snapshot(),
                CloseEvent {
                    code: NORMAL_CLOSURE,
                    reason: FATAL_ERROR_MESSAGE.to_string(),
                    will_reconnect: false,
                },
            );
            let detached = {
                let mut core = self.core();
                let detached = core.detach();
                core.error_count = 0;
                core.state = SocketState::Disconnected;
                detached
            };
            self.listeners().clear();
            detached.shutdown_from_bridge(NORMAL_CLOSURE).await;
            return false;
        }
        true
    }
}

/// Forwards one transport's events into the socket until it is detached.
async fn run_bridge(
    inner: Weak<Inner>,
    epoch: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.handle_event(epoch, event).await {
            break;
        }
    }
    trace!("Socket bridge for epoch {} finished.", epoch);
}
