use super::events::{CloseEvent, Payload, TransportEvent};
use super::options::TransportConfig;
use crate::error::{ReadClientError, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::*;
use std::borrow::Cow;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Close code reported when the connection dropped without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;
pub const NORMAL_CLOSURE: u16 = 1000;

// Type alias for the WebSocket stream
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Sender half handed to a transport for reporting its events.
pub type TransportEvents = mpsc::UnboundedSender<TransportEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

/// One live, self-reconnecting duplex connection.
#[async_trait]
pub trait Transport: Send + Sync {
    fn ready_state(&self) -> ReadyState;

    /// Queues `payload` for delivery; payloads sent before the connection is
    /// open are flushed once it is.
    fn send(&self, payload: Payload) -> Result<()>;

    /// Closes with `code` and resolves once the close is acknowledged or the
    /// transport gave up waiting.
    async fn close(&self, code: u16);
}

/// Constructs transports. Inject a custom one through
/// [`ConnectionOptions::set_custom_transport`](super::ConnectionOptions::set_custom_transport).
pub trait TransportFactory: Send + Sync {
    fn create(
        &self,
        url: &str,
        protocols: &[String],
        config: &TransportConfig,
        events: TransportEvents,
    ) -> Result<Arc<dyn Transport>>;
}

/// Default factory backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteFactory;

impl TransportFactory for TungsteniteFactory {
    fn create(
        &self,
        url: &str,
        protocols: &[String],
        config: &TransportConfig,
        events: TransportEvents,
    ) -> Result<Arc<dyn Transport>> {
        // Fail fast on a request that can never be built.
        build_request(url, protocols, &config.headers)?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(None);
        let state = Arc::new(AtomicU8::new(ReadyState::Connecting as u8));
        let enqueued = Arc::new(AtomicUsize::new(0));

        let worker = Worker {
            url: url.to_string(),
            protocols: protocols.to_vec(),
            config: config.clone(),
            events,
            commands: command_rx,
            shutdown: shutdown_rx,
            state: Arc::clone(&state),
            enqueued: Arc::clone(&enqueued),
        };
        let handle = tokio::spawn(worker.run());

        Ok(Arc::new(TungsteniteTransport {
            commands: command_tx,
            shutdown: shutdown_tx,
            state,
            enqueued,
            max_enqueued: config.max_enqueued_messages,
            close_timeout: config.connection_timeout,
            worker: Mutex::new(Some(handle)),
        }))
    }
}

pub struct TungsteniteTransport {
    commands: mpsc::UnboundedSender<Message>,
    shutdown: watch::Sender<Option<u16>>,
    state: Arc<AtomicU8>,
    enqueued: Arc<AtomicUsize>,
    max_enqueued: Option<usize>,
    close_timeout: std::time::Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Transport for TungsteniteTransport {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn send(&self, payload: Payload) -> Result<()> {
        if self.ready_state() == ReadyState::Closed {
            return Err(ReadClientError::WebsocketError(
                "transport is closed".to_string(),
            ));
        }
        if let Some(max) = self.max_enqueued {
            if self.enqueued.load(Ordering::SeqCst) >= max {
                return Err(ReadClientError::WebsocketError(format!(
                    "outbound queue is full ({} messages)",
                    max
                )));
            }
        }
        let message = match payload {
            Payload::Text(text) => Message::Text(text),
            Payload::Binary(bytes) => Message::Binary(bytes),
        };
        self.enqueued.fetch_add(1, Ordering::SeqCst);
        self.commands.send(message).map_err(|e| {
            self.enqueued.fetch_sub(1, Ordering::SeqCst);
            ReadClientError::WebsocketError(format!("Failed to send message: {}", e))
        })
    }

    async fn close(&self, code: u16) {
        if self.ready_state() != ReadyState::Closed {
            self.state
                .store(ReadyState::Closing as u8, Ordering::SeqCst);
        }
        let _ = self.shutdown.send(Some(code));

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut handle) = handle {
            // Close handshake is bounded inside the worker; this covers a stuck connect.
            if timeout(self.close_timeout * 2, &mut handle).await.is_err() {
                warn!("WebSocket transport did not stop in time, aborting worker.");
                handle.abort();
            }
        }
        self.state.store(ReadyState::Closed as u8, Ordering::SeqCst);
    }
}

impl Drop for TungsteniteTransport {
    fn drop(&mut self) {
        if let Some(handle) = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

fn build_request(
    url: &str,
    protocols: &[String],
    headers: &[(String, String)],
) -> Result<Request> {
    let mut request = url
        .into_client_request()
        .map_err(|e| ReadClientError::WebsocketError(format!("Invalid request: {}", e)))?;

    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(invalid_header)?;
        let value = HeaderValue::from_str(value).map_err(invalid_header)?;
        request.headers_mut().insert(name, value);
    }
    if !protocols.is_empty() {
        let value = HeaderValue::from_str(&protocols.join(", ")).map_err(invalid_header)?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", value);
    }
    Ok(request)
}

fn invalid_header(e: impl std::fmt::Display) -> ReadClientError {
    ReadClientError::WebsocketError(format!("Invalid header: {}", e))
}

/// How a single connection ended.
enum Outcome {
    Shutdown,
    Dropped { code: u16, reason: String },
}

struct Worker {
    url: String,
    protocols: Vec<String>,
    config: TransportConfig,
    events: TransportEvents,
    commands: mpsc::UnboundedReceiver<Message>,
    shutdown: watch::Receiver<Option<u16>>,
    state: Arc<AtomicU8>,
    enqueued: Arc<AtomicUsize>,
}

impl Worker {
    /// Connect/reconnect loop. Runs until shutdown or until retries are exhausted.
    async fn run(mut self) {
        let mut retries: u32 = 0;
        loop {
            let delay = self.config.reconnection_delay(retries);
            if !delay.is_zero() {
                debug!("Reconnecting to {} in {:?} (retry {})...", self.url, delay, retries);
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = self.shutdown.changed() => break,
                }
            }

            self.set_state(ReadyState::Connecting);
            let request = match build_request(&self.url, &self.protocols, &self.config.headers) {
                Ok(request) => request,
                Err(e) => {
                    self.emit(TransportEvent::Error(e.to_string()));
                    break;
                }
            };

            info!("Connecting to WebSocket: {}", self.url);
            let attempt = timeout(self.config.connection_timeout, connect_async(request));
            let connected = tokio::select! {
                result = attempt => result,
                _ = self.shutdown.changed() => break,
            };

            let dropped = match connected {
                Ok(Ok((stream, response))) => {
                    info!(
                        "WebSocket connected successfully. Response: {:?}",
                        response.status()
                    );
                    self.set_state(ReadyState::Open);
                    self.emit(TransportEvent::Open);
                    let opened_at = Instant::now();

                    match self.pump(stream).await {
                        Outcome::Shutdown => break,
                        Outcome::Dropped { code, reason } => {
                            if opened_at.elapsed() >= self.config.min_uptime {
                                retries = 0;
                            }
                            Some((code, reason))
                        }
                    }
                }
                Ok(Err(e)) => {
                    error!("WebSocket connection failed: {}", e);
                    self.emit(TransportEvent::Error(format!(
                        "WebSocket connection failed: {}",
                        e
                    )));
                    None
                }
                Err(_) => {
                    error!(
                        "WebSocket connection timed out after {:?}",
                        self.config.connection_timeout
                    );
                    self.emit(TransportEvent::Error("WebSocket connection timed out".to_string()));
                    None
                }
            };

            self.set_state(ReadyState::Connecting);
            retries += 1;
            let will_reconnect = retries <= self.config.max_retries;
            if let Some((code, reason)) = dropped {
                warn!("WebSocket disconnected with code {}.", code);
                self.emit(TransportEvent::Close(CloseEvent {
                    code,
                    reason,
                    will_reconnect,
                }));
            } else if !will_reconnect {
                self.emit(TransportEvent::Close(CloseEvent {
                    code: ABNORMAL_CLOSURE,
                    reason: "connection failed".to_string(),
                    will_reconnect: false,
                }));
            }

            if !will_reconnect {
                error!(
                    "Max retries ({}) reached. Stopping connection attempts.",
                    self.config.max_retries
                );
                break;
            }
        }
        self.set_state(ReadyState::Closed);
        info!("WebSocket transport worker finished.");
    }

    /// Drives one open connection: inbound frames, outbound queue, shutdown.
    async fn pump(&mut self, stream: WsStream) -> Outcome {
        let (mut write, mut read) = stream.split();
        loop {
            tokio::select! {
                inbound = read.next() => match inbound {
                    Some(Ok(msg)) => match msg {
                        Message::Text(text) => {
                            self.trace_frame("Received WS Text", &text);
                            self.emit(TransportEvent::Message(Payload::Text(text)));
                        }
                        Message::Binary(bin) => {
                            self.trace_frame("Received WS Binary", &format!("{} bytes", bin.len()));
                            self.emit(TransportEvent::Message(Payload::Binary(bin)));
                        }
                        Message::Ping(ping_data) => {
                            trace!("Received WS Ping, sending Pong");
                            if let Err(e) = write.send(Message::Pong(ping_data)).await {
                                error!("Failed to send Pong: {}", e);
                                self.emit(TransportEvent::Error(e.to_string()));
                                return Outcome::Dropped {
                                    code: ABNORMAL_CLOSURE,
                                    reason: e.to_string(),
                                };
                            }
                        }
                        Message::Pong(_) => {
                            trace!("Received WS Pong");
                        }
                        Message::Close(close_frame) => {
                            warn!("Received WS Close frame: {:?}", close_frame);
                            let (code, reason) = close_frame
                                .map(|f| (u16::from(f.code), f.reason.into_owned()))
                                .unwrap_or((NORMAL_CLOSURE, String::new()));
                            return Outcome::Dropped { code, reason };
                        }
                        Message::Frame(_) => { /* Ignore */ }
                    },
                    Some(Err(e)) => {
                        error!("WebSocket read error: {}", e);
                        self.emit(TransportEvent::Error(e.to_string()));
                        return Outcome::Dropped {
                            code: ABNORMAL_CLOSURE,
                            reason: e.to_string(),
                        };
                    }
                    None => {
                        info!("WebSocket stream ended (read None).");
                        return Outcome::Dropped { code: ABNORMAL_CLOSURE, reason: String::new() };
                    }
                },
                outbound = self.commands.recv() => match outbound {
                    Some(message) => {
                        self.enqueued.fetch_sub(1, Ordering::SeqCst);
                        self.trace_frame("Sending WS message", &message.to_string());
                        if let Err(e) = write.send(message).await {
                            error!("WebSocket send error: {}", e);
                            self.emit(TransportEvent::Error(e.to_string()));
                            return Outcome::Dropped {
                                code: ABNORMAL_CLOSURE,
                                reason: e.to_string(),
                            };
                        }
                    }
                    // Every handle to the transport is gone.
                    None => {
                        let _ = write.send(Message::Close(None)).await;
                        return Outcome::Shutdown;
                    }
                },
                _ = self.shutdown.changed() => {
                    let code = self.shutdown.borrow().unwrap_or(NORMAL_CLOSURE);
                    self.set_state(ReadyState::Closing);
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: Cow::Borrowed(""),
                    };
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        debug!("Failed to send close frame: {}", e);
                        return Outcome::Shutdown;
                    }
                    // Wait for the peer's close acknowledgement.
                    let ack = timeout(self.config.connection_timeout, async {
                        while let Some(Ok(msg)) = read.next().await {
                            if msg.is_close() {
                                break;
                            }
                        }
                    });
                    if ack.await.is_err() {
                        debug!("Close acknowledgement timed out.");
                    }
                    return Outcome::Shutdown;
                }
            }
        }
    }

    fn set_state(&self, state: ReadyState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn emit(&self, event: TransportEvent) {
        // The owning socket may already have detached; that is fine.
        let _ = self.events.send(event);
    }

    fn trace_frame(&self, what: &str, detail: &str) {
        if self.config.debug {
            debug!("{}: {}", what, detail);
        } else {
            trace!("{}: {}", what, detail);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_sets_headers_and_protocols() {
        let headers = vec![("Client".to_string(), "test-client/v1".to_string())];
        let protocols = vec!["wamp".to_string(), "soap".to_string()];
        let request = build_request("ws://localhost:4442/ws", &protocols, &headers).unwrap();

        assert_eq!(request.headers()["Client"], "test-client/v1");
        assert_eq!(request.headers()["Sec-WebSocket-Protocol"], "wamp, soap");
    }

    #[test]
    fn test_build_request_rejects_bad_header() {
        let headers = vec![("Client".to_string(), "bad\nvalue".to_string())];
        assert!(build_request("ws://localhost/ws", &[], &headers).is_err());
    }

    #[test]
    fn test_ready_state_round_trip() {
        for state in [
            ReadyState::Connecting,
            ReadyState::Open,
            ReadyState::Closing,
            ReadyState::Closed,
        ] {
            assert_eq!(ReadyState::from_u8(state as u8), state);
        }
    }
}
