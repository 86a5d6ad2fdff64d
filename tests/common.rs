// tests/common.rs
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tcabci_read_client::websocket::{
    CloseEvent, ConnectionOptions, Listener, Payload, ReadyState, Transport, TransportConfig,
    TransportEvent, TransportEvents, TransportFactory,
};
use tcabci_read_client::Result;
use tokio::time::{sleep, Instant};

static INIT: Once = Once::new();

// Loads .env (for RUST_LOG) and initializes test logging once across all tests.
pub fn setup() {
    INIT.call_once(|| {
        dotenv::dotenv().ok();
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// What a freshly created mock transport does on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    OpenImmediately,
    FailImmediately,
    Silent,
}

pub struct MockTransport {
    events: TransportEvents,
    state: AtomicU8,
    sent: Mutex<Vec<Payload>>,
    closed_with: Mutex<Option<u16>>,
}

impl MockTransport {
    fn new(events: TransportEvents) -> Self {
        Self {
            events,
            state: AtomicU8::new(ReadyState::Connecting as u8),
            sent: Mutex::new(Vec::new()),
            closed_with: Mutex::new(None),
        }
    }

    pub fn open(&self) {
        self.state.store(ReadyState::Open as u8, Ordering::SeqCst);
        self.emit(TransportEvent::Open);
    }

    pub fn error(&self, message: &str) {
        self.emit(TransportEvent::Error(message.to_string()));
    }

    pub fn message(&self, text: &str) {
        self.emit(TransportEvent::Message(Payload::from(text)));
    }

    /// Simulates the connection dropping while the transport keeps retrying.
    pub fn drop_connection(&self) {
        self.state
            .store(ReadyState::Connecting as u8, Ordering::SeqCst);
        self.emit(TransportEvent::Close(CloseEvent {
            code: 1006,
            reason: String::new(),
            will_reconnect: true,
        }));
    }

    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn sent(&self) -> Vec<Payload> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_text(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|p| p.as_text().map(str::to_string))
            .collect()
    }

    pub fn closed_with(&self) -> Option<u16> {
        *self.closed_with.lock().unwrap()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn ready_state(&self) -> ReadyState {
        match self.state.load(Ordering::SeqCst) {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }

    fn send(&self, payload: Payload) -> Result<()> {
        self.sent.lock().unwrap().push(payload);
        Ok(())
    }

    async fn close(&self, code: u16) {
        *self.closed_with.lock().unwrap() = Some(code);
        self.state.store(ReadyState::Closed as u8, Ordering::SeqCst);
    }
}

pub struct MockTransportFactory {
    behavior: Mutex<MockBehavior>,
    created: Mutex<Vec<Arc<MockTransport>>>,
    urls: Mutex<Vec<String>>,
}

impl MockTransportFactory {
    pub fn new(behavior: MockBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            created: Mutex::new(Vec::new()),
            urls: Mutex::new(Vec::new()),
        })
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn transport(&self, index: usize) -> Arc<MockTransport> {
        Arc::clone(&self.created.lock().unwrap()[index])
    }

    pub fn last(&self) -> Arc<MockTransport> {
        Arc::clone(self.created.lock().unwrap().last().expect("no transport created"))
    }

    pub fn created(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(
        &self,
        url: &str,
        _protocols: &[String],
        _config: &TransportConfig,
        events: TransportEvents,
    ) -> Result<Arc<dyn Transport>> {
        let transport = Arc::new(MockTransport::new(events));
        match *self.behavior.lock().unwrap() {
            MockBehavior::OpenImmediately => transport.open(),
            MockBehavior::FailImmediately => transport.error("connection refused"),
            MockBehavior::Silent => {}
        }
        self.created.lock().unwrap().push(Arc::clone(&transport));
        self.urls.lock().unwrap().push(url.to_string());
        Ok(transport)
    }
}

/// Options that route the socket through `factory`.
pub fn mock_options(factory: &Arc<MockTransportFactory>) -> ConnectionOptions {
    let mut options = ConnectionOptions::new("localhost");
    options
        .set_secure(false)
        .set_port(4442)
        .set_custom_transport(Arc::clone(factory) as Arc<dyn TransportFactory>);
    options
}

/// A listener that records every event it sees.
pub fn recorder<E: Clone + Send + Sync + 'static>() -> (Listener<E>, Arc<Mutex<Vec<E>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let listener: Listener<E> = Arc::new({
        let seen = Arc::clone(&seen);
        move |event: &E| seen.lock().unwrap().push(event.clone())
    });
    (listener, seen)
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Lets the dispatcher drain anything already queued.
pub async fn settle() {
    sleep(Duration::from_millis(50)).await;
}
