use super::transport::TransportFactory;
use crate::error::{ReadClientError, Result};
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const HTTPS_PORT: u16 = 443;
pub const HTTP_PORT: u16 = 80;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(7000);
/// Ceiling for the connection timeout, checked by [`ConnectionOptions::check`].
pub const LONG_TIMEOUT: Duration = Duration::from_millis(14000);

pub const DEFAULT_WS_ADDRESS: &str = "wss://read-node-01.transferchain.io/ws";
pub const DEFAULT_ENDPOINTS: [&str; 2] = ["ws", "longpoll"];

pub const DEFAULT_MAX_CONNECTION_DELAY: Duration = Duration::from_millis(10000);
pub const DEFAULT_RECONNECTION_DELAY_GROW_FACTOR: f64 = 1.3;
pub const DEFAULT_MIN_UPTIME: Duration = Duration::from_millis(5000);
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Consecutive transport errors tolerated before the socket force-closes.
pub const DEFAULT_ERROR_THRESHOLD: u32 = 15;
/// Capacity of each listener registry.
pub const MAX_LISTENER_SIZE: usize = 100;

const MIN_RECONNECTION_DELAY_BASE_MS: u64 = 1000;
const MIN_RECONNECTION_DELAY_JITTER_MS: u64 = 4000;

/// Connection settings for a [`ResilientSocket`](super::ResilientSocket).
///
/// Built with chained `set_*` calls, then handed to the socket, which owns it
/// from then on.
///
/// ```
/// use tcabci_read_client::websocket::ConnectionOptions;
/// use std::time::Duration;
///
/// let mut options = ConnectionOptions::new("localhost");
/// options
///     .set_secure(false)
///     .set_port(4442)
///     .set_max_retries(1)
///     .set_timeout(Duration::from_millis(100));
///
/// assert_eq!(options.url(), "ws://localhost:4442/ws");
/// assert!(options.check().is_ok());
/// ```
#[derive(Clone)]
pub struct ConnectionOptions {
    host: String,
    port: u16,
    secure: bool,
    timeout: Duration,
    long_poll: bool,
    protocols: Vec<String>,
    endpoints: [String; 2],
    custom_transport: Option<Arc<dyn TransportFactory>>,
    max_connection_delay: Duration,
    min_reconnection_delay: Duration,
    reconnection_delay_grow_factor: f64,
    min_uptime: Duration,
    max_retries: u32,
    max_enqueued_messages: Option<usize>,
    debug: bool,
    error_threshold: u32,
    max_listeners: usize,
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("url", &self.url())
            .field("timeout", &self.timeout)
            .field("long_poll", &self.long_poll)
            .field("protocols", &self.protocols)
            .field("custom_transport", &self.custom_transport.is_some())
            .field("max_connection_delay", &self.max_connection_delay)
            .field("min_reconnection_delay", &self.min_reconnection_delay)
            .field(
                "reconnection_delay_grow_factor",
                &self.reconnection_delay_grow_factor,
            )
            .field("min_uptime", &self.min_uptime)
            .field("max_retries", &self.max_retries)
            .field("max_enqueued_messages", &self.max_enqueued_messages)
            .field("debug", &self.debug)
            .field("error_threshold", &self.error_threshold)
            .field("max_listeners", &self.max_listeners)
            .finish()
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::new(DEFAULT_WS_ADDRESS)
    }
}

impl ConnectionOptions {
    /// Creates options for `host` with the defaults: 7s timeout, secure, port 443.
    ///
    /// `host` is either a bare host name (`read-node-01.transferchain.io`) or
    /// a full `ws://`/`wss://` URL, which is then used verbatim.
    pub fn new(host: impl Into<String>) -> Self {
        let jitter = rand::thread_rng().gen_range(0..MIN_RECONNECTION_DELAY_JITTER_MS);
        Self {
            host: host.into(),
            port: HTTPS_PORT,
            secure: true,
            timeout: DEFAULT_TIMEOUT,
            long_poll: false,
            protocols: Vec::new(),
            endpoints: DEFAULT_ENDPOINTS.map(String::from),
            custom_transport: None,
            max_connection_delay: DEFAULT_MAX_CONNECTION_DELAY,
            min_reconnection_delay: Duration::from_millis(MIN_RECONNECTION_DELAY_BASE_MS + jitter),
            reconnection_delay_grow_factor: DEFAULT_RECONNECTION_DELAY_GROW_FACTOR,
            min_uptime: DEFAULT_MIN_UPTIME,
            max_retries: DEFAULT_MAX_RETRIES,
            max_enqueued_messages: None,
            debug: std::env::var_os("DEBUG").is_some(),
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            max_listeners: MAX_LISTENER_SIZE,
        }
    }

    /// Validates the timeout ceiling and that [`url`](Self::url) is a websocket URL.
    pub fn check(&self) -> Result<()> {
        if self.timeout > LONG_TIMEOUT {
            return Err(ReadClientError::ConfigurationError(format!(
                "timeout must not exceed {}ms, got {}ms",
                LONG_TIMEOUT.as_millis(),
                self.timeout.as_millis()
            )));
        }

        let url = Url::parse(&self.url())
            .map_err(|e| ReadClientError::ConfigurationError(format!("invalid url: {}", e)))?;
        match url.scheme() {
            "ws" | "wss" => Ok(()),
            scheme => Err(ReadClientError::ConfigurationError(format!(
                "unsupported url scheme '{}'",
                scheme
            ))),
        }
    }

    /// The websocket URL the transport connects to.
    pub fn url(&self) -> String {
        let port_suffix = if self.is_standard_port() {
            String::new()
        } else {
            format!(":{}", self.port)
        };

        if self.host.starts_with("ws://") || self.host.starts_with("wss://") {
            if port_suffix.is_empty() {
                return self.host.clone();
            }
            // Only place the port after the authority when the host parses
            // and has none of its own.
            if let Ok(mut url) = Url::parse(&self.host) {
                if url.port().is_none() && url.set_port(Some(self.port)).is_ok() {
                    return url.to_string().trim_end_matches('/').to_string();
                }
                return self.host.clone();
            }
            return format!("{}{}", self.host, port_suffix);
        }

        let scheme = if self.secure { "wss" } else { "ws" };
        let endpoint = if self.is_long_poll() {
            &self.endpoints[1]
        } else {
            &self.endpoints[0]
        };
        format!("{}://{}{}/{}", scheme, self.host, port_suffix, endpoint)
    }

    /// Long-poll mode is carried through configuration but never selected.
    pub fn is_long_poll(&self) -> bool {
        false
    }

    /// Produces the record the transport is constructed from.
    pub fn make(&self) -> TransportConfig {
        TransportConfig {
            max_reconnection_delay: self.max_connection_delay,
            min_reconnection_delay: self.min_reconnection_delay,
            reconnection_delay_grow_factor: self.reconnection_delay_grow_factor,
            min_uptime: self.min_uptime,
            connection_timeout: self.timeout,
            max_retries: self.max_retries,
            max_enqueued_messages: self.max_enqueued_messages,
            debug: self.debug,
            headers: vec![("Client".to_string(), client_header())],
            custom_transport: self.custom_transport.clone(),
        }
    }

    fn is_standard_port(&self) -> bool {
        self.port == HTTP_PORT || self.port == HTTPS_PORT
    }

    // --- Setters ---

    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = timeout;
        self
    }

    pub fn set_secure(&mut self, secure: bool) -> &mut Self {
        self.secure = secure;
        self
    }

    pub fn set_port(&mut self, port: u16) -> &mut Self {
        self.port = port;
        self
    }

    pub fn set_long_poll(&mut self, long_poll: bool) -> &mut Self {
        self.long_poll = long_poll;
        self
    }

    pub fn set_debug(&mut self, debug: bool) -> &mut Self {
        self.debug = debug;
        self
    }

    /// Replaces the websocket and long-poll endpoint names. Both must be non-empty.
    pub fn set_endpoints(
        &mut self,
        ws_endpoint: impl Into<String>,
        long_poll_endpoint: impl Into<String>,
    ) -> Result<&mut Self> {
        let ws_endpoint = ws_endpoint.into();
        let long_poll_endpoint = long_poll_endpoint.into();
        if ws_endpoint.is_empty() || long_poll_endpoint.is_empty() {
            return Err(ReadClientError::ConfigurationError("invalid endpoints".to_string()));
        }
        self.endpoints = [ws_endpoint, long_poll_endpoint];
        Ok(self)
    }

    pub fn set_max_connection_delay(&mut self, delay: Duration) -> &mut Self {
        self.max_connection_delay = delay;
        self
    }

    pub fn set_min_reconnection_delay(&mut self, delay: Duration) -> &mut Self {
        self.min_reconnection_delay = delay;
        self
    }

    pub fn set_reconnection_delay_grow_factor(&mut self, factor: f64) -> &mut Self {
        self.reconnection_delay_grow_factor = factor;
        self
    }

    pub fn set_min_uptime(&mut self, uptime: Duration) -> &mut Self {
        self.min_uptime = uptime;
        self
    }

    pub fn set_max_retries(&mut self, retries: u32) -> &mut Self {
        self.max_retries = retries;
        self
    }

    /// `None` leaves the outbound queue unbounded.
    pub fn set_max_enqueued_messages(&mut self, max: Option<usize>) -> &mut Self {
        self.max_enqueued_messages = max;
        self
    }

    pub fn set_protocols<I, S>(&mut self, protocols: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Injects the transport implementation used instead of the tungstenite default.
    pub fn set_custom_transport(&mut self, factory: Arc<dyn TransportFactory>) -> &mut Self {
        self.custom_transport = Some(factory);
        self
    }

    pub fn set_error_threshold(&mut self, threshold: u32) -> &mut Self {
        self.error_threshold = threshold;
        self
    }

    pub fn set_max_listeners(&mut self, max: usize) -> &mut Self {
        self.max_listeners = max;
        self
    }

    // --- Getters ---

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn endpoints(&self) -> &[String; 2] {
        &self.endpoints
    }

    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    pub fn custom_transport(&self) -> Option<&Arc<dyn TransportFactory>> {
        self.custom_transport.as_ref()
    }

    pub fn max_connection_delay(&self) -> Duration {
        self.max_connection_delay
    }

    pub fn min_reconnection_delay(&self) -> Duration {
        self.min_reconnection_delay
    }

    pub fn reconnection_delay_grow_factor(&self) -> f64 {
        self.reconnection_delay_grow_factor
    }

    pub fn min_uptime(&self) -> Duration {
        self.min_uptime
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn max_enqueued_messages(&self) -> Option<usize> {
        self.max_enqueued_messages
    }

    pub fn error_threshold(&self) -> u32 {
        self.error_threshold
    }

    pub fn max_listeners(&self) -> usize {
        self.max_listeners
    }
}

/// Value of the `Client` identification header.
pub fn client_header() -> String {
    format!("tcabci-read-rust-client/v{}", env!("CARGO_PKG_VERSION"))
}

/// Transport construction record produced by [`ConnectionOptions::make`].
#[derive(Clone)]
pub struct TransportConfig {
    pub max_reconnection_delay: Duration,
    pub min_reconnection_delay: Duration,
    pub reconnection_delay_grow_factor: f64,
    pub min_uptime: Duration,
    pub connection_timeout: Duration,
    pub max_retries: u32,
    pub max_enqueued_messages: Option<usize>,
    pub debug: bool,
    pub headers: Vec<(String, String)>,
    pub custom_transport: Option<Arc<dyn TransportFactory>>,
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("max_reconnection_delay", &self.max_reconnection_delay)
            .field("min_reconnection_delay", &self.min_reconnection_delay)
            .field(
                "reconnection_delay_grow_factor",
                &self.reconnection_delay_grow_factor,
            )
            .field("min_uptime", &self.min_uptime)
            .field("connection_timeout", &self.connection_timeout)
            .field("max_retries", &self.max_retries)
            .field("max_enqueued_messages", &self.max_enqueued_messages)
            .field("debug", &self.debug)
            .field("headers", &self.headers)
            .field("custom_transport", &self.custom_transport.is_some())
            .finish()
    }
}

impl TransportConfig {
    /// Backoff before reconnection attempt `attempt` (1-based); the first
    /// connection attempt is immediate.
    pub fn reconnection_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let delay_ms = self.min_reconnection_delay.as_millis() as f64
            * self.reconnection_delay_grow_factor.powi(exponent);
        let max_ms = self.max_reconnection_delay.as_millis() as f64;
        Duration::from_millis(delay_ms.min(max_ms).max(0.0) as u64)
    }
}
