use crate::{error::DataError, streams::timeout::DEFAULT_WS_READ_TIMEOUT};
use std::{fmt, time::Duration};
use url::Url;

/// Default upstream trade streamer endpoint.
pub const DEFAULT_STREAMER_URL: &str = "wss://streamer.cryptocompare.com/v2";

/// Upstream streamer connection configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct StreamerConfig {
    /// Streamer WebSocket URL, without credentials
    pub url: String,
    /// API key appended to the connection URL as the `api_key` query parameter
    pub api_key: Option<String>,
    /// Ping interval to keep the connection alive
    pub ping_interval: Duration,
    /// Reconnection delay after disconnect
    pub reconnect_delay: Duration,
    /// Connection is considered dead if nothing is received for this long
    pub read_timeout: Duration,
    /// Maximum buffered streamer events awaiting the engine
    pub channel_buffer_size: usize,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAMER_URL.to_string(),
            api_key: None,
            ping_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(2),
            read_timeout: DEFAULT_WS_READ_TIMEOUT,
            channel_buffer_size: 10_000,
        }
    }
}

impl StreamerConfig {
    /// Create a new configuration with custom URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Build a configuration from the environment.
    ///
    /// `STREAMER_URL` overrides the default endpoint and `CRYPTOCOMPARE_API_KEY` supplies the
    /// API key. Everything else keeps its default.
    pub fn from_env() -> Self {
        let config = std::env::var("STREAMER_URL")
            .map(Self::new)
            .unwrap_or_default();

        match std::env::var("CRYPTOCOMPARE_API_KEY") {
            Ok(api_key) if !api_key.is_empty() => config.with_api_key(api_key),
            _ => config,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_channel_buffer_size(mut self, size: usize) -> Self {
        self.channel_buffer_size = size;
        self
    }

    /// Connection [`Url`] including the `api_key` query parameter, if configured.
    pub fn endpoint(&self) -> Result<Url, DataError> {
        let mut endpoint = Url::parse(&self.url)
            .map_err(|error| DataError::Config(format!("invalid streamer url {}: {error}", self.url)))?;

        if let Some(api_key) = &self.api_key {
            endpoint.query_pairs_mut().append_pair("api_key", api_key);
        }

        Ok(endpoint)
    }
}

impl fmt::Debug for StreamerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamerConfig")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("ping_interval", &self.ping_interval)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("read_timeout", &self.read_timeout)
            .field("channel_buffer_size", &self.channel_buffer_size)
            .finish()
    }
}
