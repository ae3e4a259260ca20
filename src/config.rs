//! Server configuration: limits, timeouts and protocol knobs.
//!
//! # Security-First Defaults
//!
//! Default limits are intentionally conservative to prevent:
//! - Resource exhaustion attacks
//! - Slowloris-style stalls
//! - Header flooding
//! - Oversized WebSocket messages
//!
//! # Sources
//!
//! A configuration is assembled from up to three layers, later layers
//! overriding earlier ones:
//!
//! 1. the in-code struct ([`ServerConfig::default`] plus field updates),
//! 2. a `key=value` text file ([`ServerConfig::apply_file`]),
//! 3. an environment overlay ([`ServerConfig::apply_env`], `HARBOR_*`).
//!
//! File syntax: UTF-8, `#` starts a line comment, blank lines are ignored,
//! leading whitespace is trimmed, the first `=` separates key from value.
//! Durations are decimal integers in seconds, sizes decimal integers in
//! bytes.
//!
//! ```text
//! # harbor.conf
//! max_connections = 512
//! keepalive_timeout = 10
//! access_log = logs/access.log
//! ```

use crate::errors::Error;
use std::time::Duration;

/// Complete configuration snapshot for one server instance.
///
/// Immutable after server start: the server clones the configuration at
/// build time and every connection reads from that snapshot.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Hard cap on concurrent connections (default: `2048`).
    ///
    /// Exactly this many connection workers are created at startup; the
    /// live-connection count can never exceed it.
    pub max_connections: usize,

    /// Accepted connections waiting for a free worker (default: `4096`).
    ///
    /// When this queue is full, new accepts are rejected immediately; see
    /// [`reject_with_503`](Self::reject_with_503).
    pub max_pending_connections: usize,

    /// Close the connection after this many exchanges (default: `100`).
    pub max_requests_per_connection: usize,

    /// TCP listen backlog (default: `8192`).
    pub backlog: u32,

    /// Upper bound on the decoded request body (default: `1 MiB`).
    pub max_body_size: usize,

    /// Upper bound on one header value (default: `4096`).
    pub max_header_size: usize,

    /// Upper bound on one header name (default: `256`).
    pub max_header_name_size: usize,

    /// Maximum number of header entries per request (default: `64`).
    pub max_headers: usize,

    /// Upper bound on the request URL (default: `2048`).
    pub max_url_size: usize,

    /// Idle time between keep-alive requests before close (default: `5 s`).
    pub keepalive_timeout: Duration,

    /// Time to finish reading one request (default: `60 s`).
    pub request_timeout: Duration,

    /// Hard per-connection upper bound across all states (default: `60 s`).
    pub connection_timeout: Duration,

    /// Per-connection read buffer size (default: `16 KiB`).
    pub read_buffer_size: usize,

    /// Fixed rate-limit window length (default: `60 s`).
    ///
    /// Only consulted once rate limiting is enabled on the builder.
    pub rate_limit_window: Duration,

    /// Whether `listen` expects a TLS context (default: `false`).
    ///
    /// Set automatically when a TLS context is installed on the builder;
    /// accepted from file/env so a deployment can assert its intent — the
    /// build step fails when the flag and the installed context disagree.
    pub enable_tls: bool,

    /// Reject over-capacity accepts with a `503` response (default: `true`).
    ///
    /// When `false` the socket is dropped without a response.
    pub reject_with_503: bool,

    /// Reject incoming WebSocket frames larger than this (default: `16 MiB`).
    pub ws_max_frame_size: usize,

    /// Reject reassembled WebSocket messages larger than this (default: `64 MiB`).
    pub ws_max_message_size: usize,

    /// Automatic WebSocket PING cadence (default: `30 s`).
    pub ws_ping_interval: Duration,

    /// Close the WebSocket when no PONG or data arrives within this grace
    /// period after a PING (default: `10 s`).
    pub ws_ping_timeout: Duration,

    /// Optional access log file, one line per response (default: `None`).
    ///
    /// The path must be relative and must not contain `..` components.
    pub access_log: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 2048,
            max_pending_connections: 4096,
            max_requests_per_connection: 100,
            backlog: 8192,
            max_body_size: 1024 * 1024,
            max_header_size: 4096,
            max_header_name_size: 256,
            max_headers: 64,
            max_url_size: 2048,
            keepalive_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(60),
            read_buffer_size: 16 * 1024,
            rate_limit_window: Duration::from_secs(60),
            enable_tls: false,
            reject_with_503: true,
            ws_max_frame_size: 16 * 1024 * 1024,
            ws_max_message_size: 64 * 1024 * 1024,
            ws_ping_interval: Duration::from_secs(30),
            ws_ping_timeout: Duration::from_secs(10),
            access_log: None,
        }
    }
}

/// Prefix of the environment overlay: `HARBOR_MAX_CONNECTIONS`,
/// `HARBOR_KEEPALIVE_TIMEOUT`, ...
pub const ENV_PREFIX: &str = "HARBOR_";

impl ServerConfig {
    /// Loads a configuration file on top of the defaults.
    pub fn from_file(path: &str) -> Result<Self, Error> {
        let mut config = Self::default();
        config.apply_file(path)?;
        Ok(config)
    }

    /// Applies a `key=value` file on top of the current values.
    pub fn apply_file(&mut self, path: &str) -> Result<(), Error> {
        let text = std::fs::read_to_string(path)?;

        for (number, raw) in text.lines().enumerate() {
            let line = raw.trim_start();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                log::warn!("config {path}:{}: no '=' separator", number + 1);
                continue;
            };

            self.apply_kv(key.trim(), value.trim())?;
        }

        Ok(())
    }

    /// Applies the `HARBOR_*` environment overlay on top of the current
    /// values. Unknown `HARBOR_*` variables are ignored with a warning.
    pub fn apply_env(&mut self) -> Result<(), Error> {
        for (key, value) in std::env::vars() {
            let Some(option) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            self.apply_kv(&option.to_ascii_lowercase(), value.trim())?;
        }
        Ok(())
    }

    fn apply_kv(&mut self, key: &str, value: &str) -> Result<(), Error> {
        fn int(value: &str) -> Result<usize, Error> {
            value
                .parse::<usize>()
                .map_err(|_| Error::InvalidParam("config value is not a decimal integer"))
        }
        fn secs(value: &str) -> Result<Duration, Error> {
            Ok(Duration::from_secs(int(value)? as u64))
        }
        fn flag(value: &str) -> Result<bool, Error> {
            match value {
                "1" | "true" | "on" | "yes" => Ok(true),
                "0" | "false" | "off" | "no" => Ok(false),
                _ => Err(Error::InvalidParam("config value is not a boolean")),
            }
        }

        match key {
            "max_connections" => self.max_connections = int(value)?,
            "max_pending_connections" => self.max_pending_connections = int(value)?,
            "max_requests_per_connection" => self.max_requests_per_connection = int(value)?,
            "backlog" => self.backlog = int(value)? as u32,
            "max_body_size" => self.max_body_size = int(value)?,
            "max_header_size" => self.max_header_size = int(value)?,
            "max_header_name_size" => self.max_header_name_size = int(value)?,
            "max_headers" => self.max_headers = int(value)?,
            "max_url_size" => self.max_url_size = int(value)?,
            "keepalive_timeout" => self.keepalive_timeout = secs(value)?,
            "request_timeout" => self.request_timeout = secs(value)?,
            "connection_timeout" => self.connection_timeout = secs(value)?,
            "read_buffer_size" => self.read_buffer_size = int(value)?,
            "rate_limit_window" => self.rate_limit_window = secs(value)?,
            "enable_tls" => self.enable_tls = flag(value)?,
            "reject_with_503" => self.reject_with_503 = flag(value)?,
            "ws_max_frame_size" => self.ws_max_frame_size = int(value)?,
            "ws_max_message_size" => self.ws_max_message_size = int(value)?,
            "ws_ping_interval" => self.ws_ping_interval = secs(value)?,
            "ws_ping_timeout" => self.ws_ping_timeout = secs(value)?,
            "access_log" => self.access_log = Some(value.to_string()),
            other => log::warn!("ignoring unknown config option `{other}`"),
        }

        Ok(())
    }

    /// Rejects out-of-range values and suspicious log paths. Called by the
    /// server builder before any socket is opened.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_connections == 0 || self.max_connections > 65535 {
            return Err(Error::InvalidParam("max_connections out of range (1-65535)"));
        }
        if self.max_requests_per_connection == 0 {
            return Err(Error::InvalidParam("max_requests_per_connection must be > 0"));
        }
        if self.max_body_size == 0 {
            return Err(Error::InvalidParam("max_body_size must be > 0"));
        }
        if self.max_headers == 0 || self.max_header_size == 0 || self.max_header_name_size == 0 {
            return Err(Error::InvalidParam("header limits must be > 0"));
        }
        if self.max_url_size == 0 {
            return Err(Error::InvalidParam("max_url_size must be > 0"));
        }
        if self.read_buffer_size < 256 {
            return Err(Error::InvalidParam("read_buffer_size below 256 bytes"));
        }
        if self.request_timeout.is_zero()
            || self.connection_timeout.is_zero()
            || self.keepalive_timeout.is_zero()
        {
            return Err(Error::InvalidParam("timeouts must be > 0"));
        }
        if self.ws_max_frame_size == 0 || self.ws_max_message_size < self.ws_max_frame_size {
            return Err(Error::InvalidParam(
                "ws_max_message_size must be >= ws_max_frame_size > 0",
            ));
        }
        if let Some(path) = &self.access_log {
            if path.starts_with('/') || path.split('/').any(|part| part == "..") {
                return Err(Error::InvalidParam(
                    "access_log path must be relative without `..`",
                ));
            }
        }
        Ok(())
    }

    /// Ceiling of the request head buffer (request line plus headers),
    /// derived from the URL and header bounds.
    ///
    /// ```text
    /// METHOD SP URL SP VERSION CRLF        19 + max_url_size
    /// name ": " value CRLF                 per header
    /// CRLF                                 2
    /// ```
    #[inline(always)]
    pub(crate) fn head_ceiling(&self) -> usize {
        19 + self.max_url_size
            + self.max_headers * (self.max_header_name_size + self.max_header_size + 4)
            + 2
    }
}
