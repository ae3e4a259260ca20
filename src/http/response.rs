//! HTTP response builder and the single-shot send pipeline.
//!
//! A [`Response`] stages status, headers and body; [`Response::send`]
//! serializes everything into the connection's write channel exactly once.
//! A handler that wants to finish the exchange later clones a
//! [`ResponseHandle`] and returns; the connection waits for the handle to
//! send (bounded by the connection deadline), and a handle that outlives
//! the connection gets [`Error::ConnectionClosed`] instead of touching a
//! dead exchange.

use crate::{
    errors::Error,
    http::types::{reason_phrase, Version},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use tokio::sync::Notify;

/// What actually went out, recorded at publish time for the access log and
/// the keep-alive decision. Valid once `is_sent()` is true.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SentMeta {
    pub(crate) status: u16,
    pub(crate) body_len: usize,
    pub(crate) keep_alive: bool,
}

/// Shared endpoint between a response (plus its handles) and the connection
/// that owns the socket.
#[derive(Debug)]
pub(crate) struct ExchangeState {
    sent: AtomicBool,
    closed: AtomicBool,
    wire: Mutex<(Vec<u8>, SentMeta)>,
    notify: Notify,
}

impl ExchangeState {
    fn new() -> Arc<Self> {
        Arc::new(ExchangeState {
            sent: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            wire: Mutex::new((Vec::new(), SentMeta::default())),
            notify: Notify::new(),
        })
    }

    /// Publishes serialized bytes; only the first caller wins.
    fn publish(&self, bytes: Vec<u8>, meta: SentMeta) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        if self.sent.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadySent);
        }
        *self.wire.lock().expect("wire lock") = (bytes, meta);
        self.notify.notify_one();
        Ok(())
    }

    pub(crate) fn is_sent(&self) -> bool {
        self.sent.load(Ordering::Acquire)
    }

    /// Marks the exchange dead; late `send()` calls fail with
    /// `ConnectionClosed` instead of writing into freed state.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub(crate) fn take_wire(&self) -> Vec<u8> {
        std::mem::take(&mut self.wire.lock().expect("wire lock").0)
    }

    pub(crate) fn sent_meta(&self) -> SentMeta {
        self.wire.lock().expect("wire lock").1
    }

    pub(crate) async fn wait_sent(&self) {
        while !self.is_sent() && !self.closed.load(Ordering::Acquire) {
            self.notify.notified().await;
        }
    }
}

/// HTTP response under construction.
///
/// Headers append in order and duplicate names are preserved;
/// [`Response::set_body`] replaces any previous body. `send()` marks the
/// response sent — any later mutation attempt is rejected.
#[derive(Debug)]
pub struct Response {
    status: u16,
    headers: Vec<(Vec<u8>, Vec<u8>)>,
    body: Vec<u8>,
    pub(crate) version: Version,
    pub(crate) keep_alive: bool,
    handle_taken: bool,
    state: Arc<ExchangeState>,
}

impl Response {
    pub(crate) fn new() -> Self {
        Response {
            status: 200,
            headers: Vec::with_capacity(8),
            body: Vec::new(),
            version: Version::Http11,
            keep_alive: true,
            handle_taken: false,
            state: ExchangeState::new(),
        }
    }

    /// Starts a fresh exchange. Any handle still pointing at the previous
    /// exchange observes it as closed.
    pub(crate) fn reset(&mut self) {
        self.state.close();
        self.status = 200;
        self.headers.clear();
        self.body.clear();
        self.version = Version::Http11;
        self.keep_alive = true;
        self.handle_taken = false;
        self.state = ExchangeState::new();
    }

    pub(crate) fn exchange(&self) -> Arc<ExchangeState> {
        Arc::clone(&self.state)
    }

    pub(crate) fn handle_taken(&self) -> bool {
        self.handle_taken
    }
}

// Public API
impl Response {
    /// Sets the status code (100-599). Out-of-range codes are ignored with
    /// a warning.
    pub fn set_status(&mut self, code: u16) -> &mut Self {
        if (100..=599).contains(&code) {
            self.status = code;
        } else {
            log::warn!("ignoring out-of-range status code {code}");
        }
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Appends a header. Duplicate names are allowed and preserved in
    /// order.
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.headers
            .push((name.as_bytes().to_vec(), value.as_bytes().to_vec()));
        self
    }

    /// Replaces the response body.
    pub fn set_body(&mut self, body: impl AsRef<[u8]>) -> &mut Self {
        self.body.clear();
        self.body.extend_from_slice(body.as_ref());
        self
    }

    /// Forces the connection to close after this response.
    pub fn close_after(&mut self) -> &mut Self {
        self.keep_alive = false;
        self
    }

    /// Serializes the response into the connection's write channel.
    ///
    /// The first call wins; a second call returns [`Error::AlreadySent`],
    /// and a call after the connection died returns
    /// [`Error::ConnectionClosed`].
    pub fn send(&mut self) -> Result<(), Error> {
        let wire = serialize(
            self.status,
            &self.headers,
            &self.body,
            self.version,
            self.keep_alive,
        );
        let meta = SentMeta {
            status: self.status,
            body_len: self.body.len(),
            keep_alive: self.keep_alive,
        };
        self.state.publish(wire, meta)
    }

    pub fn is_sent(&self) -> bool {
        self.state.is_sent()
    }

    /// Detaches a handle for deferred completion. The connection will wait
    /// for the handle to send (bounded by `connection_timeout`) instead of
    /// finishing the exchange when the handler returns.
    pub fn deferred_handle(&mut self) -> ResponseHandle {
        self.handle_taken = true;
        ResponseHandle {
            status: self.status,
            headers: Vec::new(),
            body: Vec::new(),
            version: self.version,
            keep_alive: self.keep_alive,
            state: Arc::clone(&self.state),
        }
    }
}

/// Deferred completion handle for one exchange.
///
/// Cheap to move into a spawned task or timer callback. Carries its own
/// header/body staging so the originating `Response` can be released.
#[derive(Debug)]
pub struct ResponseHandle {
    status: u16,
    headers: Vec<(Vec<u8>, Vec<u8>)>,
    body: Vec<u8>,
    version: Version,
    keep_alive: bool,
    state: Arc<ExchangeState>,
}

impl ResponseHandle {
    pub fn set_status(&mut self, code: u16) -> &mut Self {
        if (100..=599).contains(&code) {
            self.status = code;
        }
        self
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.headers
            .push((name.as_bytes().to_vec(), value.as_bytes().to_vec()));
        self
    }

    pub fn set_body(&mut self, body: impl AsRef<[u8]>) -> &mut Self {
        self.body.clear();
        self.body.extend_from_slice(body.as_ref());
        self
    }

    /// Completes the exchange. Fails with [`Error::ConnectionClosed`] once
    /// the connection is gone and [`Error::AlreadySent`] when the exchange
    /// was already finished.
    pub fn send(&mut self) -> Result<(), Error> {
        let wire = serialize(
            self.status,
            &self.headers,
            &self.body,
            self.version,
            self.keep_alive,
        );
        let meta = SentMeta {
            status: self.status,
            body_len: self.body.len(),
            keep_alive: self.keep_alive,
        };
        self.state.publish(wire, meta)
    }
}

impl Drop for Response {
    fn drop(&mut self) {
        // A handle that outlives the connection must fail, not dangle.
        self.state.close();
    }
}

/// Serializes status line, headers and body into wire bytes.
///
/// `content-length` and `connection` are appended automatically unless the
/// caller already set them.
fn serialize(
    status: u16,
    headers: &[(Vec<u8>, Vec<u8>)],
    body: &[u8],
    version: Version,
    keep_alive: bool,
) -> Vec<u8> {
    let mut wire = Vec::with_capacity(128 + body.len());

    wire.extend_from_slice(version.as_str().as_bytes());
    wire.push(b' ');
    let mut digits = itoa(status as usize);
    wire.append(&mut digits);
    let reason = reason_phrase(status);
    if !reason.is_empty() {
        wire.push(b' ');
        wire.extend_from_slice(reason.as_bytes());
    }
    wire.extend_from_slice(b"\r\n");

    let mut has_length = false;
    let mut has_connection = false;
    for (name, value) in headers {
        has_length |= name.eq_ignore_ascii_case(b"content-length");
        has_connection |= name.eq_ignore_ascii_case(b"connection");
        wire.extend_from_slice(name);
        wire.extend_from_slice(b": ");
        wire.extend_from_slice(value);
        wire.extend_from_slice(b"\r\n");
    }

    if !has_length {
        wire.extend_from_slice(b"content-length: ");
        wire.append(&mut itoa(body.len()));
        wire.extend_from_slice(b"\r\n");
    }
    if !has_connection {
        wire.extend_from_slice(match keep_alive {
            true => b"connection: keep-alive\r\n".as_slice(),
            false => b"connection: close\r\n".as_slice(),
        });
    }

    wire.extend_from_slice(b"\r\n");
    wire.extend_from_slice(body);
    wire
}

/// Minimal error response used when a violation aborts the exchange before
/// (or instead of) the handler.
pub(crate) fn error_wire(status: u16, version: Version) -> Vec<u8> {
    serialize(status, &[], b"", version, false)
}

fn itoa(mut n: usize) -> Vec<u8> {
    if n == 0 {
        return vec![b'0'];
    }
    let mut digits = [0u8; 20];
    let mut i = 20;
    while n > 0 {
        i -= 1;
        digits[i] = b'0' + (n % 10) as u8;
        n /= 10;
    }
    digits[i..].to_vec()
}
