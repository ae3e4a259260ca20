//! HTTP request record and the incremental request parser.
//!
//! The parser is a push state machine: the connection feeds it whatever the
//! socket produced and it consumes complete protocol elements (request line,
//! header lines, body bytes, chunk frames) as they become available. Partial
//! input is buffered in a bounded pending buffer; nothing is borrowed from
//! the network buffer, so the request owns all of its data.

use crate::{
    buffer::ByteBuf,
    config::ServerConfig,
    errors::{Error, HttpViolation, LimitKind},
    http::types::{self, Header, HeaderMap, Method, Version},
    tls::PeerIdentity,
};
use memchr::memchr;
use std::{
    any::Any,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};

/// A parsed (or in-progress) HTTP request.
///
/// Mutated solely by the parser until [`Request::parsing_complete`] is true;
/// read-only for middleware and handlers afterwards.
pub struct Request {
    method: Method,
    version: Version,
    url: Vec<u8>,
    path_len: usize,
    headers: HeaderMap,
    body: ByteBuf,
    content_length: Option<usize>,
    chunked: bool,
    keep_alive: bool,
    upgrade_requested: bool,
    parsing_complete: bool,
    remote_addr: SocketAddr,
    peer_identity: Option<PeerIdentity>,
    user_data: Option<Box<dyn Any + Send + Sync>>,
}

impl Request {
    pub(crate) fn new(config: &ServerConfig) -> Self {
        Request {
            method: Method::Get,
            version: Version::Http11,
            url: Vec::with_capacity(64),
            path_len: 0,
            headers: HeaderMap::with_capacity(config.max_headers.min(32)),
            body: ByteBuf::with_ceiling(0, config.max_body_size, "request body"),
            content_length: None,
            chunked: false,
            keep_alive: true,
            upgrade_requested: false,
            parsing_complete: false,
            remote_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            peer_identity: None,
            user_data: None,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.method = Method::Get;
        self.version = Version::Http11;
        self.url.clear();
        self.path_len = 0;
        self.headers.reset();
        self.body.reset();
        self.content_length = None;
        self.chunked = false;
        self.keep_alive = true;
        self.upgrade_requested = false;
        self.parsing_complete = false;
        self.peer_identity = None;
        self.user_data = None;
    }

    pub(crate) fn set_remote_addr(&mut self, addr: SocketAddr) {
        self.remote_addr = addr;
    }

    pub(crate) fn set_peer_identity(&mut self, peer: Option<PeerIdentity>) {
        self.peer_identity = peer;
    }
}

// Public API
impl Request {
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Raw request target as received, path plus optional query string.
    #[inline(always)]
    pub fn url(&self) -> &[u8] {
        &self.url
    }

    /// Path component of the URL, without the query string.
    #[inline(always)]
    pub fn path(&self) -> &[u8] {
        &self.url[..self.path_len]
    }

    /// Query substring after `?`, if any.
    #[inline(always)]
    pub fn query(&self) -> Option<&[u8]> {
        if self.path_len < self.url.len() {
            Some(&self.url[self.path_len + 1..])
        } else {
            None
        }
    }

    /// First header value with case-insensitive name matching
    /// (per [RFC 7230](https://tools.ietf.org/html/rfc7230#section-3.2)).
    #[inline(always)]
    pub fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers.get(name)
    }

    /// All headers in arrival order. Names are lowercased.
    pub fn headers(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.headers
            .headers
            .iter()
            .map(|h| (h.name.as_slice(), h.value.as_slice()))
    }

    /// Declared `Content-Length`, if the request carried one.
    #[inline(always)]
    pub const fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    /// Decoded request body; empty until the body arrived in full.
    #[inline(always)]
    pub fn body(&self) -> &[u8] {
        self.body.as_slice()
    }

    #[inline(always)]
    pub const fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Verified client certificate of the TLS session carrying this
    /// request, when client auth was negotiated.
    #[inline(always)]
    pub fn peer_identity(&self) -> Option<&PeerIdentity> {
        self.peer_identity.as_ref()
    }

    #[inline(always)]
    pub const fn parsing_complete(&self) -> bool {
        self.parsing_complete
    }

    /// True when the request asked for a WebSocket upgrade
    /// (`GET` + `Upgrade: websocket` + `Connection: Upgrade`).
    #[inline(always)]
    pub const fn upgrade_requested(&self) -> bool {
        self.upgrade_requested
    }

    #[inline(always)]
    pub(crate) const fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Stores an opaque value for later pipeline stages (middleware to
    /// handler hand-off). Replaces any previous value.
    pub fn set_user_data<T: Any + Send + Sync>(&mut self, value: T) {
        self.user_data = Some(Box::new(value));
    }

    /// Borrows the stored user data, if any and of the requested type.
    pub fn user_data<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.user_data.as_deref().and_then(|v| v.downcast_ref())
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &String::from_utf8_lossy(&self.url))
            .field("version", &self.version)
            .field("headers", &self.headers.len())
            .field("body_len", &self.body.len())
            .field("parsing_complete", &self.parsing_complete)
            .field("remote_addr", &self.remote_addr)
            .finish()
    }
}

//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    RequestLine,
    Headers,
    Body,
    ChunkSize,
    ChunkData,
    ChunkDataEnd,
    Trailer,
    Complete,
}

/// Incremental request parser.
///
/// Feed network bytes with [`Parser::push`]; it returns `Ok(true)` once one
/// full message has been assembled into the [`Request`]. Bytes beyond the
/// end of the message are a framing violation: pipelining is not supported,
/// and request N+1 may only start after response N went out.
#[derive(Debug)]
pub(crate) struct Parser {
    config: Arc<ServerConfig>,
    state: ParseState,
    pending: ByteBuf,
    body_remaining: usize,
    chunk_remaining: usize,
    seen_content_length: bool,
    connection_upgrade: bool,
    upgrade_websocket: bool,
}

impl Parser {
    pub(crate) fn new(config: Arc<ServerConfig>) -> Self {
        let pending_ceiling = config.head_ceiling() + config.read_buffer_size;
        Parser {
            config,
            state: ParseState::RequestLine,
            pending: ByteBuf::with_ceiling(1024, pending_ceiling, "request head"),
            body_remaining: 0,
            chunk_remaining: 0,
            seen_content_length: false,
            connection_upgrade: false,
            upgrade_websocket: false,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.state = ParseState::RequestLine;
        self.pending.reset();
        self.body_remaining = 0;
        self.chunk_remaining = 0;
        self.seen_content_length = false;
        self.connection_upgrade = false;
        self.upgrade_websocket = false;
    }

    /// True once a first byte of the next message arrived.
    pub(crate) fn started(&self) -> bool {
        self.state != ParseState::RequestLine || !self.pending.is_empty()
    }

    /// Pushes freshly read bytes and advances the state machine.
    ///
    /// Returns `Ok(true)` when the message is complete. Any error leaves the
    /// connection doomed; the caller maps it to an HTTP error response.
    pub(crate) fn push(&mut self, input: &[u8], request: &mut Request) -> Result<bool, Error> {
        self.pending
            .append(input)
            .map_err(|_| Error::Limit(LimitKind::HeaderSize))?;

        loop {
            match self.state {
                ParseState::RequestLine => {
                    let Some(line_len) = self.complete_line(19 + self.config.max_url_size)? else {
                        return Ok(false);
                    };
                    let config = Arc::clone(&self.config);
                    let line = &self.pending.as_slice()[..line_len];
                    Self::parse_request_line(&config, line, request)?;
                    self.pending.consume(line_len + 2);
                    self.state = ParseState::Headers;
                }
                ParseState::Headers => {
                    let line_bound =
                        self.config.max_header_name_size + self.config.max_header_size + 4;
                    let Some(line_len) = self.complete_line(line_bound)? else {
                        return Ok(false);
                    };
                    if line_len == 0 {
                        self.pending.consume(2);
                        self.headers_complete(request)?;
                    } else {
                        let config = Arc::clone(&self.config);
                        let line = &self.pending.as_slice()[..line_len];
                        let flags = Self::parse_header_line(&config, line, request)?;
                        self.pending.consume(line_len + 2);
                        self.seen_content_length |= flags.content_length;
                        self.connection_upgrade |= flags.connection_upgrade;
                        self.upgrade_websocket |= flags.upgrade_websocket;
                    }
                }
                ParseState::Body => {
                    let take = self.body_remaining.min(self.pending.len());
                    if take > 0 {
                        let bytes = &self.pending.as_slice()[..take];
                        request
                            .body
                            .append(bytes)
                            .map_err(|_| Error::Limit(LimitKind::BodySize))?;
                        self.pending.consume(take);
                        self.body_remaining -= take;
                    }
                    if self.body_remaining > 0 {
                        return Ok(false);
                    }
                    self.state = ParseState::Complete;
                }
                ParseState::ChunkSize => {
                    let Some(line_len) = self.complete_line(34)? else {
                        return Ok(false);
                    };
                    let line = &self.pending.as_slice()[..line_len];
                    // Chunk extensions after `;` are ignored.
                    let size_part = match memchr(b';', line) {
                        Some(pos) => &line[..pos],
                        None => line,
                    };
                    let size = types::hex_to_usize(types::trim_ascii(size_part)).ok_or(
                        Error::ProtocolHttp(HttpViolation::InvalidChunkedEncoding),
                    )?;
                    self.pending.consume(line_len + 2);
                    if size == 0 {
                        self.state = ParseState::Trailer;
                    } else {
                        if request.body.len() + size > self.config.max_body_size {
                            return Err(Error::Limit(LimitKind::BodySize));
                        }
                        self.chunk_remaining = size;
                        self.state = ParseState::ChunkData;
                    }
                }
                ParseState::ChunkData => {
                    let take = self.chunk_remaining.min(self.pending.len());
                    if take > 0 {
                        let bytes = &self.pending.as_slice()[..take];
                        request
                            .body
                            .append(bytes)
                            .map_err(|_| Error::Limit(LimitKind::BodySize))?;
                        self.pending.consume(take);
                        self.chunk_remaining -= take;
                    }
                    if self.chunk_remaining > 0 {
                        return Ok(false);
                    }
                    self.state = ParseState::ChunkDataEnd;
                }
                ParseState::ChunkDataEnd => {
                    if self.pending.len() < 2 {
                        return Ok(false);
                    }
                    if &self.pending.as_slice()[..2] != b"\r\n" {
                        return Err(Error::ProtocolHttp(HttpViolation::InvalidChunkedEncoding));
                    }
                    self.pending.consume(2);
                    self.state = ParseState::ChunkSize;
                }
                ParseState::Trailer => {
                    let line_bound =
                        self.config.max_header_name_size + self.config.max_header_size + 4;
                    let Some(line_len) = self.complete_line(line_bound)? else {
                        return Ok(false);
                    };
                    // Trailer fields are discarded.
                    self.pending.consume(line_len + 2);
                    if line_len == 0 {
                        self.state = ParseState::Complete;
                    }
                }
                ParseState::Complete => {
                    if !self.pending.is_empty() {
                        return Err(Error::ProtocolHttp(HttpViolation::InvalidFraming));
                    }
                    request.parsing_complete = true;
                    return Ok(true);
                }
            }
        }
    }

    /// Looks for a complete CRLF-terminated line at the front of the pending
    /// buffer. Returns its length without the CRLF, or `None` when more
    /// bytes are needed. A bare LF (or a line growing past `bound`) is a
    /// violation.
    fn complete_line(&self, bound: usize) -> Result<Option<usize>, Error> {
        let slice = self.pending.as_slice();
        match memchr(b'\n', slice) {
            Some(0) => Err(Error::ProtocolHttp(HttpViolation::BareLineEnding)),
            Some(nl) if slice[nl - 1] == b'\r' => {
                if nl - 1 > bound {
                    return Err(self.line_bound_error());
                }
                Ok(Some(nl - 1))
            }
            Some(_) => Err(Error::ProtocolHttp(HttpViolation::BareLineEnding)),
            None if slice.len() > bound + 2 => Err(self.line_bound_error()),
            None => Ok(None),
        }
    }

    fn line_bound_error(&self) -> Error {
        match self.state {
            ParseState::RequestLine => Error::Limit(LimitKind::UrlSize),
            ParseState::ChunkSize => Error::ProtocolHttp(HttpViolation::InvalidChunkedEncoding),
            _ => Error::Limit(LimitKind::HeaderSize),
        }
    }

    fn parse_request_line(
        config: &ServerConfig,
        line: &[u8],
        request: &mut Request,
    ) -> Result<(), Error> {
        let (method, after_method) = Method::from_request_line(line)?;
        request.method = method;

        let rest = &line[after_method..];
        let url_end = memchr(b' ', rest).ok_or(Error::ProtocolHttp(HttpViolation::InvalidUrl))?;
        let url = &rest[..url_end];

        if url.len() > config.max_url_size {
            return Err(Error::Limit(LimitKind::UrlSize));
        }
        if url.first() != Some(&b'/') || url.iter().any(|&b| !(0x21..=0x7E).contains(&b)) {
            return Err(Error::ProtocolHttp(HttpViolation::InvalidUrl));
        }

        let (version, keep_alive) = Version::from_bytes(&rest[url_end + 1..])?;
        request.version = version;
        request.keep_alive = keep_alive;

        request.url.clear();
        request.url.extend_from_slice(url);
        request.path_len = memchr(b'?', url).unwrap_or(url.len());

        Ok(())
    }

    fn parse_header_line(
        config: &ServerConfig,
        line: &[u8],
        request: &mut Request,
    ) -> Result<HeaderFlags, Error> {
        let mut flags = HeaderFlags::default();

        // A line starting with whitespace continues the previous value
        // (obsolete folding), capped at the value bound.
        if line[0] == b' ' || line[0] == b'\t' {
            let Some(previous) = request.headers.headers.last_mut() else {
                return Err(Error::ProtocolHttp(HttpViolation::InvalidHeader));
            };
            let continuation = types::trim_ascii(line);
            let room = config.max_header_size.saturating_sub(previous.value.len());
            if room < 2 {
                log::warn!("folded header value truncated at {} bytes", config.max_header_size);
            } else if continuation.len() + 1 > room {
                log::warn!("folded header value truncated at {} bytes", config.max_header_size);
                previous.value.push(b' ');
                previous.value.extend_from_slice(&continuation[..room - 1]);
            } else {
                previous.value.push(b' ');
                previous.value.extend_from_slice(continuation);
            }
            return Ok(flags);
        }

        if request.headers.len() == config.max_headers {
            return Err(Error::Limit(LimitKind::HeaderCount));
        }

        let colon = memchr(b':', line).ok_or(Error::ProtocolHttp(HttpViolation::InvalidHeader))?;
        let raw_name = &line[..colon];
        if raw_name.is_empty()
            || raw_name
                .iter()
                .any(|&b| b <= 0x20 || b == 0x7F || !b.is_ascii())
        {
            return Err(Error::ProtocolHttp(HttpViolation::InvalidHeader));
        }
        if raw_name.len() > config.max_header_name_size {
            return Err(Error::Limit(LimitKind::HeaderNameSize));
        }

        let value = types::trim_ascii(&line[colon + 1..]);
        if value.len() > config.max_header_size {
            return Err(Error::Limit(LimitKind::HeaderSize));
        }
        if value.iter().any(|&b| b < 0x20 && b != b'\t') {
            return Err(Error::ProtocolHttp(HttpViolation::InvalidHeader));
        }

        let mut name = raw_name.to_vec();
        types::to_lower_case(&mut name);

        match name.as_slice() {
            b"content-length" => {
                if request.content_length.is_some() {
                    return Err(Error::ProtocolHttp(HttpViolation::DuplicateContentLength));
                }
                let length = types::slice_to_usize(value)
                    .ok_or(Error::ProtocolHttp(HttpViolation::InvalidContentLength))?;
                if length > config.max_body_size {
                    return Err(Error::Limit(LimitKind::BodySize));
                }
                request.content_length = Some(length);
                flags.content_length = true;
            }
            b"transfer-encoding" => {
                if types::header_has_token(value, b"chunked") {
                    request.chunked = true;
                } else {
                    return Err(Error::ProtocolHttp(
                        HttpViolation::UnsupportedTransferEncoding,
                    ));
                }
            }
            b"connection" => {
                if types::header_has_token(value, b"close") {
                    request.keep_alive = false;
                } else if types::header_has_token(value, b"keep-alive") {
                    request.keep_alive = true;
                }
                flags.connection_upgrade = types::header_has_token(value, b"upgrade");
            }
            b"upgrade" => {
                flags.upgrade_websocket = types::header_has_token(value, b"websocket");
            }
            _ => {}
        }

        request.headers.headers.push(Header {
            name,
            value: value.to_vec(),
        });

        Ok(flags)
    }

    fn headers_complete(&mut self, request: &mut Request) -> Result<(), Error> {
        request.upgrade_requested =
            request.method == Method::Get && self.upgrade_websocket && self.connection_upgrade;

        if request.chunked {
            if self.seen_content_length {
                // Conflicting framing declarations are request smuggling bait.
                return Err(Error::ProtocolHttp(HttpViolation::InvalidHeader));
            }
            self.state = ParseState::ChunkSize;
            return Ok(());
        }

        match request.content_length {
            Some(0) | None => self.state = ParseState::Complete,
            Some(length) => {
                request
                    .body
                    .reserve(length)
                    .map_err(|_| Error::Limit(LimitKind::BodySize))?;
                self.body_remaining = length;
                self.state = ParseState::Body;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct HeaderFlags {
    content_length: bool,
    connection_upgrade: bool,
    upgrade_websocket: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> Arc<ServerConfig> {
        Arc::new(ServerConfig {
            max_url_size: 256,
            max_headers: 8,
            max_header_name_size: 32,
            max_header_size: 64,
            max_body_size: 128,
            ..ServerConfig::default()
        })
    }

    fn parse(config: &Arc<ServerConfig>, input: &[u8]) -> Result<(Request, bool), Error> {
        let mut parser = Parser::new(Arc::clone(config));
        let mut request = Request::new(config);
        let complete = parser.push(input, &mut request)?;
        Ok((request, complete))
    }

    fn parse_complete(config: &Arc<ServerConfig>, input: &[u8]) -> Result<Request, Error> {
        let (request, complete) = parse(config, input)?;
        assert!(complete, "expected a complete message");
        Ok(request)
    }

    #[test]
    fn parse_minimal_request() {
        let config = small_config();
        let req = parse_complete(&config, b"GET / HTTP/1.1\r\n\r\n").unwrap();

        assert_eq!(req.method(), Method::Get);
        assert_eq!(req.url(), b"/");
        assert_eq!(req.path(), b"/");
        assert_eq!(req.query(), None);
        assert_eq!(req.version(), Version::Http11);
        assert!(req.keep_alive());
        assert!(req.parsing_complete());
        assert!(req.body().is_empty());
    }

    #[test]
    fn parse_request_with_headers_and_body() {
        let config = small_config();
        let req = parse_complete(
            &config,
            b"POST /upload?kind=raw HTTP/1.1\r\n\
              Host: 127.0.0.1\r\n\
              Content-Type: application/json\r\n\
              Content-Length: 17\r\n\
              \r\n\
              {\"data\": \"value\"}",
        )
        .unwrap();

        assert_eq!(req.method(), Method::Post);
        assert_eq!(req.path(), b"/upload");
        assert_eq!(req.query(), Some(&b"kind=raw"[..]));
        assert_eq!(req.header(b"HOST"), Some(&b"127.0.0.1"[..]));
        assert_eq!(req.header(b"content-type"), Some(&b"application/json"[..]));
        assert_eq!(req.content_length(), Some(17));
        assert_eq!(req.body(), b"{\"data\": \"value\"}");
    }

    #[test]
    fn byte_at_a_time_feeding() {
        let config = small_config();
        let mut parser = Parser::new(Arc::clone(&config));
        let mut request = Request::new(&config);

        let wire = b"PUT /api/item HTTP/1.1\r\nContent-Length: 5\r\nX-Tag: a\r\n\r\nhello";
        for (i, byte) in wire.iter().enumerate() {
            let complete = parser.push(std::slice::from_ref(byte), &mut request).unwrap();
            assert_eq!(complete, i == wire.len() - 1, "byte {i}");
        }

        assert_eq!(request.method(), Method::Put);
        assert_eq!(request.body(), b"hello");
        assert_eq!(request.header(b"x-tag"), Some(&b"a"[..]));
    }

    #[test]
    fn chunked_body_is_decoded() {
        let config = small_config();
        let req = parse_complete(
            &config,
            b"POST /chunked HTTP/1.1\r\n\
              Transfer-Encoding: chunked\r\n\
              \r\n\
              5\r\nhello\r\n\
              7;ext=1\r\n, world\r\n\
              0\r\n\r\n",
        )
        .unwrap();

        assert_eq!(req.body(), b"hello, world");
    }

    #[test]
    fn chunked_over_body_limit_is_rejected() {
        let config = small_config();
        let mut wire = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
        wire.extend_from_slice(b"81\r\n"); // 129 > max_body_size of 128
        wire.extend_from_slice(&[b'x'; 129]);
        wire.extend_from_slice(b"\r\n0\r\n\r\n");

        assert!(matches!(
            parse(&config, &wire),
            Err(Error::Limit(LimitKind::BodySize))
        ));
    }

    #[test]
    fn connection_close_suppresses_keep_alive() {
        let config = small_config();
        let req =
            parse_complete(&config, b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        assert!(!req.keep_alive());

        let req = parse_complete(
            &config,
            b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n",
        )
        .unwrap();
        assert!(req.keep_alive());

        let req = parse_complete(&config, b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(!req.keep_alive());
    }

    #[test]
    fn upgrade_detection() {
        let config = small_config();
        let req = parse_complete(
            &config,
            b"GET /ws HTTP/1.1\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
              \r\n",
        )
        .unwrap();
        assert!(req.upgrade_requested());

        // POST cannot upgrade.
        let req = parse_complete(
            &config,
            b"POST /ws HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n",
        )
        .unwrap();
        assert!(!req.upgrade_requested());

        // Upgrade without the Connection token is not an upgrade.
        let req =
            parse_complete(&config, b"GET /ws HTTP/1.1\r\nUpgrade: websocket\r\n\r\n").unwrap();
        assert!(!req.upgrade_requested());
    }

    #[test]
    fn folded_header_value_is_continued() {
        let config = small_config();
        let req = parse_complete(
            &config,
            b"GET / HTTP/1.1\r\nX-Folded: part one\r\n  part two\r\n\r\n",
        )
        .unwrap();
        assert_eq!(req.header(b"x-folded"), Some(&b"part one part two"[..]));
    }

    #[test]
    fn invalid_requests() {
        let config = small_config();

        #[rustfmt::skip]
        let cases: [(&[u8], Error); 10] = [
            (b"BREW / HTTP/1.1\r\n\r\n",
             Error::ProtocolHttp(HttpViolation::InvalidMethod)),
            (b"get / HTTP/1.1\r\n\r\n",
             Error::ProtocolHttp(HttpViolation::InvalidMethod)),
            (b"GET no-slash HTTP/1.1\r\n\r\n",
             Error::ProtocolHttp(HttpViolation::InvalidUrl)),
            (b"GET / HTTP/2.0\r\n\r\n",
             Error::ProtocolHttp(HttpViolation::UnsupportedVersion)),
            (b"GET / HTTX/1.1\r\n\r\n",
             Error::ProtocolHttp(HttpViolation::InvalidVersion)),
            (b"GET / HTTP/1.1\n\n",
             Error::ProtocolHttp(HttpViolation::BareLineEnding)),
            (b"GET / HTTP/1.1\r\nHost 127.0.0.1\r\n\r\n",
             Error::ProtocolHttp(HttpViolation::InvalidHeader)),
            (b"GET / HTTP/1.1\r\n: nameless\r\n\r\n",
             Error::ProtocolHttp(HttpViolation::InvalidHeader)),
            (b"POST / HTTP/1.1\r\nContent-Length: 5\r\nContent-Length: 5\r\n\r\n",
             Error::ProtocolHttp(HttpViolation::DuplicateContentLength)),
            (b"POST / HTTP/1.1\r\nContent-Length: five\r\n\r\n",
             Error::ProtocolHttp(HttpViolation::InvalidContentLength)),
        ];

        for (wire, expected) in cases {
            let result = parse(&config, wire);
            match result {
                Err(err) => assert_eq!(
                    format!("{err:?}"),
                    format!("{expected:?}"),
                    "{}",
                    String::from_utf8_lossy(wire)
                ),
                Ok(_) => panic!("accepted: {}", String::from_utf8_lossy(wire)),
            }
        }
    }

    #[test]
    fn gzip_transfer_encoding_is_not_implemented() {
        let config = small_config();
        assert!(matches!(
            parse(&config, b"POST / HTTP/1.1\r\nTransfer-Encoding: gzip\r\n\r\n"),
            Err(Error::ProtocolHttp(HttpViolation::UnsupportedTransferEncoding))
        ));
    }

    #[test]
    fn body_at_limit_succeeds_one_over_fails() {
        let config = small_config(); // max_body_size = 128

        let mut at_limit = b"POST / HTTP/1.1\r\nContent-Length: 128\r\n\r\n".to_vec();
        at_limit.extend_from_slice(&[b'x'; 128]);
        let req = parse_complete(&config, &at_limit).unwrap();
        assert_eq!(req.body().len(), 128);

        let over = b"POST / HTTP/1.1\r\nContent-Length: 129\r\n\r\n".to_vec();
        assert!(matches!(
            parse(&config, &over),
            Err(Error::Limit(LimitKind::BodySize))
        ));
    }

    #[test]
    fn extra_byte_after_body_is_invalid_framing() {
        let config = small_config();
        let mut wire = b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\n".to_vec();
        wire.extend_from_slice(b"0123456789X");

        assert!(matches!(
            parse(&config, &wire),
            Err(Error::ProtocolHttp(HttpViolation::InvalidFraming))
        ));
    }

    #[test]
    fn too_many_headers() {
        let config = small_config(); // max_headers = 8
        let mut wire = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..9 {
            wire.extend_from_slice(format!("X-H{i}: v\r\n").as_bytes());
        }
        wire.extend_from_slice(b"\r\n");

        assert!(matches!(
            parse(&config, &wire),
            Err(Error::Limit(LimitKind::HeaderCount))
        ));
    }

    #[test]
    fn header_bounds() {
        let config = small_config(); // name <= 32, value <= 64

        let at_name_limit = format!("GET / HTTP/1.1\r\n{}: v\r\n\r\n", "N".repeat(32));
        parse_complete(&config, at_name_limit.as_bytes()).unwrap();

        let over_name = format!("GET / HTTP/1.1\r\n{}: v\r\n\r\n", "N".repeat(33));
        assert!(matches!(
            parse(&config, over_name.as_bytes()),
            Err(Error::Limit(LimitKind::HeaderNameSize))
        ));

        let at_value_limit = format!("GET / HTTP/1.1\r\nX: {}\r\n\r\n", "v".repeat(64));
        parse_complete(&config, at_value_limit.as_bytes()).unwrap();

        let over_value = format!("GET / HTTP/1.1\r\nX: {}\r\n\r\n", "v".repeat(65));
        assert!(matches!(
            parse(&config, over_value.as_bytes()),
            Err(Error::Limit(LimitKind::HeaderSize))
        ));
    }

    #[test]
    fn url_at_and_over_limit() {
        let config = small_config(); // max_url_size = 256

        let at_limit = format!("GET /{} HTTP/1.1\r\n\r\n", "u".repeat(255));
        parse_complete(&config, at_limit.as_bytes()).unwrap();

        let over = format!("GET /{} HTTP/1.1\r\n\r\n", "u".repeat(256));
        assert!(matches!(
            parse(&config, over.as_bytes()),
            Err(Error::Limit(LimitKind::UrlSize))
        ));
    }

    #[test]
    fn reset_supports_reuse() {
        let config = small_config();
        let mut parser = Parser::new(Arc::clone(&config));
        let mut request = Request::new(&config);

        assert!(parser
            .push(b"GET /first HTTP/1.1\r\n\r\n", &mut request)
            .unwrap());
        assert_eq!(request.path(), b"/first");

        parser.reset();
        request.reset();
        assert!(!parser.started());

        assert!(parser
            .push(b"GET /second HTTP/1.1\r\n\r\n", &mut request)
            .unwrap());
        assert_eq!(request.path(), b"/second");
    }

    #[test]
    fn user_data_slot() {
        let config = small_config();
        let mut req = Request::new(&config);

        assert!(req.user_data::<u32>().is_none());
        req.set_user_data(7u32);
        assert_eq!(req.user_data::<u32>(), Some(&7));
        assert!(req.user_data::<String>().is_none());
    }
}
