//! Error taxonomy shared by every subsystem of the server.
//!
//! Each variant belongs to one category with a stable numeric code
//! (`category * 100 + subcode`) so that tooling can match on errors
//! without string comparison.

use std::io;
use thiserror::Error;

/// Categorized server error.
///
/// The category decides how the connection state machine reacts: protocol
/// and limit errors produce an HTTP error response before the connection
/// closes, network and TLS runtime errors close the connection without a
/// response, and caller-misuse errors are returned synchronously and never
/// reach the peer.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller misuse; never reported to the HTTP peer.
    #[error("invalid parameter: {0}")]
    InvalidParam(&'static str),

    /// A bounded buffer refused to grow past its ceiling.
    #[error("capacity exceeded in {0}")]
    OutOfCapacity(&'static str),

    /// Route, file or resource missing.
    #[error("not found: {0}")]
    NotFound(&'static str),

    /// Accept, read or write failure on the socket.
    #[error("network error: {0}")]
    Network(#[from] io::Error),

    /// One of the configured deadlines elapsed.
    #[error("timed out while {0}")]
    Timeout(&'static str),

    /// Malformed HTTP; answered with 400 (or 501) and the connection closes.
    #[error("http protocol violation: {0}")]
    ProtocolHttp(HttpViolation),

    /// Malformed WebSocket traffic; answered with a CLOSE frame.
    #[error("websocket protocol violation: {0}")]
    ProtocolWs(&'static str),

    /// Certificate, key or CA material could not be loaded or does not match.
    #[error("tls configuration: {0}")]
    TlsConfig(String),

    /// The TLS handshake failed; the connection closes without a response.
    #[error("tls handshake: {0}")]
    TlsHandshake(String),

    /// TLS record-layer I/O failed after the handshake.
    #[error("tls i/o: {0}")]
    TlsIo(String),

    /// A configured limit was exceeded.
    #[error("limit exceeded: {0}")]
    Limit(LimitKind),

    /// `send()` was called on a response that already went out.
    #[error("response already sent")]
    AlreadySent,

    /// The connection was torn down before the response could be sent.
    #[error("connection closed")]
    ConnectionClosed,

    /// A handler or middleware failed; answered with 500.
    #[error("internal: {0}")]
    Internal(String),
}

/// Concrete HTTP parse violations, all mapped to `400 Bad Request` except
/// where noted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpViolation {
    InvalidMethod,
    InvalidUrl,
    InvalidVersion,
    /// Only HTTP/1.0 and HTTP/1.1 are spoken; mapped to 505.
    UnsupportedVersion,
    InvalidHeader,
    /// A line ended in a bare CR or bare LF instead of CRLF.
    BareLineEnding,
    InvalidContentLength,
    DuplicateContentLength,
    InvalidChunkedEncoding,
    /// A transfer coding the server does not implement; mapped to 501.
    UnsupportedTransferEncoding,
    /// Leftover bytes that do not start a valid next request.
    InvalidFraming,
}

impl std::fmt::Display for HttpViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Which limit was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    /// Decoded request body over `max_body_size`; mapped to 413.
    BodySize,
    /// One header value over `max_header_size`; mapped to 400.
    HeaderSize,
    /// Header name over its bound; mapped to 400.
    HeaderNameSize,
    /// More than `max_headers` entries; mapped to 431.
    HeaderCount,
    /// Request URL over `max_url_size`; mapped to 414.
    UrlSize,
    /// Fixed-window rate limit tripped; mapped to 429.
    Rate,
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Error {
    /// Stable numeric code, `category * 100 + subcode`.
    pub fn code(&self) -> u32 {
        match self {
            Error::InvalidParam(_) => 100,
            Error::OutOfCapacity(_) => 200,
            Error::NotFound(_) => 300,
            Error::Network(_) => 400,
            Error::Timeout(_) => 500,
            Error::ProtocolHttp(v) => 600 + *v as u32,
            Error::ProtocolWs(_) => 700,
            Error::TlsConfig(_) => 800,
            Error::TlsHandshake(_) => 801,
            Error::TlsIo(_) => 802,
            Error::Limit(k) => 900 + *k as u32,
            Error::AlreadySent => 1000,
            Error::ConnectionClosed => 1001,
            Error::Internal(_) => 1100,
        }
    }

    /// HTTP status to answer with, or `None` when the connection must be
    /// closed without a response (network and TLS runtime failures).
    pub(crate) fn http_status(&self) -> Option<u16> {
        match self {
            Error::ProtocolHttp(HttpViolation::UnsupportedVersion) => Some(505),
            Error::ProtocolHttp(HttpViolation::UnsupportedTransferEncoding) => Some(501),
            Error::ProtocolHttp(_) => Some(400),
            Error::Limit(LimitKind::BodySize) => Some(413),
            Error::Limit(LimitKind::UrlSize) => Some(414),
            Error::Limit(LimitKind::HeaderCount) => Some(431),
            Error::Limit(LimitKind::HeaderSize) | Error::Limit(LimitKind::HeaderNameSize) => {
                Some(400)
            }
            Error::Limit(LimitKind::Rate) => Some(429),
            Error::OutOfCapacity(_) => Some(500),
            Error::Internal(_) => Some(500),
            Error::NotFound(_) => Some(404),
            Error::Timeout(_) => Some(408),
            Error::InvalidParam(_) | Error::AlreadySent => None,
            Error::Network(_)
            | Error::ConnectionClosed
            | Error::TlsConfig(_)
            | Error::TlsHandshake(_)
            | Error::TlsIo(_)
            | Error::ProtocolWs(_) => None,
        }
    }
}

macro_rules! static_responses {
    ($($name:ident: $status:expr;)*) => {
        $(
            pub(crate) const $name: &[u8] = concat!(
                "HTTP/1.1 ", $status, "\r\n",
                "connection: close\r\n",
                "content-length: 0\r\n",
                "\r\n",
            ).as_bytes();
        )*
    };
}

// Precomposed wire responses for paths where no Response object exists yet.
static_responses! {
    RESP_SERVICE_UNAVAILABLE: "503 Service Unavailable";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        #[rustfmt::skip]
        let cases = [
            (Error::ProtocolHttp(HttpViolation::InvalidMethod),               Some(400)),
            (Error::ProtocolHttp(HttpViolation::BareLineEnding),              Some(400)),
            (Error::ProtocolHttp(HttpViolation::DuplicateContentLength),      Some(400)),
            (Error::ProtocolHttp(HttpViolation::UnsupportedVersion),          Some(505)),
            (Error::ProtocolHttp(HttpViolation::UnsupportedTransferEncoding), Some(501)),
            (Error::Limit(LimitKind::BodySize),                               Some(413)),
            (Error::Limit(LimitKind::UrlSize),                                Some(414)),
            (Error::Limit(LimitKind::HeaderCount),                            Some(431)),
            (Error::Limit(LimitKind::HeaderSize),                             Some(400)),
            (Error::Limit(LimitKind::Rate),                                   Some(429)),
            (Error::Internal("handler".into()),                               Some(500)),
            (Error::ConnectionClosed,                                         None),
            (Error::TlsHandshake("alert".into()),                             None),
        ];

        for (error, status) in cases {
            assert_eq!(error.http_status(), status, "{error}");
        }
    }

    #[test]
    fn codes_are_distinct_per_category() {
        let a = Error::Limit(LimitKind::BodySize).code();
        let b = Error::Limit(LimitKind::Rate).code();
        assert_ne!(a, b);
        assert_eq!(a / 100, b / 100);

        assert_ne!(
            Error::ProtocolHttp(HttpViolation::InvalidMethod).code() / 100,
            Error::ProtocolWs("bad frame").code() / 100,
        );
    }

    #[test]
    fn static_responses_are_well_formed() {
        let text = std::str::from_utf8(RESP_SERVICE_UNAVAILABLE).unwrap();
        assert!(text.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
        assert!(text.contains("content-length: 0\r\n"));
    }
}
