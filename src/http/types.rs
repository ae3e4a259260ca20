//! Core HTTP protocol types and byte-level helpers.

use crate::errors::{Error, HttpViolation};

// TO LOWER CASE

#[rustfmt::skip]
const ASCII_TABLE: [u8; 256] = [
    //   x0    x1    x2    x3    x4    x5    x6    x7    x8    x9    xA    xB    xC    xD    xE    xF
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, // 0x
    0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1A, 0x1B, 0x1C, 0x1D, 0x1E, 0x1F, // 1x
    0x20, 0x21, 0x22, 0x23, 0x24, 0x25, 0x26, 0x27, 0x28, 0x29, 0x2A, 0x2B, 0x2C, 0x2D, 0x2E, 0x2F, // 2x
    0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3A, 0x3B, 0x3C, 0x3D, 0x3E, 0x3F, // 3x
    0x40, b'a', b'b', b'c', b'd', b'e', b'f', b'g', b'h', b'i', b'j', b'k', b'l', b'm', b'n', b'o', // 4x
    b'p', b'q', b'r', b's', b't', b'u', b'v', b'w', b'x', b'y', b'z', 0x5B, 0x5C, 0x5D, 0x5E, 0x5F, // 5x
    0x60, b'a', b'b', b'c', b'd', b'e', b'f', b'g', b'h', b'i', b'j', b'k', b'l', b'm', b'n', b'o', // 6x
    b'p', b'q', b'r', b's', b't', b'u', b'v', b'w', b'x', b'y', b'z', 0x7B, 0x7C, 0x7D, 0x7E, 0x7F, // 7x
    0x80, 0x81, 0x82, 0x83, 0x84, 0x85, 0x86, 0x87, 0x88, 0x89, 0x8A, 0x8B, 0x8C, 0x8D, 0x8E, 0x8F, // 8x
    0x90, 0x91, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97, 0x98, 0x99, 0x9A, 0x9B, 0x9C, 0x9D, 0x9E, 0x9F, // 9x
    0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7, 0xA8, 0xA9, 0xAA, 0xAB, 0xAC, 0xAD, 0xAE, 0xAF, // Ax
    0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5, 0xB6, 0xB7, 0xB8, 0xB9, 0xBA, 0xBB, 0xBC, 0xBD, 0xBE, 0xBF, // Bx
    0xC0, 0xC1, 0xC2, 0xC3, 0xC4, 0xC5, 0xC6, 0xC7, 0xC8, 0xC9, 0xCA, 0xCB, 0xCC, 0xCD, 0xCE, 0xCF, // Cx
    0xD0, 0xD1, 0xD2, 0xD3, 0xD4, 0xD5, 0xD6, 0xD7, 0xD8, 0xD9, 0xDA, 0xDB, 0xDC, 0xDD, 0xDE, 0xDF, // Dx
    0xE0, 0xE1, 0xE2, 0xE3, 0xE4, 0xE5, 0xE6, 0xE7, 0xE8, 0xE9, 0xEA, 0xEB, 0xEC, 0xED, 0xEE, 0xEF, // Ex
    0xF0, 0xF1, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6, 0xF7, 0xF8, 0xF9, 0xFA, 0xFB, 0xFC, 0xFD, 0xFE, 0xFF, // Fx
];

#[inline(always)]
pub(crate) fn to_lower_case(src: &mut [u8]) {
    for byte in src.iter_mut() {
        *byte = ASCII_TABLE[*byte as usize];
    }
}

#[inline(always)]
pub(crate) fn slice_to_usize(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }

    let mut result: usize = 0;
    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }

        result = result
            .checked_mul(10)?
            .checked_add((byte - b'0') as usize)?;
    }

    Some(result)
}

#[inline(always)]
pub(crate) fn hex_to_usize(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }

    let mut result: usize = 0;
    for &byte in bytes {
        let digit = match byte {
            b'0'..=b'9' => byte - b'0',
            b'a'..=b'f' => byte - b'a' + 10,
            b'A'..=b'F' => byte - b'A' + 10,
            _ => return None,
        };

        result = result.checked_mul(16)?.checked_add(digit as usize)?;
    }

    Some(result)
}

/// Splits a comma-separated header value and reports whether any element
/// equals `token` after trimming and ASCII case folding.
#[inline]
pub(crate) fn header_has_token(value: &[u8], token: &[u8]) -> bool {
    value
        .split(|&b| b == b',')
        .any(|part| trim_ascii(part).eq_ignore_ascii_case(token))
}

#[inline(always)]
pub(crate) fn trim_ascii(src: &[u8]) -> &[u8] {
    let start = src.iter().position(|b| !b.is_ascii_whitespace());
    let end = src.iter().rposition(|b| !b.is_ascii_whitespace());
    match (start, end) {
        (Some(s), Some(e)) => &src[s..=e],
        _ => b"",
    }
}

// METHOD

/// HTTP request methods.
///
/// `Any` doubles as the "unknown method" bucket: an unrecognized (or empty)
/// method string decodes to `Any`, and a route registered for `Any` accepts
/// every method.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Any,
}

impl Method {
    /// Decodes a method token from a request line. Case-sensitive; the token
    /// must be followed by a space.
    #[inline(always)]
    pub(crate) fn from_request_line(src: &[u8]) -> Result<(Self, usize), Error> {
        match src {
            [b'G', b'E', b'T', b' ', ..] => Ok((Method::Get, 4)),
            [b'P', b'U', b'T', b' ', ..] => Ok((Method::Put, 4)),
            [b'P', b'O', b'S', b'T', b' ', ..] => Ok((Method::Post, 5)),
            [b'H', b'E', b'A', b'D', b' ', ..] => Ok((Method::Head, 5)),
            [b'P', b'A', b'T', b'C', b'H', b' ', ..] => Ok((Method::Patch, 6)),
            [b'D', b'E', b'L', b'E', b'T', b'E', b' ', ..] => Ok((Method::Delete, 7)),
            [b'O', b'P', b'T', b'I', b'O', b'N', b'S', b' ', ..] => Ok((Method::Options, 8)),
            _ => Err(Error::ProtocolHttp(HttpViolation::InvalidMethod)),
        }
    }

    /// Decodes a method name for router registration. Case-sensitive;
    /// empty or unknown strings decode to [`Method::Any`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "HEAD" => Method::Head,
            "OPTIONS" => Method::Options,
            "PATCH" => Method::Patch,
            _ => Method::Any,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
            Method::Any => "ANY",
        }
    }

    #[inline(always)]
    const fn bit(&self) -> u16 {
        match self {
            Method::Get => 1 << 0,
            Method::Post => 1 << 1,
            Method::Put => 1 << 2,
            Method::Delete => 1 << 3,
            Method::Head => 1 << 4,
            Method::Options => 1 << 5,
            Method::Patch => 1 << 6,
            Method::Any => 0x7F,
        }
    }
}

// METHOD MASK

/// Bitset of allowed methods for a route.
///
/// [`MethodMask::ANY`] admits every method, including unrecognized ones.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MethodMask(u16);

impl MethodMask {
    pub const ANY: MethodMask = MethodMask(0x7F);

    pub const fn empty() -> Self {
        MethodMask(0)
    }

    pub fn of(methods: &[Method]) -> Self {
        let mut mask = 0;
        for m in methods {
            mask |= m.bit();
        }
        MethodMask(mask)
    }

    #[inline(always)]
    pub fn contains(&self, method: Method) -> bool {
        if self.0 == Self::ANY.0 {
            return true;
        }
        match method {
            // An unknown method only passes a mask that admits everything.
            Method::Any => false,
            m => self.0 & m.bit() != 0,
        }
    }
}

impl From<Method> for MethodMask {
    fn from(method: Method) -> Self {
        MethodMask(method.bit())
    }
}

// VERSION

/// HTTP protocol version.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Version {
    /// HTTP/1.0, no keep-alive by default. [RFC 1945](https://tools.ietf.org/html/rfc1945)
    Http10,
    /// HTTP/1.1, keep-alive by default. [RFC 7230](https://tools.ietf.org/html/rfc7230)
    Http11,
}

impl Version {
    /// Decodes a version token, returning the version and its default
    /// keep-alive behavior.
    #[inline(always)]
    pub(crate) const fn from_bytes(src: &[u8]) -> Result<(Self, bool), Error> {
        match src {
            b"HTTP/1.1" => Ok((Self::Http11, true)),
            b"HTTP/1.0" => Ok((Self::Http10, false)),
            b"HTTP/2.0" | b"HTTP/0.9" | b"HTTP/3.0" => {
                Err(Error::ProtocolHttp(HttpViolation::UnsupportedVersion))
            }
            _ => Err(Error::ProtocolHttp(HttpViolation::InvalidVersion)),
        }
    }

    pub(crate) const fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

// REASON PHRASES

macro_rules! reason_phrases {
    ($($num:literal => $str:literal;)+) => {
        /// Standard IANA reason phrase for a status code; unknown codes get
        /// an empty phrase.
        pub const fn reason_phrase(code: u16) -> &'static str {
            match code {
                $($num => $str,)+
                _ => "",
            }
        }
    }
}

reason_phrases! {
    100 => "Continue";
    101 => "Switching Protocols";
    102 => "Processing";

    200 => "OK";
    201 => "Created";
    202 => "Accepted";
    203 => "Non Authoritative Information";
    204 => "No Content";
    205 => "Reset Content";
    206 => "Partial Content";

    300 => "Multiple Choices";
    301 => "Moved Permanently";
    302 => "Found";
    303 => "See Other";
    304 => "Not Modified";
    307 => "Temporary Redirect";
    308 => "Permanent Redirect";

    400 => "Bad Request";
    401 => "Unauthorized";
    402 => "Payment Required";
    403 => "Forbidden";
    404 => "Not Found";
    405 => "Method Not Allowed";
    406 => "Not Acceptable";
    408 => "Request Timeout";
    409 => "Conflict";
    410 => "Gone";
    411 => "Length Required";
    412 => "Precondition Failed";
    413 => "Request Entity Too Large";
    414 => "URI Too Long";
    415 => "Unsupported Media Type";
    417 => "Expectation Failed";
    418 => "I'm a teapot";
    422 => "Unprocessable Entity";
    426 => "Upgrade Required";
    428 => "Precondition Required";
    429 => "Too Many Requests";
    431 => "Request Header Fields Too Large";

    500 => "Internal Server Error";
    501 => "Not Implemented";
    502 => "Bad Gateway";
    503 => "Service Unavailable";
    504 => "Gateway Timeout";
    505 => "HTTP Version Not Supported";
    507 => "Insufficient Storage";
    511 => "Network Authentication Required";
}

// HEADERS

/// One request header. The name is stored lowercased; the value is kept as
/// received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Header {
    pub(crate) name: Vec<u8>,
    pub(crate) value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct HeaderMap {
    pub(crate) headers: Vec<Header>,
}

impl HeaderMap {
    #[inline(always)]
    pub(crate) fn with_capacity(count: usize) -> Self {
        Self {
            headers: Vec::with_capacity(count),
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.headers.clear();
    }

    /// First value with case-insensitive name matching. Linear search.
    #[inline(always)]
    pub(crate) fn get(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_slice())
    }

    pub(crate) fn len(&self) -> usize {
        self.headers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_from_request_line() {
        #[rustfmt::skip]
        let cases = [
            (&b"GET /url"[..],    Some((Method::Get, 4))),
            (b"GET ",             Some((Method::Get, 4))),
            (b"PUT ",             Some((Method::Put, 4))),
            (b"POST ",            Some((Method::Post, 5))),
            (b"HEAD ",            Some((Method::Head, 5))),
            (b"PATCH ",           Some((Method::Patch, 6))),
            (b"DELETE ",          Some((Method::Delete, 7))),
            (b"OPTIONS ",         Some((Method::Options, 8))),

            (b"GET",              None),
            (b"get ",             None),
            (b"PYU ",             None),
            (b"GETGETGET ",       None),
        ];

        for (input, expected) in cases {
            match expected {
                Some(pair) => assert_eq!(Method::from_request_line(input).unwrap(), pair),
                None => assert!(Method::from_request_line(input).is_err()),
            }
        }
    }

    #[test]
    fn method_from_name_decodes_unknown_as_any() {
        #[rustfmt::skip]
        let cases = [
            ("GET",     Method::Get),
            ("POST",    Method::Post),
            ("PUT",     Method::Put),
            ("DELETE",  Method::Delete),
            ("HEAD",    Method::Head),
            ("OPTIONS", Method::Options),
            ("PATCH",   Method::Patch),
            ("get",     Method::Any),
            ("",        Method::Any),
            ("BREW",    Method::Any),
        ];

        for (name, expected) in cases {
            assert_eq!(Method::from_name(name), expected);
        }
    }

    #[test]
    fn method_mask() {
        let mask = MethodMask::of(&[Method::Get, Method::Head]);
        assert!(mask.contains(Method::Get));
        assert!(mask.contains(Method::Head));
        assert!(!mask.contains(Method::Post));
        assert!(!mask.contains(Method::Any));

        assert!(MethodMask::ANY.contains(Method::Delete));
        assert!(MethodMask::ANY.contains(Method::Any));
        assert!(!MethodMask::empty().contains(Method::Get));

        let single: MethodMask = Method::Patch.into();
        assert!(single.contains(Method::Patch));
        assert!(!single.contains(Method::Put));
    }

    #[test]
    fn version_from_bytes() {
        assert_eq!(
            Version::from_bytes(b"HTTP/1.1").unwrap(),
            (Version::Http11, true)
        );
        assert_eq!(
            Version::from_bytes(b"HTTP/1.0").unwrap(),
            (Version::Http10, false)
        );
        assert!(Version::from_bytes(b"HTTP/2.0").is_err());
        assert!(Version::from_bytes(b"http/1.1").is_err());
        assert!(Version::from_bytes(b"").is_err());
    }

    #[test]
    fn reason_phrases_known_and_unknown() {
        #[rustfmt::skip]
        let cases = [
            (200, "OK"),
            (404, "Not Found"),
            (413, "Request Entity Too Large"),
            (429, "Too Many Requests"),
            (500, "Internal Server Error"),
            (599, ""),
            (299, ""),
        ];

        for (code, phrase) in cases {
            assert_eq!(reason_phrase(code), phrase);
        }
    }

    #[test]
    fn header_map_lookup_is_case_insensitive() {
        let mut map = HeaderMap::with_capacity(4);
        map.headers.push(Header {
            name: b"content-type".to_vec(),
            value: b"text/plain".to_vec(),
        });
        map.headers.push(Header {
            name: b"content-type".to_vec(),
            value: b"second".to_vec(),
        });

        assert_eq!(map.get(b"Content-Type"), Some(&b"text/plain"[..]));
        assert_eq!(map.get(b"CONTENT-TYPE"), Some(&b"text/plain"[..]));
        assert_eq!(map.get(b"accept"), None);
    }

    #[test]
    fn token_scanning() {
        assert!(header_has_token(b"keep-alive, Upgrade", b"upgrade"));
        assert!(header_has_token(b"Upgrade", b"upgrade"));
        assert!(header_has_token(b" close ", b"close"));
        assert!(!header_has_token(b"keep-alive", b"upgrade"));
    }

    #[test]
    fn numeric_parsing() {
        assert_eq!(slice_to_usize(b"1256"), Some(1256));
        assert_eq!(slice_to_usize(b"0"), Some(0));
        assert_eq!(slice_to_usize(b""), None);
        assert_eq!(slice_to_usize(b"12a"), None);
        assert_eq!(slice_to_usize(b"999999999999999999999999"), None);

        assert_eq!(hex_to_usize(b"0"), Some(0));
        assert_eq!(hex_to_usize(b"a"), Some(10));
        assert_eq!(hex_to_usize(b"1F"), Some(31));
        assert_eq!(hex_to_usize(b"xyz"), None);
        assert_eq!(hex_to_usize(b""), None);
    }

    #[test]
    fn lower_case_table() {
        let mut name = b"Content-Type".to_vec();
        to_lower_case(&mut name);
        assert_eq!(name, b"content-type");

        let mut mixed = b"X-CuStOm-123".to_vec();
        to_lower_case(&mut mixed);
        assert_eq!(mixed, b"x-custom-123");
    }
}
