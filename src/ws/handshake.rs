//! Server side of the WebSocket opening handshake.

use crate::{http::request::Request, ws::frame};

/// Why an upgrade request was turned down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpgradeReject {
    /// `Sec-WebSocket-Version` missing or not `13`; answer 426 with the
    /// supported version advertised.
    WrongVersion,
    /// `Sec-WebSocket-Key` missing or unusable; answer 400.
    BadKey,
}

/// Validates an upgrade request and produces the `101 Switching Protocols`
/// response bytes.
///
/// The caller has already established that the request asked for a
/// WebSocket upgrade (`GET` + `Upgrade: websocket` + `Connection: Upgrade`)
/// and that a WebSocket handler is registered for the path.
pub(crate) fn upgrade_response(request: &Request) -> Result<Vec<u8>, UpgradeReject> {
    match request.header(b"sec-websocket-version") {
        Some(b"13") => {}
        _ => return Err(UpgradeReject::WrongVersion),
    }

    let key = request
        .header(b"sec-websocket-key")
        .ok_or(UpgradeReject::BadKey)?;
    if key.is_empty() || key.len() > 64 || !key.iter().all(|b| b.is_ascii_graphic()) {
        return Err(UpgradeReject::BadKey);
    }
    let key = std::str::from_utf8(key).map_err(|_| UpgradeReject::BadKey)?;

    let accept = frame::accept_key(key);
    let mut wire = Vec::with_capacity(128);
    wire.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
    wire.extend_from_slice(b"upgrade: websocket\r\n");
    wire.extend_from_slice(b"connection: Upgrade\r\n");
    wire.extend_from_slice(b"sec-websocket-accept: ");
    wire.extend_from_slice(accept.as_bytes());
    wire.extend_from_slice(b"\r\n\r\n");
    Ok(wire)
}

pub(crate) const RESP_UPGRADE_REQUIRED: &[u8] = b"HTTP/1.1 426 Upgrade Required\r\n\
      sec-websocket-version: 13\r\n\
      connection: close\r\n\
      content-length: 0\r\n\
      \r\n";
