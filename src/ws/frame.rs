//! RFC 6455 frame codec: header parse/build, mask XOR and the
//! `Sec-WebSocket-Accept` derivation.
//!
//! The header is parsed from raw bytes with explicit shifts and masks; all
//! three payload-length forms (7-bit, 16-bit, 64-bit) are supported.

use crate::errors::Error;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use sha1::{Digest, Sha1};

/// Fixed GUID appended to the client key when deriving the accept token
/// ([RFC 6455 §1.3](https://datatracker.ietf.org/doc/html/rfc6455#section-1.3)).
pub(crate) const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl OpCode {
    fn from_bits(bits: u8) -> Result<Self, Error> {
        match bits {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            _ => Err(Error::ProtocolWs("unknown opcode")),
        }
    }

    #[inline(always)]
    pub const fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    pub(crate) fin: bool,
    pub(crate) opcode: OpCode,
    pub(crate) masked: bool,
    pub(crate) mask: [u8; 4],
    pub(crate) payload_len: u64,
    /// Bytes occupied by the header itself (2..=14).
    pub(crate) header_len: usize,
}

/// Parses a frame header from the start of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed. Validation performed
/// here: reserved bits (compression is not negotiated), unknown opcodes,
/// fragmented control frames and control payloads over 125 bytes.
pub(crate) fn parse_header(buf: &[u8]) -> Result<Option<FrameHeader>, Error> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let fin = buf[0] & 0b1000_0000 != 0;
    if buf[0] & 0b0111_0000 != 0 {
        return Err(Error::ProtocolWs("reserved bits set"));
    }
    let opcode = OpCode::from_bits(buf[0] & 0b0000_1111)?;
    let masked = buf[1] & 0b1000_0000 != 0;
    let length_code = buf[1] & 0b0111_1111;

    if opcode.is_control() {
        if !fin {
            return Err(Error::ProtocolWs("fragmented control frame"));
        }
        if length_code > 125 {
            return Err(Error::ProtocolWs("control frame payload over 125 bytes"));
        }
    }

    let extra = match length_code {
        126 => 2,
        127 => 8,
        _ => 0,
    };
    let header_len = 2 + extra + if masked { 4 } else { 0 };
    if buf.len() < header_len {
        return Ok(None);
    }

    let payload_len = match length_code {
        126 => u16::from_be_bytes([buf[2], buf[3]]) as u64,
        127 => u64::from_be_bytes([
            buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8], buf[9],
        ]),
        code => code as u64,
    };

    let mut mask = [0u8; 4];
    if masked {
        mask.copy_from_slice(&buf[2 + extra..2 + extra + 4]);
    }

    Ok(Some(FrameHeader {
        fin,
        opcode,
        masked,
        mask,
        payload_len,
        header_len,
    }))
}

/// Appends one frame to `out`. When `mask` is set, the payload is XORed
/// with the key as it is written; otherwise it is copied as-is (the
/// server-to-client direction).
pub(crate) fn build_frame(
    opcode: OpCode,
    fin: bool,
    mask: Option<[u8; 4]>,
    payload: &[u8],
    out: &mut Vec<u8>,
) {
    let first = (fin as u8) << 7 | opcode as u8;
    out.push(first);

    let mask_bit = if mask.is_some() { 0b1000_0000 } else { 0 };
    match payload.len() {
        len @ 0..=125 => out.push(mask_bit | len as u8),
        len @ 126..=65535 => {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        len => {
            out.push(mask_bit | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }
    }

    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            let start = out.len();
            out.extend_from_slice(payload);
            apply_mask(key, &mut out[start..]);
        }
        None => out.extend_from_slice(payload),
    }
}

/// XORs `data` with the 4-byte key. Applying the same key twice restores
/// the original bytes.
#[inline]
pub fn apply_mask(key: [u8; 4], data: &mut [u8]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

/// Draws a masking key from a cryptographic generator, e.g.
/// `rand::rngs::StdRng` seeded from the OS entropy source.
pub fn generate_mask<R: RngCore>(rng: &mut R) -> [u8; 4] {
    let mut key = [0u8; 4];
    rng.fill_bytes(&mut key);
    key
}

/// Derives the `Sec-WebSocket-Accept` token for a client key.
pub fn accept_key(client_key: &str) -> String {
    let mut sha = Sha1::new();
    sha.update(client_key.as_bytes());
    sha.update(ACCEPT_GUID.as_bytes());
    BASE64.encode(sha.finalize())
}

/// Recomputes the accept token and compares in constant time.
pub fn verify_accept(client_key: &str, accept: &str) -> bool {
    let expected = accept_key(client_key);
    if expected.len() != accept.len() {
        return false;
    }
    expected
        .bytes()
        .zip(accept.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
