//! Post-upgrade WebSocket engine.
//!
//! After the `101` response is flushed the HTTP state machine hands the
//! stream to [`WsEngine::run`], which owns it until close: it accumulates
//! incoming bytes, extracts frames, reassembles fragmented messages,
//! answers PINGs, polices the RFC 6455 rules (close 1002), enforces the
//! size limits (close 1009) and keeps the peer alive with periodic PINGs
//! (close 1011 on silence).

use crate::{
    buffer::ByteBuf,
    config::ServerConfig,
    errors::Error,
    router::template_matches,
    ws::frame::{self, OpCode},
};
use std::sync::Arc;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time::{sleep_until, Instant},
};

/// Connection state, visible to handlers through [`WsSession::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Payload kind of a complete message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
}

/// Application callbacks for one WebSocket connection.
///
/// All callbacks run on the connection's task; outbound traffic is staged
/// on the [`WsSession`] and flushed by the engine.
pub trait WsHandler: Send + Sync + 'static {
    /// The upgrade completed and the connection is open.
    fn on_connect(&self, _session: &mut WsSession) {}

    /// A complete (possibly reassembled) TEXT or BINARY message arrived.
    fn on_message(&self, session: &mut WsSession, kind: MessageKind, payload: &[u8]);

    /// The connection finished its close handshake or was torn down.
    fn on_close(&self, _code: u16, _reason: &[u8]) {}

    /// A protocol or I/O problem is about to close the connection.
    fn on_error(&self, _error: &Error) {}
}

/// Outbound side of an open WebSocket connection.
///
/// Server-to-client frames are never masked.
#[derive(Debug)]
pub struct WsSession {
    state: WsState,
    out: Vec<u8>,
    close_code: Option<u16>,
}

impl WsSession {
    fn new() -> Self {
        WsSession {
            state: WsState::Connecting,
            out: Vec::new(),
            close_code: None,
        }
    }

    pub fn state(&self) -> WsState {
        self.state
    }

    /// Queues a TEXT message.
    pub fn send_text(&mut self, text: &str) -> Result<(), Error> {
        self.send_data(OpCode::Text, text.as_bytes())
    }

    /// Queues a BINARY message.
    pub fn send_binary(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.send_data(OpCode::Binary, payload)
    }

    /// Queues a PING (payload at most 125 bytes).
    pub fn send_ping(&mut self, payload: &[u8]) -> Result<(), Error> {
        if payload.len() > 125 {
            return Err(Error::InvalidParam("ping payload over 125 bytes"));
        }
        self.send_data(OpCode::Ping, payload)
    }

    /// Initiates the close handshake with the given code.
    pub fn close(&mut self, code: u16, reason: &[u8]) {
        if self.close_code.is_some() || self.state == WsState::Closed {
            return;
        }
        self.stage_close(code, reason);
        self.state = WsState::Closing;
    }

    fn send_data(&mut self, opcode: OpCode, payload: &[u8]) -> Result<(), Error> {
        match self.state {
            WsState::Open | WsState::Connecting => {
                frame::build_frame(opcode, true, None, payload, &mut self.out);
                Ok(())
            }
            WsState::Closing | WsState::Closed => Err(Error::ConnectionClosed),
        }
    }

    fn stage_close(&mut self, code: u16, reason: &[u8]) {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(&reason[..reason.len().min(123)]);
        frame::build_frame(OpCode::Close, true, None, &payload, &mut self.out);
        self.close_code = Some(code);
    }
}

/// Frame loop driving one upgraded connection.
pub(crate) struct WsEngine {
    config: Arc<ServerConfig>,
    handler: Arc<dyn WsHandler>,
    session: WsSession,
    acc: ByteBuf,
    fragments: ByteBuf,
    fragment_kind: Option<MessageKind>,
}

impl WsEngine {
    pub(crate) fn new(config: Arc<ServerConfig>, handler: Arc<dyn WsHandler>) -> Self {
        // Room for the largest admissible frame plus header and one read.
        let acc_ceiling = config.ws_max_frame_size + 14 + config.read_buffer_size;
        let fragments_ceiling = config.ws_max_message_size;
        WsEngine {
            handler,
            session: WsSession::new(),
            acc: ByteBuf::with_ceiling(1024, acc_ceiling, "ws frame accumulation"),
            fragments: ByteBuf::with_ceiling(0, fragments_ceiling, "ws fragment reassembly"),
            fragment_kind: None,
            config,
        }
    }

    /// Runs the connection until the close handshake completes or the
    /// transport dies. Consumes the engine; the stream is closed on return.
    pub(crate) async fn run<S>(mut self, mut stream: S) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.session.state = WsState::Open;
        self.handler.on_connect(&mut self.session);

        let mut chunk = vec![0u8; self.config.read_buffer_size];
        let ping_interval = self.config.ws_ping_interval;
        let ping_timeout = self.config.ws_ping_timeout;
        let mut ping_timer =
            tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
        let mut awaiting_pong: Option<Instant> = None;
        let mut closing_deadline: Option<Instant> = None;

        loop {
            if !self.session.out.is_empty() {
                let staged = std::mem::take(&mut self.session.out);
                stream.write_all(&staged).await?;
                stream.flush().await?;
            }
            match self.session.state {
                WsState::Closed => break,
                WsState::Closing if closing_deadline.is_none() => {
                    closing_deadline = Some(Instant::now() + ping_timeout);
                }
                _ => {}
            }

            let liveness_deadline = match (closing_deadline, awaiting_pong) {
                (Some(d), _) => Some(d),
                (None, Some(sent)) => Some(sent + ping_timeout),
                (None, None) => None,
            };

            tokio::select! {
                biased;

                result = stream.read(&mut chunk) => {
                    let n = result?;
                    if n == 0 {
                        if self.session.state != WsState::Closed {
                            self.session.state = WsState::Closed;
                            let code = self.session.close_code.unwrap_or(1006);
                            self.handler.on_close(code, b"");
                        }
                        break;
                    }
                    awaiting_pong = None;
                    if self.acc.append(&chunk[..n]).is_err() {
                        self.fail(1009, Error::ProtocolWs("frame exceeds maximum size"));
                        continue;
                    }
                    self.drain_frames();
                }

                _ = ping_timer.tick() => {
                    if awaiting_pong.is_none() && self.session.state == WsState::Open {
                        frame::build_frame(OpCode::Ping, true, None, b"", &mut self.session.out);
                        awaiting_pong = Some(Instant::now());
                    }
                }

                _ = maybe_sleep(liveness_deadline) => {
                    if self.session.state == WsState::Closing {
                        // Peer never answered our CLOSE.
                        let code = self.session.close_code.unwrap_or(1000);
                        self.session.state = WsState::Closed;
                        self.handler.on_close(code, b"");
                    } else {
                        self.fail(1011, Error::Timeout("waiting for websocket pong"));
                    }
                }
            }
        }

        Ok(())
    }

    /// Extracts and dispatches every complete frame in the accumulation
    /// buffer.
    fn drain_frames(&mut self) {
        while self.session.state == WsState::Open || self.session.state == WsState::Closing {
            let header = match frame::parse_header(self.acc.as_slice()) {
                Ok(Some(header)) => header,
                Ok(None) => return,
                Err(error) => {
                    self.fail(1002, error);
                    return;
                }
            };

            if header.payload_len > self.config.ws_max_frame_size as u64 {
                self.fail(1009, Error::ProtocolWs("frame exceeds maximum size"));
                return;
            }
            let total = header.header_len + header.payload_len as usize;
            if self.acc.len() < total {
                return;
            }

            if !header.masked {
                self.fail(1002, Error::ProtocolWs("client frame is not masked"));
                return;
            }

            let mut payload = self.acc.as_slice()[header.header_len..total].to_vec();
            frame::apply_mask(header.mask, &mut payload);
            self.acc.consume(total);

            self.dispatch(header.opcode, header.fin, payload);
        }
    }

    fn dispatch(&mut self, opcode: OpCode, fin: bool, payload: Vec<u8>) {
        match opcode {
            OpCode::Close => {
                let (code, reason) = match payload.len() {
                    0 | 1 => (1005, &payload[..0]),
                    _ => (
                        u16::from_be_bytes([payload[0], payload[1]]),
                        &payload[2..],
                    ),
                };
                if self.session.close_code.is_none() {
                    // Answer with a matching CLOSE before going down.
                    let echo_code = if payload.len() >= 2 { code } else { 1000 };
                    self.session.stage_close(echo_code, reason);
                }
                self.session.state = WsState::Closed;
                self.handler.on_close(code, reason);
            }
            OpCode::Ping => {
                frame::build_frame(OpCode::Pong, true, None, &payload, &mut self.session.out);
            }
            OpCode::Pong => {
                // Liveness already refreshed by the read itself.
            }
            OpCode::Text | OpCode::Binary => {
                let kind = match opcode {
                    OpCode::Text => MessageKind::Text,
                    _ => MessageKind::Binary,
                };
                if self.fragment_kind.is_some() {
                    self.fail(1002, Error::ProtocolWs("data frame inside fragmented message"));
                    return;
                }
                if fin {
                    if kind == MessageKind::Text && simdutf8::basic::from_utf8(&payload).is_err() {
                        self.fail(1007, Error::ProtocolWs("invalid utf-8 in text message"));
                        return;
                    }
                    self.handler.on_message(&mut self.session, kind, &payload);
                } else {
                    self.fragment_kind = Some(kind);
                    if self.fragments.append(&payload).is_err() {
                        self.fail(1009, Error::ProtocolWs("message exceeds maximum size"));
                    }
                }
            }
            OpCode::Continuation => {
                let Some(kind) = self.fragment_kind else {
                    self.fail(1002, Error::ProtocolWs("continuation without a message"));
                    return;
                };
                if self.fragments.append(&payload).is_err() {
                    self.fail(1009, Error::ProtocolWs("message exceeds maximum size"));
                    return;
                }
                if fin {
                    let message = self.fragments.take();
                    self.fragment_kind = None;
                    if kind == MessageKind::Text && simdutf8::basic::from_utf8(&message).is_err() {
                        self.fail(1007, Error::ProtocolWs("invalid utf-8 in text message"));
                        return;
                    }
                    self.handler.on_message(&mut self.session, kind, &message);
                }
            }
        }
    }

    /// Reports the error, stages a CLOSE with `code` and marks the
    /// connection dead; the main loop flushes and exits.
    fn fail(&mut self, code: u16, error: Error) {
        self.handler.on_error(&error);
        if self.session.close_code.is_none() {
            self.session.stage_close(code, b"");
        }
        self.session.state = WsState::Closed;
        self.handler.on_close(code, b"");
    }
}

async fn maybe_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// Registration

/// Path-scoped WebSocket handler table; first registration per overlapping
/// pattern wins, same as the HTTP router.
#[derive(Default)]
pub(crate) struct WsRegistry {
    routes: Vec<(String, Arc<dyn WsHandler>)>,
}

impl WsRegistry {
    pub(crate) fn add(&mut self, pattern: &str, handler: Arc<dyn WsHandler>) {
        if self.routes.iter().any(|(p, _)| p == pattern) {
            log::warn!("duplicate websocket route for {pattern}, first registration wins");
            return;
        }
        self.routes.push((pattern.to_string(), handler));
    }

    pub(crate) fn find(&self, path: &str) -> Option<&Arc<dyn WsHandler>> {
        self.routes
            .iter()
            .find(|(pattern, _)| template_matches(pattern, path))
            .map(|(_, handler)| handler)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
