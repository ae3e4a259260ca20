//! Per-connection HTTP state machine.
//!
//! One worker task drives one [`HttpConnection`] at a time through the
//! lifecycle: read a request (bounded by `request_timeout`, or
//! `keepalive_timeout` while idle between exchanges), run the middleware
//! chain and the matched handler, flush the response, then either loop for
//! the next keep-alive exchange or close. A WebSocket upgrade hands the
//! stream to the frame engine and ends the HTTP lifecycle.

use crate::{
    errors::Error,
    http::{
        request::{Parser, Request},
        response::{self, Response},
    },
    middleware::Flow,
    server::acceptor::Shared,
    tls::PeerIdentity,
    ws::{
        connection::{WsEngine, WsHandler},
        handshake::{self, UpgradeReject},
    },
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time::{timeout_at, Instant},
};

/// Lifecycle phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnState {
    Accepted,
    TlsHandshaking,
    ReadingRequest,
    Handling,
    WritingResponse,
    UpgradedWs,
    Closing,
}

enum ReadOutcome {
    Complete,
    PeerClosed,
    IdleTimeout,
}

enum ExchangeOutcome {
    KeepAlive,
    Close,
    Upgraded,
}

/// Connection-scoped state, pre-allocated once per worker and reused across
/// client connections.
pub(crate) struct HttpConnection {
    shared: Arc<Shared>,
    parser: Parser,
    request: Request,
    response: Response,
    read_chunk: Vec<u8>,
    state: ConnState,
    requests_served: usize,
    bytes_in: u64,
    bytes_out: u64,
}

impl HttpConnection {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        let config = Arc::clone(&shared.config);
        HttpConnection {
            shared,
            parser: Parser::new(Arc::clone(&config)),
            request: Request::new(&config),
            response: Response::new(),
            read_chunk: vec![0u8; config.read_buffer_size],
            state: ConnState::Accepted,
            requests_served: 0,
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    pub(crate) fn set_state(&mut self, state: ConnState) {
        self.state = state;
    }

    pub(crate) fn state(&self) -> ConnState {
        self.state
    }

    pub(crate) fn requests_served(&self) -> usize {
        self.requests_served
    }

    pub(crate) fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    pub(crate) fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    /// Serves one client connection until it closes.
    ///
    /// Protocol and limit violations are answered with their mapped status
    /// before closing; network errors propagate to the worker.
    pub(crate) async fn run<S>(
        &mut self,
        stream: &mut S,
        remote: SocketAddr,
        peer: Option<PeerIdentity>,
    ) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.state = ConnState::ReadingRequest;
        self.requests_served = 0;
        self.bytes_in = 0;
        self.bytes_out = 0;

        let conn_deadline = Instant::now() + self.shared.config.connection_timeout;
        let result = self.serve(stream, remote, &peer, conn_deadline).await;

        let outcome = match result {
            Ok(()) => Ok(()),
            Err(error) => {
                log::debug!("connection from {remote}: {error}");
                if let Some(status) = error.http_status() {
                    if !self.response.is_sent() {
                        let wire = response::error_wire(status, self.request.version());
                        let grace = Instant::now() + Duration::from_secs(5);
                        if write_with_deadline(stream, &wire, grace).await.is_ok() {
                            self.bytes_out += wire.len() as u64;
                        }
                        self.log_access(remote, status, 0);
                    }
                }
                match error {
                    Error::Network(e) => Err(Error::Network(e)),
                    _ => Ok(()),
                }
            }
        };

        self.state = ConnState::Closing;
        log::debug!(
            "closing {remote} ({:?}): {} exchanges, {} B in, {} B out",
            self.state(),
            self.requests_served(),
            self.bytes_in(),
            self.bytes_out(),
        );
        self.parser.reset();
        self.request.reset();
        self.response.reset();
        outcome
    }

    async fn serve<S>(
        &mut self,
        stream: &mut S,
        remote: SocketAddr,
        peer: &Option<PeerIdentity>,
        conn_deadline: Instant,
    ) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            if self.shared.stop.is_stopping() {
                return Ok(());
            }
            if self.requests_served >= self.shared.config.max_requests_per_connection {
                return Ok(());
            }

            self.parser.reset();
            self.request.reset();
            self.response.reset();
            self.request.set_remote_addr(remote);
            self.request.set_peer_identity(peer.clone());

            self.state = ConnState::ReadingRequest;
            match self.read_message(stream, conn_deadline).await? {
                ReadOutcome::Complete => {}
                ReadOutcome::PeerClosed | ReadOutcome::IdleTimeout => return Ok(()),
            }

            self.state = ConnState::Handling;
            match self.handle_exchange(stream, remote, conn_deadline).await? {
                ExchangeOutcome::KeepAlive => continue,
                ExchangeOutcome::Close | ExchangeOutcome::Upgraded => return Ok(()),
            }
        }
    }

    /// Reads until the parser assembled one full message.
    ///
    /// The first request is bounded by `request_timeout` from accept; a
    /// keep-alive connection may sit idle up to `keepalive_timeout` before
    /// the next request's first byte, which then starts a fresh
    /// `request_timeout` budget. `connection_timeout` caps everything.
    async fn read_message<S>(
        &mut self,
        stream: &mut S,
        conn_deadline: Instant,
    ) -> Result<ReadOutcome, Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let config = &self.shared.config;
        let first_request = self.requests_served == 0;
        let idle_deadline = (Instant::now() + config.keepalive_timeout).min(conn_deadline);
        let mut completion_deadline = match first_request {
            true => Some((Instant::now() + config.request_timeout).min(conn_deadline)),
            false => None,
        };

        loop {
            let deadline = completion_deadline.unwrap_or(idle_deadline);
            let n = match timeout_at(deadline, stream.read(&mut self.read_chunk)).await {
                Err(_) if completion_deadline.is_none() => return Ok(ReadOutcome::IdleTimeout),
                Err(_) => return Err(Error::Timeout("reading request")),
                Ok(result) => result?,
            };

            if n == 0 {
                if self.parser.started() {
                    log::debug!("peer closed mid-request");
                }
                return Ok(ReadOutcome::PeerClosed);
            }

            self.bytes_in += n as u64;
            if completion_deadline.is_none() {
                completion_deadline =
                    Some((Instant::now() + config.request_timeout).min(conn_deadline));
            }

            if self.parser.push(&self.read_chunk[..n], &mut self.request)? {
                return Ok(ReadOutcome::Complete);
            }
        }
    }

    async fn handle_exchange<S>(
        &mut self,
        stream: &mut S,
        remote: SocketAddr,
        conn_deadline: Instant,
    ) -> Result<ExchangeOutcome, Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let config = &self.shared.config;
        self.response.version = self.request.version();
        self.response.keep_alive = self.request.keep_alive()
            && self.requests_served + 1 < config.max_requests_per_connection
            && !self.shared.stop.is_stopping();

        if self.request.upgrade_requested() {
            let path = std::str::from_utf8(self.request.path()).unwrap_or("");
            if let Some(handler) = self.shared.ws_routes.find(path) {
                let handler = Arc::clone(handler);
                return self.upgrade(stream, remote, conn_deadline, handler).await;
            }
        }

        if self.shared.middlewares.run(&self.request, &mut self.response)? == Flow::Continue {
            let path = std::str::from_utf8(self.request.path()).unwrap_or("");
            match self.shared.router.find(self.request.method(), path) {
                Some(handler) => {
                    let handler = Arc::clone(handler);
                    handler.handle(&self.request, &mut self.response).await?;
                }
                None => {
                    self.response.set_status(404);
                }
            }
        }

        self.state = ConnState::WritingResponse;
        let exchange = self.response.exchange();
        if !exchange.is_sent() {
            if self.response.handle_taken() {
                timeout_at(conn_deadline, exchange.wait_sent())
                    .await
                    .map_err(|_| Error::Timeout("waiting for deferred response"))?;
                if !exchange.is_sent() {
                    return Err(Error::Timeout("waiting for deferred response"));
                }
            } else {
                self.response.send()?;
            }
        }

        let wire = exchange.take_wire();
        let meta = exchange.sent_meta();
        write_with_deadline(stream, &wire, conn_deadline).await?;
        self.bytes_out += wire.len() as u64;
        self.requests_served += 1;
        self.log_access(remote, meta.status, meta.body_len);

        match meta.keep_alive {
            true => Ok(ExchangeOutcome::KeepAlive),
            false => Ok(ExchangeOutcome::Close),
        }
    }

    /// Completes the WebSocket handshake and hands the stream to the frame
    /// engine; the HTTP lifecycle ends here either way.
    async fn upgrade<S>(
        &mut self,
        stream: &mut S,
        remote: SocketAddr,
        conn_deadline: Instant,
        handler: Arc<dyn WsHandler>,
    ) -> Result<ExchangeOutcome, Error>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match handshake::upgrade_response(&self.request) {
            Ok(wire) => {
                write_with_deadline(stream, &wire, conn_deadline).await?;
                self.bytes_out += wire.len() as u64;
                self.requests_served += 1;
                self.log_access(remote, 101, 0);

                self.state = ConnState::UpgradedWs;
                let engine = WsEngine::new(Arc::clone(&self.shared.config), handler);
                engine.run(&mut *stream).await?;
                Ok(ExchangeOutcome::Upgraded)
            }
            Err(UpgradeReject::WrongVersion) => {
                write_with_deadline(stream, handshake::RESP_UPGRADE_REQUIRED, conn_deadline)
                    .await?;
                self.bytes_out += handshake::RESP_UPGRADE_REQUIRED.len() as u64;
                self.log_access(remote, 426, 0);
                Ok(ExchangeOutcome::Close)
            }
            Err(UpgradeReject::BadKey) => {
                let wire = response::error_wire(400, self.request.version());
                write_with_deadline(stream, &wire, conn_deadline).await?;
                self.bytes_out += wire.len() as u64;
                self.log_access(remote, 400, 0);
                Ok(ExchangeOutcome::Close)
            }
        }
    }

    fn log_access(&self, remote: SocketAddr, status: u16, body_bytes: usize) {
        if let Some(access_log) = &self.shared.access_log {
            access_log.write_line(
                remote.ip(),
                self.request.method(),
                self.request.path(),
                status,
                body_bytes,
            );
        }
    }
}

pub(crate) async fn write_with_deadline<S>(
    stream: &mut S,
    bytes: &[u8],
    deadline: Instant,
) -> Result<(), Error>
where
    S: AsyncWrite + Unpin,
{
    let write = async {
        stream.write_all(bytes).await?;
        stream.flush().await
    };
    match timeout_at(deadline, write).await {
        Ok(result) => result.map_err(Error::from),
        Err(_) => Err(Error::Timeout("writing response")),
    }
}
