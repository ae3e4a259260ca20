//! Server assembly: listen socket, accept loop, worker pool and graceful
//! stop.
//!
//! The accept loop pushes fresh sockets into a lock-free queue. Exactly
//! `max_connections` workers were spawned at startup, each owning one
//! pre-allocated [`HttpConnection`], so the live-connection count can never
//! exceed the cap. When the pending queue overflows, a dedicated responder
//! answers `503` (or silently drops the socket, per configuration). Rate
//! limiting and the optional TLS handshake run in the worker before the
//! HTTP state machine takes over.

use crate::{
    config::ServerConfig,
    errors::{Error, RESP_SERVICE_UNAVAILABLE},
    http::types::Method,
    middleware::{Middleware, MiddlewareChain, Priority},
    router::Router,
    server::{
        connection::{write_with_deadline, ConnState, HttpConnection},
        limiter::{RateLimiter, Verdict},
    },
    tls::{PeerIdentity, TlsContext},
    ws::connection::{WsHandler, WsRegistry},
};
use crossbeam::queue::SegQueue;
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    net::{IpAddr, SocketAddr},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::Notify,
    task::JoinHandle,
    time::{sleep, timeout, Instant},
};
use tokio_rustls::TlsAcceptor;

type TcpQueue = Arc<SegQueue<(TcpStream, SocketAddr)>>;

// Grace given to out-of-band rejection responses (429/503).
const REJECT_WRITE_GRACE: Duration = Duration::from_secs(5);

/// Cooperative shutdown flag shared by the accept loop, the workers and
/// every connection.
pub(crate) struct StopSignal {
    stopping: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub(crate) fn new() -> Self {
        StopSignal {
            stopping: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    fn trigger(&self) {
        self.stopping.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    async fn wait(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_stopping() {
            return;
        }
        notified.await;
    }
}

/// Clonable handle that stops a running server from another task.
#[derive(Clone)]
pub struct StopHandle {
    signal: Arc<StopSignal>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.signal.trigger();
    }
}

/// Append-only access log, one line per response:
/// `remote_ip [timestamp] method path status body_bytes`.
pub(crate) struct AccessLog {
    file: Mutex<std::fs::File>,
}

impl AccessLog {
    pub(crate) fn open(path: &str) -> Result<Self, Error> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(AccessLog {
            file: Mutex::new(file),
        })
    }

    pub(crate) fn write_line(
        &self,
        ip: IpAddr,
        method: Method,
        path: &[u8],
        status: u16,
        body_bytes: usize,
    ) {
        use std::io::Write;

        let timestamp = httpdate::fmt_http_date(std::time::SystemTime::now());
        let line = format!(
            "{ip} [{timestamp}] {} {} {status} {body_bytes}\n",
            method.as_str(),
            String::from_utf8_lossy(path),
        );
        if let Err(error) = self.file.lock().expect("access log lock").write_all(line.as_bytes())
        {
            log::warn!("access log write failed: {error}");
        }
    }
}

/// Immutable-after-start state shared by all connections of one server.
pub(crate) struct Shared {
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) router: Router,
    pub(crate) middlewares: MiddlewareChain,
    pub(crate) ws_routes: WsRegistry,
    pub(crate) limiter: Option<RateLimiter>,
    pub(crate) access_log: Option<AccessLog>,
    pub(crate) live: AtomicUsize,
    pub(crate) stop: Arc<StopSignal>,
}

/// Builder for [`Server`] instances.
pub struct ServerBuilder {
    config: ServerConfig,
    router: Router,
    middlewares: MiddlewareChain,
    ws_routes: WsRegistry,
    tls: Option<TlsContext>,
    rate_limit: Option<(u32, Duration)>,
    whitelist: Vec<IpAddr>,
}

impl ServerBuilder {
    /// Replaces the configuration snapshot (defaults otherwise).
    #[inline(always)]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Installs the route table.
    #[inline(always)]
    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Appends a middleware that applies to every path.
    #[inline(always)]
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(None, Priority::Normal, middleware);
        self
    }

    /// Appends a middleware restricted to paths starting with `prefix`.
    #[inline(always)]
    pub fn middleware_scoped(
        mut self,
        prefix: &str,
        priority: Priority,
        middleware: Arc<dyn Middleware>,
    ) -> Self {
        self.middlewares
            .push(Some(prefix.to_string()), priority, middleware);
        self
    }

    /// Terminates TLS with the given context; implies `enable_tls`.
    #[inline(always)]
    pub fn tls(mut self, context: TlsContext) -> Self {
        self.tls = Some(context);
        self
    }

    /// Enables per-IP rate limiting: at most `max_requests` connections per
    /// window. `window_secs == 0` uses the configured
    /// [`rate_limit_window`](ServerConfig::rate_limit_window).
    #[inline(always)]
    pub fn rate_limit(mut self, max_requests: u32, window_secs: u64) -> Self {
        let window = match window_secs {
            0 => self.config.rate_limit_window,
            secs => Duration::from_secs(secs),
        };
        self.rate_limit = Some((max_requests, window));
        self
    }

    /// Exempts an IP from rate limiting. Unparseable addresses are ignored
    /// with a warning.
    #[inline(always)]
    pub fn rate_limit_whitelist(mut self, ip: &str) -> Self {
        match ip.parse::<IpAddr>() {
            Ok(addr) => self.whitelist.push(addr),
            Err(_) => log::warn!("ignoring unparseable whitelist entry `{ip}`"),
        }
        self
    }

    /// Registers WebSocket callbacks for a path; upgrade requests matching
    /// it are handed to the frame engine after the handshake.
    #[inline(always)]
    pub fn ws_handler(mut self, path: &str, handler: Arc<dyn WsHandler>) -> Self {
        self.ws_routes.add(path, handler);
        self
    }

    /// Validates the configuration and bakes the immutable server state.
    /// TLS material errors are fatal here, before any socket is opened.
    pub fn build(self) -> Result<Server, Error> {
        let mut config = self.config;
        config.validate()?;

        if config.enable_tls && self.tls.is_none() {
            return Err(Error::TlsConfig(
                "enable_tls is set but no TLS context was installed".into(),
            ));
        }
        let acceptor = match &self.tls {
            Some(context) => {
                config.enable_tls = true;
                Some(context.build_acceptor()?)
            }
            None => None,
        };

        let limiter = self.rate_limit.map(|(max_requests, window)| {
            let limiter = RateLimiter::new(max_requests, window);
            for ip in &self.whitelist {
                limiter.add_whitelist(*ip);
            }
            limiter
        });
        if limiter.is_none() && !self.whitelist.is_empty() {
            log::warn!("rate limit whitelist set but rate limiting is not enabled");
        }

        let access_log = match &config.access_log {
            Some(path) => Some(AccessLog::open(path)?),
            None => None,
        };

        if self.router.is_empty() && self.ws_routes.is_empty() {
            log::warn!("no routes registered; every request will be answered with 404");
        }

        Ok(Server {
            shared: Arc::new(Shared {
                config: Arc::new(config),
                router: self.router,
                middlewares: self.middlewares,
                ws_routes: self.ws_routes,
                limiter,
                access_log,
                live: AtomicUsize::new(0),
                stop: Arc::new(StopSignal::new()),
            }),
            tls: acceptor,
            bound: Mutex::new(None),
        })
    }
}

/// An HTTP/1.1 server over one (host, port).
///
/// ```no_run
/// use harbor_web::{route_fn, Router, Server};
///
/// #[tokio::main]
/// async fn main() {
///     let mut router = Router::new();
///     router.add_route("/hello", route_fn(|_req, resp| {
///         resp.set_status(200).set_body("Hello");
///         Ok(())
///     }));
///
///     let server = Server::builder().router(router).build().unwrap();
///     server.listen("127.0.0.1", 8080).await.unwrap();
/// }
/// ```
pub struct Server {
    shared: Arc<Shared>,
    tls: Option<TlsAcceptor>,
    bound: Mutex<Option<SocketAddr>>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            config: ServerConfig::default(),
            router: Router::new(),
            middlewares: MiddlewareChain::default(),
            ws_routes: WsRegistry::default(),
            tls: None,
            rate_limit: None,
            whitelist: Vec::new(),
        }
    }

    /// Handle for stopping the server from another task.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            signal: Arc::clone(&self.shared.stop),
        }
    }

    /// Initiates a graceful stop: the listen socket closes, live
    /// connections finish their current exchange and [`Server::listen`]
    /// returns.
    pub fn stop(&self) {
        self.shared.stop.trigger();
    }

    /// Currently served connections.
    pub fn live_connections(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Bound address once [`Server::listen`] opened its socket (useful with
    /// port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock().expect("bound lock")
    }

    /// Binds the listen socket and serves until [`Server::stop`] (or a
    /// [`StopHandle`]) is invoked.
    pub async fn listen(&self, host: &str, port: u16) -> Result<(), Error> {
        let config = &self.shared.config;
        let listener = bind_listener(host, port, config)?;
        let local = listener.local_addr()?;
        *self.bound.lock().expect("bound lock") = Some(local);
        log::info!(
            "listening on {local} (tls: {}, workers: {})",
            self.tls.is_some(),
            config.max_connections
        );

        let stream_queue: TcpQueue = Arc::new(SegQueue::new());
        let overflow_queue: TcpQueue = Arc::new(SegQueue::new());

        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(config.max_connections + 1);
        for _ in 0..config.max_connections {
            tasks.push(spawn_worker(
                Arc::clone(&self.shared),
                self.tls.clone(),
                Arc::clone(&stream_queue),
            ));
        }
        tasks.push(spawn_overflow_responder(
            Arc::clone(&self.shared),
            Arc::clone(&overflow_queue),
        ));

        loop {
            tokio::select! {
                biased;

                _ = self.shared.stop.wait() => break,

                result = listener.accept() => {
                    let Ok((stream, addr)) = result else { continue };
                    if stream_queue.len() < config.max_pending_connections {
                        stream_queue.push((stream, addr));
                    } else {
                        overflow_queue.push((stream, addr));
                    }
                }
            }
        }

        drop(listener);

        // Let in-flight exchanges finish, bounded by the hard per-connection
        // deadline, then force the stragglers.
        let deadline = Instant::now() + config.connection_timeout;
        while self.shared.live.load(Ordering::Acquire) > 0 && Instant::now() < deadline {
            sleep(Duration::from_millis(20)).await;
        }
        for task in tasks {
            task.abort();
        }

        *self.bound.lock().expect("bound lock") = None;
        log::info!("server on {local} stopped");
        Ok(())
    }
}

fn bind_listener(host: &str, port: u16, config: &ServerConfig) -> Result<TcpListener, Error> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|_| Error::InvalidParam("invalid listen address"))?;

    let socket = Socket::new(
        if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        },
        Type::STREAM,
        Some(Protocol::TCP),
    )?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(config.backlog.min(i32::MAX as u32) as i32)?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener).map_err(Error::from)
}

/// Pops the next accepted socket, or `None` once the server is stopping.
async fn next_stream(queue: &TcpQueue, stop: &StopSignal) -> Option<(TcpStream, SocketAddr)> {
    loop {
        if stop.is_stopping() {
            return None;
        }
        if let Some(value) = queue.pop() {
            return Some(value);
        }
        sleep(Duration::from_micros(500)).await;
    }
}

fn spawn_worker(
    shared: Arc<Shared>,
    tls: Option<TlsAcceptor>,
    queue: TcpQueue,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut conn = HttpConnection::new(Arc::clone(&shared));
        loop {
            let Some((stream, addr)) = next_stream(&queue, &shared.stop).await else {
                break;
            };

            shared.live.fetch_add(1, Ordering::AcqRel);
            conn.set_state(ConnState::Accepted);
            serve_one(&shared, &tls, &mut conn, stream, addr).await;
            shared.live.fetch_sub(1, Ordering::AcqRel);
        }
    })
}

async fn serve_one(
    shared: &Arc<Shared>,
    tls: &Option<TlsAcceptor>,
    conn: &mut HttpConnection,
    stream: TcpStream,
    addr: SocketAddr,
) {
    if let Some(limiter) = &shared.limiter {
        if let Verdict::Denied { retry_after_secs } =
            limiter.check(addr.ip(), Instant::now().into_std())
        {
            log::debug!("rate limited {addr}, retry after {retry_after_secs}s");
            let mut stream = stream;
            let wire = rate_limited_wire(retry_after_secs);
            let deadline = Instant::now() + REJECT_WRITE_GRACE;
            let _ = write_with_deadline(&mut stream, &wire, deadline).await;
            return;
        }
    }

    match tls {
        None => {
            let mut stream = stream;
            if let Err(error) = conn.run(&mut stream, addr, None).await {
                log::debug!("connection from {addr} ended with {error}");
            }
        }
        Some(acceptor) => {
            conn.set_state(ConnState::TlsHandshaking);
            match timeout(shared.config.request_timeout, acceptor.accept(stream)).await {
                Ok(Ok(mut tls_stream)) => {
                    let peer = PeerIdentity::from_connection(tls_stream.get_ref().1);
                    if let Err(error) = conn.run(&mut tls_stream, addr, peer).await {
                        log::debug!("tls connection from {addr} ended with {error}");
                    }
                }
                Ok(Err(error)) => log::debug!("tls handshake from {addr} failed: {error}"),
                Err(_) => log::debug!("tls handshake from {addr} timed out"),
            }
        }
    }
}

/// Answers connections that found the pending queue full: `503` when
/// configured, silent drop otherwise.
fn spawn_overflow_responder(shared: Arc<Shared>, queue: TcpQueue) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let Some((mut stream, addr)) = next_stream(&queue, &shared.stop).await else {
                break;
            };
            log::warn!("over capacity, rejecting {addr}");
            if shared.config.reject_with_503 {
                let deadline = Instant::now() + REJECT_WRITE_GRACE;
                let _ =
                    write_with_deadline(&mut stream, RESP_SERVICE_UNAVAILABLE, deadline).await;
            }
        }
    })
}

fn rate_limited_wire(retry_after_secs: u64) -> Vec<u8> {
    format!(
        "HTTP/1.1 429 Too Many Requests\r\n\
         retry-after: {retry_after_secs}\r\n\
         connection: close\r\n\
         content-length: 0\r\n\
         \r\n"
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::route_fn;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn hello_router() -> Router {
        let mut router = Router::new();
        router.add_route(
            "/hello",
            route_fn(|_req, resp| {
                resp.set_status(200).set_body("Hello");
                Ok(())
            }),
        );
        router
    }

    fn small_config() -> ServerConfig {
        ServerConfig {
            max_connections: 4,
            max_pending_connections: 16,
            ..ServerConfig::default()
        }
    }

    async fn start(server: Server) -> (Arc<Server>, SocketAddr, JoinHandle<Result<(), Error>>) {
        let server = Arc::new(server);
        let runner = Arc::clone(&server);
        let task = tokio::spawn(async move { runner.listen("127.0.0.1", 0).await });

        let addr = loop {
            if let Some(addr) = server.local_addr() {
                break addr;
            }
            sleep(Duration::from_millis(5)).await;
        };
        (server, addr, task)
    }

    /// Reads one response: head plus content-length body.
    async fn read_response(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        while !buf.ends_with(b"\r\n\r\n") {
            assert_eq!(stream.read(&mut byte).await.unwrap(), 1, "eof in head");
            buf.push(byte[0]);
        }
        let head = String::from_utf8(buf.clone()).unwrap();
        let body_len = head
            .lines()
            .find_map(|line| line.to_ascii_lowercase().strip_prefix("content-length: ")
                .map(|v| v.trim().parse::<usize>().unwrap()))
            .unwrap_or(0);
        let mut body = vec![0u8; body_len];
        stream.read_exact(&mut body).await.unwrap();
        buf.extend_from_slice(&body);
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn serves_hello_over_tcp_with_keep_alive() {
        let server = Server::builder()
            .config(small_config())
            .router(hello_router())
            .build()
            .unwrap();
        let (server, addr, task) = start(server).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let first = read_response(&mut stream).await;
        assert!(first.starts_with("HTTP/1.1 200 OK\r\n"), "{first}");
        assert!(first.contains("content-length: 5\r\n"));
        assert!(first.contains("connection: keep-alive\r\n"));
        assert!(first.ends_with("Hello"));

        // Same connection serves a second exchange.
        stream
            .write_all(b"GET /missing HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let second = read_response(&mut stream).await;
        assert!(second.starts_with("HTTP/1.1 404 Not Found\r\n"), "{second}");

        drop(stream);
        server.stop();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn rate_limit_denies_third_connection_and_whitelist_bypasses() {
        let server = Server::builder()
            .config(small_config())
            .router(hello_router())
            .rate_limit(2, 60)
            .build()
            .unwrap();
        let (server, addr, task) = start(server).await;

        let mut statuses = Vec::new();
        for _ in 0..3 {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n")
                .await
                .unwrap();
            let reply = read_response(&mut stream).await;
            statuses.push(reply.split_whitespace().nth(1).unwrap().to_string());
            if statuses.last().unwrap() == "429" {
                assert!(reply.to_ascii_lowercase().contains("retry-after: "));
            }
        }
        assert_eq!(statuses, ["200", "200", "429"]);

        server.stop();
        task.await.unwrap().unwrap();

        // Whitelisted, the same three connections all succeed.
        let server = Server::builder()
            .config(small_config())
            .router(hello_router())
            .rate_limit(2, 60)
            .rate_limit_whitelist("127.0.0.1")
            .build()
            .unwrap();
        let (server, addr, task) = start(server).await;

        for _ in 0..3 {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n")
                .await
                .unwrap();
            let reply = read_response(&mut stream).await;
            assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"), "{reply}");
        }

        server.stop();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stop_handle_unblocks_listen() {
        let server = Server::builder()
            .config(small_config())
            .router(hello_router())
            .build()
            .unwrap();
        let handle = server.stop_handle();
        let (_server, _addr, task) = start(server).await;

        handle.stop();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn enable_tls_without_context_fails_to_build() {
        let config = ServerConfig {
            enable_tls: true,
            ..ServerConfig::default()
        };
        assert!(matches!(
            Server::builder().config(config).build(),
            Err(Error::TlsConfig(_))
        ));
    }

    #[test]
    fn access_log_records_exchanges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access-test.log");
        let path = path.to_str().unwrap();

        let access_log = AccessLog::open(path).unwrap();
        access_log.write_line(
            "127.0.0.1".parse().unwrap(),
            Method::Get,
            b"/hello",
            200,
            5,
        );
        access_log.write_line(
            "203.0.113.9".parse().unwrap(),
            Method::Post,
            b"/upload",
            413,
            0,
        );

        let logged = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = logged.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("127.0.0.1 ["));
        assert!(lines[0].ends_with("] GET /hello 200 5"));
        assert!(lines[1].starts_with("203.0.113.9 ["));
        assert!(lines[1].ends_with("] POST /upload 413 0"));
    }
}
