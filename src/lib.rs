//! harbor_web - Embedded HTTP/1.1 server library with TLS and WebSocket
//! support
//!
//! An application links against this crate, registers handlers against URL
//! paths, and the library accepts TCP connections, parses HTTP/1.1
//! requests, dispatches them through a middleware chain and a router, and
//! writes the responses — with optional TLS termination and optional
//! RFC 6455 WebSocket upgrade on selected paths.
//!
//! # Features
//!
//! - **HTTP/1.1 and HTTP/1.0** with keep-alive, `Content-Length` and
//!   chunked request bodies.
//! - **Insertion-ordered router** with `/*` wildcard templates and
//!   per-method masks.
//! - **Middleware chain** that can short-circuit the router.
//! - **TLS termination** (TLS 1.2/1.3, modern AEAD suites, optional client
//!   certificates, session resumption) via `rustls`.
//! - **WebSocket upgrade** with fragment reassembly, automatic PONGs,
//!   close handshake and PING keepalive.
//! - **Built-in protection**: every buffer is bounded, per-IP fixed-window
//!   rate limiting with a whitelist, configurable timeouts on every state.
//! - **Configuration layering**: in-code struct, `key=value` file and a
//!   `HARBOR_*` environment overlay.
//!
//! # Quick Start
//!
//! ```no_run
//! use harbor_web::{route_fn, Router, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut router = Router::new();
//!     router.add_route("/hello", route_fn(|_req, resp| {
//!         resp.set_status(200).set_body("Hello World!");
//!         Ok(())
//!     }));
//!
//!     Server::builder()
//!         .router(router)
//!         .build()
//!         .expect("server configuration")
//!         .listen("127.0.0.1", 8080)
//!         .await
//!         .expect("listen");
//! }
//! ```
//!
//! For WebSocket endpoints, TLS and configuration files, see the
//! `demos/` directory.

pub(crate) mod http {
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod acceptor;
    pub(crate) mod connection;
    pub(crate) mod limiter;
}
pub(crate) mod ws {
    pub(crate) mod connection;
    pub(crate) mod frame;
    pub(crate) mod handshake;
}
pub(crate) mod buffer;
pub mod config;
pub(crate) mod errors;
pub(crate) mod middleware;
pub(crate) mod router;
pub(crate) mod tls;

pub use crate::{
    config::ServerConfig,
    errors::{Error, HttpViolation, LimitKind},
    http::{
        request::Request,
        response::{Response, ResponseHandle},
        types::{reason_phrase, Method, MethodMask, Version},
    },
    middleware::{middleware_fn, Flow, Middleware, Priority},
    router::{route_fn, Handler, HandlerFuture, MatchInfo, Route, Router},
    server::acceptor::{Server, ServerBuilder, StopHandle},
    tls::{hostname_matches, PeerIdentity, TlsContext},
    ws::connection::{MessageKind, WsHandler, WsSession, WsState},
    ws::frame::{accept_key, apply_mask, generate_mask, verify_accept, OpCode},
};
