//! Pre-handler middleware chain.
//!
//! Middlewares run in registration order before the router, each optionally
//! scoped to a path prefix. A middleware that returns [`Flow::Stop`] halts
//! the chain and skips the router entirely; it is then responsible for
//! having produced the response. Per-middleware state lives inside the
//! middleware value itself and is released through `Drop` when the server
//! is torn down.

use crate::{
    errors::Error,
    http::{request::Request, response::Response},
};
use std::sync::Arc;

/// Verdict of one middleware invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Proceed to the next middleware, then the router.
    Continue,
    /// Halt the chain; the router is not invoked.
    Stop,
}

/// Advisory ordering metadata. The chain executes strictly in registration
/// order; the priority is carried for the registrant's own bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Normal,
    Low,
}

/// A pre-handler filter.
///
/// Runs synchronously on the connection task; anything long-running belongs
/// in a handler instead.
pub trait Middleware: Send + Sync + 'static {
    fn apply(&self, request: &Request, response: &mut Response) -> Result<Flow, Error>;
}

struct FnMiddleware<F>(F);

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&Request, &mut Response) -> Result<Flow, Error> + Send + Sync + 'static,
{
    fn apply(&self, request: &Request, response: &mut Response) -> Result<Flow, Error> {
        (self.0)(request, response)
    }
}

/// Wraps a plain closure as a [`Middleware`].
pub fn middleware_fn<F>(f: F) -> Arc<dyn Middleware>
where
    F: Fn(&Request, &mut Response) -> Result<Flow, Error> + Send + Sync + 'static,
{
    Arc::new(FnMiddleware(f))
}

pub(crate) struct MiddlewareEntry {
    prefix: Option<String>,
    #[allow(dead_code)]
    priority: Priority,
    inner: Arc<dyn Middleware>,
}

/// Registration-ordered middleware list, immutable after server start.
#[derive(Default)]
pub(crate) struct MiddlewareChain {
    entries: Vec<MiddlewareEntry>,
}

impl MiddlewareChain {
    pub(crate) fn push(
        &mut self,
        prefix: Option<String>,
        priority: Priority,
        middleware: Arc<dyn Middleware>,
    ) {
        self.entries.push(MiddlewareEntry {
            prefix,
            priority,
            inner: middleware,
        });
    }

    /// Runs every applicable middleware in order. Returns [`Flow::Stop`] as
    /// soon as one short-circuits.
    pub(crate) fn run(&self, request: &Request, response: &mut Response) -> Result<Flow, Error> {
        for entry in &self.entries {
            if let Some(prefix) = &entry.prefix {
                if !request.path().starts_with(prefix.as_bytes()) {
                    continue;
                }
            }
            if entry.inner.apply(request, response)? == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request_for(path: &str) -> Request {
        let config = std::sync::Arc::new(ServerConfig::default());
        let mut parser = crate::http::request::Parser::new(std::sync::Arc::clone(&config));
        let mut request = Request::new(&config);
        let wire = format!("GET {path} HTTP/1.1\r\n\r\n");
        assert!(parser.push(wire.as_bytes(), &mut request).unwrap());
        request
    }

    #[test]
    fn runs_in_registration_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::default();

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            chain.push(
                None,
                Priority::Normal,
                middleware_fn(move |_req, _resp| {
                    order.lock().unwrap().push(tag);
                    Ok(Flow::Continue)
                }),
            );
        }

        let request = request_for("/x");
        let mut response = Response::new();
        assert_eq!(chain.run(&request, &mut response).unwrap(), Flow::Continue);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn stop_short_circuits() {
        let reached = Arc::new(AtomicUsize::new(0));
        let mut chain = MiddlewareChain::default();

        chain.push(
            None,
            Priority::High,
            middleware_fn(|_req, resp| {
                resp.set_status(401).set_body("denied");
                Ok(Flow::Stop)
            }),
        );
        let reached_clone = Arc::clone(&reached);
        chain.push(
            None,
            Priority::Normal,
            middleware_fn(move |_req, _resp| {
                reached_clone.fetch_add(1, Ordering::SeqCst);
                Ok(Flow::Continue)
            }),
        );

        let request = request_for("/secret");
        let mut response = Response::new();
        assert_eq!(chain.run(&request, &mut response).unwrap(), Flow::Stop);
        assert_eq!(response.status(), 401);
        assert_eq!(reached.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn prefix_scoping() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut chain = MiddlewareChain::default();

        let hits_clone = Arc::clone(&hits);
        chain.push(
            Some("/api".to_string()),
            Priority::Normal,
            middleware_fn(move |_req, _resp| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
                Ok(Flow::Continue)
            }),
        );

        let mut response = Response::new();
        chain.run(&request_for("/api/users"), &mut response).unwrap();
        chain.run(&request_for("/api"), &mut response).unwrap();
        chain.run(&request_for("/public"), &mut response).unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn middleware_error_propagates() {
        let mut chain = MiddlewareChain::default();
        chain.push(
            None,
            Priority::Normal,
            middleware_fn(|_req, _resp| Err(Error::Internal("boom".into()))),
        );

        let request = request_for("/x");
        let mut response = Response::new();
        assert!(chain.run(&request, &mut response).is_err());
    }
}
