//! Request routing: (method, path) to handler resolution.
//!
//! Matching is insertion-order first-match: the earliest registered route
//! whose template matches the path and whose method mask admits the method
//! wins. A template either matches the path exactly or, when it ends in
//! `/*`, matches every path that starts with the template minus the `/*`.
//! Trailing slashes are significant and matching is case-sensitive.

use crate::{
    errors::Error,
    http::{request::Request, response::Response, types::Method, types::MethodMask},
};
use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

/// Future returned by a [`Handler`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<(), Error>> + Send + 'a>>;

/// A request handler.
///
/// Runs on the connection's task. It either finishes the exchange by
/// calling [`Response::send`] (or simply staging status/headers/body, which
/// the connection then sends), or detaches a
/// [`ResponseHandle`](crate::ResponseHandle) to finish later. Returning an
/// error maps to a `500` response.
pub trait Handler: Send + Sync + 'static {
    fn handle<'a>(&'a self, request: &'a Request, response: &'a mut Response)
        -> HandlerFuture<'a>;
}

struct FnHandler<F>(F);

impl<F> Handler for FnHandler<F>
where
    F: Fn(&Request, &mut Response) -> Result<(), Error> + Send + Sync + 'static,
{
    fn handle<'a>(
        &'a self,
        request: &'a Request,
        response: &'a mut Response,
    ) -> HandlerFuture<'a> {
        let result = (self.0)(request, response);
        Box::pin(std::future::ready(result))
    }
}

/// Wraps a plain closure as a [`Handler`].
///
/// ```
/// use harbor_web::{route_fn, Router};
///
/// let mut router = Router::new();
/// router.add_route("/hello", route_fn(|_req, resp| {
///     resp.set_status(200).set_body("Hello");
///     Ok(())
/// }));
/// ```
pub fn route_fn<F>(f: F) -> Arc<dyn Handler>
where
    F: Fn(&Request, &mut Response) -> Result<(), Error> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// One registered route. Immutable after insertion.
pub struct Route {
    pattern: String,
    methods: MethodMask,
    handler: Arc<dyn Handler>,
}

impl Route {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn methods(&self) -> MethodMask {
        self.methods
    }

    pub(crate) fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    fn matches_path(&self, path: &str) -> bool {
        template_matches(&self.pattern, path)
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("pattern", &self.pattern)
            .field("methods", &self.methods)
            .finish()
    }
}

#[inline]
pub(crate) fn template_matches(template: &str, path: &str) -> bool {
    if let Some(prefix) = template.strip_suffix("/*") {
        path == template || path.starts_with(prefix)
    } else {
        path == template
    }
}

/// Successful route match. Carries the matched route; parameter extraction
/// may hang more data off this later.
#[derive(Debug)]
pub struct MatchInfo<'a> {
    route: &'a Route,
    index: usize,
}

impl<'a> MatchInfo<'a> {
    pub fn route(&self) -> &'a Route {
        self.route
    }

    /// Insertion index of the matched route.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Insertion-ordered route table with an exact-path fast path.
///
/// The hash index only short-circuits the linear scan when it provably
/// returns the same route the scan would: it stores the first route per
/// exact pattern and is bypassed whenever an earlier wildcard also covers
/// the path.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    exact: HashMap<String, usize>,
    wildcards: Vec<usize>,
}

impl Router {
    pub fn new() -> Self {
        Router {
            routes: Vec::new(),
            exact: HashMap::new(),
            wildcards: Vec::new(),
        }
    }

    /// Registers a handler for every method, equivalent to
    /// `add_route_method(path, MethodMask::ANY, handler)`.
    pub fn add_route(&mut self, path: &str, handler: Arc<dyn Handler>) {
        self.add_route_method(path, MethodMask::ANY, handler);
    }

    /// Registers a handler for the methods admitted by `methods`.
    ///
    /// Re-registering the same (pattern, mask) pair is ignored: the first
    /// registration wins and the duplicate is reported with a warning.
    pub fn add_route_method(
        &mut self,
        path: &str,
        methods: MethodMask,
        handler: Arc<dyn Handler>,
    ) {
        if self
            .routes
            .iter()
            .any(|r| r.pattern == path && r.methods == methods)
        {
            log::warn!("duplicate route registration for {path}, first registration wins");
            return;
        }

        let index = self.routes.len();
        self.routes.push(Route {
            pattern: path.to_string(),
            methods,
            handler,
        });

        if path.ends_with("/*") {
            self.wildcards.push(index);
        } else {
            self.exact.entry(path.to_string()).or_insert(index);
        }
    }

    /// Resolves a handler for `(method, path)`.
    pub fn find(&self, method: Method, path: &str) -> Option<&Arc<dyn Handler>> {
        self.match_route(method, path).map(|m| m.route.handler())
    }

    /// As [`Router::find`], but returns the match metadata.
    pub fn match_route(&self, method: Method, path: &str) -> Option<MatchInfo<'_>> {
        if let Some(&index) = self.exact.get(path) {
            let route = &self.routes[index];
            let shadowed = self.wildcards.iter().any(|&w| {
                w < index
                    && self.routes[w].matches_path(path)
                    && self.routes[w].methods.contains(method)
            });
            if route.methods.contains(method) && !shadowed {
                return Some(MatchInfo { route, index });
            }
        }

        self.routes
            .iter()
            .enumerate()
            .find(|(_, route)| route.methods.contains(method) && route.matches_path(path))
            .map(|(index, route)| MatchInfo { route, index })
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes)
            .finish()
    }
}
