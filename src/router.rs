//! Radix-tree request router.
//!
//! One tree per HTTP method. O(path-length) lookup. A path known under
//! other methods answers `405`; anything else falls through to an optional
//! fallback handler, then `404`.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use matchit::Router as MatchitRouter;

use crate::handler::{Handler, SharedHandler};

/// The application router.
///
/// Build it once at startup and hand it to [`App::new`](crate::App::new).
/// Each registration returns `self` so calls chain naturally.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<SharedHandler>>,
    fallback: Option<SharedHandler>,
}

/// Outcome of a route lookup.
pub(crate) enum Route {
    Found(SharedHandler, HashMap<String, String>),
    /// The path exists, but only under these methods.
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new(), fallback: None }
    }

    /// Register a handler for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax; `req.param("name")` retrieves them:
    ///
    /// ```rust,no_run
    /// # use tern::{Request, Response, Router};
    /// # use http::Method;
    /// # async fn get_account(_: Request) -> Response { Response::json("{}") }
    /// Router::new().on(Method::GET, "/api/v1/accounts/{id}", get_account);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or conflicts with one already
    /// registered for `method`. Routes are fixed at startup, so this is a
    /// programming error rather than a runtime condition.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_shared())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    /// Handler for requests no route matches.
    pub fn fallback(mut self, handler: impl Handler) -> Self {
        self.fallback = Some(handler.into_shared());
        self
    }

    pub(crate) fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub(crate) fn lookup(&self, method: &Method, path: &str) -> Route {
        // HEAD falls back to the GET route; the server drops the body.
        let tree = self.routes.get(method).or_else(|| {
            (*method == Method::HEAD).then(|| self.routes.get(&Method::GET)).flatten()
        });
        if let Some(matched) = tree.and_then(|tree| tree.at(path).ok()) {
            let params = matched.params.iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            return Route::Found(Arc::clone(matched.value), params);
        }

        let mut allowed: Vec<Method> = self.routes.iter()
            .filter(|(_, tree)| tree.at(path).is_ok())
            .map(|(m, _)| m.clone())
            .collect();
        if !allowed.is_empty() {
            allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
            return Route::MethodNotAllowed(allowed);
        }

        match &self.fallback {
            Some(fallback) => Route::Found(Arc::clone(fallback), HashMap::new()),
            None => Route::NotFound,
        }
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}
