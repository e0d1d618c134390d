//! The request pipeline.
//!
//! ```text
//! server ─▶ RequestContext ─▶ before hooks ─▶ router ─▶ handler
//!                                  │ short-circuit             │
//!                                  ▼                           ▼
//!                        error envelope ◀──────────────────────┘
//!                                  │
//!                        after hooks (reverse) ─▶ x-request-id ─▶ hyper
//!                                                                  │
//!                                              body dropped ─▶ access log
//! ```

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use http::header::{ALLOW, HeaderValue};
use http::{Method, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Body;
use tracing::warn;

use crate::access_log::{AccessLogger, ResponseBody};
use crate::config::Config;
use crate::context::{REQUEST_ID_HEADER, RequestContext};
use crate::health::{LIVENESS_PATH, READINESS_PATH};
use crate::middleware::cors::Cors;
use crate::middleware::format::FormatNormalizer;
use crate::middleware::ssl::ForceSsl;
use crate::middleware::{Flow, Middleware};
use crate::request::{Request, RequestHead};
use crate::response::Response;
use crate::router::{Route, Router};
use crate::static_files::StaticFiles;

/// A configured application: router plus middleware chain plus access log.
pub struct App {
    config: Arc<Config>,
    router: Router,
    middleware: Vec<Arc<dyn Middleware>>,
    access_log: Arc<AccessLogger>,
}

impl App {
    /// Assembles the standard chain for `config`:
    /// CORS gate, SSL enforcement (when the profile wants it), format
    /// normalizer. Installs the static file fallback when enabled and the
    /// router has none of its own. Access lines go to stdout.
    pub fn new(config: Arc<Config>, mut router: Router) -> Self {
        let mut middleware: Vec<Arc<dyn Middleware>> = vec![Arc::new(Cors::new(config.cors.clone()))];
        if config.force_ssl {
            middleware.push(Arc::new(ForceSsl::new().exempt(LIVENESS_PATH).exempt(READINESS_PATH)));
        }
        middleware.push(Arc::new(FormatNormalizer));

        if config.serve_static_files && !router.has_fallback() {
            let files = StaticFiles::new(config.public_dir.clone());
            router = router.fallback(move |req: Request| files.clone().serve(req));
        }

        Self { config, router, middleware, access_log: Arc::new(AccessLogger::stdout()) }
    }

    /// Appends a middleware after the built-in ones (an authentication
    /// layer that sets the user id, for example).
    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Sends access lines somewhere other than stdout.
    pub fn access_log(mut self, logger: AccessLogger) -> Self {
        self.access_log = Arc::new(logger);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn access_logger(&self) -> &Arc<AccessLogger> {
        &self.access_log
    }

    /// Runs one request through the pipeline.
    ///
    /// Never fails: every problem becomes a JSON response. The access line
    /// is written when the returned body is dropped.
    pub async fn handle<B>(&self, req: http::Request<B>, peer: SocketAddr) -> http::Response<ResponseBody>
    where
        B: Body,
        B::Error: Display,
    {
        let started = Instant::now();
        let (parts, body) = req.into_parts();
        let context = RequestContext::from_request(&parts.headers, peer);
        let head = RequestHead::new(parts.method, parts.uri, parts.headers, context);

        let (head, response) = match body.collect().await {
            Ok(collected) => self.run(Request::new(head, collected.to_bytes())).await,
            Err(e) => {
                warn!(request_id = %head.context().request_id(), "reading request body: {e}");
                (head, Response::failure(StatusCode::BAD_REQUEST, "bad_request"))
            }
        };

        self.finish(head, response, started)
    }

    async fn run(&self, mut req: Request) -> (RequestHead, Response) {
        for middleware in &self.middleware {
            if let Flow::Respond(res) = middleware.before(&mut req) {
                return (req.head, res);
            }
        }

        let head = req.head.clone();
        let response = match self.router.lookup(req.method(), req.path()) {
            Route::Found(handler, params) => {
                req.params = params;
                handler.dispatch(req).await
            }
            Route::MethodNotAllowed(methods) => {
                let allow = methods.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
                let mut res = Response::failure(StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed");
                if let Ok(allow) = HeaderValue::try_from(allow) {
                    res.headers_mut().insert(ALLOW, allow);
                }
                res
            }
            Route::NotFound => Response::failure(StatusCode::NOT_FOUND, "not_found"),
        };
        (head, response)
    }

    fn finish(&self, head: RequestHead, mut res: Response, started: Instant) -> http::Response<ResponseBody> {
        res.render_failure(head.context(), self.config.detailed_errors);
        for middleware in self.middleware.iter().rev() {
            middleware.after(&head, &mut res);
        }
        if let Ok(id) = HeaderValue::from_str(head.context().request_id().as_str()) {
            res.headers.insert(REQUEST_ID_HEADER, id);
        }
        if head.method() == Method::HEAD {
            res.body = bytes::Bytes::new();
        }

        let RequestHead { method, uri, context, .. } = head;
        let body = ResponseBody::new(
            res.body,
            Arc::clone(&self.access_log),
            context,
            method,
            uri.path().to_owned(),
            res.status,
            started,
        );
        let mut out = http::Response::new(body);
        *out.status_mut() = res.status;
        *out.headers_mut() = res.headers;
        out
    }
}
