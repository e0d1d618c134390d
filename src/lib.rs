//! # tern
//!
//! The inbound edge of a JSON API: every request passes a CORS gate, every
//! response is JSON, and every completed request leaves exactly one
//! structured access-log line behind.
//!
//! ## The pipeline
//!
//! - **Configuration**: one immutable [`Config`] resolved from the
//!   environment at startup; a bad value stops the process before it binds.
//! - **CORS gate**: exact-match origin allow-list, credentials allowed,
//!   preflights answered without touching the router.
//! - **Format normalizer**: `Content-Type: application/json`, always.
//! - **Access log**: `{"user_id","request_id","ip",…}` per request,
//!   written after the response is sent.
//!
//! Underneath: radix-tree routing via [`matchit`], hyper HTTP/1.1 + HTTP/2,
//! graceful shutdown on SIGTERM / Ctrl-C.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use http::Method;
//! use tern::{App, Backends, Config, Json, Request, Router, Server, health};
//!
//! #[tokio::main]
//! async fn main() -> tern::Result<()> {
//!     let config = Arc::new(Config::from_env()?);
//!     let backends = Backends::from_config(&config)?;
//!
//!     let router = Router::new()
//!         .on(Method::GET, "/healthz", health::liveness)
//!         .on(Method::GET, "/readyz", health::readiness(backends))
//!         .on(Method::GET, "/api/v1/ping", ping);
//!
//!     Server::bind(config.bind_addr).serve(App::new(config, router)).await
//! }
//!
//! async fn ping(req: Request) -> Json<serde_json::Value> {
//!     Json(serde_json::json!({ "request_id": req.context().request_id() }))
//! }
//! ```

mod app;
mod error;
mod handler;
mod request;
mod response;
mod router;
mod server;

pub mod access_log;
pub mod config;
pub mod context;
pub mod health;
pub mod middleware;
pub mod static_files;
pub mod store;
pub mod telemetry;

pub use access_log::AccessLogger;
pub use app::App;
pub use config::{Config, Profile};
pub use context::RequestContext;
pub use error::{Error, Result};
pub use handler::Handler;
pub use request::{Request, RequestHead};
pub use response::{IntoResponse, Json, Response, ResponseBuilder};
pub use router::Router;
pub use server::Server;
pub use store::{Backends, KeyValueStore};
