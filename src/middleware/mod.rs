//! Middleware layer.
//!
//! Middleware is an ordered list composed once at startup. Each entry has
//! two hooks:
//!
//! - [`Middleware::before`] runs in registration order before routing. It may
//!   edit the request and either let it continue or answer it outright
//!   ([`Flow::Respond`]); a short-circuit skips the remaining `before` hooks
//!   and the handler.
//! - [`Middleware::after`] runs in reverse registration order on every
//!   response the app produces, including short-circuits, routing misses and
//!   error envelopes. Hooks that must hold for all responses (the JSON
//!   content type) live here.
//!
//! Built-in middleware:
//! - [`cors::Cors`]: origin allow-list, preflight answers, CORS headers
//! - [`ssl::ForceSsl`]: https redirect and HSTS
//! - [`format::FormatNormalizer`]: JSON in, JSON out

pub mod cors;
pub mod format;
pub mod ssl;

use crate::request::{Request, RequestHead};
use crate::response::Response;

/// What a `before` hook decided.
pub enum Flow {
    Continue,
    Respond(Response),
}

/// A request/response hook. Shared across all connections.
pub trait Middleware: Send + Sync + 'static {
    fn before(&self, _req: &mut Request) -> Flow {
        Flow::Continue
    }

    fn after(&self, _req: &RequestHead, _res: &mut Response) {}
}
