//! Route handlers.
//!
//! Any `Fn(Request) -> impl Future<Output = impl IntoResponse>` is a
//! [`Handler`]. The router keeps them as [`SharedHandler`] trait objects so
//! handlers of unrelated types can live in the same tree:
//!
//! ```text
//! async fn readyz(req: Request) -> Result<Json<Status>, Error>
//!        ↓ Router::on(Method::GET, "/readyz", readyz)
//! Arc<HandlerFn<readyz>>          stored once, cloned per request
//!        ↓ dispatch(req)
//! ResponseFuture                  panics already turned into a 500
//! ```

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;
use tracing::error;

use crate::context::RequestId;
use crate::error::Error;
use crate::request::Request;
use crate::response::{IntoResponse, Response};

pub(crate) type ResponseFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// Object-safe face of a handler.
///
/// Public only because it shows up in [`Handler::into_shared`].
#[doc(hidden)]
pub trait DynHandler {
    fn dispatch(&self, req: Request) -> ResponseFuture;
}

#[doc(hidden)]
pub type SharedHandler = Arc<dyn DynHandler + Send + Sync + 'static>;

/// Implemented for every valid route handler.
///
/// Sealed: satisfied automatically by async functions and closures taking a
/// [`Request`], and by nothing else.
pub trait Handler: sealed::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_shared(self) -> SharedHandler;
}

mod sealed {
    pub trait Sealed {}
}

impl<F, Fut, R> sealed::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_shared(self) -> SharedHandler {
        Arc::new(HandlerFn(self))
    }
}

struct HandlerFn<F>(F);

impl<F, Fut, R> DynHandler for HandlerFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    /// Runs the handler. A panic, whether while building the future or
    /// while polling it, becomes a `500` envelope instead of tearing down
    /// the connection task.
    fn dispatch(&self, req: Request) -> ResponseFuture {
        let request_id = req.context().request_id().clone();
        match panic::catch_unwind(AssertUnwindSafe(|| (self.0)(req))) {
            Ok(fut) => Box::pin(AssertUnwindSafe(fut).catch_unwind().map(move |outcome| {
                match outcome {
                    Ok(res) => res.into_response(),
                    Err(_) => panicked(&request_id),
                }
            })),
            Err(_) => {
                let res = panicked(&request_id);
                Box::pin(async move { res })
            }
        }
    }
}

fn panicked(request_id: &RequestId) -> Response {
    error!(%request_id, "handler panicked");
    Error::Internal("handler panicked".into()).into_response()
}
