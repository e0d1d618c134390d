//! Kubernetes health-check handlers.
//!
//! | Probe | Path | Question |
//! |---|---|---|
//! | **Liveness** | `/healthz` | Is the process alive? Failure → restart. |
//! | **Readiness** | `/readyz` | Can the pod serve traffic? Failure → pulled from load-balancer. |
//!
//! ```rust,no_run
//! use http::Method;
//! use tern::{Backends, Config, Router, health};
//!
//! # fn main() -> tern::Result<()> {
//! let config = Config::from_env()?;
//! let backends = Backends::from_config(&config)?;
//! let app = Router::new()
//!     .on(Method::GET, "/healthz", health::liveness)
//!     .on(Method::GET, "/readyz", health::readiness(backends));
//! # Ok(())
//! # }
//! ```

use serde::Serialize;

use crate::error::Error;
use crate::handler::Handler;
use crate::response::Json;
use crate::store::{Backends, KeyValueStore};
use crate::{Request, Response};

pub const LIVENESS_PATH: &str = "/healthz";
pub const READINESS_PATH: &str = "/readyz";

#[derive(Serialize)]
pub struct Status {
    status: &'static str,
}

/// Liveness probe. Always `200 {"status":"ok"}`: if the process can answer
/// HTTP at all, it is alive.
pub async fn liveness(_req: Request) -> Response {
    Response::to_json(&Status { status: "ok" })
}

/// Readiness probe over the app's backends.
///
/// Pings the cache store and Redis. An unreachable backend surfaces as
/// `503` with a `backend_unavailable` error envelope once its bounded
/// connection budget is exhausted.
pub fn readiness(backends: Backends) -> impl Handler {
    move |_req: Request| {
        let backends = backends.clone();
        async move {
            backends.cache().ping().await?;
            backends.redis().ping().await?;
            Ok::<_, Error>(Json(Status { status: "ready" }))
        }
    }
}
