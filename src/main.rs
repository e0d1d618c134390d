//! tern server binary.
//!
//! Run with:
//!   APP_ENV=development ALLOWED_ORIGINS=http://localhost:4200 cargo run
//!
//! Try:
//!   curl -i http://localhost:3000/healthz
//!   curl -i -X OPTIONS http://localhost:3000/api/v1/status \
//!        -H 'origin: http://localhost:4200' \
//!        -H 'access-control-request-method: POST'

use std::process::ExitCode;
use std::sync::Arc;

use http::Method;
use serde::Serialize;
use tern::{App, Backends, Config, Json, Request, Router, Server, health, telemetry};

#[derive(Serialize)]
struct ApiStatus {
    profile: &'static str,
    request_id: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> tern::Result<()> {
    let config = Arc::new(Config::from_env()?);
    telemetry::init(&config)?;
    let backends = Backends::from_config(&config)?;

    let profile = config.profile;
    let router = Router::new()
        .on(Method::GET, health::LIVENESS_PATH, health::liveness)
        .on(Method::GET, health::READINESS_PATH, health::readiness(backends))
        .on(Method::GET, "/api/v1/status", move |req: Request| async move {
            Json(ApiStatus {
                profile: profile.as_str(),
                request_id: req.context().request_id().to_string(),
            })
        });

    Server::bind(config.bind_addr).serve(App::new(config, router)).await
}
