#![allow(dead_code)]

use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use parking_lot::Mutex;
use tern::{AccessLogger, App, Config, Router};

pub const PEER: &str = "203.0.113.10:51000";

/// Captures access log output in memory.
#[derive(Clone, Default)]
pub struct Buffer(Arc<Mutex<Vec<u8>>>);

impl Buffer {
    pub fn lines(&self) -> Vec<serde_json::Value> {
        let raw = String::from_utf8(self.0.lock().clone()).unwrap();
        raw.lines().map(|l| serde_json::from_str(l).unwrap()).collect()
    }
}

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> { Ok(()) }
}

/// Test-profile config with two allowed origins and an unreachable Redis.
pub fn config(extra: &[(&str, &str)]) -> Arc<Config> {
    let mut vars = vec![
        ("APP_ENV", "test"),
        ("ALLOWED_ORIGINS", "http://a.test,http://b.test"),
        ("REDIS_URL", "redis://127.0.0.1:1/0"),
        ("REDIS_CONNECT_TIMEOUT_MS", "200"),
    ];
    vars.extend_from_slice(extra);
    Arc::new(Config::from_vars(vars).unwrap())
}

/// A backend that accepts connections and never answers. Database 1 makes
/// the client wait for a reply during its handshake.
pub async fn silent_backend() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("redis://{addr}/1")
}

pub fn app(config: Arc<Config>, router: Router) -> (App, Buffer) {
    let buffer = Buffer::default();
    let app = App::new(config, router).access_log(AccessLogger::new(buffer.clone()));
    (app, buffer)
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Reply {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

/// Runs one request through the app and reads the whole body, which also
/// releases it and triggers the access log.
pub async fn send(app: &App, method: Method, uri: &str, headers: &[(&str, &str)]) -> Reply {
    let mut req = http::Request::builder().method(method).uri(uri);
    for (k, v) in headers {
        req = req.header(*k, *v);
    }
    let req = req.body(Full::new(Bytes::new())).unwrap();

    let res = app.handle(req, PEER.parse::<SocketAddr>().unwrap()).await;
    let (parts, body) = res.into_parts();
    let body = body.collect().await.unwrap().to_bytes();
    Reply { status: parts.status, headers: parts.headers, body }
}
