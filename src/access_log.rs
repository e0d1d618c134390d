//! Structured access log: one JSON line per completed request.
//!
//! The record is written when the response body is released by the server,
//! i.e. after the last byte went out (or the client went away). That makes
//! "exactly once, after the response" a property of ownership rather than
//! of every code path remembering to call the logger.
//!
//! Failures to serialize or write a line are counted and otherwise ignored.
//! A broken log sink must never turn into a failed request.

use std::convert::Infallible;
use std::io::{self, Write};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::Full;
use hyper::body::{Body, Frame, SizeHint};
use parking_lot::Mutex;
use serde::Serialize;

use crate::context::{Format, RequestContext};

/// How a request ended.
#[derive(Clone, Debug)]
pub struct Outcome {
    pub method: Method,
    pub path: String,
    pub status: StatusCode,
    pub duration: Duration,
}

#[derive(Serialize)]
struct AccessRecord<'a> {
    user_id: Option<&'a str>,
    request_id: &'a str,
    ip: String,
    method: &'a str,
    path: &'a str,
    format: Format,
    status: u16,
    duration_ms: f64,
}

type Sink = Box<dyn Write + Send>;

/// Writes access records to a shared sink.
///
/// The sink sits behind a mutex and each record goes out in a single
/// `write_all`, so lines from concurrent requests interleave whole.
pub struct AccessLogger {
    sink: Mutex<Sink>,
    failures: AtomicU64,
}

impl AccessLogger {
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self { sink: Mutex::new(Box::new(sink)), failures: AtomicU64::new(0) }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Number of records lost to serialization or sink errors since start.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Emits the record for one finished request. Never fails.
    pub fn record(&self, ctx: &RequestContext, outcome: &Outcome) {
        if self.try_record(ctx, outcome).is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn try_record(&self, ctx: &RequestContext, outcome: &Outcome) -> io::Result<()> {
        let record = AccessRecord {
            user_id: ctx.user_id(),
            request_id: ctx.request_id().as_str(),
            ip: ctx.ip().to_string(),
            method: outcome.method.as_str(),
            path: &outcome.path,
            format: ctx.format(),
            status: outcome.status.as_u16(),
            duration_ms: outcome.duration.as_secs_f64() * 1000.0,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut sink = self.sink.lock();
        sink.write_all(&line)?;
        sink.flush()
    }
}

impl Default for AccessLogger {
    fn default() -> Self { Self::stdout() }
}

// ── Response body ─────────────────────────────────────────────────────────────

/// Everything needed to log a request once its response is gone.
struct Completion {
    logger: Arc<AccessLogger>,
    context: RequestContext,
    method: Method,
    path: String,
    status: StatusCode,
    started: Instant,
}

/// Response body handed to hyper. Logs the request when dropped.
pub struct ResponseBody {
    inner: Full<Bytes>,
    completion: Option<Completion>,
}

impl ResponseBody {
    pub(crate) fn new(
        body: Bytes,
        logger: Arc<AccessLogger>,
        context: RequestContext,
        method: Method,
        path: String,
        status: StatusCode,
        started: Instant,
    ) -> Self {
        Self {
            inner: Full::new(body),
            completion: Some(Completion { logger, context, method, path, status, started }),
        }
    }
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        Pin::new(&mut self.get_mut().inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for ResponseBody {
    fn drop(&mut self) {
        if let Some(done) = self.completion.take() {
            let outcome = Outcome {
                method: done.method,
                path: done.path,
                status: done.status,
                duration: done.started.elapsed(),
            };
            done.logger.record(&done.context, &outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestId;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> { Ok(()) }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
        fn flush(&mut self) -> io::Result<()> { Ok(()) }
    }

    fn outcome() -> Outcome {
        Outcome {
            method: Method::GET,
            path: "/api/v1/accounts".into(),
            status: StatusCode::OK,
            duration: Duration::from_millis(3),
        }
    }

    #[test]
    fn writes_one_json_line() {
        let buf = Buffer::default();
        let logger = AccessLogger::new(buf.clone());
        let ctx = RequestContext::new(RequestId::generate(), "203.0.113.9".parse().unwrap());

        logger.record(&ctx, &outcome());

        let out = String::from_utf8(buf.0.lock().clone()).unwrap();
        assert_eq!(out.lines().count(), 1);
        let line: serde_json::Value = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(line["user_id"], serde_json::Value::Null);
        assert_eq!(line["request_id"], ctx.request_id().as_str());
        assert_eq!(line["ip"], "203.0.113.9");
        assert_eq!(line["status"], 200);
        assert_eq!(line["format"], "json");
        assert_eq!(logger.failures(), 0);
    }

    #[test]
    fn includes_authenticated_user() {
        let buf = Buffer::default();
        let logger = AccessLogger::new(buf.clone());
        let mut ctx = RequestContext::new(RequestId::generate(), "10.0.0.1".parse().unwrap());
        ctx.set_user_id("user-7");

        logger.record(&ctx, &outcome());

        let line: serde_json::Value = serde_json::from_slice(&buf.0.lock()).unwrap();
        assert_eq!(line["user_id"], "user-7");
    }

    #[test]
    fn sink_failures_are_counted_not_raised() {
        let logger = AccessLogger::new(Broken);
        let ctx = RequestContext::new(RequestId::generate(), "10.0.0.1".parse().unwrap());
        logger.record(&ctx, &outcome());
        logger.record(&ctx, &outcome());
        assert_eq!(logger.failures(), 2);
    }

    #[test]
    fn dropping_the_body_logs_exactly_once() {
        let buf = Buffer::default();
        let logger = Arc::new(AccessLogger::new(buf.clone()));
        let ctx = RequestContext::new(RequestId::generate(), "10.0.0.1".parse().unwrap());

        let body = ResponseBody::new(
            Bytes::from_static(b"{}"),
            Arc::clone(&logger),
            ctx,
            Method::GET,
            "/".into(),
            StatusCode::OK,
            Instant::now(),
        );
        assert!(buf.0.lock().is_empty());
        drop(body);

        let out = String::from_utf8(buf.0.lock().clone()).unwrap();
        assert_eq!(out.lines().count(), 1);
    }

    #[test]
    fn concurrent_writers_never_tear_lines() {
        let buf = Buffer::default();
        let logger = Arc::new(AccessLogger::new(buf.clone()));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let logger = Arc::clone(&logger);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let ctx = RequestContext::new(RequestId::generate(), "10.0.0.1".parse().unwrap());
                        logger.record(&ctx, &outcome());
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let out = String::from_utf8(buf.0.lock().clone()).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 400);
        for line in lines {
            serde_json::from_str::<serde_json::Value>(line).unwrap();
        }
    }
}
