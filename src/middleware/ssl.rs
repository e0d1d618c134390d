//! Transport security enforcement for deployments behind a TLS-terminating
//! proxy.

use http::header::{HOST, HeaderValue, LOCATION, STRICT_TRANSPORT_SECURITY};
use http::{Method, StatusCode};

use super::{Flow, Middleware};
use crate::request::{Request, RequestHead};
use crate::response::Response;

const FORWARDED_PROTO_HEADER: &str = "x-forwarded-proto";

/// Two years, sub-domains included.
const HSTS: &str = "max-age=63072000; includeSubDomains";

/// Redirects plain-HTTP requests to https and marks secure responses with
/// `Strict-Transport-Security`.
///
/// A request counts as secure if its URI carries the `https` scheme or the
/// proxy in front says so through `X-Forwarded-Proto`.
pub struct ForceSsl {
    exempt: Vec<String>,
}

impl ForceSsl {
    pub fn new() -> Self {
        Self { exempt: Vec::new() }
    }

    /// Leaves `path` reachable over plain HTTP (health probes, typically).
    pub fn exempt(mut self, path: impl Into<String>) -> Self {
        self.exempt.push(path.into());
        self
    }

    fn is_exempt(&self, path: &str) -> bool {
        self.exempt.iter().any(|p| p == path)
    }
}

impl Default for ForceSsl {
    fn default() -> Self { Self::new() }
}

fn is_secure(req: &RequestHead) -> bool {
    req.uri().scheme_str() == Some("https")
        || req.header(FORWARDED_PROTO_HEADER)
            .and_then(|v| v.split(',').next())
            .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"))
}

impl Middleware for ForceSsl {
    fn before(&self, req: &mut Request) -> Flow {
        if is_secure(req.head()) || self.is_exempt(req.path()) {
            return Flow::Continue;
        }

        let host = req.header(HOST.as_str())
            .or_else(|| req.head().uri().authority().map(|a| a.as_str()))
            .unwrap_or("localhost");
        let target = req.head().uri().path_and_query().map_or("/", |pq| pq.as_str());

        // Only GET and HEAD are safe to replay as a method-changing 301.
        let status = if req.method() == Method::GET || req.method() == Method::HEAD {
            StatusCode::MOVED_PERMANENTLY
        } else {
            StatusCode::TEMPORARY_REDIRECT
        };

        let mut res = Response::status(status);
        match HeaderValue::try_from(format!("https://{host}{target}")) {
            Ok(location) => {
                res.headers_mut().insert(LOCATION, location);
                Flow::Respond(res)
            }
            Err(_) => Flow::Respond(Response::failure(StatusCode::BAD_REQUEST, "bad_request")),
        }
    }

    fn after(&self, req: &RequestHead, res: &mut Response) {
        if is_secure(req) {
            res.headers_mut().insert(STRICT_TRANSPORT_SECURITY, HeaderValue::from_static(HSTS));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RequestContext, RequestId};
    use bytes::Bytes;
    use http::{HeaderMap, Uri};

    fn request(method: Method, uri: &'static str, headers: &[(&'static str, &'static str)]) -> Request {
        let mut map = HeaderMap::new();
        for (k, v) in headers {
            map.insert(*k, HeaderValue::from_static(*v));
        }
        let ctx = RequestContext::new(RequestId::generate(), "127.0.0.1".parse().unwrap());
        Request::new(RequestHead::new(method, Uri::from_static(uri), map, ctx), Bytes::new())
    }

    fn redirect(flow: Flow) -> Response {
        match flow {
            Flow::Respond(res) => res,
            Flow::Continue => panic!("expected a redirect"),
        }
    }

    #[test]
    fn plain_get_is_redirected_permanently() {
        let mut req = request(Method::GET, "/api/v1/accounts?page=2", &[("host", "api.test")]);
        let res = redirect(ForceSsl::new().before(&mut req));
        assert_eq!(res.status_code(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(res.headers()[LOCATION], "https://api.test/api/v1/accounts?page=2");
    }

    #[test]
    fn plain_post_keeps_its_method() {
        let mut req = request(Method::POST, "/api/v1/accounts", &[("host", "api.test")]);
        let res = redirect(ForceSsl::new().before(&mut req));
        assert_eq!(res.status_code(), StatusCode::TEMPORARY_REDIRECT);
    }

    #[test]
    fn forwarded_https_passes_and_gets_hsts() {
        let mut req = request(Method::GET, "/", &[("x-forwarded-proto", "https")]);
        let ssl = ForceSsl::new();
        assert!(matches!(ssl.before(&mut req), Flow::Continue));

        let mut res = Response::json("{}");
        ssl.after(req.head(), &mut res);
        assert_eq!(res.headers()[STRICT_TRANSPORT_SECURITY], HSTS);
    }

    #[test]
    fn exempt_paths_pass_over_plain_http() {
        let mut req = request(Method::GET, "/healthz", &[]);
        let ssl = ForceSsl::new().exempt("/healthz");
        assert!(matches!(ssl.before(&mut req), Flow::Continue));

        let mut res = Response::json("{}");
        ssl.after(req.head(), &mut res);
        assert!(res.headers().get(STRICT_TRANSPORT_SECURITY).is_none());
    }
}
