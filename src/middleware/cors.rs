//! Cross-origin resource sharing.
//!
//! The gate is permissive on the server side: a request from an origin that
//! is not on the allow-list still reaches its handler, it just gets no CORS
//! headers back, and the browser refuses to hand the response to the page.
//!
//! Credentials are always allowed, so `Access-Control-Allow-Origin` echoes
//! the matched origin. A literal `*` together with credentials is rejected
//! by browsers and by [`CorsPolicy::new`].

use http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_HEADERS,
    ACCESS_CONTROL_REQUEST_METHOD, HeaderValue, ORIGIN, VARY,
};
use http::{HeaderMap, Method, StatusCode};

use super::{Flow, Middleware};
use crate::error::{Error, Result};
use crate::request::{Request, RequestHead};
use crate::response::Response;

/// Methods a cross-origin caller may use.
pub const ALLOWED_METHODS: [Method; 7] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
    Method::HEAD,
];

const ALLOWED_METHODS_HEADER: &str = "GET, POST, PUT, PATCH, DELETE, OPTIONS, HEAD";

/// How long browsers may cache a preflight answer, in seconds.
pub const PREFLIGHT_MAX_AGE: u32 = 7200;

/// Which paths the policy covers.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum ResourcePattern {
    /// Every path.
    #[default]
    Any,
    /// Paths starting with the given prefix.
    Prefix(String),
}

impl ResourcePattern {
    fn matches(&self, path: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Prefix(prefix) => path.starts_with(prefix.as_str()),
        }
    }
}

/// The outcome of evaluating one request against a [`CorsPolicy`].
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    Allow(CorsHeaders),
    Deny,
}

/// Headers granted to an allowed cross-origin request.
#[derive(Clone, Debug, PartialEq)]
pub struct CorsHeaders {
    allow_origin: HeaderValue,
    allow_credentials: bool,
}

impl CorsHeaders {
    pub fn allow_origin(&self) -> &HeaderValue {
        &self.allow_origin
    }

    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, self.allow_origin.clone());
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS_HEADER),
        );
        if self.allow_credentials {
            headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
    }
}

/// Process-wide, read-only CORS configuration.
#[derive(Clone, Debug)]
pub struct CorsPolicy {
    origins: Vec<String>,
    allow_credentials: bool,
    resource: ResourcePattern,
}

impl CorsPolicy {
    /// Policy over an explicit origin list, credentials allowed, all paths.
    pub fn new(origins: Vec<String>) -> Result<Self> {
        if origins.is_empty() {
            return Err(Error::config("ALLOWED_ORIGINS", "no origins configured"));
        }
        if let Some(bad) = origins.iter().find(|o| *o == "*" || HeaderValue::from_str(o).is_err()) {
            return Err(Error::config(
                "ALLOWED_ORIGINS",
                format!("`{bad}` cannot be echoed as a credentialed origin"),
            ));
        }
        Ok(Self { origins, allow_credentials: true, resource: ResourcePattern::Any })
    }

    /// Parses a comma-separated list such as `ALLOWED_ORIGINS`.
    pub fn from_origin_list(list: &str) -> Result<Self> {
        Self::new(
            list.split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_owned)
                .collect(),
        )
    }

    /// Restricts the policy to a subset of paths.
    pub fn with_resource(mut self, resource: ResourcePattern) -> Self {
        self.resource = resource;
        self
    }

    pub fn origins(&self) -> &[String] {
        &self.origins
    }

    /// Decides whether `origin` may make a `method` request to `path`.
    ///
    /// Origins match by exact string comparison; there is no sub-domain
    /// wildcarding.
    pub fn evaluate(&self, origin: Option<&str>, method: &Method, path: &str) -> Decision {
        let Some(origin) = origin else { return Decision::Deny };

        let allowed = self.resource.matches(path)
            && ALLOWED_METHODS.contains(method)
            && self.origins.iter().any(|o| o == origin);
        if !allowed {
            return Decision::Deny;
        }

        match HeaderValue::from_str(origin) {
            Ok(allow_origin) => Decision::Allow(CorsHeaders {
                allow_origin,
                allow_credentials: self.allow_credentials,
            }),
            Err(_) => Decision::Deny,
        }
    }
}

// ── Middleware ────────────────────────────────────────────────────────────────

/// The CORS gate.
///
/// Every `OPTIONS` request is treated as a preflight and answered here with
/// `200 OK` and an empty body; it never reaches the router. Other requests
/// pass through and have headers attached on the way out.
pub struct Cors {
    policy: CorsPolicy,
}

impl Cors {
    pub fn new(policy: CorsPolicy) -> Self {
        Self { policy }
    }

    fn preflight(&self, req: &Request) -> Response {
        let requested = req
            .header(ACCESS_CONTROL_REQUEST_METHOD.as_str())
            .map_or(Ok(Method::OPTIONS), |m| Method::from_bytes(m.trim().as_bytes()));

        let decision = match requested {
            Ok(method) => self.policy.evaluate(req.header(ORIGIN.as_str()), &method, req.path()),
            Err(_) => Decision::Deny,
        };

        let mut res = Response::status(StatusCode::OK);
        let headers = res.headers_mut();
        headers.append(VARY, HeaderValue::from_static("Origin"));
        if let Decision::Allow(granted) = decision {
            granted.apply(headers);
            // Any request header is allowed: echo back what was asked for.
            if let Some(asked) = req.headers().get(ACCESS_CONTROL_REQUEST_HEADERS) {
                headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, asked.clone());
            }
            headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from(PREFLIGHT_MAX_AGE));
        }
        res
    }
}

impl Middleware for Cors {
    fn before(&self, req: &mut Request) -> Flow {
        if req.method() == Method::OPTIONS {
            return Flow::Respond(self.preflight(req));
        }
        Flow::Continue
    }

    fn after(&self, req: &RequestHead, res: &mut Response) {
        if req.method() == Method::OPTIONS {
            return;
        }
        res.headers_mut().append(VARY, HeaderValue::from_static("Origin"));
        if let Decision::Allow(granted) =
            self.policy.evaluate(req.header(ORIGIN.as_str()), req.method(), req.path())
        {
            granted.apply(res.headers_mut());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CorsPolicy {
        CorsPolicy::from_origin_list("http://a.test,http://b.test").unwrap()
    }

    #[test]
    fn allows_listed_origin_for_every_allowed_method() {
        let policy = policy();
        for method in ALLOWED_METHODS {
            match policy.evaluate(Some("http://b.test"), &method, "/any/path") {
                Decision::Allow(headers) => assert_eq!(headers.allow_origin(), "http://b.test"),
                Decision::Deny => panic!("{method} should be allowed"),
            }
        }
    }

    #[test]
    fn denies_unknown_origin_missing_origin_and_other_methods() {
        let policy = policy();
        assert_eq!(policy.evaluate(Some("http://c.test"), &Method::GET, "/"), Decision::Deny);
        assert_eq!(policy.evaluate(None, &Method::GET, "/"), Decision::Deny);
        assert_eq!(policy.evaluate(Some("http://a.test"), &Method::TRACE, "/"), Decision::Deny);
    }

    #[test]
    fn matching_is_exact() {
        let policy = policy();
        for origin in ["http://sub.a.test", "https://a.test", "http://a.test/", "HTTP://A.TEST"] {
            assert_eq!(policy.evaluate(Some(origin), &Method::GET, "/"), Decision::Deny, "{origin}");
        }
    }

    #[test]
    fn prefix_resources_limit_the_policy() {
        let policy = policy().with_resource(ResourcePattern::Prefix("/api/".into()));
        assert!(matches!(policy.evaluate(Some("http://a.test"), &Method::GET, "/api/v1/x"), Decision::Allow(_)));
        assert_eq!(policy.evaluate(Some("http://a.test"), &Method::GET, "/other"), Decision::Deny);
    }

    #[test]
    fn applied_headers_never_use_a_wildcard() {
        let Decision::Allow(granted) = policy().evaluate(Some("http://a.test"), &Method::POST, "/")
        else {
            panic!("expected allow");
        };
        let mut headers = HeaderMap::new();
        granted.apply(&mut headers);
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "http://a.test");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_METHODS], ALLOWED_METHODS_HEADER);
    }

    #[test]
    fn wildcard_origin_is_rejected() {
        assert!(CorsPolicy::from_origin_list("http://a.test,*").is_err());
        assert!(CorsPolicy::from_origin_list("").is_err());
    }
}
