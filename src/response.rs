//! Outgoing HTTP response type and the [`IntoResponse`] conversion trait.
//!
//! Handlers build a [`Response`] (or anything [`IntoResponse`]) and return
//! it. The content type is not theirs to choose: the format normalizer
//! stamps `application/json` on every response on the way out.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use serde::Serialize;

use crate::context::{Format, RequestContext};
use crate::error::Error;

/// Marks a response as an error to be rendered into the JSON envelope.
#[derive(Clone, Debug)]
pub(crate) struct Failure {
    pub(crate) code: &'static str,
    pub(crate) detail: Option<String>,
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// ```rust
/// use tern::{Json, Response};
/// use http::StatusCode;
///
/// Response::json(r#"{"id":1}"#);
/// Response::to_json(&serde_json::json!({ "id": 1 }));
/// Response::status(StatusCode::NO_CONTENT);
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header(http::header::LOCATION, http::HeaderValue::from_static("/users/42"))
///     .json(r#"{"id":42}"#);
/// ```
#[derive(Debug)]
pub struct Response {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) failure: Option<Failure>,
}

impl Response {
    /// `200 OK` with an already-serialized JSON body.
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self::builder().json(body)
    }

    /// `200 OK` with `value` serialized by serde_json.
    pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Self {
        Self::builder().to_json(value)
    }

    /// Response with no body of its own. A 4xx or 5xx status is rendered as
    /// the JSON error envelope, like any other failure.
    pub fn status(status: StatusCode) -> Self {
        let mut res = Self::builder().status(status).no_body();
        if status.is_client_error() || status.is_server_error() {
            res.failure = Some(Failure { code: error_code(status), detail: None });
        }
        res
    }

    /// Error response. The body is rendered as the JSON error envelope once
    /// the request context is known.
    pub fn failure(status: StatusCode, code: &'static str) -> Self {
        let mut res = Self::status(status);
        res.failure = Some(Failure { code, detail: None });
        res
    }

    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: HeaderMap::new(), status: StatusCode::OK }
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &Bytes { &self.body }
    pub fn is_failure(&self) -> bool { self.failure.is_some() }

    /// Replaces a failure marker with its envelope body.
    pub(crate) fn render_failure(&mut self, ctx: &RequestContext, detailed: bool) {
        let Some(failure) = self.failure.take() else { return };
        let envelope = Envelope {
            error: EnvelopeBody {
                status: self.status.as_u16(),
                code: failure.code,
                message: self.status.canonical_reason().unwrap_or("Error"),
                request_id: ctx.request_id().as_str(),
                detail: failure.detail.as_deref().filter(|_| detailed),
            },
        };
        // A struct of strings and integers always serializes.
        self.body = serde_json::to_vec(&envelope).map(Bytes::from).unwrap_or_default();
    }

    /// Forces the response content type. Called by the format normalizer.
    pub(crate) fn force_format(&mut self, format: Format) {
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(format.mime()));
    }
}

/// Envelope code for a bare error status.
fn error_code(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "bad_request",
        StatusCode::UNAUTHORIZED => "unauthorized",
        StatusCode::FORBIDDEN => "forbidden",
        StatusCode::NOT_FOUND => "not_found",
        StatusCode::METHOD_NOT_ALLOWED => "method_not_allowed",
        StatusCode::CONFLICT => "conflict",
        StatusCode::UNPROCESSABLE_ENTITY => "unprocessable_entity",
        StatusCode::TOO_MANY_REQUESTS => "too_many_requests",
        StatusCode::INTERNAL_SERVER_ERROR => "internal_error",
        StatusCode::BAD_GATEWAY => "bad_gateway",
        StatusCode::SERVICE_UNAVAILABLE => "service_unavailable",
        StatusCode::GATEWAY_TIMEOUT => "gateway_timeout",
        s if s.is_client_error() => "client_error",
        _ => "server_error",
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    error: EnvelopeBody<'a>,
}

#[derive(Serialize)]
struct EnvelopeBody<'a> {
    status: u16,
    code: &'a str,
    message: &'a str,
    request_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a str>,
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`.
pub struct ResponseBuilder {
    headers: HeaderMap,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Terminate with an already-serialized JSON body.
    pub fn json(self, body: impl Into<Bytes>) -> Response {
        Response { status: self.status, headers: self.headers, body: body.into(), failure: None }
    }

    /// Terminate with `value` serialized as JSON.
    pub fn to_json<T: Serialize + ?Sized>(self, value: &T) -> Response {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.json(bytes),
            Err(e) => Error::from(e).into_response(),
        }
    }

    /// Terminate with no body (e.g. `204 No Content`, redirects). Unlike
    /// [`Response::status`], never rendered as an error envelope.
    pub fn no_body(self) -> Response {
        self.json(Bytes::new())
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
///
/// Implement on your own types to return them directly from handlers.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

/// Return a status directly from a handler: `return StatusCode::NO_CONTENT`
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

/// Typed JSON body: `Json(user)` for any `T: Serialize`.
pub struct Json<T>(pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response { Response::to_json(&self.0) }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let mut res = Response::status(self.status());
        res.failure = Some(Failure { code: self.code(), detail: Some(self.to_string()) });
        res
    }
}

impl<R: IntoResponse> IntoResponse for Result<R, Error> {
    fn into_response(self) -> Response {
        match self {
            Ok(r) => r.into_response(),
            Err(e) => e.into_response(),
        }
    }
}
