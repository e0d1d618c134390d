//! Incoming HTTP request type.

use std::collections::HashMap;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};

use crate::context::RequestContext;

/// Everything about a request except its body and route parameters.
///
/// Middleware `after` hooks receive this once the handler has consumed the
/// [`Request`] itself.
#[derive(Clone, Debug)]
pub struct RequestHead {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) headers: HeaderMap,
    pub(crate) context: RequestContext,
}

impl RequestHead {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, context: RequestContext) -> Self {
        Self { method, uri, headers, context }
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn context(&self) -> &RequestContext { &self.context }

    /// Header value as a string. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// An incoming HTTP request, as seen by middleware and handlers.
pub struct Request {
    pub(crate) head: RequestHead,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
}

impl Request {
    pub fn new(head: RequestHead, body: Bytes) -> Self {
        Self { head, body, params: HashMap::new() }
    }

    pub fn head(&self) -> &RequestHead { &self.head }
    pub fn method(&self) -> &Method { &self.head.method }
    pub fn path(&self) -> &str { self.head.path() }
    pub fn headers(&self) -> &HeaderMap { &self.head.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.head.headers }
    pub fn body(&self) -> &Bytes { &self.body }
    pub fn context(&self) -> &RequestContext { &self.head.context }
    pub fn context_mut(&mut self) -> &mut RequestContext { &mut self.head.context }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.header(name)
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Deserializes the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}
