//! Per-request context: correlation id, client address, user, format.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use http::HeaderMap;
use serde::Serialize;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
const MAX_REQUEST_ID_LEN: usize = 255;

/// Negotiated response format. JSON is the only one tern speaks.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Json,
}

impl Format {
    pub fn mime(self) -> &'static str {
        match self {
            Self::Json => "application/json",
        }
    }
}

/// Correlation identifier for one request.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// A fresh random (v4) id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Reuses an upstream id (from a proxy or the client) when it survives
    /// sanitization, otherwise generates one.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(sanitize)
            .filter(|id| !id.is_empty())
            .map_or_else(Self::generate, Self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '@'))
        .take(MAX_REQUEST_ID_LEN)
        .collect()
}

/// State that lives exactly as long as one request.
///
/// Created by the server before any middleware runs. The format is fixed
/// at JSON and has no setter; the user id starts out absent and is filled
/// in by whatever authentication middleware the application installs.
#[derive(Clone, Debug)]
pub struct RequestContext {
    format: Format,
    request_id: RequestId,
    ip: IpAddr,
    user_id: Option<String>,
}

impl RequestContext {
    pub fn new(request_id: RequestId, ip: IpAddr) -> Self {
        Self { format: Format::Json, request_id, ip, user_id: None }
    }

    /// Builds the context for an inbound request from its headers and the
    /// TCP peer address.
    pub fn from_request(headers: &HeaderMap, peer: SocketAddr) -> Self {
        Self::new(RequestId::from_headers(headers), client_ip(headers, peer.ip()))
    }

    pub fn format(&self) -> Format { self.format }
    pub fn request_id(&self) -> &RequestId { &self.request_id }
    pub fn ip(&self) -> IpAddr { self.ip }
    pub fn user_id(&self) -> Option<&str> { self.user_id.as_deref() }

    /// Records the authenticated user for this request.
    pub fn set_user_id(&mut self, user_id: impl Into<String>) {
        self.user_id = Some(user_id.into());
    }
}

// ── Client IP ─────────────────────────────────────────────────────────────────

/// Resolves the originating client address.
///
/// `X-Forwarded-For` is only believed when the TCP peer is itself a trusted
/// proxy. The chain is walked right to left, skipping trusted hops; the
/// first untrusted address is the client. A chain made entirely of trusted
/// addresses yields its leftmost entry.
pub fn client_ip(headers: &HeaderMap, peer: IpAddr) -> IpAddr {
    if !is_trusted_proxy(peer) {
        return peer;
    }

    let chain: Vec<IpAddr> = headers
        .get_all(FORWARDED_FOR_HEADER)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|hop| hop.trim().parse().ok())
        .collect();

    chain
        .iter()
        .rev()
        .find(|ip| !is_trusted_proxy(**ip))
        .or_else(|| chain.first())
        .copied()
        .unwrap_or(peer)
}

/// Loopback, private and unique-local addresses.
fn is_trusted_proxy(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private(),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_trusted_proxy(IpAddr::V4(v4));
            }
            v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(*k, HeaderValue::from_static(*v));
        }
        map
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = RequestId::from_headers(&HeaderMap::new());
        let b = RequestId::from_headers(&HeaderMap::new());
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn upstream_id_is_sanitized() {
        let id = RequestId::from_headers(&headers(&[("x-request-id", "abc-123 <script>@x_y")]));
        assert_eq!(id.as_str(), "abc-123script@x_y");
    }

    #[test]
    fn upstream_id_is_truncated() {
        let long = "a".repeat(300);
        let mut map = HeaderMap::new();
        map.insert("x-request-id", HeaderValue::from_str(&long).unwrap());
        assert_eq!(RequestId::from_headers(&map).as_str().len(), 255);
    }

    #[test]
    fn unusable_upstream_id_is_replaced() {
        let id = RequestId::from_headers(&headers(&[("x-request-id", "!!!")]));
        assert_eq!(id.as_str().len(), 36);
    }

    #[test]
    fn context_defaults() {
        let mut ctx = RequestContext::new(RequestId::generate(), ip("203.0.113.9"));
        assert_eq!(ctx.format(), Format::Json);
        assert_eq!(ctx.user_id(), None);
        ctx.set_user_id("42");
        assert_eq!(ctx.user_id(), Some("42"));
    }

    #[test]
    fn forwarded_for_ignored_from_untrusted_peer() {
        let h = headers(&[("x-forwarded-for", "198.51.100.1")]);
        assert_eq!(client_ip(&h, ip("203.0.113.9")), ip("203.0.113.9"));
    }

    #[test]
    fn forwarded_for_walks_past_trusted_hops() {
        let h = headers(&[("x-forwarded-for", "198.51.100.1, 203.0.113.7, 10.0.0.2")]);
        assert_eq!(client_ip(&h, ip("127.0.0.1")), ip("203.0.113.7"));
    }

    #[test]
    fn all_trusted_chain_yields_leftmost() {
        let h = headers(&[("x-forwarded-for", "192.168.1.5, 10.0.0.2")]);
        assert_eq!(client_ip(&h, ip("::1")), ip("192.168.1.5"));
    }

    #[test]
    fn trusted_peer_without_header_is_client() {
        assert_eq!(client_ip(&HeaderMap::new(), ip("10.1.2.3")), ip("10.1.2.3"));
    }
}
