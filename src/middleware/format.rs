//! JSON in, JSON out.

use http::header::{ACCEPT, HeaderValue};

use super::{Flow, Middleware};
use crate::request::{Request, RequestHead};
use crate::response::Response;

/// Pins every exchange to JSON.
///
/// Before the handler runs, the request's `Accept` header is replaced so
/// anything downstream that negotiates sees only JSON. After, the response
/// `Content-Type` is overwritten with the context's format, whatever the
/// handler or an earlier hook put there.
pub struct FormatNormalizer;

impl Middleware for FormatNormalizer {
    fn before(&self, req: &mut Request) -> Flow {
        let mime = req.context().format().mime();
        req.headers_mut().insert(ACCEPT, HeaderValue::from_static(mime));
        Flow::Continue
    }

    fn after(&self, req: &RequestHead, res: &mut Response) {
        res.force_format(req.context().format());
    }
}
