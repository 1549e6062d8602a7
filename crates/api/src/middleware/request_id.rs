use axum::{body::Body, http::Request, middleware::Next, response::Response};
use nanoid::nanoid;

use crate::state::RequestId;

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let request_id = format!("req_{}", nanoid!(16));
    req.extensions_mut().insert(RequestId(request_id.clone()));
    let mut resp = next.run(req).await;
    if let Ok(value) = request_id.parse() {
        resp.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    resp
}

/// The id assigned by [`request_id`], or an empty string outside the middleware.
pub fn current(req: &Request<Body>) -> String {
    req.extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default()
}
