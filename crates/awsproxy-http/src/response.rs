//! Responses the proxy produces itself.

use http::StatusCode;

use crate::body::{self, ProxyBody};

/// Header carrying the id the proxy assigned to a request.
pub const X_REQUEST_ID: &str = "x-request-id";

/// The response sent to the client when a request could not be proxied.
///
/// The body is empty; details only go to the log, correlated by
/// `request_id`.
#[must_use]
pub fn bad_gateway(request_id: &str) -> http::Response<ProxyBody> {
    let mut response = http::Response::new(body::empty());
    *response.status_mut() = StatusCode::BAD_GATEWAY;
    if let Ok(hv) = http::HeaderValue::from_str(request_id) {
        response.headers_mut().insert(X_REQUEST_ID, hv);
    }
    response
}
