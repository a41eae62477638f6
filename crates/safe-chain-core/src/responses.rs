use rama_http::Body;
use rama_http::Response;
use rama_http::StatusCode;

/// The literal text written for every blocked request, per the wire contract.
pub const BLOCKED_BY_SAFE_CHAIN: &str = "Forbidden - blocked by safe-chain";

pub fn text_response(status: StatusCode, body: &str) -> Response {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| Response::new(Body::from(body.to_string())))
}

/// `HTTP/1.1 403 Forbidden - blocked by safe-chain\r\n\r\nForbidden - blocked by safe-chain`.
pub fn blocked_response() -> Response {
    text_response(StatusCode::FORBIDDEN, BLOCKED_BY_SAFE_CHAIN)
}
