//! Response headers added to every HTTP response, whatever the transport.

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue},
    response::Response,
    Router,
};

pub const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'; img-src 'self' data:; frame-ancestors 'none'";
pub const PERMISSIONS_POLICY: &str = "camera=(), microphone=(), geolocation=()";

const PERMISSIONS_POLICY_HEADER: HeaderName = HeaderName::from_static("permissions-policy");

#[derive(Clone)]
struct ResponseHeaders {
    alt_svc: HeaderValue,
}

/// `Alt-Svc` value advertising HTTP/3 on `port`.
pub fn alt_svc_value(port: u16) -> String {
    format!("h3=\":{port}\"; ma=86400")
}

/// Wraps `router` so each response carries the security headers and `Alt-Svc`.
pub fn apply(router: Router, h3_port: u16) -> Router {
    let alt_svc = HeaderValue::from_str(&alt_svc_value(h3_port))
        .unwrap_or_else(|_| HeaderValue::from_static("h3=\":443\"; ma=86400"));
    router.layer(axum::middleware::map_response_with_state(
        ResponseHeaders { alt_svc },
        add_headers,
    ))
}

async fn add_headers(State(headers): State<ResponseHeaders>, mut response: Response) -> Response {
    let h = response.headers_mut();
    h.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    h.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    h.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    h.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(CONTENT_SECURITY_POLICY),
    );
    h.insert(PERMISSIONS_POLICY_HEADER, HeaderValue::from_static(PERMISSIONS_POLICY));
    h.insert(header::ALT_SVC, headers.alt_svc);
    response
}
