use axum::http::{header, Method};
use tower_http::cors::{Any, CorsLayer};

/// Auth endpoints are called from browser clients on any origin; only the
/// methods and headers they use are allowed.
pub fn auth_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(Any)
}
