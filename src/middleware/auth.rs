use axum::{
    extract::Request,
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::Error;

/// Raw provider assertion taken from the `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerToken(pub String);

pub fn bearer_token(headers: &HeaderMap) -> Result<BearerToken, Error> {
    let Some(auth_header) = headers.get(header::AUTHORIZATION) else {
        return Err(Error::InvalidAssertion("missing_authorization".into()));
    };
    let Ok(auth_str) = auth_header.to_str() else {
        return Err(Error::InvalidAssertion("bad_authorization".into()));
    };
    let Some(token) = auth_str.strip_prefix("Bearer ") else {
        return Err(Error::InvalidAssertion("unsupported_scheme".into()));
    };
    let token = token.trim();
    if token.is_empty() {
        return Err(Error::InvalidAssertion("missing_authorization".into()));
    }
    Ok(BearerToken(token.to_string()))
}

/// Rejects requests without a bearer token and exposes it to handlers as an
/// extension. Signature checks happen in the verifier.
pub async fn require_bearer(mut req: Request, next: Next) -> Response {
    match bearer_token(req.headers()) {
        Ok(token) => {
            req.extensions_mut().insert(token);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}
