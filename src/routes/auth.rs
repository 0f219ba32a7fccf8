use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Json},
    Extension,
};
use validator::Validate;

use crate::dto::auth_dto::{
    ApiResponse, AuthOperationResult, CompleteProfileRequest, LoginRequest, RegisterRequest,
    RequestContext,
};
use crate::error::Result;
use crate::middleware::auth::BearerToken;
use crate::middleware::rate_limit::ClientIpPolicy;
use crate::models::user::UserView;
use crate::AppState;

fn request_context(
    policy: &ClientIpPolicy,
    headers: &HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    uri: &Uri,
) -> RequestContext {
    RequestContext {
        ip: policy.resolve(headers, peer.map(|ConnectInfo(addr)| addr)),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        endpoint: Some(uri.path().to_string()),
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/login/token",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login succeeded; the user is created on first sight", body = AuthOperationResult),
        (status = 400, description = "Assertion carries no email"),
        (status = 401, description = "Invalid assertion"),
        (status = 403, description = "Email not verified")
    )
)]
#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    uri: Uri,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let ctx = request_context(&state.client_ip, &headers, peer, &uri);
    let result = state.identity_service.login(&payload.id_token, &ctx).await?;
    let message = if result.created {
        "Account created"
    } else {
        "Login successful"
    };
    Ok(Json(ApiResponse::with_message(result, message)))
}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = AuthOperationResult),
        (status = 200, description = "Existing registration updated", body = AuthOperationResult),
        (status = 400, description = "Invalid profile data"),
        (status = 401, description = "Invalid assertion"),
        (status = 403, description = "Supplied subject id does not match the assertion"),
        (status = 409, description = "Email or handle already registered")
    )
)]
#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    uri: Uri,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let ctx = request_context(&state.client_ip, &headers, peer, &uri);
    let result: AuthOperationResult = state
        .identity_service
        .register(&payload.id_token, &payload.data, &ctx)
        .await?;
    if result.created {
        Ok((
            StatusCode::CREATED,
            Json(ApiResponse::with_message(result, "User registered")),
        ))
    } else {
        Ok((
            StatusCode::OK,
            Json(ApiResponse::with_message(result, "Registration updated")),
        ))
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/complete-profile",
    tag = "auth",
    request_body = CompleteProfileRequest,
    responses(
        (status = 200, description = "Profile completed", body = AuthOperationResult),
        (status = 400, description = "Invalid profile data"),
        (status = 401, description = "Invalid assertion"),
        (status = 404, description = "User not found"),
        (status = 409, description = "Account is not awaiting profile completion")
    )
)]
#[axum::debug_handler]
pub async fn complete_profile(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    uri: Uri,
    Json(payload): Json<CompleteProfileRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let ctx = request_context(&state.client_ip, &headers, peer, &uri);
    let result = state
        .identity_service
        .complete_profile(&payload.id_token, &payload.data, &ctx)
        .await?;
    Ok(Json(ApiResponse::with_message(result, "Profile completed")))
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Stored user for the bearer assertion", body = UserView),
        (status = 401, description = "Missing or invalid assertion"),
        (status = 404, description = "User not found")
    )
)]
#[axum::debug_handler]
pub async fn me(
    State(state): State<AppState>,
    Extension(BearerToken(token)): Extension<BearerToken>,
) -> Result<impl IntoResponse> {
    let user = state.identity_service.current_user(&token).await?;
    Ok(Json(ApiResponse::ok(user)))
}
