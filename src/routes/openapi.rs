use axum::Json;
use utoipa::OpenApi;

use crate::dto::auth_dto::{
    AuthOperationResult, CompleteProfileData, CompleteProfileRequest, LoginRequest,
    RegisterProfile, RegisterRequest, UserRole,
};
use crate::models::user::{LifecycleState, UserView};
use crate::routes::{auth, health};

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::login,
        auth::register,
        auth::complete_profile,
        auth::me,
        health::health,
    ),
    components(schemas(
        LoginRequest,
        RegisterRequest,
        RegisterProfile,
        CompleteProfileRequest,
        CompleteProfileData,
        AuthOperationResult,
        UserView,
        LifecycleState,
        UserRole,
    )),
    tags((name = "auth", description = "Identity reconciliation against the external provider"))
)]
pub struct ApiDoc;

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
