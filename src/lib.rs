pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::database::store::{AuditSink, IdentityStore, RoleStore};
use crate::middleware::rate_limit::ClientIpPolicy;
use crate::services::{
    audit_service::AuditService, identity_service::IdentityService, role_service::RoleService,
};
use crate::utils::assertion::AssertionVerifier;

#[derive(Clone)]
pub struct AppState {
    pub identity_service: IdentityService,
    pub client_ip: ClientIpPolicy,
}

impl AppState {
    /// Wires the reconciler to its collaborators. A single backend usually
    /// implements all three store traits.
    pub fn new<S>(
        verifier: Arc<dyn AssertionVerifier>,
        store: Arc<S>,
        audit_signing_key: Option<String>,
    ) -> Self
    where
        S: IdentityStore + RoleStore + AuditSink + 'static,
    {
        let roles = RoleService::new(store.clone());
        let audit = AuditService::new(store.clone(), audit_signing_key);
        let identity_service = IdentityService::new(verifier, store, roles, audit);
        Self {
            identity_service,
            client_ip: ClientIpPolicy::default(),
        }
    }

    /// Read client addresses from `X-Forwarded-For` when deployed behind a
    /// proxy that sets it.
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.client_ip.trust_forwarded_for = trust;
        self
    }
}

pub fn build_router(state: AppState, auth_rps: u32) -> Router {
    let auth_api = Router::new()
        .route("/api/auth/login/token", post(routes::auth::login))
        .route("/api/auth/register", post(routes::auth::register))
        .route("/api/auth/complete-profile", post(routes::auth::complete_profile))
        .route(
            "/api/auth/me",
            get(routes::auth::me)
                .layer(axum::middleware::from_fn(middleware::auth::require_bearer)),
        )
        .layer(axum::middleware::from_fn_with_state(
            middleware::rate_limit::RateLimiter::new(auth_rps, state.client_ip),
            middleware::rate_limit::rps_middleware,
        ));
    let auth_api = middleware::security::with_security_headers(auth_api);

    Router::new()
        .route("/health", get(routes::health::health))
        .route("/api/openapi.json", get(routes::openapi::openapi_json))
        .merge(auth_api)
        .with_state(state)
        .layer(middleware::cors::auth_cors())
        .layer(TraceLayer::new_for_http())
}
