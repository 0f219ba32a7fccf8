use std::net::SocketAddr;
use std::sync::Arc;

use identity_backend::{
    build_router,
    config::Config,
    database::{pool::create_pool, postgres::PgIdentityStore},
    utils::assertion::JwtAssertionVerifier,
    AppState,
};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let config = Config::from_env()?;

    let pool = create_pool(&config).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let verifier = Arc::new(JwtAssertionVerifier::from_config(&config)?);
    let store = Arc::new(PgIdentityStore::new(pool));
    let state = AppState::new(verifier, store, config.audit_signing_key.clone())
        .trust_forwarded_for(config.trust_proxy_headers);

    {
        let mut failures = state.identity_service.audit().subscribe_failures();
        tokio::spawn(async move {
            while let Ok(failure) = failures.recv().await {
                tracing::error!(
                    record_id = %failure.record_id,
                    action = %failure.action,
                    error = %failure.error,
                    "Audit record lost"
                );
            }
        });
    }

    let app = build_router(state, config.auth_rps);

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
