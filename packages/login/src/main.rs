use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::trace::TraceLayer;
use tower_sessions::cookie::SameSite;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};
use tracing_subscriber::EnvFilter;

use idp_login::http::router;
use idp_login::{Login, LoginConfig, MemoryStateStore, SourceMap};

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = LoginConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "invalid configuration");
        std::process::exit(1);
    });

    let sources = SourceMap::load(&config.authsources_file).unwrap_or_else(|e| {
        tracing::error!(
            path = %config.authsources_file.display(),
            error = %e,
            "failed to load authentication sources"
        );
        std::process::exit(1);
    });

    let state_store = Arc::new(MemoryStateStore::new(config.state_ttl));
    let purge_store = state_store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            match purge_store.purge_expired() {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "purged expired authentication state"),
                Err(e) => tracing::warn!(error = %e, "failed to purge authentication state"),
            }
        }
    });

    let base_path = config.base_path();
    let addr = config.listen_addr;
    let secure = config.session_secure;

    let controller = Login::new(config)
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to set up login controller");
            std::process::exit(1);
        })
        .with_state_store(state_store)
        .with_sources(Arc::new(sources));

    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_expiry(Expiry::OnInactivity(time::Duration::hours(8)))
        .with_same_site(SameSite::Lax)
        .with_http_only(true)
        .with_secure(secure);

    let routes = router(Arc::new(controller));
    let app = match base_path.trim_end_matches('/') {
        "" => routes,
        prefix => Router::new().nest(prefix, routes),
    };
    let app = app.layer(session_layer).layer(TraceLayer::new_for_http());

    tracing::info!("listening on {addr}, serving under {base_path}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to bind on {addr}");
            std::process::exit(1);
        });

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}
