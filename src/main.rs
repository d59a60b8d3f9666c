// [library] Error handling crate - `Result<T>` is `Result<T, anyhow::Error>` for the binary
use anyhow::Result;

// [library] HTTP utilities from axum web framework
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE}, // [business] Headers the token and admin endpoints accept
    HeaderName,
    HeaderValue,
    Method,
};

use iara::{config::Config, db, web};

// [library] Tower ecosystem - middleware and service abstractions for HTTP servers
use tower_http::{
    cors::CorsLayer,       // [security] Cross-Origin Resource Sharing middleware
    timeout::TimeoutLayer, // [business] Bounds the time spent on any one request
    trace::TraceLayer,     // [library] HTTP request/response logging middleware
};

// [library] Structured logging framework
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            // [library] RUST_LOG overrides the default filter
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("iara=info,tower_http=debug")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Iara - OAuth2 token service");

    // [business] Fail fast on invalid configuration
    let config = Config::from_env()?;
    let bind_address = config.bind_address();
    let request_timeout = config.request_timeout;

    info!("Connecting to storage...");
    let db = db::connect(config.database_url()).await?;
    info!("Storage ready");

    if config.admin_api_key().is_none() {
        info!("ADMIN_API_KEY not set; administration routes are disabled");
    }

    // [security] tower-http CorsLayer requires HeaderValue origins, invalid entries are skipped
    let allowed_origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let app = web::create_app_router(db, config)
        .layer(
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    ACCEPT,
                    AUTHORIZATION,
                    CONTENT_TYPE,
                    HeaderName::from_static("x-api-key"),
                ]),
        )
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http());

    info!("Server starting on {}", bind_address);
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

// [rust] Resolves on Ctrl+C so in-flight requests can finish before exit
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
