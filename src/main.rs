use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use essay_grader::agents::ProviderClient;
use essay_grader::db::{self, PgStore};
use essay_grader::pipeline::GradingOrchestrator;
use essay_grader::{config, routes, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "essay_grader=info,tower_http=info".into()),
        )
        .init();

    let config = config::Config::from_env()?;
    let config = Arc::new(config);

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(pool.as_ref()).await?;
    let store = PgStore::new(pool);

    let provider = ProviderClient::from_config(&config.provider, config.retry.clone())?;
    tracing::info!(
        "Grading with {} model {}",
        provider.provider_name(),
        provider.model()
    );

    let orchestrator = GradingOrchestrator::new(
        Arc::new(provider),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        config.grading.clone(),
    );

    let state = Arc::new(state::AppState {
        store,
        config: config.clone(),
        orchestrator: Arc::new(orchestrator),
    });

    let app = Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/grade/:attempt_id", post(routes::grade_attempt))
        .route("/api/results/:attempt_id", get(routes::get_result))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Essay grader listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
