use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode},
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower::util::ServiceExt;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod middleware;
mod routes;
mod services;
#[cfg(test)]
mod test_support;

use services::{
    builder::BuilderService,
    llm::{CompletionClient, OpenAiClient, UnconfiguredClient},
    storage::StorageService,
};

const TEMP_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "appforge_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::from_env();

    // Initialize database
    let db = db::Database::connect(&config.database_url).await?;
    db.run_migrations().await?;

    // Without a key every generation takes the template path
    let llm: Arc<dyn CompletionClient> = match &config.openai_api_key {
        Some(key) => Arc::new(OpenAiClient::new(
            key.clone(),
            config.openai_base_url.clone(),
            config.openai_model.clone(),
            config.llm_timeout_secs,
        )?),
        None => {
            tracing::warn!("OPENAI_API_KEY is not set; generation will use fallback templates");
            Arc::new(UnconfiguredClient)
        }
    };

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let state = AppState::new(db, config.clone(), llm, http);
    state.storage.init().await?;
    spawn_temp_cleanup(
        state.storage.clone(),
        Duration::from_secs(config.temp_file_max_age_hours * 60 * 60),
    );
    let app = build_app(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn spawn_temp_cleanup(storage: StorageService, max_age: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TEMP_CLEANUP_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(err) = storage.cleanup_temp(max_age).await {
                tracing::warn!("Temp file cleanup failed: {err}");
            }
        }
    });
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin {origin}");
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

pub fn build_app(state: AppState) -> Router {
    // Build protected routes (require authentication)
    let protected_routes = Router::new()
        .nest(
            "/projects",
            routes::projects::router()
                .merge(routes::generate::router())
                .merge(routes::snapshots::router())
                .merge(routes::deploy::router())
                .merge(routes::chat::project_router())
                .merge(routes::github::export_router())
                .merge(routes::assets::router())
                .merge(routes::analytics::router()),
        )
        .merge(routes::auth::protected_router())
        .nest("/chat", routes::chat::router())
        .nest("/github", routes::github::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    // Build API router
    let api_router = Router::new()
        .nest("/auth", routes::auth::router())
        .merge(protected_routes);

    let cors = cors_layer(&state.config.cors_origins);

    // Build main router with SPA fallback
    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_router)
        .fallback(serve_spa)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn serve_spa(State(state): State<AppState>, req: Request<Body>) -> Response {
    let static_dir = std::path::Path::new(&state.config.static_dir);

    if req.uri().path().starts_with("/api/") {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    }

    // Try to serve static file first
    let relative = req.uri().path().trim_start_matches('/');
    if !relative.is_empty() && static_dir.join(relative).is_file() {
        return match ServeDir::new(static_dir).oneshot(req).await {
            Ok(res) => res.into_response(),
            Err(err) => {
                tracing::error!("Failed to serve static file: {err}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        };
    }

    // For SPA routes, serve index.html
    match tokio::fs::read(static_dir.join("index.html")).await {
        Ok(contents) => (
            [(axum::http::header::CONTENT_TYPE, "text/html")],
            contents,
        )
            .into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: db::Database,
    pub config: config::Config,
    pub llm: Arc<dyn CompletionClient>,
    pub builder: Arc<BuilderService>,
    pub http: reqwest::Client,
    pub storage: StorageService,
}

impl AppState {
    pub fn new(
        db: db::Database,
        config: config::Config,
        llm: Arc<dyn CompletionClient>,
        http: reqwest::Client,
    ) -> Self {
        let builder = Arc::new(BuilderService::new(llm.clone(), config.openai_max_tokens));
        let storage = StorageService::new(config.storage_path.clone());
        Self {
            db,
            config,
            llm,
            builder,
            http,
            storage,
        }
    }
}
