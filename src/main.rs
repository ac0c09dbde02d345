use axum::{
    routing::{get, post},
    Router,
};
use quiz_generator::{
    config::{get_config, init_config},
    routes, AppState,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
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
    init_tracing();
    init_config()?;
    let config = get_config()?;

    let app_state = AppState::new(config)?;
    info!(
        backend = config.model_backend.as_str(),
        format = ?config.response_format,
        bank = %config.question_bank_dir.display(),
        "Quiz generator configured"
    );

    if app_state.generation.check_availability().await {
        info!("Model backend is reachable");
    } else {
        tracing::warn!("Model backend is not reachable; requests will be served from the question bank");
    }

    let app = Router::new()
        .route("/health", get(routes::health::health))
        .route(
            "/api/quiz/availability",
            get(routes::quiz::availability),
        )
        .route(
            "/api/quiz/generate",
            post(routes::quiz::generate_questions),
        )
        .route("/api/quiz/build", post(routes::quiz::build_quiz))
        .route("/api/quiz/jobs", post(routes::quiz::enqueue_quiz_job))
        .route("/api/quiz/jobs/:id", get(routes::quiz::get_quiz_job))
        .with_state(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
