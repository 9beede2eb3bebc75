use blockboard::config::Config;
use blockboard::services::room;
use blockboard::{routes, state};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    let template = config.load_template().await.expect("board template load failed");
    let port = config.port;
    tracing::info!(data_dir = %config.data_dir.display(), debounce_ms = config.save_debounce.as_millis(), "config loaded");

    let state = state::AppState::new(config, template);
    let app = routes::app(state.clone());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "blockboard listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server failed");

    let failures = room::flush_all(&state).await;
    if failures > 0 {
        tracing::error!(failures, "some boards failed to flush on shutdown");
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
