use crate::api::{self, AppState};
use crate::config::ServerConfig;
use tokio::net::TcpListener;

/// Serve the API until ctrl-c
pub async fn serve(server: &ServerConfig, state: AppState) -> std::io::Result<()> {
    let app = api::router(state, server);

    let addr = format!("{}:{}", server.host, server.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Web server running at http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
