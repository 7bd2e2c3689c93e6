use axum::Router;
use std::net::SocketAddr;
use tower_http::services::ServeDir;
use tower_http::cors::{CorsLayer, Any};

use super::api::{AppState, create_api_router};

pub async fn start_web_server(
    state: AppState,
    port: u16,
    static_dir: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let api_router = create_api_router(state);

    // API under /api, dashboard assets for everything else
    let app = Router::new()
        .nest("/api", api_router)
        .fallback_service(ServeDir::new(static_dir))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Web server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .await
        .map_err(|e| format!("Server error: {}", e).into())
}
