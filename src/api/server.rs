use anyhow::Result;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::api::handlers;
use crate::engine::Dispatcher;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/tasks", post(handlers::submit_task))
        .route("/tasks/history", delete(handlers::reset_history))
        .route("/agents", get(handlers::list_agents))
        .layer(CorsLayer::permissive())
        .with_state(state.dispatcher)
}

pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    log::info!("Wayfarer API server listening on port {}", port);

    axum::serve(listener, app).await?;
    Ok(())
}
