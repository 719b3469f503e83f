// Web服务器模块

pub mod events;
pub mod handlers;
pub mod state;

pub use state::AppState;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// 组装路由
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthy", get(handlers::health::healthy))
        .route(
            "/api/tasks",
            post(handlers::task::create).get(handlers::task::list),
        )
        .route("/api/tasks/:id", get(handlers::task::get))
        .route("/api/tasks/:id/stop", post(handlers::task::stop))
        .route("/api/tasks/:id/log", get(handlers::task::log))
        .route(
            "/api/config",
            post(handlers::config::update).get(handlers::config::get),
        )
        .route("/api/events", get(handlers::event::stream))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// 启动 HTTP 服务并阻塞运行
pub async fn run(addr: &str, state: AppState) -> Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("监听地址失败: {}", addr))?;
    info!("HTTP 服务已启动: {}", addr);
    axum::serve(listener, router).await.context("HTTP 服务异常退出")?;
    Ok(())
}
