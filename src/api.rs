use axum::{
    extract::{Query, State},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::ApiError;
use crate::models::{format_latency, MonitorState};

#[derive(Debug, Deserialize)]
pub struct SiteQuery {
    pub name: Option<String>,
}

pub async fn get_site(
    State(state): State<Arc<MonitorState>>,
    Query(query): Query<SiteQuery>,
) -> Result<String, ApiError> {
    let name = query.name.ok_or(ApiError::MissingParameter("name"))?;
    let site = state
        .find_by_name(&name)
        .await
        .ok_or(ApiError::NotFound("site not monitored"))?;
    state.requests.increment("/site").await;
    Ok(format!(
        "Site: {}, Availability: {}, Response Time: {}",
        site.url,
        site.available,
        format_latency(site.latency)
    ))
}

pub async fn get_min(State(state): State<Arc<MonitorState>>) -> Result<String, ApiError> {
    let site = state
        .min_latency()
        .await
        .ok_or(ApiError::NotFound("no available sites"))?;
    state.requests.increment("/min").await;
    Ok(format!(
        "Site with minimum response time: {}, Response Time: {}",
        site.url,
        format_latency(site.latency)
    ))
}

pub async fn get_max(State(state): State<Arc<MonitorState>>) -> Result<String, ApiError> {
    let site = state
        .max_latency()
        .await
        .ok_or(ApiError::NotFound("no available sites"))?;
    state.requests.increment("/max").await;
    Ok(format!(
        "Site with maximum response time: {}, Response Time: {}",
        site.url,
        format_latency(site.latency)
    ))
}

pub async fn get_stats(State(state): State<Arc<MonitorState>>) -> String {
    let mut body = String::from("Request statistics:\n");
    for (route, count) in state.requests.snapshot().await {
        let _ = writeln!(body, "{}: {}", route, count);
    }
    body
}

pub fn create_router(state: Arc<MonitorState>) -> Router {
    Router::new()
        .route("/site", get(get_site))
        .route("/min", get(get_min))
        .route("/max", get(get_max))
        .route("/stats", get(get_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(port: u16, state: Arc<MonitorState>) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://localhost:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}
