use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    db::projects,
    error::{AppError, Result},
    middleware::auth::AuthUser,
    services::analytics::{self, Dashboard, PerformanceReport, ProjectAnalytics},
    AppState,
};

const MAX_DAYS: i64 = 365;
const MAX_HOURS: i64 = 24 * 30;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:id/analytics", get(project_analytics))
        .route("/:id/analytics/events", post(track_event))
        .route(
            "/:id/analytics/metrics",
            get(performance_metrics).post(track_metric),
        )
        .route("/:id/analytics/dashboard", get(dashboard))
}

#[derive(Debug, Deserialize)]
pub struct TrackEventRequest {
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TrackMetricRequest {
    pub metric_name: String,
    pub value: f64,
    #[serde(default = "default_unit")]
    pub unit: String,
}

fn default_unit() -> String {
    "ms".to_string()
}

#[derive(Debug, Serialize)]
pub struct TrackedResponse {
    pub tracked: bool,
}

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    pub metric_name: Option<String>,
    pub hours: Option<i64>,
}

async fn track_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<TrackEventRequest>,
) -> Result<Json<TrackedResponse>> {
    let project = projects::fetch_owned(&state.db.pool, &id, &user.id).await?;

    let event_type = body.event_type.trim();
    if event_type.is_empty() {
        return Err(AppError::Validation("Event type is required".to_string()));
    }
    let data = match body.data {
        Value::Null => Value::Object(Default::default()),
        data => data,
    };

    analytics::track_event(
        &state.db.pool,
        &project.id,
        event_type,
        &data,
        body.user_id.as_deref(),
    )
    .await?;

    Ok(Json(TrackedResponse { tracked: true }))
}

async fn project_analytics(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<ProjectAnalytics>> {
    let project = projects::fetch_owned(&state.db.pool, &id, &user.id).await?;

    let days = query.days.unwrap_or(30).clamp(1, MAX_DAYS);
    let end = Utc::now();
    let report =
        analytics::project_analytics(&state.db.pool, &project.id, end - Duration::days(days), end)
            .await?;

    Ok(Json(report))
}

async fn track_metric(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<TrackMetricRequest>,
) -> Result<Json<TrackedResponse>> {
    let project = projects::fetch_owned(&state.db.pool, &id, &user.id).await?;

    let metric_name = body.metric_name.trim();
    if metric_name.is_empty() {
        return Err(AppError::Validation("Metric name is required".to_string()));
    }
    if !body.value.is_finite() {
        return Err(AppError::Validation("Metric value must be finite".to_string()));
    }

    analytics::track_metric(
        &state.db.pool,
        &project.id,
        metric_name,
        body.value,
        body.unit.trim(),
    )
    .await?;

    Ok(Json(TrackedResponse { tracked: true }))
}

async fn performance_metrics(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<PerformanceReport>> {
    let project = projects::fetch_owned(&state.db.pool, &id, &user.id).await?;

    let hours = query.hours.unwrap_or(24).clamp(1, MAX_HOURS);
    let metric_name = query
        .metric_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());
    let report =
        analytics::performance_metrics(&state.db.pool, &project.id, metric_name, hours).await?;

    Ok(Json(report))
}

async fn dashboard(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Dashboard>> {
    let project = projects::fetch_owned(&state.db.pool, &id, &user.id).await?;
    Ok(Json(analytics::dashboard(&state.db.pool, &project.id).await?))
}
