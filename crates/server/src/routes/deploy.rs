use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    db::{models::DeploymentRow, new_id, projects},
    error::Result,
    middleware::auth::AuthUser,
    services::{
        analytics,
        deploy::{self, DeploymentPlan, Platform, StageReport},
    },
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:id/deploy", post(deploy_project))
        .route("/:id/deployments", get(list_deployments))
}

#[derive(Debug, Deserialize)]
pub struct DeployQuery {
    #[serde(default)]
    pub platform: Platform,
}

#[derive(Debug, Serialize)]
pub struct DeploymentRecord {
    pub id: String,
    pub project_id: String,
    pub platform: String,
    pub status: String,
    pub stages: Vec<StageReport>,
    pub config_files: Vec<String>,
    pub created_at: String,
}

impl TryFrom<DeploymentRow> for DeploymentRecord {
    type Error = crate::error::AppError;

    fn try_from(row: DeploymentRow) -> Result<Self> {
        Ok(Self {
            stages: serde_json::from_str(&row.stages)?,
            config_files: serde_json::from_str(&row.config_files)?,
            id: row.id,
            project_id: row.project_id,
            platform: row.platform,
            status: row.status,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct DeployResponse {
    pub deployment_id: String,
    #[serde(flatten)]
    pub plan: DeploymentPlan,
}

async fn deploy_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Query(query): Query<DeployQuery>,
) -> Result<Json<DeployResponse>> {
    let project = projects::fetch_owned(&state.db.pool, &id, &user.id).await?;
    let plan = deploy::prepare(&project.files, query.platform, &project.name);

    let deployment_id = new_id("deploy");
    sqlx::query(
        "INSERT INTO deployments (id, project_id, user_id, platform, status, stages, config_files, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&deployment_id)
    .bind(&project.id)
    .bind(&user.id)
    .bind(plan.platform.as_str())
    .bind(&plan.status)
    .bind(serde_json::to_string(&plan.stages)?)
    .bind(serde_json::to_string(&plan.added_files)?)
    .bind(Utc::now().to_rfc3339())
    .execute(&state.db.pool)
    .await?;

    tracing::info!(
        "Deployment {deployment_id} for project {} is {}",
        project.id,
        plan.status
    );

    if let Err(err) = analytics::track_event(
        &state.db.pool,
        &project.id,
        "deployment",
        &json!({"deployment_id": deployment_id, "platform": plan.platform.as_str(), "status": plan.status}),
        Some(&user.id),
    )
    .await
    {
        tracing::warn!("Failed to track deployment {deployment_id}: {err}");
    }

    Ok(Json(DeployResponse {
        deployment_id,
        plan,
    }))
}

#[derive(Debug, Serialize)]
pub struct DeploymentListResponse {
    pub deployments: Vec<DeploymentRecord>,
}

async fn list_deployments(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<DeploymentListResponse>> {
    let project = projects::fetch_owned(&state.db.pool, &id, &user.id).await?;

    let deployments = sqlx::query_as::<_, DeploymentRow>(
        "SELECT id, project_id, user_id, platform, status, stages, config_files, created_at
         FROM deployments WHERE project_id = ? ORDER BY created_at DESC, rowid DESC",
    )
    .bind(&project.id)
    .fetch_all(&state.db.pool)
    .await?
    .into_iter()
    .map(DeploymentRecord::try_from)
    .collect::<Result<Vec<_>>>()?;

    Ok(Json(DeploymentListResponse { deployments }))
}
