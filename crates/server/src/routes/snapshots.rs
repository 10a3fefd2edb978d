use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    db::projects,
    error::Result,
    middleware::auth::AuthUser,
    services::snapshots::{self, CreatedSnapshot, RestoreOutcome, Snapshot, SnapshotDiff, SnapshotSummary},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:id/snapshots", get(list_snapshots).post(create_snapshot))
        .route("/:id/snapshots/:snapshot_id", get(get_snapshot))
        .route("/:id/snapshots/:snapshot_id/restore", post(restore_snapshot))
        .route(
            "/:id/snapshots/:snapshot_id/compare/:other_id",
            get(compare_snapshots),
        )
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SnapshotListResponse {
    pub snapshots: Vec<SnapshotSummary>,
}

async fn list_snapshots(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<SnapshotListResponse>> {
    let project = projects::fetch_owned(&state.db.pool, &id, &user.id).await?;
    let limit = query.limit.unwrap_or(snapshots::MAX_LIST_LIMIT);
    let snapshots = snapshots::list_snapshots(&state.db.pool, &project.id, limit).await?;
    Ok(Json(SnapshotListResponse { snapshots }))
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSnapshotRequest {
    pub message: Option<String>,
}

async fn create_snapshot(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    body: Option<Json<CreateSnapshotRequest>>,
) -> Result<Json<CreatedSnapshot>> {
    let Json(body) = body.unwrap_or_default();
    let project = projects::fetch_owned(&state.db.pool, &id, &user.id).await?;

    let created = snapshots::create_snapshot(
        &state.db.pool,
        &project.id,
        &user.id,
        &project.files,
        body.message.as_deref(),
        false,
    )
    .await?;

    Ok(Json(created))
}

async fn get_snapshot(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, snapshot_id)): Path<(String, String)>,
) -> Result<Json<Snapshot>> {
    let project = projects::fetch_owned(&state.db.pool, &id, &user.id).await?;
    Ok(Json(
        snapshots::get_snapshot(&state.db.pool, &project.id, &snapshot_id).await?,
    ))
}

async fn restore_snapshot(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, snapshot_id)): Path<(String, String)>,
) -> Result<Json<RestoreOutcome>> {
    let project = projects::fetch_owned(&state.db.pool, &id, &user.id).await?;
    let outcome =
        snapshots::restore_snapshot(&state.db.pool, &project.id, &snapshot_id, &user.id).await?;
    snapshots::prune_auto_snapshots(&state.db.pool, &project.id, state.config.snapshot_keep)
        .await?;
    Ok(Json(outcome))
}

async fn compare_snapshots(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, snapshot_id, other_id)): Path<(String, String, String)>,
) -> Result<Json<SnapshotDiff>> {
    let project = projects::fetch_owned(&state.db.pool, &id, &user.id).await?;
    Ok(Json(
        snapshots::compare_snapshots(&state.db.pool, &project.id, &snapshot_id, &other_id).await?,
    ))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::test_support::{request, send, TestApp};

    #[tokio::test]
    async fn test_snapshot_lifecycle() {
        let app = TestApp::new().await;
        let token = app.register("a@b.c").await;

        let (_, project) = send(
            &app.router,
            request(
                "POST",
                "/api/projects",
                Some(&token),
                Some(json!({"name": "Demo", "files": [{"path": "a.js", "content": "one"}]})),
            ),
        )
        .await;
        let id = project["id"].as_str().unwrap();
        let base = format!("/api/projects/{id}/snapshots");

        let (status, first) = send(
            &app.router,
            request("POST", &base, Some(&token), Some(json!({"message": "v1"}))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["is_new"], true);
        assert_eq!(first["message"], "v1");
        let first_id = first["id"].as_str().unwrap().to_string();

        // No body falls back to the default message; identical content is a no-op
        let (_, again) = send(&app.router, request("POST", &base, Some(&token), None)).await;
        assert_eq!(again["is_new"], false);
        assert_eq!(again["id"], first_id.as_str());

        send(
            &app.router,
            request(
                "PUT",
                &format!("/api/projects/{id}/files"),
                Some(&token),
                Some(json!({"path": "a.js", "content": "two"})),
            ),
        )
        .await;

        let (_, listed) = send(&app.router, request("GET", &base, Some(&token), None)).await;
        let snapshots = listed["snapshots"].as_array().unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0]["auto_created"], true);
        assert!(snapshots[0].get("files").is_none());
        let latest_id = snapshots[0]["id"].as_str().unwrap().to_string();

        let (_, diff) = send(
            &app.router,
            request(
                "GET",
                &format!("{base}/{first_id}/compare/{latest_id}"),
                Some(&token),
                None,
            ),
        )
        .await;
        assert_eq!(diff["modified"], json!(["a.js"]));
        assert_eq!(diff["total_changes"], 1);

        let (status, restored) = send(
            &app.router,
            request("POST", &format!("{base}/{first_id}/restore"), Some(&token), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(restored["restored_from"], first_id.as_str());

        let (_, project) = send(
            &app.router,
            request("GET", &format!("/api/projects/{id}"), Some(&token), None),
        )
        .await;
        assert_eq!(project["files"][0]["content"], "one");
        assert_eq!(project["last_restored_from"], first_id.as_str());

        let (_, full) = send(
            &app.router,
            request("GET", &format!("{base}/{first_id}"), Some(&token), None),
        )
        .await;
        assert_eq!(full["files"][0]["content"], "one");
    }

    #[tokio::test]
    async fn test_unknown_snapshot_is_not_found() {
        let app = TestApp::new().await;
        let token = app.register("a@b.c").await;
        let (_, project) = send(
            &app.router,
            request("POST", "/api/projects", Some(&token), Some(json!({"name": "Demo"}))),
        )
        .await;
        let id = project["id"].as_str().unwrap();

        let (status, _) = send(
            &app.router,
            request(
                "POST",
                &format!("/api/projects/{id}/snapshots/snap_missing/restore"),
                Some(&token),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
