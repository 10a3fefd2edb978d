use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::Deserialize;

use crate::{
    db::projects,
    error::{AppError, Result},
    middleware::auth::AuthUser,
    services::github::{parse_repo, GitHubPusher, PushReport, PushTarget},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/push", post(push))
}

/// Mounted under `/projects`.
pub fn export_router() -> Router<AppState> {
    Router::new().route("/:id/export/github", post(export_to_github))
}

#[derive(Debug, Deserialize)]
pub struct GitHubExportRequest {
    pub repo: String,
    pub token: String,
    pub branch: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PushRequest {
    pub project_id: String,
    #[serde(flatten)]
    pub export: GitHubExportRequest,
}

async fn push_project(
    state: &AppState,
    user: &AuthUser,
    project_id: &str,
    request: GitHubExportRequest,
) -> Result<PushReport> {
    let (owner, repo) = parse_repo(&request.repo)
        .ok_or_else(|| AppError::Validation("Repository must look like owner/name".to_string()))?;
    if request.token.trim().is_empty() {
        return Err(AppError::Validation("GitHub token is required".to_string()));
    }

    let project = projects::fetch_owned(&state.db.pool, project_id, &user.id).await?;
    if project.files.is_empty() {
        return Err(AppError::BadRequest("Project has no files to push".to_string()));
    }

    let message = request
        .message
        .unwrap_or_else(|| format!("Update {} from appforge", project.name));
    let target = PushTarget {
        owner,
        repo,
        token: request.token.trim(),
        branch: request.branch.as_deref().unwrap_or("main"),
        message: &message,
    };

    let pusher = GitHubPusher::new(state.http.clone(), state.config.github_api_url.clone());
    Ok(pusher.push(&target, &project.files).await)
}

async fn push(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<PushRequest>,
) -> Result<Json<PushReport>> {
    Ok(Json(
        push_project(&state, &user, &body.project_id, body.export).await?,
    ))
}

async fn export_to_github(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<GitHubExportRequest>,
) -> Result<Json<PushReport>> {
    Ok(Json(push_project(&state, &user, &id, body).await?))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::test_support::{request, send, TestApp};

    #[tokio::test]
    async fn test_push_validates_repo_before_network() {
        let app = TestApp::new().await;
        let token = app.register("a@b.c").await;
        let (_, project) = send(
            &app.router,
            request(
                "POST",
                "/api/projects",
                Some(&token),
                Some(json!({"name": "Demo", "files": [{"path": "a.js", "content": "x"}]})),
            ),
        )
        .await;
        let id = project["id"].as_str().unwrap();

        let (status, body) = send(
            &app.router,
            request(
                "POST",
                "/api/github/push",
                Some(&token),
                Some(json!({"project_id": id, "repo": "not-a-repo", "token": "ghp_x"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Repository must look like owner/name");

        let (status, _) = send(
            &app.router,
            request(
                "POST",
                &format!("/api/projects/{id}/export/github"),
                Some(&token),
                Some(json!({"repo": "octo/app", "token": " "})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_push_unknown_project() {
        let app = TestApp::new().await;
        let token = app.register("a@b.c").await;
        let (status, _) = send(
            &app.router,
            request(
                "POST",
                "/api/github/push",
                Some(&token),
                Some(json!({"project_id": "proj_missing", "repo": "octo/app", "token": "ghp_x"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
