use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    db::{
        models::{Project, ProjectFile, TechStack},
        new_id,
        projects::{self, NewProject},
    },
    error::{AppError, Result},
    middleware::auth::AuthUser,
    routes::assets,
    services::{
        quality::{self, QualityReport},
        snapshots,
    },
    AppState,
};

const LIST_LIMIT: i64 = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_projects).post(create_project))
        .route("/:id", get(get_project).delete(delete_project))
        .route(
            "/:id/files",
            get(list_files).put(upsert_file).delete(delete_file),
        )
        .route("/:id/export", get(export_project))
        .route("/:id/quality", get(quality_report))
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub tech_stack: TechStack,
    #[serde(default)]
    pub files: Vec<ProjectFile>,
}

#[derive(Debug, Serialize)]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: String,
    pub tech_stack: TechStack,
    pub file_count: usize,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Project> for ProjectSummary {
    fn from(project: Project) -> Self {
        Self {
            file_count: project.files.len(),
            id: project.id,
            name: project.name,
            description: project.description,
            status: project.status,
            tech_stack: project.tech_stack,
            created_at: project.created_at,
            updated_at: project.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProjectListResponse {
    pub projects: Vec<ProjectSummary>,
}

async fn list_projects(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ProjectListResponse>> {
    let projects = projects::list_for_user(&state.db.pool, &user.id, LIST_LIMIT)
        .await?
        .into_iter()
        .map(ProjectSummary::from)
        .collect();

    Ok(Json(ProjectListResponse { projects }))
}

async fn create_project(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateProjectRequest>,
) -> Result<Json<Project>> {
    if body.name.trim().is_empty() {
        return Err(AppError::Validation("Project name is required".to_string()));
    }
    if body.files.iter().any(|f| f.path.trim().is_empty()) {
        return Err(AppError::Validation("File path is required".to_string()));
    }

    let files: Vec<ProjectFile> = body
        .files
        .into_iter()
        .map(|f| ProjectFile::new(f.path, f.content))
        .collect();

    let project_id = new_id("proj");
    let project = projects::insert(
        &state.db.pool,
        NewProject {
            id: &project_id,
            user_id: &user.id,
            name: body.name.trim(),
            description: &body.description,
            prompt: &body.prompt,
            tech_stack: &body.tech_stack,
            files: &files,
        },
    )
    .await?;

    Ok(Json(project))
}

async fn get_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Project>> {
    Ok(Json(projects::fetch_owned(&state.db.pool, &id, &user.id).await?))
}

async fn delete_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<()>> {
    let project = projects::fetch_owned(&state.db.pool, &id, &user.id).await?;
    assets::purge_project_assets(&state, &project.id).await?;
    projects::delete(&state.db.pool, &project.id).await?;
    tracing::info!("Deleted project {}", project.id);
    Ok(Json(()))
}

async fn list_files(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<ProjectFile>>> {
    let project = projects::fetch_owned(&state.db.pool, &id, &user.id).await?;
    Ok(Json(project.files))
}

#[derive(Debug, Deserialize)]
pub struct UpsertFileRequest {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct FileChangeResponse {
    pub path: String,
    pub file_count: usize,
    pub snapshot_id: Option<String>,
}

async fn upsert_file(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<UpsertFileRequest>,
) -> Result<Json<FileChangeResponse>> {
    let path = body.path.trim().trim_start_matches("./");
    if path.is_empty() {
        return Err(AppError::Validation("File path is required".to_string()));
    }

    let mut project = projects::fetch_owned(&state.db.pool, &id, &user.id).await?;
    projects::upsert_file(&mut project.files, path, body.content);
    projects::replace_files(&state.db.pool, &project.id, &project.files, None).await?;

    let snapshot_id = snapshots::auto_snapshot_on_change(
        &state.db.pool,
        &project.id,
        &user.id,
        &project.files,
        state.config.snapshot_keep,
    )
    .await?;

    Ok(Json(FileChangeResponse {
        path: path.to_string(),
        file_count: project.files.len(),
        snapshot_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct FilePathQuery {
    pub path: String,
}

async fn delete_file(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Query(query): Query<FilePathQuery>,
) -> Result<Json<FileChangeResponse>> {
    let mut project = projects::fetch_owned(&state.db.pool, &id, &user.id).await?;

    let before = project.files.len();
    project.files.retain(|f| f.path != query.path);
    if project.files.len() == before {
        return Err(AppError::NotFound("File not found".to_string()));
    }

    projects::replace_files(&state.db.pool, &project.id, &project.files, None).await?;
    let snapshot_id = snapshots::auto_snapshot_on_change(
        &state.db.pool,
        &project.id,
        &user.id,
        &project.files,
        state.config.snapshot_keep,
    )
    .await?;

    Ok(Json(FileChangeResponse {
        path: query.path,
        file_count: project.files.len(),
        snapshot_id,
    }))
}

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub project_id: String,
    pub name: String,
    pub tech_stack: TechStack,
    pub file_count: usize,
    pub files: Vec<ProjectFile>,
}

async fn export_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ExportResponse>> {
    let project = projects::fetch_owned(&state.db.pool, &id, &user.id).await?;
    Ok(Json(ExportResponse {
        project_id: project.id,
        name: project.name,
        tech_stack: project.tech_stack,
        file_count: project.files.len(),
        files: project.files,
    }))
}

async fn quality_report(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<QualityReport>> {
    let project = projects::fetch_owned(&state.db.pool, &id, &user.id).await?;
    Ok(Json(quality::inspect(&project.files)))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::test_support::{request, send, TestApp};

    async fn create(app: &TestApp, token: &str) -> String {
        let (status, body) = send(
            &app.router,
            request(
                "POST",
                "/api/projects",
                Some(token),
                Some(json!({
                    "name": "Demo",
                    "files": [{"path": "frontend/src/App.js", "content": "export default () => null;"}]
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_create_list_get_delete() {
        let app = TestApp::new().await;
        let token = app.register("a@b.c").await;
        let id = create(&app, &token).await;

        let (_, body) = send(&app.router, request("GET", "/api/projects", Some(&token), None)).await;
        assert_eq!(body["projects"][0]["id"], id.as_str());
        assert_eq!(body["projects"][0]["file_count"], 1);

        let (_, body) = send(
            &app.router,
            request("GET", &format!("/api/projects/{id}"), Some(&token), None),
        )
        .await;
        assert_eq!(body["files"][0]["language"], "javascript");
        assert_eq!(body["tech_stack"]["backend"], "FastAPI");

        let (status, _) = send(
            &app.router,
            request("DELETE", &format!("/api/projects/{id}"), Some(&token), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            &app.router,
            request("GET", &format!("/api/projects/{id}"), Some(&token), None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_projects_are_private() {
        let app = TestApp::new().await;
        let owner = app.register("owner@b.c").await;
        let other = app.register("other@b.c").await;
        let id = create(&app, &owner).await;

        let (status, _) = send(
            &app.router,
            request("GET", &format!("/api/projects/{id}"), Some(&other), None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app.router,
            request("DELETE", &format!("/api/projects/{id}"), Some(&other), None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_file_upsert_snapshots_and_delete() {
        let app = TestApp::new().await;
        let token = app.register("a@b.c").await;
        let id = create(&app, &token).await;
        let files_uri = format!("/api/projects/{id}/files");

        let (status, body) = send(
            &app.router,
            request(
                "PUT",
                &files_uri,
                Some(&token),
                Some(json!({"path": "backend/Dockerfile", "content": "FROM python"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["file_count"], 2);
        assert!(body["snapshot_id"].is_string());

        // Same content again is not a change
        let (_, body) = send(
            &app.router,
            request(
                "PUT",
                &files_uri,
                Some(&token),
                Some(json!({"path": "backend/Dockerfile", "content": "FROM python"})),
            ),
        )
        .await;
        assert!(body["snapshot_id"].is_null());

        let (_, files) = send(&app.router, request("GET", &files_uri, Some(&token), None)).await;
        assert_eq!(files[1]["language"], "txt");

        let (status, body) = send(
            &app.router,
            request(
                "DELETE",
                &format!("{files_uri}?path=backend/Dockerfile"),
                Some(&token),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["file_count"], 1);

        let (status, _) = send(
            &app.router,
            request("DELETE", &format!("{files_uri}?path=nope.js"), Some(&token), None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_export_and_quality() {
        let app = TestApp::new().await;
        let token = app.register("a@b.c").await;
        let id = create(&app, &token).await;

        let (_, body) = send(
            &app.router,
            request("GET", &format!("/api/projects/{id}/export"), Some(&token), None),
        )
        .await;
        assert_eq!(body["name"], "Demo");
        assert_eq!(body["file_count"], 1);

        let (status, body) = send(
            &app.router,
            request("GET", &format!("/api/projects/{id}/quality"), Some(&token), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_checks"], 4);
    }

    #[tokio::test]
    async fn test_create_requires_name() {
        let app = TestApp::new().await;
        let token = app.register("a@b.c").await;
        let (status, _) = send(
            &app.router,
            request("POST", "/api/projects", Some(&token), Some(json!({"name": "  "}))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
