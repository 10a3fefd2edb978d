use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{
    db::{new_id, projects},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    services::storage::{self, AssetCategory, MAX_UPLOAD_BYTES},
    AppState,
};

const LIST_LIMIT: i64 = 100;

// Room for multipart framing around a maximum-size file
const BODY_LIMIT: usize = MAX_UPLOAD_BYTES + 64 * 1024;

const ASSET_COLUMNS: &str =
    "id, project_id, user_id, filename, stored_name, category, mime_type, size, uploaded_at";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:id/assets", get(list_assets).post(upload_assets))
        .route(
            "/:id/assets/:asset_id",
            get(get_asset).delete(delete_asset),
        )
        .route("/:id/assets/:asset_id/content", get(asset_content))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Asset {
    pub id: String,
    pub project_id: String,
    #[serde(skip_serializing)]
    pub user_id: String,
    pub filename: String,
    #[serde(skip_serializing)]
    pub stored_name: String,
    pub category: String,
    pub mime_type: String,
    pub size: i64,
    pub uploaded_at: String,
}

impl Asset {
    fn category(&self) -> Result<AssetCategory> {
        AssetCategory::parse(&self.category).ok_or_else(|| {
            AppError::Internal(format!("Unknown asset category {}", self.category))
        })
    }
}

#[derive(Debug, Serialize)]
pub struct AssetResponse {
    #[serde(flatten)]
    pub asset: Asset,
    pub url: String,
}

impl From<Asset> for AssetResponse {
    fn from(asset: Asset) -> Self {
        Self {
            url: format!(
                "/api/projects/{}/assets/{}/content",
                asset.project_id, asset.id
            ),
            asset,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub uploaded: Vec<AssetResponse>,
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AssetListResponse {
    pub assets: Vec<AssetResponse>,
}

#[derive(Debug, Deserialize)]
pub struct AssetListQuery {
    pub category: Option<String>,
}

async fn fetch_asset(pool: &SqlitePool, project_id: &str, asset_id: &str) -> Result<Asset> {
    sqlx::query_as::<_, Asset>(&format!(
        "SELECT {ASSET_COLUMNS} FROM assets WHERE project_id = ? AND id = ?"
    ))
    .bind(project_id)
    .bind(asset_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Asset not found".to_string()))
}

async fn upload_assets(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let project = projects::fetch_owned(&state.db.pool, &id, &user.id).await?;

    let mut uploaded = Vec::new();
    let mut errors = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read multipart field: {e}")))?
    {
        let Some(filename) = field.file_name().and_then(storage::sanitize_filename) else {
            errors.push("File field missing filename".to_string());
            continue;
        };

        let data = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                errors.push(format!("Failed to read file {filename}: {e}"));
                continue;
            }
        };

        if data.len() > MAX_UPLOAD_BYTES {
            errors.push(format!("File {filename} exceeds the upload size limit"));
            continue;
        }

        let asset_id = new_id("asset");
        let stored_name = storage::stored_name(&asset_id, &filename);
        let mime_type = storage::guess_mime(&filename);
        let category = AssetCategory::for_mime(&mime_type);

        if let Err(e) = state
            .storage
            .write_asset(category, &stored_name, &data)
            .await
        {
            errors.push(format!("Failed to store file {filename}: {e}"));
            continue;
        }

        let asset = Asset {
            id: asset_id,
            project_id: project.id.clone(),
            user_id: user.id.clone(),
            filename: filename.clone(),
            stored_name,
            category: category.as_str().to_string(),
            mime_type,
            size: data.len() as i64,
            uploaded_at: Utc::now().to_rfc3339(),
        };

        if let Err(e) = sqlx::query(
            "INSERT INTO assets (id, project_id, user_id, filename, stored_name, category, mime_type, size, uploaded_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&asset.id)
        .bind(&asset.project_id)
        .bind(&asset.user_id)
        .bind(&asset.filename)
        .bind(&asset.stored_name)
        .bind(&asset.category)
        .bind(&asset.mime_type)
        .bind(asset.size)
        .bind(&asset.uploaded_at)
        .execute(&state.db.pool)
        .await
        {
            errors.push(format!("Failed to record file {filename}: {e}"));
            // Drop the orphaned blob
            let _ = state.storage.delete_asset(category, &asset.stored_name).await;
            continue;
        }

        tracing::info!("Uploaded asset {filename} ({} bytes) to project {}", asset.size, project.id);
        uploaded.push(AssetResponse::from(asset));
    }

    if uploaded.is_empty() && errors.is_empty() {
        return Err(AppError::Validation("No files were uploaded".to_string()));
    }

    Ok(Json(UploadResponse { uploaded, errors }))
}

async fn list_assets(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Query(query): Query<AssetListQuery>,
) -> Result<Json<AssetListResponse>> {
    let project = projects::fetch_owned(&state.db.pool, &id, &user.id).await?;

    let category = match query.category.as_deref() {
        Some(value) => Some(AssetCategory::parse(value).ok_or_else(|| {
            AppError::Validation(format!("Unknown asset category {value}"))
        })?),
        None => None,
    };

    let assets = sqlx::query_as::<_, Asset>(&format!(
        "SELECT {ASSET_COLUMNS} FROM assets
         WHERE project_id = ? AND (? IS NULL OR category = ?)
         ORDER BY uploaded_at DESC, rowid DESC LIMIT ?"
    ))
    .bind(&project.id)
    .bind(category.map(|c| c.as_str()))
    .bind(category.map(|c| c.as_str()))
    .bind(LIST_LIMIT)
    .fetch_all(&state.db.pool)
    .await?
    .into_iter()
    .map(AssetResponse::from)
    .collect();

    Ok(Json(AssetListResponse { assets }))
}

async fn get_asset(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, asset_id)): Path<(String, String)>,
) -> Result<Json<AssetResponse>> {
    let project = projects::fetch_owned(&state.db.pool, &id, &user.id).await?;
    let asset = fetch_asset(&state.db.pool, &project.id, &asset_id).await?;
    Ok(Json(asset.into()))
}

async fn asset_content(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, asset_id)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let project = projects::fetch_owned(&state.db.pool, &id, &user.id).await?;
    let asset = fetch_asset(&state.db.pool, &project.id, &asset_id).await?;
    let data = state
        .storage
        .read_asset(asset.category()?, &asset.stored_name)
        .await?;

    // Header values must stay visible ASCII
    let display_name: String = asset
        .filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    Ok((
        [
            (header::CONTENT_TYPE, asset.mime_type),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{display_name}\""),
            ),
        ],
        data,
    ))
}

async fn delete_asset(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, asset_id)): Path<(String, String)>,
) -> Result<Json<()>> {
    let project = projects::fetch_owned(&state.db.pool, &id, &user.id).await?;
    let asset = fetch_asset(&state.db.pool, &project.id, &asset_id).await?;

    state
        .storage
        .delete_asset(asset.category()?, &asset.stored_name)
        .await?;
    sqlx::query("DELETE FROM assets WHERE id = ?")
        .bind(&asset.id)
        .execute(&state.db.pool)
        .await?;

    tracing::info!("Deleted asset {} from project {}", asset.id, project.id);
    Ok(Json(()))
}

/// Remove stored blobs for every asset of a project. Rows go with the
/// project through the cascade.
pub async fn purge_project_assets(state: &AppState, project_id: &str) -> Result<()> {
    let assets = sqlx::query_as::<_, Asset>(&format!(
        "SELECT {ASSET_COLUMNS} FROM assets WHERE project_id = ?"
    ))
    .bind(project_id)
    .fetch_all(&state.db.pool)
    .await?;

    for asset in assets {
        let removed = match asset.category() {
            Ok(category) => state.storage.delete_asset(category, &asset.stored_name).await,
            Err(e) => Err(e),
        };
        if let Err(e) = removed {
            tracing::warn!("Failed to remove asset {}: {e}", asset.id);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use crate::services::storage::AssetCategory;
    use crate::test_support::{multipart_request, request, send, send_text, TestApp};

    #[tokio::test]
    async fn test_upload_list_fetch_delete() {
        let app = TestApp::new().await;
        let token = app.register("a@b.c").await;
        let id = app.create_project(&token).await;
        let base = format!("/api/projects/{id}/assets");

        let (status, body) = send(
            &app.router,
            multipart_request(
                &base,
                &token,
                &[
                    ("logo.png", b"\x89PNG fake".as_slice()),
                    ("../notes.txt", b"hello".as_slice()),
                ],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["errors"].as_array().unwrap().is_empty());

        let uploaded = body["uploaded"].as_array().unwrap();
        assert_eq!(uploaded.len(), 2);
        assert_eq!(uploaded[0]["category"], "images");
        assert_eq!(uploaded[0]["mime_type"], "image/png");
        assert_eq!(uploaded[1]["filename"], "notes.txt");
        assert_eq!(uploaded[1]["category"], "documents");
        assert_eq!(uploaded[1]["size"], 5);
        assert!(uploaded[1].get("stored_name").is_none());

        let notes_url = uploaded[1]["url"].as_str().unwrap().to_string();
        let (status, text) =
            send_text(&app.router, request("GET", &notes_url, Some(&token), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, "hello");

        let (_, listed) = send(
            &app.router,
            request("GET", &format!("{base}?category=images"), Some(&token), None),
        )
        .await;
        let images = listed["assets"].as_array().unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0]["filename"], "logo.png");

        let notes_id = uploaded[1]["id"].as_str().unwrap();
        let (status, _) = send(
            &app.router,
            request("DELETE", &format!("{base}/{notes_id}"), Some(&token), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app.router, request("GET", &notes_url, Some(&token), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, listed) = send(&app.router, request("GET", &base, Some(&token), None)).await;
        assert_eq!(listed["assets"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_assets_are_scoped_to_the_owner() {
        let app = TestApp::new().await;
        let owner = app.register("owner@b.c").await;
        let other = app.register("other@b.c").await;
        let id = app.create_project(&owner).await;

        let (status, _) = send(
            &app.router,
            multipart_request(
                &format!("/api/projects/{id}/assets"),
                &other,
                &[("a.txt", b"x".as_slice())],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_category_filter_is_rejected() {
        let app = TestApp::new().await;
        let token = app.register("a@b.c").await;
        let id = app.create_project(&token).await;

        let (status, _) = send(
            &app.router,
            request(
                "GET",
                &format!("/api/projects/{id}/assets?category=temp"),
                Some(&token),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_deleting_project_removes_blobs() {
        let app = TestApp::new().await;
        let token = app.register("a@b.c").await;
        let id = app.create_project(&token).await;

        let (_, body) = send(
            &app.router,
            multipart_request(
                &format!("/api/projects/{id}/assets"),
                &token,
                &[("clip.mp4", b"frames".as_slice())],
            ),
        )
        .await;
        assert_eq!(body["uploaded"][0]["category"], "media");

        let stored: (String,) = sqlx::query_as("SELECT stored_name FROM assets")
            .fetch_one(&app.state.db.pool)
            .await
            .unwrap();
        let path = app
            .state
            .storage
            .asset_path(AssetCategory::Media, &stored.0);
        assert!(path.is_file());

        let (status, _) = send(
            &app.router,
            request("DELETE", &format!("/api/projects/{id}"), Some(&token), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(!path.exists());
    }
}
