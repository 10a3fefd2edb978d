use chrono::Utc;
use sqlx::SqlitePool;

use super::models::{Project, ProjectFile, ProjectRow, TechStack};
use crate::error::{AppError, Result};

const PROJECT_COLUMNS: &str = "id, user_id, name, description, prompt, tech_stack, files, status, last_restored_from, created_at, updated_at";

pub struct NewProject<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub name: &'a str,
    pub description: &'a str,
    pub prompt: &'a str,
    pub tech_stack: &'a TechStack,
    pub files: &'a [ProjectFile],
}

pub async fn insert(pool: &SqlitePool, project: NewProject<'_>) -> Result<Project> {
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO projects (id, user_id, name, description, prompt, tech_stack, files, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, 'active', ?, ?)",
    )
    .bind(project.id)
    .bind(project.user_id)
    .bind(project.name)
    .bind(project.description)
    .bind(project.prompt)
    .bind(serde_json::to_string(project.tech_stack)?)
    .bind(serde_json::to_string(project.files)?)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    fetch_owned(pool, project.id, project.user_id).await
}

/// Projects are private to their owner; anything else reads as missing.
pub async fn fetch_owned(pool: &SqlitePool, project_id: &str, user_id: &str) -> Result<Project> {
    let row = sqlx::query_as::<_, ProjectRow>(&format!(
        "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ? AND user_id = ?"
    ))
    .bind(project_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Project not found".to_string()))?;

    row.try_into()
}

pub async fn list_for_user(pool: &SqlitePool, user_id: &str, limit: i64) -> Result<Vec<Project>> {
    let rows = sqlx::query_as::<_, ProjectRow>(&format!(
        "SELECT {PROJECT_COLUMNS} FROM projects WHERE user_id = ? ORDER BY updated_at DESC LIMIT ?"
    ))
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Project::try_from).collect()
}

pub async fn replace_files(
    pool: &SqlitePool,
    project_id: &str,
    files: &[ProjectFile],
    restored_from: Option<&str>,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();

    let result = sqlx::query(
        "UPDATE projects SET files = ?, updated_at = ?, last_restored_from = COALESCE(?, last_restored_from) WHERE id = ?",
    )
    .bind(serde_json::to_string(files)?)
    .bind(&now)
    .bind(restored_from)
    .bind(project_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Project not found".to_string()));
    }
    Ok(())
}

pub async fn delete(pool: &SqlitePool, project_id: &str) -> Result<()> {
    // Snapshots and deployment records cascade
    sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(project_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Insert or replace the file at `path`, keeping list order stable.
pub fn upsert_file(files: &mut Vec<ProjectFile>, path: &str, content: String) {
    match files.iter_mut().find(|f| f.path == path) {
        Some(existing) => existing.content = content,
        None => files.push(ProjectFile::new(path, content)),
    }
}
