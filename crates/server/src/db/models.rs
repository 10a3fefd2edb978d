use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub oauth_provider: Option<String>,
    #[serde(skip_serializing)]
    pub oauth_subject: Option<String>,
    pub picture: Option<String>,
    pub role: String,
    pub plan: String,
    pub team_id: Option<String>,
    pub created_at: String,
}

/// One generated source file. Projects and snapshots both hold an ordered
/// list of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub path: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub language: String,
}

impl ProjectFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let language = language_for_path(&path);
        Self {
            path,
            content: content.into(),
            language,
        }
    }
}

pub fn language_for_path(path: &str) -> String {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("js") | Some("jsx") | Some("mjs") => "javascript",
        Some("ts") | Some("tsx") => "typescript",
        Some("py") => "python",
        Some("css") => "css",
        Some("html") | Some("htm") => "html",
        Some("json") => "json",
        Some("md") => "markdown",
        Some("yml") | Some("yaml") => "yaml",
        Some("toml") => "toml",
        Some("example") | Some("env") => "env",
        Some(other) => return other.to_string(),
        None => "txt",
    }
    .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechStack {
    #[serde(default = "default_frontend")]
    pub frontend: String,
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_database")]
    pub database: String,
}

fn default_frontend() -> String {
    "React".to_string()
}

fn default_backend() -> String {
    "FastAPI".to_string()
}

fn default_database() -> String {
    "MongoDB".to_string()
}

impl Default for TechStack {
    fn default() -> Self {
        Self {
            frontend: default_frontend(),
            backend: default_backend(),
            database: default_database(),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectRow {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub prompt: String,
    pub tech_stack: String,
    pub files: String,
    pub status: String,
    pub last_restored_from: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub prompt: String,
    pub tech_stack: TechStack,
    pub files: Vec<ProjectFile>,
    pub status: String,
    pub last_restored_from: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<ProjectRow> for Project {
    type Error = crate::error::AppError;

    fn try_from(row: ProjectRow) -> Result<Self> {
        Ok(Self {
            tech_stack: serde_json::from_str(&row.tech_stack)?,
            files: serde_json::from_str(&row.files)?,
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            description: row.description,
            prompt: row.prompt,
            status: row.status,
            last_restored_from: row.last_restored_from,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SnapshotRow {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub files: String,
    pub content_hash: String,
    pub message: String,
    pub auto_created: bool,
    pub file_count: i64,
    pub total_size: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeploymentRow {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub platform: String,
    pub status: String,
    pub stages: String,
    pub config_files: String,
    pub created_at: String,
}
