use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::db::models::{ProjectFile, SnapshotRow};
use crate::db::projects;
use crate::error::{AppError, Result};

pub const MAX_LIST_LIMIT: i64 = 50;
pub const RESTORE_SAFETY_MESSAGE: &str = "Auto-save before restore";

const SUMMARY_COLUMNS: &str =
    "id, project_id, content_hash, message, auto_created, file_count, total_size, created_at";

/// Hash of a file list that ignores ordering: entries are sorted by path
/// (then content) before hashing. Each field is prefixed with its byte
/// length so no two distinct lists share an encoding.
pub fn content_hash(files: &[ProjectFile]) -> String {
    let mut entries: Vec<(&str, &str)> = files
        .iter()
        .map(|f| (f.path.as_str(), f.content.as_str()))
        .collect();
    entries.sort_unstable();

    let mut hasher = Sha256::new();
    for (path, content) in entries {
        for field in [path, content] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

fn snapshot_id(hash: &str) -> String {
    format!("snap_{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), &hash[..8])
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SnapshotSummary {
    pub id: String,
    pub project_id: String,
    pub content_hash: String,
    pub message: String,
    pub auto_created: bool,
    pub file_count: i64,
    pub total_size: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    #[serde(flatten)]
    pub summary: SnapshotSummary,
    pub files: Vec<ProjectFile>,
}

impl TryFrom<SnapshotRow> for Snapshot {
    type Error = AppError;

    fn try_from(row: SnapshotRow) -> Result<Self> {
        Ok(Self {
            files: serde_json::from_str(&row.files)?,
            summary: SnapshotSummary {
                id: row.id,
                project_id: row.project_id,
                content_hash: row.content_hash,
                message: row.message,
                auto_created: row.auto_created,
                file_count: row.file_count,
                total_size: row.total_size,
                created_at: row.created_at,
            },
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedSnapshot {
    #[serde(flatten)]
    pub snapshot: SnapshotSummary,
    pub is_new: bool,
}

async fn find_by_hash(
    pool: &SqlitePool,
    project_id: &str,
    hash: &str,
) -> Result<Option<SnapshotSummary>> {
    let existing = sqlx::query_as::<_, SnapshotSummary>(&format!(
        "SELECT {SUMMARY_COLUMNS} FROM snapshots WHERE project_id = ? AND content_hash = ? ORDER BY seq DESC LIMIT 1"
    ))
    .bind(project_id)
    .bind(hash)
    .fetch_optional(pool)
    .await?;
    Ok(existing)
}

async fn latest(pool: &SqlitePool, project_id: &str) -> Result<Option<SnapshotSummary>> {
    let latest = sqlx::query_as::<_, SnapshotSummary>(&format!(
        "SELECT {SUMMARY_COLUMNS} FROM snapshots WHERE project_id = ? ORDER BY seq DESC LIMIT 1"
    ))
    .bind(project_id)
    .fetch_optional(pool)
    .await?;
    Ok(latest)
}

/// Store the file list unless a snapshot with identical content exists,
/// in which case that snapshot is returned unchanged.
pub async fn create_snapshot(
    pool: &SqlitePool,
    project_id: &str,
    user_id: &str,
    files: &[ProjectFile],
    message: Option<&str>,
    auto_created: bool,
) -> Result<CreatedSnapshot> {
    let hash = content_hash(files);

    if let Some(existing) = find_by_hash(pool, project_id, &hash).await? {
        tracing::debug!("Snapshot {} already holds this content", existing.id);
        return Ok(CreatedSnapshot {
            snapshot: existing,
            is_new: false,
        });
    }

    let message = message
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(if auto_created { "Auto-save" } else { "Manual snapshot" });
    let id = snapshot_id(&hash);
    let total_size: usize = files.iter().map(|f| f.content.len()).sum();
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO snapshots (id, project_id, user_id, files, content_hash, message, auto_created, file_count, total_size, created_at, seq)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM snapshots WHERE project_id = ?))",
    )
    .bind(&id)
    .bind(project_id)
    .bind(user_id)
    .bind(serde_json::to_string(files)?)
    .bind(&hash)
    .bind(message)
    .bind(auto_created)
    .bind(files.len() as i64)
    .bind(total_size as i64)
    .bind(&now)
    .bind(project_id)
    .execute(pool)
    .await?;

    tracing::info!("Created snapshot {id} for project {project_id}");

    Ok(CreatedSnapshot {
        snapshot: SnapshotSummary {
            id,
            project_id: project_id.to_string(),
            content_hash: hash,
            message: message.to_string(),
            auto_created,
            file_count: files.len() as i64,
            total_size: total_size as i64,
            created_at: now,
        },
        is_new: true,
    })
}

pub async fn list_snapshots(
    pool: &SqlitePool,
    project_id: &str,
    limit: i64,
) -> Result<Vec<SnapshotSummary>> {
    let limit = limit.clamp(1, MAX_LIST_LIMIT);
    let snapshots = sqlx::query_as::<_, SnapshotSummary>(&format!(
        "SELECT {SUMMARY_COLUMNS} FROM snapshots WHERE project_id = ? ORDER BY seq DESC LIMIT ?"
    ))
    .bind(project_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(snapshots)
}

pub async fn get_snapshot(pool: &SqlitePool, project_id: &str, snapshot_id: &str) -> Result<Snapshot> {
    let row = sqlx::query_as::<_, SnapshotRow>(
        "SELECT id, project_id, user_id, files, content_hash, message, auto_created, file_count, total_size, created_at
         FROM snapshots WHERE project_id = ? AND id = ?",
    )
    .bind(project_id)
    .bind(snapshot_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Snapshot not found".to_string()))?;

    row.try_into()
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    pub restored_from: String,
    pub safety_snapshot_id: String,
    pub file_count: usize,
}

/// Replace the project's files with a stored snapshot. The current files
/// are snapshotted first so the restore itself can be undone.
pub async fn restore_snapshot(
    pool: &SqlitePool,
    project_id: &str,
    snapshot_id: &str,
    user_id: &str,
) -> Result<RestoreOutcome> {
    let target = get_snapshot(pool, project_id, snapshot_id).await?;
    let project = projects::fetch_owned(pool, project_id, user_id).await?;

    let safety = create_snapshot(
        pool,
        project_id,
        user_id,
        &project.files,
        Some(RESTORE_SAFETY_MESSAGE),
        true,
    )
    .await?;

    projects::replace_files(pool, project_id, &target.files, Some(snapshot_id)).await?;

    tracing::info!("Restored project {project_id} from {snapshot_id}");

    Ok(RestoreOutcome {
        restored_from: snapshot_id.to_string(),
        safety_snapshot_id: safety.snapshot.id,
        file_count: target.files.len(),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
    pub total_changes: usize,
}

/// Path-level difference going from `from` to `to`.
pub fn diff_files(from: &[ProjectFile], to: &[ProjectFile]) -> SnapshotDiff {
    let before: BTreeMap<&str, &str> = from
        .iter()
        .map(|f| (f.path.as_str(), f.content.as_str()))
        .collect();
    let after: BTreeMap<&str, &str> = to
        .iter()
        .map(|f| (f.path.as_str(), f.content.as_str()))
        .collect();

    let mut diff = SnapshotDiff::default();
    for (path, content) in &after {
        match before.get(path) {
            None => diff.added.push(path.to_string()),
            Some(old) if old != content => diff.modified.push(path.to_string()),
            Some(_) => {}
        }
    }
    diff.removed = before
        .keys()
        .filter(|path| !after.contains_key(*path))
        .map(|path| path.to_string())
        .collect();
    diff.total_changes = diff.added.len() + diff.removed.len() + diff.modified.len();
    diff
}

pub async fn compare_snapshots(
    pool: &SqlitePool,
    project_id: &str,
    from_id: &str,
    to_id: &str,
) -> Result<SnapshotDiff> {
    let from = get_snapshot(pool, project_id, from_id).await?;
    let to = get_snapshot(pool, project_id, to_id).await?;
    Ok(diff_files(&from.files, &to.files))
}

/// Delete auto snapshots beyond the newest `keep`. Manual snapshots are
/// never pruned.
pub async fn prune_auto_snapshots(pool: &SqlitePool, project_id: &str, keep: i64) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM snapshots WHERE project_id = ? AND auto_created = TRUE AND id NOT IN (
            SELECT id FROM snapshots WHERE project_id = ? AND auto_created = TRUE ORDER BY seq DESC LIMIT ?
        )",
    )
    .bind(project_id)
    .bind(project_id)
    .bind(keep.max(0))
    .execute(pool)
    .await?;

    let pruned = result.rows_affected();
    if pruned > 0 {
        tracing::debug!("Pruned {pruned} auto snapshots from {project_id}");
    }
    Ok(pruned)
}

/// Snapshot the files if they differ from the latest snapshot. Returns the
/// new snapshot id, if one was written.
pub async fn auto_snapshot_on_change(
    pool: &SqlitePool,
    project_id: &str,
    user_id: &str,
    files: &[ProjectFile],
    keep: i64,
) -> Result<Option<String>> {
    let hash = content_hash(files);
    if let Some(latest) = latest(pool, project_id).await? {
        if latest.content_hash == hash {
            return Ok(None);
        }
    }

    let created = create_snapshot(pool, project_id, user_id, files, None, true).await?;
    prune_auto_snapshots(pool, project_id, keep).await?;

    Ok(created.is_new.then_some(created.snapshot.id))
}
