use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{AppError, Result};

/// Largest single upload accepted by the asset routes.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

const TEMP_DIR: &str = "temp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetCategory {
    Images,
    Documents,
    Media,
}

impl AssetCategory {
    pub const ALL: [AssetCategory; 3] = [
        AssetCategory::Images,
        AssetCategory::Documents,
        AssetCategory::Media,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetCategory::Images => "images",
            AssetCategory::Documents => "documents",
            AssetCategory::Media => "media",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == value)
    }

    /// Anything that is not an image, audio or video is a document.
    pub fn for_mime(mime: &str) -> Self {
        if mime.starts_with("image/") {
            AssetCategory::Images
        } else if mime.starts_with("video/") || mime.starts_with("audio/") {
            AssetCategory::Media
        } else {
            AssetCategory::Documents
        }
    }
}

pub fn guess_mime(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// Final path component of an uploaded name, so client-supplied paths
/// cannot escape the storage root.
pub fn sanitize_filename(filename: &str) -> Option<String> {
    let name = filename.rsplit(|c: char| c == '/' || c == '\\').next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

/// On-disk name for an asset: its id plus the original extension when that
/// extension is plain alphanumeric.
pub fn stored_name(asset_id: &str, filename: &str) -> String {
    match Path::new(filename).extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            format!("{asset_id}.{}", ext.to_ascii_lowercase())
        }
        _ => asset_id.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct StorageService {
    base_path: PathBuf,
}

impl StorageService {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub async fn init(&self) -> Result<()> {
        for dir in AssetCategory::ALL
            .iter()
            .map(|c| c.as_str())
            .chain([TEMP_DIR])
        {
            fs::create_dir_all(self.base_path.join(dir)).await.map_err(|e| {
                AppError::Internal(format!("Failed to create storage directory: {e}"))
            })?;
        }
        Ok(())
    }

    pub fn asset_path(&self, category: AssetCategory, stored_name: &str) -> PathBuf {
        self.base_path.join(category.as_str()).join(stored_name)
    }

    fn temp_path(&self, stored_name: &str) -> PathBuf {
        self.base_path.join(TEMP_DIR).join(stored_name)
    }

    /// Write into the temp area first and move into place, so a failed
    /// write only ever leaves debris under `temp/`.
    pub async fn write_asset(
        &self,
        category: AssetCategory,
        stored_name: &str,
        data: &[u8],
    ) -> Result<()> {
        let staged = self.temp_path(stored_name);
        let target = self.asset_path(category, stored_name);

        for dir in [staged.parent(), target.parent()].into_iter().flatten() {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| AppError::Internal(format!("Failed to create directories: {e}")))?;
        }

        fs::write(&staged, data)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to write file: {e}")))?;
        fs::rename(&staged, &target)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to store file: {e}")))?;

        Ok(())
    }

    pub async fn read_asset(&self, category: AssetCategory, stored_name: &str) -> Result<Vec<u8>> {
        let path = self.asset_path(category, stored_name);

        if !path.is_file() {
            return Err(AppError::NotFound("Asset content not found".to_string()));
        }

        fs::read(&path)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to read file: {e}")))
    }

    /// Missing files are not an error.
    pub async fn delete_asset(&self, category: AssetCategory, stored_name: &str) -> Result<()> {
        let path = self.asset_path(category, stored_name);

        if path.exists() {
            fs::remove_file(&path)
                .await
                .map_err(|e| AppError::Internal(format!("Failed to delete file: {e}")))?;
        }

        Ok(())
    }

    /// Remove temp files last modified at least `max_age` ago.
    pub async fn cleanup_temp(&self, max_age: Duration) -> Result<usize> {
        let dir = self.base_path.join(TEMP_DIR);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(AppError::Internal(format!(
                    "Failed to read temp directory: {e}"
                )))
            }
        };

        let now = SystemTime::now();
        let mut deleted = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to read temp directory: {e}")))?
        {
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }

            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age >= max_age {
                match fs::remove_file(entry.path()).await {
                    Ok(()) => deleted += 1,
                    Err(e) => tracing::warn!("Failed to remove temp file {:?}: {e}", entry.path()),
                }
            }
        }

        if deleted > 0 {
            tracing::info!("Cleaned up {deleted} temporary files");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::new_id;

    fn scratch() -> StorageService {
        StorageService::new(std::env::temp_dir().join(new_id("storage-test")))
    }

    #[test]
    fn test_categories() {
        assert_eq!(AssetCategory::for_mime("image/png"), AssetCategory::Images);
        assert_eq!(AssetCategory::for_mime("audio/mpeg"), AssetCategory::Media);
        assert_eq!(AssetCategory::for_mime("video/mp4"), AssetCategory::Media);
        assert_eq!(
            AssetCategory::for_mime("application/pdf"),
            AssetCategory::Documents
        );
        assert_eq!(AssetCategory::parse("media"), Some(AssetCategory::Media));
        assert_eq!(AssetCategory::parse("temp"), None);
    }

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime("logo.png"), "image/png");
        assert_eq!(guess_mime("notes"), "application/octet-stream");
    }

    #[test]
    fn test_filenames_are_confined() {
        assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_filename("C:\\tmp\\a.txt").as_deref(), Some("a.txt"));
        assert_eq!(sanitize_filename("dir/.."), None);
        assert_eq!(sanitize_filename("  "), None);

        assert_eq!(stored_name("asset_1", "Photo.JPG"), "asset_1.jpg");
        assert_eq!(stored_name("asset_1", "archive.tar.g/z"), "asset_1");
        assert_eq!(stored_name("asset_1", "README"), "asset_1");
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let storage = scratch();
        storage
            .write_asset(AssetCategory::Images, "a.png", b"png-bytes")
            .await
            .unwrap();

        let data = storage.read_asset(AssetCategory::Images, "a.png").await.unwrap();
        assert_eq!(data, b"png-bytes");
        assert!(!storage.temp_path("a.png").exists());

        storage.delete_asset(AssetCategory::Images, "a.png").await.unwrap();
        storage.delete_asset(AssetCategory::Images, "a.png").await.unwrap();
        assert!(matches!(
            storage.read_asset(AssetCategory::Images, "a.png").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cleanup_temp() {
        let storage = scratch();
        assert_eq!(storage.cleanup_temp(Duration::ZERO).await.unwrap(), 0);

        storage.init().await.unwrap();
        std::fs::write(storage.temp_path("stale.bin"), b"x").unwrap();

        assert_eq!(
            storage.cleanup_temp(Duration::from_secs(3600)).await.unwrap(),
            0
        );
        assert_eq!(storage.cleanup_temp(Duration::ZERO).await.unwrap(), 1);
        assert!(!storage.temp_path("stale.bin").exists());
    }
}
