// sheetbackup/src/storage/local.rs
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::errors::{AppError, Result};
use crate::models::FileInfo;

use super::BackupStorage;

pub const DEFAULT_LOCAL_BASE_PATH: &str = "backups";

/// Stores backups under a root directory on the local filesystem.
/// Destination identifiers are plain filesystem paths.
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }
}

#[async_trait]
impl BackupStorage for LocalStorage {
    async fn save(&self, data: &[u8], file_name: &str, _content_type: &str) -> Result<String> {
        let file_path = self.base_path.join(file_name);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AppError::StorageWrite(format!("{}: {e}", parent.display())))?;
        }
        fs::write(&file_path, data)
            .map_err(|e| AppError::StorageWrite(format!("{}: {e}", file_path.display())))?;

        tracing::info!("saved backup file to {}", file_path.display());
        Ok(file_path.display().to_string())
    }

    async fn fetch(&self, path_or_id: &str) -> Result<Vec<u8>> {
        let path = Path::new(path_or_id);
        if !path.exists() {
            return Err(AppError::StorageNotFound(path_or_id.to_string()));
        }
        Ok(fs::read(path)?)
    }

    async fn delete(&self, path_or_id: &str) -> Result<bool> {
        let path = Path::new(path_or_id);
        if !path.exists() {
            tracing::warn!("file not found for deletion: {path_or_id}");
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }

    async fn list(&self, prefix: &str) -> Vec<String> {
        let mut result = Vec::new();
        for entry in WalkDir::new(&self.base_path).into_iter() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("failed to walk {}: {e}", self.base_path.display());
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let matches = prefix.is_empty()
                || entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with(prefix));
            if matches {
                result.push(entry.path().display().to_string());
            }
        }
        result
    }

    async fn file_info(&self, path_or_id: &str) -> Result<FileInfo> {
        let path = Path::new(path_or_id);
        if !path.exists() {
            return Err(AppError::StorageNotFound(path_or_id.to_string()));
        }
        let metadata = fs::metadata(path)?;
        let created_at = metadata.created().ok().map(DateTime::<Utc>::from);
        let modified_at = metadata.modified().ok().map(DateTime::<Utc>::from);

        Ok(FileInfo {
            path: path.display().to_string(),
            filename: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size: metadata.len() as i64,
            created_at,
            modified_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_creates_parent_directories() -> Result<()> {
        let dir = TempDir::new()?;
        let storage = LocalStorage::new(dir.path().join("nested").join("deeper"));

        let path = storage.save(b"content", "file.xlsx", "application/test").await?;
        assert!(Path::new(&path).exists());
        assert_eq!(storage.fetch(&path).await?, b"content");
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_of_missing_file_is_not_success() -> Result<()> {
        let dir = TempDir::new()?;
        let storage = LocalStorage::new(dir.path());

        let path = storage.save(b"data", "gone.xlsx", "application/test").await?;
        assert!(storage.delete(&path).await?);
        assert!(!storage.delete(&path).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_missing_file_is_storage_not_found() {
        let dir = TempDir::new().expect("temp dir");
        let storage = LocalStorage::new(dir.path());

        let missing = dir.path().join("missing.xlsx");
        let err = storage
            .fetch(&missing.display().to_string())
            .await
            .expect_err("missing file should error");
        assert!(matches!(err, AppError::StorageNotFound(_)));
    }

    #[tokio::test]
    async fn test_list_filters_by_filename_prefix() -> Result<()> {
        let dir = TempDir::new()?;
        let storage = LocalStorage::new(dir.path());
        storage.save(b"1", "report_a.xlsx", "application/test").await?;
        storage.save(b"2", "report_b.xlsx", "application/test").await?;
        storage.save(b"3", "other.xlsx", "application/test").await?;

        let mut listed = storage.list("report_").await;
        listed.sort();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].ends_with("report_a.xlsx"));
        assert_eq!(storage.list("").await.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_file_info_reports_size() -> Result<()> {
        let dir = TempDir::new()?;
        let storage = LocalStorage::new(dir.path());
        let path = storage.save(b"12345", "sized.xlsx", "application/test").await?;

        let info = storage.file_info(&path).await?;
        assert_eq!(info.size, 5);
        assert_eq!(info.filename, "sized.xlsx");
        assert!(info.modified_at.is_some());
        Ok(())
    }
}
