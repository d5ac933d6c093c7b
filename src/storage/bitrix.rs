// sheetbackup/src/storage/bitrix.rs
//
// Bitrix24 Disk storage backend, driven through an inbound webhook URL.
// All REST methods live under the webhook base, e.g.
// `https://portal.example/rest/1/<token>/disk.folder.uploadfile`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::config::DEFAULT_BITRIX_BASE_PATH;
use crate::errors::{AppError, Result};
use crate::models::FileInfo;

use super::BackupStorage;

/// What the first upload call produced: either the file id directly, or
/// the URL for the second phase of a two-phase upload.
#[derive(Debug, PartialEq)]
enum UploadOutcome {
    FileId(String),
    UploadUrl(String),
    Invalid,
}

/// A folder visible through the webhook, as reported to callers.
#[derive(Debug, Clone, Serialize)]
pub struct BitrixFolder {
    pub id: String,
    pub name: String,
    pub path: String,
    pub parent_id: String,
}

pub struct BitrixDiskStorage {
    client: Client,
    webhook_url: Url,
    folder_id: String,
    base_path: String,
}

impl BitrixDiskStorage {
    /// Verifies connectivity and, when no folder id is supplied, adopts
    /// (or creates) the folder named after `base_path`.
    pub async fn connect(
        webhook_url: &str,
        folder_id: Option<String>,
        base_path: Option<String>,
    ) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        let mut storage = Self {
            client,
            webhook_url: normalize_webhook_url(webhook_url)?,
            folder_id: folder_id.unwrap_or_default(),
            base_path: base_path.unwrap_or_else(|| DEFAULT_BITRIX_BASE_PATH.to_string()),
        };

        storage.check_connection().await?;
        if storage.folder_id.is_empty() {
            storage.folder_id = storage.ensure_base_folder().await?;
        }
        Ok(storage)
    }

    fn method_url(&self, method: &str) -> Result<Url> {
        Ok(self.webhook_url.join(method)?)
    }

    async fn call_get(&self, method: &str, query: &[(&str, &str)]) -> Result<Value> {
        let response = self
            .client
            .get(self.method_url(method)?)
            .query(query)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::BitrixApi(format!(
                "{method} returned HTTP {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    async fn call_post(&self, method: &str, form: &[(&str, &str)]) -> Result<Value> {
        let response = self
            .client
            .post(self.method_url(method)?)
            .form(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::BitrixApi(format!(
                "{method} returned HTTP {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    async fn check_connection(&self) -> Result<()> {
        let body = self.call_get("disk.storage.getList", &[]).await?;
        if body.get("result").is_none() {
            return Err(AppError::BitrixApi(
                "disk.storage.getList returned no result".to_string(),
            ));
        }
        tracing::info!("connected to Bitrix24 at {}", self.webhook_url);
        Ok(())
    }

    /// Finds the folder named after `base_path` in the first disk
    /// storage, creating it when absent, and returns its id.
    async fn ensure_base_folder(&self) -> Result<String> {
        let body = self.call_get("disk.storage.getList", &[]).await?;
        let storages = body
            .get("result")
            .and_then(Value::as_array)
            .filter(|list| !list.is_empty())
            .ok_or_else(|| AppError::BitrixApi("no disk storages available".to_string()))?;
        let storage_id = value_id(&storages[0]["ID"])
            .ok_or_else(|| AppError::BitrixApi("disk storage has no ID".to_string()))?;

        let children = self
            .call_post("disk.storage.getChildren", &[("id", storage_id.as_str())])
            .await?;
        if let Some(folders) = children.get("result").and_then(Value::as_array) {
            for folder in folders {
                if folder.get("NAME").and_then(Value::as_str) == Some(self.base_path.as_str()) {
                    let id = value_id(&folder["ID"])
                        .ok_or_else(|| AppError::BitrixApi("folder has no ID".to_string()))?;
                    tracing::info!("using existing Bitrix24 folder '{}' ({id})", self.base_path);
                    return Ok(id);
                }
            }
        }

        let created = self
            .call_post(
                "disk.folder.addFolder",
                &[
                    ("id", storage_id.as_str()),
                    ("data[NAME]", self.base_path.as_str()),
                ],
            )
            .await?;
        let id = created
            .get("result")
            .and_then(|r| r.get("ID"))
            .and_then(value_id)
            .ok_or_else(|| {
                AppError::BitrixApi(format!("could not create folder '{}'", self.base_path))
            })?;
        tracing::info!("created Bitrix24 folder '{}' ({id})", self.base_path);
        Ok(id)
    }

    fn upload_form(data: &[u8], file_name: &str, content_type: &str) -> Result<Form> {
        let part = Part::bytes(data.to_vec())
            .file_name(file_name.to_string())
            .mime_str(content_type)?;
        Ok(Form::new().part("file", part))
    }

    /// Enumerates folders across all storages reachable through the
    /// webhook, plus the children of the adopted base folder.
    pub async fn folder_list(&self) -> Vec<BitrixFolder> {
        let mut result = Vec::new();

        let storages = match self.call_get("disk.storage.getList", &[]).await {
            Ok(body) => body
                .get("result")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            Err(e) => {
                tracing::error!("failed to list Bitrix24 storages: {e}");
                return result;
            }
        };

        for storage in &storages {
            let Some(storage_id) = value_id(&storage["ID"]) else {
                continue;
            };
            let storage_name = storage
                .get("NAME")
                .and_then(Value::as_str)
                .unwrap_or_default();

            match self
                .call_post("disk.storage.getChildren", &[("id", storage_id.as_str())])
                .await
            {
                Ok(children) => {
                    for folder in children
                        .get("result")
                        .and_then(Value::as_array)
                        .into_iter()
                        .flatten()
                    {
                        if let Some(id) = folder.get("ID").and_then(value_id) {
                            result.push(BitrixFolder {
                                id,
                                name: folder
                                    .get("NAME")
                                    .and_then(Value::as_str)
                                    .unwrap_or_default()
                                    .to_string(),
                                path: format!("{storage_name}/"),
                                parent_id: storage_id.clone(),
                            });
                        }
                    }
                }
                Err(e) => tracing::error!("failed to list folders of storage {storage_id}: {e}"),
            }
        }

        if !self.folder_id.is_empty() {
            match self
                .call_post(
                    "disk.folder.getChildren",
                    &[("id", self.folder_id.as_str()), ("filter[TYPE]", "folder")],
                )
                .await
            {
                Ok(children) => {
                    for folder in children
                        .get("result")
                        .and_then(Value::as_array)
                        .into_iter()
                        .flatten()
                    {
                        if let Some(id) = folder.get("ID").and_then(value_id) {
                            result.push(BitrixFolder {
                                id,
                                name: folder
                                    .get("NAME")
                                    .and_then(Value::as_str)
                                    .unwrap_or_default()
                                    .to_string(),
                                path: format!("{}/", self.base_path),
                                parent_id: self.folder_id.clone(),
                            });
                        }
                    }
                }
                Err(e) => tracing::error!("failed to list base folder children: {e}"),
            }
        }

        result
    }
}

#[async_trait]
impl BackupStorage for BitrixDiskStorage {
    async fn save(&self, data: &[u8], file_name: &str, content_type: &str) -> Result<String> {
        let url = self.method_url("disk.folder.uploadfile")?;
        let form = Self::upload_form(data, file_name, content_type)?
            .text("id", self.folder_id.clone());
        let response = self.client.post(url).multipart(form).send().await?;
        if !response.status().is_success() {
            return Err(AppError::StorageWrite(format!(
                "disk.folder.uploadfile returned HTTP {}",
                response.status()
            )));
        }
        let body: Value = response.json().await?;

        match parse_upload_result(&body) {
            UploadOutcome::FileId(id) => {
                tracing::info!("uploaded {file_name} to Bitrix24, file id {id}");
                Ok(id)
            }
            UploadOutcome::UploadUrl(upload_url) => {
                // Two-phase upload: re-send the same bytes against the
                // URL the first call handed back.
                tracing::info!("Bitrix24 requested two-phase upload for {file_name}");
                let form = Self::upload_form(data, file_name, content_type)?;
                let response = self.client.post(&upload_url).multipart(form).send().await?;
                if !response.status().is_success() {
                    return Err(AppError::StorageWrite(format!(
                        "two-phase upload returned HTTP {}",
                        response.status()
                    )));
                }
                let body: Value = response.json().await?;
                let id = second_phase_file_id(&body).ok_or_else(|| {
                    AppError::StorageWrite(format!(
                        "no file id in two-phase upload response for {file_name}"
                    ))
                })?;
                tracing::info!("uploaded {file_name} to Bitrix24 via two-phase upload, file id {id}");
                Ok(id)
            }
            UploadOutcome::Invalid => Err(AppError::StorageWrite(format!(
                "no file id in upload response for {file_name}"
            ))),
        }
    }

    async fn fetch(&self, path_or_id: &str) -> Result<Vec<u8>> {
        let body = self
            .call_get("disk.file.get", &[("id", path_or_id)])
            .await
            .map_err(|_| AppError::StorageNotFound(path_or_id.to_string()))?;
        let download_url = body
            .get("result")
            .and_then(|r| r.get("DOWNLOAD_URL"))
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::StorageNotFound(path_or_id.to_string()))?;

        let response = self.client.get(download_url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::StorageNotFound(path_or_id.to_string()));
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn delete(&self, path_or_id: &str) -> Result<bool> {
        let body = match self
            .call_post("disk.file.delete", &[("id", path_or_id)])
            .await
        {
            Ok(body) => body,
            Err(e) => {
                tracing::error!("failed to delete Bitrix24 file {path_or_id}: {e}");
                return Ok(false);
            }
        };
        Ok(body.get("result").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn list(&self, prefix: &str) -> Vec<String> {
        let body = match self
            .call_get(
                "disk.folder.getChildren",
                &[("id", self.folder_id.as_str()), ("filter[TYPE]", "file")],
            )
            .await
        {
            Ok(body) => body,
            Err(e) => {
                tracing::error!("failed to list Bitrix24 files: {e}");
                return Vec::new();
            }
        };

        body.get("result")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter(|file| {
                prefix.is_empty()
                    || file
                        .get("NAME")
                        .and_then(Value::as_str)
                        .is_some_and(|name| name.starts_with(prefix))
            })
            .filter_map(|file| file.get("ID").and_then(value_id))
            .collect()
    }

    async fn file_info(&self, path_or_id: &str) -> Result<FileInfo> {
        let body = self
            .call_get("disk.file.get", &[("id", path_or_id)])
            .await
            .map_err(|_| AppError::StorageNotFound(path_or_id.to_string()))?;
        let info = body
            .get("result")
            .filter(|r| !r.is_null())
            .ok_or_else(|| AppError::StorageNotFound(path_or_id.to_string()))?;

        Ok(FileInfo {
            path: info
                .get("ID")
                .and_then(value_id)
                .unwrap_or_else(|| path_or_id.to_string()),
            filename: info
                .get("NAME")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            size: info.get("SIZE").map(value_i64).unwrap_or(0),
            created_at: info.get("CREATE_TIME").and_then(parse_bitrix_time),
            modified_at: info.get("UPDATE_TIME").and_then(parse_bitrix_time),
        })
    }
}

fn normalize_webhook_url(webhook_url: &str) -> Result<Url> {
    // A trailing slash keeps Url::join from replacing the token segment.
    let normalized = if webhook_url.ends_with('/') {
        webhook_url.to_string()
    } else {
        format!("{webhook_url}/")
    };
    Ok(Url::parse(&normalized)?)
}

fn parse_upload_result(body: &Value) -> UploadOutcome {
    let Some(result) = body.get("result") else {
        return UploadOutcome::Invalid;
    };
    if let Some(id) = result.get("ID").and_then(value_id) {
        return UploadOutcome::FileId(id);
    }
    if let Some(upload_url) = result.get("uploadUrl").and_then(Value::as_str) {
        return UploadOutcome::UploadUrl(upload_url.to_string());
    }
    UploadOutcome::Invalid
}

fn second_phase_file_id(body: &Value) -> Option<String> {
    let result = body.get("result")?;
    result
        .get("ID")
        .and_then(value_id)
        .or_else(|| result.get("file_id").and_then(value_id))
}

/// Bitrix serializes ids sometimes as numbers, sometimes as strings.
fn value_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_i64(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

fn parse_bitrix_time(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_url_keeps_token_segment() -> Result<()> {
        let url = normalize_webhook_url("https://portal.example/rest/1/secret")?;
        assert_eq!(
            url.join("disk.folder.uploadfile")?.as_str(),
            "https://portal.example/rest/1/secret/disk.folder.uploadfile"
        );

        let url = normalize_webhook_url("https://portal.example/rest/1/secret/")?;
        assert_eq!(
            url.join("disk.storage.getList")?.as_str(),
            "https://portal.example/rest/1/secret/disk.storage.getList"
        );
        Ok(())
    }

    #[test]
    fn test_parse_upload_result_with_direct_file_id() {
        let body = json!({"result": {"ID": 982}});
        assert_eq!(
            parse_upload_result(&body),
            UploadOutcome::FileId("982".to_string())
        );

        let body = json!({"result": {"ID": "982"}});
        assert_eq!(
            parse_upload_result(&body),
            UploadOutcome::FileId("982".to_string())
        );
    }

    #[test]
    fn test_parse_upload_result_with_upload_url() {
        let body = json!({"result": {"uploadUrl": "https://portal.example/upload/xyz"}});
        assert_eq!(
            parse_upload_result(&body),
            UploadOutcome::UploadUrl("https://portal.example/upload/xyz".to_string())
        );
    }

    #[test]
    fn test_parse_upload_result_without_id_or_url() {
        assert_eq!(parse_upload_result(&json!({})), UploadOutcome::Invalid);
        assert_eq!(
            parse_upload_result(&json!({"result": {}})),
            UploadOutcome::Invalid
        );
    }

    #[test]
    fn test_second_phase_accepts_both_id_spellings() {
        assert_eq!(
            second_phase_file_id(&json!({"result": {"ID": 11}})),
            Some("11".to_string())
        );
        assert_eq!(
            second_phase_file_id(&json!({"result": {"file_id": "12"}})),
            Some("12".to_string())
        );
        assert_eq!(second_phase_file_id(&json!({"result": {}})), None);
    }

    #[test]
    fn test_size_coercion_from_string() {
        assert_eq!(value_i64(&json!("4096")), 4096);
        assert_eq!(value_i64(&json!(4096)), 4096);
        assert_eq!(value_i64(&json!(null)), 0);
    }

    #[test]
    fn test_bitrix_time_parsing() {
        let parsed = parse_bitrix_time(&json!("2024-03-01T10:15:00+03:00"))
            .expect("timestamp should parse");
        assert_eq!(parsed.to_rfc3339(), "2024-03-01T07:15:00+00:00");
        assert!(parse_bitrix_time(&json!("not a date")).is_none());
    }
}
