// sheetbackup/src/integrations/mod.rs
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::db::MetadataStore;
use crate::errors::{AppError, Result};
use crate::models::Integration;
use crate::storage::bitrix::{BitrixDiskStorage, BitrixFolder};
use crate::storage::STORAGE_TYPE_BITRIX;

/// Persists Bitrix24 settings as the default integration of that kind.
pub async fn save_bitrix_settings(store: &MetadataStore, settings: Value) -> Result<Integration> {
    let has_webhook = settings
        .get("webhook_url")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty());
    if !has_webhook {
        return Err(AppError::MissingParameter("webhook_url".to_string()));
    }

    store
        .save_integration(
            STORAGE_TYPE_BITRIX,
            "Bitrix24",
            &settings,
            Some("Bitrix24 disk storage for backups"),
        )
        .await
}

/// Probes the webhook with a cheap API call and reports what went
/// wrong in a caller-friendly message.
pub async fn test_bitrix_connection(webhook_url: &str) -> Result<()> {
    let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
    let url = format!("{}/disk.storage.getList", webhook_url.trim_end_matches('/'));
    let response = client.get(&url).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let description = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|body| {
                body.get("error_description")
                    .and_then(Value::as_str)
                    .map(|s| s.to_string())
            })
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(AppError::BitrixApi(format!("HTTP {status}: {description}")));
    }

    let body: Value = response.json().await?;
    match body.get("result") {
        Some(result) if !result.is_null() => Ok(()),
        _ => Err(AppError::BitrixApi(
            "empty result from disk.storage.getList".to_string(),
        )),
    }
}

/// Lists the folders visible through the default Bitrix24 integration.
pub async fn bitrix_folders(store: &MetadataStore) -> Result<Vec<BitrixFolder>> {
    let integration = store
        .default_integration(STORAGE_TYPE_BITRIX)
        .await?
        .ok_or_else(|| AppError::NoDefaultIntegration(STORAGE_TYPE_BITRIX.to_string()))?;

    let settings = &integration.settings;
    let webhook_url = settings
        .get("webhook_url")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::MissingParameter("webhook_url".to_string()))?;
    let folder_id = settings
        .get("folder_id")
        .and_then(Value::as_str)
        .map(|s| s.to_string());
    let base_path = settings
        .get("base_path")
        .and_then(Value::as_str)
        .map(|s| s.to_string());

    let storage = BitrixDiskStorage::connect(webhook_url, folder_id, base_path).await?;
    Ok(storage.folder_list().await)
}
