// sheetbackup/src/storage/mod.rs
pub(crate) mod bitrix;
pub(crate) mod local;

pub use bitrix::BitrixDiskStorage;
pub use local::LocalStorage;

use async_trait::async_trait;
use serde_json::Value;

use crate::db::MetadataStore;
use crate::errors::{AppError, Result};
use crate::models::FileInfo;

pub const STORAGE_TYPE_LOCAL: &str = "local";
pub const STORAGE_TYPE_BITRIX: &str = "bitrix";

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Uniform capability over a backup destination. `save` returns the
/// destination identifier later accepted by the other operations: a
/// filesystem path for local storage, an opaque file id for Bitrix24.
#[async_trait]
pub trait BackupStorage: Send + Sync {
    async fn save(&self, data: &[u8], file_name: &str, content_type: &str) -> Result<String>;

    async fn fetch(&self, path_or_id: &str) -> Result<Vec<u8>>;

    /// `Ok(false)` when the target does not exist.
    async fn delete(&self, path_or_id: &str) -> Result<bool>;

    /// Destination identifiers whose file name starts with `prefix`.
    /// Internal failures are logged and yield an empty list.
    async fn list(&self, prefix: &str) -> Vec<String>;

    async fn file_info(&self, path_or_id: &str) -> Result<FileInfo>;
}

/// Builds a ready-to-use backend for `storage_type`, resolving missing
/// Bitrix parameters from persisted integration settings.
///
/// Bitrix resolution order: an explicit `integration_id` wins (and a
/// kind mismatch is a hard failure, no fallback), then a directly
/// supplied `webhook_url`, then the default persisted integration.
pub async fn resolve_storage(
    storage_type: &str,
    storage_params: Option<&Value>,
    store: &MetadataStore,
) -> Result<Box<dyn BackupStorage>> {
    match storage_type {
        STORAGE_TYPE_LOCAL => {
            let base_path = param_str(storage_params, "base_path")
                .unwrap_or_else(|| local::DEFAULT_LOCAL_BASE_PATH.to_string());
            Ok(Box::new(LocalStorage::new(base_path)))
        }
        STORAGE_TYPE_BITRIX => {
            let effective = effective_bitrix_params(storage_type, storage_params, store).await?;
            let webhook_url = param_str(Some(&effective), "webhook_url")
                .ok_or_else(|| AppError::MissingParameter("webhook_url".to_string()))?;
            let folder_id = param_str(Some(&effective), "folder_id");
            let base_path = param_str(Some(&effective), "base_path");

            let storage = BitrixDiskStorage::connect(&webhook_url, folder_id, base_path).await?;
            Ok(Box::new(storage))
        }
        other => Err(AppError::UnknownStorageType(other.to_string())),
    }
}

async fn effective_bitrix_params(
    storage_type: &str,
    storage_params: Option<&Value>,
    store: &MetadataStore,
) -> Result<Value> {
    if let Some(integration_id) = param_integration_id(storage_params) {
        let integration = store
            .integration_by_id(integration_id)
            .await?
            .ok_or_else(|| AppError::IntegrationNotFound(integration_id.to_string()))?;
        if integration.kind != storage_type {
            return Err(AppError::IntegrationKindMismatch {
                id: integration_id.to_string(),
                actual: integration.kind,
                requested: storage_type.to_string(),
            });
        }
        tracing::info!("using settings of integration {integration_id} for {storage_type} storage");
        return Ok(integration.settings);
    }

    if param_str(storage_params, "webhook_url").is_some() {
        return Ok(storage_params.cloned().unwrap_or(Value::Null));
    }

    let integration = store
        .default_integration(storage_type)
        .await?
        .ok_or_else(|| AppError::NoDefaultIntegration(storage_type.to_string()))?;
    tracing::info!("using default {storage_type} integration {}", integration.id);
    Ok(integration.settings)
}

/// Reads a string-ish parameter; numeric values are stringified since
/// callers routinely send ids as numbers.
fn param_str(params: Option<&Value>, key: &str) -> Option<String> {
    match params?.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn param_integration_id(params: Option<&Value>) -> Option<i64> {
    match params?.get("integration_id")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::tests::temp_store;
    use serde_json::json;

    #[test]
    fn test_param_helpers_accept_numbers_and_strings() {
        let params = json!({"integration_id": "5", "folder_id": 42, "empty": ""});
        assert_eq!(param_integration_id(Some(&params)), Some(5));
        assert_eq!(param_str(Some(&params), "folder_id"), Some("42".to_string()));
        assert_eq!(param_str(Some(&params), "empty"), None);
        assert_eq!(param_integration_id(None), None);
    }

    #[tokio::test]
    async fn test_resolve_unknown_storage_type_fails() {
        let (_dir, store) = temp_store().await;
        let err = resolve_storage("gdrive", None, &store)
            .await
            .err()
            .expect("unknown type should fail");
        assert!(matches!(err, AppError::UnknownStorageType(t) if t == "gdrive"));
    }

    #[tokio::test]
    async fn test_resolve_local_ignores_integrations() {
        let (_dir, store) = temp_store().await;
        let storage = resolve_storage("local", None, &store).await;
        assert!(storage.is_ok());
    }

    #[tokio::test]
    async fn test_resolve_bitrix_integration_kind_mismatch_does_not_fall_through() {
        let (_dir, store) = temp_store().await;
        let integration = store
            .save_integration("local", "Local", &json!({"base_path": "backups"}), None)
            .await
            .expect("save integration");
        // A default bitrix integration exists, but the explicit
        // integration_id must win and fail on the kind check.
        store
            .save_integration(
                "bitrix",
                "Bitrix24",
                &json!({"webhook_url": "https://portal.example/rest/1/tok/"}),
                None,
            )
            .await
            .expect("save integration");

        let params = json!({"integration_id": integration.id.to_string()});
        let err = resolve_storage("bitrix", Some(&params), &store)
            .await
            .err()
            .expect("kind mismatch should fail");
        assert!(matches!(
            err,
            AppError::IntegrationKindMismatch { actual, requested, .. }
                if actual == "local" && requested == "bitrix"
        ));
    }

    #[tokio::test]
    async fn test_resolve_bitrix_missing_integration_fails() {
        let (_dir, store) = temp_store().await;
        let params = json!({"integration_id": 99});
        let err = resolve_storage("bitrix", Some(&params), &store)
            .await
            .err()
            .expect("missing integration should fail");
        assert!(matches!(err, AppError::IntegrationNotFound(id) if id == "99"));
    }

    #[tokio::test]
    async fn test_resolve_bitrix_without_any_configuration_fails() {
        let (_dir, store) = temp_store().await;
        let err = resolve_storage("bitrix", None, &store)
            .await
            .err()
            .expect("no default integration should fail");
        assert!(matches!(err, AppError::NoDefaultIntegration(kind) if kind == "bitrix"));
    }

    #[tokio::test]
    async fn test_resolve_bitrix_integration_without_webhook_url_fails() {
        let (_dir, store) = temp_store().await;
        store
            .save_integration("bitrix", "Bitrix24", &json!({"folder_id": "10"}), None)
            .await
            .expect("save integration");

        let err = resolve_storage("bitrix", None, &store)
            .await
            .err()
            .expect("missing webhook_url should fail");
        assert!(matches!(err, AppError::MissingParameter(p) if p == "webhook_url"));
    }
}
