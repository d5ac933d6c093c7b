// sheetbackup/src/backup/logic.rs
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::MetadataStore;
use crate::errors::{AppError, Result};
use crate::google::SpreadsheetExporter;
use crate::models::{
    Backup, BackupOutcome, BackupStatus, Sheet, SheetBackupResult, StorageConfig, StorageResult,
};
use crate::storage::{resolve_storage, XLSX_CONTENT_TYPE};

use super::metadata::extract_workbook_metadata;

/// Replaces characters that are unsafe in file names across the
/// supported destinations.
fn sanitize_sheet_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect()
}

fn backup_filename(sheet_name: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}_{}.xlsx",
        sanitize_sheet_name(sheet_name),
        at.format("%Y%m%d_%H%M%S")
    )
}

/// Exports one spreadsheet and pushes the export to every configured
/// storage destination, in the order the destinations are given.
///
/// A destination that cannot be resolved or written to is skipped; the
/// run fails only when the export itself fails or no destination
/// accepts the file. The first successful destination becomes the
/// primary result.
pub async fn backup_sheet(
    exporter: &dyn SpreadsheetExporter,
    spreadsheet_id: &str,
    sheet_name: &str,
    storage_configs: &[StorageConfig],
    store: &MetadataStore,
) -> Result<BackupOutcome> {
    tracing::info!("creating backup of sheet '{sheet_name}' ({spreadsheet_id})");

    let data = exporter.export_xlsx(spreadsheet_id).await?;
    let filename = backup_filename(sheet_name, Utc::now());

    let mut storage_results: Vec<StorageResult> = Vec::new();
    for config in storage_configs {
        let storage = match resolve_storage(
            &config.storage_type,
            config.storage_params.as_ref(),
            store,
        )
        .await
        {
            Ok(storage) => storage,
            Err(e) => {
                tracing::error!(
                    "skipping {} destination, resolution failed: {e}",
                    config.storage_type
                );
                continue;
            }
        };

        let file_path = match storage.save(&data, &filename, XLSX_CONTENT_TYPE).await {
            Ok(file_path) => file_path,
            Err(e) => {
                tracing::error!("failed to save {filename} to {}: {e}", config.storage_type);
                continue;
            }
        };

        // A failed info lookup only costs the recorded size.
        let size = match storage.file_info(&file_path).await {
            Ok(info) => info.size,
            Err(e) => {
                tracing::warn!("could not read file info from {}: {e}", config.storage_type);
                0
            }
        };

        storage_results.push(StorageResult {
            storage_type: config.storage_type.clone(),
            file_path,
            size,
            storage_params: config.storage_params.clone(),
        });
    }

    if storage_results.is_empty() {
        tracing::error!("backup of '{sheet_name}' failed: no destination accepted the file");
        return Err(AppError::AllStoragesFailed);
    }

    let primary = storage_results[0].clone();
    let backup_metadata = extract_workbook_metadata(&data);

    tracing::info!(
        "backup {filename} stored in {} destination(s)",
        storage_results.len()
    );

    Ok(BackupOutcome {
        filename,
        file_path: primary.file_path,
        size: primary.size,
        status: BackupStatus::Completed,
        storage_type: primary.storage_type,
        storage_params: primary.storage_params,
        backup_metadata,
        storage_results,
    })
}

/// Runs the fan-out for every sheet in the batch. Sheets are processed
/// in the order given and independently of each other; the result list
/// preserves that order.
pub async fn backup_sheets(
    exporter: &dyn SpreadsheetExporter,
    sheets: &[Sheet],
    storage_configs: &[StorageConfig],
    store: &MetadataStore,
) -> Vec<SheetBackupResult> {
    let mut results = Vec::with_capacity(sheets.len());

    for sheet in sheets {
        if sheet.spreadsheet_id.is_empty() {
            tracing::error!("sheet {} ({}) has no spreadsheet id", sheet.id, sheet.name);
            results.push(failure_entry(sheet, "missing spreadsheet id".to_string()));
            continue;
        }

        let outcome = match backup_sheet(
            exporter,
            &sheet.spreadsheet_id,
            &sheet.name,
            storage_configs,
            store,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("backup of sheet {} failed: {e}", sheet.id);
                results.push(failure_entry(sheet, e.to_string()));
                continue;
            }
        };

        let backup = Backup {
            id: Uuid::new_v4().to_string(),
            sheet_id: sheet.id.clone(),
            filename: outcome.filename.clone(),
            file_path: outcome.file_path.clone(),
            size: outcome.size,
            status: outcome.status,
            storage_type: outcome.storage_type.clone(),
            storage_params: outcome.storage_params.clone(),
            storage_results: outcome.storage_results.clone(),
            backup_metadata: outcome.backup_metadata.clone(),
            created_at: Utc::now(),
        };

        match store.create_backup(&backup).await {
            Ok(()) => {
                if let Err(e) = store
                    .update_sheet_last_backup(&sheet.id, backup.created_at)
                    .await
                {
                    // Last-writer-wins convenience field; the backup row
                    // itself is already durable.
                    tracing::warn!("could not update last_backup of sheet {}: {e}", sheet.id);
                }
                tracing::info!("backup of sheet '{}' saved as {}", sheet.name, backup.id);
                results.push(SheetBackupResult {
                    sheet_id: sheet.id.clone(),
                    sheet_name: sheet.name.clone(),
                    success: true,
                    backup_id: Some(outcome.filename.clone()),
                    storage_results: outcome.storage_results.clone(),
                    error: None,
                });
            }
            Err(e) => {
                tracing::error!("could not persist backup of sheet {}: {e}", sheet.id);
                results.push(failure_entry(sheet, format!("failed to persist backup: {e}")));
            }
        }
    }

    results
}

/// Retrieves a stored backup's bytes through its primary destination.
pub async fn fetch_backup(store: &MetadataStore, backup_id: &str) -> Result<Vec<u8>> {
    let backup = store
        .get_backup(backup_id)
        .await?
        .ok_or_else(|| AppError::BackupNotFound(backup_id.to_string()))?;

    let storage = resolve_storage(
        &backup.storage_type,
        backup.storage_params.as_ref(),
        store,
    )
    .await?;
    storage.fetch(&backup.file_path).await
}

/// Deletes a backup from every destination it was written to (best
/// effort, failures logged) and removes its record.
pub async fn delete_backup(store: &MetadataStore, backup_id: &str) -> Result<()> {
    let backup = store
        .get_backup(backup_id)
        .await?
        .ok_or_else(|| AppError::BackupNotFound(backup_id.to_string()))?;

    for result in &backup.storage_results {
        let storage = match resolve_storage(
            &result.storage_type,
            result.storage_params.as_ref(),
            store,
        )
        .await
        {
            Ok(storage) => storage,
            Err(e) => {
                tracing::error!(
                    "could not resolve {} storage while deleting backup {backup_id}: {e}",
                    result.storage_type
                );
                continue;
            }
        };
        match storage.delete(&result.file_path).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                "backup file {} was already gone from {}",
                result.file_path,
                result.storage_type
            ),
            Err(e) => tracing::error!(
                "failed to delete {} from {}: {e}",
                result.file_path,
                result.storage_type
            ),
        }
    }

    store.delete_backup(backup_id).await?;
    tracing::info!("deleted backup {backup_id}");
    Ok(())
}

fn failure_entry(sheet: &Sheet, error: String) -> SheetBackupResult {
    SheetBackupResult {
        sheet_id: sheet.id.clone(),
        sheet_name: sheet.name.clone(),
        success: false,
        backup_id: None,
        storage_results: Vec::new(),
        error: Some(error),
    }
}
