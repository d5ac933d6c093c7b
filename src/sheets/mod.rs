// sheetbackup/src/sheets/mod.rs
use crate::db::MetadataStore;
use crate::errors::{AppError, Result};
use crate::google::SpreadsheetExporter;
use crate::models::Sheet;
use crate::scheduler::SchedulerService;

/// Registers a spreadsheet for tracking. When an exporter is available
/// the spreadsheet is probed first, so bad ids and missing permissions
/// surface at registration time instead of at the first backup.
pub async fn register_sheet(
    store: &MetadataStore,
    exporter: Option<&dyn SpreadsheetExporter>,
    spreadsheet_id: &str,
    name: Option<String>,
) -> Result<Sheet> {
    if spreadsheet_id.is_empty() {
        return Err(AppError::Validation("spreadsheet id must not be empty".to_string()));
    }

    if let Some(exporter) = exporter {
        let titles = exporter.sheet_titles(spreadsheet_id).await?;
        tracing::info!("spreadsheet {spreadsheet_id} is reachable, {} tab(s)", titles.len());
    }

    let name = name
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| spreadsheet_id.to_string());
    let sheet = store.create_sheet(&name, spreadsheet_id, None).await?;
    tracing::info!("registered sheet '{}' as {}", sheet.name, sheet.id);
    Ok(sheet)
}

/// Deletes a sheet, its backups and the schedules that reference it.
/// When a scheduler is supplied, the jobs of those schedules are
/// unregistered as well (a one-shot CLI process has none to remove).
pub async fn delete_sheet(
    store: &MetadataStore,
    scheduler: Option<&SchedulerService>,
    sheet_id: &str,
) -> Result<()> {
    let schedules = store.schedules_for_sheet(sheet_id).await?;
    if !store.delete_sheet(sheet_id).await? {
        return Err(AppError::SheetNotFound(sheet_id.to_string()));
    }
    if let Some(scheduler) = scheduler {
        for schedule in &schedules {
            scheduler.remove_schedule(&schedule.id).await;
        }
    }
    tracing::info!("deleted sheet {sheet_id} and {} schedule(s)", schedules.len());
    Ok(())
}
