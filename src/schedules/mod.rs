// sheetbackup/src/schedules/mod.rs
//
// Create/update/delete for schedule definitions, keeping the scheduler's
// job registry in sync with the store.

use std::collections::HashSet;

use chrono::Utc;
use uuid::Uuid;

use crate::backup;
use crate::db::MetadataStore;
use crate::errors::{AppError, Result};
use crate::google::SpreadsheetExporter;
use crate::models::{Schedule, ScheduleConfig, ScheduleType, SheetBackupResult, StorageConfig};
use crate::scheduler::{build_trigger, SchedulerService};

#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub sheets_ids: Vec<String>,
    pub schedule_type: ScheduleType,
    pub schedule_config: ScheduleConfig,
    pub storage_configs: Vec<StorageConfig>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleUpdate {
    pub sheets_ids: Option<Vec<String>>,
    pub schedule_type: Option<ScheduleType>,
    pub schedule_config: Option<ScheduleConfig>,
    pub storage_configs: Option<Vec<StorageConfig>>,
    pub is_active: Option<bool>,
}

#[derive(Debug)]
pub struct ExecutionSummary {
    pub results: Vec<SheetBackupResult>,
    pub sheets_count: usize,
    pub successful_backups: usize,
}

/// Validates and persists a new schedule, registering its job when the
/// schedule is active.
pub async fn create_schedule(
    store: &MetadataStore,
    scheduler: &SchedulerService,
    definition: NewSchedule,
) -> Result<Schedule> {
    validate_definition(
        store,
        &definition.sheets_ids,
        &definition.storage_configs,
        definition.schedule_type,
        &definition.schedule_config,
    )
    .await?;

    let schedule = Schedule {
        id: Uuid::new_v4().to_string(),
        sheets_ids: definition.sheets_ids,
        schedule_type: definition.schedule_type,
        schedule_config: definition.schedule_config,
        storage_configs: definition.storage_configs,
        is_active: definition.is_active,
        created_at: Utc::now(),
        updated_at: None,
    };
    store.create_schedule(&schedule).await?;

    if schedule.is_active {
        scheduler.add_schedule(&schedule).await;
    }
    Ok(schedule)
}

/// Applies a partial update, re-validates the result and swaps the
/// registered job accordingly.
pub async fn update_schedule(
    store: &MetadataStore,
    scheduler: &SchedulerService,
    schedule_id: &str,
    update: ScheduleUpdate,
) -> Result<Schedule> {
    let mut schedule = store
        .get_schedule(schedule_id)
        .await?
        .ok_or_else(|| AppError::ScheduleNotFound(schedule_id.to_string()))?;

    if let Some(sheets_ids) = update.sheets_ids {
        schedule.sheets_ids = sheets_ids;
    }
    if let Some(schedule_type) = update.schedule_type {
        schedule.schedule_type = schedule_type;
    }
    if let Some(schedule_config) = update.schedule_config {
        schedule.schedule_config = schedule_config;
    }
    if let Some(storage_configs) = update.storage_configs {
        schedule.storage_configs = storage_configs;
    }
    if let Some(is_active) = update.is_active {
        schedule.is_active = is_active;
    }
    schedule.updated_at = Some(Utc::now());

    validate_definition(
        store,
        &schedule.sheets_ids,
        &schedule.storage_configs,
        schedule.schedule_type,
        &schedule.schedule_config,
    )
    .await?;

    store.update_schedule(&schedule).await?;
    scheduler.update_schedule(&schedule).await;
    Ok(schedule)
}

pub async fn delete_schedule(
    store: &MetadataStore,
    scheduler: &SchedulerService,
    schedule_id: &str,
) -> Result<()> {
    if store.get_schedule(schedule_id).await?.is_none() {
        return Err(AppError::ScheduleNotFound(schedule_id.to_string()));
    }
    scheduler.remove_schedule(schedule_id).await;
    store.delete_schedule(schedule_id).await?;
    tracing::info!("deleted schedule {schedule_id}");
    Ok(())
}

/// Runs a schedule's batch immediately, outside its trigger.
pub async fn execute_schedule(
    store: &MetadataStore,
    exporter: &dyn SpreadsheetExporter,
    schedule_id: &str,
) -> Result<ExecutionSummary> {
    let schedule = store
        .get_schedule(schedule_id)
        .await?
        .ok_or_else(|| AppError::ScheduleNotFound(schedule_id.to_string()))?;

    let sheets = store.sheets_by_ids(&schedule.sheets_ids).await?;
    if sheets.len() != schedule.sheets_ids.len() {
        let found: HashSet<&str> = sheets.iter().map(|s| s.id.as_str()).collect();
        let missing: Vec<String> = schedule
            .sheets_ids
            .iter()
            .filter(|id| !found.contains(id.as_str()))
            .cloned()
            .collect();
        return Err(AppError::SheetNotFound(missing.join(", ")));
    }

    let results = backup::backup_sheets(exporter, &sheets, &schedule.storage_configs, store).await;
    let successful_backups = results.iter().filter(|r| r.success).count();
    Ok(ExecutionSummary {
        sheets_count: sheets.len(),
        successful_backups,
        results,
    })
}

async fn validate_definition(
    store: &MetadataStore,
    sheets_ids: &[String],
    storage_configs: &[StorageConfig],
    schedule_type: ScheduleType,
    schedule_config: &ScheduleConfig,
) -> Result<()> {
    if sheets_ids.is_empty() {
        return Err(AppError::Validation("sheets_ids must not be empty".to_string()));
    }
    if storage_configs.is_empty() {
        return Err(AppError::Validation(
            "storage_configs must not be empty".to_string(),
        ));
    }

    let sheets = store.sheets_by_ids(sheets_ids).await?;
    if sheets.len() != sheets_ids.len() {
        let found: HashSet<&str> = sheets.iter().map(|s| s.id.as_str()).collect();
        let missing: Vec<String> = sheets_ids
            .iter()
            .filter(|id| !found.contains(id.as_str()))
            .cloned()
            .collect();
        return Err(AppError::SheetNotFound(missing.join(", ")));
    }

    if build_trigger(schedule_type, schedule_config).is_none() {
        return Err(AppError::Validation(
            "schedule_config is not valid for the schedule type".to_string(),
        ));
    }
    Ok(())
}
