// sheetbackup/src/db/store.rs
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::{
    Backup, BackupMetadata, BackupStatus, Integration, Schedule, ScheduleConfig, ScheduleType,
    Sheet, StorageConfig, StorageResult,
};

use super::schema::SCHEMA;

/// Persistence for Sheet, Backup, Schedule and Integration records.
///
/// Cheap to clone; every caller shares the underlying pool, and each
/// query checks a connection out on demand (scheduled jobs never hold a
/// connection across firings).
#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    /// Opens (and creates if missing) the sqlite database behind
    /// `database_url`, e.g. `sqlite://data/app.db`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        // Make sure the parent directory exists before sqlite tries to
        // create the file.
        if let Some(path) = database_url
            .strip_prefix("sqlite://")
            .or_else(|| database_url.strip_prefix("sqlite:"))
        {
            if path != ":memory:" && !path.is_empty() {
                if let Some(parent) = Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        Ok(Self { pool })
    }

    // Sheet operations

    pub async fn create_sheet(
        &self,
        name: &str,
        spreadsheet_id: &str,
        credentials_id: Option<&str>,
    ) -> Result<Sheet> {
        let sheet = Sheet {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            spreadsheet_id: spreadsheet_id.to_string(),
            credentials_id: credentials_id.map(|s| s.to_string()),
            last_synced_at: None,
            last_backup: None,
            created_at: Utc::now(),
            updated_at: None,
        };

        sqlx::query(
            "INSERT INTO sheets (id, name, spreadsheet_id, credentials_id, last_synced_at, last_backup, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&sheet.id)
        .bind(&sheet.name)
        .bind(&sheet.spreadsheet_id)
        .bind(&sheet.credentials_id)
        .bind(sheet.last_synced_at)
        .bind(sheet.last_backup)
        .bind(sheet.created_at)
        .bind(sheet.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(sheet)
    }

    pub async fn get_sheet(&self, id: &str) -> Result<Option<Sheet>> {
        let row = sqlx::query("SELECT * FROM sheets WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| sheet_from_row(&r)).transpose()
    }

    pub async fn list_sheets(&self) -> Result<Vec<Sheet>> {
        let rows = sqlx::query("SELECT * FROM sheets ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(sheet_from_row).collect()
    }

    /// Fetches sheets one id at a time, preserving the order of `ids`.
    /// Missing ids are simply absent from the result.
    pub async fn sheets_by_ids(&self, ids: &[String]) -> Result<Vec<Sheet>> {
        let mut sheets = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(sheet) = self.get_sheet(id).await? {
                sheets.push(sheet);
            }
        }
        Ok(sheets)
    }

    pub async fn update_sheet_last_backup(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE sheets SET last_backup = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(at)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Deletes a sheet together with its backups and every schedule that
    /// references it.
    pub async fn delete_sheet(&self, id: &str) -> Result<bool> {
        let schedules = self.schedules_for_sheet(id).await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM backups WHERE sheet_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        for schedule in &schedules {
            sqlx::query("DELETE FROM schedules WHERE id = ?1")
                .bind(&schedule.id)
                .execute(&mut *tx)
                .await?;
        }
        let deleted = sqlx::query("DELETE FROM sheets WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        Ok(deleted > 0)
    }

    // Backup operations

    pub async fn create_backup(&self, backup: &Backup) -> Result<()> {
        sqlx::query(
            "INSERT INTO backups (id, sheet_id, filename, file_path, size, status, storage_type, storage_params, storage_results, backup_metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&backup.id)
        .bind(&backup.sheet_id)
        .bind(&backup.filename)
        .bind(&backup.file_path)
        .bind(backup.size)
        .bind(backup.status.as_str())
        .bind(&backup.storage_type)
        .bind(json_column(&backup.storage_params)?)
        .bind(Some(serde_json::to_string(&backup.storage_results)?))
        .bind(
            backup
                .backup_metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(backup.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_backup(&self, id: &str) -> Result<Option<Backup>> {
        let row = sqlx::query("SELECT * FROM backups WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| backup_from_row(&r)).transpose()
    }

    pub async fn list_backups(&self, sheet_id: Option<&str>) -> Result<Vec<Backup>> {
        let rows = match sheet_id {
            Some(sheet_id) => {
                sqlx::query(
                    "SELECT * FROM backups WHERE sheet_id = ?1 ORDER BY created_at DESC",
                )
                .bind(sheet_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM backups ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(backup_from_row).collect()
    }

    pub async fn delete_backup(&self, id: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM backups WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    // Schedule operations

    pub async fn create_schedule(&self, schedule: &Schedule) -> Result<()> {
        sqlx::query(
            "INSERT INTO schedules (id, sheets_ids, schedule_type, schedule_config, storage_configs, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&schedule.id)
        .bind(serde_json::to_string(&schedule.sheets_ids)?)
        .bind(schedule.schedule_type.as_str())
        .bind(serde_json::to_string(&schedule.schedule_config)?)
        .bind(serde_json::to_string(&schedule.storage_configs)?)
        .bind(schedule.is_active)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_schedule(&self, schedule: &Schedule) -> Result<()> {
        sqlx::query(
            "UPDATE schedules SET sheets_ids = ?1, schedule_type = ?2, schedule_config = ?3, storage_configs = ?4, is_active = ?5, updated_at = ?6 WHERE id = ?7",
        )
        .bind(serde_json::to_string(&schedule.sheets_ids)?)
        .bind(schedule.schedule_type.as_str())
        .bind(serde_json::to_string(&schedule.schedule_config)?)
        .bind(serde_json::to_string(&schedule.storage_configs)?)
        .bind(schedule.is_active)
        .bind(schedule.updated_at)
        .bind(&schedule.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_schedule(&self, id: &str) -> Result<Option<Schedule>> {
        let row = sqlx::query("SELECT * FROM schedules WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| schedule_from_row(&r)).transpose()
    }

    pub async fn list_schedules(&self) -> Result<Vec<Schedule>> {
        let rows = sqlx::query("SELECT * FROM schedules ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        Ok(collect_schedules(&rows))
    }

    pub async fn active_schedules(&self) -> Result<Vec<Schedule>> {
        let rows = sqlx::query("SELECT * FROM schedules WHERE is_active = 1 ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        Ok(collect_schedules(&rows))
    }

    /// Schedules whose `sheets_ids` contain the given sheet id. The
    /// membership test runs over the deserialized list; sqlite sees the
    /// column as opaque text.
    pub async fn schedules_for_sheet(&self, sheet_id: &str) -> Result<Vec<Schedule>> {
        let all = self.list_schedules().await?;
        Ok(all
            .into_iter()
            .filter(|s| s.sheets_ids.iter().any(|id| id == sheet_id))
            .collect())
    }

    pub async fn delete_schedule(&self, id: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM schedules WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    // Integration operations

    pub async fn integration_by_id(&self, id: i64) -> Result<Option<Integration>> {
        let row = sqlx::query("SELECT * FROM integrations WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| integration_from_row(&r)).transpose()
    }

    /// The first persisted integration of a kind acts as the default for
    /// that kind.
    pub async fn default_integration(&self, kind: &str) -> Result<Option<Integration>> {
        let row = sqlx::query("SELECT * FROM integrations WHERE kind = ?1 ORDER BY id LIMIT 1")
            .bind(kind)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| integration_from_row(&r)).transpose()
    }

    pub async fn list_integrations(&self) -> Result<Vec<Integration>> {
        let rows = sqlx::query("SELECT * FROM integrations ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(integration_from_row).collect()
    }

    /// Creates or updates the default integration of `kind`.
    pub async fn save_integration(
        &self,
        kind: &str,
        name: &str,
        settings: &Value,
        description: Option<&str>,
    ) -> Result<Integration> {
        if let Some(existing) = self.default_integration(kind).await? {
            sqlx::query(
                "UPDATE integrations SET name = ?1, settings = ?2, description = ?3 WHERE id = ?4",
            )
            .bind(name)
            .bind(serde_json::to_string(settings)?)
            .bind(description)
            .bind(existing.id)
            .execute(&self.pool)
            .await?;
            Ok(Integration {
                id: existing.id,
                kind: kind.to_string(),
                name: name.to_string(),
                settings: settings.clone(),
                description: description.map(|s| s.to_string()),
            })
        } else {
            let result = sqlx::query(
                "INSERT INTO integrations (kind, name, settings, description) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(kind)
            .bind(name)
            .bind(serde_json::to_string(settings)?)
            .bind(description)
            .execute(&self.pool)
            .await?;
            Ok(Integration {
                id: result.last_insert_rowid(),
                kind: kind.to_string(),
                name: name.to_string(),
                settings: settings.clone(),
                description: description.map(|s| s.to_string()),
            })
        }
    }
}

fn json_column(value: &Option<Value>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(|v| serde_json::to_string(v).map_err(AppError::from))
        .transpose()
}

/// One unreadable row (bad kind tag, mangled JSON) must not hide the
/// others from list callers; it is logged and skipped instead.
fn collect_schedules(rows: &[SqliteRow]) -> Vec<Schedule> {
    rows.iter()
        .filter_map(|row| match schedule_from_row(row) {
            Ok(schedule) => Some(schedule),
            Err(e) => {
                tracing::warn!("skipping unreadable schedule row: {e}");
                None
            }
        })
        .collect()
}

fn parse_json_column<T: serde::de::DeserializeOwned>(raw: Option<String>) -> Result<Option<T>> {
    raw.map(|s| serde_json::from_str(&s).map_err(AppError::from))
        .transpose()
}

fn sheet_from_row(row: &SqliteRow) -> Result<Sheet> {
    Ok(Sheet {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        spreadsheet_id: row.try_get("spreadsheet_id")?,
        credentials_id: row.try_get("credentials_id")?,
        last_synced_at: row.try_get("last_synced_at")?,
        last_backup: row.try_get("last_backup")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn backup_from_row(row: &SqliteRow) -> Result<Backup> {
    let status: String = row.try_get("status")?;
    let status = BackupStatus::parse(&status)
        .ok_or_else(|| AppError::Validation(format!("unknown backup status '{status}'")))?;
    let storage_results: Option<Vec<StorageResult>> =
        parse_json_column(row.try_get("storage_results")?)?;
    let backup_metadata: Option<BackupMetadata> =
        parse_json_column(row.try_get("backup_metadata")?)?;

    Ok(Backup {
        id: row.try_get("id")?,
        sheet_id: row.try_get("sheet_id")?,
        filename: row.try_get("filename")?,
        file_path: row.try_get("file_path")?,
        size: row.try_get("size")?,
        status,
        storage_type: row.try_get("storage_type")?,
        storage_params: parse_json_column(row.try_get("storage_params")?)?,
        storage_results: storage_results.unwrap_or_default(),
        backup_metadata,
        created_at: row.try_get("created_at")?,
    })
}

fn schedule_from_row(row: &SqliteRow) -> Result<Schedule> {
    let schedule_type: String = row.try_get("schedule_type")?;
    let schedule_type = ScheduleType::parse(&schedule_type)
        .ok_or_else(|| AppError::Validation(format!("unknown schedule type '{schedule_type}'")))?;
    let sheets_ids: Option<Vec<String>> = parse_json_column(row.try_get("sheets_ids")?)?;
    let schedule_config: Option<ScheduleConfig> =
        parse_json_column(row.try_get("schedule_config")?)?;
    let storage_configs: Option<Vec<StorageConfig>> =
        parse_json_column(row.try_get("storage_configs")?)?;

    Ok(Schedule {
        id: row.try_get("id")?,
        sheets_ids: sheets_ids.unwrap_or_default(),
        schedule_type,
        schedule_config: schedule_config.unwrap_or_default(),
        storage_configs: storage_configs.unwrap_or_default(),
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn integration_from_row(row: &SqliteRow) -> Result<Integration> {
    let settings: String = row.try_get("settings")?;
    Ok(Integration {
        id: row.try_get("id")?,
        kind: row.try_get("kind")?,
        name: row.try_get("name")?,
        settings: serde_json::from_str(&settings)?,
        description: row.try_get("description")?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{CronFieldValue, CronSpec, IntervalSpec};
    use tempfile::TempDir;

    /// Opens a store backed by a file in a fresh temp directory. The
    /// directory guard must outlive the store.
    pub(crate) async fn temp_store() -> (TempDir, MetadataStore) {
        let dir = TempDir::new().expect("temp dir");
        let url = format!("sqlite://{}", dir.path().join("test.db").display());
        let store = MetadataStore::connect(&url).await.expect("store connect");
        (dir, store)
    }

    pub(crate) fn interval_schedule(sheets_ids: Vec<String>, seconds: u32) -> Schedule {
        Schedule {
            id: Uuid::new_v4().to_string(),
            sheets_ids,
            schedule_type: ScheduleType::Interval,
            schedule_config: ScheduleConfig {
                interval: Some(IntervalSpec {
                    seconds: Some(seconds),
                    ..Default::default()
                }),
                cron: None,
            },
            storage_configs: vec![StorageConfig {
                storage_type: "local".to_string(),
                storage_params: None,
            }],
            is_active: true,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_sheet_roundtrip() -> Result<()> {
        let (_dir, store) = temp_store().await;

        let sheet = store.create_sheet("Revenue", "spreadsheet-abc", None).await?;
        let loaded = store.get_sheet(&sheet.id).await?.expect("sheet should exist");
        assert_eq!(loaded.name, "Revenue");
        assert_eq!(loaded.spreadsheet_id, "spreadsheet-abc");
        assert!(loaded.last_backup.is_none());

        let at = Utc::now();
        store.update_sheet_last_backup(&sheet.id, at).await?;
        let loaded = store.get_sheet(&sheet.id).await?.expect("sheet should exist");
        let last_backup = loaded.last_backup.expect("last_backup should be set");
        assert_eq!(last_backup.timestamp(), at.timestamp());
        Ok(())
    }

    #[tokio::test]
    async fn test_schedule_roundtrip_preserves_config() -> Result<()> {
        let (_dir, store) = temp_store().await;
        let sheet = store.create_sheet("A", "ext-a", None).await?;

        let mut schedule = interval_schedule(vec![sheet.id.clone()], 30);
        schedule.schedule_type = ScheduleType::Cron;
        schedule.schedule_config = ScheduleConfig {
            interval: None,
            cron: Some(CronSpec {
                hour: Some(CronFieldValue::Number(3)),
                minute: Some(CronFieldValue::Expr("*/15".to_string())),
                ..Default::default()
            }),
        };
        store.create_schedule(&schedule).await?;

        let loaded = store
            .get_schedule(&schedule.id)
            .await?
            .expect("schedule should exist");
        assert_eq!(loaded.schedule_type, ScheduleType::Cron);
        assert_eq!(loaded.sheets_ids, vec![sheet.id.clone()]);
        let cron = loaded.schedule_config.cron.expect("cron config");
        assert_eq!(cron.minute.map(|v| v.as_expr()), Some("*/15".to_string()));

        let for_sheet = store.schedules_for_sheet(&sheet.id).await?;
        assert_eq!(for_sheet.len(), 1);
        assert!(store.schedules_for_sheet("other").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_active_schedules_filter() -> Result<()> {
        let (_dir, store) = temp_store().await;
        let sheet = store.create_sheet("A", "ext-a", None).await?;

        let active = interval_schedule(vec![sheet.id.clone()], 10);
        let mut inactive = interval_schedule(vec![sheet.id.clone()], 10);
        inactive.is_active = false;
        store.create_schedule(&active).await?;
        store.create_schedule(&inactive).await?;

        let loaded = store.active_schedules().await?;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, active.id);
        Ok(())
    }

    #[tokio::test]
    async fn test_unreadable_schedule_rows_are_skipped_by_lists() -> Result<()> {
        let (_dir, store) = temp_store().await;
        let sheet = store.create_sheet("A", "ext-a", None).await?;
        store
            .create_schedule(&interval_schedule(vec![sheet.id.clone()], 10))
            .await?;
        // A row with a kind tag this version does not know.
        sqlx::query(
            "INSERT INTO schedules (id, sheets_ids, schedule_type, schedule_config, storage_configs, is_active, created_at)
             VALUES ('bad', '[]', 'weekly', '{}', '[]', 1, ?1)",
        )
        .bind(Utc::now())
        .execute(&store.pool)
        .await?;

        assert_eq!(store.active_schedules().await?.len(), 1);
        assert_eq!(store.list_schedules().await?.len(), 1);
        assert!(store.get_schedule("bad").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_sheet_cascades() -> Result<()> {
        let (_dir, store) = temp_store().await;
        let sheet = store.create_sheet("A", "ext-a", None).await?;
        let other = store.create_sheet("B", "ext-b", None).await?;

        store
            .create_backup(&Backup {
                id: Uuid::new_v4().to_string(),
                sheet_id: sheet.id.clone(),
                filename: "A_20240101_000000.xlsx".to_string(),
                file_path: "backups/A_20240101_000000.xlsx".to_string(),
                size: 128,
                status: BackupStatus::Completed,
                storage_type: "local".to_string(),
                storage_params: None,
                storage_results: vec![],
                backup_metadata: None,
                created_at: Utc::now(),
            })
            .await?;
        store
            .create_schedule(&interval_schedule(vec![sheet.id.clone()], 10))
            .await?;
        store
            .create_schedule(&interval_schedule(vec![other.id.clone()], 10))
            .await?;

        assert!(store.delete_sheet(&sheet.id).await?);
        assert!(store.get_sheet(&sheet.id).await?.is_none());
        assert!(store.list_backups(Some(&sheet.id)).await?.is_empty());
        // Only the schedule referencing the deleted sheet goes away.
        assert_eq!(store.list_schedules().await?.len(), 1);
        assert!(!store.delete_sheet(&sheet.id).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_default_integration_is_first_by_id() -> Result<()> {
        let (_dir, store) = temp_store().await;

        let first = store
            .save_integration(
                "bitrix",
                "Bitrix24",
                &serde_json::json!({"webhook_url": "https://one.example/rest/1/a/"}),
                None,
            )
            .await?;
        // Saving again for the same kind updates the existing row
        // instead of inserting a second one.
        let second = store
            .save_integration(
                "bitrix",
                "Bitrix24",
                &serde_json::json!({"webhook_url": "https://two.example/rest/1/b/"}),
                Some("updated"),
            )
            .await?;
        assert_eq!(first.id, second.id);

        let default = store
            .default_integration("bitrix")
            .await?
            .expect("default integration");
        assert_eq!(
            default.settings["webhook_url"],
            "https://two.example/rest/1/b/"
        );
        assert!(store.default_integration("local").await?.is_none());
        Ok(())
    }
}
