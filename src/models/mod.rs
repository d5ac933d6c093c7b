// sheetbackup/src/models/mod.rs
//
// Persisted entities and the JSON shapes exchanged with callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tracked Google Sheets spreadsheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sheet {
    pub id: String,
    pub name: String,
    pub spreadsheet_id: String,
    pub credentials_id: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_backup: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Completed,
    Failed,
    Processing,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
            BackupStatus::Processing => "processing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(BackupStatus::Completed),
            "failed" => Some(BackupStatus::Failed),
            "processing" => Some(BackupStatus::Processing),
            _ => None,
        }
    }
}

/// Outcome of writing one export to one storage destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageResult {
    pub storage_type: String,
    pub file_path: String,
    pub size: i64,
    pub storage_params: Option<Value>,
}

/// Workbook metadata pulled out of the exported file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub sheets: Vec<String>,
    pub rows_count: i64,
}

/// One export-and-fan-out run for one sheet, as persisted.
///
/// The top-level `file_path`/`size`/`storage_type`/`storage_params` mirror
/// the first entry of `storage_results` (the primary destination).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backup {
    pub id: String,
    pub sheet_id: String,
    pub filename: String,
    pub file_path: String,
    pub size: i64,
    pub status: BackupStatus,
    pub storage_type: String,
    pub storage_params: Option<Value>,
    pub storage_results: Vec<StorageResult>,
    pub backup_metadata: Option<BackupMetadata>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    Interval,
    Cron,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Interval => "interval",
            ScheduleType::Cron => "cron",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "interval" => Some(ScheduleType::Interval),
            "cron" => Some(ScheduleType::Cron),
            _ => None,
        }
    }
}

/// Interval trigger fields. All optional; zero counts as absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntervalSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hours: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weeks: Option<u32>,
}

/// A cron field value as supplied by callers: either a number or an
/// expression string like `"*/5"` or `"1,3,5"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CronFieldValue {
    Number(i64),
    Expr(String),
}

impl CronFieldValue {
    pub fn as_expr(&self) -> String {
        match self {
            CronFieldValue::Number(n) => n.to_string(),
            CronFieldValue::Expr(s) => s.clone(),
        }
    }
}

/// Cron trigger fields. Omitted fields mean "every value of that field".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub second: Option<CronFieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minute: Option<CronFieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hour: Option<CronFieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day: Option<CronFieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<CronFieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<CronFieldValue>,
}

/// Kind-specific schedule configuration; exactly the `interval`/`cron`
/// sub-object matching the schedule's type is expected to be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<IntervalSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron: Option<CronSpec>,
}

/// One storage destination of a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub storage_type: String,
    #[serde(default)]
    pub storage_params: Option<Value>,
}

/// A trigger definition bound to one or more sheets and one or more
/// storage destinations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub sheets_ids: Vec<String>,
    pub schedule_type: ScheduleType,
    pub schedule_config: ScheduleConfig,
    pub storage_configs: Vec<StorageConfig>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A named, reusable credential/configuration bundle for a storage kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Integration {
    pub id: i64,
    pub kind: String,
    pub name: String,
    pub settings: Value,
    pub description: Option<String>,
}

/// What a storage backend reports about a stored file.
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub path: String,
    pub filename: String,
    pub size: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Per-sheet entry in a multi-sheet batch result.
#[derive(Debug, Clone, Serialize)]
pub struct SheetBackupResult {
    pub sheet_id: String,
    pub sheet_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub storage_results: Vec<StorageResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The fan-out engine's result for one sheet, before persistence.
#[derive(Debug, Clone)]
pub struct BackupOutcome {
    pub filename: String,
    pub file_path: String,
    pub size: i64,
    pub status: BackupStatus,
    pub storage_type: String,
    pub storage_params: Option<Value>,
    pub backup_metadata: Option<BackupMetadata>,
    pub storage_results: Vec<StorageResult>,
}
