// sheetbackup/src/scheduler/mod.rs
pub(crate) mod trigger;

pub use trigger::{build_trigger, Trigger};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::backup;
use crate::db::MetadataStore;
use crate::google::SpreadsheetExporter;
use crate::models::Schedule;

/// How long after its scheduled time a missed firing may still run.
/// Later than this, the firing is dropped and the job waits for the
/// next one.
const MISFIRE_GRACE_SECONDS: i64 = 3_600;

/// Maps schedule ids to recurring background jobs. The mapping itself
/// is the only shared mutable state; durability comes from re-deriving
/// all jobs from the store's active schedules at process start.
pub struct SchedulerService {
    store: MetadataStore,
    exporter: Arc<dyn SpreadsheetExporter>,
    jobs: Mutex<HashMap<String, JoinHandle<()>>>,
    running: AtomicBool,
}

impl SchedulerService {
    pub fn new(store: MetadataStore, exporter: Arc<dyn SpreadsheetExporter>) -> Self {
        tracing::info!("scheduler started");
        Self {
            store,
            exporter,
            jobs: Mutex::new(HashMap::new()),
            running: AtomicBool::new(true),
        }
    }

    /// Registers a recurring job for the schedule and returns its job
    /// id. Returns `None` (after logging) when a referenced sheet is
    /// missing or the trigger cannot be built. Adding the same schedule
    /// id again replaces the previous job.
    pub async fn add_schedule(&self, schedule: &Schedule) -> Option<String> {
        let sheets = match self.store.sheets_by_ids(&schedule.sheets_ids).await {
            Ok(sheets) => sheets,
            Err(e) => {
                tracing::error!("could not load sheets for schedule {}: {e}", schedule.id);
                return None;
            }
        };
        if sheets.len() != schedule.sheets_ids.len() {
            let found: HashSet<&str> = sheets.iter().map(|s| s.id.as_str()).collect();
            let missing: Vec<&str> = schedule
                .sheets_ids
                .iter()
                .map(String::as_str)
                .filter(|id| !found.contains(id))
                .collect();
            tracing::error!("schedule {} references missing sheets: {missing:?}", schedule.id);
            return None;
        }

        let trigger = build_trigger(schedule.schedule_type, &schedule.schedule_config)?;

        let job_id = job_id_for(&schedule.id);
        let handle = tokio::spawn(run_schedule_job(
            self.store.clone(),
            self.exporter.clone(),
            schedule.id.clone(),
            trigger,
        ));
        let mut jobs = self.jobs.lock().await;
        if let Some(previous) = jobs.insert(schedule.id.clone(), handle) {
            previous.abort();
        }
        tracing::info!("registered schedule {} as job {job_id}", schedule.id);
        Some(job_id)
    }

    /// Removes any existing job for the schedule, then re-registers it
    /// only while it is still active.
    pub async fn update_schedule(&self, schedule: &Schedule) -> Option<String> {
        self.remove_schedule(&schedule.id).await;
        if schedule.is_active {
            self.add_schedule(schedule).await
        } else {
            None
        }
    }

    pub async fn remove_schedule(&self, schedule_id: &str) {
        let mut jobs = self.jobs.lock().await;
        match jobs.remove(schedule_id) {
            Some(handle) => {
                handle.abort();
                tracing::info!("removed schedule {schedule_id} from the scheduler");
            }
            None => tracing::warn!("no job registered for schedule {schedule_id}"),
        }
    }

    /// Re-attaches every active schedule from the store. One broken
    /// schedule never prevents the others from being registered.
    pub async fn init_from_store(&self) {
        let schedules = match self.store.active_schedules().await {
            Ok(schedules) => schedules,
            Err(e) => {
                tracing::error!("failed to load active schedules: {e}");
                return;
            }
        };

        let total = schedules.len();
        let mut registered = 0;
        for schedule in &schedules {
            if self.add_schedule(schedule).await.is_some() {
                registered += 1;
            }
        }
        tracing::info!("initialized {registered}/{total} schedules from the store");
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Stops every job. Only the first call does anything.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut jobs = self.jobs.lock().await;
        for (_, handle) in jobs.drain() {
            handle.abort();
        }
        tracing::info!("scheduler stopped");
    }
}

fn job_id_for(schedule_id: &str) -> String {
    format!("backup_{schedule_id}")
}

async fn run_schedule_job(
    store: MetadataStore,
    exporter: Arc<dyn SpreadsheetExporter>,
    schedule_id: String,
    trigger: Trigger,
) {
    let Some(mut next) = trigger.first_fire(Utc::now()) else {
        tracing::warn!("schedule {schedule_id} has no upcoming fire time");
        return;
    };

    loop {
        let now = Utc::now();
        if next > now {
            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
            continue;
        }

        if (now - next).num_seconds() > MISFIRE_GRACE_SECONDS {
            tracing::warn!("skipping misfired run of schedule {schedule_id} planned for {next}");
        } else {
            fire_schedule(&store, exporter.as_ref(), &schedule_id).await;
        }

        next = match trigger.next_after(next) {
            Some(next) => next,
            None => {
                tracing::info!("schedule {schedule_id} has no further fire times");
                break;
            }
        };
    }
}

/// One firing. The schedule and its sheets are re-read from the store
/// so edits made after registration are picked up, and every firing
/// works with its own pooled connections.
async fn fire_schedule(store: &MetadataStore, exporter: &dyn SpreadsheetExporter, schedule_id: &str) {
    let schedule = match store.get_schedule(schedule_id).await {
        Ok(Some(schedule)) => schedule,
        Ok(None) => {
            tracing::warn!("schedule {schedule_id} no longer exists, skipping run");
            return;
        }
        Err(e) => {
            tracing::error!("could not load schedule {schedule_id}: {e}");
            return;
        }
    };
    if !schedule.is_active {
        tracing::info!("schedule {schedule_id} is no longer active, skipping run");
        return;
    }

    let sheets = match store.sheets_by_ids(&schedule.sheets_ids).await {
        Ok(sheets) => sheets,
        Err(e) => {
            tracing::error!("could not load sheets of schedule {schedule_id}: {e}");
            return;
        }
    };

    tracing::info!("running schedule {schedule_id} over {} sheet(s)", sheets.len());
    let results = backup::backup_sheets(exporter, &sheets, &schedule.storage_configs, store).await;
    let succeeded = results.iter().filter(|r| r.success).count();
    tracing::info!(
        "schedule {schedule_id} finished: {succeeded}/{} backups succeeded",
        results.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::tests::{interval_schedule, temp_store};
    use crate::errors::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    struct FakeExporter;

    #[async_trait]
    impl SpreadsheetExporter for FakeExporter {
        async fn export_xlsx(&self, _spreadsheet_id: &str) -> Result<Vec<u8>> {
            Ok(b"workbook bytes".to_vec())
        }

        async fn sheet_titles(&self, _spreadsheet_id: &str) -> Result<Vec<String>> {
            Ok(vec!["Sheet1".to_string()])
        }
    }

    #[tokio::test]
    async fn test_adding_same_schedule_twice_replaces_the_job() {
        let (_dir, store) = temp_store().await;
        let sheet = store.create_sheet("A", "ext-a", None).await.expect("sheet");
        let schedule = interval_schedule(vec![sheet.id.clone()], 3600);

        let scheduler = SchedulerService::new(store, Arc::new(FakeExporter));
        let first = scheduler.add_schedule(&schedule).await;
        let second = scheduler.add_schedule(&schedule).await;

        assert!(first.is_some());
        assert_eq!(first, second);
        assert_eq!(scheduler.job_count().await, 1);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_add_fails_for_missing_sheet() {
        let (_dir, store) = temp_store().await;
        let schedule = interval_schedule(vec!["no-such-sheet".to_string()], 3600);

        let scheduler = SchedulerService::new(store, Arc::new(FakeExporter));
        assert!(scheduler.add_schedule(&schedule).await.is_none());
        assert_eq!(scheduler.job_count().await, 0);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_of_inactive_schedule_registers_nothing() {
        let (_dir, store) = temp_store().await;
        let sheet = store.create_sheet("A", "ext-a", None).await.expect("sheet");
        let mut schedule = interval_schedule(vec![sheet.id.clone()], 3600);

        let scheduler = SchedulerService::new(store, Arc::new(FakeExporter));
        scheduler.add_schedule(&schedule).await;
        assert_eq!(scheduler.job_count().await, 1);

        schedule.is_active = false;
        assert!(scheduler.update_schedule(&schedule).await.is_none());
        assert_eq!(scheduler.job_count().await, 0);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_remove_of_unknown_schedule_is_not_an_error() {
        let (_dir, store) = temp_store().await;
        let scheduler = SchedulerService::new(store, Arc::new(FakeExporter));
        scheduler.remove_schedule("never-registered").await;
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_init_from_store_skips_broken_schedules() {
        let (_dir, store) = temp_store().await;
        let sheet = store.create_sheet("A", "ext-a", None).await.expect("sheet");

        let good = interval_schedule(vec![sheet.id.clone()], 3600);
        let mut inactive = interval_schedule(vec![sheet.id.clone()], 3600);
        inactive.is_active = false;
        let broken = interval_schedule(vec!["missing-sheet".to_string()], 3600);
        store.create_schedule(&good).await.expect("schedule");
        store.create_schedule(&inactive).await.expect("schedule");
        store.create_schedule(&broken).await.expect("schedule");

        let scheduler = SchedulerService::new(store, Arc::new(FakeExporter));
        scheduler.init_from_store().await;
        assert_eq!(scheduler.job_count().await, 1);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_registered_job_fires_and_persists_a_backup() {
        let (_dir, store) = temp_store().await;
        let backup_dir = TempDir::new().expect("temp dir");
        let sheet = store.create_sheet("A", "ext-a", None).await.expect("sheet");

        let mut schedule = interval_schedule(vec![sheet.id.clone()], 1);
        schedule.storage_configs[0].storage_params =
            Some(json!({"base_path": backup_dir.path().display().to_string()}));
        store.create_schedule(&schedule).await.expect("schedule");

        let scheduler = SchedulerService::new(store.clone(), Arc::new(FakeExporter));
        scheduler.init_from_store().await;

        // First fire is one period (1s) after registration; leave slack.
        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        scheduler.shutdown().await;

        let backups = store.list_backups(Some(&sheet.id)).await.expect("backups");
        assert!(!backups.is_empty(), "scheduled job should have produced a backup");
        assert!(backups[0].filename.starts_with("A_"));
        let sheet = store.get_sheet(&sheet.id).await.expect("get").expect("sheet");
        assert!(sheet.last_backup.is_some());
    }

    #[tokio::test]
    async fn test_shutdown_clears_jobs_and_is_idempotent() {
        let (_dir, store) = temp_store().await;
        let sheet = store.create_sheet("A", "ext-a", None).await.expect("sheet");
        let schedule = interval_schedule(vec![sheet.id.clone()], 3600);

        let scheduler = SchedulerService::new(store, Arc::new(FakeExporter));
        scheduler.add_schedule(&schedule).await;
        scheduler.shutdown().await;
        assert_eq!(scheduler.job_count().await, 0);
        scheduler.shutdown().await;
    }
}
