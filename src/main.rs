//! Google Sheets Backup Service
//!
//! Exports tracked spreadsheets to xlsx archives on interval or cron
//! schedules and fans each export out to the configured storage
//! destinations (local directory, Bitrix24 Disk).

// sheetbackup/src/main.rs
mod backup;
mod config;
mod db;
mod errors;
mod google;
mod integrations;
mod models;
mod scheduler;
mod schedules;
mod sheets;
mod storage;

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;

use config::AppConfig;
use db::MetadataStore;
use google::GoogleSheetsClient;
use scheduler::SchedulerService;

/// Main entry point for the backup service
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run_app().await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    // Expects config.json next to the executable, or the project root
    // when running with `cargo run`. Missing file falls back to defaults
    // plus environment variables.
    let config_path = PathBuf::from("config.json");
    let app_config = AppConfig::load_from_json(&config_path).context(format!(
        "Failed to load application configuration from {}",
        config_path.display()
    ))?;

    let args: Vec<String> = env::args().collect();
    let choice = if args.len() > 1 {
        args[1].trim().to_string()
    } else {
        prompt_choice()?
    };

    match choice.as_str() {
        "1" | "serve" => {
            println!("🚀 Starting Scheduler Service...");
            run_serve(&app_config).await.context("Serve process failed")?;
        }
        "2" | "backup" => {
            println!("🚀 Starting Backup Run...");
            run_backup_now(&app_config, args.get(2).map(String::as_str))
                .await
                .context("Backup run failed")?;
        }
        "3" | "list" => {
            run_list(&app_config).await.context("Listing failed")?;
        }
        "register" => {
            let spreadsheet_id = args
                .get(2)
                .context("usage: sheetbackup register <spreadsheet_id> [name]")?;
            run_register(&app_config, spreadsheet_id, args.get(3).cloned())
                .await
                .context("Sheet registration failed")?;
        }
        "remove-sheet" => {
            let sheet_id = args.get(2).context("usage: sheetbackup remove-sheet <sheet_id>")?;
            run_remove_sheet(&app_config, sheet_id)
                .await
                .context("Sheet removal failed")?;
        }
        "fetch" => {
            let backup_id = args
                .get(2)
                .context("usage: sheetbackup fetch <backup_id> [output_path]")?;
            run_fetch(&app_config, backup_id, args.get(3).cloned())
                .await
                .context("Backup fetch failed")?;
        }
        "remove-backup" => {
            let backup_id = args
                .get(2)
                .context("usage: sheetbackup remove-backup <backup_id>")?;
            let store = open_store(&app_config).await?;
            backup::delete_backup(&store, backup_id)
                .await
                .context("Backup removal failed")?;
            println!("🗑 Removed backup {}", backup_id);
        }
        "test-bitrix" => {
            run_test_bitrix(&app_config)
                .await
                .context("Bitrix24 connection test failed")?;
        }
        _ => {
            println!("❌ Invalid choice. Please enter '1' (serve), '2' (backup), or '3' (list).");
            anyhow::bail!("Invalid operation choice");
        }
    }
    Ok(())
}

/// Prompts user to select an operation
///
/// Returns the user's choice as String
fn prompt_choice() -> Result<String> {
    use std::io::{stdin, stdout, Write};

    println!("Select an operation:");
    println!("1. Run Scheduler Service (or type 'serve')");
    println!("2. Run Backups Now (or type 'backup')");
    println!("3. List Sheets and Backups (or type 'list')");
    print!("Enter your choice: ");
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin().read_line(&mut input).context("Failed to read user input")?;
    Ok(input.trim().to_string())
}

async fn open_store(app_config: &AppConfig) -> Result<MetadataStore> {
    let store = MetadataStore::connect(&app_config.database_url)
        .await
        .context(format!("Failed to open database {}", app_config.database_url))?;

    // Seed the Bitrix24 integration from config.json once, so schedules
    // can reference the default integration without further setup.
    if let Some(bitrix) = &app_config.bitrix {
        if store
            .default_integration(storage::STORAGE_TYPE_BITRIX)
            .await?
            .is_none()
        {
            let settings = json!({
                "webhook_url": bitrix.webhook_url,
                "folder_id": bitrix.folder_id,
                "base_path": bitrix.base_path,
            });
            integrations::save_bitrix_settings(&store, settings).await?;
            println!("📦 Saved Bitrix24 integration from config.json");
        }
    }

    Ok(store)
}

fn build_exporter(app_config: &AppConfig) -> Result<GoogleSheetsClient> {
    let token = app_config
        .google_access_token
        .clone()
        .context("GOOGLE_ACCESS_TOKEN must be set (env or config.json) for backup operations")?;
    Ok(GoogleSheetsClient::new(token)?)
}

/// Runs the scheduler until Ctrl-C.
async fn run_serve(app_config: &AppConfig) -> Result<()> {
    let store = open_store(app_config).await?;
    let exporter = build_exporter(app_config)?;

    let scheduler = SchedulerService::new(store.clone(), Arc::new(exporter));
    scheduler.init_from_store().await;
    println!(
        "📅 Scheduler running with {} job(s). Press Ctrl-C to stop.",
        scheduler.job_count().await
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    println!("\n🛑 Shutting down...");
    scheduler.shutdown().await;
    Ok(())
}

/// Executes one schedule (by id) or every active schedule immediately.
/// With no schedules configured, backs up every tracked sheet to the
/// local backup directory instead.
async fn run_backup_now(app_config: &AppConfig, schedule_id: Option<&str>) -> Result<()> {
    let store = open_store(app_config).await?;
    let exporter = build_exporter(app_config)?;

    let schedules = match schedule_id {
        Some(id) => {
            let schedule = store
                .get_schedule(id)
                .await?
                .context(format!("Schedule {} not found", id))?;
            vec![schedule]
        }
        None => store.active_schedules().await?,
    };

    if schedules.is_empty() {
        println!("ℹ No active schedules; backing up all tracked sheets to the local directory.");
        let sheets = store.list_sheets().await?;
        if sheets.is_empty() {
            println!("ℹ No sheets registered. Use 'sheetbackup register <spreadsheet_id>' first.");
            return Ok(());
        }
        let configs = vec![models::StorageConfig {
            storage_type: storage::STORAGE_TYPE_LOCAL.to_string(),
            storage_params: Some(json!({
                "base_path": app_config.local_backup_dir.display().to_string()
            })),
        }];
        let results = backup::backup_sheets(&exporter, &sheets, &configs, &store).await;
        print_results(&results);
        return Ok(());
    }

    for schedule in &schedules {
        println!("📋 Executing schedule {}", schedule.id);
        match schedules::execute_schedule(&store, &exporter, &schedule.id).await {
            Ok(summary) => {
                println!(
                    "   {}/{} sheets backed up successfully",
                    summary.successful_backups, summary.sheets_count
                );
                print_results(&summary.results);
            }
            Err(e) => eprintln!("❌ Schedule {} failed: {}", schedule.id, e),
        }
    }
    Ok(())
}

fn print_results(results: &[models::SheetBackupResult]) {
    for result in results {
        if result.success {
            println!(
                "   ✅ {} -> {} destination(s)",
                result.sheet_name,
                result.storage_results.len()
            );
        } else {
            println!(
                "   ❌ {}: {}",
                result.sheet_name,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

async fn run_list(app_config: &AppConfig) -> Result<()> {
    let store = open_store(app_config).await?;

    let sheets = store.list_sheets().await?;
    println!("📄 Sheets ({}):", sheets.len());
    for sheet in &sheets {
        let last_backup = sheet
            .last_backup
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "   {} | {} | spreadsheet {} | last backup: {}",
            sheet.id, sheet.name, sheet.spreadsheet_id, last_backup
        );
    }

    let backups = store.list_backups(None).await?;
    println!("🗂 Backups ({} total, newest first):", backups.len());
    for backup in backups.iter().take(10) {
        println!(
            "   {} | {} | {} bytes | {} | {} destination(s)",
            backup.created_at.format("%Y-%m-%d %H:%M:%S"),
            backup.filename,
            backup.size,
            backup.status.as_str(),
            backup.storage_results.len()
        );
    }

    let schedules = store.list_schedules().await?;
    println!("📅 Schedules ({}):", schedules.len());
    for schedule in &schedules {
        println!(
            "   {} | {} | {} sheet(s) | {} destination(s) | {}",
            schedule.id,
            schedule.schedule_type.as_str(),
            schedule.sheets_ids.len(),
            schedule.storage_configs.len(),
            if schedule.is_active { "active" } else { "inactive" }
        );
    }

    let integrations = store.list_integrations().await?;
    println!("🔌 Integrations ({}):", integrations.len());
    for integration in &integrations {
        println!("   {} | {} | {}", integration.id, integration.kind, integration.name);
    }
    Ok(())
}

async fn run_remove_sheet(app_config: &AppConfig, sheet_id: &str) -> Result<()> {
    let store = open_store(app_config).await?;
    // A one-shot CLI process has no running jobs to unregister.
    sheets::delete_sheet(&store, None, sheet_id).await?;
    println!("🗑 Removed sheet {} and its backups/schedules", sheet_id);
    Ok(())
}

async fn run_fetch(
    app_config: &AppConfig,
    backup_id: &str,
    output_path: Option<String>,
) -> Result<()> {
    let store = open_store(app_config).await?;
    let backup = store
        .get_backup(backup_id)
        .await?
        .context(format!("Backup {} not found", backup_id))?;

    let data = backup::fetch_backup(&store, backup_id).await?;
    let output_path = output_path.unwrap_or_else(|| backup.filename.clone());
    std::fs::write(&output_path, &data)
        .context(format!("Failed to write backup to {}", output_path))?;
    println!("💾 Wrote {} bytes to {}", data.len(), output_path);
    Ok(())
}

async fn run_test_bitrix(app_config: &AppConfig) -> Result<()> {
    let store = open_store(app_config).await?;
    let integration = store
        .default_integration(storage::STORAGE_TYPE_BITRIX)
        .await?
        .context("No Bitrix24 integration configured (config.json or saved integration)")?;
    let webhook_url = integration.settings["webhook_url"]
        .as_str()
        .context("Saved Bitrix24 integration has no webhook_url")?;

    integrations::test_bitrix_connection(webhook_url).await?;
    println!("✅ Bitrix24 connection ok");

    let folders = integrations::bitrix_folders(&store).await?;
    println!("📁 Visible folders ({}):", folders.len());
    for folder in folders {
        println!("   {} | {}{}", folder.id, folder.path, folder.name);
    }
    Ok(())
}

async fn run_register(
    app_config: &AppConfig,
    spreadsheet_id: &str,
    name: Option<String>,
) -> Result<()> {
    let store = open_store(app_config).await?;

    // Verify access when a token is available; register blind otherwise.
    let sheet = match build_exporter(app_config) {
        Ok(exporter) => {
            sheets::register_sheet(&store, Some(&exporter), spreadsheet_id, name).await?
        }
        Err(_) => {
            println!("⚠ No Google access token configured; registering without verification.");
            sheets::register_sheet(&store, None, spreadsheet_id, name).await?
        }
    };

    println!("✅ Registered sheet '{}' with id {}", sheet.name, sheet.id);
    Ok(())
}
