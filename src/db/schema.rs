// sheetbackup/src/db/schema.rs
//
// Statements are executed one by one; sqlite prepared statements cannot
// hold more than one statement.

pub const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS sheets (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        spreadsheet_id TEXT NOT NULL,
        credentials_id TEXT,
        last_synced_at TEXT,
        last_backup TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS backups (
        id TEXT PRIMARY KEY,
        sheet_id TEXT NOT NULL REFERENCES sheets(id),
        filename TEXT NOT NULL,
        file_path TEXT NOT NULL,
        size INTEGER NOT NULL,
        status TEXT NOT NULL,
        storage_type TEXT NOT NULL DEFAULT 'local',
        storage_params TEXT,
        storage_results TEXT,
        backup_metadata TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS schedules (
        id TEXT PRIMARY KEY,
        sheets_ids TEXT NOT NULL,
        schedule_type TEXT NOT NULL,
        schedule_config TEXT NOT NULL,
        storage_configs TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS integrations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL,
        name TEXT NOT NULL,
        settings TEXT NOT NULL,
        description TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_backups_sheet_id ON backups(sheet_id)",
    "CREATE INDEX IF NOT EXISTS idx_integrations_kind ON integrations(kind)",
];
