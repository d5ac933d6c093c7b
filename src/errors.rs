use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Sheet not found: {0}")]
    SheetNotFound(String),

    #[error("Schedule not found: {0}")]
    ScheduleNotFound(String),

    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    #[error("Integration not found: {0}")]
    IntegrationNotFound(String),

    #[error("Integration {id} has kind '{actual}' but '{requested}' was requested")]
    IntegrationKindMismatch {
        id: String,
        actual: String,
        requested: String,
    },

    #[error("No {0} integration is configured")]
    NoDefaultIntegration(String),

    #[error("Missing required storage parameter: {0}")]
    MissingParameter(String),

    #[error("Unknown storage type: {0}")]
    UnknownStorageType(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage write failed: {0}")]
    StorageWrite(String),

    #[error("Not found in storage: {0}")]
    StorageNotFound(String),

    #[error("Spreadsheet export failed: {0}")]
    Export(String),

    #[error("Bitrix24 API error: {0}")]
    BitrixApi(String),

    #[error("No storage destination accepted the file")]
    AllStoragesFailed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
