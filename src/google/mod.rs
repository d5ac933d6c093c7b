// sheetbackup/src/google/mod.rs
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::errors::{AppError, Result};

const SHEETS_API_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const EXPORT_URL: &str = "https://docs.google.com/spreadsheets/d";

/// Source of exportable spreadsheet snapshots.
#[async_trait]
pub trait SpreadsheetExporter: Send + Sync {
    /// Exports the whole spreadsheet as one xlsx archive.
    async fn export_xlsx(&self, spreadsheet_id: &str) -> Result<Vec<u8>>;

    /// Tab titles of the spreadsheet, in workbook order.
    async fn sheet_titles(&self, spreadsheet_id: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Deserialize)]
struct SpreadsheetResponse {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

/// Google Sheets client authenticated with a bearer access token.
pub struct GoogleSheetsClient {
    client: Client,
    access_token: String,
}

impl GoogleSheetsClient {
    pub fn new(access_token: String) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            client,
            access_token,
        })
    }
}

#[async_trait]
impl SpreadsheetExporter for GoogleSheetsClient {
    async fn export_xlsx(&self, spreadsheet_id: &str) -> Result<Vec<u8>> {
        let url = format!("{EXPORT_URL}/{spreadsheet_id}/export?format=xlsx");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Export(format!(
                "export of {} returned HTTP {}",
                spreadsheet_id,
                response.status()
            )));
        }

        Ok(response.bytes().await?.to_vec())
    }

    async fn sheet_titles(&self, spreadsheet_id: &str) -> Result<Vec<String>> {
        let url = format!("{SHEETS_API_URL}/{spreadsheet_id}?fields=sheets.properties.title");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Export(format!(
                "metadata request for {} returned HTTP {}",
                spreadsheet_id,
                response.status()
            )));
        }

        let body: SpreadsheetResponse = response.json().await?;
        Ok(body
            .sheets
            .into_iter()
            .map(|s| s.properties.title)
            .collect())
    }
}
