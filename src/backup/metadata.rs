// sheetbackup/src/backup/metadata.rs
use std::io::Cursor;

use calamine::{Reader, Xlsx};

use crate::models::BackupMetadata;

/// Reads tab names and the total row count out of an exported workbook.
/// Parsing problems are logged and reported as `None`; the backup itself
/// never depends on this.
pub fn extract_workbook_metadata(data: &[u8]) -> Option<BackupMetadata> {
    let mut workbook = match Xlsx::new(Cursor::new(data)) {
        Ok(workbook) => workbook,
        Err(e) => {
            tracing::warn!("could not read workbook metadata: {e}");
            return None;
        }
    };

    let sheets = workbook.sheet_names().to_owned();
    let mut rows_count = 0i64;
    for name in &sheets {
        match workbook.worksheet_range(name) {
            Ok(range) => rows_count += range.rows().count() as i64,
            Err(e) => tracing::warn!("could not read rows of tab '{name}': {e}"),
        }
    }

    Some(BackupMetadata { sheets, rows_count })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_workbook_yields_no_metadata() {
        assert!(extract_workbook_metadata(b"definitely not an xlsx file").is_none());
        assert!(extract_workbook_metadata(&[]).is_none());
    }
}
