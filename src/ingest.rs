use anyhow::Context;

use crate::drive::FileStore;
use crate::error::StoreError;
use crate::models::{IngestReport, PublishedSheet, Table};
use crate::sheets::SpreadsheetStore;

/// Parses a CSV extract. The first record is the header; short rows are padded to its width.
pub fn parse_csv(bytes: &[u8]) -> Result<Table, StoreError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(bytes);

    let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let width = columns.len();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let mut row: Vec<String> = record.iter().map(str::to_string).collect();
        if row.len() < width {
            row.resize(width, String::new());
        }
        rows.push(row);
    }

    Ok(Table::new(columns, rows))
}

/// Publishes each `(file, sheet)` pair from `folder_id` into `document`, replacing any
/// sheet of the same name.
pub async fn ingest<F, S>(
    files: &F,
    sheets: &S,
    folder_id: &str,
    document: &str,
    sources: &[(&str, &str)],
) -> anyhow::Result<IngestReport>
where
    F: FileStore + ?Sized,
    S: SpreadsheetStore + ?Sized,
{
    tracing::info!(folder_id, files = sources.len(), "downloading extracts");

    let mut tables = Vec::with_capacity(sources.len());
    for (file_name, sheet_name) in sources {
        let bytes = files
            .fetch(folder_id, file_name)
            .await
            .with_context(|| format!("failed to fetch '{file_name}'"))?;
        let table =
            parse_csv(&bytes).with_context(|| format!("failed to parse '{file_name}'"))?;
        tracing::info!(file_name, rows = table.len(), "loaded extract");
        tables.push((*file_name, *sheet_name, table));
    }

    let handle = sheets
        .open_or_create(document)
        .await
        .with_context(|| format!("failed to open spreadsheet '{document}'"))?;

    let mut report = IngestReport {
        document: handle.name.clone(),
        sheets: Vec::with_capacity(tables.len()),
    };
    for (file_name, sheet_name, table) in tables {
        sheets
            .write_sheet(&handle, sheet_name, &table)
            .await
            .with_context(|| format!("failed to publish sheet '{sheet_name}'"))?;
        tracing::info!(sheet = sheet_name, rows = table.len(), "published sheet");

        report.sheets.push(PublishedSheet {
            file_name: file_name.to_string(),
            sheet_name: sheet_name.to_string(),
            rows: table.len(),
        });
    }

    Ok(report)
}
