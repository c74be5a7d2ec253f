use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::drive::{escape_query, DriveClient};
use crate::error::{check_status, StoreError};
use crate::google::{api_url, GoogleSession};
use crate::models::Table;

const SHEETS_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentHandle {
    pub id: String,
    pub name: String,
}

/// Read/write access to named sheets inside named spreadsheet documents.
#[async_trait]
pub trait SpreadsheetStore: Send + Sync {
    /// Opens an existing document, `NotFound` if there is none with this name.
    async fn open(&self, name: &str) -> Result<DocumentHandle, StoreError>;

    async fn create(&self, name: &str) -> Result<DocumentHandle, StoreError>;

    async fn open_or_create(&self, name: &str) -> Result<DocumentHandle, StoreError> {
        match self.open(name).await {
            Err(err) if err.is_not_found() => {
                let document = self.create(name).await?;
                tracing::info!(document = name, "created spreadsheet document");
                Ok(document)
            }
            other => other,
        }
    }

    /// Replaces `sheet` with `table`, creating it when absent.
    async fn write_sheet(
        &self,
        document: &DocumentHandle,
        sheet: &str,
        table: &Table,
    ) -> Result<(), StoreError>;

    /// Reads `sheet` as a header row plus data rows, `NotFound` if absent.
    async fn read_sheet(&self, document: &DocumentHandle, sheet: &str)
        -> Result<Table, StoreError>;

    /// Creates `sheet` holding only `header` unless it already exists.
    /// Returns whether the sheet was created.
    async fn ensure_sheet(
        &self,
        document: &DocumentHandle,
        sheet: &str,
        header: &[String],
    ) -> Result<bool, StoreError>;

    /// Appends `rows` after the last row of `sheet` in a single write.
    async fn append_rows(
        &self,
        document: &DocumentHandle,
        sheet: &str,
        rows: &[Vec<String>],
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Spreadsheet {
    spreadsheet_id: String,
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

pub struct SheetsClient<'a> {
    session: &'a GoogleSession,
    drive: DriveClient<'a>,
}

impl<'a> SheetsClient<'a> {
    pub fn new(session: &'a GoogleSession) -> Self {
        Self {
            session,
            drive: DriveClient::new(session),
        }
    }

    async fn sheet_id(
        &self,
        document: &DocumentHandle,
        sheet: &str,
    ) -> Result<Option<i64>, StoreError> {
        let request = self
            .session
            .get(api_url(SHEETS_URL, &[document.id.as_str()])?)
            .query(&[("fields", "spreadsheetId,sheets.properties(sheetId,title)")]);

        let response = check_status(request.send().await?).await?;
        let spreadsheet: Spreadsheet = response.json().await?;
        Ok(spreadsheet
            .sheets
            .into_iter()
            .find(|entry| entry.properties.title == sheet)
            .map(|entry| entry.properties.sheet_id))
    }

    async fn batch_update(
        &self,
        document: &DocumentHandle,
        requests: Vec<Value>,
    ) -> Result<(), StoreError> {
        let endpoint = format!("{}:batchUpdate", document.id);
        let url = api_url(SHEETS_URL, &[endpoint.as_str()])?;
        let request = self
            .session
            .post(url)
            .json(&json!({ "requests": requests }));
        check_status(request.send().await?).await?;
        Ok(())
    }

    async fn clear_values(&self, document: &DocumentHandle, sheet: &str) -> Result<(), StoreError> {
        let endpoint = format!("{}:clear", sheet_range(sheet));
        let url = api_url(SHEETS_URL, &[document.id.as_str(), "values", endpoint.as_str()])?;
        check_status(self.session.post(url).json(&json!({})).send().await?).await?;
        Ok(())
    }

    async fn put_values(
        &self,
        document: &DocumentHandle,
        sheet: &str,
        values: Vec<Vec<String>>,
    ) -> Result<(), StoreError> {
        let range = anchor_range(sheet);
        let url = api_url(SHEETS_URL, &[document.id.as_str(), "values", range.as_str()])?;
        let request = self
            .session
            .put(url)
            .query(&[("valueInputOption", "RAW")])
            .json(&json!({
                "range": range,
                "majorDimension": "ROWS",
                "values": values,
            }));
        check_status(request.send().await?).await?;
        Ok(())
    }
}

#[async_trait]
impl SpreadsheetStore for SheetsClient<'_> {
    async fn open(&self, name: &str) -> Result<DocumentHandle, StoreError> {
        let query = format!(
            "name='{}' and mimeType='{}' and trashed=false",
            escape_query(name),
            SPREADSHEET_MIME
        );
        let id = self
            .drive
            .find(&query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::not_found("spreadsheet", name))?;

        Ok(DocumentHandle {
            id,
            name: name.to_string(),
        })
    }

    async fn create(&self, name: &str) -> Result<DocumentHandle, StoreError> {
        let request = self
            .session
            .post(api_url(SHEETS_URL, &[])?)
            .json(&json!({ "properties": { "title": name } }));

        let response = check_status(request.send().await?).await?;
        let spreadsheet: Spreadsheet = response.json().await?;
        Ok(DocumentHandle {
            id: spreadsheet.spreadsheet_id,
            name: name.to_string(),
        })
    }

    async fn write_sheet(
        &self,
        document: &DocumentHandle,
        sheet: &str,
        table: &Table,
    ) -> Result<(), StoreError> {
        let rows = table.len() + 1;
        let columns = table.columns.len();
        match self.sheet_id(document, sheet).await? {
            // Resized and cleared in place: a document cannot lose its last sheet.
            Some(sheet_id) => {
                self.batch_update(document, vec![resize_sheet_request(sheet_id, rows, columns)])
                    .await?;
                self.clear_values(document, sheet).await?;
            }
            None => {
                self.batch_update(document, vec![add_sheet_request(sheet, rows, columns)])
                    .await?;
            }
        }

        let mut values = Vec::with_capacity(table.len() + 1);
        values.push(table.columns.clone());
        values.extend(table.rows.iter().cloned());
        self.put_values(document, sheet, values).await
    }

    async fn read_sheet(
        &self,
        document: &DocumentHandle,
        sheet: &str,
    ) -> Result<Table, StoreError> {
        if self.sheet_id(document, sheet).await?.is_none() {
            return Err(StoreError::not_found("sheet", sheet));
        }

        let range = sheet_range(sheet);
        let url = api_url(SHEETS_URL, &[document.id.as_str(), "values", range.as_str()])?;
        let request = self.session.get(url).query(&[
            ("majorDimension", "ROWS"),
            ("valueRenderOption", "FORMATTED_VALUE"),
        ]);

        let response = check_status(request.send().await?).await?;
        let range: ValueRange = response.json().await?;
        Ok(table_from_values(range.values))
    }

    async fn ensure_sheet(
        &self,
        document: &DocumentHandle,
        sheet: &str,
        header: &[String],
    ) -> Result<bool, StoreError> {
        if self.sheet_id(document, sheet).await?.is_some() {
            return Ok(false);
        }

        self.batch_update(document, vec![add_sheet_request(sheet, 1, header.len())])
            .await?;
        self.put_values(document, sheet, vec![header.to_vec()]).await?;
        tracing::info!(sheet, "created sheet");
        Ok(true)
    }

    async fn append_rows(
        &self,
        document: &DocumentHandle,
        sheet: &str,
        rows: &[Vec<String>],
    ) -> Result<(), StoreError> {
        let range = anchor_range(sheet);
        let endpoint = format!("{range}:append");
        let url = api_url(
            SHEETS_URL,
            &[document.id.as_str(), "values", endpoint.as_str()],
        )?;
        let request = self
            .session
            .post(url)
            .query(&[
                ("valueInputOption", "RAW"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&json!({
                "range": range,
                "majorDimension": "ROWS",
                "values": rows,
            }));
        check_status(request.send().await?).await?;
        Ok(())
    }
}

fn add_sheet_request(title: &str, rows: usize, columns: usize) -> Value {
    json!({
        "addSheet": {
            "properties": {
                "title": title,
                "gridProperties": {
                    "rowCount": rows.max(1),
                    "columnCount": columns.max(1),
                }
            }
        }
    })
}

fn resize_sheet_request(sheet_id: i64, rows: usize, columns: usize) -> Value {
    json!({
        "updateSheetProperties": {
            "properties": {
                "sheetId": sheet_id,
                "gridProperties": {
                    "rowCount": rows.max(1),
                    "columnCount": columns.max(1),
                }
            },
            "fields": "gridProperties(rowCount,columnCount)",
        }
    })
}

/// A1 range covering a whole sheet.
fn sheet_range(sheet: &str) -> String {
    format!("'{}'", sheet.replace('\'', "''"))
}

fn anchor_range(sheet: &str) -> String {
    format!("{}!A1", sheet_range(sheet))
}

/// First row is the header; rows are padded to header width, cells past it are dropped.
fn table_from_values(values: Vec<Vec<Value>>) -> Table {
    let mut rows = values.into_iter().map(|row| {
        row.into_iter()
            .map(|cell| match cell {
                Value::String(text) => text,
                Value::Null => String::new(),
                other => other.to_string(),
            })
            .collect::<Vec<String>>()
    });

    let columns = rows.next().unwrap_or_default();
    let width = columns.len();
    let rows = rows
        .filter(|row| row.iter().any(|cell| !cell.is_empty()))
        .map(|mut row| {
            row.resize(width, String::new());
            row
        })
        .collect();

    Table::new(columns, rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_quote_sheet_names() {
        assert_eq!(sheet_range("alertas_log"), "'alertas_log'");
        assert_eq!(anchor_range("O'Donnell"), "'O''Donnell'!A1");
    }

    #[test]
    fn values_become_padded_table() {
        let values = vec![
            vec![json!("fecha"), json!("hospital"), json!("pred_camas_total")],
            vec![json!("2026-10-18"), json!("B")],
            vec![],
            vec![json!("2026-10-17"), json!("C"), json!(190), json!("extra")],
        ];
        let table = table_from_values(values);
        assert_eq!(table.columns, vec!["fecha", "hospital", "pred_camas_total"]);
        assert_eq!(
            table.rows,
            vec![
                vec!["2026-10-18", "B", ""],
                vec!["2026-10-17", "C", "190"],
            ]
        );
    }

    #[test]
    fn empty_sheet_reads_as_empty_table() {
        let table = table_from_values(Vec::new());
        assert!(table.columns.is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn resize_request_targets_grid_only() {
        let request = resize_sheet_request(7, 12, 5);
        let update = &request["updateSheetProperties"];
        assert_eq!(update["properties"]["sheetId"], 7);
        assert_eq!(update["properties"]["gridProperties"]["rowCount"], 12);
        assert_eq!(update["fields"], "gridProperties(rowCount,columnCount)");
    }

    #[test]
    fn add_sheet_request_has_minimum_grid() {
        let request = add_sheet_request("alertas_log", 0, 0);
        let grid = &request["addSheet"]["properties"]["gridProperties"];
        assert_eq!(grid["rowCount"], 1);
        assert_eq!(grid["columnCount"], 1);
    }
}
