//! In-memory collaborators for exercising the jobs without network access.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::drive::FileStore;
use crate::error::StoreError;
use crate::models::Table;
use crate::sheets::{DocumentHandle, SpreadsheetStore};
use crate::telegram::Messenger;

#[derive(Default)]
pub struct MemoryDrive {
    files: HashMap<(String, String), Vec<u8>>,
}

impl MemoryDrive {
    pub fn with_file(mut self, folder_id: &str, file_name: &str, contents: &str) -> Self {
        self.files.insert(
            (folder_id.to_string(), file_name.to_string()),
            contents.as_bytes().to_vec(),
        );
        self
    }
}

#[async_trait]
impl FileStore for MemoryDrive {
    async fn fetch(&self, folder_id: &str, file_name: &str) -> Result<Vec<u8>, StoreError> {
        self.files
            .get(&(folder_id.to_string(), file_name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::not_found("file", file_name))
    }
}

#[derive(Default)]
struct SheetsState {
    documents: BTreeMap<String, BTreeMap<String, Table>>,
    created_documents: usize,
    append_calls: usize,
    fail_appends: bool,
}

#[derive(Default)]
pub struct MemorySheets {
    state: Mutex<SheetsState>,
}

impl MemorySheets {
    pub fn insert(&self, document: &str, sheet: &str, table: Table) {
        self.state
            .lock()
            .unwrap()
            .documents
            .entry(document.to_string())
            .or_default()
            .insert(sheet.to_string(), table);
    }

    pub fn sheet(&self, document: &str, sheet: &str) -> Option<Table> {
        self.state
            .lock()
            .unwrap()
            .documents
            .get(document)
            .and_then(|sheets| sheets.get(sheet))
            .cloned()
    }

    pub fn created_documents(&self) -> usize {
        self.state.lock().unwrap().created_documents
    }

    pub fn append_calls(&self) -> usize {
        self.state.lock().unwrap().append_calls
    }

    pub fn fail_appends(&self) {
        self.state.lock().unwrap().fail_appends = true;
    }
}

#[async_trait]
impl SpreadsheetStore for MemorySheets {
    async fn open(&self, name: &str) -> Result<DocumentHandle, StoreError> {
        let state = self.state.lock().unwrap();
        if !state.documents.contains_key(name) {
            return Err(StoreError::not_found("spreadsheet", name));
        }
        Ok(DocumentHandle {
            id: name.to_string(),
            name: name.to_string(),
        })
    }

    async fn create(&self, name: &str) -> Result<DocumentHandle, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.documents.entry(name.to_string()).or_default();
        state.created_documents += 1;
        Ok(DocumentHandle {
            id: name.to_string(),
            name: name.to_string(),
        })
    }

    async fn write_sheet(
        &self,
        document: &DocumentHandle,
        sheet: &str,
        table: &Table,
    ) -> Result<(), StoreError> {
        self.insert(&document.id, sheet, table.clone());
        Ok(())
    }

    async fn read_sheet(
        &self,
        document: &DocumentHandle,
        sheet: &str,
    ) -> Result<Table, StoreError> {
        self.sheet(&document.id, sheet)
            .ok_or_else(|| StoreError::not_found("sheet", sheet))
    }

    async fn ensure_sheet(
        &self,
        document: &DocumentHandle,
        sheet: &str,
        header: &[String],
    ) -> Result<bool, StoreError> {
        if self.sheet(&document.id, sheet).is_some() {
            return Ok(false);
        }
        self.insert(&document.id, sheet, Table::new(header.to_vec(), Vec::new()));
        Ok(true)
    }

    async fn append_rows(
        &self,
        document: &DocumentHandle,
        sheet: &str,
        rows: &[Vec<String>],
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.append_calls += 1;
        if state.fail_appends {
            return Err(StoreError::Api {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: "backend unavailable".to_string(),
            });
        }
        let table = state
            .documents
            .get_mut(&document.id)
            .and_then(|sheets| sheets.get_mut(sheet))
            .ok_or_else(|| StoreError::not_found("sheet", sheet))?;
        table.rows.extend(rows.iter().cloned());
        Ok(())
    }
}

/// Replays a fixed sequence of delivery outcomes and records every message.
pub struct ScriptedMessenger {
    outcomes: Mutex<std::vec::IntoIter<bool>>,
    messages: Mutex<Vec<String>>,
}

impl ScriptedMessenger {
    pub fn new(outcomes: Vec<bool>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter()),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Messenger for ScriptedMessenger {
    async fn deliver(&self, text: &str) -> bool {
        self.messages.lock().unwrap().push(text.to_string());
        self.outcomes.lock().unwrap().next().unwrap_or(false)
    }
}
