use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{check_status, StoreError};
use crate::google::{api_url, GoogleSession};

const DRIVE_FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";

/// Fetch-by-name access to a folder of extracts.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn fetch(&self, folder_id: &str, file_name: &str) -> Result<Vec<u8>, StoreError>;
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileList {
    #[serde(default)]
    pub files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DriveFile {
    pub id: String,
}

pub struct DriveClient<'a> {
    session: &'a GoogleSession,
}

impl<'a> DriveClient<'a> {
    pub fn new(session: &'a GoogleSession) -> Self {
        Self { session }
    }

    /// Ids of live files matching a Drive search query, oldest match first.
    pub(crate) async fn find(&self, query: &str) -> Result<Vec<String>, StoreError> {
        let request = self.session.get(api_url(DRIVE_FILES_URL, &[])?).query(&[
            ("q", query),
            ("fields", "files(id, name)"),
            ("orderBy", "createdTime"),
            ("supportsAllDrives", "true"),
            ("includeItemsFromAllDrives", "true"),
        ]);

        let response = check_status(request.send().await?).await?;
        let list: FileList = response.json().await?;
        Ok(list.files.into_iter().map(|file| file.id).collect())
    }
}

#[async_trait]
impl FileStore for DriveClient<'_> {
    async fn fetch(&self, folder_id: &str, file_name: &str) -> Result<Vec<u8>, StoreError> {
        let query = format!(
            "'{}' in parents and name='{}' and trashed=false",
            escape_query(folder_id),
            escape_query(file_name)
        );
        let file_id = self
            .find(&query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::not_found("file", file_name))?;

        let request = self
            .session
            .get(api_url(DRIVE_FILES_URL, &[file_id.as_str()])?)
            .query(&[("alt", "media"), ("supportsAllDrives", "true")]);

        let response = check_status(request.send().await?).await?;
        let bytes = response.bytes().await?;
        tracing::debug!(file_name, %file_id, bytes = bytes.len(), "downloaded extract");
        Ok(bytes.to_vec())
    }
}

/// Escapes a literal for use inside single quotes in a Drive search query.
pub(crate) fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
