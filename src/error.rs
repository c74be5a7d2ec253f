use reqwest::StatusCode;

/// Failures raised by the file store, spreadsheet and messaging collaborators.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} '{name}' was not found")]
    NotFound { kind: &'static str, name: String },
    #[error("request failed")]
    Http(#[from] reqwest::Error),
    #[error("API responded {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("invalid API url: {0}")]
    InvalidUrl(String),
    #[error("failed to parse CSV extract")]
    Csv(#[from] csv::Error),
}

impl StoreError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Turns a non-success response into [`StoreError::Api`].
pub async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Api { status, body })
}
