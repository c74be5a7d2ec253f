use serde::Deserialize;

use crate::occupancy::{AlertPolicy, MAX_WINDOW_DAYS};

pub const DEFAULT_SPREADSHEET_NAME: &str = "Predicciones Hospitalarias";
pub const ACTUAL_SHEET: &str = "hospital_data";
pub const PREDICTED_SHEET: &str = "predicciones";
pub const LOG_SHEET: &str = "alertas_log";
pub const LOG_HEADER: [&str; 6] = [
    "timestamp",
    "tipo",
    "hospital",
    "fecha",
    "ocupacion_%",
    "estado_envio",
];

/// `(file in the drive folder, sheet it is published to)`.
pub const INGEST_SOURCES: [(&str, &str); 2] = [
    ("hospital_data.csv", ACTUAL_SHEET),
    ("predicciones.csv", PREDICTED_SHEET),
];

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
    #[error("GOOGLE_SHEETS_CREDENTIALS is not a service account key: {0}")]
    Credentials(String),
}

/// Google service account key, as downloaded from the cloud console.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type")]
    pub key_type: String,
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("project_id", &self.project_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let key: ServiceAccountKey = serde_json::from_str(raw.trim())
            .map_err(|err| ConfigError::Credentials(err.to_string()))?;

        if key.key_type != "service_account" {
            return Err(ConfigError::Credentials(format!(
                "expected type \"service_account\", found \"{}\"",
                key.key_type
            )));
        }
        if key.client_email.trim().is_empty() {
            return Err(ConfigError::Credentials("client_email is empty".to_string()));
        }
        if !key.private_key.contains("-----BEGIN") || !key.private_key.contains("PRIVATE KEY-----")
        {
            return Err(ConfigError::Credentials(
                "private_key is not a PEM encoded key".to_string(),
            ));
        }
        if !key.token_uri.starts_with("https://") {
            return Err(ConfigError::Credentials(format!(
                "token_uri must be https, found \"{}\"",
                key.token_uri
            )));
        }
        Ok(key)
    }
}

#[derive(Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("chat_id", &self.chat_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub credentials: ServiceAccountKey,
    pub spreadsheet_name: String,
    pub folder_id: String,
}

#[derive(Debug, Clone)]
pub struct EvaluateConfig {
    pub credentials: ServiceAccountKey,
    pub spreadsheet_name: String,
    pub telegram: TelegramConfig,
    pub policy: AlertPolicy,
}

impl IngestConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            folder_id: required(&lookup, "DRIVE_FOLDER_ID")?,
            credentials: credentials(&lookup)?,
            spreadsheet_name: spreadsheet_name(&lookup),
        })
    }
}

impl EvaluateConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let telegram = TelegramConfig {
            bot_token: required(&lookup, "TELEGRAM_BOT_TOKEN")?,
            chat_id: required(&lookup, "TELEGRAM_CHAT_ID")?,
        };
        let credentials = credentials(&lookup)?;

        let defaults = AlertPolicy::default();
        let policy = AlertPolicy {
            window_days: optional(&lookup, "ALERT_WINDOW_DAYS", defaults.window_days)?,
            actual_threshold: optional(&lookup, "ACTUAL_THRESHOLD_PCT", defaults.actual_threshold)?,
            predicted_threshold: optional(
                &lookup,
                "PREDICTED_THRESHOLD_PCT",
                defaults.predicted_threshold,
            )?,
        };
        if !(1..=MAX_WINDOW_DAYS).contains(&policy.window_days) {
            return Err(ConfigError::Invalid {
                var: "ALERT_WINDOW_DAYS",
                reason: format!("must be between 1 and {MAX_WINDOW_DAYS}"),
            });
        }
        for (var, threshold) in [
            ("ACTUAL_THRESHOLD_PCT", policy.actual_threshold),
            ("PREDICTED_THRESHOLD_PCT", policy.predicted_threshold),
        ] {
            if !(threshold > 0.0 && threshold.is_finite()) {
                return Err(ConfigError::Invalid {
                    var,
                    reason: "must be a positive percentage".to_string(),
                });
            }
        }

        Ok(Self {
            credentials,
            spreadsheet_name: spreadsheet_name(&lookup),
            telegram,
            policy,
        })
    }
}

fn required<F>(lookup: &F, var: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .filter(|value| !value.trim().is_empty())
        .ok_or(ConfigError::Missing(var))
}

fn optional<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var).filter(|value| !value.trim().is_empty()) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
            var,
            reason: err.to_string(),
        }),
    }
}

fn credentials<F>(lookup: &F) -> Result<ServiceAccountKey, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    ServiceAccountKey::parse(&required(lookup, "GOOGLE_SHEETS_CREDENTIALS")?)
}

fn spreadsheet_name<F>(lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup("SPREADSHEET_NAME")
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SPREADSHEET_NAME.to_string())
}
