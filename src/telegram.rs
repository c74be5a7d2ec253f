use async_trait::async_trait;

use crate::config::TelegramConfig;

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Best-effort delivery of a rendered alert. Never fails the caller.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn deliver(&self, text: &str) -> bool;
}

pub struct TelegramBot {
    http: reqwest::Client,
    config: TelegramConfig,
}

impl TelegramBot {
    pub fn new(http: reqwest::Client, config: TelegramConfig) -> Self {
        Self { http, config }
    }

    fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", TELEGRAM_API_URL, self.config.bot_token)
    }
}

#[async_trait]
impl Messenger for TelegramBot {
    async fn deliver(&self, text: &str) -> bool {
        let params = [
            ("chat_id", self.config.chat_id.as_str()),
            ("text", text),
            ("parse_mode", "HTML"),
        ];

        let response = match self.http.post(self.send_message_url()).form(&params).send().await {
            Ok(response) => response,
            Err(err) => {
                // reqwest errors can carry the URL, which embeds the bot token.
                tracing::warn!(error = %err.without_url(), "failed to reach telegram");
                return false;
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::OK {
            tracing::info!(preview = %preview(text), "alert sent");
            true
        } else {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, %body, "telegram rejected alert");
            false
        }
    }
}

fn preview(text: &str) -> String {
    text.chars().take(80).collect()
}
