use anyhow::{Context, Result};
use serde::Deserialize;

use crate::config::TelegramConfig;
use crate::error::AppError;
use crate::runtime::ports::Notifier;

/// Sends plain-text messages to one chat through the Bot API.
pub struct TelegramNotifier {
    http: reqwest::Client,
    api_base_url: String,
    bot_token: String,
    chat_id: String,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramNotifier {
    pub fn new(api_base_url: &str, bot_token: &str, chat_id: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .context("failed to build Telegram HTTP client")?;
        Ok(Self {
            http,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
        })
    }

    /// `None` when the token or chat id is missing.
    pub fn from_config(cfg: &TelegramConfig) -> Result<Option<Self>> {
        match (&cfg.bot_token, &cfg.chat_id) {
            (Some(token), Some(chat)) if cfg.is_configured() => {
                Self::new(&cfg.api_base_url, token, chat).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base_url, self.bot_token)
    }
}

impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        let response = self
            .http
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .context("telegram sendMessage HTTP failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::TelegramApi {
                status: status.as_u16(),
                msg: body.split_whitespace().collect::<Vec<_>>().join(" "),
            }
            .into());
        }
        let parsed: SendMessageResponse = response
            .json()
            .await
            .context("telegram sendMessage JSON parse failed")?;
        if !parsed.ok {
            return Err(AppError::TelegramApi {
                status: status.as_u16(),
                msg: parsed.description.unwrap_or_else(|| "ok=false".to_string()),
            }
            .into());
        }
        tracing::debug!(chat_id = %self.chat_id, chars = text.len(), "Telegram message sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_embeds_token() {
        let n = TelegramNotifier::new("https://api.telegram.org/", "123:abc", "42").unwrap();
        assert_eq!(n.endpoint(), "https://api.telegram.org/bot123:abc/sendMessage");
    }

    #[test]
    fn unconfigured_yields_none() {
        let cfg = TelegramConfig::default();
        assert!(TelegramNotifier::from_config(&cfg).unwrap().is_none());
    }
}
