//! Telegram run notifications via the Bot API `sendMessage` method.

use async_trait::async_trait;
use serde::Serialize;

use paychef_core::NotificationSink;

const TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id:                  &'a str,
    text:                     &'a str,
    parse_mode:               &'static str,
    disable_web_page_preview: bool,
}

pub struct TelegramSink {
    http:   reqwest::Client,
    /// (bot token, chat id); None = notifications disabled.
    target: Option<(String, String)>,
}

impl TelegramSink {
    pub fn new(bot_token: Option<String>, chat_id: Option<String>) -> Self {
        let target = match (bot_token, chat_id) {
            (Some(t), Some(c)) if !t.trim().is_empty() && !c.trim().is_empty() => Some((t, c)),
            _ => None,
        };
        if target.is_none() {
            tracing::warn!("Telegram not configured; run notifications disabled");
        }
        Self { http: reqwest::Client::new(), target }
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn deliver(&self, message: &str) -> Result<(), String> {
        let Some((ref token, ref chat_id)) = self.target else {
            tracing::debug!("Telegram not configured; skipping notification");
            return Ok(());
        };

        let url = format!("{TELEGRAM_API}/bot{token}/sendMessage");
        let body = SendMessage {
            chat_id,
            text: message,
            parse_mode: "Markdown",
            disable_web_page_preview: true,
        };

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            // reqwest errors embed the URL, which embeds the token.
            .map_err(|e| format!("Telegram HTTP error: {}", e.without_url()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            return Err(format!("Telegram returned HTTP {status}: {detail}"));
        }
        tracing::info!("Telegram notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_sink_skips() {
        let sink = TelegramSink::new(None, Some("123".into()));
        assert!(sink.target.is_none());
        assert!(sink.deliver("hello").await.is_ok());
    }

    #[test]
    fn blank_values_disable() {
        assert!(TelegramSink::new(Some(" ".into()), Some("1".into())).target.is_none());
        assert!(TelegramSink::new(Some("t".into()), Some("1".into())).target.is_some());
    }

    #[test]
    fn payload_shape() {
        let body = SendMessage {
            chat_id:                  "42",
            text:                     "*hi*",
            parse_mode:               "Markdown",
            disable_web_page_preview: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["chat_id"], "42");
        assert_eq!(json["parse_mode"], "Markdown");
    }
}
