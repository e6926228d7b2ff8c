//! Bot API backed [`MessageSender`].

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::error::SendError;
use crate::types::UserId;
use crate::worker::MessageSender;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

pub struct TelegramSender {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

impl TelegramSender {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            token: token.into(),
        }
    }

    /// Point at a different API host, e.g. a local Bot API server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base.trim_end_matches('/'), self.token)
    }
}

#[async_trait]
impl MessageSender for TelegramSender {
    async fn send(&self, recipient: UserId, text: &str) -> Result<(), SendError> {
        let body = serde_json::json!({
            "chat_id": recipient.0,
            "text": text,
        });

        let response = self
            .client
            .post(self.send_message_url())
            .timeout(Duration::from_secs(10))
            .json(&body)
            .send()
            .await
            .map_err(|err| SendError::Network(err.to_string()))?;

        let status = response.status();
        let parsed: Option<ApiResponse> = response.json().await.ok();

        if status.is_success() && parsed.as_ref().map_or(true, |r| r.ok) {
            return Ok(());
        }

        let description = parsed
            .as_ref()
            .and_then(|r| r.description.clone())
            .unwrap_or_else(|| status.to_string());

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = parsed
                .and_then(|r| r.parameters)
                .and_then(|p| p.retry_after);
            return Err(SendError::RateLimited { retry_after_secs });
        }

        if status.is_server_error() {
            return Err(SendError::Network(description));
        }

        Err(SendError::Rejected(description))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_send_message_url() {
        let sender = TelegramSender::new("123:abc").with_api_base("http://localhost:8081/");
        assert_eq!(
            sender.send_message_url(),
            "http://localhost:8081/bot123:abc/sendMessage"
        );
    }

    #[test]
    fn parses_rate_limit_payload() {
        let raw = r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 3","parameters":{"retry_after":3}}"#;
        let parsed: ApiResponse = serde_json::from_str(raw).unwrap();
        assert!(!parsed.ok);
        assert_eq!(parsed.parameters.and_then(|p| p.retry_after), Some(3));
    }
}
