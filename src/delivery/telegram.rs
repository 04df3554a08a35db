use super::MessageTransport;
use crate::error::{ConfigError, TransportError};
use crate::storage_utils::required_env;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const API_BASE: &str = "https://api.telegram.org";

/// Hard ceiling Telegram puts on a single message, in UTF-16 code units.
pub const MAX_MESSAGE_LENGTH: usize = 4096;

/// Length as Telegram counts it: astral characters such as emoji take two units.
pub fn message_length(text: &str) -> usize {
    text.encode_utf16().count()
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram Bot API `sendMessage` bound to one chat.
pub struct TelegramTransport {
    client: Client,
    token: String,
    chat_id: String,
}

impl TelegramTransport {
    pub fn new(client: Client, token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            client,
            token: token.into(),
            chat_id: chat_id.into(),
        }
    }

    /// Reads `TELEGRAM_BOT_TOKEN` and `TELEGRAM_CHAT_ID`.
    pub fn from_env(client: Client) -> Result<Self, ConfigError> {
        Ok(Self::new(
            client,
            required_env("TELEGRAM_BOT_TOKEN")?,
            required_env("TELEGRAM_CHAT_ID")?,
        ))
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", API_BASE, self.token)
    }
}

#[async_trait]
impl MessageTransport for TelegramTransport {
    async fn send(&self, text: &str) -> Result<(), TransportError> {
        let length = message_length(text);
        if length > MAX_MESSAGE_LENGTH {
            return Err(TransportError::Rejected(format!(
                "message is {length} UTF-16 units, limit is {MAX_MESSAGE_LENGTH}"
            )));
        }

        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
        };
        // Telegram reports failures in the body, including for 4xx statuses
        let response: ApiResponse = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        check_response(response)
    }
}

fn check_response(response: ApiResponse) -> Result<(), TransportError> {
    if response.ok {
        return Ok(());
    }
    Err(TransportError::Rejected(
        response
            .description
            .unwrap_or_else(|| "unknown error".to_string()),
    ))
}
