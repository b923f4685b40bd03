//! Sarufi API client (https://api.sarufi.io by default).
//! Bot selection happens once at startup; each turn posts the message and returns `actions`.

use crate::channels::MessageKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.sarufi.io";

#[derive(Debug, thiserror::Error)]
pub enum SarufiError {
    #[error("sarufi request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("sarufi api error: {0}")]
    Api(String),
}

/// Source of action lists for a conversation turn.
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    /// Send one user message; `chat_id` keys the conversation state on the service side.
    async fn respond(
        &self,
        message: &str,
        chat_id: &str,
        message_type: MessageKind,
        channel: &str,
    ) -> Result<Vec<Value>, SarufiError>;
}

/// Authenticated client for the Sarufi HTTP API.
#[derive(Clone)]
pub struct SarufiClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct BotInfo {
    id: Value,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct ConversationRequest<'a> {
    chat_id: &'a str,
    bot_id: &'a Value,
    message: &'a str,
    message_type: &'a str,
    channel: &'a str,
}

#[derive(Debug, Deserialize)]
struct ConversationResponse {
    #[serde(default)]
    actions: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<Value>,
    message: Option<String>,
}

impl SarufiClient {
    pub fn new(base_url: Option<String>, api_key: String, timeout: Duration) -> Result<Self, SarufiError> {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url,
            api_key,
            client,
        })
    }

    /// Select the bot all turns are sent to (GET /chatbot/{id}).
    pub async fn get_bot(&self, bot_id: &str) -> Result<SarufiBot, SarufiError> {
        let url = format!("{}/chatbot/{}", self.base_url, bot_id.trim());
        let res = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let res = check_status(res).await?;
        let info: BotInfo = res.json().await?;
        let id = match info.id {
            Value::Null => Value::String(bot_id.trim().to_string()),
            id => id,
        };
        Ok(SarufiBot {
            client: self.clone(),
            id,
            name: info.name.unwrap_or_default(),
        })
    }
}

async fn check_status(res: reqwest::Response) -> Result<reqwest::Response, SarufiError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status();
    let text = res.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(|b| match (b.detail, b.message) {
            (Some(Value::String(s)), _) => Some(s),
            (Some(other), _) => Some(other.to_string()),
            (None, m) => m,
        })
        .unwrap_or(text);
    Err(SarufiError::Api(format!("{} {}", status, detail)))
}

/// A selected Sarufi bot.
#[derive(Clone)]
pub struct SarufiBot {
    client: SarufiClient,
    id: Value,
    name: String,
}

impl SarufiBot {
    pub fn id(&self) -> &Value {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn conversation_url(&self, channel: &str) -> String {
        if channel == "whatsapp" {
            format!("{}/conversation/whatsapp", self.client.base_url)
        } else {
            format!("{}/conversation", self.client.base_url)
        }
    }
}

#[async_trait]
impl ConversationBackend for SarufiBot {
    /// Post one turn to /conversation (or /conversation/whatsapp) and return its `actions`, empty when absent.
    async fn respond(
        &self,
        message: &str,
        chat_id: &str,
        message_type: MessageKind,
        channel: &str,
    ) -> Result<Vec<Value>, SarufiError> {
        let body = ConversationRequest {
            chat_id,
            bot_id: &self.id,
            message,
            message_type: message_type.as_str(),
            channel,
        };
        let res = self
            .client
            .client
            .post(self.conversation_url(channel))
            .bearer_auth(&self.client.api_key)
            .json(&body)
            .send()
            .await?;
        let res = check_status(res).await?;
        let data: ConversationResponse = res.json().await?;
        Ok(data.actions.unwrap_or_default())
    }
}
