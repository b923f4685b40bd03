//! Messenger Send API: text, templates, quick replies, attachments, sender actions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Platform limit on elements in one generic template.
pub const GENERIC_TEMPLATE_MAX_ELEMENTS: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("graph request failed: {0}")]
    Request(reqwest::Error),
    #[error("graph api error ({status}): {message}")]
    Api { status: u16, message: String },
}

// The request URL carries the access token; never keep it in the error.
impl From<reqwest::Error> for GraphError {
    fn from(e: reqwest::Error) -> Self {
        GraphError::Request(e.without_url())
    }
}

/// Attachment types accepted by `message.attachment.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Video,
    File,
    Audio,
}

impl AttachmentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AttachmentKind::Image => "image",
            AttachmentKind::Video => "video",
            AttachmentKind::File => "file",
            AttachmentKind::Audio => "audio",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderAction {
    TypingOn,
}

impl SenderAction {
    pub fn as_str(self) -> &'static str {
        match self {
            SenderAction::TypingOn => "typing_on",
        }
    }
}

/// Button in a button template. Serializes as `{type: "postback", title, payload}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostbackButton {
    #[serde(rename = "type")]
    pub typ: &'static str,
    pub title: String,
    pub payload: String,
}

impl PostbackButton {
    pub fn new(title: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            typ: "postback",
            title: title.into(),
            payload: payload.into(),
        }
    }
}

/// Quick reply chip. Serializes as `{content_type: "text", title, payload}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuickReply {
    pub content_type: &'static str,
    pub title: String,
    pub payload: String,
}

impl QuickReply {
    pub fn text(title: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            content_type: "text",
            title: title.into(),
            payload: payload.into(),
        }
    }
}

/// Card in a generic template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenericElement {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Outbound side of the channel. Implementors provide the two raw calls; the typed
/// helpers build the message objects the Send API expects.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send a raw `message` object to a recipient.
    async fn send_message(&self, recipient_id: &str, message: Value) -> Result<(), GraphError>;

    /// Send a sender action (typing indicator, mark seen).
    async fn send_action(&self, recipient_id: &str, action: SenderAction) -> Result<(), GraphError>;

    async fn send_text_message(&self, recipient_id: &str, text: &str) -> Result<(), GraphError> {
        self.send_message(recipient_id, json!({ "text": text })).await
    }

    async fn send_button_message(
        &self,
        recipient_id: &str,
        text: &str,
        buttons: &[PostbackButton],
    ) -> Result<(), GraphError> {
        let message = template_message(json!({
            "template_type": "button",
            "text": text,
            "buttons": buttons,
        }));
        self.send_message(recipient_id, message).await
    }

    async fn send_quick_replies(
        &self,
        recipient_id: &str,
        text: &str,
        quick_replies: &[QuickReply],
    ) -> Result<(), GraphError> {
        let message = json!({ "text": text, "quick_replies": quick_replies });
        self.send_message(recipient_id, message).await
    }

    async fn send_attachment_url(
        &self,
        recipient_id: &str,
        kind: AttachmentKind,
        url: &str,
    ) -> Result<(), GraphError> {
        let message = json!({
            "attachment": {
                "type": kind.as_str(),
                "payload": { "url": url },
            }
        });
        self.send_message(recipient_id, message).await
    }

    async fn send_generic_message(
        &self,
        recipient_id: &str,
        elements: &[GenericElement],
    ) -> Result<(), GraphError> {
        let message = template_message(json!({
            "template_type": "generic",
            "elements": elements,
        }));
        self.send_message(recipient_id, message).await
    }
}

fn template_message(payload: Value) -> Value {
    json!({
        "attachment": {
            "type": "template",
            "payload": payload,
        }
    })
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    error: Option<GraphErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GraphErrorDetail {
    #[serde(default)]
    message: String,
}

/// Graph API client bound to one page access token.
#[derive(Clone)]
pub struct GraphMessenger {
    endpoint: String,
    access_token: String,
    client: reqwest::Client,
}

impl GraphMessenger {
    pub fn new(
        base_url: &str,
        api_version: &str,
        access_token: String,
        timeout: Duration,
    ) -> Result<Self, GraphError> {
        let endpoint = format!(
            "{}/v{}/me/messages",
            base_url.trim_end_matches('/'),
            api_version.trim().trim_start_matches('v')
        );
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint,
            access_token,
            client,
        })
    }

    /// Full Send API URL (without the token).
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, body: &Value) -> Result<(), GraphError> {
        let res = self
            .client
            .post(&self.endpoint)
            .query(&[("access_token", self.access_token.as_str())])
            .json(body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            let message = serde_json::from_str::<GraphErrorBody>(&text)
                .ok()
                .and_then(|b| b.error)
                .map(|e| e.message)
                .filter(|m| !m.is_empty())
                .unwrap_or(text);
            return Err(GraphError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Messenger for GraphMessenger {
    async fn send_message(&self, recipient_id: &str, message: Value) -> Result<(), GraphError> {
        let body = json!({
            "recipient": { "id": recipient_id },
            "messaging_type": "RESPONSE",
            "message": message,
        });
        self.post(&body).await
    }

    async fn send_action(&self, recipient_id: &str, action: SenderAction) -> Result<(), GraphError> {
        let body = json!({
            "recipient": { "id": recipient_id },
            "sender_action": action.as_str(),
        });
        self.post(&body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn messenger(server: &MockServer) -> GraphMessenger {
        GraphMessenger::new(&server.uri(), "16.0", "tok".to_string(), Duration::from_secs(5))
            .unwrap()
    }

    #[test]
    fn endpoint_normalizes_version_and_base() {
        let m = GraphMessenger::new(
            "https://graph.facebook.com/",
            "v17.0",
            "t".to_string(),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(m.endpoint(), "https://graph.facebook.com/v17.0/me/messages");
    }

    #[test]
    fn button_and_quick_reply_serialization() {
        assert_eq!(
            serde_json::to_value(PostbackButton::new("Yes", "yes_id")).unwrap(),
            json!({"type": "postback", "title": "Yes", "payload": "yes_id"})
        );
        assert_eq!(
            serde_json::to_value(QuickReply::text("Row", "row_id")).unwrap(),
            json!({"content_type": "text", "title": "Row", "payload": "row_id"})
        );
        let card = GenericElement {
            title: "Cat".to_string(),
            subtitle: None,
            image_url: Some("https://x/cat.png".to_string()),
        };
        assert_eq!(
            serde_json::to_value(card).unwrap(),
            json!({"title": "Cat", "image_url": "https://x/cat.png"})
        );
    }

    #[tokio::test]
    async fn text_message_posts_recipient_and_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v16.0/me/messages"))
            .and(query_param("access_token", "tok"))
            .and(body_json(json!({
                "recipient": {"id": "u1"},
                "messaging_type": "RESPONSE",
                "message": {"text": "hi"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message_id": "m"})))
            .expect(1)
            .mount(&server)
            .await;

        messenger(&server).send_text_message("u1", "hi").await.unwrap();
    }

    #[tokio::test]
    async fn button_template_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!({
                "recipient": {"id": "u1"},
                "messaging_type": "RESPONSE",
                "message": {"attachment": {"type": "template", "payload": {
                    "template_type": "button",
                    "text": "Pick",
                    "buttons": [
                        {"type": "postback", "title": "A", "payload": "a"},
                        {"type": "postback", "title": "B", "payload": "b"}
                    ]
                }}}
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let buttons = [PostbackButton::new("A", "a"), PostbackButton::new("B", "b")];
        messenger(&server)
            .send_button_message("u1", "Pick", &buttons)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sender_action_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!({
                "recipient": {"id": "u1"},
                "sender_action": "typing_on"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        messenger(&server)
            .send_action("u1", SenderAction::TypingOn)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn attachment_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!({
                "recipient": {"id": "u1"},
                "messaging_type": "RESPONSE",
                "message": {"attachment": {"type": "video", "payload": {"url": "https://x/v.mp4"}}}
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        messenger(&server)
            .send_attachment_url("u1", AttachmentKind::Video, "https://x/v.mp4")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn connection_error_does_not_expose_token() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
            listener.local_addr().expect("local_addr").port()
        };
        let m = GraphMessenger::new(
            &format!("http://127.0.0.1:{}", port),
            "16.0",
            "SECRET_PAGE_TOKEN".to_string(),
            Duration::from_secs(2),
        )
        .unwrap();
        let err = m.send_text_message("u1", "hi").await.unwrap_err();
        assert!(matches!(err, GraphError::Request(_)));
        let text = format!("{} {:?}", err, err);
        assert!(!text.contains("SECRET_PAGE_TOKEN"), "{}", text);
    }

    #[tokio::test]
    async fn api_error_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"message": "(#100) Invalid recipient", "code": 100}
            })))
            .mount(&server)
            .await;

        let err = messenger(&server)
            .send_text_message("nobody", "hi")
            .await
            .unwrap_err();
        match err {
            GraphError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "(#100) Invalid recipient");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
