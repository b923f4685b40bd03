//! Inbound event from the Messenger webhook: normalized for the dispatcher.

use serde_json::Value;

/// Kind of inbound message, sent to Sarufi as `message_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Free text typed by the user.
    Text,
    /// Payload of a tapped button (postback).
    Interactive,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Interactive => "interactive",
        }
    }
}

/// A message from Messenger to be answered by the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub sender_id: String,
    pub message: String,
    pub kind: MessageKind,
}

/// Extract the event from a webhook POST body: first entry, first messaging item.
/// `message.text` wins over `postback.payload`. Returns None for anything else
/// (receipts, attachment-only messages, malformed bodies).
pub fn parse_webhook_event(body: &Value) -> Option<InboundEvent> {
    let item = body
        .get("entry")?
        .as_array()?
        .first()?
        .get("messaging")?
        .as_array()?
        .first()?;
    let sender_id = sender_id(item.get("sender")?)?;

    if let Some(text) = item
        .get("message")
        .and_then(|m| m.get("text"))
        .and_then(Value::as_str)
    {
        return Some(InboundEvent {
            sender_id,
            message: text.to_string(),
            kind: MessageKind::Text,
        });
    }

    let payload = item
        .get("postback")
        .and_then(|p| p.get("payload"))
        .and_then(Value::as_str)?;
    Some(InboundEvent {
        sender_id,
        message: payload.to_string(),
        kind: MessageKind::Interactive,
    })
}

/// Page-scoped ids are strings on the wire; accept numbers too.
fn sender_id(sender: &Value) -> Option<String> {
    match sender.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
