//! Sarufi action records and their translation into Messenger sends.
//!
//! Each record is an object tagged by one key (`send_message`, `send_images`, ...).
//! Classification is separate from parsing so unsupported and malformed records can
//! be reported in place without aborting the rest of the list.

use crate::channels::{AttachmentKind, PostbackButton, QuickReply};
use serde_json::Value;

/// Recognized action kinds, keyed by the tag Sarufi uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    SendMessage,
    SendReplyButton,
    SendButton,
    SendImages,
    SendVideos,
    SendDocuments,
    SendAudios,
}

const ALL_KINDS: [ActionKind; 7] = [
    ActionKind::SendMessage,
    ActionKind::SendReplyButton,
    ActionKind::SendButton,
    ActionKind::SendImages,
    ActionKind::SendVideos,
    ActionKind::SendDocuments,
    ActionKind::SendAudios,
];

impl ActionKind {
    pub fn tag(self) -> &'static str {
        match self {
            ActionKind::SendMessage => "send_message",
            ActionKind::SendReplyButton => "send_reply_button",
            ActionKind::SendButton => "send_button",
            ActionKind::SendImages => "send_images",
            ActionKind::SendVideos => "send_videos",
            ActionKind::SendDocuments => "send_documents",
            ActionKind::SendAudios => "send_audios",
        }
    }

    /// Media is delivered ahead of text and buttons.
    pub fn is_media(self) -> bool {
        self.attachment_kind().is_some()
    }

    pub fn attachment_kind(self) -> Option<AttachmentKind> {
        match self {
            ActionKind::SendImages => Some(AttachmentKind::Image),
            ActionKind::SendVideos => Some(AttachmentKind::Video),
            ActionKind::SendDocuments => Some(AttachmentKind::File),
            ActionKind::SendAudios => Some(AttachmentKind::Audio),
            _ => None,
        }
    }

    /// Kind of a record: the first recognized tag with a non-null value.
    pub fn of(record: &Value) -> Option<ActionKind> {
        let obj = record.as_object()?;
        ALL_KINDS
            .into_iter()
            .find(|k| obj.get(k.tag()).is_some_and(|v| !v.is_null()))
    }
}

/// Short description of an unsupported record for logs (its keys, or its JSON type).
pub fn describe_record(record: &Value) -> String {
    match record.as_object() {
        Some(obj) if !obj.is_empty() => obj.keys().cloned().collect::<Vec<_>>().join(","),
        Some(_) => "{}".to_string(),
        None => match record {
            Value::Null => "null".to_string(),
            Value::Array(_) => "array".to_string(),
            Value::String(_) => "string".to_string(),
            _ => record.to_string(),
        },
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("{kind} action is malformed: {reason}")]
    Malformed { kind: &'static str, reason: String },
}

fn malformed(kind: ActionKind, reason: impl Into<String>) -> ActionError {
    ActionError::Malformed {
        kind: kind.tag(),
        reason: reason.into(),
    }
}

/// One media link with its optional caption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub link: String,
    pub caption: Option<String>,
}

/// A parsed action, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Plain text; list bodies are already joined with newlines.
    Text(String),
    /// Button template (from `send_reply_button`).
    Buttons {
        text: String,
        buttons: Vec<PostbackButton>,
    },
    /// Text with quick replies (from `send_button` list rows).
    QuickReplies {
        text: String,
        quick_replies: Vec<QuickReply>,
    },
    /// Media links of one attachment kind. `skipped` counts entries without a link.
    Media {
        kind: AttachmentKind,
        items: Vec<MediaItem>,
        skipped: usize,
    },
}

impl Action {
    /// Parse the record body under `kind`'s tag.
    pub fn parse(kind: ActionKind, record: &Value) -> Result<Action, ActionError> {
        let body = record
            .get(kind.tag())
            .ok_or_else(|| malformed(kind, "missing body"))?;
        match kind {
            ActionKind::SendMessage => parse_text(body).map(Action::Text),
            ActionKind::SendReplyButton => parse_reply_buttons(body),
            ActionKind::SendButton => parse_list_rows(body),
            ActionKind::SendImages
            | ActionKind::SendVideos
            | ActionKind::SendDocuments
            | ActionKind::SendAudios => parse_media(kind, body),
        }
    }
}

/// Ids and titles may arrive as numbers.
fn scalar_string(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_text(body: &Value) -> Result<String, ActionError> {
    let kind = ActionKind::SendMessage;
    let text = match body {
        Value::String(s) => s.clone(),
        Value::Array(parts) => {
            let lines: Option<Vec<&str>> = parts.iter().map(Value::as_str).collect();
            lines
                .ok_or_else(|| malformed(kind, "message list must contain only strings"))?
                .join("\n")
        }
        _ => return Err(malformed(kind, "expected a string or a list of strings")),
    };
    if text.trim().is_empty() {
        return Err(malformed(kind, "empty message"));
    }
    Ok(text)
}

/// `{body: {text}, action: {buttons: [{reply: {title, id}}]}}`
fn parse_reply_buttons(body: &Value) -> Result<Action, ActionError> {
    let kind = ActionKind::SendReplyButton;
    let text = body
        .get("body")
        .and_then(|b| b.get("text"))
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(kind, "missing body.text"))?
        .to_string();
    let raw = body
        .get("action")
        .and_then(|a| a.get("buttons"))
        .and_then(Value::as_array)
        .ok_or_else(|| malformed(kind, "missing action.buttons"))?;
    let buttons = raw
        .iter()
        .enumerate()
        .map(|(i, b)| {
            let reply = b.get("reply");
            let title = scalar_string(reply.and_then(|r| r.get("title")));
            let id = scalar_string(reply.and_then(|r| r.get("id")));
            match (title, id) {
                (Some(title), Some(id)) => Ok(PostbackButton::new(title, id)),
                _ => Err(malformed(kind, format!("button {} needs reply.title and reply.id", i))),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    if buttons.is_empty() {
        return Err(malformed(kind, "no buttons"));
    }
    Ok(Action::Buttons { text, buttons })
}

/// `{body: "text" | {text}, action: {sections: [{rows: [{title, id}]}]}}`
fn parse_list_rows(body: &Value) -> Result<Action, ActionError> {
    let kind = ActionKind::SendButton;
    let text = match body.get("body") {
        Some(Value::String(s)) => s.clone(),
        Some(b) => b
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed(kind, "body must be a string or have text"))?
            .to_string(),
        None => return Err(malformed(kind, "missing body")),
    };
    let rows = body
        .get("action")
        .and_then(|a| a.get("sections"))
        .and_then(Value::as_array)
        .and_then(|s| s.first())
        .and_then(|s| s.get("rows"))
        .and_then(Value::as_array)
        .ok_or_else(|| malformed(kind, "missing action.sections[0].rows"))?;
    let quick_replies = rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            match (scalar_string(row.get("title")), scalar_string(row.get("id"))) {
                (Some(title), Some(id)) => Ok(QuickReply::text(title, id)),
                _ => Err(malformed(kind, format!("row {} needs title and id", i))),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Action::QuickReplies {
        text,
        quick_replies,
    })
}

/// `[{link, caption?}, ...]`; a single object is accepted too.
fn parse_media(kind: ActionKind, body: &Value) -> Result<Action, ActionError> {
    let entries: Vec<&Value> = match body {
        Value::Array(a) => a.iter().collect(),
        Value::Object(_) => vec![body],
        _ => return Err(malformed(kind, "expected a list of media objects")),
    };
    let mut items = Vec::with_capacity(entries.len());
    let mut skipped = 0;
    for entry in entries {
        let link = entry
            .get("link")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|l| !l.is_empty());
        match link {
            Some(link) => items.push(MediaItem {
                link: link.to_string(),
                caption: entry
                    .get("caption")
                    .and_then(Value::as_str)
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty()),
            }),
            None => skipped += 1,
        }
    }
    let attachment = kind
        .attachment_kind()
        .ok_or_else(|| malformed(kind, "not a media action"))?;
    Ok(Action::Media {
        kind: attachment,
        items,
        skipped,
    })
}
