//! Response dispatch: ask Sarufi for the next actions, then replay them on Messenger.
//!
//! Media goes out before text and buttons; within each group the service's order is
//! kept. Nothing here returns an error: every failure is logged and counted in the
//! [`DispatchReport`], and already-sent messages stay sent.

use crate::actions::{describe_record, Action, ActionKind, MediaItem};
use crate::channels::{
    AttachmentKind, GenericElement, GraphError, InboundEvent, MessageKind, Messenger,
    SenderAction, GENERIC_TEMPLATE_MAX_ELEMENTS,
};
use crate::conversation::ConversationBackend;
use serde_json::Value;
use std::sync::Arc;

/// Card title used when an image has no caption (titles are mandatory in generic templates).
const UNTITLED_IMAGE: &str = "Image";
/// Messenger's limit on a generic-template card's title and subtitle, in characters.
const CARD_TEXT_MAX: usize = 80;

/// Per-deployment dispatch switches.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Channel tag sent to Sarufi.
    pub channel: String,
    pub typing_indicator: bool,
    pub batch_images: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            channel: "whatsapp".to_string(),
            typing_indicator: true,
            batch_images: true,
        }
    }
}

/// Outcome of one dispatch unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Outbound calls that succeeded (typing indicator excluded).
    pub sent: usize,
    /// Failed outbound calls, malformed actions, or a failed service call.
    pub failed: usize,
    /// Unsupported records and media entries without a link.
    pub skipped: usize,
}

/// Turns one inbound event into outbound sends. Cheap to clone; share across tasks.
#[derive(Clone)]
pub struct Dispatcher {
    conversation: Arc<dyn ConversationBackend>,
    messenger: Arc<dyn Messenger>,
    options: DispatchOptions,
}

impl Dispatcher {
    pub fn new(
        conversation: Arc<dyn ConversationBackend>,
        messenger: Arc<dyn Messenger>,
        options: DispatchOptions,
    ) -> Self {
        Self {
            conversation,
            messenger,
            options,
        }
    }

    pub async fn handle(&self, event: &InboundEvent) -> DispatchReport {
        self.respond(&event.sender_id, &event.message, event.kind).await
    }

    /// Query the service for `message` and deliver the resulting actions to `sender_id`.
    pub async fn respond(&self, sender_id: &str, message: &str, message_type: MessageKind) -> DispatchReport {
        let unit = dispatch_unit_id();
        log::debug!(
            "[{}] dispatching {} message from {}",
            unit,
            message_type.as_str(),
            sender_id
        );
        let actions = match self
            .conversation
            .respond(message, sender_id, message_type, &self.options.channel)
            .await
        {
            Ok(actions) => actions,
            Err(e) => {
                log::error!("[{}] conversation service failed: {}", unit, e);
                return DispatchReport {
                    failed: 1,
                    ..DispatchReport::default()
                };
            }
        };
        let report = self.execute_actions(&unit, sender_id, &actions).await;
        log::info!(
            "[{}] done: {} sent, {} failed, {} skipped",
            unit,
            report.sent,
            report.failed,
            report.skipped
        );
        report
    }

    /// Replay an action list: media first, then text and buttons.
    pub async fn execute_actions(&self, unit: &str, sender_id: &str, actions: &[Value]) -> DispatchReport {
        let mut report = DispatchReport::default();
        if actions.is_empty() {
            log::debug!("[{}] no actions returned", unit);
            return report;
        }

        let mut media = Vec::new();
        let mut text = Vec::new();
        for record in actions {
            match ActionKind::of(record) {
                Some(kind) if kind.is_media() => media.push((kind, record)),
                Some(kind) => text.push((kind, record)),
                None => {
                    log::info!(
                        "[{}] action not supported, skipping: {}",
                        unit,
                        describe_record(record)
                    );
                    report.skipped += 1;
                }
            }
        }
        if media.is_empty() && text.is_empty() {
            return report;
        }

        if self.options.typing_indicator {
            if let Err(e) = self.messenger.send_action(sender_id, SenderAction::TypingOn).await {
                log::debug!("[{}] typing indicator failed: {}", unit, e);
            }
        }

        for (kind, record) in media.into_iter().chain(text) {
            match Action::parse(kind, record) {
                Ok(action) => self.send(unit, sender_id, action, &mut report).await,
                Err(e) => {
                    log::error!("[{}] {}", unit, e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    async fn send(&self, unit: &str, sender_id: &str, action: Action, report: &mut DispatchReport) {
        match action {
            Action::Text(text) => {
                let res = self.messenger.send_text_message(sender_id, &text).await;
                tally(unit, "text", res, report);
            }
            Action::Buttons { text, buttons } => {
                let res = self
                    .messenger
                    .send_button_message(sender_id, &text, &buttons)
                    .await;
                tally(unit, "button template", res, report);
            }
            Action::QuickReplies {
                text,
                quick_replies,
            } => {
                let res = self
                    .messenger
                    .send_quick_replies(sender_id, &text, &quick_replies)
                    .await;
                tally(unit, "quick replies", res, report);
            }
            Action::Media {
                kind,
                items,
                skipped,
            } => {
                if skipped > 0 {
                    log::warn!(
                        "[{}] {} {} item(s) without a link skipped",
                        unit,
                        skipped,
                        kind.as_str()
                    );
                    report.skipped += skipped;
                }
                if kind == AttachmentKind::Image && self.options.batch_images {
                    self.send_image_cards(unit, sender_id, &items, report).await;
                } else {
                    for item in &items {
                        let res = self
                            .messenger
                            .send_attachment_url(sender_id, kind, &item.link)
                            .await;
                        tally(unit, kind.as_str(), res, report);
                    }
                }
            }
        }
    }

    /// Images as generic-template cards, at most [`GENERIC_TEMPLATE_MAX_ELEMENTS`] per message.
    async fn send_image_cards(
        &self,
        unit: &str,
        sender_id: &str,
        items: &[MediaItem],
        report: &mut DispatchReport,
    ) {
        for chunk in items.chunks(GENERIC_TEMPLATE_MAX_ELEMENTS) {
            let elements: Vec<GenericElement> = chunk.iter().map(image_card).collect();
            let res = self
                .messenger
                .send_generic_message(sender_id, &elements)
                .await;
            tally(unit, "image cards", res, report);
        }
    }
}

/// Long captions spill from the title into the subtitle; anything past that is dropped.
fn image_card(item: &MediaItem) -> GenericElement {
    let caption = item.caption.as_deref().unwrap_or(UNTITLED_IMAGE);
    let mut chars = caption.chars();
    let title: String = chars.by_ref().take(CARD_TEXT_MAX).collect();
    let rest: String = chars.take(CARD_TEXT_MAX).collect();
    GenericElement {
        title,
        subtitle: Some(rest).filter(|s| !s.is_empty()),
        image_url: Some(item.link.clone()),
    }
}

fn tally(unit: &str, what: &str, res: Result<(), GraphError>, report: &mut DispatchReport) {
    match res {
        Ok(()) => report.sent += 1,
        Err(e) => {
            log::error!("[{}] sending {} failed: {}", unit, what, e);
            report.failed += 1;
        }
    }
}

/// Short id used to correlate the log lines of one dispatch unit.
fn dispatch_unit_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}
