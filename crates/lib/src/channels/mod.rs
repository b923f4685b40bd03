//! Messaging channel (Facebook Messenger).
//!
//! Inbound webhook events are normalized into [`InboundEvent`]; outbound sends go
//! through the [`Messenger`] trait so the dispatcher can be driven by fakes in tests.

mod inbound;
mod messenger;

pub use inbound::{parse_webhook_event, InboundEvent, MessageKind};
pub use messenger::{
    AttachmentKind, GenericElement, GraphError, GraphMessenger, Messenger, PostbackButton,
    QuickReply, SenderAction, GENERIC_TEMPLATE_MAX_ELEMENTS,
};
