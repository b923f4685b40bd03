//! Conversational service abstraction and the Sarufi client.
//!
//! The dispatcher only needs one call: hand over the user's message and get back
//! the list of actions to replay on the channel.

mod sarufi;

pub use sarufi::{ConversationBackend, SarufiBot, SarufiClient, SarufiError};
