//! Messenger ⇄ Sarufi bridge library: webhook gateway, action dispatch, and the
//! Messenger and Sarufi HTTP clients used by the CLI.

pub mod actions;
pub mod channels;
pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod gateway;
pub mod init;
