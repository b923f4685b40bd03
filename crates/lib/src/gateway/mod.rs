//! Gateway: the Messenger webhook endpoint.
//!
//! `GET /` answers the subscription handshake, `POST /` receives events and queues
//! them for dispatch. Events are acknowledged before any downstream call is made.

mod server;

pub use server::{run_gateway, serve};
