//! Inbound adapters: the HTTP surface and the change-event dispatcher.

pub mod events;
pub mod http;
