//! Inbound port for the message-bus consumer framework.
//!
//! The consumer framework itself lives outside this service; whatever
//! transport it uses, it hands raw topic/payload pairs to the event
//! dispatcher through this seam.

use async_trait::async_trait;

use super::macros::define_port_error;

define_port_error! {
    /// Errors raised while fetching from the change feed.
    pub enum ChangeFeedError {
        /// The feed is unreachable or misconfigured.
        Transport { message: String } => "change feed transport failed: {message}",
    }
}

/// A raw message delivered by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Pull-style change feed; `None` means the feed has shut down.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChangeFeed: Send {
    async fn next(&mut self) -> Result<Option<FeedMessage>, ChangeFeedError>;
}
