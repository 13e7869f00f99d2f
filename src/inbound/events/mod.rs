//! Change-event dispatcher.
//!
//! The message-bus consumer framework lives outside this service; whatever
//! transport delivers the two streams, it feeds raw topic/payload pairs in
//! through the [`ChangeFeed`] port (the in-process [`ChannelFeed`] adapter
//! is provided for embedding and tests). The dispatcher decodes, filters,
//! and drives the engine through the [`EventSink`] port; handler errors
//! are logged and consumption continues.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::domain::events::{PermissionUpdateMessage, TableEditMessage, TableEditMethod};
use crate::domain::ports::{ChangeFeed, ChangeFeedError, EventSink, FeedMessage};
use crate::domain::Error;

/// Backoff after a feed error before polling again.
const FEED_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Routes decoded bus messages into the reconciliation engine.
#[derive(Clone)]
pub struct EventDispatcher {
    sink: Arc<dyn EventSink>,
    topic_table_updates: String,
    topic_permission_updates: String,
}

impl EventDispatcher {
    pub fn new(
        sink: Arc<dyn EventSink>,
        topic_table_updates: impl Into<String>,
        topic_permission_updates: impl Into<String>,
    ) -> Self {
        Self {
            sink,
            topic_table_updates: topic_table_updates.into(),
            topic_permission_updates: topic_permission_updates.into(),
        }
    }

    /// Decode and route one message.
    pub async fn dispatch(&self, message: FeedMessage) -> Result<(), Error> {
        if message.topic == self.topic_table_updates {
            let decoded: TableEditMessage = decode(&message.payload)?;
            self.handle_table_edit(decoded).await
        } else if message.topic == self.topic_permission_updates {
            let decoded: PermissionUpdateMessage = decode(&message.payload)?;
            self.handle_permission_update(decoded).await
        } else {
            Err(Error::invalid_request(format!(
                "message on unexpected topic {:?}",
                message.topic
            )))
        }
    }

    async fn handle_table_edit(&self, message: TableEditMessage) -> Result<(), Error> {
        match message.method {
            TableEditMethod::Put => self.sink.reconcile_tables(&message.tables).await,
            TableEditMethod::Delete => {
                // The upstream has already dropped the table.
                debug!(tables = ?message.tables, "ignoring table delete notification");
                Ok(())
            }
        }
    }

    async fn handle_permission_update(
        &self,
        message: PermissionUpdateMessage,
    ) -> Result<(), Error> {
        if message.resource_kind != "devices" || message.command == "DELETE" {
            debug!(
                resource_kind = %message.resource_kind,
                command = %message.command,
                "ignoring permission update"
            );
            return Ok(());
        }
        self.sink.reconcile_device_tables(&message.resource_id).await
    }

    /// Drain the feed until it closes or `shutdown` flips. Dispatch
    /// failures are logged and consumption continues; only the fatal hook
    /// (via the lock manager) terminates the process.
    pub async fn run(self, mut feed: impl ChangeFeed, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                next = feed.next() => match next {
                    Ok(Some(message)) => {
                        debug!(topic = %message.topic, "change-feed message received");
                        if let Err(err) = self.dispatch(message).await {
                            error!(error = %err, "could not process change-feed message");
                        }
                    }
                    Ok(None) => {
                        info!("change feed closed, dispatcher stopping");
                        return;
                    }
                    Err(err) => {
                        error!(error = %err, "change feed failed");
                        tokio::time::sleep(FEED_ERROR_BACKOFF).await;
                    }
                },
                _ = shutdown.changed() => {
                    info!("shutdown requested, dispatcher stopping");
                    return;
                }
            }
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(payload: &[u8]) -> Result<T, Error> {
    serde_json::from_slice(payload)
        .map_err(|err| Error::invalid_request(format!("undecodable message: {err}")))
}

/// In-process change feed backed by a bounded channel; the embedding
/// consumer framework pushes messages through the returned sender.
pub struct ChannelFeed {
    receiver: mpsc::Receiver<FeedMessage>,
}

impl ChannelFeed {
    pub fn new(buffer: usize) -> (mpsc::Sender<FeedMessage>, Self) {
        let (sender, receiver) = mpsc::channel(buffer);
        (sender, Self { receiver })
    }
}

#[async_trait]
impl ChangeFeed for ChannelFeed {
    async fn next(&mut self) -> Result<Option<FeedMessage>, ChangeFeedError> {
        Ok(self.receiver.recv().await)
    }
}
