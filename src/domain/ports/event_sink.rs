//! Inbound port the event dispatcher drives.

use async_trait::async_trait;

use crate::domain::Error;

/// Reconciliation actions triggered by change notifications.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Reconcile the listed tables with their rules' create templates.
    async fn reconcile_tables(&self, tables: &[String]) -> Result<(), Error>;

    /// Reconcile every table belonging to the device with the given long id.
    async fn reconcile_device_tables(&self, device_id: &str) -> Result<(), Error>;
}
