//! Port traits at the hexagonal seams.
//!
//! Outbound ports cover the collaborators the classifier consults
//! (permission service, identity provider, device registry) and the change
//! feed the event dispatcher drains. The inbound `RuleManager` port is what
//! HTTP handlers depend on so they stay testable without a database.

mod change_feed;
mod device_registry;
mod event_sink;
mod identity;
pub(crate) mod macros;
mod permissions;
mod rule_manager;

pub use change_feed::{ChangeFeed, ChangeFeedError, FeedMessage};
pub use device_registry::{DeviceRegistry, DeviceRegistryError};
pub use event_sink::EventSink;
pub use identity::{IdentityClient, IdentityClientError, RoleMapping};
pub use permissions::{
    PermissionFlags, PermissionsClient, PermissionsClientError, ResourcePermissions,
};
pub use rule_manager::RuleManager;

#[cfg(test)]
pub use change_feed::MockChangeFeed;
#[cfg(test)]
pub use device_registry::MockDeviceRegistry;
#[cfg(test)]
pub use event_sink::MockEventSink;
#[cfg(test)]
pub use identity::MockIdentityClient;
#[cfg(test)]
pub use permissions::MockPermissionsClient;
#[cfg(test)]
pub use rule_manager::MockRuleManager;
