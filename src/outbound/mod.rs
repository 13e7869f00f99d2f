//! Outbound adapters: persistence plus HTTP clients for the permission
//! service, identity provider, and device registry, and the on-disk
//! template catalog.

pub mod device_registry;
pub mod identity;
pub mod permissions;
pub mod persistence;
pub mod templates;
