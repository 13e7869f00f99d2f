//! Rule reconciliation service for a TimescaleDB-backed time-series platform.
//!
//! The library is split along the hexagonal boundary: `domain` holds pure
//! types, the SQL template engine, and the port traits; `reconciler` is the
//! engine that applies rules to physical tables under the two-level lock;
//! `inbound` and `outbound` hold the HTTP/event adapters and the Postgres,
//! permission, identity, device-registry, and template-catalog adapters.

pub mod config;
pub mod doc;
pub mod domain;
pub mod inbound;
pub mod outbound;
pub mod reconciler;
pub mod server;
