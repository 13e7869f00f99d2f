//! PostgreSQL persistence for the rule catalog and reconciliation work.

mod pool;
mod store;
mod tx;

pub use pool::{PgConnection, PgPool, PoolConfig};
pub use store::{PgRuleStore, StoreError};
pub use tx::RuleTx;
