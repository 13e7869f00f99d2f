//! Domain types and seams, free of adapter concerns.

mod error;
pub mod events;
pub mod ports;
mod rule;
pub mod short_id;
pub mod sql_template;

pub use error::{Error, ErrorCode};
pub use rule::{
    Rule, RuleType, TableInfo, Template, TemplateRule, TemplateTarget, TypedRule,
    DEVICE_TABLE_PATTERN, EXPORT_TABLE_PATTERN,
};
