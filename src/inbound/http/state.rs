//! Shared HTTP adapter state.
//!
//! Handlers accept this state via `actix_web::web::Data` so they depend
//! only on the engine port and the template catalog and remain testable
//! without a database.

use std::sync::Arc;

use crate::domain::ports::RuleManager;
use crate::outbound::templates::TemplateStore;

/// Defaults applied when the list query string omits limit or offset.
#[derive(Debug, Clone, Copy)]
pub struct ListDefaults {
    pub limit: i64,
    pub offset: i64,
}

/// Dependency bundle for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub manager: Arc<dyn RuleManager>,
    pub templates: Arc<TemplateStore>,
    pub list_defaults: ListDefaults,
}

impl HttpState {
    /// Construct state from explicit port implementations.
    pub fn new(
        manager: Arc<dyn RuleManager>,
        templates: Arc<TemplateStore>,
        list_defaults: ListDefaults,
    ) -> Self {
        Self {
            manager,
            templates,
            list_defaults,
        }
    }
}
