//! OpenAPI documentation setup.

use actix_web::{get, web};
use utoipa::OpenApi;

use crate::domain::{Error, ErrorCode, Rule, RuleType, Template, TemplateRule, TemplateTarget, TypedRule};

/// OpenAPI document for the REST API, served at `GET /doc`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Rulekeeper API",
        description = "CRUD surface for declarative schema rules and their template catalog.",
        license(
            name = "Apache-2.0",
            url = "https://www.apache.org/licenses/LICENSE-2.0.html"
        )
    ),
    servers(
        (url = "/", description = "Relative to the deployment base URL")
    ),
    paths(
        crate::inbound::http::rules::list_rules,
        crate::inbound::http::rules::get_rule,
        crate::inbound::http::rules::create_rule,
        crate::inbound::http::rules::update_rule,
        crate::inbound::http::rules::delete_rule,
        crate::inbound::http::template_rules::create_template_rule,
        crate::inbound::http::template_rules::update_template_rule,
        crate::inbound::http::templates::list_templates,
        crate::inbound::http::health::ready,
        crate::inbound::http::health::live,
    ),
    components(schemas(
        Rule,
        TypedRule,
        TemplateRule,
        Template,
        RuleType,
        TemplateTarget,
        Error,
        ErrorCode
    )),
    tags(
        (name = "rules", description = "Rule catalog CRUD"),
        (name = "template-rules", description = "Template-form rule CRUD"),
        (name = "templates", description = "Template catalog"),
        (name = "health", description = "Health probes")
    )
)]
pub struct ApiDoc;

/// Serve the generated OpenAPI document.
#[get("/doc")]
pub async fn openapi_doc() -> web::Json<utoipa::openapi::OpenApi> {
    web::Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_includes_the_rule_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/rules"));
        assert!(doc.paths.paths.contains_key("/rules/{id}"));
        assert!(doc.paths.paths.contains_key("/template-rules"));
        assert!(doc.paths.paths.contains_key("/templates"));
        assert!(doc.paths.paths.contains_key("/health/ready"));
    }
}
