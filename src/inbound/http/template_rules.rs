//! Template-form rule handlers.
//!
//! These accept the compact template form and inflate it against the
//! current catalog before handing the full rule to the engine.

use actix_web::{post, put, web, HttpResponse};

use crate::domain::{Error, TemplateRule, TypedRule};
use crate::inbound::http::{ApiResult, HttpState};

/// Create a rule from a named template.
#[utoipa::path(
    post,
    path = "/template-rules",
    request_body = TemplateRule,
    responses(
        (status = 200, description = "Created rule", body = TypedRule),
        (status = 400, description = "Unknown template or invalid request", body = Error)
    ),
    tags = ["template-rules"]
)]
#[post("/template-rules")]
pub async fn create_template_rule(
    state: web::Data<HttpState>,
    payload: web::Json<TemplateRule>,
) -> ApiResult<web::Json<TypedRule>> {
    let rule = payload.into_inner().into_rule(&state.templates.snapshot())?;
    let created = state.manager.create_rule(rule).await?;
    Ok(web::Json(created))
}

/// Replace a rule from a named template; path and body ids must match.
#[utoipa::path(
    put,
    path = "/template-rules/{id}",
    request_body = TemplateRule,
    responses(
        (status = 200, description = "Rule updated"),
        (status = 400, description = "Unknown template or invalid request", body = Error),
        (status = 404, description = "Rule not found", body = Error)
    ),
    tags = ["template-rules"]
)]
#[put("/template-rules/{id}")]
pub async fn update_template_rule(
    state: web::Data<HttpState>,
    path: web::Path<String>,
    payload: web::Json<TemplateRule>,
) -> ApiResult<HttpResponse> {
    let template_rule = payload.into_inner();
    if path.into_inner() != template_rule.id {
        return Err(Error::invalid_request("ids don't match"));
    }
    let rule = template_rule.into_rule(&state.templates.snapshot())?;
    state.manager.update_rule(rule).await?;
    Ok(HttpResponse::Ok().finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::MockRuleManager;
    use crate::domain::{RuleType, Template, DEVICE_TABLE_PATTERN};
    use crate::inbound::http::ListDefaults;
    use crate::outbound::templates::TemplateStore;
    use actix_web::{test, App};
    use std::sync::Arc;

    fn catalog_with_downsample() -> Arc<TemplateStore> {
        let dir =
            std::env::temp_dir().join(format!("rulekeeper-tmplrule-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let template = Template {
            command_template: "SELECT 1".into(),
            delete_template: "SELECT 2".into(),
            description: "downsampling view".into(),
            priority: 7,
            group: "downsampling".into(),
        };
        std::fs::write(
            dir.join("downsample.json"),
            serde_json::to_vec(&template).expect("encode template"),
        )
        .expect("write template");
        TemplateStore::open(dir).expect("open template store")
    }

    fn state(manager: MockRuleManager) -> web::Data<HttpState> {
        web::Data::new(HttpState::new(
            Arc::new(manager),
            catalog_with_downsample(),
            ListDefaults {
                limit: 50,
                offset: 0,
            },
        ))
    }

    #[actix_web::test]
    async fn create_inflates_the_named_template() {
        let mut manager = MockRuleManager::new();
        manager
            .expect_create_rule()
            .withf(|rule| {
                rule.group == "downsampling"
                    && rule.priority == 7
                    && rule.table_reg_ex == DEVICE_TABLE_PATTERN
                    && rule.users == vec!["u1".to_string()]
            })
            .returning(|rule| {
                Ok(TypedRule {
                    rule,
                    rule_type: RuleType::Template,
                    template: Some("downsample".into()),
                    target: None,
                })
            });
        let app = test::init_service(
            App::new()
                .app_data(state(manager))
                .service(create_template_rule),
        )
        .await;

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/template-rules")
                .set_json(serde_json::json!({
                    "template": "downsample",
                    "target": "device",
                    "users": ["u1"]
                }))
                .to_request(),
        )
        .await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn unknown_template_is_a_bad_request() {
        let manager = MockRuleManager::new();
        let app = test::init_service(
            App::new()
                .app_data(state(manager))
                .service(create_template_rule),
        )
        .await;

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/template-rules")
                .set_json(serde_json::json!({
                    "template": "nope",
                    "target": "export"
                }))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status().as_u16(), 400);
    }

    #[actix_web::test]
    async fn update_rejects_mismatched_ids() {
        let manager = MockRuleManager::new();
        let app = test::init_service(
            App::new()
                .app_data(state(manager))
                .service(update_template_rule),
        )
        .await;

        let resp = test::call_service(
            &app,
            test::TestRequest::put()
                .uri("/template-rules/a")
                .set_json(serde_json::json!({
                    "id": "b",
                    "template": "downsample",
                    "target": "device"
                }))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status().as_u16(), 400);
    }
}
