//! Rule CRUD handlers.
//!
//! ```text
//! GET    /rules?limit&offset
//! GET    /rules/{id}
//! POST   /rules
//! PUT    /rules/{id}
//! DELETE /rules/{id}
//! ```

use actix_web::{delete, get, post, put, web, HttpResponse};
use serde::Deserialize;

use crate::domain::{Error, Rule, TypedRule};
use crate::inbound::http::{ApiResult, HttpState};

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

/// List stored rules, classified against the template catalog.
#[utoipa::path(
    get,
    path = "/rules",
    params(
        ("limit" = Option<i64>, Query, description = "Page size"),
        ("offset" = Option<i64>, Query, description = "Page start")
    ),
    responses(
        (status = 200, description = "Rules", body = [TypedRule]),
        (status = 500, description = "Internal server error", body = Error)
    ),
    tags = ["rules"]
)]
#[get("/rules")]
pub async fn list_rules(
    state: web::Data<HttpState>,
    query: web::Query<ListQuery>,
) -> ApiResult<web::Json<Vec<TypedRule>>> {
    let limit = query.limit.unwrap_or(state.list_defaults.limit);
    let offset = query.offset.unwrap_or(state.list_defaults.offset);
    if limit < 0 || offset < 0 {
        return Err(Error::invalid_request("limit and offset must not be negative"));
    }
    let rules = state.manager.list_rules(limit, offset).await?;
    Ok(web::Json(rules))
}

/// Fetch a single rule by id.
#[utoipa::path(
    get,
    path = "/rules/{id}",
    responses(
        (status = 200, description = "Rule", body = TypedRule),
        (status = 404, description = "Rule not found", body = Error)
    ),
    tags = ["rules"]
)]
#[get("/rules/{id}")]
pub async fn get_rule(
    state: web::Data<HttpState>,
    path: web::Path<String>,
) -> ApiResult<web::Json<TypedRule>> {
    let rule = state.manager.get_rule(&path.into_inner()).await?;
    Ok(web::Json(rule))
}

/// Create a rule; the id is generated server-side.
#[utoipa::path(
    post,
    path = "/rules",
    request_body = Rule,
    responses(
        (status = 200, description = "Created rule", body = TypedRule),
        (status = 400, description = "Invalid request", body = Error)
    ),
    tags = ["rules"]
)]
#[post("/rules")]
pub async fn create_rule(
    state: web::Data<HttpState>,
    payload: web::Json<Rule>,
) -> ApiResult<web::Json<TypedRule>> {
    let created = state.manager.create_rule(payload.into_inner()).await?;
    Ok(web::Json(created))
}

/// Replace a rule; path and body ids must match.
#[utoipa::path(
    put,
    path = "/rules/{id}",
    request_body = Rule,
    responses(
        (status = 200, description = "Rule updated"),
        (status = 400, description = "Invalid request", body = Error),
        (status = 404, description = "Rule not found", body = Error)
    ),
    tags = ["rules"]
)]
#[put("/rules/{id}")]
pub async fn update_rule(
    state: web::Data<HttpState>,
    path: web::Path<String>,
    payload: web::Json<Rule>,
) -> ApiResult<HttpResponse> {
    let rule = payload.into_inner();
    if path.into_inner() != rule.id {
        return Err(Error::invalid_request("ids don't match"));
    }
    state.manager.update_rule(rule).await?;
    Ok(HttpResponse::Ok().finish())
}

/// Delete a rule after running its delete template everywhere it matches.
#[utoipa::path(
    delete,
    path = "/rules/{id}",
    responses(
        (status = 200, description = "Rule deleted"),
        (status = 400, description = "Delete template finished with errors", body = Error),
        (status = 404, description = "Rule not found", body = Error)
    ),
    tags = ["rules"]
)]
#[delete("/rules/{id}")]
pub async fn delete_rule(
    state: web::Data<HttpState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    state.manager.delete_rule(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::MockRuleManager;
    use crate::domain::{ErrorCode, RuleType};
    use crate::inbound::http::ListDefaults;
    use crate::outbound::templates::TemplateStore;
    use actix_web::{test, App};
    use std::sync::Arc;

    fn empty_templates() -> Arc<TemplateStore> {
        let dir = std::env::temp_dir().join(format!("rulekeeper-http-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        TemplateStore::open(dir).expect("open template store")
    }

    fn state(manager: MockRuleManager) -> web::Data<HttpState> {
        web::Data::new(HttpState::new(
            Arc::new(manager),
            empty_templates(),
            ListDefaults {
                limit: 50,
                offset: 0,
            },
        ))
    }

    fn typed(rule: Rule) -> TypedRule {
        TypedRule {
            rule,
            rule_type: RuleType::Custom,
            template: None,
            target: None,
        }
    }

    #[actix_web::test]
    async fn list_uses_configured_defaults() {
        let mut manager = MockRuleManager::new();
        manager
            .expect_list_rules()
            .withf(|limit, offset| *limit == 50 && *offset == 0)
            .returning(|_, _| Ok(vec![]));
        let app =
            test::init_service(App::new().app_data(state(manager)).service(list_rules)).await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/rules").to_request())
            .await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn list_passes_query_parameters_through() {
        let mut manager = MockRuleManager::new();
        manager
            .expect_list_rules()
            .withf(|limit, offset| *limit == 5 && *offset == 10)
            .returning(|_, _| Ok(vec![]));
        let app =
            test::init_service(App::new().app_data(state(manager)).service(list_rules)).await;

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/rules?limit=5&offset=10")
                .to_request(),
        )
        .await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn list_rejects_negative_pagination() {
        let manager = MockRuleManager::new();
        let app =
            test::init_service(App::new().app_data(state(manager)).service(list_rules)).await;

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/rules?limit=-1").to_request(),
        )
        .await;
        assert_eq!(resp.status().as_u16(), 400);
    }

    #[actix_web::test]
    async fn get_translates_not_found() {
        let mut manager = MockRuleManager::new();
        manager
            .expect_get_rule()
            .returning(|_| Err(Error::new(ErrorCode::NotFound, "rule not found")));
        let app = test::init_service(App::new().app_data(state(manager)).service(get_rule)).await;

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/rules/missing").to_request(),
        )
        .await;
        assert_eq!(resp.status().as_u16(), 404);
    }

    #[actix_web::test]
    async fn create_returns_the_typed_rule() {
        let mut manager = MockRuleManager::new();
        manager.expect_create_rule().returning(|mut rule| {
            rule.id = "generated".into();
            Ok(typed(rule))
        });
        let app =
            test::init_service(App::new().app_data(state(manager)).service(create_rule)).await;

        let resp = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/rules")
                .set_json(serde_json::json!({"description": "d", "group": "g"}))
                .to_request(),
        )
        .await;
        assert!(resp.status().is_success());
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["id"], "generated");
        assert_eq!(body["type"], "custom");
    }

    #[actix_web::test]
    async fn update_rejects_mismatched_ids() {
        let manager = MockRuleManager::new();
        let app =
            test::init_service(App::new().app_data(state(manager)).service(update_rule)).await;

        let resp = test::call_service(
            &app,
            test::TestRequest::put()
                .uri("/rules/a")
                .set_json(serde_json::json!({"id": "b"}))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status().as_u16(), 400);
    }

    #[actix_web::test]
    async fn delete_translates_conflict_to_bad_request() {
        let mut manager = MockRuleManager::new();
        manager.expect_delete_rule().returning(|_| {
            Err(Error::conflict(
                "rule has delete template that finished with errors",
            ))
        });
        let app =
            test::init_service(App::new().app_data(state(manager)).service(delete_rule)).await;

        let resp = test::call_service(
            &app,
            test::TestRequest::delete().uri("/rules/r1").to_request(),
        )
        .await;
        assert_eq!(resp.status().as_u16(), 400);
    }
}
