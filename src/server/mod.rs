//! HTTP server construction and wiring.

use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};

use crate::doc::openapi_doc;
use crate::inbound::http::health::{live, ready, HealthState};
use crate::inbound::http::rules::{create_rule, delete_rule, get_rule, list_rules, update_rule};
use crate::inbound::http::template_rules::{create_template_rule, update_template_rule};
use crate::inbound::http::templates::list_templates;
use crate::inbound::http::HttpState;

/// Construct the Actix server for the REST surface.
///
/// # Errors
///
/// Propagates [`std::io::Error`] when binding the socket fails.
pub fn create_server(
    state: HttpState,
    health_state: web::Data<HealthState>,
    port: u16,
) -> std::io::Result<Server> {
    let state = web::Data::new(state);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(health_state.clone())
            .service(list_rules)
            .service(get_rule)
            .service(create_rule)
            .service(update_rule)
            .service(delete_rule)
            .service(create_template_rule)
            .service(update_template_rule)
            .service(list_templates)
            .service(openapi_doc)
            .service(ready)
            .service(live)
    })
    .bind(("0.0.0.0", port))?
    .run();
    Ok(server)
}
