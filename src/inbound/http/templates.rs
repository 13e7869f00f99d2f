//! Template catalog read endpoint.

use std::collections::HashMap;

use actix_web::{get, web};

use crate::domain::Template;
use crate::inbound::http::{ApiResult, HttpState};

/// Return the current template catalog, keyed by template name.
#[utoipa::path(
    get,
    path = "/templates",
    responses(
        (status = 200, description = "Template catalog keyed by name")
    ),
    tags = ["templates"]
)]
#[get("/templates")]
pub async fn list_templates(
    state: web::Data<HttpState>,
) -> ApiResult<web::Json<HashMap<String, Template>>> {
    Ok(web::Json(state.templates.snapshot()))
}
