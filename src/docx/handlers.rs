use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpResponse, Responder};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use super::engine_error_response;
use crate::engine::{RenderRequest, DOCX_MIME_TYPE};
use crate::template::{validate, ValidationReport, VersionTag};
use crate::{AppState, ErrorResponse};

/// Returned when the request body does not follow the version's example.
#[derive(Serialize, Deserialize, ToSchema)]
pub struct PayloadValidationError {
    pub error: String,
    pub message: String,
    pub timestamp: String,
    pub validation_result: ValidationReport,
}

impl PayloadValidationError {
    pub fn new(report: ValidationReport) -> Self {
        Self {
            error: "ValidationError".to_string(),
            message: "Template body is invalid.".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            validation_result: report,
        }
    }
}

/// Lowercase ASCII slug for a download name.
fn slugify(name: &str, fallback: &str) -> String {
    let mut result = String::new();
    let mut last_dash = false;

    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            result.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if (ch.is_whitespace() || ch == '-' || ch == '_') && !last_dash && !result.is_empty() {
            result.push('-');
            last_dash = true;
        }
    }

    let result = result.trim_matches('-');
    if result.is_empty() {
        fallback.to_string()
    } else {
        result.to_string()
    }
}

pub fn download_name(title: &str, tag: VersionTag) -> String {
    format!("{}_{}.docx", slugify(title, "document"), tag)
}

async fn generate(
    state: web::Data<AppState>,
    id: Uuid,
    tag: Option<VersionTag>,
    body: Value,
) -> HttpResponse {
    let meta = match state.store.get(id).await {
        Ok(meta) => meta,
        Err(e) => return e.to_response(),
    };
    let (tag, template) = match state.store.load_template(id, tag).await {
        Ok(loaded) => loaded,
        Err(e) => return e.to_response(),
    };

    let Value::Object(incoming) = &body else {
        return HttpResponse::BadRequest()
            .json(ErrorResponse::bad_request("Request body must be a JSON object"));
    };
    match state.store.load_example(id, tag).await {
        Ok(example) => {
            let report = validate(&example, incoming);
            if !report.is_valid() {
                return HttpResponse::BadRequest().json(PayloadValidationError::new(report));
            }
        }
        Err(e) => return e.to_response(),
    }

    let request = match RenderRequest::from_json(body) {
        Ok(request) => request,
        Err(message) => return HttpResponse::BadRequest().json(ErrorResponse::bad_request(&message)),
    };

    info!("Generating document from template {} {}", id, tag);
    match state.engine.generate(template, request).await {
        Ok(document) => HttpResponse::Ok()
            .content_type(DOCX_MIME_TYPE)
            .insert_header(ContentDisposition {
                disposition: DispositionType::Attachment,
                parameters: vec![DispositionParam::Filename(download_name(&meta.title, tag))],
            })
            .body(document.bytes),
        Err(e) => engine_error_response(&e),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/docx/{id}",
    tag = "Documents",
    params(("id" = Uuid, Path, description = "Template ID")),
    request_body(content = Object, description = "Values for the template variables"),
    responses(
        (status = 200, description = "Generated .docx document"),
        (status = 400, description = "Template body is invalid", body = PayloadValidationError),
        (status = 404, description = "Template was not found", body = ErrorResponse),
        (status = 504, description = "Rendering timed out", body = ErrorResponse)
    )
)]
pub async fn generate_latest(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<Value>,
) -> impl Responder {
    generate(state, path.into_inner(), None, body.into_inner()).await
}

#[utoipa::path(
    post,
    path = "/api/v1/docx/{id}/{tag}",
    tag = "Documents",
    params(
        ("id" = Uuid, Path, description = "Template ID"),
        ("tag" = String, Path, description = "Version tag, e.g. v1.0.0")
    ),
    request_body(content = Object, description = "Values for the template variables"),
    responses(
        (status = 200, description = "Generated .docx document"),
        (status = 400, description = "Template body is invalid", body = PayloadValidationError),
        (status = 404, description = "Template version was not found", body = ErrorResponse),
        (status = 504, description = "Rendering timed out", body = ErrorResponse)
    )
)]
pub async fn generate_for_version(
    state: web::Data<AppState>,
    path: web::Path<(Uuid, String)>,
    body: web::Json<Value>,
) -> impl Responder {
    let (id, tag) = path.into_inner();
    match tag.parse::<VersionTag>() {
        Ok(tag) => generate(state, id, Some(tag), body.into_inner()).await,
        Err(e) => HttpResponse::BadRequest().json(ErrorResponse::bad_request(&e.to_string())),
    }
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/docx/{id}").route(web::post().to(generate_latest)))
        .service(web::resource("/docx/{id}/{tag}").route(web::post().to(generate_for_version)));
}
