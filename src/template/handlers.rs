use actix_multipart::Multipart;
use actix_web::{web, HttpResponse, Responder};
use log::info;
use uuid::Uuid;

use super::model::{CreateTemplateRequest, TemplateMeta, VersionMeta, VersionTag};
use super::multipart_parser::MultipartParser;
use crate::{AppState, ErrorResponse};

#[utoipa::path(
    get,
    path = "/api/v1/templates",
    tag = "Templates",
    responses(
        (status = 200, description = "List all templates", body = Vec<TemplateMeta>)
    )
)]
pub async fn list_templates(state: web::Data<AppState>) -> impl Responder {
    match state.store.list().await {
        Ok(templates) => HttpResponse::Ok().json(templates),
        Err(e) => e.to_response(),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/templates",
    tag = "Templates",
    request_body = CreateTemplateRequest,
    responses(
        (status = 201, description = "Template created", body = TemplateMeta),
        (status = 400, description = "Invalid request", body = ErrorResponse)
    )
)]
pub async fn create_template(
    state: web::Data<AppState>,
    item: web::Json<CreateTemplateRequest>,
) -> impl Responder {
    let request = item.into_inner();
    if request.title.trim().is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse::bad_request("Title must not be empty"));
    }
    match state.store.create(request).await {
        Ok(meta) => HttpResponse::Created().json(meta),
        Err(e) => e.to_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/templates/{id}",
    tag = "Templates",
    params(("id" = Uuid, Path, description = "Template ID")),
    responses(
        (status = 200, description = "Template metadata", body = TemplateMeta),
        (status = 404, description = "Template was not found", body = ErrorResponse)
    )
)]
pub async fn get_template(state: web::Data<AppState>, path: web::Path<Uuid>) -> impl Responder {
    match state.store.get(path.into_inner()).await {
        Ok(meta) => HttpResponse::Ok().json(meta),
        Err(e) => e.to_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/templates/{id}/versions",
    tag = "Templates",
    params(("id" = Uuid, Path, description = "Template ID")),
    responses(
        (status = 200, description = "Versions, newest first", body = Vec<VersionMeta>),
        (status = 404, description = "Template was not found", body = ErrorResponse)
    )
)]
pub async fn list_versions(state: web::Data<AppState>, path: web::Path<Uuid>) -> impl Responder {
    match state.store.versions(path.into_inner()).await {
        Ok(versions) => HttpResponse::Ok().json(versions),
        Err(e) => e.to_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/templates/{id}/versions/{tag}",
    tag = "Templates",
    params(
        ("id" = Uuid, Path, description = "Template ID"),
        ("tag" = String, Path, description = "Version tag, e.g. v1.0.0")
    ),
    responses(
        (status = 200, description = "Version metadata", body = VersionMeta),
        (status = 400, description = "Malformed version tag", body = ErrorResponse),
        (status = 404, description = "Template version was not found", body = ErrorResponse)
    )
)]
pub async fn get_version(
    state: web::Data<AppState>,
    path: web::Path<(Uuid, String)>,
) -> impl Responder {
    let (id, tag) = path.into_inner();
    let tag: VersionTag = match tag.parse() {
        Ok(tag) => tag,
        Err(e) => return HttpResponse::BadRequest().json(ErrorResponse::bad_request(&e.to_string())),
    };
    match state.store.version(id, tag).await {
        Ok(version) => HttpResponse::Ok().json(version),
        Err(e) => e.to_response(),
    }
}

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct VersionUploadForm {
    #[allow(unused)]
    #[schema(example = "v1.0.0")]
    pub tag: String,
    #[allow(unused)]
    pub message: Option<String>,
    #[allow(unused)]
    #[schema(value_type = String, format = Binary)]
    pub docx_file: Vec<u8>,
    #[allow(unused)]
    #[schema(value_type = String, format = Binary)]
    pub json_file: Vec<u8>,
}

#[utoipa::path(
    post,
    path = "/api/v1/templates/{id}/versions",
    tag = "Templates",
    params(("id" = Uuid, Path, description = "Template ID")),
    request_body(content = inline(VersionUploadForm), content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Version created", body = VersionMeta),
        (status = 400, description = "Invalid version upload", body = ErrorResponse),
        (status = 404, description = "Template was not found", body = ErrorResponse),
        (status = 409, description = "Version already exists", body = ErrorResponse)
    )
)]
pub async fn create_version(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    payload: Multipart,
) -> impl Responder {
    let id = path.into_inner();
    let version = match MultipartParser::parse_version_multipart(payload)
        .await
        .and_then(|parsed| parsed.into_new_version())
    {
        Ok(version) => version,
        Err(e) => return HttpResponse::from(e),
    };

    info!("Uploading version {} for template {}", version.tag, id);
    match state.store.add_version(id, version).await {
        Ok(meta) => HttpResponse::Created().json(meta),
        Err(e) => e.to_response(),
    }
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/templates")
            .route(web::get().to(list_templates))
            .route(web::post().to(create_template)),
    )
    .service(web::resource("/templates/{id}").route(web::get().to(get_template)))
    .service(
        web::resource("/templates/{id}/versions")
            .route(web::get().to(list_versions))
            .route(web::post().to(create_version)),
    )
    .service(web::resource("/templates/{id}/versions/{tag}").route(web::get().to(get_version)));
}
