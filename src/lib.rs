use actix_cors::Cors;
use actix_web::middleware::Compress;
use actix_web::{http::header, web, App, HttpServer};
use actix_web_prometheus::PrometheusMetricsBuilder;
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

pub mod config;
pub mod docx;
pub mod engine;
pub mod health;
pub mod state;
pub mod template;

pub use crate::config::AppConfig;
pub use crate::state::AppState;

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_type: &str, message: &str) -> Self {
        Self {
            error: error_type.to_string(),
            message: message.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn not_found(message: &str) -> Self {
        Self::new("NotFound", message)
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new("BadRequest", message)
    }

    pub fn internal_error(message: &str) -> Self {
        Self::new("InternalServerError", message)
    }
}

/// Register every API route. Mounted under the configured prefix.
pub fn configure_api(cfg: &mut web::ServiceConfig) {
    cfg.configure(health::config)
        .configure(template::handlers::config)
        .configure(docx::handlers::config);
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::health::health,
        crate::template::handlers::list_templates,
        crate::template::handlers::create_template,
        crate::template::handlers::get_template,
        crate::template::handlers::list_versions,
        crate::template::handlers::get_version,
        crate::template::handlers::create_version,
        crate::docx::handlers::generate_latest,
        crate::docx::handlers::generate_for_version
    ),
    components(
        schemas(
            health::HealthResponse,
            template::TemplateMeta,
            template::VersionMeta,
            template::CreateTemplateRequest,
            template::ValidationReport,
            template::handlers::VersionUploadForm,
            docx::handlers::PayloadValidationError,
            ErrorResponse,
        )
    ),
    tags(
        (name = "Health", description = "Liveness check."),
        (name = "Templates", description = "Template and version management."),
        (name = "Documents", description = "Render .docx documents from stored templates.")
    ),
    servers(
        (url = "http://127.0.0.1:8080", description = "Localhost server")
    )
)]
pub struct ApiDoc;

pub async fn run() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env()?;
    let app_state = match AppState::new(config.clone()).await {
        Ok(state) => web::Data::new(state),
        Err(e) => {
            log::error!(
                "Failed to open template store at {}: {}",
                config.template_root.display(),
                e
            );
            return Err(e);
        }
    };

    let prometheus = PrometheusMetricsBuilder::new("document_generator")
        .endpoint("/metrics")
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create Prometheus metrics middleware: {}", e))?;

    log::info!(
        "Starting server at http://{}{}",
        config.bind_address,
        config.api_prefix
    );

    let bind_address = config.bind_address.clone();
    HttpServer::new(move || {
        let app_state = app_state.clone();
        let prometheus = prometheus.clone();
        let cors = config
            .cors_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
            .expose_headers(vec![header::CONTENT_DISPOSITION])
            .max_age(3600);

        App::new()
            .wrap(Compress::default())
            .wrap(prometheus)
            .wrap(cors)
            .app_data(app_state)
            .service(web::scope(&config.api_prefix).configure(configure_api))
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
    })
    .backlog(8192)
    .keep_alive(actix_web::http::KeepAlive::Os)
    .bind(bind_address)?
    .run()
    .await?;

    Ok(())
}
