//! Template store: versioned `.docx` templates with example request bodies.

pub mod handlers;
pub mod model;
pub mod multipart_parser;
pub mod payload;
pub mod store;

use actix_web::HttpResponse;
use log::error;

pub use model::{CreateTemplateRequest, NewVersion, TemplateMeta, VersionMeta, VersionTag};
pub use payload::{validate, ValidationReport};
pub use store::{LocalTemplateStore, StoreError, TemplateStore};

use crate::engine::ErrorCategory;
use crate::ErrorResponse;

impl StoreError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            StoreError::TemplateNotFound(_)
            | StoreError::VersionNotFound { .. }
            | StoreError::NoVersions(_) => ErrorCategory::NotFound,
            StoreError::DuplicateVersion { .. }
            | StoreError::InvalidTag(_)
            | StoreError::InvalidTemplate(_) => ErrorCategory::Validation,
            StoreError::CorruptMetadata { .. } | StoreError::Io(_) => ErrorCategory::Assembly,
        }
    }

    pub fn to_response(&self) -> HttpResponse {
        let message = self.to_string();
        if let StoreError::DuplicateVersion { .. } = self {
            return HttpResponse::Conflict().json(ErrorResponse::new("Conflict", &message));
        }
        match self.category() {
            ErrorCategory::NotFound => {
                HttpResponse::NotFound().json(ErrorResponse::not_found(&message))
            }
            ErrorCategory::Validation => {
                HttpResponse::BadRequest().json(ErrorResponse::bad_request(&message))
            }
            _ => {
                error!("Template store failure: {}", message);
                HttpResponse::InternalServerError().json(ErrorResponse::internal_error(&message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use uuid::Uuid;

    #[test]
    fn test_store_errors_map_to_categories_and_status() {
        let id = Uuid::new_v4();
        let cases = [
            (StoreError::TemplateNotFound(id), ErrorCategory::NotFound, StatusCode::NOT_FOUND),
            (StoreError::NoVersions(id), ErrorCategory::NotFound, StatusCode::NOT_FOUND),
            (
                StoreError::InvalidTemplate("not a zip".into()),
                ErrorCategory::Validation,
                StatusCode::BAD_REQUEST,
            ),
            (
                StoreError::Io(std::io::Error::other("disk")),
                ErrorCategory::Assembly,
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, category, status) in cases {
            assert_eq!(error.category(), category, "{error}");
            assert_eq!(error.to_response().status(), status, "{error}");
        }
    }
}
