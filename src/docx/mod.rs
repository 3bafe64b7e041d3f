//! `.docx` generation endpoints.

pub mod handlers;

use actix_web::HttpResponse;
use log::error;

use crate::engine::{EngineError, ErrorCategory};
use crate::ErrorResponse;

/// Map an engine failure to its HTTP response.
pub fn engine_error_response(e: &EngineError) -> HttpResponse {
    let message = e.to_string();
    if let EngineError::RenderTimeout(_) = e {
        error!("Render timed out: {}", message);
        return HttpResponse::GatewayTimeout().json(ErrorResponse::new("Timeout", &message));
    }

    match e.category() {
        ErrorCategory::Assembly => {
            error!("Document assembly failed: {}", message);
            HttpResponse::InternalServerError().json(ErrorResponse::internal_error(&message))
        }
        category => {
            let kind = match category {
                ErrorCategory::Validation => "ValidationError",
                ErrorCategory::Asset => "AssetError",
                ErrorCategory::Syntax => "SyntaxError",
                _ => "BindingError",
            };
            error!("Document generation rejected ({}): {}", category.as_str(), message);
            HttpResponse::BadRequest().json(ErrorResponse::new(kind, &message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (EngineError::TemplateSyntax("x".into()), StatusCode::BAD_REQUEST),
            (
                EngineError::UnboundVariable { name: "X".into() },
                StatusCode::BAD_REQUEST,
            ),
            (EngineError::RenderAssembly("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (EngineError::RenderTimeout(Duration::from_secs(1)), StatusCode::GATEWAY_TIMEOUT),
        ];
        for (error, status) in cases {
            assert_eq!(engine_error_response(&error).status(), status, "{error}");
        }
    }
}
