//! Document generation engine.
//!
//! Turns a `.docx` template plus a request mapping into a finished document:
//! - `classifier` - key prefix dispatch (`IMG|`, `MATH|`, `QR|`)
//! - `resolvers` - image fetch, LaTeX to OMML, QR rasterization
//! - `normalizer` - recursive resolution of the request tree
//! - `context` - substitution mapping plus the embedded object arena
//! - `renderer` - Jinja substitution and package embedding
//! - `xml` - element tree and well-formedness checks

pub mod classifier;
pub mod context;
pub mod normalizer;
pub mod renderer;
pub mod resolvers;
pub mod traits;
pub mod value;
pub mod xml;

pub use context::RenderContext;
pub use resolvers::image::HttpAssetFetcher;
pub use traits::{AssetFetcher, Validator};
pub use value::{EmbeddedObject, RenderRequest, ResolvedValue};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};
use thiserror::Error;

/// MIME type of every generated document.
pub const DOCX_MIME_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Failures of a single binary resolver.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to fetch '{location}': {reason}")]
    AssetFetch { location: String, reason: String },
    #[error("unsupported image format: {0}")]
    UnsupportedImageFormat(String),
    #[error("formula syntax error at offset {offset}: {message}")]
    FormulaSyntax { offset: usize, message: String },
    #[error("cannot encode {len} bytes as a QR symbol: {reason}")]
    QrEncoding { len: usize, reason: String },
    #[error("failed to encode raster: {0}")]
    Raster(String),
}

/// Errors that can occur during document generation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown payload shape at '{key}': {reason}")]
    UnknownPayloadShape { key: String, reason: String },
    #[error("variable '{name}' is bound twice at '{path}'")]
    DuplicateVariable { path: String, name: String },
    #[error("failed to resolve '{key}': {source}")]
    Resolution {
        key: String,
        #[source]
        source: ResolveError,
    },
    #[error("template syntax error: {0}")]
    TemplateSyntax(String),
    #[error("template references unbound variable '{name}'")]
    UnboundVariable { name: String },
    #[error("value does not fit the template construct: {0}")]
    StructuralMismatch(String),
    #[error("failed to assemble document package: {0}")]
    RenderAssembly(String),
    #[error("render did not finish within {0:?}")]
    RenderTimeout(Duration),
}

/// Coarse failure class, used for logging and transport status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Asset,
    Syntax,
    Binding,
    Assembly,
    NotFound,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Asset => "asset",
            ErrorCategory::Syntax => "syntax",
            ErrorCategory::Binding => "binding",
            ErrorCategory::Assembly => "assembly",
            ErrorCategory::NotFound => "not_found",
        }
    }
}

impl ResolveError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ResolveError::FormulaSyntax { .. } => ErrorCategory::Syntax,
            _ => ErrorCategory::Asset,
        }
    }
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::UnknownPayloadShape { .. } | EngineError::DuplicateVariable { .. } => {
                ErrorCategory::Validation
            }
            EngineError::Resolution { source, .. } => source.category(),
            EngineError::TemplateSyntax(_) => ErrorCategory::Syntax,
            EngineError::UnboundVariable { .. } | EngineError::StructuralMismatch(_) => {
                ErrorCategory::Binding
            }
            EngineError::RenderAssembly(_) | EngineError::RenderTimeout(_) => {
                ErrorCategory::Assembly
            }
        }
    }
}

/// Tunables the engine needs. Derived from `AppConfig` at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub fetch_timeout: Duration,
    pub render_timeout: Duration,
    /// Upper bound on resolver tasks in flight within one call.
    pub concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            render_timeout: Duration::from_secs(60),
            concurrency: 4,
        }
    }
}

/// Result of a successful document generation.
#[derive(Debug)]
pub struct GeneratedDocument {
    pub bytes: Vec<u8>,
    pub embedded_objects: usize,
}

/// Stateless between calls; safe to share behind `web::Data`.
#[derive(Clone)]
pub struct DocumentEngine {
    config: EngineConfig,
    fetcher: Arc<dyn AssetFetcher>,
}

impl DocumentEngine {
    /// Engine fetching images over HTTP with the given client.
    pub fn new(config: EngineConfig, http_client: reqwest::Client) -> Self {
        let fetcher = Arc::new(HttpAssetFetcher::new(http_client, config.fetch_timeout));
        Self { config, fetcher }
    }

    pub fn with_fetcher(config: EngineConfig, fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self { config, fetcher }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Render `template` with `request`.
    ///
    /// The whole call is bounded by `render_timeout`. Any resolver failure aborts
    /// before the template is touched; no partial document is ever returned.
    pub async fn generate(
        &self,
        template: Vec<u8>,
        request: RenderRequest,
    ) -> Result<GeneratedDocument, EngineError> {
        let started = Instant::now();
        info!(
            "Rendering template ({} bytes) with keys [{}]",
            template.len(),
            request.keys().collect::<Vec<_>>().join(", ")
        );

        let limit = self.config.render_timeout;
        let document = tokio::time::timeout(limit, self.run(template, request))
            .await
            .map_err(|_| EngineError::RenderTimeout(limit))??;

        debug!(
            "Rendered {} bytes with {} embedded objects in {:?}",
            document.bytes.len(),
            document.embedded_objects,
            started.elapsed()
        );
        Ok(document)
    }

    async fn run(
        &self,
        template: Vec<u8>,
        request: RenderRequest,
    ) -> Result<GeneratedDocument, EngineError> {
        let resolved =
            normalizer::normalize(&request, self.fetcher.as_ref(), self.config.concurrency)
                .await?;
        let context = RenderContext::build(resolved)?;
        let embedded_objects = context.objects().len();

        // Set when this future is dropped, e.g. by the render timeout, so the
        // blocking worker stops at the next part boundary.
        let cancel = CancelOnDrop::default();
        let cancelled = cancel.flag();
        let bytes = tokio::task::spawn_blocking(move || {
            renderer::render_cancellable(&template, &context, &cancelled)
        })
        .await
        .map_err(|e| EngineError::RenderAssembly(format!("render worker failed: {e}")))??;

        Ok(GeneratedDocument {
            bytes,
            embedded_objects,
        })
    }
}

#[derive(Default)]
struct CancelOnDrop(Arc<AtomicBool>);

impl CancelOnDrop {
    fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let shape = EngineError::UnknownPayloadShape {
            key: "IMG|X".into(),
            reason: "bad".into(),
        };
        assert_eq!(shape.category(), ErrorCategory::Validation);

        let formula = EngineError::Resolution {
            key: "MATH|EQ".into(),
            source: ResolveError::FormulaSyntax {
                offset: 0,
                message: "x".into(),
            },
        };
        assert_eq!(formula.category(), ErrorCategory::Syntax);

        let qr = EngineError::Resolution {
            key: "QR|X".into(),
            source: ResolveError::QrEncoding {
                len: 9000,
                reason: "data too long".into(),
            },
        };
        assert_eq!(qr.category(), ErrorCategory::Asset);

        assert_eq!(
            EngineError::UnboundVariable { name: "A".into() }.category(),
            ErrorCategory::Binding
        );
        assert_eq!(
            EngineError::RenderTimeout(Duration::from_secs(1)).category(),
            ErrorCategory::Assembly
        );
    }

    #[test]
    fn test_resolution_error_names_key_path() {
        let err = EngineError::Resolution {
            key: "ROWS[1].IMG|PHOTO".into(),
            source: ResolveError::AssetFetch {
                location: "http://x".into(),
                reason: "timeout".into(),
            },
        };
        assert!(err.to_string().contains("ROWS[1].IMG|PHOTO"));
    }

    #[test]
    fn test_dropping_guard_raises_cancel_flag() {
        let guard = CancelOnDrop::default();
        let flag = guard.flag();
        assert!(!flag.load(Ordering::Relaxed));

        drop(guard);

        assert!(flag.load(Ordering::Relaxed));
    }
}
