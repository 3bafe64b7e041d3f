//! Traits at the seams of the generation engine.

use async_trait::async_trait;

use super::ResolveError;

/// Validation of a classified payload beyond its structural shape.
pub trait Validator {
    /// Validate the state of the object.
    fn validate(&self) -> Result<(), String>;
}

/// Retrieves the raw bytes behind an image source reference.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, source: &str) -> Result<Vec<u8>, ResolveError>;
}
