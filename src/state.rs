use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::engine::DocumentEngine;
use crate::template::{LocalTemplateStore, TemplateStore};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn TemplateStore>,
    pub engine: DocumentEngine,
}

impl AppState {
    /// Open the local template store and build the engine with a shared
    /// HTTP client.
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let store = LocalTemplateStore::open(config.template_root.clone()).await?;

        let http_client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(900))
            .user_agent(concat!("document-generator/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let engine = DocumentEngine::new(config.engine_config(), http_client);

        Ok(Self::with_parts(config, Arc::new(store), engine))
    }

    pub fn with_parts(
        config: AppConfig,
        store: Arc<dyn TemplateStore>,
        engine: DocumentEngine,
    ) -> Self {
        Self {
            config,
            store,
            engine,
        }
    }
}
