//! Application configuration read from the environment.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::engine::EngineConfig;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} has invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_prefix: String,
    pub bind_address: String,
    pub cors_origins: Vec<String>,
    pub template_root: PathBuf,
    pub image_fetch_timeout: Duration,
    pub render_timeout: Duration,
    pub resolver_concurrency: usize,
}

impl AppConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |name: &str, default: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let mut api_prefix = text("API_PREFIX", "/api/v1");
        if !api_prefix.starts_with('/') {
            api_prefix.insert(0, '/');
        }
        let api_prefix = api_prefix.trim_end_matches('/').to_string();

        let cors_origins = text("BACKEND_CORS_ORIGINS", "")
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        let resolver_concurrency: usize = number(&lookup, "RESOLVER_CONCURRENCY", 4)?;
        if resolver_concurrency == 0 {
            return Err(ConfigError::Invalid {
                name: "RESOLVER_CONCURRENCY",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            api_prefix,
            bind_address: text("BIND_ADDRESS", "0.0.0.0:8080"),
            cors_origins,
            template_root: PathBuf::from(text("LOCAL_STORAGE_TEMPLATE_PATH", "templates")),
            image_fetch_timeout: Duration::from_secs(number(&lookup, "IMAGE_FETCH_TIMEOUT_SECS", 10)?),
            render_timeout: Duration::from_secs(number(&lookup, "RENDER_TIMEOUT_SECS", 60)?),
            resolver_concurrency,
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            fetch_timeout: self.image_fetch_timeout,
            render_timeout: self.render_timeout,
            concurrency: self.resolver_concurrency,
        }
    }
}

fn number<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name).map(|value| value.trim().to_string()) {
        None => Ok(default),
        Some(value) if value.is_empty() => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
    }
}
