//! Template storage on the local filesystem.
//!
//! ```text
//! <root>/<id>/meta.json
//! <root>/<id>/versions/<tag>/meta.json
//! <root>/<id>/versions/<tag>/template.docx
//! <root>/<id>/versions/<tag>/template.json
//! ```

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use moka::future::Cache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::model::{CreateTemplateRequest, InvalidVersionTag, NewVersion, TemplateMeta, VersionMeta, VersionTag};

const META_FILE: &str = "meta.json";
const VERSIONS_DIR: &str = "versions";
const TEMPLATE_FILE: &str = "template.docx";
const EXAMPLE_FILE: &str = "template.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("template {0} was not found")]
    TemplateNotFound(Uuid),
    #[error("template {id} has no version {tag}")]
    VersionNotFound { id: Uuid, tag: VersionTag },
    #[error("template {0} has no versions yet")]
    NoVersions(Uuid),
    #[error("version {tag} already exists for template {id}")]
    DuplicateVersion { id: Uuid, tag: VersionTag },
    #[error(transparent)]
    InvalidTag(#[from] InvalidVersionTag),
    #[error("invalid template: {0}")]
    InvalidTemplate(String),
    #[error("corrupt metadata at {path}: {reason}")]
    CorruptMetadata { path: PathBuf, reason: String },
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// All templates, oldest first.
    async fn list(&self) -> Result<Vec<TemplateMeta>, StoreError>;
    async fn get(&self, id: Uuid) -> Result<TemplateMeta, StoreError>;
    async fn create(&self, request: CreateTemplateRequest) -> Result<TemplateMeta, StoreError>;
    async fn add_version(&self, id: Uuid, version: NewVersion) -> Result<VersionMeta, StoreError>;
    /// Version metadata, newest first.
    async fn versions(&self, id: Uuid) -> Result<Vec<VersionMeta>, StoreError>;
    async fn version(&self, id: Uuid, tag: VersionTag) -> Result<VersionMeta, StoreError>;
    /// Template bytes for `tag`, or for the latest version when `tag` is `None`.
    async fn load_template(
        &self,
        id: Uuid,
        tag: Option<VersionTag>,
    ) -> Result<(VersionTag, Vec<u8>), StoreError>;
    /// The example request body stored with a version.
    async fn load_example(&self, id: Uuid, tag: VersionTag) -> Result<Map<String, Value>, StoreError>;
}

pub struct LocalTemplateStore {
    root: PathBuf,
    cache: Cache<Uuid, TemplateMeta>,
    write_lock: Mutex<()>,
}

impl LocalTemplateStore {
    /// Open the store at `root`, creating it if needed, and warm the cache.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(10 * 60))
            .max_capacity(1000)
            .build();
        let store = Self {
            root,
            cache,
            write_lock: Mutex::new(()),
        };

        let ids = store.template_ids().await?;
        for id in &ids {
            match store.read_template_meta(*id).await {
                Ok(meta) => store.cache.insert(*id, meta).await,
                Err(e) => warn!("Skipping template {}: {}", id, e),
            }
        }
        info!("Template store at {} holds {} templates", store.root.display(), ids.len());
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn template_dir(&self, id: Uuid) -> PathBuf {
        self.root.join(id.to_string())
    }

    fn version_dir(&self, id: Uuid, tag: VersionTag) -> PathBuf {
        self.template_dir(id).join(VERSIONS_DIR).join(tag.to_string())
    }

    async fn template_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            match name.to_str().and_then(|s| Uuid::parse_str(s).ok()) {
                Some(id) => ids.push(id),
                None => debug!("Ignoring non-template directory {:?}", name),
            }
        }
        Ok(ids)
    }

    async fn read_template_meta(&self, id: Uuid) -> Result<TemplateMeta, StoreError> {
        let path = self.template_dir(id).join(META_FILE);
        let mut meta: TemplateMeta = read_json(&path)
            .await?
            .ok_or(StoreError::TemplateNotFound(id))?;
        meta.normalize();
        Ok(meta)
    }

    async fn write_template_meta(&self, meta: &TemplateMeta) -> Result<(), StoreError> {
        write_json(&self.template_dir(meta.id).join(META_FILE), meta).await?;
        self.cache.insert(meta.id, meta.clone()).await;
        Ok(())
    }

    async fn resolve_tag(&self, id: Uuid, tag: Option<VersionTag>) -> Result<VersionTag, StoreError> {
        let meta = self.get(id).await?;
        match tag {
            Some(tag) if meta.has_version(&tag) => Ok(tag),
            Some(tag) => Err(StoreError::VersionNotFound { id, tag }),
            None => meta.latest().ok_or(StoreError::NoVersions(id)),
        }
    }
}

#[async_trait]
impl TemplateStore for LocalTemplateStore {
    async fn list(&self) -> Result<Vec<TemplateMeta>, StoreError> {
        let mut templates = Vec::new();
        for id in self.template_ids().await? {
            match self.get(id).await {
                Ok(meta) => templates.push(meta),
                Err(e) => warn!("Skipping template {}: {}", id, e),
            }
        }
        templates.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(templates)
    }

    async fn get(&self, id: Uuid) -> Result<TemplateMeta, StoreError> {
        if let Some(meta) = self.cache.get(&id).await {
            debug!("Template {} served from cache", id);
            return Ok(meta);
        }
        let meta = self.read_template_meta(id).await?;
        self.cache.insert(id, meta.clone()).await;
        Ok(meta)
    }

    async fn create(&self, request: CreateTemplateRequest) -> Result<TemplateMeta, StoreError> {
        let meta = TemplateMeta::new(request);
        let _guard = self.write_lock.lock().await;

        fs::create_dir_all(self.template_dir(meta.id).join(VERSIONS_DIR)).await?;
        self.write_template_meta(&meta).await?;
        info!("Created template {} '{}'", meta.id, meta.title);
        Ok(meta)
    }

    async fn add_version(&self, id: Uuid, version: NewVersion) -> Result<VersionMeta, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut meta = self.read_template_meta(id).await?;
        if meta.has_version(&version.tag) {
            return Err(StoreError::DuplicateVersion { id, tag: version.tag });
        }
        check_template_package(&version.docx)?;
        check_example(&version.example)?;

        let dir = self.version_dir(id, version.tag);
        fs::create_dir_all(&dir).await?;
        fs::write(dir.join(TEMPLATE_FILE), &version.docx).await?;
        fs::write(dir.join(EXAMPLE_FILE), &version.example).await?;
        let version_meta = VersionMeta {
            tag: version.tag,
            message: version.message,
            created_at: Utc::now(),
            updated_at: None,
        };
        write_json(&dir.join(META_FILE), &version_meta).await?;

        meta.add_version(version.tag);
        self.write_template_meta(&meta).await?;
        info!("Added version {} to template {}", version.tag, id);
        Ok(version_meta)
    }

    async fn versions(&self, id: Uuid) -> Result<Vec<VersionMeta>, StoreError> {
        let meta = self.get(id).await?;
        let mut versions = Vec::with_capacity(meta.versions.len());
        for tag in &meta.versions {
            versions.push(self.version(id, *tag).await?);
        }
        Ok(versions)
    }

    async fn version(&self, id: Uuid, tag: VersionTag) -> Result<VersionMeta, StoreError> {
        let tag = self.resolve_tag(id, Some(tag)).await?;
        read_json(&self.version_dir(id, tag).join(META_FILE))
            .await?
            .ok_or(StoreError::VersionNotFound { id, tag })
    }

    async fn load_template(
        &self,
        id: Uuid,
        tag: Option<VersionTag>,
    ) -> Result<(VersionTag, Vec<u8>), StoreError> {
        let tag = self.resolve_tag(id, tag).await?;
        let path = self.version_dir(id, tag).join(TEMPLATE_FILE);
        let bytes = read_optional(&path)
            .await?
            .ok_or(StoreError::VersionNotFound { id, tag })?;
        debug!("Loaded {} ({} bytes)", path.display(), bytes.len());
        Ok((tag, bytes))
    }

    async fn load_example(&self, id: Uuid, tag: VersionTag) -> Result<Map<String, Value>, StoreError> {
        let tag = self.resolve_tag(id, Some(tag)).await?;
        let path = self.version_dir(id, tag).join(EXAMPLE_FILE);
        let bytes = read_optional(&path)
            .await?
            .ok_or(StoreError::VersionNotFound { id, tag })?;
        match serde_json::from_slice(&bytes) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(StoreError::CorruptMetadata {
                path,
                reason: "example body is not a JSON object".to_string(),
            }),
            Err(e) => Err(StoreError::CorruptMetadata {
                path,
                reason: e.to_string(),
            }),
        }
    }
}

/// A template must be a zip package with a main document part.
fn check_template_package(bytes: &[u8]) -> Result<(), StoreError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| StoreError::InvalidTemplate(format!("docx file is not a zip package: {e}")))?;
    let has_main_part = archive.by_name("word/document.xml").is_ok();
    if has_main_part {
        Ok(())
    } else {
        Err(StoreError::InvalidTemplate(
            "docx file has no word/document.xml".to_string(),
        ))
    }
}

fn check_example(bytes: &[u8]) -> Result<(), StoreError> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(_)) => Ok(()),
        Ok(_) => Err(StoreError::InvalidTemplate(
            "example body must be a JSON object".to_string(),
        )),
        Err(e) => Err(StoreError::InvalidTemplate(format!("example body is not JSON: {e}"))),
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let Some(bytes) = read_optional(path).await? else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StoreError::CorruptMetadata {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| StoreError::CorruptMetadata {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    fs::write(path, bytes).await?;
    Ok(())
}
