use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

lazy_static! {
    static ref VERSION_PATTERN: Regex = Regex::new(r"^v(\d+)\.(\d+)\.(\d+)$").unwrap();
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid version tag '{0}', expected vMAJOR.MINOR.PATCH")]
pub struct InvalidVersionTag(pub String);

/// Semantic version tag such as `v1.12.3`. Ordered by major, minor, patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionTag {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl VersionTag {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self { major, minor, patch }
    }
}

impl FromStr for VersionTag {
    type Err = InvalidVersionTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidVersionTag(s.to_string());
        let caps = VERSION_PATTERN.captures(s).ok_or_else(invalid)?;
        let part = |i: usize| caps[i].parse::<u64>().map_err(|_| invalid());
        Ok(Self::new(part(1)?, part(2)?, part(3)?))
    }
}

impl TryFrom<String> for VersionTag {
    type Error = InvalidVersionTag;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VersionTag> for String {
    fn from(tag: VersionTag) -> Self {
        tag.to_string()
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Template metadata, stored as `<root>/<id>/meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TemplateMeta {
    pub id: Uuid,
    #[schema(example = "Report document template")]
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Newest first.
    #[serde(default)]
    #[schema(value_type = Vec<String>, example = json!(["v1.1.0", "v1.0.0"]))]
    pub versions: Vec<VersionTag>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TemplateMeta {
    pub fn new(request: CreateTemplateRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: request.title,
            description: request.description,
            labels: request.labels,
            versions: Vec::new(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn latest(&self) -> Option<VersionTag> {
        self.versions.iter().max().copied()
    }

    pub fn has_version(&self, tag: &VersionTag) -> bool {
        self.versions.contains(tag)
    }

    /// Record a new version, keeping the list newest first.
    pub fn add_version(&mut self, tag: VersionTag) {
        if !self.has_version(&tag) {
            self.versions.push(tag);
            self.versions.sort_by(|a, b| b.cmp(a));
        }
        self.updated_at = Some(Utc::now());
    }

    /// Restore the newest-first order after reading from disk.
    pub fn normalize(&mut self) {
        self.versions.sort_by(|a, b| b.cmp(a));
        self.versions.dedup();
    }
}

/// Version metadata, stored as `<root>/<id>/versions/<tag>/meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct VersionMeta {
    #[schema(value_type = String, example = "v1.0.0")]
    pub tag: VersionTag,
    #[schema(example = "Changed main table layout")]
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateTemplateRequest {
    #[schema(example = "Report document template")]
    pub title: String,
    #[schema(example = "Template for generating report documents.")]
    pub description: String,
    #[serde(default)]
    #[schema(example = json!(["finance", "report"]))]
    pub labels: Vec<String>,
}

/// Files and metadata for a new template version.
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub tag: VersionTag,
    pub message: String,
    pub docx: Vec<u8>,
    pub example: Vec<u8>,
}
