//! Request and resolved value trees.
//!
//! A request arrives as JSON and is converted once into [`RawValue`]. After the
//! normalizer runs, every payload leaf has been replaced by an [`EmbeddedObject`]
//! and the tree is a [`ResolvedValue`] of identical shape.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A scalar leaf. Rendered verbatim by template substitution.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

/// Request value before classification.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Scalar(Scalar),
    Sequence(Vec<RawValue>),
    /// Entries keep request order so resolution order is deterministic.
    Mapping(Vec<(String, RawValue)>),
}

impl RawValue {
    pub fn as_mapping(&self) -> Option<&[(String, RawValue)]> {
        match self {
            RawValue::Mapping(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&RawValue> {
        self.as_mapping()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            RawValue::Scalar(Scalar::Null) => "null",
            RawValue::Scalar(Scalar::Bool(_)) => "bool",
            RawValue::Scalar(Scalar::Number(_)) => "number",
            RawValue::Scalar(Scalar::Text(_)) => "string",
            RawValue::Sequence(_) => "sequence",
            RawValue::Mapping(_) => "mapping",
        }
    }
}

impl From<serde_json::Value> for RawValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => RawValue::Scalar(Scalar::Null),
            serde_json::Value::Bool(b) => RawValue::Scalar(Scalar::Bool(b)),
            serde_json::Value::Number(n) => RawValue::Scalar(Scalar::Number(n)),
            serde_json::Value::String(s) => RawValue::Scalar(Scalar::Text(s)),
            serde_json::Value::Array(items) => {
                RawValue::Sequence(items.into_iter().map(RawValue::from).collect())
            }
            serde_json::Value::Object(map) => RawValue::Mapping(
                map.into_iter()
                    .map(|(k, v)| (k, RawValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&RawValue> for serde_json::Value {
    fn from(value: &RawValue) -> Self {
        match value {
            RawValue::Scalar(Scalar::Null) => serde_json::Value::Null,
            RawValue::Scalar(Scalar::Bool(b)) => serde_json::Value::Bool(*b),
            RawValue::Scalar(Scalar::Number(n)) => serde_json::Value::Number(n.clone()),
            RawValue::Scalar(Scalar::Text(s)) => serde_json::Value::String(s.clone()),
            RawValue::Sequence(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            RawValue::Mapping(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Top-level request: variable key to value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderRequest {
    pub entries: Vec<(String, RawValue)>,
}

impl RenderRequest {
    /// Build a request from a JSON body. The body must be an object.
    pub fn from_json(body: serde_json::Value) -> Result<Self, String> {
        match RawValue::from(body) {
            RawValue::Mapping(entries) => Ok(Self { entries }),
            other => Err(format!(
                "request body must be a mapping, got {}",
                other.type_name()
            )),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

/// Payload behind an `IMG|` key.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImagePayload {
    pub source: String,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
}

/// Payload behind a `MATH|` key.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FormulaPayload {
    pub formula: String,
}

/// Payload behind a `QR|` key.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QrPayload {
    pub data: String,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
}

/// A classified binary payload awaiting resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Image(ImagePayload),
    Formula(FormulaPayload),
    Qr(QrPayload),
}

/// Size of an embedded object in English Metric Units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Extent {
    pub cx: i64,
    pub cy: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Image,
    Formula,
}

/// Concrete content format of an embedded object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    Png,
    Jpeg,
    Gif,
    Bmp,
    Tiff,
    Omml,
}

impl ContentFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ContentFormat::Png => "png",
            ContentFormat::Jpeg => "jpeg",
            ContentFormat::Gif => "gif",
            ContentFormat::Bmp => "bmp",
            ContentFormat::Tiff => "tiff",
            ContentFormat::Omml => "xml",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ContentFormat::Png => "image/png",
            ContentFormat::Jpeg => "image/jpeg",
            ContentFormat::Gif => "image/gif",
            ContentFormat::Bmp => "image/bmp",
            ContentFormat::Tiff => "image/tiff",
            ContentFormat::Omml => "application/xml",
        }
    }
}

/// Identifies where an embedded object is spliced into the package.
///
/// Tokens are handed out in pre-order traversal of the request, so the same
/// request always yields the same tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PlacementToken(pub u32);

impl PlacementToken {
    pub const OPEN: char = '\u{E000}';
    pub const CLOSE: char = '\u{E001}';

    /// Marker text emitted by substitution at the variable position.
    pub fn marker(self) -> String {
        format!("{}DGOBJ{}{}", Self::OPEN, self.0, Self::CLOSE)
    }

    /// Parse a marker produced by [`PlacementToken::marker`]. Returns the token and
    /// the marker's length in bytes.
    pub fn parse_marker(text: &str) -> Option<(Self, usize)> {
        let rest = text.strip_prefix(Self::OPEN)?.strip_prefix("DGOBJ")?;
        let end = rest.find(Self::CLOSE)?;
        let id = rest[..end].parse().ok()?;
        let len = Self::OPEN.len_utf8() + "DGOBJ".len() + end + Self::CLOSE.len_utf8();
        Some((Self(id), len))
    }

    pub fn marker_prefix() -> String {
        format!("{}DGOBJ", Self::OPEN)
    }
}

impl fmt::Display for PlacementToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Binary content ready to be spliced into the document package.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedObject {
    pub kind: ObjectKind,
    pub format: ContentFormat,
    pub content: Vec<u8>,
    /// Target size. Formulas flow with the text and carry no extent.
    pub extent: Option<Extent>,
    pub token: PlacementToken,
}

/// Renderer-ready value tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedValue {
    Scalar(Scalar),
    Sequence(Vec<ResolvedValue>),
    Mapping(BTreeMap<String, ResolvedValue>),
    Object(EmbeddedObject),
}

impl ResolvedValue {
    pub fn as_object(&self) -> Option<&EmbeddedObject> {
        match self {
            ResolvedValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&ResolvedValue> {
        match self {
            ResolvedValue::Mapping(map) => map.get(key),
            _ => None,
        }
    }
}
