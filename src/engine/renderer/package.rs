//! Docx package access: the zip container, part relationships and the
//! content type registry.

use std::io::{Cursor, Read, Write};

use lazy_static::lazy_static;
use regex::Regex;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::engine::EngineError;

pub const MAIN_PART: &str = "word/document.xml";
pub const CONTENT_TYPES: &str = "[Content_Types].xml";
pub const IMAGE_RELATIONSHIP: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";
const RELATIONSHIPS_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
/// Upper bound on the decompressed size of a single package entry.
const MAX_ENTRY_BYTES: u64 = 256 * 1024 * 1024;

lazy_static! {
    /// Parts that carry template text.
    static ref TEMPLATED_PART: Regex =
        Regex::new(r"^word/(?:document|header\d*|footer\d*|footnotes|endnotes)\.xml$").unwrap();
    static ref EMPTY_RELATIONSHIPS: Regex = Regex::new(r"<Relationships([^>]*)/>").unwrap();
    static ref EMPTY_TYPES: Regex = Regex::new(r"<Types([^>]*)/>").unwrap();
}

struct Entry {
    name: String,
    data: Vec<u8>,
    is_dir: bool,
}

/// An in-memory docx package. Entry order is kept as read so rewritten
/// packages differ from the template only where content changed.
pub struct Package {
    entries: Vec<Entry>,
}

impl Package {
    pub fn read(bytes: &[u8]) -> Result<Self, EngineError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| {
            EngineError::TemplateSyntax(format!("template is not a docx package: {e}"))
        })?;

        let mut entries = Vec::with_capacity(archive.len());
        for idx in 0..archive.len() {
            let mut file = archive.by_index(idx).map_err(|e| {
                EngineError::TemplateSyntax(format!("unreadable package entry {idx}: {e}"))
            })?;
            let name = file.name().to_string();
            let is_dir = file.is_dir();
            let data = read_entry(&mut file, MAX_ENTRY_BYTES).map_err(|e| {
                EngineError::TemplateSyntax(format!("unreadable package entry '{name}': {e}"))
            })?;
            entries.push(Entry { name, data, is_dir });
        }

        let package = Self { entries };
        for required in [MAIN_PART, CONTENT_TYPES] {
            if package.get(required).is_none() {
                return Err(EngineError::TemplateSyntax(format!(
                    "docx package has no '{required}'"
                )));
            }
        }
        Ok(package)
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|entry| entry.name == name && !entry.is_dir)
            .map(|entry| entry.data.as_slice())
    }

    /// Part content as UTF-8 text.
    pub fn text(&self, name: &str) -> Result<Option<String>, EngineError> {
        self.get(name)
            .map(|data| {
                String::from_utf8(data.to_vec()).map_err(|_| {
                    EngineError::TemplateSyntax(format!("part '{name}' is not UTF-8 text"))
                })
            })
            .transpose()
    }

    /// Replace a part's content, appending it when absent.
    pub fn put(&mut self, name: &str, data: Vec<u8>) {
        match self.entries.iter_mut().find(|entry| entry.name == name) {
            Some(entry) => entry.data = data,
            None => self.entries.push(Entry {
                name: name.to_string(),
                data,
                is_dir: false,
            }),
        }
    }

    /// Names of the parts substitution runs over, in package order.
    pub fn templated_parts(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| !entry.is_dir && TEMPLATED_PART.is_match(&entry.name))
            .map(|entry| entry.name.clone())
            .collect()
    }

    /// Register an image relationship from `part` to `target` (relative to
    /// the part's folder) under `id`, creating the relationships part if needed.
    pub fn add_relationship(&mut self, part: &str, id: &str, target: &str) -> Result<(), EngineError> {
        let rels_name = relationships_part(part);
        let relationship =
            format!(r#"<Relationship Id="{id}" Type="{IMAGE_RELATIONSHIP}" Target="{target}"/>"#);

        let rels = match self.text(&rels_name).map_err(assembly)? {
            Some(existing) => {
                if existing.contains(&format!(r#"Id="{id}""#)) {
                    return Ok(());
                }
                insert_before_close(&existing, "</Relationships>", &EMPTY_RELATIONSHIPS, "Relationships", &relationship)
                    .ok_or_else(|| {
                        EngineError::RenderAssembly(format!("'{rels_name}' has no Relationships root"))
                    })?
            }
            None => format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="{RELATIONSHIPS_NS}">{relationship}</Relationships>"#
            ),
        };
        self.put(&rels_name, rels.into_bytes());
        Ok(())
    }

    /// Make sure files with `extension` have a content type.
    pub fn ensure_default_content_type(
        &mut self,
        extension: &str,
        content_type: &str,
    ) -> Result<(), EngineError> {
        let types = self
            .text(CONTENT_TYPES)
            .map_err(assembly)?
            .ok_or_else(|| EngineError::RenderAssembly(format!("package has no '{CONTENT_TYPES}'")))?;

        let declared = Regex::new(&format!(
            r#"(?i)<Default\s[^>]*Extension="{}""#,
            regex::escape(extension)
        ))
        .map_err(|e| EngineError::RenderAssembly(e.to_string()))?;
        if declared.is_match(&types) {
            return Ok(());
        }

        let default = format!(r#"<Default Extension="{extension}" ContentType="{content_type}"/>"#);
        let updated = insert_before_close(&types, "</Types>", &EMPTY_TYPES, "Types", &default)
            .ok_or_else(|| EngineError::RenderAssembly(format!("'{CONTENT_TYPES}' has no Types root")))?;
        self.put(CONTENT_TYPES, updated.into_bytes());
        Ok(())
    }

    /// Serialize the package. Timestamps are fixed so equal input gives
    /// equal bytes.
    pub fn write(&self) -> Result<Vec<u8>, EngineError> {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(DateTime::default());

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for entry in &self.entries {
            if entry.is_dir {
                writer.add_directory(entry.name.as_str(), options).map_err(zip_error)?;
                continue;
            }
            writer.start_file(entry.name.as_str(), options).map_err(zip_error)?;
            writer
                .write_all(&entry.data)
                .map_err(|e| EngineError::RenderAssembly(format!("writing '{}': {e}", entry.name)))?;
        }
        let cursor = writer.finish().map_err(zip_error)?;
        Ok(cursor.into_inner())
    }
}

/// `word/document.xml` -> `word/_rels/document.xml.rels`
pub fn relationships_part(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((folder, file)) => format!("{folder}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

fn insert_before_close(
    xml: &str,
    close: &str,
    empty_root: &Regex,
    root: &str,
    fragment: &str,
) -> Option<String> {
    if let Some(pos) = xml.rfind(close) {
        let mut out = xml.to_string();
        out.insert_str(pos, fragment);
        return Some(out);
    }
    let caps = empty_root.captures(xml)?;
    let whole = caps.get(0)?;
    let attrs = caps.get(1).map_or("", |m| m.as_str());
    Some(format!(
        "{}<{root}{attrs}>{fragment}</{root}>{}",
        &xml[..whole.start()],
        &xml[whole.end()..]
    ))
}

fn zip_error(e: zip::result::ZipError) -> EngineError {
    EngineError::RenderAssembly(format!("zip error: {e}"))
}

fn assembly(e: EngineError) -> EngineError {
    match e {
        EngineError::TemplateSyntax(message) => EngineError::RenderAssembly(message),
        other => other,
    }
}

/// Read an entry without trusting its declared size, failing past `limit` bytes.
fn read_entry(reader: &mut impl Read, limit: u64) -> std::io::Result<Vec<u8>> {
    let mut data = Vec::new();
    reader.take(limit + 1).read_to_end(&mut data)?;
    if data.len() as u64 > limit {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("entry exceeds {limit} bytes"),
        ));
    }
    Ok(data)
}
