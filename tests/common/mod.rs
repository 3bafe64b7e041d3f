#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use document_generator::engine::{AssetFetcher, DocumentEngine, EngineConfig, ResolveError};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

pub const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/><Override PartName="/word/document.xml" ContentType="application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml"/></Types>"#;

/// Minimal `.docx` whose body is `body`, plus any extra parts.
pub fn docx_with_parts(body: &str, extra: &[(&str, String)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    writer.start_file("[Content_Types].xml", options).unwrap();
    writer.write_all(CONTENT_TYPES_XML.as_bytes()).unwrap();

    writer.start_file("word/document.xml", options).unwrap();
    let document = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="{W_NS}"><w:body>{body}</w:body></w:document>"#
    );
    writer.write_all(document.as_bytes()).unwrap();

    for (name, content) in extra {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn docx(body: &str) -> Vec<u8> {
    docx_with_parts(body, &[])
}

pub fn paragraph(text: &str) -> String {
    format!("<w:p><w:r><w:t>{text}</w:t></w:r></w:p>")
}

pub fn row(text: &str) -> String {
    format!("<w:tr><w:tc><w:p><w:r><w:t>{text}</w:t></w:r></w:p></w:tc></w:tr>")
}

pub fn entry_names(bytes: &[u8]) -> Vec<String> {
    let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    archive.file_names().map(str::to_string).collect()
}

pub fn entry(bytes: &[u8], name: &str) -> Option<Vec<u8>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut file = archive.by_name(name).ok()?;
    let mut data = Vec::new();
    file.read_to_end(&mut data).unwrap();
    Some(data)
}

pub fn part_text(bytes: &[u8], name: &str) -> String {
    String::from_utf8(entry(bytes, name).unwrap_or_else(|| panic!("missing part {name}"))).unwrap()
}

pub fn document_xml(bytes: &[u8]) -> String {
    part_text(bytes, "word/document.xml")
}

/// Grayscale PNG of the given size.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, width, height);
        encoder.set_color(png::ColorType::Grayscale);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().unwrap();
        writer
            .write_image_data(&vec![0x80; (width * height) as usize])
            .unwrap();
    }
    out
}

/// In-memory fetcher keyed by source string.
#[derive(Default)]
pub struct MemoryFetcher {
    assets: HashMap<String, Vec<u8>>,
    pub calls: AtomicUsize,
}

impl MemoryFetcher {
    pub fn with(mut self, source: &str, content: Vec<u8>) -> Self {
        self.assets.insert(source.to_string(), content);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetFetcher for MemoryFetcher {
    async fn fetch(&self, source: &str) -> Result<Vec<u8>, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.assets
            .get(source)
            .cloned()
            .ok_or_else(|| ResolveError::AssetFetch {
                location: source.to_string(),
                reason: "404 Not Found".to_string(),
            })
    }
}

pub fn engine(fetcher: Arc<MemoryFetcher>) -> DocumentEngine {
    DocumentEngine::with_fetcher(EngineConfig::default(), fetcher)
}
