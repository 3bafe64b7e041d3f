//! Object embedding: swaps placement markers left by substitution for inline
//! drawings and equations, and stores image bytes in the package.

use std::collections::HashSet;

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use super::package::Package;
use crate::engine::context::RenderContext;
use crate::engine::value::{EmbeddedObject, ObjectKind, PlacementToken};
use crate::engine::EngineError;

lazy_static! {
    static ref DOC_PR_ID: Regex = Regex::new(r#"<wp:docPr\s[^>]*\bid="(\d+)""#).unwrap();
}

const WP_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing";
const A_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
const PIC_NS: &str = "http://schemas.openxmlformats.org/drawingml/2006/picture";
const R_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// Where a marker sits in the part's markup.
#[derive(Debug, PartialEq, Eq)]
enum Placement {
    /// Inside the text of a run; `run_start` is the opening `<w:r`.
    Text { run_start: usize },
    /// Directly inside a paragraph.
    Paragraph,
    /// At block level, e.g. after a `{{p ... }}` took over its paragraph.
    Block,
}

/// Embeds objects across all parts of one package.
pub struct Embedder<'a> {
    context: &'a RenderContext,
    next_drawing_id: u32,
    stored_media: HashSet<PlacementToken>,
    placed: usize,
}

impl<'a> Embedder<'a> {
    /// `parts` are the rendered part texts; drawing ids continue after the
    /// highest one already present.
    pub fn new<'p>(context: &'a RenderContext, parts: impl IntoIterator<Item = &'p str>) -> Self {
        let max_id = parts
            .into_iter()
            .flat_map(|xml| DOC_PR_ID.captures_iter(xml))
            .filter_map(|caps| caps[1].parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        Self {
            context,
            next_drawing_id: max_id + 1,
            stored_media: HashSet::new(),
            placed: 0,
        }
    }

    /// Number of markers replaced so far.
    pub fn placed(&self) -> usize {
        self.placed
    }

    /// Replace every marker in `xml`, the rendered text of `part`.
    pub fn embed_part(
        &mut self,
        package: &mut Package,
        part: &str,
        xml: &str,
    ) -> Result<String, EngineError> {
        let prefix = PlacementToken::marker_prefix();
        let mut out = xml.to_string();
        let mut cursor = 0;

        while let Some(offset) = out[cursor..].find(&prefix) {
            let pos = cursor + offset;
            let (token, len) = PlacementToken::parse_marker(&out[pos..]).ok_or_else(|| {
                EngineError::RenderAssembly(format!("damaged object marker in '{part}'"))
            })?;
            let object = self.context.object(token).ok_or_else(|| {
                EngineError::RenderAssembly(format!("no object for token {token} in '{part}'"))
            })?;

            let content = self.object_markup(package, part, object)?;
            let replacement = match placement(&out[..pos]) {
                Placement::Text { run_start } => {
                    let props = run_properties(&out[run_start..pos]);
                    format!(
                        r#"</w:t></w:r>{content}<w:r>{props}<w:t xml:space="preserve">"#
                    )
                }
                Placement::Paragraph => content,
                Placement::Block => format!("<w:p>{content}</w:p>"),
            };

            out.replace_range(pos..pos + len, &replacement);
            cursor = pos + replacement.len();
            self.placed += 1;
        }

        Ok(out)
    }

    fn object_markup(
        &mut self,
        package: &mut Package,
        part: &str,
        object: &EmbeddedObject,
    ) -> Result<String, EngineError> {
        match object.kind {
            ObjectKind::Formula => String::from_utf8(object.content.clone()).map_err(|_| {
                EngineError::RenderAssembly(format!("equation {} is not UTF-8", object.token))
            }),
            ObjectKind::Image => {
                let relationship = self.store_image(package, part, object)?;
                let extent = object.extent.ok_or_else(|| {
                    EngineError::RenderAssembly(format!("image {} has no extent", object.token))
                })?;
                let id = self.next_drawing_id;
                self.next_drawing_id += 1;
                Ok(drawing(id, &relationship, &media_name(object), extent.cx, extent.cy))
            }
        }
    }

    /// Store the image once per package and link it from `part`.
    fn store_image(
        &mut self,
        package: &mut Package,
        part: &str,
        object: &EmbeddedObject,
    ) -> Result<String, EngineError> {
        let name = media_name(object);
        if self.stored_media.insert(object.token) {
            debug!("Storing {} ({} bytes)", name, object.content.len());
            package.put(&format!("word/media/{name}"), object.content.clone());
            package.ensure_default_content_type(object.format.extension(), object.format.content_type())?;
        }

        let id = format!("rIdDg{}", object.token);
        package.add_relationship(part, &id, &format!("media/{name}"))?;
        Ok(id)
    }
}

fn media_name(object: &EmbeddedObject) -> String {
    format!("docgen{}.{}", object.token, object.format.extension())
}

/// Last position of an opening `<w:{name}>` or `<w:{name} ...>` tag.
fn last_open(xml: &str, name: &str) -> Option<usize> {
    let bare = format!("<w:{name}>");
    let spaced = format!("<w:{name} ");
    xml.rfind(&bare).into_iter().chain(xml.rfind(&spaced)).max()
}

fn is_open(xml: &str, name: &str) -> Option<usize> {
    let start = last_open(xml, name)?;
    let closed = xml.rfind(&format!("</w:{name}>"));
    match closed {
        Some(end) if end > start => None,
        _ => Some(start),
    }
}

fn placement(before: &str) -> Placement {
    if is_open(before, "t").is_some() {
        if let Some(run_start) = is_open(before, "r") {
            return Placement::Text { run_start };
        }
    }
    if is_open(before, "p").is_some() {
        Placement::Paragraph
    } else {
        Placement::Block
    }
}

/// The `<w:rPr>` of the run starting `run`, if any.
fn run_properties(run: &str) -> &str {
    let Some(start) = run.find("<w:rPr") else {
        return "";
    };
    if run[start..].starts_with("<w:rPr/>") {
        return "";
    }
    match run[start..].find("</w:rPr>") {
        Some(end) => &run[start..start + end + "</w:rPr>".len()],
        None => "",
    }
}

fn drawing(id: u32, relationship: &str, name: &str, cx: i64, cy: i64) -> String {
    format!(
        concat!(
            r#"<w:r><w:drawing><wp:inline distT="0" distB="0" distL="0" distR="0" xmlns:wp="{wp}">"#,
            r#"<wp:extent cx="{cx}" cy="{cy}"/>"#,
            r#"<wp:docPr id="{id}" name="Picture {id}"/>"#,
            r#"<wp:cNvGraphicFramePr><a:graphicFrameLocks xmlns:a="{a}" noChangeAspect="1"/></wp:cNvGraphicFramePr>"#,
            r#"<a:graphic xmlns:a="{a}"><a:graphicData uri="{pic}">"#,
            r#"<pic:pic xmlns:pic="{pic}">"#,
            r#"<pic:nvPicPr><pic:cNvPr id="0" name="{name}"/><pic:cNvPicPr/></pic:nvPicPr>"#,
            r#"<pic:blipFill><a:blip xmlns:r="{r}" r:embed="{rel}"/><a:stretch><a:fillRect/></a:stretch></pic:blipFill>"#,
            r#"<pic:spPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="{cx}" cy="{cy}"/></a:xfrm>"#,
            r#"<a:prstGeom prst="rect"><a:avLst/></a:prstGeom></pic:spPr>"#,
            r#"</pic:pic></a:graphicData></a:graphic></wp:inline></w:drawing></w:r>"#
        ),
        wp = WP_NS,
        a = A_NS,
        pic = PIC_NS,
        r = R_NS,
        rel = relationship,
        name = name,
        id = id,
        cx = cx,
        cy = cy,
    )
}
