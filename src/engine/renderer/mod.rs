//! Template renderer.
//!
//! Phase one compiles every templated part with minijinja and substitutes the
//! context, expanding repeated blocks. Phase two runs on the expanded text and
//! swaps object markers for drawings and equations, so object counts follow
//! the expansion.

mod embed;
mod package;
mod preprocess;

use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use minijinja::{AutoEscape, Environment, ErrorKind, UndefinedBehavior};

use super::context::RenderContext;
use super::value::PlacementToken;
use super::xml::check_well_formed;
use super::EngineError;
use embed::Embedder;
use package::Package;

pub use package::{CONTENT_TYPES, MAIN_PART};

/// Names every template can use without binding them.
const BUILTINS: [&str; 10] = [
    "range", "dict", "debug", "namespace", "loop", "self", "super", "caller", "varargs", "kwargs",
];

fn environment<'source>() -> Environment<'source> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env.set_auto_escape_callback(|_| AutoEscape::Html);
    env
}

/// Render `template` docx bytes with `context` into new docx bytes.
pub fn render(template: &[u8], context: &RenderContext) -> Result<Vec<u8>, EngineError> {
    render_cancellable(template, context, &AtomicBool::new(false))
}

/// Like [`render`], but stops between parts once `cancelled` is set.
pub fn render_cancellable(
    template: &[u8],
    context: &RenderContext,
    cancelled: &AtomicBool,
) -> Result<Vec<u8>, EngineError> {
    let mut package = Package::read(template)?;

    let mut rendered = Vec::new();
    for part in package.templated_parts() {
        check_cancelled(cancelled)?;
        let source = package
            .text(&part)?
            .ok_or_else(|| EngineError::RenderAssembly(format!("part '{part}' vanished")))?;
        let prepared = preprocess::prepare(&source)?;
        let output = substitute(&part, &prepared, context)?;
        check_well_formed(&output).map_err(|e| {
            EngineError::TemplateSyntax(format!("'{part}' is not valid XML after substitution: {e}"))
        })?;
        rendered.push((part, output));
    }

    let mut embedder = Embedder::new(context, rendered.iter().map(|(_, xml)| xml.as_str()));
    for (part, xml) in rendered {
        check_cancelled(cancelled)?;
        let embedded = embedder.embed_part(&mut package, &part, &xml)?;
        if embedded.contains(&PlacementToken::marker_prefix()) {
            return Err(EngineError::RenderAssembly(format!(
                "unplaced object marker left in '{part}'"
            )));
        }
        check_well_formed(&embedded).map_err(|e| {
            EngineError::RenderAssembly(format!("'{part}' is not valid XML after embedding: {e}"))
        })?;
        package.put(&part, embedded.into_bytes());
    }
    debug!("Placed {} embedded objects", embedder.placed());

    check_cancelled(cancelled)?;
    package.write()
}

fn check_cancelled(cancelled: &AtomicBool) -> Result<(), EngineError> {
    if cancelled.load(Ordering::Relaxed) {
        return Err(EngineError::RenderAssembly("render cancelled".to_string()));
    }
    Ok(())
}

/// Compile one part and substitute the context into it.
fn substitute(part: &str, source: &str, context: &RenderContext) -> Result<String, EngineError> {
    let env = environment();
    let template = env
        .template_from_named_str(part, source)
        .map_err(|e| EngineError::TemplateSyntax(e.to_string()))?;

    let mut unbound: Vec<String> = template
        .undeclared_variables(false)
        .into_iter()
        .filter(|name| !BUILTINS.contains(&name.as_str()) && !context.contains(name))
        .collect();
    unbound.sort();
    if let Some(name) = unbound.into_iter().next() {
        return Err(EngineError::UnboundVariable { name });
    }

    template
        .render(context.variables())
        .map_err(|e| render_error(e, source))
}

fn render_error(e: minijinja::Error, source: &str) -> EngineError {
    match e.kind() {
        ErrorKind::SyntaxError
        | ErrorKind::UnknownFilter
        | ErrorKind::UnknownTest
        | ErrorKind::UnknownFunction => EngineError::TemplateSyntax(e.to_string()),
        ErrorKind::UndefinedError => {
            let name = e
                .range()
                .and_then(|range| source.get(range))
                .map(|expr| expr.trim().to_string())
                .filter(|expr| !expr.is_empty())
                .unwrap_or_else(|| "unknown".to_string());
            EngineError::UnboundVariable { name }
        }
        _ => EngineError::StructuralMismatch(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::value::{ContentFormat, EmbeddedObject, Extent, ObjectKind, ResolvedValue, Scalar};
    use std::collections::BTreeMap;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

    fn docx(body: &str) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file(CONTENT_TYPES, SimpleFileOptions::default()).unwrap();
        writer
            .write_all(br#"<?xml version="1.0"?><Types xmlns="t"><Default Extension="xml" ContentType="application/xml"/></Types>"#)
            .unwrap();
        writer.start_file(MAIN_PART, SimpleFileOptions::default()).unwrap();
        let document = format!(r#"<w:document xmlns:w="{W_NS}"><w:body>{body}</w:body></w:document>"#);
        writer.write_all(document.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn paragraph(text: &str) -> String {
        format!("<w:p><w:r><w:t>{text}</w:t></w:r></w:p>")
    }

    fn context(entries: Vec<(&str, ResolvedValue)>) -> RenderContext {
        let map: BTreeMap<String, ResolvedValue> = entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        RenderContext::build(ResolvedValue::Mapping(map)).unwrap()
    }

    fn text(value: &str) -> ResolvedValue {
        ResolvedValue::Scalar(Scalar::Text(value.to_string()))
    }

    fn document_xml(bytes: &[u8]) -> String {
        Package::read(bytes).unwrap().text(MAIN_PART).unwrap().unwrap()
    }

    #[test]
    fn test_scalar_substitution_escapes_markup() {
        let ctx = context(vec![("TITLE", text("Q1 <draft> & more"))]);

        let out = render(&docx(&paragraph("{{ TITLE }}")), &ctx).unwrap();

        assert!(document_xml(&out).contains("Q1 &lt;draft&gt; &amp; more"));
    }

    #[test]
    fn test_unbound_variable_is_reported_by_name() {
        let ctx = context(vec![("TITLE", text("x"))]);

        let err = render(&docx(&paragraph("{{ TITLE }} {{ MISSING }}")), &ctx).unwrap_err();

        assert!(matches!(err, EngineError::UnboundVariable { ref name } if name == "MISSING"));
    }

    #[test]
    fn test_unbound_attribute_in_loop_is_reported() {
        let rows = ResolvedValue::Sequence(vec![ResolvedValue::Mapping(BTreeMap::from([(
            "A".to_string(),
            text("1"),
        )]))]);
        let ctx = context(vec![("ROWS", rows)]);

        let err = render(
            &docx(&paragraph("{% for row in ROWS %}{{ row.B }}{% endfor %}")),
            &ctx,
        )
        .unwrap_err();

        assert!(matches!(err, EngineError::UnboundVariable { .. }), "{err:?}");
    }

    #[test]
    fn test_broken_template_is_a_syntax_error() {
        let ctx = context(vec![]);
        let err = render(&docx(&paragraph("{% if %}")), &ctx).unwrap_err();
        assert!(matches!(err, EngineError::TemplateSyntax(_)));
    }

    #[test]
    fn test_iterating_a_scalar_is_a_structural_mismatch() {
        let ctx = context(vec![("ROWS", ResolvedValue::Scalar(Scalar::Bool(true)))]);
        let err = render(
            &docx(&paragraph("{% for row in ROWS %}x{% endfor %}")),
            &ctx,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::StructuralMismatch(_)), "{err:?}");
    }

    #[test]
    fn test_image_marker_becomes_drawing() {
        let image = EmbeddedObject {
            kind: ObjectKind::Image,
            format: ContentFormat::Png,
            content: vec![0x89, b'P', b'N', b'G'],
            extent: Some(Extent { cx: 360000, cy: 180000 }),
            token: PlacementToken(0),
        };
        let ctx = context(vec![("LOGO", ResolvedValue::Object(image))]);

        let out = render(&docx(&paragraph("Logo: {{ LOGO }}")), &ctx).unwrap();

        let package = Package::read(&out).unwrap();
        let xml = package.text(MAIN_PART).unwrap().unwrap();
        assert!(xml.contains(r#"<wp:extent cx="360000" cy="180000"/>"#));
        assert!(xml.contains("Logo: </w:t></w:r><w:r><w:drawing>"));
        assert_eq!(package.get("word/media/docgen0.png"), Some(&[0x89, b'P', b'N', b'G'][..]));
        let rels = package.text("word/_rels/document.xml.rels").unwrap().unwrap();
        assert!(rels.contains(r#"Id="rIdDg0""#));
        let types = package.text(CONTENT_TYPES).unwrap().unwrap();
        assert!(types.contains(r#"Extension="png""#));
    }

    #[test]
    fn test_rendering_twice_gives_identical_bytes() {
        let ctx = context(vec![("TITLE", text("same"))]);
        let template = docx(&paragraph("{{ TITLE }}"));

        assert_eq!(render(&template, &ctx).unwrap(), render(&template, &ctx).unwrap());
    }

    #[test]
    fn test_cancelled_render_stops_before_output() {
        let ctx = context(vec![("TITLE", text("x"))]);
        let cancelled = AtomicBool::new(true);

        let err = render_cancellable(&docx(&paragraph("{{ TITLE }}")), &ctx, &cancelled)
            .unwrap_err();

        assert!(matches!(err, EngineError::RenderAssembly(ref m) if m == "render cancelled"));
    }
}
